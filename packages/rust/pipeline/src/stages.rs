//! The per-item stage pipeline.
//!
//! Every item moves through the same ordered stages: fetch its content,
//! summarize it, extract structured metadata, refine that metadata. Each
//! stage's input is the previous stage's output verbatim, including skip
//! and error sentinels; there is no semantic recovery mid-pipeline. Stage
//! failures are recorded and the item still reaches a terminal state; only
//! the scheduler decides what is fatal for the run.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use tracing::{debug, error, instrument, warn};

use wikiharvest_client::{EnrichClient, WikiClient};
use wikiharvest_shared::{HarvestError, Item, ItemRecord, StageResult};

use crate::chunker;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)```").unwrap_or_else(|_| unreachable!()));
static FENCED_ANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)```").unwrap_or_else(|_| unreachable!()));

const SUMMARIZE_PROMPT: &str = "Summarize the following content:";
const EXTRACT_PROMPT: &str = "Extract structured metadata (topics, systems, people, action \
                              items) from the following summary. Respond with a single JSON \
                              object:";
const REFINE_PROMPT: &str = "Refine the following JSON metadata: normalize keys, deduplicate \
                             values, and drop empty fields. Respond with a single JSON object:";
const COMBINE_PROMPT: &str = "Combine the following partial results into a single, coherent \
                              result:";

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the enrichment pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Summarize,
    ExtractMetadata,
    RefineMetadata,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 4] = [
        Stage::Fetch,
        Stage::Summarize,
        Stage::ExtractMetadata,
        Stage::RefineMetadata,
    ];

    /// Stage name as recorded in checkpoints and the error log.
    pub fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Summarize => "summarize",
            Self::ExtractMetadata => "extract_metadata",
            Self::RefineMetadata => "refine_metadata",
        }
    }

    fn prompt(self) -> &'static str {
        match self {
            Self::Fetch => "",
            Self::Summarize => SUMMARIZE_PROMPT,
            Self::ExtractMetadata => EXTRACT_PROMPT,
            Self::RefineMetadata => REFINE_PROMPT,
        }
    }

    /// Whether the stage requires a JSON object shape in its input.
    fn expects_json_input(self) -> bool {
        matches!(self, Self::RefineMetadata)
    }

    /// Whether the stage's output is parsed into a structured payload.
    fn parses_json_output(self) -> bool {
        matches!(self, Self::ExtractMetadata | Self::RefineMetadata)
    }
}

/// Whether a record has a result for every configured stage.
pub fn record_complete(record: &ItemRecord) -> bool {
    Stage::ALL.iter().all(|s| record.stage(s.name()).is_some())
}

/// Result of driving one item through the pipeline.
#[derive(Debug)]
pub struct ItemOutcome {
    /// The accumulated (possibly partial) record.
    pub record: ItemRecord,
    /// Whether any stage actually ran this time. False when cancellation
    /// arrived before the first pending stage.
    pub advanced: bool,
}

// ---------------------------------------------------------------------------
// StagePipeline
// ---------------------------------------------------------------------------

/// Executes all stages for one item.
pub struct StagePipeline {
    wiki: WikiClient,
    enrich: EnrichClient,
    chunk_limit: usize,
}

impl StagePipeline {
    pub fn new(wiki: WikiClient, enrich: EnrichClient, chunk_limit: usize) -> Self {
        Self {
            wiki,
            enrich,
            chunk_limit: chunk_limit.max(1),
        }
    }

    /// The enrichment client, for the scheduler's health precheck.
    pub fn enrich(&self) -> &EnrichClient {
        &self.enrich
    }

    /// Drive `item` through every stage it has not yet completed.
    ///
    /// `prior` is the item's record from the checkpoint, if any; stages it
    /// already completed successfully are reused, not re-run. Cancellation
    /// is checked between stages; an in-flight call always finishes.
    #[instrument(skip_all, fields(item = %item.id))]
    pub async fn process_item(
        &self,
        item: &Item,
        prior: Option<ItemRecord>,
        cancel: &AtomicBool,
    ) -> ItemOutcome {
        let mut record = prior.unwrap_or_else(|| ItemRecord::new(&item.id));
        let mut advanced = false;
        let mut input = String::new();

        for stage in Stage::ALL {
            if let Some(existing) = record.stage(stage.name()) {
                if existing.is_ok() {
                    input = existing.output.clone();
                    continue;
                }
            }

            if cancel.load(Ordering::Relaxed) {
                debug!(stage = stage.name(), "cancelled before stage");
                break;
            }

            let result = match stage {
                Stage::Fetch => self.run_fetch(item).await,
                _ => self.run_enrichment(item, stage, &input).await,
            };

            input = result.output.clone();
            record.record(stage.name(), result);
            advanced = true;
        }

        ItemOutcome { record, advanced }
    }

    /// Fetch the item's raw markup and convert it to portable text.
    async fn run_fetch(&self, item: &Item) -> StageResult {
        match self.wiki.fetch_body(&item.id).await {
            Ok(markup) => StageResult::ok(wikiharvest_markup::convert(&markup)),
            Err(e) => {
                warn!(item = %item.id, error = %e, "fetch failed");
                StageResult::failed(e)
            }
        }
    }

    /// Run one enrichment stage, chunking oversized input.
    async fn run_enrichment(&self, item: &Item, stage: Stage, input: &str) -> StageResult {
        if input.trim().is_empty() {
            return StageResult::skipped("empty input");
        }
        if stage.expects_json_input() && !(input.contains('{') && input.contains('}')) {
            return StageResult::skipped("no JSON object in input");
        }

        let key = format!("{}/{}", item.id, stage.name());
        let result = if input.len() > self.chunk_limit {
            self.generate_chunked(&key, stage, input).await
        } else {
            self.enrich.generate(&key, stage.prompt(), input).await
        };
        let output = match result {
            Ok(output) => output,
            Err(e) => return Self::stage_failure(&key, e),
        };

        if stage.parses_json_output() {
            let json = extract_json(&output);
            if json.is_none() {
                warn!(key, "no parseable JSON in stage output");
            }
            StageResult::ok_json(output, json)
        } else {
            StageResult::ok(output)
        }
    }

    // Recoverable failures (retries spent, transient network trouble) are
    // routine during long runs; anything else deserves a louder log line.
    fn stage_failure(key: &str, e: HarvestError) -> StageResult {
        if e.is_recoverable() {
            warn!(key, error = %e, "stage failed");
        } else {
            error!(key, error = %e, "stage failed with non-retryable error");
        }
        StageResult::failed(e)
    }

    /// Per-chunk calls plus one combine call. Chunks run sequentially so a
    /// single item never holds more than one outstanding call.
    async fn generate_chunked(
        &self,
        key: &str,
        stage: Stage,
        input: &str,
    ) -> wikiharvest_shared::Result<String> {
        let chunks = chunker::split(input, self.chunk_limit);
        debug!(key, chunks = chunks.len(), "input exceeds chunk limit");

        let mut partials = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            partials.push(self.enrich.generate(key, stage.prompt(), chunk).await?);
        }

        self.enrich
            .generate(key, COMBINE_PROMPT, &partials.join("\n\n"))
            .await
    }
}

// ---------------------------------------------------------------------------
// Structured-output extraction
// ---------------------------------------------------------------------------

/// Pull a JSON object out of model output: a ```json fence first, then any
/// fence, then the outermost bare `{...}` span. Returns `None` when nothing
/// parses; the caller records that and moves on.
pub fn extract_json(output: &str) -> Option<serde_json::Value> {
    for regex in [&*FENCED_JSON, &*FENCED_ANY] {
        if let Some(captures) = regex.captures(output) {
            if let Some(candidate) = captures.get(1) {
                if let Ok(value) = serde_json::from_str(candidate.as_str().trim()) {
                    return Some(value);
                }
            }
        }
    }

    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&output[start..=end]).ok()
}
