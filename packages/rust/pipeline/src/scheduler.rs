//! The batch scheduler.
//!
//! Drives pending work-tree items through the stage pipeline in fixed-size
//! batches with bounded concurrency inside each batch. Shared state is only
//! touched at the single-threaded batch boundary: workers return their
//! records through join handles, the fold updates the in-memory checkpoint,
//! and the checkpoint plus both reports are rewritten before the next batch
//! starts. Interrupting a run therefore loses at most the current batch's
//! unfinished items.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use wikiharvest_checkpoint::CheckpointStore;
use wikiharvest_report::ReportWriter;
use wikiharvest_shared::{ErrorLog, Result, RunConfig, RunSummary};
use wikiharvest_worktree::WorkTree;

use crate::progress::ProgressReporter;
use crate::stages::{StagePipeline, record_complete};

/// Orchestrates one harvest run over a work tree.
pub struct Scheduler {
    pipeline: Arc<StagePipeline>,
    store: CheckpointStore,
    report: ReportWriter,
    scope: String,
    error_log: ErrorLog,
    concurrency: usize,
    batch_size: usize,
}

impl Scheduler {
    /// `error_log` should be the same handle the transport logs to, so the
    /// run id in the log matches the one in this scheduler's span.
    pub fn new(
        pipeline: StagePipeline,
        store: CheckpointStore,
        report: ReportWriter,
        scope: impl Into<String>,
        error_log: ErrorLog,
        config: &RunConfig,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            store,
            report,
            scope: scope.into(),
            error_log,
            concurrency: config.concurrency.max(1),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Run the pipeline over every pending item in `tree`.
    ///
    /// Returns a summary even when the run was cancelled partway; only an
    /// unhealthy enrichment service or an unusable checkpoint abort before
    /// any work happens.
    #[instrument(skip_all, fields(scope = %self.scope, run_id = %self.error_log.run_id(), items = tree.len()))]
    pub async fn run(
        &self,
        tree: &WorkTree,
        cancel: Arc<AtomicBool>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();

        // An unreachable enrichment service fails the run before any item
        // is touched or marked complete.
        progress.phase("Checking enrichment service");
        self.pipeline.enrich().health().await?;

        let mut checkpoint = self.store.load(&self.scope)?;
        let pending: Vec<String> = tree
            .preorder()
            .into_iter()
            .filter(|id| !checkpoint.is_processed(id))
            .map(String::from)
            .collect();
        let skipped = tree.len() - pending.len();

        info!(
            total = tree.len(),
            pending = pending.len(),
            skipped,
            concurrency = self.concurrency,
            batch_size = self.batch_size,
            "starting run"
        );
        progress.phase("Processing items");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut processed = 0usize;
        let mut failed = 0usize;
        let mut done = 0usize;

        for batch in pending.chunks(self.batch_size) {
            if cancel.load(Ordering::Relaxed) {
                info!("cancellation requested, stopping before next batch");
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for id in batch {
                let Some(item) = tree.get(id) else { continue };
                let item = item.clone();
                let prior = checkpoint.record_for(id).cloned();
                let pipeline = Arc::clone(&self.pipeline);
                let semaphore = Arc::clone(&semaphore);
                let cancel = Arc::clone(&cancel);

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    let outcome = pipeline.process_item(&item, prior, &cancel).await;
                    (item.title, outcome)
                }));
            }

            // Single-threaded fold at the batch boundary.
            let mut mutated = false;
            for handle in handles {
                match handle.await {
                    Ok((title, outcome)) => {
                        if !outcome.advanced {
                            continue;
                        }
                        mutated = true;

                        if record_complete(&outcome.record) {
                            if outcome.record.has_failure() {
                                failed += 1;
                            }
                            checkpoint.mark_processed(outcome.record.item_id.clone());
                            processed += 1;
                        }
                        checkpoint.upsert_record(outcome.record);

                        done += 1;
                        progress.item_done(done, pending.len(), &title);
                    }
                    Err(e) => {
                        warn!(error = %e, "item worker panicked");
                    }
                }
            }

            // Durability boundary: everything folded so far survives an
            // interruption after this point.
            if mutated {
                self.store.save(&mut checkpoint)?;
                self.report.write(tree, &checkpoint)?;
            }
        }

        let cancelled = cancel.load(Ordering::Relaxed);
        let summary = RunSummary {
            total: tree.len(),
            processed,
            skipped,
            failed,
            cancelled,
            checkpoint_path: self.store.path().to_path_buf(),
            report_md_path: self.report.md_path().to_path_buf(),
            report_json_path: self.report.json_path().to_path_buf(),
            error_log_path: self.error_log.path().to_path_buf(),
            elapsed: start.elapsed(),
        };

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use url::Url;
    use wikiharvest_client::{EnrichClient, RetryPolicy, RetryTransport, WikiClient};
    use wikiharvest_shared::{ErrorLog, FiltersConfig, HarvestError, Item};
    use wikiharvest_worktree::ItemFilter;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::progress::SilentProgress;

    fn item(id: &str, title: &str, ancestors: &[&str]) -> Item {
        Item {
            id: id.into(),
            title: title.into(),
            ancestors: ancestors.iter().map(|a| a.to_string()).collect(),
            labels: vec![],
            item_type: None,
            version: None,
            updated_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn tree_of(items: Vec<Item>) -> WorkTree {
        WorkTree::build(items, &ItemFilter::from_config(&FiltersConfig::default()))
    }

    fn run_config() -> RunConfig {
        RunConfig {
            concurrency: 2,
            batch_size: 2,
            chunk_limit: 4000,
            max_attempts: 2,
            retry_delay: Duration::from_millis(1),
            exponential_backoff: false,
        }
    }

    struct Fixture {
        dir: std::path::PathBuf,
        scheduler: Scheduler,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn scheduler_for(wiki: &MockServer, llm: &MockServer, config: &RunConfig) -> Fixture {
        let dir = std::env::temp_dir().join(format!("wh-sched-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("mkdir");

        let error_log = ErrorLog::new(dir.join("ENG_errors.log"));
        let transport = RetryTransport::new(
            RetryPolicy {
                max_attempts: config.max_attempts,
                retry_delay: config.retry_delay,
                exponential_backoff: config.exponential_backoff,
            },
            error_log.clone(),
        )
        .unwrap();

        let wiki_client =
            WikiClient::new(transport.clone(), Url::parse(&wiki.uri()).unwrap(), None);
        let enrich = EnrichClient::new(transport, Url::parse(&llm.uri()).unwrap(), "test-model");
        let pipeline = StagePipeline::new(wiki_client, enrich, config.chunk_limit);

        let scheduler = Scheduler::new(
            pipeline,
            CheckpointStore::for_scope(&dir, "ENG"),
            ReportWriter::for_scope(&dir, "ENG"),
            "ENG",
            error_log,
            config,
        );
        Fixture { dir, scheduler }
    }

    async fn mount_healthy_llm(llm: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(llm)
            .await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"result": "{\"ok\": true}"})),
            )
            .mount(llm)
            .await;
    }

    async fn mount_all_content(wiki: &MockServer) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/rest/api/content/\d+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "body": {"storage": {"value": "<p>some page text</p>"}}
            })))
            .mount(wiki)
            .await;
    }

    #[tokio::test]
    async fn run_processes_everything_and_writes_artifacts() {
        let wiki = MockServer::start().await;
        let llm = MockServer::start().await;
        mount_all_content(&wiki).await;
        mount_healthy_llm(&llm).await;

        let tree = tree_of(vec![
            item("1", "Root", &[]),
            item("2", "Child", &["1"]),
            item("3", "Other root", &[]),
        ]);
        let fixture = scheduler_for(&wiki, &llm, &run_config());

        let cancel = Arc::new(AtomicBool::new(false));
        let summary = fixture
            .scheduler
            .run(&tree, cancel, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        assert!(!summary.cancelled);

        assert!(summary.checkpoint_path.exists());
        assert!(summary.report_md_path.exists());
        assert!(summary.report_json_path.exists());

        let md = std::fs::read_to_string(&summary.report_md_path).unwrap();
        assert!(md.contains("- [x] Root"));
    }

    #[tokio::test]
    async fn second_run_skips_everything_and_leaves_checkpoint_untouched() {
        let wiki = MockServer::start().await;
        let llm = MockServer::start().await;
        mount_all_content(&wiki).await;
        mount_healthy_llm(&llm).await;

        let tree = tree_of(vec![item("1", "Root", &[]), item("2", "Child", &["1"])]);
        let fixture = scheduler_for(&wiki, &llm, &run_config());
        let cancel = Arc::new(AtomicBool::new(false));

        let first = fixture
            .scheduler
            .run(&tree, Arc::clone(&cancel), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.processed, 2);
        let bytes_after_first = std::fs::read(&first.checkpoint_path).unwrap();

        let second = fixture
            .scheduler
            .run(&tree, cancel, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 2);

        let bytes_after_second = std::fs::read(&second.checkpoint_path).unwrap();
        assert_eq!(bytes_after_first, bytes_after_second);
    }

    #[tokio::test]
    async fn unhealthy_service_aborts_before_any_work() {
        let wiki = MockServer::start().await;
        let llm = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&llm)
            .await;

        let tree = tree_of(vec![item("1", "Root", &[])]);
        let fixture = scheduler_for(&wiki, &llm, &run_config());

        let err = fixture
            .scheduler
            .run(&tree, Arc::new(AtomicBool::new(false)), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Enrichment(_)));
        assert!(!fixture.scheduler.store.path().exists());
    }

    /// Sets the cancel flag once the first item completes, so the run stops
    /// at the next batch boundary.
    struct CancelAfterFirst(Arc<AtomicBool>);

    impl ProgressReporter for CancelAfterFirst {
        fn phase(&self, _name: &str) {}
        fn item_done(&self, _current: usize, _total: usize, _title: &str) {
            self.0.store(true, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn cancelled_run_persists_and_resumes_where_it_left_off() {
        let wiki = MockServer::start().await;
        let llm = MockServer::start().await;
        mount_all_content(&wiki).await;
        mount_healthy_llm(&llm).await;

        let tree = tree_of(vec![
            item("1", "First", &[]),
            item("2", "Second", &[]),
            item("3", "Third", &[]),
        ]);

        // One item per batch so cancellation after the first batch leaves
        // real pending work behind.
        let mut config = run_config();
        config.batch_size = 1;
        config.concurrency = 1;
        let fixture = scheduler_for(&wiki, &llm, &config);

        let cancel = Arc::new(AtomicBool::new(false));
        let first = fixture
            .scheduler
            .run(&tree, Arc::clone(&cancel), &CancelAfterFirst(Arc::clone(&cancel)))
            .await
            .unwrap();

        assert!(first.cancelled);
        assert_eq!(first.processed, 1);
        assert!(first.checkpoint_path.exists());

        // Fresh flag: the next run picks up the remaining two items only.
        let second = fixture
            .scheduler
            .run(&tree, Arc::new(AtomicBool::new(false)), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.processed, 2);
    }

    #[tokio::test]
    async fn item_failures_do_not_abort_the_run() {
        let wiki = MockServer::start().await;
        let llm = MockServer::start().await;
        // Content fetch works; every generate call fails.
        mount_all_content(&wiki).await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(&llm)
            .await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&llm)
            .await;

        let tree = tree_of(vec![item("1", "Root", &[]), item("2", "Child", &["1"])]);
        let fixture = scheduler_for(&wiki, &llm, &run_config());

        let summary = fixture
            .scheduler
            .run(&tree, Arc::new(AtomicBool::new(false)), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 2);

        // Every failed attempt landed in the error log, stamped with this
        // run's id so later runs against the same log stay separable.
        let log = std::fs::read_to_string(&summary.error_log_path).unwrap();
        assert!(log.contains("/summarize]"));
        let stamp = format!("[{}]", fixture.scheduler.error_log.run_id());
        assert!(log.lines().all(|l| l.contains(&stamp)));
    }
}
