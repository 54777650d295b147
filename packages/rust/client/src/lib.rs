//! HTTP clients for wikiharvest: the upstream wiki content API and the
//! enrichment service, both behind a shared retrying transport.

pub mod llm;
pub mod transport;
pub mod wiki;

pub use llm::EnrichClient;
pub use transport::{RetryPolicy, RetryTransport};
pub use wiki::{ItemScope, WikiClient};
