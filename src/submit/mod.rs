//! Verdict submitters.

pub mod amqp;

use async_trait::async_trait;

use crate::error::Result;

/// Routing key used for all verdict publishes.
pub const ROUTING_KEY: &str = "nightwatch";

/// An entity that delivers verdict JSON payloads to an endpoint.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, payload: &[u8]) -> Result<()>;

    /// Release any connections and background tasks. Idempotent.
    async fn finish(&self);
}

/// Submitter that only journals payloads; used with `--dummy` and in tests.
pub struct DummySubmitter;

#[async_trait]
impl Submitter for DummySubmitter {
    async fn submit(&self, payload: &[u8]) -> Result<()> {
        tracing::info!(
            submitter = "dummy",
            payload = %String::from_utf8_lossy(payload),
            "verdict"
        );
        Ok(())
    }

    async fn finish(&self) {}
}
