//! Analyzer plugin contract and registry.

pub mod dispatch;
pub mod sigscan;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// An open sample handed to each analyzer.
///
/// The file is already open; analyzers should seek to the start before
/// reading, since another analyzer may have consumed the stream.
pub struct FileSample<'a> {
    pub file: &'a File,
    pub metadata: &'a std::fs::Metadata,
    pub path: &'a Path,
}

/// Outcome of one analyzer pass over one sample.
#[derive(Debug, Default)]
pub struct Analysis {
    /// Structured reason payload; recorded under the analyzer's name in the
    /// verdict when present.
    pub reason: Option<Value>,
    pub suspicious: bool,
}

/// Contract every analyzer implements.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// (Re)build the analyzer's matching engine. Called once at startup and
    /// again on the reload control event; a failure here is fatal to the
    /// process.
    async fn reinitialize(&self) -> Result<()>;

    /// Analyze one sample. Errors are logged by the dispatcher and do not
    /// abort the pass; the next analyzer still runs.
    async fn process_file(&self, sample: FileSample<'_>) -> Result<Analysis>;
}

/// Ordered collection of all active analyzers.
///
/// Membership is fixed after construction, before any worker runs, so
/// workers iterate without a lock. Only `reload` mutates analyzer internals,
/// serialised by its own mutex.
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl AnalyzerRegistry {
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        Self {
            analyzers,
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn analyzers(&self) -> &[Arc<dyn Analyzer>] {
        &self.analyzers
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Reinitialize every analyzer in registration order. Any failure is
    /// surfaced to the caller, which treats it as fatal.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;
        for analyzer in &self.analyzers {
            analyzer.reinitialize().await?;
        }
        tracing::info!(count = self.analyzers.len(), "analyzers initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingAnalyzer;

    #[async_trait]
    impl Analyzer for FailingAnalyzer {
        fn name(&self) -> &str {
            "failing"
        }
        async fn reinitialize(&self) -> Result<()> {
            Err(crate::error::AppError::Analyzer("no rules".into()))
        }
        async fn process_file(&self, _sample: FileSample<'_>) -> Result<Analysis> {
            Ok(Analysis::default())
        }
    }

    struct CountingAnalyzer {
        reinits: AtomicUsize,
    }

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
        fn name(&self) -> &str {
            "counting"
        }
        async fn reinitialize(&self) -> Result<()> {
            self.reinits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn process_file(&self, _sample: FileSample<'_>) -> Result<Analysis> {
            Ok(Analysis::default())
        }
    }

    #[tokio::test]
    async fn reload_reinitializes_in_order() {
        let counting = Arc::new(CountingAnalyzer {
            reinits: AtomicUsize::new(0),
        });
        let registry = AnalyzerRegistry::new(vec![counting.clone()]);
        registry.reload().await.unwrap();
        registry.reload().await.unwrap();
        assert_eq!(counting.reinits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reload_surfaces_failure() {
        let registry = AnalyzerRegistry::new(vec![Arc::new(FailingAnalyzer)]);
        assert!(registry.reload().await.is_err());
    }
}
