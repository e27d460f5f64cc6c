//! The filter service: owns the scheduler and hands out sessions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::FragmentBackend;
use crate::error::MatchError;
use crate::filter::FilterQuery;
use crate::matcher::{Direction, Matcher};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerMetrics};
use crate::session::MatcherSession;

/// Configuration for [`FilterService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Must equal the indexer's section size.
    #[serde(default = "default_section_size")]
    pub section_size: u64,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_section_size() -> u64 {
    4096
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            section_size: default_section_size(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Entry point for log-filter queries over the bloom-bits index.
pub struct FilterService {
    section_size: u64,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
}

impl FilterService {
    /// Start the retrieval scheduler over `backend`.
    pub fn new(backend: Arc<dyn FragmentBackend>, config: ServiceConfig) -> Result<Self, MatchError> {
        if config.section_size == 0 {
            return Err(MatchError::Config("section_size must be non-zero".into()));
        }
        let scheduler = Scheduler::start(backend, config.scheduler.clone())?;
        info!(
            section_size = config.section_size,
            workers = config.scheduler.workers,
            batch_size = config.scheduler.batch_size,
            "filter service started"
        );
        Ok(Self {
            section_size: config.section_size,
            scheduler,
            cancel: CancellationToken::new(),
        })
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    /// Open a session reporting blocks in `start..=end` that match `query`.
    pub fn new_session(
        &self,
        query: &FilterQuery,
        start: u64,
        end: u64,
        direction: Direction,
    ) -> Result<MatcherSession, MatchError> {
        if start > end {
            return Err(MatchError::InvalidRange { start, end });
        }
        let matcher = Matcher::new(self.section_size, query)?;
        debug!(start, end, ?direction, bits = matcher.required_bits().len(), "new matcher session");
        Ok(MatcherSession::new(
            matcher,
            self.scheduler.clone(),
            self.cancel.child_token(),
            start,
            end,
            direction,
        ))
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.scheduler.metrics()
    }

    /// Cancel every open session and stop the scheduler.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.scheduler.close().await;
        info!("filter service closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bloombits_core::types::FragmentId;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::RetrievalError;

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FragmentBackend for CountingBackend {
        async fn retrieve(&self, batch: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![None; batch.len()])
        }
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ServiceConfig = serde_json::from_str(r#"{"scheduler": {"wait_ms": 5}}"#).unwrap();
        assert_eq!(cfg.section_size, 4096);
        assert_eq!(cfg.scheduler.wait_ms, 5);
        assert_eq!(cfg.scheduler.workers, 3);
        assert_eq!(cfg.scheduler.batch_size, 16);
    }

    #[tokio::test]
    async fn rejects_bad_config() {
        let backend = Arc::new(CountingBackend::default());
        let zero_size = ServiceConfig {
            section_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            FilterService::new(backend.clone(), zero_size),
            Err(MatchError::Config(_))
        ));

        let mut no_workers = ServiceConfig::default();
        no_workers.scheduler.workers = 0;
        assert!(matches!(
            FilterService::new(backend, no_workers),
            Err(MatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn wildcard_query_needs_no_fragments() {
        let backend = Arc::new(CountingBackend::default());
        let service = FilterService::new(
            backend.clone(),
            ServiceConfig {
                section_size: 8,
                ..Default::default()
            },
        )
        .unwrap();

        let query = FilterQuery::from_bit_groups([Vec::<u16>::new()]).unwrap();
        let mut session = service.new_session(&query, 5, 18, Direction::Ascending).unwrap();
        let mut blocks = Vec::new();
        while let Some(block) = session.next().await.unwrap() {
            blocks.push(block);
        }
        assert_eq!(blocks, (5..=18).collect::<Vec<_>>());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        service.close().await;
    }

    #[tokio::test]
    async fn sessions_keep_their_id_and_direction() {
        let service = FilterService::new(Arc::new(CountingBackend::default()), ServiceConfig::default()).unwrap();
        let query = FilterQuery::from_bit_groups([vec![7u16]]).unwrap();
        let up = service.new_session(&query, 0, 10, Direction::Ascending).unwrap();
        let down = service.new_session(&query, 0, 10, Direction::Descending).unwrap();
        assert_ne!(up.id(), down.id());
        assert_eq!(up.direction(), Direction::Ascending);
        assert_eq!(down.direction(), Direction::Descending);
        drop((up, down));
        service.close().await;
    }

    #[tokio::test]
    async fn sessions_opened_after_close_are_cancelled() {
        let service = FilterService::new(Arc::new(CountingBackend::default()), ServiceConfig::default()).unwrap();
        let query = FilterQuery::from_bit_groups([vec![7u16]]).unwrap();
        service.close().await;

        // A session opened after close is already cancelled.
        let mut session = service.new_session(&query, 0, 10, Direction::Descending).unwrap();
        assert_eq!(session.next().await, Ok(None));
    }
}
