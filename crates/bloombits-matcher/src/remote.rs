//! Remote retrieval backend: a fetcher wrapped in timeout, retry and validation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bloombits_core::codec::plane_len;
use bloombits_core::types::FragmentId;

use crate::backend::FragmentBackend;
use crate::error::RetrievalError;
use crate::retry::{RetryConfig, RetryPolicy};

/// A transport able to fetch decompressed fragments from a peer or service.
#[async_trait]
pub trait RemoteFetcher: Send + Sync + 'static {
    /// Fetch `ids`, one entry per id in order (`None` = the peer does not have it).
    async fn fetch(&self, ids: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError>;
}

/// Configuration for [`RemoteBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

/// [`FragmentBackend`] over a [`RemoteFetcher`].
pub struct RemoteBackend<F> {
    fetcher: F,
    section_size: u64,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<F: RemoteFetcher> RemoteBackend<F> {
    pub fn new(fetcher: F, section_size: u64, config: RemoteConfig) -> Self {
        Self {
            fetcher,
            section_size,
            timeout: Duration::from_millis(config.timeout_ms),
            retry: RetryPolicy::new(config.retry),
        }
    }

    async fn fetch_once(&self, batch: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError> {
        let fragments = tokio::time::timeout(self.timeout, self.fetcher.fetch(batch))
            .await
            .map_err(|_| RetrievalError::Timeout {
                ms: self.timeout.as_millis() as u64,
            })??;

        if fragments.len() != batch.len() {
            return Err(RetrievalError::Backend(format!(
                "remote returned {} fragments for {} ids",
                fragments.len(),
                batch.len()
            )));
        }
        let want = plane_len(self.section_size);
        for (id, fragment) in batch.iter().zip(&fragments) {
            if let Some(plane) = fragment {
                if plane.len() != want {
                    return Err(RetrievalError::Backend(format!(
                        "remote fragment {id} has {} bytes, want {want}",
                        plane.len()
                    )));
                }
            }
        }
        Ok(fragments)
    }
}

#[async_trait]
impl<F: RemoteFetcher> FragmentBackend for RemoteBackend<F> {
    async fn retrieve(&self, batch: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetch_once(batch).await {
                Ok(fragments) => return Ok(fragments),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            ids = batch.len(),
                            "retrying fragment retrieval"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        debug!(attempt, error = %e, "fragment retrieval retries exhausted");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        len: usize,
    }

    #[async_trait]
    impl RemoteFetcher for Flaky {
        async fn fetch(&self, ids: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(RetrievalError::Backend("connection reset".into()));
            }
            Ok(ids.iter().map(|_| Some(Bytes::from(vec![0xff; self.len]))).collect())
        }
    }

    struct Slow;

    #[async_trait]
    impl RemoteFetcher for Slow {
        async fn fetch(&self, _ids: &[FragmentId]) -> Result<Vec<Option<Bytes>>, RetrievalError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn config(max_retries: u32) -> RemoteConfig {
        RemoteConfig {
            timeout_ms: 50,
            retry: RetryConfig {
                max_retries,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                multiplier: 2.0,
            },
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let backend = RemoteBackend::new(
            Flaky { failures: 2, calls: AtomicU32::new(0), len: 2 },
            16,
            config(3),
        );
        let out = backend.retrieve(&[FragmentId::new(1, 0)]).await.unwrap();
        assert_eq!(out[0].as_deref(), Some(&[0xff, 0xff][..]));
        assert_eq!(backend.fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_error() {
        let backend = RemoteBackend::new(
            Flaky { failures: 10, calls: AtomicU32::new(0), len: 2 },
            16,
            config(1),
        );
        let err = backend.retrieve(&[FragmentId::new(1, 0)]).await.unwrap_err();
        assert_eq!(err, RetrievalError::Backend("connection reset".into()));
        assert_eq!(backend.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wrong_length_is_rejected() {
        let backend = RemoteBackend::new(
            Flaky { failures: 0, calls: AtomicU32::new(0), len: 3 },
            16,
            config(0),
        );
        assert!(matches!(
            backend.retrieve(&[FragmentId::new(1, 0)]).await,
            Err(RetrievalError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let backend = RemoteBackend::new(Slow, 16, config(0));
        assert_eq!(
            backend.retrieve(&[FragmentId::new(0, 0)]).await.unwrap_err(),
            RetrievalError::Timeout { ms: 50 }
        );
    }
}
