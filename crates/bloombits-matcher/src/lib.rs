//! bloombits-matcher — answers log-filter queries from bit-plane fragments.
//!
//! # Architecture
//!
//! ```text
//! FilterService ── new_session ──▶ MatcherSession (one per query)
//!       │                               │ required bits of the current section
//!       ▼                               ▼
//!   Scheduler ◀──── request / release ──┘
//!       │  workers: batch + dedup
//!       ▼
//!   FragmentBackend ── LocalBackend  (key-value store, stale re-derivation)
//!                   └─ RemoteBackend (fetcher + timeout + retry)
//! ```

pub mod backend;
pub mod error;
pub mod filter;
pub mod local;
pub mod matcher;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod session;

pub use backend::FragmentBackend;
pub use error::{MatchError, RetrievalError};
pub use filter::FilterQuery;
pub use local::LocalBackend;
pub use matcher::{Direction, Matcher};
pub use remote::{RemoteBackend, RemoteConfig, RemoteFetcher};
pub use retry::{RetryConfig, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerMetrics, SessionId};
pub use service::{FilterService, ServiceConfig};
pub use session::MatcherSession;
