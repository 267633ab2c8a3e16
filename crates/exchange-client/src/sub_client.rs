//! Contracts between the exchange client and its per-endpoint sub-clients

use exchange_core::{ExchangeError, SerializedPage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fetch envelope handed to every sub-client at creation
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Per-request response size cap in bytes
    pub max_response_size: u64,
    /// Backoff floor for transient endpoint errors
    pub min_error_duration: Duration,
    /// Retry budget; the sub-client escalates once errors persist this long
    pub max_error_duration: Duration,
}

/// Lifecycle state reported by a sub-client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubClientState {
    /// Idle, eligible for dispatch
    Queued,
    /// An HTTP request is outstanding
    Running,
    /// The endpoint reported end-of-stream
    Finished,
    /// Closed by the exchange client
    Closed,
}

impl fmt::Display for SubClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubClientState::Queued => write!(f, "queued"),
            SubClientState::Running => write!(f, "running"),
            SubClientState::Finished => write!(f, "finished"),
            SubClientState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time status of one endpoint fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageBufferClientStatus {
    /// Endpoint identity
    pub location: String,
    /// Current lifecycle state
    pub state: SubClientState,
    /// Pages delivered so far
    pub pages_received: u64,
    /// Fetches started
    pub requests_scheduled: u64,
    /// Fetches finished, successfully or not
    pub requests_completed: u64,
}

/// Per-endpoint fetcher owning its transport and retry loop.
///
/// `schedule_request` and `close` are invoked while the exchange client holds
/// its internal lock, so both must be fire-and-forget: no blocking, no
/// panicking, and no synchronous callback invocation on the calling thread.
pub trait PageBufferClient: Send + Sync {
    /// Start one fetch against the endpoint if none is outstanding
    fn schedule_request(&self);

    /// Stop fetching and release transport resources; idempotent
    fn close(&self);

    /// Point-in-time status snapshot
    fn status(&self) -> PageBufferClientStatus;
}

/// Callbacks a sub-client drives on its parent exchange.
///
/// All four acquire the exchange's internal lock; a sub-client must not hold
/// any of its own locks that its `close` path also needs when calling in.
pub trait ExchangeCallback: Send + Sync {
    /// Deliver a batch of pages in producer order.
    ///
    /// Returns `false` when the exchange is closed or failed; the sub-client
    /// must drop the batch.
    fn add_pages(&self, location: &str, pages: Vec<SerializedPage>) -> bool;

    /// The outstanding request finished; the sub-client is ready for another
    fn request_complete(&self, location: &str);

    /// The endpoint delivered its last page
    fn client_finished(&self, location: &str);

    /// The endpoint failed permanently; first failure wins
    fn client_failed(&self, location: &str, cause: ExchangeError);
}

/// Creates sub-clients bound to an endpoint and callback handle.
///
/// Concrete factories own the transport (HTTP client, runtime handle) and the
/// retry loop configured from [`FetchSettings`].
pub trait PageBufferClientFactory: Send + Sync {
    /// Build a sub-client for `location` reporting into `callback`
    fn create_client(
        &self,
        location: Arc<str>,
        settings: FetchSettings,
        callback: Arc<dyn ExchangeCallback>,
    ) -> Arc<dyn PageBufferClient>;
}
