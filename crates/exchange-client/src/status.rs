//! Status snapshot for the exchange client

use crate::sub_client::PageBufferClientStatus;
use serde::{Deserialize, Serialize};

/// Point-in-time view of an exchange client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeStatus {
    /// Retained bytes currently buffered
    pub buffered_bytes: u64,
    /// Running mean of response sizes across successful requests
    pub average_bytes_per_request: u64,
    /// Buffered page count, excluding the end-of-stream marker
    pub buffered_pages: usize,
    /// Whether the location set has been sealed
    pub no_more_locations: bool,
    /// Per-endpoint sub-client status
    pub clients: Vec<PageBufferClientStatus>,
}
