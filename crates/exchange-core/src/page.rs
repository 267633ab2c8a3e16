//! Serialized pages, the unit of transfer and buffering

use serde::{Deserialize, Serialize};

/// An opaque serialized batch of rows produced by a remote task.
///
/// Pages carry two independent sizes: the on-the-wire size reported by the
/// producer (used for response-size averaging) and the retained size (the
/// in-memory footprint charged against the buffer budget). Codec-produced
/// pages usually differ in the two; `from_payload` derives both from the
/// payload length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedPage {
    /// Encoded page bytes
    data: Vec<u8>,
    /// On-the-wire size in bytes
    size_in_bytes: u64,
    /// In-memory footprint in bytes
    retained_size_in_bytes: u64,
}

impl SerializedPage {
    /// Create a page whose wire and retained sizes both equal the payload length
    pub fn from_payload(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            data,
            size_in_bytes: len,
            retained_size_in_bytes: len,
        }
    }

    /// Create a page with explicit wire and retained sizes
    pub fn with_sizes(data: Vec<u8>, size_in_bytes: u64, retained_size_in_bytes: u64) -> Self {
        Self {
            data,
            size_in_bytes,
            retained_size_in_bytes,
        }
    }

    /// Encoded page bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// On-the-wire size reported by the producer
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    /// In-memory footprint charged against the buffer budget
    pub fn retained_size_in_bytes(&self) -> u64 {
        self.retained_size_in_bytes
    }
}
