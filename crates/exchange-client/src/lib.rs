//! Exchange client for distributed query execution
//!
//! This crate provides the consumer side of the shuffle: a client that
//! concurrently pulls serialized pages from many remote producer endpoints,
//! buffers them in memory under a byte budget, and hands them to a single
//! downstream operator in arrival order.
//!
//! # Architecture
//!
//! The exchange consists of:
//! - **ExchangeClient**: façade tying buffering, dispatch, and failure
//!   handling together
//! - **Sub-clients**: per-endpoint fetchers behind [`PageBufferClient`],
//!   owning their own transport and retry loop
//! - **Adaptive dispatch**: outstanding requests target the remaining buffer
//!   headroom divided by the observed mean response size
//! - **Memory accounting**: every buffered byte is reported to a
//!   system-wide tracker and returned on consumption or close
//!
//! # Example
//!
//! ```ignore
//! use exchange_client::{ExchangeClient, ExchangeConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = ExchangeClient::new(ExchangeConfig::default(), transport, memory);
//!
//! client.add_location("http://worker-1:8080/v1/task/0/results")?;
//! client.add_location("http://worker-2:8080/v1/task/1/results")?;
//! client.no_more_locations();
//!
//! while !client.is_finished()? {
//!     if let Some(page) = client.get_next_page(Duration::from_secs(1))? {
//!         process(page);
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`client`]: the exchange client façade
//! - [`config`]: construction-time configuration
//! - [`factory`]: stamps out clients with shared wiring
//! - [`status`]: status snapshots
//! - [`sub_client`]: contracts for per-endpoint fetchers

mod blocked;
mod dispatch;
mod memory;
mod queue;
mod registry;

pub mod client;
pub mod config;
pub mod factory;
pub mod status;
pub mod sub_client;

// Re-exports
pub use client::ExchangeClient;
pub use config::ExchangeConfig;
pub use factory::ExchangeClientFactory;
pub use status::ExchangeStatus;
pub use sub_client::{
    ExchangeCallback, FetchSettings, PageBufferClient, PageBufferClientFactory,
    PageBufferClientStatus, SubClientState,
};
