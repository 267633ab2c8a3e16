//! Exchange client example
//!
//! This example simulates two remote workers producing pages and a single
//! consumer pulling them through the exchange client, with memory accounting
//! against a process-wide tracker.

use exchange_client::{
    ExchangeCallback, ExchangeClientFactory, ExchangeConfig, PageBufferClient,
    PageBufferClientFactory, PageBufferClientStatus, SubClientState,
};
use exchange_core::{AtomicMemoryTracker, SerializedPage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// In-process stand-in for a remote worker endpoint.
///
/// Each scheduled request is answered from a background thread, the way a
/// real transport sub-client answers from its HTTP response handler.
struct SimulatedWorker {
    location: Arc<str>,
    callback: Arc<dyn ExchangeCallback>,
    remaining: Mutex<VecDeque<SerializedPage>>,
    requests: AtomicU64,
    delivered: AtomicU64,
}

impl PageBufferClient for SimulatedWorker {
    fn schedule_request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let next = self.remaining.lock().pop_front();
        if next.is_some() {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
        let callback = Arc::clone(&self.callback);
        let location = Arc::clone(&self.location);

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            match next {
                Some(page) => {
                    if callback.add_pages(&location, vec![page]) {
                        callback.request_complete(&location);
                    }
                }
                None => callback.client_finished(&location),
            }
        });
    }

    fn close(&self) {
        self.remaining.lock().clear();
    }

    fn status(&self) -> PageBufferClientStatus {
        let state = if self.remaining.lock().is_empty() {
            SubClientState::Finished
        } else {
            SubClientState::Queued
        };
        PageBufferClientStatus {
            location: self.location.to_string(),
            state,
            pages_received: self.delivered.load(Ordering::SeqCst),
            requests_scheduled: self.requests.load(Ordering::SeqCst),
            requests_completed: self.requests.load(Ordering::SeqCst),
        }
    }
}

/// Factory producing simulated workers with a fixed page script
struct SimulatedCluster {
    pages_per_worker: usize,
}

impl PageBufferClientFactory for SimulatedCluster {
    fn create_client(
        &self,
        location: Arc<str>,
        _settings: exchange_client::FetchSettings,
        callback: Arc<dyn ExchangeCallback>,
    ) -> Arc<dyn PageBufferClient> {
        let pages = (0..self.pages_per_worker)
            .map(|i| SerializedPage::from_payload(vec![i as u8; 1024]))
            .collect();
        Arc::new(SimulatedWorker {
            location,
            callback,
            remaining: Mutex::new(pages),
            requests: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        })
    }
}

fn main() {
    println!("=== Exchange Client Demo ===\n");

    println!("1. Creating ExchangeClientFactory...");
    let tracker = Arc::new(AtomicMemoryTracker::new());
    let config = ExchangeConfig::default().with_max_buffered_bytes(8 * 1024);
    let factory = ExchangeClientFactory::new(
        config,
        Arc::new(SimulatedCluster {
            pages_per_worker: 4,
        }),
        tracker.clone(),
    );
    println!(
        "   Buffer budget: {} bytes, multiplier: {}\n",
        factory.config().max_buffered_bytes,
        factory.config().concurrent_request_multiplier
    );

    println!("2. Registering producer locations...");
    let client = factory.create();
    client
        .add_location("http://worker-1:8080/v1/task/0/results")
        .unwrap();
    client
        .add_location("http://worker-2:8080/v1/task/1/results")
        .unwrap();
    client.no_more_locations();
    println!("   Registered 2 workers, location set sealed\n");

    println!("3. Consuming pages in arrival order...");
    let mut pages = 0usize;
    let mut bytes = 0u64;
    loop {
        if client.is_finished().unwrap() {
            break;
        }
        if let Some(page) = client.get_next_page(Duration::from_secs(1)).unwrap() {
            pages += 1;
            bytes += page.size_in_bytes();
            println!(
                "   page {} ({} bytes, {} bytes still buffered)",
                pages,
                page.size_in_bytes(),
                client.status().buffered_bytes
            );
        }
    }
    println!("   Consumed {} pages, {} bytes total\n", pages, bytes);

    println!("4. Final status:");
    let status = client.status();
    println!("   Average bytes per request: {}", status.average_bytes_per_request);
    for sub_client in &status.clients {
        println!(
            "   {} -> {} ({} pages over {} requests)",
            sub_client.location, sub_client.state, sub_client.pages_received,
            sub_client.requests_scheduled
        );
    }

    client.close();
    println!("\n5. Memory returned to pool: {} bytes reserved", tracker.reserved_bytes());
}
