//! Consumer-side exchange client
//!
//! Pulls serialized pages from remote producer endpoints through per-endpoint
//! sub-clients, buffers them under a byte budget, and hands them to a single
//! downstream operator in arrival order. Dispatch is adaptive: the number of
//! outstanding requests targets the remaining buffer headroom divided by the
//! observed mean response size.

use crate::blocked::BlockedCallers;
use crate::config::ExchangeConfig;
use crate::dispatch::{dispatch_target, updated_average};
use crate::memory::MemoryAccountant;
use crate::queue::{PageQueue, QueueEntry};
use crate::registry::SubClientRegistry;
use crate::status::ExchangeStatus;
use crate::sub_client::{ExchangeCallback, FetchSettings, PageBufferClientFactory};
use exchange_core::{
    ExchangeError, ExchangeId, Result, SerializedPage, SystemMemoryUsageListener,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

/// State guarded by the exchange lock
#[derive(Default)]
struct ExchangeState {
    no_more_locations: bool,
    buffer_bytes: u64,
    successful_requests: u64,
    average_bytes_per_request: u64,
    blocked_callers: BlockedCallers,
}

struct ClientCore {
    exchange_id: ExchangeId,
    config: ExchangeConfig,
    queue: PageQueue,
    registry: SubClientRegistry,
    state: Mutex<ExchangeState>,
    closed: AtomicBool,
    failure: OnceLock<ExchangeError>,
    memory: MemoryAccountant,
    client_factory: Arc<dyn PageBufferClientFactory>,
    weak_self: Weak<ClientCore>,
}

/// Exchange client: concurrently fetches pages from many producer endpoints
/// for one consumer.
///
/// Thread-safe and cheap to clone; clones share the same exchange. Producer
/// sub-clients call back in from their own threads, the consumer polls from
/// its thread, and `close` may be called from anywhere. Only
/// [`get_next_page`](ExchangeClient::get_next_page) blocks the caller.
#[derive(Clone)]
pub struct ExchangeClient {
    core: Arc<ClientCore>,
}

impl ExchangeClient {
    /// Create an exchange client.
    ///
    /// `client_factory` supplies the per-endpoint transport; `memory_listener`
    /// receives signed deltas for every byte buffered or released.
    pub fn new(
        config: ExchangeConfig,
        client_factory: Arc<dyn PageBufferClientFactory>,
        memory_listener: Arc<dyn SystemMemoryUsageListener>,
    ) -> Self {
        let core = Arc::new_cyclic(|weak_self| ClientCore {
            exchange_id: ExchangeId::new(),
            config,
            queue: PageQueue::new(),
            registry: SubClientRegistry::new(),
            state: Mutex::new(ExchangeState::default()),
            closed: AtomicBool::new(false),
            failure: OnceLock::new(),
            memory: MemoryAccountant::new(memory_listener),
            client_factory,
            weak_self: weak_self.clone(),
        });
        Self { core }
    }

    /// Identifier of this exchange instance
    pub fn exchange_id(&self) -> ExchangeId {
        self.core.exchange_id
    }

    /// Register a producer endpoint and trigger dispatch.
    ///
    /// Duplicate locations are silently ignored, as are registrations after
    /// `close`. Registering after [`no_more_locations`](Self::no_more_locations)
    /// is a usage error.
    pub fn add_location(&self, location: &str) -> Result<()> {
        self.core.add_location(location)
    }

    /// Seal the location set; no further endpoints will be added.
    ///
    /// Idempotent. Required for the exchange to ever report finished.
    pub fn no_more_locations(&self) {
        self.core.no_more_locations();
    }

    /// Take the next buffered page without blocking.
    ///
    /// Returns `None` when nothing is buffered or the exchange is closed.
    /// Must not be called while holding any lock a sub-client callback could
    /// need; the calling thread also releases the page's memory reservation.
    pub fn poll_page(&self) -> Result<Option<SerializedPage>> {
        self.core.poll_page()
    }

    /// Take the next page, waiting up to `max_wait` for one to arrive.
    ///
    /// Waits only when at least one endpoint is registered and `max_wait` is
    /// at least one millisecond. Returns `None` on timeout or when the
    /// exchange is closed; `close` from another thread wakes the wait.
    pub fn get_next_page(&self, max_wait: Duration) -> Result<Option<SerializedPage>> {
        self.core.get_next_page(max_wait)
    }

    /// Signal completed once a page is available or the exchange is closed
    /// or failed.
    ///
    /// Completed immediately when one of those already holds; otherwise the
    /// returned receiver fires on the next page arrival, close, or failure.
    pub fn is_blocked(&self) -> oneshot::Receiver<()> {
        self.core.is_blocked()
    }

    /// True once the exchange is closed and every registered endpoint has
    /// delivered its last page
    pub fn is_finished(&self) -> Result<bool> {
        self.core.is_finished()
    }

    /// True once the exchange has reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Close the exchange: stop all sub-clients, drop buffered pages, and
    /// return their bytes to the memory pool.
    ///
    /// Idempotent; wakes any blocked consumer and completes outstanding
    /// blocked-caller signals.
    pub fn close(&self) {
        self.core.close();
    }

    /// Point-in-time status snapshot
    pub fn status(&self) -> ExchangeStatus {
        self.core.status()
    }
}

impl ClientCore {
    fn add_location(&self, location: &str) -> Result<()> {
        let mut state = self.state.lock();

        // duplicate locations are ignored, even after sealing
        if self.registry.contains(location) {
            return Ok(());
        }
        if state.no_more_locations {
            return Err(ExchangeError::LocationsSealed);
        }
        // ignore new locations after close
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let location: Arc<str> = Arc::from(location);
        let callback: Arc<dyn ExchangeCallback> = Arc::new(CallbackHandle {
            core: self.weak_self.clone(),
        });
        let client =
            self.client_factory
                .create_client(Arc::clone(&location), self.fetch_settings(), callback);
        self.registry.add(Arc::clone(&location), client);
        tracing::info!(exchange = %self.exchange_id, %location, "registered exchange location");

        self.schedule_locked(&mut state);
        Ok(())
    }

    fn no_more_locations(&self) {
        let mut state = self.state.lock();
        state.no_more_locations = true;
        self.schedule_locked(&mut state);
    }

    fn poll_page(&self) -> Result<Option<SerializedPage>> {
        self.error_if_failed()?;
        if self.is_closed() {
            return Ok(None);
        }
        Ok(self.post_process(self.queue.poll()))
    }

    fn get_next_page(&self, max_wait: Duration) -> Result<Option<SerializedPage>> {
        self.error_if_failed()?;
        if self.is_closed() {
            return Ok(None);
        }

        self.schedule_requests();

        let mut entry = self.queue.poll();
        // only wait for a page if there are remote endpoints to produce one
        if entry.is_none() && max_wait >= Duration::from_millis(1) && !self.registry.is_empty() {
            entry = self.queue.poll_timeout(max_wait);
        }
        Ok(self.post_process(entry))
    }

    /// Consumer-side handling of a polled entry.
    ///
    /// The end-of-stream marker closes the exchange and is re-appended so
    /// every later poll stays terminal; a real page releases its memory
    /// reservation and re-evaluates dispatch.
    fn post_process(&self, entry: Option<QueueEntry>) -> Option<SerializedPage> {
        match entry {
            None => None,
            Some(QueueEntry::NoMorePages) => {
                self.closed.store(true, Ordering::SeqCst);
                self.queue.push_end_marker_if_missing();
                self.state.lock().blocked_callers.notify_all();
                None
            }
            Some(QueueEntry::Page(page)) => {
                let retained = page.retained_size_in_bytes();
                let released = {
                    let mut state = self.state.lock();
                    if self.closed.load(Ordering::SeqCst) {
                        // close already returned the whole buffer to the pool
                        false
                    } else {
                        state.buffer_bytes = state.buffer_bytes.saturating_sub(retained);
                        true
                    }
                };
                if released {
                    self.memory.record_freed(retained);
                }
                if !self.closed.load(Ordering::SeqCst) && self.queue.head_is_end_marker() {
                    self.closed.store(true, Ordering::SeqCst);
                }
                self.schedule_requests();
                Some(page)
            }
        }
    }

    fn is_blocked(&self) -> oneshot::Receiver<()> {
        let mut state = self.state.lock();
        if self.is_closed() || self.is_failed() || self.queue.has_entries() {
            return BlockedCallers::ready();
        }
        state.blocked_callers.register()
    }

    fn is_finished(&self) -> Result<bool> {
        self.error_if_failed()?;
        // locations are never registered once closed is set, so the counts
        // cannot grow out from under this check
        Ok(self.is_closed()
            && self.registry.completed_count() == self.registry.registered_count())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock();
        self.registry.close_all();
        self.queue.clear();
        let released = std::mem::take(&mut state.buffer_bytes);
        self.memory.record_freed(released);
        self.queue.push_end_marker_if_missing();
        state.blocked_callers.notify_all();
        tracing::debug!(exchange = %self.exchange_id, released_bytes = released, "exchange client closed");
    }

    fn status(&self) -> ExchangeStatus {
        let state = self.state.lock();
        ExchangeStatus {
            buffered_bytes: state.buffer_bytes,
            average_bytes_per_request: state.average_bytes_per_request,
            buffered_pages: self.queue.page_count(),
            no_more_locations: state.no_more_locations,
            clients: self.registry.statuses(),
        }
    }

    fn schedule_requests(&self) {
        let mut state = self.state.lock();
        self.schedule_locked(&mut state);
    }

    /// Re-evaluate dispatch; called from every entry point that changes
    /// buffer headroom or the client sets. Idempotent under the lock.
    fn schedule_locked(&self, state: &mut ExchangeState) {
        if self.is_failed() {
            return;
        }
        let registered = self.registry.registered_count();
        let completed = self.registry.completed_count();
        if self.is_closed() && completed == registered {
            return;
        }

        // every endpoint has delivered its last page: append the marker and
        // flip terminal once the consumer has drained ahead of it
        if state.no_more_locations && completed == registered {
            self.queue.push_end_marker_if_missing();
            if !self.is_closed() && self.queue.head_is_end_marker() {
                self.closed.store(true, Ordering::SeqCst);
            }
            state.blocked_callers.notify_all();
            return;
        }

        let needed = self
            .config
            .max_buffered_bytes
            .saturating_sub(state.buffer_bytes);
        if needed == 0 {
            return;
        }

        let target = dispatch_target(
            needed,
            state.average_bytes_per_request,
            self.config.concurrent_request_multiplier,
            self.registry.pending_count(),
        );
        for _ in 0..target {
            let Some((location, client)) = self.registry.pop_queued() else {
                return;
            };
            tracing::trace!(exchange = %self.exchange_id, %location, "dispatching page request");
            client.schedule_request();
        }
    }

    fn add_pages(&self, location: &str, pages: Vec<SerializedPage>) -> bool {
        let mut state = self.state.lock();
        if self.is_closed() || self.is_failed() {
            return false;
        }

        let page_count = pages.len();
        let retained: u64 = pages.iter().map(|p| p.retained_size_in_bytes()).sum();
        let response_size: u64 = pages.iter().map(|p| p.size_in_bytes()).sum();

        if let Err(violation) = self.queue.push_pages(pages) {
            self.record_failure(violation);
            state.blocked_callers.notify_all();
            return false;
        }
        state.blocked_callers.notify_all();

        state.buffer_bytes += retained;
        self.memory.record_allocated(retained);

        // empty batches still count: the average reflects request cost
        state.successful_requests += 1;
        state.average_bytes_per_request = updated_average(
            state.average_bytes_per_request,
            state.successful_requests,
            response_size,
        );

        tracing::trace!(
            exchange = %self.exchange_id,
            location,
            pages = page_count,
            retained_bytes = retained,
            "buffered page batch"
        );
        self.schedule_locked(&mut state);
        true
    }

    fn request_complete(&self, location: &str) {
        let mut state = self.state.lock();
        self.registry.requeue(location);
        self.schedule_locked(&mut state);
    }

    fn client_finished(&self, location: &str) {
        let mut state = self.state.lock();
        self.registry.mark_completed(location);
        tracing::debug!(exchange = %self.exchange_id, location, "exchange location finished");
        self.schedule_locked(&mut state);
    }

    fn client_failed(&self, location: &str, cause: ExchangeError) {
        let mut state = self.state.lock();
        // failures racing an explicit close are not an error of the exchange
        if !self.is_closed() {
            tracing::warn!(exchange = %self.exchange_id, location, %cause, "exchange location failed");
            self.record_failure(cause);
            state.blocked_callers.notify_all();
        }
    }

    fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            max_response_size: self.config.max_response_size,
            min_error_duration: self.config.min_error_duration,
            max_error_duration: self.config.max_error_duration,
        }
    }

    fn is_failed(&self) -> bool {
        self.failure.get().is_some()
    }

    /// Latch the first failure; later failures are dropped
    fn record_failure(&self, cause: ExchangeError) {
        let _ = self.failure.set(cause);
    }

    fn error_if_failed(&self) -> Result<()> {
        match self.failure.get() {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

/// Callback handle handed to each sub-client.
///
/// Holds a weak reference so a sub-client outliving its exchange neither
/// keeps it alive nor acts on it.
struct CallbackHandle {
    core: Weak<ClientCore>,
}

impl ExchangeCallback for CallbackHandle {
    fn add_pages(&self, location: &str, pages: Vec<SerializedPage>) -> bool {
        match self.core.upgrade() {
            Some(core) => core.add_pages(location, pages),
            None => false,
        }
    }

    fn request_complete(&self, location: &str) {
        if let Some(core) = self.core.upgrade() {
            core.request_complete(location);
        }
    }

    fn client_finished(&self, location: &str) {
        if let Some(core) = self.core.upgrade() {
            core.client_finished(location);
        }
    }

    fn client_failed(&self, location: &str, cause: ExchangeError) {
        if let Some(core) = self.core.upgrade() {
            core.client_failed(location, cause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sub_client::{PageBufferClient, PageBufferClientStatus, SubClientState};
    use exchange_core::AtomicMemoryTracker;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;
    use std::thread;
    use std::time::Instant;

    /// Scripted endpoint standing in for a real transport sub-client.
    ///
    /// `schedule_request` only records the dispatch; the test drives
    /// deliveries through the stored callback, so every scenario is
    /// deterministic.
    struct ScriptedClient {
        location: Arc<str>,
        callback: Arc<dyn ExchangeCallback>,
        scheduled: AtomicU64,
        closed: AtomicBool,
    }

    impl ScriptedClient {
        fn deliver(&self, pages: Vec<SerializedPage>) -> bool {
            self.callback.add_pages(&self.location, pages)
        }

        fn complete_request(&self) {
            self.callback.request_complete(&self.location);
        }

        fn finish(&self) {
            self.callback.client_finished(&self.location);
        }

        fn fail(&self, cause: &str) {
            self.callback
                .client_failed(&self.location, ExchangeError::transport(&*self.location, cause));
        }

        fn scheduled_count(&self) -> u64 {
            self.scheduled.load(Ordering::SeqCst)
        }
    }

    impl PageBufferClient for ScriptedClient {
        fn schedule_request(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn status(&self) -> PageBufferClientStatus {
            let state = if self.closed.load(Ordering::SeqCst) {
                SubClientState::Closed
            } else {
                SubClientState::Queued
            };
            PageBufferClientStatus {
                location: self.location.to_string(),
                state,
                pages_received: 0,
                requests_scheduled: self.scheduled.load(Ordering::SeqCst),
                requests_completed: 0,
            }
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        clients: Mutex<HashMap<String, Arc<ScriptedClient>>>,
    }

    impl ScriptedFactory {
        fn client(&self, location: &str) -> Arc<ScriptedClient> {
            self.clients
                .lock()
                .get(location)
                .cloned()
                .expect("sub-client was never created")
        }
    }

    impl PageBufferClientFactory for ScriptedFactory {
        fn create_client(
            &self,
            location: Arc<str>,
            _settings: FetchSettings,
            callback: Arc<dyn ExchangeCallback>,
        ) -> Arc<dyn PageBufferClient> {
            let client = Arc::new(ScriptedClient {
                location: Arc::clone(&location),
                callback,
                scheduled: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            });
            self.clients
                .lock()
                .insert(location.to_string(), client.clone());
            client
        }
    }

    fn test_client(
        max_buffered_bytes: u64,
        multiplier: u32,
    ) -> (ExchangeClient, Arc<ScriptedFactory>, Arc<AtomicMemoryTracker>) {
        let factory = Arc::new(ScriptedFactory::default());
        let tracker = Arc::new(AtomicMemoryTracker::new());
        let config = ExchangeConfig::default()
            .with_max_buffered_bytes(max_buffered_bytes)
            .with_concurrent_request_multiplier(multiplier);
        let client = ExchangeClient::new(config, factory.clone(), tracker.clone());
        (client, factory, tracker)
    }

    fn page(size: u64, retained: u64) -> SerializedPage {
        SerializedPage::with_sizes(vec![0u8; size.min(64) as usize], size, retained)
    }

    #[test]
    fn test_happy_path_two_locations() {
        let (exchange, factory, tracker) = test_client(1000, 3);

        exchange.add_location("http://a").unwrap();
        exchange.add_location("http://b").unwrap();

        let a = factory.client("http://a");
        let b = factory.client("http://b");
        assert!(a.deliver(vec![page(300, 400)]));
        assert!(b.deliver(vec![page(200, 300)]));

        exchange.no_more_locations();
        a.finish();
        b.finish();

        let first = exchange.poll_page().unwrap().expect("first page");
        assert_eq!(first.retained_size_in_bytes(), 400);
        let second = exchange.poll_page().unwrap().expect("second page");
        assert_eq!(second.retained_size_in_bytes(), 300);

        assert!(exchange.poll_page().unwrap().is_none());
        assert!(exchange.is_closed());
        assert!(exchange.is_finished().unwrap());
        assert_eq!(tracker.reserved_bytes(), 0);
    }

    #[test]
    fn test_backpressure_pauses_dispatch() {
        let (exchange, factory, _tracker) = test_client(500, 3);

        exchange.add_location("http://a").unwrap();
        let a = factory.client("http://a");
        assert_eq!(a.scheduled_count(), 1);

        assert!(a.deliver(vec![page(500, 500)]));
        // buffer is full: returning the client to the queue dispatches nothing
        a.complete_request();
        assert_eq!(a.scheduled_count(), 1);

        // draining the buffer resumes dispatch
        exchange.poll_page().unwrap().expect("buffered page");
        assert_eq!(a.scheduled_count(), 2);
    }

    #[test]
    fn test_failure_latches_and_surfaces() {
        let (exchange, factory, _tracker) = test_client(1000, 3);

        exchange.add_location("http://a").unwrap();
        exchange.add_location("http://b").unwrap();

        let a = factory.client("http://a");
        let b = factory.client("http://b");
        assert!(a.deliver(vec![page(100, 100)]));
        b.fail("connection refused");

        let error = exchange.poll_page().unwrap_err();
        assert!(matches!(error, ExchangeError::Transport { .. }));

        // every later entry point keeps surfacing the same failure
        assert!(exchange.poll_page().is_err());
        assert!(exchange.get_next_page(Duration::ZERO).is_err());
        assert!(exchange.is_finished().is_err());

        // the first failure wins
        a.fail("late failure");
        match exchange.poll_page().unwrap_err() {
            ExchangeError::Transport { location, .. } => assert_eq!(location, "http://b"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_failure_does_not_mark_closed() {
        let (exchange, factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();
        factory.client("http://a").fail("boom");

        assert!(!exchange.is_closed());
        exchange.close();
        assert!(exchange.is_closed());
    }

    #[test]
    fn test_close_rejects_late_delivery() {
        let (exchange, factory, tracker) = test_client(1000, 3);

        exchange.add_location("http://a").unwrap();
        let a = factory.client("http://a");
        assert!(a.deliver(vec![page(100, 100)]));

        exchange.close();
        assert_eq!(tracker.reserved_bytes(), 0);

        // batches racing close are rejected and dropped by the sub-client
        assert!(!a.deliver(vec![page(100, 100)]));
        assert_eq!(tracker.reserved_bytes(), 0);
        assert_eq!(exchange.status().buffered_pages, 0);
        assert!(a.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (exchange, factory, tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();
        assert!(factory.client("http://a").deliver(vec![page(50, 50)]));

        exchange.close();
        exchange.close();

        assert!(exchange.is_closed());
        assert_eq!(tracker.reserved_bytes(), 0);
        assert!(exchange.poll_page().unwrap().is_none());
    }

    #[test]
    fn test_blocked_caller_wakes_on_delivery() {
        let (exchange, factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();

        let mut blocked = exchange.is_blocked();
        assert!(blocked.try_recv().is_err());

        assert!(factory.client("http://a").deliver(vec![page(10, 10)]));
        assert!(blocked.try_recv().is_ok());

        // with a page buffered the signal is pre-completed
        let mut ready = exchange.is_blocked();
        assert!(ready.try_recv().is_ok());
    }

    #[test]
    fn test_blocked_caller_wakes_on_close_and_failure() {
        let (exchange, _factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();

        let mut blocked = exchange.is_blocked();
        exchange.close();
        assert!(blocked.try_recv().is_ok());

        let (exchange, factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();
        let mut blocked = exchange.is_blocked();
        factory.client("http://a").fail("boom");
        assert!(blocked.try_recv().is_ok());
    }

    #[test]
    fn test_duplicate_location_registers_once() {
        let (exchange, factory, _tracker) = test_client(1000, 3);

        exchange.add_location("http://x").unwrap();
        exchange.add_location("http://x").unwrap();
        assert_eq!(exchange.status().clients.len(), 1);

        exchange.no_more_locations();
        // duplicates stay ignored after sealing
        exchange.add_location("http://x").unwrap();

        factory.client("http://x").finish();
        assert!(exchange.is_finished().unwrap());
    }

    #[test]
    fn test_add_location_after_seal_is_an_error() {
        let (exchange, _factory, _tracker) = test_client(1000, 3);
        exchange.no_more_locations();
        exchange.no_more_locations();

        let error = exchange.add_location("http://late").unwrap_err();
        assert_eq!(error, ExchangeError::LocationsSealed);
    }

    #[test]
    fn test_add_location_after_close_is_ignored() {
        let (exchange, _factory, _tracker) = test_client(1000, 3);
        exchange.close();
        exchange.add_location("http://late").unwrap();
        assert_eq!(exchange.status().clients.len(), 0);
    }

    #[test]
    fn test_no_locations_finishes_immediately() {
        let (exchange, _factory, _tracker) = test_client(1000, 3);
        exchange.no_more_locations();
        assert!(exchange.is_closed());
        assert!(exchange.is_finished().unwrap());
        assert!(exchange.poll_page().unwrap().is_none());
    }

    #[test]
    fn test_finish_with_zero_pages() {
        let (exchange, factory, tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();
        exchange.no_more_locations();

        let a = factory.client("http://a");
        assert!(a.deliver(Vec::new()));
        a.finish();

        assert!(exchange.poll_page().unwrap().is_none());
        assert!(exchange.is_finished().unwrap());
        assert_eq!(tracker.reserved_bytes(), 0);
    }

    #[test]
    fn test_empty_batches_count_toward_average() {
        let (exchange, factory, _tracker) = test_client(10_000, 3);
        exchange.add_location("http://a").unwrap();

        let a = factory.client("http://a");
        assert!(a.deliver(vec![page(300, 300)]));
        assert!(a.deliver(Vec::new()));

        assert_eq!(exchange.status().average_bytes_per_request, 150);
    }

    #[test]
    fn test_average_tracks_response_sizes_not_retained() {
        let (exchange, factory, _tracker) = test_client(10_000, 3);
        exchange.add_location("http://a").unwrap();

        let a = factory.client("http://a");
        assert!(a.deliver(vec![page(300, 999)]));
        assert!(a.deliver(vec![page(200, 999)]));

        let status = exchange.status();
        assert_eq!(status.average_bytes_per_request, 250);
        assert_eq!(status.buffered_bytes, 1998);
        assert_eq!(status.buffered_pages, 2);
    }

    #[test]
    fn test_get_next_page_zero_wait_never_blocks() {
        let (exchange, _factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();

        let start = Instant::now();
        assert!(exchange.get_next_page(Duration::ZERO).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_get_next_page_skips_wait_without_locations() {
        let (exchange, _factory, _tracker) = test_client(1000, 3);

        let start = Instant::now();
        assert!(exchange
            .get_next_page(Duration::from_secs(5))
            .unwrap()
            .is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_close_interrupts_blocked_consumer() {
        let (exchange, _factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();

        let consumer = exchange.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let result = consumer.get_next_page(Duration::from_secs(30));
            (result, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        exchange.close();

        let (result, elapsed) = handle.join().unwrap();
        assert!(result.unwrap().is_none());
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_get_next_page_delivers_concurrent_pages() {
        let (exchange, factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();

        let a = factory.client("http://a");
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            assert!(a.deliver(vec![page(64, 64)]));
        });

        let delivered = exchange.get_next_page(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        assert!(delivered.is_some());
    }

    #[test]
    fn test_first_dispatch_happens_without_average() {
        let (exchange, factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();
        assert!(factory.client("http://a").scheduled_count() >= 1);
    }

    #[test]
    fn test_finished_requires_all_clients_complete() {
        let (exchange, factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();
        exchange.add_location("http://b").unwrap();
        exchange.no_more_locations();

        factory.client("http://a").finish();
        assert!(!exchange.is_finished().unwrap());

        factory.client("http://b").finish();
        assert!(exchange.poll_page().unwrap().is_none());
        assert!(exchange.is_finished().unwrap());
    }

    #[test]
    fn test_status_snapshot() {
        let (exchange, factory, _tracker) = test_client(1000, 3);
        exchange.add_location("http://a").unwrap();
        assert!(factory.client("http://a").deliver(vec![page(100, 150)]));

        let status = exchange.status();
        assert_eq!(status.buffered_bytes, 150);
        assert_eq!(status.buffered_pages, 1);
        assert!(!status.no_more_locations);
        assert_eq!(status.clients.len(), 1);
        assert_eq!(status.clients[0].location, "http://a");

        exchange.no_more_locations();
        assert!(exchange.status().no_more_locations);
    }

    #[test]
    fn test_memory_deltas_net_zero_through_consumption_and_close() {
        let (exchange, factory, tracker) = test_client(10_000, 3);
        exchange.add_location("http://a").unwrap();

        let a = factory.client("http://a");
        assert!(a.deliver(vec![page(100, 400), page(100, 200)]));
        assert_eq!(tracker.reserved_bytes(), 600);

        exchange.poll_page().unwrap().expect("first page");
        assert_eq!(tracker.reserved_bytes(), 200);

        exchange.close();
        assert_eq!(tracker.reserved_bytes(), 0);
    }
}
