//! FIFO of serialized pages with blocking poll and end-of-stream marker

use exchange_core::{ExchangeError, Result, SerializedPage};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Entry in the page queue: a data page or the end-of-stream marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueueEntry {
    Page(SerializedPage),
    NoMorePages,
}

/// Unbounded-in-count FIFO of pages with blocking poll support.
///
/// A single consumer polls; any producer thread may push. Byte bounding is
/// the dispatcher's job; the queue only orders entries and parks the
/// consumer. The end-of-stream marker, once appended, stays strictly last
/// until `clear`.
pub(crate) struct PageQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    available: Condvar,
}

impl PageQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Non-blocking poll
    pub(crate) fn poll(&self) -> Option<QueueEntry> {
        self.entries.lock().pop_front()
    }

    /// Poll, parking the caller until an entry arrives or the timeout elapses
    pub(crate) fn poll_timeout(&self, timeout: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            if let Some(entry) = entries.pop_front() {
                return Some(entry);
            }
            if self.available.wait_until(&mut entries, deadline).timed_out() {
                return entries.pop_front();
            }
        }
    }

    /// Append a batch of pages, preserving batch order
    ///
    /// Fails if the end-of-stream marker has already been appended: nothing
    /// may follow it.
    pub(crate) fn push_pages(&self, pages: Vec<SerializedPage>) -> Result<()> {
        let mut entries = self.entries.lock();
        if matches!(entries.back(), Some(QueueEntry::NoMorePages)) {
            return Err(ExchangeError::StateViolation(
                "page enqueued after end-of-stream marker".to_string(),
            ));
        }
        for page in pages {
            entries.push_back(QueueEntry::Page(page));
        }
        drop(entries);
        self.available.notify_all();
        Ok(())
    }

    /// Append the end-of-stream marker unless it is already last
    pub(crate) fn push_end_marker_if_missing(&self) {
        let mut entries = self.entries.lock();
        if !matches!(entries.back(), Some(QueueEntry::NoMorePages)) {
            entries.push_back(QueueEntry::NoMorePages);
        }
        drop(entries);
        self.available.notify_all();
    }

    /// True if the next entry to be polled is the end-of-stream marker
    pub(crate) fn head_is_end_marker(&self) -> bool {
        matches!(self.entries.lock().front(), Some(QueueEntry::NoMorePages))
    }

    /// True if any entry, including the marker, is queued
    pub(crate) fn has_entries(&self) -> bool {
        !self.entries.lock().is_empty()
    }

    /// Buffered page count, excluding the end-of-stream marker
    pub(crate) fn page_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| matches!(entry, QueueEntry::Page(_)))
            .count()
    }

    /// Drop every queued entry, marker included
    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn page(byte: u8) -> SerializedPage {
        SerializedPage::from_payload(vec![byte; 8])
    }

    #[test]
    fn test_poll_preserves_fifo_order() {
        let queue = PageQueue::new();
        queue.push_pages(vec![page(1), page(2)]).unwrap();
        queue.push_pages(vec![page(3)]).unwrap();

        for expected in [1u8, 2, 3] {
            match queue.poll() {
                Some(QueueEntry::Page(p)) => assert_eq!(p.data()[0], expected),
                other => panic!("expected page, got {other:?}"),
            }
        }
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_poll_timeout_returns_none_when_empty() {
        let queue = PageQueue::new();
        let start = Instant::now();
        assert!(queue.poll_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_poll_timeout_wakes_on_push() {
        let queue = Arc::new(PageQueue::new());
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push_pages(vec![page(7)]).unwrap();
        });

        let polled = queue.poll_timeout(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(matches!(polled, Some(QueueEntry::Page(_))));
    }

    #[test]
    fn test_push_after_end_marker_is_rejected() {
        let queue = PageQueue::new();
        queue.push_end_marker_if_missing();
        let result = queue.push_pages(vec![page(1)]);
        assert!(matches!(result, Err(ExchangeError::StateViolation(_))));
    }

    #[test]
    fn test_end_marker_appended_once() {
        let queue = PageQueue::new();
        queue.push_end_marker_if_missing();
        queue.push_end_marker_if_missing();

        assert!(queue.head_is_end_marker());
        assert!(matches!(queue.poll(), Some(QueueEntry::NoMorePages)));
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_page_count_excludes_marker() {
        let queue = PageQueue::new();
        queue.push_pages(vec![page(1), page(2)]).unwrap();
        queue.push_end_marker_if_missing();

        assert_eq!(queue.page_count(), 2);
        assert!(queue.has_entries());
    }

    #[test]
    fn test_clear_drops_everything() {
        let queue = PageQueue::new();
        queue.push_pages(vec![page(1)]).unwrap();
        queue.push_end_marker_if_missing();
        queue.clear();

        assert!(!queue.has_entries());
        assert_eq!(queue.page_count(), 0);
        assert!(queue.poll().is_none());
    }
}
