//! Adaptive dispatch arithmetic
//!
//! The dispatcher targets bytes in flight rather than a fixed parallelism:
//! with large average responses few requests are outstanding, with small
//! ones enough are issued to keep the buffer full.

/// Number of sub-clients to dispatch for the current buffer headroom.
///
/// `needed_bytes / average` estimates how many responses fit in the
/// remaining budget; the multiplier over-subscribes to hide latency. The
/// result is floored, clamped to at least one request, and reduced by the
/// requests already in flight.
pub(crate) fn dispatch_target(
    needed_bytes: u64,
    average_bytes_per_request: u64,
    multiplier: u32,
    pending_requests: usize,
) -> usize {
    let per_request = average_bytes_per_request.max(1);
    let ideal = (needed_bytes as f64 / per_request as f64) * f64::from(multiplier);
    let target = (ideal as u64).max(1);
    usize::try_from(target)
        .unwrap_or(usize::MAX)
        .saturating_sub(pending_requests)
}

/// Cumulative running mean of response sizes.
///
/// `successful_requests` is the post-increment count, so the first call has
/// `n == 1` and returns `response_size` exactly. The name notwithstanding,
/// this is the arithmetic mean over all requests, not an exponential
/// average; the backpressure loop depends on that.
pub(crate) fn updated_average(
    previous_average: u64,
    successful_requests: u64,
    response_size: u64,
) -> u64 {
    let n = successful_requests as f64;
    (previous_average as f64 * (n - 1.0) / n + response_size as f64 / n) as u64
}
