//! Reconnect supervisor
//!
//! Wraps a device's connect in an exponential-backoff retry loop: 1 s
//! initial delay, doubling per failure, capped at 60 s. The loop exits
//! on the first success or when the shared cancellation token fires;
//! reconnect policy after a later I/O error is left to the embedder.

use std::thread::JoinHandle;
use std::time::Duration;

use crate::protocol::ProtocolError;
use crate::scheduler::CancelToken;

/// First retry delay
const INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Backoff ceiling
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Retry `connect` until it succeeds or the token cancels.
/// Returns true on success.
pub fn connect_with_retry<F>(name: &str, connect: F, cancel: &CancelToken) -> bool
where
    F: Fn() -> Result<(), ProtocolError>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0u32;

    while !cancel.is_cancelled() {
        attempt += 1;
        match connect() {
            Ok(()) => {
                log::info!("{}: connected (attempt {})", name, attempt);
                return true;
            }
            Err(e) => {
                log::warn!(
                    "{}: connect attempt {} failed: {} (retry in {:?})",
                    name,
                    attempt,
                    e,
                    delay
                );
            }
        }

        if cancel.wait_timeout(delay) {
            break;
        }
        delay = (delay * 2).min(MAX_DELAY);
    }
    false
}

/// Run [`connect_with_retry`] on its own thread
pub fn spawn<F>(name: &'static str, connect: F, cancel: CancelToken) -> JoinHandle<bool>
where
    F: Fn() -> Result<(), ProtocolError> + Send + 'static,
{
    std::thread::spawn(move || connect_with_retry(name, connect, &cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_immediate_success() {
        let cancel = CancelToken::new();
        assert!(connect_with_retry("test", || Ok(()), &cancel));
    }

    #[test]
    fn test_retries_until_success() {
        let cancel = CancelToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let start = Instant::now();
        let ok = connect_with_retry(
            "test",
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProtocolError::HandshakeFailed)
                } else {
                    Ok(())
                }
            },
            &cancel,
        );

        assert!(ok);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two failures back off 1 s then 2 s
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn test_cancellation_stops_retries() {
        let cancel = CancelToken::new();
        let stopper = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            stopper.cancel();
        });

        let start = Instant::now();
        let ok = connect_with_retry("test", || Err(ProtocolError::HandshakeFailed), &cancel);
        assert!(!ok);
        // The 1 s backoff wait was interrupted by the cancel
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
