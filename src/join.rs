use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Join `hnd` if it finishes within `timeout`.
///
/// Returns `None` when the thread is still running at the deadline; the
/// handle is dropped, which detaches the thread. `Some(Err(_))` carries the
/// panic payload of a thread that panicked.
pub(crate) fn join_timeout<T>(
    hnd: JoinHandle<T>,
    timeout: Duration,
) -> Option<thread::Result<T>> {
    let deadline = Instant::now() + timeout;
    while !hnd.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    Some(hnd.join())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_the_value_of_a_finished_thread() {
        let hnd = thread::spawn(|| 7);
        assert_eq!(join_timeout(hnd, Duration::from_secs(5)).unwrap().unwrap(), 7);
    }

    #[test]
    fn gives_up_on_a_stuck_thread_at_the_deadline() {
        let hnd = thread::spawn(|| thread::sleep(Duration::from_secs(3)));
        let started = Instant::now();
        assert!(join_timeout(hnd, Duration::from_millis(100)).is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
    }

    #[test]
    fn reports_a_panicked_thread() {
        let hnd = thread::spawn(|| panic!("boom"));
        assert!(matches!(join_timeout(hnd, Duration::from_secs(5)), Some(Err(_))));
    }
}
