// Auto-reset wake signal built on Condvar/Mutex, in the style of this
// codebase's Condvar-based lock signal primitive.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// An auto-reset binary signal. One `signal` call wakes at most one
/// `wait`/`wait_timeout` call; spurious wakes are tolerated by callers
/// re-checking their own condition after returning.
pub struct WakeEvent {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl WakeEvent {
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Wakes one waiter. If no one is currently waiting, the next call to
    /// `wait_forever`/`wait_timeout` returns immediately instead of
    /// blocking.
    pub fn signal(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        *signalled = true;
        self.condvar.notify_one();
    }

    /// Blocks until signalled.
    pub fn wait_forever(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        while !*signalled {
            signalled = self.condvar.wait(signalled).unwrap();
        }
        *signalled = false;
    }

    /// Blocks until signalled or `timeout` elapses. Returns `true` if
    /// signalled, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock().unwrap();
        loop {
            if *signalled {
                *signalled = false;
                return true;
            }

            let (guard, result) = self.condvar.wait_timeout(signalled, timeout).unwrap();
            signalled = guard;
            if result.timed_out() && !*signalled {
                return false;
            }
        }
    }
}

impl Default for WakeEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// A one-shot handshake signal: signalled exactly once, any number of
/// waiters may observe it. Used for the `started`/`stopped` lifecycle
/// handshake, which — unlike the wake event — must not reset once fired.
pub struct OnceEvent {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl OnceEvent {
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        *signalled = true;
        self.condvar.notify_all();
    }

    pub fn wait(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        while !*signalled {
            signalled = self.condvar.wait(signalled).unwrap();
        }
    }

    /// Blocks until signalled or `timeout` elapses. Returns `true` if
    /// signalled, `false` on timeout. Used where the signaller may never
    /// arrive (e.g. it died before reaching its own `signal()` call) and
    /// the waiter needs a way out.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock().unwrap();
        loop {
            if *signalled {
                return true;
            }

            let (guard, result) = self.condvar.wait_timeout(signalled, timeout).unwrap();
            signalled = guard;
            if result.timed_out() && !*signalled {
                return false;
            }
        }
    }
}

impl Default for OnceEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{OnceEvent, WakeEvent};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_timeout_returns_false_when_unsignalled() {
        let event = WakeEvent::new();
        assert!(!event.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn signal_wakes_a_waiter() {
        let event = Arc::new(WakeEvent::new());
        let waiter = event.clone();
        let handle = thread::spawn(move || waiter.wait_forever());

        thread::sleep(Duration::from_millis(20));
        event.signal();

        handle.join().expect("waiter thread should finish");
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        let event = WakeEvent::new();
        event.signal();
        assert!(event.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn once_event_releases_all_waiters() {
        let event = Arc::new(OnceEvent::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let waiter = event.clone();
                thread::spawn(move || waiter.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        event.signal();

        for handle in handles {
            handle.join().expect("waiter thread should finish");
        }
    }
}
