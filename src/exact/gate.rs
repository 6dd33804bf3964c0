//! Admission control for external solver processes.

use std::sync::Arc;
use std::time::Instant;

use log::debug;
use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct GateState {
    available: Mutex<usize>,
    released: Condvar,
}

/// Counting semaphore capping how many solver processes run at once.
///
/// Cloning shares the same pool of permits. Callers beyond the cap block in
/// [`SolverGate::acquire`] until a running invocation drops its permit.
#[derive(Debug, Clone)]
pub struct SolverGate {
    state: Arc<GateState>,
    capacity: usize,
}

impl SolverGate {
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SolverGate {
            state: Arc::new(GateState { available: Mutex::new(capacity), released: Condvar::new() }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        *self.state.available.lock()
    }

    pub fn acquire(&self) -> SolverPermit {
        let mut available = self.state.available.lock();
        while *available == 0 {
            debug!("Solver gate full ({} running), waiting", self.capacity);
            self.state.released.wait(&mut available);
        }
        *available -= 1;
        SolverPermit { state: Arc::clone(&self.state) }
    }

    /// Like [`SolverGate::acquire`], but gives up at `deadline`
    pub fn acquire_until(&self, deadline: Instant) -> Option<SolverPermit> {
        let mut available = self.state.available.lock();
        while *available == 0 {
            debug!("Solver gate full ({} running), waiting", self.capacity);
            if self.state.released.wait_until(&mut available, deadline).timed_out() && *available == 0 {
                return None;
            }
        }
        *available -= 1;
        Some(SolverPermit { state: Arc::clone(&self.state) })
    }

    pub fn try_acquire(&self) -> Option<SolverPermit> {
        let mut available = self.state.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(SolverPermit { state: Arc::clone(&self.state) })
    }
}

impl Default for SolverGate {
    fn default() -> Self {
        SolverGate::new(4)
    }
}

/// Released when dropped
#[derive(Debug)]
pub struct SolverPermit {
    state: Arc<GateState>,
}

impl Drop for SolverPermit {
    fn drop(&mut self) {
        *self.state.available.lock() += 1;
        self.state.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_permits_are_returned_on_drop() {
        let gate = SolverGate::new(2);
        let a = gate.acquire();
        let _b = gate.acquire();
        assert_eq!(gate.available(), 0);
        assert!(gate.try_acquire().is_none());

        drop(a);
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire().is_some());
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_acquire_until_gives_up_at_deadline() {
        let gate = SolverGate::new(1);
        let held = gate.acquire();

        let started = Instant::now();
        assert!(gate.acquire_until(started + Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));

        drop(held);
        assert!(gate.acquire_until(Instant::now() + Duration::from_millis(50)).is_some());
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        assert_eq!(SolverGate::new(0).capacity(), 1);
    }

    #[test]
    fn test_caps_concurrent_holders() {
        let gate = SolverGate::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let gate = gate.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _permit = gate.acquire();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.available(), 2);
    }
}
