// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Cooperative timer service: one thread per participant drives heartbeats,
//! acknack responses, deadlines, lifespans, liveliness assertions, and
//! discovery resends.
//!
//! Timer lifecycle:
//!
//! ```text
//!   INACTIVE ──restart──▶ WAITING (in queue) ──due──▶ READY (firing)
//!       ▲                      │                          │
//!       └──────cancel──────────┴────────── done ──────────┘
//! ```
//!
//! `restart_timer` is idempotent; `cancel_timer` may race the firing thread
//! and guarantees only that the callback will not run for the pending
//! period once it is not already executing. Callbacks run synchronously on
//! the service thread and must stay short; they may reschedule themselves.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Handle to a registered timer.
pub type TimerId = u64;

/// Timer callback; runs on the service thread.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TimerState {
    Inactive,
    /// Enqueued with a deadline.
    Waiting,
    /// Popped and currently firing.
    Ready,
}

struct TimerEntry {
    callback: TimerCallback,
    state: TimerState,
    /// Bumped on every restart/cancel; stale queue entries are skipped.
    generation: u64,
    /// Auto-reschedule interval; `None` for one-shot timers.
    period: Option<Duration>,
}

#[derive(Default)]
struct Queue {
    /// Min-heap of (deadline, generation, timer).
    heap: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    timers: HashMap<TimerId, TimerEntry>,
    next_id: TimerId,
}

struct Shared {
    queue: Mutex<Queue>,
    condvar: Condvar,
    stop: AtomicBool,
}

/// The per-participant timer service.
pub struct TimerService {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Spawn the service thread.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            condvar: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let shared_worker = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("ferrodds-timer-{name}"))
            .spawn(move || run_loop(&shared_worker))
            .expect("spawn timer service thread");
        TimerService {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Register a timer without arming it.
    pub fn register(&self, callback: TimerCallback, period: Option<Duration>) -> TimerId {
        let mut queue = self.shared.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        queue.timers.insert(
            id,
            TimerEntry {
                callback,
                state: TimerState::Inactive,
                generation: 0,
                period,
            },
        );
        id
    }

    /// Register and immediately arm a periodic timer.
    pub fn register_periodic(&self, callback: TimerCallback, period: Duration) -> TimerId {
        let id = self.register(callback, Some(period));
        self.restart_timer(id, period);
        id
    }

    /// (Re)arm a timer to fire after `delay`. Idempotent: a pending
    /// deadline is replaced, never duplicated.
    pub fn restart_timer(&self, id: TimerId, delay: Duration) {
        let mut queue = self.shared.queue.lock();
        let Some(entry) = queue.timers.get_mut(&id) else {
            return;
        };
        entry.generation += 1;
        entry.state = TimerState::Waiting;
        let generation = entry.generation;
        let deadline = Instant::now() + delay;
        queue.heap.push(Reverse((deadline, generation, id)));
        drop(queue);
        self.shared.condvar.notify_one();
    }

    /// Disarm a timer. After this returns and the callback is not currently
    /// executing, it will not fire for the pending period.
    pub fn cancel_timer(&self, id: TimerId) {
        let mut queue = self.shared.queue.lock();
        if let Some(entry) = queue.timers.get_mut(&id) {
            entry.generation += 1;
            if entry.state == TimerState::Waiting {
                entry.state = TimerState::Inactive;
            }
        }
    }

    /// Remove a timer entirely.
    pub fn unregister(&self, id: TimerId) {
        self.shared.queue.lock().timers.remove(&id);
    }

    /// Fire-and-forget one-shot: registers, arms, and unregisters itself
    /// after firing.
    pub fn schedule_once<F>(self: &Arc<Self>, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = Mutex::new(Some(callback));
        // Weak: the callback must not keep the service alive.
        let service = Arc::downgrade(self);
        let id_cell = Arc::new(Mutex::new(None::<TimerId>));
        let id_cell_cb = Arc::clone(&id_cell);
        let id = self.register(
            Arc::new(move || {
                if let Some(f) = slot.lock().take() {
                    f();
                }
                if let (Some(service), Some(id)) = (service.upgrade(), *id_cell_cb.lock()) {
                    service.unregister(id);
                }
            }),
            None,
        );
        *id_cell.lock() = Some(id);
        self.restart_timer(id, delay);
    }

    /// Stop the service thread and join it.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.condvar.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        if shared.stop.load(Ordering::Relaxed) {
            return;
        }

        let now = Instant::now();
        match queue.heap.peek() {
            None => {
                shared.condvar.wait(&mut queue);
            }
            Some(Reverse((deadline, _, _))) if *deadline > now => {
                let timeout = *deadline - now;
                let _ = shared.condvar.wait_for(&mut queue, timeout);
            }
            Some(_) => {
                let Reverse((_, generation, id)) = queue.heap.pop().expect("peeked entry");

                // Skip entries invalidated by restart/cancel.
                let Some(entry) = queue.timers.get_mut(&id) else {
                    continue;
                };
                if entry.generation != generation || entry.state != TimerState::Waiting {
                    continue;
                }
                entry.state = TimerState::Ready;
                let callback = Arc::clone(&entry.callback);
                let period = entry.period;

                // Fire without holding the lock so the callback may call
                // back into the service.
                drop(queue);
                callback();
                queue = shared.queue.lock();

                if let Some(entry) = queue.timers.get_mut(&id) {
                    if entry.state == TimerState::Ready {
                        match period {
                            Some(period) => {
                                entry.generation += 1;
                                entry.state = TimerState::Waiting;
                                let generation = entry.generation;
                                queue
                                    .heap
                                    .push(Reverse((Instant::now() + period, generation, id)));
                            }
                            None => entry.state = TimerState::Inactive,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(count: &AtomicUsize, at_least: usize, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        while Instant::now() < deadline {
            if count.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_oneshot_fires_once() {
        let service = TimerService::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let id = service.register(
            Arc::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        service.restart_timer(id, Duration::from_millis(5));
        assert!(wait_for(&fired, 1, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 1, "one-shot stays one-shot");
    }

    #[test]
    fn test_periodic_reschedules_itself() {
        let service = TimerService::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        service.register_periodic(
            Arc::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(5),
        );
        assert!(wait_for(&fired, 3, Duration::from_secs(2)));
    }

    #[test]
    fn test_cancel_prevents_pending_fire() {
        let service = TimerService::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let id = service.register(
            Arc::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        service.restart_timer(id, Duration::from_millis(30));
        service.cancel_timer(id);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_replaces_pending_deadline() {
        let service = TimerService::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let id = service.register(
            Arc::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        // Two restarts collapse into one firing.
        service.restart_timer(id, Duration::from_millis(20));
        service.restart_timer(id, Duration::from_millis(5));
        assert!(wait_for(&fired, 1, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_restart_itself() {
        let service = Arc::new(TimerService::new("test"));
        let fired = Arc::new(AtomicUsize::new(0));

        // A one-shot that reschedules itself twice.
        let id_slot = Arc::new(Mutex::new(None::<TimerId>));
        let fired_cb = Arc::clone(&fired);
        let service_cb = Arc::clone(&service);
        let id_slot_cb = Arc::clone(&id_slot);
        let id = service.register(
            Arc::new(move || {
                let n = fired_cb.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    if let Some(id) = *id_slot_cb.lock() {
                        service_cb.restart_timer(id, Duration::from_millis(2));
                    }
                }
            }),
            None,
        );
        *id_slot.lock() = Some(id);
        service.restart_timer(id, Duration::from_millis(2));
        assert!(wait_for(&fired, 3, Duration::from_secs(2)));
    }

    #[test]
    fn test_stop_joins_cleanly() {
        let service = TimerService::new("test");
        service.register_periodic(Arc::new(|| {}), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        service.stop();
    }
}
