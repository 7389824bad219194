use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::time::{ServerClock, ServerTime};

/// A unit of deferred work. Executed on a server worker, never on the timer
/// thread itself.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    deadline: Instant,
    seq: u64,
    work: WorkItem,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct Shared {
    queue: Mutex<SchedulerQueue>,
    wake: Condvar,
}

struct SchedulerQueue {
    heap: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
    shutdown: bool,
}

/// Fires callbacks at or after their deadline.
///
/// Work is posted onto the supplied channel rather than run inline so that
/// it executes on a worker that may take the affected entity's lock without
/// stalling other timers.
pub struct Scheduler {
    clock: ServerClock,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(clock: ServerClock, sink: flume::Sender<WorkItem>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(SchedulerQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("astral-timer".into())
            .spawn(move || run_timer(thread_shared, sink))
            .expect("failed to spawn timer thread");

        Self {
            clock,
            shared,
            thread: Some(thread),
        }
    }

    pub fn schedule_in(&self, delay: Duration, work: WorkItem) {
        self.push(Instant::now() + delay, work);
    }

    pub fn schedule_at(&self, deadline: ServerTime, work: WorkItem) {
        self.push(self.clock.instant_at(deadline), work);
    }

    fn push(&self, deadline: Instant, work: WorkItem) {
        let mut queue = self.shared.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Reverse(Pending {
            deadline,
            seq,
            work,
        }));
        drop(queue);
        self.shared.wake.notify_one();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.wake.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_timer(shared: Arc<Shared>, sink: flume::Sender<WorkItem>) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            return;
        }

        let now = Instant::now();
        let next_deadline = queue.heap.peek().map(|Reverse(p)| p.deadline);
        match next_deadline {
            Some(deadline) if deadline <= now => {
                let Reverse(pending) = queue.heap.pop().expect("peeked entry vanished");
                // Release the lock while handing off so schedulers never
                // block behind a full work queue.
                drop(queue);
                if sink.send(pending.work).is_err() {
                    warn!("work queue closed, timer thread exiting");
                    return;
                }
                queue = shared.queue.lock();
            }
            Some(deadline) => {
                let _ = shared.wake.wait_for(&mut queue, deadline - now);
            }
            None => {
                shared.wake.wait(&mut queue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fires_at_or_after_deadline() {
        let (tx, rx) = flume::unbounded();
        let scheduler = Scheduler::new(ServerClock::new(), tx);

        let start = Instant::now();
        scheduler.schedule_in(Duration::from_millis(20), Box::new(|| {}));

        let work = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        work();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn earlier_insert_preempts_later_head() {
        let (tx, rx) = flume::unbounded();
        let scheduler = Scheduler::new(ServerClock::new(), tx);

        let (out_tx, out_rx) = flume::unbounded();

        let late = out_tx.clone();
        scheduler.schedule_in(Duration::from_millis(200), Box::new(move || late.send(2).unwrap()));
        let early = out_tx;
        scheduler.schedule_in(Duration::from_millis(10), Box::new(move || early.send(1).unwrap()));

        for _ in 0..2 {
            let work = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            work();
        }

        assert_eq!(out_rx.try_recv().unwrap(), 1);
        assert_eq!(out_rx.try_recv().unwrap(), 2);
    }
}
