use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Admission control for asynchronous tasks.
///
/// At most `max_concurrent` submitted tasks run at any instant. The rest
/// wait in submission order and are admitted one by one as running tasks
/// settle. Queueing does not transform the task's output in any way.
///
/// Slot accounting is tied to a [`Permit`] guard, so a slot is released
/// exactly once per admitted task, whether it completes, fails, or is
/// dropped mid-flight.
#[derive(Clone, Debug)]
pub struct BoundedQueue {
    state: Arc<Mutex<QueueState>>,
}

#[derive(Debug)]
struct QueueState {
    running: usize,
    max_concurrent: usize,
    waiters: VecDeque<oneshot::Sender<Permit>>,
}

impl BoundedQueue {
    /// Creates a queue admitting at most `max_concurrent` tasks at once.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is zero.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "queue needs at least one slot");
        BoundedQueue {
            state: Arc::new(Mutex::new(QueueState {
                running: 0,
                max_concurrent,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Submits a task thunk for execution.
    ///
    /// Admission bookkeeping happens before `submit` returns: either a run
    /// slot is claimed immediately, or a waiter is registered at the back of
    /// the queue. FIFO order is therefore the order of `submit` calls, not
    /// the order in which the returned futures are first polled.
    ///
    /// The thunk is only invoked once the task is admitted.
    pub fn submit<F, Fut>(&self, thunk: F) -> impl Future<Output = Fut::Output> + use<F, Fut>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let admission = {
            let mut state = self.state.lock().unwrap();
            if state.running < state.max_concurrent {
                state.running += 1;
                Ok(Permit::new(Arc::clone(&self.state)))
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Err(rx)
            }
        };

        async move {
            let _permit = match admission {
                Ok(permit) => permit,
                // Waiters are only parked while `max_concurrent` permits are
                // live, and every dropped permit hands its slot to the next
                // waiter. The sender side therefore cannot go away without
                // either a hand-off or the whole queue being gone.
                Err(rx) => rx.await.expect("queue dropped a parked waiter"),
            };
            thunk().await
        }
    }

    /// Number of currently admitted tasks.
    pub fn running(&self) -> usize {
        self.state.lock().unwrap().running
    }

    /// Number of tasks waiting for admission.
    pub fn queued(&self) -> usize {
        self.state.lock().unwrap().waiters.len()
    }
}

/// Claim on one of the queue's run slots.
///
/// Dropping the permit releases the slot, admitting the next live waiter in
/// FIFO order. Waiters cancelled while still queued are skipped and never
/// consume the slot.
#[derive(Debug)]
struct Permit {
    state: Option<Arc<Mutex<QueueState>>>,
}

impl Permit {
    fn new(state: Arc<Mutex<QueueState>>) -> Self {
        Permit { state: Some(state) }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        loop {
            let waiter = {
                let mut queue = state.lock().unwrap();
                match queue.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        queue.running -= 1;
                        return;
                    }
                }
            };

            match waiter.send(Permit::new(Arc::clone(&state))) {
                Ok(()) => return,
                Err(mut unclaimed) => {
                    // The waiter was cancelled while queued. Disarm the
                    // returned permit and offer the slot to the next one.
                    unclaimed.state = None;
                }
            }
        }
    }
}
