//! Cross-thread task dispatch
//!
//! Protocol worker threads must never touch compositor state. Instead they
//! push a closure onto a per-peer [`Dispatcher`] queue and bump a
//! semaphore-mode eventfd. The display thread's event loop watches that fd
//! and, on each wake-up, consumes one count and runs the oldest task.
//!
//! # Task contract
//!
//! A task is called exactly once:
//! - with `Some(target)` on the display thread while the peer is alive, or
//! - with `None` ("free only") when the queue is closed at peer teardown,
//!   so the task can release what it captured without side effects.
//!
//! Tasks from one thread run in the order they were queued.

use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The queue was closed by peer teardown; the task was already released
    #[error("Dispatcher closed, task released")]
    Closed,

    /// Creating or signalling the eventfd failed
    #[error("Eventfd error: {0}")]
    EventFd(#[from] Errno),
}

/// A unit of work bound for the display thread
pub type Task<D> = Box<dyn FnOnce(Option<&mut D>) + Send + 'static>;

struct Queue<D> {
    tasks: VecDeque<Task<D>>,
    closed: bool,
}

struct Shared<D> {
    name: String,
    queue: Mutex<Queue<D>>,
    eventfd: EventFd,
}

/// Display-thread side of a per-peer task queue
pub struct Dispatcher<D> {
    shared: Arc<Shared<D>>,
}

/// Worker-thread side of a per-peer task queue
pub struct DispatchHandle<D> {
    shared: Arc<Shared<D>>,
}

impl<D> Clone for DispatchHandle<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D> Dispatcher<D> {
    /// Create a queue with its semaphore eventfd
    pub fn new(name: impl Into<String>) -> Result<Self, DispatchError> {
        let eventfd = EventFd::from_value_and_flags(
            0,
            EfdFlags::EFD_SEMAPHORE | EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK,
        )?;

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                queue: Mutex::new(Queue {
                    tasks: VecDeque::new(),
                    closed: false,
                }),
                eventfd,
            }),
        })
    }

    /// Handle for worker threads
    pub fn handle(&self) -> DispatchHandle<D> {
        DispatchHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The wake-up fd to register with the event loop
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.shared.eventfd.as_fd()
    }

    /// Duplicate of the wake-up fd, for event sources that own their fd
    pub fn try_clone_fd(&self) -> io::Result<OwnedFd> {
        self.shared.eventfd.as_fd().try_clone_to_owned()
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Consume one wake-up and run the oldest task
    ///
    /// Returns `false` when no wake-up was pending.
    pub fn dispatch_one(&self, target: &mut D) -> bool {
        match self.shared.eventfd.read() {
            Ok(_) => {}
            Err(Errno::EAGAIN) => return false,
            Err(e) => {
                warn!("{}: eventfd read failed: {}", self.shared.name, e);
                return false;
            }
        }

        // Release the lock before running: tasks may queue follow-ups.
        let task = self.shared.queue.lock().tasks.pop_front();
        match task {
            Some(task) => {
                trace!("{}: running task", self.shared.name);
                task(Some(target));
            }
            None => warn!("{}: wake-up without a queued task", self.shared.name),
        }
        true
    }

    /// Run every task that has a pending wake-up
    pub fn dispatch_pending(&self, target: &mut D) -> usize {
        let mut ran = 0;
        while self.dispatch_one(target) {
            ran += 1;
        }
        ran
    }

    /// Close the queue and release every remaining task with `None`
    ///
    /// Further [`DispatchHandle::dispatch`] calls release their task in
    /// place and return [`DispatchError::Closed`].
    pub fn close(&self) -> usize {
        let remaining = {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
            std::mem::take(&mut queue.tasks)
        };

        let count = remaining.len();
        for task in remaining {
            task(None);
        }
        while self.shared.eventfd.read().is_ok() {}

        if count > 0 {
            debug!("{}: released {} queued tasks", self.shared.name, count);
        }
        count
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }
}

impl<D> DispatchHandle<D> {
    /// Queue `task` for the display thread
    pub fn dispatch<F>(&self, task: F) -> Result<(), DispatchError>
    where
        F: FnOnce(Option<&mut D>) + Send + 'static,
    {
        let task: Task<D> = Box::new(task);
        let rejected = {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                Some(task)
            } else {
                queue.tasks.push_back(task);
                None
            }
        };

        if let Some(task) = rejected {
            task(None);
            return Err(DispatchError::Closed);
        }

        self.shared.eventfd.write(1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fifo_order() {
        let dispatcher: Dispatcher<Vec<u32>> = Dispatcher::new("test").unwrap();
        let handle = dispatcher.handle();
        for i in 0..5 {
            handle.dispatch(move |v| v.unwrap().push(i)).unwrap();
        }

        let mut seen = Vec::new();
        assert_eq!(dispatcher.dispatch_pending(&mut seen), 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(!dispatcher.dispatch_one(&mut seen));
    }

    #[test]
    fn test_one_task_per_wakeup() {
        let dispatcher: Dispatcher<Vec<u32>> = Dispatcher::new("test").unwrap();
        let handle = dispatcher.handle();
        handle.dispatch(|v| v.unwrap().push(1)).unwrap();
        handle.dispatch(|v| v.unwrap().push(2)).unwrap();

        let mut seen = Vec::new();
        assert!(dispatcher.dispatch_one(&mut seen));
        assert_eq!(seen, vec![1]);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn test_close_releases_with_none() {
        let dispatcher: Dispatcher<Vec<u32>> = Dispatcher::new("test").unwrap();
        let handle = dispatcher.handle();
        let released = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let released = Arc::clone(&released);
            handle
                .dispatch(move |v| {
                    assert!(v.is_none());
                    released.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        assert_eq!(dispatcher.close(), 3);
        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert!(!dispatcher.dispatch_one(&mut Vec::new()));
    }

    #[test]
    fn test_dispatch_after_close_releases_in_place() {
        let dispatcher: Dispatcher<()> = Dispatcher::new("test").unwrap();
        let handle = dispatcher.handle();
        dispatcher.close();

        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let result = handle.dispatch(move |v| {
            assert!(v.is_none());
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert!(matches!(result, Err(DispatchError::Closed)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_threads() {
        let dispatcher: Dispatcher<Vec<(u32, u32)>> = Dispatcher::new("test").unwrap();
        let workers: Vec<_> = (0..4)
            .map(|w| {
                let handle = dispatcher.handle();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        handle.dispatch(move |v| v.unwrap().push((w, i))).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut seen = Vec::new();
        assert_eq!(dispatcher.dispatch_pending(&mut seen), 200);

        // Per-thread order is preserved
        for w in 0..4 {
            let order: Vec<u32> = seen.iter().filter(|(t, _)| *t == w).map(|(_, i)| *i).collect();
            assert_eq!(order, (0..50).collect::<Vec<_>>());
        }
    }
}
