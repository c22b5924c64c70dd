//! A small thread-pool task executor, shared by the storage core's writer
//! task (`context::Context`, one worker) and the dispatch pipeline's Scribe
//! worker pools (one pool per partition, spawned on demand).
//!
//! An unbounded `crossbeam` channel feeds a fixed set of worker threads;
//! `execute` is for fire-and-forget work and `spawn` is for work whose
//! result the caller wants back. There's no scoped-borrow variant — every
//! job in this crate closes over owned/`Arc`-shared data.

use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A concurrent task executor based on a thread-pool pattern. Tasks are
/// submitted in FIFO order; completion order is not guaranteed.
pub struct Executor {
    sender: Option<Sender<Message>>,
    workers: Vec<Worker>,
}

enum Message {
    Task(Task),
    Shutdown,
}

struct Worker {
    handle: Option<thread::JoinHandle<()>>,
}

impl Executor {
    /// Creates a new executor with `size` worker threads.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "thread pool size must be greater than 0");

        let (sender, receiver) = unbounded();
        let workers = (0..size).map(|_| Worker::new(receiver.clone())).collect();

        Executor {
            sender: Some(sender),
            workers,
        }
    }

    /// Creates a single-threaded executor. Used by the storage core to
    /// serialise every write through one worker (spec §4.3).
    pub fn single_threaded() -> Self {
        Self::new(1)
    }

    /// Executes a task on the thread pool, without waiting for a result.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Message::Task(Box::new(f)));
    }

    /// Spawns a task and returns a future that resolves to its result.
    pub fn spawn<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.execute(move || {
            let _ = tx.send(f());
        });
        TaskFuture { receiver: rx }
    }

    /// Returns a cloneable handle that can submit work from other threads.
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            sender: self.sender.clone().expect("executor sender not yet dropped"),
        }
    }

    /// Number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    fn send(&self, message: Message) {
        self.sender
            .as_ref()
            .expect("executor sender not yet dropped")
            .send(message)
            .expect("executor worker thread gone");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Drop the sender first so every worker's receive loop observes
        // either a Shutdown or a disconnected channel, then join.
        if let Some(sender) = self.sender.take() {
            for _ in &self.workers {
                let _ = sender.send(Message::Shutdown);
            }
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Worker {
    fn new(receiver: Receiver<Message>) -> Self {
        let handle = thread::spawn(move || loop {
            match receiver.recv() {
                Ok(Message::Task(task)) => task(),
                Ok(Message::Shutdown) | Err(_) => break,
            }
        });
        Worker {
            handle: Some(handle),
        }
    }
}

/// A handle to submit tasks to an executor from other threads.
#[derive(Clone)]
pub struct ExecutorHandle {
    sender: Sender<Message>,
}

impl ExecutorHandle {
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.sender.send(Message::Task(Box::new(f)));
    }

    pub fn spawn<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.execute(move || {
            let _ = tx.send(f());
        });
        TaskFuture { receiver: rx }
    }
}

/// The result of a spawned task. Call [`TaskFuture::wait`] to block for it.
pub struct TaskFuture<T> {
    receiver: Receiver<T>,
}

impl<T> TaskFuture<T> {
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().map_err(|_| TaskError::TaskFailed)
    }
}

/// Error type for task execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// The executor was dropped, or the task panicked, before a result
    /// arrived.
    TaskFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn executes_tasks() {
        let executor = Executor::new(4);
        let counter = Arc::new(Mutex::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            executor.execute(move || {
                *counter.lock().unwrap() += 1;
            });
        }

        drop(executor); // join waits for all workers to drain the queue
        assert_eq!(*counter.lock().unwrap(), 10);
    }

    #[test]
    fn spawn_returns_result() {
        let executor = Executor::single_threaded();
        let future = executor.spawn(|| 21 * 2);
        assert_eq!(future.wait().unwrap(), 42);
    }

    #[test]
    fn single_threaded_serialises_jobs() {
        let executor = Executor::single_threaded();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = Arc::clone(&order);
            executor.execute(move || order.lock().unwrap().push(i));
        }
        drop(executor);
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn handle_spawns_from_other_threads() {
        let executor = Executor::new(2);
        let handle = executor.handle();
        let future = thread::spawn(move || handle.spawn(|| "hi")).join().unwrap();
        assert_eq!(future.wait().unwrap(), "hi");
    }
}
