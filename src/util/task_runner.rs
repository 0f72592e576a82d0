// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crossbeam_channel::{Receiver, Sender};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

/// Work that a [TaskRunner] performs on its own thread.
pub trait PeriodicTask: Send + 'static {
    /// Runs once on the worker thread before the first step.
    fn pre_work(&mut self) {}

    /// Runs once per wakeup, either because the idle period elapsed or
    /// because someone signaled.
    fn work_step(&mut self) {}

    /// Runs once on the worker thread after the last step.
    fn post_work(&mut self) {}
}

/// Wakes a [TaskRunner]'s thread early. Cheap to clone and safe to use from
/// any thread.
#[derive(Debug, Clone)]
pub struct WorkSignal(Sender<()>);
impl WorkSignal {
    /// Asks for a work step as soon as possible. Signals that arrive while
    /// one is already pending collapse into one.
    pub fn signal_work_arrived(&self) {
        let _ = self.0.try_send(());
    }
}

/// Runs a [PeriodicTask] on a background thread: a step, then a wait of up
/// to the idle period, repeated until stopped. Stopping is cooperative and
/// joins the thread.
#[derive(Debug)]
pub struct TaskRunner {
    name: String,
    idle: Duration,
    signal_sender: Sender<()>,
    signal_receiver: Receiver<()>,
    working: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}
impl TaskRunner {
    /// A runner named `name` (used for the thread name) that sleeps `idle`
    /// between steps unless signaled.
    pub fn new(name: &str, idle: Duration) -> Self {
        let (signal_sender, signal_receiver) = crossbeam_channel::bounded(1);
        Self {
            name: name.to_string(),
            idle,
            signal_sender,
            signal_receiver,
            working: Default::default(),
            handle: None,
        }
    }

    /// Starts `task`, stopping whatever was running first.
    pub fn start<T: PeriodicTask>(&mut self, mut task: T) {
        self.stop();

        self.working.store(true, Ordering::SeqCst);
        let working = Arc::clone(&self.working);
        let receiver = self.signal_receiver.clone();
        let idle = self.idle;
        // Drop any wakeup left over from a previous run.
        while receiver.try_recv().is_ok() {}

        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                task.pre_work();
                while working.load(Ordering::SeqCst) {
                    task.work_step();
                    let _ = receiver.recv_timeout(idle);
                }
                task.post_work();
            });
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                self.working.store(false, Ordering::SeqCst);
                log::error!(target: "TaskRunner", "couldn't start {}: {e:?}", self.name);
            }
        }
    }

    /// Asks the thread to finish and waits for it.
    pub fn stop(&mut self) {
        self.working.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            self.signal_work_arrived();
            if handle.join().is_err() {
                log::error!(target: "TaskRunner", "{} panicked", self.name);
            }
        }
    }

    /// Whether the task is running (or about to stop).
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    /// Wakes the thread early.
    pub fn signal_work_arrived(&self) {
        let _ = self.signal_sender.try_send(());
    }

    /// A handle other threads can use to wake this runner.
    pub fn work_signal(&self) -> WorkSignal {
        WorkSignal(self.signal_sender.clone())
    }
}
impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::assert_ge;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        pre: Arc<AtomicUsize>,
        steps: Arc<AtomicUsize>,
        post: Arc<AtomicUsize>,
    }
    impl PeriodicTask for Counter {
        fn pre_work(&mut self) {
            self.pre.fetch_add(1, Ordering::SeqCst);
        }
        fn work_step(&mut self) {
            self.steps.fetch_add(1, Ordering::SeqCst);
        }
        fn post_work(&mut self) {
            self.post.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lifecycle_hooks_run_once() {
        let counter = Counter::default();
        let (pre, steps, post) = (
            Arc::clone(&counter.pre),
            Arc::clone(&counter.steps),
            Arc::clone(&counter.post),
        );
        let mut runner = TaskRunner::new("test", Duration::from_secs(60));
        runner.start(counter);
        assert!(runner.is_working());
        while steps.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        runner.stop();
        assert!(!runner.is_working());
        assert_eq!(pre.load(Ordering::SeqCst), 1);
        assert_ge!(steps.load(Ordering::SeqCst), 1);
        assert_eq!(post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn signal_wakes_early() {
        let counter = Counter::default();
        let steps = Arc::clone(&counter.steps);
        let mut runner = TaskRunner::new("test", Duration::from_secs(60));
        runner.start(counter);
        let signal = runner.work_signal();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while steps.load(Ordering::SeqCst) < 3 {
            signal.signal_work_arrived();
            std::thread::sleep(Duration::from_millis(5));
            assert!(
                std::time::Instant::now() < deadline,
                "signals should wake the worker long before the idle period"
            );
        }
        drop(runner);
    }
}
