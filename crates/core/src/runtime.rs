//! Cancellable worker tasks.
//!
//! Every periodic activity in the stack — pacing frames out, polling a
//! feedback socket, re-evaluating congestion — runs as a dedicated thread
//! built here. A worker loops on a ticker (or a channel) and a zero-capacity
//! stop channel; [`TaskHandle::stop`] rendezvouses with the worker and joins
//! it, so when `stop` returns the worker has observably exited and will not
//! fire again.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};

/// Handle to a running worker thread.
///
/// `stop` is synchronous and idempotent: the first call blocks until the
/// worker exits, later calls are no-ops. A worker whose body returns `false`
/// stops itself; a later `stop` on its handle still joins cleanly.
pub struct TaskHandle {
    name: &'static str,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawns a worker that runs `work` every `interval`.
    ///
    /// The worker exits when `work` returns `false` or `stop` is called.
    pub fn spawn_periodic<F>(name: &'static str, interval: Duration, mut work: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if !work() {
                            break;
                        }
                    }
                }
            }
            tracing::trace!(task = name, "worker exited");
        });
        Self {
            name,
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Spawns a periodic worker whose interval can be replaced while it runs.
    ///
    /// A new interval arriving on `pace` swaps the ticker out immediately
    /// rather than waiting for the old one to fire, so a slower pace takes
    /// effect before the next already-scheduled tick.
    pub fn spawn_paced<F>(
        name: &'static str,
        initial: Duration,
        pace: Receiver<Duration>,
        mut work: F,
    ) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = thread::spawn(move || {
            let mut ticker = tick(initial);
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(pace) -> interval => match interval {
                        Ok(interval) => {
                            tracing::trace!(task = name, ?interval, "pace replaced");
                            ticker = tick(interval);
                        }
                        Err(_) => break,
                    },
                    recv(ticker) -> _ => {
                        if !work() {
                            break;
                        }
                    }
                }
            }
            tracing::trace!(task = name, "worker exited");
        });
        Self {
            name,
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Spawns a worker that calls `work` back-to-back, checking for a stop
    /// signal between calls.
    ///
    /// `work` must bound its own blocking (a socket read timeout) so the
    /// stop signal is observed promptly.
    pub fn spawn_poll<F>(name: &'static str, mut work: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = thread::spawn(move || {
            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                if !work() {
                    break;
                }
            }
            tracing::trace!(task = name, "worker exited");
        });
        Self {
            name,
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Spawns a worker that drains `items`, handing each to `handle`.
    ///
    /// The worker exits when the channel disconnects or `stop` is called.
    pub fn spawn_consumer<T, F>(name: &'static str, items: Receiver<T>, mut handle: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = thread::spawn(move || {
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(items) -> item => match item {
                        Ok(item) => handle(item),
                        Err(_) => break,
                    },
                }
            }
            tracing::trace!(task = name, "worker exited");
        });
        Self {
            name,
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            // Rendezvous with a live worker; errors out immediately if the
            // worker already stopped itself.
            let _ = self.stop_tx.send(());
            let _ = thread.join();
            tracing::trace!(task = self.name, "worker stopped");
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Creates the channel pair used to re-pace a [`spawn_paced`] worker.
///
/// The sender side goes to whoever decides the pace; the receiver side is
/// handed to `spawn_paced`. Sends never block.
///
/// [`spawn_paced`]: TaskHandle::spawn_paced
pub fn pace_channel() -> (Sender<Duration>, Receiver<Duration>) {
    crossbeam_channel::unbounded()
}
