use crate::{extract_panic_message, Queue, Task};
use std::{
    fmt::Display,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, warn};

/// How long [WorkerThread::stop] sleeps between wake-ups while waiting for the thread to exit.
const SHUTDOWN_SPIN: Duration = Duration::from_millis(1);

/// A dedicated thread that repeatedly drives a [Queue].
///
/// The thread sleeps on the queue's wake condition for at most `poll_interval`, then
/// invokes the callback once, and repeats until stopped. Errors returned by (and panics
/// raised in) the callback are logged and the loop continues.
///
/// The callback must not block: [WorkerThread::stop] never interrupts a callback that
/// is already running.
pub struct WorkerThread<T: Task> {
    name: String,
    queue: Arc<Queue<T>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Task> WorkerThread<T> {
    /// Spawn a thread named `name` that invokes `callback` each time `queue` is woken
    /// (or every `poll_interval` if it is not).
    pub fn spawn<F, E>(
        queue: Arc<Queue<T>>,
        name: &str,
        poll_interval: Duration,
        mut callback: F,
    ) -> io::Result<Self>
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let queue = queue.clone();
            let running = running.clone();
            let name = name.to_string();
            thread::Builder::new().name(name.clone()).spawn(move || {
                debug!(%name, "worker started");
                while running.load(Ordering::Acquire) {
                    queue.wait(poll_interval);
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    match catch_unwind(AssertUnwindSafe(&mut callback)) {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(%name, %err, "worker cycle failed"),
                        Err(panic) => {
                            let err = extract_panic_message(&*panic);
                            error!(%name, ?err, "worker cycle panicked");
                        }
                    }
                }
                debug!(%name, "worker stopped");
            })?
        };
        Ok(Self {
            name: name.to_string(),
            queue,
            running,
            handle: Some(handle),
        })
    }

    /// The name of the thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The queue the thread drives.
    pub fn queue(&self) -> &Arc<Queue<T>> {
        &self.queue
    }

    /// Returns `true` until the thread has been stopped (or has exited).
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    ///
    /// The queue is woken repeatedly until the thread exits, so a wake-up racing with the
    /// thread entering its wait cannot be lost. Calling `stop` more than once is a no-op.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        while !handle.is_finished() {
            self.queue.wake();
            thread::sleep(SHUTDOWN_SPIN);
        }
        if handle.join().is_err() {
            error!(name = %self.name, "worker exited abnormally");
        }
    }
}

impl<T: Task> Drop for WorkerThread<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outcome;
    use lanes_macros::test_traced;
    use std::{
        sync::{
            atomic::AtomicUsize,
            mpsc::{channel, RecvTimeoutError},
        },
        time::Instant,
    };

    /// Succeeds after a fixed number of steps.
    struct Countdown(usize);

    impl Task for Countdown {
        type Error = String;

        fn step(&mut self) -> Result<Outcome, String> {
            self.0 = self.0.saturating_sub(1);
            Ok(if self.0 == 0 {
                Outcome::Succeeded
            } else {
                Outcome::Pending
            })
        }
    }

    #[test_traced]
    fn test_drives_queue_to_completion() {
        let queue = Arc::new(Queue::new("test"));
        let (sender, receiver) = channel();
        let mut worker = {
            let queue = queue.clone();
            WorkerThread::spawn(queue.clone(), "driver", Duration::from_millis(5), move || {
                queue.drain();
                if queue.succeeded() == 3 {
                    let _ = sender.send(());
                }
                Ok::<_, String>(())
            })
            .unwrap()
        };
        assert_eq!(worker.name(), "driver");
        assert!(worker.is_running());

        queue.submit(Countdown(1));
        queue.submit(Countdown(4));
        queue.submit(Countdown(8));
        receiver.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(queue.take_succeeded(10).len(), 3);

        worker.stop();
        assert!(!worker.is_running());
        worker.stop();
    }

    #[test_traced]
    fn test_survives_errors_and_panics() {
        let queue = Arc::new(Queue::<Countdown>::new("test"));
        let cycles = Arc::new(AtomicUsize::new(0));
        let worker = {
            let cycles = cycles.clone();
            WorkerThread::spawn(queue, "faulty", Duration::from_millis(1), move || {
                match cycles.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("first cycle fails".to_string()),
                    1 => panic!("second cycle panics"),
                    _ => Ok(()),
                }
            })
            .unwrap()
        };

        let start = Instant::now();
        while cycles.load(Ordering::SeqCst) < 5 {
            assert!(start.elapsed() < Duration::from_secs(10));
            thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.is_running());
        drop(worker);
    }

    #[test_traced]
    fn test_wakes_on_submit() {
        let queue = Arc::new(Queue::new("test"));
        let (sender, receiver) = channel();
        let _worker = {
            let queue = queue.clone();
            // Poll interval far longer than the test: only a wake-up can trigger the callback
            WorkerThread::spawn(queue.clone(), "sleepy", Duration::from_secs(3600), move || {
                if queue.drain() {
                    let _ = sender.send(());
                }
                Ok::<_, String>(())
            })
            .unwrap()
        };
        queue.submit(Countdown(1));
        receiver.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test_traced]
    fn test_stop_is_prompt() {
        let queue = Arc::new(Queue::<Countdown>::new("test"));
        let (sender, receiver) = channel::<()>();
        let mut worker = WorkerThread::spawn(
            queue,
            "idle",
            Duration::from_secs(3600),
            move || {
                let _ = &sender;
                Ok::<_, String>(())
            },
        )
        .unwrap();

        let start = Instant::now();
        worker.stop();
        assert!(start.elapsed() < Duration::from_secs(10));

        // The callback (and the sender it owns) was dropped with the thread
        assert_eq!(
            receiver.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        );
    }
}
