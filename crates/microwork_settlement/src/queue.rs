//! In-process settlement job queue.
//!
//! One producer side (`enqueue`) feeds one consumer, either the async loop
//! started by [`JobQueue::spawn_consumer`] or the deterministic
//! [`JobQueue::drain`] used by tests. Jobs are retried on retryable errors
//! with exponential backoff; terminal failures go to the handler's failure
//! hook instead of poisoning the queue.

use crate::error::{SettlementError, SettlementResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

/// Processes one kind of settlement job.
pub trait JobHandler<J>: Send + Sync {
    /// Processes a job; a retryable error re-queues the attempt.
    fn process(&self, job: &J) -> SettlementResult<()>;

    /// Called once when a job fails past its retry budget.
    fn on_terminal_failure(&self, _job: &J, _error: &SettlementError) {}
}

/// Retry behavior for job processing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per job.
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// A policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// An unbounded in-process job queue.
///
/// The receiver side is claimed exactly once, by the first consumer loop or
/// by `drain`; producers hold the queue and enqueue from anywhere.
pub struct JobQueue<J> {
    tx: UnboundedSender<J>,
    rx: Mutex<Option<UnboundedReceiver<J>>>,
}

impl<J: Send + 'static> JobQueue<J> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Adds a job.
    pub fn enqueue(&self, job: J) -> SettlementResult<()> {
        self.tx.send(job).map_err(|_| SettlementError::QueueClosed)
    }

    /// Processes every queued job synchronously and returns the count.
    ///
    /// Retries happen inline with blocking sleeps; tests usually pass
    /// [`RetryPolicy::no_retry`]. Fails once a consumer loop owns the
    /// receiver.
    pub fn drain<H: JobHandler<J>>(
        &self,
        handler: &H,
        retry: &RetryPolicy,
    ) -> SettlementResult<usize> {
        let mut guard = self.rx.lock();
        let rx = guard.as_mut().ok_or(SettlementError::QueueClosed)?;
        let mut processed = 0;
        while let Ok(job) = rx.try_recv() {
            run_job(handler, &job, retry, std::thread::sleep);
            processed += 1;
        }
        Ok(processed)
    }

    /// Starts the consumer loop on the current tokio runtime.
    ///
    /// Claims the receiver; the loop ends when every producer handle to the
    /// queue is dropped.
    pub fn spawn_consumer<H: JobHandler<J> + 'static>(
        &self,
        handler: Arc<H>,
        retry: RetryPolicy,
    ) -> SettlementResult<tokio::task::JoinHandle<()>> {
        let mut rx = self.rx.lock().take().ok_or(SettlementError::QueueClosed)?;
        Ok(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let mut attempt = 0;
                loop {
                    match handler.process(&job) {
                        Ok(()) => break,
                        Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                            attempt += 1;
                            debug!(attempt, error = %err, "retrying settlement job");
                            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                        }
                        Err(err) => {
                            error!(error = %err, "settlement job failed terminally");
                            handler.on_terminal_failure(&job, &err);
                            break;
                        }
                    }
                }
            }
        }))
    }
}

impl<J: Send + 'static> Default for JobQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}

fn run_job<J, H: JobHandler<J>>(
    handler: &H,
    job: &J,
    retry: &RetryPolicy,
    sleep: impl Fn(Duration),
) {
    let mut attempt = 0;
    loop {
        match handler.process(job) {
            Ok(()) => return,
            Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                attempt += 1;
                debug!(attempt, error = %err, "retrying settlement job");
                sleep(retry.delay_for_attempt(attempt));
            }
            Err(err) => {
                error!(error = %err, "settlement job failed terminally");
                handler.on_terminal_failure(job, &err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        failures_left: Mutex<u32>,
        processed: Mutex<Vec<u32>>,
        terminal: Mutex<Vec<u32>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                processed: Mutex::new(Vec::new()),
                terminal: Mutex::new(Vec::new()),
            }
        }
    }

    impl JobHandler<u32> for Flaky {
        fn process(&self, job: &u32) -> SettlementResult<()> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(SettlementError::provider("gateway timeout"));
            }
            self.processed.lock().push(*job);
            Ok(())
        }

        fn on_terminal_failure(&self, job: &u32, _error: &SettlementError) {
            self.terminal.lock().push(*job);
        }
    }

    #[test]
    fn drain_processes_in_order_and_retries_transient_failures() {
        let queue: JobQueue<u32> = JobQueue::new();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        let handler = Flaky::new(1);
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        };
        assert_eq!(queue.drain(&handler, &retry).unwrap(), 2);
        assert_eq!(*handler.processed.lock(), vec![1, 2]);
        assert!(handler.terminal.lock().is_empty());
    }

    #[test]
    fn exhausted_retries_hit_the_terminal_hook() {
        let queue: JobQueue<u32> = JobQueue::new();
        queue.enqueue(7).unwrap();

        let handler = Flaky::new(10);
        assert_eq!(queue.drain(&handler, &RetryPolicy::no_retry()).unwrap(), 1);
        assert!(handler.processed.lock().is_empty());
        assert_eq!(*handler.terminal.lock(), vec![7]);
    }

    #[tokio::test]
    async fn consumer_loop_processes_until_producers_drop() {
        let queue: JobQueue<u32> = JobQueue::new();
        let handler = Arc::new(Flaky::new(0));
        queue.enqueue(3).unwrap();
        queue.enqueue(4).unwrap();

        let consumer = queue
            .spawn_consumer(handler.clone(), RetryPolicy::no_retry())
            .unwrap();
        // The receiver is claimed; drain refuses.
        assert!(queue.drain(handler.as_ref(), &RetryPolicy::no_retry()).is_err());

        drop(queue);
        consumer.await.unwrap();
        assert_eq!(*handler.processed.lock(), vec![3, 4]);
    }
}
