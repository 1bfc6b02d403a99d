use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::capture::event::CapturedEvent;
use crate::capture::retry::RetryPolicy;
use crate::capture::sink::{is_retryable, CaptureSink};

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub flush_at: usize,
    pub flush_interval: Duration,
    pub max_batch_size: usize,
    pub max_queue_size: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            flush_at: 20,
            flush_interval: Duration::from_secs(30),
            max_batch_size: 100,
            max_queue_size: 1000,
            retry_policy: RetryPolicy::default(),
        }
    }
}

enum WorkerMessage {
    Event(CapturedEvent),
    Flush(oneshot::Sender<()>),
}

/// Bounded, non-blocking event queue with a single background consumer.
///
/// Producers hand events over a bounded channel; when it is full the event is
/// dropped with a warning rather than blocking the caller. The worker
/// accumulates events and flushes on queue depth, on a timer, on explicit
/// request, and on shutdown.
pub struct EventQueue {
    sender: mpsc::Sender<WorkerMessage>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    /// Spawn the background worker. Must be called within a tokio runtime.
    pub fn start(options: QueueOptions, sink: Arc<dyn CaptureSink>) -> Self {
        let (sender, receiver) = mpsc::channel(options.max_queue_size.max(1));
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        let worker = Worker {
            sink,
            flush_at: options.flush_at.max(1),
            flush_interval: options.flush_interval,
            max_batch_size: options.max_batch_size.max(1),
            retry_policy: options.retry_policy,
            buffer: Vec::new(),
        };
        let handle = tokio::spawn(worker.run(receiver, shutdown_receiver));

        EventQueue {
            sender,
            shutdown: shutdown_sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Non-blocking enqueue. A full or stopped queue drops the event.
    pub fn enqueue(&self, event: CapturedEvent) {
        match self.sender.try_send(WorkerMessage::Event(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("capture queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("capture queue stopped, dropping event");
            }
        }
    }

    /// Flush everything accepted so far and wait for the attempt to finish.
    pub async fn flush(&self) {
        let (ack_sender, ack_receiver) = oneshot::channel();
        if self
            .sender
            .send(WorkerMessage::Flush(ack_sender))
            .await
            .is_err()
        {
            return;
        }
        let _ = ack_receiver.await;
    }

    /// Stop the worker, draining the queue for at most `deadline`.
    pub async fn shutdown(&self, deadline: Duration) {
        let _ = self.shutdown.send(true);
        let handle = self
            .handle
            .lock()
            .expect("event queue handle lock poisoned")
            .take();
        if let Some(mut handle) = handle {
            tokio::select! {
                _ = &mut handle => {}
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!(
                        "capture queue did not drain before the shutdown deadline, aborting"
                    );
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

struct Worker {
    sink: Arc<dyn CaptureSink>,
    flush_at: usize,
    flush_interval: Duration,
    max_batch_size: usize,
    retry_policy: RetryPolicy,
    buffer: Vec<CapturedEvent>,
}

impl Worker {
    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<WorkerMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(self.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a fresh interval completes immediately
        interval.reset();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush_buffer().await;
                }
                message = receiver.recv() => match message {
                    Some(WorkerMessage::Event(event)) => {
                        self.buffer.push(event);
                        if self.buffer.len() >= self.flush_at {
                            self.flush_buffer().await;
                            interval.reset();
                        }
                    }
                    Some(WorkerMessage::Flush(ack)) => {
                        self.flush_buffer().await;
                        interval.reset();
                        let _ = ack.send(());
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        self.drain(receiver).await;
    }

    /// Consume whatever is still queued, then flush one last time.
    async fn drain(&mut self, mut receiver: mpsc::Receiver<WorkerMessage>) {
        receiver.close();
        while let Some(message) = receiver.recv().await {
            match message {
                WorkerMessage::Event(event) => self.buffer.push(event),
                WorkerMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        self.flush_buffer().await;
    }

    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.buffer);
        for chunk in events.chunks(self.max_batch_size) {
            self.send_with_retry(chunk.to_vec()).await;
        }
    }

    async fn send_with_retry(&self, batch: Vec<CapturedEvent>) {
        let batch_size = batch.len();
        for attempt in 1..=self.retry_policy.max_attempts {
            match self.sink.send_batch(batch.clone()).await {
                Ok(()) => {
                    tracing::debug!("delivered batch of {batch_size} events");
                    return;
                }
                Err(error)
                    if is_retryable(&error) && attempt < self.retry_policy.max_attempts =>
                {
                    let backoff = self.retry_policy.retry_interval(attempt);
                    tracing::warn!(
                        "batch delivery attempt {attempt} failed ({error}), retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    tracing::error!(
                        "dropping batch of {batch_size} events after {attempt} attempts: {error}"
                    );
                    return;
                }
            }
        }
    }
}
