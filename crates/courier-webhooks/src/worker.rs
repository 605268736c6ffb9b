//! Webhook Worker
//!
//! Background loop that feeds published events into the dispatcher, polls
//! the delivery queue and recovers stale claims. Any number of workers may
//! share one store; the queue's atomic claim keeps them from overlapping.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::models::Event;
use crate::publisher::EventReceiver;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum deliveries in flight for this worker.
    pub concurrency: usize,

    /// How often to poll the queue (in milliseconds).
    pub poll_interval_ms: u64,

    /// How often to sweep stale claims (in milliseconds).
    pub stale_sweep_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval_ms: 1000,
            stale_sweep_interval_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(poll_interval);
        self
    }

    #[must_use]
    pub fn with_stale_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.stale_sweep_interval_ms = duration_ms(sweep_interval);
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Background delivery worker.
pub struct WebhookWorker {
    dispatcher: Arc<Dispatcher>,
    events: Option<EventReceiver>,
    /// Published events whose submission hit a storage error.
    held: VecDeque<Event>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl WebhookWorker {
    /// Create a new worker.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, config: WorkerConfig) -> Self {
        Self {
            dispatcher,
            events: None,
            held: VecDeque::new(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Drain events published through an
    /// [`EventPublisher`](crate::publisher::EventPublisher).
    #[must_use]
    pub fn with_events(mut self, events: EventReceiver) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops this worker when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled, then wait for in-flight
    /// deliveries to finish.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        let permits = u32::try_from(self.config.concurrency.max(1)).unwrap_or(u32::MAX);
        let concurrency = permits as usize;
        info!(
            concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting webhook worker"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stale_interval =
            interval(Duration::from_millis(self.config.stale_sweep_interval_ms.max(1)));
        stale_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Worker shutdown requested, stopping poll loop");
                    break;
                }
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.submit(event).await,
                    None => {
                        debug!("Event channel closed");
                        self.events = None;
                    }
                },
                _ = poll_interval.tick() => {
                    self.resubmit_held().await;
                    self.poll_and_process(&semaphore).await;
                }
                _ = stale_interval.tick() => {
                    self.sweep_stale().await;
                }
            }
        }

        // Published events are only durable once submitted.
        self.resubmit_held().await;
        if let Some(mut events) = self.events.take() {
            while let Ok(event) = events.try_recv() {
                self.submit(event).await;
            }
        }
        for event in self.held.drain(..) {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Published event not enqueued before shutdown"
            );
        }

        info!("Waiting for in-flight deliveries to complete...");
        let _ = semaphore.acquire_many(permits).await;
        info!("Worker stopped");
    }

    /// Submit a published event. Storage failures hold the event for the
    /// next poll tick; only invalid events are dropped.
    async fn submit(&mut self, event: Event) {
        if !self.held.is_empty() {
            self.held.push_back(event);
            return;
        }
        match self.dispatcher.submit_event(&event).await {
            Ok(_) => {}
            Err(e) if e.is_validation() => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Dropping invalid published event"
                );
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    held = self.held.len() + 1,
                    "Failed to enqueue published event, retrying next tick"
                );
                self.held.push_back(event);
            }
        }
    }

    /// Retry held events in publish order, stopping at the first one that
    /// still fails.
    async fn resubmit_held(&mut self) {
        let mut resubmitted = 0usize;
        while let Some(event) = self.held.pop_front() {
            match self.dispatcher.submit_event(&event).await {
                Ok(_) => resubmitted += 1,
                Err(e) if e.is_validation() => {
                    warn!(event_id = %event.id, error = %e, "Dropping invalid published event");
                }
                Err(e) => {
                    debug!(
                        event_id = %event.id,
                        error = %e,
                        held = self.held.len() + 1,
                        "Held events still not enqueued"
                    );
                    self.held.push_front(event);
                    break;
                }
            }
        }
        if resubmitted > 0 {
            info!(count = resubmitted, "Enqueued held published events");
        }
    }

    /// Claim as many due deliveries as there are free slots and process
    /// each in its own task.
    async fn poll_and_process(&self, semaphore: &Arc<Semaphore>) {
        let free = semaphore
            .available_permits()
            .min(self.dispatcher.config().batch_size());
        if free == 0 {
            debug!("All worker slots busy, skipping poll");
            return;
        }

        let deliveries = match self.dispatcher.claim_due(free).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(error = %e, "Failed to claim due deliveries, retrying next tick");
                return;
            }
        };

        if deliveries.is_empty() {
            return;
        }
        debug!(count = deliveries.len(), "Claimed deliveries for processing");

        for delivery in deliveries {
            // Only this loop takes permits, so at least `free` are available.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                return;
            };
            let dispatcher = self.dispatcher.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let delivery_id = delivery.id;
                if let Err(e) = dispatcher.process(delivery).await {
                    error!(
                        delivery_id = %delivery_id,
                        error = %e,
                        "Storage failure while processing delivery; left for stale recovery"
                    );
                }
            });
        }
    }

    async fn sweep_stale(&self) {
        match self.dispatcher.sweep_stale().await {
            Ok(count) if count > 0 => {
                warn!(count, "Recovered stale delivery claims");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to sweep stale delivery claims");
            }
        }
    }
}

async fn next_event(events: &mut Option<EventReceiver>) -> Option<Event> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
