//! # In-Memory Task Queue
//!
//! Broker-free `TaskQueue` implementation for tests and local development.
//!
//! ## Features
//!
//! - **Topology**: exchanges, queues and bindings are declared idempotently;
//!   redeclaring a queue with different dead-letter arguments fails the way a
//!   broker reports `PRECONDITION_FAILED`
//! - **Routing**: direct-exchange routing by key, unroutable messages dropped
//! - **Prefetch**: at most one unacknowledged delivery per consumer
//! - **Dead-lettering**: reject without requeue moves the message to the
//!   queue's dead-letter target through the default exchange
//! - **Fault injection**: publish and ack/nack failures on demand

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::publishing::PREFETCH_COUNT;
use crate::messaging::consumer::{AckableDelivery, ConsumerHandle};
use crate::messaging::handler::TaskHandler;
use crate::messaging::message::ProcessingMessage;
use crate::messaging::queue::TaskQueue;
use crate::messaging::topology::QueueTopology;
use crate::messaging::{MessagingError, MessagingResult};

/// A message stored in a queue
#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    payload: Vec<u8>,
    death: Option<DeathRecord>,
}

/// Where and why a message was dead-lettered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub queue: String,
    pub reason: String,
}

/// A message sitting in a dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetteredMessage {
    pub message_id: u64,
    pub payload: Vec<u8>,
    pub death: Option<DeathRecord>,
}

impl DeadLetteredMessage {
    /// Decode the payload as an envelope, if it is one
    pub fn envelope(&self) -> Option<ProcessingMessage> {
        ProcessingMessage::from_bytes(&self.payload).ok()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    dead_letter_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Binding {
    exchange: String,
    routing_key: String,
    queue: String,
}

#[derive(Debug)]
struct InFlight {
    consumer_id: u64,
    queue: String,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: HashSet<Binding>,
    in_flight: HashMap<u64, InFlight>,
    consumers: HashMap<u64, u16>,
    next_message_id: u64,
    next_delivery_tag: u64,
    next_consumer_id: u64,
    closed: bool,
    publish_failures_pending: u32,
    settle_failures_pending: u32,
    total_published: u64,
    total_acked: u64,
    total_rejected: u64,
}

impl BrokerState {
    fn declare(&mut self, topology: &QueueTopology) -> MessagingResult<()> {
        self.exchanges.insert(topology.exchange.clone());

        self.queues
            .entry(topology.dead_letter_queue.clone())
            .or_default();

        let work_queue = self.queues.entry(topology.work_queue.clone()).or_default();
        match &work_queue.dead_letter_target {
            Some(existing) if existing != &topology.dead_letter_queue => {
                return Err(MessagingError::setup_failed(
                    "declare_work_queue",
                    format!(
                        "PRECONDITION_FAILED - inequivalent arg 'x-dead-letter-routing-key' for queue '{}'",
                        topology.work_queue
                    ),
                ));
            }
            _ => work_queue.dead_letter_target = Some(topology.dead_letter_queue.clone()),
        }

        self.bindings.insert(Binding {
            exchange: topology.exchange.clone(),
            routing_key: topology.routing_key.clone(),
            queue: topology.work_queue.clone(),
        });
        Ok(())
    }

    fn enqueue(&mut self, queue: &str, payload: Vec<u8>) -> bool {
        self.next_message_id += 1;
        let id = self.next_message_id;
        match self.queues.get_mut(queue) {
            Some(state) => {
                state.messages.push_back(StoredMessage {
                    id,
                    payload,
                    death: None,
                });
                true
            }
            None => false,
        }
    }

    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
            .map(|b| b.queue.clone())
            .collect();

        targets
            .iter()
            .filter(|queue| self.enqueue(queue, payload.to_vec()))
            .count()
    }

    fn try_dispatch(&mut self, consumer_id: u64, queue: &str) -> Option<(u64, Vec<u8>)> {
        let in_flight = self.consumers.get(&consumer_id).copied()?;
        if in_flight >= PREFETCH_COUNT {
            return None;
        }

        let message = self.queues.get_mut(queue)?.messages.pop_front()?;
        self.next_delivery_tag += 1;
        let tag = self.next_delivery_tag;
        let payload = message.payload.clone();

        self.in_flight.insert(
            tag,
            InFlight {
                consumer_id,
                queue: queue.to_string(),
                message,
            },
        );
        self.consumers.insert(consumer_id, in_flight + 1);
        Some((tag, payload))
    }

    fn take_in_flight(&mut self, tag: u64, operation: &str) -> MessagingResult<InFlight> {
        if self.settle_failures_pending > 0 {
            self.settle_failures_pending -= 1;
            return Err(MessagingError::ack_failed(
                operation,
                tag,
                "injected transport failure",
            ));
        }

        let entry = self.in_flight.remove(&tag).ok_or_else(|| {
            MessagingError::ack_failed(
                operation,
                tag,
                "PRECONDITION_FAILED - unknown delivery tag",
            )
        })?;

        if let Some(count) = self.consumers.get_mut(&entry.consumer_id) {
            *count = count.saturating_sub(1);
        }
        Ok(entry)
    }
}

#[derive(Debug)]
struct Shared {
    topology: QueueTopology,
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// Delivery handed to the receive loop
#[derive(Debug)]
pub struct InMemoryDelivery {
    shared: Arc<Shared>,
    tag: u64,
    payload: Vec<u8>,
}

#[async_trait]
impl AckableDelivery for InMemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    async fn ack(&self) -> MessagingResult<()> {
        {
            let mut state = self.shared.state.lock();
            state.take_in_flight(self.tag, "ack")?;
            state.total_acked += 1;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn reject(&self) -> MessagingResult<()> {
        {
            let mut state = self.shared.state.lock();
            let entry = state.take_in_flight(self.tag, "nack")?;
            state.total_rejected += 1;

            let target = state
                .queues
                .get(&entry.queue)
                .and_then(|q| q.dead_letter_target.clone());

            let dlq = match target {
                Some(target) => state.queues.get_mut(&target),
                None => None,
            };

            match dlq {
                Some(dlq) => {
                    let mut message = entry.message;
                    message.death = Some(DeathRecord {
                        queue: entry.queue,
                        reason: "rejected".to_string(),
                    });
                    dlq.messages.push_back(message);
                }
                None => debug!(
                    delivery_tag = self.tag,
                    "Rejected message has no dead-letter target, dropping"
                ),
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

/// Consumer registration; returns unsettled deliveries to the queue on drop
struct ConsumerGuard {
    shared: Arc<Shared>,
    consumer_id: u64,
    queue: String,
}

impl ConsumerGuard {
    async fn next_delivery(&self) -> Option<InMemoryDelivery> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return None;
                }
                if let Some((tag, payload)) = state.try_dispatch(self.consumer_id, &self.queue) {
                    return Some(InMemoryDelivery {
                        shared: self.shared.clone(),
                        tag,
                        payload,
                    });
                }
            }

            notified.await;
        }
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.consumers.remove(&self.consumer_id);

        let orphaned: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.consumer_id == self.consumer_id)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in orphaned {
            if let Some(entry) = state.in_flight.remove(&tag) {
                if let Some(queue) = state.queues.get_mut(&entry.queue) {
                    queue.messages.push_front(entry.message);
                }
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }
}

/// In-memory task queue
///
/// ```rust
/// use image_pipeline::messaging::providers::InMemoryTaskQueue;
/// use image_pipeline::messaging::TaskQueue;
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryTaskQueue::new()?;
/// queue
///     .publish_task(Uuid::new_v4(), Uuid::new_v4(), &CancellationToken::new())
///     .await?;
/// assert_eq!(queue.work_queue_len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryTaskQueue {
    shared: Arc<Shared>,
}

impl InMemoryTaskQueue {
    /// Create a queue with the default topology declared
    pub fn new() -> MessagingResult<Self> {
        Self::with_topology(QueueTopology::default())
    }

    /// Create a queue with a custom topology declared
    pub fn with_topology(topology: QueueTopology) -> MessagingResult<Self> {
        let queue = Self {
            shared: Arc::new(Shared {
                topology,
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        };
        queue.setup()?;
        Ok(queue)
    }

    /// Declare the topology (idempotent)
    pub fn setup(&self) -> MessagingResult<()> {
        self.shared.state.lock().declare(&self.shared.topology)?;
        info!(
            exchange = %self.shared.topology.exchange,
            queue = %self.shared.topology.work_queue,
            dlq = %self.shared.topology.dead_letter_queue,
            "In-memory queue topology declared"
        );
        Ok(())
    }

    /// Declare an arbitrary topology against the same broker state
    pub fn declare(&self, topology: &QueueTopology) -> MessagingResult<()> {
        self.shared.state.lock().declare(topology)
    }

    /// Topology this queue publishes to and consumes from
    pub fn topology(&self) -> &QueueTopology {
        &self.shared.topology
    }

    /// Push raw bytes onto the work queue, bypassing envelope validation
    pub fn inject_raw(&self, payload: impl Into<Vec<u8>>) {
        let queue = self.shared.topology.work_queue.clone();
        self.shared.state.lock().enqueue(&queue, payload.into());
        self.shared.notify.notify_waiters();
    }

    /// Make the next `count` publishes fail at the transport level
    pub fn fail_next_publishes(&self, count: u32) {
        self.shared.state.lock().publish_failures_pending = count;
    }

    /// Make the next `count` acks/nacks fail at the transport level
    pub fn fail_next_settlements(&self, count: u32) {
        self.shared.state.lock().settle_failures_pending = count;
    }

    /// Messages waiting in the work queue
    pub fn work_queue_len(&self) -> usize {
        self.queue_len(&self.shared.topology.work_queue)
    }

    /// Messages waiting in the dead-letter queue
    pub fn dead_letter_len(&self) -> usize {
        self.queue_len(&self.shared.topology.dead_letter_queue)
    }

    fn queue_len(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Snapshot of the dead-letter queue
    pub fn dead_letters(&self) -> Vec<DeadLetteredMessage> {
        let state = self.shared.state.lock();
        state
            .queues
            .get(&self.shared.topology.dead_letter_queue)
            .map(|q| {
                q.messages
                    .iter()
                    .map(|m| DeadLetteredMessage {
                        message_id: m.id,
                        payload: m.payload.clone(),
                        death: m.death.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliveries handed out but not yet settled
    pub fn unacked_len(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Number of declared exchanges, queues and bindings
    pub fn entity_counts(&self) -> (usize, usize, usize) {
        let state = self.shared.state.lock();
        (
            state.exchanges.len(),
            state.queues.len(),
            state.bindings.len(),
        )
    }

    /// Published, acked and rejected totals
    pub fn totals(&self) -> (u64, u64, u64) {
        let state = self.shared.state.lock();
        (state.total_published, state.total_acked, state.total_rejected)
    }

    fn delivery_stream(
        &self,
    ) -> MessagingResult<impl Stream<Item = MessagingResult<InMemoryDelivery>> + Send + 'static>
    {
        let queue = self.shared.topology.work_queue.clone();
        let consumer_id = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(MessagingError::consume_failed(&queue, "connection closed"));
            }
            if !state.queues.contains_key(&queue) {
                return Err(MessagingError::consume_failed(
                    &queue,
                    "NOT_FOUND - no queue",
                ));
            }
            state.next_consumer_id += 1;
            let id = state.next_consumer_id;
            state.consumers.insert(id, 0);
            id
        };

        let guard = ConsumerGuard {
            shared: self.shared.clone(),
            consumer_id,
            queue,
        };

        Ok(futures::stream::unfold(guard, |guard| async move {
            let delivery = guard.next_delivery().await?;
            Some((Ok(delivery), guard))
        }))
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn publish_task(
        &self,
        task_id: Uuid,
        image_id: Uuid,
        cancel: &CancellationToken,
    ) -> MessagingResult<()> {
        let body = ProcessingMessage::new(task_id, image_id).to_bytes()?;

        if cancel.is_cancelled() {
            return Err(MessagingError::cancelled("publish_task"));
        }

        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(MessagingError::publish_failed(task_id, "channel closed"));
            }
            if state.publish_failures_pending > 0 {
                state.publish_failures_pending -= 1;
                return Err(MessagingError::publish_failed(
                    task_id,
                    "injected transport failure",
                ));
            }

            let topology = &self.shared.topology;
            let routed = state.route(&topology.exchange, &topology.routing_key, &body);
            if routed == 0 {
                debug!(task_id = %task_id, "Message was unroutable and has been dropped");
            }
            state.total_published += 1;
        }
        self.shared.notify.notify_waiters();

        info!(task_id = %task_id, image_id = %image_id, "Published task");
        Ok(())
    }

    async fn consume_tasks(
        &self,
        handler: Arc<dyn TaskHandler>,
        cancel: &CancellationToken,
    ) -> MessagingResult<ConsumerHandle> {
        let stream = self.delivery_stream()?;
        Ok(ConsumerHandle::spawn(
            self.shared.topology.work_queue.clone(),
            stream,
            handler,
            cancel,
        ))
    }

    async fn close(&self) -> MessagingResult<()> {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
