//! # Task Consumer
//!
//! The receive loop that drives deliveries from the work queue through a
//! [`TaskHandler`]. It is provider-agnostic: any stream of [`AckableDelivery`]
//! values can be consumed, which is how the RabbitMQ and in-memory providers
//! share one loop.
//!
//! ## Delivery lifecycle
//!
//! ```text
//! received -> validated -> acked      (handler ok)
//!                       -> nacked     (handler failed, dead-lettered)
//!          -> malformed -> nacked     (never reaches the handler)
//! ```
//!
//! Every rejection is a nack without requeue, so the broker routes the
//! delivery to the dead-letter queue. Ack/nack failures are logged and the
//! loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use super::handler::TaskHandler;
use super::message::ProcessingMessage;

/// A delivery that can be settled with the broker
#[async_trait]
pub trait AckableDelivery: Send + Sync {
    /// Raw message body
    fn payload(&self) -> &[u8];

    /// Broker-assigned delivery tag
    fn delivery_tag(&self) -> u64;

    /// Positively acknowledge the delivery
    async fn ack(&self) -> MessagingResult<()>;

    /// Negatively acknowledge without requeue (routes to the dead-letter queue)
    async fn reject(&self) -> MessagingResult<()>;
}

/// Why a delivery was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Payload could not be decoded
    Malformed,
    /// Payload decoded but carried a nil identifier
    Invalid,
    /// The handler returned an error
    HandlerFailed,
}

/// Terminal state of a single delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked { task_id: Uuid },
    Rejected {
        task_id: Option<Uuid>,
        reason: RejectReason,
    },
}

/// Result of processing one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcome: DeliveryOutcome,
    /// False when the ack/nack itself failed at the transport level
    pub settled: bool,
}

/// Counters accumulated over the lifetime of a receive loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub rejected_malformed: u64,
    pub rejected_handler: u64,
    pub settle_failures: u64,
    pub stream_errors: u64,
}

impl ConsumerStats {
    fn record(&mut self, report: &DeliveryReport) {
        self.received += 1;
        match &report.outcome {
            DeliveryOutcome::Acked { .. } => self.acked += 1,
            DeliveryOutcome::Rejected {
                reason: RejectReason::HandlerFailed,
                ..
            } => self.rejected_handler += 1,
            DeliveryOutcome::Rejected { .. } => self.rejected_malformed += 1,
        }
        if !report.settled {
            self.settle_failures += 1;
        }
    }
}

/// Decode, dispatch and settle a single delivery
pub async fn process_delivery<D>(delivery: &D, handler: &dyn TaskHandler) -> DeliveryReport
where
    D: AckableDelivery + ?Sized,
{
    let delivery_tag = delivery.delivery_tag();

    let message = match ProcessingMessage::from_bytes(delivery.payload()) {
        Ok(message) => message,
        Err(decode_error) => {
            warn!(
                delivery_tag,
                error = %decode_error,
                "Failed to decode message, sending to DLQ"
            );
            let reason = match decode_error {
                MessagingError::InvalidMessage { .. } => RejectReason::Invalid,
                _ => RejectReason::Malformed,
            };
            let settled = settle_reject(delivery, "invalid").await;
            return DeliveryReport {
                outcome: DeliveryOutcome::Rejected {
                    task_id: None,
                    reason,
                },
                settled,
            };
        }
    };

    let task_id = message.task_id;
    debug!(
        delivery_tag,
        task_id = %task_id,
        image_id = %message.image_id,
        handler = handler.handler_name(),
        "Dispatching task to handler"
    );

    if let Err(handler_error) = handler.handle(task_id, message.image_id).await {
        warn!(
            task_id = %task_id,
            error = %handler_error,
            "Task processing failed, sending to DLQ"
        );
        let settled = settle_reject(delivery, "failed").await;
        return DeliveryReport {
            outcome: DeliveryOutcome::Rejected {
                task_id: Some(task_id),
                reason: RejectReason::HandlerFailed,
            },
            settled,
        };
    }

    let settled = match delivery.ack().await {
        Ok(()) => {
            info!(task_id = %task_id, "Task processed successfully");
            true
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Failed to acknowledge message");
            false
        }
    };

    DeliveryReport {
        outcome: DeliveryOutcome::Acked { task_id },
        settled,
    }
}

async fn settle_reject<D>(delivery: &D, kind: &str) -> bool
where
    D: AckableDelivery + ?Sized,
{
    match delivery.reject().await {
        Ok(()) => true,
        Err(e) => {
            error!(
                delivery_tag = delivery.delivery_tag(),
                error = %e,
                "Failed to nack {} message", kind
            );
            false
        }
    }
}

/// Run the receive loop until the stream ends or `cancel` fires
///
/// Cancellation is raced against the next delivery and wins ties, so no new
/// delivery is pulled once cancellation has been observed. A delivery already
/// handed to the handler is settled before the loop checks again.
pub async fn run_receive_loop<S, D>(
    deliveries: S,
    handler: Arc<dyn TaskHandler>,
    cancel: CancellationToken,
) -> ConsumerStats
where
    S: Stream<Item = MessagingResult<D>> + Send,
    D: AckableDelivery,
{
    let mut stats = ConsumerStats::default();
    tokio::pin!(deliveries);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Stopping consumer: cancellation requested");
                break;
            }
            next = deliveries.next() => match next {
                None => {
                    info!("Message channel closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Delivery stream yielded an error");
                    stats.stream_errors += 1;
                }
                Some(Ok(delivery)) => {
                    let report = process_delivery(&delivery, handler.as_ref()).await;
                    stats.record(&report);
                }
            }
        }
    }

    debug!(?stats, "Receive loop finished");
    stats
}

/// Owner handle for a running receive loop
#[derive(Debug)]
pub struct ConsumerHandle {
    queue_name: String,
    cancel: CancellationToken,
    stopped: CancellationToken,
    join: JoinHandle<ConsumerStats>,
}

impl ConsumerHandle {
    /// Spawn the receive loop on its own task
    ///
    /// The loop listens on a child of `cancel`: cancelling the parent stops
    /// it, cancelling this handle does not affect the parent.
    pub fn spawn<S, D>(
        queue_name: impl Into<String>,
        deliveries: S,
        handler: Arc<dyn TaskHandler>,
        cancel: &CancellationToken,
    ) -> Self
    where
        S: Stream<Item = MessagingResult<D>> + Send + 'static,
        D: AckableDelivery + 'static,
    {
        let queue_name = queue_name.into();
        let cancel = cancel.child_token();
        let stopped = CancellationToken::new();

        let loop_cancel = cancel.clone();
        let exit = stopped.clone().drop_guard();
        let join = tokio::spawn(async move {
            let _exit = exit;
            run_receive_loop(deliveries, handler, loop_cancel).await
        });

        info!(queue = %queue_name, "Started consuming from queue");

        Self {
            queue_name,
            cancel,
            stopped,
            join,
        }
    }

    /// Queue this consumer reads from
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Signal the receive loop to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the receive loop has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Resolves once the receive loop has exited for any reason
    ///
    /// Borrows the handle, so it can be raced against other shutdown
    /// triggers and followed by [`ConsumerHandle::shutdown`].
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Whether a stop was requested through this handle or its parent token
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the receive loop to exit on its own
    pub async fn join(self) -> MessagingResult<ConsumerStats> {
        let queue_name = self.queue_name;
        self.join.await.map_err(|e| {
            MessagingError::consume_failed(queue_name, format!("receive loop aborted: {e}"))
        })
    }

    /// Cancel the receive loop and wait up to `timeout` for it to exit
    pub async fn shutdown(self, timeout: Duration) -> MessagingResult<ConsumerStats> {
        self.cancel.cancel();

        let mut join = self.join;
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(MessagingError::consume_failed(
                self.queue_name,
                format!("receive loop aborted: {e}"),
            )),
            Err(_) => {
                join.abort();
                Err(MessagingError::consume_failed(
                    self.queue_name,
                    format!("receive loop did not stop within {timeout:?}"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::handler::handler_fn;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Settlement {
        Acked,
        Rejected,
    }

    struct RecordingDelivery {
        tag: u64,
        payload: Vec<u8>,
        fail_settle: bool,
        settlements: Arc<Mutex<Vec<(u64, Settlement)>>>,
    }

    impl RecordingDelivery {
        fn new(tag: u64, payload: Vec<u8>, log: &Arc<Mutex<Vec<(u64, Settlement)>>>) -> Self {
            Self {
                tag,
                payload,
                fail_settle: false,
                settlements: log.clone(),
            }
        }
    }

    #[async_trait]
    impl AckableDelivery for RecordingDelivery {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn delivery_tag(&self) -> u64 {
            self.tag
        }

        async fn ack(&self) -> MessagingResult<()> {
            if self.fail_settle {
                return Err(MessagingError::ack_failed("ack", self.tag, "channel closed"));
            }
            self.settlements.lock().push((self.tag, Settlement::Acked));
            Ok(())
        }

        async fn reject(&self) -> MessagingResult<()> {
            if self.fail_settle {
                return Err(MessagingError::ack_failed("nack", self.tag, "channel closed"));
            }
            self.settlements.lock().push((self.tag, Settlement::Rejected));
            Ok(())
        }
    }

    fn valid_payload() -> Vec<u8> {
        ProcessingMessage::new(Uuid::new_v4(), Uuid::new_v4())
            .to_bytes()
            .unwrap()
    }

    fn ok_handler(calls: &Arc<AtomicUsize>) -> Arc<dyn TaskHandler> {
        let calls = calls.clone();
        Arc::new(handler_fn("ok", move |_, _| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_successful_handler_acks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let delivery = RecordingDelivery::new(1, valid_payload(), &log);

        let report = process_delivery(&delivery, ok_handler(&calls).as_ref()).await;

        assert!(matches!(report.outcome, DeliveryOutcome::Acked { .. }));
        assert!(report.settled);
        assert_eq!(*log.lock(), vec![(1, Settlement::Acked)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_rejects() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let delivery = RecordingDelivery::new(2, valid_payload(), &log);
        let handler = handler_fn("failing", |task_id, _| async move {
            Err(MessagingError::handler_failed(task_id, "decode error"))
        });

        let report = process_delivery(&delivery, &handler).await;

        assert!(matches!(
            report.outcome,
            DeliveryOutcome::Rejected {
                task_id: Some(_),
                reason: RejectReason::HandlerFailed
            }
        ));
        assert_eq!(*log.lock(), vec![(2, Settlement::Rejected)]);
    }

    #[tokio::test]
    async fn test_malformed_payload_skips_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let delivery = RecordingDelivery::new(3, b"not-json".to_vec(), &log);

        let report = process_delivery(&delivery, ok_handler(&calls).as_ref()).await;

        assert_eq!(
            report.outcome,
            DeliveryOutcome::Rejected {
                task_id: None,
                reason: RejectReason::Malformed
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*log.lock(), vec![(3, Settlement::Rejected)]);
    }

    #[tokio::test]
    async fn test_nil_identifier_is_rejected_as_invalid() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let payload = format!(
            r#"{{"task_id":"{}","image_id":"{}"}}"#,
            Uuid::new_v4(),
            Uuid::nil()
        );
        let delivery = RecordingDelivery::new(4, payload.into_bytes(), &log);

        let report = process_delivery(&delivery, ok_handler(&calls).as_ref()).await;

        assert!(matches!(
            report.outcome,
            DeliveryOutcome::Rejected {
                reason: RejectReason::Invalid,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_settle_failure_does_not_stop_loop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut broken = RecordingDelivery::new(1, valid_payload(), &log);
        broken.fail_settle = true;
        let healthy = RecordingDelivery::new(2, valid_payload(), &log);

        let stream = futures::stream::iter(vec![Ok(broken), Ok(healthy)]);
        let stats = run_receive_loop(stream, ok_handler(&calls), CancellationToken::new()).await;

        assert_eq!(stats.received, 2);
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.settle_failures, 1);
        assert_eq!(*log.lock(), vec![(2, Settlement::Acked)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_errors_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = futures::stream::iter(vec![
            Err(MessagingError::connection("heartbeat missed")),
            Ok(RecordingDelivery::new(9, valid_payload(), &log)),
        ]);

        let stats = run_receive_loop(stream, ok_handler(&calls), CancellationToken::new()).await;

        assert_eq!(stats.stream_errors, 1);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_stream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let stream = futures::stream::pending::<MessagingResult<RecordingDelivery>>();

        let handle = ConsumerHandle::spawn("test_queue", stream, ok_handler(&calls), &cancel);
        assert!(!handle.is_finished());

        let stats = handle.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(stats, ConsumerStats::default());
        assert!(!cancel.is_cancelled(), "parent token must stay live");
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let stream = futures::stream::pending::<MessagingResult<RecordingDelivery>>();

        let handle = ConsumerHandle::spawn("test_queue", stream, ok_handler(&calls), &cancel);
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("loop should exit promptly")
            .unwrap();
        assert_eq!(stats.received, 0);
    }

    #[tokio::test]
    async fn test_stopped_resolves_when_stream_ends_without_cancel() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let stream = futures::stream::iter(vec![Ok(RecordingDelivery::new(
            1,
            valid_payload(),
            &log,
        ))]);

        let handle = ConsumerHandle::spawn("test_queue", stream, ok_handler(&calls), &cancel);
        tokio::time::timeout(Duration::from_secs(1), handle.stopped())
            .await
            .expect("loop should report its exit");

        assert!(!handle.is_cancelled());
        let stats = handle.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn test_stopped_stays_pending_while_loop_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let stream = futures::stream::pending::<MessagingResult<RecordingDelivery>>();

        let handle = ConsumerHandle::spawn("test_queue", stream, ok_handler(&calls), &cancel);
        let waited = tokio::time::timeout(Duration::from_millis(50), handle.stopped()).await;
        assert!(waited.is_err(), "a live loop must not report a stop");

        handle.cancel();
        assert!(handle.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), handle.stopped())
            .await
            .expect("cancelled loop should report its exit");
    }
}
