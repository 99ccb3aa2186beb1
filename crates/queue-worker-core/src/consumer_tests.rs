//! Tests for the consumer loop.

use super::*;
use crate::backoff::BackoffConfig;
use async_trait::async_trait;
use mockall::{mock, Sequence};
use queue_worker_transport::{ReceiptHandle, TransportError};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const QUEUE_URL: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/orders";

// ============================================================================
// Test Doubles
// ============================================================================

mock! {
    pub Transport {}

    #[async_trait]
    impl QueueTransport for Transport {
        async fn receive(
            &self,
            queue: &QueueAddress,
            max_messages: u32,
            wait_seconds: u32,
        ) -> Result<Batch, queue_worker_transport::TransportError>;

        async fn delete(
            &self,
            queue: &QueueAddress,
            receipt: &ReceiptHandle,
        ) -> Result<(), queue_worker_transport::TransportError>;
    }
}

/// Handler that records every call and fails on request
#[derive(Default)]
struct RecordingHandler {
    events: Arc<Mutex<Vec<String>>>,
    failing: HashSet<String>,
    fatal: HashSet<String>,
    delay: Duration,
}

impl RecordingHandler {
    fn with_events(events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    fn failing_on(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn fatal_on(mut self, id: &str) -> Self {
        self.fatal.insert(id.to_string());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn handled(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix("handle:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let id = message.id.to_string();
        self.events.lock().unwrap().push(format!("handle:{}", id));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fatal.contains(&id) {
            return Err(HandlerError::fatal("downstream gone"));
        }
        if self.failing.contains(&id) {
            return Err(HandlerError::failed("cannot process"));
        }
        Ok(())
    }
}

fn message(id: &str) -> Message {
    Message::new(
        id.parse().unwrap(),
        format!("body-{}", id),
        ReceiptHandle::new(format!("h{}", id)).unwrap(),
    )
}

fn batch(ids: &[&str]) -> Batch {
    ids.iter().map(|id| message(id)).collect()
}

/// Configuration without inter-poll delays
fn test_config() -> WorkerConfig {
    WorkerConfig {
        poll_backoff: BackoffConfig {
            enabled: false,
            ..BackoffConfig::default()
        },
        ..WorkerConfig::new(QUEUE_URL)
    }
}

fn consumer(
    transport: MockTransport,
    handler: Arc<RecordingHandler>,
    config: WorkerConfig,
) -> ConsumerLoop {
    ConsumerLoop::new(Arc::new(transport), handler, config).unwrap()
}

/// Expect one more receive that cancels the run and returns nothing
fn expect_final_receive(transport: &mut MockTransport, seq: &mut Sequence, token: &CancellationToken) {
    let cancel = token.clone();
    transport
        .expect_receive()
        .times(1)
        .in_sequence(seq)
        .returning(move |_, _, _| {
            cancel.cancel();
            Ok(Vec::new())
        });
}

fn connection_failed() -> TransportError {
    TransportError::ConnectionFailed {
        message: "connection reset by peer".to_string(),
    }
}

// ============================================================================
// Receive / Process / Delete Cycle
// ============================================================================

mod cycle_tests {
    use super::*;

    /// Verify a handler failure skips only that message's delete
    #[tokio::test]
    async fn test_failed_message_is_not_deleted() {
        let token = CancellationToken::new();
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .withf(|_, max, wait| *max == 10 && *wait == 20)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(batch(&["1", "2"])));
        transport
            .expect_delete()
            .withf(|_, receipt| receipt.as_str() == "h1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        transport
            .expect_delete()
            .withf(|_, receipt| receipt.as_str() == "h2")
            .times(0);
        expect_final_receive(&mut transport, &mut seq, &token);

        let handler = Arc::new(RecordingHandler::default().failing_on("2"));
        let stats = consumer(transport, handler.clone(), test_config())
            .run(token)
            .await
            .unwrap();

        assert_eq!(handler.handled(), vec!["1", "2"]);
        assert_eq!(
            stats,
            ConsumerStats {
                polls: 2,
                empty_polls: 1,
                received: 2,
                handled: 1,
                handler_failures: 1,
                deleted: 1,
                delete_failures: 0,
            }
        );
    }

    /// Verify an empty batch leads straight to another receive
    #[tokio::test]
    async fn test_empty_batch_polls_again() {
        let token = CancellationToken::new();
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(Vec::new()));
        expect_final_receive(&mut transport, &mut seq, &token);
        transport.expect_delete().times(0);

        let handler = Arc::new(RecordingHandler::default());
        let stats = consumer(transport, handler.clone(), test_config())
            .run(token)
            .await
            .unwrap();

        assert!(handler.handled().is_empty());
        assert_eq!(stats.polls, 2);
        assert_eq!(stats.empty_polls, 2);
        assert_eq!(stats.deleted, 0);
    }

    /// Verify a receive failure stops the loop without further calls
    #[tokio::test]
    async fn test_receive_error_is_fatal() {
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .returning(|_, _, _| Err(connection_failed()));
        transport.expect_delete().times(0);

        let handler = Arc::new(RecordingHandler::default());
        let result = consumer(transport, handler.clone(), test_config())
            .run(CancellationToken::new())
            .await;

        match result {
            Err(ConsumerError::Receive { queue_url, source }) => {
                assert_eq!(queue_url, QUEUE_URL);
                assert!(matches!(source, TransportError::ConnectionFailed { .. }));
            }
            other => panic!("Expected receive error, got {:?}", other),
        }
        assert!(handler.handled().is_empty());
    }

    /// Verify every message of a batch is handled before the next receive
    #[tokio::test]
    async fn test_batch_is_handled_in_order_before_next_receive() {
        let token = CancellationToken::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();

        let receive_events = events.clone();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _, _| {
                receive_events.lock().unwrap().push("receive".to_string());
                Ok(batch(&["1", "2", "3"]))
            });

        let delete_events = events.clone();
        transport.expect_delete().times(3).returning(move |_, receipt| {
            delete_events
                .lock()
                .unwrap()
                .push(format!("delete:{}", receipt));
            Ok(())
        });

        let final_events = events.clone();
        let cancel = token.clone();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _, _| {
                final_events.lock().unwrap().push("receive".to_string());
                cancel.cancel();
                Ok(Vec::new())
            });

        let handler = Arc::new(RecordingHandler::with_events(events.clone()));
        consumer(transport, handler, test_config())
            .run(token)
            .await
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "receive", "handle:1", "delete:h1", "handle:2", "delete:h2", "handle:3",
                "delete:h3", "receive",
            ]
        );
    }

    /// Verify a failed delete is logged and the loop carries on
    #[tokio::test]
    async fn test_delete_failure_is_not_fatal() {
        let token = CancellationToken::new();
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(batch(&["1", "2"])));
        transport
            .expect_delete()
            .withf(|_, receipt| receipt.as_str() == "h1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, receipt| {
                Err(TransportError::InvalidReceipt {
                    receipt: receipt.to_string(),
                })
            });
        transport
            .expect_delete()
            .withf(|_, receipt| receipt.as_str() == "h2")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        expect_final_receive(&mut transport, &mut seq, &token);

        let handler = Arc::new(RecordingHandler::default());
        let stats = consumer(transport, handler.clone(), test_config())
            .run(token)
            .await
            .unwrap();

        assert_eq!(handler.handled(), vec!["1", "2"]);
        assert_eq!(stats.handled, 2);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.delete_failures, 1);
    }

    /// Verify a delete lost to a connection error is skipped like an expired one
    #[tokio::test]
    async fn test_delete_connection_failure_is_not_fatal() {
        let token = CancellationToken::new();
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(batch(&["1"])));
        transport
            .expect_delete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(connection_failed()));
        expect_final_receive(&mut transport, &mut seq, &token);

        let handler = Arc::new(RecordingHandler::default());
        let stats = consumer(transport, handler.clone(), test_config())
            .run(token)
            .await
            .unwrap();

        assert_eq!(stats.handled, 1);
        assert_eq!(stats.deleted, 0);
        assert_eq!(stats.delete_failures, 1);
    }
}

// ============================================================================
// Handler Outcomes
// ============================================================================

mod handler_tests {
    use super::*;

    /// Verify a fatal handler error stops dispatch and ends the run
    #[tokio::test]
    async fn test_fatal_handler_error_stops_loop() {
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .returning(|_, _, _| Ok(batch(&["1", "2", "3"])));
        transport
            .expect_delete()
            .withf(|_, receipt| receipt.as_str() == "h1")
            .times(1)
            .returning(|_, _| Ok(()));

        let handler = Arc::new(RecordingHandler::default().fatal_on("2"));
        let result = consumer(transport, handler.clone(), test_config())
            .run(CancellationToken::new())
            .await;

        match result {
            Err(ConsumerError::Handler { message_id, .. }) => assert_eq!(message_id, "2"),
            other => panic!("Expected handler error, got {:?}", other),
        }
        assert_eq!(handler.handled(), vec!["1", "2"]);
    }

    /// Verify concurrent handlers all finish before the next receive
    #[tokio::test(start_paused = true)]
    async fn test_concurrent_handlers_share_the_wait() {
        let token = CancellationToken::new();
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(batch(&["1", "2", "3"])));
        transport.expect_delete().times(2).returning(|_, _| Ok(()));
        expect_final_receive(&mut transport, &mut seq, &token);

        let handler = Arc::new(
            RecordingHandler::default()
                .failing_on("2")
                .with_delay(Duration::from_secs(1)),
        );
        let config = WorkerConfig {
            max_concurrent_handlers: 3,
            ..test_config()
        };

        let start = Instant::now();
        let stats = consumer(transport, handler.clone(), config)
            .run(token)
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(handler.handled().len(), 3);
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.handler_failures, 1);
    }
}

// ============================================================================
// Stopping
// ============================================================================

mod stop_tests {
    use super::*;

    /// Verify a cancelled token stops the loop before any receive
    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut transport = MockTransport::new();
        transport.expect_receive().times(0);

        let token = CancellationToken::new();
        token.cancel();

        let stats = consumer(transport, Arc::new(RecordingHandler::default()), test_config())
            .run(token)
            .await
            .unwrap();

        assert_eq!(stats, ConsumerStats::default());
    }

    /// Verify the loop stops cleanly after the configured empty polls
    #[tokio::test]
    async fn test_max_empty_polls_stops_cleanly() {
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(3)
            .returning(|_, _, _| Ok(Vec::new()));

        let config = WorkerConfig {
            max_empty_polls: Some(3),
            ..test_config()
        };
        let stats = consumer(transport, Arc::new(RecordingHandler::default()), config)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.polls, 3);
        assert_eq!(stats.empty_polls, 3);
    }

    /// Verify a non-empty batch resets the empty-poll count
    #[tokio::test]
    async fn test_messages_reset_empty_poll_count() {
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(Vec::new()));
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(batch(&["1"])));
        transport
            .expect_receive()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(Vec::new()));
        transport.expect_delete().times(1).returning(|_, _| Ok(()));

        let config = WorkerConfig {
            max_empty_polls: Some(2),
            ..test_config()
        };
        let stats = consumer(transport, Arc::new(RecordingHandler::default()), config)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.polls, 4);
        assert_eq!(stats.empty_polls, 3);
        assert_eq!(stats.deleted, 1);
    }

    /// Verify empty polls back off with growing delays
    #[tokio::test(start_paused = true)]
    async fn test_empty_polls_back_off() {
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(3)
            .returning(|_, _, _| Ok(Vec::new()));

        let config = WorkerConfig {
            max_empty_polls: Some(3),
            ..test_config()
        };
        let backoff =
            PollBackoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0).without_jitter();

        let start = Instant::now();
        consumer(transport, Arc::new(RecordingHandler::default()), config)
            .with_backoff(backoff)
            .run(CancellationToken::new())
            .await
            .unwrap();

        // 1s after the first empty poll, 2s after the second, none after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(7), "elapsed {:?}", elapsed);
    }

    /// Verify cancellation interrupts the inter-poll delay
    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));

        let backoff = PollBackoff::new(Duration::from_secs(60), Duration::from_secs(60), 2.0)
            .without_jitter();
        let worker = consumer(transport, Arc::new(RecordingHandler::default()), test_config())
            .with_backoff(backoff);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let stats = worker.run(token).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(60));
        assert_eq!(stats.polls, 1);
    }
}

// ============================================================================
// Receive Retries
// ============================================================================

mod retry_tests {
    use super::*;

    /// Verify transient receive errors are retried when enabled
    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(connection_failed()));
        transport
            .expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(Vec::new()));

        let config = WorkerConfig {
            receive_retry_attempts: 2,
            max_empty_polls: Some(1),
            ..test_config()
        };
        let stats = consumer(transport, Arc::new(RecordingHandler::default()), config)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.polls, 1);
    }

    /// Verify permanent errors are fatal even with retries enabled
    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let mut transport = MockTransport::new();
        transport.expect_receive().times(1).returning(|_, _, _| {
            Err(TransportError::AuthenticationFailed {
                message: "InvalidClientTokenId".to_string(),
            })
        });

        let config = WorkerConfig {
            receive_retry_attempts: 3,
            ..test_config()
        };
        let result = consumer(transport, Arc::new(RecordingHandler::default()), config)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ConsumerError::Receive { .. })));
    }

    /// Verify the loop gives up once retries are exhausted
    #[tokio::test]
    async fn test_exhausted_retries_are_fatal() {
        let mut transport = MockTransport::new();
        transport.expect_receive().times(2).returning(|_, _, _| {
            Err(TransportError::Timeout {
                duration: Duration::from_secs(30),
            })
        });

        let config = WorkerConfig {
            receive_retry_attempts: 1,
            ..test_config()
        };
        let result = consumer(transport, Arc::new(RecordingHandler::default()), config)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(ConsumerError::Receive {
                source: TransportError::Timeout { .. },
                ..
            })
        ));
    }
}
