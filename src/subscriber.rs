// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Subscriber
//!
//! This module sets up a subscription: topology declaration, an optional
//! prefetch bound, a manually-acknowledged delivery stream, and one
//! long-lived task that decodes each delivery and settles it according to
//! the handler's [`AckDecision`].
//!
//! Exactly one settlement is issued per decoded delivery. A delivery that
//! fails to decode is deliberately left unsettled: it stays unacknowledged
//! until the subscription's channel is torn down, at which point the broker
//! requeues it. That skip is counted and logged rather than silent.
//!
//! When the delivery loop exits, whether by cancellation or because the
//! stream closed, the broker-side consumer is cancelled and the channel
//! closed, so the broker stops routing deliveries to it and requeues
//! anything left unacknowledged. The connection and every other
//! subscription stay up.

use crate::{
    codec::Codec,
    connection::ConnectionManager,
    errors::MessagingError,
    handler::{AckDecision, ConsumerHandler},
    topology::{declare_and_bind, QueueBinding},
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions,
    },
    types::FieldTable,
    Channel,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Reply code sent when closing a subscription's channel.
const CLOSE_REPLY_CODE: u16 = 200;

/// Seam between the delivery loop and one received message.
///
/// Implemented for `lapin::message::Delivery`; tests substitute a recording
/// fake to assert the exactly-once settlement contract without a broker.
#[async_trait]
pub(crate) trait InboundDelivery: Send + Sync {
    /// Content-type tag carried by the message envelope, if any.
    fn content_type(&self) -> Option<&str>;

    /// Encoded payload bytes.
    fn body(&self) -> &[u8];

    /// Issues the broker acknowledgment primitive matching `decision`.
    async fn settle(&self, decision: AckDecision) -> Result<(), MessagingError>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn content_type(&self) -> Option<&str> {
        self.properties.content_type().as_ref().map(|ct| ct.as_str())
    }

    fn body(&self) -> &[u8] {
        &self.data
    }

    async fn settle(&self, decision: AckDecision) -> Result<(), MessagingError> {
        let result = match decision {
            AckDecision::Ack => self.ack(BasicAckOptions { multiple: false }).await,
            AckDecision::NackRequeue => {
                self.nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
            }
            AckDecision::NackDiscard => {
                self.nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
            }
        };

        result.map_err(|err| MessagingError::Ack(err.to_string()))
    }
}

/// Handle to a running subscription.
///
/// Cancelling tears down this subscription's delivery loop, deregisters its
/// consumer from the broker and closes its channel, without touching the
/// connection or any other subscription. Dropping the handle leaves the
/// loop running until the connection closes.
pub struct Subscription {
    queue: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    decode_failures: Arc<AtomicU64>,
}

impl Subscription {
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Signals the delivery loop to stop after the in-flight delivery.
    ///
    /// The loop cancels the broker-side consumer and closes its channel on
    /// the way out, so unsettled deliveries are requeued immediately rather
    /// than piling up until the connection closes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the delivery loop to finish.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            error!(error = err.to_string(), "subscription task panicked");
        }
    }

    /// Number of deliveries skipped because their body failed to decode or
    /// carried the wrong content type.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }
}

/// Declares the topology for `binding` and starts an independent delivery
/// loop feeding `handler`.
///
/// When the codec reports a prefetch bound (the typed-binary path), it is
/// applied to the channel before consuming, so no more than that many
/// deliveries are ever unacknowledged at once. The stream is opened in
/// manual-acknowledgment mode.
///
/// Errors are returned for setup failures only; per-message failures never
/// propagate to the caller.
pub async fn subscribe<T, C, H>(
    conn: &ConnectionManager,
    binding: QueueBinding,
    codec: C,
    handler: H,
) -> Result<Subscription, MessagingError>
where
    T: Send + Sync + 'static,
    C: Codec<T> + 'static,
    H: ConsumerHandler<T> + 'static,
{
    let (channel, queue) = declare_and_bind(conn, &binding).await?;

    if let Some(count) = codec.prefetch() {
        if let Err(err) = channel.basic_qos(count, BasicQosOptions::default()).await {
            error!(error = err.to_string(), "error to configure qos");
            return Err(MessagingError::Subscribe(err.to_string()));
        }
    }

    let consumer = match channel
        .basic_consume(
            queue.name().as_str(),
            "",
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Ok(consumer) => Ok(consumer),
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            Err(MessagingError::Subscribe(err.to_string()))
        }
    }?;

    let queue_name = binding.queue_name().to_owned();
    let cancel = CancellationToken::new();
    let decode_failures = Arc::new(AtomicU64::new(0));
    let consumer_tag = consumer.tag().to_string();

    let task = tokio::spawn(run_delivery_loop(
        consumer,
        cancel.clone(),
        codec,
        handler,
        decode_failures.clone(),
        queue_name.clone(),
        move || async move { release_consumer(&channel, &consumer_tag).await },
    ));

    Ok(Subscription {
        queue: queue_name,
        cancel,
        task,
        decode_failures,
    })
}

/// Consumes `deliveries` until cancellation or stream close, then runs
/// `teardown`.
///
/// Every delivery goes through [`process_delivery`]; errors settling a
/// single delivery are logged and the loop keeps going.
pub(crate) async fn run_delivery_loop<T, C, H, D, St, F, Fut>(
    mut deliveries: St,
    cancel: CancellationToken,
    codec: C,
    handler: H,
    decode_failures: Arc<AtomicU64>,
    queue_name: String,
    teardown: F,
) where
    T: Send + Sync + 'static,
    C: Codec<T>,
    H: ConsumerHandler<T>,
    D: InboundDelivery,
    St: Stream<Item = Result<D, lapin::Error>> + Unpin + Send,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(queue = queue_name, "subscription cancelled");
                break;
            }
            next = deliveries.next() => {
                match next {
                    Some(Ok(delivery)) => {
                        if let Err(err) =
                            process_delivery(&codec, &handler, &delivery, &decode_failures).await
                        {
                            error!(error = err.to_string(), "error consume msg");
                        }
                    }
                    Some(Err(err)) => {
                        error!(error = err.to_string(), "errors consume msg");
                    }
                    None => {
                        debug!(queue = queue_name, "delivery stream closed");
                        break;
                    }
                }
            }
        }
    }

    teardown().await;
}

/// Deregisters the consumer from the broker and closes its channel.
///
/// Run after the delivery loop exits, so the broker stops routing to the
/// dead consumer and requeues whatever was left unacknowledged. Both calls
/// may legitimately fail when the channel or connection is already gone.
async fn release_consumer(channel: &Channel, consumer_tag: &str) {
    if let Err(err) = channel
        .basic_cancel(consumer_tag, BasicCancelOptions::default())
        .await
    {
        debug!(error = err.to_string(), "consumer already cancelled");
    }

    if let Err(err) = channel.close(CLOSE_REPLY_CODE, "subscription closed").await {
        debug!(error = err.to_string(), "channel already closed");
    }
}

/// Decodes one delivery and settles it according to the handler's decision.
///
/// Skips (without settling) deliveries whose content type does not match the
/// codec or whose body fails to decode; both paths count against the
/// subscription's decode-failure counter. Decoded deliveries are settled
/// exactly once.
pub(crate) async fn process_delivery<T, C, H, D>(
    codec: &C,
    handler: &H,
    delivery: &D,
    decode_failures: &AtomicU64,
) -> Result<(), MessagingError>
where
    T: Send + Sync + 'static,
    C: Codec<T>,
    H: ConsumerHandler<T>,
    D: InboundDelivery,
{
    if let Some(tag) = delivery.content_type() {
        if tag != codec.content_type() {
            warn!(
                content_type = tag,
                expected = codec.content_type(),
                "skipping delivery with mismatched content type"
            );
            decode_failures.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    }

    let value = match codec.decode(delivery.body()) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = err.to_string(), "skipping undecodable delivery");
            decode_failures.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    };

    let decision = handler.handle(value).await;

    delivery.settle(decision).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BinaryCodec, JsonCodec, BINARY_CONTENT_TYPE, JSON_CONTENT_TYPE};
    use crate::handler::MockConsumerHandler;
    use futures_util::stream;
    use serde::{Deserialize, Serialize};
    use std::sync::{atomic::AtomicBool, Mutex};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct PlayingState {
        is_paused: bool,
    }

    struct FakeDelivery {
        content_type: Option<String>,
        body: Vec<u8>,
        decisions: Arc<Mutex<Vec<AckDecision>>>,
        fail_settlement: bool,
    }

    impl FakeDelivery {
        fn new(content_type: Option<&str>, body: Vec<u8>) -> FakeDelivery {
            FakeDelivery {
                content_type: content_type.map(str::to_owned),
                body,
                decisions: Arc::new(Mutex::new(vec![])),
                fail_settlement: false,
            }
        }

        fn failing(content_type: Option<&str>, body: Vec<u8>) -> FakeDelivery {
            FakeDelivery {
                fail_settlement: true,
                ..FakeDelivery::new(content_type, body)
            }
        }

        fn decisions(&self) -> Vec<AckDecision> {
            self.decisions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InboundDelivery for FakeDelivery {
        fn content_type(&self) -> Option<&str> {
            self.content_type.as_deref()
        }

        fn body(&self) -> &[u8] {
            &self.body
        }

        async fn settle(&self, decision: AckDecision) -> Result<(), MessagingError> {
            if self.fail_settlement {
                return Err(MessagingError::Ack("channel closed".to_owned()));
            }
            self.decisions.lock().unwrap().push(decision);
            Ok(())
        }
    }

    fn encoded_state() -> Vec<u8> {
        JsonCodec
            .encode(&PlayingState { is_paused: true })
            .unwrap()
    }

    #[tokio::test]
    async fn ack_decision_settles_exactly_once() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| AckDecision::Ack);

        let delivery = FakeDelivery::new(Some(JSON_CONTENT_TYPE), encoded_state());
        let failures = AtomicU64::new(0);

        process_delivery(&JsonCodec, &handler, &delivery, &failures)
            .await
            .unwrap();

        assert_eq!(delivery.decisions(), vec![AckDecision::Ack]);
        assert_eq!(failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn requeue_and_discard_map_through() {
        for decision in [AckDecision::NackRequeue, AckDecision::NackDiscard] {
            let mut handler = MockConsumerHandler::<PlayingState>::new();
            handler.expect_handle().times(1).returning(move |_| decision);

            let delivery = FakeDelivery::new(Some(JSON_CONTENT_TYPE), encoded_state());
            let failures = AtomicU64::new(0);

            process_delivery(&JsonCodec, &handler, &delivery, &failures)
                .await
                .unwrap();

            assert_eq!(delivery.decisions(), vec![decision]);
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_skipped_without_settlement() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler.expect_handle().times(0);

        let delivery = FakeDelivery::new(Some(JSON_CONTENT_TYPE), b"not json at all".to_vec());
        let failures = AtomicU64::new(0);

        process_delivery(&JsonCodec, &handler, &delivery, &failures)
            .await
            .unwrap();

        assert!(delivery.decisions().is_empty());
        assert_eq!(failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn mismatched_content_type_is_refused_before_decoding() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler.expect_handle().times(0);

        // Valid JSON body, but the subscription runs the binary codec.
        let delivery = FakeDelivery::new(Some(JSON_CONTENT_TYPE), encoded_state());
        let failures = AtomicU64::new(0);

        process_delivery(&BinaryCodec::new(), &handler, &delivery, &failures)
            .await
            .unwrap();

        assert!(delivery.decisions().is_empty());
        assert_eq!(failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn missing_content_type_still_decodes() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| AckDecision::Ack);

        let delivery = FakeDelivery::new(None, encoded_state());
        let failures = AtomicU64::new(0);

        process_delivery(&JsonCodec, &handler, &delivery, &failures)
            .await
            .unwrap();

        assert_eq!(delivery.decisions().len(), 1);
    }

    #[tokio::test]
    async fn settlement_failure_surfaces_as_error() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| AckDecision::Ack);

        let delivery = FakeDelivery::failing(Some(JSON_CONTENT_TYPE), encoded_state());
        let failures = AtomicU64::new(0);

        let result = process_delivery(&JsonCodec, &handler, &delivery, &failures).await;

        assert!(matches!(result, Err(MessagingError::Ack(_))));
    }

    #[tokio::test]
    async fn matching_binary_tag_passes_content_check() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| AckDecision::Ack);

        let codec = BinaryCodec::new();
        let body =
            Codec::<PlayingState>::encode(&codec, &PlayingState { is_paused: false }).unwrap();

        let delivery = FakeDelivery::new(Some(BINARY_CONTENT_TYPE), body);
        let failures = AtomicU64::new(0);

        process_delivery(&codec, &handler, &delivery, &failures)
            .await
            .unwrap();

        assert_eq!(delivery.decisions(), vec![AckDecision::Ack]);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_and_releases_the_consumer() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler.expect_handle().times(0);

        let cancel = CancellationToken::new();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        // A stream that never yields: only cancellation can end the loop.
        let task = tokio::spawn(run_delivery_loop(
            stream::pending::<Result<FakeDelivery, lapin::Error>>(),
            cancel.clone(),
            JsonCodec,
            handler,
            Arc::new(AtomicU64::new(0)),
            "pause.alice".to_owned(),
            move || async move { flag.store(true, Ordering::Relaxed) },
        ));

        cancel.cancel();
        task.await.unwrap();

        assert!(released.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn stream_close_releases_the_consumer_after_draining() {
        let mut handler = MockConsumerHandler::<PlayingState>::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| AckDecision::Ack);

        let delivery = FakeDelivery::new(Some(JSON_CONTENT_TYPE), encoded_state());
        let decisions = delivery.decisions.clone();

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        run_delivery_loop(
            stream::iter(vec![Ok::<_, lapin::Error>(delivery)]),
            CancellationToken::new(),
            JsonCodec,
            handler,
            Arc::new(AtomicU64::new(0)),
            "pause.alice".to_owned(),
            move || async move { flag.store(true, Ordering::Relaxed) },
        )
        .await;

        assert_eq!(*decisions.lock().unwrap(), vec![AckDecision::Ack]);
        assert!(released.load(Ordering::Relaxed));
    }
}
