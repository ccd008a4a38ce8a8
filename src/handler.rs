// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Handler Contract
//!
//! This module defines the boundary between the messaging core and the
//! application logic consuming it. A handler receives a decoded payload and
//! answers with exactly one [`AckDecision`]; that three-way value is the only
//! vocabulary by which the application communicates delivery disposition back
//! to the core.

use async_trait::async_trait;

/// Disposition of a delivered message.
///
/// Every handler invocation returns exactly one of these; the subscriber
/// translates it into the matching broker acknowledgment primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Permanently remove the message from the queue.
    Ack,
    /// Return the message to the queue for redelivery; used when it does not
    /// yet apply to this consumer but is expected to eventually.
    NackRequeue,
    /// Remove the message and route it to the dead-letter exchange; used
    /// when it is well-formed but permanently invalid for this consumer.
    NackDiscard,
}

/// Application-side processor for decoded deliveries.
///
/// Handlers run inline on their subscription's delivery task, so a slow
/// handler delays subsequent deliveries on that subscription only. A handler
/// may publish follow-up messages as a side effect but must not block
/// indefinitely.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler<T: Send + Sync + 'static>: Send + Sync {
    async fn handle(&self, message: T) -> AckDecision;
}
