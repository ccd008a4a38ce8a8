// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module writes encoded payloads to an exchange under a routing key.
//! Publishing is fire-and-forget at the transport level: the call returns
//! once the broker accepts the write, not once any consumer processes it.
//! The publisher never retries; a rejected write is surfaced to the caller,
//! who decides whether to retry, drop or escalate.

use crate::{codec::Codec, errors::MessagingError};
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties, Channel};
use tracing::error;
use uuid::Uuid;

/// Sends typed payloads to exchanges over its own channel.
///
/// Owns the channel exclusively; share a publisher between tasks by wrapping
/// it in an `Arc`, never by cloning the channel into concurrent writers.
pub struct Publisher {
    channel: Channel,
}

impl Publisher {
    pub fn new(channel: Channel) -> Publisher {
        Publisher { channel }
    }

    /// Encodes `value` with `codec` and writes it to `exchange` under
    /// `routing_key`.
    ///
    /// The message is stamped with the codec's content type so consumers can
    /// refuse traffic in the wrong encoding, and with a fresh message id.
    pub async fn publish<T, C>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &C,
    ) -> Result<(), MessagingError>
    where
        C: Codec<T>,
    {
        let body = codec.encode(value)?;

        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &body,
                BasicProperties::default()
                    .with_content_type(ShortString::from(codec.content_type()))
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string())),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange, routing_key, "error publishing message"
                );
                Err(MessagingError::Publish(err.to_string()))
            }
        }
    }
}
