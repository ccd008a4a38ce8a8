// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Typed publish/subscribe over RabbitMQ for the war game's server and
//! client processes. A process opens one [`connection::ConnectionManager`],
//! registers subscriptions (each with its own delivery loop) and publishes
//! through [`publisher::Publisher`], choosing a wire codec per call site.

pub mod codec;
pub mod config;
pub mod connection;
pub mod errors;
pub mod handler;
pub mod publisher;
pub mod routing;
pub mod subscriber;
pub mod topology;
