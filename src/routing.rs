// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Game Routing Conventions
//!
//! Helpers for the dot-segmented routing keys and queue names the game
//! processes agree on. The well-known exchange names live in
//! [`GameExchanges`], built by the caller and handed to topology setup at
//! call time rather than baked into the core.
//!
//! Traffic layout: pause/resume control flows over the direct exchange with
//! a per-user private queue; moves, war recognitions and bulk logs flow over
//! the topic exchange with one outbound key per player, consumed via `*`
//! wildcards.

use crate::topology::{ExchangeKind, ExchangeDefinition};

/// Binding key for pause/resume control traffic on the direct exchange.
pub const PAUSE_KEY: &str = "pause";
/// Key prefix for per-player movement orders.
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
/// Key prefix for per-declarer war recognitions.
pub const WAR_RECOGNITIONS_PREFIX: &str = "war_recognitions";
/// Key prefix for per-player bulk log records.
pub const GAME_LOGS_PREFIX: &str = "game_logs";

/// The three well-known exchanges the game runs on.
///
/// Every process declares them idempotently at startup; see
/// [`crate::topology::declare_exchanges`].
#[derive(Debug, Clone)]
pub struct GameExchanges {
    pub topic: String,
    pub direct: String,
    pub dead_letter: String,
}

impl GameExchanges {
    pub fn new(topic: &str, direct: &str, dead_letter: &str) -> GameExchanges {
        GameExchanges {
            topic: topic.to_owned(),
            direct: direct.to_owned(),
            dead_letter: dead_letter.to_owned(),
        }
    }

    /// Definitions for declaring all three exchanges: topic and direct for the
    /// routed traffic, a fanout fallback for dead-lettered messages.
    pub fn definitions(&self) -> Vec<ExchangeDefinition> {
        vec![
            ExchangeDefinition::new(&self.topic, ExchangeKind::Topic),
            ExchangeDefinition::new(&self.direct, ExchangeKind::Direct),
            ExchangeDefinition::new(&self.dead_letter, ExchangeKind::Fanout),
        ]
    }
}

/// Name of a player's private pause queue (`pause.<username>`).
pub fn pause_queue(username: &str) -> String {
    format!("{}.{}", PAUSE_KEY, username)
}

/// Routing key for one player's movement orders (`army_moves.<username>`).
pub fn army_moves_key(username: &str) -> String {
    format!("{}.{}", ARMY_MOVES_PREFIX, username)
}

/// Routing key for a war declared by one player
/// (`war_recognitions.<username>`).
pub fn war_recognition_key(username: &str) -> String {
    format!("{}.{}", WAR_RECOGNITIONS_PREFIX, username)
}

/// Routing key for one player's log records (`game_logs.<username>`).
pub fn game_log_key(username: &str) -> String {
    format!("{}.{}", GAME_LOGS_PREFIX, username)
}

/// Wildcard pattern matching every player's keys under `prefix`.
pub fn wildcard(prefix: &str) -> String {
    format!("{}.*", prefix)
}
