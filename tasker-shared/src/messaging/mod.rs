//! Broker-facing glue: queue naming and a circuit-breaker-aware client
//! facade built on top of the [`crate::broker::Broker`] transport contract.

mod client;
mod router;

pub use client::MessageClient;
pub use router::{DefaultMessageRouter, MessageRouter};
