//! Broker Assist — inbound admission and rate-limited reply queue for
//! real-estate agency conversations.

pub mod channels;
pub mod clock;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod queue;
pub mod reply;
pub mod store;
