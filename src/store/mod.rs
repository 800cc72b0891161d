//! Persistence layer — libSQL-backed storage for counterparties, conversations
//! and the reply queue.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ConversationMessage, ConversationRecord, ConversationRegistry, ConversationStatus,
    Counterparty, CounterpartyStore, JobStore, MessageDirection,
};

#[cfg(test)]
pub(crate) mod testing;
