//! Inbound message pipeline.
//!
//! Every inbound event flows through:
//! 1. `AdmissionClassifier::classify()` — known sender, allow-list, profile, keywords
//! 2. Counterparty registration and conversation lookup
//! 3. Best-effort media enrichment
//! 4. `JobStore::enqueue()` — the reply is produced later by the queue worker
//!
//! **No synchronous reply path exists.** Callers only learn accepted/queued.

pub mod classifier;
pub mod orchestrator;
pub mod types;

pub use classifier::AdmissionClassifier;
pub use orchestrator::Orchestrator;
pub use types::{InboundEvent, ProcessOutcome, ProfileMetadata, VerificationResult};
