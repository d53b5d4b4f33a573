//! Session Store + Context Manager: ordered per-session message history,
//! WAL-backed persistence, the envelope builder that assembles a
//! token-budgeted prompt, and structured-summary compaction.

pub mod compaction;
pub mod envelope;
pub mod session;
pub mod store;

pub use compaction::{compact, Bullet, Citation, CompactedSummary, CompactionAudit};
pub use envelope::{estimate_tokens, BuiltEnvelope, EnvelopeBuilder};
pub use session::{generate_session_id, Session};
pub use store::SessionStore;
