//! Tamper-evident audit trail.
//!
//! Every accepted stage output is recorded as a hash of its canonical input
//! and output. Entries are chained by hash so that any edit, removal or
//! reordering is caught by [`AuditTrail::verify`].

mod hashing;
mod report;
mod trail;

pub use hashing::{canonical_json, content_hash, sha256_hex, GENESIS_HASH};
pub use report::AuditReport;
pub use trail::{
    metadata, AuditCategory, AuditEntry, AuditMetadata, AuditSummary, AuditTrail,
    ComplianceCheck, SealedAuditTrail, TimelineEntry,
};
