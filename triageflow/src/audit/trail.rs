//! Append-only, hash-chained audit trail for one case.

use super::hashing::{content_hash, GENESIS_HASH};
use crate::errors::AuditError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

/// Metadata attached to an audit entry. Sorted for deterministic export.
pub type AuditMetadata = BTreeMap<String, Value>;

/// Builds an [`AuditMetadata`] map from key/value pairs.
pub fn metadata<I, K>(pairs: I) -> AuditMetadata
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Explicit category assigned to an entry when it is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// A stage finished and its output was accepted.
    StageCompletion,
    /// An entry that shaped the risk score or the disposition.
    RiskDecision,
    /// A regulatory compliance check.
    ComplianceCheck,
    /// A failure recorded on the emergency path.
    Error,
}

impl AuditCategory {
    /// Returns the snake_case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StageCompletion => "stage_completion",
            Self::RiskDecision => "risk_decision",
            Self::ComplianceCheck => "compliance_check",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable audit record. Raw payloads are never stored, only hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail, starting at 0.
    pub sequence: u64,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Stage that produced the entry.
    pub stage: String,
    /// Action label.
    pub action: String,
    /// Category set at creation.
    pub category: AuditCategory,
    /// SHA-256 of the canonical input.
    pub input_hash: String,
    /// SHA-256 of the canonical output.
    pub output_hash: String,
    /// Caller-supplied metadata.
    pub metadata: AuditMetadata,
    /// Component versions at the time of the entry.
    pub system_versions: BTreeMap<String, String>,
    /// `entry_hash` of the preceding entry, or [`GENESIS_HASH`].
    pub previous_hash: String,
    /// Hash over every other field of this entry.
    pub entry_hash: String,
}

#[derive(Serialize)]
struct EntryDigest<'a> {
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    stage: &'a str,
    action: &'a str,
    category: AuditCategory,
    input_hash: &'a str,
    output_hash: &'a str,
    metadata: &'a AuditMetadata,
    system_versions: &'a BTreeMap<String, String>,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Recomputes the entry hash from the other fields.
    pub fn compute_hash(&self) -> Result<String, AuditError> {
        content_hash(&EntryDigest {
            sequence: self.sequence,
            timestamp: &self.timestamp,
            stage: &self.stage,
            action: &self.action,
            category: self.category,
            input_hash: &self.input_hash,
            output_hash: &self.output_hash,
            metadata: &self.metadata,
            system_versions: &self.system_versions,
            previous_hash: &self.previous_hash,
        })
    }

    /// Returns a timeline view of this entry.
    #[must_use]
    pub fn to_timeline(&self) -> TimelineEntry {
        TimelineEntry {
            sequence: self.sequence,
            timestamp: self.timestamp,
            stage: self.stage.clone(),
            action: self.action.clone(),
            category: self.category,
            input_hash: self.input_hash.clone(),
            output_hash: self.output_hash.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Timeline view of an entry, as attached to a [`crate::core::Decision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Position in the trail.
    pub sequence: u64,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Stage name.
    pub stage: String,
    /// Action label.
    pub action: String,
    /// Category.
    pub category: AuditCategory,
    /// SHA-256 of the canonical input.
    pub input_hash: String,
    /// SHA-256 of the canonical output.
    pub output_hash: String,
    /// Metadata.
    pub metadata: AuditMetadata,
}

/// A compliance-relevant entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceCheck {
    /// Position in the trail.
    pub sequence: u64,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Stage name.
    pub stage: String,
    /// Action label.
    pub action: String,
    /// `compliance_result` metadata, if any.
    pub result: Option<Value>,
    /// `regulations` metadata, if any.
    pub regulations: Vec<Value>,
}

/// Summary statistics over a trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    /// The case.
    pub case_id: String,
    /// Number of entries.
    pub total_entries: usize,
    /// Distinct stage names, sorted.
    pub stages_involved: Vec<String>,
    /// Distinct action labels, sorted.
    pub actions: Vec<String>,
    /// Entry count per category.
    pub categories: BTreeMap<AuditCategory, usize>,
    /// Timestamp of the earliest entry.
    pub first_entry_at: Option<DateTime<Utc>>,
    /// Timestamp of the latest entry.
    pub last_entry_at: Option<DateTime<Utc>>,
}

/// Per-case ordered sequence of [`AuditEntry`] values.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    case_id: String,
    created_at: DateTime<Utc>,
    system_versions: BTreeMap<String, String>,
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    /// Creates an empty trail for a case.
    #[must_use]
    pub fn new(case_id: impl Into<String>, system_versions: BTreeMap<String, String>) -> Self {
        Self {
            case_id: case_id.into(),
            created_at: Utc::now(),
            system_versions,
            entries: Vec::new(),
        }
    }

    /// Appends an entry, hashing `input` and `output` canonically.
    pub fn append<I, O>(
        &mut self,
        stage: impl Into<String>,
        action: impl Into<String>,
        category: AuditCategory,
        input: &I,
        output: &O,
        metadata: AuditMetadata,
    ) -> Result<&AuditEntry, AuditError>
    where
        I: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        let previous_hash = self
            .entries
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.entry_hash.clone());

        let mut entry = AuditEntry {
            sequence: self.entries.len() as u64,
            timestamp: Utc::now(),
            stage: stage.into(),
            action: action.into(),
            category,
            input_hash: content_hash(input)?,
            output_hash: content_hash(output)?,
            metadata,
            system_versions: self.system_versions.clone(),
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash()?;

        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Seals the trail so no further entries can be appended.
    #[must_use]
    pub fn seal(self) -> SealedAuditTrail {
        SealedAuditTrail(self)
    }

    /// Returns the case id.
    #[must_use]
    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    /// Returns when the trail was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the hash of the latest entry.
    #[must_use]
    pub fn tip(&self) -> &str {
        self.entries.last().map_or(GENESIS_HASH, |e| e.entry_hash.as_str())
    }

    fn sorted_entries(&self) -> Vec<&AuditEntry> {
        // Entries are appended chronologically, but wall clocks can step backwards.
        let mut sorted: Vec<&AuditEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
        sorted
    }

    /// Returns all entries ordered by timestamp.
    #[must_use]
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.sorted_entries()
            .into_iter()
            .map(AuditEntry::to_timeline)
            .collect()
    }

    /// Returns the risk and decision entries ordered by timestamp.
    #[must_use]
    pub fn decision_chain(&self) -> Vec<TimelineEntry> {
        self.sorted_entries()
            .into_iter()
            .filter(|e| e.category == AuditCategory::RiskDecision)
            .map(AuditEntry::to_timeline)
            .collect()
    }

    /// Returns the distinct data sources named in entry metadata, sorted.
    #[must_use]
    pub fn data_sources(&self) -> Vec<String> {
        let mut sources = std::collections::BTreeSet::new();
        for entry in &self.entries {
            for key in ["sources", "sources_used"] {
                if let Some(Value::Array(items)) = entry.metadata.get(key) {
                    sources.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
            if let Some(Value::String(source)) = entry.metadata.get("data_source") {
                sources.insert(source.clone());
            }
        }
        sources.into_iter().collect()
    }

    /// Returns the compliance-relevant entries, each once, in insertion order.
    #[must_use]
    pub fn compliance_checks(&self) -> Vec<ComplianceCheck> {
        self.entries
            .iter()
            .filter(|e| {
                e.category == AuditCategory::ComplianceCheck
                    || e.metadata.contains_key("compliance_result")
            })
            .map(|e| ComplianceCheck {
                sequence: e.sequence,
                timestamp: e.timestamp,
                stage: e.stage.clone(),
                action: e.action.clone(),
                result: e.metadata.get("compliance_result").cloned(),
                regulations: match e.metadata.get("regulations") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                },
            })
            .collect()
    }

    /// Returns the component versions recorded by the first entry.
    #[must_use]
    pub fn system_metadata(&self) -> BTreeMap<String, String> {
        self.entries
            .first()
            .map(|e| e.system_versions.clone())
            .unwrap_or_default()
    }

    /// Summarizes the trail.
    #[must_use]
    pub fn summary(&self) -> AuditSummary {
        let mut stages: Vec<String> = self.entries.iter().map(|e| e.stage.clone()).collect();
        stages.sort();
        stages.dedup();

        let mut actions: Vec<String> = self.entries.iter().map(|e| e.action.clone()).collect();
        actions.sort();
        actions.dedup();

        let mut categories = BTreeMap::new();
        for entry in &self.entries {
            *categories.entry(entry.category).or_insert(0) += 1;
        }

        AuditSummary {
            case_id: self.case_id.clone(),
            total_entries: self.entries.len(),
            stages_involved: stages,
            actions,
            categories,
            first_entry_at: self.entries.iter().map(|e| e.timestamp).min(),
            last_entry_at: self.entries.iter().map(|e| e.timestamp).max(),
        }
    }

    /// Verifies the hash chain and every entry hash.
    pub fn verify(&self) -> Result<(), AuditError> {
        let mut expected_previous = GENESIS_HASH;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.sequence != index as u64 || entry.previous_hash != expected_previous {
                return Err(AuditError::BrokenChain {
                    position: index as u64,
                });
            }
            if entry.compute_hash()? != entry.entry_hash {
                return Err(AuditError::HashMismatch {
                    position: entry.sequence,
                    field: "entry_hash".to_string(),
                });
            }
            expected_previous = &entry.entry_hash;
        }
        Ok(())
    }

    /// Checks that `input` and `output` are the payloads recorded at `sequence`.
    pub fn verify_payload<I, O>(&self, sequence: u64, input: &I, output: &O) -> Result<(), AuditError>
    where
        I: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        let entry = usize::try_from(sequence)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or(AuditError::UnknownEntry(sequence))?;

        if content_hash(input)? != entry.input_hash {
            return Err(AuditError::HashMismatch {
                position: sequence,
                field: "input_hash".to_string(),
            });
        }
        if content_hash(output)? != entry.output_hash {
            return Err(AuditError::HashMismatch {
                position: sequence,
                field: "output_hash".to_string(),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<AuditEntry> {
        &mut self.entries
    }
}

/// A read-only trail, produced once the decision is assembled.
#[derive(Debug, Clone)]
pub struct SealedAuditTrail(AuditTrail);

impl Deref for SealedAuditTrail {
    type Target = AuditTrail;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn versions() -> BTreeMap<String, String> {
        [("system_version".to_string(), "0.1.0".to_string())]
            .into_iter()
            .collect()
    }

    fn sample_trail() -> AuditTrail {
        let mut trail = AuditTrail::new("alert-123", versions());
        trail
            .append(
                "enrichment",
                "data_enriched",
                AuditCategory::StageCompletion,
                &json!({"alert": 1}),
                &json!({"summary": "ok"}),
                metadata([("sources_used", json!(["OFAC", "CRM"]))]),
            )
            .unwrap();
        trail
            .append(
                "risk_assessment",
                "risk_calculated",
                AuditCategory::RiskDecision,
                &json!({}),
                &json!({"score": 40}),
                metadata([("risk_score", json!(40)), ("data_source", json!("WorldCheck"))]),
            )
            .unwrap();
        trail
            .append(
                "decision",
                "decision_made",
                AuditCategory::RiskDecision,
                &json!({}),
                &json!({"disposition": "ESCALATE_L2"}),
                AuditMetadata::new(),
            )
            .unwrap();
        trail
    }

    #[test]
    fn test_append_records_hashes_not_payload() {
        let trail = sample_trail();
        let entry = &trail.entries()[0];

        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.previous_hash, GENESIS_HASH);
        assert_eq!(entry.input_hash, content_hash(&json!({"alert": 1})).unwrap());
        assert_eq!(entry.input_hash.len(), 64);
        assert_eq!(trail.entries()[1].previous_hash, entry.entry_hash);
        assert_eq!(trail.tip(), trail.entries()[2].entry_hash);
    }

    #[test]
    fn test_timeline_is_sorted_even_with_clock_skew() {
        let mut trail = sample_trail();
        let earliest = trail.entries()[0].timestamp - chrono::Duration::seconds(5);
        trail.entries_mut()[2].timestamp = earliest;

        let timeline = trail.timeline();
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].sequence, 2);
        assert!(timeline.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_decision_chain_uses_category() {
        let trail = sample_trail();
        let chain = trail.decision_chain();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].action, "risk_calculated");
        assert_eq!(chain[1].action, "decision_made");
    }

    #[test]
    fn test_decision_chain_empty_without_matches() {
        let mut trail = AuditTrail::new("a", versions());
        trail
            .append("enrichment", "decision_like_label", AuditCategory::StageCompletion, &json!({}), &json!({}), AuditMetadata::new())
            .unwrap();
        assert!(trail.decision_chain().is_empty());
    }

    #[test]
    fn test_data_sources_distinct_sorted() {
        let trail = sample_trail();
        assert_eq!(trail.data_sources(), vec!["CRM", "OFAC", "WorldCheck"]);
    }

    #[test]
    fn test_compliance_checks() {
        let mut trail = sample_trail();
        trail
            .append(
                "narrative_context",
                "regulatory_review",
                AuditCategory::ComplianceCheck,
                &json!({}),
                &json!({}),
                metadata([
                    ("compliance_result", json!("pass")),
                    ("regulations", json!(["BSA"])),
                ]),
            )
            .unwrap();

        let checks = trail.compliance_checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].result, Some(json!("pass")));
        assert_eq!(checks[0].regulations, vec![json!("BSA")]);
    }

    #[test]
    fn test_summary() {
        let summary = sample_trail().summary();

        assert_eq!(summary.case_id, "alert-123");
        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.stages_involved, vec!["decision", "enrichment", "risk_assessment"]);
        assert_eq!(summary.categories.get(&AuditCategory::RiskDecision), Some(&2));
    }

    #[test]
    fn test_verify_accepts_untouched_trail() {
        assert!(sample_trail().verify().is_ok());
        assert!(AuditTrail::new("empty", versions()).verify().is_ok());
    }

    #[test]
    fn test_verify_detects_edited_metadata() {
        let mut trail = sample_trail();
        trail.entries_mut()[1]
            .metadata
            .insert("risk_score".to_string(), json!(5));

        assert_eq!(
            trail.verify(),
            Err(AuditError::HashMismatch {
                position: 1,
                field: "entry_hash".to_string()
            })
        );
    }

    #[test]
    fn test_verify_detects_removed_entry() {
        let mut trail = sample_trail();
        trail.entries_mut().remove(1);

        assert_eq!(trail.verify(), Err(AuditError::BrokenChain { position: 1 }));
    }

    #[test]
    fn test_verify_payload() {
        let trail = sample_trail();

        assert!(trail
            .verify_payload(0, &json!({"alert": 1}), &json!({"summary": "ok"}))
            .is_ok());
        assert!(matches!(
            trail.verify_payload(0, &json!({"alert": 2}), &json!({"summary": "ok"})),
            Err(AuditError::HashMismatch { .. })
        ));
        assert_eq!(
            trail.verify_payload(9, &json!({}), &json!({})),
            Err(AuditError::UnknownEntry(9))
        );
    }

    #[test]
    fn test_sealed_trail_is_read_only_view() {
        let sealed = sample_trail().seal();
        assert_eq!(sealed.len(), 3);
        assert_eq!(sealed.case_id(), "alert-123");
    }
}
