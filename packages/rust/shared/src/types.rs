//! Core domain types for agency classification runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Constant `type` value stored on every registry record.
pub const AGENCY_RECORD_TYPE: &str = "agency";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// States of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Init,
    Detecting,
    Reconciling,
    Propagating,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Detecting => "detecting",
            Self::Reconciling => "reconciling",
            Self::Propagating => "propagating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Registry records
// ---------------------------------------------------------------------------

/// Provenance of a registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Written by the classification pipeline.
    #[default]
    Auto,
    /// Curated by a human or an external process.
    Manual,
}

/// A repeat listing-owner found by one aggregation run. Lives for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgencyCandidate {
    /// Normalized contact identifier (phone).
    pub contact_id: String,
    /// Number of listings carrying this contact id.
    pub listing_count: u64,
    /// Display name from the sampled listing, or the configured placeholder.
    pub representative_name: String,
    /// Listing source platform of the sampled listing.
    pub source: Option<String>,
}

/// A registry document, keyed by `contact_id`.
///
/// Field names on the wire match the registry index mapping. Records written
/// before provenance tracking existed have no `origin` and read as `auto`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(rename = "phone")]
    pub contact_id: String,
    #[serde(rename = "type", default = "default_record_type")]
    pub record_type: String,
    pub agency_name: String,
    pub listing_count: u64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn default_record_type() -> String {
    AGENCY_RECORD_TYPE.into()
}

impl AgentRecord {
    /// Build the auto-derived record for a freshly detected candidate.
    pub fn from_candidate(candidate: &AgencyCandidate, now: DateTime<Utc>) -> Self {
        Self {
            contact_id: candidate.contact_id.clone(),
            record_type: default_record_type(),
            agency_name: candidate.representative_name.clone(),
            listing_count: candidate.listing_count,
            last_updated: now,
            origin: Origin::Auto,
            source: candidate.source.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run outputs
// ---------------------------------------------------------------------------

/// Tally of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    /// Records written successfully (full upserts and manual merges).
    pub upserted: usize,
    /// Subset of `upserted` that did not exist before.
    pub created: usize,
    /// Subset of `upserted` where a manual record kept its curation.
    pub preserved_manual: usize,
    /// Candidates not written because they carried no usable key.
    pub skipped: usize,
    /// Candidates whose store write failed.
    pub failed: usize,
}

/// Handle to a bulk flag update running inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncTaskHandle {
    /// Opaque task identifier returned by the store.
    pub task_id: String,
    /// Index the update runs against.
    pub index: String,
    /// Number of distinct contact ids in the filter.
    pub contact_count: usize,
}
