use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, lifecycle-managed unit of content change.
///
/// A release starts OPEN and empty. Writes land in it as version rows; reads that
/// miss fall through to the release's base (the DEPLOYED release underneath it).
///
/// # Lifecycle
/// `Open ⇄ Closed → Deployed → Superseded | RolledBack`, and a superseded or
/// rolled back release can become `Deployed` again through a rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ReleaseStatus,
    /// Position in the global deploy history. Set on first deploy, reallocated on rollback.
    pub deploy_seq: Option<i64>,
    /// Release this one falls back to, pinned when it is deployed.
    pub base_release_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub deployed_by: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
}

/// The lifecycle state of a release.
///
/// - `Open`: Accepts writes
/// - `Closed`: Frozen, waiting to be deployed
/// - `Deployed`: The current production release (exactly one at a time)
/// - `Superseded`: Was deployed, replaced by a later deploy
/// - `RolledBack`: Was deployed, replaced by a rollback to an earlier release
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Open,
    Closed,
    Deployed,
    Superseded,
    RolledBack,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Deployed => "DEPLOYED",
            Self::Superseded => "SUPERSEDED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            "DEPLOYED" => Some(Self::Deployed),
            "SUPERSEDED" => Some(Self::Superseded),
            "ROLLED_BACK" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Whether a release in this state has not reached production yet.
    pub fn is_unreleased(&self) -> bool {
        matches!(self, Self::Open | Self::Closed)
    }
}

/// Input for creating a new release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReleaseInput {
    pub name: String,
    pub description: Option<String>,
}

/// Input for updating a release. All fields are optional for partial updates.
///
/// `status` may only move a release between `Open` and `Closed`; deploy and
/// rollback have dedicated operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReleaseInput {
    pub name: Option<String>,
    /// An empty string clears the description.
    pub description: Option<String>,
    pub status: Option<ReleaseStatus>,
}

/// The release an operation is scoped to.
///
/// Resolved once per logical operation and threaded through every step of it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseContext {
    pub release_id: Uuid,
    /// True when the release is not the current DEPLOYED one.
    pub is_preview: bool,
}
