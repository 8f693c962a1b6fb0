//! Shared data models for the rearrangement engine.
//!
//! This module defines the small value types that travel between pipeline
//! stages and out through the API:
//! - `SuggestionParams`: tuning knobs forwarded to the suggestion endpoints
//! - `Destination`: a target container or the explicit unknown marker
//! - `ExecutionMode` / `ExecutionStrategy`: how a plan is submitted
//! - `ExecutionOutcome`: the reconciled result for one planned move

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
#[allow(unused_imports)]
use serde_json::json;
use utoipa::ToSchema;

/// Tuning parameters for the suggestion endpoints.
///
/// # Fields
/// * `priority_threshold` - Minimum item priority considered for relocation
/// * `max_movements` - Upper bound on suggested moves
/// * `space_target` - Desired free-space ratio per container
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SuggestionParams {
    pub priority_threshold: f64,
    pub max_movements: u32,
    pub space_target: f64,
}

impl SuggestionParams {
    pub const DEFAULT_PRIORITY_THRESHOLD: f64 = 5.0;
    pub const DEFAULT_MAX_MOVEMENTS: u32 = 10;
    pub const DEFAULT_SPACE_TARGET: f64 = 0.8;
}

impl Default for SuggestionParams {
    fn default() -> Self {
        Self {
            priority_threshold: Self::DEFAULT_PRIORITY_THRESHOLD,
            max_movements: Self::DEFAULT_MAX_MOVEMENTS,
            space_target: Self::DEFAULT_SPACE_TARGET,
        }
    }
}

/// Target of a movement.
///
/// `Unknown` is produced when a legacy suggestion carries no candidate
/// container; such movements never pass admission control. Serialized as the
/// container id or `null`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    Container(String),
    Unknown,
}

impl Destination {
    pub fn from_candidate(candidate: Option<String>) -> Self {
        match candidate {
            Some(id) => Destination::Container(id),
            None => Destination::Unknown,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            Destination::Container(id) => Some(id),
            Destination::Unknown => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Container(id) => write!(f, "{}", id),
            Destination::Unknown => write!(f, "<unknown destination>"),
        }
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.container_id().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<String>::deserialize(deserializer).map(Destination::from_candidate)
    }
}

/// How the executor submits a plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Bulk submission, falling back to sequential calls when the bulk call fails.
    #[default]
    Auto,
    Bulk,
    Sequential,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ExecutionMode::Auto),
            "bulk" | "batch" => Ok(ExecutionMode::Bulk),
            "sequential" | "serial" => Ok(ExecutionMode::Sequential),
            other => Err(format!(
                "unknown execution mode '{}' (expected auto, bulk or sequential)",
                other
            )),
        }
    }
}

/// Strategy that was actually used for a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Bulk,
    Sequential,
}

/// Reconciled result for one planned move.
///
/// # Fields
/// * `item_id` - Moved item
/// * `requested_to_container_id` - Destination from the plan
/// * `actual_to_container_id` - Where the backend put the item, if it did
/// * `success` - Whether the item ended up placed
/// * `alternative_placement` - Placed, but not where requested
/// * `message` - Human-readable detail
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[schema(
    example = json!({
        "item_id": "I1",
        "requested_to_container_id": "C2",
        "actual_to_container_id": "C4",
        "success": true,
        "alternative_placement": true,
        "message": "Placed in C4 instead of requested C2"
    })
)]
pub struct ExecutionOutcome {
    pub item_id: String,
    pub requested_to_container_id: String,
    pub actual_to_container_id: Option<String>,
    pub success: bool,
    pub alternative_placement: bool,
    pub message: String,
}

impl ExecutionOutcome {
    /// Successful placement; flags the divergence when `actual` differs from `requested`.
    pub fn placed(item_id: &str, requested: &str, actual: Option<&str>) -> Self {
        let actual = actual.unwrap_or(requested);
        let alternative_placement = actual != requested;
        let message = if alternative_placement {
            format!("Placed in {} instead of requested {}", actual, requested)
        } else {
            format!("Moved to {}", requested)
        };
        Self {
            item_id: item_id.to_owned(),
            requested_to_container_id: requested.to_owned(),
            actual_to_container_id: Some(actual.to_owned()),
            success: true,
            alternative_placement,
            message,
        }
    }

    pub fn failed(item_id: &str, requested: &str, message: impl Into<String>) -> Self {
        Self {
            item_id: item_id.to_owned(),
            requested_to_container_id: requested.to_owned(),
            actual_to_container_id: None,
            success: false,
            alternative_placement: false,
            message: message.into(),
        }
    }
}
