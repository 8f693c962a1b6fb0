//! Reconciliation of plan intent with backend outcomes.
//!
//! Turns whatever the executor collected into one [`ExecutionOutcome`] per
//! planned move, then summarizes them. Bulk answers are matched by item id
//! against `placed_items` / `failed_items`; bulk answers without those lists
//! (older endpoints) apply their single top-level result to every move.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
#[allow(unused_imports)]
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::admission::{RejectedMovement, nothing_admissible_message};
use crate::capacity::{CapacitySnapshot, ContainerCapacity};
use crate::executor::{BackendPayload, Execution, SequentialStep};
use crate::model::{ExecutionOutcome, ExecutionStrategy};
use crate::plan::{PlannedMove, RearrangementPlan};
use crate::suggestions::NO_REARRANGEMENT_NEEDED;
use crate::wire::{bool_from_value, lenient_bool, lenient_id, lenient_text};

const NO_ITEM_RESULT: &str = "Backend reported no result for this item";

/// Final result of an execute cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
#[schema(
    example = json!({
        "cycle": 4,
        "superseded": false,
        "success": true,
        "message": "Successfully moved 2/3 items",
        "attempted": 3,
        "moved": 2,
        "failed": 1,
        "alternative_placements": 1,
        "strategy": "bulk",
        "outcomes": [],
        "rejected": [],
        "diagnostics": [],
        "capacity_after": null
    })
)]
pub struct RearrangementReport {
    pub cycle: u64,
    pub superseded: bool,
    pub success: bool,
    pub message: String,
    pub attempted: usize,
    pub moved: usize,
    pub failed: usize,
    pub alternative_placements: usize,
    pub strategy: Option<ExecutionStrategy>,
    pub outcomes: Vec<ExecutionOutcome>,
    pub rejected: Vec<RejectedMovement>,
    pub diagnostics: Vec<String>,
    pub capacity_after: Option<Vec<ContainerCapacity>>,
}

impl RearrangementReport {
    /// Summarizes outcomes; `success` means at least one item moved.
    pub fn from_outcomes(outcomes: Vec<ExecutionOutcome>) -> Self {
        let attempted = outcomes.len();
        let moved = outcomes.iter().filter(|o| o.success).count();
        let alternative_placements = outcomes.iter().filter(|o| o.alternative_placement).count();
        Self {
            success: moved > 0,
            message: summary_message(moved, attempted),
            attempted,
            moved,
            failed: attempted - moved,
            alternative_placements,
            outcomes,
            ..Self::default()
        }
    }

    /// Neither provider had anything to suggest; a successful no-op.
    pub fn no_rearrangement_needed() -> Self {
        Self {
            success: true,
            message: NO_REARRANGEMENT_NEEDED.to_string(),
            ..Self::default()
        }
    }

    /// Suggestions existed but admission control rejected all of them.
    pub fn nothing_admissible(rejected: Vec<RejectedMovement>) -> Self {
        Self {
            success: false,
            message: nothing_admissible_message(&rejected),
            rejected,
            ..Self::default()
        }
    }
}

pub fn summary_message(moved: usize, attempted: usize) -> String {
    if moved > 0 {
        format!("Successfully moved {}/{} items", moved, attempted)
    } else {
        format!("Failed to move any of the {} items", attempted)
    }
}

#[derive(Debug, Default, Deserialize)]
struct BulkPlacementResponse {
    #[serde(default, deserialize_with = "lenient_bool")]
    success: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    message: Option<String>,
    #[serde(default)]
    placed_items: Option<Vec<Value>>,
    #[serde(default)]
    failed_items: Option<Vec<Value>>,
}

impl BulkPlacementResponse {
    /// Decodes the body; a body whose lists are malformed keeps only its top-level fields.
    fn decode(body: &Value) -> Self {
        serde_json::from_value(body.clone()).unwrap_or_else(|_| {
            warn!("⚠️ Bulk placement response has malformed item lists, using top-level result");
            Self {
                success: body.get("success").and_then(bool_from_value),
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                placed_items: None,
                failed_items: None,
            }
        })
    }

    fn is_structured(&self) -> bool {
        self.placed_items.is_some() || self.failed_items.is_some()
    }
}

/// Decodes list entries one by one, keyed by item id; malformed or id-less
/// entries are dropped individually.
fn index_entries<T, F>(entries: Option<Vec<Value>>, id_of: F) -> HashMap<String, T>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&T) -> Option<String>,
{
    entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<T>(entry).ok())
        .filter_map(|entry| Some((id_of(&entry)?, entry)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct PlacedEntry {
    #[serde(default, alias = "item_id", alias = "itemId", deserialize_with = "lenient_id")]
    id: Option<String>,
    #[serde(default, alias = "containerId", deserialize_with = "lenient_id")]
    container_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    success: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FailedEntry {
    #[serde(default, alias = "item_id", alias = "itemId", deserialize_with = "lenient_id")]
    id: Option<String>,
    #[serde(
        default,
        alias = "reason",
        alias = "error",
        deserialize_with = "lenient_text"
    )]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SinglePlacementResponse {
    #[serde(default, deserialize_with = "lenient_bool")]
    success: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    message: Option<String>,
    #[serde(default, alias = "containerId", deserialize_with = "lenient_id")]
    container_id: Option<String>,
}

fn uniform(plan: &RearrangementPlan, success: bool, message: &str) -> Vec<ExecutionOutcome> {
    plan.moves()
        .iter()
        .map(|planned| {
            let mut outcome = if success {
                ExecutionOutcome::placed(planned.item_id(), planned.to_container_id(), None)
            } else {
                ExecutionOutcome::failed(planned.item_id(), planned.to_container_id(), "")
            };
            outcome.message = message.to_string();
            outcome
        })
        .collect()
}

fn reconcile_bulk(plan: &RearrangementPlan, body: &Value) -> Vec<ExecutionOutcome> {
    let response = BulkPlacementResponse::decode(body);

    if !response.is_structured() {
        let success = response.success.unwrap_or(false);
        let message = response.message.unwrap_or_else(|| {
            if success {
                "Placed by backend (no per-item details reported)".to_string()
            } else {
                "Bulk placement failed (no per-item details reported)".to_string()
            }
        });
        warn!("⚠️ Bulk response carries no per-item detail, applying '{message}' to every move");
        return uniform(plan, success, &message);
    }

    let placed: HashMap<String, PlacedEntry> =
        index_entries(response.placed_items, |entry: &PlacedEntry| entry.id.clone());
    let failed: HashMap<String, FailedEntry> =
        index_entries(response.failed_items, |entry: &FailedEntry| entry.id.clone());

    plan.moves()
        .iter()
        .map(|planned| match_bulk_entry(planned, &placed, &failed))
        .collect()
}

fn match_bulk_entry(
    planned: &PlannedMove,
    placed: &HashMap<String, PlacedEntry>,
    failed: &HashMap<String, FailedEntry>,
) -> ExecutionOutcome {
    let item_id = planned.item_id();
    let requested = planned.to_container_id();

    if let Some(entry) = placed.get(item_id) {
        if entry.success != Some(false) {
            return ExecutionOutcome::placed(item_id, requested, entry.container_id.as_deref());
        }
        let message = entry
            .message
            .clone()
            .unwrap_or_else(|| "Placement rejected by backend".to_string());
        return ExecutionOutcome::failed(item_id, requested, message);
    }

    if let Some(entry) = failed.get(item_id) {
        let message = entry
            .message
            .clone()
            .unwrap_or_else(|| "Placement failed".to_string());
        return ExecutionOutcome::failed(item_id, requested, message);
    }

    ExecutionOutcome::failed(item_id, requested, NO_ITEM_RESULT)
}

fn reconcile_sequential(plan: &RearrangementPlan, steps: &[SequentialStep]) -> Vec<ExecutionOutcome> {
    plan.moves()
        .iter()
        .enumerate()
        .map(|(index, planned)| {
            let item_id = planned.item_id();
            let requested = planned.to_container_id();
            let Some(step) = steps.get(index).filter(|step| step.item_id == item_id) else {
                return ExecutionOutcome::failed(item_id, requested, NO_ITEM_RESULT);
            };
            match &step.response {
                Ok(body) => {
                    let answer: SinglePlacementResponse =
                        serde_json::from_value(body.clone()).unwrap_or_default();
                    if answer.success.unwrap_or(true) {
                        ExecutionOutcome::placed(item_id, requested, answer.container_id.as_deref())
                    } else {
                        let message = answer
                            .message
                            .unwrap_or_else(|| "Placement rejected by backend".to_string());
                        ExecutionOutcome::failed(item_id, requested, message)
                    }
                }
                Err(err) => ExecutionOutcome::failed(item_id, requested, err.to_string()),
            }
        })
        .collect()
}

/// Builds the report for an executed plan.
pub fn reconcile(plan: &RearrangementPlan, execution: &Execution) -> RearrangementReport {
    let outcomes = match &execution.payload {
        BackendPayload::Bulk(body) => reconcile_bulk(plan, body),
        BackendPayload::Sequential(steps) => reconcile_sequential(plan, steps),
        BackendPayload::Unavailable { message } => {
            uniform(plan, false, &format!("Bulk placement unavailable: {}", message))
        }
    };

    let mut report = RearrangementReport::from_outcomes(outcomes);
    report.strategy = Some(execution.strategy);
    report.capacity_after = execution
        .capacity_after
        .as_ref()
        .map(CapacitySnapshot::containers);

    info!(
        "📦 {} ({} alternative placement(s))",
        report.message, report.alternative_placements
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::RejectionReason;
    use crate::backend::routes;
    use crate::plan::build_plan;
    use crate::suggestions::movement;
    use crate::testing::transport_error;

    fn plan_of(moves: &[(&str, &str)]) -> RearrangementPlan {
        build_plan(
            moves
                .iter()
                .map(|(item, to)| movement(item, "C1", Some(to)))
                .collect(),
        )
    }

    fn bulk(body: Value) -> Execution {
        Execution {
            strategy: ExecutionStrategy::Bulk,
            payload: BackendPayload::Bulk(body),
            capacity_after: None,
        }
    }

    #[test]
    fn partial_bulk_failure_still_succeeds() {
        let plan = plan_of(&[("I1", "C2"), ("I2", "C3"), ("I3", "C4")]);
        let execution = bulk(json!({
            "success": true,
            "placed_items": [
                {"id": "I1", "container_id": "C2", "success": true},
                {"id": "I3", "container_id": "C4", "success": true}
            ],
            "failed_items": [{"id": "I2", "message": "Container C3 is full"}]
        }));

        let report = reconcile(&plan, &execution);
        assert!(report.success);
        assert_eq!(report.message, "Successfully moved 2/3 items");
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.outcomes[1].message, "Container C3 is full");
        assert_eq!(report.strategy, Some(ExecutionStrategy::Bulk));
    }

    #[test]
    fn alternative_placement_is_flagged() {
        let plan = plan_of(&[("I1", "C2")]);
        let execution = bulk(json!({
            "success": true,
            "placed_items": [{"id": "I1", "container_id": "C4", "success": true}],
            "failed_items": []
        }));

        let report = reconcile(&plan, &execution);
        let outcome = &report.outcomes[0];
        assert!(outcome.success);
        assert_eq!(outcome.requested_to_container_id, "C2");
        assert_eq!(outcome.actual_to_container_id.as_deref(), Some("C4"));
        assert!(outcome.alternative_placement);
        assert!(outcome.message.contains("instead of requested C2"));
        assert_eq!(report.alternative_placements, 1);
    }

    #[test]
    fn degraded_bulk_answer_applies_uniformly() {
        let plan = plan_of(&[("I1", "C2"), ("I2", "C3")]);

        let report = reconcile(&plan, &bulk(json!({"success": true, "message": "done"})));
        assert!(report.outcomes.iter().all(|o| o.success && o.message == "done"));
        assert_eq!(report.message, "Successfully moved 2/2 items");

        let report = reconcile(&plan, &bulk(json!({"success": false, "message": "locked"})));
        assert!(!report.success);
        assert!(report.outcomes.iter().all(|o| !o.success && o.message == "locked"));
        assert_eq!(report.message, "Failed to move any of the 2 items");
    }

    #[test]
    fn malformed_item_lists_fall_back_to_top_level() {
        let plan = plan_of(&[("I1", "C2")]);
        let report = reconcile(
            &plan,
            &bulk(json!({"success": "true", "placed_items": "I1"})),
        );
        assert!(report.success);
        assert_eq!(report.outcomes[0].actual_to_container_id.as_deref(), Some("C2"));
    }

    #[test]
    fn malformed_list_entry_does_not_discard_its_neighbours() {
        let plan = plan_of(&[("I1", "C2"), ("I2", "C3")]);
        let report = reconcile(
            &plan,
            &bulk(json!({
                "success": false,
                "placed_items": ["garbage", {"id": "I1", "container_id": "C2", "success": true}],
                "failed_items": [7, {"id": "I2", "message": "C3 locked"}]
            })),
        );
        assert_eq!(report.message, "Successfully moved 1/2 items");
        assert!(report.outcomes[0].success);
        assert_eq!(report.outcomes[1].message, "C3 locked");
    }

    #[test]
    fn items_missing_from_both_lists_fail() {
        let plan = plan_of(&[("I1", "C2"), ("I2", "C3")]);
        let report = reconcile(
            &plan,
            &bulk(json!({"placed_items": [{"id": "I1", "success": false, "message": "blocked"}]})),
        );
        assert!(!report.success);
        assert_eq!(report.outcomes[0].message, "blocked");
        assert_eq!(report.outcomes[1].message, NO_ITEM_RESULT);
    }

    #[test]
    fn sequential_steps_reconcile_per_item() {
        let plan = plan_of(&[("I1", "C2"), ("I2", "C3"), ("I3", "C4")]);
        let execution = Execution {
            strategy: ExecutionStrategy::Sequential,
            payload: BackendPayload::Sequential(vec![
                SequentialStep {
                    item_id: "I1".into(),
                    response: Ok(json!({"success": true, "message": "ok", "containerId": "C9"})),
                },
                SequentialStep {
                    item_id: "I2".into(),
                    response: Ok(json!({"success": false, "message": "no room"})),
                },
                SequentialStep {
                    item_id: "I3".into(),
                    response: Err(transport_error(routes::SINGLE_PLACEMENT)),
                },
            ]),
            capacity_after: Some(CapacitySnapshot::from_entries([ContainerCapacity::new(
                "C9", None, 10, 1,
            )])),
        };

        let report = reconcile(&plan, &execution);
        assert_eq!(report.message, "Successfully moved 1/3 items");
        assert!(report.outcomes[0].alternative_placement);
        assert_eq!(report.outcomes[1].message, "no room");
        assert!(report.outcomes[2].message.contains("connection refused"));
        assert_eq!(report.capacity_after.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn unavailable_bulk_fails_every_move() {
        let plan = plan_of(&[("I1", "C2")]);
        let execution = Execution {
            strategy: ExecutionStrategy::Bulk,
            payload: BackendPayload::Unavailable {
                message: "HTTP 404".to_string(),
            },
            capacity_after: None,
        };

        let report = reconcile(&plan, &execution);
        assert!(!report.success);
        assert_eq!(report.outcomes[0].message, "Bulk placement unavailable: HTTP 404");
    }

    #[test]
    fn terminal_reports() {
        let report = RearrangementReport::no_rearrangement_needed();
        assert!(report.success);
        assert_eq!(report.message, "No rearrangement needed");
        assert!(report.outcomes.is_empty());

        let report = RearrangementReport::nothing_admissible(vec![RejectedMovement {
            item_id: "I1".to_string(),
            to_container_id: Some("C1".to_string()),
            reason: RejectionReason::ContainerFull { available_space: 0 },
            message: "full".to_string(),
        }]);
        assert!(!report.success);
        assert_eq!(
            report.message,
            "No executable moves: all 1 suggested destinations lack free space"
        );
        assert_eq!(report.rejected.len(), 1);
    }
}
