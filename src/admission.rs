//! Admission control for candidate movements.
//!
//! Drops moves that are certain to fail before anything is written: moves
//! into containers the snapshot reports as full, and moves without a known
//! destination. Containers missing from the snapshot are admitted
//! optimistically; the backend validates them at placement time.

use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::capacity::CapacitySnapshot;
use crate::suggestions::CanonicalMovement;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectionReason {
    UnknownDestination,
    ContainerFull { available_space: i64 },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::UnknownDestination => {
                write!(f, "No destination container was suggested")
            }
            RejectionReason::ContainerFull { available_space } => write!(
                f,
                "Destination has no free space (available: {})",
                available_space
            ),
        }
    }
}

/// A movement that did not pass admission control.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct RejectedMovement {
    pub item_id: String,
    pub to_container_id: Option<String>,
    pub reason: RejectionReason,
    pub message: String,
}

impl RejectedMovement {
    fn new(movement: &CanonicalMovement, reason: RejectionReason) -> Self {
        Self {
            item_id: movement.item_id().to_string(),
            to_container_id: movement.destination().container_id().map(str::to_string),
            message: reason.to_string(),
            reason,
        }
    }
}

/// Explains why nothing is left to execute, by rejection reason.
pub fn nothing_admissible_message(rejected: &[RejectedMovement]) -> String {
    let total = rejected.len();
    let full = rejected
        .iter()
        .filter(|r| matches!(r.reason, RejectionReason::ContainerFull { .. }))
        .count();
    let unknown = total - full;

    if unknown == 0 {
        format!("No executable moves: all {total} suggested destinations lack free space")
    } else if full == 0 {
        format!("No executable moves: none of the {total} suggested movements names a destination")
    } else {
        format!(
            "No executable moves: all {total} suggested movements were rejected \
             ({full} into full containers, {unknown} without a destination)"
        )
    }
}

/// Admitted movements in source order, plus what was dropped and why.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Admission {
    pub admitted: Vec<CanonicalMovement>,
    pub rejected: Vec<RejectedMovement>,
}

fn check(movement: &CanonicalMovement, snapshot: &CapacitySnapshot) -> Option<RejectionReason> {
    let Some(container_id) = movement.destination().container_id() else {
        return Some(RejectionReason::UnknownDestination);
    };
    match snapshot.get(container_id) {
        Some(entry) if !entry.has_space() => Some(RejectionReason::ContainerFull {
            available_space: entry.available_space,
        }),
        _ => None,
    }
}

/// Splits `movements` into admitted and rejected, preserving order.
pub fn admit(movements: Vec<CanonicalMovement>, snapshot: &CapacitySnapshot) -> Admission {
    let mut admission = Admission::default();
    for movement in movements {
        match check(&movement, snapshot) {
            None => admission.admitted.push(movement),
            Some(reason) => {
                debug!(
                    item = movement.item_id(),
                    to = %movement.destination(),
                    %reason,
                    "movement rejected"
                );
                admission
                    .rejected
                    .push(RejectedMovement::new(&movement, reason));
            }
        }
    }
    admission
}
