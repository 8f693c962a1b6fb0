//! Executable rearrangement plans.

use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::suggestions::CanonicalMovement;

/// A movement that passed admission control and has a known destination.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct PlannedMove {
    #[serde(flatten)]
    movement: CanonicalMovement,
    #[serde(skip)]
    to_container_id: String,
}

impl PlannedMove {
    fn from_admitted(movement: CanonicalMovement) -> Option<Self> {
        let to_container_id = movement.destination().container_id()?.to_string();
        debug!(
            item = movement.item_id(),
            name = movement.item_name(),
            from = movement.from_container_id().unwrap_or("-"),
            to = %to_container_id,
            rationale = movement.rationale(),
            "move planned"
        );
        Some(Self {
            movement,
            to_container_id,
        })
    }

    pub fn item_id(&self) -> &str {
        self.movement.item_id()
    }

    pub fn to_container_id(&self) -> &str {
        &self.to_container_id
    }
}

/// Ordered list of moves, in suggestion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RearrangementPlan {
    moves: Vec<PlannedMove>,
}

impl RearrangementPlan {
    pub fn moves(&self) -> &[PlannedMove] {
        &self.moves
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

/// Turns admitted movements into a plan without reordering them.
pub fn build_plan(admitted: Vec<CanonicalMovement>) -> RearrangementPlan {
    RearrangementPlan {
        moves: admitted
            .into_iter()
            .filter_map(PlannedMove::from_admitted)
            .collect(),
    }
}
