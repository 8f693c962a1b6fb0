//! Plan execution against the placement backend.
//!
//! Submits a plan either as one bulk request or as one single-placement call
//! per move. Sequential calls are awaited one at a time in plan order, since
//! each placement changes the occupancy later moves depend on. The executor
//! only transports; interpreting the answers is left to the reconciler.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    BackendError, BulkPlacementItem, BulkPlacementRequest, PlacementRequest, StowageBackend,
};
use crate::capacity::{CapacityLoader, CapacitySnapshot};
use crate::model::{ExecutionMode, ExecutionStrategy};
use crate::plan::RearrangementPlan;

/// Raw answer of a single-placement call.
#[derive(Clone, Debug, PartialEq)]
pub struct SequentialStep {
    pub item_id: String,
    pub response: Result<Value, BackendError>,
}

/// Whatever the backend returned for a plan.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendPayload {
    /// Body of a structurally sound bulk response.
    Bulk(Value),
    /// One step per planned move, in plan order.
    Sequential(Vec<SequentialStep>),
    /// Bulk-only mode and the bulk call failed.
    Unavailable { message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    pub strategy: ExecutionStrategy,
    pub payload: BackendPayload,
    /// Post-execution snapshot, when the refresh ran and succeeded.
    pub capacity_after: Option<CapacitySnapshot>,
}

pub struct PlanExecutor<'a> {
    backend: &'a dyn StowageBackend,
    mode: ExecutionMode,
    user_id: &'a str,
    loader: CapacityLoader,
    refresh_after_execute: bool,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(
        backend: &'a dyn StowageBackend,
        mode: ExecutionMode,
        user_id: &'a str,
        loader: CapacityLoader,
        refresh_after_execute: bool,
    ) -> Self {
        Self {
            backend,
            mode,
            user_id,
            loader,
            refresh_after_execute,
        }
    }

    /// Runs the plan and, if enabled, refreshes the capacity view afterwards.
    #[instrument(skip(self, plan), fields(moves = plan.len(), mode = ?self.mode))]
    pub async fn execute(&self, plan: &RearrangementPlan) -> Execution {
        if plan.is_empty() {
            return Execution {
                strategy: ExecutionStrategy::Sequential,
                payload: BackendPayload::Sequential(Vec::new()),
                capacity_after: None,
            };
        }

        let (strategy, payload) = match self.mode {
            ExecutionMode::Sequential => (
                ExecutionStrategy::Sequential,
                self.run_sequential(plan).await,
            ),
            ExecutionMode::Bulk => match self.submit_bulk(plan).await {
                Ok(body) => (ExecutionStrategy::Bulk, BackendPayload::Bulk(body)),
                Err(message) => {
                    warn!("⚠️ Bulk placement unavailable: {message}");
                    (
                        ExecutionStrategy::Bulk,
                        BackendPayload::Unavailable { message },
                    )
                }
            },
            ExecutionMode::Auto => match self.submit_bulk(plan).await {
                Ok(body) => (ExecutionStrategy::Bulk, BackendPayload::Bulk(body)),
                Err(message) => {
                    warn!("⚠️ Bulk placement failed ({message}), placing items one by one");
                    (
                        ExecutionStrategy::Sequential,
                        self.run_sequential(plan).await,
                    )
                }
            },
        };

        let capacity_after = if self.refresh_after_execute {
            self.loader.refresh(self.backend).await
        } else {
            None
        };

        Execution {
            strategy,
            payload,
            capacity_after,
        }
    }

    async fn submit_bulk(&self, plan: &RearrangementPlan) -> Result<Value, String> {
        let request = BulkPlacementRequest {
            items: plan
                .moves()
                .iter()
                .map(|planned| BulkPlacementItem {
                    id: planned.item_id().to_string(),
                    container_id: planned.to_container_id().to_string(),
                    auto_position: true,
                })
                .collect(),
            rearrangement: true,
        };

        info!("🚚 Submitting {} move(s) as one bulk placement", plan.len());
        match self.backend.place_bulk(&request).await {
            Ok(body) if body.is_object() => Ok(body),
            Ok(_) => Err("bulk endpoint answered with a non-object body".to_string()),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn run_sequential(&self, plan: &RearrangementPlan) -> BackendPayload {
        info!("🚚 Placing {} item(s) sequentially", plan.len());
        let mut steps = Vec::with_capacity(plan.len());
        for planned in plan.moves() {
            let request = PlacementRequest {
                item_id: planned.item_id().to_string(),
                container_id: planned.to_container_id().to_string(),
                position_x: 0.0,
                position_y: 0.0,
                position_z: 0.0,
                user_id: self.user_id.to_string(),
            };
            let response = self.backend.place_item(&request).await;
            debug!(item = planned.item_id(), ok = response.is_ok(), "single placement answered");
            steps.push(SequentialStep {
                item_id: request.item_id,
                response,
            });
        }
        BackendPayload::Sequential(steps)
    }
}
