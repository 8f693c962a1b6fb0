//! Rearrangement cycle orchestration.
//!
//! One cycle walks `Idle → LoadingCapacity → FetchingSuggestions → Filtering
//! → Ready → Executing → Reconciling → Done`. Preview cycles stop after
//! `Ready`. Every cycle gets a token from a shared [`CycleSequencer`]; a
//! result whose token is no longer the latest is flagged as superseded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::admission::{RejectedMovement, admit, nothing_admissible_message};
use crate::backend::StowageBackend;
use crate::capacity::{CapacityLoader, CapacitySnapshot, ContainerCapacity};
use crate::executor::PlanExecutor;
use crate::model::{ExecutionMode, SuggestionParams};
use crate::plan::{PlannedMove, RearrangementPlan, build_plan};
use crate::reconcile::{RearrangementReport, reconcile};
use crate::suggestions::{SuggestionSource, fetch_suggestions};

/// Settings shared by every cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Capacity assumed for containers the inventory does not size
    pub fallback_capacity: u32,
    /// Default strategy; requests may override it
    pub execution_mode: ExecutionMode,
    /// Re-read the inventory after executing
    pub refresh_after_execute: bool,
    /// `userId` sent with single placements
    pub user_id: String,
    /// Suggestion parameters used when a request omits them
    pub default_params: SuggestionParams,
}

impl PipelineSettings {
    pub const DEFAULT_FALLBACK_CAPACITY: u32 = 10;
    pub const DEFAULT_REFRESH_AFTER_EXECUTE: bool = true;
    pub const DEFAULT_USER_ID: &'static str = "system";

    pub fn builder() -> PipelineSettingsBuilder {
        PipelineSettingsBuilder::default()
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fallback_capacity: Self::DEFAULT_FALLBACK_CAPACITY,
            execution_mode: ExecutionMode::default(),
            refresh_after_execute: Self::DEFAULT_REFRESH_AFTER_EXECUTE,
            user_id: Self::DEFAULT_USER_ID.to_string(),
            default_params: SuggestionParams::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineSettingsBuilder {
    settings: PipelineSettings,
}

impl PipelineSettingsBuilder {
    pub fn fallback_capacity(mut self, capacity: u32) -> Self {
        self.settings.fallback_capacity = capacity;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.settings.execution_mode = mode;
        self
    }

    pub fn refresh_after_execute(mut self, enabled: bool) -> Self {
        self.settings.refresh_after_execute = enabled;
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.settings.user_id = user_id.into();
        self
    }

    pub fn default_params(mut self, params: SuggestionParams) -> Self {
        self.settings.default_params = params;
        self
    }

    pub fn build(self) -> PipelineSettings {
        self.settings
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    LoadingCapacity,
    FetchingSuggestions,
    Filtering,
    Ready,
    Executing,
    Reconciling,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleAction {
    /// Fetch and filter only.
    Preview,
    /// Fetch, filter and execute.
    Execute,
}

/// Issues monotonically increasing cycle tokens.
#[derive(Debug, Default)]
pub struct CycleSequencer {
    latest: AtomicU64,
}

impl CycleSequencer {
    pub fn issue(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True while no newer token has been issued.
    pub fn is_current(&self, token: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == token
    }
}

/// Preview result: the plan that would be executed.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct SuggestionsView {
    pub cycle: u64,
    pub superseded: bool,
    pub source: SuggestionSource,
    #[schema(value_type = Vec<PlannedMove>)]
    pub plan: RearrangementPlan,
    pub rejected: Vec<RejectedMovement>,
    pub message: String,
    pub diagnostics: Vec<String>,
    /// Snapshot used for admission control
    pub capacity: Vec<ContainerCapacity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CycleResult {
    Suggestions(SuggestionsView),
    Report(RearrangementReport),
}

impl CycleResult {
    pub fn cycle(&self) -> u64 {
        match self {
            CycleResult::Suggestions(view) => view.cycle,
            CycleResult::Report(report) => report.cycle,
        }
    }

    pub fn superseded(&self) -> bool {
        match self {
            CycleResult::Suggestions(view) => view.superseded,
            CycleResult::Report(report) => report.superseded,
        }
    }

    fn stamp(&mut self, cycle: u64, superseded: bool) {
        match self {
            CycleResult::Suggestions(view) => {
                view.cycle = cycle;
                view.superseded = superseded;
            }
            CycleResult::Report(report) => {
                report.cycle = cycle;
                report.superseded = superseded;
            }
        }
    }
}

/// Progress notification, streamed to SSE clients.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEvent {
    StateChanged { cycle: u64, state: CycleState },
    Finished { cycle: u64, result: CycleResult },
}

struct CycleTracker<'o, F> {
    cycle: u64,
    state: CycleState,
    observer: &'o mut F,
}

impl<F: FnMut(&CycleEvent)> CycleTracker<'_, F> {
    fn enter(&mut self, state: CycleState) {
        debug!(cycle = self.cycle, from = ?self.state, to = ?state, "cycle state changed");
        self.state = state;
        (self.observer)(&CycleEvent::StateChanged {
            cycle: self.cycle,
            state,
        });
    }
}

/// Runs rearrangement cycles against one backend.
#[derive(Clone)]
pub struct RearrangementPipeline {
    backend: Arc<dyn StowageBackend>,
    settings: PipelineSettings,
    sequencer: Arc<CycleSequencer>,
}

impl RearrangementPipeline {
    pub fn new(backend: Arc<dyn StowageBackend>, settings: PipelineSettings) -> Self {
        Self {
            backend,
            settings,
            sequencer: Arc::new(CycleSequencer::default()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Current capacity view, outside of any cycle.
    pub async fn capacity_snapshot(&self) -> CapacitySnapshot {
        CapacityLoader::new(self.settings.fallback_capacity)
            .load(self.backend.as_ref())
            .await
    }

    /// Runs one cycle. `mode` overrides the configured execution mode.
    pub async fn run_cycle<F>(
        &self,
        action: CycleAction,
        params: SuggestionParams,
        mode: Option<ExecutionMode>,
        mut observer: F,
    ) -> CycleResult
    where
        F: FnMut(&CycleEvent) + Send,
    {
        let cycle = self.sequencer.issue();
        info!("🔄 Cycle {} started ({:?})", cycle, action);

        let mut tracker = CycleTracker {
            cycle,
            state: CycleState::Idle,
            observer: &mut observer,
        };
        let mut result = self.drive(&mut tracker, action, params, mode).await;
        tracker.enter(CycleState::Done);

        let superseded = !self.sequencer.is_current(cycle);
        if superseded {
            info!("⏭️ Cycle {} was superseded by a newer cycle", cycle);
        }
        result.stamp(cycle, superseded);
        observer(&CycleEvent::Finished {
            cycle,
            result: result.clone(),
        });
        result
    }

    async fn drive<F: FnMut(&CycleEvent)>(
        &self,
        tracker: &mut CycleTracker<'_, F>,
        action: CycleAction,
        params: SuggestionParams,
        mode: Option<ExecutionMode>,
    ) -> CycleResult {
        let backend = self.backend.as_ref();
        let loader = CapacityLoader::new(self.settings.fallback_capacity);

        tracker.enter(CycleState::LoadingCapacity);
        let snapshot = loader.load(backend).await;
        if snapshot.is_empty() {
            debug!(cycle = tracker.cycle, "no capacity data, admitting every destination");
        }

        tracker.enter(CycleState::FetchingSuggestions);
        let suggestions = fetch_suggestions(backend, &params).await;
        if suggestions.is_empty() {
            info!("✅ {}", suggestions.message);
            return match action {
                CycleAction::Preview => CycleResult::Suggestions(SuggestionsView {
                    cycle: tracker.cycle,
                    superseded: false,
                    source: suggestions.source,
                    plan: RearrangementPlan::default(),
                    rejected: Vec::new(),
                    message: suggestions.message,
                    diagnostics: suggestions.diagnostics,
                    capacity: snapshot.containers(),
                }),
                CycleAction::Execute => CycleResult::Report(RearrangementReport {
                    diagnostics: suggestions.diagnostics,
                    ..RearrangementReport::no_rearrangement_needed()
                }),
            };
        }

        tracker.enter(CycleState::Filtering);
        let suggested = suggestions.movements.len();
        let admission = admit(suggestions.movements, &snapshot);
        let plan = build_plan(admission.admitted);
        info!(
            "🧮 {} of {} suggested movement(s) admitted",
            plan.len(),
            suggested
        );

        tracker.enter(CycleState::Ready);
        if action == CycleAction::Preview {
            let message = if plan.is_empty() {
                nothing_admissible_message(&admission.rejected)
            } else {
                suggestions.message
            };
            return CycleResult::Suggestions(SuggestionsView {
                cycle: tracker.cycle,
                superseded: false,
                source: suggestions.source,
                plan,
                rejected: admission.rejected,
                message,
                diagnostics: suggestions.diagnostics,
                capacity: snapshot.containers(),
            });
        }

        if plan.is_empty() {
            info!("⛔ Every suggested movement was rejected, skipping execution");
            return CycleResult::Report(RearrangementReport {
                diagnostics: suggestions.diagnostics,
                ..RearrangementReport::nothing_admissible(admission.rejected)
            });
        }

        tracker.enter(CycleState::Executing);
        let execution = PlanExecutor::new(
            backend,
            mode.unwrap_or(self.settings.execution_mode),
            &self.settings.user_id,
            loader,
            self.settings.refresh_after_execute,
        )
        .execute(&plan)
        .await;

        tracker.enter(CycleState::Reconciling);
        let mut report = reconcile(&plan, &execution);
        report.rejected = admission.rejected;
        report.diagnostics = suggestions.diagnostics;
        CycleResult::Report(report)
    }
}
