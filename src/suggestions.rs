//! Suggestion fetching and normalization.
//!
//! The backend answers rearrangement queries in one of two incompatible
//! shapes. The primary endpoint returns `movements`; the legacy endpoint
//! returns either `suggested_moves` (candidate destination lists) or an
//! already canonical `rearrangement_plan`. Both are decoded through one
//! untagged union selected by structure and converted by pure adapters into
//! [`CanonicalMovement`], so nothing downstream knows which shape arrived.

use serde::{Deserialize, Serialize};
use serde_json::Value;
#[allow(unused_imports)]
use serde_json::json;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::backend::{BackendError, StowageBackend};
use crate::model::{Destination, SuggestionParams};
use crate::wire::{bool_from_value, lenient_first_id, lenient_id, lenient_text};

/// Rationale used when the backend gives none.
pub const DEFAULT_RATIONALE: &str = "Container optimization";

/// Terminal message when no provider has anything to suggest.
pub const NO_REARRANGEMENT_NEEDED: &str = "No rearrangement needed";

/// The single normalized movement shape.
///
/// Only the shape adapters construct it; fields are read through accessors.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[schema(
    example = json!({
        "item_id": "I1",
        "item_name": "Food Packet",
        "from_container_id": "C1",
        "to_container_id": "C2",
        "rationale": "Free space in the crew quarters"
    })
)]
pub struct CanonicalMovement {
    item_id: String,
    item_name: String,
    from_container_id: Option<String>,
    #[schema(value_type = Option<String>)]
    to_container_id: Destination,
    rationale: String,
}

impl CanonicalMovement {
    fn normalized(
        item_id: String,
        item_name: Option<String>,
        from_container_id: Option<String>,
        to_container_id: Destination,
        rationale: Option<String>,
    ) -> Self {
        Self {
            item_name: item_name.unwrap_or_else(|| item_id.clone()),
            item_id,
            from_container_id,
            to_container_id,
            rationale: rationale.unwrap_or_else(|| DEFAULT_RATIONALE.to_string()),
        }
    }

    /// Adapter for primary (and legacy `rearrangement_plan`) entries.
    pub fn from_primary(raw: PrimaryMovement) -> Option<Self> {
        let item_id = raw.item_id?;
        Some(Self::normalized(
            item_id,
            raw.item_name,
            raw.from_container_id,
            Destination::from_candidate(raw.to_container_id),
            raw.description,
        ))
    }

    /// Adapter for legacy `suggested_moves` entries: the first candidate wins,
    /// an empty list or an unusable first candidate becomes [`Destination::Unknown`].
    pub fn from_legacy(raw: LegacyMove) -> Option<Self> {
        let item_id = raw.item_id?;
        Some(Self::normalized(
            item_id,
            raw.item_name,
            raw.from_container,
            Destination::from_candidate(raw.suggested_containers),
            raw.reason,
        ))
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn from_container_id(&self) -> Option<&str> {
        self.from_container_id.as_deref()
    }

    pub fn destination(&self) -> &Destination {
        &self.to_container_id
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }
}

/// Primary endpoint movement entry.
#[derive(Debug, Deserialize)]
pub struct PrimaryMovement {
    #[serde(default, deserialize_with = "lenient_id")]
    item_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    item_name: Option<String>,
    #[serde(default, alias = "from_container", deserialize_with = "lenient_id")]
    from_container_id: Option<String>,
    #[serde(default, alias = "to_container", deserialize_with = "lenient_id")]
    to_container_id: Option<String>,
    #[serde(
        default,
        alias = "rationale",
        alias = "reason",
        deserialize_with = "lenient_text"
    )]
    description: Option<String>,
}

/// Legacy endpoint `suggested_moves` entry.
#[derive(Debug, Deserialize)]
pub struct LegacyMove {
    #[serde(default, deserialize_with = "lenient_id")]
    item_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    item_name: Option<String>,
    #[serde(default, alias = "from_container_id", deserialize_with = "lenient_id")]
    from_container: Option<String>,
    #[serde(default, deserialize_with = "lenient_first_id")]
    suggested_containers: Option<String>,
    #[serde(default, alias = "description", deserialize_with = "lenient_text")]
    reason: Option<String>,
}

/// Every suggestion body shape the backend is known to produce.
///
/// The variant is picked by its list key; entries are decoded one by one so a
/// malformed entry only costs itself.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SuggestionPayload {
    Primary { movements: Vec<Value> },
    LegacyMoves { suggested_moves: Vec<Value> },
    LegacyPlan { rearrangement_plan: Vec<Value> },
}

fn decode_entries<T, F>(entries: Vec<Value>, adapt: F) -> (Vec<CanonicalMovement>, usize)
where
    T: serde::de::DeserializeOwned,
    F: Fn(T) -> Option<CanonicalMovement>,
{
    let total = entries.len();
    let movements: Vec<_> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<T>(entry).ok().and_then(&adapt))
        .collect();
    let skipped = total - movements.len();
    (movements, skipped)
}

impl SuggestionPayload {
    /// Normalizes every entry; returns the movements and how many entries
    /// were skipped for being malformed or lacking an item id.
    pub fn into_movements(self) -> (Vec<CanonicalMovement>, usize) {
        match self {
            SuggestionPayload::Primary { movements } | SuggestionPayload::LegacyPlan {
                rearrangement_plan: movements,
            } => decode_entries(movements, CanonicalMovement::from_primary),
            SuggestionPayload::LegacyMoves { suggested_moves } => {
                decode_entries(suggested_moves, CanonicalMovement::from_legacy)
            }
        }
    }
}

/// Which provider the final suggestion list came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    Primary,
    Legacy,
    None,
}

/// One entry of the provider chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuggestionProvider {
    Primary,
    Legacy,
}

impl SuggestionProvider {
    /// Providers in the order they are tried.
    pub const CHAIN: [SuggestionProvider; 2] =
        [SuggestionProvider::Primary, SuggestionProvider::Legacy];

    pub fn source(self) -> SuggestionSource {
        match self {
            SuggestionProvider::Primary => SuggestionSource::Primary,
            SuggestionProvider::Legacy => SuggestionSource::Legacy,
        }
    }

    fn label(self) -> &'static str {
        match self {
            SuggestionProvider::Primary => "primary",
            SuggestionProvider::Legacy => "legacy",
        }
    }

    async fn request(
        self,
        backend: &dyn StowageBackend,
        params: &SuggestionParams,
    ) -> Result<Value, BackendError> {
        match self {
            SuggestionProvider::Primary => backend.primary_suggestions(params).await,
            SuggestionProvider::Legacy => backend.legacy_suggestions(params).await,
        }
    }
}

/// Result of one fetch: possibly empty, never an error.
#[derive(Clone, Debug, PartialEq)]
pub struct SuggestionSet {
    pub source: SuggestionSource,
    pub movements: Vec<CanonicalMovement>,
    pub message: String,
    pub diagnostics: Vec<String>,
}

impl SuggestionSet {
    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }
}

/// Interprets one provider body. `Err` carries the reason to try the next provider.
fn interpret(
    provider: SuggestionProvider,
    body: Value,
    diagnostics: &mut Vec<String>,
) -> Result<Vec<CanonicalMovement>, String> {
    let label = provider.label();
    if body.get("success").and_then(bool_from_value) == Some(false) {
        let detail = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        return Err(format!("{label} endpoint reported failure: {detail}"));
    }

    let payload: SuggestionPayload = serde_json::from_value(body)
        .map_err(|_| format!("{label} endpoint returned an unrecognized suggestion shape"))?;

    let (movements, skipped) = payload.into_movements();
    if skipped > 0 {
        diagnostics.push(format!(
            "{label} endpoint: skipped {skipped} malformed or id-less suggestion(s)"
        ));
    }
    if movements.is_empty() {
        return Err(format!("{label} endpoint returned no movements"));
    }
    Ok(movements)
}

/// Fetches suggestions through the default provider chain.
pub async fn fetch_suggestions(
    backend: &dyn StowageBackend,
    params: &SuggestionParams,
) -> SuggestionSet {
    fetch_from(&SuggestionProvider::CHAIN, backend, params).await
}

/// Tries `providers` in order and stops at the first non-empty, well-formed answer.
pub async fn fetch_from(
    providers: &[SuggestionProvider],
    backend: &dyn StowageBackend,
    params: &SuggestionParams,
) -> SuggestionSet {
    let mut diagnostics = Vec::new();

    for &provider in providers {
        let outcome = match provider.request(backend, params).await {
            Ok(body) => interpret(provider, body, &mut diagnostics),
            Err(err) => Err(err.to_string()),
        };

        match outcome {
            Ok(movements) => {
                info!(
                    "💡 {} suggested movement(s) from the {} endpoint",
                    movements.len(),
                    provider.label()
                );
                return SuggestionSet {
                    source: provider.source(),
                    message: format!(
                        "Found {} suggested movement(s) via the {} endpoint",
                        movements.len(),
                        provider.label()
                    ),
                    movements,
                    diagnostics,
                };
            }
            Err(reason) => {
                if provider == SuggestionProvider::Primary {
                    warn!("⚠️ Falling back from the primary suggestion endpoint: {reason}");
                } else {
                    debug!(provider = provider.label(), %reason, "provider yielded nothing");
                }
                diagnostics.push(reason);
            }
        }
    }

    SuggestionSet {
        source: SuggestionSource::None,
        movements: Vec::new(),
        message: NO_REARRANGEMENT_NEEDED.to_string(),
        diagnostics,
    }
}

#[cfg(test)]
pub(crate) fn movement(item_id: &str, from: &str, to: Option<&str>) -> CanonicalMovement {
    let raw: PrimaryMovement = serde_json::from_value(json!({
        "item_id": item_id,
        "from_container_id": from,
        "to_container_id": to,
    }))
    .expect("primary movement fixture");
    CanonicalMovement::from_primary(raw).expect("fixture has an item id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::routes;
    use crate::testing::{FakeBackend, transport_error};

    fn legacy_entry(value: Value) -> LegacyMove {
        serde_json::from_value(value).expect("legacy fixture")
    }

    #[test]
    fn legacy_entry_takes_first_suggested_container() {
        let canonical = CanonicalMovement::from_legacy(legacy_entry(json!({
            "item_id": "I1",
            "from_container": "C1",
            "suggested_containers": ["C2", "C3"],
            "reason": "R"
        })))
        .unwrap();

        assert_eq!(
            serde_json::to_value(&canonical).unwrap(),
            json!({
                "item_id": "I1",
                "item_name": "I1",
                "from_container_id": "C1",
                "to_container_id": "C2",
                "rationale": "R"
            })
        );
    }

    #[test]
    fn legacy_entry_without_candidates_gets_unknown_destination() {
        let canonical = CanonicalMovement::from_legacy(legacy_entry(json!({
            "item_id": "I7",
            "from_container": "C1",
            "suggested_containers": []
        })))
        .unwrap();

        assert_eq!(canonical.destination(), &Destination::Unknown);
        assert_eq!(canonical.rationale(), DEFAULT_RATIONALE);
    }

    #[test]
    fn unusable_first_candidate_is_not_skipped_over() {
        let canonical = CanonicalMovement::from_legacy(legacy_entry(json!({
            "item_id": "I1",
            "from_container": "C1",
            "suggested_containers": [null, "C3"]
        })))
        .unwrap();

        assert_eq!(canonical.destination(), &Destination::Unknown);
    }

    #[test]
    fn primary_entry_fills_defaults() {
        let raw: PrimaryMovement = serde_json::from_value(json!({
            "item_id": 15,
            "from_container_id": "C1",
            "to_container_id": "C5"
        }))
        .unwrap();
        let canonical = CanonicalMovement::from_primary(raw).unwrap();

        assert_eq!(canonical.item_id(), "15");
        assert_eq!(canonical.item_name(), "15");
        assert_eq!(canonical.from_container_id(), Some("C1"));
        assert_eq!(canonical.destination(), &Destination::Container("C5".into()));
        assert_eq!(canonical.rationale(), DEFAULT_RATIONALE);
    }

    #[test]
    fn payload_shape_is_selected_by_structure() {
        let primary: SuggestionPayload = serde_json::from_value(json!({
            "movements": [{"item_id": "I1", "to_container_id": "C2", "description": "d"}],
            "disorganized_containers": ["C1"]
        }))
        .unwrap();
        assert!(matches!(primary, SuggestionPayload::Primary { .. }));

        let legacy: SuggestionPayload = serde_json::from_value(json!({
            "suggested_moves": [{"item_id": "I1", "suggested_containers": ["C2"]}]
        }))
        .unwrap();
        assert!(matches!(legacy, SuggestionPayload::LegacyMoves { .. }));

        let plan: SuggestionPayload = serde_json::from_value(json!({
            "rearrangement_plan": [{"item_id": "I1", "to_container_id": "C2"}]
        }))
        .unwrap();
        assert!(matches!(plan, SuggestionPayload::LegacyPlan { .. }));

        assert!(serde_json::from_value::<SuggestionPayload>(json!({"items": []})).is_err());
    }

    #[test]
    fn entries_without_item_id_are_counted_as_skipped() {
        let payload: SuggestionPayload = serde_json::from_value(json!({
            "movements": [
                {"item_id": "I1", "to_container_id": "C2"},
                {"to_container_id": "C3"}
            ]
        }))
        .unwrap();
        let (movements, skipped) = payload.into_movements();
        assert_eq!(movements.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn malformed_entries_only_cost_themselves() {
        let payload: SuggestionPayload = serde_json::from_value(json!({
            "movements": [
                {"item_id": "I1", "from_container_id": "C1", "to_container_id": "C2"},
                "garbage",
                [1, 2]
            ]
        }))
        .unwrap();
        let (movements, skipped) = payload.into_movements();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].item_id(), "I1");
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn garbage_entry_keeps_primary_movements() {
        let backend = FakeBackend::new().with_primary(Ok(json!({
            "movements": [
                {"item_id": "I1", "from_container_id": "C1", "to_container_id": "C2"},
                "garbage"
            ]
        })));

        let set = fetch_suggestions(&backend, &SuggestionParams::default()).await;
        assert_eq!(set.source, SuggestionSource::Primary);
        assert_eq!(set.movements.len(), 1);
        assert_eq!(
            set.diagnostics,
            vec!["primary endpoint: skipped 1 malformed or id-less suggestion(s)"]
        );
        assert_eq!(backend.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn primary_answer_short_circuits_the_chain() {
        let backend = FakeBackend::new().with_primary(Ok(json!({
            "movements": [{"item_id": "I1", "from_container_id": "C1", "to_container_id": "C2"}]
        })));

        let set = fetch_suggestions(&backend, &SuggestionParams::default()).await;
        assert_eq!(set.source, SuggestionSource::Primary);
        assert_eq!(set.movements.len(), 1);
        assert!(set.diagnostics.is_empty());
        assert_eq!(backend.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn falls_back_to_legacy_when_primary_fails() {
        let backend = FakeBackend::new()
            .with_primary(Err(transport_error(routes::PRIMARY_SUGGESTIONS)))
            .with_legacy(Ok(json!({
                "suggested_moves": [{
                    "item_id": "I1",
                    "from_container": "C1",
                    "suggested_containers": ["C2", "C3"],
                    "reason": "R"
                }]
            })));

        let set = fetch_suggestions(&backend, &SuggestionParams::default()).await;
        assert_eq!(set.source, SuggestionSource::Legacy);
        assert_eq!(set.movements[0].destination(), &Destination::Container("C2".into()));
        assert_eq!(set.diagnostics.len(), 1);
        assert!(set.diagnostics[0].contains(routes::PRIMARY_SUGGESTIONS));
        assert_eq!(backend.calls(), vec!["primary", "legacy"]);
    }

    #[tokio::test]
    async fn empty_primary_answer_also_falls_back() {
        let backend = FakeBackend::new()
            .with_primary(Ok(json!({"movements": [], "disorganized_containers": []})))
            .with_legacy(Ok(json!({
                "rearrangement_plan": [{"item_id": "I4", "from_container_id": "C1", "to_container_id": "C3"}]
            })));

        let set = fetch_suggestions(&backend, &SuggestionParams::default()).await;
        assert_eq!(set.source, SuggestionSource::Legacy);
        assert_eq!(set.movements[0].item_id(), "I4");
        assert_eq!(set.diagnostics, vec!["primary endpoint returned no movements"]);
    }

    #[tokio::test]
    async fn success_false_body_is_not_accepted() {
        let backend = FakeBackend::new()
            .with_primary(Ok(json!({
                "success": false,
                "message": "engine busy",
                "movements": [{"item_id": "I1", "to_container_id": "C2"}]
            })))
            .with_legacy(Ok(json!({"suggested_moves": []})));

        let set = fetch_suggestions(&backend, &SuggestionParams::default()).await;
        assert_eq!(set.source, SuggestionSource::None);
        assert!(set.diagnostics[0].contains("engine busy"));
    }

    #[tokio::test]
    async fn nothing_from_either_provider_means_no_rearrangement_needed() {
        let backend = FakeBackend::new()
            .with_primary(Ok(json!({"movements": []})))
            .with_legacy(Err(transport_error(routes::LEGACY_SUGGESTIONS)));

        let set = fetch_suggestions(&backend, &SuggestionParams::default()).await;
        assert!(set.is_empty());
        assert_eq!(set.source, SuggestionSource::None);
        assert_eq!(set.message, NO_REARRANGEMENT_NEEDED);
        assert_eq!(set.diagnostics.len(), 2);
    }

    #[tokio::test]
    async fn repeated_fetches_are_identical() {
        let backend = FakeBackend::new().with_primary(Ok(json!({
            "movements": [
                {"item_id": "I1", "item_name": "Wrench", "from_container_id": "C1", "to_container_id": "C2"},
                {"item_id": "I2", "from_container_id": "C1", "to_container_id": "C3", "description": "balance"}
            ],
            "generated_at": "2026-10-18T10:00:00Z"
        })));

        let params = SuggestionParams::default();
        let first = fetch_suggestions(&backend, &params).await;
        let second = fetch_suggestions(&backend, &params).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn custom_chain_only_queries_listed_providers() {
        let backend = FakeBackend::new();
        let set = fetch_from(
            &[SuggestionProvider::Legacy],
            &backend,
            &SuggestionParams::default(),
        )
        .await;
        assert!(set.is_empty());
        assert_eq!(backend.calls(), vec!["legacy"]);
    }
}
