//! Capacity snapshot used for admission control.
//!
//! The snapshot is rebuilt at the start of every cycle from the inventory
//! read. A failed read yields an empty snapshot, which downstream means "no
//! constraint information" and admits every destination.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::backend::StowageBackend;
use crate::wire::{lenient_count, lenient_id, lenient_text};

/// Occupancy of one container.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ContainerCapacity {
    pub container_id: String,
    pub zone: Option<String>,
    pub capacity: u32,
    pub occupied_count: u32,
    /// `capacity - occupied_count`; zero or negative means full.
    pub available_space: i64,
}

impl ContainerCapacity {
    pub fn new(
        container_id: impl Into<String>,
        zone: Option<String>,
        capacity: u32,
        occupied_count: u32,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            zone,
            capacity,
            occupied_count,
            available_space: i64::from(capacity) - i64::from(occupied_count),
        }
    }

    pub fn has_space(&self) -> bool {
        self.available_space > 0
    }
}

#[derive(Deserialize)]
struct InventoryResponse {
    #[serde(default)]
    containers: Vec<Value>,
}

#[derive(Deserialize)]
struct InventoryContainer {
    #[serde(default, alias = "container_id", deserialize_with = "lenient_id")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    capacity: Option<u32>,
    #[serde(default, alias = "occupied_count", deserialize_with = "lenient_count")]
    total_items: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    zone: Option<String>,
}

/// Per-container occupancy keyed by container id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapacitySnapshot {
    entries: HashMap<String, ContainerCapacity>,
}

impl CapacitySnapshot {
    /// Builds a snapshot from an inventory body.
    ///
    /// Missing capacities fall back to `fallback_capacity`, missing occupancy to 0.
    /// Entries without an id, or that are not objects, are skipped on their own.
    /// A body of the wrong shape yields `None`.
    pub fn from_inventory(body: Value, fallback_capacity: u32) -> Option<Self> {
        let inventory: InventoryResponse = serde_json::from_value(body).ok()?;
        let entries = inventory
            .containers
            .into_iter()
            .filter_map(|raw| {
                let raw: InventoryContainer = match serde_json::from_value(raw) {
                    Ok(raw) => raw,
                    Err(err) => {
                        debug!(%err, "skipping malformed inventory entry");
                        return None;
                    }
                };
                let id = raw.id?;
                let entry = ContainerCapacity::new(
                    id.clone(),
                    raw.zone,
                    raw.capacity.unwrap_or(fallback_capacity),
                    raw.total_items.unwrap_or(0),
                );
                Some((id, entry))
            })
            .collect();
        Some(Self { entries })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ContainerCapacity>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.container_id.clone(), entry))
                .collect(),
        }
    }

    pub fn get(&self, container_id: &str) -> Option<&ContainerCapacity> {
        self.entries.get(container_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Containers sorted by id, for stable API output.
    pub fn containers(&self) -> Vec<ContainerCapacity> {
        let mut containers: Vec<_> = self.entries.values().cloned().collect();
        containers.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        containers
    }
}

/// Loads capacity snapshots; never fails.
#[derive(Clone, Copy, Debug)]
pub struct CapacityLoader {
    fallback_capacity: u32,
}

impl CapacityLoader {
    pub fn new(fallback_capacity: u32) -> Self {
        Self { fallback_capacity }
    }

    /// Snapshot for admission control. Empty on any failure.
    pub async fn load(&self, backend: &dyn StowageBackend) -> CapacitySnapshot {
        self.fetch(backend, None).await.unwrap_or_default()
    }

    /// Cache-busting re-read after execution. `None` on any failure.
    pub async fn refresh(&self, backend: &dyn StowageBackend) -> Option<CapacitySnapshot> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        self.fetch(backend, Some(stamp)).await
    }

    async fn fetch(
        &self,
        backend: &dyn StowageBackend,
        cache_bust: Option<u128>,
    ) -> Option<CapacitySnapshot> {
        let body = match backend.containers(cache_bust).await {
            Ok(body) => body,
            Err(err) => {
                warn!("⚠️ Inventory read failed, continuing without capacity data: {err}");
                return None;
            }
        };

        match CapacitySnapshot::from_inventory(body, self.fallback_capacity) {
            Some(snapshot) => {
                debug!(containers = snapshot.len(), "capacity snapshot loaded");
                Some(snapshot)
            }
            None => {
                warn!("⚠️ Inventory response has an unexpected shape, ignoring capacity data");
                None
            }
        }
    }
}
