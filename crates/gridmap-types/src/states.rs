// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridMap.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Live entity state snapshot from `get_states`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::registry::Entity;

/// One entry of the `get_states` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    pub state: Option<String>,
    pub attributes: Map<String, Value>,
}

/// Snapshot of live entity states, keyed by entity_id.
///
/// The hub reports missing values as the strings `"unknown"` and
/// `"unavailable"`; [`StateSnapshot::value`] normalizes those (and empty
/// strings) to `None`.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    by_entity: HashMap<String, EntityState>,
}

fn is_absent(value: &str) -> bool {
    matches!(value, "" | "unknown" | "unavailable")
}

impl StateSnapshot {
    /// Build a snapshot from raw `get_states` entries. Entries without an
    /// `entity_id` are ignored.
    pub fn from_raw(raw: &[Value]) -> Self {
        let mut by_entity = HashMap::new();
        for entry in raw {
            let Some(entity_id) = entry.get("entity_id").and_then(Value::as_str) else {
                continue;
            };
            let state = entry.get("state").and_then(Value::as_str).map(str::to_owned);
            let attributes = entry
                .get("attributes")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            by_entity.insert(entity_id.to_owned(), EntityState { state, attributes });
        }
        Self { by_entity }
    }

    pub fn insert(&mut self, entity_id: impl Into<String>, state: EntityState) {
        self.by_entity.insert(entity_id.into(), state);
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.by_entity.contains_key(entity_id)
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.by_entity.get(entity_id)
    }

    /// Present state value for an entity, or `None` when the entity is
    /// missing or reports unknown/unavailable/empty.
    pub fn value(&self, entity_id: &str) -> Option<&str> {
        self.by_entity
            .get(entity_id)?
            .state
            .as_deref()
            .filter(|state| !is_absent(state))
    }

    /// Present string attribute for an entity, with the same absence
    /// normalization as [`StateSnapshot::value`].
    pub fn attr(&self, entity_id: &str, name: &str) -> Option<String> {
        let value = self.by_entity.get(entity_id)?.attributes.get(name)?;
        let text = match value {
            Value::String(text) => text.clone(),
            Value::Null => return None,
            other => other.to_string(),
        };
        if is_absent(&text) { None } else { Some(text) }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityState)> {
        self.by_entity
            .iter()
            .map(|(entity_id, state)| (entity_id.as_str(), state))
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}

/// Populate `device_class`, `state_class`, and unit from entity states.
///
/// The entity registry does NOT include these; they are runtime properties
/// only present in state attributes. Call after fetching both the registry
/// and the states snapshot.
pub fn enrich_entities_from_states(entities: &mut [Entity], states: &StateSnapshot) {
    for entity in entities.iter_mut() {
        let Some(state) = states.get(&entity.entity_id) else {
            continue;
        };
        let attr = |name: &str| {
            state
                .attributes
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        if entity.device_class.is_none() {
            entity.device_class = attr("device_class");
        }
        if entity.state_class.is_none() {
            entity.state_class = attr("state_class");
        }
        if entity.unit_of_measurement.is_none() {
            entity.unit_of_measurement = attr("unit_of_measurement");
        }
    }
}
