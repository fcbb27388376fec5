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

//! In-memory models for the Home Assistant device/entity/area registries,
//! plus tolerant parsers over the raw registry records.
//!
//! The registry endpoints return weakly-typed records: identifier pairs may
//! arrive as lists or 2-tuples, and `device_class`/`state_class`/unit exist
//! under both a plain and an `original_*` key depending on HA version.
//! Records missing required fields are skipped with a warning rather than
//! failing the run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A Home Assistant entity from the entity registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub unique_id: String,
    pub platform: String,
    pub device_id: Option<String>,
    pub device_class: Option<String>,
    pub state_class: Option<String>,
    pub unit_of_measurement: Option<String>,
    /// User override name (`None` = use `original_name`).
    pub name: Option<String>,
    pub original_name: Option<String>,
    pub disabled_by: Option<String>,
    pub entity_category: Option<String>,
    pub has_entity_name: bool,
}

impl Entity {
    pub fn is_enabled(&self) -> bool {
        self.disabled_by.is_none()
    }
}

/// A Home Assistant device from the device registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: Option<String>,
    pub name_by_user: Option<String>,
    pub model: Option<String>,
    /// `(domain, local_id)` identifier pairs.
    pub identifiers: Vec<(String, String)>,
    pub via_device_id: Option<String>,
    pub area_id: Option<String>,
    /// Entities attached to this device (populated by the tree builder).
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Device {
    pub fn display_name(&self) -> &str {
        self.name_by_user
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A Home Assistant area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    pub name: String,
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Read a field that exists under either a plain or an `original_*` key.
fn dual_field(raw: &Value, key: &str, fallback: &str) -> Option<String> {
    str_field(raw, key).or_else(|| str_field(raw, fallback))
}

/// Parse one raw device registry record. Returns `None` if the record is
/// missing its `id`.
pub fn parse_device(raw: &Value) -> Option<Device> {
    let id = str_field(raw, "id")?;
    let identifiers = raw
        .get("identifiers")
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| {
                    let pair = pair.as_array()?;
                    if pair.len() != 2 {
                        return None;
                    }
                    Some((pair[0].as_str()?.to_owned(), pair[1].as_str()?.to_owned()))
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Device {
        id,
        name: str_field(raw, "name"),
        name_by_user: str_field(raw, "name_by_user"),
        model: str_field(raw, "model"),
        identifiers,
        via_device_id: str_field(raw, "via_device_id"),
        area_id: str_field(raw, "area_id"),
        entities: Vec::new(),
    })
}

/// Parse one raw entity registry record. Returns `None` if `entity_id` or
/// `unique_id` is missing.
pub fn parse_entity(raw: &Value) -> Option<Entity> {
    let entity_id = str_field(raw, "entity_id")?;
    let unique_id = str_field(raw, "unique_id")?;
    Some(Entity {
        entity_id,
        unique_id,
        platform: str_field(raw, "platform").unwrap_or_default(),
        device_id: str_field(raw, "device_id"),
        device_class: dual_field(raw, "device_class", "original_device_class"),
        state_class: dual_field(raw, "state_class", "original_state_class"),
        unit_of_measurement: dual_field(raw, "unit_of_measurement", "original_unit_of_measurement"),
        name: str_field(raw, "name"),
        original_name: str_field(raw, "original_name"),
        disabled_by: str_field(raw, "disabled_by"),
        entity_category: str_field(raw, "entity_category"),
        has_entity_name: raw
            .get("has_entity_name")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Parse one raw area registry record.
pub fn parse_area(raw: &Value) -> Option<Area> {
    Some(Area {
        area_id: str_field(raw, "area_id")?,
        name: str_field(raw, "name")?,
    })
}

/// Parse a device registry listing, skipping malformed records.
pub fn parse_devices(raw: &[Value]) -> Vec<Device> {
    raw.iter()
        .filter_map(|record| {
            let parsed = parse_device(record);
            if parsed.is_none() {
                warn!("Skipping malformed device registry record: {record}");
            }
            parsed
        })
        .collect()
}

/// Parse an entity registry listing, skipping malformed records.
pub fn parse_entities(raw: &[Value]) -> Vec<Entity> {
    raw.iter()
        .filter_map(|record| {
            let parsed = parse_entity(record);
            if parsed.is_none() {
                warn!("Skipping malformed entity registry record: {record}");
            }
            parsed
        })
        .collect()
}

/// Parse an area registry listing, skipping malformed records.
pub fn parse_areas(raw: &[Value]) -> Vec<Area> {
    raw.iter()
        .filter_map(|record| {
            let parsed = parse_area(record);
            if parsed.is_none() {
                warn!("Skipping malformed area registry record: {record}");
            }
            parsed
        })
        .collect()
}
