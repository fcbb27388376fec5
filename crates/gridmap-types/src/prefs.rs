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

//! The Energy Dashboard preferences document (`energy/get_prefs` /
//! `energy/save_prefs`).
//!
//! `energy/save_prefs` rejects source objects missing fields the user had
//! configured (stat_cost, cost_adjustment_day, ...), so every recognized
//! object keeps its unrecognized fields in a flattened `extras` map and
//! unrecognized source types ride through as raw JSON. Unknown top-level
//! sections (`device_consumption_water`, future keys) live in the
//! document-level `extras`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full preferences document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefsDocument {
    #[serde(default)]
    pub energy_sources: Vec<EnergySource>,
    #[serde(default)]
    pub device_consumption: Vec<ConsumptionEntry>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// One source on the energy dashboard. Grid, solar, and battery sources are
/// parsed; every other type (gas, water, future kinds) is carried verbatim.
///
/// Variant order matters: each recognized variant is pinned to its `type`
/// tag literal, and anything that matches none of them falls through to
/// `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnergySource {
    Grid(GridSource),
    Solar(SolarSource),
    Battery(BatterySource),
    Other(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridTag {
    #[serde(rename = "grid")]
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolarTag {
    #[serde(rename = "solar")]
    Solar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryTag {
    #[serde(rename = "battery")]
    Battery,
}

/// `{type: "grid", flow_from: [...], flow_to: [...]}`.
///
/// The flow lists are `Option` so that a key absent in the stored document
/// stays absent after a round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSource {
    #[serde(rename = "type")]
    pub tag: GridTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_from: Option<Vec<FlowFrom>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_to: Option<Vec<FlowTo>>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl GridSource {
    pub fn new() -> Self {
        Self {
            tag: GridTag::Grid,
            flow_from: Some(Vec::new()),
            flow_to: Some(Vec::new()),
            extras: Map::new(),
        }
    }
}

/// One grid import flow: `{stat_energy_from, stat_cost?, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowFrom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_energy_from: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl FlowFrom {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            stat_energy_from: Some(entity_id.into()),
            extras: Map::new(),
        }
    }
}

/// One grid export flow: `{stat_energy_to, stat_compensation?, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowTo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_energy_to: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl FlowTo {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            stat_energy_to: Some(entity_id.into()),
            extras: Map::new(),
        }
    }
}

/// `{type: "solar", stat_energy_from, stat_rate?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSource {
    #[serde(rename = "type")]
    pub tag: SolarTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_energy_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_rate: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl SolarSource {
    pub fn new(stat_energy_from: impl Into<String>) -> Self {
        Self {
            tag: SolarTag::Solar,
            stat_energy_from: Some(stat_energy_from.into()),
            stat_rate: None,
            extras: Map::new(),
        }
    }
}

/// `{type: "battery", stat_energy_from?, stat_energy_to?, stat_rate?}`.
/// `stat_energy_from` is discharge, `stat_energy_to` is charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySource {
    #[serde(rename = "type")]
    pub tag: BatteryTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_energy_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_energy_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_rate: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl BatterySource {
    pub fn new() -> Self {
        Self {
            tag: BatteryTag::Battery,
            stat_energy_from: None,
            stat_energy_to: None,
            stat_rate: None,
            extras: Map::new(),
        }
    }
}

/// One device consumption entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionEntry {
    pub stat_consumption: String,
    /// Sankey hierarchy parent (another consumption stat this one is
    /// included in).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_in_stat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_rate: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl ConsumptionEntry {
    pub fn new(stat_consumption: impl Into<String>) -> Self {
        Self {
            stat_consumption: stat_consumption.into(),
            included_in_stat: None,
            stat_rate: None,
            extras: Map::new(),
        }
    }
}

fn value_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

impl EnergySource {
    /// The `type` tag of this source.
    pub fn kind(&self) -> &str {
        match self {
            Self::Grid(_) => "grid",
            Self::Solar(_) => "solar",
            Self::Battery(_) => "battery",
            Self::Other(value) => value_str(value.get("type")).unwrap_or("unknown"),
        }
    }

    /// All entity ids referenced by this source's flow/stat fields.
    pub fn entity_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        match self {
            Self::Grid(grid) => {
                for flow in grid.flow_from.iter().flatten() {
                    if let Some(eid) = &flow.stat_energy_from {
                        ids.insert(eid.clone());
                    }
                }
                for flow in grid.flow_to.iter().flatten() {
                    if let Some(eid) = &flow.stat_energy_to {
                        ids.insert(eid.clone());
                    }
                }
            }
            Self::Solar(solar) => {
                if let Some(eid) = &solar.stat_energy_from {
                    ids.insert(eid.clone());
                }
            }
            Self::Battery(battery) => {
                if let Some(eid) = &battery.stat_energy_from {
                    ids.insert(eid.clone());
                }
                if let Some(eid) = &battery.stat_energy_to {
                    ids.insert(eid.clone());
                }
            }
            Self::Other(value) => {
                for flow in value.get("flow_from").and_then(Value::as_array).into_iter().flatten() {
                    if let Some(eid) = value_str(flow.get("stat_energy_from")) {
                        ids.insert(eid.to_owned());
                    }
                }
                for flow in value.get("flow_to").and_then(Value::as_array).into_iter().flatten() {
                    if let Some(eid) = value_str(flow.get("stat_energy_to")) {
                        ids.insert(eid.to_owned());
                    }
                }
                if let Some(eid) = value_str(value.get("stat_energy_from")) {
                    ids.insert(eid.to_owned());
                }
                if let Some(eid) = value_str(value.get("stat_energy_to")) {
                    ids.insert(eid.to_owned());
                }
            }
        }
        ids
    }

    /// Deduplication key used by the additive merge. Grid keys over both
    /// sorted flow lists, solar over its from-entity, battery over its
    /// from/to pair. Other sources key over their full serialized form,
    /// which is stable and distinct per object shape.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Grid(grid) => {
                let mut from_ids: Vec<&str> = grid
                    .flow_from
                    .iter()
                    .flatten()
                    .filter_map(|flow| flow.stat_energy_from.as_deref())
                    .collect();
                from_ids.sort_unstable();
                let mut to_ids: Vec<&str> = grid
                    .flow_to
                    .iter()
                    .flatten()
                    .filter_map(|flow| flow.stat_energy_to.as_deref())
                    .collect();
                to_ids.sort_unstable();
                format!("grid:{}:{}", from_ids.join(","), to_ids.join(","))
            }
            Self::Solar(solar) => {
                format!("solar:{}", solar.stat_energy_from.as_deref().unwrap_or(""))
            }
            Self::Battery(battery) => format!(
                "battery:{}:{}",
                battery.stat_energy_from.as_deref().unwrap_or(""),
                battery.stat_energy_to.as_deref().unwrap_or("")
            ),
            Self::Other(value) => format!("{}:{}", self.kind(), value),
        }
    }

    pub fn stat_rate(&self) -> Option<&str> {
        match self {
            Self::Solar(solar) => solar.stat_rate.as_deref(),
            Self::Battery(battery) => battery.stat_rate.as_deref(),
            Self::Grid(_) | Self::Other(_) => None,
        }
    }

    /// Set `stat_rate` where the source kind supports one; a no-op for grid
    /// and unrecognized sources.
    pub fn set_stat_rate(&mut self, rate: impl Into<String>) {
        match self {
            Self::Solar(solar) => solar.stat_rate = Some(rate.into()),
            Self::Battery(battery) => battery.stat_rate = Some(rate.into()),
            Self::Grid(_) | Self::Other(_) => {}
        }
    }
}
