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

//! Snapshot fetch helpers: one transport command per logical read.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use gridmap_ha::Transport;
use gridmap_types::{
    Area, Device, Entity, PrefsDocument, StateSnapshot, parse_areas, parse_devices, parse_entities,
};
use serde_json::{Value, json};

fn as_records(value: &Value) -> &[Value] {
    value.as_array().map_or(&[], Vec::as_slice)
}

/// Fetch the device, entity, and area registries.
pub async fn fetch_registries(
    transport: &mut dyn Transport,
) -> Result<(Vec<Device>, Vec<Entity>, Vec<Area>)> {
    let raw_devices = transport.send("config/device_registry/list", json!({})).await?;
    let raw_entities = transport.send("config/entity_registry/list", json!({})).await?;
    let raw_areas = transport.send("config/area_registry/list", json!({})).await?;

    Ok((
        parse_devices(as_records(&raw_devices)),
        parse_entities(as_records(&raw_entities)),
        parse_areas(as_records(&raw_areas)),
    ))
}

/// Fetch the area registry alone.
pub async fn fetch_areas(transport: &mut dyn Transport) -> Result<Vec<Area>> {
    let raw = transport.send("config/area_registry/list", json!({})).await?;
    Ok(parse_areas(as_records(&raw)))
}

/// Fetch live entity states.
pub async fn fetch_states(transport: &mut dyn Transport) -> Result<StateSnapshot> {
    let raw = transport.send("get_states", json!({})).await?;
    Ok(StateSnapshot::from_raw(as_records(&raw)))
}

/// Fetch the energy dashboard preferences. A hub with no dashboard yet
/// returns null; that is an empty document.
pub async fn fetch_energy_prefs(transport: &mut dyn Transport) -> Result<PrefsDocument> {
    let raw = transport.send("energy/get_prefs", json!({})).await?;
    if raw.is_null() {
        return Ok(PrefsDocument::default());
    }
    serde_json::from_value(raw).context("Failed to parse energy dashboard preferences")
}

/// Persist the energy dashboard preferences.
pub async fn save_energy_prefs(
    transport: &mut dyn Transport,
    prefs: &PrefsDocument,
) -> Result<()> {
    let payload =
        serde_json::to_value(prefs).context("Failed to serialize energy dashboard preferences")?;
    transport.send("energy/save_prefs", payload).await?;
    Ok(())
}

/// All entity ids known to the entity registry (for stale-reference
/// detection).
pub async fn fetch_known_entity_ids(transport: &mut dyn Transport) -> Result<BTreeSet<String>> {
    let raw = transport.send("config/entity_registry/list", json!({})).await?;
    Ok(as_records(&raw)
        .iter()
        .filter_map(|record| record.get("entity_id").and_then(Value::as_str))
        .map(str::to_owned)
        .collect())
}
