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

//! Water command: maintain the Energy Dashboard water tab.
//!
//! The water section (`device_consumption_water`) is not part of the
//! topology engine's managed slice; this command only ever adds missing
//! entries.

use std::collections::BTreeSet;

use anyhow::Result;
use gridmap_ha::Transport;
use gridmap_types::{PrefsDocument, StateSnapshot};
use serde_json::{Value, json};

use crate::fetch::{fetch_energy_prefs, fetch_states, save_energy_prefs};
use crate::output::Console;

/// `water`: add water sensors, auto-discovered or explicit.
pub async fn water(
    transport: &mut dyn Transport,
    console: &Console,
    dry_run: bool,
    explicit_ids: &[String],
) -> Result<()> {
    let states = fetch_states(transport).await?;
    let current = fetch_energy_prefs(transport).await?;

    let water_ids = if explicit_ids.is_empty() {
        discover_water_sensors(&states)
    } else {
        validate_explicit(console, explicit_ids, &states)
    };

    if water_ids.is_empty() {
        console.warn("No water sensors found");
        return Ok(());
    }

    console.info(&format!("Found {} water sensor(s):", water_ids.len()));
    for entity_id in &water_ids {
        let attrs = states.get(entity_id).map(|state| &state.attributes);
        let unit = attrs
            .and_then(|attrs| attrs.get("unit_of_measurement"))
            .and_then(Value::as_str)
            .unwrap_or("?");
        let friendly = attrs
            .and_then(|attrs| attrs.get("friendly_name"))
            .and_then(Value::as_str)
            .unwrap_or(entity_id);
        console.print(format!("  - {entity_id} ({friendly}, {unit})"));
    }

    let merged = merge_water_prefs(&current, &water_ids);
    show_diff(console, &current, &merged);

    if dry_run {
        console.dry_run("Would save energy dashboard config (use without --dry-run to apply)");
        return Ok(());
    }

    save_energy_prefs(transport, &merged).await?;
    console.ok("Energy dashboard water config saved");
    Ok(())
}

/// Sensors with device_class `water` and state_class `total_increasing`.
fn discover_water_sensors(states: &StateSnapshot) -> Vec<String> {
    let mut ids: Vec<String> = states
        .iter()
        .filter(|(entity_id, _)| entity_id.starts_with("sensor."))
        .filter(|(_, state)| {
            state.attributes.get("device_class").and_then(Value::as_str) == Some("water")
                && state.attributes.get("state_class").and_then(Value::as_str)
                    == Some("total_increasing")
        })
        .map(|(entity_id, _)| entity_id.to_owned())
        .collect();
    ids.sort();
    ids
}

fn validate_explicit(
    console: &Console,
    entity_ids: &[String],
    states: &StateSnapshot,
) -> Vec<String> {
    entity_ids
        .iter()
        .filter(|entity_id| {
            let known = states.contains(entity_id.as_str());
            if !known {
                console.warn(&format!("Entity not found: {entity_id}"));
            }
            known
        })
        .cloned()
        .collect()
}

fn water_stat_ids(section: Option<&Value>) -> BTreeSet<String> {
    section
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("stat_consumption").and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

/// Add missing water sensors to `device_consumption_water`.
fn merge_water_prefs(current: &PrefsDocument, water_ids: &[String]) -> PrefsDocument {
    let mut merged = current.clone();

    let section = merged
        .extras
        .entry("device_consumption_water".to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !section.is_array() {
        *section = Value::Array(Vec::new());
    }
    let mut existing = water_stat_ids(Some(section));
    if let Some(entries) = section.as_array_mut() {
        for entity_id in water_ids {
            if existing.insert(entity_id.clone()) {
                entries.push(json!({"stat_consumption": entity_id}));
            }
        }
    }

    merged
}

fn show_diff(console: &Console, current: &PrefsDocument, merged: &PrefsDocument) {
    let current_ids = water_stat_ids(current.extras.get("device_consumption_water"));
    let merged_ids = water_stat_ids(merged.extras.get("device_consumption_water"));
    let new_ids: Vec<&String> = merged_ids.difference(&current_ids).collect();

    console.rule("Energy Dashboard Water Changes");

    if new_ids.is_empty() {
        console.ok("No changes needed — water tab is up to date");
        return;
    }

    console.info(&format!("Adding {} water source(s):", new_ids.len()));
    for entity_id in new_ids {
        console.print(format!("  + {entity_id}"));
    }
}
