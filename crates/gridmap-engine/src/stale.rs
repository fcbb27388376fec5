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

//! Stale-reference detection: find and remove dashboard references to
//! entities that no longer exist in the registry.

use std::collections::{BTreeMap, BTreeSet};

use gridmap_types::{EnergySource, PrefsDocument};
use serde_json::Value;

/// All entity ids referenced by the dashboard config.
pub fn extract_energy_entity_ids(prefs: &PrefsDocument) -> BTreeSet<String> {
    let mut ids: BTreeSet<String> = BTreeSet::new();
    for source in &prefs.energy_sources {
        ids.extend(source.entity_ids());
    }
    for entry in &prefs.device_consumption {
        ids.insert(entry.stat_consumption.clone());
    }
    ids
}

/// Find dashboard references pointing at entities absent from `known_ids`,
/// grouped by document section.
pub fn find_stale_references(
    prefs: &PrefsDocument,
    known_ids: &BTreeSet<String>,
) -> BTreeMap<String, Vec<String>> {
    let mut stale: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut record = |section: String, entity_id: &str| {
        if !known_ids.contains(entity_id) {
            stale.entry(section).or_default().push(entity_id.to_owned());
        }
    };

    for source in &prefs.energy_sources {
        let kind = source.kind().to_owned();
        match source {
            EnergySource::Grid(grid) => {
                for flow in grid.flow_from.iter().flatten() {
                    if let Some(eid) = &flow.stat_energy_from {
                        record(format!("{kind} (grid import)"), eid);
                    }
                }
                for flow in grid.flow_to.iter().flatten() {
                    if let Some(eid) = &flow.stat_energy_to {
                        record(format!("{kind} (grid export)"), eid);
                    }
                }
            }
            EnergySource::Solar(_) | EnergySource::Battery(_) | EnergySource::Other(_) => {
                for eid in source.entity_ids() {
                    record(kind.clone(), &eid);
                }
            }
        }
    }

    for entry in &prefs.device_consumption {
        record("device_consumption".to_owned(), &entry.stat_consumption);
    }

    stale
}

fn extras_reference(extras: &serde_json::Map<String, Value>, key: &str) -> bool {
    extras.get(key).is_some_and(|value| !value.is_null())
}

/// Whether a source still references anything worth keeping: an entity id
/// or a cost statistic.
fn has_any_reference(source: &EnergySource) -> bool {
    if !source.entity_ids().is_empty() {
        return true;
    }
    match source {
        EnergySource::Grid(grid) => {
            extras_reference(&grid.extras, "stat_cost")
                || extras_reference(&grid.extras, "stat_compensation")
        }
        EnergySource::Solar(solar) => {
            extras_reference(&solar.extras, "stat_cost")
                || extras_reference(&solar.extras, "stat_compensation")
        }
        EnergySource::Battery(battery) => {
            extras_reference(&battery.extras, "stat_cost")
                || extras_reference(&battery.extras, "stat_compensation")
        }
        EnergySource::Other(value) => {
            value.get("stat_cost").is_some_and(|v| !v.is_null())
                || value.get("stat_compensation").is_some_and(|v| !v.is_null())
        }
    }
}

/// Return a copy of the prefs with references to `stale_ids` removed.
///
/// Flow lists are filtered and dropped when emptied; a solar/battery
/// source whose primary stat went stale loses that field; sources left
/// with no entity and no cost references are dropped entirely.
pub fn remove_stale_references(
    prefs: &PrefsDocument,
    stale_ids: &BTreeSet<String>,
) -> PrefsDocument {
    let mut cleaned = prefs.clone();
    let is_stale = |eid: &Option<String>| {
        eid.as_deref().is_some_and(|eid| stale_ids.contains(eid))
    };

    let mut kept_sources: Vec<EnergySource> = Vec::new();
    for source in &cleaned.energy_sources {
        let mut source = source.clone();
        match &mut source {
            EnergySource::Grid(grid) => {
                if let Some(flows) = grid.flow_from.as_mut() {
                    flows.retain(|flow| !is_stale(&flow.stat_energy_from));
                }
                if grid.flow_from.as_ref().is_some_and(Vec::is_empty) {
                    grid.flow_from = None;
                }
                if let Some(flows) = grid.flow_to.as_mut() {
                    flows.retain(|flow| !is_stale(&flow.stat_energy_to));
                }
                if grid.flow_to.as_ref().is_some_and(Vec::is_empty) {
                    grid.flow_to = None;
                }
            }
            EnergySource::Solar(solar) => {
                if is_stale(&solar.stat_energy_from) {
                    solar.stat_energy_from = None;
                }
            }
            EnergySource::Battery(battery) => {
                if is_stale(&battery.stat_energy_from) {
                    battery.stat_energy_from = None;
                }
                if is_stale(&battery.stat_energy_to) {
                    battery.stat_energy_to = None;
                }
            }
            // Unrecognized sources are not panel-managed; left alone.
            EnergySource::Other(_) => {}
        }
        if has_any_reference(&source) {
            kept_sources.push(source);
        }
    }
    cleaned.energy_sources = kept_sources;

    cleaned
        .device_consumption
        .retain(|entry| !stale_ids.contains(&entry.stat_consumption));

    cleaned
}
