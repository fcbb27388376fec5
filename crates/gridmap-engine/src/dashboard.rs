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

//! Prefs transformer: turn role assignments into Energy Dashboard
//! preferences.
//!
//! Two modes: `merge_prefs` is additive (only adds entries whose dedup key
//! is absent), `apply_topology` authoritatively replaces the panel-managed
//! slice of the document. Both deep-copy the input; user-authored entries
//! and unrecognized fields survive untouched. `energy/save_prefs` rejects
//! source objects that lost fields the user had set, so existing objects
//! are kept whole and only `stat_rate` metadata is rewritten.

use std::collections::{BTreeSet, HashMap, HashSet};

use gridmap_types::{
    BatterySource, ConsumptionEntry, EnergySource, FlowFrom, FlowTo, GridSource, PrefsDocument,
    SolarSource,
};

use crate::decision::{EnergyRole, EnergyTopology, RoleAssignment};
use crate::tree::{PanelTree, find_device_entity};

/// Proposed dashboard config straight off the panel trees, without overlap
/// reasoning. Used by the additive `energy` flow.
pub fn propose_panel_config(trees: &[PanelTree]) -> PrefsDocument {
    let mut document = PrefsDocument::default();

    for tree in trees {
        let imported = tree.upstream_entity("imported-energy");
        let exported = tree.upstream_entity("exported-energy");
        if imported.is_some() || exported.is_some() {
            let mut grid = GridSource::new();
            if let Some(imported) = imported {
                grid.flow_from
                    .get_or_insert_with(Vec::new)
                    .push(FlowFrom::new(&imported.entity_id));
            }
            if let Some(exported) = exported {
                grid.flow_to
                    .get_or_insert_with(Vec::new)
                    .push(FlowTo::new(&exported.entity_id));
            }
            document.energy_sources.push(EnergySource::Grid(grid));
        }

        if let Some(solar) = &tree.solar
            && let Some(production) = find_device_entity(solar, "imported-energy")
        {
            document
                .energy_sources
                .push(EnergySource::Solar(SolarSource::new(&production.entity_id)));
        }

        if let Some(battery) = &tree.battery {
            let discharge = find_device_entity(battery, "imported-energy");
            let charge = find_device_entity(battery, "exported-energy");
            if discharge.is_some() || charge.is_some() {
                let mut source = BatterySource::new();
                source.stat_energy_from = discharge.map(|entity| entity.entity_id.clone());
                source.stat_energy_to = charge.map(|entity| entity.entity_id.clone());
                document.energy_sources.push(EnergySource::Battery(source));
            }
        }

        for circuit in &tree.circuits {
            if let Some(consumption) = find_device_entity(circuit, "exported-energy") {
                document
                    .device_consumption
                    .push(ConsumptionEntry::new(&consumption.entity_id));
            }
        }
    }

    document
}

/// Convert preferred role assignments into a minimal dashboard config.
pub fn propose_topology_config(topo: &EnergyTopology) -> PrefsDocument {
    let mut document = PrefsDocument::default();
    let preferred: Vec<&RoleAssignment> = topo.preferred().collect();

    let grid_imports: Vec<&&RoleAssignment> = preferred
        .iter()
        .filter(|a| a.role == EnergyRole::GridImport)
        .collect();
    let grid_exports: Vec<&&RoleAssignment> = preferred
        .iter()
        .filter(|a| a.role == EnergyRole::GridExport)
        .collect();
    if !grid_imports.is_empty() || !grid_exports.is_empty() {
        let mut grid = GridSource::new();
        if let Some(flows) = grid.flow_from.as_mut() {
            flows.extend(grid_imports.iter().map(|a| FlowFrom::new(&a.entity_id)));
        }
        if let Some(flows) = grid.flow_to.as_mut() {
            flows.extend(grid_exports.iter().map(|a| FlowTo::new(&a.entity_id)));
        }
        document.energy_sources.push(EnergySource::Grid(grid));
    }

    for assignment in preferred.iter().filter(|a| a.role == EnergyRole::Solar) {
        let mut solar = SolarSource::new(&assignment.entity_id);
        solar.stat_rate = assignment.rate_entity_id.clone();
        document.energy_sources.push(EnergySource::Solar(solar));
    }

    let discharges: Vec<&&RoleAssignment> = preferred
        .iter()
        .filter(|a| a.role == EnergyRole::BatteryDischarge)
        .collect();
    let charges: Vec<&&RoleAssignment> = preferred
        .iter()
        .filter(|a| a.role == EnergyRole::BatteryCharge)
        .collect();
    if !discharges.is_empty() || !charges.is_empty() {
        let mut battery = BatterySource::new();
        battery.stat_energy_from = discharges.first().map(|a| a.entity_id.clone());
        battery.stat_energy_to = charges.first().map(|a| a.entity_id.clone());
        // Discharge power reads positive, charge negative, so one rate
        // sensor covers the pair.
        battery.stat_rate = discharges
            .iter()
            .chain(charges.iter())
            .find_map(|a| a.rate_entity_id.clone());
        document.energy_sources.push(EnergySource::Battery(battery));
    }

    for assignment in preferred
        .iter()
        .filter(|a| a.role == EnergyRole::DeviceConsumption)
    {
        let mut entry = ConsumptionEntry::new(&assignment.entity_id);
        entry.included_in_stat = assignment.parent_entity_id.clone();
        entry.stat_rate = assignment.rate_entity_id.clone();
        document.device_consumption.push(entry);
    }

    document
}

/// Additive merge: add proposed entries whose dedup key is not already in
/// the document. Never removes or rewrites anything.
pub fn merge_prefs(current: &PrefsDocument, proposed: &PrefsDocument) -> PrefsDocument {
    let mut merged = current.clone();

    let mut source_keys: HashSet<String> = merged
        .energy_sources
        .iter()
        .map(EnergySource::dedup_key)
        .collect();
    for source in &proposed.energy_sources {
        let key = source.dedup_key();
        if source_keys.insert(key) {
            merged.energy_sources.push(source.clone());
        }
    }

    let mut consumption_stats: HashSet<&str> = merged
        .device_consumption
        .iter()
        .map(|entry| entry.stat_consumption.as_str())
        .collect();
    let mut additions: Vec<ConsumptionEntry> = Vec::new();
    for entry in &proposed.device_consumption {
        if consumption_stats.insert(&entry.stat_consumption) {
            additions.push(entry.clone());
        }
    }
    merged.device_consumption.extend(additions);

    merged
}

/// Apply topology decisions to the current prefs: add wanted entries,
/// remove entries contradicted by a non-preferred assignment, and preserve
/// everything the user configured.
pub fn apply_topology(current: &PrefsDocument, topo: &EnergyTopology) -> PrefsDocument {
    let mut result = current.clone();

    let skipped_eids: HashSet<&str> = topo.skipped().map(|a| a.entity_id.as_str()).collect();
    let mut wanted_consumption: BTreeSet<&str> = topo
        .preferred()
        .filter(|a| a.role == EnergyRole::DeviceConsumption)
        .map(|a| a.entity_id.as_str())
        .collect();
    let wanted_source_eids: HashSet<&str> = topo
        .preferred()
        .filter(|a| a.role != EnergyRole::DeviceConsumption)
        .map(|a| a.entity_id.as_str())
        .collect();

    let consumption_parents: HashMap<&str, &str> = topo
        .preferred()
        .filter(|a| a.role == EnergyRole::DeviceConsumption)
        .filter_map(|a| {
            a.parent_entity_id
                .as_deref()
                .map(|parent| (a.entity_id.as_str(), parent))
        })
        .collect();
    let consumption_rates: HashMap<&str, &str> = topo
        .preferred()
        .filter(|a| a.role == EnergyRole::DeviceConsumption)
        .filter_map(|a| {
            a.rate_entity_id
                .as_deref()
                .map(|rate| (a.entity_id.as_str(), rate))
        })
        .collect();

    // Device consumption: keep wanted entries (merging in hierarchy/rate
    // metadata), drop contradicted ones, preserve the rest.
    let mut kept_consumption: Vec<ConsumptionEntry> = Vec::new();
    for entry in &result.device_consumption {
        let stat = entry.stat_consumption.as_str();
        if wanted_consumption.remove(stat) {
            let mut updated = entry.clone();
            if let Some(parent) = consumption_parents.get(stat) {
                updated.included_in_stat = Some((*parent).to_owned());
            }
            if let Some(rate) = consumption_rates.get(stat) {
                updated.stat_rate = Some((*rate).to_owned());
            }
            kept_consumption.push(updated);
        } else if !skipped_eids.contains(stat) {
            kept_consumption.push(entry.clone());
        }
    }
    // Still-missing wanted entries, lexical order for determinism.
    for stat in wanted_consumption {
        let mut entry = ConsumptionEntry::new(stat);
        entry.included_in_stat = consumption_parents.get(stat).map(|&p| p.to_owned());
        entry.stat_rate = consumption_rates.get(stat).map(|&r| r.to_owned());
        kept_consumption.push(entry);
    }
    result.device_consumption = kept_consumption;

    // Energy sources: drop sources touching a skipped entity, keep wholly
    // wanted sources (updating only stat_rate), preserve user-authored
    // sources, then append whatever is still missing.
    let proposed = propose_topology_config(topo);
    let proposed_rates: HashMap<String, Option<String>> = proposed
        .energy_sources
        .iter()
        .map(|source| {
            (
                source.dedup_key(),
                source.stat_rate().map(str::to_owned),
            )
        })
        .collect();

    let mut kept_sources: Vec<EnergySource> = Vec::new();
    let mut matched_eids: HashSet<String> = HashSet::new();
    for source in &result.energy_sources {
        let eids = source.entity_ids();
        if eids.iter().any(|eid| skipped_eids.contains(eid.as_str())) {
            continue;
        }
        if !eids.is_empty()
            && eids.iter().all(|eid| wanted_source_eids.contains(eid.as_str()))
        {
            let mut kept = source.clone();
            if let Some(Some(rate)) = proposed_rates.get(&kept.dedup_key())
                && kept.stat_rate() != Some(rate.as_str())
            {
                kept.set_stat_rate(rate.clone());
            }
            kept_sources.push(kept);
            matched_eids.extend(eids);
            continue;
        }
        kept_sources.push(source.clone());
    }

    for source in &proposed.energy_sources {
        let eids = source.entity_ids();
        if !eids.iter().all(|eid| matched_eids.contains(eid)) {
            kept_sources.push(source.clone());
            matched_eids.extend(eids);
        }
    }
    result.energy_sources = kept_sources;

    result
}
