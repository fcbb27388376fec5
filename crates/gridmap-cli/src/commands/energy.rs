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

//! Energy commands: auto-configure and audit the Energy Dashboard.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use gridmap_engine::{
    apply_topology, build_panel_trees, build_site_topology, extract_energy_entity_ids,
    find_stale_references, merge_prefs, propose_panel_config, remove_stale_references,
};
use gridmap_ha::Transport;
use gridmap_types::{EnergySource, PrefsDocument, enrich_entities_from_states};

use crate::fetch::{
    fetch_energy_prefs, fetch_known_entity_ids, fetch_registries, fetch_states, save_energy_prefs,
};
use crate::output::{Console, render_topology};

/// `energy`: configure the dashboard, either additively or topology-aware.
pub async fn energy(
    transport: &mut dyn Transport,
    console: &Console,
    dry_run: bool,
    topology: bool,
) -> Result<()> {
    if topology {
        energy_topology_config(transport, console, dry_run).await
    } else {
        energy_additive(transport, console, dry_run).await
    }
}

/// The additive flow: propose entries off the panel trees, merge whatever
/// is missing, never remove anything.
async fn energy_additive(
    transport: &mut dyn Transport,
    console: &Console,
    dry_run: bool,
) -> Result<()> {
    let (devices, entities, _areas) = fetch_registries(transport).await?;
    let current = fetch_energy_prefs(transport).await?;

    let build = build_panel_trees(&devices, &entities);
    if build.trees.is_empty() {
        console.warn("No SPAN devices found");
        return Ok(());
    }

    let proposed = propose_panel_config(&build.trees);
    let merged = merge_prefs(&current, &proposed);

    show_merge_diff(console, &current, &merged);

    if dry_run {
        console.dry_run("Would save energy dashboard config (use without --dry-run to apply)");
        return Ok(());
    }

    save_energy_prefs(transport, &merged).await?;
    console.ok("Energy dashboard config saved");
    Ok(())
}

/// The topology-aware flow: overlap detection, suppression, and an
/// authoritative rewrite of the panel-managed slice.
async fn energy_topology_config(
    transport: &mut dyn Transport,
    console: &Console,
    dry_run: bool,
) -> Result<()> {
    let (devices, mut entities, _areas) = fetch_registries(transport).await?;
    let states = fetch_states(transport).await?;
    let current = fetch_energy_prefs(transport).await?;

    // device_class/state_class are runtime properties, not registry fields.
    enrich_entities_from_states(&mut entities, &states);
    let build = build_panel_trees(&devices, &entities);
    if build.trees.is_empty() {
        console.warn("No SPAN devices found");
        return Ok(());
    }

    let topology = build_site_topology(&build, &devices, &entities, &states);
    render_topology(console, &topology);

    let cleaned = apply_topology(&current, &topology);
    show_topology_diff(console, &current, &cleaned);

    if dry_run {
        console.dry_run(
            "Would save topology-aware energy dashboard config (use without --dry-run to apply)",
        );
        return Ok(());
    }

    save_energy_prefs(transport, &cleaned).await?;
    console.ok("Topology-aware energy dashboard config saved");
    Ok(())
}

/// `energy-topology`: display-only topology view.
pub async fn energy_topology_show(
    transport: &mut dyn Transport,
    console: &Console,
) -> Result<()> {
    let (devices, mut entities, _areas) = fetch_registries(transport).await?;
    let states = fetch_states(transport).await?;

    enrich_entities_from_states(&mut entities, &states);
    let build = build_panel_trees(&devices, &entities);
    if build.trees.is_empty() {
        console.warn("No SPAN devices found");
        return Ok(());
    }

    let topology = build_site_topology(&build, &devices, &entities, &states);
    render_topology(console, &topology);
    Ok(())
}

/// `energy-audit`: stale-reference detection, with optional pruning.
pub async fn energy_audit(
    transport: &mut dyn Transport,
    console: &Console,
    dry_run: bool,
    prune: bool,
) -> Result<()> {
    let prefs = fetch_energy_prefs(transport).await?;
    let known_ids = fetch_known_entity_ids(transport).await?;

    let referenced = extract_energy_entity_ids(&prefs);
    let stale = find_stale_references(&prefs, &known_ids);

    console.info(&format!(
        "Energy dashboard references {} entity ID(s)",
        referenced.len()
    ));

    if stale.is_empty() {
        console.ok("No stale references — all energy dashboard entities exist");
        return Ok(());
    }

    let total: usize = stale.values().map(Vec::len).sum();
    console.warn(&format!("{total} stale reference(s) found:"));
    for (section, ids) in &stale {
        console.blank();
        console.print(format!("  {section}"));
        let mut ids = ids.clone();
        ids.sort();
        for entity_id in ids {
            console.print(format!("    - {entity_id}"));
        }
    }
    console.blank();

    if !prune {
        console.info("Run with --prune to remove stale entries");
        return Ok(());
    }
    if dry_run {
        console.dry_run(&format!("Would remove {total} stale reference(s)"));
        return Ok(());
    }

    let stale_ids: BTreeSet<String> = stale.into_values().flatten().collect();
    let cleaned = remove_stale_references(&prefs, &stale_ids);
    save_energy_prefs(transport, &cleaned).await?;
    console.ok(&format!(
        "Removed {total} stale reference(s) from energy dashboard"
    ));
    Ok(())
}

fn print_source(console: &Console, source: &EnergySource) {
    match source {
        EnergySource::Grid(grid) => {
            for flow in grid.flow_from.iter().flatten() {
                if let Some(eid) = &flow.stat_energy_from {
                    console.print(format!("  - Grid import: {eid}"));
                }
            }
            for flow in grid.flow_to.iter().flatten() {
                if let Some(eid) = &flow.stat_energy_to {
                    console.print(format!("  - Grid export: {eid}"));
                }
            }
        }
        EnergySource::Solar(solar) => {
            if let Some(eid) = &solar.stat_energy_from {
                console.print(format!("  - Solar: {eid}"));
            }
        }
        EnergySource::Battery(battery) => {
            if let Some(eid) = &battery.stat_energy_from {
                console.print(format!("  - Battery discharge: {eid}"));
            }
            if let Some(eid) = &battery.stat_energy_to {
                console.print(format!("  - Battery charge: {eid}"));
            }
        }
        EnergySource::Other(_) => {
            console.print(format!("  - {}", source.kind()));
        }
    }
}

fn show_merge_diff(console: &Console, current: &PrefsDocument, merged: &PrefsDocument) {
    let new_sources = merged.energy_sources.len() - current.energy_sources.len();
    let new_consumption = merged.device_consumption.len() - current.device_consumption.len();

    console.rule("Energy Dashboard Changes");

    if new_sources == 0 && new_consumption == 0 {
        console.ok("No changes needed — energy dashboard is up to date");
        return;
    }

    if new_sources > 0 {
        console.info(&format!("Adding {new_sources} energy source(s):"));
        let existing_keys: BTreeSet<String> = current
            .energy_sources
            .iter()
            .map(EnergySource::dedup_key)
            .collect();
        for source in &merged.energy_sources {
            if !existing_keys.contains(&source.dedup_key()) {
                print_source(console, source);
            }
        }
    }

    if new_consumption > 0 {
        let existing: BTreeSet<&str> = current
            .device_consumption
            .iter()
            .map(|entry| entry.stat_consumption.as_str())
            .collect();
        console.info(&format!(
            "Adding {new_consumption} circuit consumption sensor(s):"
        ));
        for entry in &merged.device_consumption {
            if !existing.contains(entry.stat_consumption.as_str()) {
                console.print(format!("  - {}", entry.stat_consumption));
            }
        }
    }
}

fn all_source_eids(prefs: &PrefsDocument) -> BTreeSet<String> {
    prefs
        .energy_sources
        .iter()
        .flat_map(EnergySource::entity_ids)
        .collect()
}

fn consumption_ids(prefs: &PrefsDocument) -> BTreeSet<&str> {
    prefs
        .device_consumption
        .iter()
        .map(|entry| entry.stat_consumption.as_str())
        .collect()
}

fn show_topology_diff(console: &Console, current: &PrefsDocument, cleaned: &PrefsDocument) {
    console.rule("Energy Dashboard Changes");

    let current_consumption = consumption_ids(current);
    let cleaned_consumption = consumption_ids(cleaned);
    let current_eids = all_source_eids(current);
    let cleaned_eids = all_source_eids(cleaned);

    let added_consumption: Vec<&&str> =
        cleaned_consumption.difference(&current_consumption).collect();
    let removed_consumption: Vec<&&str> =
        current_consumption.difference(&cleaned_consumption).collect();
    let added_eids: Vec<&String> = cleaned_eids.difference(&current_eids).collect();
    let removed_eids: Vec<&String> = current_eids.difference(&cleaned_eids).collect();

    // Metadata updates on entries present on both sides.
    let cleaned_by_stat: BTreeMap<&str, (&Option<String>, &Option<String>)> = cleaned
        .device_consumption
        .iter()
        .map(|entry| {
            (
                entry.stat_consumption.as_str(),
                (&entry.included_in_stat, &entry.stat_rate),
            )
        })
        .collect();
    let mut updated_consumption: Vec<String> = Vec::new();
    for entry in &current.device_consumption {
        let Some((included, rate)) = cleaned_by_stat.get(entry.stat_consumption.as_str()) else {
            continue;
        };
        for (field, old, new) in [
            ("included_in_stat", &entry.included_in_stat, *included),
            ("stat_rate", &entry.stat_rate, *rate),
        ] {
            if old != new {
                updated_consumption.push(format!(
                    "  ~ {}: {field} {} → {}",
                    entry.stat_consumption,
                    old.as_deref().unwrap_or("(none)"),
                    new.as_deref().unwrap_or("(none)"),
                ));
            }
        }
    }

    let cleaned_rates: BTreeMap<String, Option<&str>> = cleaned
        .energy_sources
        .iter()
        .map(|source| (source.dedup_key(), source.stat_rate()))
        .collect();
    let mut updated_sources: Vec<String> = Vec::new();
    for source in &current.energy_sources {
        let key = source.dedup_key();
        let Some(new_rate) = cleaned_rates.get(&key) else {
            continue;
        };
        if source.stat_rate() != *new_rate {
            updated_sources.push(format!(
                "  ~ {key}: stat_rate {} → {}",
                source.stat_rate().unwrap_or("(none)"),
                new_rate.unwrap_or("(none)"),
            ));
        }
    }

    if added_consumption.is_empty()
        && removed_consumption.is_empty()
        && added_eids.is_empty()
        && removed_eids.is_empty()
        && updated_consumption.is_empty()
        && updated_sources.is_empty()
    {
        console.ok("No changes needed — energy dashboard is up to date");
        return;
    }

    if !removed_consumption.is_empty() {
        console.info(&format!(
            "Removing {} device consumption entry/ies:",
            removed_consumption.len()
        ));
        for eid in removed_consumption {
            console.print(format!("  - {eid}"));
        }
    }
    if !added_consumption.is_empty() {
        console.info(&format!(
            "Adding {} device consumption entry/ies:",
            added_consumption.len()
        ));
        for eid in added_consumption {
            console.print(format!("  + {eid}"));
        }
    }
    if !updated_consumption.is_empty() {
        console.info(&format!(
            "Updating {} device consumption entry/ies:",
            updated_consumption.len()
        ));
        for line in updated_consumption {
            console.print(line);
        }
    }
    if !updated_sources.is_empty() {
        console.info(&format!("Updating {} energy source(s):", updated_sources.len()));
        for line in updated_sources {
            console.print(line);
        }
    }
    if !removed_eids.is_empty() {
        console.info("Removing energy source entity/ies:");
        for eid in removed_eids {
            console.print(format!("  - {eid}"));
        }
    }
    if !added_eids.is_empty() {
        console.info("Adding energy source entity/ies:");
        for eid in added_eids {
            console.print(format!("  + {eid}"));
        }
    }
}
