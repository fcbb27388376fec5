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

//! Audit command: device hierarchy plus misconfiguration report.

use std::collections::BTreeSet;

use anyhow::Result;
use gridmap_engine::{PanelTree, build_panel_trees, extract_energy_entity_ids};
use gridmap_ha::Transport;
use gridmap_types::{Device, Entity};

use crate::args::OutputFormat;
use crate::fetch::{fetch_energy_prefs, fetch_registries};
use crate::output::{Console, render_json, render_table, render_trees};

/// `audit`: render the panel trees and report gaps.
pub async fn audit(
    transport: &mut dyn Transport,
    console: &Console,
    format: OutputFormat,
) -> Result<()> {
    let (devices, entities, _areas) = fetch_registries(transport).await?;
    let prefs = fetch_energy_prefs(transport).await?;

    let build = build_panel_trees(&devices, &entities);
    if build.trees.is_empty() {
        console.warn("No SPAN devices found in Home Assistant");
        return Ok(());
    }
    for warning in &build.warnings {
        console.warn(warning);
    }

    let energy_entity_ids = extract_energy_entity_ids(&prefs);

    console.info(&format!("Found {} SPAN panel(s)", build.trees.len()));
    console.blank();

    match format {
        OutputFormat::Tree => render_trees(console, &build.trees, &energy_entity_ids),
        OutputFormat::Table => render_table(console, &build.trees, &energy_entity_ids),
        OutputFormat::Json => render_json(console, &build.trees)?,
    }

    console.blank();
    console.rule("Diagnostics");
    report_no_area(console, &build.trees);
    report_energy_gaps(console, &build.trees, &energy_entity_ids);
    report_disabled(console, &build.trees);
    Ok(())
}

fn all_devices(tree: &PanelTree) -> Vec<&Device> {
    let mut devices = vec![&tree.panel];
    devices.extend(tree.aux_devices());
    devices.extend(tree.circuits.iter());
    devices
}

/// Circuits with no area assigned.
fn report_no_area(console: &Console, trees: &[PanelTree]) {
    let missing: Vec<&Device> = trees
        .iter()
        .flat_map(|tree| &tree.circuits)
        .filter(|circuit| circuit.area_id.is_none())
        .collect();
    if missing.is_empty() {
        console.ok("All circuits have areas assigned");
        return;
    }
    console.warn(&format!("{} circuit(s) have no area assigned:", missing.len()));
    for device in missing {
        console.print(format!("  - {}", device.display_name()));
    }
}

/// Enabled cumulative-energy sensors missing from the dashboard.
fn report_energy_gaps(
    console: &Console,
    trees: &[PanelTree],
    energy_entity_ids: &BTreeSet<String>,
) {
    let mut missing: Vec<(&Device, &Entity)> = Vec::new();
    for tree in trees {
        for device in all_devices(tree) {
            for entity in &device.entities {
                if entity.device_class.as_deref() == Some("energy")
                    && entity.state_class.as_deref() == Some("total_increasing")
                    && entity.is_enabled()
                    && !energy_entity_ids.contains(&entity.entity_id)
                {
                    missing.push((device, entity));
                }
            }
        }
    }
    if missing.is_empty() {
        console.ok("All enabled energy sensors are in the energy dashboard");
        return;
    }
    console.warn(&format!(
        "{} energy sensor(s) NOT in energy dashboard:",
        missing.len()
    ));
    for (device, entity) in missing {
        console.print(format!("  - {} ({})", entity.entity_id, device.display_name()));
    }
}

/// Disabled energy-relevant entities.
fn report_disabled(console: &Console, trees: &[PanelTree]) {
    let mut disabled: Vec<&Entity> = Vec::new();
    for tree in trees {
        for device in all_devices(tree) {
            for entity in &device.entities {
                if entity.disabled_by.is_some() && entity.device_class.as_deref() == Some("energy") {
                    disabled.push(entity);
                }
            }
        }
    }
    if disabled.is_empty() {
        return;
    }
    console.warn(&format!("{} energy sensor(s) are disabled:", disabled.len()));
    for entity in disabled {
        console.print(format!(
            "  - {} (disabled by: {})",
            entity.entity_id,
            entity.disabled_by.as_deref().unwrap_or("?")
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::FakeTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_audit_runs_over_scripted_registries() {
        let mut transport = FakeTransport::new()
            .respond(
                "config/device_registry/list",
                json!([
                    {
                        "id": "dev-panel-001",
                        "name": "SPAN Panel",
                        "model": "SPAN Panel",
                        "identifiers": [["span_ebus", "nt-0000-abc12"]],
                    },
                    {
                        "id": "dev-circuit-001",
                        "name": "Kitchen",
                        "model": "Circuit",
                        "identifiers": [["span_ebus", "nt-0000-abc12_c1-node"]],
                        "via_device_id": "dev-panel-001",
                    },
                ]),
            )
            .respond(
                "config/entity_registry/list",
                json!([{
                    "entity_id": "sensor.span_kitchen_exported_energy",
                    "unique_id": "nt-0000-abc12_c1-node_exported-energy",
                    "platform": "span_ebus",
                    "device_id": "dev-circuit-001",
                    "original_device_class": "energy",
                    "original_state_class": "total_increasing",
                }]),
            )
            .respond("config/area_registry/list", json!([]))
            .respond("energy/get_prefs", json!({}));
        let console = Console::new();

        audit(&mut transport, &console, OutputFormat::Tree).await.unwrap();
        // Read-only command: nothing written back.
        assert!(transport.saved_prefs().is_none());
    }
}
