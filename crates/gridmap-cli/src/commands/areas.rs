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

//! Areas command: assign circuit devices to Home Assistant areas.
//!
//! By default each circuit goes to an area named after the circuit. A JSON
//! mapping file overrides that per device name; a `null` value skips the
//! device.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use gridmap_engine::{PanelTree, build_panel_trees};
use gridmap_ha::Transport;
use gridmap_types::Area;
use serde_json::{Value, json};

use crate::fetch::{fetch_areas, fetch_registries};
use crate::output::Console;

/// One planned area assignment.
#[derive(Debug, Clone)]
struct AssignAction {
    device_id: String,
    device_name: String,
    area_name: String,
    needs_create: bool,
}

/// `areas`: plan and apply circuit-to-area assignments.
pub async fn areas(
    transport: &mut dyn Transport,
    console: &Console,
    dry_run: bool,
    mapping_file: Option<&str>,
    create_missing: bool,
) -> Result<()> {
    let name_to_area: HashMap<String, Option<String>> = match mapping_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read mapping file {path}"))?;
            let mapping: HashMap<String, Option<String>> = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse mapping file {path}"))?;
            console.info(&format!("Loaded mapping with {} entries", mapping.len()));
            mapping
        }
        None => HashMap::new(),
    };

    let (devices, entities, areas) = fetch_registries(transport).await?;
    let build = build_panel_trees(&devices, &entities);
    if build.trees.is_empty() {
        console.warn("No SPAN devices found");
        return Ok(());
    }

    let mut area_by_name: HashMap<String, Area> = areas
        .into_iter()
        .map(|area| (area.name.clone(), area))
        .collect();

    let actions = plan_assignments(&build.trees, &name_to_area, &area_by_name);
    if actions.is_empty() {
        console.ok("All circuit devices already have correct area assignments");
        return Ok(());
    }

    let areas_to_create: BTreeSet<&str> = actions
        .iter()
        .filter(|action| action.needs_create)
        .map(|action| action.area_name.as_str())
        .collect();

    if !areas_to_create.is_empty() {
        console.info(&format!(
            "Areas to create: {}",
            areas_to_create.iter().copied().collect::<Vec<_>>().join(", ")
        ));
    }
    for action in &actions {
        let message = format!("{} → {}", action.device_name, action.area_name);
        if dry_run {
            console.dry_run(&message);
        } else {
            console.info(&message);
        }
    }

    if dry_run {
        console.info(&format!(
            "Would assign {} device(s) ({} area(s) to create)",
            actions.len(),
            areas_to_create.len()
        ));
        return Ok(());
    }

    if !areas_to_create.is_empty() {
        if !create_missing {
            console.warn(&format!(
                "Missing areas: {}. Use --create-missing to create them.",
                areas_to_create.iter().copied().collect::<Vec<_>>().join(", ")
            ));
            return Ok(());
        }
        for &name in &areas_to_create {
            let result = transport
                .send("config/area_registry/create", json!({"name": name}))
                .await?;
            let area = Area {
                area_id: result
                    .get("area_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                name: result
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(name)
                    .to_owned(),
            };
            console.ok(&format!("Created area: {}", area.name));
            area_by_name.insert(area.name.clone(), area);
        }
    }

    let mut assigned = 0usize;
    for action in &actions {
        let Some(area) = area_by_name.get(&action.area_name) else {
            console.warn(&format!(
                "Area '{}' not found, skipping {}",
                action.area_name, action.device_name
            ));
            continue;
        };
        transport
            .send(
                "config/device_registry/update",
                json!({"device_id": action.device_id, "area_id": area.area_id}),
            )
            .await?;
        assigned += 1;
        console.ok(&format!("Assigned {} → {}", action.device_name, action.area_name));
    }

    console.ok(&format!("Assigned {assigned} device(s)"));
    Ok(())
}

fn plan_assignments(
    trees: &[PanelTree],
    name_to_area: &HashMap<String, Option<String>>,
    area_by_name: &HashMap<String, Area>,
) -> Vec<AssignAction> {
    let area_name_by_id: HashMap<&str, &str> = area_by_name
        .values()
        .map(|area| (area.area_id.as_str(), area.name.as_str()))
        .collect();

    let mut actions = Vec::new();
    for tree in trees {
        for circuit in &tree.circuits {
            let device_name = circuit.display_name();

            let target = match name_to_area.get(device_name) {
                // null in the mapping means skip this device.
                Some(None) => continue,
                Some(Some(mapped)) => mapped.as_str(),
                None => device_name,
            };

            if let Some(area_id) = circuit.area_id.as_deref()
                && area_name_by_id.get(area_id) == Some(&target)
            {
                continue;
            }

            actions.push(AssignAction {
                device_id: circuit.id.clone(),
                device_name: device_name.to_owned(),
                area_name: target.to_owned(),
                needs_create: !area_by_name.contains_key(target),
            });
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::FakeTransport;
    use serde_json::json;

    fn registry_fixture() -> (serde_json::Value, serde_json::Value, serde_json::Value) {
        (
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
                    "identifiers": [["span_ebus", "nt-0000-abc12_c1"]],
                    "via_device_id": "dev-panel-001",
                    "area_id": "area-kitchen",
                },
                {
                    "id": "dev-circuit-002",
                    "name": "Garage",
                    "model": "Circuit",
                    "identifiers": [["span_ebus", "nt-0000-abc12_c2"]],
                    "via_device_id": "dev-panel-001",
                },
            ]),
            json!([]),
            json!([{"area_id": "area-kitchen", "name": "Kitchen"}]),
        )
    }

    #[tokio::test]
    async fn test_assigns_missing_circuit_after_creating_area() {
        let (devices, entities, areas_raw) = registry_fixture();
        let mut transport = FakeTransport::new()
            .respond("config/device_registry/list", devices)
            .respond("config/entity_registry/list", entities)
            .respond("config/area_registry/list", areas_raw)
            .respond(
                "config/area_registry/create",
                json!({"area_id": "area-garage", "name": "Garage"}),
            )
            .respond("config/device_registry/update", json!({}));
        let console = Console::new();

        areas(&mut transport, &console, false, None, true).await.unwrap();

        let commands = transport.sent_commands();
        assert!(commands.contains(&"config/area_registry/create"));
        let update = transport
            .sent
            .iter()
            .find(|(command, _)| command == "config/device_registry/update")
            .map(|(_, params)| params.clone())
            .expect("device updated");
        assert_eq!(update["device_id"], "dev-circuit-002");
        assert_eq!(update["area_id"], "area-garage");
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_writing() {
        let (devices, entities, areas_raw) = registry_fixture();
        let mut transport = FakeTransport::new()
            .respond("config/device_registry/list", devices)
            .respond("config/entity_registry/list", entities)
            .respond("config/area_registry/list", areas_raw);
        let console = Console::new();

        areas(&mut transport, &console, true, None, false).await.unwrap();

        let commands = transport.sent_commands();
        assert!(!commands.contains(&"config/area_registry/create"));
        assert!(!commands.contains(&"config/device_registry/update"));
    }

    #[tokio::test]
    async fn test_missing_areas_require_create_flag() {
        let (devices, entities, areas_raw) = registry_fixture();
        let mut transport = FakeTransport::new()
            .respond("config/device_registry/list", devices)
            .respond("config/entity_registry/list", entities)
            .respond("config/area_registry/list", areas_raw);
        let console = Console::new();

        areas(&mut transport, &console, false, None, false).await.unwrap();
        assert!(!transport.sent_commands().contains(&"config/device_registry/update"));
    }
}
