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

//! Terminal output sink. All rendering goes through a [`Console`] handed to
//! the command flows, never through ad-hoc prints in the engine.

use std::collections::BTreeSet;

use gridmap_engine::{EnergyRole, EnergyTopology, PanelTree, Position};
use gridmap_types::{Device, Entity};

/// Plain-text console sink.
#[derive(Debug, Default)]
pub struct Console;

impl Console {
    pub fn new() -> Self {
        Self
    }

    pub fn print(&self, message: impl AsRef<str>) {
        println!("{}", message.as_ref());
    }

    pub fn blank(&self) {
        println!();
    }

    pub fn rule(&self, title: &str) {
        println!("── {title} {}", "─".repeat(50_usize.saturating_sub(title.len())));
    }

    pub fn info(&self, message: &str) {
        println!("INFO    {message}");
    }

    pub fn warn(&self, message: &str) {
        println!("WARN    {message}");
    }

    pub fn ok(&self, message: &str) {
        println!("OK      {message}");
    }

    pub fn dry_run(&self, message: &str) {
        println!("DRY-RUN {message}");
    }

    pub fn error(&self, message: &str) {
        eprintln!("ERROR   {message}");
    }
}

fn entity_label(entity: &Entity, energy_entity_ids: &BTreeSet<String>) -> String {
    let mut tags: Vec<String> = Vec::new();
    if let Some(class) = &entity.device_class {
        tags.push(class.clone());
    }
    if let Some(class) = &entity.state_class {
        tags.push(class.clone());
    }
    if let Some(disabled_by) = &entity.disabled_by {
        tags.push(format!("disabled:{disabled_by}"));
    }
    if energy_entity_ids.contains(&entity.entity_id) {
        tags.push("energy-dashboard".to_owned());
    }
    if tags.is_empty() {
        entity.entity_id.clone()
    } else {
        format!("{} ({})", entity.entity_id, tags.join(", "))
    }
}

fn device_label(device: &Device) -> String {
    let mut parts = vec![device.display_name().to_owned()];
    if let Some(model) = &device.model {
        parts.push(format!("[{model}]"));
    }
    if let Some(area_id) = &device.area_id {
        parts.push(format!("area:{area_id}"));
    }
    parts.join(" ")
}

fn print_device_branch(
    console: &Console,
    indent: &str,
    device: &Device,
    energy_entity_ids: &BTreeSet<String>,
) {
    console.print(format!("{indent}{}", device_label(device)));
    let mut entities: Vec<&Entity> = device.entities.iter().collect();
    entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    for entity in entities {
        console.print(format!("{indent}  - {}", entity_label(entity, energy_entity_ids)));
    }
}

/// Render the device trees as indented text.
pub fn render_trees(console: &Console, trees: &[PanelTree], energy_entity_ids: &BTreeSet<String>) {
    for tree in trees {
        console.print(format!("SPAN Panel ({})", tree.serial().unwrap_or("unknown")));
        print_device_branch(console, "  ", &tree.panel, energy_entity_ids);

        for (label, device) in [
            ("Site Metering", tree.site_metering.as_ref()),
            ("Solar PV", tree.solar.as_ref()),
            ("Battery", tree.battery.as_ref()),
            ("EV Charger", tree.ev_charger.as_ref()),
        ] {
            if let Some(device) = device {
                console.print(format!("  {label}"));
                print_device_branch(console, "    ", device, energy_entity_ids);
            }
        }

        if !tree.circuits.is_empty() {
            console.print(format!("  Circuits ({})", tree.circuits.len()));
            let mut circuits: Vec<&Device> = tree.circuits.iter().collect();
            circuits.sort_by_key(|circuit| circuit.display_name().to_owned());
            for circuit in circuits {
                print_device_branch(console, "    ", circuit, energy_entity_ids);
            }
        }
    }
}

/// Render devices and entities as a fixed-width table.
pub fn render_table(console: &Console, trees: &[PanelTree], energy_entity_ids: &BTreeSet<String>) {
    console.print(format!(
        "{:<28} {:<16} {:<44} {:<8} {:<18} {:<7}",
        "Device", "Model", "Entity ID", "Class", "State Class", "Energy?"
    ));
    for tree in trees {
        let mut devices: Vec<&Device> = vec![&tree.panel];
        devices.extend(tree.aux_devices());
        devices.extend(tree.circuits.iter());
        for device in devices {
            let mut entities: Vec<&Entity> = device.entities.iter().collect();
            entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
            if entities.is_empty() {
                console.print(format!(
                    "{:<28} {:<16}",
                    device.display_name(),
                    device.model.as_deref().unwrap_or("")
                ));
                continue;
            }
            for (index, entity) in entities.iter().enumerate() {
                let in_energy = if energy_entity_ids.contains(&entity.entity_id) {
                    "Y"
                } else {
                    ""
                };
                console.print(format!(
                    "{:<28} {:<16} {:<44} {:<8} {:<18} {:<7}",
                    if index == 0 { device.display_name() } else { "" },
                    if index == 0 {
                        device.model.as_deref().unwrap_or("")
                    } else {
                        ""
                    },
                    entity.entity_id,
                    entity.device_class.as_deref().unwrap_or(""),
                    entity.state_class.as_deref().unwrap_or(""),
                    in_energy,
                ));
            }
        }
    }
}

/// Render the trees as JSON.
pub fn render_json(console: &Console, trees: &[PanelTree]) -> anyhow::Result<()> {
    console.print(serde_json::to_string_pretty(trees)?);
    Ok(())
}

fn position_text(position: Position) -> &'static str {
    match position {
        Position::Upstream => "UPSTREAM",
        Position::InPanel => "IN_PANEL",
        Position::Downstream => "DOWNSTREAM",
    }
}

/// Render the computed energy topology: physical hierarchy, overlapping
/// integrations, circuit roles, and the dashboard decisions.
pub fn render_topology(console: &Console, topo: &EnergyTopology) {
    console.rule("Energy System Topology");

    for panel in &topo.panels {
        let root = if panel.is_root { " (ROOT)" } else { "" };
        console.print(format!("SPAN Panel {}{root}", panel.serial));

        if let Some(position) = panel.battery.position {
            let mut label = format!("  Battery position={}", position_text(position));
            if let Some(vendor) = &panel.battery.vendor {
                label.push_str(&format!(" vendor={vendor}"));
            }
            if let Some(model) = &panel.battery.model {
                label.push_str(&format!(" model={model}"));
            }
            console.print(label);
            if let Some(feed) = &panel.battery.feed_circuit_name {
                console.print(format!("    feed-circuit: {feed}"));
            }
        }

        if let Some(position) = panel.solar.position {
            let mut label = format!("  Solar PV position={}", position_text(position));
            if let Some(vendor) = &panel.solar.vendor {
                label.push_str(&format!(" vendor={vendor}"));
            }
            if let Some(product) = &panel.solar.product {
                label.push_str(&format!(" product={product}"));
            }
            console.print(label);
            if let Some(feed) = &panel.solar.feed_circuit_name {
                console.print(format!("    feed-circuit: {feed}"));
            }
        }
    }

    if !topo.integrations.is_empty() {
        console.blank();
        console.rule("Other Energy Integrations");
        for integration in &topo.integrations {
            console.print(format!(
                "{} ({} energy entities)",
                integration.platform,
                integration.energy_entities.len()
            ));
            for entity in &integration.energy_entities {
                console.print(format!("  - {}", entity.entity_id));
            }
        }
    }

    if !topo.circuit_roles.is_empty() {
        console.blank();
        console.rule("Circuit Roles");
        let mut roles: Vec<_> = topo.circuit_roles.iter().collect();
        roles.sort_by_key(|role| role.circuit.display_name().to_owned());
        for role in roles {
            let return_status = if role.skip_return_energy {
                "return:suppressed"
            } else {
                "return:included"
            };
            let consumption_status = if role.skip_consumption {
                "consumption:excluded"
            } else {
                "consumption:included"
            };
            console.print(format!(
                "{:<24} {:<10} {:<18} {:<22} {}",
                role.circuit.display_name(),
                format!("{:?}", role.role).to_lowercase(),
                return_status,
                consumption_status,
                role.reason,
            ));
        }
    }

    console.blank();
    console.rule("Energy Dashboard Assignments");
    let preferred: Vec<_> = topo.preferred().collect();
    let skipped: Vec<_> = topo.skipped().collect();

    if !preferred.is_empty() {
        console.print("Preferred (will be configured):".to_owned());
        for assignment in &preferred {
            if assignment.role == EnergyRole::DeviceConsumption {
                continue;
            }
            console.print(format!(
                "  {:<18} {:<44} {:<14} {}",
                format!("{:?}", assignment.role),
                assignment.entity_id,
                assignment.platform,
                assignment.reason,
            ));
        }
        let consumption_count = preferred
            .iter()
            .filter(|a| a.role == EnergyRole::DeviceConsumption)
            .count();
        if consumption_count > 0 {
            console.print(format!(
                "  {:<18} ({consumption_count} circuits)",
                "DeviceConsumption"
            ));
        }
    }

    if !skipped.is_empty() {
        console.print("Skipped (overlap detected):".to_owned());
        for assignment in &skipped {
            console.print(format!(
                "  {:<18} {:<44} {:<14} {}",
                format!("{:?}", assignment.role),
                assignment.entity_id,
                assignment.platform,
                assignment.reason,
            ));
        }
    }

    if !topo.warnings.is_empty() {
        console.blank();
        for warning in &topo.warnings {
            console.warn(warning);
        }
    }
}
