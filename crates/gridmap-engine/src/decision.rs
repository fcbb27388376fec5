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

//! Decision engine: combine panel topologies, discovered integrations, and
//! circuit roles into dashboard role assignments.
//!
//! The central invariant is that no physical energy flow is counted twice
//! across preferred assignments. Contested flows keep one preferred
//! assignment and one or more non-preferred ones carrying the rationale, so
//! the prefs transformer can strip the losers from the dashboard.

use std::collections::{HashMap, HashSet};

use gridmap_types::{Device, Entity, StateSnapshot};
use serde::Serialize;

use crate::classify::{CircuitRole, circuit_node_id, classify_circuits};
use crate::discovery::{EnergyIntegration, discover_energy_integrations};
use crate::topology::{PanelTopology, Position, extract_panel_topologies};
use crate::tree::{DOMAIN, PanelTree, TreeBuild, find_device_entity};

/// Vendor name substring → candidate integration platforms.
///
/// Matching is intentionally loose: a key matches when it is a
/// case-insensitive substring of the reported vendor, so "Enphase Energy"
/// matches the `enphase` key.
const VENDOR_PLATFORMS: &[(&str, &[&str])] = &[
    ("tesla", &["powerwall", "tesla_fleet"]),
    ("enphase", &["enphase_envoy"]),
    ("solaredge", &["solaredge"]),
    ("generac", &["generac"]),
    ("sonnen", &["sonnen"]),
];

/// A dashboard role an entity can be nominated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyRole {
    GridImport,
    GridExport,
    Solar,
    BatteryCharge,
    BatteryDischarge,
    DeviceConsumption,
}

/// One nomination of an entity for a dashboard role.
#[derive(Debug, Clone, Serialize)]
pub struct RoleAssignment {
    pub role: EnergyRole,
    pub entity_id: String,
    pub platform: String,
    /// Preferred assignments go on the dashboard; non-preferred ones are
    /// recorded so overlapping entries can be removed.
    pub preferred: bool,
    pub reason: String,
    /// Sankey hierarchy parent for device-consumption entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_entity_id: Option<String>,
    /// Instantaneous-power companion entity for the dashboard's Now tab.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_entity_id: Option<String>,
}

impl RoleAssignment {
    fn new(role: EnergyRole, entity_id: &str, platform: &str, preferred: bool, reason: impl Into<String>) -> Self {
        Self {
            role,
            entity_id: entity_id.to_owned(),
            platform: platform.to_owned(),
            preferred,
            reason: reason.into(),
            parent_entity_id: None,
            rate_entity_id: None,
        }
    }

    fn with_rate(mut self, rate: Option<&Entity>) -> Self {
        self.rate_entity_id = rate.map(|entity| entity.entity_id.clone());
        self
    }
}

/// Complete energy system topology: the engine's output.
#[derive(Debug, Clone, Serialize)]
pub struct EnergyTopology {
    pub panels: Vec<PanelTopology>,
    pub integrations: Vec<EnergyIntegration>,
    pub circuit_roles: Vec<CircuitRole>,
    pub role_assignments: Vec<RoleAssignment>,
    pub warnings: Vec<String>,
}

impl EnergyTopology {
    pub fn preferred(&self) -> impl Iterator<Item = &RoleAssignment> {
        self.role_assignments.iter().filter(|a| a.preferred)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &RoleAssignment> {
        self.role_assignments.iter().filter(|a| !a.preferred)
    }
}

/// Find an active integration matching a vendor name, first match wins.
fn integration_for_vendor<'a>(
    vendor: Option<&str>,
    integrations: &'a [EnergyIntegration],
) -> Option<&'a EnergyIntegration> {
    let vendor = vendor?.to_lowercase();
    let mut candidates: HashSet<&str> = HashSet::new();
    for (key, platforms) in VENDOR_PLATFORMS {
        if vendor.contains(key) {
            candidates.extend(platforms.iter().copied());
        }
    }
    integrations
        .iter()
        .find(|integration| candidates.contains(integration.platform.as_str()))
}

/// All circuits across all trees claiming a feed node id.
fn circuits_claiming<'a>(trees: &'a [PanelTree], node_id: &str) -> Vec<&'a Device> {
    trees
        .iter()
        .flat_map(|tree| &tree.circuits)
        .filter(|circuit| circuit_node_id(circuit) == Some(node_id))
        .collect()
}

/// Sort trees so parent panels come before their sub-panels, walking the
/// `via` chain breadth-first from the roots.
fn topo_sort_trees<'a>(
    trees: &'a [PanelTree],
    device_id_to_serial: &HashMap<&str, &str>,
) -> Vec<&'a PanelTree> {
    let mut tree_by_serial: HashMap<&str, &PanelTree> = HashMap::new();
    for tree in trees {
        if let Some(serial) = tree.serial() {
            tree_by_serial.insert(serial, tree);
        }
    }

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut roots: Vec<&str> = Vec::new();
    for tree in trees {
        let Some(serial) = tree.serial() else { continue };
        let parent_serial = tree
            .panel
            .via_device_id
            .as_deref()
            .and_then(|via| device_id_to_serial.get(via).copied())
            .filter(|parent| tree_by_serial.contains_key(parent));
        match parent_serial {
            Some(parent) => children.entry(parent).or_default().push(serial),
            None => roots.push(serial),
        }
    }

    let mut sorted: Vec<&PanelTree> = Vec::new();
    let mut queue: Vec<&str> = roots;
    let mut index = 0;
    while index < queue.len() {
        let serial = queue[index];
        index += 1;
        sorted.push(tree_by_serial[serial]);
        if let Some(kids) = children.get(serial) {
            queue.extend(kids.iter().copied());
        }
    }

    // Anything unreachable (shouldn't happen) still gets processed.
    let seen: HashSet<&str> = sorted.iter().filter_map(|tree| tree.serial()).collect();
    for tree in trees {
        if tree.serial().is_some_and(|serial| !seen.contains(serial)) {
            sorted.push(tree);
        }
    }

    sorted
}

/// Run the whole pipeline over a tree build: extract topologies, discover
/// integrations, classify circuits, and decide role assignments. Tree-build
/// warnings are carried onto the resulting topology.
pub fn build_site_topology(
    build: &TreeBuild,
    devices: &[Device],
    entities: &[Entity],
    states: &StateSnapshot,
) -> EnergyTopology {
    let topologies = extract_panel_topologies(&build.trees, states);
    let integrations = discover_energy_integrations(devices, entities);
    let circuit_roles = classify_circuits(&build.trees, &topologies);
    let mut topology = build_energy_topology(&build.trees, topologies, integrations, circuit_roles);
    let mut warnings = build.warnings.clone();
    warnings.append(&mut topology.warnings);
    topology.warnings = warnings;
    topology
}

/// Build the complete energy topology with role assignments and overlap
/// detection.
pub fn build_energy_topology(
    trees: &[PanelTree],
    topologies: Vec<PanelTopology>,
    integrations: Vec<EnergyIntegration>,
    circuit_roles: Vec<CircuitRole>,
) -> EnergyTopology {
    let mut assignments: Vec<RoleAssignment> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let any_bess_upstream = topologies
        .iter()
        .any(|topo| topo.battery.position == Some(Position::Upstream));
    let all_bess_upstream = !topologies.is_empty()
        && topologies
            .iter()
            .all(|topo| topo.battery.position == Some(Position::Upstream));
    if any_bess_upstream && !all_bess_upstream {
        warnings.push(
            "Panels disagree on battery position — upstream grid handling disabled".to_owned(),
        );
    }

    let bess_vendor = topologies.iter().find_map(|topo| topo.battery.vendor.as_deref());
    let bess_integration = integration_for_vendor(bess_vendor, &integrations);
    if bess_vendor.is_some() && bess_integration.is_none() {
        warnings.push(format!(
            "No active integration matches battery vendor '{}'",
            bess_vendor.unwrap_or_default()
        ));
    }

    let pv_vendor = topologies.iter().find_map(|topo| topo.solar.vendor.as_deref());
    let pv_integration = integration_for_vendor(pv_vendor, &integrations);
    if pv_vendor.is_some() && pv_integration.is_none() {
        warnings.push(format!(
            "No active integration matches solar vendor '{}'",
            pv_vendor.unwrap_or_default()
        ));
    }

    // --- Grid source ---
    if all_bess_upstream && let Some(bess) = bess_integration {
        // The panel's upstream lugs sit post-battery and cannot serve as
        // grid; the battery integration's site meters are authoritative.
        let reason = format!(
            "BESS UPSTREAM on all panels — {} meters true grid",
            bess.platform
        );
        if let Some(import) = bess.find_entity("import") {
            let site_import = bess
                .energy_entities
                .iter()
                .find(|entity| entity.entity_id.contains("site_import"))
                .unwrap_or(import);
            assignments.push(RoleAssignment::new(
                EnergyRole::GridImport,
                &site_import.entity_id,
                &bess.platform,
                true,
                reason.clone(),
            ));
        }
        if let Some(export) = bess.find_entity("export") {
            let site_export = bess
                .energy_entities
                .iter()
                .find(|entity| entity.entity_id.contains("site_export"))
                .unwrap_or(export);
            assignments.push(RoleAssignment::new(
                EnergyRole::GridExport,
                &site_export.entity_id,
                &bess.platform,
                true,
                reason.clone(),
            ));
        }
        for tree in trees {
            let reason = "BESS UPSTREAM — panel upstream is post-battery, not true grid";
            if let Some(imported) = tree.upstream_entity("imported-energy") {
                assignments.push(RoleAssignment::new(
                    EnergyRole::GridImport,
                    &imported.entity_id,
                    DOMAIN,
                    false,
                    reason,
                ));
            }
            if let Some(exported) = tree.upstream_entity("exported-energy") {
                assignments.push(RoleAssignment::new(
                    EnergyRole::GridExport,
                    &exported.entity_id,
                    DOMAIN,
                    false,
                    reason,
                ));
            }
        }
        warnings.push(format!(
            "BESS is UPSTREAM of all panels (vendor={}) — using {} for grid metering",
            bess_vendor.unwrap_or("?"),
            bess.platform
        ));
    } else {
        for tree in trees {
            let reason = "Panel upstream metering — no UPSTREAM BESS or no matching integration";
            if let Some(imported) = tree.upstream_entity("imported-energy") {
                assignments.push(RoleAssignment::new(
                    EnergyRole::GridImport,
                    &imported.entity_id,
                    DOMAIN,
                    true,
                    reason,
                ));
            }
            if let Some(exported) = tree.upstream_entity("exported-energy") {
                assignments.push(RoleAssignment::new(
                    EnergyRole::GridExport,
                    &exported.entity_id,
                    DOMAIN,
                    true,
                    reason,
                ));
            }
        }
    }

    // --- Battery source ---
    for topo in &topologies {
        if topo.battery.position == Some(Position::InPanel)
            && let Some(feed_node) = topo.battery.feed_circuit_id.as_deref()
        {
            let claimants = circuits_claiming(trees, feed_node);
            if claimants.len() > 1 {
                warnings.push(format!(
                    "{} circuits claim battery feed node '{feed_node}' — using the first",
                    claimants.len()
                ));
            }
            if let Some(circuit) = claimants.first() {
                let rate = find_device_entity(circuit, "active-power");
                if let Some(discharge) = find_device_entity(circuit, "imported-energy") {
                    assignments.push(
                        RoleAssignment::new(
                            EnergyRole::BatteryDischarge,
                            &discharge.entity_id,
                            DOMAIN,
                            true,
                            "BESS IN_PANEL — feed circuit imported-energy = discharge",
                        )
                        .with_rate(rate),
                    );
                }
                if let Some(charge) = find_device_entity(circuit, "exported-energy") {
                    assignments.push(
                        RoleAssignment::new(
                            EnergyRole::BatteryCharge,
                            &charge.entity_id,
                            DOMAIN,
                            true,
                            "BESS IN_PANEL — feed circuit exported-energy = charge",
                        )
                        .with_rate(rate),
                    );
                }
            }
            // The dedicated integration double-counts the same battery.
            if let Some(bess) = bess_integration {
                for entity in &bess.energy_entities {
                    if entity.entity_id.contains("battery") {
                        let role = if entity.entity_id.contains("export") {
                            EnergyRole::BatteryDischarge
                        } else {
                            EnergyRole::BatteryCharge
                        };
                        assignments.push(RoleAssignment::new(
                            role,
                            &entity.entity_id,
                            &bess.platform,
                            false,
                            "BESS IN_PANEL — feed circuit is preferred (measurement consistency)",
                        ));
                    }
                }
            }
        } else if topo.battery.position == Some(Position::Upstream)
            && let Some(bess) = bess_integration
        {
            for entity in &bess.energy_entities {
                if !entity.entity_id.contains("battery") {
                    continue;
                }
                let reason = format!("BESS UPSTREAM — {} meters battery", bess.platform);
                if entity.entity_id.contains("export") {
                    assignments.push(RoleAssignment::new(
                        EnergyRole::BatteryDischarge,
                        &entity.entity_id,
                        &bess.platform,
                        true,
                        reason,
                    ));
                } else if entity.entity_id.contains("import") {
                    assignments.push(RoleAssignment::new(
                        EnergyRole::BatteryCharge,
                        &entity.entity_id,
                        &bess.platform,
                        true,
                        reason,
                    ));
                }
            }
            // Batteries are site-wide; one source covers all panels.
            break;
        }
    }

    // --- Solar source ---
    for topo in &topologies {
        if topo.solar.position == Some(Position::InPanel)
            && let Some(feed_node) = topo.solar.feed_circuit_id.as_deref()
        {
            let claimants = circuits_claiming(trees, feed_node);
            if claimants.len() > 1 {
                warnings.push(format!(
                    "{} circuits claim solar feed node '{feed_node}' — using the first",
                    claimants.len()
                ));
            }
            if let Some(circuit) = claimants.first()
                && let Some(production) = find_device_entity(circuit, "imported-energy")
            {
                let rate = find_device_entity(circuit, "active-power");
                assignments.push(
                    RoleAssignment::new(
                        EnergyRole::Solar,
                        &production.entity_id,
                        DOMAIN,
                        true,
                        "PV IN_PANEL — feed circuit imported-energy = solar production",
                    )
                    .with_rate(rate),
                );
            }
            if let Some(pv) = pv_integration {
                for entity in &pv.energy_entities {
                    assignments.push(RoleAssignment::new(
                        EnergyRole::Solar,
                        &entity.entity_id,
                        &pv.platform,
                        false,
                        "PV IN_PANEL — feed circuit is preferred (measurement consistency)",
                    ));
                }
            }
            break;
        } else if topo.solar.position == Some(Position::Upstream)
            && let Some(pv) = pv_integration
        {
            for entity in &pv.energy_entities {
                assignments.push(RoleAssignment::new(
                    EnergyRole::Solar,
                    &entity.entity_id,
                    &pv.platform,
                    true,
                    format!("PV UPSTREAM — {} meters solar", pv.platform),
                ));
            }
            break;
        }
    }

    // No preferred solar yet: fall back to the panel's own solar sub-device.
    if !assignments
        .iter()
        .any(|a| a.role == EnergyRole::Solar && a.preferred)
    {
        for tree in trees {
            if let Some(solar) = &tree.solar
                && let Some(production) = find_device_entity(solar, "imported-energy")
            {
                let rate = find_device_entity(solar, "active-power");
                assignments.push(
                    RoleAssignment::new(
                        EnergyRole::Solar,
                        &production.entity_id,
                        DOMAIN,
                        true,
                        "Panel solar device — no dedicated PV integration found",
                    )
                    .with_rate(rate),
                );
                break;
            }
        }
    }

    // --- Device consumption (with Sankey hierarchy) ---
    let preferred_grid_eids: HashSet<&str> = assignments
        .iter()
        .filter(|a| a.role == EnergyRole::GridImport && a.preferred)
        .map(|a| a.entity_id.as_str())
        .collect();

    let mut device_id_to_serial: HashMap<&str, &str> = HashMap::new();
    for tree in trees {
        if let Some(serial) = tree.serial() {
            device_id_to_serial.insert(tree.panel.id.as_str(), serial);
        }
    }

    // Process parents before children so a sub-panel can point its
    // consumption entry at its parent's upstream entity.
    let sorted_trees = topo_sort_trees(trees, &device_id_to_serial);

    let mut panel_parent_eids: HashMap<&str, String> = HashMap::new();
    let mut panel_assignments: Vec<RoleAssignment> = Vec::new();
    for tree in &sorted_trees {
        let Some(serial) = tree.serial() else { continue };
        let Some(upstream) = tree.upstream_entity("imported-energy") else {
            continue;
        };
        if preferred_grid_eids.contains(upstream.entity_id.as_str()) {
            continue;
        }
        let parent_eid = tree
            .panel
            .via_device_id
            .as_deref()
            .and_then(|via| device_id_to_serial.get(via))
            .and_then(|parent_serial| panel_parent_eids.get(parent_serial))
            .cloned();
        let rate = tree.upstream_entity("active-power");
        let mut assignment = RoleAssignment::new(
            EnergyRole::DeviceConsumption,
            &upstream.entity_id,
            DOMAIN,
            true,
            "Panel total energy — Sankey hierarchy parent",
        )
        .with_rate(rate);
        assignment.parent_entity_id = parent_eid;
        panel_assignments.push(assignment);
        panel_parent_eids.insert(serial, upstream.entity_id.clone());
    }
    assignments.append(&mut panel_assignments);

    let role_by_circuit: HashMap<&str, &CircuitRole> = circuit_roles
        .iter()
        .map(|role| (role.circuit.id.as_str(), role))
        .collect();
    for tree in trees {
        let parent_eid = tree
            .serial()
            .and_then(|serial| panel_parent_eids.get(serial))
            .cloned();
        for circuit in &tree.circuits {
            let role = role_by_circuit.get(circuit.id.as_str());
            if role.is_some_and(|role| role.skip_consumption) {
                continue;
            }
            let Some(consumption) = find_device_entity(circuit, "exported-energy") else {
                continue;
            };
            let rate = find_device_entity(circuit, "active-power");
            let mut assignment = RoleAssignment::new(
                EnergyRole::DeviceConsumption,
                &consumption.entity_id,
                DOMAIN,
                true,
                role.map_or("Circuit consumption".to_owned(), |role| role.reason.clone()),
            )
            .with_rate(rate);
            assignment.parent_entity_id = parent_eid.clone();
            assignments.push(assignment);
        }
    }

    EnergyTopology {
        panels: topologies,
        integrations,
        circuit_roles,
        role_assignments: assignments,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmap_types::Entity;
    use serde_json::json;

    use crate::tree::{MODEL_BATTERY, MODEL_CIRCUIT, MODEL_PANEL, build_panel_trees};

    fn device(id: &str, model: &str, serial: &str, via: Option<&str>) -> Device {
        Device {
            id: id.to_owned(),
            name: Some(model.to_owned()),
            model: Some(model.to_owned()),
            identifiers: vec![(DOMAIN.to_owned(), serial.to_owned())],
            via_device_id: via.map(str::to_owned),
            ..Device::default()
        }
    }

    fn panel_entity(entity_id: &str, unique_id: &str, device_id: &str) -> Entity {
        Entity {
            entity_id: entity_id.to_owned(),
            unique_id: unique_id.to_owned(),
            platform: DOMAIN.to_owned(),
            device_id: Some(device_id.to_owned()),
            ..Entity::default()
        }
    }

    fn energy_entity(entity_id: &str, platform: &str) -> Entity {
        Entity {
            entity_id: entity_id.to_owned(),
            unique_id: entity_id.to_owned(),
            platform: platform.to_owned(),
            device_class: Some("energy".to_owned()),
            state_class: Some("total_increasing".to_owned()),
            ..Entity::default()
        }
    }

    fn preferred_of<'a>(topo: &'a EnergyTopology, role: EnergyRole) -> Vec<&'a str> {
        topo.role_assignments
            .iter()
            .filter(|a| a.role == role && a.preferred)
            .map(|a| a.entity_id.as_str())
            .collect()
    }

    #[test]
    fn test_vendor_substring_match() {
        let integrations = vec![
            EnergyIntegration {
                platform: "enphase_envoy".to_owned(),
                devices: vec![],
                energy_entities: vec![],
            },
            EnergyIntegration {
                platform: "powerwall".to_owned(),
                devices: vec![],
                energy_entities: vec![],
            },
        ];

        assert_eq!(
            integration_for_vendor(Some("Enphase Energy"), &integrations)
                .map(|i| i.platform.as_str()),
            Some("enphase_envoy")
        );
        assert_eq!(
            integration_for_vendor(Some("TESLA"), &integrations).map(|i| i.platform.as_str()),
            Some("powerwall")
        );
        assert!(integration_for_vendor(Some("Acme"), &integrations).is_none());
        assert!(integration_for_vendor(None, &integrations).is_none());
    }

    #[test]
    fn test_panel_upstream_is_grid_without_battery() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("c1", MODEL_CIRCUIT, "nt-0000-abc12_kitchen", Some("p1")),
        ];
        let entities = vec![
            panel_entity("sensor.up_in", "nt-0000-abc12_lugs-upstream_imported-energy", "p1"),
            panel_entity("sensor.up_out", "nt-0000-abc12_lugs-upstream_exported-energy", "p1"),
            panel_entity("sensor.k_e", "nt-0000-abc12_kitchen_exported-energy", "c1"),
        ];

        let build = build_panel_trees(&devices, &entities);
        let topo = build_site_topology(&build, &devices, &entities, &StateSnapshot::default());

        assert_eq!(preferred_of(&topo, EnergyRole::GridImport), vec!["sensor.up_in"]);
        assert_eq!(preferred_of(&topo, EnergyRole::GridExport), vec!["sensor.up_out"]);
        // Panel upstream is the grid source, so it is not doubled as a
        // consumption parent.
        assert_eq!(
            preferred_of(&topo, EnergyRole::DeviceConsumption),
            vec!["sensor.k_e"]
        );
        assert!(topo.warnings.is_empty());
    }

    #[test]
    fn test_battery_position_disagreement_warns() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-aaaa1", None),
            device("b1", MODEL_BATTERY, "nt-0000-aaaa1_bess", Some("p1")),
            device("p2", MODEL_PANEL, "nt-0000-bbbb2", None),
            device("b2", MODEL_BATTERY, "nt-0000-bbbb2_bess", Some("p2")),
        ];
        let entities = vec![
            panel_entity("sensor.b1_pos", "nt-0000-aaaa1_bess_relative-position", "b1"),
            panel_entity("sensor.b2_pos", "nt-0000-bbbb2_bess_relative-position", "b2"),
        ];
        let states = StateSnapshot::from_raw(&[
            json!({"entity_id": "sensor.b1_pos", "state": "UPSTREAM", "attributes": {}}),
            json!({"entity_id": "sensor.b2_pos", "state": "IN_PANEL", "attributes": {}}),
        ]);

        let build = build_panel_trees(&devices, &entities);
        let topo = build_site_topology(&build, &devices, &entities, &states);
        assert!(
            topo.warnings
                .iter()
                .any(|warning| warning.contains("disagree on battery position"))
        );
    }

    #[test]
    fn test_vendor_without_integration_warns() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("b1", MODEL_BATTERY, "nt-0000-abc12_bess", Some("p1")),
        ];
        let entities = vec![panel_entity(
            "sensor.bess_vendor",
            "nt-0000-abc12_bess_vendor-name",
            "b1",
        )];
        let states = StateSnapshot::from_raw(&[
            json!({"entity_id": "sensor.bess_vendor", "state": "Tesla", "attributes": {}}),
        ]);

        let build = build_panel_trees(&devices, &entities);
        let topo = build_site_topology(&build, &devices, &entities, &states);
        assert!(
            topo.warnings
                .iter()
                .any(|warning| warning.contains("battery vendor 'Tesla'"))
        );
    }

    #[test]
    fn test_upstream_battery_takes_grid() {
        let powerwall = Device {
            id: "pw".to_owned(),
            name: Some("Powerwall".to_owned()),
            model: Some("Powerwall".to_owned()),
            identifiers: vec![("powerwall".to_owned(), "pw-1".to_owned())],
            ..Device::default()
        };
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("b1", MODEL_BATTERY, "nt-0000-abc12_bess", Some("p1")),
            powerwall,
        ];

        let mut entities = vec![
            panel_entity("sensor.up_in", "nt-0000-abc12_lugs-upstream_imported-energy", "p1"),
            panel_entity("sensor.up_out", "nt-0000-abc12_lugs-upstream_exported-energy", "p1"),
            panel_entity("sensor.bess_pos", "nt-0000-abc12_bess_relative-position", "b1"),
            panel_entity("sensor.bess_vendor", "nt-0000-abc12_bess_vendor-name", "b1"),
        ];
        for id in [
            "sensor.pw_site_import",
            "sensor.pw_site_export",
            "sensor.pw_battery_import",
            "sensor.pw_battery_export",
        ] {
            entities.push(energy_entity(id, "powerwall"));
        }
        let states = StateSnapshot::from_raw(&[
            json!({"entity_id": "sensor.bess_pos", "state": "UPSTREAM", "attributes": {}}),
            json!({"entity_id": "sensor.bess_vendor", "state": "Tesla", "attributes": {}}),
        ]);

        let build = build_panel_trees(&devices, &entities);
        let topo = build_site_topology(&build, &devices, &entities, &states);

        assert_eq!(
            preferred_of(&topo, EnergyRole::GridImport),
            vec!["sensor.pw_site_import"]
        );
        assert_eq!(
            preferred_of(&topo, EnergyRole::GridExport),
            vec!["sensor.pw_site_export"]
        );
        assert_eq!(
            preferred_of(&topo, EnergyRole::BatteryDischarge),
            vec!["sensor.pw_battery_export"]
        );
        assert_eq!(
            preferred_of(&topo, EnergyRole::BatteryCharge),
            vec!["sensor.pw_battery_import"]
        );

        // The panel's own upstream meters are demoted, not forgotten.
        let demoted: Vec<&str> = topo
            .role_assignments
            .iter()
            .filter(|a| !a.preferred && a.platform == DOMAIN)
            .map(|a| a.entity_id.as_str())
            .collect();
        assert!(demoted.contains(&"sensor.up_in"));
        assert!(demoted.contains(&"sensor.up_out"));

        // And the panel total becomes a consumption parent instead of grid.
        assert_eq!(
            preferred_of(&topo, EnergyRole::DeviceConsumption),
            vec!["sensor.up_in"]
        );
    }

    #[test]
    fn test_duplicate_feed_claim_warns() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("s1", crate::tree::MODEL_SOLAR, "nt-0000-abc12_solar", Some("p1")),
            device("c1", MODEL_CIRCUIT, "nt-0000-abc12_pv-node", Some("p1")),
            device("c2", MODEL_CIRCUIT, "other-serial_pv-node", Some("p1")),
        ];
        let entities = vec![
            panel_entity("sensor.pv_pos", "nt-0000-abc12_solar_relative-position", "s1"),
            panel_entity("sensor.pv_feed", "nt-0000-abc12_solar_feed", "s1"),
            panel_entity("sensor.pv_gen", "nt-0000-abc12_pv-node_imported-energy", "c1"),
        ];
        let states = StateSnapshot::from_raw(&[
            json!({"entity_id": "sensor.pv_pos", "state": "IN_PANEL", "attributes": {}}),
            json!({"entity_id": "sensor.pv_feed", "state": "Solar",
                   "attributes": {"circuit_id": "pv-node"}}),
        ]);

        let build = build_panel_trees(&devices, &entities);
        let topo = build_site_topology(&build, &devices, &entities, &states);

        assert_eq!(preferred_of(&topo, EnergyRole::Solar), vec!["sensor.pv_gen"]);
        assert!(topo.warnings.iter().any(|w| w.contains("claim solar feed node")));
    }
}
