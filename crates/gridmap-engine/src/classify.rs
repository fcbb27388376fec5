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

//! Circuit classifier: tag every circuit as load, PV feed, BESS feed, or
//! EV feed, and decide which of its meters the dashboard may use.
//!
//! Direction convention is panel-centric: a circuit's `exported-energy` is
//! energy delivered TO the circuit (consumption), `imported-energy` is
//! backfeed FROM the circuit (generation). On a pure load the backfeed
//! reading is current-transformer noise and must be suppressed.

use std::collections::HashMap;

use gridmap_types::Device;
use serde::Serialize;

use crate::topology::{PanelTopology, Position, SubsystemTopology};
use crate::tree::{DOMAIN, PanelTree};

/// Role of a circuit in the energy system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Load,
    PvFeed,
    BessFeed,
    EvFeed,
}

/// A circuit's role plus its meter suppression flags.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitRole {
    pub circuit: Device,
    pub role: Role,
    /// Exclude the circuit's imported-energy (backfeed) meter.
    pub skip_return_energy: bool,
    /// Exclude the circuit's exported-energy meter from device consumption.
    pub skip_consumption: bool,
    pub reason: String,
}

/// Node id portion of a circuit's panel-domain identifier.
///
/// Identifier local-ids look like `{serial}_{node_id}`; the first `_`
/// separates the panel serial from the node id.
pub fn circuit_node_id(circuit: &Device) -> Option<&str> {
    circuit
        .identifiers
        .iter()
        .find(|(domain, local_id)| domain == DOMAIN && local_id.contains('_'))
        .and_then(|(_, local_id)| local_id.split_once('_'))
        .map(|(_, node_id)| node_id)
}

fn feed_matches(subsystem: &SubsystemTopology, node_id: Option<&str>) -> bool {
    match (subsystem.feed_circuit_id.as_deref(), node_id) {
        (Some(feed), Some(node)) => feed == node,
        _ => false,
    }
}

/// Classify every circuit across all trees.
pub fn classify_circuits(trees: &[PanelTree], topologies: &[PanelTopology]) -> Vec<CircuitRole> {
    let topo_by_serial: HashMap<&str, &PanelTopology> = topologies
        .iter()
        .map(|topo| (topo.serial.as_str(), topo))
        .collect();

    let mut roles = Vec::new();
    for tree in trees {
        let Some(serial) = tree.serial() else {
            continue;
        };
        let topo = topo_by_serial.get(serial);

        for circuit in &tree.circuits {
            let node_id = circuit_node_id(circuit);

            if let Some(topo) = topo
                && feed_matches(&topo.solar, node_id)
            {
                roles.push(pv_feed_role(circuit, &topo.solar));
                continue;
            }
            if let Some(topo) = topo
                && feed_matches(&topo.battery, node_id)
            {
                roles.push(bess_feed_role(circuit, &topo.battery));
                continue;
            }

            roles.push(CircuitRole {
                circuit: circuit.clone(),
                role: Role::Load,
                skip_return_energy: true,
                skip_consumption: false,
                reason: "Pure load circuit: return energy suppressed (CT noise)".to_owned(),
            });
        }
    }

    roles
}

fn pv_feed_role(circuit: &Device, solar: &SubsystemTopology) -> CircuitRole {
    if solar.position == Some(Position::InPanel) {
        CircuitRole {
            circuit: circuit.clone(),
            role: Role::PvFeed,
            // Backfeed IS solar production; forward flow is parasitic load.
            skip_return_energy: false,
            skip_consumption: false,
            reason: "PV feed circuit (IN_PANEL): imported-energy = solar production, \
                     exported-energy = parasitic load"
                .to_owned(),
        }
    } else {
        CircuitRole {
            circuit: circuit.clone(),
            role: Role::PvFeed,
            skip_return_energy: true,
            skip_consumption: false,
            reason: format!(
                "PV feed circuit ({}): solar metered by dedicated integration",
                position_label(solar.position)
            ),
        }
    }
}

fn bess_feed_role(circuit: &Device, battery: &SubsystemTopology) -> CircuitRole {
    if battery.position == Some(Position::InPanel) {
        CircuitRole {
            circuit: circuit.clone(),
            role: Role::BessFeed,
            // Backfeed IS battery discharge; both directions are battery
            // operations, not consumption.
            skip_return_energy: false,
            skip_consumption: true,
            reason: "BESS feed circuit (IN_PANEL): imported-energy = discharge, \
                     exported-energy = charge — excluded from device_consumption"
                .to_owned(),
        }
    } else {
        CircuitRole {
            circuit: circuit.clone(),
            role: Role::BessFeed,
            skip_return_energy: true,
            skip_consumption: false,
            reason: format!(
                "BESS feed circuit ({}): battery metered by dedicated integration",
                position_label(battery.position)
            ),
        }
    }
}

fn position_label(position: Option<Position>) -> &'static str {
    match position {
        Some(Position::Upstream) => "UPSTREAM",
        Some(Position::InPanel) => "IN_PANEL",
        Some(Position::Downstream) => "DOWNSTREAM",
        None => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmap_types::StateSnapshot;
    use serde_json::json;

    use crate::topology::extract_panel_topologies;
    use crate::tree::{MODEL_BATTERY, MODEL_CIRCUIT, MODEL_PANEL, MODEL_SOLAR, build_panel_trees};

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

    fn entity(entity_id: &str, unique_id: &str, device_id: &str) -> gridmap_types::Entity {
        gridmap_types::Entity {
            entity_id: entity_id.to_owned(),
            unique_id: unique_id.to_owned(),
            platform: DOMAIN.to_owned(),
            device_id: Some(device_id.to_owned()),
            ..gridmap_types::Entity::default()
        }
    }

    #[test]
    fn test_circuit_node_id() {
        let circuit = device("c1", MODEL_CIRCUIT, "nt-0000-abc12_c1-node", None);
        assert_eq!(circuit_node_id(&circuit), Some("c1-node"));

        let bare = device("p1", MODEL_PANEL, "nt-0000-abc12", None);
        assert_eq!(circuit_node_id(&bare), None);
    }

    fn classified(pv_position: &str, bess_position: &str) -> Vec<CircuitRole> {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("s1", MODEL_SOLAR, "nt-0000-abc12_solar", Some("p1")),
            device("b1", MODEL_BATTERY, "nt-0000-abc12_bess", Some("p1")),
            device("pv-c", MODEL_CIRCUIT, "nt-0000-abc12_pv-node", Some("p1")),
            device("bess-c", MODEL_CIRCUIT, "nt-0000-abc12_bess-node", Some("p1")),
            device("load-c", MODEL_CIRCUIT, "nt-0000-abc12_kitchen", Some("p1")),
        ];
        let entities = vec![
            entity("sensor.pv_pos", "nt-0000-abc12_solar_relative-position", "s1"),
            entity("sensor.pv_feed", "nt-0000-abc12_solar_feed", "s1"),
            entity("sensor.bess_pos", "nt-0000-abc12_bess_relative-position", "b1"),
            entity("sensor.bess_feed", "nt-0000-abc12_bess_feed", "b1"),
        ];
        let states = StateSnapshot::from_raw(&[
            json!({"entity_id": "sensor.pv_pos", "state": pv_position, "attributes": {}}),
            json!({"entity_id": "sensor.pv_feed", "state": "Solar",
                   "attributes": {"circuit_id": "pv-node"}}),
            json!({"entity_id": "sensor.bess_pos", "state": bess_position, "attributes": {}}),
            json!({"entity_id": "sensor.bess_feed", "state": "Battery",
                   "attributes": {"circuit_id": "bess-node"}}),
        ]);

        let build = build_panel_trees(&devices, &entities);
        let topologies = extract_panel_topologies(&build.trees, &states);
        classify_circuits(&build.trees, &topologies)
    }

    fn role_of<'a>(roles: &'a [CircuitRole], circuit_id: &str) -> &'a CircuitRole {
        roles
            .iter()
            .find(|role| role.circuit.id == circuit_id)
            .unwrap()
    }

    #[test]
    fn test_in_panel_feeds() {
        let roles = classified("IN_PANEL", "IN_PANEL");
        assert_eq!(roles.len(), 3);

        let pv = role_of(&roles, "pv-c");
        assert_eq!(pv.role, Role::PvFeed);
        assert!(!pv.skip_return_energy);
        assert!(!pv.skip_consumption);

        let bess = role_of(&roles, "bess-c");
        assert_eq!(bess.role, Role::BessFeed);
        assert!(!bess.skip_return_energy);
        assert!(bess.skip_consumption);

        let load = role_of(&roles, "load-c");
        assert_eq!(load.role, Role::Load);
        assert!(load.skip_return_energy);
        assert!(!load.skip_consumption);
    }

    #[test]
    fn test_external_feeds_suppress_return() {
        let roles = classified("UPSTREAM", "DOWNSTREAM");

        let pv = role_of(&roles, "pv-c");
        assert_eq!(pv.role, Role::PvFeed);
        assert!(pv.skip_return_energy);
        assert!(!pv.skip_consumption);

        let bess = role_of(&roles, "bess-c");
        assert_eq!(bess.role, Role::BessFeed);
        assert!(bess.skip_return_energy);
        assert!(!bess.skip_consumption);
    }

    #[test]
    fn test_no_topology_means_all_loads() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("c1", MODEL_CIRCUIT, "nt-0000-abc12_c1", Some("p1")),
        ];
        let build = build_panel_trees(&devices, &[]);
        let topologies = extract_panel_topologies(&build.trees, &StateSnapshot::default());
        let roles = classify_circuits(&build.trees, &topologies);

        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role, Role::Load);
        assert!(roles[0].reason.contains("CT noise"));
    }
}
