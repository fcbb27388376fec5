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

//! Topology extractor: decodes physical properties of each panel from the
//! diagnostic entities on its battery and solar sub-devices.

use std::collections::HashSet;

use gridmap_types::{Device, Entity, StateSnapshot};
use serde::Serialize;

use crate::tree::PanelTree;

/// Position of an auxiliary subsystem relative to the panel's main bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Upstream,
    InPanel,
    Downstream,
}

impl Position {
    /// Parse a reported position. The sensors report
    /// `UPSTREAM`/`IN_PANEL`/`DOWNSTREAM`; parsing is case-insensitive and
    /// tolerates dashes for underscores.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().replace('-', "_").as_str() {
            "UPSTREAM" => Some(Self::Upstream),
            "IN_PANEL" => Some(Self::InPanel),
            "DOWNSTREAM" => Some(Self::Downstream),
            _ => None,
        }
    }
}

/// Decoded properties of one auxiliary subsystem (battery or solar).
/// Fields stay `None` until evidence is observed in the states snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubsystemTopology {
    pub position: Option<Position>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    /// Human name of the feed circuit (the `_feed` entity's state).
    pub feed_circuit_name: Option<String>,
    /// Internal node id of the feed circuit (the `_feed` entity's
    /// `circuit_id` attribute), joined against circuit identifiers.
    pub feed_circuit_id: Option<String>,
}

impl SubsystemTopology {
    pub fn is_present(&self) -> bool {
        self.position.is_some() || self.vendor.is_some() || self.feed_circuit_id.is_some()
    }
}

/// Decoded physical topology for one panel.
#[derive(Debug, Clone, Serialize)]
pub struct PanelTopology {
    pub serial: String,
    /// True when the panel's `via` does not resolve to another panel.
    pub is_root: bool,
    pub battery: SubsystemTopology,
    pub solar: SubsystemTopology,
}

/// Find an entity on a sub-device by unique_id suffix.
///
/// Sub-device entities have unique_ids like `{serial}_{node}_{property}`;
/// matching by the trailing portion avoids depending on how the hub
/// slugifies entity_ids.
fn find_sub_entity<'a>(device: Option<&'a Device>, suffix: &str) -> Option<&'a Entity> {
    device?
        .entities
        .iter()
        .find(|entity| entity.unique_id.ends_with(suffix))
}

fn state_of(states: &StateSnapshot, entity: Option<&Entity>) -> Option<String> {
    entity.and_then(|entity| states.value(&entity.entity_id).map(str::to_owned))
}

fn attr_of(states: &StateSnapshot, entity: Option<&Entity>, name: &str) -> Option<String> {
    entity.and_then(|entity| states.attr(&entity.entity_id, name))
}

fn extract_subsystem(
    device: Option<&Device>,
    states: &StateSnapshot,
) -> SubsystemTopology {
    let feed = find_sub_entity(device, "_feed");
    SubsystemTopology {
        position: state_of(states, find_sub_entity(device, "_relative-position"))
            .as_deref()
            .and_then(Position::parse),
        vendor: state_of(states, find_sub_entity(device, "_vendor-name")),
        model: state_of(states, find_sub_entity(device, "_model")),
        product: state_of(states, find_sub_entity(device, "_product-name")),
        serial: state_of(states, find_sub_entity(device, "_serial-number")),
        feed_circuit_name: state_of(states, feed),
        feed_circuit_id: attr_of(states, feed, "circuit_id"),
    }
}

/// Extract the topology of every panel from its sub-device entity states.
///
/// Lookups go through the entities already registered on the tree's
/// sub-devices rather than constructed entity_ids (those don't survive the
/// hub's `has_entity_name` slugification).
pub fn extract_panel_topologies(
    trees: &[PanelTree],
    states: &StateSnapshot,
) -> Vec<PanelTopology> {
    let panel_ids: HashSet<&str> = trees.iter().map(|tree| tree.panel.id.as_str()).collect();

    trees
        .iter()
        .filter_map(|tree| {
            let serial = tree.serial()?;
            let is_root = !tree
                .panel
                .via_device_id
                .as_deref()
                .is_some_and(|via| panel_ids.contains(via));
            Some(PanelTopology {
                serial: serial.to_owned(),
                is_root,
                battery: extract_subsystem(tree.battery.as_ref(), states),
                solar: extract_subsystem(tree.solar.as_ref(), states),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmap_types::Device;
    use serde_json::json;

    use crate::tree::{
        DOMAIN, MODEL_BATTERY, MODEL_PANEL, MODEL_SOLAR, build_panel_trees,
    };

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

    fn fixture() -> (Vec<Device>, Vec<gridmap_types::Entity>, StateSnapshot) {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("b1", MODEL_BATTERY, "nt-0000-abc12_bess", Some("p1")),
            device("s1", MODEL_SOLAR, "nt-0000-abc12_solar", Some("p1")),
        ];
        let entities = vec![
            entity("sensor.bess_pos", "nt-0000-abc12_bess_relative-position", "b1"),
            entity("sensor.bess_vendor", "nt-0000-abc12_bess_vendor-name", "b1"),
            entity("sensor.bess_serial", "nt-0000-abc12_bess_serial-number", "b1"),
            entity("sensor.bess_feed", "nt-0000-abc12_bess_feed", "b1"),
            entity("sensor.pv_pos", "nt-0000-abc12_solar_relative-position", "s1"),
            entity("sensor.pv_vendor", "nt-0000-abc12_solar_vendor-name", "s1"),
            entity("sensor.pv_product", "nt-0000-abc12_solar_product-name", "s1"),
            entity("sensor.pv_feed", "nt-0000-abc12_solar_feed", "s1"),
        ];
        let states = StateSnapshot::from_raw(&[
            json!({"entity_id": "sensor.bess_pos", "state": "UPSTREAM", "attributes": {}}),
            json!({"entity_id": "sensor.bess_vendor", "state": "Tesla", "attributes": {}}),
            json!({"entity_id": "sensor.bess_serial", "state": "PW-123", "attributes": {}}),
            json!({"entity_id": "sensor.bess_feed", "state": "unknown", "attributes": {}}),
            json!({"entity_id": "sensor.pv_pos", "state": "IN_PANEL", "attributes": {}}),
            json!({"entity_id": "sensor.pv_vendor", "state": "Enphase Energy", "attributes": {}}),
            json!({"entity_id": "sensor.pv_product", "state": "Envoy-S", "attributes": {}}),
            json!({"entity_id": "sensor.pv_feed", "state": "Solar Feed",
                   "attributes": {"circuit_id": "pv-node"}}),
        ]);
        (devices, entities, states)
    }

    #[test]
    fn test_extracts_battery_and_solar_blocks() {
        let (devices, entities, states) = fixture();
        let build = build_panel_trees(&devices, &entities);
        let topologies = extract_panel_topologies(&build.trees, &states);

        assert_eq!(topologies.len(), 1);
        let topo = &topologies[0];
        assert_eq!(topo.serial, "nt-0000-abc12");
        assert!(topo.is_root);

        assert_eq!(topo.battery.position, Some(Position::Upstream));
        assert_eq!(topo.battery.vendor.as_deref(), Some("Tesla"));
        assert_eq!(topo.battery.serial.as_deref(), Some("PW-123"));
        // "unknown" feed state normalizes to absent.
        assert!(topo.battery.feed_circuit_name.is_none());
        assert!(topo.battery.feed_circuit_id.is_none());

        assert_eq!(topo.solar.position, Some(Position::InPanel));
        assert_eq!(topo.solar.vendor.as_deref(), Some("Enphase Energy"));
        assert_eq!(topo.solar.product.as_deref(), Some("Envoy-S"));
        assert_eq!(topo.solar.feed_circuit_name.as_deref(), Some("Solar Feed"));
        assert_eq!(topo.solar.feed_circuit_id.as_deref(), Some("pv-node"));
    }

    #[test]
    fn test_is_root_follows_panel_via_chain() {
        let devices = vec![
            device("root", MODEL_PANEL, "nt-0000-root1", None),
            device("sub", MODEL_PANEL, "nt-0000-sub01", Some("root")),
        ];
        let build = build_panel_trees(&devices, &[]);
        let topologies = extract_panel_topologies(&build.trees, &StateSnapshot::default());

        let by_serial: Vec<(&str, bool)> = topologies
            .iter()
            .map(|topo| (topo.serial.as_str(), topo.is_root))
            .collect();
        assert!(by_serial.contains(&("nt-0000-root1", true)));
        assert!(by_serial.contains(&("nt-0000-sub01", false)));
    }

    #[test]
    fn test_missing_sub_devices_yield_empty_blocks() {
        let devices = vec![device("p1", MODEL_PANEL, "nt-0000-abc12", None)];
        let build = build_panel_trees(&devices, &[]);
        let topologies = extract_panel_topologies(&build.trees, &StateSnapshot::default());

        let topo = &topologies[0];
        assert!(!topo.battery.is_present());
        assert!(!topo.solar.is_present());
    }

    #[test]
    fn test_position_parse_tolerance() {
        assert_eq!(Position::parse("in_panel"), Some(Position::InPanel));
        assert_eq!(Position::parse("In-Panel"), Some(Position::InPanel));
        assert_eq!(Position::parse("UPSTREAM"), Some(Position::Upstream));
        assert_eq!(Position::parse("sideways"), None);
    }
}
