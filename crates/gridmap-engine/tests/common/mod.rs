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

//! Shared registry fixtures for the engine integration tests.

use gridmap_engine::tree::DOMAIN;
use gridmap_engine::{EnergyRole, EnergyTopology, TreeBuild, build_panel_trees, build_site_topology};
use gridmap_types::{Device, Entity, StateSnapshot};
use serde_json::{Value, json};

pub fn device(id: &str, model: &str, domain: &str, local_id: &str, via: Option<&str>) -> Device {
    Device {
        id: id.to_owned(),
        name: Some(model.to_owned()),
        model: Some(model.to_owned()),
        identifiers: vec![(domain.to_owned(), local_id.to_owned())],
        via_device_id: via.map(str::to_owned),
        ..Device::default()
    }
}

pub fn panel_device(id: &str, model: &str, local_id: &str, via: Option<&str>) -> Device {
    device(id, model, DOMAIN, local_id, via)
}

pub fn panel_entity(entity_id: &str, unique_id: &str, device_id: &str) -> Entity {
    Entity {
        entity_id: entity_id.to_owned(),
        unique_id: unique_id.to_owned(),
        platform: DOMAIN.to_owned(),
        device_id: Some(device_id.to_owned()),
        ..Entity::default()
    }
}

pub fn energy_entity(entity_id: &str, platform: &str, device_id: Option<&str>) -> Entity {
    Entity {
        entity_id: entity_id.to_owned(),
        unique_id: entity_id.to_owned(),
        platform: platform.to_owned(),
        device_id: device_id.map(str::to_owned),
        device_class: Some("energy".to_owned()),
        state_class: Some("total_increasing".to_owned()),
        ..Entity::default()
    }
}

pub fn state(entity_id: &str, value: &str) -> Value {
    json!({"entity_id": entity_id, "state": value, "attributes": {}})
}

pub fn state_with_attrs(entity_id: &str, value: &str, attributes: Value) -> Value {
    json!({"entity_id": entity_id, "state": value, "attributes": attributes})
}

pub fn run_pipeline(
    devices: &[Device],
    entities: &[Entity],
    raw_states: &[Value],
) -> (TreeBuild, EnergyTopology) {
    let states = StateSnapshot::from_raw(raw_states);
    let build = build_panel_trees(devices, entities);
    let topology = build_site_topology(&build, devices, entities, &states);
    (build, topology)
}

pub fn preferred_ids(topology: &EnergyTopology, role: EnergyRole) -> Vec<String> {
    topology
        .role_assignments
        .iter()
        .filter(|a| a.role == role && a.preferred)
        .map(|a| a.entity_id.clone())
        .collect()
}

pub fn skipped_ids(topology: &EnergyTopology, role: EnergyRole) -> Vec<String> {
    topology
        .role_assignments
        .iter()
        .filter(|a| a.role == role && !a.preferred)
        .map(|a| a.entity_id.clone())
        .collect()
}
