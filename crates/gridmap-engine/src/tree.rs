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

//! Tree builder: groups panel-integration devices into per-panel trees.

use std::collections::{HashMap, HashSet};

use gridmap_types::{Device, Entity};
use serde::Serialize;

/// Integration domain of the panel devices.
pub const DOMAIN: &str = "span_ebus";

/// Model strings used to classify child devices.
pub const MODEL_PANEL: &str = "SPAN Panel";
pub const MODEL_CIRCUIT: &str = "Circuit";
pub const MODEL_BATTERY: &str = "Battery Storage";
pub const MODEL_SOLAR: &str = "Solar PV";
pub const MODEL_EV_CHARGER: &str = "EV Charger";
pub const MODEL_SITE_METERING: &str = "Site Metering";

/// A panel and its classified child devices.
#[derive(Debug, Clone, Serialize)]
pub struct PanelTree {
    pub panel: Device,
    pub circuits: Vec<Device>,
    pub battery: Option<Device>,
    pub solar: Option<Device>,
    pub ev_charger: Option<Device>,
    pub site_metering: Option<Device>,
}

impl PanelTree {
    fn new(panel: Device) -> Self {
        Self {
            panel,
            circuits: Vec::new(),
            battery: None,
            solar: None,
            ev_charger: None,
            site_metering: None,
        }
    }

    /// Panel serial from the identifier pair whose domain is the panel
    /// integration.
    pub fn serial(&self) -> Option<&str> {
        self.panel
            .identifiers
            .iter()
            .find(|(domain, _)| domain == DOMAIN)
            .map(|(_, serial)| serial.as_str())
    }

    /// All non-circuit sub-devices.
    pub fn aux_devices(&self) -> Vec<&Device> {
        [
            self.battery.as_ref(),
            self.solar.as_ref(),
            self.ev_charger.as_ref(),
            self.site_metering.as_ref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Upstream lug energy entity for a property suffix (e.g.
    /// `imported-energy`).
    ///
    /// Fallback chain: the panel's `lugs-upstream_{suffix}` entity, then the
    /// site-metering child's `{suffix}`, then the panel's generic
    /// `{suffix}`.
    pub fn upstream_entity(&self, suffix: &str) -> Option<&Entity> {
        if let Some(entity) = find_device_entity(&self.panel, &format!("lugs-upstream_{suffix}")) {
            return Some(entity);
        }
        if let Some(meter) = &self.site_metering
            && let Some(entity) = find_device_entity(meter, suffix)
        {
            return Some(entity);
        }
        find_device_entity(&self.panel, suffix)
    }
}

/// Find an enabled entity on a device by unique_id suffix.
///
/// Matching goes by unique_id alone, without requiring
/// device_class/state_class: the panel integration does not set those in
/// the entity registry, and entity_ids are slugified by the hub so they
/// cannot be reconstructed from the serial.
pub fn find_device_entity<'a>(device: &'a Device, suffix: &str) -> Option<&'a Entity> {
    device
        .entities
        .iter()
        .find(|entity| entity.is_enabled() && entity.unique_id.ends_with(suffix))
}

/// Result of a tree build: the trees plus any warnings raised while
/// descending the `via` graph.
#[derive(Debug, Clone, Default)]
pub struct TreeBuild {
    pub trees: Vec<PanelTree>,
    pub warnings: Vec<String>,
}

fn is_panel_domain(device: &Device) -> bool {
    device.identifiers.iter().any(|(domain, _)| domain == DOMAIN)
}

/// Build one tree per panel from the flat registries.
///
/// A device is a panel when its model is the panel model, or when its
/// `via_device_id` does not resolve to another panel-integration device
/// (so a daisy-chained sub-panel still gets its own tree, and orphans
/// whose parent vanished are treated as roots). Remaining devices are
/// grouped under their immediate `via` parent and classified by model,
/// with unknown models falling back to circuits.
///
/// The `via` graph over a valid registry is a forest; a cycle is detected
/// with a visited set while resolving parents, aborts the affected
/// devices, and is reported as a warning.
pub fn build_panel_trees(devices: &[Device], entities: &[Entity]) -> TreeBuild {
    let mut build = TreeBuild::default();

    // Attach panel-integration entities to their owning devices.
    let mut entities_by_device: HashMap<&str, Vec<&Entity>> = HashMap::new();
    for entity in entities {
        if entity.platform == DOMAIN
            && let Some(device_id) = &entity.device_id
        {
            entities_by_device.entry(device_id).or_default().push(entity);
        }
    }

    // Arena of panel-integration devices keyed by id, plus registry order.
    let mut panel_devices: HashMap<&str, Device> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for device in devices {
        if !is_panel_domain(device) {
            continue;
        }
        let mut owned = device.clone();
        owned.entities = entities_by_device
            .get(device.id.as_str())
            .map(|attached| attached.iter().map(|&entity| entity.clone()).collect())
            .unwrap_or_default();
        order.push(device.id.as_str());
        panel_devices.insert(device.id.as_str(), owned);
    }

    // Partition into panels and children of their immediate parent. A panel
    // keeps its panel-hood even when daisy-chained via another panel.
    let mut panel_ids: HashSet<&str> = HashSet::new();
    let mut children_by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
    for &id in &order {
        let device = &panel_devices[id];
        let parent = device
            .via_device_id
            .as_deref()
            .filter(|via| panel_devices.contains_key(via));
        if device.model.as_deref() == Some(MODEL_PANEL) || parent.is_none() {
            panel_ids.insert(id);
        }
    }
    for &id in &order {
        if panel_ids.contains(id) {
            continue;
        }
        let device = &panel_devices[id];
        let Some(via) = device.via_device_id.as_deref() else {
            continue;
        };

        // Cycle check: walk the via chain until a panel root.
        let mut visited: HashSet<&str> = HashSet::from([id]);
        let mut cursor = via;
        let cyclic = loop {
            if panel_ids.contains(cursor) {
                break false;
            }
            if !visited.insert(cursor) {
                break true;
            }
            match panel_devices
                .get(cursor)
                .and_then(|device| device.via_device_id.as_deref())
            {
                Some(next) => cursor = next,
                None => break false,
            }
        };
        if cyclic {
            build.warnings.push(format!(
                "Cycle in device hierarchy involving '{}' — skipping its tree",
                device.display_name()
            ));
            continue;
        }
        children_by_parent.entry(via).or_default().push(id);
    }

    // Assemble trees in registry order.
    for &id in &order {
        if !panel_ids.contains(id) {
            continue;
        }
        let mut tree = PanelTree::new(panel_devices[id].clone());
        for &child_id in children_by_parent.get(id).into_iter().flatten() {
            let child = panel_devices[child_id].clone();
            match child.model.as_deref().unwrap_or_default() {
                MODEL_BATTERY => tree.battery = Some(child),
                MODEL_SOLAR => tree.solar = Some(child),
                MODEL_EV_CHARGER => tree.ev_charger = Some(child),
                MODEL_SITE_METERING => tree.site_metering = Some(child),
                // Circuits and anything unrecognized.
                _ => tree.circuits.push(child),
            }
        }
        build.trees.push(tree);
    }

    build
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmap_types::Entity;

    pub(crate) fn device(id: &str, model: &str, serial: &str, via: Option<&str>) -> Device {
        Device {
            id: id.to_owned(),
            name: Some(model.to_owned()),
            model: Some(model.to_owned()),
            identifiers: vec![(DOMAIN.to_owned(), serial.to_owned())],
            via_device_id: via.map(str::to_owned),
            ..Device::default()
        }
    }

    pub(crate) fn entity(entity_id: &str, unique_id: &str, device_id: &str) -> Entity {
        Entity {
            entity_id: entity_id.to_owned(),
            unique_id: unique_id.to_owned(),
            platform: DOMAIN.to_owned(),
            device_id: Some(device_id.to_owned()),
            ..Entity::default()
        }
    }

    #[test]
    fn test_classifies_children_by_model() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("c1", MODEL_CIRCUIT, "nt-0000-abc12_c1-node", Some("p1")),
            device("b1", MODEL_BATTERY, "nt-0000-abc12_battery", Some("p1")),
            device("s1", MODEL_SOLAR, "nt-0000-abc12_solar", Some("p1")),
            device("m1", MODEL_SITE_METERING, "nt-0000-abc12_site-meter", Some("p1")),
            device("x1", "Mystery Widget", "nt-0000-abc12_widget", Some("p1")),
        ];

        let build = build_panel_trees(&devices, &[]);
        assert!(build.warnings.is_empty());
        assert_eq!(build.trees.len(), 1);

        let tree = &build.trees[0];
        assert_eq!(tree.serial(), Some("nt-0000-abc12"));
        assert_eq!(tree.battery.as_ref().unwrap().id, "b1");
        assert_eq!(tree.solar.as_ref().unwrap().id, "s1");
        assert_eq!(tree.site_metering.as_ref().unwrap().id, "m1");
        // Unknown model falls back to circuit.
        let circuit_ids: Vec<&str> = tree.circuits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(circuit_ids, vec!["c1", "x1"]);
    }

    #[test]
    fn test_daisy_chained_panel_is_its_own_tree() {
        let devices = vec![
            device("root", MODEL_PANEL, "nt-0000-root1", None),
            device("sub", MODEL_PANEL, "nt-0000-sub01", Some("root")),
            device("c1", MODEL_CIRCUIT, "nt-0000-sub01_c1", Some("sub")),
        ];

        let build = build_panel_trees(&devices, &[]);
        assert_eq!(build.trees.len(), 2);
        assert_eq!(build.trees[1].panel.id, "sub");
        assert_eq!(build.trees[1].circuits.len(), 1);
    }

    #[test]
    fn test_child_with_foreign_parent_becomes_root() {
        let devices = vec![device(
            "c1",
            MODEL_CIRCUIT,
            "nt-0000-abc12_c1",
            Some("dev-not-a-panel"),
        )];

        let build = build_panel_trees(&devices, &[]);
        assert_eq!(build.trees.len(), 1);
        assert_eq!(build.trees[0].panel.id, "c1");
    }

    #[test]
    fn test_non_panel_devices_filtered_out() {
        let mut hue = Device {
            id: "hue-bridge".to_owned(),
            model: Some("BSB002".to_owned()),
            ..Device::default()
        };
        hue.identifiers = vec![("hue".to_owned(), "001788FFFE123456".to_owned())];
        let devices = vec![hue, device("p1", MODEL_PANEL, "nt-0000-abc12", None)];

        let build = build_panel_trees(&devices, &[]);
        assert_eq!(build.trees.len(), 1);
        assert_eq!(build.trees[0].panel.id, "p1");
    }

    #[test]
    fn test_entities_attach_to_owning_device() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("c1", MODEL_CIRCUIT, "nt-0000-abc12_c1-node", Some("p1")),
        ];
        let mut foreign = entity("light.hue", "hue-abc", "c1");
        foreign.platform = "hue".to_owned();
        let entities = vec![
            entity(
                "sensor.kitchen_exported",
                "nt-0000-abc12_c1-node_exported-energy",
                "c1",
            ),
            foreign,
        ];

        let build = build_panel_trees(&devices, &entities);
        let circuit = &build.trees[0].circuits[0];
        assert_eq!(circuit.entities.len(), 1);
        assert!(
            find_device_entity(circuit, "_exported-energy")
                .is_some_and(|e| e.entity_id == "sensor.kitchen_exported")
        );
    }

    #[test]
    fn test_disabled_entities_not_found() {
        let devices = vec![
            device("p1", MODEL_PANEL, "nt-0000-abc12", None),
            device("c1", MODEL_CIRCUIT, "nt-0000-abc12_c1", Some("p1")),
        ];
        let mut disabled = entity("sensor.dead", "nt-0000-abc12_c1_exported-energy", "c1");
        disabled.disabled_by = Some("user".to_owned());

        let build = build_panel_trees(&devices, &[disabled]);
        assert!(find_device_entity(&build.trees[0].circuits[0], "_exported-energy").is_none());
    }

    #[test]
    fn test_via_cycle_detected_and_skipped() {
        // Two non-panel-model devices pointing at each other: neither
        // qualifies as a panel, and the via walk loops.
        let devices = vec![
            device("a", MODEL_CIRCUIT, "nt-0000-cycle_a", Some("b")),
            device("b", MODEL_CIRCUIT, "nt-0000-cycle_b", Some("a")),
        ];

        let build = build_panel_trees(&devices, &[]);
        assert!(build.trees.is_empty());
        assert_eq!(build.warnings.len(), 2);
        assert!(build.warnings[0].contains("Cycle"));
    }

    #[test]
    fn test_upstream_entity_fallback_chain() {
        // Primary: panel lugs-upstream entity.
        let mut panel = device("p1", MODEL_PANEL, "nt-0000-abc12", None);
        panel.entities = vec![entity(
            "sensor.panel_up_in",
            "nt-0000-abc12_lugs-upstream_imported-energy",
            "p1",
        )];
        let mut tree = PanelTree::new(panel);
        assert_eq!(
            tree.upstream_entity("imported-energy").unwrap().entity_id,
            "sensor.panel_up_in"
        );

        // Fallback: site-metering child.
        tree.panel.entities.clear();
        let mut meter = device("m1", MODEL_SITE_METERING, "nt-0000-abc12_site-meter", Some("p1"));
        meter.entities = vec![entity(
            "sensor.site_in",
            "nt-0000-abc12_site-meter_imported-energy",
            "m1",
        )];
        tree.site_metering = Some(meter);
        assert_eq!(
            tree.upstream_entity("imported-energy").unwrap().entity_id,
            "sensor.site_in"
        );

        // Last resort: generic suffix on the panel itself.
        tree.site_metering = None;
        tree.panel.entities = vec![entity(
            "sensor.panel_in",
            "nt-0000-abc12_imported-energy",
            "p1",
        )];
        assert_eq!(
            tree.upstream_entity("imported-energy").unwrap().entity_id,
            "sensor.panel_in"
        );

        tree.panel.entities.clear();
        assert!(tree.upstream_entity("imported-energy").is_none());
    }
}
