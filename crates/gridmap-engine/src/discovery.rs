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

//! Integration discovery: find every non-panel integration that exposes
//! cumulative-energy meters. These are the overlap candidates the decision
//! engine weighs against the panel's own meters.

use std::collections::{BTreeMap, HashMap, HashSet};

use gridmap_types::{Device, Entity};
use serde::Serialize;

use crate::tree::DOMAIN;

/// One non-panel integration with cumulative-energy entities.
#[derive(Debug, Clone, Serialize)]
pub struct EnergyIntegration {
    pub platform: String,
    /// Unique devices referenced by the energy entities, in first-seen order.
    pub devices: Vec<Device>,
    pub energy_entities: Vec<Entity>,
}

impl EnergyIntegration {
    /// First energy entity whose entity_id contains a keyword.
    pub fn find_entity(&self, keyword: &str) -> Option<&Entity> {
        self.energy_entities
            .iter()
            .find(|entity| entity.entity_id.contains(keyword))
    }
}

/// Scan all entities for cumulative-energy meters outside the panel
/// integration: device_class `energy`, state_class `total_increasing`,
/// not disabled. Grouped by platform in lexical order.
pub fn discover_energy_integrations(
    devices: &[Device],
    entities: &[Entity],
) -> Vec<EnergyIntegration> {
    let device_by_id: HashMap<&str, &Device> = devices
        .iter()
        .map(|device| (device.id.as_str(), device))
        .collect();

    let mut by_platform: BTreeMap<&str, Vec<&Entity>> = BTreeMap::new();
    for entity in entities {
        if entity.platform != DOMAIN
            && entity.device_class.as_deref() == Some("energy")
            && entity.state_class.as_deref() == Some("total_increasing")
            && entity.is_enabled()
        {
            by_platform.entry(&entity.platform).or_default().push(entity);
        }
    }

    by_platform
        .into_iter()
        .map(|(platform, platform_entities)| {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut platform_devices: Vec<Device> = Vec::new();
            for entity in &platform_entities {
                if let Some(device_id) = entity.device_id.as_deref()
                    && seen.insert(device_id)
                    && let Some(&device) = device_by_id.get(device_id)
                {
                    platform_devices.push(device.clone());
                }
            }
            EnergyIntegration {
                platform: platform.to_owned(),
                devices: platform_devices,
                energy_entities: platform_entities.into_iter().cloned().collect(),
            }
        })
        .collect()
}
