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

//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "gridmap")]
#[command(author, version, about = "Home Assistant energy & area configuration CLI")]
#[command(
    long_about = "Reconciles SPAN-style monitoring panels with a Home Assistant instance:\n\
    inspects the device/entity registries and live states, computes the electrical\n\
    topology, and configures the Energy Dashboard without double-counting flows.\n\
    \nExamples:\n  \
    gridmap --url http://ha.local:8123 audit\n  \
    gridmap energy --topology --dry-run\n  \
    gridmap energy-audit --prune"
)]
pub struct Cli {
    /// Home Assistant URL (or HA_URL env var)
    #[arg(long, env = "HA_URL")]
    pub url: String,

    /// Long-lived access token (or HASS_API_TOKEN env var)
    #[arg(long, env = "HASS_API_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Show planned changes without applying them
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Display the panel device tree and report misconfigurations
    Audit {
        /// Output format
        #[arg(long = "format", value_enum, default_value = "tree")]
        format: OutputFormat,
    },

    /// Assign panel circuit devices to Home Assistant areas
    Areas {
        /// JSON file mapping device names to area names (null to skip)
        #[arg(long, value_name = "PATH")]
        mapping: Option<String>,

        /// Create areas that don't exist
        #[arg(long)]
        create_missing: bool,
    },

    /// Auto-configure the Energy Dashboard for panel devices
    Energy {
        /// Use topology-aware configuration (detects overlaps with other
        /// integrations)
        #[arg(long)]
        topology: bool,
    },

    /// Show the energy system topology and recommendations
    EnergyTopology,

    /// Find stale/orphaned entity references in the Energy Dashboard
    EnergyAudit {
        /// Remove stale entries from the energy dashboard
        #[arg(long)]
        prune: bool,
    },

    /// Link sub-panels to parent panels via the device registry
    LinkPanels {
        /// child_serial:parent_serial pairs
        #[arg(required = true, value_name = "CHILD:PARENT")]
        links: Vec<String>,
    },

    /// Add water sensors to the Energy Dashboard water tab
    Water {
        /// Explicit sensor entity ids (auto-discovered when omitted)
        entity_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Tree,
    Table,
    Json,
}
