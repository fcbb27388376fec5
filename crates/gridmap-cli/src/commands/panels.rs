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

//! Panel linking command: record the physical daisy-chain in the hub.
//!
//! Each link sets a sub-panel's parent through the panel integration's
//! `link_subpanel` service, which writes the `via_device_id` reference the
//! tree builder later reads.

use anyhow::{Result, bail};
use gridmap_engine::tree::DOMAIN;
use gridmap_ha::Transport;
use serde_json::json;

use crate::output::Console;

/// One validated child:parent serial pair.
#[derive(Debug, Clone, PartialEq)]
struct LinkPair {
    child: String,
    parent: String,
}

/// Panel serials look like `nt-NNNN-xxxxx`.
fn is_panel_serial(serial: &str) -> bool {
    let Some(rest) = serial.strip_prefix("nt-") else {
        return false;
    };
    let Some((digits, suffix)) = rest.split_once('-') else {
        return false;
    };
    digits.len() == 4
        && digits.bytes().all(|byte| byte.is_ascii_digit())
        && !suffix.is_empty()
        && suffix
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit())
}

fn parse_links(links: &[String]) -> Result<Vec<LinkPair>> {
    let mut pairs = Vec::new();
    for link in links {
        let Some((child, parent)) = link.split_once(':') else {
            bail!("Invalid link format '{link}' — expected child:parent");
        };
        if !is_panel_serial(child) {
            bail!("Invalid child serial '{child}' — expected nt-NNNN-xxxxx");
        }
        if !is_panel_serial(parent) {
            bail!("Invalid parent serial '{parent}' — expected nt-NNNN-xxxxx");
        }
        pairs.push(LinkPair {
            child: child.to_owned(),
            parent: parent.to_owned(),
        });
    }
    Ok(pairs)
}

/// `link-panels`: link sub-panels to parent panels via the device registry.
pub async fn link_panels(
    transport: &mut dyn Transport,
    console: &Console,
    dry_run: bool,
    links: &[String],
) -> Result<()> {
    let pairs = parse_links(links)?;

    for pair in &pairs {
        if dry_run {
            console.dry_run(&format!("Would link {} → {}", pair.child, pair.parent));
        } else {
            console.info(&format!("Linking {} → {}", pair.child, pair.parent));
        }
    }

    if dry_run {
        return Ok(());
    }

    for pair in &pairs {
        transport
            .send(
                "call_service",
                json!({
                    "domain": DOMAIN,
                    "service": "link_subpanel",
                    "service_data": {
                        "sub_serial": pair.child,
                        "parent_serial": pair.parent,
                    },
                }),
            )
            .await?;
        console.ok(&format!("Linked {} → {}", pair.child, pair.parent));
    }

    Ok(())
}
