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

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::HaResult;

/// The request/response surface command flows run against.
///
/// [`crate::HaClient`] is the production implementation; tests substitute a
/// scripted fake so command logic can run without a hub.
#[async_trait]
pub trait Transport: Send {
    /// Send one command with object-shaped parameters and return its result
    /// payload.
    async fn send(&mut self, command: &str, params: Value) -> HaResult<Value>;
}
