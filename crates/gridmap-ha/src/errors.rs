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

use thiserror::Error;

/// Errors from the Home Assistant WebSocket API.
#[derive(Debug, Error)]
pub enum HaError {
    #[error("connection timed out: {0} — is Home Assistant running?")]
    ConnectTimeout(String),

    #[error("cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("auth failed: {0}")]
    AuthFailed(String),

    #[error("{command} failed: {message}")]
    Api { command: String, message: String },

    #[error("command '{0}' timed out after 30s")]
    CommandTimeout(String),

    #[error("connection lost during '{0}'")]
    Closed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("unexpected server message: {0}")]
    Protocol(String),
}

impl HaError {
    /// Whether this error is an authentication problem (maps to a distinct
    /// operator hint: check the token, not the network).
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthFailed(_))
    }
}

pub type HaResult<T> = Result<T, HaError>;
