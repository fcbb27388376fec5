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

//! Home Assistant WebSocket API client.
//!
//! The hub speaks an id-correlated command protocol over one WebSocket:
//! the server opens with `auth_required`, the client authenticates with a
//! long-lived token, and each command is a JSON object answered by a
//! `result` message carrying the same `id`. Unrelated frames (event pushes,
//! stale results) are skipped while waiting.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use crate::errors::{HaError, HaResult};
use crate::transport::Transport;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for the Home Assistant command API.
///
/// Usage:
/// ```no_run
/// # use gridmap_ha::HaClient;
/// # use serde_json::json;
/// # async fn example() -> gridmap_ha::HaResult<()> {
/// let mut client = HaClient::connect("http://ha.local:8123", "token").await?;
/// let devices = client.send_command("config/device_registry/list", json!({})).await?;
/// # let _ = devices;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HaClient {
    ws: WsStream,
    msg_id: u64,
}

/// Derive the WebSocket endpoint from the hub's base URL.
fn ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{base}/api/websocket")
}

impl HaClient {
    /// Connect and run the auth handshake.
    pub async fn connect(base_url: &str, token: &str) -> HaResult<Self> {
        let endpoint = ws_url(base_url);
        debug!("Connecting to {endpoint}");

        let connected = timeout(HANDSHAKE_TIMEOUT, connect_async(endpoint.as_str()))
            .await
            .map_err(|_| HaError::ConnectTimeout(base_url.to_owned()))?;
        let (ws, _response) = connected.map_err(|error| HaError::Connect {
            url: base_url.to_owned(),
            reason: error.to_string(),
        })?;

        let mut client = Self { ws, msg_id: 0 };
        client.authenticate(token).await?;
        debug!("Authenticated with {base_url}");
        Ok(client)
    }

    async fn authenticate(&mut self, token: &str) -> HaResult<()> {
        let first = self.recv_json(HANDSHAKE_TIMEOUT, "auth").await?;
        if first.get("type").and_then(Value::as_str) != Some("auth_required") {
            return Err(HaError::Protocol(format!(
                "expected auth_required, got: {}",
                first.get("type").and_then(Value::as_str).unwrap_or("?")
            )));
        }

        self.send_json(&json!({"type": "auth", "access_token": token}))
            .await?;

        let reply = self.recv_json(HANDSHAKE_TIMEOUT, "auth").await?;
        match reply.get("type").and_then(Value::as_str) {
            Some("auth_ok") => Ok(()),
            _ => Err(HaError::AuthFailed(
                reply
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown auth error")
                    .to_owned(),
            )),
        }
    }

    /// Send a command and return its result payload.
    pub async fn send_command(&mut self, command: &str, params: Value) -> HaResult<Value> {
        self.msg_id += 1;
        let id = self.msg_id;

        let mut message = json!({"id": id, "type": command});
        if let (Some(target), Value::Object(extra)) = (message.as_object_mut(), params) {
            for (key, value) in extra {
                target.insert(key, value);
            }
        }
        debug!("→ {command} (id {id})");
        self.send_json(&message).await?;

        // Read frames until the response matching our id shows up; events
        // and responses to earlier commands are skipped.
        loop {
            let response = match timeout(COMMAND_TIMEOUT, self.ws.next()).await {
                Err(_) => return Err(HaError::CommandTimeout(command.to_owned())),
                Ok(None) => return Err(HaError::Closed(command.to_owned())),
                Ok(Some(Err(
                    tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
                ))) => return Err(HaError::Closed(command.to_owned())),
                Ok(Some(Err(error))) => return Err(error.into()),
                Ok(Some(Ok(frame))) => frame,
            };
            let Message::Text(text) = response else {
                trace!("Skipping non-text frame");
                continue;
            };
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|error| HaError::Protocol(error.to_string()))?;
            if parsed.get("id").and_then(Value::as_u64) != Some(id) {
                trace!("Skipping unrelated message while waiting for id {id}");
                continue;
            }
            if parsed.get("success").and_then(Value::as_bool) != Some(true) {
                let message = parsed
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_owned();
                warn!("✗ {command} failed: {message}");
                return Err(HaError::Api {
                    command: command.to_owned(),
                    message,
                });
            }
            debug!("← {command} ok (id {id})");
            return Ok(parsed.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Close the connection. Errors on close are ignored; the run is over.
    pub async fn close(mut self) {
        if let Err(error) = self.ws.close(None).await {
            trace!("Error closing websocket: {error}");
        }
    }

    async fn send_json(&mut self, message: &Value) -> HaResult<()> {
        self.ws.send(Message::Text(message.to_string())).await?;
        Ok(())
    }

    async fn recv_json(&mut self, limit: Duration, phase: &str) -> HaResult<Value> {
        loop {
            let frame = match timeout(limit, self.ws.next()).await {
                Err(_) => return Err(HaError::CommandTimeout(phase.to_owned())),
                Ok(None) => return Err(HaError::Closed(phase.to_owned())),
                Ok(Some(result)) => result?,
            };
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text)
                    .map_err(|error| HaError::Protocol(error.to_string()));
            }
        }
    }
}

#[async_trait]
impl Transport for HaClient {
    async fn send(&mut self, command: &str, params: Value) -> HaResult<Value> {
        self.send_command(command, params).await
    }
}
