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

pub mod areas;
pub mod audit;
pub mod energy;
pub mod panels;
pub mod water;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use gridmap_ha::{HaResult, Transport};
    use serde_json::Value;

    /// Scripted transport: canned response per command, every request
    /// recorded for assertions.
    pub struct FakeTransport {
        responses: HashMap<String, Value>,
        pub sent: Vec<(String, Value)>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self {
                responses: HashMap::new(),
                sent: Vec::new(),
            }
        }

        pub fn respond(mut self, command: &str, value: Value) -> Self {
            self.responses.insert(command.to_owned(), value);
            self
        }

        /// Parameters of the last `energy/save_prefs` call, if any.
        pub fn saved_prefs(&self) -> Option<&Value> {
            self.sent
                .iter()
                .rev()
                .find(|(command, _)| command == "energy/save_prefs")
                .map(|(_, params)| params)
        }

        pub fn sent_commands(&self) -> Vec<&str> {
            self.sent.iter().map(|(command, _)| command.as_str()).collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&mut self, command: &str, params: Value) -> HaResult<Value> {
            self.sent.push((command.to_owned(), params));
            Ok(self.responses.get(command).cloned().unwrap_or(Value::Null))
        }
    }
}
