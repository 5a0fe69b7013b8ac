//! Container environment as the metadata store.
//!
//! A container's environment is fixed at creation. These helpers build and read
//! `KEY=VALUE` lists; changing a live container means recreating it with a
//! merged list (see `Orchestrator::set_container_env`).

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MODEL_KEY: &str = "model";
pub const PARAMETERS_KEY: &str = "parameters";
pub const PORT_KEY: &str = "port";

/// First value stored under `key`. Entries without `=` are skipped.
pub fn get_env<'a>(env: &'a [String], key: &str) -> Option<&'a str> {
    env.iter().find_map(|entry| match entry.split_once('=') {
        Some((k, v)) if k == key => Some(v),
        _ => None,
    })
}

/// Replace the first entry for `key` in place, or append a new one.
pub fn set_env(env: &mut Vec<String>, key: &str, value: &str) {
    let entry = format!("{}={}", key, value);
    match env
        .iter()
        .position(|e| e.split_once('=').is_some_and(|(k, _)| k == key))
    {
        Some(idx) => env[idx] = entry,
        None => env.push(entry),
    }
    debug!("Set env {}={}", key, value);
}

/// Drop every entry for `key`; returns whether anything was removed.
pub fn remove_env(env: &mut Vec<String>, key: &str) -> bool {
    let before = env.len();
    env.retain(|e| !e.split_once('=').is_some_and(|(k, _)| k == key));
    env.len() != before
}

/// What an engine container serves, written into its environment at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub model: String,
    pub parameters: String,
    pub port: u16,
}

impl ContainerMetadata {
    pub fn new(model: impl Into<String>, parameters: impl Into<String>, port: u16) -> Self {
        Self {
            model: model.into(),
            parameters: parameters.into(),
            port,
        }
    }

    pub fn to_env(&self) -> Vec<String> {
        let mut env = Vec::with_capacity(3);
        set_env(&mut env, MODEL_KEY, &self.model);
        set_env(&mut env, PARAMETERS_KEY, &self.parameters);
        set_env(&mut env, PORT_KEY, &self.port.to_string());
        env
    }

    pub fn from_env(env: &[String]) -> Option<Self> {
        Some(Self {
            model: get_env(env, MODEL_KEY)?.to_string(),
            parameters: get_env(env, PARAMETERS_KEY)?.to_string(),
            port: get_env(env, PORT_KEY)?.parse().ok()?,
        })
    }

    /// Engine model tag, e.g. `llama2:7b`
    pub fn model_tag(&self) -> String {
        format!("{}:{}", self.model, self.parameters)
    }
}
