//! Deterministic container names.

use crate::config::catalog::is_name_component;
use crate::error::{RuntimeError, RuntimeResult};

/// `{model}_{parameters}`, e.g. `llama2_7b`
pub fn canonical_name(model: &str, parameters: &str) -> RuntimeResult<String> {
    for (what, value) in [("model", model), ("parameters", parameters)] {
        if !is_name_component(value) {
            return Err(RuntimeError::InvalidRequest {
                reason: format!("{} '{}' cannot be part of a container name", what, value),
            });
        }
    }
    Ok(format!("{}_{}", model, parameters))
}

/// Lock key for a host port, kept apart from container names
pub fn port_key(port: u16) -> String {
    format!("port:{}", port)
}
