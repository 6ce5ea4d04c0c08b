//! Settings persistence
//!
//! Saves and loads the testbench endpoint configuration to/from disk as JSON.
//! Load falls back to defaults on any error so a damaged file never blocks
//! startup.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Endpoint the injector targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorSettings {
    /// Server IPv4 address, dotted quad.
    pub server_ip: String,
    /// Server TCP port.
    pub server_port: u16,
}

impl Default for InjectorSettings {
    fn default() -> Self {
        Self {
            server_ip: String::new(),
            server_port: 443,
        }
    }
}

impl InjectorSettings {
    /// Same validation the control plane applies: non-empty IP, nonzero port.
    pub fn is_valid(&self) -> bool {
        !self.server_ip.is_empty() && self.server_port != 0
    }
}

/// Load settings from `path`, falling back to defaults on any error.
pub fn load_settings(path: &Path) -> InjectorSettings {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse settings, using defaults: {}", e);
                InjectorSettings::default()
            }
        },
        Err(_) => InjectorSettings::default(),
    }
}

/// Save settings to `path` as pretty JSON.
pub fn save_settings(path: &Path, settings: &InjectorSettings) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)
}
