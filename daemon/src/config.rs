use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};

use crate::storage::{Config, FileIoWithBackup};

pub const SETTINGS_FILE: &str = "settings.json";

/// Daemon settings, loaded once at startup and immutable afterwards.
///
/// Field names on disk keep the historical `settings.json` spelling so an
/// existing file keeps working. Unknown fields are ignored, missing fields
/// take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Settings {
    pub directory: String,
    pub name: String,
    #[serde(rename = "MOTD")]
    pub motd: String,
    /// Java heap ceiling handed to the child, MiB.
    #[serde(rename = "MaxRAM")]
    pub max_ram: u32,
    pub max_players: u32,
    /// Game port written into `server.properties`.
    pub port: u16,
    /// Control-plane listen address; a bare `:port` binds all interfaces.
    pub listen_address: String,
    pub passthrough_std_err: bool,
    pub passthrough_std_out: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directory: "./".to_string(),
            name: "?".to_string(),
            motd: "?".to_string(),
            max_ram: 6192,
            max_players: 20,
            port: 25565,
            listen_address: ":8080".to_string(),
            passthrough_std_err: true,
            passthrough_std_out: false,
        }
    }
}

impl FileIoWithBackup for Settings {}

impl Config for Settings {
    type ConfigType = Settings;
}

impl Settings {
    pub fn load() -> anyhow::Result<Settings> {
        if !Path::new(SETTINGS_FILE).is_file() {
            info!("'{SETTINGS_FILE}' not found, generating default file.");
        }
        Self::load_config_or_default(SETTINGS_FILE, Self::default)
            .with_context(|| format!("could not load {SETTINGS_FILE}"))
    }

    /// Directory the server artifacts live in.
    pub fn server_dir(&self) -> PathBuf {
        Path::new(&self.directory).join("mcserver")
    }

    pub fn world_dir(&self) -> PathBuf {
        self.server_dir().join("world")
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let text = if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        };
        text.parse()
            .with_context(|| format!("invalid listen address '{}'", self.listen_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_historical_document() {
        let settings = Settings::default();
        assert_eq!(settings.max_ram, 6192);
        assert_eq!(settings.port, 25565);
        assert_eq!(settings.listen_address, ":8080");
        assert!(settings.passthrough_std_err);
        assert!(!settings.passthrough_std_out);
    }

    #[test]
    fn loads_historical_field_names_and_ignores_unknown_ones() {
        let settings: Settings = serde_json::from_str(
            r#"{
            "Directory": "/srv/mc",
            "Name": "skyblock",
            "MOTD": "welcome",
            "MaxRAM": 4096,
            "MaxPlayers": 10,
            "Port": 25566,
            "ListenAddress": "127.0.0.1:9090",
            "PassthroughStdErr": false,
            "SomeFutureKnob": true
        }"#,
        )
        .unwrap();
        assert_eq!(settings.directory, "/srv/mc");
        assert_eq!(settings.name, "skyblock");
        assert_eq!(settings.motd, "welcome");
        assert_eq!(settings.max_ram, 4096);
        assert_eq!(settings.port, 25566);
        assert!(!settings.passthrough_std_err);
        // missing field takes the default
        assert!(!settings.passthrough_std_out);
    }

    #[test]
    fn server_dir_is_nested_under_the_working_directory() {
        let settings = Settings {
            directory: "/srv/mc".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.server_dir(), PathBuf::from("/srv/mc/mcserver"));
        assert_eq!(settings.world_dir(), PathBuf::from("/srv/mc/mcserver/world"));
    }

    #[test]
    fn bare_port_listen_address_binds_all_interfaces() {
        let settings = Settings::default();
        assert_eq!(settings.listen_addr().unwrap().to_string(), "0.0.0.0:8080");

        let explicit = Settings {
            listen_address: "127.0.0.1:9090".to_string(),
            ..Settings::default()
        };
        assert_eq!(explicit.listen_addr().unwrap().to_string(), "127.0.0.1:9090");

        let bad = Settings {
            listen_address: "nonsense".to_string(),
            ..Settings::default()
        };
        assert!(bad.listen_addr().is_err());
    }
}
