use std::net::Ipv4Addr;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use probemesh::minion::{CoordinatorConfig, DEFAULT_PORT};
use probemesh::{ExecuteOptions, Probe, DEFAULT_TIMEOUT_SECONDS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub minion: Minion,
    #[serde(default)]
    pub probing: Probing,
    #[serde(default)]
    pub probes: Vec<Probe>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Minion {
    /// Address to bind; the outbound interface address when unset.
    pub bind_ip: Option<Ipv4Addr>,
    pub netmask_prefix: u8,
    pub udp_port: u16,
    pub vote_interval_secs: u64,
    pub ping_interval_secs: u64,
    pub vote_grace_secs: u64,
    pub ping_warn_secs: u64,
    pub mailbox_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Probing {
    pub timeout_secs: u64,
    pub ignore_tls: bool,
    pub history_window: usize,
}

impl Default for Minion {
    fn default() -> Self {
        let defaults = CoordinatorConfig::default();
        Self {
            bind_ip: None,
            netmask_prefix: defaults.netmask_prefix,
            udp_port: DEFAULT_PORT,
            vote_interval_secs: defaults.vote_interval.as_secs(),
            ping_interval_secs: defaults.ping_interval.as_secs(),
            vote_grace_secs: defaults.vote_grace.as_secs(),
            ping_warn_secs: defaults.ping_warn_after.as_secs(),
            mailbox_capacity: defaults.mailbox_capacity,
        }
    }
}

impl Default for Probing {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECONDS,
            ignore_tls: false,
            history_window: probemesh::event::DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl Minion {
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            port: self.udp_port,
            netmask_prefix: self.netmask_prefix,
            vote_interval: Duration::from_secs(self.vote_interval_secs.max(1)),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            vote_grace: Duration::from_secs(self.vote_grace_secs),
            ping_warn_after: Duration::from_secs(self.ping_warn_secs),
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

impl Probing {
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions::new(self.timeout_secs).ignore_tls(self.ignore_tls)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/probemesh/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("probemesh/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Minion Configuration:")?;
        write_title_1(f, "Minion")?;
        let bind_ip = self.minion.bind_ip.map_or_else(|| "outbound interface".to_string(), |ip| ip.to_string());
        write_1(f, "Bind Address", &bind_ip)?;
        write_1(f, "Netmask", &format!("/{}", self.minion.netmask_prefix))?;
        write_1(f, "UDP Port", &self.minion.udp_port)?;
        write_1(f, "Vote Interval", &format!("{}s", self.minion.vote_interval_secs))?;
        write_1(f, "Ping Interval", &format!("{}s", self.minion.ping_interval_secs))?;
        write_1(f, "Vote Grace", &format!("{}s", self.minion.vote_grace_secs))?;

        write_title_1(f, "Probing")?;
        write_1(f, "Timeout", &format!("{}s", self.probing.timeout_secs))?;
        write_1(f, "Ignore TLS", &self.probing.ignore_tls)?;
        write_1(f, "History Window", &self.probing.history_window)?;

        write_title_1(f, "Probes")?;
        for probe in &self.probes {
            write_1(f, &probe.name, &probe.base_url)?;
            write_2(f, "Schedule", &probe.schedule)?;
            write_2(f, "Requests", &probe.request_names())?;
        }

        Ok(())
    }
}

impl Config {
    /// Load the config from `optional_path`, or the default location.
    ///
    /// A default config is written when the file does not exist yet.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;
        let write_failed = |source| Error::WriteFailed { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }

    pub fn probe(&self, name: &str) -> Option<&Probe> {
        self.probes.iter().find(|probe| probe.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minion");

        let config = Config::from_config(Some(&path)).unwrap();
        assert!(dir.path().join("minion.toml").exists());
        assert_eq!(config.minion.udp_port, DEFAULT_PORT);
        assert!(config.probes.is_empty());
    }

    #[test]
    fn test_parse_probes() {
        let raw = r#"
            [minion]
            bind_ip = "10.0.0.2"
            netmask_prefix = 28

            [[probes]]
            name = "Local"
            id = "local-1"
            base_url = "http://localhost:8080"
            schedule = "*/10 * * * * * *"

            [[probes.requests]]
            name = "Home"
            path_expr = "'/'"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.minion.bind_ip, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(config.minion.coordinator().netmask_prefix, 28);
        assert_eq!(config.minion.udp_port, DEFAULT_PORT);
        assert_eq!(config.probing.timeout_secs, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(config.probe("Local").unwrap().requests.len(), 1);
        assert!(config.to_string().contains("Local: http://localhost:8080"));
    }
}
