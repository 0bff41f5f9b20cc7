// Typed server configuration: a JSON file loaded with `serde_json`
// (mirroring the grounding crate's `configuration::load_server_config_from_file`
// convention) overlaid with CLI flags parsed by `argh`, the grounding
// crate's own CLI library.

use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;

/// The subnet and lease parameters the server runs with. Deserializable
/// from a JSON config file; every field may also be supplied or
/// overridden on the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub server_addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    #[serde(default)]
    pub min_addr: Option<Ipv4Addr>,
    #[serde(default)]
    pub max_addr: Option<Ipv4Addr>,
    pub server_name: String,
    pub lease_seconds: u32,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("required field {0} was not supplied by the config file or the command line")]
    MissingField(&'static str),
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: String, #[source] source: serde_json::Error },
}

/// Loads a `ServerConfig` from an optional JSON file on disk, layering
/// the CLI overrides from `cli` on top. Any field present on neither side
/// is a `ConfigError::MissingField`.
pub fn load(cli: &CliArgs) -> Result<ServerConfig, ConfigError> {
    let mut partial = match &cli.config {
        Some(path) => PartialConfig::from_file(path)?,
        None => PartialConfig::default(),
    };
    partial.apply_cli_overrides(cli);
    partial.into_config()
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    server_addr: Option<Ipv4Addr>,
    mask: Option<Ipv4Addr>,
    min_addr: Option<Ipv4Addr>,
    max_addr: Option<Ipv4Addr>,
    server_name: Option<String>,
    lease_seconds: Option<u32>,
}

impl PartialConfig {
    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseFile {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(v) = cli.server_addr {
            self.server_addr = Some(v);
        }
        if let Some(v) = cli.mask {
            self.mask = Some(v);
        }
        if let Some(v) = cli.min_addr {
            self.min_addr = Some(v);
        }
        if let Some(v) = cli.max_addr {
            self.max_addr = Some(v);
        }
        if let Some(v) = cli.server_name.clone() {
            self.server_name = Some(v);
        }
        if let Some(v) = cli.lease_seconds {
            self.lease_seconds = Some(v);
        }
    }

    fn into_config(self) -> Result<ServerConfig, ConfigError> {
        Ok(ServerConfig {
            server_addr: self.server_addr.ok_or(ConfigError::MissingField("server_addr"))?,
            mask: self.mask.ok_or(ConfigError::MissingField("mask"))?,
            min_addr: self.min_addr,
            max_addr: self.max_addr,
            server_name: self.server_name.ok_or(ConfigError::MissingField("server_name"))?,
            lease_seconds: self.lease_seconds.ok_or(ConfigError::MissingField("lease_seconds"))?,
        })
    }
}

/// Command-line arguments, parsed with `argh`. Every field overrides the
/// matching field loaded from `--config`, when given.
#[derive(argh::FromArgs, Debug)]
#[argh(description = "a minimal single-subnet DHCP server")]
pub struct CliArgs {
    /// path to a JSON config file
    #[argh(option)]
    pub config: Option<std::path::PathBuf>,

    /// this server's own address on the subnet it serves
    #[argh(option)]
    pub server_addr: Option<Ipv4Addr>,

    /// the subnet mask
    #[argh(option)]
    pub mask: Option<Ipv4Addr>,

    /// lowest address this server may offer (defaults to network + 2)
    #[argh(option)]
    pub min_addr: Option<Ipv4Addr>,

    /// highest address this server may offer (defaults to broadcast - 1)
    #[argh(option)]
    pub max_addr: Option<Ipv4Addr>,

    /// the host name this server identifies itself with
    #[argh(option)]
    pub server_name: Option<String>,

    /// lease duration advertised to clients, in seconds
    #[argh(option)]
    pub lease_seconds: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(config: Option<std::path::PathBuf>) -> CliArgs {
        CliArgs {
            config,
            server_addr: Some(Ipv4Addr::new(192, 168, 1, 10)),
            mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            min_addr: None,
            max_addr: None,
            server_name: Some("dhcplited".to_string()),
            lease_seconds: Some(3600),
        }
    }

    #[test]
    fn cli_only_config_loads() {
        let cfg = load(&cli_with(None)).unwrap();
        assert_eq!(cfg.server_addr, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(cfg.lease_seconds, 3600);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let mut cli = cli_with(None);
        cli.server_name = None;
        let err = load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("server_name")));
    }

    #[test]
    fn cli_overrides_file_values() {
        let dir = std::env::temp_dir();
        let path = dir.join("dhcplite_test_config_override.json");
        fs::write(
            &path,
            r#"{"server_addr":"10.0.0.1","mask":"255.0.0.0","server_name":"from-file","lease_seconds":60}"#,
        )
        .unwrap();

        let mut cli = CliArgs {
            config: Some(path.clone()),
            server_addr: None,
            mask: None,
            min_addr: None,
            max_addr: None,
            server_name: Some("from-cli".to_string()),
            lease_seconds: None,
        };
        let cfg = load(&cli).unwrap();
        assert_eq!(cfg.server_name, "from-cli");
        assert_eq!(cfg.server_addr, Ipv4Addr::new(10, 0, 0, 1));

        cli.config = None;
        fs::remove_file(&path).ok();
    }
}
