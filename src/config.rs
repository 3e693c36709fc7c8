use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::command::is_valid_name;
use crate::filter::WordFilter;
use crate::style::Style;

pub const DEFAULT_PORT: u16 = 2704;

/// Ports a client may connect to.
pub const CLIENT_PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=49151;

/// Server settings as they appear in a TOML file or on the command line.
/// Every field is optional so the two sources can be layered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    /// PEM certificate chain.
    pub cert: Option<PathBuf>,
    /// PEM private key.
    pub key: Option<PathBuf>,
    /// File whose lines form the welcome banner.
    pub banner: Option<PathBuf>,
    /// File of word patterns to mask in chat.
    pub filter: Option<PathBuf>,
    /// Append the console transcript to this file.
    pub log_file: Option<PathBuf>,
    /// ANSI colour on the console and in messages (default on).
    pub colour: Option<bool>,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub banner: Option<String>,
    pub filter: Option<Vec<String>>,
    pub log_file: Option<PathBuf>,
    pub style: Style,
}

impl ServerFileConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(self, overrides: ServerFileConfig) -> Self {
        Self {
            bind: overrides.bind.or(self.bind),
            port: overrides.port.or(self.port),
            cert: overrides.cert.or(self.cert),
            key: overrides.key.or(self.key),
            banner: overrides.banner.or(self.banner),
            filter: overrides.filter.or(self.filter),
            log_file: overrides.log_file.or(self.log_file),
            colour: overrides.colour.or(self.colour),
        }
    }

    /// Validate and load the banner and filter files.
    pub fn resolve(self) -> Result<ServerConfig, ConfigError> {
        let cert = self.cert.ok_or(ConfigError::Missing("cert"))?;
        let key = self.key.ok_or(ConfigError::Missing("key"))?;

        let banner = match &self.banner {
            Some(path) => Some(load_lines(path)?.join("\n")),
            None => None,
        };

        let filter = match &self.filter {
            Some(path) => {
                let entries = load_lines(path)?;
                WordFilter::new(entries.as_slice()).map_err(ConfigError::InvalidFilter)?;
                Some(entries)
            }
            None => None,
        };

        let colour = self.colour.unwrap_or(true);
        Ok(ServerConfig {
            bind: self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: self.port.unwrap_or(DEFAULT_PORT),
            cert,
            key,
            banner,
            filter,
            log_file: self.log_file,
            style: Style {
                colour,
                timestamps: true,
            },
        })
    }
}

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// PEM certificate(s) to trust for the server.
    pub ca: PathBuf,
    pub name: String,
}

impl ClientConfig {
    pub fn new(host: String, port: u16, ca: PathBuf, name: String) -> Result<Self, ConfigError> {
        validate_client_port(port)?;
        if !is_valid_name(&name) {
            return Err(ConfigError::InvalidName(name));
        }
        Ok(Self {
            host,
            port,
            ca,
            name,
        })
    }
}

pub fn validate_client_port(port: u16) -> Result<(), ConfigError> {
    if CLIENT_PORT_RANGE.contains(&port) {
        Ok(())
    } else {
        Err(ConfigError::InvalidPort(port))
    }
}

/// Read a banner or filter file, dropping `//` comment lines.
pub fn load_lines(path: &Path) -> Result<Vec<String>, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
    Ok(strip_comments(&contents))
}

pub fn strip_comments(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| !line.starts_with("//"))
        .map(str::to_string)
        .collect()
}

/// Errors that can occur when building a configuration.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Missing(&'static str),
    InvalidFilter(regex::Error),
    InvalidPort(u16),
    InvalidName(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Missing(field) => write!(f, "Missing required setting: {}", field),
            Self::InvalidFilter(e) => write!(f, "Invalid filter pattern: {}", e),
            Self::InvalidPort(port) => write!(
                f,
                "Invalid port {}, it must be between {} and {}",
                port,
                CLIENT_PORT_RANGE.start(),
                CLIENT_PORT_RANGE.end()
            ),
            Self::InvalidName(name) => {
                write!(f, "Invalid name {:?}, only letters and numbers are allowed", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
