use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;
use types::{AddressError, Destination, NetworkAddress};
use uuid::Uuid;
use vmess::{EndpointSpec, Identity};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid server address {0:?}: {1}")]
    Address(String, AddressError),

    #[error("server {0} has no users")]
    NoUsers(String),

    #[error("nothing to run, configure socks or vmess_inbound")]
    NothingToRun,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub socks: Option<SocksConfig>,
    pub vmess_inbound: Option<VmessInboundConfig>,
    pub vmess_outbound: Option<VmessOutboundConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocksConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmessInboundConfig {
    pub listen: SocketAddr,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmessOutboundConfig {
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub id: Uuid,
    #[serde(default)]
    pub alter_ids: u16,
    #[serde(default)]
    pub level: u32,
    pub label: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.socks.is_none() && self.vmess_inbound.is_none() {
            return Err(ConfigError::NothingToRun);
        }
        if let Some(outbound) = &self.vmess_outbound {
            outbound.endpoints()?;
        }
        Ok(())
    }
}

impl VmessOutboundConfig {
    pub fn endpoints(&self) -> Result<Vec<EndpointSpec>, ConfigError> {
        self.servers.iter().map(ServerConfig::endpoint).collect()
    }
}

impl ServerConfig {
    pub fn endpoint(&self) -> Result<EndpointSpec, ConfigError> {
        let address = NetworkAddress::parse(&self.address)
            .map_err(|e| ConfigError::Address(self.address.clone(), e))?;
        let destination = Destination::new(address, self.port);
        if self.users.is_empty() {
            return Err(ConfigError::NoUsers(destination.to_string()));
        }
        let identities = self
            .users
            .iter()
            .map(|user| Arc::new(user.identity()))
            .collect();
        Ok(EndpointSpec::new(destination, identities))
    }
}

impl UserConfig {
    pub fn identity(&self) -> Identity {
        let identity = Identity::new(self.id, self.alter_ids).with_level(self.level);
        match &self.label {
            Some(label) => identity.with_label(label.clone()),
            None => identity,
        }
    }
}
