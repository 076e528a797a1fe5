//! Adapter configuration

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use gnmi_netconf_common::{AdapterConfig, Error, LoggingConfig, Result};

use crate::session::Datastore;

/// Top-level configuration for the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GnmiNetconfConfig {
    /// gNMI server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Southbound NETCONF settings
    pub netconf: NetconfConfig,

    /// Compiled YANG schema
    pub schema: SchemaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// gNMI server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// TLS configuration
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tls: TlsConfig::default(),
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS
    #[serde(default)]
    pub enabled: bool,

    /// Path to server certificate file
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Path to server key file
    #[serde(default)]
    pub key: Option<PathBuf>,

    /// Path to CA certificate; enables client certificate verification
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
}

/// Southbound NETCONF settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetconfConfig {
    /// Command whose stdio carries the NETCONF session,
    /// e.g. `["ssh", "-s", "admin@192.168.0.1", "-p", "830", "netconf"]`
    pub command: Vec<String>,

    /// Datastore read by Get and written by Set
    #[serde(default)]
    pub datastore: Datastore,

    /// Element name to `xmlns` URI for vendor modules that need one
    #[serde(default)]
    pub namespaces: HashMap<String, String>,
}

/// Compiled YANG schema location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Path to the schema document (JSON5)
    pub path: PathBuf,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 10999))
}

impl AdapterConfig for GnmiNetconfConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.netconf.command.is_empty() || self.netconf.command[0].trim().is_empty() {
            return Err(Error::validation("netconf.command must name a program"));
        }

        let tls = &self.server.tls;
        if tls.enabled && (tls.cert.is_none() || tls.key.is_none()) {
            return Err(Error::validation(
                "server.tls.enabled requires both cert and key",
            ));
        }

        if let Some((name, _)) = self
            .netconf
            .namespaces
            .iter()
            .find(|(_, uri)| uri.trim().is_empty())
        {
            return Err(Error::validation(format!(
                "netconf.namespaces.{} has an empty URI",
                name
            )));
        }

        Ok(())
    }
}
