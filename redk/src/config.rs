// Copyright (C) 2024-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of redk.
//
// redk is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// redk is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with redk.  If not,
// see <http://www.gnu.org/licenses/>.

//! # config
//!
//! redk configuration.
//!
//! Configuration is read from a TOML file, internally tagged by version so that the format can
//! evolve:
//!
//! ```toml
//! version = "1"
//! store-timeout-ms = 5000
//! diagnostics-mode = "production"
//!
//! [storage-config.Scylla]
//! hosts = ["10.0.0.1:9042", "10.0.0.2:9042"]
//! keyspace = "redk"
//!
//! [fabric-config.RedisCluster]
//! nodes = ["redis://10.0.0.3:7000", "redis://10.0.0.4:7000"]
//! connect-timeout-ms = 1000
//! response-timeout-ms = 500
//!
//! [ttls]
//! feed = 60
//! conversation = 300
//! suggestions = 600
//! ```
//!
//! Every key has a default; the default configuration runs entirely in memory.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use snafu::{Backtrace, IntoError, prelude::*};
use tracing::info;

use crate::{
    fabric::{self, Ttls},
    graph, memory, redis_cluster, scylla, storage,
    util::Credentials,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to find configuration file {}: {source}", pth.display()))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse configuration file {}: {source}", pth.display()))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to connect to the Redis cluster: {source}"))]
    Redis {
        source: redis_cluster::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to connect to ScyllaDB: {source}"))]
    Scylla {
        source: scylla::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The configuration file consulted when none is named
pub const DEFAULT_CONFIG: &str = "/etc/redk.toml";

/// Where users, posts, messages & the social graph live
// Deserialize only, on account of the credentials
#[derive(Clone, Debug, Default, Deserialize)]
pub enum StorageConfig {
    /// ScyllaDB serves as both the record store & the graph
    Scylla {
        /// ScyllaDB hosts, as "host:port"
        hosts: Vec<String>,
        /// ScyllaDB credentials, if authentication is to be used
        credentials: Option<Credentials>,
        #[serde(default = "default_keyspace")]
        keyspace: String,
    },
    /// Keep everything in process memory; nothing survives a restart
    #[default]
    InMemory,
}

fn default_keyspace() -> String {
    "redk".to_owned()
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_response_timeout_ms() -> u64 {
    1000
}

/// Where caches, counters & the trending ranking live
#[derive(Clone, Debug, Default, Deserialize)]
pub enum FabricConfig {
    RedisCluster {
        /// Seed nodes, as `redis://host:port` URLs
        nodes: Vec<String>,
        #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
        #[serde(rename = "response-timeout-ms", default = "default_response_timeout_ms")]
        response_timeout_ms: u64,
        /// Route read-only commands to replicas
        #[serde(rename = "read-from-replicas", default)]
        read_from_replicas: bool,
    },
    #[default]
    InMemory,
}

/// Whether the diagnostics adapter talks to the real cluster or reports a canned one
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsMode {
    #[default]
    Mock,
    Production,
}

/// redk configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConfigV1 {
    #[serde(rename = "storage-config")]
    pub storage_config: StorageConfig,
    #[serde(rename = "fabric-config")]
    pub fabric_config: FabricConfig,
    pub ttls: Ttls,
    /// Overall bound on any one round-trip to a store
    #[serde(rename = "store-timeout-ms")]
    pub store_timeout_ms: u64,
    #[serde(rename = "diagnostics-mode")]
    pub diagnostics_mode: DiagnosticsMode,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            storage_config: StorageConfig::default(),
            fabric_config: FabricConfig::default(),
            ttls: Ttls::default(),
            store_timeout_ms: 5000,
            diagnostics_mode: DiagnosticsMode::default(),
        }
    }
}

impl ConfigV1 {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse configuration text; `pth` is only used for error reporting
pub fn parse_config_str(text: &str, pth: &Path) -> Result<ConfigV1> {
    match toml::from_str::<Configuration>(text) {
        Ok(Configuration::V1(cfg)) => Ok(cfg),
        Err(err) => Err(ConfigParseSnafu {
            pth: pth.to_path_buf(),
        }
        .into_error(err)),
    }
}

/// Parse the redk configuration file
///
/// If `cfg` is `None`, try [DEFAULT_CONFIG], falling back to the default configuration if that
/// file doesn't exist. A file that's explicitly named must exist.
pub fn parse_config(cfg: Option<&Path>) -> Result<ConfigV1> {
    let (pth, defaulted) = cfg.map_or_else(
        || (PathBuf::from(DEFAULT_CONFIG), true),
        |p| (p.to_path_buf(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => parse_config_str(&text, &pth),
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

/// The three adapters the engines are built on
pub type Backends = (
    Arc<dyn storage::Backend + Send + Sync>,
    Arc<dyn graph::Backend + Send + Sync>,
    Arc<dyn fabric::Backend + Send + Sync>,
);

/// Build the adapters named by `cfg`
pub async fn select_backends(cfg: &ConfigV1) -> Result<Backends> {
    let (records, graph): (
        Arc<dyn storage::Backend + Send + Sync>,
        Arc<dyn graph::Backend + Send + Sync>,
    ) = match &cfg.storage_config {
        StorageConfig::Scylla {
            hosts,
            credentials,
            keyspace,
        } => {
            let session = Arc::new(
                scylla::Session::new(hosts, credentials, keyspace)
                    .await
                    .context(ScyllaSnafu)?,
            );
            info!("Using ScyllaDB keyspace {} at {}", keyspace, hosts.join(","));
            (session.clone(), session)
        }
        StorageConfig::InMemory => {
            info!("Using in-memory records & graph");
            (
                Arc::new(memory::Records::default()),
                Arc::new(memory::Graph::default()),
            )
        }
    };
    let fabric: Arc<dyn fabric::Backend + Send + Sync> = match &cfg.fabric_config {
        FabricConfig::RedisCluster {
            nodes,
            connect_timeout_ms,
            response_timeout_ms,
            read_from_replicas,
        } => Arc::new(
            redis_cluster::Cluster::new(
                nodes,
                Duration::from_millis(*connect_timeout_ms),
                Duration::from_millis(*response_timeout_ms),
                *read_from_replicas,
                cfg.store_timeout(),
            )
            .await
            .context(RedisSnafu)?,
        ),
        FabricConfig::InMemory => {
            info!("Using an in-memory fabric");
            Arc::new(memory::Fabric::default())
        }
    };
    Ok((records, graph, fabric))
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{fabric::Backend as _, graph::Backend as _, storage::Backend as _};

    #[test]
    fn test_parse() {
        let cfg = parse_config_str(
            r#"
version = "1"
store-timeout-ms = 250
diagnostics-mode = "production"

[storage-config.Scylla]
hosts = ["10.0.0.1:9042"]
credentials = ["redk", "s3cret"]

[fabric-config.RedisCluster]
nodes = ["redis://10.0.0.3:7000", "redis://10.0.0.4:7000"]
read-from-replicas = true

[ttls]
feed = 30
"#,
            Path::new("test.toml"),
        )
        .unwrap();
        assert_eq!(cfg.store_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.diagnostics_mode, DiagnosticsMode::Production);
        assert!(matches!(
            &cfg.storage_config,
            StorageConfig::Scylla { hosts, credentials: Some(_), keyspace }
                if hosts.len() == 1 && keyspace == "redk"
        ));
        assert!(matches!(
            &cfg.fabric_config,
            FabricConfig::RedisCluster {
                nodes,
                connect_timeout_ms: 1000,
                read_from_replicas: true,
                ..
            } if nodes.len() == 2
        ));
        assert_eq!(
            cfg.ttls,
            Ttls {
                feed: 30,
                ..Ttls::default()
            }
        );
    }

    #[test]
    fn test_defaults() {
        let cfg = parse_config_str("version = \"1\"\n", Path::new("test.toml")).unwrap();
        assert!(matches!(cfg.storage_config, StorageConfig::InMemory));
        assert!(matches!(cfg.fabric_config, FabricConfig::InMemory));
        assert_eq!(cfg.ttls, Ttls::default());
        assert_eq!(cfg.store_timeout_ms, 5000);
        assert_eq!(cfg.diagnostics_mode, DiagnosticsMode::Mock);

        assert!(parse_config_str("version = \"2\"\n", Path::new("test.toml")).is_err());
        assert!(matches!(
            parse_config(Some(Path::new("/no/such/redk.toml"))),
            Err(Error::ConfigNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_in_memory_backends() {
        let (records, graph, fabric) = select_backends(&ConfigV1::default()).await.unwrap();
        records.ping().await.unwrap();
        graph.ping().await.unwrap();
        fabric.ping().await.unwrap();
    }
}
