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

//! # redk-diag
//!
//! Operator's tool for a redk deployment: cluster health & slot layout for the Redis cluster,
//! hash-slot arithmetic, store connectivity checks, and ScyllaDB schema installation.

use std::{io, path::PathBuf, sync::Arc};

use clap::{Arg, ArgAction, Command, crate_authors, crate_version, value_parser};
use serde::Serialize;
use snafu::prelude::*;
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

use redk::{
    config::{self, ConfigV1, DiagnosticsMode, FabricConfig, StorageConfig},
    diagnostics::{self, Diagnostics},
    keys::{hash_slot, hash_tag},
    metrics::{Instruments, check_metric_registrations},
    redis_cluster, redk::Redk,
    scylla,
    util::{Credentials, CredentialsParser},
};

#[derive(Snafu)]
enum Error {
    #[snafu(display("{source}"))]
    Config { source: config::Error },
    #[snafu(display("Cluster diagnostics failed: {source}"))]
    Diagnostics { source: diagnostics::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to serialize output: {source}"))]
    Json { source: serde_json::Error },
    #[snafu(display("Production diagnostics need a RedisCluster fabric-config"))]
    NoCluster,
    #[snafu(display("Schema installation needs a Scylla storage-config"))]
    NoScylla,
    #[snafu(display("Failed to connect to the Redis cluster: {source}"))]
    Redis { source: redis_cluster::Error },
    #[snafu(display("Failed to install the schema: {source}"))]
    Schema { source: scylla::Error },
    #[snafu(display("One or more stores failed their check"))]
    StoresDown,
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

// `main()` prints errors via `Debug`; make that readable
impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::WARN,
            },
        }
    }
}

/// Log to stderr (stdout is for reports), compact or JSON
fn configure_logging(logopts: &LogOpts) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stderr))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stderr),
        )
    };
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

fn print<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context(JsonSnafu)?
        );
    } else {
        human(value);
    }
    Ok(())
}

async fn diagnostics(cfg: &ConfigV1, mode: DiagnosticsMode) -> Result<Diagnostics> {
    match mode {
        DiagnosticsMode::Mock => Ok(Diagnostics::mock()),
        DiagnosticsMode::Production => match &cfg.fabric_config {
            FabricConfig::RedisCluster {
                nodes,
                connect_timeout_ms,
                response_timeout_ms,
                read_from_replicas,
            } => {
                let cluster = redis_cluster::Cluster::new(
                    nodes,
                    std::time::Duration::from_millis(*connect_timeout_ms),
                    std::time::Duration::from_millis(*response_timeout_ms),
                    *read_from_replicas,
                    cfg.store_timeout(),
                )
                .await
                .context(RedisSnafu)?;
                Ok(Diagnostics::new(mode, Box::new(cluster)))
            }
            FabricConfig::InMemory => NoClusterSnafu.fail(),
        },
    }
}

async fn health(diag: Diagnostics, json: bool) -> Result<()> {
    let health = diag.health().await.context(DiagnosticsSnafu)?;
    print(json, &health, |health| {
        println!(
            "cluster {} ({} mode): state {}, {} primaries, {} known nodes, {}/{} slots ok ({} pfail, {} fail)",
            if health.healthy() { "healthy" } else { "UNHEALTHY" },
            health.mode,
            health.info.state,
            health.info.size,
            health.info.known_nodes,
            health.info.slots_ok,
            health.info.slots_assigned,
            health.info.slots_pfail,
            health.info.slots_fail
        );
        for node in &health.nodes {
            println!(
                "{:>7} {} {} [{}] {}{}",
                format!("{:?}", node.role),
                node.node_id,
                node.address,
                node.flags.join(","),
                node.link_state,
                node.slots
                    .iter()
                    .map(|range| format!(" {}", range))
                    .collect::<String>()
            );
        }
    })
}

async fn slots(diag: Diagnostics, json: bool) -> Result<()> {
    let slots = diag.slots().await.context(DiagnosticsSnafu)?;
    print(json, &slots, |slots| {
        for dist in slots {
            println!(
                "{:>11} {} ({}) replicas: {}",
                dist.range.to_string(),
                dist.primary_id,
                dist.primary_address,
                dist.replicas.join(",")
            );
        }
    })
}

#[derive(Serialize)]
struct KeySlot<'a> {
    key: &'a str,
    hash_tag: Option<&'a str>,
    slot: u16,
}

fn keyslot(keys: Vec<&String>, json: bool) -> Result<()> {
    let slots = keys
        .iter()
        .map(|key| KeySlot {
            key,
            hash_tag: hash_tag(key),
            slot: hash_slot(key),
        })
        .collect::<Vec<KeySlot>>();
    print(json, &slots, |slots| {
        for ks in slots {
            match ks.hash_tag {
                Some(tag) => println!("{} {} (hash tag \"{}\")", ks.slot, ks.key, tag),
                None => println!("{} {}", ks.slot, ks.key),
            }
        }
    })
}

async fn check(cfg: &ConfigV1, json: bool) -> Result<()> {
    let redk = Redk::from_config(cfg, Arc::new(Instruments::new("redk-diag")))
        .await
        .context(ConfigSnafu)?;
    let check = redk.check().await;
    print(json, &check, |check| {
        for (store, res) in [
            ("records", &check.records),
            ("graph", &check.graph),
            ("fabric", &check.fabric),
        ] {
            match res {
                None => println!("{:>8}: ok", store),
                Some(err) => println!("{:>8}: FAILED ({})", store, err),
            }
        }
    })?;
    ensure!(check.ok(), StoresDownSnafu);
    Ok(())
}

async fn schema(cfg: &ConfigV1, credentials: Option<Credentials>, replication: &str) -> Result<()> {
    match &cfg.storage_config {
        StorageConfig::Scylla {
            hosts,
            credentials: configured,
            keyspace,
        } => {
            let credentials = credentials.or_else(|| configured.clone());
            scylla::Session::install_schema(hosts, &credentials, keyspace, replication)
                .await
                .context(SchemaSnafu)?;
            info!("Installed the {} schema", keyspace);
            println!("keyspace {} is ready", keyspace);
            Ok(())
        }
        StorageConfig::InMemory => NoScyllaSnafu.fail(),
    }
}

async fn go_async(matches: clap::ArgMatches) -> Result<()> {
    let cfg = config::parse_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))
        .context(ConfigSnafu)?;
    debug!("Configuration: {:?}", cfg);
    let mode = matches
        .get_one::<String>("mode")
        .map(|mode| match mode.as_str() {
            "production" => DiagnosticsMode::Production,
            _ => DiagnosticsMode::Mock,
        })
        .unwrap_or(cfg.diagnostics_mode);
    let json = matches.get_flag("json");

    match matches.subcommand() {
        Some(("health", _)) => health(diagnostics(&cfg, mode).await?, json).await,
        Some(("slots", _)) => slots(diagnostics(&cfg, mode).await?, json).await,
        Some(("keyslot", sub)) => keyslot(
            sub.get_many::<String>("key").into_iter().flatten().collect(),
            json,
        ),
        Some(("check", _)) => check(&cfg, json).await,
        Some(("schema", sub)) => {
            schema(
                &cfg,
                sub.get_one::<Credentials>("scylla-credentials").cloned(),
                sub.get_one::<String>("replication")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_REPLICATION),
            )
            .await
        }
        _ => unreachable!("clap requires a subcommand"),
    }
}

const DEFAULT_REPLICATION: &str = "{'class': 'SimpleStrategy', 'replication_factor': 1}";

fn main() -> Result<()> {
    check_metric_registrations();
    let matches = Command::new("redk-diag")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Inspect a redk deployment")
        .long_about(
            "Inspect a redk deployment.

The cluster sub-commands (health & slots) report on the Redis cluster named in the
configuration file when run in production mode, or on a canned three-primary,
three-replica cluster in mock mode.",
        )
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .env("REDK_CONFIG")
                .help("path to the configuration file (defaults to /etc/redk.toml)"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .num_args(1)
                .value_parser(["mock", "production"])
                .env("REDK_DIAGNOSTICS_MODE")
                .help("override the configured diagnostics mode"),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .help("print reports as JSON"),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("REDK_DEBUG")
                .help("produce debug output"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("REDK_PLAIN")
                .help("log in human-readable format, not JSON/structured logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("REDK_QUIET")
                .help("produce only error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("REDK_VERBOSE")
                .help("produce prolix output"),
        )
        .subcommand(Command::new("health").about("Report on cluster state & nodes"))
        .subcommand(Command::new("slots").about("Show which nodes serve which hash slots"))
        .subcommand(
            Command::new("keyslot")
                .about("Compute the hash slot for one or more keys")
                .arg(
                    Arg::new("key")
                        .required(true)
                        .num_args(1..)
                        .help("key(s), e.g. \"{user:alice}:feed:all:10\""),
                ),
        )
        .subcommand(Command::new("check").about("Round-trip to the record store, graph & fabric"))
        .subcommand(
            Command::new("schema")
                .about("Create the ScyllaDB keyspace & tables")
                .arg(
                    Arg::new("scylla-credentials")
                        .short('s')
                        .long("scylla-credentials")
                        .num_args(1)
                        .value_parser(CredentialsParser)
                        .env("REDK_SCYLLA_CREDENTIALS")
                        .help("ScyllaDB credentials, as \"username,password\""),
                )
                .arg(
                    Arg::new("replication")
                        .short('r')
                        .long("replication")
                        .num_args(1)
                        .help("CQL replication map for the keyspace"),
                ),
        )
        .get_matches();

    configure_logging(&LogOpts::new(&matches))?;

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(matches))
}
