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

//! # diagnostics
//!
//! Cluster introspection for the Redis cluster behind the fabric.
//!
//! Nothing in the engines depends on this module. It reads `CLUSTER INFO` & `CLUSTER NODES` from a
//! [Source] and turns them into typed reports: overall health, and which primary (and replicas)
//! serve each slot range. In [DiagnosticsMode::Mock] the source is a canned three-primary,
//! three-replica cluster, which is handy for demonstrations & for exercising the parsers.

use std::{collections::HashMap, num::ParseIntError, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::{Backtrace, IntoError, prelude::*};

use crate::{config::DiagnosticsMode, fabric, keys::HASH_SLOTS, redis_cluster};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to query the cluster: {source}"))]
    Fabric {
        source: fabric::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("CLUSTER INFO field {key} has a non-numeric value {value}: {source}"))]
    InfoValue {
        key: String,
        value: String,
        source: ParseIntError,
        backtrace: Backtrace,
    },
    #[snafu(display("CLUSTER INFO lacks {key}"))]
    MissingInfoKey { key: String, backtrace: Backtrace },
    #[snafu(display("Couldn't parse the CLUSTER NODES line \"{line}\""))]
    NodeLine { line: String, backtrace: Backtrace },
    #[snafu(display("Couldn't parse the slot range \"{text}\""))]
    SlotRange { text: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// An inclusive range of hash slots
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
    pub fn is_empty(&self) -> bool {
        false
    }
    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for SlotRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || SlotRangeSnafu { text: s.to_owned() }.build();
        let parse = |t: &str| {
            t.parse::<u16>()
                .ok()
                .filter(|slot| *slot < HASH_SLOTS)
                .ok_or_else(bad)
        };
        let (start, end) = match s.split_once('-') {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => {
                let slot = parse(s)?;
                (slot, slot)
            }
        };
        ensure!(start <= end, SlotRangeSnafu { text: s.to_owned() });
        Ok(SlotRange { start, end })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica,
}

/// One line of `CLUSTER NODES`
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    /// "ip:port", without the cluster bus port
    pub address: String,
    pub role: Role,
    /// For replicas, the primary they replicate
    pub primary_id: Option<String>,
    pub flags: Vec<String>,
    /// "connected" or "disconnected"
    pub link_state: String,
    pub slots: Vec<SlotRange>,
}

impl NodeInfo {
    /// True if the node is flagged as failing (or possibly failing)
    pub fn failing(&self) -> bool {
        self.flags.iter().any(|f| f == "fail" || f == "fail?")
    }
}

/// Parse the output of `CLUSTER NODES`
///
/// Each line reads `<id> <ip:port@cport> <flags> <primary> <ping-sent> <pong-recv> <epoch>
/// <link-state> <slot> <slot> ...`. Slot entries in brackets describe slots being migrated and
/// are skipped.
pub fn parse_cluster_nodes(text: &str) -> Result<Vec<NodeInfo>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parts = line.split_whitespace().collect::<Vec<&str>>();
            ensure!(
                parts.len() >= 8,
                NodeLineSnafu {
                    line: line.to_owned()
                }
            );
            let flags = parts[2]
                .split(',')
                .map(str::to_owned)
                .collect::<Vec<String>>();
            let role = if flags.iter().any(|f| f == "master") {
                Role::Primary
            } else {
                Role::Replica
            };
            let slots = parts[8..]
                .iter()
                .filter(|s| !s.starts_with('['))
                .map(|s| s.parse::<SlotRange>())
                .collect::<Result<Vec<SlotRange>>>()?;
            Ok(NodeInfo {
                node_id: parts[0].to_owned(),
                address: parts[1]
                    .split_once('@')
                    .map_or(parts[1], |(addr, _)| addr)
                    .to_owned(),
                role,
                primary_id: (parts[3] != "-").then(|| parts[3].to_owned()),
                flags,
                link_state: parts[7].to_owned(),
                slots,
            })
        })
        .collect()
}

/// The interesting parts of `CLUSTER INFO`
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ClusterInfo {
    /// "ok" or "fail"
    pub state: String,
    pub size: usize,
    pub known_nodes: usize,
    pub slots_assigned: usize,
    pub slots_ok: usize,
    pub slots_pfail: usize,
    pub slots_fail: usize,
}

/// Parse the output of `CLUSTER INFO` (`key:value` lines)
pub fn parse_cluster_info(text: &str) -> Result<ClusterInfo> {
    let fields = text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect::<HashMap<&str, &str>>();
    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .context(MissingInfoKeySnafu { key })
    };
    let number = |key: &str| {
        let value = field(key)?;
        value.parse::<usize>().map_err(|err| {
            InfoValueSnafu {
                key,
                value: value.to_owned(),
            }
            .into_error(err)
        })
    };
    Ok(ClusterInfo {
        state: field("cluster_state")?.to_owned(),
        size: number("cluster_size")?,
        known_nodes: number("cluster_known_nodes")?,
        slots_assigned: number("cluster_slots_assigned")?,
        slots_ok: number("cluster_slots_ok")?,
        slots_pfail: number("cluster_slots_pfail")?,
        slots_fail: number("cluster_slots_fail")?,
    })
}

/// Which primary, and which replicas, serve a range of slots
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SlotDistribution {
    pub range: SlotRange,
    pub primary_id: String,
    pub primary_address: String,
    pub replicas: Vec<String>,
}

/// Work out the slot distribution from a node listing, ordered by slot
pub fn slot_distribution(nodes: &[NodeInfo]) -> Vec<SlotDistribution> {
    let mut dist = nodes
        .iter()
        .filter(|node| node.role == Role::Primary)
        .flat_map(|primary| {
            let replicas = nodes
                .iter()
                .filter(|node| node.primary_id.as_deref() == Some(primary.node_id.as_str()))
                .map(|node| node.node_id.clone())
                .collect::<Vec<String>>();
            primary.slots.iter().map(move |range| SlotDistribution {
                range: *range,
                primary_id: primary.node_id.clone(),
                primary_address: primary.address.clone(),
                replicas: replicas.clone(),
            })
        })
        .collect::<Vec<SlotDistribution>>();
    dist.sort_by_key(|d| d.range);
    dist
}

/// A point-in-time health report
#[derive(Clone, Debug, Serialize)]
pub struct ClusterHealth {
    pub mode: &'static str,
    pub timestamp: DateTime<Utc>,
    pub info: ClusterInfo,
    pub nodes: Vec<NodeInfo>,
}

impl ClusterHealth {
    /// True if the cluster says it's OK, every slot is covered, and no node is failing
    pub fn healthy(&self) -> bool {
        self.info.state == "ok"
            && self.info.slots_ok == HASH_SLOTS as usize
            && !self.nodes.iter().any(NodeInfo::failing)
    }
}

/// Anything that can answer `CLUSTER INFO` & `CLUSTER NODES`
#[async_trait]
pub trait Source {
    async fn cluster_info(&self) -> fabric::Result<String>;
    async fn cluster_nodes(&self) -> fabric::Result<String>;
}

#[async_trait]
impl Source for redis_cluster::Cluster {
    async fn cluster_info(&self) -> fabric::Result<String> {
        redis_cluster::Cluster::cluster_info(self).await
    }
    async fn cluster_nodes(&self) -> fabric::Result<String> {
        redis_cluster::Cluster::cluster_nodes(self).await
    }
}

const MOCK_CLUSTER_INFO: &str = "cluster_state:ok\r
cluster_slots_assigned:16384\r
cluster_slots_ok:16384\r
cluster_slots_pfail:0\r
cluster_slots_fail:0\r
cluster_known_nodes:6\r
cluster_size:3\r
cluster_current_epoch:6\r
cluster_my_epoch:1\r
";

const MOCK_CLUSTER_NODES: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 10.0.0.1:7000@17000 myself,master - 0 1700000000000 1 connected 0-5460
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 10.0.0.2:7001@17001 master - 0 1700000000000 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 10.0.0.3:7002@17002 master - 0 1700000000000 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 10.0.0.4:7003@17003 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 1700000000000 4 connected
824fe116063bc5fcf9f4ffd895bc17aee7731ac3 10.0.0.5:7004@17004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1700000000000 5 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 10.0.0.6:7005@17005 slave 292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 0 1700000000000 6 connected
";

/// A canned, healthy, three-primary/three-replica cluster
pub struct Mock;

#[async_trait]
impl Source for Mock {
    async fn cluster_info(&self) -> fabric::Result<String> {
        Ok(MOCK_CLUSTER_INFO.to_owned())
    }
    async fn cluster_nodes(&self) -> fabric::Result<String> {
        Ok(MOCK_CLUSTER_NODES.to_owned())
    }
}

/// The diagnostics adapter
pub struct Diagnostics {
    mode: DiagnosticsMode,
    source: Box<dyn Source + Send + Sync>,
}

impl Diagnostics {
    pub fn new(mode: DiagnosticsMode, source: Box<dyn Source + Send + Sync>) -> Diagnostics {
        Diagnostics { mode, source }
    }
    pub fn mock() -> Diagnostics {
        Diagnostics::new(DiagnosticsMode::Mock, Box::new(Mock))
    }
    fn mode_name(&self) -> &'static str {
        match self.mode {
            DiagnosticsMode::Mock => "mock",
            DiagnosticsMode::Production => "production",
        }
    }
    pub async fn health(&self) -> Result<ClusterHealth> {
        let info = parse_cluster_info(&self.source.cluster_info().await.context(FabricSnafu)?)?;
        let nodes = parse_cluster_nodes(&self.source.cluster_nodes().await.context(FabricSnafu)?)?;
        Ok(ClusterHealth {
            mode: self.mode_name(),
            timestamp: Utc::now(),
            info,
            nodes,
        })
    }
    pub async fn slots(&self) -> Result<Vec<SlotDistribution>> {
        Ok(slot_distribution(&parse_cluster_nodes(
            &self.source.cluster_nodes().await.context(FabricSnafu)?,
        )?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_slot_ranges() {
        assert_eq!(
            "0-5460".parse::<SlotRange>().unwrap(),
            SlotRange { start: 0, end: 5460 }
        );
        assert_eq!("42".parse::<SlotRange>().unwrap().len(), 1);
        assert_eq!(SlotRange { start: 7, end: 7 }.to_string(), "7");
        assert!("5460-0".parse::<SlotRange>().is_err());
        assert!("0-16384".parse::<SlotRange>().is_err());
        assert!("x".parse::<SlotRange>().is_err());
    }

    #[test]
    fn test_parse_nodes() {
        let nodes = parse_cluster_nodes(MOCK_CLUSTER_NODES).unwrap();
        assert_eq!(nodes.len(), 6);
        assert_eq!(nodes[0].address, "10.0.0.1:7000");
        assert_eq!(nodes[0].role, Role::Primary);
        assert_eq!(nodes[0].flags, vec!["myself", "master"]);
        assert_eq!(nodes[3].role, Role::Replica);
        assert_eq!(nodes[3].primary_id.as_deref(), Some(nodes[0].node_id.as_str()));
        assert!(nodes[3].slots.is_empty());

        // Migrating slots are skipped; failing nodes are noticed
        let nodes = parse_cluster_nodes(
            "abc 10.0.0.9:7000@17000 master,fail? - 0 0 1 disconnected 0-10 [11->-def]\n",
        )
        .unwrap();
        assert_eq!(nodes[0].slots, vec![SlotRange { start: 0, end: 10 }]);
        assert!(nodes[0].failing());

        assert!(parse_cluster_nodes("abc 10.0.0.9:7000 master").is_err());
    }

    #[test]
    fn test_parse_info() {
        let info = parse_cluster_info(MOCK_CLUSTER_INFO).unwrap();
        assert_eq!(info.state, "ok");
        assert_eq!(info.size, 3);
        assert_eq!(info.known_nodes, 6);
        assert_eq!(info.slots_ok, 16384);
        assert!(matches!(
            parse_cluster_info("cluster_state:ok\n"),
            Err(Error::MissingInfoKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock() {
        let diag = Diagnostics::mock();
        let health = diag.health().await.unwrap();
        assert_eq!(health.mode, "mock");
        assert!(health.healthy());

        let slots = diag.slots().await.unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(
            slots.iter().map(|d| d.range.len()).sum::<usize>(),
            HASH_SLOTS as usize
        );
        assert_eq!(slots[1].primary_address, "10.0.0.2:7001");
        assert_eq!(
            slots[1].replicas,
            vec!["824fe116063bc5fcf9f4ffd895bc17aee7731ac3"]
        );
    }
}
