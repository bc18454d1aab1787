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

//! # redk
//!
//! Application state: the engines, wired to one set of adapters.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::{
    config::{self, Backends, ConfigV1},
    conversation::Conversations,
    engagement::Engagement,
    fabric::{Fabric, Ttls},
    feed::Feeds,
    graph,
    memory::Stores,
    metrics::Instruments,
    recommend::Recommender,
    social::Social,
    storage,
};

pub struct Redk {
    pub records: Arc<dyn storage::Backend + Send + Sync>,
    pub graph: Arc<dyn graph::Backend + Send + Sync>,
    pub fabric: Arc<Fabric>,
    pub instruments: Arc<Instruments>,
    pub feeds: Feeds,
    pub recommender: Recommender,
    pub engagement: Engagement,
    pub conversations: Conversations,
    pub social: Social,
}

/// The outcome of pinging each store; `None` means the store answered
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StoreCheck {
    pub records: Option<String>,
    pub graph: Option<String>,
    pub fabric: Option<String>,
}

impl StoreCheck {
    pub fn ok(&self) -> bool {
        self.records.is_none() && self.graph.is_none() && self.fabric.is_none()
    }
}

impl Redk {
    pub fn new(backends: Backends, ttls: Ttls, instruments: Arc<Instruments>) -> Redk {
        let (records, graph, fabric) = backends;
        let fabric = Arc::new(Fabric::new(fabric, ttls, instruments.clone()));
        Redk {
            feeds: Feeds::new(
                records.clone(),
                graph.clone(),
                fabric.clone(),
                instruments.clone(),
            ),
            recommender: Recommender::new(
                records.clone(),
                graph.clone(),
                fabric.clone(),
                instruments.clone(),
            ),
            engagement: Engagement::new(
                records.clone(),
                graph.clone(),
                fabric.clone(),
                instruments.clone(),
            ),
            conversations: Conversations::new(
                records.clone(),
                graph.clone(),
                fabric.clone(),
                instruments.clone(),
            ),
            social: Social::new(
                records.clone(),
                graph.clone(),
                fabric.clone(),
                instruments.clone(),
            ),
            records,
            graph,
            fabric,
            instruments,
        }
    }

    /// Build the adapters named in `cfg`, and the engines atop them
    pub async fn from_config(cfg: &ConfigV1, instruments: Arc<Instruments>) -> config::Result<Redk> {
        Ok(Redk::new(
            config::select_backends(cfg).await?,
            cfg.ttls.clone(),
            instruments,
        ))
    }

    /// Everything in memory; the [Stores] handles let the caller inspect state or inject faults
    pub fn in_memory(ttls: Ttls, instruments: Arc<Instruments>) -> (Redk, Stores) {
        let stores = Stores::new();
        let redk = Redk::new(
            (
                stores.records.clone(),
                stores.graph.clone(),
                stores.fabric.clone(),
            ),
            ttls,
            instruments,
        );
        (redk, stores)
    }

    /// Round-trip to each store
    pub async fn check(&self) -> StoreCheck {
        let (records, graph, fabric) = futures::join!(
            self.records.ping(),
            self.graph.ping(),
            self.fabric.ping()
        );
        let describe = |store: &str, res: Result<(), String>| {
            res.err().inspect(|err| warn!("The {} store failed its check: {}", store, err))
        };
        StoreCheck {
            records: describe("record", records.map_err(|err| err.to_string())),
            graph: describe("graph", graph.map_err(|err| err.to_string())),
            fabric: describe("fabric", fabric.map_err(|err| err.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_check() {
        let (redk, stores) = Redk::in_memory(
            Ttls::default(),
            Arc::new(Instruments::new("redk-test")),
        );
        assert!(redk.check().await.ok());
        stores.graph.set_available(false);
        let check = redk.check().await;
        assert!(!check.ok());
        assert!(check.records.is_none());
        assert!(check.graph.is_some());
    }
}
