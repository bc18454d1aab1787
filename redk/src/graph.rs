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

//! # graph
//!
//! The social graph: users & posts as nodes, FOLLOWS, POSTED, LIKES & MESSAGED as edges.
//!
//! The graph is the only home of follow relationships (modulo the record store's fallback records)
//! but it is a *mirror* of everything else: a failed write here is logged, not fatal.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};

use crate::{
    entities::{Post, PostId, User, Username},
    metrics,
};

#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

inventory::submit! { metrics::Registration::new("graph.degraded") }

/// How many first-hop neighbours to expand concurrently when walking two hops
pub const TRAVERSAL_CONCURRENCY: usize = 8;

#[async_trait]
pub trait Backend {
    /// Create the node for `user`, or refresh its properties
    async fn upsert_user(&self, user: &User) -> Result<(), Error>;
    /// Create the node for `post` & its POSTED edge from the author
    async fn upsert_post(&self, post: &Post) -> Result<(), Error>;
    /// Create a FOLLOWS edge; return false if it already existed
    async fn add_follow(&self, follower: &Username, followee: &Username) -> Result<bool, Error>;
    /// Remove a FOLLOWS edge; return false if there was none
    async fn remove_follow(&self, follower: &Username, followee: &Username)
    -> Result<bool, Error>;
    /// Create a LIKES edge
    async fn add_like(&self, username: &Username, post: &PostId) -> Result<(), Error>;
    /// Remove a LIKES edge
    async fn remove_like(&self, username: &Username, post: &PostId) -> Result<(), Error>;
    /// Create a MESSAGED edge
    async fn add_message(&self, sender: &Username, receiver: &Username) -> Result<(), Error>;
    /// Everyone `username` follows
    async fn following(&self, username: &Username) -> Result<Vec<Username>, Error>;
    /// The number of inbound FOLLOWS edges on `username`
    async fn followers_count(&self, username: &Username) -> Result<usize, Error>;
    /// The number of outbound POSTED edges from `username`
    async fn posts_count(&self, username: &Username) -> Result<usize, Error>;
    /// Walk two FOLLOWS hops out from `username`
    ///
    /// Return every user reachable in exactly two hops who is neither `username` nor already
    /// followed by `username`, along with the number of distinct first-hop users through which
    /// they were reached. Order is unspecified.
    ///
    /// The provided implementation composes [Backend::following]; a store with native traversal
    /// should override it.
    async fn friends_of_friends(
        &self,
        username: &Username,
    ) -> Result<HashMap<Username, usize>, Error> {
        let first_hop = self.following(username).await?;
        let excluded = first_hop.iter().cloned().collect::<HashSet<Username>>();
        let second_hops = stream::iter(first_hop.clone())
            .map(|via| async move { self.following(&via).await })
            .buffer_unordered(TRAVERSAL_CONCURRENCY)
            .try_collect::<Vec<Vec<Username>>>()
            .await?;
        let mut mutuals: HashMap<Username, usize> = HashMap::new();
        second_hops
            .into_iter()
            // Each first-hop user counts at most once per candidate
            .flat_map(|hop| hop.into_iter().collect::<HashSet<Username>>())
            .filter(|candidate| candidate != username && !excluded.contains(candidate))
            .for_each(|candidate| *mutuals.entry(candidate).or_default() += 1);
        Ok(mutuals)
    }
    /// Round-trip to the store
    async fn ping(&self) -> Result<(), Error>;
}
