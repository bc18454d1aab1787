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
//! The engine behind a small social network: feed assembly over a record store & a social graph,
//! cache coherence in a Redis cluster, graph-scored "who to follow" suggestions, likes & trending,
//! and direct-message conversation resolution.
//!
//! The library is organized around three adapter traits, each of which names an external store:
//!
//! - [storage::Backend]: the record store; the source of truth for users, posts & direct messages
//! - [graph::Backend]: the social graph; follow relationships & the traversals built on them
//! - [fabric::Backend]: the cache & counter fabric; derived, disposable state
//!
//! The engines ([feed], [recommend], [engagement], [conversation] & [social]) are written purely in
//! terms of those traits. Concrete implementations live in [scylla](crate::scylla) (records &
//! graph), [redis_cluster] (the fabric) and [memory] (all three, for tests & local
//! experimentation).
pub mod config;
pub mod conversation;
pub mod diagnostics;
pub mod engagement;
pub mod entities;
pub mod fabric;
pub mod feed;
pub mod graph;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod recommend;
pub mod redis_cluster;
pub mod redk;
pub mod scylla;
pub mod social;
pub mod storage;
pub mod util;
