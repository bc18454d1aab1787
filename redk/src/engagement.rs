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

//! # engagement
//!
//! Likes & the trending ranking.
//!
//! A like is represented three ways in the fabric (the post's counter, the post's like-set, and
//! the post's score in the global trending ranking) and a fourth, best-effort, in the graph (a
//! LIKES edge). The fabric representations move together through a single [LikeMutation]; the
//! graph edge is mirrored in the background & its failure is logged, not reported. The trending
//! ranking sits on its own slot; should it fail to move once the counter & like-set have, the like
//! still stands, and the fabric logs & counts the lag.
//!
//! Both `like` & `unlike` are idempotent: liking a post twice, or unliking a post one never liked,
//! changes nothing & says so.

use std::sync::Arc;

use snafu::{Backtrace, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::{PostId, TrendingPost, Username},
    fabric::{self, Fabric, LikeDirection, LikeMutation},
    graph,
    metrics::{self, Instruments},
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to update the post's likes: {source}"))]
    Fabric {
        source: fabric::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read from the record store: {source}"))]
    Records {
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No such post: {id}"))]
    UnknownPost { id: PostId, backtrace: Backtrace },
    #[snafu(display("No such user: {username}"))]
    UnknownUser {
        username: Username,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("engagement.likes") }
inventory::submit! { metrics::Registration::new("engagement.unlikes") }

/// The result of a like
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LikeResult {
    /// The post's like count, after the operation
    pub count: i64,
    /// True if the user had already liked the post (in which case nothing changed)
    pub already_liked: bool,
}

/// The result of an unlike
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnlikeResult {
    /// The post's like count, after the operation
    pub count: i64,
    /// True if the user hadn't liked the post (in which case nothing changed)
    pub not_liked: bool,
}

/// The engagement engine
pub struct Engagement {
    records: Arc<dyn storage::Backend + Send + Sync>,
    graph: Arc<dyn graph::Backend + Send + Sync>,
    fabric: Arc<Fabric>,
    instruments: Arc<Instruments>,
}

impl Engagement {
    pub fn new(
        records: Arc<dyn storage::Backend + Send + Sync>,
        graph: Arc<dyn graph::Backend + Send + Sync>,
        fabric: Arc<Fabric>,
        instruments: Arc<Instruments>,
    ) -> Engagement {
        Engagement {
            records,
            graph,
            fabric,
            instruments,
        }
    }

    async fn check_post_and_user(&self, id: &PostId, username: &Username) -> Result<()> {
        self.records
            .post_for_id(id)
            .await
            .context(RecordsSnafu)?
            .context(UnknownPostSnafu { id: *id })?;
        self.records
            .user_for_name(username)
            .await
            .context(RecordsSnafu)?
            .context(UnknownUserSnafu {
                username: username.clone(),
            })?;
        Ok(())
    }

    // Fire & forget: the caller doesn't wait on the graph, and never hears about failures.
    fn mirror(&self, direction: LikeDirection, id: PostId, username: Username) {
        let graph = self.graph.clone();
        let instruments = self.instruments.clone();
        tokio::spawn(async move {
            let res = match direction {
                LikeDirection::Like => graph.add_like(&username, &id).await,
                LikeDirection::Unlike => graph.remove_like(&username, &id).await,
            };
            if let Err(err) = res {
                warn!(
                    "Failed to mirror {:?} of {} by {} to the graph: {}",
                    direction, id, username, err
                );
                counter_add!(instruments, "graph.degraded", 1, &[]);
            }
        });
    }

    /// `username` likes post `id`
    #[tracing::instrument(skip(self))]
    pub async fn like(&self, id: &PostId, username: &Username) -> Result<LikeResult> {
        self.check_post_and_user(id, username).await?;
        let outcome = self
            .fabric
            .apply_like(&LikeMutation::like(id, username))
            .await
            .context(FabricSnafu)?;
        if outcome.applied {
            counter_add!(self.instruments, "engagement.likes", 1, &[]);
            self.mirror(LikeDirection::Like, *id, username.clone());
        } else {
            debug!("{} has already liked {}", username, id);
        }
        Ok(LikeResult {
            count: outcome.count,
            already_liked: !outcome.applied,
        })
    }

    /// `username` withdraws their like of post `id`
    #[tracing::instrument(skip(self))]
    pub async fn unlike(&self, id: &PostId, username: &Username) -> Result<UnlikeResult> {
        self.check_post_and_user(id, username).await?;
        let outcome = self
            .fabric
            .apply_like(&LikeMutation::unlike(id, username))
            .await
            .context(FabricSnafu)?;
        if outcome.applied {
            counter_add!(self.instruments, "engagement.unlikes", 1, &[]);
            self.mirror(LikeDirection::Unlike, *id, username.clone());
        } else {
            debug!("{} hasn't liked {}", username, id);
        }
        Ok(UnlikeResult {
            count: outcome.count,
            not_liked: !outcome.applied,
        })
    }

    pub async fn like_count(&self, id: &PostId) -> Result<i64> {
        self.fabric.like_count(id).await.context(FabricSnafu)
    }

    pub async fn has_liked(&self, id: &PostId, username: &Username) -> Result<bool> {
        self.fabric.has_liked(id, username).await.context(FabricSnafu)
    }

    /// Everyone who currently likes post `id`, in username order
    pub async fn liked_by(&self, id: &PostId) -> Result<Vec<Username>> {
        let mut users = self
            .fabric
            .liked_by(id)
            .await
            .context(FabricSnafu)?
            .into_iter()
            .filter_map(|name| match Username::new(&name) {
                Ok(username) => Some(username),
                Err(err) => {
                    warn!("Skipping unparseable like-set member {}: {}", name, err);
                    None
                }
            })
            .collect::<Vec<Username>>();
        users.sort();
        Ok(users)
    }

    /// The `limit` most-liked posts, hydrated from the record store
    ///
    /// Posts in the ranking but missing from the record store are skipped, so the result may be
    /// shorter than `limit`.
    #[tracing::instrument(skip(self))]
    pub async fn get_trending(&self, limit: usize) -> Result<Vec<TrendingPost>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ranking = self.fabric.top_trending(limit).await.context(FabricSnafu)?;
        let mut trending = Vec::with_capacity(ranking.len());
        for (member, score) in ranking {
            let id = match member.parse::<PostId>() {
                Ok(id) => id,
                Err(err) => {
                    warn!("Skipping unparseable trending member {}: {}", member, err);
                    continue;
                }
            };
            match self.records.post_for_id(&id).await.context(RecordsSnafu)? {
                Some(post) => trending.push(TrendingPost {
                    post,
                    score: score.round() as i64,
                }),
                None => debug!("Trending post {} is gone; skipping it", id),
            }
        }
        Ok(trending)
    }
}
