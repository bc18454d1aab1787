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

//! # fabric
//!
//! The cache & counter fabric: a clustered key-value store holding everything redk can afford to
//! lose. Feed & suggestion caches, conversation snippets, like counters & like-sets, and the
//! trending ranking all live here.
//!
//! Callers touch the fabric in two very different ways:
//!
//! - *best-effort*: cache reads & writes. A failure here must never fail the request; we log it &
//!   carry on as though the cache were empty (or the write had succeeded)
//! - *integrity-critical*: likes. The like-set is the only record of who has liked what, so a
//!   failure must be reported to the caller.
//!
//! [Backend] is the adapter interface; [Fabric] wraps one & encodes the two disciplines above so
//! the engines don't each have to.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::{Backtrace, IntoError, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::{PostId, Username},
    keys::{Key, KeyPattern},
    metrics::{self, Instruments},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to (de)serialize the value at {key}: {source}"))]
    Codec {
        key: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Keys {first} & {second} must share a hash slot, but do not"))]
    CrossPartition {
        first: String,
        second: String,
        backtrace: Backtrace,
    },
    #[snafu(display("The fabric returned a response that couldn't be interpreted: {details}"))]
    Protocol { details: String, backtrace: Backtrace },
    #[snafu(display("No response from the fabric within {limit:?}"))]
    Timeout { limit: Duration, backtrace: Backtrace },
    #[snafu(display("The fabric is unavailable: {source}"))]
    Unavailable {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Wrap an adapter-specific failure
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        UnavailableSnafu.into_error(Box::new(err))
    }
    pub fn cross_partition(first: &str, second: &str) -> Error {
        CrossPartitionSnafu {
            first: first.to_owned(),
            second: second.to_owned(),
        }
        .build()
    }
    pub fn protocol(details: impl Into<String>) -> Error {
        ProtocolSnafu {
            details: details.into(),
        }
        .build()
    }
    pub fn timeout(limit: Duration) -> Error {
        TimeoutSnafu { limit }.build()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("fabric.degraded") }

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Likes                                                 //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LikeDirection {
    Like,
    Unlike,
}

/// One like or unlike, as a single value
///
/// A like lives in three places at once: the post's counter, the post's like-set, and the post's
/// score in the trending ranking. A [LikeMutation] names all three so that an adapter can apply
/// them together: the counter & like-set share a hash slot & are updated atomically (the
/// membership test included); the trending ranking is global and is updated in the same call, but
/// on its own slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LikeMutation {
    post: PostId,
    username: Username,
    direction: LikeDirection,
}

impl LikeMutation {
    pub fn like(post: &PostId, username: &Username) -> LikeMutation {
        LikeMutation {
            post: *post,
            username: username.clone(),
            direction: LikeDirection::Like,
        }
    }
    pub fn unlike(post: &PostId, username: &Username) -> LikeMutation {
        LikeMutation {
            post: *post,
            username: username.clone(),
            direction: LikeDirection::Unlike,
        }
    }
    pub fn post(&self) -> &PostId {
        &self.post
    }
    pub fn username(&self) -> &Username {
        &self.username
    }
    pub fn direction(&self) -> LikeDirection {
        self.direction
    }
    /// +1 for a like, -1 for an unlike
    pub fn delta(&self) -> i64 {
        match self.direction {
            LikeDirection::Like => 1,
            LikeDirection::Unlike => -1,
        }
    }
    pub fn count_key(&self) -> Key {
        Key::like_count(&self.post)
    }
    pub fn users_key(&self) -> Key {
        Key::like_users(&self.post)
    }
    pub fn trending_key(&self) -> Key {
        Key::trending()
    }
    /// Fail unless the counter & like-set keys share a slot
    pub fn check_colocated(&self) -> Result<()> {
        let (count, users) = (self.count_key(), self.users_key());
        if count.slot() == users.slot() {
            Ok(())
        } else {
            Err(Error::cross_partition(&count, &users))
        }
    }
}

/// The result of applying a [LikeMutation]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LikeOutcome {
    /// The post's like count after the mutation
    pub count: i64,
    /// False if the mutation was a no-op (a repeated like, or unliking a post one hasn't liked)
    pub applied: bool,
    /// True if the post's trending score moved along with the counter. An applied mutation whose
    /// ranking update failed still reports success, with this unset: the counter & like-set have
    /// changed, and retrying would be a no-op.
    pub ranked: bool,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     The adapter interface                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait]
pub trait Backend {
    /// Read a string value
    async fn get(&self, key: &Key) -> Result<Option<String>>;
    /// Write a string value that expires after `ttl`
    async fn set_ex(&self, key: &Key, value: &str, ttl: Duration) -> Result<()>;
    /// Delete `keys`; return the number of keys that existed. All `keys` must share a slot.
    async fn delete(&self, keys: &[Key]) -> Result<usize>;
    /// Delete every key matching `pattern`; return the number deleted. The scan is confined to the
    /// node owning the pattern's slot.
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize>;
    /// Read an integer counter; a missing counter reads as zero
    async fn counter(&self, key: &Key) -> Result<i64>;
    /// Test `member` for membership in the set at `key`
    async fn is_member(&self, key: &Key, member: &str) -> Result<bool>;
    /// All members of the set at `key`
    async fn members(&self, key: &Key) -> Result<Vec<String>>;
    /// The score of `member` in the sorted set at `key`
    async fn score(&self, key: &Key, member: &str) -> Result<Option<f64>>;
    /// The top `limit` members of the sorted set at `key`, highest score first
    async fn top_scores(&self, key: &Key, limit: usize) -> Result<Vec<(String, f64)>>;
    /// Apply a [LikeMutation]
    ///
    /// The membership test, counter update & set update must be atomic with respect to any other
    /// mutation on the same post. The counter never goes below zero. When (and only when) the
    /// mutation is applied, the post's trending score moves by [LikeMutation::delta]; a post whose
    /// trending score falls to zero or below leaves the ranking. An error means nothing was
    /// written; a failure to move the trending score after the counter & like-set have been
    /// updated is reported through [LikeOutcome::ranked] instead.
    async fn apply_like(&self, mutation: &LikeMutation) -> Result<LikeOutcome>;
    /// Round-trip to the fabric
    async fn ping(&self) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             TTLs                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Time-to-live, in seconds, for each sort of cached artifact
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Ttls {
    pub feed: u64,
    pub conversation: u64,
    pub suggestions: u64,
}

impl Default for Ttls {
    fn default() -> Self {
        Ttls {
            feed: 60,
            conversation: 300,
            suggestions: 600,
        }
    }
}

impl Ttls {
    pub fn feed(&self) -> Duration {
        Duration::from_secs(self.feed)
    }
    pub fn conversation(&self) -> Duration {
        Duration::from_secs(self.conversation)
    }
    pub fn suggestions(&self) -> Duration {
        Duration::from_secs(self.suggestions)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Fabric                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A [Backend] plus the error discipline described in the module docs
///
/// Methods returning `Option` or `()` are best-effort: they never fail, logging & counting
/// ("fabric.degraded") whatever went wrong. Methods returning [Result] are integrity-critical.
pub struct Fabric {
    backend: Arc<dyn Backend + Send + Sync>,
    ttls: Ttls,
    instruments: Arc<Instruments>,
}

impl Fabric {
    pub fn new(
        backend: Arc<dyn Backend + Send + Sync>,
        ttls: Ttls,
        instruments: Arc<Instruments>,
    ) -> Fabric {
        Fabric {
            backend,
            ttls,
            instruments,
        }
    }
    pub fn ttls(&self) -> &Ttls {
        &self.ttls
    }
    fn degraded(&self, op: &'static str, key: &str, err: &Error) {
        warn!("Fabric {} on {} failed ({}); continuing without it.", op, key, err);
        counter_add!(self.instruments, "fabric.degraded", 1, &[]);
    }
    /// Read & deserialize a cached value; any failure reads as a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &Key) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(text)) => match serde_json::from_str::<T>(&text) {
                Ok(t) => Some(t),
                Err(err) => {
                    self.degraded(
                        "decode",
                        key,
                        &CodecSnafu {
                            key: key.to_string(),
                        }
                        .into_error(err),
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                self.degraded("get", key, &err);
                None
            }
        }
    }
    /// Serialize & cache a value
    pub async fn put_json<T: Serialize + Sync>(&self, key: &Key, value: &T, ttl: Duration) {
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(err) => {
                return self.degraded(
                    "encode",
                    key,
                    &CodecSnafu {
                        key: key.to_string(),
                    }
                    .into_error(err),
                );
            }
        };
        if let Err(err) = self.backend.set_ex(key, &text, ttl).await {
            self.degraded("set", key, &err);
        }
    }
    /// Drop a cached value
    pub async fn invalidate(&self, key: &Key) {
        match self.backend.delete(std::slice::from_ref(key)).await {
            Ok(n) => debug!("Invalidated {} ({} removed).", key, n),
            Err(err) => self.degraded("delete", key, &err),
        }
    }
    /// Drop every cached value matching `pattern`
    pub async fn invalidate_matching(&self, pattern: &KeyPattern) {
        match self.backend.delete_matching(pattern).await {
            Ok(n) => debug!("Invalidated {} key(s) matching {}.", n, pattern),
            Err(err) => self.degraded("scan/delete", pattern, &err),
        }
    }
    /// Apply a like or unlike
    pub async fn apply_like(&self, mutation: &LikeMutation) -> Result<LikeOutcome> {
        mutation.check_colocated()?;
        let outcome = self.backend.apply_like(mutation).await?;
        if outcome.applied && !outcome.ranked {
            warn!(
                "Applied {:?} of {} by {}, but the trending ranking wasn't updated",
                mutation.direction(),
                mutation.post(),
                mutation.username()
            );
            counter_add!(self.instruments, "fabric.degraded", 1, &[]);
        }
        Ok(outcome)
    }
    pub async fn like_count(&self, post: &PostId) -> Result<i64> {
        Ok(self.backend.counter(&Key::like_count(post)).await?.max(0))
    }
    pub async fn has_liked(&self, post: &PostId, username: &Username) -> Result<bool> {
        self.backend
            .is_member(&Key::like_users(post), username)
            .await
    }
    pub async fn liked_by(&self, post: &PostId) -> Result<Vec<String>> {
        self.backend.members(&Key::like_users(post)).await
    }
    pub async fn trending_score(&self, post: &PostId) -> Result<i64> {
        Ok(self
            .backend
            .score(&Key::trending(), &post.to_string())
            .await?
            .map(|s| s.round() as i64)
            .unwrap_or(0))
    }
    pub async fn top_trending(&self, limit: usize) -> Result<Vec<(String, f64)>> {
        self.backend.top_scores(&Key::trending(), limit).await
    }
    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric").field("ttls", &self.ttls).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::memory;

    fn fabric() -> (Arc<memory::Fabric>, Fabric) {
        let backend = Arc::new(memory::Fabric::default());
        let fabric = Fabric::new(
            backend.clone(),
            Ttls::default(),
            Arc::new(Instruments::new("redk-test")),
        );
        (backend, fabric)
    }

    #[test]
    fn test_like_mutations() {
        let post = PostId::new();
        let alice = Username::new("alice").unwrap();
        let like = LikeMutation::like(&post, &alice);
        assert_eq!(like.delta(), 1);
        assert_eq!(LikeMutation::unlike(&post, &alice).delta(), -1);
        assert!(like.check_colocated().is_ok());
        assert_eq!(like.count_key().tag(), like.users_key().tag());
    }

    #[tokio::test]
    async fn test_best_effort() {
        let (backend, fabric) = fabric();
        let alice = Username::new("alice").unwrap();
        let key = Key::suggestions(&alice);

        fabric
            .put_json(&key, &vec![1, 2, 3], Duration::from_secs(60))
            .await;
        assert_eq!(fabric.get_json::<Vec<i32>>(&key).await, Some(vec![1, 2, 3]));
        // Undecodable values read as misses
        assert_eq!(fabric.get_json::<Vec<String>>(&key).await, None);

        backend.set_available(false);
        // Nothing here may fail...
        fabric
            .put_json(&key, &vec![4, 5], Duration::from_secs(60))
            .await;
        assert_eq!(fabric.get_json::<Vec<i32>>(&key).await, None);
        fabric.invalidate(&key).await;
        // but this must
        assert!(
            fabric
                .apply_like(&LikeMutation::like(&PostId::new(), &alice))
                .await
                .is_err()
        );

        backend.set_available(true);
        assert_eq!(fabric.get_json::<Vec<i32>>(&key).await, Some(vec![1, 2, 3]));
        fabric.invalidate(&key).await;
        assert_eq!(fabric.get_json::<Vec<i32>>(&key).await, None);
    }
}
