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

//! # feed
//!
//! Feed assembly.
//!
//! A feed is the most recent posts by some set of authors, newest first. Which authors depends on
//! the [FeedMode]: the requesting user, the users they follow, or both. Follow relationships live
//! in the graph & posts live in the record store, so a feed is a join across the two; we cache the
//! result in the fabric for a short while (cache-aside: read the cache, on a miss compute & write
//! back).
//!
//! Cached feeds are never re-validated; instead, anything that could change a user's feeds (a
//! follow, an unfollow, a new post) deletes every feed cached for that user. Since all of a user's
//! feed keys share the user's hash tag, that's one `SCAN` on one node (see [keys]).
//!
//! [keys]: crate::keys

use std::sync::Arc;

use itertools::Itertools;
use snafu::{Backtrace, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::{FeedMode, Post, Username},
    fabric::Fabric,
    graph,
    keys::{Key, KeyPattern},
    metrics::{self, Instruments},
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read from the record store: {source}"))]
    Records {
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No such user: {username}"))]
    UnknownUser {
        username: Username,
        backtrace: Backtrace,
    },
    #[snafu(display("A feed must be at least one post long"))]
    ZeroLimit { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("feed.cache.hits") }
inventory::submit! { metrics::Registration::new("feed.cache.misses") }

/// The feed assembly engine
pub struct Feeds {
    records: Arc<dyn storage::Backend + Send + Sync>,
    graph: Arc<dyn graph::Backend + Send + Sync>,
    fabric: Arc<Fabric>,
    instruments: Arc<Instruments>,
}

impl Feeds {
    pub fn new(
        records: Arc<dyn storage::Backend + Send + Sync>,
        graph: Arc<dyn graph::Backend + Send + Sync>,
        fabric: Arc<Fabric>,
        instruments: Arc<Instruments>,
    ) -> Feeds {
        Feeds {
            records,
            graph,
            fabric,
            instruments,
        }
    }

    /// Retrieve up to `limit` posts for `username`'s feed, newest first
    #[tracing::instrument(skip(self))]
    pub async fn get_feed(
        &self,
        username: &Username,
        mode: FeedMode,
        limit: usize,
    ) -> Result<Vec<Post>> {
        ensure!(limit > 0, ZeroLimitSnafu);
        // Existence is always checked against the record store, cache or no cache.
        self.records
            .user_for_name(username)
            .await
            .context(RecordsSnafu)?
            .context(UnknownUserSnafu {
                username: username.clone(),
            })?;

        let key = Key::feed(username, mode, limit);
        if let Some(posts) = self.fabric.get_json::<Vec<Post>>(&key).await {
            debug!("Feed cache hit: {}", key);
            counter_add!(self.instruments, "feed.cache.hits", 1, &[]);
            return Ok(posts);
        }
        counter_add!(self.instruments, "feed.cache.misses", 1, &[]);

        let (authors, complete) = self.authors(username, mode).await;
        if authors.is_empty() {
            debug!("{} has no authors in mode {}", username, mode);
            return Ok(Vec::new());
        }

        let posts = self
            .records
            .posts_by_authors(&authors, limit)
            .await
            .context(RecordsSnafu)?;
        // A feed assembled without the graph is served, but not cached.
        if complete {
            self.fabric
                .put_json(&key, &posts, self.fabric.ttls().feed())
                .await;
        }
        Ok(posts)
    }

    /// Drop every feed cached for `username`, across all modes & limits
    pub async fn invalidate(&self, username: &Username) {
        self.fabric
            .invalidate_matching(&KeyPattern::feeds(username))
            .await
    }

    // Resolve the authors whose posts make up `username`'s feed in `mode`. If the graph can't be
    // reached, we make do with what we have (which is possibly nothing) & say so.
    async fn authors(&self, username: &Username, mode: FeedMode) -> (Vec<Username>, bool) {
        let mut authors = Vec::new();
        let mut complete = true;
        if mode.includes_self() {
            authors.push(username.clone());
        }
        if mode.includes_followees() {
            match self.graph.following(username).await {
                Ok(followees) => authors.extend(followees),
                Err(err) => {
                    warn!(
                        "Failed to resolve {}'s followees ({}); assembling the feed without them.",
                        username, err
                    );
                    counter_add!(self.instruments, "graph.degraded", 1, &[]);
                    complete = false;
                }
            }
        }
        (authors.into_iter().unique().collect(), complete)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::time::Duration;

    use crate::{
        entities::{User, UserEmail},
        fabric::Ttls,
        graph::Backend as _,
        memory::Stores,
        storage::Backend as _,
    };

    struct Fixture {
        stores: Stores,
        feeds: Feeds,
    }

    impl Fixture {
        fn new() -> Fixture {
            let stores = Stores::new();
            let instruments = Arc::new(Instruments::new("redk-test"));
            let fabric = Arc::new(Fabric::new(
                stores.fabric.clone(),
                Ttls::default(),
                instruments.clone(),
            ));
            let feeds = Feeds::new(
                stores.records.clone(),
                stores.graph.clone(),
                fabric,
                instruments,
            );
            Fixture { stores, feeds }
        }
        async fn user(&self, name: &str) -> User {
            let user = User::new(
                &Username::new(name).unwrap(),
                &UserEmail::new(&format!("{}@example.com", name)).unwrap(),
                None,
                None,
            );
            assert!(self.stores.records.add_user(&user).await.unwrap());
            self.stores.graph.upsert_user(&user).await.unwrap();
            user
        }
        async fn post(&self, author: &User, content: &str) -> Post {
            // Keep timestamps distinct
            tokio::time::sleep(Duration::from_millis(2)).await;
            let post = Post::new(author, content, ["test"]);
            self.stores.records.add_post(&post).await.unwrap();
            self.stores.graph.upsert_post(&post).await.unwrap();
            post
        }
        async fn follow(&self, follower: &User, followee: &User) {
            self.stores
                .graph
                .add_follow(follower.username(), followee.username())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_feed_modes() {
        let fx = Fixture::new();
        let a = fx.user("alice").await;
        let b = fx.user("bob").await;
        let c = fx.user("carol").await;
        fx.follow(&a, &b).await;
        fx.follow(&a, &c).await;
        let pb = fx.post(&b, "from bob").await;
        let pc = fx.post(&c, "from carol").await;

        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::Following, 10)
            .await
            .unwrap();
        assert_eq!(feed, vec![pc.clone(), pb.clone()]);

        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::SelfOnly, 10)
            .await
            .unwrap();
        assert!(feed.is_empty());

        let pa = fx.post(&a, "from alice").await;
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::All, 10)
            .await
            .unwrap();
        assert_eq!(feed, vec![pa, pc, pb]);
    }

    #[tokio::test]
    async fn test_limits_and_unknown_users() {
        let fx = Fixture::new();
        let a = fx.user("alice").await;
        for i in 0..5 {
            fx.post(&a, &format!("post {}", i)).await;
        }
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::SelfOnly, 3)
            .await
            .unwrap();
        assert_eq!(
            feed.iter().map(|p| p.content()).collect::<Vec<&str>>(),
            vec!["post 4", "post 3", "post 2"]
        );
        assert!(matches!(
            fx.feeds
                .get_feed(a.username(), FeedMode::SelfOnly, 0)
                .await,
            Err(Error::ZeroLimit { .. })
        ));
        assert!(matches!(
            fx.feeds
                .get_feed(&Username::new("nobody").unwrap(), FeedMode::All, 10)
                .await,
            Err(Error::UnknownUser { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_aside() {
        let fx = Fixture::new();
        let a = fx.user("alice").await;
        let p0 = fx.post(&a, "first").await;

        let key = Key::feed(a.username(), FeedMode::SelfOnly, 10);
        assert!(!fx.stores.fabric.contains(&key));
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::SelfOnly, 10)
            .await
            .unwrap();
        assert_eq!(feed, vec![p0.clone()]);
        assert!(fx.stores.fabric.contains(&key));

        // A post written behind the engine's back isn't seen until the cache is invalidated...
        let p1 = fx.post(&a, "second").await;
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::SelfOnly, 10)
            .await
            .unwrap();
        assert_eq!(feed, vec![p0.clone()]);

        // and invalidation clears every mode & limit
        fx.feeds
            .get_feed(a.username(), FeedMode::All, 5)
            .await
            .unwrap();
        fx.feeds.invalidate(a.username()).await;
        assert!(!fx.stores.fabric.contains(&key));
        assert!(
            !fx.stores
                .fabric
                .contains(&Key::feed(a.username(), FeedMode::All, 5))
        );
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::SelfOnly, 10)
            .await
            .unwrap();
        assert_eq!(feed, vec![p1, p0]);
    }

    #[tokio::test]
    async fn test_degraded() {
        let fx = Fixture::new();
        let a = fx.user("alice").await;
        let b = fx.user("bob").await;
        fx.follow(&a, &b).await;
        let pa = fx.post(&a, "mine").await;
        fx.post(&b, "theirs").await;

        // No graph: fall back to whatever authors we could resolve
        fx.stores.graph.set_available(false);
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::All, 10)
            .await
            .unwrap();
        assert_eq!(feed, vec![pa]);
        assert!(
            !fx.stores
                .fabric
                .contains(&Key::feed(a.username(), FeedMode::All, 10))
        );
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::Following, 10)
            .await
            .unwrap();
        assert!(feed.is_empty());
        fx.stores.graph.set_available(true);

        // No fabric: compute every time
        fx.stores.fabric.set_available(false);
        let feed = fx
            .feeds
            .get_feed(a.username(), FeedMode::Following, 10)
            .await
            .unwrap();
        assert_eq!(feed.len(), 1);

        // No record store: that's fatal
        fx.stores.records.set_available(false);
        assert!(matches!(
            fx.feeds.get_feed(a.username(), FeedMode::All, 10).await,
            Err(Error::Records { .. })
        ));
    }
}
