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

//! # social
//!
//! The write path: users, posts & follows.
//!
//! Every write goes to its authoritative store first (users & posts to the record store, follows
//! to the graph) and only then to the other stores. Record-store failures fail the operation with
//! nothing written. Graph mirrors of record-store writes are best-effort. A follow that the graph
//! can't take is written to the record store instead, for later reconciliation, and reported as
//! [Followed::Deferred].
//!
//! Whatever changes what a user would see in their feeds or suggestions drops those caches. That's
//! the acting user's caches only; other users' caches catch up when their TTLs expire.

use std::sync::Arc;

use chrono::Utc;
use snafu::{Backtrace, prelude::*};
use tracing::{info, warn};

use crate::{
    counter_add,
    entities::{Post, User, UserEmail, Username},
    fabric::Fabric,
    graph,
    keys::{Key, KeyPattern},
    metrics::Instruments,
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The username {username} is already taken"))]
    DuplicateUsername {
        username: Username,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "Failed to record {follower} following {followee} in the graph ({graph}) or the record store ({source}); nothing was written"
    ))]
    Follow {
        follower: Username,
        followee: Username,
        graph: graph::Error,
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Graph failure: {source}"))]
    Graph {
        source: graph::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read from the record store: {source}"))]
    Records {
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{username} can't follow or unfollow themselves"))]
    SelfFollow {
        username: Username,
        backtrace: Backtrace,
    },
    #[snafu(display("No such user: {username}"))]
    UnknownUser {
        username: Username,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to write to the record store; nothing was written: {source}"))]
    Write {
        source: storage::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a follow was recorded
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Followed {
    /// A new FOLLOWS edge was created
    Created,
    /// The edge already existed
    AlreadyFollowing,
    /// The graph was unavailable; the follow was written to the record store for reconciliation
    Deferred,
}

/// The write-path engine
pub struct Social {
    records: Arc<dyn storage::Backend + Send + Sync>,
    graph: Arc<dyn graph::Backend + Send + Sync>,
    fabric: Arc<Fabric>,
    instruments: Arc<Instruments>,
}

impl Social {
    pub fn new(
        records: Arc<dyn storage::Backend + Send + Sync>,
        graph: Arc<dyn graph::Backend + Send + Sync>,
        fabric: Arc<Fabric>,
        instruments: Arc<Instruments>,
    ) -> Social {
        Social {
            records,
            graph,
            fabric,
            instruments,
        }
    }

    async fn user(&self, username: &Username) -> Result<User> {
        self.records
            .user_for_name(username)
            .await
            .context(RecordsSnafu)?
            .context(UnknownUserSnafu {
                username: username.clone(),
            })
    }

    fn mirror_failed(&self, what: &str, err: &graph::Error) {
        warn!("Failed to mirror {} to the graph: {}", what, err);
        counter_add!(self.instruments, "graph.degraded", 1, &[]);
    }

    async fn invalidate_feeds(&self, username: &Username) {
        self.fabric
            .invalidate_matching(&KeyPattern::feeds(username))
            .await;
    }

    /// Create a new user
    #[tracing::instrument(skip(self))]
    pub async fn create_user(
        &self,
        username: &Username,
        email: &UserEmail,
        display_name: Option<&str>,
        bio: Option<&str>,
    ) -> Result<User> {
        let user = User::new(username, email, display_name, bio);
        ensure!(
            self.records.add_user(&user).await.context(WriteSnafu)?,
            DuplicateUsernameSnafu {
                username: username.clone()
            }
        );
        if let Err(err) = self.graph.upsert_user(&user).await {
            self.mirror_failed(&format!("user {}", username), &err);
        }
        info!("Created user {} ({})", username, user.id());
        Ok(user)
    }

    /// Create a new post by `author`
    #[tracing::instrument(skip(self, content, tags))]
    pub async fn create_post<I, S>(&self, author: &Username, content: &str, tags: I) -> Result<Post>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let user = self.user(author).await?;
        let post = Post::new(&user, content, tags);
        self.records.add_post(&post).await.context(WriteSnafu)?;
        if let Err(err) = self.graph.upsert_post(&post).await {
            self.mirror_failed(&format!("post {}", post.id()), &err);
        }
        self.invalidate_feeds(author).await;
        Ok(post)
    }

    /// `follower` follows `followee`
    #[tracing::instrument(skip(self))]
    pub async fn follow(&self, follower: &Username, followee: &Username) -> Result<Followed> {
        ensure!(
            follower != followee,
            SelfFollowSnafu {
                username: follower.clone()
            }
        );
        self.user(follower).await?;
        self.user(followee).await?;

        let followed = match self.graph.add_follow(follower, followee).await {
            Ok(true) => Followed::Created,
            Ok(false) => Followed::AlreadyFollowing,
            Err(graph) => {
                warn!(
                    "Failed to add {} -> {} to the graph ({}); falling back to the record store",
                    follower, followee, graph
                );
                counter_add!(self.instruments, "graph.degraded", 1, &[]);
                self.records
                    .add_follow_fallback(follower, followee, &Utc::now())
                    .await
                    .context(FollowSnafu {
                        follower: follower.clone(),
                        followee: followee.clone(),
                        graph,
                    })?;
                Followed::Deferred
            }
        };
        if followed != Followed::AlreadyFollowing {
            self.invalidate_feeds(follower).await;
            self.fabric.invalidate(&Key::suggestions(follower)).await;
        }
        Ok(followed)
    }

    /// `follower` stops following `followee`; return false if they weren't
    #[tracing::instrument(skip(self))]
    pub async fn unfollow(&self, follower: &Username, followee: &Username) -> Result<bool> {
        ensure!(
            follower != followee,
            SelfFollowSnafu {
                username: follower.clone()
            }
        );
        self.user(follower).await?;
        self.user(followee).await?;

        let removed = self
            .graph
            .remove_follow(follower, followee)
            .await
            .context(GraphSnafu)?;
        if removed {
            self.invalidate_feeds(follower).await;
            self.fabric.invalidate(&Key::suggestions(follower)).await;
        }
        Ok(removed)
    }

    /// Everyone `username` follows
    #[tracing::instrument(skip(self))]
    pub async fn following(&self, username: &Username) -> Result<Vec<Username>> {
        self.user(username).await?;
        self.graph.following(username).await.context(GraphSnafu)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{entities::FeedMode, fabric::Ttls, memory::Stores};

    struct Fixture {
        stores: Stores,
        social: Social,
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
            let social = Social::new(
                stores.records.clone(),
                stores.graph.clone(),
                fabric,
                instruments,
            );
            Fixture { stores, social }
        }
        async fn user(&self, name: &str) -> Username {
            let username = Username::new(name).unwrap();
            self.social
                .create_user(
                    &username,
                    &UserEmail::new(&format!("{}@example.com", name)).unwrap(),
                    Some(name),
                    None,
                )
                .await
                .unwrap();
            username
        }
        fn seed_caches(&self, username: &Username) -> [Key; 3] {
            [
                Key::feed(username, FeedMode::All, 10),
                Key::feed(username, FeedMode::SelfOnly, 5),
                Key::suggestions(username),
            ]
        }
        async fn fill(&self, keys: &[Key]) {
            for key in keys {
                self.social
                    .fabric
                    .put_json(key, &Vec::<String>::new(), std::time::Duration::from_secs(60))
                    .await;
            }
        }
    }

    #[tokio::test]
    async fn test_users() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        assert!(matches!(
            fx.social
                .create_user(
                    &alice,
                    &UserEmail::new("alice2@example.com").unwrap(),
                    None,
                    None
                )
                .await,
            Err(Error::DuplicateUsername { .. })
        ));

        // The graph mirror is best-effort
        fx.stores.graph.set_available(false);
        fx.user("bob").await;
        fx.stores.graph.set_available(true);

        fx.stores.records.set_available(false);
        assert!(matches!(
            fx.social
                .create_user(
                    &Username::new("carol").unwrap(),
                    &UserEmail::new("carol@example.com").unwrap(),
                    None,
                    None
                )
                .await,
            Err(Error::Write { .. })
        ));
    }

    #[tokio::test]
    async fn test_follows() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;
        let carol = fx.user("carol").await;

        let caches = fx.seed_caches(&alice);
        fx.fill(&caches).await;
        assert_eq!(
            fx.social.follow(&alice, &bob).await.unwrap(),
            Followed::Created
        );
        assert!(caches.iter().all(|key| !fx.stores.fabric.contains(key)));

        // Idempotent, and leaves the caches alone
        fx.fill(&caches).await;
        assert_eq!(
            fx.social.follow(&alice, &bob).await.unwrap(),
            Followed::AlreadyFollowing
        );
        assert!(caches.iter().all(|key| fx.stores.fabric.contains(key)));

        // Only the actor's caches are dropped
        let bobs = fx.seed_caches(&bob);
        fx.fill(&bobs).await;
        fx.social.follow(&alice, &carol).await.unwrap();
        assert!(bobs.iter().all(|key| fx.stores.fabric.contains(key)));
        assert_eq!(
            fx.social.following(&alice).await.unwrap(),
            vec![bob.clone(), carol.clone()]
        );

        assert!(fx.social.unfollow(&alice, &bob).await.unwrap());
        assert!(!fx.social.unfollow(&alice, &bob).await.unwrap());
        assert_eq!(fx.social.following(&alice).await.unwrap(), vec![carol]);

        assert!(matches!(
            fx.social.follow(&alice, &alice).await,
            Err(Error::SelfFollow { .. })
        ));
        assert!(matches!(
            fx.social.unfollow(&alice, &alice).await,
            Err(Error::SelfFollow { .. })
        ));
        assert!(matches!(
            fx.social
                .follow(&alice, &Username::new("nobody").unwrap())
                .await,
            Err(Error::UnknownUser { .. })
        ));
    }

    #[tokio::test]
    async fn test_follow_fallback() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;

        fx.stores.graph.set_available(false);
        assert_eq!(
            fx.social.follow(&alice, &bob).await.unwrap(),
            Followed::Deferred
        );
        assert_eq!(
            fx.stores.records.follow_fallbacks(),
            vec![(alice.clone(), bob.clone())]
        );
        assert!(matches!(
            fx.social.unfollow(&alice, &bob).await,
            Err(Error::Graph { .. })
        ));

        // With both down, the follow fails outright... but the existence checks go first
        fx.stores.records.set_available(false);
        assert!(matches!(
            fx.social.follow(&alice, &bob).await,
            Err(Error::Records { .. })
        ));
    }

    #[tokio::test]
    async fn test_posts() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let caches = fx.seed_caches(&alice);
        fx.fill(&caches).await;

        let post = fx
            .social
            .create_post(&alice, "Hello, world!", ["greetings"])
            .await
            .unwrap();
        assert_eq!(post.author(), &alice);
        assert!(post.tags().contains("greetings"));
        // Feeds are dropped; suggestions aren't affected by posting
        assert!(!fx.stores.fabric.contains(&caches[0]));
        assert!(!fx.stores.fabric.contains(&caches[1]));
        assert!(fx.stores.fabric.contains(&caches[2]));

        assert!(matches!(
            fx.social
                .create_post(&Username::new("nobody").unwrap(), "boo", Vec::<String>::new())
                .await,
            Err(Error::UnknownUser { .. })
        ));
    }
}
