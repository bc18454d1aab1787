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

//! # recommend
//!
//! "Who to follow" suggestions.
//!
//! Candidates are the users two FOLLOWS hops out from the requester (excluding the requester &
//! anyone they already follow). Each candidate is scored as
//!
//! ```text
//! score = 3 * mutual_connections + 2 * followers_count + posts_count
//! ```
//!
//! where `mutual_connections` is the number of distinct users the requester follows who in turn
//! follow the candidate. Candidates are ranked by score, highest first, ties broken by username so
//! that the ranking is deterministic.
//!
//! New users (or a graph that can't be reached) produce no candidates; in that case we fall back to
//! an arbitrary sample of users from the record store, each with a nominal score of one & a reason
//! explaining why. The fallback never fails.
//!
//! The full ranking (not just the requested prefix) is cached per user. Fallback results, and
//! rankings computed while the graph was misbehaving, are not.

use std::sync::Arc;

use futures::{StreamExt, stream};
use snafu::{Backtrace, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::{Suggestion, Username},
    fabric::Fabric,
    graph,
    keys::Key,
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
}

pub type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("suggestions.cache.hits") }
inventory::submit! { metrics::Registration::new("suggestions.cache.misses") }
inventory::submit! { metrics::Registration::new("suggestions.fallbacks") }

/// The reason attached to suggestions produced without the benefit of the graph
pub const FALLBACK_REASON: &str = "insufficient graph data";

const MUTUAL_WEIGHT: usize = 3;
const FOLLOWERS_WEIGHT: usize = 2;
const POSTS_WEIGHT: usize = 1;

/// How many candidates to score concurrently
const SCORING_CONCURRENCY: usize = 8;

/// Compute a candidate's composite score
pub fn score(mutual_connections: usize, followers_count: usize, posts_count: usize) -> f64 {
    (mutual_connections * MUTUAL_WEIGHT
        + followers_count * FOLLOWERS_WEIGHT
        + posts_count * POSTS_WEIGHT) as f64
}

/// Rank suggestions: score descending, then username ascending
pub fn rank(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|lhs, rhs| {
        rhs.score
            .total_cmp(&lhs.score)
            .then_with(|| lhs.username.cmp(&rhs.username))
    })
}

/// The recommendation engine
pub struct Recommender {
    records: Arc<dyn storage::Backend + Send + Sync>,
    graph: Arc<dyn graph::Backend + Send + Sync>,
    fabric: Arc<Fabric>,
    instruments: Arc<Instruments>,
}

impl Recommender {
    pub fn new(
        records: Arc<dyn storage::Backend + Send + Sync>,
        graph: Arc<dyn graph::Backend + Send + Sync>,
        fabric: Arc<Fabric>,
        instruments: Arc<Instruments>,
    ) -> Recommender {
        Recommender {
            records,
            graph,
            fabric,
            instruments,
        }
    }

    /// Produce up to `limit` ranked suggestions for `username`
    #[tracing::instrument(skip(self))]
    pub async fn get_suggestions(
        &self,
        username: &Username,
        limit: usize,
    ) -> Result<Vec<Suggestion>> {
        self.records
            .user_for_name(username)
            .await
            .context(RecordsSnafu)?
            .context(UnknownUserSnafu {
                username: username.clone(),
            })?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = Key::suggestions(username);
        if let Some(mut ranking) = self.fabric.get_json::<Vec<Suggestion>>(&key).await {
            debug!("Suggestions cache hit: {}", key);
            counter_add!(self.instruments, "suggestions.cache.hits", 1, &[]);
            ranking.truncate(limit);
            return Ok(ranking);
        }
        counter_add!(self.instruments, "suggestions.cache.misses", 1, &[]);

        let (mut ranking, complete) = self.rank_candidates(username).await;
        if ranking.is_empty() {
            return Ok(self.fallback(username, limit).await);
        }
        if complete {
            self.fabric
                .put_json(&key, &ranking, self.fabric.ttls().suggestions())
                .await;
        }
        ranking.truncate(limit);
        Ok(ranking)
    }

    // Walk the graph, score & rank every candidate. The flag is false if any graph call failed
    // along the way.
    async fn rank_candidates(&self, username: &Username) -> (Vec<Suggestion>, bool) {
        let candidates = match self.graph.friends_of_friends(username).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("Failed to walk the graph out from {}: {}", username, err);
                counter_add!(self.instruments, "graph.degraded", 1, &[]);
                return (Vec::new(), false);
            }
        };
        debug!("{} has {} candidate(s)", username, candidates.len());

        let scored = stream::iter(candidates)
            .map(|(candidate, mutual_connections)| async move {
                let counts = futures::try_join!(
                    self.graph.followers_count(&candidate),
                    self.graph.posts_count(&candidate)
                );
                (candidate, mutual_connections, counts)
            })
            .buffer_unordered(SCORING_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut complete = true;
        let mut ranking = scored
            .into_iter()
            .map(|(candidate, mutual_connections, counts)| {
                let (followers_count, posts_count) = counts.unwrap_or_else(|err| {
                    warn!("Failed to count {}'s followers & posts: {}", candidate, err);
                    counter_add!(self.instruments, "graph.degraded", 1, &[]);
                    complete = false;
                    (0, 0)
                });
                Suggestion {
                    score: score(mutual_connections, followers_count, posts_count),
                    username: candidate,
                    mutual_connections,
                    followers_count,
                    posts_count,
                    reason: None,
                }
            })
            .collect::<Vec<Suggestion>>();
        rank(&mut ranking);
        (ranking, complete)
    }

    // An arbitrary sample of users other than `username`; errors produce an empty list.
    async fn fallback(&self, username: &Username, limit: usize) -> Vec<Suggestion> {
        counter_add!(self.instruments, "suggestions.fallbacks", 1, &[]);
        match self.records.sample_users(limit + 1).await {
            Ok(users) => {
                let mut suggestions = users
                    .into_iter()
                    .filter(|user| user.username() != username)
                    .take(limit)
                    .map(|user| Suggestion {
                        username: user.username().clone(),
                        score: 1.0,
                        mutual_connections: 0,
                        followers_count: 0,
                        posts_count: 0,
                        reason: Some(FALLBACK_REASON.to_owned()),
                    })
                    .collect::<Vec<Suggestion>>();
                rank(&mut suggestions);
                suggestions
            }
            Err(err) => {
                warn!("Failed to sample users for {}: {}", username, err);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        entities::{Post, User, UserEmail},
        fabric::Ttls,
        graph::Backend as _,
        memory::Stores,
        storage::Backend as _,
    };

    struct Fixture {
        stores: Stores,
        recommender: Recommender,
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
            let recommender = Recommender::new(
                stores.records.clone(),
                stores.graph.clone(),
                fabric,
                instruments,
            );
            Fixture {
                stores,
                recommender,
            }
        }
        async fn users(&self, names: &[&str]) -> Vec<User> {
            let mut users = Vec::new();
            for name in names {
                let user = User::new(
                    &Username::new(name).unwrap(),
                    &UserEmail::new(&format!("{}@example.com", name)).unwrap(),
                    None,
                    None,
                );
                self.stores.records.add_user(&user).await.unwrap();
                self.stores.graph.upsert_user(&user).await.unwrap();
                users.push(user);
            }
            users
        }
        async fn follow(&self, follower: &User, followee: &User) {
            self.stores
                .graph
                .add_follow(follower.username(), followee.username())
                .await
                .unwrap();
        }
        async fn post(&self, author: &User) {
            let post = Post::new(author, "hello", Vec::<String>::new());
            self.stores.records.add_post(&post).await.unwrap();
            self.stores.graph.upsert_post(&post).await.unwrap();
        }
    }

    #[test]
    fn test_score_and_rank() {
        assert_eq!(score(1, 0, 0), 3.0);
        assert_eq!(score(2, 3, 4), 16.0);
        let mk = |name: &str, score: f64| Suggestion {
            username: Username::new(name).unwrap(),
            score,
            mutual_connections: 0,
            followers_count: 0,
            posts_count: 0,
            reason: None,
        };
        let mut ranking = vec![mk("zed", 5.0), mk("bob", 3.0), mk("amy", 5.0), mk("cal", 7.0)];
        rank(&mut ranking);
        assert_eq!(
            ranking
                .iter()
                .map(|s| s.username.to_string())
                .collect::<Vec<String>>(),
            vec!["cal", "amy", "zed", "bob"]
        );
    }

    #[tokio::test]
    async fn test_two_hops() {
        let fx = Fixture::new();
        let u = fx.users(&["alice", "bob", "carol"]).await;
        fx.follow(&u[0], &u[1]).await;
        fx.follow(&u[1], &u[2]).await;

        let suggestions = fx
            .recommender
            .get_suggestions(u[0].username(), 10)
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(&suggestions[0].username, u[2].username());
        assert_eq!(suggestions[0].mutual_connections, 1);
        assert_eq!(suggestions[0].followers_count, 1);
        assert_eq!(suggestions[0].posts_count, 0);
        assert_eq!(suggestions[0].score, 5.0);
        assert_eq!(suggestions[0].reason, None);
    }

    #[tokio::test]
    async fn test_ranking() {
        let fx = Fixture::new();
        let u = fx
            .users(&["alice", "bob", "carol", "dave", "erin", "frank", "gina"])
            .await;
        let (alice, bob, carol, dave, erin, frank, gina) =
            (&u[0], &u[1], &u[2], &u[3], &u[4], &u[5], &u[6]);
        // alice follows bob & carol...
        fx.follow(alice, bob).await;
        fx.follow(alice, carol).await;
        // both of whom follow dave (mutual = 2, followers = 2 => 10)
        fx.follow(bob, dave).await;
        fx.follow(carol, dave).await;
        // bob follows erin & frank, who tie (mutual = 1, followers = 1, one post => 6)
        fx.follow(bob, frank).await;
        fx.follow(bob, erin).await;
        fx.post(erin).await;
        fx.post(frank).await;
        // carol follows alice, who must never be suggested to herself, and bob, whom alice
        // already follows
        fx.follow(carol, alice).await;
        fx.follow(carol, bob).await;
        // gina is three hops out
        fx.follow(dave, gina).await;

        let suggestions = fx
            .recommender
            .get_suggestions(alice.username(), 10)
            .await
            .unwrap();
        assert_eq!(
            suggestions
                .iter()
                .map(|s| (s.username.to_string(), s.score))
                .collect::<Vec<(String, f64)>>(),
            vec![
                ("dave".to_owned(), 10.0),
                ("erin".to_owned(), 6.0),
                ("frank".to_owned(), 6.0)
            ]
        );
        assert_eq!(suggestions[0].mutual_connections, 2);

        // Repeated calls are served from the cache, and agree
        let again = fx
            .recommender
            .get_suggestions(alice.username(), 2)
            .await
            .unwrap();
        assert_eq!(again, suggestions[..2].to_vec());
    }

    #[tokio::test]
    async fn test_fallback() {
        let fx = Fixture::new();
        let u = fx.users(&["alice", "bob", "carol"]).await;

        let suggestions = fx
            .recommender
            .get_suggestions(u[0].username(), 10)
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions.iter().all(|s| {
            s.score == 1.0
                && s.reason.as_deref() == Some(FALLBACK_REASON)
                && &s.username != u[0].username()
        }));
        // Fallbacks aren't cached
        assert!(!fx.stores.fabric.contains(&Key::suggestions(u[0].username())));

        // Same story with the graph down, even though alice has two-hop neighbours
        fx.follow(&u[0], &u[1]).await;
        fx.follow(&u[1], &u[2]).await;
        fx.stores.graph.set_available(false);
        let suggestions = fx
            .recommender
            .get_suggestions(u[0].username(), 1)
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].reason.as_deref(), Some(FALLBACK_REASON));

        // Unknown users are an error
        fx.stores.graph.set_available(true);
        assert!(
            fx.recommender
                .get_suggestions(&Username::new("nobody").unwrap(), 10)
                .await
                .is_err()
        );
    }
}
