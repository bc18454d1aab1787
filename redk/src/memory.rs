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

//! # memory
//!
//! In-memory implementations of the three adapter traits.
//!
//! These back the unit tests, the in-memory integration suite, and the `InMemory` configuration
//! (handy for poking at the engines without standing-up ScyllaDB & a Redis cluster). Each can be
//! switched "off" with `set_available(false)`, after which every call fails; that's how the tests
//! exercise the engines' degraded paths.
//!
//! Expiry in [Fabric] is measured against [tokio::time::Instant], so tests may pause & advance the
//! clock.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use snafu::{Backtrace, prelude::*};
use tokio::time::Instant;

use crate::{
    entities::{
        ConversationKey, ConversationSummary, DirectMessage, Post, PostId, User, UserId, Username,
        newest_first,
    },
    fabric::{self, LikeMutation, LikeOutcome},
    graph,
    keys::{Key, KeyPattern},
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{key} holds a value of the wrong type"))]
    WrongType { key: String, backtrace: Backtrace },
    #[snafu(display("The in-memory {store} is unavailable"))]
    Unavailable {
        store: &'static str,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An on/off switch shared by all three stores
#[derive(Debug)]
struct Availability {
    store: &'static str,
    up: AtomicBool,
}

impl Availability {
    fn new(store: &'static str) -> Availability {
        Availability {
            store,
            up: AtomicBool::new(true),
        }
    }
    fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst)
    }
    fn check(&self) -> Result<()> {
        ensure!(
            self.up.load(Ordering::SeqCst),
            UnavailableSnafu { store: self.store }
        );
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Records                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct RecordsInner {
    users: HashMap<UserId, User>,
    by_name: HashMap<Username, UserId>,
    posts: HashMap<PostId, Post>,
    messages: Vec<DirectMessage>,
    follow_fallbacks: Vec<(Username, Username, DateTime<Utc>)>,
}

/// An in-memory record store
#[derive(Debug)]
pub struct Records {
    inner: Mutex<RecordsInner>,
    availability: Availability,
}

impl Default for Records {
    fn default() -> Self {
        Records {
            inner: Mutex::new(RecordsInner::default()),
            availability: Availability::new("record store"),
        }
    }
}

impl Records {
    pub fn set_available(&self, up: bool) {
        self.availability.set(up)
    }
    /// The follow records written in lieu of graph edges
    pub fn follow_fallbacks(&self) -> Vec<(Username, Username)> {
        lock(&self.inner)
            .follow_fallbacks
            .iter()
            .map(|(a, b, _)| (a.clone(), b.clone()))
            .collect()
    }
    fn check(&self) -> StdResult<(), storage::Error> {
        self.availability.check().map_err(storage::Error::new)
    }
}

#[async_trait]
impl storage::Backend for Records {
    async fn add_user(&self, user: &User) -> StdResult<bool, storage::Error> {
        self.check()?;
        let mut inner = lock(&self.inner);
        if inner.by_name.contains_key(user.username()) {
            return Ok(false);
        }
        inner.by_name.insert(user.username().clone(), user.id());
        inner.users.insert(user.id(), user.clone());
        Ok(true)
    }
    async fn user_for_name(&self, name: &Username) -> StdResult<Option<User>, storage::Error> {
        self.check()?;
        let inner = lock(&self.inner);
        Ok(inner
            .by_name
            .get(name)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }
    async fn user_for_id(&self, id: &UserId) -> StdResult<Option<User>, storage::Error> {
        self.check()?;
        Ok(lock(&self.inner).users.get(id).cloned())
    }
    async fn sample_users(&self, limit: usize) -> StdResult<Vec<User>, storage::Error> {
        self.check()?;
        Ok(lock(&self.inner)
            .users
            .values()
            .take(limit)
            .cloned()
            .collect())
    }
    async fn add_post(&self, post: &Post) -> StdResult<(), storage::Error> {
        self.check()?;
        lock(&self.inner).posts.insert(post.id(), post.clone());
        Ok(())
    }
    async fn post_for_id(&self, id: &PostId) -> StdResult<Option<Post>, storage::Error> {
        self.check()?;
        Ok(lock(&self.inner).posts.get(id).cloned())
    }
    async fn posts_by_authors(
        &self,
        authors: &[Username],
        limit: usize,
    ) -> StdResult<Vec<Post>, storage::Error> {
        self.check()?;
        let authors = authors.iter().collect::<HashSet<&Username>>();
        Ok(lock(&self.inner)
            .posts
            .values()
            .filter(|post| authors.contains(post.author()))
            .sorted_by(|lhs, rhs| newest_first(lhs, rhs))
            .take(limit)
            .cloned()
            .collect())
    }
    async fn add_follow_fallback(
        &self,
        follower: &Username,
        followee: &Username,
        at: &DateTime<Utc>,
    ) -> StdResult<(), storage::Error> {
        self.check()?;
        lock(&self.inner)
            .follow_fallbacks
            .push((follower.clone(), followee.clone(), *at));
        Ok(())
    }
    async fn add_message(&self, message: &DirectMessage) -> StdResult<(), storage::Error> {
        self.check()?;
        lock(&self.inner).messages.push(message.clone());
        Ok(())
    }
    async fn conversation(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> StdResult<Vec<DirectMessage>, storage::Error> {
        self.check()?;
        let mut messages = lock(&self.inner)
            .messages
            .iter()
            .filter(|msg| msg.conversation() == key)
            .sorted_by(|lhs, rhs| rhs.created().cmp(lhs.created()))
            .take(limit)
            .cloned()
            .collect::<Vec<DirectMessage>>();
        messages.reverse();
        Ok(messages)
    }
    async fn mark_read(
        &self,
        key: &ConversationKey,
        receiver: &Username,
        at: &DateTime<Utc>,
    ) -> StdResult<usize, storage::Error> {
        self.check()?;
        Ok(lock(&self.inner)
            .messages
            .iter_mut()
            .filter(|msg| msg.conversation() == key)
            .map(|msg| msg.mark_read_by(receiver, at))
            .filter(|updated| *updated)
            .count())
    }
    async fn conversations_for(
        &self,
        username: &Username,
    ) -> StdResult<Vec<ConversationSummary>, storage::Error> {
        self.check()?;
        let inner = lock(&self.inner);
        let mut summaries = inner
            .messages
            .iter()
            .filter_map(|msg| {
                msg.conversation()
                    .other(username)
                    .map(|other| (other, msg))
            })
            .into_group_map()
            .into_iter()
            .filter_map(|(other, msgs)| {
                let last = msgs.iter().max_by_key(|msg| *msg.created())?;
                Some(ConversationSummary {
                    username: other,
                    last_message: Some(last.content().to_owned()),
                    last_message_at: Some(*last.created()),
                    unread_count: msgs
                        .iter()
                        .filter(|msg| msg.receiver() == username && !msg.read())
                        .count(),
                })
            })
            .collect::<Vec<ConversationSummary>>();
        summaries.sort_by(|lhs, rhs| rhs.last_message_at.cmp(&lhs.last_message_at));
        Ok(summaries)
    }
    async fn ping(&self) -> StdResult<(), storage::Error> {
        self.check()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Graph                                                //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct GraphInner {
    users: HashMap<Username, UserId>,
    follows: HashSet<(Username, Username)>,
    posted: HashMap<Username, HashSet<PostId>>,
    likes: HashSet<(Username, PostId)>,
    messaged: HashSet<(Username, Username)>,
}

/// An in-memory social graph
#[derive(Debug)]
pub struct Graph {
    inner: Mutex<GraphInner>,
    availability: Availability,
}

impl Default for Graph {
    fn default() -> Self {
        Graph {
            inner: Mutex::new(GraphInner::default()),
            availability: Availability::new("graph"),
        }
    }
}

impl Graph {
    pub fn set_available(&self, up: bool) {
        self.availability.set(up)
    }
    pub fn has_like(&self, username: &Username, post: &PostId) -> bool {
        lock(&self.inner)
            .likes
            .contains(&(username.clone(), *post))
    }
    pub fn has_messaged(&self, sender: &Username, receiver: &Username) -> bool {
        lock(&self.inner)
            .messaged
            .contains(&(sender.clone(), receiver.clone()))
    }
    fn check(&self) -> StdResult<(), graph::Error> {
        self.availability.check().map_err(graph::Error::new)
    }
}

#[async_trait]
impl graph::Backend for Graph {
    async fn upsert_user(&self, user: &User) -> StdResult<(), graph::Error> {
        self.check()?;
        lock(&self.inner)
            .users
            .insert(user.username().clone(), user.id());
        Ok(())
    }
    async fn upsert_post(&self, post: &Post) -> StdResult<(), graph::Error> {
        self.check()?;
        lock(&self.inner)
            .posted
            .entry(post.author().clone())
            .or_default()
            .insert(post.id());
        Ok(())
    }
    async fn add_follow(
        &self,
        follower: &Username,
        followee: &Username,
    ) -> StdResult<bool, graph::Error> {
        self.check()?;
        Ok(lock(&self.inner)
            .follows
            .insert((follower.clone(), followee.clone())))
    }
    async fn remove_follow(
        &self,
        follower: &Username,
        followee: &Username,
    ) -> StdResult<bool, graph::Error> {
        self.check()?;
        Ok(lock(&self.inner)
            .follows
            .remove(&(follower.clone(), followee.clone())))
    }
    async fn add_like(&self, username: &Username, post: &PostId) -> StdResult<(), graph::Error> {
        self.check()?;
        lock(&self.inner).likes.insert((username.clone(), *post));
        Ok(())
    }
    async fn remove_like(&self, username: &Username, post: &PostId) -> StdResult<(), graph::Error> {
        self.check()?;
        lock(&self.inner).likes.remove(&(username.clone(), *post));
        Ok(())
    }
    async fn add_message(
        &self,
        sender: &Username,
        receiver: &Username,
    ) -> StdResult<(), graph::Error> {
        self.check()?;
        lock(&self.inner)
            .messaged
            .insert((sender.clone(), receiver.clone()));
        Ok(())
    }
    async fn following(&self, username: &Username) -> StdResult<Vec<Username>, graph::Error> {
        self.check()?;
        Ok(lock(&self.inner)
            .follows
            .iter()
            .filter(|(follower, _)| follower == username)
            .map(|(_, followee)| followee.clone())
            .sorted()
            .collect())
    }
    async fn followers_count(&self, username: &Username) -> StdResult<usize, graph::Error> {
        self.check()?;
        Ok(lock(&self.inner)
            .follows
            .iter()
            .filter(|(_, followee)| followee == username)
            .count())
    }
    async fn posts_count(&self, username: &Username) -> StdResult<usize, graph::Error> {
        self.check()?;
        Ok(lock(&self.inner)
            .posted
            .get(username)
            .map(HashSet::len)
            .unwrap_or(0))
    }
    async fn ping(&self) -> StdResult<(), graph::Error> {
        self.check()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Fabric                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
enum Value {
    Text(String),
    Counter(i64),
    Set(BTreeSet<String>),
    Ranking(HashMap<String, f64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires.map(|t| t > now).unwrap_or(true)
    }
}

/// An in-memory cache & counter fabric
///
/// Multi-key operations enforce the same single-slot rule a Redis cluster would.
#[derive(Debug)]
pub struct Fabric {
    inner: Mutex<HashMap<String, Entry>>,
    availability: Availability,
    ranking_up: AtomicBool,
}

impl Default for Fabric {
    fn default() -> Self {
        Fabric {
            inner: Mutex::new(HashMap::new()),
            availability: Availability::new("fabric"),
            ranking_up: AtomicBool::new(true),
        }
    }
}

impl Fabric {
    pub fn set_available(&self, up: bool) {
        self.availability.set(up)
    }
    /// Fail only the trending half of like mutations, as a cluster would if the node owning the
    /// ranking were unreachable
    pub fn set_ranking_available(&self, up: bool) {
        self.ranking_up.store(up, Ordering::SeqCst)
    }
    /// Store a plain value at `key`, whatever was there before
    pub fn clobber(&self, key: &Key, value: &str) {
        lock(&self.inner).insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_owned()),
                expires: None,
            },
        );
    }
    /// True if `key` is present & unexpired
    pub fn contains(&self, key: &Key) -> bool {
        let now = Instant::now();
        lock(&self.inner)
            .get(key.as_ref())
            .map(|entry| entry.live(now))
            .unwrap_or(false)
    }
    fn check(&self) -> fabric::Result<()> {
        self.availability.check().map_err(fabric::Error::unavailable)
    }
    // Drop `key` if it's expired, then hand back whatever's left
    fn live_entry<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if map.get(key).is_some_and(|entry| !entry.live(now)) {
            map.remove(key);
        }
        map.get_mut(key)
    }
    fn wrong_type(key: &str) -> fabric::Error {
        fabric::Error::unavailable(WrongTypeSnafu { key: key.to_owned() }.build())
    }
}

#[async_trait]
impl fabric::Backend for Fabric {
    async fn get(&self, key: &Key) -> fabric::Result<Option<String>> {
        self.check()?;
        let mut map = lock(&self.inner);
        match Fabric::live_entry(&mut map, key, Instant::now()).map(|entry| &entry.value) {
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(_) => Err(Fabric::wrong_type(key)),
            None => Ok(None),
        }
    }
    async fn set_ex(&self, key: &Key, value: &str, ttl: Duration) -> fabric::Result<()> {
        self.check()?;
        lock(&self.inner).insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_owned()),
                expires: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }
    async fn delete(&self, keys: &[Key]) -> fabric::Result<usize> {
        self.check()?;
        if let Some((first, second)) = keys.iter().tuple_windows().find(|(a, b)| a.slot() != b.slot())
        {
            return Err(fabric::Error::cross_partition(first, second));
        }
        let now = Instant::now();
        let mut map = lock(&self.inner);
        Ok(keys
            .iter()
            .filter_map(|key| map.remove(key.as_ref()))
            .filter(|entry| entry.live(now))
            .count())
    }
    async fn delete_matching(&self, pattern: &KeyPattern) -> fabric::Result<usize> {
        self.check()?;
        let now = Instant::now();
        let mut map = lock(&self.inner);
        let doomed = map
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect::<Vec<String>>();
        Ok(doomed
            .iter()
            .filter_map(|key| map.remove(key))
            .filter(|entry| entry.live(now))
            .count())
    }
    async fn counter(&self, key: &Key) -> fabric::Result<i64> {
        self.check()?;
        let mut map = lock(&self.inner);
        match Fabric::live_entry(&mut map, key, Instant::now()).map(|entry| &entry.value) {
            Some(Value::Counter(n)) => Ok(*n),
            Some(_) => Err(Fabric::wrong_type(key)),
            None => Ok(0),
        }
    }
    async fn is_member(&self, key: &Key, member: &str) -> fabric::Result<bool> {
        self.check()?;
        let mut map = lock(&self.inner);
        match Fabric::live_entry(&mut map, key, Instant::now()).map(|entry| &entry.value) {
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(Fabric::wrong_type(key)),
            None => Ok(false),
        }
    }
    async fn members(&self, key: &Key) -> fabric::Result<Vec<String>> {
        self.check()?;
        let mut map = lock(&self.inner);
        match Fabric::live_entry(&mut map, key, Instant::now()).map(|entry| &entry.value) {
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(Fabric::wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }
    async fn score(&self, key: &Key, member: &str) -> fabric::Result<Option<f64>> {
        self.check()?;
        let mut map = lock(&self.inner);
        match Fabric::live_entry(&mut map, key, Instant::now()).map(|entry| &entry.value) {
            Some(Value::Ranking(ranking)) => Ok(ranking.get(member).copied()),
            Some(_) => Err(Fabric::wrong_type(key)),
            None => Ok(None),
        }
    }
    async fn top_scores(&self, key: &Key, limit: usize) -> fabric::Result<Vec<(String, f64)>> {
        self.check()?;
        let mut map = lock(&self.inner);
        match Fabric::live_entry(&mut map, key, Instant::now()).map(|entry| &entry.value) {
            // Redis breaks ties in reverse lexicographic order of member (ZREVRANGE)
            Some(Value::Ranking(ranking)) => Ok(ranking
                .iter()
                .sorted_by(|(lm, ls), (rm, rs)| rs.total_cmp(ls).then_with(|| rm.cmp(lm)))
                .take(limit)
                .map(|(m, s)| (m.clone(), *s))
                .collect()),
            Some(_) => Err(Fabric::wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }
    async fn apply_like(&self, mutation: &LikeMutation) -> fabric::Result<LikeOutcome> {
        self.check()?;
        let (count_key, users_key, trending_key) = (
            mutation.count_key(),
            mutation.users_key(),
            mutation.trending_key(),
        );
        let member = mutation.username().to_string();
        let now = Instant::now();
        // One lock for the whole mutation: that's our atomicity
        let mut map = lock(&self.inner);

        // Type-check all three entries before touching any of them
        let is_member = match Fabric::live_entry(&mut map, &users_key, now).map(|e| &e.value) {
            Some(Value::Set(set)) => set.contains(&member),
            Some(_) => return Err(Fabric::wrong_type(&users_key)),
            None => false,
        };
        let current = match Fabric::live_entry(&mut map, &count_key, now).map(|e| &e.value) {
            Some(Value::Counter(n)) => *n,
            Some(_) => return Err(Fabric::wrong_type(&count_key)),
            None => 0,
        };
        if let Some(entry) = Fabric::live_entry(&mut map, &trending_key, now) {
            if !matches!(entry.value, Value::Ranking(_)) {
                return Err(Fabric::wrong_type(&trending_key));
            }
        }

        let apply = match mutation.direction() {
            fabric::LikeDirection::Like => !is_member,
            fabric::LikeDirection::Unlike => is_member,
        };
        if !apply {
            return Ok(LikeOutcome {
                count: current.max(0),
                applied: false,
                ranked: false,
            });
        }

        let count = (current + mutation.delta()).max(0);
        map.insert(
            count_key.to_string(),
            Entry {
                value: Value::Counter(count),
                expires: None,
            },
        );
        let users = map.entry(users_key.to_string()).or_insert(Entry {
            value: Value::Set(BTreeSet::new()),
            expires: None,
        });
        if let Value::Set(set) = &mut users.value {
            if mutation.delta() > 0 {
                set.insert(member);
            } else {
                set.remove(&member);
            }
        }

        // The ranking lives on another slot; it can be down while the post's keys are not
        if !self.ranking_up.load(Ordering::SeqCst) {
            return Ok(LikeOutcome {
                count,
                applied: true,
                ranked: false,
            });
        }
        let trending = map.entry(trending_key.to_string()).or_insert(Entry {
            value: Value::Ranking(HashMap::new()),
            expires: None,
        });
        if let Value::Ranking(ranking) = &mut trending.value {
            let post = mutation.post().to_string();
            let score = ranking.get(&post).copied().unwrap_or(0.0) + mutation.delta() as f64;
            if score > 0.0 {
                ranking.insert(post, score);
            } else {
                ranking.remove(&post);
            }
        }

        Ok(LikeOutcome {
            count,
            applied: true,
            ranked: true,
        })
    }
    async fn ping(&self) -> fabric::Result<()> {
        self.check()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Stores                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One of each in-memory store
///
/// Keep the concrete handles around to flip availability or peek at state; hand the trait objects
/// to the engines.
#[derive(Clone, Debug, Default)]
pub struct Stores {
    pub records: std::sync::Arc<Records>,
    pub graph: std::sync::Arc<Graph>,
    pub fabric: std::sync::Arc<Fabric>,
}

impl Stores {
    pub fn new() -> Stores {
        Stores::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use fabric::Backend as _;

    use crate::entities::FeedMode;

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let fabric = Fabric::default();
        let alice = Username::new("alice").unwrap();
        let key = Key::feed(&alice, FeedMode::All, 10);
        fabric
            .set_ex(&key, "[]", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(fabric.get(&key).await.unwrap(), Some("[]".to_owned()));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(fabric.get(&key).await.unwrap(), None);
        assert!(!fabric.contains(&key));
    }

    #[tokio::test]
    async fn test_cross_slot_delete() {
        let fabric = Fabric::default();
        let alice = Username::new("alice").unwrap();
        let bob = Username::new("bob").unwrap();
        assert!(
            fabric
                .delete(&[Key::suggestions(&alice), Key::feed(&alice, FeedMode::All, 1)])
                .await
                .is_ok()
        );
        assert!(matches!(
            fabric
                .delete(&[Key::suggestions(&alice), Key::suggestions(&bob)])
                .await,
            Err(fabric::Error::CrossPartition { .. })
        ));
    }

    #[tokio::test]
    async fn test_like_wrong_type() {
        let fabric = Fabric::default();
        let alice = Username::new("alice").unwrap();
        let post = PostId::new();
        fabric.clobber(&Key::trending(), "not a ranking");

        // Nothing moves if any one of the three entries is the wrong type
        assert!(
            fabric
                .apply_like(&LikeMutation::like(&post, &alice))
                .await
                .is_err()
        );
        assert_eq!(fabric.counter(&Key::like_count(&post)).await.unwrap(), 0);
        assert!(
            !fabric
                .is_member(&Key::like_users(&post), "alice")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_like_ranking_down() {
        let fabric = Fabric::default();
        let alice = Username::new("alice").unwrap();
        let post = PostId::new();
        fabric.set_ranking_available(false);

        let outcome = fabric
            .apply_like(&LikeMutation::like(&post, &alice))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LikeOutcome {
                count: 1,
                applied: true,
                ranked: false
            }
        );
        assert!(
            fabric
                .score(&Key::trending(), &post.to_string())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_conversations_for() {
        use storage::Backend as _;

        let records = Records::default();
        let alice = Username::new("alice").unwrap();
        let bob = Username::new("bob").unwrap();
        let carol = Username::new("carol").unwrap();
        for msg in [
            DirectMessage::new(&alice, &bob, "hi bob").unwrap(),
            DirectMessage::new(&bob, &alice, "hi alice").unwrap(),
            DirectMessage::new(&carol, &alice, "hey").unwrap(),
            DirectMessage::new(&carol, &alice, "you there?").unwrap(),
        ] {
            records.add_message(&msg).await.unwrap();
        }
        let summaries = records.conversations_for(&alice).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].username, carol);
        assert_eq!(summaries[0].unread_count, 2);
        assert_eq!(summaries[0].last_message.as_deref(), Some("you there?"));
        assert_eq!(summaries[1].username, bob);
        assert_eq!(summaries[1].unread_count, 1);
    }
}
