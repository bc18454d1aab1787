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

//! # keys
//!
//! The cache & counter fabric's key namespace.
//!
//! Redis Cluster assigns each key to one of 16384 hash slots, & each slot to one primary. A
//! command (or `MULTI`/`EXEC` block, or Lua script) touching several keys is only legal when they
//! all land in the same slot. Redis lets the key's author choose *which part* of the key is hashed:
//! if the key contains a `{`, followed later by a `}`, with at least one character in between,
//! only the text between the braces (the "hash tag") is hashed. We exploit that by tagging every
//! key with the entity it describes:
//!
//! | artifact              | key                                  |
//! |-----------------------|--------------------------------------|
//! | feed                  | `{user:<username>}:feed:<mode>:<limit>` |
//! | suggestions           | `{user:<username>}:suggestions`      |
//! | like counter          | `{post:<id>}:likes:count`            |
//! | like set              | `{post:<id>}:likes:users`            |
//! | conversation snippet  | `{conv:<a>::<b>}:messages`           |
//! | trending ranking      | `trending:posts`                     |
//!
//! so that, e.g., a post's counter & like-set always live together & can be mutated in one atomic
//! step, and every feed a user has cached lives on a single node (where one `SCAN` can find them
//! all). The trending ranking is global & untagged.

use std::{fmt::Display, ops::Deref};

use redis::cluster_routing::get_slot;

use crate::entities::{ConversationKey, FeedMode, PostId, Username};

/// The number of hash slots in a Redis cluster
pub const HASH_SLOTS: u16 = 16384;

/// Return the hash tag in `key`, if there is one
///
/// This is for display only; slot assignment is left to [hash_slot].
pub fn hash_tag(key: &str) -> Option<&str> {
    let open = key.find('{')?;
    let rest = &key[open + 1..];
    let close = rest.find('}')?;
    (close > 0).then(|| &rest[..close])
}

/// Return the hash slot to which Redis Cluster would assign `key`
pub fn hash_slot(key: &str) -> u16 {
    get_slot(key.as_bytes())
}

/// A key in the cache & counter fabric
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key(String);

impl Key {
    /// The cached feed for `user` in `mode`, truncated to `limit`
    pub fn feed(user: &Username, mode: FeedMode, limit: usize) -> Key {
        Key(format!("{{user:{}}}:feed:{}:{}", user, mode, limit))
    }
    /// Cached "who to follow" suggestions for `user`
    pub fn suggestions(user: &Username) -> Key {
        Key(format!("{{user:{}}}:suggestions", user))
    }
    /// The like counter for `post`
    pub fn like_count(post: &PostId) -> Key {
        Key(format!("{{post:{}}}:likes:count", post))
    }
    /// The set of users who've liked `post`
    pub fn like_users(post: &PostId) -> Key {
        Key(format!("{{post:{}}}:likes:users", post))
    }
    /// The global trending ranking
    pub fn trending() -> Key {
        Key("trending:posts".to_owned())
    }
    /// The cached snippet of the conversation identified by `conv`
    pub fn conversation(conv: &ConversationKey) -> Key {
        Key(format!("{{conv:{}}}:messages", conv))
    }
    pub fn tag(&self) -> Option<&str> {
        hash_tag(&self.0)
    }
    pub fn slot(&self) -> u16 {
        hash_slot(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Key {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A glob-style pattern over fabric keys, as understood by `SCAN ... MATCH`
///
/// Patterns are always tagged, so every key a pattern can match lives in one slot.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct KeyPattern(String);

impl KeyPattern {
    /// Every feed cached for `user`, across all modes & limits
    pub fn feeds(user: &Username) -> KeyPattern {
        KeyPattern(format!("{{user:{}}}:feed:*", user))
    }
    pub fn tag(&self) -> Option<&str> {
        hash_tag(&self.0)
    }
    pub fn slot(&self) -> u16 {
        hash_slot(&self.0)
    }
    /// Test `key` against this pattern; only `*` is treated as a wildcard, everything else must
    /// match literally.
    pub fn matches(&self, key: &str) -> bool {
        let mut parts = self.0.split('*');
        let first = parts.next().unwrap_or("");
        let Some(mut rest) = key.strip_prefix(first) else {
            return false;
        };
        let mut parts = parts.peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                // The final literal must close the key
                return rest.len() >= part.len() && rest.ends_with(part);
            }
            match rest.find(part) {
                Some(at) => rest = &rest[at + part.len()..],
                None => return false,
            }
        }
        // No wildcard at all
        rest.is_empty()
    }
}

impl Deref for KeyPattern {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
