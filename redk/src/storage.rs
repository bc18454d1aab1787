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

//! # storage
//!
//! The record store: the source of truth for users, posts & direct messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    ConversationKey, ConversationSummary, DirectMessage, Post, PostId, User, UserId, Username,
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

#[async_trait]
pub trait Backend {
    /// Add a new user; return false (and write nothing) if the username is already taken
    async fn add_user(&self, user: &User) -> Result<bool, Error>;
    /// Retrieve a [User] given a username; `None` means there is no user by that name
    async fn user_for_name(&self, name: &Username) -> Result<Option<User>, Error>;
    /// Retrieve a [User] by id
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>, Error>;
    /// Up to `limit` users, in no particular order
    async fn sample_users(&self, limit: usize) -> Result<Vec<User>, Error>;
    /// Add a new post
    async fn add_post(&self, post: &Post) -> Result<(), Error>;
    /// Retrieve a post by id
    async fn post_for_id(&self, id: &PostId) -> Result<Option<Post>, Error>;
    /// The `limit` most recent posts authored by any of `authors`, newest first
    async fn posts_by_authors(&self, authors: &[Username], limit: usize)
    -> Result<Vec<Post>, Error>;
    /// Record that `follower` follows `followee`, for later reconciliation into the graph
    ///
    /// This is only used when the graph write fails.
    async fn add_follow_fallback(
        &self,
        follower: &Username,
        followee: &Username,
        at: &DateTime<Utc>,
    ) -> Result<(), Error>;
    /// Add a direct message
    async fn add_message(&self, message: &DirectMessage) -> Result<(), Error>;
    /// The `limit` most recent messages in a conversation, oldest first
    async fn conversation(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<DirectMessage>, Error>;
    /// Mark every unread message in the conversation addressed to `receiver` as read at `at`;
    /// return the number of messages updated
    async fn mark_read(
        &self,
        key: &ConversationKey,
        receiver: &Username,
        at: &DateTime<Utc>,
    ) -> Result<usize, Error>;
    /// Summarize every conversation in which `username` participates, most recent first
    async fn conversations_for(
        &self,
        username: &Username,
    ) -> Result<Vec<ConversationSummary>, Error>;
    /// Round-trip to the store
    async fn ping(&self) -> Result<(), Error>;
}
