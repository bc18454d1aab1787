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

//! # conversation
//!
//! Direct messages between two users.
//!
//! A conversation is named by its [ConversationKey]: the participants' usernames, sorted & joined.
//! Whichever participant is asking, the key (and hence the record-store partition and the cache
//! key) comes out the same.
//!
//! The most recent messages of each conversation are cached. The cache key carries no limit, so
//! the cached value remembers the limit it was read with & only serves requests for that many
//! messages or fewer. Sending a message drops the cached value. Reading a conversation may also
//! mark the reader's messages as read; the fetched messages are patched to match rather than
//! re-read, and the patched list replaces whatever was cached.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::{self, ConversationKey, ConversationSummary, DirectMessage, Username},
    fabric::Fabric,
    graph,
    keys::Key,
    metrics::Instruments,
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid message: {source}"))]
    Message {
        source: entities::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read from the record store: {source}"))]
    Records {
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to mark {username}'s messages read: {source}"))]
    MarkRead {
        username: Username,
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No such user: {username}"))]
    UnknownUser {
        username: Username,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to store the message; nothing was written: {source}"))]
    Write {
        source: storage::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Deserialize, Serialize)]
struct Cached {
    limit: usize,
    messages: Vec<DirectMessage>,
}

impl Cached {
    // The last `limit` messages, if we have that many (or the conversation has no more)
    fn serve(mut self, limit: usize) -> Option<Vec<DirectMessage>> {
        if limit > self.limit {
            return None;
        }
        let skip = self.messages.len().saturating_sub(limit);
        Some(self.messages.split_off(skip))
    }
}

/// The direct-message engine
pub struct Conversations {
    records: Arc<dyn storage::Backend + Send + Sync>,
    graph: Arc<dyn graph::Backend + Send + Sync>,
    fabric: Arc<Fabric>,
    instruments: Arc<Instruments>,
}

impl Conversations {
    pub fn new(
        records: Arc<dyn storage::Backend + Send + Sync>,
        graph: Arc<dyn graph::Backend + Send + Sync>,
        fabric: Arc<Fabric>,
        instruments: Arc<Instruments>,
    ) -> Conversations {
        Conversations {
            records,
            graph,
            fabric,
            instruments,
        }
    }

    async fn check_user(&self, username: &Username) -> Result<()> {
        self.records
            .user_for_name(username)
            .await
            .context(RecordsSnafu)?
            .context(UnknownUserSnafu {
                username: username.clone(),
            })?;
        Ok(())
    }

    /// Send a message from `sender` to `receiver`
    #[tracing::instrument(skip(self, content))]
    pub async fn send(
        &self,
        sender: &Username,
        receiver: &Username,
        content: &str,
    ) -> Result<DirectMessage> {
        self.check_user(sender).await?;
        self.check_user(receiver).await?;
        let message = DirectMessage::new(sender, receiver, content).context(MessageSnafu)?;
        self.records
            .add_message(&message)
            .await
            .context(WriteSnafu)?;
        if let Err(err) = self.graph.add_message(sender, receiver).await {
            warn!(
                "Failed to mirror the message from {} to {} to the graph: {}",
                sender, receiver, err
            );
            counter_add!(self.instruments, "graph.degraded", 1, &[]);
        }
        self.fabric
            .invalidate(&Key::conversation(message.conversation()))
            .await;
        Ok(message)
    }

    /// The `limit` most recent messages between `username` & `other`, oldest first
    ///
    /// If `mark_read` is set, every unread message in the conversation addressed to `username` is
    /// marked read, and the returned messages reflect that.
    #[tracing::instrument(skip(self))]
    pub async fn get_conversation(
        &self,
        username: &Username,
        other: &Username,
        limit: usize,
        mark_read: bool,
    ) -> Result<Vec<DirectMessage>> {
        self.check_user(username).await?;
        self.check_user(other).await?;
        let conv = ConversationKey::new(username, other).context(MessageSnafu)?;
        let key = Key::conversation(&conv);

        let (mut messages, mut dirty) = match self
            .fabric
            .get_json::<Cached>(&key)
            .await
            .and_then(|cached| cached.serve(limit))
        {
            Some(messages) => {
                debug!("Conversation cache hit: {}", key);
                (messages, false)
            }
            None => {
                let messages = self
                    .records
                    .conversation(&conv, limit)
                    .await
                    .context(RecordsSnafu)?;
                (messages, true)
            }
        };

        // The window may not show every unread message, so the store is always asked
        if mark_read {
            let now = Utc::now();
            let marked = self
                .records
                .mark_read(&conv, username, &now)
                .await
                .context(MarkReadSnafu {
                    username: username.clone(),
                })?;
            let patched = messages
                .iter_mut()
                .map(|msg| msg.mark_read_by(username, &now))
                .filter(|changed| *changed)
                .count();
            debug!("Marked {} message(s) read; patched {}", marked, patched);
            // Any cached value may hold messages outside this window that just changed
            dirty = dirty || marked > 0 || patched > 0;
        }

        if dirty {
            self.fabric
                .put_json(
                    &key,
                    &Cached {
                        limit,
                        messages: messages.clone(),
                    },
                    self.fabric.ttls().conversation(),
                )
                .await;
        }
        Ok(messages)
    }

    /// Every conversation `username` is part of, most recently active first
    #[tracing::instrument(skip(self))]
    pub async fn list_conversations(&self, username: &Username) -> Result<Vec<ConversationSummary>> {
        self.check_user(username).await?;
        self.records
            .conversations_for(username)
            .await
            .context(RecordsSnafu)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::time::Duration;

    use crate::{
        entities::{User, UserEmail},
        fabric::Ttls,
        memory::Stores,
        storage::Backend as _,
    };

    struct Fixture {
        stores: Stores,
        conversations: Conversations,
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
            let conversations = Conversations::new(
                stores.records.clone(),
                stores.graph.clone(),
                fabric,
                instruments,
            );
            Fixture {
                stores,
                conversations,
            }
        }
        async fn user(&self, name: &str) -> Username {
            let username = Username::new(name).unwrap();
            let user = User::new(
                &username,
                &UserEmail::new(&format!("{}@example.com", name)).unwrap(),
                None,
                None,
            );
            self.stores.records.add_user(&user).await.unwrap();
            username
        }
        async fn send(&self, from: &Username, to: &Username, text: &str) -> DirectMessage {
            let msg = self.conversations.send(from, to, text).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            msg
        }
    }

    fn contents(messages: &[DirectMessage]) -> Vec<&str> {
        messages.iter().map(|msg| msg.content()).collect()
    }

    #[tokio::test]
    async fn test_symmetry() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;
        fx.send(&alice, &bob, "hi bob").await;
        fx.send(&bob, &alice, "hi alice").await;
        fx.send(&alice, &bob, "how are you?").await;

        let ab = fx
            .conversations
            .get_conversation(&alice, &bob, 10, false)
            .await
            .unwrap();
        let ba = fx
            .conversations
            .get_conversation(&bob, &alice, 10, false)
            .await
            .unwrap();
        assert_eq!(contents(&ab), vec!["hi bob", "hi alice", "how are you?"]);
        assert_eq!(ab, ba);
        assert!(fx.stores.graph.has_messaged(&alice, &bob));
        assert!(fx.stores.graph.has_messaged(&bob, &alice));

        // A shorter read is served from the cached value...
        let last = fx
            .conversations
            .get_conversation(&bob, &alice, 1, false)
            .await
            .unwrap();
        assert_eq!(contents(&last), vec!["how are you?"]);

        // ...and a new message drops it
        let conv = ConversationKey::new(&alice, &bob).unwrap();
        assert!(fx.stores.fabric.contains(&Key::conversation(&conv)));
        fx.send(&bob, &alice, "fine").await;
        assert!(!fx.stores.fabric.contains(&Key::conversation(&conv)));
        let ab = fx
            .conversations
            .get_conversation(&alice, &bob, 2, false)
            .await
            .unwrap();
        assert_eq!(contents(&ab), vec!["how are you?", "fine"]);
    }

    #[tokio::test]
    async fn test_mark_read() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;
        fx.send(&alice, &bob, "one").await;
        fx.send(&alice, &bob, "two").await;
        fx.send(&bob, &alice, "three").await;

        // Prime the cache without marking anything
        let msgs = fx
            .conversations
            .get_conversation(&bob, &alice, 10, false)
            .await
            .unwrap();
        assert!(msgs.iter().all(|msg| !msg.read()));

        let msgs = fx
            .conversations
            .get_conversation(&bob, &alice, 10, true)
            .await
            .unwrap();
        // bob's incoming messages are now read; his outgoing message is not
        assert_eq!(
            msgs.iter()
                .map(|msg| (msg.content(), msg.read()))
                .collect::<Vec<(&str, bool)>>(),
            vec![("one", true), ("two", true), ("three", false)]
        );
        assert!(msgs[0].read_at().is_some());

        // The record store agrees, and so does the cache
        let conv = ConversationKey::new(&alice, &bob).unwrap();
        let stored = fx.stores.records.conversation(&conv, 10).await.unwrap();
        assert_eq!(stored, msgs);
        let cached = fx
            .conversations
            .get_conversation(&alice, &bob, 10, false)
            .await
            .unwrap();
        assert_eq!(cached, msgs);

        let inbox = fx.conversations.list_conversations(&bob).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].username, alice);
        assert_eq!(inbox[0].unread_count, 0);
        assert_eq!(inbox[0].last_message.as_deref(), Some("three"));
        let inbox = fx.conversations.list_conversations(&alice).await.unwrap();
        assert_eq!(inbox[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_mark_read_beyond_window() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;
        fx.send(&bob, &alice, "unread for alice").await;
        fx.send(&alice, &bob, "reply").await;

        // Prime the cache with the whole conversation
        fx.conversations
            .get_conversation(&alice, &bob, 10, false)
            .await
            .unwrap();

        // The newest message is alice's own, yet the older one to her is marked all the same
        let msgs = fx
            .conversations
            .get_conversation(&alice, &bob, 1, true)
            .await
            .unwrap();
        assert_eq!(contents(&msgs), vec!["reply"]);

        let conv = ConversationKey::new(&alice, &bob).unwrap();
        let stored = fx.stores.records.conversation(&conv, 10).await.unwrap();
        assert_eq!(
            stored
                .iter()
                .map(|msg| (msg.content(), msg.read()))
                .collect::<Vec<(&str, bool)>>(),
            vec![("unread for alice", true), ("reply", false)]
        );
        let inbox = fx.conversations.list_conversations(&alice).await.unwrap();
        assert_eq!(inbox[0].unread_count, 0);

        // Nor does a stale cached copy of the older message survive
        let msgs = fx
            .conversations
            .get_conversation(&bob, &alice, 10, false)
            .await
            .unwrap();
        assert_eq!(msgs, stored);
    }

    #[tokio::test]
    async fn test_failures() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;
        let nobody = Username::new("nobody").unwrap();

        assert!(matches!(
            fx.conversations.send(&alice, &nobody, "hello?").await,
            Err(Error::UnknownUser { .. })
        ));
        assert!(matches!(
            fx.conversations.send(&alice, &alice, "note to self").await,
            Err(Error::Message { .. })
        ));

        // The graph mirror & the cache are best-effort
        fx.stores.graph.set_available(false);
        fx.stores.fabric.set_available(false);
        fx.send(&alice, &bob, "still works").await;
        let msgs = fx
            .conversations
            .get_conversation(&bob, &alice, 10, true)
            .await
            .unwrap();
        assert_eq!(contents(&msgs), vec!["still works"]);
        assert!(msgs[0].read());

        // The record store is not
        fx.stores.records.set_available(false);
        assert!(fx.conversations.send(&alice, &bob, "lost").await.is_err());
    }
}
