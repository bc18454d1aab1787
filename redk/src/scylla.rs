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

//! # scylla
//!
//! A ScyllaDB implementation of both [storage::Backend] and [graph::Backend].
//!
//! One [Session] serves as both the record store & the graph. Records are modelled the usual way
//! for a wide-column store: one table per access path, written together. The graph is a set of
//! edge tables, each partitioned by the node the edge leaves from (with a reverse table for
//! FOLLOWS, since we need to count followers).
//!
//! [storage::Backend]: crate::storage::Backend
//! [graph::Backend]: crate::graph::Backend

use std::{collections::HashSet, num::TryFromIntError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enum_map::{Enum, EnumMap};
use futures::{StreamExt, TryStreamExt, stream};
use itertools::Itertools;
use scylla::{
    client::{session::Session as ScyllaSession, session_builder::SessionBuilder},
    errors::{ExecutionError, NewSessionError, PrepareError, UseKeyspaceError},
    response::query_result::{FirstRowError, IntoRowsResultError, MaybeFirstRowError, RowsError},
    statement::prepared::PreparedStatement,
};
use secrecy::ExposeSecret;
use snafu::{Backtrace, prelude::*};
use tap::Pipe;
use tracing::debug;

use crate::{
    entities::{
        ConversationKey, ConversationSummary, DirectMessage, MessageId, Post, PostId, User,
        UserEmail, UserId, Username, newest_first,
    },
    graph, storage,
    util::Credentials,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "The number of prepared statements isn't consistent; this is a bug & should be reported!"
    ))]
    BadPreparedStatementCount { backtrace: Backtrace },
    #[snafu(display("Failed to set keyspace {keyspace}: {source}"))]
    Keyspace {
        keyspace: String,
        source: UseKeyspaceError,
        backtrace: Backtrace,
    },
    #[snafu(display("{limit} is too large to be used as a CQL limit: {source}"))]
    LimitOOR {
        limit: usize,
        source: TryFromIntError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create a ScyllaDB session: {source}"))]
    NewSession {
        source: NewSessionError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to prepare statement {stmt}: {source}"))]
    Prepare {
        stmt: String,
        source: PrepareError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to execute {stmt}: {source}"))]
    Schema {
        stmt: String,
        source: ExecutionError,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// The DDL for the redk keyspace; `{keyspace}` & `{replication}` are substituted at install time
const SCHEMA: &[&str] = &[
    "create keyspace if not exists {keyspace} with replication = {replication}",
    "create table if not exists {keyspace}.users (id uuid primary key, username text, email text, display_name text, bio text, created timestamp)",
    "create table if not exists {keyspace}.users_by_name (username text primary key, id uuid)",
    "create table if not exists {keyspace}.posts (id uuid primary key, author_id uuid, author text, content text, tags set<text>, created timestamp)",
    "create table if not exists {keyspace}.posts_by_author (author text, created timestamp, id uuid, author_id uuid, content text, tags set<text>, primary key (author, created, id)) with clustering order by (created desc, id desc)",
    "create table if not exists {keyspace}.direct_messages (conversation text, created timestamp, id uuid, sender text, receiver text, content text, read boolean, read_at timestamp, primary key (conversation, created, id)) with clustering order by (created asc, id asc)",
    "create table if not exists {keyspace}.conversations_by_user (username text, partner text, primary key (username, partner))",
    "create table if not exists {keyspace}.follow_fallbacks (follower text, followee text, created timestamp, primary key (follower, followee))",
    "create table if not exists {keyspace}.graph_users (username text primary key, display_name text, bio text)",
    "create table if not exists {keyspace}.follows (follower text, followee text, primary key (follower, followee))",
    "create table if not exists {keyspace}.followers (followee text, follower text, primary key (followee, follower))",
    "create table if not exists {keyspace}.posted (author text, post uuid, primary key (author, post))",
    "create table if not exists {keyspace}.likes (username text, post uuid, primary key (username, post))",
    "create table if not exists {keyspace}.messaged (sender text, receiver text, primary key (sender, receiver))",
];

/// Tags for the prepared statements; the order must match the statements in [Session::new]
#[derive(Clone, Debug, Enum, Eq, PartialEq)]
enum PreparedStatements {
    InsertUserName,
    InsertUser,
    SelectUserId,
    SelectUser,
    SampleUsers,
    InsertPost,
    InsertPostByAuthor,
    SelectPost,
    PostsByAuthor,
    InsertFollowFallback,
    InsertMessage,
    InsertConversation,
    RecentMessages,
    AllMessages,
    MarkRead,
    SelectPartners,
    Ping,
    UpsertGraphUser,
    InsertPosted,
    InsertFollows,
    InsertFollowers,
    DeleteFollows,
    DeleteFollowers,
    InsertLike,
    DeleteLike,
    InsertMessaged,
    Following,
    FollowersCount,
    PostsCount,
}

const USER_COLUMNS: &str = "id,username,email,display_name,bio,created";
const POST_COLUMNS: &str = "id,author_id,author,content,tags,created";
const MESSAGE_COLUMNS: &str = "id,conversation,sender,receiver,content,created,read,read_at";

type UserRow = (
    UserId,
    Username,
    UserEmail,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

type PostRow = (
    PostId,
    UserId,
    Username,
    String,
    Option<HashSet<String>>,
    DateTime<Utc>,
);

type MessageRow = (
    MessageId,
    ConversationKey,
    Username,
    Username,
    String,
    DateTime<Utc>,
    Option<bool>,
    Option<DateTime<Utc>>,
);

fn user_from_row(row: UserRow) -> User {
    User::from_parts(row.0, row.1, row.2, row.3, row.4, row.5)
}

fn post_from_row(row: PostRow) -> Post {
    Post::from_parts(row.0, row.1, row.2, row.3, row.4.unwrap_or_default(), row.5)
}

fn message_from_row(row: MessageRow) -> DirectMessage {
    DirectMessage::from_parts(
        row.0,
        row.1,
        row.2,
        row.3,
        row.4,
        row.5,
        row.6.unwrap_or(false),
        row.7,
    )
}

fn cql_limit(limit: usize) -> Result<i32> {
    i32::try_from(limit).context(LimitOORSnafu { limit })
}

/// `redk`-specific ScyllaDB Session type
pub struct Session {
    session: ScyllaSession,
    prepared_statements: EnumMap<PreparedStatements, PreparedStatement>,
}

impl Session {
    async fn connect(hosts: &[String], credentials: &Option<Credentials>) -> Result<ScyllaSession> {
        let mut builder = SessionBuilder::new().known_nodes(hosts);
        if let Some(Credentials((user, pass))) = credentials {
            builder = builder.user(user.expose_secret(), pass.expose_secret())
        }
        builder.build().await.context(NewSessionSnafu)
    }

    async fn prepare(scylla: &ScyllaSession, stmt: &str) -> Result<PreparedStatement> {
        scylla.prepare(stmt).await.context(PrepareSnafu {
            stmt: stmt.to_owned(),
        })
    }

    /// Create the keyspace & tables, if they don't already exist
    ///
    /// `replication` is a CQL replication map, e.g.
    /// `{'class': 'NetworkTopologyStrategy', 'replication_factor': 3}`.
    pub async fn install_schema(
        hosts: &[String],
        credentials: &Option<Credentials>,
        keyspace: &str,
        replication: &str,
    ) -> Result<()> {
        let scylla = Self::connect(hosts, credentials).await?;
        for stmt in SCHEMA {
            let stmt = stmt
                .replace("{keyspace}", keyspace)
                .replace("{replication}", replication);
            debug!("{}", stmt);
            scylla
                .query_unpaged(stmt.as_str(), ())
                .await
                .context(SchemaSnafu { stmt: stmt.clone() })?;
        }
        Ok(())
    }

    /// Connect to the cluster at `hosts` & prepare all our statements against `keyspace`
    pub async fn new(
        hosts: &[String],
        credentials: &Option<Credentials>,
        keyspace: &str,
    ) -> Result<Session> {
        let scylla = Self::connect(hosts, credentials).await?;
        scylla
            .use_keyspace(keyspace, false)
            .await
            .context(KeyspaceSnafu {
                keyspace: keyspace.to_owned(),
            })?;

        let prepared_statements = stream::iter(vec![
            "insert into users_by_name (username,id) values (?,?) if not exists".to_owned(),
            format!("insert into users ({}) values (?,?,?,?,?,?)", USER_COLUMNS),
            "select id from users_by_name where username=?".to_owned(),
            format!("select {} from users where id=?", USER_COLUMNS),
            format!("select {} from users limit ?", USER_COLUMNS),
            format!("insert into posts ({}) values (?,?,?,?,?,?)", POST_COLUMNS),
            format!("insert into posts_by_author ({}) values (?,?,?,?,?,?)", POST_COLUMNS),
            format!("select {} from posts where id=?", POST_COLUMNS),
            format!("select {} from posts_by_author where author=? limit ?", POST_COLUMNS),
            "insert into follow_fallbacks (follower,followee,created) values (?,?,?)".to_owned(),
            format!(
                "insert into direct_messages ({}) values (?,?,?,?,?,?,?,?)",
                MESSAGE_COLUMNS
            ),
            "insert into conversations_by_user (username,partner) values (?,?)".to_owned(),
            format!(
                "select {} from direct_messages where conversation=? order by created desc limit ?",
                MESSAGE_COLUMNS
            ),
            format!(
                "select {} from direct_messages where conversation=?",
                MESSAGE_COLUMNS
            ),
            "update direct_messages set read=true,read_at=? where conversation=? and created=? and id=?".to_owned(),
            "select partner from conversations_by_user where username=?".to_owned(),
            "select release_version from system.local".to_owned(), // Ping
            "insert into graph_users (username,display_name,bio) values (?,?,?)".to_owned(),
            "insert into posted (author,post) values (?,?)".to_owned(),
            "insert into follows (follower,followee) values (?,?) if not exists".to_owned(),
            "insert into followers (followee,follower) values (?,?)".to_owned(),
            "delete from follows where follower=? and followee=? if exists".to_owned(),
            "delete from followers where followee=? and follower=?".to_owned(),
            "insert into likes (username,post) values (?,?)".to_owned(),
            "delete from likes where username=? and post=?".to_owned(),
            "insert into messaged (sender,receiver) values (?,?)".to_owned(),
            "select followee from follows where follower=?".to_owned(),
            "select count(*) from followers where followee=?".to_owned(),
            "select count(*) from posted where author=?".to_owned(),
        ])
        .then(|s| {
            let scylla = &scylla;
            async move { Self::prepare(scylla, &s).await }
        })
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<PreparedStatement>>>()?;
        // Fails unless there's exactly one statement per `PreparedStatements` variant
        let prepared_statements: [PreparedStatement; 29] = prepared_statements
            .try_into()
            .map_err(|_| BadPreparedStatementCountSnafu.build())?;

        Ok(Session {
            session: scylla,
            prepared_statements: EnumMap::from_array(prepared_statements),
        })
    }
}

macro_rules! from_scylla_error {
    ($target:ty, $($source:ty),+) => {
        $(
            impl std::convert::From<$source> for $target {
                fn from(value: $source) -> Self {
                    <$target>::new(value)
                }
            }
        )+
    };
}

from_scylla_error!(
    storage::Error,
    Error,
    ExecutionError,
    IntoRowsResultError,
    RowsError,
    scylla::errors::DeserializationError,
    FirstRowError,
    MaybeFirstRowError
);

from_scylla_error!(
    graph::Error,
    Error,
    ExecutionError,
    IntoRowsResultError,
    RowsError,
    scylla::errors::DeserializationError,
    FirstRowError
);

impl Session {
    async fn messages(&self, key: &ConversationKey) -> StdResult<Vec<DirectMessage>, storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::AllMessages],
                (key,),
            )
            .await?
            .into_rows_result()?
            .rows::<MessageRow>()?
            .map_ok(message_from_row)
            .collect::<StdResult<Vec<DirectMessage>, _>>()?
            .pipe(Ok)
    }

    async fn count(
        &self,
        stmt: PreparedStatements,
        username: &Username,
    ) -> StdResult<usize, graph::Error> {
        let (count,) = self
            .session
            .execute_unpaged(&self.prepared_statements[stmt], (username,))
            .await?
            .into_rows_result()?
            .first_row::<(i64,)>()?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl storage::Backend for Session {
    async fn add_user(&self, user: &User) -> StdResult<bool, storage::Error> {
        // The LWT on `users_by_name` is what makes usernames unique; if it doesn't apply, nothing
        // else is written
        let (applied, _, _) = self
            .session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertUserName],
                (user.username(), user.id()),
            )
            .await?
            .into_rows_result()?
            .first_row::<(bool, Option<Username>, Option<UserId>)>()?;
        if !applied {
            return Ok(false);
        }
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertUser],
                (
                    user.id(),
                    user.username(),
                    user.email(),
                    user.display_name(),
                    user.bio(),
                    user.created(),
                ),
            )
            .await?;
        Ok(true)
    }

    async fn user_for_name(&self, name: &Username) -> StdResult<Option<User>, storage::Error> {
        match self
            .session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::SelectUserId],
                (name,),
            )
            .await?
            .into_rows_result()?
            .maybe_first_row::<(UserId,)>()?
        {
            Some((id,)) => self.user_for_id(&id).await,
            None => Ok(None),
        }
    }

    async fn user_for_id(&self, id: &UserId) -> StdResult<Option<User>, storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::SelectUser],
                (id,),
            )
            .await?
            .into_rows_result()?
            .maybe_first_row::<UserRow>()?
            .map(user_from_row)
            .pipe(Ok)
    }

    async fn sample_users(&self, limit: usize) -> StdResult<Vec<User>, storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::SampleUsers],
                (cql_limit(limit)?,),
            )
            .await?
            .into_rows_result()?
            .rows::<UserRow>()?
            .map_ok(user_from_row)
            .collect::<StdResult<Vec<User>, _>>()?
            .pipe(Ok)
    }

    async fn add_post(&self, post: &Post) -> StdResult<(), storage::Error> {
        let values = (
            post.id(),
            post.author_id(),
            post.author(),
            post.content(),
            post.tags(),
            post.created(),
        );
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertPost],
                values,
            )
            .await?;
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertPostByAuthor],
                values,
            )
            .await?;
        Ok(())
    }

    async fn post_for_id(&self, id: &PostId) -> StdResult<Option<Post>, storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::SelectPost],
                (id,),
            )
            .await?
            .into_rows_result()?
            .maybe_first_row::<PostRow>()?
            .map(post_from_row)
            .pipe(Ok)
    }

    async fn posts_by_authors(
        &self,
        authors: &[Username],
        limit: usize,
    ) -> StdResult<Vec<Post>, storage::Error> {
        // One partition per author; each gives us its newest `limit` posts, and the newest `limit`
        // overall are among those.
        let cql_limit = cql_limit(limit)?;
        let per_author = stream::iter(authors.to_vec())
            .map(|author| async move {
                self.session
                    .execute_unpaged(
                        &self.prepared_statements[PreparedStatements::PostsByAuthor],
                        (author, cql_limit),
                    )
                    .await?
                    .into_rows_result()?
                    .rows::<PostRow>()?
                    .map_ok(post_from_row)
                    .collect::<StdResult<Vec<Post>, _>>()
                    .map_err(storage::Error::new)
            })
            .buffer_unordered(graph::TRAVERSAL_CONCURRENCY)
            .try_collect::<Vec<Vec<Post>>>()
            .await?;
        Ok(per_author
            .into_iter()
            .flatten()
            .sorted_by(newest_first)
            .take(limit)
            .collect())
    }

    async fn add_follow_fallback(
        &self,
        follower: &Username,
        followee: &Username,
        at: &DateTime<Utc>,
    ) -> StdResult<(), storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertFollowFallback],
                (follower, followee, at),
            )
            .await?;
        Ok(())
    }

    async fn add_message(&self, message: &DirectMessage) -> StdResult<(), storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertMessage],
                (
                    message.id(),
                    message.conversation(),
                    message.sender(),
                    message.receiver(),
                    message.content(),
                    message.created(),
                    message.read(),
                    message.read_at(),
                ),
            )
            .await?;
        for (username, partner) in [
            (message.sender(), message.receiver()),
            (message.receiver(), message.sender()),
        ] {
            self.session
                .execute_unpaged(
                    &self.prepared_statements[PreparedStatements::InsertConversation],
                    (username, partner),
                )
                .await?;
        }
        Ok(())
    }

    async fn conversation(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> StdResult<Vec<DirectMessage>, storage::Error> {
        let mut messages = self
            .session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::RecentMessages],
                (key, cql_limit(limit)?),
            )
            .await?
            .into_rows_result()?
            .rows::<MessageRow>()?
            .map_ok(message_from_row)
            .collect::<StdResult<Vec<DirectMessage>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn mark_read(
        &self,
        key: &ConversationKey,
        receiver: &Username,
        at: &DateTime<Utc>,
    ) -> StdResult<usize, storage::Error> {
        let unread = self
            .messages(key)
            .await?
            .into_iter()
            .filter(|msg| msg.receiver() == receiver && !msg.read())
            .collect::<Vec<DirectMessage>>();
        for msg in &unread {
            self.session
                .execute_unpaged(
                    &self.prepared_statements[PreparedStatements::MarkRead],
                    (at, key, msg.created(), msg.id()),
                )
                .await?;
        }
        Ok(unread.len())
    }

    async fn conversations_for(
        &self,
        username: &Username,
    ) -> StdResult<Vec<ConversationSummary>, storage::Error> {
        let partners = self
            .session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::SelectPartners],
                (username,),
            )
            .await?
            .into_rows_result()?
            .rows::<(Username,)>()?
            .map_ok(|(partner,)| partner)
            .collect::<StdResult<Vec<Username>, _>>()?;
        let mut summaries = Vec::with_capacity(partners.len());
        for partner in partners {
            let key = ConversationKey::new(username, &partner).map_err(storage::Error::new)?;
            let messages = self.messages(&key).await?;
            let last = messages.iter().max_by_key(|msg| *msg.created());
            summaries.push(ConversationSummary {
                last_message: last.map(|msg| msg.content().to_owned()),
                last_message_at: last.map(|msg| *msg.created()),
                unread_count: messages
                    .iter()
                    .filter(|msg| msg.receiver() == username && !msg.read())
                    .count(),
                username: partner,
            });
        }
        summaries.sort_by(|lhs, rhs| rhs.last_message_at.cmp(&lhs.last_message_at));
        Ok(summaries)
    }

    async fn ping(&self) -> StdResult<(), storage::Error> {
        self.session
            .execute_unpaged(&self.prepared_statements[PreparedStatements::Ping], ())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl graph::Backend for Session {
    async fn upsert_user(&self, user: &User) -> StdResult<(), graph::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::UpsertGraphUser],
                (user.username(), user.display_name(), user.bio()),
            )
            .await?;
        Ok(())
    }

    async fn upsert_post(&self, post: &Post) -> StdResult<(), graph::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertPosted],
                (post.author(), post.id()),
            )
            .await?;
        Ok(())
    }

    async fn add_follow(
        &self,
        follower: &Username,
        followee: &Username,
    ) -> StdResult<bool, graph::Error> {
        let (applied, _, _) = self
            .session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertFollows],
                (follower, followee),
            )
            .await?
            .into_rows_result()?
            .first_row::<(bool, Option<Username>, Option<Username>)>()?;
        // Write the reverse edge regardless; it's idempotent & heals a prior partial write
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertFollowers],
                (followee, follower),
            )
            .await?;
        Ok(applied)
    }

    async fn remove_follow(
        &self,
        follower: &Username,
        followee: &Username,
    ) -> StdResult<bool, graph::Error> {
        let (applied, _, _) = self
            .session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::DeleteFollows],
                (follower, followee),
            )
            .await?
            .into_rows_result()?
            .first_row::<(bool, Option<Username>, Option<Username>)>()?;
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::DeleteFollowers],
                (followee, follower),
            )
            .await?;
        Ok(applied)
    }

    async fn add_like(&self, username: &Username, post: &PostId) -> StdResult<(), graph::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertLike],
                (username, post),
            )
            .await?;
        Ok(())
    }

    async fn remove_like(&self, username: &Username, post: &PostId) -> StdResult<(), graph::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::DeleteLike],
                (username, post),
            )
            .await?;
        Ok(())
    }

    async fn add_message(
        &self,
        sender: &Username,
        receiver: &Username,
    ) -> StdResult<(), graph::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertMessaged],
                (sender, receiver),
            )
            .await?;
        Ok(())
    }

    async fn following(&self, username: &Username) -> StdResult<Vec<Username>, graph::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::Following],
                (username,),
            )
            .await?
            .into_rows_result()?
            .rows::<(Username,)>()?
            .map_ok(|(followee,)| followee)
            .collect::<StdResult<Vec<Username>, _>>()?
            .pipe(Ok)
    }

    async fn followers_count(&self, username: &Username) -> StdResult<usize, graph::Error> {
        self.count(PreparedStatements::FollowersCount, username).await
    }

    async fn posts_count(&self, username: &Username) -> StdResult<usize, graph::Error> {
        self.count(PreparedStatements::PostsCount, username).await
    }

    async fn ping(&self) -> StdResult<(), graph::Error> {
        self.session
            .execute_unpaged(&self.prepared_statements[PreparedStatements::Ping], ())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_schema() {
        assert!(SCHEMA[0].contains("{replication}"));
        assert!(SCHEMA.iter().all(|stmt| stmt.contains("{keyspace}")));
        // Every table the prepared statements touch is created
        for table in [
            "users", "users_by_name", "posts", "posts_by_author", "direct_messages",
            "conversations_by_user", "follow_fallbacks", "graph_users", "follows", "followers",
            "posted", "likes", "messaged",
        ] {
            let needle = format!("{{keyspace}}.{} (", table);
            assert!(
                SCHEMA.iter().any(|stmt| stmt.contains(&needle)),
                "no DDL for {}",
                table
            );
        }
    }

    #[test]
    fn test_limits() {
        assert_eq!(cql_limit(10).unwrap(), 10);
        assert!(cql_limit(usize::MAX).is_err());
    }
}
