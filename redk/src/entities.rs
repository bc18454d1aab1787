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

//! # redk entities
//!
//! The handful of types that every other module in the crate speaks: users, posts, direct
//! messages, the keys that identify conversations, and the shapes of the derived results (feeds,
//! suggestions, trending posts) the engines hand back.

use std::{collections::HashSet, fmt::Display, ops::Deref, str::FromStr};

use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use lazy_static::lazy_static;
use regex::Regex;
use scylla::{
    cluster::metadata::ColumnType,
    deserialize::{FrameSlice, value::DeserializeValue},
    errors::{DeserializationError, SerializationError, TypeCheckError},
    serialize::{
        value::SerializeValue,
        writers::{CellWriter, WrittenCellProof},
    },
};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{Backtrace, prelude::*};
use uuid::Uuid;

use crate::util::exactly_two;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid conversation key"))]
    BadConversationKey { text: String, backtrace: Backtrace },
    #[snafu(display("{email} is not a valid e-mail address"))]
    BadEmail { email: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a feed mode; expected one of all, self or following"))]
    BadFeedMode { text: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid redk username"))]
    BadUsername { name: String },
    #[snafu(display("{username} cannot hold a conversation with themselves"))]
    SelfConversation {
        username: Username,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn mk_de_err(err: impl std::error::Error + Send + Sync + 'static) -> DeserializationError {
    DeserializationError::new(err)
}

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{:?}", err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Declare a newtype around [Uuid] to be used as the opaque identifier for some entity
///
/// Neither store hands out auto-increment identifiers, so we mint our own. Users, posts & messages
/// each get a distinct type so they can't be confused for one another. The generated type
/// implements [Display] (hyphenated form), [FromStr], serde, and the ScyllaDB value traits.
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
        impl From<Uuid> for $type_name {
            fn from(value: Uuid) -> Self {
                $type_name(value)
            }
        }
        impl FromStr for $type_name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
        }
        // The derive macros don't work with newtype structs.
        impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for $type_name {
            fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
                <Uuid as DeserializeValue>::type_check(typ)
            }
            fn deserialize(
                typ: &'metadata ColumnType<'metadata>,
                v: Option<FrameSlice<'frame>>,
            ) -> StdResult<Self, DeserializationError> {
                Ok(Self(<Uuid as DeserializeValue>::deserialize(typ, v)?))
            }
        }
        impl SerializeValue for $type_name {
            fn serialize<'b>(
                &self,
                typ: &ColumnType<'_>,
                writer: CellWriter<'b>,
            ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
                SerializeValue::serialize(&self.0, typ, writer)
            }
        }
    };
}

define_id!(UserId);
define_id!(PostId);
define_id!(MessageId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// redk usernames must be ASCII, may be from three to sixty-four characters in length, and must
// match the regex "^[a-zA-Z][-_.a-zA-Z0-9]+$". Nb. that this excludes ':', which conversation keys
// use as their separator.
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 64;

lazy_static! {
    static ref USERNAME: Regex = Regex::new("^[a-zA-Z][-_.a-zA-Z0-9]+$").unwrap(/* known good */);
}

fn check_username(s: &str) -> bool {
    s.is_ascii()
        && s.len() >= MIN_USERNAME_LENGTH
        && s.len() <= MAX_USERNAME_LENGTH
        && USERNAME.is_match(s)
}

/// A refined type representing a redk username
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Construct a [Username] from a `&str`; to *move* a [String] into a [Username] use
    /// [TryFrom::try_from()]
    pub fn new(name: &str) -> Result<Username> {
        check_username(name)
            .then_some(Username(name.to_owned()))
            .ok_or(
                BadUsernameSnafu {
                    name: name.to_owned(),
                }
                .build(),
            )
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `Username`
impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Username::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for Username {
    fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
        <String as DeserializeValue>::type_check(typ)
    }
    fn deserialize(
        typ: &'metadata ColumnType<'metadata>,
        v: Option<FrameSlice<'frame>>,
    ) -> StdResult<Self, DeserializationError> {
        Username::try_from(<String as DeserializeValue>::deserialize(typ, v)?).map_err(mk_de_err)
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Username::new(s)
    }
}

impl SerializeValue for Username {
    fn serialize<'b>(
        &self,
        typ: &ColumnType<'_>,
        writer: CellWriter<'b>,
    ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
        SerializeValue::serialize(&self.0, typ, writer)
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        if check_username(&name) {
            Ok(Username(name))
        } else {
            BadUsernameSnafu { name }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserEmail                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing an e-mail address
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new(email: &str) -> Result<UserEmail> {
        EmailAddress::is_valid(email)
            .then_some(UserEmail(email.to_string()))
            .context(BadEmailSnafu {
                email: email.to_string(),
            })
    }
}

impl Deref for UserEmail {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for UserEmail {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        UserEmail::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for UserEmail {
    fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
        <String as DeserializeValue>::type_check(typ)
    }
    fn deserialize(
        typ: &'metadata ColumnType<'metadata>,
        v: Option<FrameSlice<'frame>>,
    ) -> StdResult<Self, DeserializationError> {
        UserEmail::try_from(<String as DeserializeValue>::deserialize(typ, v)?).map_err(mk_de_err)
    }
}

impl Display for UserEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserEmail {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        UserEmail::new(s)
    }
}

impl SerializeValue for UserEmail {
    fn serialize<'b>(
        &self,
        typ: &ColumnType<'_>,
        writer: CellWriter<'b>,
    ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
        SerializeValue::serialize(&self.0, typ, writer)
    }
}

impl TryFrom<String> for UserEmail {
    type Error = Error;

    fn try_from(email: String) -> std::result::Result<Self, Self::Error> {
        if EmailAddress::is_valid(&email) {
            Ok(UserEmail(email))
        } else {
            BadEmailSnafu { email }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A redk user
///
/// The record store owns these; the graph holds a node keyed by the same [UserId].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct User {
    id: UserId,
    username: Username,
    email: UserEmail,
    #[serde(rename = "name")]
    display_name: Option<String>,
    bio: Option<String>,
    created: DateTime<Utc>,
}

impl User {
    /// Mint a new [User] with a fresh id
    pub fn new(
        username: &Username,
        email: &UserEmail,
        display_name: Option<&str>,
        bio: Option<&str>,
    ) -> User {
        User {
            id: UserId::new(),
            username: username.clone(),
            email: email.clone(),
            display_name: display_name.map(str::to_owned),
            bio: bio.map(str::to_owned),
            created: Utc::now(),
        }
    }
    /// Re-assemble a [User] read back from a store
    pub fn from_parts(
        id: UserId,
        username: Username,
        email: UserEmail,
        display_name: Option<String>,
        bio: Option<String>,
        created: DateTime<Utc>,
    ) -> User {
        User {
            id,
            username,
            email,
            display_name,
            bio,
            created,
        }
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn username(&self) -> &Username {
        &self.username
    }
    pub fn email(&self) -> &UserEmail {
        &self.email
    }
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
    pub fn bio(&self) -> Option<&str> {
        self.bio.as_deref()
    }
    pub fn created(&self) -> &DateTime<Utc> {
        &self.created
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Post                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A post, as stored in the record store & as cached in feeds
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Post {
    id: PostId,
    author_id: UserId,
    #[serde(rename = "author_username")]
    author: Username,
    content: String,
    tags: HashSet<String>,
    #[serde(rename = "created_at")]
    created: DateTime<Utc>,
}

impl Post {
    pub fn new<I, S>(author: &User, content: &str, tags: I) -> Post
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Post {
            id: PostId::new(),
            author_id: author.id(),
            author: author.username().clone(),
            content: content.to_owned(),
            tags: tags.into_iter().map(Into::into).collect(),
            created: Utc::now(),
        }
    }
    pub fn from_parts(
        id: PostId,
        author_id: UserId,
        author: Username,
        content: String,
        tags: HashSet<String>,
        created: DateTime<Utc>,
    ) -> Post {
        Post {
            id,
            author_id,
            author,
            content,
            tags,
            created,
        }
    }
    pub fn id(&self) -> PostId {
        self.id
    }
    pub fn author_id(&self) -> UserId {
        self.author_id
    }
    pub fn author(&self) -> &Username {
        &self.author
    }
    pub fn content(&self) -> &str {
        &self.content
    }
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }
    pub fn created(&self) -> &DateTime<Utc> {
        &self.created
    }
}

/// Order posts newest-first; ties (which the stores' timestamp resolution makes possible) are
/// broken on the post id so that the order is total.
pub fn newest_first(lhs: &Post, rhs: &Post) -> std::cmp::Ordering {
    rhs.created
        .cmp(&lhs.created)
        .then_with(|| rhs.id.cmp(&lhs.id))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           FeedMode                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Which authors contribute to a feed
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// The requesting user & everyone they follow
    All,
    /// The requesting user only
    #[serde(rename = "self")]
    SelfOnly,
    /// Everyone the requesting user follows, but not the user themselves
    Following,
}

impl FeedMode {
    pub fn includes_self(&self) -> bool {
        matches!(self, FeedMode::All | FeedMode::SelfOnly)
    }
    pub fn includes_followees(&self) -> bool {
        matches!(self, FeedMode::All | FeedMode::Following)
    }
}

impl Display for FeedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FeedMode::All => "all",
                FeedMode::SelfOnly => "self",
                FeedMode::Following => "following",
            }
        )
    }
}

impl FromStr for FeedMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(FeedMode::All),
            "self" => Ok(FeedMode::SelfOnly),
            "following" => Ok(FeedMode::Following),
            _ => BadFeedModeSnafu { text: s.to_owned() }.fail(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       Direct messages                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

const CONVERSATION_SEPARATOR: &str = "::";

/// The identifier for a two-party conversation
///
/// Both participants' usernames, sorted & joined by "::". Since neither username may contain a
/// colon, the key can always be split back into its participants, and since the names are sorted,
/// both participants compute the same key regardless of who's asking.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(a: &Username, b: &Username) -> Result<ConversationKey> {
        ensure!(a != b, SelfConversationSnafu { username: a.clone() });
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Ok(ConversationKey(format!(
            "{}{}{}",
            lo, CONVERSATION_SEPARATOR, hi
        )))
    }
    /// The two participants, in sorted order
    pub fn participants(&self) -> (Username, Username) {
        // Checked on construction
        let (lo, hi) = self
            .0
            .split_once(CONVERSATION_SEPARATOR)
            .unwrap_or((&self.0, &self.0));
        (Username(lo.to_owned()), Username(hi.to_owned()))
    }
    /// Given one participant, return the other; `None` if `me` isn't a participant
    pub fn other(&self, me: &Username) -> Option<Username> {
        let (lo, hi) = self.participants();
        if &lo == me {
            Some(hi)
        } else if &hi == me {
            Some(lo)
        } else {
            None
        }
    }
}

impl Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for ConversationKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for ConversationKey {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (a, b) = exactly_two(s.split(CONVERSATION_SEPARATOR)).map_err(|_| {
            BadConversationKeySnafu {
                text: s.to_owned(),
            }
            .build()
        })?;
        let (a, b) = (Username::new(a)?, Username::new(b)?);
        ensure!(a < b, BadConversationKeySnafu { text: s.to_owned() });
        ConversationKey::new(&a, &b)
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse::<ConversationKey>()
    }
}

impl<'de> Deserialize<'de> for ConversationKey {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        ConversationKey::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl<'frame, 'metadata> DeserializeValue<'frame, 'metadata> for ConversationKey {
    fn type_check(typ: &ColumnType<'_>) -> StdResult<(), TypeCheckError> {
        <String as DeserializeValue>::type_check(typ)
    }
    fn deserialize(
        typ: &'metadata ColumnType<'metadata>,
        v: Option<FrameSlice<'frame>>,
    ) -> StdResult<Self, DeserializationError> {
        ConversationKey::try_from(<String as DeserializeValue>::deserialize(typ, v)?)
            .map_err(mk_de_err)
    }
}

impl SerializeValue for ConversationKey {
    fn serialize<'b>(
        &self,
        typ: &ColumnType<'_>,
        writer: CellWriter<'b>,
    ) -> StdResult<WrittenCellProof<'b>, SerializationError> {
        SerializeValue::serialize(&self.0, typ, writer)
    }
}

/// A direct message between two users
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DirectMessage {
    id: MessageId,
    #[serde(rename = "conversation_key")]
    conversation: ConversationKey,
    sender: Username,
    receiver: Username,
    content: String,
    #[serde(rename = "created_at")]
    created: DateTime<Utc>,
    read: bool,
    read_at: Option<DateTime<Utc>>,
}

impl DirectMessage {
    pub fn new(sender: &Username, receiver: &Username, content: &str) -> Result<DirectMessage> {
        Ok(DirectMessage {
            id: MessageId::new(),
            conversation: ConversationKey::new(sender, receiver)?,
            sender: sender.clone(),
            receiver: receiver.clone(),
            content: content.to_owned(),
            created: Utc::now(),
            read: false,
            read_at: None,
        })
    }
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: MessageId,
        conversation: ConversationKey,
        sender: Username,
        receiver: Username,
        content: String,
        created: DateTime<Utc>,
        read: bool,
        read_at: Option<DateTime<Utc>>,
    ) -> DirectMessage {
        DirectMessage {
            id,
            conversation,
            sender,
            receiver,
            content,
            created,
            read,
            read_at,
        }
    }
    pub fn id(&self) -> MessageId {
        self.id
    }
    pub fn conversation(&self) -> &ConversationKey {
        &self.conversation
    }
    pub fn sender(&self) -> &Username {
        &self.sender
    }
    pub fn receiver(&self) -> &Username {
        &self.receiver
    }
    pub fn content(&self) -> &str {
        &self.content
    }
    pub fn created(&self) -> &DateTime<Utc> {
        &self.created
    }
    pub fn read(&self) -> bool {
        self.read
    }
    pub fn read_at(&self) -> Option<&DateTime<Utc>> {
        self.read_at.as_ref()
    }
    /// Mark this message read at `at`, if it's addressed to `reader` & not already read; return
    /// true if the message changed.
    pub fn mark_read_by(&mut self, reader: &Username, at: &DateTime<Utc>) -> bool {
        if !self.read && &self.receiver == reader {
            self.read = true;
            self.read_at = Some(*at);
            true
        } else {
            false
        }
    }
}

/// One line in a user's inbox: who the conversation is with, and how it stands
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConversationSummary {
    /// The other participant
    pub username: Username,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: usize,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Derived results                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A "who to follow" suggestion
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Suggestion {
    pub username: Username,
    pub score: f64,
    pub mutual_connections: usize,
    pub followers_count: usize,
    pub posts_count: usize,
    pub reason: Option<String>,
}

/// A post along with its position in the trending ranking
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TrendingPost {
    pub post: Post,
    pub score: i64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_usernames() {
        assert!(Username::new("alice").is_ok());
        assert!(Username::new("bob").is_ok());
        assert!(Username::new("j.r.r_tolkien-1892").is_ok());
        assert!(Username::new("ab").is_err());
        assert!(Username::new("1alice").is_err());
        assert!(Username::new("alice::bob").is_err());
        assert!(Username::new("ålice").is_err());
        assert!(serde_json::from_str::<Username>("\"x\"").is_err());
        assert_eq!(
            serde_json::from_str::<Username>("\"carol\"").unwrap(),
            Username::new("carol").unwrap()
        );
    }

    #[test]
    fn test_conversation_keys() {
        let alice = Username::new("alice").unwrap();
        let bob = Username::new("bob").unwrap();

        let ab = ConversationKey::new(&alice, &bob).unwrap();
        let ba = ConversationKey::new(&bob, &alice).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.to_string(), "alice::bob");
        assert_eq!(ab.participants(), (alice.clone(), bob.clone()));
        assert_eq!(ab.other(&alice), Some(bob.clone()));
        assert_eq!(ab.other(&bob), Some(alice.clone()));
        assert_eq!(ab.other(&Username::new("carol").unwrap()), None);

        assert!(ConversationKey::new(&alice, &alice).is_err());
        assert_eq!("alice::bob".parse::<ConversationKey>().unwrap(), ab);
        // Not sorted
        assert!("bob::alice".parse::<ConversationKey>().is_err());
        assert!("alice".parse::<ConversationKey>().is_err());
        assert!("alice::bob::carol".parse::<ConversationKey>().is_err());
    }

    #[test]
    fn test_feed_modes() {
        assert_eq!("all".parse::<FeedMode>().unwrap(), FeedMode::All);
        assert_eq!("self".parse::<FeedMode>().unwrap(), FeedMode::SelfOnly);
        assert_eq!("following".parse::<FeedMode>().unwrap(), FeedMode::Following);
        assert!("everyone".parse::<FeedMode>().is_err());
        assert_eq!(FeedMode::SelfOnly.to_string(), "self");
        assert_eq!(serde_json::to_string(&FeedMode::SelfOnly).unwrap(), "\"self\"");
        assert!(FeedMode::All.includes_self() && FeedMode::All.includes_followees());
        assert!(!FeedMode::Following.includes_self());
        assert!(!FeedMode::SelfOnly.includes_followees());
    }

    #[test]
    fn test_mark_read() {
        let alice = Username::new("alice").unwrap();
        let bob = Username::new("bob").unwrap();
        let mut msg = DirectMessage::new(&alice, &bob, "hi").unwrap();
        let now = Utc::now();
        // Only the receiver can read a message
        assert!(!msg.mark_read_by(&alice, &now));
        assert!(msg.mark_read_by(&bob, &now));
        assert!(msg.read());
        assert_eq!(msg.read_at(), Some(&now));
        assert!(!msg.mark_read_by(&bob, &now));
    }
}
