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

//! # redis_cluster
//!
//! A Redis Cluster implementation of [fabric::Backend].
//!
//! Keys are routed by hash slot in the usual way; the only commands that need help are:
//!
//! - `SCAN`, which in a cluster only ever covers one node; we compute the slot owning the
//!   pattern's hash tag & send the scan to that slot's primary
//! - the like mutation, which is a Lua script over the post's counter & like-set (the two share a
//!   hash tag, so a single node runs the whole script atomically) followed, if the script applied
//!   the mutation, by a second script bumping the post's trending score on whichever node owns
//!   the global ranking
//!
//! Every round-trip is bounded by the client's own connect & response timeouts, and in addition
//! by an overall store timeout.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands, RedisResult, Script, Value,
    cluster::ClusterClientBuilder,
    cluster_async::ClusterConnection,
    cluster_routing::{Route, RoutingInfo, SingleNodeRoutingInfo, SlotAddr},
};
use snafu::{Backtrace, prelude::*};
use tracing::{debug, info, warn};

use crate::{
    fabric::{self, LikeDirection, LikeMutation, LikeOutcome},
    keys::{Key, KeyPattern},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build a cluster client: {source}"))]
    Client {
        source: redis::RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to connect to the cluster: {source}"))]
    Connect {
        source: redis::RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("At least one cluster node must be given"))]
    NoNodes { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// How many keys to ask for per `SCAN` iteration
const SCAN_COUNT: usize = 100;

// KEYS[1]: the like counter, KEYS[2]: the like-set, ARGV[1]: the user, ARGV[2]: +1 or -1.
// Returns {count, applied}.
const LIKE_SCRIPT: &str = r#"
local member = redis.call('SISMEMBER', KEYS[2], ARGV[1])
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
local delta = tonumber(ARGV[2])
if count < 0 then count = 0 end
if (delta > 0 and member == 1) or (delta < 0 and member == 0) then
  return {count, 0}
end
count = count + delta
if count < 0 then count = 0 end
redis.call('SET', KEYS[1], count)
if delta > 0 then
  redis.call('SADD', KEYS[2], ARGV[1])
else
  redis.call('SREM', KEYS[2], ARGV[1])
end
return {count, 1}
"#;

// KEYS[1]: the trending ranking, ARGV[1]: the delta, ARGV[2]: the post. Posts whose score falls
// to zero leave the ranking.
const TRENDING_SCRIPT: &str = r#"
local score = tonumber(redis.call('ZINCRBY', KEYS[1], ARGV[1], ARGV[2]))
if score <= 0 then
  redis.call('ZREM', KEYS[1], ARGV[2])
end
return tostring(score)
"#;

/// Interpret a `SCAN` reply: the next cursor & a page of keys
fn parse_scan_reply(value: &Value) -> fabric::Result<(u64, Vec<String>)> {
    redis::from_redis_value::<(u64, Vec<String>)>(value)
        .map_err(|err| fabric::Error::protocol(format!("bad SCAN reply: {}", err)))
}

/// Interpret the like script's reply
fn parse_like_reply(reply: &[i64]) -> fabric::Result<LikeOutcome> {
    match reply {
        [count, applied] => Ok(LikeOutcome {
            count: *count,
            applied: *applied != 0,
            ranked: false,
        }),
        _ => Err(fabric::Error::protocol(format!(
            "the like script returned {:?}",
            reply
        ))),
    }
}

/// A connection to a Redis cluster
#[derive(Clone)]
pub struct Cluster {
    conn: ClusterConnection,
    store_timeout: Duration,
    like_script: Script,
    trending_script: Script,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl Cluster {
    /// Connect to the cluster through any of `nodes` (given as `redis://host:port` URLs)
    pub async fn new(
        nodes: &[String],
        connect_timeout: Duration,
        response_timeout: Duration,
        read_from_replicas: bool,
        store_timeout: Duration,
    ) -> Result<Cluster> {
        ensure!(!nodes.is_empty(), NoNodesSnafu);
        let mut builder = ClusterClientBuilder::new(nodes.to_vec())
            .connection_timeout(connect_timeout)
            .response_timeout(response_timeout);
        if read_from_replicas {
            builder = builder.read_from_replicas();
        }
        let conn = builder
            .build()
            .context(ClientSnafu)?
            .get_async_connection()
            .await
            .context(ConnectSnafu)?;
        info!("Connected to the Redis cluster via {}", nodes.join(","));
        Ok(Cluster {
            conn,
            store_timeout,
            like_script: Script::new(LIKE_SCRIPT),
            trending_script: Script::new(TRENDING_SCRIPT),
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> fabric::Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(Ok(t)) => Ok(t),
            Ok(Err(err)) => Err(fabric::Error::unavailable(err)),
            Err(_) => Err(fabric::Error::timeout(self.store_timeout)),
        }
    }

    async fn cluster_subcommand(&self, sub: &str) -> fabric::Result<String> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("CLUSTER").arg(sub).to_owned();
        self.bounded(async move { cmd.query_async(&mut conn).await })
            .await
    }

    /// The raw text of `CLUSTER INFO`
    pub async fn cluster_info(&self) -> fabric::Result<String> {
        self.cluster_subcommand("INFO").await
    }

    /// The raw text of `CLUSTER NODES`
    pub async fn cluster_nodes(&self) -> fabric::Result<String> {
        self.cluster_subcommand("NODES").await
    }

    // Every key matching `pattern`, scanning only the primary that owns the pattern's slot
    async fn scan(&self, pattern: &KeyPattern) -> fabric::Result<Vec<String>> {
        let routing = RoutingInfo::SingleNode(SingleNodeRoutingInfo::SpecificNode(Route::new(
            pattern.slot(),
            SlotAddr::Master,
        )));
        let mut cursor = 0u64;
        let mut keys = Vec::new();
        loop {
            let mut conn = self.conn.clone();
            let cmd = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern.to_string())
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .to_owned();
            let routing = routing.clone();
            let reply = self
                .bounded(async move { conn.route_command(&cmd, routing).await })
                .await?;
            let (next, page) = parse_scan_reply(&reply)?;
            keys.extend(page.into_iter().filter(|key| pattern.matches(key)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn del(&self, keys: Vec<String>) -> fabric::Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.del(keys).await }).await
    }
}

#[async_trait]
impl fabric::Backend for Cluster {
    async fn get(&self, key: &Key) -> fabric::Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.get(key.as_ref()).await })
            .await
    }
    async fn set_ex(&self, key: &Key, value: &str, ttl: Duration) -> fabric::Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        self.bounded(async move { conn.set_ex(key.as_ref(), value, secs).await })
            .await
    }
    async fn delete(&self, keys: &[Key]) -> fabric::Result<usize> {
        if let Some((first, rest)) = keys.split_first() {
            if let Some(other) = rest.iter().find(|key| key.slot() != first.slot()) {
                return Err(fabric::Error::cross_partition(first, other));
            }
        }
        self.del(keys.iter().map(|key| key.to_string()).collect())
            .await
    }
    async fn delete_matching(&self, pattern: &KeyPattern) -> fabric::Result<usize> {
        let keys = self.scan(pattern).await?;
        debug!("{} key(s) match {}", keys.len(), pattern);
        self.del(keys).await
    }
    async fn counter(&self, key: &Key) -> fabric::Result<i64> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = self
            .bounded(async move { conn.get(key.as_ref()).await })
            .await?;
        Ok(count.unwrap_or(0))
    }
    async fn is_member(&self, key: &Key, member: &str) -> fabric::Result<bool> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.sismember(key.as_ref(), member).await })
            .await
    }
    async fn members(&self, key: &Key) -> fabric::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.smembers(key.as_ref()).await })
            .await
    }
    async fn score(&self, key: &Key, member: &str) -> fabric::Result<Option<f64>> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.zscore(key.as_ref(), member).await })
            .await
    }
    async fn top_scores(&self, key: &Key, limit: usize) -> fabric::Result<Vec<(String, f64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = limit.saturating_sub(1).min(isize::MAX as usize) as isize;
        self.bounded(async move { conn.zrevrange_withscores(key.as_ref(), 0, stop).await })
            .await
    }
    async fn apply_like(&self, mutation: &LikeMutation) -> fabric::Result<LikeOutcome> {
        let delta = mutation.delta();
        let username = mutation.username().to_string();
        let (count_key, users_key) = (mutation.count_key(), mutation.users_key());

        let mut conn = self.conn.clone();
        let mut invocation = self.like_script.prepare_invoke();
        invocation
            .key(count_key.as_ref())
            .key(users_key.as_ref())
            .arg(&username)
            .arg(delta);
        let reply: Vec<i64> = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        let mut outcome = parse_like_reply(&reply)?;
        if !outcome.applied {
            return Ok(outcome);
        }

        // The counter & like-set have changed; from here on, failure can't be reported as an error

        let mut conn = self.conn.clone();
        let mut invocation = self.trending_script.prepare_invoke();
        let trending_key = mutation.trending_key();
        invocation
            .key(trending_key.as_ref())
            .arg(delta)
            .arg(mutation.post().to_string());
        let score: String = match self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await
        {
            Ok(score) => score,
            Err(err) => {
                warn!(
                    "Failed to move {} in {}: {}",
                    mutation.post(),
                    trending_key,
                    err
                );
                return Ok(outcome);
            }
        };
        outcome.ranked = true;
        debug!(
            "{} {} {}; count is now {}, trending score {}",
            username,
            match mutation.direction() {
                LikeDirection::Like => "liked",
                LikeDirection::Unlike => "unliked",
            },
            mutation.post(),
            outcome.count,
            score
        );
        Ok(outcome)
    }
    async fn ping(&self) -> fabric::Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded(async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(fabric::Error::protocol(format!("PING returned {}", pong)))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scan_reply() {
        let reply = Value::Array(vec![
            Value::BulkString(b"1742".to_vec()),
            Value::Array(vec![
                Value::BulkString(b"{user:alice}:feed:all:10".to_vec()),
                Value::BulkString(b"{user:alice}:feed:self:5".to_vec()),
            ]),
        ]);
        let (cursor, keys) = parse_scan_reply(&reply).unwrap();
        assert_eq!(cursor, 1742);
        assert_eq!(
            keys,
            vec!["{user:alice}:feed:all:10", "{user:alice}:feed:self:5"]
        );
        assert!(parse_scan_reply(&Value::Okay).is_err());
    }

    #[test]
    fn test_like_reply() {
        assert_eq!(
            parse_like_reply(&[3, 1]).unwrap(),
            LikeOutcome {
                count: 3,
                applied: true,
                ranked: false
            }
        );
        assert_eq!(
            parse_like_reply(&[3, 0]).unwrap(),
            LikeOutcome {
                count: 3,
                applied: false,
                ranked: false
            }
        );
        assert!(parse_like_reply(&[3]).is_err());
    }

    #[test]
    fn test_scripts_are_keyed() {
        // Scripts may only touch the keys they're handed, or the cluster can't route them
        assert!(!LIKE_SCRIPT.contains("KEYS[3]"));
        assert!(!TRENDING_SCRIPT.contains("KEYS[2]"));
    }
}
