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


use std::{env, fs, path::PathBuf, sync::Arc};

use futures::future::BoxFuture;
use libtest_mimic::Failed;
use serde::Deserialize;
use snafu::{IntoError, prelude::*};
use tap::Pipe;

use redk::redk::Redk;
use redk_test::{conversations, feeds, likes, suggestions};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read REDK_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Common test configuration
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub logging: bool,
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
    /// redk configuration file naming the stores to test against; only the `live` tests use it
    #[serde(rename = "redk-config")]
    pub redk_config: Option<PathBuf>,
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `REDK_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return a default instance.
    pub fn new() -> Result<Configuration> {
        match env::var("REDK_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() }),
            Err(env::VarError::NotPresent) => Ok(Configuration::default()),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
    pub fn level(&self) -> tracing::Level {
        self.log_level
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(tracing::Level::INFO)
    }
}

/// One scenario, run against whatever [Redk] the test program builds
pub struct RedkTest {
    pub name: &'static str,
    pub test_fn: fn(Arc<Redk>) -> BoxFuture<'static, std::result::Result<(), Failed>>,
}

inventory::collect!(RedkTest);

inventory::submit!(RedkTest {
    name: "000feed_follow_refreshes",
    test_fn: |redk| Box::pin(feeds::follow_refreshes_feed(redk)),
});

inventory::submit!(RedkTest {
    name: "010likes_five_likes",
    test_fn: |redk| Box::pin(likes::five_likes(redk)),
});

inventory::submit!(RedkTest {
    name: "020suggestions_two_hops",
    test_fn: |redk| Box::pin(suggestions::two_hops(redk)),
});

inventory::submit!(RedkTest {
    name: "021suggestions_fallback",
    test_fn: |redk| Box::pin(suggestions::fallback(redk)),
});

inventory::submit!(RedkTest {
    name: "030conversation_symmetric",
    test_fn: |redk| Box::pin(conversations::symmetric_conversation(redk)),
});
