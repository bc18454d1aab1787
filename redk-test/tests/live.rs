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


//! # live
//!
//! Integration tests run against the stores named in a redk configuration file. Point the
//! `redk-config` entry of the file named by `REDK_TEST_CONFIG` at one; with no such entry, every
//! test is reported as ignored.

use std::{io, sync::Arc};

use itertools::Itertools;
use libtest_mimic::{Arguments, Trial};
use snafu::{prelude::*, Snafu};
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

use redk::{config, metrics::Instruments, redk::Redk};

use common::{Configuration, RedkTest};

mod common;

#[derive(Snafu)]
enum Error {
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("{source}"))]
    Redk { source: config::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to build a Tokio runtime: {source}"))]
    Runtime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

async fn connect(cfg: &Configuration) -> Result<Option<Arc<Redk>>> {
    let Some(path) = &cfg.redk_config else {
        return Ok(None);
    };
    let redk_config = config::parse_config(Some(path.as_path())).context(RedkSnafu)?;
    info!("Testing against {:?}", redk_config);
    Redk::from_config(&redk_config, Arc::new(Instruments::new("redk-test")))
        .await
        .context(RedkSnafu)
        .map(|redk| Some(Arc::new(redk)))
}

fn main() -> Result<()> {
    let rt = Arc::new(Runtime::new().context(RuntimeSnafu)?);

    let config = Configuration::new().context(ConfigurationSnafu)?;
    let args = Arguments::from_args();

    if config.logging {
        let filter = EnvFilter::builder()
            .with_default_directive(config.level().into())
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }

    let redk = rt.block_on(connect(&config))?;

    // Scenarios create their own uniquely-named users, so they're free to run concurrently even
    // against shared stores.
    let conclusion = libtest_mimic::run(
        &args,
        inventory::iter::<RedkTest>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| match &redk {
                Some(redk) => Trial::test(test.name, {
                    let rt = rt.clone();
                    let redk = redk.clone();
                    move || rt.block_on(async { (test.test_fn)(redk).await })
                }),
                None => Trial::test(test.name, || Ok(())).with_ignored_flag(true),
            })
            .collect(),
    );

    conclusion.exit();
}
