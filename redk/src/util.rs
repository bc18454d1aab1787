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

//! # util
//!
//! Small helpers with no better home.

use std::fmt::Display;

use either::Either;
use secrecy::SecretString;
use serde::Deserialize;
use tap::Pipe;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          exactly_two                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct ExactlyTwoError<T: std::iter::Iterator> {
    #[allow(clippy::type_complexity)]
    cause: Option<Either<T::Item, (T::Item, T::Item, T::Item)>>,
}

impl<T: std::iter::Iterator> Display for ExactlyTwoError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(Either::Left(_one)) => write!(f, "ExactlyTwoError: One element"),
            Some(Either::Right(_three)) => write!(f, "ExactlyTwoError: Three or more elements"),
            None => write!(f, "ExactlyTwoError: no elements"),
        }
    }
}

/// Pull exactly two items out of `iter`, failing if it yields fewer or more
pub fn exactly_two<T>(mut iter: T) -> std::result::Result<(T::Item, T::Item), ExactlyTwoError<T>>
where
    T: std::iter::Iterator,
{
    match (iter.next(), iter.next(), iter.next()) {
        (Some(first), Some(second), None) => Ok((first, second)),
        (Some(first), Some(second), Some(third)) => Err(ExactlyTwoError {
            cause: Some(Either::Right((first, second, third))),
        }),
        (Some(first), None, _) => Err(ExactlyTwoError {
            cause: Some(Either::Left(first)),
        }),
        (None, _, _) => Err(ExactlyTwoError { cause: None }),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      generic credentials                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// General-purpose credentials: username & password
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials(pub (SecretString, SecretString));

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

/// Parse "username,password" on the command line into [Credentials]
#[derive(Clone, Debug)]
pub struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .split(',')
            .pipe(exactly_two)
            .map_err(|_| clap::Error::new(ErrorKind::WrongNumberOfValues))?
            .pipe(|(user, pass)| (SecretString::from(user), SecretString::from(pass)))
            .pipe(Credentials)
            .pipe(Ok)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use secrecy::ExposeSecret;

    #[test]
    fn test_exactly_two() {
        assert_eq!(exactly_two("a::b".split("::")).unwrap(), ("a", "b"));
        assert!(exactly_two("a".split("::")).is_err());
        assert!(exactly_two("a::b::c".split("::")).is_err());
        assert!(exactly_two(std::iter::empty::<u8>()).is_err());
    }

    #[test]
    fn test_credentials() {
        use clap::builder::TypedValueParser;
        let cmd = clap::Command::new("test");
        let creds = CredentialsParser
            .parse_ref(&cmd, None, std::ffi::OsStr::new("scylla,s3kr1t"))
            .unwrap();
        assert_eq!(creds.0.0.expose_secret(), "scylla");
        assert_eq!(creds.0.1.expose_secret(), "s3kr1t");
        assert!(
            CredentialsParser
                .parse_ref(&cmd, None, std::ffi::OsStr::new("scylla"))
                .is_err()
        );
    }
}
