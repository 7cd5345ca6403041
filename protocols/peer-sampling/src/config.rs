// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Parsing of the `key=value,key=value` configuration strings accepted by the variants.

use std::{str::FromStr, time::Duration};

use crate::error::ConfigError;

/// Splits a configuration string into its `(key, value)` pairs.
///
/// Whitespace around keys and values is ignored, as are empty components.
pub(crate) fn pairs(s: &str) -> Result<Vec<(&str, &str)>, ConfigError> {
    s.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|component| {
            component
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| ConfigError::Malformed(component.to_owned()))
        })
        .collect()
}

pub(crate) fn value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

/// Accepts `0`/`1` as well as `true`/`false`.
pub(crate) fn flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Periods are given in microseconds.
pub(crate) fn period(key: &str, value: &str) -> Result<Duration, ConfigError> {
    self::value::<u64>(key, value).map(Duration::from_micros)
}

pub(crate) fn unknown(key: &str) {
    tracing::warn!(%key, "Ignoring unknown configuration key");
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}
