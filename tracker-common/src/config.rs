// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::DeserializeOwned;
use std::env;

/// Environment variable naming the configuration file; defaults to `config.yaml`.
pub const CONFIG_FILE: &str = "CONFIG_FILE";

const CONFIG_FILE_DEFAULT: &str = "config.yaml";

/// Environment variable prefix; `__` separates nesting levels, e.g.
/// `APP__NODE__URLS` overrides `node.urls`.
const ENV_PREFIX: &str = "APP__";
const ENV_SPLIT: &str = "__";

/// Extension methods for configuration types.
pub trait ConfigExt
where
    Self: DeserializeOwned,
{
    /// Load the configuration from an optional YAML file, overridden by prefixed environment
    /// variables.
    fn load() -> Result<Self, figment::Error> {
        let config_file = env::var(CONFIG_FILE).unwrap_or_else(|_| CONFIG_FILE_DEFAULT.to_string());

        Figment::new()
            .merge(Yaml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split(ENV_SPLIT))
            .extract()
    }
}

impl<T> ConfigExt for T where T: DeserializeOwned {}
