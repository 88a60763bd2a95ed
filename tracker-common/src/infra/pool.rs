// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use derive_more::Deref;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::PathBuf;

/// Config for the SQLite cache file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the single cache file.
    pub cache_file: PathBuf,

    /// Max connections of the pool.
    #[serde(default = "max_connections_default")]
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_file: PathBuf::from("cache.db"),
            max_connections: max_connections_default(),
        }
    }
}

fn max_connections_default() -> u32 {
    4
}

/// A sqlx pool for SQLite. The cache file is created if missing; WAL keeps concurrent readers and
/// the single writer consistent.
#[derive(Debug, Clone, Deref)]
pub struct SqlitePool(sqlx::SqlitePool);

impl SqlitePool {
    /// Create a new [SqlitePool] with the given [Config].
    pub async fn new(config: Config) -> Result<Self, sqlx::Error> {
        let Config {
            cache_file,
            max_connections,
        } = config;

        let options = SqliteConnectOptions::new()
            .filename(cache_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self(pool))
    }

    /// Create an in-memory pool. A single connection, because every SQLite in-memory connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new().in_memory(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_file: dir.path().join("cache.db"),
            max_connections: 2,
        };

        let pool = SqlitePool::new(config).await.unwrap();
        let (one,) = sqlx::query_as::<_, (i64,)>("SELECT 1")
            .fetch_one(&*pool)
            .await
            .unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn test_in_memory() {
        let pool = SqlitePool::in_memory().await.unwrap();
        let (one,) = sqlx::query_as::<_, (i64,)>("SELECT 1")
            .fetch_one(&*pool)
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
