// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

use logforth::{append, filter::env_filter::EnvFilterBuilder};

/// Initialize logging via the `log` facade: stderr appender, level taken from `RUST_LOG` with
/// `info` as default.
pub fn init_logging() {
    logforth::starter_log::builder()
        .dispatch(|dispatch| {
            dispatch
                .filter(EnvFilterBuilder::from_default_env_or("info").build())
                .append(append::Stderr::default())
        })
        .apply();
}
