// This file is part of gonka-tracker.
// Copyright (C) 2025 Gonka Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod domain;
pub mod infra;
pub mod telemetry;
