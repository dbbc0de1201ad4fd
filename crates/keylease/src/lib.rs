// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod address;
pub mod codec;
pub mod config;
pub mod error;
pub mod issuance;
pub mod lifecycle;
pub mod login;
pub mod record;
pub mod renewal;
pub mod renewer;
pub mod test_support;
pub mod token;
