// SPDX-License-Identifier: MIT

pub mod agent;
pub mod config;
pub mod error;
pub mod workflow;
