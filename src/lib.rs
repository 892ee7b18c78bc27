// SPDX-License-Identifier: MIT

//! deckflow-rs - orchestration engine for document-to-deck pipelines
//!
//! - [adk] - leaf building blocks: errors, the model caller contract, output parsers
//! - [deckflow] - agent execution core, workflow graph engine and configuration

pub mod adk;
pub mod deckflow;
