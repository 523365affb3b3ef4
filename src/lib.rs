// SPDX-License-Identifier: MIT

//! conductor-rs routes requests to interchangeable AI agents and runs
//! interactive workflow graphs on top of them.
//!
//! - [`adk`] - the agent capability trait and error types
//! - [`conductor`] - orchestrator, workflow executor, checkpoints, config

pub mod adk;
pub mod conductor;
