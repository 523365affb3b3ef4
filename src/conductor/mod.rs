// SPDX-License-Identifier: MIT

//! Orchestration layer: agent construction, request routing and workflow
//! execution

pub mod agent_factory;
pub mod config;
pub mod orchestrator;
pub mod workflow;
