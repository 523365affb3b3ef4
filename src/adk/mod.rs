// SPDX-License-Identifier: MIT

//! Agent development kit: the backend capability interface and the shared
//! error taxonomy.

pub mod agent;
pub mod error;
