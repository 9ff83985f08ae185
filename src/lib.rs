// SPDX-License-Identifier: MIT
#![allow(clippy::too_many_arguments)]

pub mod app;
pub mod common;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Convenience re-exports
pub use infrastructure::data;
pub use infrastructure::network;
pub use services::seller as core;
