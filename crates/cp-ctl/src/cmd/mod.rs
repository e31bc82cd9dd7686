//! CLI command modules.

pub mod account;
pub mod http;
pub mod ubi;
