//! faceregd library surface: configuration shared with the `facereg` CLI.

pub mod config;
