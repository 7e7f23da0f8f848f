//! Olian: streaming server-side rendering for the Olian chat application shell.

pub mod application;
pub mod config;
pub mod infra;
pub mod presentation;
mod util;
