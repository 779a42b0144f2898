//! SBC governor daemon: configuration loading and the HTTP surface

pub mod api;
pub mod config;
