//! Core domain + application logic for the Python hosting bot.
//!
//! This crate is framework-agnostic. Telegram, subprocesses and HTTP live
//! behind ports (traits) or in adapter crates.

pub mod access;
pub mod audit;
pub mod callback;
pub mod catalog;
pub mod config;
pub mod deploy;
pub mod dialog;
pub mod domain;
pub mod envfile;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod ports;
pub mod repo;
pub mod requirements;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod workspace;

pub use errors::{Error, Result};
