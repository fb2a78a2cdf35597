#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod durable;
pub mod error;
pub mod extract;
pub mod formats;
pub mod http;
pub mod layout;
pub mod logging;
pub mod orchestrator;
pub mod quality_store;
pub mod retry;
pub mod state;
pub mod summary;
pub mod validate;
