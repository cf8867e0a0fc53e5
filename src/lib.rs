#![forbid(unsafe_code)]

pub mod assets;
pub mod cli;
pub mod config;
pub mod css;
pub mod dom;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod json_file;
pub mod layout;
pub mod logging;
pub mod mirror;
pub mod page;
pub mod progress;
pub mod reconcile;
pub mod schedule;
pub mod thread_info;
pub mod urls;
