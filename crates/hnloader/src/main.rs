//! Hacker News loader.
//!
//! A small command line client for the Hacker News API. Every kind of resource it reads (story
//! lists, stories and comments) goes through its own [`loader_cache::Cache`], so concurrent
//! requests for the same item share a single HTTP request.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod api;
mod cli;
mod config;
mod loaders;
mod logging;
mod models;
mod output;


fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
