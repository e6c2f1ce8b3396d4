pub mod buffer_pool;
pub mod catalog;
pub mod config;
pub mod database;
pub mod disk_manager;
pub mod errors;
pub mod index;
pub mod pages;
pub mod predicate;
pub mod table;
pub mod tuple;
pub mod txn_manager;
pub mod types;

pub use config::{Config, ReplacementStrategy};
pub use database::Database;
pub use errors::Error;

use std::io::Write;

/// Wires `log` output to stderr, honoring `RUST_LOG`. For embedding hosts
/// that do not install their own logger.
pub fn init_log() {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format_timestamp_secs()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} - {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
