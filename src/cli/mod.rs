//! CLI command handlers

pub mod commands;

pub use commands::{
    append_block, append_ercot, append_template, backup, download, export, fetch, filter,
    init_master, inspect, process, refresh, unhide, upload, MasterArgs, StoreArgs,
};
