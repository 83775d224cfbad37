//! Database layer for Bounceback

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{
    to_map, BatchOp, Filter, LiveQueryId, LocalStore, Query, SortDir, StoreStats,
};
