pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod observability;
pub mod recurrence;
pub mod store;
pub mod timemath;
pub mod wal;
pub mod wire;
