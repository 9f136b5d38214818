pub mod cli;
pub mod config;
pub mod errors;
pub mod git;
pub mod guard;
pub mod oplog;
pub mod review;
pub mod stack;
pub mod store;
pub mod utils;

pub use errors::GsError;
