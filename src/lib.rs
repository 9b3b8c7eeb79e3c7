//! Generate, fuzz, sign, and submit Ethereum consensus validator lifecycle
//! messages: withdrawal credential changes, voluntary exits, and deposits.
//!
//! The pipeline is resolve, build, (optionally) fuzz, sign, dispatch:
//!
//! - [`resolver`] turns identity inputs into validator handles
//! - [`builder`] constructs unsigned operations
//! - [`fuzz`] deterministically corrupts operations before signing
//! - [`dispatch`] signs and routes to JSON, artifact files, or the node
//! - [`scheduler`] repeats the pipeline on the 12-second slot cadence
//! - [`offline`] captures chain context for disconnected runs

pub mod args;
pub mod builder;
pub mod dispatch;
pub mod fuzz;
pub mod offline;
pub mod resolver;
pub mod scheduler;
