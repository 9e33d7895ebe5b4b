//! Runtime for analytics operators: consumes filtered messages from kafka,
//! hands them to a user supplied [`Handler`] and publishes its results.

pub mod app;
pub mod broker;
pub mod config;
pub mod envelope;
pub mod filter;
pub mod handler;
pub mod init_phase;
pub mod join;
pub mod metrics_consts;
pub mod persistence;
pub mod runtime;
pub mod start_time;
pub mod test_utils;
pub mod timestamps;
pub mod training;

pub use handler::{Handler, HandlerOutput, Invocation, OperatorContext};
