pub mod artifact;
pub mod cancel;
pub mod command;
pub mod config;
pub mod connection;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod schedule;
pub mod validate;
