//! Poke core library: command registry, request authentication, listeners,
//! the dispatcher and process executors used by the `poke-server` binary.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod listener;
pub mod logging;
pub mod request;
pub mod server;
