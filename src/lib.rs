//! Extension host runtime
//!
//! Loads extensions from their manifests, activates them lazily on events,
//! keeps an in-memory mirror of the shell's open documents and dispatches
//! language-feature requests to the providers extensions register. The
//! shell talks to the host over framed JSON-RPC; see [`host`].

pub mod commands;
pub mod config;
pub mod daemon;
pub mod disposable;
pub mod documents;
pub mod extensions;
pub mod host;
pub mod io;
pub mod logging;
pub mod model;
pub mod registry;
pub mod rpc;
pub mod views;

#[cfg(test)]
pub mod test_utils;
