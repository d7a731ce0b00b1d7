#![forbid(unsafe_code)]
//! Compile-and-run host for untrusted Rust programs, gated by import
//! whitelisting.
//!
//! A [`Compiler`] accepts guest source (a file path or a literal string),
//! parses it with the language's own grammar and rejects any compilation
//! unit that imports a package root outside the allowed set. Vetted sources
//! are handed to the external toolchain (`rustc` by default) and the
//! resulting executable is wrapped in a [`Cmd`]: a lazily spawned, idle
//! reaped child process that the host talks to over newline-framed JSON.
//!
//! ```no_run
//! use serde_json::{json, Value};
//! use warden::Compiler;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), warden::WardenError> {
//! let compiler = Compiler::new();
//! compiler.allow("std");
//! let cmd = compiler.command_file("guest.rs").await?;
//! let reply: Value = cmd.handle(&json!({"yo": "who's in the house?"})).await?;
//! println!("{reply}");
//! # Ok(()) }
//! ```
//!
//! Surfaces:
//! - [`Compiler::check`] audits a source file's imports against the
//!   whitelist, caching verdicts by modification time.
//! - [`Compiler::compile`] / [`Compiler::compile_to`] produce executables at
//!   deterministic temp paths, short-circuiting unchanged sources. Any
//!   toolchain output on stderr *or* stdout fails the build.
//! - [`Compiler::command`] / [`Compiler::command_file`] wrap a compiled
//!   guest in a [`Cmd`] without starting it; [`Compiler::run`] /
//!   [`Compiler::run_file`] also start the child.
//! - [`Cmd::handle`] drives one request/response exchange, spawning or
//!   respawning the child as needed; [`Cmd::call`] layers the named-service
//!   protocol of [`warden_child`] on top, resolving the child's callbacks
//!   against services registered with [`Cmd::register`].
//!
//! The only safety claim is the import gate: a guest that compiles uses no
//! package root outside the whitelist as a direct import. Nothing constrains
//! what whitelisted packages can do at runtime.

mod audit;
mod cmd;
mod compile;
mod error;
mod process;

pub use cmd::{Cmd, StderrSink, DEFAULT_IDLE_TIMEOUT};
pub use compile::Compiler;
pub use error::WardenError;
pub use warden_child::{
    Request, Response, ResponseKind, ServiceError, ServiceFn, ServiceTable, UnknownResponseKind,
};

#[cfg(test)]
mod tests;
