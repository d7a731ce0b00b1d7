#![forbid(unsafe_code)]
//! Guest-side support for programs supervised by `warden`.
//!
//! A warden child talks to its host over stdin/stdout using newline-framed
//! JSON. Two levels of protocol are available:
//!
//! - **Raw frames**: [`recv`] and [`send`] move one JSON value per line in
//!   either direction. Suitable for children that define their own message
//!   shapes.
//! - **Services**: [`Server`] runs a dispatch loop over named services
//!   ([`Request`] in, [`Response`] out) and [`call`] lets a service invoke a
//!   service registered on the host side, synchronously, while its own
//!   request is still in flight.
//!
//! ```no_run
//! use serde_json::{json, Value};
//! use warden_child::{call, Server, ServiceError};
//!
//! fn double(args: &[Value]) -> Result<Value, ServiceError> {
//!     let x = args.first().and_then(Value::as_f64)
//!         .ok_or_else(|| ServiceError::new("double takes one number"))?;
//!     let scale = call("scale", vec![])?.as_f64().unwrap_or(2.0);
//!     Ok(json!(x * scale))
//! }
//!
//! fn main() -> Result<(), warden_child::ChildError> {
//!     Server::new().register("double", double).run()
//! }
//! ```
//!
//! The loop exits cleanly on stdin EOF, so hosts stop a child simply by
//! closing its stdin (or by killing it).

mod codec;
mod error;
mod proto;
mod server;
mod service;

pub use codec::{recv, send};
pub use error::ChildError;
pub use proto::{Request, Response, ResponseKind, UnknownResponseKind};
pub use server::{call, Server};
pub use service::{ServiceError, ServiceFn, ServiceTable};
