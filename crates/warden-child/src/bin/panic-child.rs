//! Exposes a service that panics, to exercise the dispatch crash guard.

use serde_json::{json, Value};
use warden_child::{ChildError, Server, ServiceError};

fn main() -> Result<(), ChildError> {
    // Panics come back as error responses; keep the default hook quiet.
    std::panic::set_hook(Box::new(|_| {}));
    Server::new()
        .register("boom", |_: &[Value]| -> Result<Value, ServiceError> {
            panic!("boom service blew up")
        })
        .register("ok", |_: &[Value]| Ok(json!("still here")))
        .run()
}
