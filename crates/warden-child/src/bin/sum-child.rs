//! Keeps a running total on the host: `sum(x)` reads the stored total via a
//! `get` callback, adds `x`, stores it back via `set` and returns it.

use serde_json::{json, Value};
use warden_child::{call, ChildError, Server, ServiceError};

fn sum(args: &[Value]) -> Result<Value, ServiceError> {
    let increment = args
        .first()
        .and_then(Value::as_f64)
        .ok_or_else(|| ServiceError::new("sum takes one numeric argument"))?;
    let current = call("get", vec![json!("sum")])?.as_f64().unwrap_or(0.0);
    let total = current + increment;
    call("set", vec![json!("sum"), json!(total)])?;
    Ok(json!(total))
}

fn main() -> Result<(), ChildError> {
    Server::new().register("sum", sum).run()
}
