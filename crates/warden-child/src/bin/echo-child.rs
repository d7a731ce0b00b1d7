//! Answers one message: echoes the inbound map with `"returning": true` added.

use serde_json::{Map, Value};
use warden_child::{recv, send, ChildError};

fn main() -> Result<(), ChildError> {
    if let Some(mut message) = recv::<Map<String, Value>>()? {
        message.insert("returning".to_string(), Value::Bool(true));
        send(&message)?;
    }
    Ok(())
}
