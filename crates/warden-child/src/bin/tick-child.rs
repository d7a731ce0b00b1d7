//! Echoes messages forever, tagging each with a per-process `t` and a
//! per-message counter `n`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use warden_child::{recv, send, ChildError};

fn main() -> Result<(), ChildError> {
    let tag = run_tag();
    let mut n: u64 = 0;
    while let Some(mut message) = recv::<Map<String, Value>>()? {
        message.insert("returning".to_string(), Value::Bool(true));
        message.insert("n".to_string(), Value::String(n.to_string()));
        message.insert("t".to_string(), Value::String(tag.clone()));
        send(&message)?;
        n += 1;
    }
    Ok(())
}

fn run_tag() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or(0);
    format!("{}-{nanos}", std::process::id())
}
