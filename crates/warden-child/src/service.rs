use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
};

use serde_json::Value;
use thiserror::Error;

use crate::{ChildError, Request, Response};

/// Failure reported by a service function.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ServiceError(String);

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ServiceError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ServiceError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<ChildError> for ServiceError {
    fn from(err: ChildError) -> Self {
        Self(err.to_string())
    }
}

/// A registered service: a fallible function over a JSON argument list.
pub type ServiceFn = Box<dyn Fn(&[Value]) -> Result<Value, ServiceError> + Send + Sync>;

/// A registry of named services.
///
/// Both ends of the protocol own one: the child dispatches the host's
/// requests against its table, and the host dispatches the child's callbacks
/// against its own. [`dispatch`](Self::dispatch) never unwinds: lookup
/// misses, service errors and service panics all become
/// [`Response::error`] frames.
#[derive(Default)]
pub struct ServiceTable {
    services: HashMap<String, ServiceFn>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, service: F)
    where
        F: Fn(&[Value]) -> Result<Value, ServiceError> + Send + Sync + 'static,
    {
        self.services.insert(name.into(), Box::new(service));
    }

    /// Resolves one request into the response frame to send back.
    pub fn dispatch(&self, request: &Request) -> Response {
        let Some(service) = self.services.get(&request.name) else {
            return Response::error(format!("No such service: {}", request.name));
        };
        match catch_unwind(AssertUnwindSafe(|| service(&request.args))) {
            Ok(Ok(value)) => Response::ret(value),
            Ok(Err(err)) => Response::error(err.to_string()),
            Err(panic) => Response::error(panic_message(panic.as_ref())),
        }
    }
}

impl fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ServiceTable")
            .field("services", &names)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "service panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseKind;
    use serde_json::json;

    fn table() -> ServiceTable {
        let mut table = ServiceTable::new();
        table.register("first", |args: &[Value]| {
            args.first()
                .cloned()
                .ok_or_else(|| ServiceError::new("no arguments"))
        });
        table.register("explode", |_: &[Value]| -> Result<Value, ServiceError> {
            panic!("kaboom")
        });
        table
    }

    #[test]
    fn dispatch_returns_service_result() {
        let response = table().dispatch(&Request::new("first", vec![json!("a"), json!("b")]));
        assert_eq!(response, Response::ret(json!("a")));
    }

    #[test]
    fn dispatch_converts_service_errors() {
        let response = table().dispatch(&Request::new("first", vec![]));
        assert_eq!(response, Response::error("no arguments"));
    }

    #[test]
    fn dispatch_contains_panics() {
        let response = table().dispatch(&Request::new("explode", vec![json!(1)]));
        assert_eq!(response.kind, ResponseKind::Error);
        assert_eq!(response.error_message(), "kaboom");
    }

    #[test]
    fn dispatch_names_missing_services() {
        let response = table().dispatch(&Request::new("absent", vec![]));
        assert_eq!(response, Response::error("No such service: absent"));
    }
}
