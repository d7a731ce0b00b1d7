use serde_json::Value;

use crate::{
    codec::{recv, send},
    ChildError, Request, Response, ResponseKind, ServiceError, ServiceTable,
};

/// The child-side dispatch loop.
///
/// Reads one [`Request`] per line from stdin, resolves it against the
/// registered services and writes exactly one [`Response`] per request. The
/// loop ends cleanly when the host closes stdin; a line that fails to decode
/// produces an error response and the loop continues.
pub struct Server {
    services: ServiceTable,
}

impl Server {
    pub fn new() -> Self {
        Self {
            services: ServiceTable::new(),
        }
    }

    /// Registers a service, consuming and returning the server for chaining.
    pub fn register<F>(mut self, name: impl Into<String>, service: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ServiceError> + Send + Sync + 'static,
    {
        self.services.register(name, service);
        self
    }

    /// Runs the dispatch loop until stdin reaches EOF.
    ///
    /// Only EOF ends the loop. Any failure to decode a request — a line that
    /// is not JSON, or bytes that are not UTF-8 (which surface as a read
    /// error rather than a parse error) — is answered with an error response
    /// and the loop continues.
    pub fn run(self) -> Result<(), ChildError> {
        loop {
            let response = match recv::<Request>() {
                Ok(Some(request)) => self.services.dispatch(&request),
                Ok(None) => return Ok(()),
                Err(err) if !matches!(err, ChildError::EndOfStream) => {
                    Response::error(format!("malformed request: {err}"))
                }
                Err(err) => return Err(err),
            };
            send(&response)?;
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Invokes a service registered on the host, from inside a child service.
///
/// Emits a callback response on stdout and blocks until the host's reply
/// arrives on stdin. Callbacks are strictly nested: the host answers the
/// innermost outstanding callback before anything else, so the next inbound
/// frame is always the reply to this call.
///
/// Must only be used while the [`Server`] loop has a request in flight; the
/// host discards callback frames it is not waiting on.
pub fn call(name: &str, args: Vec<Value>) -> Result<Value, ChildError> {
    send(&Response::callback(Request::new(name, args)))?;
    let Some(response) = recv::<Response>()? else {
        return Err(ChildError::EndOfStream);
    };
    match response.kind {
        ResponseKind::Return => Ok(response.payload),
        ResponseKind::Error => Err(ChildError::Remote(response.error_message())),
        ResponseKind::Callback => Err(ChildError::BadResponseType(response.kind)),
    }
}
