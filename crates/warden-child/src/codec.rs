use std::io::{self, Write};

use serde::{de::DeserializeOwned, Serialize};

use crate::ChildError;

/// Reads one newline-framed JSON value from stdin.
///
/// Returns `Ok(None)` on EOF, which is the host's way of telling the child to
/// finish up. Blank lines are skipped.
///
/// The global stdin handle is locked only for the duration of each line read,
/// so a service may call [`recv`] (through [`crate::call`]) while the
/// [`crate::Server`] loop is between frames.
pub fn recv<T: DeserializeOwned>() -> Result<Option<T>, ChildError> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = io::stdin().read_line(&mut line).map_err(ChildError::Read)?;
        if read == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(&line).map(Some).map_err(ChildError::from);
    }
}

/// Writes `value` to stdout as one newline-framed JSON value and flushes.
pub fn send<T: Serialize + ?Sized>(value: &T) -> Result<(), ChildError> {
    let mut frame = serde_json::to_vec(value)?;
    frame.push(b'\n');
    let mut stdout = io::stdout().lock();
    stdout.write_all(&frame).map_err(ChildError::Write)?;
    stdout.flush().map_err(ChildError::Write)
}
