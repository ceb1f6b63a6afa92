//! Classification of routine shutdown conditions
//!
//! Clients routinely disconnect, idle out or reset streams. Those outcomes
//! are not failures of the server and are kept out of warn-level logs. All
//! matching lives here; the checks look at quinn's structured error codes
//! carried inside `io::Error`, never at message text.
//!
//! A close with application code 0 is treated as benign. Peers that use a
//! different convention for a graceful close will show up as warnings.

use std::io;

use quinn::{ConnectionError, ReadError, VarInt, WriteError};

/// Relay-level I/O error that represents an expected end of the relay.
pub fn is_benign_io(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::TimedOut => return true,
        _ => {}
    }

    let Some(inner) = err.get_ref() else {
        return false;
    };
    if let Some(e) = inner.downcast_ref::<ReadError>() {
        return match e {
            ReadError::Reset(code) => is_zero(*code),
            ReadError::ConnectionLost(e) => is_benign_close(e),
            _ => false,
        };
    }
    if let Some(e) = inner.downcast_ref::<WriteError>() {
        return match e {
            WriteError::Stopped(code) => is_zero(*code),
            WriteError::ConnectionLost(e) => is_benign_close(e),
            _ => false,
        };
    }
    if let Some(e) = inner.downcast_ref::<ConnectionError>() {
        return is_benign_close(e);
    }
    false
}

/// Connection-level termination that should not be reported as an error:
/// idle timeout, a close we initiated, or an application close with code 0.
pub fn is_benign_close(err: &ConnectionError) -> bool {
    match err {
        ConnectionError::TimedOut | ConnectionError::LocallyClosed => true,
        ConnectionError::ApplicationClosed(close) => is_zero(close.error_code),
        _ => false,
    }
}

fn is_zero(code: VarInt) -> bool {
    code.into_inner() == 0
}
