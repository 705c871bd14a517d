//! Transient failure classification
//!
//! Deliberately heuristic: a false positive only costs a retry of a
//! connect that must be retry-safe anyway, a false negative loses a
//! reconnect that would have worked.

use std::error::Error;

/// Message fragments that mark a failure as connection-related.
pub const CONNECTION_ERROR_KEYWORDS: &[&str] = &[
    "connection",
    "connect",
    "timeout",
    "timed out",
    "refused",
    "reset",
    "broken pipe",
    "network",
    "socket",
    "server closed",
    "lost connection",
    "server has gone away",
    "communication link",
    "operational error",
    "no route to host",
    "host unreachable",
    "name or service not known",
    "temporary failure",
    "eof detected",
    "ssl error",
    "handshake failure",
    "authentication failed",
    "too many connections",
    "connection pool",
    "pool exhausted",
];

/// Type-name fragments that mark a failure as connection-related.
const TYPE_NAME_KEYWORDS: &[&str] = &["connection", "network", "timeout", "operational"];

/// Returns true if `err` looks like a connection-level failure worth retrying.
///
/// Checks the error's own type name, then the message of the error and of
/// every error in its `source()` chain, case-insensitively.
pub fn is_transient<E>(err: &E) -> bool
where
    E: Error + ?Sized,
{
    let type_name = short_type_name::<E>().to_lowercase();
    if TYPE_NAME_KEYWORDS.iter().any(|kw| type_name.contains(kw)) {
        return true;
    }

    if message_matches(&err.to_string()) {
        return true;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if message_matches(&cause.to_string()) {
            return true;
        }
        source = cause.source();
    }
    false
}

fn message_matches(message: &str) -> bool {
    let message = message.to_lowercase();
    CONNECTION_ERROR_KEYWORDS
        .iter()
        .any(|kw| message.contains(kw))
}

/// Last path segment of a type name, without generic arguments.
pub(super) fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
