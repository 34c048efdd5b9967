//! Core type definitions: request ids, event keys and connection state.

use std::fmt;

/// Suffix conventionally appended to message-kind names (`UserJoinedDto`).
///
/// Matched after lower-casing, so `Dto`, `DTO` and `dto` are all stripped.
pub const TYPE_SUFFIX: &str = "dto";

/// Map a raw `eventType` to its canonical comparison key.
///
/// The rule, applied in order:
///
/// 1. lower-case the input;
/// 2. strip one trailing [`TYPE_SUFFIX`];
/// 3. drop every character outside `[a-z0-9]`.
///
/// `"UserJoinedDto"`, `"userjoined"` and `"USER_JOINED"` all map to
/// `"userjoined"`. Empty input maps to the empty key.
pub fn normalize(event_type: &str) -> String {
    let lowered = event_type.to_lowercase();
    let stem = lowered.strip_suffix(TYPE_SUFFIX).unwrap_or(&lowered);
    stem.chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Whether two event types name the same kind of message.
pub fn keys_equal(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// A normalized event type, used as the registry and correlation key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey(String);

impl EventKey {
    /// Normalize a raw event type into a key.
    pub fn new(event_type: &str) -> Self {
        Self(normalize(event_type))
    }

    /// Get the normalized string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty key (no routable event type).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `event_type` normalizes to this key.
    pub fn matches(&self, event_type: &str) -> bool {
        normalize(event_type) == self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&String> for EventKey {
    fn from(s: &String) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for request-response correlation.
/// Uses ULID for lexicographically sortable, unique IDs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new unique request ID using ULID.
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Connection state as observed by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in progress or scheduled.
    Connecting,
    /// The socket is open; requests and sends are accepted.
    Open,
    /// A caller-requested close is in progress.
    Closing,
    /// No socket. Either between attempts, or terminal after giving up or `close()`.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is open for traffic.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
