//! Basic type definitions for the chat server
//!
//! Provides the `SessionId` newtype and the reserved identities used when
//! the server speaks on its own behalf.

use uuid::Uuid;

/// Sender identity attached to notices generated by the server itself
pub const SYSTEM_USERID: &str = "system";

/// Identity used for messages from a connection that has not logged in
pub const ANONYMOUS_USERID: &str = "unknown";

/// Unique session identifier (newtype pattern)
///
/// Issued once per accepted connection. Distinguishes two connections that
/// claim the same userid, so a stale leave can never evict the wrong one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_display_is_uuid() {
        let id = SessionId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
