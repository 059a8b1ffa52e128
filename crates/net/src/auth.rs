//! Handshake token verification
//!
//! Issuing tokens is outside this crate; the server only needs to map a
//! presented token to a user id.

use std::collections::HashMap;

use uuid::Uuid;

pub trait Authenticator: Send + Sync {
    /// User id the token belongs to, if it is valid
    fn authenticate(&self, token: &str) -> Option<Uuid>;
}

/// Static token -> user table
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Uuid>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, user_id: Uuid) {
        self.tokens.insert(token.into(), user_id);
    }

    pub fn with(mut self, token: impl Into<String>, user_id: Uuid) -> Self {
        self.insert(token, user_id);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, token: &str) -> Option<Uuid> {
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).copied()
    }
}
