//! Static bearer-token validation.
//!
//! Tokens are configured up front as `token=user[:role]` entries; this stands
//! in for the external identity service, which only needs to validate.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{AuthContext, AuthError, TokenValidator, UserId};

const DEFAULT_ROLE: &str = "client";

#[derive(Debug, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, AuthContext>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user
    pub fn with_token(mut self, token: impl Into<String>, context: AuthContext) -> Self {
        self.tokens.insert(token.into(), context);
        self
    }

    /// Build from `token=user[:role]` specs; malformed entries are skipped with a warning
    pub fn from_specs<I, S>(specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut validator = Self::new();
        for spec in specs {
            let spec = spec.as_ref();
            match parse_spec(spec) {
                Some((token, context)) => {
                    validator.tokens.insert(token, context);
                }
                None => tracing::warn!("Ignoring malformed auth token spec '{}'", spec),
            }
        }
        validator
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn parse_spec(spec: &str) -> Option<(String, AuthContext)> {
    let (token, identity) = spec.split_once('=')?;
    let (user, role) = identity.split_once(':').unwrap_or((identity, DEFAULT_ROLE));
    if token.is_empty() {
        return None;
    }
    let user_id = UserId::new(user.to_string()).ok()?;
    let permissions = match role {
        "admin" => vec!["*".to_string()],
        _ => vec!["chat:read".to_string(), "chat:write".to_string()],
    };
    Some((
        token.to_string(),
        AuthContext {
            user_id,
            role: role.to_string(),
            permissions,
        },
    ))
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_known_token() {
        // テスト項目: 登録済みトークンはユーザーコンテキストに解決される
        // given (前提条件):
        let validator = StaticTokenValidator::from_specs(["t-alice=alice", "t-root=root:admin"]);

        // when (操作):
        let alice = validator.validate("t-alice").await.unwrap();
        let root = validator.validate("t-root").await.unwrap();

        // then (期待する結果):
        assert_eq!(alice.user_id.as_str(), "alice");
        assert_eq!(alice.role, "client");
        assert!(alice.has_permission("chat:write"));
        assert_eq!(root.role, "admin");
        assert!(root.has_permission("anything"));
    }

    #[tokio::test]
    async fn test_validate_rejects_unknown_and_empty_tokens() {
        // テスト項目: 未登録・空のトークンは拒否される
        let validator = StaticTokenValidator::from_specs(["t-alice=alice"]);

        assert_eq!(validator.validate("nope").await, Err(AuthError::InvalidToken));
        assert_eq!(validator.validate("  ").await, Err(AuthError::MissingToken));
    }

    #[test]
    fn test_malformed_specs_are_skipped() {
        // テスト項目: 不正な形式の指定は無視される
        let validator = StaticTokenValidator::from_specs(["no-equals", "=alice", "t=bad user"]);
        assert!(validator.is_empty());
    }
}
