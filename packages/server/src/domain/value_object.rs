//! Value objects.
//!
//! Every identifier is validated on construction so the rest of the code can
//! take well-formedness for granted.

use std::fmt;

use uuid::Uuid;

use super::error::ValueObjectError;

/// Upper bound for chat message content, in characters
pub const MAX_MESSAGE_CONTENT_LENGTH: usize = 4000;

const MAX_ID_LENGTH: usize = 128;

fn validate_identifier(value: &str, field: &'static str) -> Result<(), ValueObjectError> {
    if value.is_empty() {
        return Err(ValueObjectError::Empty(field));
    }
    if value.chars().count() > MAX_ID_LENGTH {
        return Err(ValueObjectError::TooLong {
            field,
            max: MAX_ID_LENGTH,
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(ValueObjectError::InvalidCharacters(field));
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap an identifier
            pub fn new(value: String) -> Result<Self, ValueObjectError> {
                validate_identifier(&value, $field)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValueObjectError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Identifier of one live transport connection
    ConnectionId,
    "connection_id"
);

identifier!(
    /// Identifier of an authenticated user, as issued by the token service
    UserId,
    "user_id"
);

identifier!(
    /// Identifier of a chat session
    SessionId,
    "session_id"
);

identifier!(
    /// Identifier of a chat message / frame
    MessageId,
    "message_id"
);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("chat_{}", Uuid::new_v4().simple()))
    }
}

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Chat message text.
///
/// Non-blank and at most [`MAX_MESSAGE_CONTENT_LENGTH`] characters. Content
/// policy (injection, profanity, ...) belongs to the content-security
/// collaborator, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::Empty("content"));
        }
        if value.chars().count() > MAX_MESSAGE_CONTENT_LENGTH {
            return Err(ValueObjectError::TooLong {
                field: "content",
                max: MAX_MESSAGE_CONTENT_LENGTH,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageContent {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Unix timestamp in milliseconds (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Whole seconds since the epoch
    pub fn as_secs(&self) -> i64 {
        self.0.div_euclid(1000)
    }

    pub fn saturating_add_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}
