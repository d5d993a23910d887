//! Basic content-security policy.
//!
//! Rejects blank, oversize and control-character content plus obvious script
//! injection, HTML-escapes what it accepts, and writes audit events to the
//! `audit` tracing target.

use async_trait::async_trait;

use crate::domain::{AuditEvent, ContentSecurity, SecurityViolation};

const SUSPICIOUS_PATTERNS: [&str; 4] = ["<script", "javascript:", "onerror=", "onload="];

pub struct BasicContentSecurity {
    max_length: usize,
}

impl BasicContentSecurity {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

#[async_trait]
impl ContentSecurity for BasicContentSecurity {
    fn validate(&self, content: &str) -> Result<(), SecurityViolation> {
        if content.trim().is_empty() {
            return Err(SecurityViolation::Empty);
        }
        if content.chars().count() > self.max_length {
            return Err(SecurityViolation::TooLong {
                max: self.max_length,
            });
        }
        if content
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Err(SecurityViolation::ForbiddenCharacters);
        }
        let lowered = content.to_lowercase();
        if let Some(pattern) = SUSPICIOUS_PATTERNS.iter().find(|p| lowered.contains(*p)) {
            return Err(SecurityViolation::Suspicious(format!(
                "contains '{}'",
                pattern
            )));
        }
        Ok(())
    }

    fn sanitize(&self, content: &str) -> String {
        let mut sanitized = String::with_capacity(content.len());
        for c in content.trim().chars() {
            match c {
                '<' => sanitized.push_str("&lt;"),
                '>' => sanitized.push_str("&gt;"),
                '&' => sanitized.push_str("&amp;"),
                '"' => sanitized.push_str("&quot;"),
                '\'' => sanitized.push_str("&#x27;"),
                '\r' => {}
                c => sanitized.push(c),
            }
        }
        sanitized
    }

    async fn audit(&self, event: AuditEvent) {
        match event {
            AuditEvent::MessageAccepted {
                user_id,
                session_id,
                length,
            } => tracing::info!(
                target: "audit",
                user_id = %user_id,
                session_id = %session_id,
                length,
                "message accepted"
            ),
            AuditEvent::MessageRejected { user_id, reason } => tracing::warn!(
                target: "audit",
                user_id = %user_id,
                reason = %reason,
                "message rejected"
            ),
            AuditEvent::RateLimited { user_id, action } => tracing::warn!(
                target: "audit",
                user_id = %user_id,
                action = %action,
                "rate limited"
            ),
            AuditEvent::SessionCreated {
                user_id,
                session_id,
            } => tracing::info!(
                target: "audit",
                user_id = %user_id,
                session_id = %session_id,
                "session created"
            ),
            AuditEvent::SessionDeleted {
                user_id,
                session_id,
            } => tracing::info!(
                target: "audit",
                user_id = %user_id,
                session_id = %session_id,
                "session deleted"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_plain_text() {
        // テスト項目: 通常のテキストは受け付けられる
        let security = BasicContentSecurity::new(100);
        assert_eq!(security.validate("Hello,\nwe need a quote for Q3."), Ok(()));
    }

    #[test]
    fn test_validate_rejects_policy_violations() {
        // テスト項目: 空・長すぎる・制御文字・スクリプトを含む内容は拒否される
        let security = BasicContentSecurity::new(10);

        assert_eq!(security.validate("  "), Err(SecurityViolation::Empty));
        assert_eq!(
            security.validate("01234567890"),
            Err(SecurityViolation::TooLong { max: 10 })
        );
        assert_eq!(
            security.validate("a\u{0}b"),
            Err(SecurityViolation::ForbiddenCharacters)
        );
        assert!(matches!(
            security.validate("<SCRIPT>"),
            Err(SecurityViolation::Suspicious(_))
        ));
    }

    #[test]
    fn test_sanitize_escapes_markup_and_trims() {
        // テスト項目: HTML 特殊文字がエスケープされ、前後の空白が除去される
        let security = BasicContentSecurity::new(100);

        let sanitized = security.sanitize("  <b>Tom & \"Jerry\"</b>\r\n");

        assert_eq!(sanitized, "&lt;b&gt;Tom &amp; &quot;Jerry&quot;&lt;/b&gt;");
    }
}
