//! Outbound message security policy.
//!
//! Three modes, one active per configured client:
//! - `None`: messages pass untouched.
//! - `Signature`: stamps `timestamp` and
//!   `sign = base64(HMAC-SHA256(key = secret, msg = "{timestamp}\n{secret}"))`.
//! - `Keyword`: the message text must contain one of the configured keywords.
//!
//! Inbound callbacks are verified with a different construction:
//! `HMAC-SHA256(key = "{timestamp}\n{secret}", msg = body)`, within a
//! 300 second replay window.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::error::{NotifyError, NotifyResult};
use crate::message::OutboundMessage;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 tag length.
const SIGNATURE_BYTES: usize = 32;

/// Maximum age (either direction) of an inbound callback timestamp.
pub const REPLAY_WINDOW_SECONDS: i64 = 300;

/// Enforcement policy applied to every outbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SecurityMode {
    #[default]
    None,
    Signature,
    Keyword,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::None => "none",
            SecurityMode::Signature => "signature",
            SecurityMode::Keyword => "keyword",
        }
    }
}

impl FromStr for SecurityMode {
    type Err = NotifyError;

    fn from_str(s: &str) -> NotifyResult<Self> {
        match s {
            "none" | "" => Ok(SecurityMode::None),
            "signature" => Ok(SecurityMode::Signature),
            "keyword" => Ok(SecurityMode::Keyword),
            other => Err(NotifyError::UnsupportedSecurityType(other.to_string())),
        }
    }
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable security state for one configured client.
///
/// Reconfiguration builds a new manager; an existing one is never mutated.
pub struct SecurityManager {
    mode: SecurityMode,
    secret: Option<Zeroizing<String>>,
    keywords: Vec<String>,
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityManager")
            .field("mode", &self.mode)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("keywords", &self.keywords)
            .finish()
    }
}

impl SecurityManager {
    /// Build a manager. Empty secrets and blank keywords are dropped;
    /// use [`SecurityManager::validate`] to enforce the mode invariants.
    pub fn new(mode: SecurityMode, secret: Option<String>, keywords: Vec<String>) -> Self {
        Self {
            mode,
            secret: secret.filter(|s| !s.is_empty()).map(Zeroizing::new),
            keywords: keywords.into_iter().filter(|k| !k.is_empty()).collect(),
        }
    }

    /// A manager that lets everything through.
    pub fn none() -> Self {
        Self::new(SecurityMode::None, None, Vec::new())
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Check the configuration-time invariants for the active mode.
    pub fn validate(&self) -> NotifyResult<()> {
        match self.mode {
            SecurityMode::None => Ok(()),
            SecurityMode::Signature => self.secret().map(|_| ()),
            SecurityMode::Keyword => self.require_keywords(),
        }
    }

    /// Apply the policy to an outbound message at the current time.
    pub fn apply(&self, message: &mut OutboundMessage) -> NotifyResult<()> {
        self.apply_at(message, chrono::Utc::now().timestamp())
    }

    /// Apply the policy with an explicit clock reading (Unix seconds).
    pub fn apply_at(&self, message: &mut OutboundMessage, now: i64) -> NotifyResult<()> {
        match self.mode {
            SecurityMode::None => Ok(()),
            SecurityMode::Signature => {
                let sign = sign_outbound(self.secret()?, now)?;
                message.stamp(now, sign);
                tracing::debug!(timestamp = now, "outbound message signed");
                Ok(())
            }
            SecurityMode::Keyword => self.check_keywords(message),
        }
    }

    /// Verify a signed inbound callback at the current time.
    ///
    /// A no-op unless the mode is `Signature`.
    pub fn verify_inbound(&self, timestamp: &str, signature: &str, body: &[u8]) -> NotifyResult<()> {
        self.verify_inbound_at(timestamp, signature, body, chrono::Utc::now().timestamp())
    }

    /// Verify a signed inbound callback with an explicit clock reading.
    pub fn verify_inbound_at(
        &self,
        timestamp: &str,
        signature: &str,
        body: &[u8],
        now: i64,
    ) -> NotifyResult<()> {
        if self.mode != SecurityMode::Signature {
            return Ok(());
        }
        let secret = self.secret()?;

        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| NotifyError::MalformedTimestamp(timestamp.to_string()))?;
        if now.abs_diff(ts) > REPLAY_WINDOW_SECONDS as u64 {
            tracing::warn!(timestamp = ts, now, "inbound callback outside replay window");
            return Err(NotifyError::TimestampOutOfWindow {
                timestamp: ts,
                window_secs: REPLAY_WINDOW_SECONDS,
            });
        }

        // An undecodable signature still runs the MAC, against a zeroed tag.
        let provided = BASE64.decode(signature.trim()).ok();
        let candidate = provided.as_deref().unwrap_or(&[0u8; SIGNATURE_BYTES]);

        // Keyed by the raw timestamp string as received, not the reparsed value.
        let key = Zeroizing::new(format!("{}\n{}", timestamp, secret));
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| NotifyError::Serialization(e.to_string()))?;
        mac.update(body);
        let matched = mac.verify_slice(candidate).is_ok();

        if matched && provided.is_some() {
            Ok(())
        } else {
            tracing::warn!(timestamp = ts, "inbound callback signature mismatch");
            Err(NotifyError::SignatureMismatch)
        }
    }

    fn secret(&self) -> NotifyResult<&str> {
        self.secret
            .as_ref()
            .map(|s| s.as_str())
            .ok_or(NotifyError::SecretNotConfigured)
    }

    fn require_keywords(&self) -> NotifyResult<()> {
        if self.keywords.is_empty() {
            Err(NotifyError::KeywordsNotConfigured)
        } else {
            Ok(())
        }
    }

    fn check_keywords(&self, message: &OutboundMessage) -> NotifyResult<()> {
        self.require_keywords()?;
        let text = message
            .content()
            .representative_text()
            .ok_or_else(|| NotifyError::NoTextContent {
                msg_type: message.kind().to_string(),
            })?;

        if self.keywords.iter().any(|k| text.contains(k.as_str())) {
            Ok(())
        } else {
            tracing::debug!(msg_type = %message.kind(), "message lacks every configured keyword");
            Err(NotifyError::KeywordMissing {
                keywords: self.keywords.clone(),
            })
        }
    }
}

/// Outbound signature: HMAC-SHA256 keyed by the secret over
/// `"{timestamp}\n{secret}"`, base64 encoded.
pub fn sign_outbound(secret: &str, timestamp: i64) -> NotifyResult<String> {
    let string_to_sign = Zeroizing::new(format!("{}\n{}", timestamp, secret));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Serialization(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Inbound signature over a callback body, as the sender computes it.
pub fn sign_inbound(secret: &str, timestamp: &str, body: &[u8]) -> NotifyResult<String> {
    let key = Zeroizing::new(format!("{}\n{}", timestamp, secret));
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| NotifyError::Serialization(e.to_string()))?;
    mac.update(body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn text(body: &str) -> OutboundMessage {
        OutboundMessage::new(MessageContent::text(body).unwrap())
    }

    fn signature_manager(secret: &str) -> SecurityManager {
        SecurityManager::new(SecurityMode::Signature, Some(secret.into()), vec![])
    }

    fn keyword_manager(keywords: &[&str]) -> SecurityManager {
        SecurityManager::new(
            SecurityMode::Keyword,
            None,
            keywords.iter().map(|k| k.to_string()).collect(),
        )
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("none".parse::<SecurityMode>().unwrap(), SecurityMode::None);
        assert_eq!("signature".parse::<SecurityMode>().unwrap(), SecurityMode::Signature);
        assert_eq!("keyword".parse::<SecurityMode>().unwrap(), SecurityMode::Keyword);
        let err = "hmac".parse::<SecurityMode>().unwrap_err();
        assert_eq!(err, NotifyError::UnsupportedSecurityType("hmac".into()));
        assert!(err.to_string().contains("unsupported security type"));
    }

    #[test]
    fn test_none_mode_is_noop() {
        let manager = SecurityManager::none();
        let mut msg = text("hello");
        let before = msg.clone();
        manager.apply_at(&mut msg, NOW).unwrap();
        assert_eq!(msg, before);
    }

    #[test]
    fn test_signature_is_deterministic_for_fixed_inputs() {
        let a = sign_outbound("abc", NOW).unwrap();
        let b = sign_outbound("abc", NOW).unwrap();
        assert_eq!(a, b);
        // 32-byte digest encodes to 44 base64 characters.
        assert_eq!(a.len(), 44);
        assert_eq!(BASE64.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_signature_changes_every_second() {
        assert_ne!(sign_outbound("abc", NOW).unwrap(), sign_outbound("abc", NOW + 1).unwrap());
        assert_ne!(sign_outbound("abc", NOW).unwrap(), sign_outbound("abd", NOW).unwrap());
    }

    #[test]
    fn test_signature_mode_matches_reference_construction() {
        let manager = signature_manager("abc");
        let mut msg = text("hi");
        manager.apply_at(&mut msg, NOW).unwrap();

        let mut mac = HmacSha256::new_from_slice(b"abc").unwrap();
        mac.update(format!("{}\nabc", NOW).as_bytes());
        let expected = BASE64.encode(mac.finalize().into_bytes());

        assert_eq!(msg.timestamp(), Some(NOW));
        assert_eq!(msg.sign(), Some(expected.as_str()));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["timestamp"], json!(NOW));
        assert_eq!(value["sign"], json!(expected));
    }

    #[test]
    fn test_signature_mode_requires_secret() {
        let manager = SecurityManager::new(SecurityMode::Signature, Some(String::new()), vec![]);
        assert!(!manager.has_secret());
        assert_eq!(manager.validate().unwrap_err(), NotifyError::SecretNotConfigured);
        let mut msg = text("hi");
        assert_eq!(
            manager.apply_at(&mut msg, NOW).unwrap_err(),
            NotifyError::SecretNotConfigured
        );
        assert!(msg.sign().is_none());
        assert!(msg.timestamp().is_none());
    }

    #[test]
    fn test_keyword_mode_substring_match() {
        let manager = keyword_manager(&["维护", "告警"]);
        let mut msg = text("系统维护通知");
        manager.apply_at(&mut msg, NOW).unwrap();
        assert!(msg.sign().is_none());
        assert!(msg.timestamp().is_none());
    }

    #[test]
    fn test_keyword_mode_rejects_listing_all_keywords() {
        let manager = keyword_manager(&["维护", "告警"]);
        let mut msg = text("hello");
        let err = manager.apply_at(&mut msg, NOW).unwrap_err();
        assert_eq!(
            err,
            NotifyError::KeywordMissing {
                keywords: vec!["维护".into(), "告警".into()]
            }
        );
    }

    #[test]
    fn test_keyword_match_is_case_sensitive() {
        let manager = keyword_manager(&["Deploy"]);
        assert!(manager.apply_at(&mut text("deploy finished"), NOW).is_err());
        assert!(manager.apply_at(&mut text("Deploy finished"), NOW).is_ok());
    }

    #[test]
    fn test_keyword_mode_without_text_content() {
        let manager = keyword_manager(&["维护"]);
        let mut msg = OutboundMessage::new(MessageContent::image("img_v2_1").unwrap());
        let err = manager.apply_at(&mut msg, NOW).unwrap_err();
        assert_eq!(err, NotifyError::NoTextContent { msg_type: "image".into() });
    }

    #[test]
    fn test_keyword_mode_requires_keywords() {
        let manager = SecurityManager::new(SecurityMode::Keyword, None, vec![String::new()]);
        assert_eq!(manager.validate().unwrap_err(), NotifyError::KeywordsNotConfigured);
        assert_eq!(
            manager.apply_at(&mut text("anything"), NOW).unwrap_err(),
            NotifyError::KeywordsNotConfigured
        );
    }

    #[test]
    fn test_keyword_mode_checks_post_title() {
        let manager = keyword_manager(&["报告"]);
        let content = MessageContent::post(Some("数据报告".into()), json!([[{"tag": "text", "text": "x"}]]))
            .unwrap();
        let mut msg = OutboundMessage::new(content);
        assert!(manager.apply_at(&mut msg, NOW).is_ok());
    }

    #[test]
    fn test_verify_inbound_accepts_valid_signature() {
        let manager = signature_manager("abc");
        let ts = NOW.to_string();
        let body = br#"{"event":"callback"}"#;
        let sig = sign_inbound("abc", &ts, body).unwrap();
        manager.verify_inbound_at(&ts, &sig, body, NOW + 10).unwrap();
    }

    #[test]
    fn test_verify_inbound_rejects_each_altered_input() {
        let manager = signature_manager("abc");
        let ts = NOW.to_string();
        let body = br#"{"event":"callback"}"#;
        let sig = sign_inbound("abc", &ts, body).unwrap();

        let other_ts = (NOW + 1).to_string();
        assert_eq!(
            manager.verify_inbound_at(&other_ts, &sig, body, NOW).unwrap_err(),
            NotifyError::SignatureMismatch
        );

        let other_sig = sign_inbound("abc", &ts, b"other").unwrap();
        assert_eq!(
            manager.verify_inbound_at(&ts, &other_sig, body, NOW).unwrap_err(),
            NotifyError::SignatureMismatch
        );

        assert_eq!(
            manager.verify_inbound_at(&ts, &sig, b"tampered", NOW).unwrap_err(),
            NotifyError::SignatureMismatch
        );

        let wrong_secret = signature_manager("abd");
        assert_eq!(
            wrong_secret.verify_inbound_at(&ts, &sig, body, NOW).unwrap_err(),
            NotifyError::SignatureMismatch
        );
    }

    #[test]
    fn test_verify_inbound_replay_window() {
        let manager = signature_manager("abc");
        let ts = NOW.to_string();
        let body = b"payload";
        let sig = sign_inbound("abc", &ts, body).unwrap();

        assert!(manager.verify_inbound_at(&ts, &sig, body, NOW + 300).is_ok());
        assert_eq!(
            manager.verify_inbound_at(&ts, &sig, body, NOW + 301).unwrap_err(),
            NotifyError::TimestampOutOfWindow {
                timestamp: NOW,
                window_secs: REPLAY_WINDOW_SECONDS
            }
        );
        assert!(matches!(
            manager.verify_inbound_at(&ts, &sig, body, NOW - 301).unwrap_err(),
            NotifyError::TimestampOutOfWindow { .. }
        ));
    }

    #[test]
    fn test_verify_inbound_malformed_inputs() {
        let manager = signature_manager("abc");
        assert_eq!(
            manager.verify_inbound_at("yesterday", "c2ln", b"", NOW).unwrap_err(),
            NotifyError::MalformedTimestamp("yesterday".into())
        );
        assert_eq!(
            manager
                .verify_inbound_at(&NOW.to_string(), "%%not-base64%%", b"", NOW)
                .unwrap_err(),
            NotifyError::SignatureMismatch
        );
    }

    #[test]
    fn test_verify_inbound_undecodable_and_zeroed_signatures_mismatch() {
        let manager = signature_manager("abc");
        let ts = NOW.to_string();
        let zeroed = BASE64.encode([0u8; SIGNATURE_BYTES]);
        for signature in ["%%not-base64%%", "", zeroed.as_str(), "c2hvcnQ="] {
            assert_eq!(
                manager.verify_inbound_at(&ts, signature, b"payload", NOW).unwrap_err(),
                NotifyError::SignatureMismatch,
                "signature {signature:?}"
            );
        }
    }

    #[test]
    fn test_verify_inbound_skipped_outside_signature_mode() {
        assert!(SecurityManager::none()
            .verify_inbound_at("garbage", "garbage", b"", NOW)
            .is_ok());
        assert!(keyword_manager(&["x"])
            .verify_inbound_at("garbage", "garbage", b"", NOW)
            .is_ok());
    }

    #[test]
    fn test_verify_inbound_requires_secret() {
        let manager = SecurityManager::new(SecurityMode::Signature, None, vec![]);
        assert_eq!(
            manager.verify_inbound_at(&NOW.to_string(), "x", b"", NOW).unwrap_err(),
            NotifyError::SecretNotConfigured
        );
    }

    #[test]
    fn test_outbound_and_inbound_constructions_differ() {
        let ts = NOW.to_string();
        assert_ne!(
            sign_outbound("abc", NOW).unwrap(),
            sign_inbound("abc", &ts, b"").unwrap()
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let manager = signature_manager("super-private-value");
        let debug = format!("{:?}", manager);
        assert!(!debug.contains("super-private-value"));
        assert!(debug.contains("redacted"));
    }
}
