use thiserror::Error;

/// Where in the send path a failure happened.
///
/// Callers use this to pick a remediation: fix the arguments, fix the
/// security configuration, or look at the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Bad or missing arguments; nothing reached the network.
    Validation,
    /// The security manager refused the message.
    Policy,
    /// The webhook answered with a non-zero code or an unusable body.
    Remote,
    /// The webhook could not be reached (connect, DNS, timeout, i/o).
    Transport,
    /// An inbound signed callback failed verification.
    Verification,
    /// Serialization or other local faults.
    Internal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Validation => "validation",
            FailureClass::Policy => "policy",
            FailureClass::Remote => "remote",
            FailureClass::Transport => "transport",
            FailureClass::Verification => "verification",
            FailureClass::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for the feishu-notify crate.
///
/// Display strings never contain the signing secret or the webhook token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    // -- Local validation --
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -- Security policy --
    #[error("unsupported security type: {0}")]
    UnsupportedSecurityType(String),

    #[error("secret not configured")]
    SecretNotConfigured,

    #[error("keyword list is empty")]
    KeywordsNotConfigured,

    #[error("unable to extract text content from {msg_type} message")]
    NoTextContent { msg_type: String },

    #[error("message must contain one of the keywords: {}", .keywords.join(", "))]
    KeywordMissing { keywords: Vec<String> },

    // -- Inbound verification --
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("timestamp {timestamp} outside the {window_secs}s window")]
    TimestampOutOfWindow { timestamp: i64, window_secs: i64 },

    #[error("signature mismatch")]
    SignatureMismatch,

    // -- Remote side --
    #[error("remote error: code={code}, msg={message}")]
    Remote { code: i64, message: String },

    #[error("invalid webhook response: {0}")]
    InvalidResponse(String),

    // -- Transport --
    #[error("transport error: {0}")]
    Transport(String),

    // -- Local faults --
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NotifyError {
    /// Classify this error into one of the send-path failure classes.
    pub fn class(&self) -> FailureClass {
        match self {
            NotifyError::InvalidArgument(_) => FailureClass::Validation,
            NotifyError::UnsupportedSecurityType(_)
            | NotifyError::SecretNotConfigured
            | NotifyError::KeywordsNotConfigured
            | NotifyError::NoTextContent { .. }
            | NotifyError::KeywordMissing { .. } => FailureClass::Policy,
            NotifyError::MalformedTimestamp(_)
            | NotifyError::TimestampOutOfWindow { .. }
            | NotifyError::SignatureMismatch => FailureClass::Verification,
            NotifyError::Remote { .. } | NotifyError::InvalidResponse(_) => FailureClass::Remote,
            NotifyError::Transport(_) => FailureClass::Transport,
            NotifyError::Serialization(_) => FailureClass::Internal,
        }
    }

    /// Remote status code, when the failure came back from the webhook.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            NotifyError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(e: serde_json::Error) -> Self {
        NotifyError::Serialization(e.to_string())
    }
}

/// Result type alias for feishu-notify operations.
pub type NotifyResult<T> = Result<T, NotifyError>;
