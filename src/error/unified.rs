//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Media,
    Negotiation,
    Network,
    Server,
    Api,
    Protocol,
    Transport,
    Configuration,
    Serialization,
}

/// Suggested recovery action, shown next to a session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    CheckCredentials,
    GrantMicrophoneAccess,
    CheckConfiguration,
    RetryLater,
    ContactSupport,
}
