//! Gateway close codes
//!
//! Close codes the gateway sends when it drops a connection, and the policy that
//! decides what a shard does after each one.

use shard_common::ClosePolicyConfig;

/// Normal closure, the only code that tells the gateway a session is finished
pub const NORMAL_CLOSURE: u16 = 1000;

/// Code a shard closes with when it intends to resume (anything but 1000/1001)
pub const RESUME_CLOSURE: u16 = 4901;

/// Gateway WebSocket close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding
    DecodeError = 4002,
    /// Sent payload before Identify
    NotAuthenticated = 4003,
    /// Invalid token provided
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Session is no longer valid
    InvalidSession = 4006,
    /// Invalid sequence number for Resume
    InvalidSequence = 4007,
    /// Too many requests (rate limited)
    RateLimited = 4008,
    /// Session has timed out
    SessionTimeout = 4009,
    /// Invalid shard configuration
    InvalidShard = 4010,
    /// Too many guilds for one shard
    ShardingRequired = 4011,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4006 => Some(Self::InvalidSession),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSession => "Invalid session",
            Self::InvalidSequence => "Invalid sequence number",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::InvalidShard => "Invalid shard configuration",
            Self::ShardingRequired => "Shard would be on too many guilds",
        }
    }

    /// Get the name of this close code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::UnknownError => "UnknownError",
            Self::UnknownOpcode => "UnknownOpcode",
            Self::DecodeError => "DecodeError",
            Self::NotAuthenticated => "NotAuthenticated",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::AlreadyAuthenticated => "AlreadyAuthenticated",
            Self::InvalidSession => "InvalidSession",
            Self::InvalidSequence => "InvalidSequence",
            Self::RateLimited => "RateLimited",
            Self::SessionTimeout => "SessionTimeout",
            Self::InvalidShard => "InvalidShard",
            Self::ShardingRequired => "ShardingRequired",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.as_u16(), self.description())
    }
}

/// What a shard does after its transport closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect with backoff and try to resume the session
    Resume,
    /// Reconnect with backoff, dropping the session and sending IDENTIFY
    Reidentify(ReidentifyReason),
    /// Stop; the shard is not reconnected automatically
    Fatal,
}

/// Why a session had to be dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReidentifyReason {
    /// The gateway rejected or expired the session
    SessionInvalidated,
    /// The gateway rejected the sequence number
    SequenceReset,
}

/// Close-code classification table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePolicy {
    fatal: Vec<u16>,
    session_invalidating: Vec<u16>,
    sequence_reset: Vec<u16>,
}

impl ClosePolicy {
    /// Classify a close; `None` means the transport dropped without a close frame
    #[must_use]
    pub fn classify(&self, code: Option<u16>) -> CloseAction {
        let Some(code) = code else {
            return CloseAction::Resume;
        };

        if self.fatal.contains(&code) {
            CloseAction::Fatal
        } else if self.session_invalidating.contains(&code) {
            CloseAction::Reidentify(ReidentifyReason::SessionInvalidated)
        } else if self.sequence_reset.contains(&code) {
            CloseAction::Reidentify(ReidentifyReason::SequenceReset)
        } else {
            CloseAction::Resume
        }
    }
}

impl Default for ClosePolicy {
    fn default() -> Self {
        Self::from(&ClosePolicyConfig::default())
    }
}

impl From<&ClosePolicyConfig> for ClosePolicy {
    fn from(config: &ClosePolicyConfig) -> Self {
        Self {
            fatal: config.fatal_codes.clone(),
            session_invalidating: config.session_invalidating_codes.clone(),
            sequence_reset: config.sequence_reset_codes.clone(),
        }
    }
}
