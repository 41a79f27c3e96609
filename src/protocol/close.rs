//! Session close reasons

use std::fmt;

/// Normal completion of both directions
pub const CLOSE_NORMAL: u16 = 1000;
/// No status code was present in the close frame
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Peer broke a protocol rule (e.g. an unparseable key)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Destination unreachable or an I/O failure mid-stream
pub const CLOSE_UNEXPECTED_CONDITION: u16 = 1011;

/// Longest detail that fits in a close frame (125 bytes minus the code)
pub const MAX_CLOSE_DETAIL: usize = 123;

/// Why a session ended, with a human-readable detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Normal(String),
    PolicyViolation(String),
    UnexpectedCondition(String),
    Other { code: u16, detail: String },
}

impl CloseReason {
    pub fn normal(detail: impl Into<String>) -> Self {
        Self::Normal(detail.into())
    }

    pub fn policy_violation(detail: impl Into<String>) -> Self {
        Self::PolicyViolation(detail.into())
    }

    pub fn unexpected(detail: impl Into<String>) -> Self {
        Self::UnexpectedCondition(detail.into())
    }

    /// Connection lost without a closing handshake
    pub fn abnormal(detail: impl Into<String>) -> Self {
        Self::Other {
            code: CLOSE_ABNORMAL,
            detail: detail.into(),
        }
    }

    /// Classify a numeric close code
    pub fn from_code(code: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code {
            CLOSE_NORMAL => Self::Normal(detail),
            CLOSE_POLICY_VIOLATION => Self::PolicyViolation(detail),
            CLOSE_UNEXPECTED_CONDITION => Self::UnexpectedCondition(detail),
            code => Self::Other { code, detail },
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::Normal(_) => CLOSE_NORMAL,
            Self::PolicyViolation(_) => CLOSE_POLICY_VIOLATION,
            Self::UnexpectedCondition(_) => CLOSE_UNEXPECTED_CONDITION,
            Self::Other { code, .. } => *code,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Normal(detail)
            | Self::PolicyViolation(detail)
            | Self::UnexpectedCondition(detail)
            | Self::Other { detail, .. } => detail,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal(_))
    }

    /// Detail cut down to [`MAX_CLOSE_DETAIL`] bytes on a character boundary
    pub fn wire_detail(&self) -> &str {
        let detail = self.detail();
        if detail.len() <= MAX_CLOSE_DETAIL {
            return detail;
        }
        let mut end = MAX_CLOSE_DETAIL;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        &detail[..end]
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Normal(_) => "normal closure",
            Self::PolicyViolation(_) => "policy violation",
            Self::UnexpectedCondition(_) => "unexpected condition",
            Self::Other { .. } => "closed",
        };
        if self.detail().is_empty() {
            write!(f, "{} ({})", kind, self.code())
        } else {
            write!(f, "{} ({}): {}", kind, self.code(), self.detail())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        for reason in [
            CloseReason::normal("Bye"),
            CloseReason::policy_violation("invalid key"),
            CloseReason::unexpected("Could not resolve"),
            CloseReason::abnormal("connection lost"),
        ] {
            let back = CloseReason::from_code(reason.code(), reason.detail());
            assert_eq!(back, reason);
        }

        assert_eq!(
            CloseReason::from_code(4000, "custom"),
            CloseReason::Other {
                code: 4000,
                detail: "custom".to_string()
            }
        );
        assert!(CloseReason::from_code(1000, "").is_normal());
        assert!(!CloseReason::from_code(1001, "going away").is_normal());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CloseReason::policy_violation("invalid key").to_string(),
            "policy violation (1008): invalid key"
        );
        assert_eq!(
            CloseReason::from_code(CLOSE_NO_STATUS, "").to_string(),
            "closed (1005)"
        );
    }

    #[test]
    fn test_wire_detail_truncates_on_char_boundary() {
        let short = CloseReason::unexpected("short");
        assert_eq!(short.wire_detail(), "short");

        // 'é' is two bytes, so 62 of them straddle the 123 byte limit
        let long = CloseReason::unexpected("é".repeat(62));
        let detail = long.wire_detail();
        assert_eq!(detail.len(), 122);
        assert!(detail.chars().all(|c| c == 'é'));
    }
}
