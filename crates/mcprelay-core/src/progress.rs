//! Progress token - no_std compatible.
//!
//! A progress token correlates streamed `notifications/progress` messages
//! with the request that registered interest in them. Token `0` is a valid,
//! non-sentinel value: implementations must not conflate "no token" with
//! "token present with value 0", so this type is carried as `Option<ProgressToken>`
//! at call sites rather than folding absence into the token itself.

use alloc::string::{String, ToString};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Progress token - can be a string or a number, including zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String token.
    String(String),
    /// Numeric token. `0` is valid and distinct from absence.
    Number(i64),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<String> for ProgressToken {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for ProgressToken {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for ProgressToken {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for ProgressToken {
    fn from(n: i32) -> Self {
        Self::Number(n as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_a_distinct_present_value() {
        let zero: Option<ProgressToken> = Some(0i64.into());
        let absent: Option<ProgressToken> = None;
        assert_ne!(zero, absent);
        assert_eq!(zero, Some(ProgressToken::Number(0)));
    }

    #[test]
    fn round_trips_through_json() {
        let t: ProgressToken = 0i32.into();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "0");
        let back: ProgressToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);

        let s: ProgressToken = "abc".into();
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
