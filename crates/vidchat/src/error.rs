// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced by the messaging client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotConnected,
    NotLoggedIn,
    Encode,
    RequestFailed,
    Rejected,
    Storage,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::Encode => "ENCODE",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::Rejected => "REJECTED",
            Self::Storage => "STORAGE",
        }
    }

    /// Whether retrying the same call later may succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::RequestFailed)
    }

    pub fn to_error(&self, message: impl Into<String>) -> ChatError {
        ChatError { code: *self, message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error with machine-readable code and human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ChatError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
