// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed error surface for the chat core, mapped to the wire
//! `error{code, message}` envelope sent to clients.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error kinds produced by the core. Each maps to a stable wire `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatError {
    TokenExpired,
    InvalidToken,
    InvalidSession,
    UserNotFound,
    Unauthorized,
    AccessDenied,
    RateLimited,
    InvalidInput,
    NotFound,
    LoadError,
    PersistFailed,
    AiError,
    Internal,
}

impl ChatError {
    /// Stable machine-readable code used on the wire and in tests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::InvalidSession => "INVALID_SESSION",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidInput => "MESSAGE_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::LoadError => "LOAD_ERROR",
            Self::PersistFailed => "PERSIST_FAILED",
            Self::AiError => "AI_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether this error kind terminates the session (fatal auth failures).
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::InvalidToken | Self::InvalidSession | Self::UserNotFound
        )
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ChatError {}

/// Wire-format error body sent in the `error` outbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub type ChatResult<T> = Result<T, ChatError>;
