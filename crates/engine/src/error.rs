//! The module contains the errors the engine can throw.
//!
//! Errors are layered: [`QueryError`] describes a malformed filter expression,
//! [`StoreError`] wraps everything a storage backend can fail with and
//! [`EngineError`] adds the domain rules on top of it.
//!
//! Every layer can tell whether a failure is caused by the caller (bad input,
//! a broken rule) or by the infrastructure, see [`EngineError::is_server_error`].
//!
//!  [`QueryError`]: crate::QueryError
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use thiserror::Error;

use crate::{QueryError, User};

/// Errors thrown by a [`DataBase`](crate::DataBase) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid id {0}")]
    InvalidId(u64),
    #[error("user {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("corrupted record: {0}")]
    Corrupted(String),
    #[error("storage file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl StoreError {
    /// Whether the failure comes from the storage itself rather than from
    /// the request that reached it.
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::InvalidId(_)
            | Self::NotFound(_)
            | Self::Query(_)
            | Self::PreconditionFailed(_) => false,
            Self::Corrupted(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Database(_) => true,
        }
    }
}

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("invalid password: {0}")]
    InvalidPassword(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("wrong key")]
    WrongKey,
    #[error("too early farming, next farm at {ready_at}")]
    TooEarlyFarming {
        user: Box<User>,
        ready_at: DateTime<Utc>,
    },
    #[error("Insufficient funds: has {}, need {need}", .user.solid_balance)]
    InsufficientFunds { user: Box<User>, need: i64 },
    #[error("user {} is already blocked", .0.id)]
    AlreadyBlocked(Box<User>),
    #[error("user {} isn't blocked", .0.id)]
    NotBlocked(Box<User>),
    #[error("stock conversion stopped after {} users: {source}", .converted.len())]
    ConversionInterrupted {
        /// Users already credited before the failure.
        converted: Vec<User>,
        source: Box<EngineError>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Store(err) => err.is_server_error(),
            Self::ConversionInterrupted { source, .. } => source.is_server_error(),
            _ => false,
        }
    }

    /// The record as it was when the operation gave up, when known.
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::TooEarlyFarming { user, .. }
            | Self::InsufficientFunds { user, .. }
            | Self::AlreadyBlocked(user)
            | Self::NotBlocked(user) => Some(user),
            _ => None,
        }
    }
}

impl From<QueryError> for EngineError {
    fn from(value: QueryError) -> Self {
        Self::Store(StoreError::Query(value))
    }
}
