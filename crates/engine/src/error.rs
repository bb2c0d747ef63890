//! The module contains the errors the engine can throw.
//!
//! Two families are kept apart:
//!
//! - input errors the caller must fix: [`Validation`], [`ImbalancedGroup`],
//!   [`KeyNotFound`], [`ExistingKey`], [`InvalidAmount`], [`InvalidId`];
//! - internal faults that always mean a bug or corrupted data:
//!   [`SettlementProtocol`] and [`DuplicateId`]. See
//!   [`EngineError::is_internal_fault`].
//!
//!  [`Validation`]: EngineError::Validation
//!  [`ImbalancedGroup`]: EngineError::ImbalancedGroup
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`ExistingKey`]: EngineError::ExistingKey
//!  [`InvalidAmount`]: EngineError::InvalidAmount
//!  [`InvalidId`]: EngineError::InvalidId
//!  [`SettlementProtocol`]: EngineError::SettlementProtocol
//!  [`DuplicateId`]: EngineError::DuplicateId
use thiserror::Error;

use crate::Money;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(
        "The group debits and credits are not balanced: debit {debit}, credit {credit}, deviation {deviation}"
    )]
    ImbalancedGroup {
        debit: Money,
        credit: Money,
        deviation: Money,
    },
    #[error("Internal fault, settlement protocol violated: {0}")]
    SettlementProtocol(String),
    #[error("Internal fault, two different transactions share the id \"{0}\"")]
    DuplicateId(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// `true` for errors that can only come from a bug or corrupted data, as
    /// opposed to bad input.
    #[must_use]
    pub fn is_internal_fault(&self) -> bool {
        matches!(self, Self::SettlementProtocol(_) | Self::DuplicateId(_))
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (
                Self::ImbalancedGroup {
                    debit: d1,
                    credit: c1,
                    deviation: x1,
                },
                Self::ImbalancedGroup {
                    debit: d2,
                    credit: c2,
                    deviation: x2,
                },
            ) => d1 == d2 && c1 == c2 && x1 == x2,
            (Self::SettlementProtocol(a), Self::SettlementProtocol(b)) => a == b,
            (Self::DuplicateId(a), Self::DuplicateId(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidId(a), Self::InvalidId(b)) => a == b,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            (Self::Json(a), Self::Json(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
