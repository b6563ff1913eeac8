//! Error types for the settlement engine, the stores and the HTTP layer.

use crate::schemas::{ExpenseId, MemberId};
use actix_web::{http::StatusCode, ResponseError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Input the settlement engine refuses to compute balances from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("expense {expense} has a non-positive amount ({amount})")]
    NonPositiveAmount { expense: ExpenseId, amount: Decimal },

    #[error("payer {payer} of expense {expense} is not a member of the group")]
    UnknownPayer { expense: ExpenseId, payer: MemberId },

    #[error("{settler} settled expense {expense} but does not share in it")]
    UnknownSettler {
        expense: ExpenseId,
        settler: MemberId,
    },

    #[error("expense {expense} is split among nobody")]
    EmptySplit { expense: ExpenseId },

    #[error("group has no members but {expenses} expense(s)")]
    EmptyGroup { expenses: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("balance arithmetic overflowed while applying expense {expense}")]
    Overflow { expense: ExpenseId },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("{entity_type} already exists: {identifier}")]
    Duplicate {
        entity_type: &'static str,
        identifier: String,
    },
}

/// Errors surfaced to HTTP clients. The response body is the display text.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    #[error("missing or invalid authorization")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("cannot compute balances: {0}")]
    Settlement(#[from] SettlementError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn not_found(entity_type: &'static str, identifier: impl Into<String>) -> Self {
        ServiceError::NotFound {
            entity_type,
            identifier: identifier.into(),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Settlement(SettlementError::InvalidInput(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Settlement(SettlementError::Overflow { .. }) | ServiceError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
