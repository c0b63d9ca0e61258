// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::path::PathBuf;

use sip_core::{MessageError, ParseError, TransportKind};
use sip_observe::LogError;
use sip_transaction::TransactionError;
use sip_transport::PoolExhausted;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("invalid setup: {0}")]
    Config(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid setup json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stack is already running")]
    AlreadyRunning,
    #[error("stack is not running")]
    NotRunning,
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("cannot resolve destination {0}")]
    Unresolvable(String),
    #[error("{0} transport is not enabled")]
    TransportDisabled(TransportKind),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error(transparent)]
    Transaction(TransactionError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
}

impl From<TransactionError> for StackError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Capacity { .. } => StackError::ResourceExhausted(err.to_string()),
            TransactionError::Message(inner) => StackError::Message(inner),
            other => StackError::Transaction(other),
        }
    }
}

impl From<anyhow::Error> for StackError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<PoolExhausted>() {
            Some(exhausted) => StackError::ResourceExhausted(exhausted.to_string()),
            None => StackError::Transport(err),
        }
    }
}

impl StackError {
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, StackError::ResourceExhausted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_maps_to_resource_exhaustion() {
        let err: StackError = TransactionError::Capacity {
            list: "IST",
            limit: 4,
        }
        .into();
        assert!(err.is_resource_exhausted());
        assert!(err.to_string().contains("IST"));
    }

    #[test]
    fn pool_exhaustion_survives_anyhow() {
        let err: StackError = anyhow::Error::new(PoolExhausted { capacity: 2 }).into();
        assert!(err.is_resource_exhausted());

        let other: StackError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(other, StackError::Transport(_)));
    }
}
