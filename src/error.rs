//! Error handling types for wsrpc
//!
//! This module provides the error type surfaced to callers of the engine.

use thiserror::Error;

use crate::protocol::Response;

/// Comprehensive error type for RPC operations
#[derive(Debug, Error)]
pub enum RpcError {
    /// The server answered a call with an `error` member
    #[error("Remote error: {}", remote_summary(.0))]
    Remote(Box<Response>),

    /// The very first connection attempt failed before ever opening
    #[error("Initial connection failed: {message}")]
    InitialConnection { message: String },

    /// The engine task is gone (all handles dropped or runtime shut down)
    #[error("RPC engine stopped")]
    EngineStopped,

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn remote_summary(response: &Response) -> String {
    response
        .error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Helper functions for common error patterns
impl RpcError {
    /// Create a remote error from the response that carried it
    pub fn remote(response: Response) -> Self {
        RpcError::Remote(Box::new(response))
    }

    /// Create an initial connection error
    pub fn initial_connection(message: impl Into<String>) -> Self {
        RpcError::InitialConnection {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        RpcError::Config {
            message: message.into(),
        }
    }

    /// The response behind a remote error, if this is one
    pub fn response(&self) -> Option<&Response> {
        match self {
            RpcError::Remote(response) => Some(response),
            _ => None,
        }
    }
}
