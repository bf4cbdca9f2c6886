//! Unified error type for the vibelens server. Maps internal errors to JSON-RPC codes.

use thiserror::Error;

use crate::engine::EngineError;

/// Standard JSON-RPC 2.0 error codes.
const PARSE_ERROR: i32 = -32700;
const INVALID_PARAMS: i32 = -32602;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;
/// Application-level server error (implementation-defined).
const SERVER_ERROR: i32 = -32000;

#[derive(Error, Debug)]
pub enum LensError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl LensError {
    /// JSON-RPC error code for this error variant.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::ParseError(_) => PARSE_ERROR,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::Engine(_) => SERVER_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Convert to (code, message) pair for `RpcResponse::error`.
    pub fn into_rpc(self) -> (i32, String) {
        let code = self.rpc_code();
        (code, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_codes() {
        assert_eq!(LensError::ParseError("x".into()).rpc_code(), -32700);
        assert_eq!(LensError::InvalidParams("x".into()).rpc_code(), -32602);
        assert_eq!(LensError::MethodNotFound("x".into()).rpc_code(), -32601);
        assert_eq!(
            LensError::Engine(EngineError::Task("boom".into())).rpc_code(),
            -32000
        );
        assert_eq!(
            LensError::Internal(anyhow::anyhow!("oops")).rpc_code(),
            -32603
        );
    }

    #[test]
    fn test_into_rpc_keeps_message() {
        let (code, message) = LensError::MethodNotFound("tools/frobnicate".into()).into_rpc();
        assert_eq!(code, -32601);
        assert_eq!(message, "Method not found: tools/frobnicate");
    }
}
