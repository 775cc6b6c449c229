use thiserror::Error;

/// Errors internal to the core data-plane crate. These are narrower than
/// [`relay_types::RelayError`]; callers at the public boundary map them onto
/// the wider taxonomy (most map to `Unavailable` or `Internal`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The Upstream Manager was started with an empty gateway list.
    #[error("no gateways configured")]
    NoGatewaysConfigured,

    /// All configured gateways are currently unhealthy.
    #[error("all gateways unavailable")]
    AllGatewaysUnavailable,

    /// The upstream decoder failed to produce a valid frame; the frame is
    /// dropped and an error counter incremented, this variant exists so
    /// callers that want to observe decode failures can.
    #[error("decode error for {symbol}: {msg}")]
    Decode {
        /// Symbol the frame was for.
        symbol: String,
        /// Decoder-provided message.
        msg: String,
    },

    /// An operation was attempted on a symbol with no registered stream.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// An invariant that must hold by construction was violated.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a [`CoreError::Decode`] error.
    pub fn decode(symbol: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            symbol: symbol.into(),
            msg: msg.into(),
        }
    }
}

impl From<CoreError> for relay_types::RelayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NoGatewaysConfigured | CoreError::AllGatewaysUnavailable => {
                Self::unavailable(err.to_string())
            }
            CoreError::Decode { .. } | CoreError::UnknownSymbol(_) => {
                Self::invalid_arg(err.to_string())
            }
            CoreError::Internal(msg) => Self::internal(msg),
        }
    }
}
