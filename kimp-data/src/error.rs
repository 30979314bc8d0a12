use crate::model::ExchangeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// HTTP status returned by exchanges that refuse service to the caller's region.
pub const HTTP_STATUS_REGION_BLOCKED: u16 = 451;

/// All errors generated in `kimp-data`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("SocketError: {0}")]
    Socket(String),

    #[error("connection refused for regional or legal reasons: {0}")]
    RegionBlocked(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{exchange} responded with unexpected status: {status}")]
    HttpStatus { exchange: ExchangeId, status: u16 },

    #[error("{exchange} rejected request: {message}")]
    Rejected { exchange: ExchangeId, message: String },

    #[error("failed to deserialise {exchange} payload: {error}")]
    Deserialise { exchange: ExchangeId, error: String },

    #[error("FX rate unavailable: {0}")]
    FxRate(String),

    #[error("WebSocket read timeout: no data received for {0} seconds")]
    ReadTimeout(u64),
}

impl DataError {
    /// Determine if an error is a regional / legal block, which trips the circuit
    /// immediately rather than counting towards the consecutive failure threshold.
    pub fn is_region_block(&self) -> bool {
        match self {
            DataError::RegionBlocked(_) => true,
            DataError::HttpStatus { status, .. } => *status == HTTP_STATUS_REGION_BLOCKED,
            _ => false,
        }
    }

    pub fn deserialise(exchange: ExchangeId, error: impl std::fmt::Display) -> Self {
        Self::Deserialise {
            exchange,
            error: error.to_string(),
        }
    }
}

impl From<tungstenite::Error> for DataError {
    fn from(value: tungstenite::Error) -> Self {
        match &value {
            tungstenite::Error::Http(response)
                if response.status().as_u16() == HTTP_STATUS_REGION_BLOCKED =>
            {
                Self::RegionBlocked(format!("HTTP {}", response.status()))
            }
            _ => Self::Socket(format!("{value:?}")),
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) if status.as_u16() == HTTP_STATUS_REGION_BLOCKED => {
                Self::RegionBlocked(value.to_string())
            }
            _ => Self::Http(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_error_is_region_block() {
        struct TestCase {
            input: DataError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: RegionBlocked
                input: DataError::RegionBlocked("HTTP 451".to_string()),
                expected: true,
            },
            TestCase {
                // TC1: HttpStatus 451
                input: DataError::HttpStatus {
                    exchange: ExchangeId::BinanceSpot,
                    status: 451,
                },
                expected: true,
            },
            TestCase {
                // TC2: HttpStatus 429 is a generic failure
                input: DataError::HttpStatus {
                    exchange: ExchangeId::BinanceSpot,
                    status: 429,
                },
                expected: false,
            },
            TestCase {
                // TC3: Socket error mentioning a timeout
                input: DataError::Socket("timeout".to_string()),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_region_block();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_tungstenite_error_classification() {
        struct TestCase {
            input: tungstenite::Error,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: connection closed is a plain socket failure
                input: tungstenite::Error::ConnectionClosed,
                expected: false,
            },
            TestCase {
                // TC1: "451" in the error text alone is not a regional block
                input: tungstenite::Error::Url(tungstenite::error::UrlError::UnableToConnect(
                    "stream.example.com:451".to_string(),
                )),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = DataError::from(test.input);
            assert!(matches!(actual, DataError::Socket(_)), "TC{} failed", index);
            assert_eq!(actual.is_region_block(), test.expected, "TC{} failed", index);
        }
    }
}
