//! EXI codec gateway seam
//!
//! The EXI wire codec runs out of process behind an RPC-style gateway. This
//! crate only needs its capability surface: encode, decode, and an explicit
//! reset for when the gateway's own transport fails. `ResetOnFailure` wraps
//! any codec with the recovery contract: reset the gateway once after a
//! transport-class failure and retry the single failed operation; a second
//! failure propagates.

use thiserror::Error;
use tracing::{error, warn};

/// Errors from the codec gateway
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The gateway's own transport failed; a reset may recover it
    #[error("codec gateway unreachable: {0}")]
    Gateway(String),

    #[error("EXI encoding failed: {0}")]
    Encode(String),

    #[error("EXI decoding failed: {0}")]
    Decode(String),

    #[error("codec gateway reset failed: {0}")]
    Reset(String),
}

impl CodecError {
    /// Whether this failure class is worth a gateway reset
    pub fn is_transport(&self) -> bool {
        matches!(self, CodecError::Gateway(_))
    }
}

/// Black-box EXI codec reached through a resettable gateway
pub trait ExiCodec: Send + Sync {
    /// Encode a JSON message into an EXI stream for the given namespace
    fn encode(&self, message: &str, namespace: &str) -> Result<Vec<u8>, CodecError>;

    /// Decode an EXI stream into its JSON representation
    fn decode(&self, stream: &[u8], namespace: &str) -> Result<String, CodecError>;

    /// Tear down and relaunch the gateway
    fn reset(&self) -> Result<(), CodecError>;
}

/// Codec wrapper applying the reset-once recovery contract
pub struct ResetOnFailure<C> {
    inner: C,
}

impl<C: ExiCodec> ResetOnFailure<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn with_reset<T>(
        &self,
        op: impl Fn(&C) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        match op(&self.inner) {
            Err(e) if e.is_transport() => {
                warn!("codec gateway failure ({}), resetting and retrying once", e);
                self.inner.reset()?;
                op(&self.inner).map_err(|e| {
                    error!("codec operation failed again after gateway reset: {}", e);
                    e
                })
            }
            other => other,
        }
    }
}

impl<C: ExiCodec> ExiCodec for ResetOnFailure<C> {
    fn encode(&self, message: &str, namespace: &str) -> Result<Vec<u8>, CodecError> {
        self.with_reset(|codec| codec.encode(message, namespace))
    }

    fn decode(&self, stream: &[u8], namespace: &str) -> Result<String, CodecError> {
        self.with_reset(|codec| codec.decode(stream, namespace))
    }

    fn reset(&self) -> Result<(), CodecError> {
        self.inner.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Codec whose first `failures` operations fail at the gateway level
    struct FlakyCodec {
        failures: AtomicUsize,
        resets: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyCodec {
        fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                resets: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }

        fn attempt(&self) -> Result<(), CodecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                Err(CodecError::Gateway("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    impl ExiCodec for FlakyCodec {
        fn encode(&self, message: &str, _namespace: &str) -> Result<Vec<u8>, CodecError> {
            self.attempt()?;
            Ok(message.as_bytes().to_vec())
        }

        fn decode(&self, stream: &[u8], _namespace: &str) -> Result<String, CodecError> {
            self.attempt()?;
            Ok(String::from_utf8_lossy(stream).into_owned())
        }

        fn reset(&self) -> Result<(), CodecError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const NS: &str = "urn:iso:15118:2:2013:MsgDef";

    #[test]
    fn test_healthy_codec_never_resets() {
        let codec = ResetOnFailure::new(FlakyCodec::failing(0));
        let exi = codec.encode("{\"msg\":1}", NS).unwrap();
        assert_eq!(codec.decode(&exi, NS).unwrap(), "{\"msg\":1}");
        assert_eq!(codec.into_inner().resets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_failure_resets_once_and_recovers() {
        let codec = ResetOnFailure::new(FlakyCodec::failing(1));
        assert!(codec.encode("{}", NS).is_ok());

        let inner = codec.into_inner();
        assert_eq!(inner.resets.load(Ordering::SeqCst), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_second_failure_propagates() {
        let codec = ResetOnFailure::new(FlakyCodec::failing(2));
        let err = codec.encode("{}", NS).unwrap_err();
        assert!(err.is_transport());

        // Exactly one reset was attempted before giving up
        let inner = codec.into_inner();
        assert_eq!(inner.resets.load(Ordering::SeqCst), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_non_transport_failure_not_retried() {
        struct BadInput;
        impl ExiCodec for BadInput {
            fn encode(&self, _m: &str, _n: &str) -> Result<Vec<u8>, CodecError> {
                Err(CodecError::Encode("schema violation".into()))
            }
            fn decode(&self, _s: &[u8], _n: &str) -> Result<String, CodecError> {
                Err(CodecError::Decode("truncated stream".into()))
            }
            fn reset(&self) -> Result<(), CodecError> {
                panic!("reset must not run for non-transport failures");
            }
        }

        let codec = ResetOnFailure::new(BadInput);
        assert_eq!(
            codec.encode("{}", NS),
            Err(CodecError::Encode("schema violation".into()))
        );
    }
}
