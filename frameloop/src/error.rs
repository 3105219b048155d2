use thiserror::Error;

use crate::session::SessionId;

/// Errors reported by a decode service implementation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The service could not (re)build its format conversion context.
    #[error("conversion setup failed: {0}")]
    ConverterSetup(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn is_converter_setup(&self) -> bool {
        matches!(self, Self::ConverterSetup(_))
    }
}

/// Errors produced by a decode session.
#[derive(Debug, Error)]
pub enum DecodeError {
    // ── Terminal: stop the session, report once ────────────────────────
    #[error("session {session}: cannot open '{location}': {reason}")]
    Open {
        session: SessionId,
        location: String,
        reason: ServiceError,
    },
    #[error("session {session}: no decodable video stream in '{location}'")]
    StreamNotFound { session: SessionId, location: String },
    #[error("session {session}: no decoder available for codec '{codec}'")]
    DecoderUnavailable {
        session: SessionId,
        codec: String,
        reason: Option<ServiceError>,
    },
    #[error("session {session}: cannot convert {from} to {to}: {reason}")]
    ConversionSetup {
        session: SessionId,
        from: String,
        to: String,
        reason: ServiceError,
    },
    #[error("session {session}: gave up after {skipped} consecutive decode failures")]
    StalledStream { session: SessionId, skipped: u32 },

    // ── Per packet: logged and skipped ─────────────────────────────────
    #[error("session {session}: {stage} failed: {reason}")]
    TransientDecode {
        session: SessionId,
        stage: &'static str,
        reason: ServiceError,
    },

    // ── Teardown: logged, never propagated ─────────────────────────────
    #[error("session {session}: releasing {resource} failed: {reason}")]
    ResourceRelease {
        session: SessionId,
        resource: &'static str,
        reason: ServiceError,
    },
}

impl DecodeError {
    /**
        Returns true for errors that end a session.
    */
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::TransientDecode { .. } | Self::ResourceRelease { .. }
        )
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {reason}")]
    Read {
        path: String,
        reason: std::io::Error,
    },
    #[error("invalid config '{path}': {reason}")]
    Parse {
        path: String,
        reason: serde_json::Error,
    },
    #[error("target format {0} is not a packed display format")]
    PlanarTarget(crate::PixelFormat),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Type alias for results that may return a [`DecodeError`].
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        let session = SessionId::new(1);
        let stalled = DecodeError::StalledStream {
            session,
            skipped: 3,
        };
        assert!(stalled.is_terminal());

        let transient = DecodeError::TransientDecode {
            session,
            stage: "send packet",
            reason: ServiceError::InvalidData("corrupt".into()),
        };
        assert!(!transient.is_terminal());
        assert_eq!(
            transient.to_string(),
            "session #1: send packet failed: invalid data: corrupt"
        );
    }

    #[test]
    fn converter_setup_is_recognised() {
        assert!(ServiceError::ConverterSetup("x".into()).is_converter_setup());
        assert!(!ServiceError::backend("x").is_converter_setup());
    }
}
