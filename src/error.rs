//! Admin error taxonomy.
//!
//! Every failure surfaced by the admin operations is one of four kinds.
//! Layers add context with [`Error::context`] as the error travels up, the
//! kind never changes, so callers can branch on [`ErrorKind::NotFound`] no
//! matter how deep the error originated.

use std::fmt::Display;

use kafka_protocol::error::ResponseError;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Protocol,
    Remote,
    NotFound,
}

#[derive(Debug, ThisError)]
pub enum Error {
    /// Transport or connection establishment failure, either towards the
    /// Kafka cluster or towards the tree store.
    #[error("{context}: {cause:#}")]
    Connection {
        context: String,
        cause: anyhow::Error,
    },

    /// A response is missing an expected block or has an unexpected shape.
    #[error("{context}")]
    Protocol { context: String },

    /// The collaborator reported a per-item error code.
    #[error("{context}: {}", describe_code(.code))]
    Remote { context: String, code: i16 },

    /// The queried group/topic ownership node does not exist.
    #[error("{context}")]
    NotFound { context: String },
}

impl Error {
    pub fn connection(context: impl Display, cause: impl Into<anyhow::Error>) -> Self {
        Error::Connection {
            context: context.to_string(),
            cause: cause.into(),
        }
    }

    pub fn protocol(context: impl Display) -> Self {
        Error::Protocol {
            context: context.to_string(),
        }
    }

    pub fn remote(context: impl Display, code: i16) -> Self {
        Error::Remote {
            context: context.to_string(),
            code,
        }
    }

    pub fn not_found(context: impl Display) -> Self {
        Error::NotFound {
            context: context.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::Remote { .. } => ErrorKind::Remote,
            Error::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Prepends `outer` to the error message, keeping the kind intact.
    pub fn context(mut self, outer: impl Display) -> Self {
        let context = match &mut self {
            Error::Connection { context, .. }
            | Error::Protocol { context }
            | Error::Remote { context, .. }
            | Error::NotFound { context } => context,
        };
        *context = format!("{}: {}", outer, context);
        self
    }
}

pub trait ResultExt<T> {
    fn context<C: Display>(self, outer: C) -> Result<T>;

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C: Display>(self, outer: C) -> Result<T> {
        self.map_err(|e| e.context(outer))
    }

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| e.context(f()))
    }
}

fn describe_code(code: &i16) -> String {
    let code = *code;
    match ResponseError::try_from_code(code) {
        Some(err) => format!("{:?} (code {})", err, code),
        None => format!("unknown error code {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_kind() {
        let err = Error::not_found("either group or topic is incorrect")
            .context("failed to fetch group `g1` data");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "failed to fetch group `g1` data: either group or topic is incorrect"
        );
    }

    #[test]
    fn test_result_context() {
        let res: Result<()> = Err(Error::protocol("orders/3, no data"));
        let err = res
            .with_context(|| format!("failed to fetch oldest offset, broker={}", 7))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            err.to_string(),
            "failed to fetch oldest offset, broker=7: orders/3, no data"
        );
    }

    #[test]
    fn test_connection_display_includes_cause() {
        let err = Error::connection("failed to create cluster client", anyhow::anyhow!("refused"));
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.to_string(), "failed to create cluster client: refused");
    }

    #[test]
    fn test_remote_carries_code() {
        let err = Error::remote("failed to commit offset, partition=1", 25);
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(matches!(err, Error::Remote { code: 25, .. }));
        assert!(err.to_string().starts_with("failed to commit offset, partition=1: "));
    }
}
