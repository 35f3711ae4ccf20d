//! Crate-wide error type and the taxonomy from the error-handling design:
//! validation errors are terminal (no requeue), everything originating from
//! the Kubernetes API is treated as transient and retried with backoff.

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors possible to occur during reconciliation or protocol handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate: conflicts, transient
    /// API unavailability, watch failures. Always retried.
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },

    /// A spec value fails validation: unknown dependency kind, a port out of
    /// range, a duplicated dependency kind, a missing required field the
    /// CRD schema did not catch. Terminal: no requeue.
    #[error("invalid spec: {0}")]
    Validation(String),

    /// A dependency override or ingress TLS block references a key or
    /// secret name that was never supplied. Terminal: no requeue.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The build-agent signal-file protocol observed a trigger file with no
    /// matching payload, or a payload it could not parse.
    #[error("build-agent protocol violation: {0}")]
    Protocol(String),

    /// Generic I/O failure talking to the spool directory.
    #[error("spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The OpenTelemetry trace context carried by the current span is not
    /// valid and cannot be attached to a metric exemplar.
    #[error("invalid trace id")]
    InvalidTraceId,
}

impl Error {
    /// Stable, low-cardinality label for the `failures` metric family.
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError { .. } => "kube".to_owned(),
            Error::Validation(_) => "validation".to_owned(),
            Error::Configuration(_) => "configuration".to_owned(),
            Error::Protocol(_) => "protocol".to_owned(),
            Error::Io(_) => "io".to_owned(),
            Error::InvalidTraceId => "invalid_trace_id".to_owned(),
        }
    }

    /// Validation and configuration errors are terminal: the caller should
    /// record a terminal condition and skip requeue. Everything else is
    /// transient and should be retried with backoff.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Configuration(_))
    }
}
