use thiserror::Error;

/// Errors raised by the mesh, field, decomposition and storage layers. Every
/// variant here is fatal for the calling rank: configuration that produces
/// one of these cannot be usefully continued. Recoverable conditions
/// (solver non-convergence, Courant exceedance, reconstruction mismatches)
/// are reported through result objects instead.
///
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid geometry: {what} {index} has non-positive {measure} ({value:e})")]
    InvalidGeometry {
        what: &'static str,
        index: usize,
        measure: &'static str,
        value: f64,
    },

    #[error("invalid topology in {component}: {details}")]
    InvalidTopology {
        component: &'static str,
        details: String,
    },

    #[error("dimension mismatch in {operation}: {lhs} vs {rhs}")]
    DimensionMismatch {
        operation: String,
        lhs: String,
        rhs: String,
    },

    #[error("field '{field}' has {available} old-time level(s), {requested} requested")]
    InsufficientHistory {
        field: String,
        requested: usize,
        available: usize,
    },

    #[error("partition invariant violated: {0}")]
    PartitionInvariant(String),

    #[error("stale or incompatible addressing for processor {proc_no}: {details}")]
    StaleAddressing { proc_no: usize, details: String },

    #[error("boundary condition '{condition}' on patch '{patch}': {details}")]
    BoundaryCondition {
        condition: &'static str,
        patch: String,
        details: String,
    },

    #[error("equation for '{field}' is in state {state}, cannot {operation}")]
    MatrixState {
        field: String,
        state: &'static str,
        operation: &'static str,
    },

    #[error("message transport: {0}")]
    Transport(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("i/o on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding {path}: {details}")]
    Encoding { path: String, details: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn topology<S: Into<String>>(component: &'static str, details: S) -> Self {
        Error::InvalidTopology {
            component,
            details: details.into(),
        }
    }

    pub fn io<P: AsRef<std::path::Path>>(path: P, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Report an unrecoverable programming error and terminate the calling rank.
/// Used for invariants that indicate a bug in a model rather than bad input,
/// e.g. adding equations with different physical dimensions.
///
pub fn fatal(err: Error) -> ! {
    log::error!("{}", err);
    panic!("{}", err)
}
