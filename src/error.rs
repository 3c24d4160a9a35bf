//! lumen-rnn error types

/// lumen-rnn result type
pub type Result<T> = std::result::Result<T, Error>;

/// lumen-rnn errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tensor does not have the shape implied by `nin`/`dim`/`dimctx`,
    /// the batch size or the time length.
    #[error("shape mismatch for '{tensor}': expected {expected}, got {got:?}")]
    Shape {
        /// Name of the offending tensor
        tensor: String,
        /// Human readable expected shape, e.g. `[batch, 8]`
        expected: String,
        /// Actual shape
        got: Vec<usize>,
    },

    /// A required entry is absent from the weight set
    #[error("missing weight '{key}'")]
    MissingWeight {
        /// Prefixed parameter name
        key: String,
    },

    /// A call-level precondition was violated (caller bug)
    #[error("precondition failed: {reason}")]
    Precondition {
        /// Description of what went wrong
        reason: String,
    },

    /// Invalid argument to an operation or configuration
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Unknown layer name in the registry
    #[error("unknown layer kind '{0}'")]
    UnknownLayer(String),

    /// Unknown activation name
    #[error("unknown activation '{0}'")]
    UnknownActivation(String),

    /// Unsupported element type in a weight file
    #[error("unsupported dtype {dtype} for '{name}'")]
    UnsupportedDType {
        /// Tensor name
        name: String,
        /// The dtype as reported by the file
        dtype: String,
    },

    /// Reshape/stack failure from ndarray
    #[error("layout error: {0}")]
    Layout(#[from] ndarray::ShapeError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error decoding a safetensors file
    #[error("safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    /// Error encoding or decoding a bincode checkpoint
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] bincode::Error),
}

impl Error {
    pub(crate) fn shape(tensor: impl Into<String>, expected: impl Into<String>, got: &[usize]) -> Self {
        Error::Shape {
            tensor: tensor.into(),
            expected: expected.into(),
            got: got.to_vec(),
        }
    }

    pub(crate) fn precondition(reason: impl Into<String>) -> Self {
        Error::Precondition {
            reason: reason.into(),
        }
    }
}

/// Fails with [`Error::Shape`] unless `got == expected`.
pub(crate) fn ensure_shape(tensor: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(Error::shape(tensor, format!("{:?}", expected), got));
    }
    Ok(())
}
