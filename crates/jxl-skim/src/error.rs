use jxl_session::SessionError;

/// The error type for lazy reader operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Underlying read or seek failure.
    Io(std::io::Error),
    /// The input's signature matches neither a JXL codestream nor a JXL
    /// container.
    NotJxl { detail: &'static str },
    /// A second pass over the input was required but the source refuses to
    /// seek back to the start.
    NotSeekable,
    /// The codec reported an error, produced an out-of-contract event, or
    /// stalled without consuming input.
    CorruptedStream(String),
    /// Frame, box, JPEG or extra channel index beyond a known-complete
    /// enumeration.
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },
    /// A caller-provided buffer is smaller than the computed minimum.
    BufferTooSmall { required: usize, got: usize },
    /// Buffer size or stride arithmetic overflowed.
    BufferTooLarge,
    /// A method was called in an invalid state.
    Usage(&'static str),
    /// Box decompression was requested but Brotli support is unavailable.
    NoBrotli,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NotJxl { detail } => write!(f, "{detail}"),
            Self::NotSeekable => write!(
                f,
                "input is not seekable - can't read image features out of sequence"
            ),
            Self::CorruptedStream(msg) => write!(f, "{msg}"),
            Self::IndexOutOfRange { kind, index, len } => {
                write!(
                    f,
                    "{kind} at index {index} doesn't exist - image only has {len} {kind}(s)"
                )
            }
            Self::BufferTooSmall { required, got } => write!(
                f,
                "buffer of {got} bytes is too small - require at least {required}"
            ),
            Self::BufferTooLarge => write!(f, "buffer memory requirement is too large"),
            Self::Usage(msg) => write!(f, "{msg}"),
            Self::NoBrotli => write!(f, "box decompression requires Brotli support"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl Error {
    /// Whether this error reports incorrect API usage rather than bad input.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::IndexOutOfRange { .. })
    }
}

pub(crate) fn session_error(e: SessionError) -> Error {
    match e {
        SessionError::NoBrotli => Error::NoBrotli,
        e => Error::CorruptedStream(e.to_string()),
    }
}

/// Shorthand for result type of reader operations.
pub type Result<T> = std::result::Result<T, Error>;
