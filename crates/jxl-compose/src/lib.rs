//! jxl-compose combines N input frames and M metadata boxes into a single
//! JPEG XL file.
//!
//! The composer is driven by a declarative [`MergeConfig`] document and
//! consumes lazily-decoded [`Pixmap`][jxl_skim::Pixmap] inputs through
//! [`jxl_skim::Decoder`]; compressed output is produced through an
//! [`EncoderSession`], the encoder-side analogue of the decoder facade's
//! codec session.

mod config;
mod encoder;
mod merge;
mod util;

pub use config::{BoxConfig, ColorSpec, FrameConfig, MergeConfig};
pub use encoder::{EncoderError, EncoderOutput, EncoderResult, EncoderSession, FrameSettings};
pub use merge::{
    frame_settings_for, merge, suggest_ticks_per_second, MergeOptions,
    LOSSLESS_DISTANCE_THRESHOLD,
};
pub use util::{greatest_common_divisor, parse_rational};

/// The error type for merge composer operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum ComposeError {
    /// The merge configuration violates a structural constraint.
    InvalidConfig(String),
    /// The encoder reported a failure.
    Encoder(EncoderError),
    /// Reading one of the inputs failed.
    Read(jxl_skim::Error),
    /// Underlying I/O failure.
    Io(std::io::Error),
}

impl std::error::Error for ComposeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encoder(e) => Some(e),
            Self::Read(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl std::fmt::Display for ComposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid merge configuration: {msg}"),
            Self::Encoder(e) => write!(f, "{e}"),
            Self::Read(e) => write!(f, "failed to read input: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

/// Shorthand for result type of composer operations.
pub type ComposeResult<T> = std::result::Result<T, ComposeError>;

impl From<EncoderError> for ComposeError {
    fn from(e: EncoderError) -> Self {
        Self::Encoder(e)
    }
}

impl From<jxl_skim::Error> for ComposeError {
    fn from(e: jxl_skim::Error) -> Self {
        Self::Read(e)
    }
}

impl From<std::io::Error> for ComposeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
