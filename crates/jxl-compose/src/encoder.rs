//! Contract between the merge composer and a JXL encoder.
//!
//! Mirrors a pull-based streaming encoder: push basic info, boxes and
//! frames in, then drain compressed bytes through
//! [`process_out`][EncoderSession::process_out] until it reports
//! completion.

use jxl_runner::ParallelRunner;
use jxl_session::{BasicInfo, BoxType, ColorEncoding, FrameHeader, PixelFormat};

/// The error type reported by an encoder session.
#[derive(Debug)]
pub struct EncoderError(pub String);

impl std::error::Error for EncoderError {}

impl std::fmt::Display for EncoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "encode failed: {}", self.0)
    }
}

pub type EncoderResult<T> = std::result::Result<T, EncoderError>;

/// One round of output draining.
#[derive(Debug, Clone, Copy)]
pub struct EncoderOutput {
    /// Bytes written into the caller's buffer.
    pub written: usize,
    /// True once everything pushed so far has been encoded and drained;
    /// false means the buffer filled up and another round is needed.
    pub done: bool,
}

/// Per-frame encoder settings derived from the merge configuration.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameSettings {
    /// Encode this frame losslessly; `distance` is ignored when set.
    pub lossless: bool,
    pub distance: f32,
    pub effort: Option<i32>,
    pub modular_prev_channels: Option<i32>,
    pub modular_ma_tree_learning_percent: Option<i32>,
    pub patches: Option<i32>,
    pub brotli_effort: Option<i32>,
    /// Explicit frame header; `None` keeps the encoder's defaults.
    pub header: Option<FrameHeader>,
    pub name: Option<String>,
}

/// An event-driven JXL encoder, as seen by the merge composer.
pub trait EncoderSession {
    fn set_parallel_runner(&mut self, runner: ParallelRunner);

    /// Forces a `jxll` codestream level tag. Whether the tag is actually
    /// emitted stays under the encoder's control.
    fn set_codestream_level(&mut self, level: i32) -> EncoderResult<()>;

    /// Switches the output to the container format so metadata boxes can
    /// be attached.
    fn use_boxes(&mut self) -> EncoderResult<()>;

    fn set_basic_info(&mut self, info: &BasicInfo) -> EncoderResult<()>;
    fn set_color_encoding(&mut self, encoding: &ColorEncoding) -> EncoderResult<()>;
    fn set_icc_profile(&mut self, icc: &[u8]) -> EncoderResult<()>;

    /// Appends a metadata box, optionally Brotli-compressed into a `brob`
    /// wrapper.
    fn add_box(&mut self, ty: BoxType, content: &[u8], compress: bool) -> EncoderResult<()>;

    /// Declares that no further boxes will be added.
    fn close_boxes(&mut self);

    /// Appends an image frame with the given settings.
    fn add_image_frame(
        &mut self,
        settings: &FrameSettings,
        format: &PixelFormat,
        pixels: &[u8],
    ) -> EncoderResult<()>;

    /// Declares that no further frames will be added.
    fn close_frames(&mut self);

    /// Drains pending compressed output into `out`.
    fn process_out(&mut self, out: &mut [u8]) -> EncoderResult<EncoderOutput>;
}
