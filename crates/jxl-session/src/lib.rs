//! Contract between the lazy JXL reader facade and an event-driven codec.
//!
//! The facade never sees the codec's internals; it drives a [`CodecSession`]
//! by feeding input windows and reading back [`Event`]s, pulling typed
//! records (basic info, frame headers, box headers, colour profiles) through
//! getters once the matching event has been surfaced. This crate defines
//! that protocol and the shared data model, and nothing else; no codec
//! implementation lives here.

mod boxes;
pub mod color;
mod event;
mod format;
mod frame;
mod info;
pub mod signature;

pub use boxes::BoxType;
pub use color::{ColorEncoding, ColorProfile, ColorProfileTarget};
pub use event::{Event, EventSet};
pub use format::{DataType, Endianness, PixelFormat};
pub use frame::{BlendInfo, BlendMode, FrameHeader, LayerInfo};
pub use info::{AnimationInfo, BasicInfo, ExtraChannelInfo, ExtraChannelType};
pub use jxl_runner::ParallelRunner;
pub use signature::{check_signature, Signature};

/// The error type for codec session operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionError {
    /// The codestream is malformed and decoding cannot continue.
    Decode(String),
    /// The session was driven in an order the protocol does not allow.
    State(&'static str),
    /// Brotli-compressed box handling was requested but the codec was built
    /// without Brotli support.
    NoBrotli,
}

impl std::error::Error for SessionError {}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "decode failed: {msg}"),
            Self::State(msg) => write!(f, "session protocol violation: {msg}"),
            Self::NoBrotli => write!(f, "codec built without Brotli support"),
        }
    }
}

/// Shorthand for result type of session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Destination for the interleaved colour channels of one frame.
#[derive(Debug)]
pub struct PixelSink<'buf> {
    pub format: PixelFormat,
    pub buf: &'buf mut [u8],
}

/// Destination for the planar samples of one extra channel.
///
/// `format.num_channels` is ignored; extra channel output is always planar.
#[derive(Debug)]
pub struct ExtraChannelSink<'buf> {
    pub channel: usize,
    pub format: PixelFormat,
    pub buf: &'buf mut [u8],
}

/// Streaming byte destination for box payloads and reconstructed JPEGs.
///
/// The session appends at `written` and advances it; when the buffer fills
/// up before the payload is exhausted, `process` surfaces the matching
/// `*NeedMoreOutput` event and the caller may swap in a fresh buffer.
#[derive(Debug)]
pub struct ByteSink<'buf> {
    pub buf: &'buf mut [u8],
    pub written: usize,
}

impl<'buf> ByteSink<'buf> {
    pub fn new(buf: &'buf mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.written
    }

    /// Appends as much of `data` as fits; returns the number of bytes taken.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.buf[self.written..self.written + take].copy_from_slice(&data[..take]);
        self.written += take;
        take
    }
}

/// All output destinations registered with the session for the current
/// stretch of decoding. Absent sinks make the session skip (boxes, JPEG) or
/// report [`Event::NeedImageOutBuffer`] (pixels).
#[derive(Debug, Default)]
pub struct Sinks<'buf> {
    pub image: Option<PixelSink<'buf>>,
    pub extra: Vec<ExtraChannelSink<'buf>>,
    pub box_out: Option<ByteSink<'buf>>,
    pub jpeg_out: Option<ByteSink<'buf>>,
}

impl Sinks<'_> {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Per-call I/O window handed to [`CodecSession::process`].
#[derive(Debug)]
pub struct SessionIo<'io, 'buf> {
    /// Contiguous window of not-yet-consumed input bytes. Consecutive calls
    /// must present a stable stream: the next window starts exactly where
    /// the previous call stopped consuming.
    pub input: &'io [u8],
    /// True once the end of the input has been reached; no further bytes
    /// will ever follow `input`.
    pub input_closed: bool,
    /// Set by the session: how many bytes of `input` were consumed.
    pub consumed: usize,
    pub sinks: &'io mut Sinks<'buf>,
}

/// An event-driven JXL codec, as seen by the reader facade.
///
/// The protocol mirrors a pull-based streaming decoder: `process` runs until
/// it either needs more input, needs an output buffer, or has something to
/// report. Informative events are gated on [`subscribe`][Self::subscribe];
/// the getters are valid from the moment the matching event is surfaced
/// until the session state advances past it.
pub trait CodecSession {
    /// Declares which informative events the session should surface.
    ///
    /// Subscribing is only allowed before any input has been processed or
    /// directly after [`rewind`][Self::rewind].
    fn subscribe(&mut self, events: EventSet) -> SessionResult<()>;

    /// Drives the state machine until the next reportable condition.
    fn process(&mut self, io: &mut SessionIo<'_, '_>) -> SessionResult<Event>;

    /// Resets the session to the start of the stream, keeping its options.
    fn rewind(&mut self);

    /// Returns the session to its freshly constructed state, clearing
    /// options and subscriptions.
    fn reset(&mut self);

    /// Skips over the next `count` frames without surfacing them.
    fn skip_frames(&mut self, count: usize);

    /// Abandons the frame whose pixels would be decoded next.
    fn skip_current_frame(&mut self) -> SessionResult<()>;

    fn set_coalescing(&mut self, coalescing: bool) -> SessionResult<()>;
    fn set_keep_orientation(&mut self, keep: bool) -> SessionResult<()>;
    fn set_unpremultiply_alpha(&mut self, unpremultiply: bool) -> SessionResult<()>;
    fn set_parallel_runner(&mut self, runner: ParallelRunner);

    /// Enables or disables transparent decompression of `brob` boxes.
    ///
    /// Fails with [`SessionError::NoBrotli`] when enabling is requested but
    /// the codec lacks Brotli support.
    fn set_decompress_boxes(&mut self, decompress: bool) -> SessionResult<()>;

    /// Overrides the colour profile pixels are decoded into. Exactly one of
    /// `encoded` and `icc` must be provided.
    fn set_output_color_profile(
        &mut self,
        encoded: Option<&ColorEncoding>,
        icc: Option<&[u8]>,
    ) -> SessionResult<()>;

    // Getters. Valid once the corresponding event has been surfaced.

    fn basic_info(&self) -> SessionResult<BasicInfo>;
    fn frame_header(&self) -> SessionResult<FrameHeader>;
    fn frame_name(&self) -> SessionResult<String>;
    fn extra_channel_info(&self, index: usize) -> SessionResult<ExtraChannelInfo>;
    fn extra_channel_name(&self, index: usize) -> SessionResult<Option<String>>;
    fn extra_channel_blend_info(&self, index: usize) -> SessionResult<BlendInfo>;

    /// Type of the current box; with `decompressed` set, the inner type of a
    /// `brob` wrapper instead of `brob` itself.
    fn box_type(&self, decompressed: bool) -> SessionResult<BoxType>;
    /// Exact payload size of the current box, excluding headers. `0` for an
    /// empty or unbounded box; disambiguate with [`box_size_raw`][Self::box_size_raw].
    fn box_size_contents(&self) -> SessionResult<u64>;
    /// Declared size field of the current box. `0` means "extends to EOF".
    fn box_size_raw(&self) -> SessionResult<u64>;

    fn encoded_color_profile(&self, target: ColorProfileTarget) -> Option<ColorEncoding>;
    fn icc_profile_len(&self, target: ColorProfileTarget) -> Option<usize>;
    fn icc_profile(&self, target: ColorProfileTarget) -> Option<Vec<u8>>;
}
