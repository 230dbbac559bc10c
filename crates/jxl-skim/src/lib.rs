//! jxl-skim is a lazy, random-access reader for JPEG XL images, layered on
//! top of an event-driven codec abstracted as
//! [`CodecSession`][jxl_session::CodecSession].
//!
//! The codec exposes a push/pull streaming protocol: feed input, get back
//! "need more input" / "need output buffer" / "here is a frame" events.
//! [`Decoder`] hides that state machine behind an object you can query in
//! any order, as often as you like: basic info, frame headers and pixels,
//! container boxes, ICC profiles, JPEG reconstructions. Internally it
//! buffers input in bounded chunks, resubscribes to codec events, rewinds
//! and replays the source when a query needs something that has already
//! streamed past, and caches every record it has seen so repeated queries
//! are free.
//!
//! ```no_run
//! # fn codec_session() -> Box<dyn jxl_session::CodecSession> { unimplemented!() }
//! use jxl_skim::{Decoder, DecoderFlags, DecoderHints};
//!
//! # fn main() -> jxl_skim::Result<()> {
//! let mut decoder = Decoder::new(codec_session());
//! decoder.open_file("input.jxl", DecoderFlags::default(), DecoderHints::default(), 0)?;
//! let info = decoder.basic_info()?;
//! println!("{}x{} with {} frame(s)", info.xsize, info.ysize, decoder.frame_count()?);
//! # Ok(())
//! # }
//! ```
//!
//! A `Decoder` is single-threaded; the only parallelism is the worker pool
//! handed to the codec for pixel decoding, see
//! [`ParallelRunner`][jxl_runner::ParallelRunner].

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use jxl_session::signature::{check_signature, Signature};
use jxl_session::{
    BasicInfo, BlendInfo, BoxType, CodecSession, ColorEncoding, ColorProfileTarget, DataType,
    Endianness, Event, EventSet, ExtraChannelInfo, ExtraChannelSink, FrameHeader, PixelFormat,
    PixelSink, SessionIo, Sinks,
};

mod error;
mod input;
mod pixmap;

pub use error::{Error, Result};
use error::session_error;
use input::InputBuffer;
pub use input::DEFAULT_BUFFER_KIB;
pub use jxl_runner::ParallelRunner;
pub use jxl_session::ByteSink;
pub use pixmap::{buffer_is_fully_opaque, Pixmap, SessionFactory};

/// Options that change decoded values. See [`Decoder::open_file`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderFlags {
    /// Don't blend layers together into full-image-sized animation frames;
    /// decode individual (possibly cropped) layers if available.
    pub no_coalesce: bool,
    /// Emit pixels in their stored orientation instead of auto-correcting
    /// from the image metadata.
    pub keep_orientation: bool,
    /// Convert premultiplied (associated) alpha to straight alpha on decode.
    pub unpremultiply_alpha: bool,
}

/// Hints that tune event subscription and buffering, never correctness.
///
/// Inaccurate hints may cost performance (extra rewinds), and on a
/// non-seekable source they can make out-of-sequence access impossible, but
/// they never change decoded values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderHints {
    /// Set if you plan to access container boxes directly.
    pub want_boxes: bool,
    /// Set if you won't decode any pixels.
    pub no_pixels: bool,
    /// Set if you won't read the image's colour profiles.
    pub no_color_profile: bool,
    /// Set if you plan to reconstruct a transcoded JPEG.
    pub want_jpeg: bool,
}

/// Frame metadata: header, optional name, and per-extra-channel blend info
/// when coalescing is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub header: FrameHeader,
    pub name: Option<String>,
    /// One entry per extra channel; only recorded when coalescing is
    /// disabled, where blending must be replayed by the caller.
    pub ec_blend_info: Option<Vec<BlendInfo>>,
}

/// Container box metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRecord {
    /// Always the decompressed inner type, never `brob`.
    pub ty: BoxType,
    /// True iff the box is stored Brotli-compressed in the file.
    pub compressed: bool,
    /// Size of the (possibly compressed) box payload, excluding headers.
    /// For an unbounded box this is 0 until the payload has been read once.
    ///
    /// For a compressed box this is the compressed size; it does not predict
    /// the decompressed output size.
    pub size: u64,
    /// True iff the box extends to the end of the file.
    pub unbounded: bool,
}

/// An extra channel together with its optional name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraChannelRecord {
    pub info: ExtraChannelInfo,
    pub name: Option<String>,
}

/// A request for the planar pixels of one extra channel, used by
/// [`Decoder::frame_pixels`]. The format's `num_channels` is ignored.
#[derive(Debug)]
pub struct ExtraChannelRequest<'buf> {
    pub channel_index: usize,
    pub format: PixelFormat,
    pub buf: &'buf mut [u8],
}

#[derive(Debug, Default, Clone, Copy)]
struct DecoderState {
    is_open: bool,
    is_coalescing: bool,
    got_basic_info: bool,
    got_color: bool,
    got_orig_color_enc: bool,
    got_data_color_enc: bool,
    seen_all_boxes: bool,
    seen_all_frames: bool,
    seen_all_jpeg: bool,
    decoded_some_pixels: bool,
    whole_file_buffered: bool,
    /// No CMS integration exists yet, so this stays false; requesting an
    /// ICC output profile without it is a usage error.
    have_cms: bool,
}

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

enum SourceState<'src> {
    Closed,
    Memory,
    Seekable {
        stream: Box<dyn ReadSeek + 'src>,
        anchor: u64,
    },
    Unseekable(Box<dyn Read + 'src>),
}

impl std::fmt::Debug for SourceState<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Memory => write!(f, "Memory"),
            Self::Seekable { anchor, .. } => write!(f, "Seekable {{ anchor: {anchor} }}"),
            Self::Unseekable(_) => write!(f, "Unseekable"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
enum StopAt {
    #[default]
    None,
    /// Stop once the enumeration is known to be complete.
    All,
    /// Stop when the record with this index is surfaced.
    Specific(usize),
}

#[derive(Debug, Default, Clone, Copy)]
struct Stops {
    frame: StopAt,
    boxes: StopAt,
    jpeg: StopAt,
}

/// Lazy random-access JPEG XL reader.
///
/// Created empty; [`open_file`][Self::open_file],
/// [`open_stream`][Self::open_stream], [`open_reader`][Self::open_reader] or
/// [`open_memory`][Self::open_memory] bind a source. Queries may be issued
/// in any order afterwards; they never change the logical view of the file.
pub struct Decoder<'src> {
    session: Box<dyn CodecSession>,
    runner: ParallelRunner,
    source: SourceState<'src>,
    input: InputBuffer<'src>,
    /// Whether "no more input" has been signalled to the codec.
    input_closed: bool,
    state: DecoderState,
    basic_info: BasicInfo,
    orig_icc: Vec<u8>,
    data_icc: Vec<u8>,
    orig_color_enc: Option<ColorEncoding>,
    data_color_enc: Option<ColorEncoding>,
    /// Events the codec is currently asked to surface. `BasicInfo` and
    /// `ColorEncoding` are removed on first delivery so rewinds never
    /// resubscribe to them.
    events_subbed: EventSet,
    /// Latest event returned by the codec, if any.
    status: Option<Event>,
    frames: Vec<FrameRecord>,
    next_frame_index: usize,
    boxes: Vec<BoxRecord>,
    next_box_index: usize,
    jpeg_count: usize,
    next_jpeg_index: usize,
    extra: Vec<ExtraChannelRecord>,
}

impl std::fmt::Debug for Decoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("source", &self.source)
            .field("state", &self.state)
            .field("frames", &self.frames.len())
            .field("boxes", &self.boxes.len())
            .finish_non_exhaustive()
    }
}

impl<'src> Decoder<'src> {
    /// Creates a decoder around a codec session, with a default worker pool.
    pub fn new(session: Box<dyn CodecSession>) -> Self {
        Self::with_runner(session, ParallelRunner::default())
    }

    /// Creates a decoder around a codec session and a caller-supplied
    /// worker pool. The pool is the only place parallelism is introduced;
    /// it parallelises pixel decoding of a single frame.
    pub fn with_runner(session: Box<dyn CodecSession>, runner: ParallelRunner) -> Self {
        Self {
            session,
            runner,
            source: SourceState::Closed,
            input: InputBuffer::for_memory(&[]),
            input_closed: false,
            state: DecoderState::default(),
            basic_info: BasicInfo::default(),
            orig_icc: Vec::new(),
            data_icc: Vec::new(),
            orig_color_enc: None,
            data_color_enc: None,
            events_subbed: EventSet::EMPTY,
            status: None,
            frames: Vec::new(),
            next_frame_index: 0,
            boxes: Vec::new(),
            next_box_index: 0,
            jpeg_count: 0,
            next_jpeg_index: 0,
            extra: Vec::new(),
        }
    }

    /// Opens a JPEG XL image from the named file.
    ///
    /// Safe to call with a file already open; all state related to the
    /// previous file is discarded.
    ///
    /// `buffer_kib` caps how much of the input is kept in memory at one
    /// time, in KiB; `0` selects the 64 MiB default. If the file is smaller
    /// than the cap, the buffer is sized to the file exactly.
    pub fn open_file(
        &mut self,
        path: impl AsRef<Path>,
        flags: DecoderFlags,
        hints: DecoderHints,
        buffer_kib: usize,
    ) -> Result<()> {
        self.close_impl(true);

        let file = std::fs::File::open(path.as_ref())?;
        let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        let mut buffer_bytes = InputBuffer::cap_bytes(buffer_kib);
        let mut allocate_full = false;
        if file_size > 0 {
            allocate_full = true;
            if (file_size as u128) < buffer_bytes as u128 {
                buffer_bytes = file_size as usize;
            }
        }

        self.source = SourceState::Seekable {
            stream: Box::new(file),
            anchor: 0,
        };
        self.open_impl(flags, hints, buffer_bytes, allocate_full)
    }

    /// Opens a JPEG XL image from a seekable stream.
    ///
    /// Reading starts at the stream's current position, which is captured
    /// as the rewind anchor: reading image features out of their natural
    /// sequence may require seeking back there. The stream is borrowed
    /// exclusively until this decoder is closed, reopened or dropped, and
    /// its position is indeterminate afterwards.
    pub fn open_stream<R: Read + Seek + 'src>(
        &mut self,
        mut stream: R,
        flags: DecoderFlags,
        hints: DecoderHints,
        buffer_kib: usize,
    ) -> Result<()> {
        self.close_impl(true);
        let anchor = stream.stream_position()?;
        self.source = SourceState::Seekable {
            stream: Box::new(stream),
            anchor,
        };
        self.open_impl(flags, hints, InputBuffer::cap_bytes(buffer_kib), false)
    }

    /// Opens a JPEG XL image from a non-seekable byte source.
    ///
    /// Any operation that would need a second pass over the input fails
    /// with [`Error::NotSeekable`] unless the whole file fits in the
    /// buffer. Accessing each feature once, in its natural sequence, never
    /// needs a second pass.
    pub fn open_reader<R: Read + 'src>(
        &mut self,
        stream: R,
        flags: DecoderFlags,
        hints: DecoderHints,
        buffer_kib: usize,
    ) -> Result<()> {
        self.close_impl(true);
        self.source = SourceState::Unseekable(Box::new(stream));
        self.open_impl(flags, hints, InputBuffer::cap_bytes(buffer_kib), false)
    }

    /// Opens a JPEG XL image from a fully buffered file in memory.
    ///
    /// The byte range is borrowed immutably until this decoder is closed,
    /// reopened or dropped. [`is_fully_buffered`][Self::is_fully_buffered]
    /// is true from the start, so every feature can be accessed in any
    /// sequence any number of times.
    pub fn open_memory(
        &mut self,
        memory: &'src [u8],
        flags: DecoderFlags,
        hints: DecoderHints,
    ) -> Result<()> {
        self.close_impl(true);
        self.source = SourceState::Memory;
        self.input = InputBuffer::for_memory(memory);
        self.open_impl(flags, hints, memory.len(), false)
    }

    fn open_impl(
        &mut self,
        flags: DecoderFlags,
        hints: DecoderHints,
        buffer_bytes: usize,
        allocate_full: bool,
    ) -> Result<()> {
        self.session.set_parallel_runner(self.runner.clone());

        if !flags.no_coalesce {
            self.state.is_coalescing = true;
        } else {
            self.session
                .set_coalescing(false)
                .map_err(session_error)?;
        }
        if flags.keep_orientation {
            self.session
                .set_keep_orientation(true)
                .map_err(session_error)?;
        }
        if flags.unpremultiply_alpha {
            self.session
                .set_unpremultiply_alpha(true)
                .map_err(session_error)?;
        }

        match &mut self.source {
            SourceState::Memory => {
                self.state.whole_file_buffered = true;
                self.input_closed = true;
            }
            SourceState::Seekable { stream, .. } => {
                self.input = InputBuffer::for_stream(buffer_bytes, allocate_full);
                if self.input.prime(&mut *stream)? {
                    self.state.whole_file_buffered = true;
                    self.input_closed = true;
                }
            }
            SourceState::Unseekable(stream) => {
                self.input = InputBuffer::for_stream(buffer_bytes, allocate_full);
                if self.input.prime(&mut *stream)? {
                    self.state.whole_file_buffered = true;
                    self.input_closed = true;
                }
            }
            SourceState::Closed => return Err(Error::Usage("no source bound")),
        }
        tracing::debug!(
            buffered = self.input.bytes().len(),
            whole_file = self.state.whole_file_buffered,
            "Primed input buffer"
        );

        match check_signature(self.input.bytes()) {
            Signature::Codestream => {
                // A bare codestream has no container, hence no boxes.
                self.state.seen_all_boxes = true;
            }
            Signature::Container => {}
            Signature::Png => {
                return Err(Error::NotJxl {
                    detail: "this is a PNG - convert inputs to JXL first",
                });
            }
            Signature::NotEnoughBytes | Signature::Invalid => {
                return Err(Error::NotJxl {
                    detail: "input is not a JXL file",
                });
            }
        }

        self.state.is_open = true;

        let mut events = EventSet::of(&[Event::BasicInfo, Event::Frame]);
        if hints.want_boxes {
            events = events.with(Event::Box);
        }
        if !hints.no_pixels {
            events = events.with(Event::FullImage);
        }
        if hints.want_jpeg {
            events = events.with(Event::JpegReconstruction).with(Event::FullImage);
        }
        if !hints.no_color_profile {
            events = events.with(Event::ColorEncoding);
        }
        self.session.subscribe(events).map_err(session_error)?;
        self.events_subbed = events;
        Ok(())
    }

    /// Closes the file currently being decoded, if any, and releases the
    /// source and internal buffers. Idempotent, and never required; a
    /// reopen or drop does the same work.
    pub fn close(&mut self) {
        self.close_impl(false);
    }

    fn close_impl(&mut self, reopening: bool) {
        self.state = DecoderState::default();
        self.input = InputBuffer::for_memory(&[]);
        self.input_closed = false;
        self.session.reset();
        self.events_subbed = EventSet::EMPTY;
        self.status = None;
        self.boxes.clear();
        self.next_box_index = 0;
        self.frames.clear();
        self.next_frame_index = 0;
        self.jpeg_count = 0;
        self.next_jpeg_index = 0;
        self.extra.clear();
        if !reopening {
            self.source = SourceState::Closed;
            self.orig_icc = Vec::new();
            self.data_icc = Vec::new();
            self.orig_color_enc = None;
            self.data_color_enc = None;
            self.boxes.shrink_to_fit();
            self.frames.shrink_to_fit();
            self.extra.shrink_to_fit();
        }
    }

    /// True iff all bytes of the input are in memory, which means every
    /// image feature can be accessed in any sequence as many times as you
    /// like.
    pub fn is_fully_buffered(&self) -> bool {
        self.state.whole_file_buffered
    }
}

impl Decoder<'_> {
    fn check_open(&self) -> Result<()> {
        if !self.state.is_open {
            return Err(Error::Usage("no file open"));
        }
        Ok(())
    }

    /// Refills the input buffer after the codec asked for more input.
    fn replenish(&mut self) -> Result<()> {
        let reader: &mut dyn Read = match &mut self.source {
            SourceState::Seekable { stream, .. } => stream,
            SourceState::Unseekable(stream) => stream,
            SourceState::Memory | SourceState::Closed => {
                return Err(Error::CorruptedStream(
                    "codec requested input past the end of a fully buffered source".into(),
                ));
            }
        };
        let outcome = self.input.replenish(reader)?;
        if outcome.eof {
            if self.input.start_is_buffered() {
                self.state.whole_file_buffered = true;
            }
            tracing::debug!(
                whole_file = self.state.whole_file_buffered,
                "Reached EOF; closing codec input"
            );
            self.input_closed = true;
        }
        Ok(())
    }

    /// Rewinds the codec and the input source, resubscribing to `events`.
    ///
    /// Cached records, profiles and `seen_all`/`got` state survive a
    /// rewind; only the enumeration cursors reset.
    fn rewind_with(&mut self, events: EventSet) -> Result<()> {
        tracing::debug!(?events, "Rewinding");
        self.session.rewind();
        self.session.subscribe(events).map_err(|e| {
            Error::CorruptedStream(format!("failed to resubscribe events after rewind: {e}"))
        })?;
        self.events_subbed = events;
        self.next_frame_index = 0;
        self.next_box_index = 0;
        self.next_jpeg_index = 0;
        self.status = None;

        if self.input.start_is_buffered() {
            // Replay the buffered bytes; no source access needed.
            self.input.rewind_in_place();
            self.input_closed = self.state.whole_file_buffered;
        } else {
            self.input.reset_for_seek();
            self.input_closed = false;
            match &mut self.source {
                SourceState::Seekable { stream, anchor } => {
                    stream
                        .seek(SeekFrom::Start(*anchor))
                        .map_err(|_| Error::NotSeekable)?;
                }
                _ => return Err(Error::NotSeekable),
            }
        }
        Ok(())
    }

    /// Runs the codec until a stop condition is met, applying each event's
    /// side effects exactly once per surfaced event.
    ///
    /// Stops when the codec reports `Success`, when any event in `until`
    /// is surfaced, or when a [`Stops`] cursor condition is reached.
    /// `NeedMoreInput` never escapes; input is replenished internally. A
    /// codec error triggers one best-effort rewind (to leave the decoder
    /// reusable) and surfaces [`Error::CorruptedStream`].
    fn process_until(
        &mut self,
        until: EventSet,
        stops: Stops,
        sinks: &mut Sinks<'_>,
    ) -> Result<Event> {
        loop {
            let processed = {
                let mut io = SessionIo {
                    input: self.input.window(),
                    input_closed: self.input_closed,
                    consumed: 0,
                    sinks: &mut *sinks,
                };
                let result = self.session.process(&mut io);
                let consumed = io.consumed;
                (result, consumed)
            };
            let event = match processed {
                (Ok(event), consumed) => {
                    self.input.advance(consumed);
                    event
                }
                (Err(e), _) => {
                    let mut msg = format!("input failed to decode: {e}");
                    if let Err(rewind_err) = self.rewind_with(self.events_subbed) {
                        msg = format!(
                            "{msg}; while rewinding the input, another error occurred: {rewind_err}"
                        );
                    }
                    return Err(Error::CorruptedStream(msg));
                }
            };
            self.status = Some(event);
            tracing::trace!(?event, "Codec event");

            match event {
                Event::Success => {
                    if self.events_subbed.contains(Event::Frame) {
                        self.state.seen_all_frames = true;
                    }
                    if self.events_subbed.contains(Event::Box) {
                        self.state.seen_all_boxes = true;
                    }
                    if self.events_subbed.contains(Event::JpegReconstruction) {
                        self.state.seen_all_jpeg = true;
                    }
                    return Ok(event);
                }

                Event::NeedMoreInput => {
                    self.replenish()?;
                    continue;
                }

                Event::BasicInfo => {
                    // Not re-subscribable without a full reset; drop it so
                    // rewinds don't ask for it again.
                    self.events_subbed = self.events_subbed.without(Event::BasicInfo);
                    self.basic_info = self.session.basic_info().map_err(session_error)?;
                    self.state.got_basic_info = true;
                }

                Event::Frame => {
                    if self.frames.len() <= self.next_frame_index {
                        let header = self.session.frame_header().map_err(session_error)?;
                        let ec_blend_info = if !self.state.is_coalescing {
                            let count = self.basic_info.num_extra_channels as usize;
                            let mut blend = Vec::with_capacity(count);
                            for ec in 0..count {
                                blend.push(
                                    self.session
                                        .extra_channel_blend_info(ec)
                                        .map_err(session_error)?,
                                );
                            }
                            Some(blend)
                        } else {
                            None
                        };
                        let name = if header.name_len > 0 {
                            Some(self.session.frame_name().map_err(session_error)?)
                        } else {
                            None
                        };
                        self.frames.push(FrameRecord {
                            header,
                            name,
                            ec_blend_info,
                        });
                        // is_last only marks the last animation frame, so
                        // only trust it when coalescing.
                        if self.state.is_coalescing && header.is_last {
                            self.state.seen_all_frames = true;
                        }
                    }
                    self.next_frame_index += 1;

                    let stop = match stops.frame {
                        StopAt::All => self.state.seen_all_frames,
                        StopAt::Specific(target) => self.next_frame_index == target + 1,
                        StopAt::None => false,
                    };
                    if stop {
                        return Ok(event);
                    }
                }

                Event::Box => {
                    if self.boxes.len() <= self.next_box_index {
                        let raw_type = self.session.box_type(false).map_err(session_error)?;
                        let compressed = raw_type == BoxType::BROTLI_COMPRESSED;
                        let ty = if compressed {
                            self.session.box_type(true).map_err(session_error)?
                        } else {
                            raw_type
                        };
                        let size = self.session.box_size_contents().map_err(session_error)?;
                        let mut unbounded = false;
                        if size == 0 {
                            // Actually empty, or extending to EOF?
                            if let Ok(0) = self.session.box_size_raw() {
                                unbounded = true;
                            }
                        }
                        self.boxes.push(BoxRecord {
                            ty,
                            compressed,
                            size,
                            unbounded,
                        });
                    }
                    self.next_box_index += 1;

                    let stop = match stops.boxes {
                        StopAt::All => self.state.seen_all_boxes,
                        StopAt::Specific(target) => self.next_box_index == target + 1,
                        StopAt::None => false,
                    };
                    if stop {
                        return Ok(event);
                    }
                }

                Event::ColorEncoding => {
                    self.events_subbed = self.events_subbed.without(Event::ColorEncoding);
                    self.state.got_color = true;
                    if let Some(enc) = self
                        .session
                        .encoded_color_profile(ColorProfileTarget::Original)
                    {
                        self.orig_color_enc = Some(enc);
                        self.state.got_orig_color_enc = true;
                    }
                    if let Some(enc) = self.session.encoded_color_profile(ColorProfileTarget::Data)
                    {
                        self.data_color_enc = Some(enc);
                        self.state.got_data_color_enc = true;
                    }
                    self.orig_icc = self
                        .session
                        .icc_profile(ColorProfileTarget::Original)
                        .unwrap_or_default();
                    self.data_icc = self
                        .session
                        .icc_profile(ColorProfileTarget::Data)
                        .unwrap_or_default();
                }

                Event::NeedImageOutBuffer => {
                    // The client didn't ask for this frame's pixels.
                    tracing::trace!(
                        frame = self.next_frame_index.wrapping_sub(1),
                        "No image sink for this frame; skipping"
                    );
                    self.session.skip_current_frame().map_err(session_error)?;
                    continue;
                }

                Event::JpegReconstruction => {
                    self.next_jpeg_index += 1;
                    self.jpeg_count = self.jpeg_count.max(self.next_jpeg_index);

                    let stop = match stops.jpeg {
                        StopAt::All => self.state.seen_all_jpeg,
                        StopAt::Specific(target) => self.next_jpeg_index == target + 1,
                        StopAt::None => false,
                    };
                    if stop {
                        return Ok(event);
                    }
                }

                Event::FullImage
                | Event::NeedJpegOutBuffer
                | Event::BoxNeedMoreOutput
                | Event::JpegNeedMoreOutput => {}
            }

            if until.contains(event) {
                return Ok(event);
            }
        }
    }
}

impl Decoder<'_> {
    fn ensure_basic_info(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.state.got_basic_info {
            // BasicInfo is not always the first event; boxes and JPEG
            // reconstruction metadata can come first.
            let event = self.process_until(
                Event::BasicInfo.into(),
                Stops::default(),
                &mut Sinks::none(),
            )?;
            if event != Event::BasicInfo {
                return Err(Error::CorruptedStream(format!(
                    "unexpected event {event:?}; expected basic info"
                )));
            }
        }
        Ok(())
    }

    /// Basic information about the image.
    pub fn basic_info(&mut self) -> Result<BasicInfo> {
        self.ensure_basic_info()?;
        Ok(self.basic_info)
    }

    /// Image width in pixels. Equivalent to `basic_info()?.xsize`.
    pub fn xsize(&mut self) -> Result<u32> {
        self.ensure_basic_info()?;
        Ok(self.basic_info.xsize)
    }

    /// Image height in pixels. Equivalent to `basic_info()?.ysize`.
    pub fn ysize(&mut self) -> Result<u32> {
        self.ensure_basic_info()?;
        Ok(self.basic_info.ysize)
    }

    fn ensure_extra_channel_info(&mut self) -> Result<()> {
        self.ensure_basic_info()?;
        let count = self.basic_info.num_extra_channels as usize;
        if self.extra.len() < count {
            self.extra.clear();
            for index in 0..count {
                let info = self
                    .session
                    .extra_channel_info(index)
                    .map_err(session_error)?;
                let name = self
                    .session
                    .extra_channel_name(index)
                    .map_err(session_error)?;
                self.extra.push(ExtraChannelRecord { info, name });
            }
        }
        Ok(())
    }

    /// Information about all extra channels, including the main alpha
    /// channel if any.
    pub fn extra_channel_info(&mut self) -> Result<&[ExtraChannelRecord]> {
        self.ensure_extra_channel_info()?;
        Ok(&self.extra)
    }

    /// Suggests a pixel format for decoding frames from this image: the
    /// smallest buffer that preserves the declared precision, covering the
    /// colour channels plus the main alpha channel if present.
    ///
    /// Samples outside the nominal `[0, 1]` range cannot be detected before
    /// decoding; force a float type if you need to avoid clamping them.
    pub fn suggest_pixel_format(&mut self) -> Result<PixelFormat> {
        self.ensure_basic_info()?;
        let info = &self.basic_info;
        Ok(PixelFormat::suggest(
            info.bits_per_sample.max(info.alpha_bits),
            info.exponent_bits_per_sample.max(info.alpha_exponent_bits),
            info.num_color_channels + u32::from(info.alpha_bits > 0),
        ))
    }
}

impl Decoder<'_> {
    /// Populates colour profiles, or fails with `CorruptedStream`.
    ///
    /// With `go_there_now` the codec is driven (rewinding if needed) to
    /// exactly the colour encoding event; otherwise having passed it on an
    /// earlier pass is fine.
    fn ensure_color(&mut self, go_there_now: bool) -> Result<()> {
        self.check_open()?;
        if self.status == Some(Event::ColorEncoding) {
            return Ok(());
        }
        let past_color = self.state.got_color;

        if go_there_now || !past_color {
            if (go_there_now && past_color)
                || !self.events_subbed.contains(Event::ColorEncoding)
            {
                self.rewind_with(self.events_subbed.with(Event::ColorEncoding))?;
            }
            let event = self.process_until(
                Event::ColorEncoding.into(),
                Stops::default(),
                &mut Sinks::none(),
            )?;
            if event != Event::ColorEncoding {
                self.state.got_orig_color_enc = false;
                self.state.got_data_color_enc = false;
                return Err(Error::CorruptedStream(
                    "no color encoding returned from codec".into(),
                ));
            }
            self.state.got_color = true;
        }
        Ok(())
    }

    /// The ICC profile for this image, or an empty slice if none is
    /// available.
    ///
    /// `Data` targets the profile of pixels decoded through this object;
    /// `Original` the profile the image was tagged with at encode time.
    pub fn icc_profile(&mut self, target: ColorProfileTarget) -> Result<&[u8]> {
        self.ensure_color(false)?;
        Ok(match target {
            ColorProfileTarget::Data => &self.data_icc,
            ColorProfileTarget::Original => &self.orig_icc,
        })
    }

    /// Size in bytes of the image's ICC profile, or 0 if none is available.
    pub fn icc_profile_len(&mut self, target: ColorProfileTarget) -> Result<usize> {
        self.ensure_color(false)?;
        Ok(match target {
            ColorProfileTarget::Data => self.data_icc.len(),
            ColorProfileTarget::Original => self.orig_icc.len(),
        })
    }

    /// The structured colour profile for this image, if available.
    pub fn encoded_color_profile(
        &mut self,
        target: ColorProfileTarget,
    ) -> Result<Option<ColorEncoding>> {
        self.ensure_color(false)?;
        Ok(match target {
            ColorProfileTarget::Data => {
                self.state.got_data_color_enc.then_some(self.data_color_enc).flatten()
            }
            ColorProfileTarget::Original => {
                self.state.got_orig_color_enc.then_some(self.orig_color_enc).flatten()
            }
        })
    }

    /// Sets the preferred colour profile for decoded pixels. Exactly one of
    /// `encoded` and `icc` must be provided, and no pixels may have been
    /// decoded yet. Requesting an ICC profile requires a CMS, which this
    /// API cannot set yet.
    ///
    /// Returns `true` if the profile was set, `false` if the codec could
    /// not honour it for this image (e.g. an unsupported conversion, or a
    /// non-XYB image where the override fails silently in the backing
    /// codec and is reported here as `false`).
    pub fn set_preferred_output_profile(
        &mut self,
        encoded: Option<&ColorEncoding>,
        icc: Option<&[u8]>,
    ) -> Result<bool> {
        if self.state.decoded_some_pixels {
            return Err(Error::Usage(
                "can't set a color profile after decoding has started",
            ));
        }
        if icc.is_some() && !self.state.have_cms {
            return Err(Error::Usage(
                "can't request an ICC output profile without setting a CMS",
            ));
        }
        if encoded.is_some() == icc.is_some() {
            return Err(Error::Usage(
                "exactly one of an encoded profile and an ICC profile must be provided",
            ));
        }

        let mut result = true;
        self.state.got_data_color_enc = false;
        self.data_icc.clear();
        self.ensure_color(true)?;
        if self
            .session
            .set_output_color_profile(encoded, icc)
            .is_err()
        {
            result = false;
        }

        // Refetch the data-target profile.
        if let Some(enc) = self.session.encoded_color_profile(ColorProfileTarget::Data) {
            self.data_color_enc = Some(enc);
            self.state.got_data_color_enc = true;
        } else if encoded.is_some() {
            result = false;
        }
        self.data_icc = self
            .session
            .icc_profile(ColorProfileTarget::Data)
            .unwrap_or_default();
        if icc.is_some() && self.data_icc.is_empty() {
            result = false;
        }
        if !self.state.got_data_color_enc && self.data_icc.is_empty() {
            return Err(Error::CorruptedStream(
                "unexpected failure while checking the output color profile".into(),
            ));
        }
        Ok(result)
    }
}

impl<'src> Decoder<'src> {
    /// Total number of frames in this image: animation frames when
    /// coalescing, all (non-internal) layers otherwise.
    ///
    /// If the frames haven't all been seen yet this drives the codec past
    /// every remaining frame header. To also decode pixels, iterating with
    /// [`frames`][Self::frames] is usually cheaper than counting first.
    pub fn frame_count(&mut self) -> Result<usize> {
        if self.state.seen_all_frames {
            return Ok(self.frames.len());
        }
        if self.state.got_basic_info
            && self.state.is_coalescing
            && !self.basic_info.have_animation
        {
            return Ok(1);
        }

        self.check_open()?;
        if !self.events_subbed.contains(Event::Frame) {
            self.rewind_with(self.events_subbed.with(Event::Frame))?;
        }

        // Fast-forward past the frames we already know.
        if self.next_frame_index < self.frames.len() {
            self.session
                .skip_frames(self.frames.len() - self.next_frame_index);
            self.next_frame_index = self.frames.len();
        }
        self.process_until(
            EventSet::EMPTY,
            Stops {
                frame: StopAt::All,
                ..Stops::default()
            },
            &mut Sinks::none(),
        )?;
        Ok(self.frames.len())
    }

    /// Drives the codec to the frame event for `index`, rewinding and
    /// skipping as needed. On success the frame cache covers `index`.
    fn goto_frame(&mut self, index: usize) -> Result<()> {
        if self.state.seen_all_frames && index >= self.frames.len() {
            return Err(Error::IndexOutOfRange {
                kind: "frame",
                index,
                len: self.frames.len(),
            });
        }
        // Already in exactly the right state?
        if self.status == Some(Event::Frame) && self.next_frame_index == index + 1 {
            return Ok(());
        }

        let gone_past = self.next_frame_index > index;
        let unsubscribed = !self.events_subbed.contains(Event::Frame);
        if gone_past || unsubscribed {
            tracing::debug!(index, gone_past, unsubscribed, "Rewinding to reach frame");
            self.rewind_with(self.events_subbed.with(Event::Frame))?;
        }

        let skip_to = index.min(self.frames.len());
        if self.next_frame_index != skip_to {
            self.session.skip_frames(skip_to - self.next_frame_index);
            self.next_frame_index = skip_to;
        }

        let event = self.process_until(
            EventSet::EMPTY,
            Stops {
                frame: StopAt::Specific(index),
                ..Stops::default()
            },
            &mut Sinks::none(),
        )?;
        if event == Event::Frame && self.next_frame_index == index + 1 {
            return Ok(());
        }
        if self.state.seen_all_frames && index >= self.frames.len() {
            return Err(Error::IndexOutOfRange {
                kind: "frame",
                index,
                len: self.frames.len(),
            });
        }
        Err(Error::CorruptedStream(format!(
            "failed to find frame {index}"
        )))
    }

    /// Metadata for the frame at `index`. Frames can be accessed in any
    /// order, but sequential access avoids rewinds.
    pub fn frame_info(&mut self, index: usize) -> Result<&FrameRecord> {
        if index >= self.frames.len() {
            self.check_open()?;
            self.goto_frame(index)?;
        }
        Ok(&self.frames[index])
    }

    /// Minimum buffer size for the pixels of the frame at `index`.
    ///
    /// Uses the frame's own layer dimensions, which differ from the canvas
    /// when coalescing is disabled.
    pub fn frame_buffer_size_for(&mut self, index: usize, format: &PixelFormat) -> Result<usize> {
        let layer = self.frame_info(index)?.header.layer_info;
        frame_buffer_size(layer.xsize, layer.ysize, format)
    }

    /// Returns a forward iterator over the frames of this image.
    ///
    /// The iterator borrows the decoder; stepping it populates the frame
    /// cache on demand.
    pub fn frames(&mut self) -> FrameIter<'_, 'src> {
        FrameIter {
            decoder: self,
            next_index: 0,
            done: false,
        }
    }

    /// Decodes the pixels of the frame at `index`.
    ///
    /// The interleaved colour channels (plus alpha, if `format` has the
    /// channels for it) are written to `buffer` in `format`. Pass `None`
    /// to decode only extra channels; the codec still requires a main
    /// output buffer in that case, so a throwaway one is registered
    /// internally.
    ///
    /// Each [`ExtraChannelRequest`] receives one channel in planar layout.
    ///
    /// When coalescing is disabled the frame's dimensions may differ from
    /// the image's; size buffers via
    /// [`frame_buffer_size_for`][Self::frame_buffer_size_for].
    pub fn frame_pixels(
        &mut self,
        index: usize,
        format: &PixelFormat,
        buffer: Option<&mut [u8]>,
        mut extra: Vec<ExtraChannelRequest<'_>>,
    ) -> Result<()> {
        if buffer.is_none() && extra.is_empty() {
            return Ok(());
        }
        if self.state.seen_all_frames && index >= self.frames.len() {
            return Err(Error::IndexOutOfRange {
                kind: "frame",
                index,
                len: self.frames.len(),
            });
        }

        if !self.events_subbed.contains(Event::FullImage) {
            self.rewind_with(self.events_subbed.with(Event::FullImage))?;
        }
        self.goto_frame(index)?;
        let layer = self.frames[index].header.layer_info;

        if !extra.is_empty() {
            self.ensure_extra_channel_info()?;
            for request in &extra {
                if request.channel_index >= self.extra.len() {
                    return Err(Error::IndexOutOfRange {
                        kind: "extra channel",
                        index: request.channel_index,
                        len: self.extra.len(),
                    });
                }
                let required =
                    frame_buffer_size(layer.xsize, layer.ysize, &request.format.planar())?;
                if request.buf.len() < required {
                    return Err(Error::BufferTooSmall {
                        required,
                        got: request.buf.len(),
                    });
                }
            }
        }

        // Block any further output-profile changes.
        self.state.decoded_some_pixels = true;

        let mut dummy = Vec::new();
        let mut sinks = Sinks::none();
        match buffer {
            Some(buffer) => {
                let required = frame_buffer_size(layer.xsize, layer.ysize, format)?;
                if buffer.len() < required {
                    return Err(Error::BufferTooSmall {
                        required,
                        got: buffer.len(),
                    });
                }
                sinks.image = Some(PixelSink {
                    format: *format,
                    buf: buffer,
                });
            }
            None => {
                // The codec emits nothing until a main image output buffer
                // is set, even when only extra channels are wanted, so
                // register a throwaway one.
                let dummy_format = PixelFormat {
                    num_channels: self.basic_info.num_color_channels,
                    data_type: DataType::U8,
                    endianness: Endianness::Native,
                    align: 0,
                };
                dummy = vec![0u8; frame_buffer_size(layer.xsize, layer.ysize, &dummy_format)?];
                sinks.image = Some(PixelSink {
                    format: dummy_format,
                    buf: &mut dummy,
                });
            }
        }
        sinks.extra = extra
            .iter_mut()
            .map(|request| ExtraChannelSink {
                channel: request.channel_index,
                format: request.format.planar(),
                buf: &mut *request.buf,
            })
            .collect();

        let event = self.process_until(Event::FullImage.into(), Stops::default(), &mut sinks)?;
        if event != Event::FullImage || self.next_frame_index != index + 1 {
            return Err(Error::CorruptedStream(format!(
                "failed to read pixels for frame {index}"
            )));
        }
        Ok(())
    }
}

impl Decoder<'_> {
    /// Number of boxes in this image's container; 0 for a bare codestream.
    /// This includes metadata boxes and boxes reserved for the container
    /// format itself.
    pub fn box_count(&mut self) -> Result<usize> {
        if self.state.seen_all_boxes {
            return Ok(self.boxes.len());
        }
        self.check_open()?;
        if !self.events_subbed.contains(Event::Box) {
            self.rewind_with(self.events_subbed.with(Event::Box))?;
        }
        self.process_until(
            EventSet::EMPTY,
            Stops {
                boxes: StopAt::All,
                ..Stops::default()
            },
            &mut Sinks::none(),
        )?;
        Ok(self.boxes.len())
    }

    fn goto_box(&mut self, index: usize) -> Result<()> {
        if self.state.seen_all_boxes && index >= self.boxes.len() {
            return Err(Error::IndexOutOfRange {
                kind: "box",
                index,
                len: self.boxes.len(),
            });
        }
        if self.status == Some(Event::Box) && self.next_box_index == index + 1 {
            return Ok(());
        }
        if index < self.next_box_index || !self.events_subbed.contains(Event::Box) {
            self.rewind_with(self.events_subbed.with(Event::Box))?;
        }
        let event = self.process_until(
            EventSet::EMPTY,
            Stops {
                boxes: StopAt::Specific(index),
                ..Stops::default()
            },
            &mut Sinks::none(),
        )?;
        if event != Event::Box {
            return Err(Error::IndexOutOfRange {
                kind: "box",
                index,
                len: self.boxes.len(),
            });
        }
        Ok(())
    }

    /// Metadata for the box at `index`. For a compressed box the type is
    /// the decompressed inner type, never `brob`.
    pub fn box_info(&mut self, index: usize) -> Result<BoxRecord> {
        if index >= self.boxes.len() {
            self.goto_box(index)?;
        }
        Ok(self.boxes[index])
    }

    /// Reads the payload of the box at `index` into `destination`.
    ///
    /// With `decompress` set, a `brob` box's payload is decompressed and
    /// the inner payload is written out; otherwise the raw compressed
    /// payload is. The argument is ignored for uncompressed boxes.
    ///
    /// Returns `(fully_read, written)`; running out of `destination` space
    /// is not an error, the partial content is preserved. The decompressed
    /// size of a compressed box cannot be predicted, so check `fully_read`.
    pub fn box_content(
        &mut self,
        index: usize,
        destination: &mut [u8],
        decompress: bool,
    ) -> Result<(bool, usize)> {
        self.check_open()?;
        self.goto_box(index)?;

        if self.boxes[index].compressed {
            match self.session.set_decompress_boxes(decompress) {
                Ok(()) => {}
                #[cfg(feature = "brotli")]
                Err(jxl_session::SessionError::NoBrotli) if decompress => {
                    return self.box_content_decompress_fallback(index, destination);
                }
                Err(e) => return Err(session_error(e)),
            }
        }
        self.read_box_payload(index, destination)
    }

    fn read_box_payload(&mut self, index: usize, destination: &mut [u8]) -> Result<(bool, usize)> {
        let mut sinks = Sinks::none();
        sinks.box_out = Some(ByteSink::new(destination));
        let until = EventSet::of(&[Event::Success, Event::Box, Event::BoxNeedMoreOutput]);
        let event = self.process_until(until, Stops::default(), &mut sinks)?;
        let written = sinks.box_out.as_ref().map_or(0, |sink| sink.written);
        // An unbounded box's true size is known once its payload has been
        // read to the end of the file.
        if event == Event::Success && self.boxes[index].unbounded {
            self.boxes[index].size = written as u64;
        }
        Ok((matches!(event, Event::Success | Event::Box), written))
    }

    /// Reads the payload of the box at `index` into an owned buffer,
    /// growing it as needed up to `max` bytes.
    ///
    /// Returns `(fully_read, content)`; hitting `max` truncates the
    /// content and is reported through `fully_read`, not as an error.
    pub fn box_content_vec(
        &mut self,
        index: usize,
        max: usize,
        decompress: bool,
    ) -> Result<(bool, Vec<u8>)> {
        self.check_open()?;
        self.goto_box(index)?;

        let compressed = self.boxes[index].compressed;
        if compressed {
            match self.session.set_decompress_boxes(decompress) {
                Ok(()) => {}
                #[cfg(feature = "brotli")]
                Err(jxl_session::SessionError::NoBrotli) if decompress => {
                    let raw = self.box_content_vec(index, usize::MAX, false)?.1;
                    let mut content = Vec::new();
                    let full = decompress_brob_payload(&raw, max, &mut content)?;
                    return Ok((full, content));
                }
                Err(e) => return Err(session_error(e)),
            }
        }
        // The stored size of a compressed box is its compressed size, so it
        // only predicts (and validates) raw reads.
        let expected_size = if compressed && decompress {
            0
        } else {
            self.boxes[index].size as usize
        };

        let mut destination = vec![0u8; max.min(expected_size.max(32))];
        let mut total_written = 0usize;
        loop {
            let event;
            let written;
            {
                let mut sinks = Sinks::none();
                sinks.box_out = Some(ByteSink::new(&mut destination[total_written..]));
                let until = EventSet::of(&[Event::Success, Event::Box, Event::BoxNeedMoreOutput]);
                event = self.process_until(until, Stops::default(), &mut sinks)?;
                written = sinks.box_out.as_ref().map_or(0, |sink| sink.written);
            }
            total_written += written;

            if matches!(event, Event::Success | Event::Box) {
                if expected_size > 0 && total_written != expected_size {
                    return Err(Error::CorruptedStream(format!(
                        "unexpected length for box {index} payload - expected {expected_size}, got {total_written}"
                    )));
                }
                destination.truncate(total_written);
                if event == Event::Success && self.boxes[index].unbounded {
                    self.boxes[index].size = total_written as u64;
                }
                return Ok((true, destination));
            }

            if destination.len() >= max {
                destination.truncate(total_written);
                tracing::debug!(total_written, "Box payload truncated at caller's cap");
                return Ok((false, destination));
            }
            let new_size = destination
                .len()
                .max(16)
                .checked_mul(2)
                .unwrap_or(usize::MAX)
                .min(max);
            destination.resize(new_size, 0);
        }
    }

    /// Facade-side brob decompression, used when the codec itself lacks
    /// Brotli support.
    #[cfg(feature = "brotli")]
    fn box_content_decompress_fallback(
        &mut self,
        index: usize,
        destination: &mut [u8],
    ) -> Result<(bool, usize)> {
        tracing::debug!(index, "Codec lacks Brotli support; decompressing brob in the facade");
        let (full, raw) = self.box_content_vec(index, usize::MAX, false)?;
        if !full {
            return Err(Error::CorruptedStream(
                "failed to read raw brob payload".into(),
            ));
        }
        let mut out = Vec::new();
        let fully = decompress_brob_payload(&raw, destination.len(), &mut out)?;
        let take = out.len().min(destination.len());
        destination[..take].copy_from_slice(&out[..take]);
        Ok((fully, take))
    }

    /// The declared codestream level, or -1 when no `jxll` box declares
    /// one. Levels only exist in container files.
    pub fn codestream_level(&mut self) -> Result<i32> {
        self.ensure_basic_info()?;
        if !self.basic_info.have_container {
            return Ok(-1);
        }
        if !self.state.seen_all_boxes && !self.events_subbed.contains(Event::Box) {
            self.rewind_with(self.events_subbed.with(Event::Box))?;
        }

        // jxll can't occur before box index 2.
        let mut index = 2usize;
        loop {
            if index >= self.boxes.len() {
                if self.state.seen_all_boxes {
                    return Ok(-1);
                }
                let event = self.process_until(
                    Event::Success.into(),
                    Stops {
                        boxes: StopAt::Specific(index),
                        ..Stops::default()
                    },
                    &mut Sinks::none(),
                )?;
                if event != Event::Box {
                    return Ok(-1);
                }
            }
            if self.boxes[index].ty == BoxType::JXL_LEVEL {
                let mut level = [0u8; 1];
                let (_, written) = self.box_content(index, &mut level, false)?;
                if written == 1 {
                    return Ok(level[0] as i32);
                }
                return Ok(-1);
            }
            index += 1;
        }
    }
}

impl Decoder<'_> {
    /// Whether this image carries JPEG reconstruction data.
    pub fn has_jpeg_reconstruction(&mut self) -> Result<bool> {
        if self.jpeg_count > 0 {
            return Ok(true);
        }
        if self.state.seen_all_jpeg {
            return Ok(false);
        }
        self.check_open()?;
        if !self.events_subbed.contains(Event::JpegReconstruction) {
            self.rewind_with(
                self.events_subbed
                    .with(Event::JpegReconstruction)
                    .with(Event::FullImage),
            )?;
        }
        let event = self.process_until(
            Event::JpegReconstruction.into(),
            Stops::default(),
            &mut Sinks::none(),
        )?;
        Ok(event == Event::JpegReconstruction)
    }

    fn goto_jpeg(&mut self, index: usize) -> Result<()> {
        if self.state.seen_all_jpeg && index >= self.jpeg_count {
            return Err(Error::IndexOutOfRange {
                kind: "JPEG reconstruction",
                index,
                len: self.jpeg_count,
            });
        }
        if self.status == Some(Event::JpegReconstruction) && self.next_jpeg_index == index + 1 {
            return Ok(());
        }
        let needed = EventSet::of(&[Event::JpegReconstruction, Event::FullImage]);
        if index < self.next_jpeg_index || !self.events_subbed.contains_all(needed) {
            self.rewind_with(self.events_subbed.union(needed))?;
        }
        let event = self.process_until(
            EventSet::EMPTY,
            Stops {
                jpeg: StopAt::Specific(index),
                ..Stops::default()
            },
            &mut Sinks::none(),
        )?;
        if event != Event::JpegReconstruction {
            return Err(Error::IndexOutOfRange {
                kind: "JPEG reconstruction",
                index,
                len: self.jpeg_count,
            });
        }
        Ok(())
    }

    /// Writes the reconstructed JPEG to `destination`.
    ///
    /// Returns the number of bytes written, or `None` when the image
    /// carries no JPEG reconstruction data.
    pub fn reconstructed_jpeg(&mut self, destination: &mut dyn Write) -> Result<Option<u64>> {
        const CHUNK_BYTES: usize = 128 * 1024;
        self.check_open()?;
        match self.goto_jpeg(0) {
            Ok(()) => {}
            Err(Error::IndexOutOfRange { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }

        let mut chunk = vec![0u8; CHUNK_BYTES];
        let mut total = 0u64;
        loop {
            let event;
            let written;
            {
                let mut sinks = Sinks::none();
                sinks.jpeg_out = Some(ByteSink::new(&mut chunk));
                let until = EventSet::of(&[Event::FullImage, Event::JpegNeedMoreOutput]);
                event = self.process_until(until, Stops::default(), &mut sinks)?;
                written = sinks.jpeg_out.as_ref().map_or(0, |sink| sink.written);
            }
            destination.write_all(&chunk[..written])?;
            total += written as u64;
            match event {
                Event::FullImage => {
                    tracing::debug!(total, "JPEG reconstructed");
                    return Ok(Some(total));
                }
                Event::JpegNeedMoreOutput => {}
                other => {
                    return Err(Error::CorruptedStream(format!(
                        "unexpected event {other:?} while reconstructing JPEG"
                    )));
                }
            }
        }
    }

    /// Reconstructs the JPEG into an owned buffer of at most `max` bytes.
    ///
    /// Returns `None` when the image carries no JPEG reconstruction data,
    /// and `(fully_read, bytes)` otherwise; hitting `max` truncates.
    pub fn reconstructed_jpeg_vec(&mut self, max: usize) -> Result<Option<(bool, Vec<u8>)>> {
        const INITIAL_BYTES: usize = 64 * 1024;
        self.check_open()?;
        match self.goto_jpeg(0) {
            Ok(()) => {}
            Err(Error::IndexOutOfRange { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }

        let mut destination = vec![0u8; max.min(INITIAL_BYTES)];
        let mut total = 0usize;
        loop {
            let event;
            let written;
            {
                let mut sinks = Sinks::none();
                sinks.jpeg_out = Some(ByteSink::new(&mut destination[total..]));
                let until = EventSet::of(&[Event::FullImage, Event::JpegNeedMoreOutput]);
                event = self.process_until(until, Stops::default(), &mut sinks)?;
                written = sinks.jpeg_out.as_ref().map_or(0, |sink| sink.written);
            }
            total += written;
            match event {
                Event::FullImage => {
                    destination.truncate(total);
                    return Ok(Some((true, destination)));
                }
                Event::JpegNeedMoreOutput => {}
                other => {
                    return Err(Error::CorruptedStream(format!(
                        "unexpected event {other:?} while reconstructing JPEG"
                    )));
                }
            }

            if destination.len() >= max {
                destination.truncate(total);
                tracing::debug!(total, "JPEG truncated at caller's cap");
                return Ok(Some((false, destination)));
            }
            let new_size = destination
                .len()
                .max(16)
                .checked_mul(2)
                .unwrap_or(usize::MAX)
                .min(max);
            destination.resize(new_size, 0);
        }
    }
}

/// Forward iterator over the frames of a [`Decoder`].
///
/// This is a lending iterator: each step borrows the decoder, populating
/// its frame cache on demand, so it can't implement [`Iterator`]. Use
/// [`next`][Self::next] directly.
#[derive(Debug)]
pub struct FrameIter<'dec, 'src> {
    decoder: &'dec mut Decoder<'src>,
    next_index: usize,
    done: bool,
}

impl FrameIter<'_, '_> {
    /// Advances to the next frame and returns its metadata, or `None` past
    /// the last frame.
    pub fn next(&mut self) -> Result<Option<&FrameRecord>> {
        if self.done {
            return Ok(None);
        }
        let index = self.next_index;
        match self.decoder.frame_info(index) {
            Ok(_) => {
                self.next_index += 1;
                Ok(Some(&self.decoder.frames[index]))
            }
            Err(Error::IndexOutOfRange { .. }) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Skips the next `count` frames without materialising their records
    /// individually.
    pub fn advance_by(&mut self, count: usize) -> Result<()> {
        if self.done || count == 0 {
            return Ok(());
        }
        self.next_index += count;
        Ok(())
    }

    /// Index of the most recently yielded frame.
    pub fn index(&self) -> Option<usize> {
        self.next_index.checked_sub(1)
    }

    /// Minimum pixel buffer size for the most recently yielded frame.
    pub fn frame_buffer_size(&mut self, format: &PixelFormat) -> Result<usize> {
        let index = self
            .index()
            .ok_or(Error::Usage("no frame has been yielded yet"))?;
        self.decoder.frame_buffer_size_for(index, format)
    }

    /// Decodes the pixels of the most recently yielded frame.
    pub fn frame_pixels(
        &mut self,
        format: &PixelFormat,
        buffer: Option<&mut [u8]>,
        extra: Vec<ExtraChannelRequest<'_>>,
    ) -> Result<()> {
        let index = self
            .index()
            .ok_or(Error::Usage("no frame has been yielded yet"))?;
        self.decoder.frame_pixels(index, format, buffer, extra)
    }
}

/// Bytes per scanline for `xsize` pixels in `format`, or `None` on
/// arithmetic overflow. Includes alignment padding; divisible by
/// `format.align` whenever that is greater than 1.
pub fn row_stride(xsize: u32, format: &PixelFormat) -> Option<usize> {
    row_stride_padding(xsize, format).map(|(stride, _)| stride)
}

fn row_stride_padding(xsize: u32, format: &PixelFormat) -> Option<(usize, usize)> {
    let bytes_per_pixel = format.bytes_per_pixel()?;
    let bytes_per_row = bytes_per_pixel.checked_mul(xsize as usize)?;
    let padding = if format.align > 1 {
        match bytes_per_row % format.align {
            0 => 0,
            remainder => format.align - remainder,
        }
    } else {
        0
    };
    bytes_per_row
        .checked_add(padding)
        .map(|stride| (stride, padding))
}

/// Minimum buffer size for a full frame of `xsize`×`ysize` pixels in
/// `format`. The last row needs no alignment padding.
pub fn frame_buffer_size(xsize: u32, ysize: u32, format: &PixelFormat) -> Result<usize> {
    if ysize == 0 {
        return Ok(0);
    }
    let (stride, padding) = row_stride_padding(xsize, format).ok_or(Error::BufferTooLarge)?;
    let total = stride
        .checked_mul(ysize as usize)
        .ok_or(Error::BufferTooLarge)?;
    Ok(total - padding)
}

/// Decompresses a raw `brob` payload (4-byte inner type followed by a
/// Brotli stream) into `out`, stopping after `max` bytes. Returns whether
/// the whole payload fit.
#[cfg(feature = "brotli")]
fn decompress_brob_payload(raw: &[u8], max: usize, out: &mut Vec<u8>) -> Result<bool> {
    let compressed = raw.get(4..).ok_or_else(|| {
        Error::CorruptedStream("brob payload shorter than its inner box type".into())
    })?;
    let mut decompressor =
        brotli_decompressor::Decompressor::new(std::io::Cursor::new(compressed), 4096);
    let mut chunk = [0u8; 4096];
    loop {
        let read = decompressor
            .read(&mut chunk)
            .map_err(|e| Error::CorruptedStream(format!("brob payload failed to decompress: {e}")))?;
        if read == 0 {
            return Ok(true);
        }
        let room = max - out.len();
        let take = read.min(room);
        out.extend_from_slice(&chunk[..take]);
        if take < read {
            return Ok(false);
        }
    }
}
