//! A scripted codec session for tests: replays a fixed tape of events,
//! consuming a declared number of input bytes before each one, and serves
//! the typed getters from the records attached to the tape. Close enough
//! to a real event-driven codec to exercise the reader facade's buffering,
//! rewinding, skipping and sink handling.

use std::cell::Cell;
use std::rc::Rc;

use jxl_session::{
    BasicInfo, BlendInfo, BoxType, CodecSession, ColorEncoding, ColorProfileTarget, Event,
    EventSet, ExtraChannelInfo, FrameHeader, ParallelRunner, SessionError, SessionIo,
    SessionResult,
};

/// One entry of the tape. `cost` input bytes are consumed before the
/// action fires.
pub struct Step {
    pub cost: usize,
    pub action: Action,
}

pub fn step(cost: usize, action: Action) -> Step {
    Step { cost, action }
}

pub enum Action {
    BasicInfo(BasicInfo),
    Color {
        orig_enc: Option<ColorEncoding>,
        data_enc: Option<ColorEncoding>,
        orig_icc: Vec<u8>,
        data_icc: Vec<u8>,
    },
    Frame {
        header: FrameHeader,
        name: Option<String>,
        ec_blend: Vec<BlendInfo>,
    },
    /// Pixel payload for the frame surfaced by the preceding `Frame` step.
    /// `extra` entries are keyed by extra channel index.
    Pixels {
        pixels: Vec<u8>,
        extra: Vec<(usize, Vec<u8>)>,
    },
    Box {
        raw_type: BoxType,
        inner_type: BoxType,
        size_contents: u64,
        size_raw: u64,
        payload_raw: Vec<u8>,
        payload_decompressed: Option<Vec<u8>>,
    },
    /// JPEG reconstruction metadata; the bytes stream out during the next
    /// `Pixels` step.
    Jpeg(Vec<u8>),
}

/// What the session does when an output colour profile is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOverride {
    Accept,
    /// The set call itself errors.
    Refuse,
    /// The set call "succeeds" but the data profile silently vanishes, as
    /// happens for non-XYB images in some codecs.
    SilentlyIgnore,
}

/// Observable side effects, shared with the test body.
#[derive(Default)]
pub struct Probe {
    pub rewinds: Cell<usize>,
    pub resets: Cell<usize>,
    pub process_calls: Cell<usize>,
    pub frames_skipped: Cell<usize>,
    pub coalescing_disabled: Cell<bool>,
    pub keep_orientation: Cell<bool>,
    pub unpremultiply_alpha: Cell<bool>,
}

pub struct ScriptedSession {
    steps: Rc<Vec<Step>>,
    probe: Rc<Probe>,
    pos: usize,
    step_started: bool,
    remaining_cost: usize,
    subscribed: EventSet,
    decompress_boxes: bool,
    brotli_supported: bool,
    profile_override: ProfileOverride,
    skip_frames: usize,
    skip_next_pixels: bool,
    // Getter registers, valid from the moment the matching step fires.
    basic_info: Option<BasicInfo>,
    extra_channels: Vec<(ExtraChannelInfo, Option<String>)>,
    frame: Option<(FrameHeader, Option<String>, Vec<BlendInfo>)>,
    box_record: Option<usize>,
    box_payload_pending: bool,
    box_cursor: usize,
    color: Option<(Option<ColorEncoding>, Option<ColorEncoding>, Vec<u8>, Vec<u8>)>,
    data_enc_overridden: Option<Option<ColorEncoding>>,
    pending_jpeg: Option<Vec<u8>>,
    jpeg_cursor: usize,
}

impl ScriptedSession {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Rc::new(steps),
            probe: Rc::new(Probe::default()),
            pos: 0,
            step_started: false,
            remaining_cost: 0,
            subscribed: EventSet::EMPTY,
            decompress_boxes: false,
            brotli_supported: true,
            profile_override: ProfileOverride::Accept,
            skip_frames: 0,
            skip_next_pixels: false,
            basic_info: None,
            extra_channels: Vec::new(),
            frame: None,
            box_record: None,
            box_payload_pending: false,
            box_cursor: 0,
            color: None,
            data_enc_overridden: None,
            pending_jpeg: None,
            jpeg_cursor: 0,
        }
    }

    pub fn with_extra_channels(
        mut self,
        extra_channels: Vec<(ExtraChannelInfo, Option<String>)>,
    ) -> Self {
        self.extra_channels = extra_channels;
        self
    }

    pub fn without_brotli(mut self) -> Self {
        self.brotli_supported = false;
        self
    }

    pub fn with_profile_override(mut self, behavior: ProfileOverride) -> Self {
        self.profile_override = behavior;
        self
    }

    pub fn probe(&self) -> Rc<Probe> {
        self.probe.clone()
    }

    fn current_box(&self) -> SessionResult<&Action> {
        let index = self
            .box_record
            .ok_or(SessionError::State("no box surfaced"))?;
        Ok(&self.steps[index].action)
    }

    fn current_box_payload(&self) -> SessionResult<Vec<u8>> {
        let Action::Box {
            raw_type,
            payload_raw,
            payload_decompressed,
            ..
        } = self.current_box()?
        else {
            return Err(SessionError::State("current step is not a box"));
        };
        if *raw_type == BoxType::BROTLI_COMPRESSED && self.decompress_boxes {
            Ok(payload_decompressed.clone().unwrap_or_default())
        } else {
            Ok(payload_raw.clone())
        }
    }
}

impl CodecSession for ScriptedSession {
    fn subscribe(&mut self, events: EventSet) -> SessionResult<()> {
        self.subscribed = events;
        Ok(())
    }

    fn process(&mut self, io: &mut SessionIo<'_, '_>) -> SessionResult<Event> {
        self.probe.process_calls.set(self.probe.process_calls.get() + 1);

        // Drain a pending box payload before touching the next step.
        if self.box_payload_pending {
            let payload = self.current_box_payload()?;
            if let Some(sink) = io.sinks.box_out.as_mut() {
                self.box_cursor += sink.push(&payload[self.box_cursor..]);
                if self.box_cursor < payload.len() {
                    return Ok(Event::BoxNeedMoreOutput);
                }
            }
            self.box_payload_pending = false;
            self.box_cursor = 0;
        }

        loop {
            if self.pos >= self.steps.len() {
                return Ok(Event::Success);
            }
            if !self.step_started {
                self.remaining_cost = self.steps[self.pos].cost;
                self.step_started = true;
            }

            // Consume input until this step's cost is covered.
            while self.remaining_cost > 0 {
                let available = io.input.len() - io.consumed;
                let take = available.min(self.remaining_cost);
                io.consumed += take;
                self.remaining_cost -= take;
                if self.remaining_cost > 0 {
                    if io.input_closed {
                        return Err(SessionError::Decode("unexpected end of input".into()));
                    }
                    return Ok(Event::NeedMoreInput);
                }
            }

            let steps = self.steps.clone();
            match &steps[self.pos].action {
                Action::BasicInfo(info) => {
                    self.basic_info = Some(*info);
                    self.pos += 1;
                    self.step_started = false;
                    if self.subscribed.contains(Event::BasicInfo) {
                        return Ok(Event::BasicInfo);
                    }
                }

                Action::Color {
                    orig_enc,
                    data_enc,
                    orig_icc,
                    data_icc,
                } => {
                    self.color =
                        Some((*orig_enc, *data_enc, orig_icc.clone(), data_icc.clone()));
                    self.pos += 1;
                    self.step_started = false;
                    if self.subscribed.contains(Event::ColorEncoding) {
                        return Ok(Event::ColorEncoding);
                    }
                }

                Action::Frame {
                    header,
                    name,
                    ec_blend,
                } => {
                    self.frame = Some((*header, name.clone(), ec_blend.clone()));
                    self.pos += 1;
                    self.step_started = false;
                    if self.skip_frames > 0 {
                        self.skip_frames -= 1;
                        self.skip_next_pixels = true;
                        continue;
                    }
                    self.skip_next_pixels = false;
                    if self.subscribed.contains(Event::Frame) {
                        return Ok(Event::Frame);
                    }
                }

                Action::Pixels { pixels, extra } => {
                    if self.skip_next_pixels || !self.subscribed.contains(Event::FullImage) {
                        self.skip_next_pixels = false;
                        self.pending_jpeg = None;
                        self.jpeg_cursor = 0;
                        self.pos += 1;
                        self.step_started = false;
                        continue;
                    }

                    // JPEG reconstruction replaces pixel output when a
                    // JPEG sink is registered.
                    if let Some(jpeg) = self.pending_jpeg.clone() {
                        if let Some(sink) = io.sinks.jpeg_out.as_mut() {
                            self.jpeg_cursor += sink.push(&jpeg[self.jpeg_cursor..]);
                            if self.jpeg_cursor < jpeg.len() {
                                return Ok(Event::JpegNeedMoreOutput);
                            }
                            self.pending_jpeg = None;
                            self.jpeg_cursor = 0;
                            self.pos += 1;
                            self.step_started = false;
                            return Ok(Event::FullImage);
                        }
                        self.pending_jpeg = None;
                        self.jpeg_cursor = 0;
                    }

                    let Some(sink) = io.sinks.image.as_mut() else {
                        return Ok(Event::NeedImageOutBuffer);
                    };
                    let take = pixels.len().min(sink.buf.len());
                    sink.buf[..take].copy_from_slice(&pixels[..take]);
                    for out in io.sinks.extra.iter_mut() {
                        if let Some((_, bytes)) =
                            extra.iter().find(|(channel, _)| *channel == out.channel)
                        {
                            let take = bytes.len().min(out.buf.len());
                            out.buf[..take].copy_from_slice(&bytes[..take]);
                        }
                    }
                    self.pos += 1;
                    self.step_started = false;
                    return Ok(Event::FullImage);
                }

                Action::Box { .. } => {
                    self.box_record = Some(self.pos);
                    self.pos += 1;
                    self.step_started = false;
                    if self.subscribed.contains(Event::Box) {
                        self.box_payload_pending = true;
                        self.box_cursor = 0;
                        return Ok(Event::Box);
                    }
                }

                Action::Jpeg(bytes) => {
                    self.pending_jpeg = Some(bytes.clone());
                    self.jpeg_cursor = 0;
                    self.pos += 1;
                    self.step_started = false;
                    if self.subscribed.contains(Event::JpegReconstruction) {
                        return Ok(Event::JpegReconstruction);
                    }
                }
            }
        }
    }

    fn rewind(&mut self) {
        self.probe.rewinds.set(self.probe.rewinds.get() + 1);
        self.pos = 0;
        self.step_started = false;
        self.remaining_cost = 0;
        self.skip_frames = 0;
        self.skip_next_pixels = false;
        self.frame = None;
        self.box_record = None;
        self.box_payload_pending = false;
        self.box_cursor = 0;
        self.pending_jpeg = None;
        self.jpeg_cursor = 0;
    }

    fn reset(&mut self) {
        self.probe.resets.set(self.probe.resets.get() + 1);
        self.rewind();
        self.subscribed = EventSet::EMPTY;
        self.decompress_boxes = false;
        self.basic_info = None;
        self.color = None;
        self.data_enc_overridden = None;
    }

    fn skip_frames(&mut self, count: usize) {
        self.probe
            .frames_skipped
            .set(self.probe.frames_skipped.get() + count);
        self.skip_frames += count;
    }

    fn skip_current_frame(&mut self) -> SessionResult<()> {
        if matches!(
            self.steps.get(self.pos).map(|s| &s.action),
            Some(Action::Pixels { .. })
        ) {
            self.pos += 1;
            self.step_started = false;
            self.pending_jpeg = None;
            self.jpeg_cursor = 0;
            Ok(())
        } else {
            Err(SessionError::State("no frame to skip"))
        }
    }

    fn set_coalescing(&mut self, coalescing: bool) -> SessionResult<()> {
        self.probe.coalescing_disabled.set(!coalescing);
        Ok(())
    }

    fn set_keep_orientation(&mut self, keep: bool) -> SessionResult<()> {
        self.probe.keep_orientation.set(keep);
        Ok(())
    }

    fn set_unpremultiply_alpha(&mut self, unpremultiply: bool) -> SessionResult<()> {
        self.probe.unpremultiply_alpha.set(unpremultiply);
        Ok(())
    }

    fn set_parallel_runner(&mut self, _runner: ParallelRunner) {}

    fn set_decompress_boxes(&mut self, decompress: bool) -> SessionResult<()> {
        if decompress && !self.brotli_supported {
            return Err(SessionError::NoBrotli);
        }
        self.decompress_boxes = decompress;
        Ok(())
    }

    fn set_output_color_profile(
        &mut self,
        encoded: Option<&ColorEncoding>,
        _icc: Option<&[u8]>,
    ) -> SessionResult<()> {
        match self.profile_override {
            ProfileOverride::Accept => {
                self.data_enc_overridden = Some(encoded.copied());
                Ok(())
            }
            ProfileOverride::Refuse => Err(SessionError::State("unsupported output profile")),
            ProfileOverride::SilentlyIgnore => {
                self.data_enc_overridden = Some(None);
                Ok(())
            }
        }
    }

    fn basic_info(&self) -> SessionResult<BasicInfo> {
        self.basic_info
            .ok_or(SessionError::State("basic info not decoded yet"))
    }

    fn frame_header(&self) -> SessionResult<FrameHeader> {
        self.frame
            .as_ref()
            .map(|(header, _, _)| *header)
            .ok_or(SessionError::State("no frame surfaced"))
    }

    fn frame_name(&self) -> SessionResult<String> {
        self.frame
            .as_ref()
            .and_then(|(_, name, _)| name.clone())
            .ok_or(SessionError::State("frame has no name"))
    }

    fn extra_channel_info(&self, index: usize) -> SessionResult<ExtraChannelInfo> {
        self.extra_channels
            .get(index)
            .map(|(info, _)| info.clone())
            .ok_or(SessionError::State("extra channel index out of range"))
    }

    fn extra_channel_name(&self, index: usize) -> SessionResult<Option<String>> {
        self.extra_channels
            .get(index)
            .map(|(_, name)| name.clone())
            .ok_or(SessionError::State("extra channel index out of range"))
    }

    fn extra_channel_blend_info(&self, index: usize) -> SessionResult<BlendInfo> {
        self.frame
            .as_ref()
            .and_then(|(_, _, blend)| blend.get(index).copied())
            .ok_or(SessionError::State("no blend info for extra channel"))
    }

    fn box_type(&self, decompressed: bool) -> SessionResult<BoxType> {
        let Action::Box {
            raw_type,
            inner_type,
            ..
        } = self.current_box()?
        else {
            return Err(SessionError::State("current step is not a box"));
        };
        Ok(if decompressed { *inner_type } else { *raw_type })
    }

    fn box_size_contents(&self) -> SessionResult<u64> {
        let Action::Box { size_contents, .. } = self.current_box()? else {
            return Err(SessionError::State("current step is not a box"));
        };
        Ok(*size_contents)
    }

    fn box_size_raw(&self) -> SessionResult<u64> {
        let Action::Box { size_raw, .. } = self.current_box()? else {
            return Err(SessionError::State("current step is not a box"));
        };
        Ok(*size_raw)
    }

    fn encoded_color_profile(&self, target: ColorProfileTarget) -> Option<ColorEncoding> {
        match target {
            ColorProfileTarget::Original => self.color.as_ref().and_then(|c| c.0),
            ColorProfileTarget::Data => match &self.data_enc_overridden {
                Some(overridden) => *overridden,
                None => self.color.as_ref().and_then(|c| c.1),
            },
        }
    }

    fn icc_profile_len(&self, target: ColorProfileTarget) -> Option<usize> {
        self.icc_profile(target).map(|icc| icc.len())
    }

    fn icc_profile(&self, target: ColorProfileTarget) -> Option<Vec<u8>> {
        let color = self.color.as_ref()?;
        let icc = match target {
            ColorProfileTarget::Original => &color.2,
            ColorProfileTarget::Data => &color.3,
        };
        (!icc.is_empty()).then(|| icc.clone())
    }
}

// Tape-building helpers shared by the test files.

pub const CODESTREAM_HEADER: [u8; 2] = [0xff, 0x0a];
pub const CONTAINER_HEADER: [u8; 12] =
    [0, 0, 0, 0xc, b'J', b'X', b'L', b' ', 0xd, 0xa, 0x87, 0xa];

pub fn plain_info(xsize: u32, ysize: u32) -> BasicInfo {
    BasicInfo {
        xsize,
        ysize,
        bits_per_sample: 8,
        num_color_channels: 3,
        orientation: 1,
        ..BasicInfo::default()
    }
}

pub fn frame_header(is_last: bool, xsize: u32, ysize: u32) -> FrameHeader {
    FrameHeader {
        layer_info: jxl_session::LayerInfo {
            xsize,
            ysize,
            ..jxl_session::LayerInfo::default()
        },
        is_last,
        ..FrameHeader::default()
    }
}

pub fn named_frame(header: FrameHeader, name: &str) -> Action {
    Action::Frame {
        header: FrameHeader {
            name_len: name.len() as u32,
            ..header
        },
        name: (!name.is_empty()).then(|| name.to_owned()),
        ec_blend: Vec::new(),
    }
}

pub fn plain_box(ty: &[u8; 4], payload: &[u8]) -> Action {
    Action::Box {
        raw_type: BoxType(*ty),
        inner_type: BoxType(*ty),
        size_contents: payload.len() as u64,
        size_raw: payload.len() as u64 + 8,
        payload_raw: payload.to_vec(),
        payload_decompressed: None,
    }
}
