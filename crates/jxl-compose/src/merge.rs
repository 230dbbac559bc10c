//! The merge driver: turns a [`MergeConfig`] plus its input files into one
//! JPEG XL stream.

use std::io::Write;
use std::path::Path;

use jxl_runner::ParallelRunner;
use jxl_session::color::{profiles_match, ColorProfile};
use jxl_session::signature::{check_signature, Signature};
use jxl_session::{
    BasicInfo, BoxType, ColorEncoding, ColorProfileTarget, DataType, Endianness, FrameHeader,
    PixelFormat,
};
use jxl_skim::{BoxRecord, Decoder, DecoderFlags, DecoderHints, Pixmap, SessionFactory};

use crate::config::{ColorSpec, FrameConfig, MergeConfig};
use crate::encoder::{EncoderSession, FrameSettings};
use crate::util::greatest_common_divisor;
use crate::ComposeError;

/// Requested distances below this threshold encode losslessly.
pub const LOSSLESS_DISTANCE_THRESHOLD: f32 = 0.001;

/// Block size for draining encoder output.
const IO_BUFFER_BYTES: usize = 128 * 1024;

/// Knobs that sit outside the configuration document.
#[derive(Debug, Default, Clone)]
pub struct MergeOptions {
    /// Worker threads for encoding and decoding; 0 picks a default.
    pub num_threads: usize,
    /// Forces a specific data type for shuttling pixels, overriding both
    /// the automatic choice and the config's `data_type`.
    pub force_data_type: Option<DataType>,
}

/// Combines one or more JXLs into a single JXL written to `output`.
///
/// Metadata boxes listed in the config are written first, then boxes
/// copied from inputs that set `copyBoxes`, then the frames. `sessions`
/// provides codec sessions for the decoders opened per input.
pub fn merge(
    cfg: &MergeConfig,
    encoder: &mut dyn EncoderSession,
    output: &mut dyn Write,
    sessions: SessionFactory,
    options: &MergeOptions,
) -> Result<(), ComposeError> {
    cfg.validate()?;
    let inputs = &cfg.frames;
    tracing::info!(count = inputs.len(), "Merging images");

    let mut enc_info = BasicInfo {
        bits_per_sample: 1,
        num_color_channels: 1,
        intrinsic_xsize: cfg.intrinsic_xsize.unwrap_or(0),
        intrinsic_ysize: cfg.intrinsic_ysize.unwrap_or(0),
        orientation: cfg.orientation.unwrap_or(1),
        // Optional canvas size; when unset it expands to fit the frames.
        xsize: cfg.xsize.unwrap_or(0),
        ysize: cfg.ysize.unwrap_or(0),
        ..BasicInfo::default()
    };
    let auto_size_canvas = enc_info.xsize == 0;

    // Explicit config wins; else the profile of the first non-empty input.
    let mut color = match &cfg.color {
        Some(ColorSpec::Encoded(encoding)) => Some(ColorProfile::from_encoded(*encoding)),
        Some(ColorSpec::File(path)) => {
            tracing::debug!(path = %path.display(), "Copying color profile from file");
            let profile = color_profile_from_path(path, &sessions)?;
            if !profile.is_present() {
                return Err(ComposeError::InvalidConfig(
                    "failed to determine color profile".into(),
                ));
            }
            Some(profile)
        }
        None => None,
    };
    let mut check_color_profiles = color.is_none();
    let mut saved_ref3 = false;
    let mut patches_requested = false;
    let mut total_boxes = cfg.boxes.len();

    let mut frame_decoders: Vec<Option<Decoder<'static>>> = Vec::with_capacity(inputs.len());
    let mut frame_configs: Vec<FrameConfig> = Vec::with_capacity(inputs.len());

    // First pass over the inputs: resolve per-frame settings against the
    // defaults, open a decoder per input, and settle the output basic info.
    for (frame_index, input) in inputs.iter().enumerate() {
        let mut frame_cfg = cfg.frame_defaults.clone();
        frame_cfg.update(input);

        let zero_duration =
            frame_cfg.duration_ms.unwrap_or(0) == 0 && frame_cfg.duration_ticks.unwrap_or(0) == 0;
        if zero_duration {
            // Zero-duration frames must be saved (except the final frame),
            // so note when that happens implicitly.
            if frame_index + 1 != inputs.len() && frame_cfg.save_as_reference.is_none() {
                tracing::info!(frame = frame_index, "Frame is implicitly saved as reference 0");
            }
        } else {
            enc_info.have_animation = true;
        }
        if frame_cfg.save_as_reference == Some(3) {
            saved_ref3 = true;
        }
        if frame_cfg.patches == Some(1) {
            patches_requested = true;
        }
        enc_info.uses_original_profile = enc_info.uses_original_profile
            || frame_cfg.distance.unwrap_or(0.0) < LOSSLESS_DISTANCE_THRESHOLD;

        match &frame_cfg.file {
            Some(file) if !file.as_os_str().is_empty() => {
                let mut decoder = Decoder::new(sessions());
                let copy_boxes = frame_cfg.copy_boxes.unwrap_or(false);
                decoder.open_file(
                    file,
                    DecoderFlags {
                        unpremultiply_alpha: true,
                        ..DecoderFlags::default()
                    },
                    DecoderHints {
                        want_boxes: copy_boxes,
                        ..DecoderHints::default()
                    },
                    0,
                )?;
                if copy_boxes {
                    let box_count = non_reserved_boxes(&mut decoder)?.len();
                    if box_count > 0 {
                        tracing::debug!(box_count, input = frame_index, "Will copy boxes from input");
                    }
                    total_boxes += box_count;
                }

                let has_ignored_extra = {
                    let extra = decoder.extra_channel_info()?;
                    extra.len() > 1 || (extra.len() == 1 && !extra[0].info.is_alpha())
                };
                if has_ignored_extra {
                    tracing::warn!(
                        file = %file.display(),
                        "File has (non-main-alpha) extra channels - these will be ignored"
                    );
                }

                let info = decoder.basic_info()?;
                enc_info.bits_per_sample = enc_info.bits_per_sample.max(info.bits_per_sample);
                enc_info.exponent_bits_per_sample = enc_info
                    .exponent_bits_per_sample
                    .max(info.exponent_bits_per_sample);
                enc_info.alpha_bits = enc_info.alpha_bits.max(info.alpha_bits);
                enc_info.alpha_exponent_bits =
                    enc_info.alpha_exponent_bits.max(info.alpha_exponent_bits);
                enc_info.num_color_channels =
                    enc_info.num_color_channels.max(info.num_color_channels);
                if enc_info.alpha_bits > 0 {
                    enc_info.num_extra_channels = 1;
                }

                if check_color_profiles {
                    let this_color = color_profile_from_decoder(&mut decoder)?;
                    match &color {
                        None => color = Some(this_color),
                        Some(chosen) if !profiles_match(chosen, &this_color) => {
                            tracing::warn!(
                                "Input files have differing color profiles - pixels will be \
                                 reinterpreted based on the profile of the first input"
                            );
                            check_color_profiles = false;
                        }
                        Some(_) => {}
                    }
                }
                frame_decoders.push(Some(decoder));
            }
            _ => frame_decoders.push(None),
        }
        frame_configs.push(frame_cfg);
    }

    if saved_ref3 {
        let message = "Reference frame 3 in use, so disabling patches for all frames";
        if patches_requested {
            tracing::warn!("{message}");
        } else {
            tracing::debug!("{message}");
        }
        for frame_cfg in &mut frame_configs {
            frame_cfg.patches = Some(0);
        }
    }

    // If every input was a placeholder frame, fall back to sRGB.
    let color = match color {
        Some(color) => color,
        None => {
            tracing::info!("Using default sRGB color profile");
            ColorProfile::from_encoded(ColorEncoding::srgb(enc_info.num_color_channels == 1))
        }
    };

    // The common pixel format used to shuttle pixels through the encoder.
    let mut pixel_format = suggest_format(&mut frame_decoders)?;
    if let Some(data_type) = options.force_data_type {
        pixel_format.data_type = data_type;
    } else if let Some(data_type) = cfg.data_type {
        pixel_format.data_type = data_type;
    }
    tracing::debug!(?pixel_format, "Working pixel format chosen");

    if enc_info.have_animation {
        enc_info.animation.num_loops = cfg.loops.unwrap_or(0);
        let (numerator, denominator) = suggest_ticks_per_second(cfg);
        enc_info.animation.tps_numerator = numerator;
        enc_info.animation.tps_denominator = denominator;
    }

    // Wrap each input in a lazily-buffered pixmap; placeholder inputs
    // become 1x1 transparent frames. Auto-size the canvas as we go.
    let mut frame_buffers: Vec<Pixmap> = Vec::with_capacity(inputs.len());
    for (index, decoder) in frame_decoders.into_iter().enumerate() {
        let mut pixmap = match decoder {
            Some(decoder) => Pixmap::from_decoder(decoder, 0, pixel_format),
            None => Pixmap::black_pixel(pixel_format)?,
        };
        if auto_size_canvas {
            let (crop_x0, crop_y0) = frame_configs[index].offset.unwrap_or((0, 0));
            let extent_x = crop_x0 as i64 + pixmap.xsize()? as i64;
            let extent_y = crop_y0 as i64 + pixmap.ysize()? as i64;
            if extent_x > enc_info.xsize as i64 {
                enc_info.xsize = extent_x as u32;
            }
            if extent_y > enc_info.ysize as i64 {
                enc_info.ysize = extent_y as u32;
            }
        }
        frame_buffers.push(pixmap);
    }
    if auto_size_canvas {
        tracing::debug!(
            xsize = enc_info.xsize,
            ysize = enc_info.ysize,
            "Canvas size automatically set"
        );
    }

    encoder.set_parallel_runner(ParallelRunner::new(options.num_threads));
    if let Some(level) = cfg.codestream_level {
        if level >= 0 {
            encoder.set_codestream_level(level)?;
        }
    }
    if total_boxes > 0 {
        tracing::debug!(total_boxes, "Forcing container format for metadata boxes");
        encoder.use_boxes()?;
    }
    tracing::debug!(?enc_info, "Writing basic info");
    encoder.set_basic_info(&enc_info)?;
    match &color.encoded {
        Some(encoding) => encoder.set_color_encoding(encoding)?,
        None => encoder.set_icc_profile(&color.icc)?,
    }

    let mut io_buffer = vec![0u8; IO_BUFFER_BYTES];

    // Boxes from the config document.
    let mut next_box = 0usize;
    for in_box_cfg in &cfg.boxes {
        let mut box_cfg = cfg.box_defaults.clone();
        box_cfg.update(in_box_cfg);
        let ty = box_cfg.box_type()?;
        let content = match &box_cfg.file {
            Some(file) if !file.as_os_str().is_empty() => std::fs::read(file)?,
            _ => Vec::new(),
        };
        let compress = box_cfg.compress.unwrap_or(false);
        tracing::info!(n = next_box + 1, total = total_boxes, %ty, compress, "Writing box");
        write_box(
            encoder,
            output,
            &mut io_buffer,
            ty,
            &content,
            compress,
            next_box == total_boxes - 1,
        )?;
        next_box += 1;
    }

    // Boxes copied from inputs that asked for it. The decoders were moved
    // into the pixmaps; borrow them back.
    for (frame_index, frame_cfg) in frame_configs.iter().enumerate() {
        if !frame_cfg.copy_boxes.unwrap_or(false) {
            continue;
        }
        let Some(decoder) = frame_buffers[frame_index].decoder()? else {
            continue;
        };
        let compress = cfg.box_defaults.compress.unwrap_or(false);
        for (box_index, record) in non_reserved_boxes(decoder)? {
            let (_, content) = decoder.box_content_vec(box_index, usize::MAX, compress)?;
            tracing::info!(
                n = next_box + 1,
                total = total_boxes,
                ty = %record.ty,
                "Writing copied box"
            );
            write_box(
                encoder,
                output,
                &mut io_buffer,
                record.ty,
                &content,
                compress,
                next_box == total_boxes - 1,
            )?;
            next_box += 1;
        }
    }

    // Frames.
    for (frame_index, frame_cfg) in frame_configs.iter().enumerate() {
        let pixmap = &mut frame_buffers[frame_index];

        // A uniformly opaque alpha channel carries no information.
        if pixmap.pixel_format().has_alpha_channel() && pixmap.is_fully_opaque()? {
            pixmap.remove_interleaved_alpha()?;
            tracing::debug!(frame = frame_index, "Removed redundant alpha channel");
        }

        let frame_xsize = pixmap.xsize()?;
        let frame_ysize = pixmap.ysize()?;
        tracing::info!(
            n = frame_index + 1,
            total = inputs.len(),
            xsize = frame_xsize,
            ysize = frame_ysize,
            "Writing frame"
        );
        let settings = frame_settings_for(
            frame_cfg,
            &enc_info,
            frame_xsize,
            frame_ysize,
            cfg.brotli_effort,
        );
        let format = *pixmap.pixel_format();
        encoder.add_image_frame(&settings, &format, pixmap.data()?)?;
        if frame_index == frame_configs.len() - 1 {
            encoder.close_frames();
        }
        drain_encoder(encoder, &mut io_buffer, output)?;

        // Frees the pixels and the decoder.
        pixmap.close();
    }

    tracing::info!("Finished writing merged output");
    Ok(())
}

/// The ticks-per-second fraction for the output animation.
///
/// An explicit config value wins. Otherwise, if any durations were given
/// in milliseconds, their GCD is the smallest possible tick duration, so
/// the minimum ticks per second is `1000 / gcd`, reduced. The default is
/// 100/1.
pub fn suggest_ticks_per_second(cfg: &MergeConfig) -> (u32, u32) {
    if let Some(tps) = cfg.ticks_per_second {
        return tps;
    }

    let mut durations_ms = Vec::with_capacity(cfg.frames.len());
    for frame in &cfg.frames {
        let ms = frame
            .duration_ms
            .or(cfg.frame_defaults.duration_ms)
            .unwrap_or(0);
        if ms > 0 {
            durations_ms.push(ms);
        }
    }

    let gcd = greatest_common_divisor(&durations_ms);
    if gcd > 0 {
        let mut numerator = 1000u32;
        let mut denominator = gcd;
        let common = greatest_common_divisor(&[numerator, denominator]);
        if common > 1 {
            numerator /= common;
            denominator /= common;
        }
        (numerator, denominator)
    } else {
        (100, 1)
    }
}

/// Encoder settings for one frame.
///
/// The frame header is only included when something deviates from the
/// encoder defaults: a blend mode or source, a nonzero duration or crop
/// offset, a reference slot, or dimensions differing from the canvas.
/// Millisecond durations are converted to ticks via the animation's
/// ticks-per-second fraction.
pub fn frame_settings_for(
    frame_cfg: &FrameConfig,
    enc_info: &BasicInfo,
    frame_xsize: u32,
    frame_ysize: u32,
    brotli_effort: Option<i32>,
) -> FrameSettings {
    let distance = frame_cfg.distance.unwrap_or(0.0);
    let lossless = distance < LOSSLESS_DISTANCE_THRESHOLD;

    let mut header = FrameHeader::default();
    let mut set_header = false;
    if let Some(mode) = frame_cfg.blend_mode {
        if mode != header.layer_info.blend_info.mode {
            set_header = true;
            header.layer_info.blend_info.mode = mode;
        }
    }
    if let Some(ticks) = frame_cfg.duration_ticks {
        if ticks != 0 {
            set_header = true;
            header.duration = ticks;
        }
    }
    if let Some(ms) = frame_cfg.duration_ms {
        if ms != 0 && enc_info.animation.tps_denominator != 0 {
            set_header = true;
            let tps = enc_info.animation.tps_numerator as f32
                / enc_info.animation.tps_denominator as f32;
            header.duration = ((ms as f32 / 1000.0) * tps).round() as u32;
        }
    }
    if let Some((crop_x0, crop_y0)) = frame_cfg.offset {
        header.layer_info.crop_x0 = crop_x0;
        header.layer_info.crop_y0 = crop_y0;
        if crop_x0 != 0 || crop_y0 != 0 {
            set_header = true;
            header.layer_info.have_crop = true;
        }
    }
    if header.layer_info.have_crop
        || frame_xsize != enc_info.xsize
        || frame_ysize != enc_info.ysize
    {
        set_header = true;
        header.layer_info.have_crop = true;
        header.layer_info.xsize = frame_xsize;
        header.layer_info.ysize = frame_ysize;
    }
    if let Some(source) = frame_cfg.blend_source {
        if source != 0 {
            set_header = true;
            header.layer_info.blend_info.source = source;
        }
    }
    if let Some(slot) = frame_cfg.save_as_reference {
        if slot != 0 {
            set_header = true;
            header.layer_info.save_as_reference = slot;
        }
    }

    FrameSettings {
        lossless,
        distance,
        effort: frame_cfg.effort,
        modular_prev_channels: frame_cfg.ma_prev_channels,
        modular_ma_tree_learning_percent: frame_cfg.ma_tree_learn_pct,
        patches: frame_cfg.patches,
        brotli_effort,
        header: set_header.then_some(header),
        name: frame_cfg.name.clone().filter(|name| !name.is_empty()),
    }
}

/// The smallest format that preserves the declared bit depth and channel
/// count of every input. Out-of-range samples can't be detected up front,
/// so clamping is possible with integer types.
fn suggest_format(
    decoders: &mut [Option<Decoder<'static>>],
) -> Result<PixelFormat, ComposeError> {
    let mut format = PixelFormat {
        num_channels: 1,
        data_type: DataType::U8,
        endianness: Endianness::Native,
        align: 0,
    };
    let mut need_alpha = false;
    for decoder in decoders.iter_mut().flatten() {
        let this = decoder.suggest_pixel_format()?;
        need_alpha = need_alpha || this.num_channels == 2 || this.num_channels == 4;
        format.num_channels = format.num_channels.max(this.num_channels);
        if this.data_type.rank() > format.data_type.rank() {
            format.data_type = this.data_type;
        }
    }
    if need_alpha && (format.num_channels == 1 || format.num_channels == 3) {
        format.num_channels += 1;
    }
    Ok(format)
}

/// (index, record) pairs for all non-reserved boxes of an input.
fn non_reserved_boxes(
    decoder: &mut Decoder<'_>,
) -> Result<Vec<(usize, BoxRecord)>, ComposeError> {
    let count = decoder.box_count()?;
    let mut boxes = Vec::new();
    for index in 0..count {
        let record = decoder.box_info(index)?;
        if !record.ty.is_reserved() {
            boxes.push((index, record));
        }
    }
    Ok(boxes)
}

fn color_profile_from_decoder(decoder: &mut Decoder<'_>) -> Result<ColorProfile, ComposeError> {
    let encoded = decoder.encoded_color_profile(ColorProfileTarget::Data)?;
    let icc = decoder.icc_profile(ColorProfileTarget::Data)?.to_vec();
    Ok(ColorProfile { encoded, icc })
}

/// Extracts a colour profile from a file that is either a JXL or a raw
/// ICC profile.
fn color_profile_from_path(
    path: &Path,
    sessions: &SessionFactory,
) -> Result<ColorProfile, ComposeError> {
    let bytes = std::fs::read(path)?;
    match check_signature(&bytes) {
        Signature::Codestream | Signature::Container => {
            tracing::debug!("Getting color profile from an existing JXL");
            let mut decoder = Decoder::new(sessions());
            decoder.open_memory(
                &bytes,
                DecoderFlags::default(),
                DecoderHints {
                    no_pixels: true,
                    ..DecoderHints::default()
                },
            )?;
            color_profile_from_decoder(&mut decoder)
        }
        _ => {
            // ICC profiles carry the "acsp" signature at byte 36.
            if bytes.len() >= 40 && &bytes[36..40] == b"acsp" {
                tracing::debug!(path = %path.display(), "File is a raw ICC profile");
                Ok(ColorProfile::from_icc(bytes))
            } else {
                Err(ComposeError::InvalidConfig(format!(
                    "{} doesn't look like either an ICC or a JXL file",
                    path.display()
                )))
            }
        }
    }
}

fn write_box(
    encoder: &mut dyn EncoderSession,
    output: &mut dyn Write,
    buffer: &mut [u8],
    ty: BoxType,
    content: &[u8],
    compress: bool,
    is_last: bool,
) -> Result<(), ComposeError> {
    encoder.add_box(ty, content, compress)?;
    if is_last {
        encoder.close_boxes();
    }
    drain_encoder(encoder, buffer, output)
}

/// Drains encoder output into `output` until the encoder reports that
/// everything pushed so far has been written.
fn drain_encoder(
    encoder: &mut dyn EncoderSession,
    buffer: &mut [u8],
    output: &mut dyn Write,
) -> Result<(), ComposeError> {
    loop {
        let out = encoder.process_out(buffer)?;
        output.write_all(&buffer[..out.written])?;
        if out.done {
            return Ok(());
        }
    }
}
