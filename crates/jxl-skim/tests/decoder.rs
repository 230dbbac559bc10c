//! Facade-level scenarios driven against a scripted codec session.

use jxl_scripted::*;
use jxl_session::{
    BlendInfo, BlendMode, BoxType, ColorEncoding, ColorProfileTarget, DataType, Endianness,
    ExtraChannelInfo, ExtraChannelType, FrameHeader, LayerInfo, PixelFormat,
};
use jxl_skim::{Decoder, DecoderFlags, DecoderHints, Error, ExtraChannelRequest};

fn u8_format(num_channels: u32) -> PixelFormat {
    PixelFormat {
        num_channels,
        data_type: DataType::U8,
        endianness: Endianness::Native,
        align: 0,
    }
}

/// A codestream-flavoured memory file: magic plus padding to cover the
/// tape's input costs.
fn codestream_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len.max(2)];
    bytes[..2].copy_from_slice(&CODESTREAM_HEADER);
    bytes
}

fn container_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len.max(12)];
    bytes[..12].copy_from_slice(&CONTAINER_HEADER);
    bytes
}

#[test]
fn basic_info_is_lazy_and_cached() {
    let data = codestream_bytes(64);
    let session = ScriptedSession::new(vec![
        step(10, Action::BasicInfo(plain_info(16, 16))),
        step(20, named_frame(frame_header(true, 16, 16), "")),
    ]);
    let probe = session.probe();
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    assert!(decoder.is_fully_buffered());
    assert_eq!(probe.process_calls.get(), 0);

    let info = decoder.basic_info().unwrap();
    assert_eq!((info.xsize, info.ysize), (16, 16));
    assert_eq!(info.num_color_channels, 3);
    assert!(!info.have_animation);

    let calls = probe.process_calls.get();
    assert_eq!(decoder.xsize().unwrap(), 16);
    assert_eq!(decoder.ysize().unwrap(), 16);
    assert_eq!(probe.process_calls.get(), calls, "cached info re-ran the codec");
}

#[test]
fn no_pixels_hint_reports_identical_basic_info() {
    let data = codestream_bytes(64);
    let tape = || {
        vec![
            step(10, Action::BasicInfo(plain_info(16, 16))),
            step(
                20,
                named_frame(frame_header(true, 16, 16), ""),
            ),
            step(
                8,
                Action::Pixels {
                    pixels: vec![0; 16 * 16 * 3],
                    extra: Vec::new(),
                },
            ),
        ]
    };

    let mut full = Decoder::new(Box::new(ScriptedSession::new(tape())));
    full.open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    let mut buf = vec![0u8; 16 * 16 * 3];
    full.frame_pixels(0, &u8_format(3), Some(&mut buf), Vec::new())
        .unwrap();

    let mut headers_only = Decoder::new(Box::new(ScriptedSession::new(tape())));
    headers_only
        .open_memory(
            &data,
            DecoderFlags::default(),
            DecoderHints {
                no_pixels: true,
                ..DecoderHints::default()
            },
        )
        .unwrap();

    assert_eq!(
        full.basic_info().unwrap(),
        headers_only.basic_info().unwrap()
    );
}

#[test]
fn signature_check_rejects_non_jxl_inputs() {
    let png = [
        0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0,
    ];
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(Vec::new())));
    let err = decoder
        .open_memory(&png, DecoderFlags::default(), DecoderHints::default())
        .unwrap_err();
    match err {
        Error::NotJxl { detail } => assert!(detail.contains("PNG")),
        other => panic!("expected NotJxl, got {other:?}"),
    }

    let garbage = *b"GIF89a..";
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(Vec::new())));
    let err = decoder
        .open_memory(&garbage, DecoderFlags::default(), DecoderHints::default())
        .unwrap_err();
    assert!(matches!(err, Error::NotJxl { .. }));
}

fn three_layer_tape() -> Vec<Step> {
    let blend = BlendInfo {
        mode: BlendMode::Blend,
        ..BlendInfo::default()
    };
    let layer1 = FrameHeader {
        layer_info: LayerInfo {
            have_crop: true,
            crop_x0: -2,
            crop_y0: -1,
            xsize: 5,
            ysize: 5,
            blend_info: blend,
            ..LayerInfo::default()
        },
        ..FrameHeader::default()
    };
    vec![
        step(10, Action::BasicInfo(plain_info(16, 16))),
        step(
            10,
            Action::Frame {
                header: frame_header(false, 16, 16),
                name: None,
                ec_blend: vec![BlendInfo::default(), blend],
            },
        ),
        step(
            4,
            Action::Pixels {
                pixels: (0u8..12).collect(),
                extra: vec![(0, vec![1, 2, 3, 4])],
            },
        ),
        step(
            10,
            Action::Frame {
                header: FrameHeader {
                    name_len: 4,
                    ..layer1
                },
                name: Some("Name".into()),
                ec_blend: vec![blend, blend],
            },
        ),
        step(
            4,
            Action::Pixels {
                pixels: vec![9; 75],
                extra: Vec::new(),
            },
        ),
        step(
            10,
            Action::Frame {
                header: frame_header(true, 16, 16),
                name: None,
                ec_blend: vec![BlendInfo::default(), BlendInfo::default()],
            },
        ),
        step(
            4,
            Action::Pixels {
                pixels: vec![7; 768],
                extra: Vec::new(),
            },
        ),
    ]
}

fn alpha_depth_channels() -> Vec<(ExtraChannelInfo, Option<String>)> {
    vec![
        (
            ExtraChannelInfo {
                ty: ExtraChannelType::Alpha,
                bits_per_sample: 8,
                ..ExtraChannelInfo::default()
            },
            None,
        ),
        (
            ExtraChannelInfo {
                ty: ExtraChannelType::Depth,
                bits_per_sample: 8,
                name_len: 5,
                ..ExtraChannelInfo::default()
            },
            Some("depth".into()),
        ),
    ]
}

#[test]
fn non_coalesced_layers_carry_names_and_blend_info() {
    let mut info = plain_info(16, 16);
    info.num_extra_channels = 2;
    info.alpha_bits = 8;
    let mut tape = three_layer_tape();
    tape[0] = step(10, Action::BasicInfo(info));

    let data = codestream_bytes(256);
    let session = ScriptedSession::new(tape).with_extra_channels(alpha_depth_channels());
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(
            &data,
            DecoderFlags {
                no_coalesce: true,
                ..DecoderFlags::default()
            },
            DecoderHints::default(),
        )
        .unwrap();

    assert_eq!(decoder.frame_count().unwrap(), 3);

    let record = decoder.frame_info(1).unwrap();
    assert_eq!(record.name.as_deref(), Some("Name"));
    let layer = record.header.layer_info;
    assert!(layer.have_crop);
    assert_eq!((layer.crop_x0, layer.crop_y0), (-2, -1));
    assert_eq!(layer.blend_info.mode, BlendMode::Blend);

    // Extra-channel blend info is recorded exactly because coalescing is
    // disabled.
    let blend = record.ec_blend_info.as_ref().unwrap();
    assert_eq!(blend.len(), 2);
    assert_eq!(blend[0].mode, BlendMode::Blend);

    let extra = decoder.extra_channel_info().unwrap();
    assert_eq!(extra.len(), 2);
    assert_eq!(extra[0].info.ty, ExtraChannelType::Alpha);
    assert_eq!(extra[1].name.as_deref(), Some("depth"));
}

#[test]
fn frame_records_match_in_order_and_random_access() {
    let data = codestream_bytes(256);

    let mut in_order = Decoder::new(Box::new(ScriptedSession::new(three_layer_tape())));
    in_order
        .open_memory(
            &data,
            DecoderFlags {
                no_coalesce: true,
                ..DecoderFlags::default()
            },
            DecoderHints::default(),
        )
        .unwrap();
    let mut sequential = Vec::new();
    for index in 0..in_order.frame_count().unwrap() {
        sequential.push(in_order.frame_info(index).unwrap().clone());
    }

    let session = ScriptedSession::new(three_layer_tape());
    let probe = session.probe();
    let mut random = Decoder::new(Box::new(session));
    random
        .open_memory(
            &data,
            DecoderFlags {
                no_coalesce: true,
                ..DecoderFlags::default()
            },
            DecoderHints::default(),
        )
        .unwrap();
    // Out-of-order access: headers seen on the way to frame 2 are cached,
    // so the earlier records are served without touching the codec.
    let second = random.frame_info(2).unwrap().clone();
    let calls = probe.process_calls.get();
    let zeroth = random.frame_info(0).unwrap().clone();
    let first = random.frame_info(1).unwrap().clone();
    assert_eq!(probe.process_calls.get(), calls);
    assert_eq!(vec![zeroth, first, second], sequential);

    // Decoding pixels of an already-passed frame forces a rewind.
    let mut pixels = vec![0u8; 768];
    random
        .frame_pixels(0, &u8_format(3), Some(&mut pixels), Vec::new())
        .unwrap();
    assert!(probe.rewinds.get() >= 1);
    assert_eq!(&pixels[..12], &(0u8..12).collect::<Vec<_>>()[..]);

    // Two successive counts agree, and match the enumerated records.
    assert_eq!(random.frame_count().unwrap(), 3);
    assert_eq!(random.frame_count().unwrap(), 3);
}

#[test]
fn frame_index_past_the_end_is_out_of_range() {
    let data = codestream_bytes(256);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(three_layer_tape())));
    decoder
        .open_memory(
            &data,
            DecoderFlags {
                no_coalesce: true,
                ..DecoderFlags::default()
            },
            DecoderHints::default(),
        )
        .unwrap();
    let count = decoder.frame_count().unwrap();
    let err = decoder.frame_info(count).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { .. }));
    assert!(err.is_usage());
}

#[test]
fn still_image_frame_count_needs_no_scan() {
    let data = codestream_bytes(64);
    let session = ScriptedSession::new(vec![
        step(10, Action::BasicInfo(plain_info(8, 8))),
        step(30, named_frame(frame_header(true, 8, 8), "")),
    ]);
    let probe = session.probe();
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    decoder.basic_info().unwrap();
    let calls = probe.process_calls.get();
    // Coalescing and no animation: the count is 1 by construction.
    assert_eq!(decoder.frame_count().unwrap(), 1);
    assert_eq!(probe.process_calls.get(), calls);
}

#[test]
fn frame_iterator_walks_all_frames() {
    let data = codestream_bytes(256);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(three_layer_tape())));
    decoder
        .open_memory(
            &data,
            DecoderFlags {
                no_coalesce: true,
                ..DecoderFlags::default()
            },
            DecoderHints::default(),
        )
        .unwrap();

    let mut names = Vec::new();
    let mut frames = decoder.frames();
    while let Some(record) = frames.next().unwrap() {
        names.push(record.name.clone());
    }
    assert_eq!(names, vec![None, Some("Name".into()), None]);
    // The iterator is exhausted and stays that way.
    assert!(frames.next().unwrap().is_none());
}

#[test]
fn frame_pixels_roundtrip_with_extra_channels() {
    let mut info = plain_info(2, 2);
    info.num_extra_channels = 1;
    info.alpha_bits = 8;
    let tape = vec![
        step(10, Action::BasicInfo(info)),
        step(
            10,
            Action::Frame {
                header: frame_header(true, 2, 2),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            8,
            Action::Pixels {
                pixels: (0u8..12).collect(),
                extra: vec![(0, vec![10, 20, 30, 40])],
            },
        ),
    ];
    let data = codestream_bytes(64);
    let session = ScriptedSession::new(tape).with_extra_channels(alpha_depth_channels());
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();

    let mut pixels = vec![0u8; 12];
    let mut alpha = vec![0u8; 4];
    decoder
        .frame_pixels(
            0,
            &u8_format(3),
            Some(&mut pixels),
            vec![ExtraChannelRequest {
                channel_index: 0,
                format: u8_format(1),
                buf: &mut alpha,
            }],
        )
        .unwrap();
    assert_eq!(pixels, (0u8..12).collect::<Vec<_>>());
    assert_eq!(alpha, vec![10, 20, 30, 40]);
}

#[test]
fn extra_channels_only_use_the_dummy_main_buffer() {
    let mut info = plain_info(2, 2);
    info.num_extra_channels = 1;
    info.alpha_bits = 8;
    let tape = vec![
        step(10, Action::BasicInfo(info)),
        step(
            10,
            Action::Frame {
                header: frame_header(true, 2, 2),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            8,
            Action::Pixels {
                pixels: vec![0; 12],
                extra: vec![(0, vec![5, 6, 7, 8])],
            },
        ),
    ];
    let data = codestream_bytes(64);
    let session = ScriptedSession::new(tape).with_extra_channels(alpha_depth_channels());
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();

    let mut alpha = vec![0u8; 4];
    decoder
        .frame_pixels(
            0,
            &u8_format(3),
            None,
            vec![ExtraChannelRequest {
                channel_index: 0,
                format: u8_format(1),
                buf: &mut alpha,
            }],
        )
        .unwrap();
    assert_eq!(alpha, vec![5, 6, 7, 8]);

    // A bad extra channel index is reported, not ignored.
    let mut sink = vec![0u8; 4];
    let err = decoder
        .frame_pixels(
            0,
            &u8_format(3),
            None,
            vec![ExtraChannelRequest {
                channel_index: 9,
                format: u8_format(1),
                buf: &mut sink,
            }],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::IndexOutOfRange {
            kind: "extra channel",
            ..
        }
    ));
}

#[test]
fn undersized_buffers_are_rejected_up_front() {
    let data = codestream_bytes(64);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(vec![
        step(10, Action::BasicInfo(plain_info(4, 4))),
        step(
            10,
            Action::Frame {
                header: frame_header(true, 4, 4),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            8,
            Action::Pixels {
                pixels: vec![0; 48],
                extra: Vec::new(),
            },
        ),
    ])));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();

    let mut small = vec![0u8; 10];
    let err = decoder
        .frame_pixels(0, &u8_format(3), Some(&mut small), Vec::new())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::BufferTooSmall {
            required: 48,
            got: 10
        }
    ));
}

fn container_tape_with_boxes() -> Vec<Step> {
    vec![
        step(4, plain_box(b"ftyp", b"jxl ")),
        step(4, plain_box(b"jxll", &[10])),
        step(
            4,
            Action::Box {
                raw_type: BoxType::BROTLI_COMPRESSED,
                inner_type: BoxType(*b"xml "),
                size_contents: 9,
                size_raw: 17,
                payload_raw: b"shrunken!".to_vec(),
                payload_decompressed: Some(b"<xml>expanded</xml>".to_vec()),
            },
        ),
        step(10, Action::BasicInfo(container_info(8, 8))),
        step(
            6,
            Action::Frame {
                header: frame_header(true, 8, 8),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            4,
            Action::Pixels {
                pixels: vec![1; 192],
                extra: Vec::new(),
            },
        ),
        step(
            4,
            Action::Box {
                raw_type: BoxType::EXIF,
                inner_type: BoxType::EXIF,
                size_contents: 0,
                size_raw: 0,
                payload_raw: b"exif-until-eof".to_vec(),
                payload_decompressed: None,
            },
        ),
    ]
}

fn container_info(xsize: u32, ysize: u32) -> jxl_session::BasicInfo {
    jxl_session::BasicInfo {
        have_container: true,
        ..plain_info(xsize, ysize)
    }
}

#[test]
fn box_enumeration_reports_inner_types_and_unbounded_sizes() {
    let data = container_bytes(128);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(container_tape_with_boxes())));
    decoder
        .open_memory(
            &data,
            DecoderFlags::default(),
            DecoderHints {
                want_boxes: true,
                ..DecoderHints::default()
            },
        )
        .unwrap();

    assert_eq!(decoder.box_count().unwrap(), 4);

    let brob = decoder.box_info(2).unwrap();
    assert!(brob.compressed);
    assert_eq!(brob.ty, BoxType(*b"xml "));
    assert_eq!(brob.size, 9);
    assert!(!brob.unbounded);

    let tail = decoder.box_info(3).unwrap();
    assert_eq!(tail.ty, BoxType::EXIF);
    assert!(tail.unbounded);
    assert_eq!(tail.size, 0);

    let err = decoder.box_info(4).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { .. }));
}

#[test]
fn box_content_decompresses_raw_and_truncates() {
    let data = container_bytes(128);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(container_tape_with_boxes())));
    decoder
        .open_memory(
            &data,
            DecoderFlags::default(),
            DecoderHints {
                want_boxes: true,
                ..DecoderHints::default()
            },
        )
        .unwrap();

    // Decompressed payload of the brob box.
    let (full, content) = decoder.box_content_vec(2, usize::MAX, true).unwrap();
    assert!(full);
    assert_eq!(content, b"<xml>expanded</xml>");

    // The raw compressed payload on request.
    let (full, content) = decoder.box_content_vec(2, usize::MAX, false).unwrap();
    assert!(full);
    assert_eq!(content, b"shrunken!");

    // Exhausting the caller's cap is not an error.
    let mut small = [0u8; 4];
    let (full, written) = decoder.box_content(2, &mut small, true).unwrap();
    assert!(!full);
    assert_eq!(&small[..written], b"<xml");

    // Reading the unbounded box to EOF reveals its true size.
    let (full, content) = decoder.box_content_vec(3, usize::MAX, false).unwrap();
    assert!(full);
    assert_eq!(content, b"exif-until-eof");
    assert_eq!(decoder.box_info(3).unwrap().size, 14);
}

#[test]
fn codestream_level_comes_from_the_jxll_box() {
    let data = container_bytes(128);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(container_tape_with_boxes())));
    decoder
        .open_memory(
            &data,
            DecoderFlags::default(),
            DecoderHints {
                want_boxes: true,
                ..DecoderHints::default()
            },
        )
        .unwrap();
    // jxll sits at index 1, before the earliest position the scan looks
    // at, so the next candidate wins... there is none, hence -1.
    assert_eq!(decoder.codestream_level().unwrap(), -1);

    // With jxll at index 2 the level is found.
    let mut tape = container_tape_with_boxes();
    tape.swap(1, 2);
    let data = container_bytes(128);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(tape)));
    decoder
        .open_memory(
            &data,
            DecoderFlags::default(),
            DecoderHints {
                want_boxes: true,
                ..DecoderHints::default()
            },
        )
        .unwrap();
    assert_eq!(decoder.codestream_level().unwrap(), 10);

    // A bare codestream has no container and no level.
    let data = codestream_bytes(64);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(vec![step(
        10,
        Action::BasicInfo(plain_info(4, 4)),
    )])));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    assert_eq!(decoder.codestream_level().unwrap(), -1);
}

#[test]
fn jpeg_reconstruction_roundtrip() {
    let jpeg_bytes: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
    let tape = vec![
        step(10, Action::BasicInfo(container_info(8, 8))),
        step(4, Action::Jpeg(jpeg_bytes.clone())),
        step(
            6,
            Action::Frame {
                header: frame_header(true, 8, 8),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            4,
            Action::Pixels {
                pixels: vec![0; 192],
                extra: Vec::new(),
            },
        ),
    ];
    let data = container_bytes(64);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(tape)));
    decoder
        .open_memory(
            &data,
            DecoderFlags::default(),
            DecoderHints {
                want_jpeg: true,
                ..DecoderHints::default()
            },
        )
        .unwrap();

    assert!(decoder.has_jpeg_reconstruction().unwrap());

    let mut sink = Vec::new();
    let written = decoder.reconstructed_jpeg(&mut sink).unwrap();
    assert_eq!(written, Some(jpeg_bytes.len() as u64));
    assert_eq!(sink, jpeg_bytes);

    // Byte-identical across a second pass.
    let mut sink2 = Vec::new();
    decoder.reconstructed_jpeg(&mut sink2).unwrap();
    assert_eq!(sink, sink2);

    // The owned-buffer variant truncates at the cap.
    let (full, partial) = decoder.reconstructed_jpeg_vec(100).unwrap().unwrap();
    assert!(!full);
    assert_eq!(partial, &jpeg_bytes[..100]);
}

#[test]
fn missing_jpeg_reconstruction_is_reported_as_absent() {
    let data = codestream_bytes(64);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(vec![
        step(10, Action::BasicInfo(plain_info(4, 4))),
        step(
            10,
            Action::Frame {
                header: frame_header(true, 4, 4),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            4,
            Action::Pixels {
                pixels: vec![0; 48],
                extra: Vec::new(),
            },
        ),
    ])));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    assert!(!decoder.has_jpeg_reconstruction().unwrap());
    let mut sink = Vec::new();
    assert_eq!(decoder.reconstructed_jpeg(&mut sink).unwrap(), None);
    assert!(sink.is_empty());
}

fn color_tape() -> Vec<Step> {
    let mut icc = vec![0u8; 160];
    for (i, b) in icc.iter_mut().enumerate() {
        *b = i as u8;
    }
    vec![
        step(10, Action::BasicInfo(plain_info(4, 4))),
        step(
            6,
            Action::Color {
                orig_enc: Some(ColorEncoding::srgb(false)),
                data_enc: Some(ColorEncoding::srgb(false)),
                orig_icc: icc.clone(),
                data_icc: icc,
            },
        ),
        step(
            6,
            Action::Frame {
                header: frame_header(true, 4, 4),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            4,
            Action::Pixels {
                pixels: vec![0; 48],
                extra: Vec::new(),
            },
        ),
    ]
}

#[test]
fn color_profiles_are_fetched_once_and_cached() {
    let data = codestream_bytes(64);
    let session = ScriptedSession::new(color_tape());
    let probe = session.probe();
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();

    let encoded = decoder
        .encoded_color_profile(ColorProfileTarget::Original)
        .unwrap()
        .unwrap();
    assert_eq!(encoded, ColorEncoding::srgb(false));
    assert_eq!(decoder.icc_profile_len(ColorProfileTarget::Data).unwrap(), 160);
    assert_eq!(
        decoder.icc_profile(ColorProfileTarget::Data).unwrap().len(),
        160
    );

    let calls = probe.process_calls.get();
    decoder
        .encoded_color_profile(ColorProfileTarget::Data)
        .unwrap()
        .unwrap();
    assert_eq!(probe.process_calls.get(), calls);
}

#[test]
fn output_profile_override_accepts_and_reports_refusal() {
    let data = codestream_bytes(64);
    let gray = ColorEncoding::srgb(true);

    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(color_tape())));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    assert!(decoder
        .set_preferred_output_profile(Some(&gray), None)
        .unwrap());
    assert_eq!(
        decoder
            .encoded_color_profile(ColorProfileTarget::Data)
            .unwrap(),
        Some(gray)
    );

    // A codec that silently ignores the override (non-XYB input) shows up
    // as `false`, not as an error.
    let session =
        ScriptedSession::new(color_tape()).with_profile_override(ProfileOverride::SilentlyIgnore);
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    assert!(!decoder
        .set_preferred_output_profile(Some(&gray), None)
        .unwrap());

    let session =
        ScriptedSession::new(color_tape()).with_profile_override(ProfileOverride::Refuse);
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    assert!(!decoder
        .set_preferred_output_profile(Some(&gray), None)
        .unwrap());
}

#[test]
fn output_profile_override_usage_errors() {
    let data = codestream_bytes(64);
    let gray = ColorEncoding::srgb(true);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(color_tape())));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();

    // Neither profile provided.
    assert!(decoder
        .set_preferred_output_profile(None, None)
        .unwrap_err()
        .is_usage());
    // ICC without a CMS.
    assert!(decoder
        .set_preferred_output_profile(None, Some(&[0u8; 128]))
        .unwrap_err()
        .is_usage());

    // Any pixels decoded block further overrides.
    let mut pixels = vec![0u8; 48];
    decoder
        .frame_pixels(0, &u8_format(3), Some(&mut pixels), Vec::new())
        .unwrap();
    assert!(decoder
        .set_preferred_output_profile(Some(&gray), None)
        .unwrap_err()
        .is_usage());
}

#[test]
fn decoder_flags_reach_the_session() {
    let data = codestream_bytes(64);
    let session = ScriptedSession::new(vec![step(10, Action::BasicInfo(plain_info(4, 4)))]);
    let probe = session.probe();
    let mut decoder = Decoder::new(Box::new(session));
    decoder
        .open_memory(
            &data,
            DecoderFlags {
                no_coalesce: true,
                keep_orientation: true,
                unpremultiply_alpha: true,
            },
            DecoderHints::default(),
        )
        .unwrap();
    assert!(probe.coalescing_disabled.get());
    assert!(probe.keep_orientation.get());
    assert!(probe.unpremultiply_alpha.get());
}

#[test]
fn truncated_input_surfaces_corrupted_stream() {
    // The tape wants more bytes than the memory source holds.
    let data = codestream_bytes(8);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(vec![step(
        1000,
        Action::BasicInfo(plain_info(4, 4)),
    )])));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    let err = decoder.basic_info().unwrap_err();
    assert!(matches!(err, Error::CorruptedStream(_)));
}

fn streaming_tape() -> Vec<Step> {
    vec![
        step(100, Action::BasicInfo(plain_info(4, 4))),
        step(
            2000,
            Action::Frame {
                header: frame_header(false, 4, 4),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            1500,
            Action::Pixels {
                pixels: vec![1; 48],
                extra: Vec::new(),
            },
        ),
        step(
            1200,
            Action::Frame {
                header: frame_header(true, 4, 4),
                name: None,
                ec_blend: Vec::new(),
            },
        ),
        step(
            100,
            Action::Pixels {
                pixels: vec![2; 48],
                extra: Vec::new(),
            },
        ),
    ]
}

fn streaming_source() -> Vec<u8> {
    // Larger than the 1 KiB buffer cap used below, so the window has to
    // slide and rewinds have to seek.
    let mut data = vec![0u8; 5000];
    data[..2].copy_from_slice(&CODESTREAM_HEADER);
    data
}

#[test]
fn streaming_source_replenishes_in_bounded_chunks() {
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(streaming_tape())));
    decoder
        .open_stream(
            std::io::Cursor::new(streaming_source()),
            DecoderFlags {
                no_coalesce: true,
                ..DecoderFlags::default()
            },
            DecoderHints::default(),
            1,
        )
        .unwrap();

    assert_eq!(decoder.xsize().unwrap(), 4);
    let mut pixels = vec![0u8; 48];
    decoder
        .frame_pixels(0, &u8_format(3), Some(&mut pixels), Vec::new())
        .unwrap();
    assert_eq!(pixels, vec![1; 48]);
    decoder
        .frame_pixels(1, &u8_format(3), Some(&mut pixels), Vec::new())
        .unwrap();
    assert_eq!(pixels, vec![2; 48]);
    assert!(!decoder.is_fully_buffered());

    // Going back to frame 0 now needs a second pass; the seekable stream
    // makes that transparent.
    decoder
        .frame_pixels(0, &u8_format(3), Some(&mut pixels), Vec::new())
        .unwrap();
    assert_eq!(pixels, vec![1; 48]);
}

#[test]
fn unseekable_source_refuses_out_of_sequence_access() {
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(streaming_tape())));
    decoder
        .open_reader(
            ChunkedReader::new(streaming_source(), 997),
            DecoderFlags {
                no_coalesce: true,
                ..DecoderFlags::default()
            },
            DecoderHints::default(),
            1,
        )
        .unwrap();

    // In-sequence access works without seeking.
    let mut pixels = vec![0u8; 48];
    decoder
        .frame_pixels(1, &u8_format(3), Some(&mut pixels), Vec::new())
        .unwrap();
    assert_eq!(pixels, vec![2; 48]);

    // A second pass is impossible.
    let err = decoder
        .frame_pixels(0, &u8_format(3), Some(&mut pixels), Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::NotSeekable));
}

/// Reader that returns at most `chunk` bytes per call and cannot seek.
struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl ChunkedReader {
    fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk,
        }
    }
}

impl std::io::Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let take = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..take].copy_from_slice(&self.data[self.pos..self.pos + take]);
        self.pos += take;
        Ok(take)
    }
}

#[test]
fn closed_decoder_reports_usage() {
    let data = codestream_bytes(64);
    let mut decoder = Decoder::new(Box::new(ScriptedSession::new(vec![step(
        10,
        Action::BasicInfo(plain_info(4, 4)),
    )])));
    decoder
        .open_memory(&data, DecoderFlags::default(), DecoderHints::default())
        .unwrap();
    decoder.basic_info().unwrap();
    decoder.close();
    let err = decoder.basic_info().unwrap_err();
    assert!(err.is_usage());
}
