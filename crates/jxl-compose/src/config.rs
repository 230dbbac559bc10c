//! Declarative merge configuration.
//!
//! A [`MergeConfig`] describes the output file: global animation and canvas
//! settings, per-frame encoding settings, and metadata boxes. Per-item
//! configs start from [`MergeConfig::frame_defaults`] /
//! [`MergeConfig::box_defaults`] with item-level overrides applied on top.
//! How the document is serialised (JSON or otherwise) is the caller's
//! business; this crate consumes the materialised struct.

use std::path::PathBuf;

use jxl_session::{BlendMode, BoxType, ColorEncoding, DataType};

use crate::ComposeError;

/// A metadata box to include in the output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BoxConfig {
    /// Four-byte box type. Must not be reserved for the container format.
    pub ty: Option<String>,
    /// File whose bytes become the box payload; absent means empty.
    pub file: Option<PathBuf>,
    /// Whether to store the box Brotli-compressed (as `brob`).
    pub compress: Option<bool>,
}

impl BoxConfig {
    /// Copies every set field of `overrides` onto `self`; unset fields are
    /// left untouched.
    pub fn update(&mut self, overrides: &BoxConfig) -> &mut Self {
        if let Some(ty) = &overrides.ty {
            self.ty = Some(ty.clone());
        }
        if let Some(file) = &overrides.file {
            self.file = Some(file.clone());
        }
        if let Some(compress) = overrides.compress {
            self.compress = Some(compress);
        }
        self
    }

    pub fn is_all_default(&self) -> bool {
        *self == Self::default()
    }

    /// The validated box type.
    pub fn box_type(&self) -> Result<BoxType, ComposeError> {
        let Some(ty) = &self.ty else {
            return Err(ComposeError::InvalidConfig("box has no type".into()));
        };
        let bytes: [u8; 4] = ty
            .as_bytes()
            .try_into()
            .map_err(|_| ComposeError::InvalidConfig(format!("invalid box type {ty:?}")))?;
        if !bytes.iter().all(|b| b.is_ascii()) {
            return Err(ComposeError::InvalidConfig(format!(
                "box type {ty:?} is not ASCII"
            )));
        }
        let ty = BoxType(bytes);
        if ty.is_reserved() {
            return Err(ComposeError::InvalidConfig(format!(
                "box type {ty} is reserved for the container format"
            )));
        }
        Ok(ty)
    }
}

/// How the output colour profile is specified.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpec {
    /// Copy the profile from a JXL or raw ICC file.
    File(PathBuf),
    /// Explicit encoded profile fields.
    Encoded(ColorEncoding),
}

/// Encoding settings for a single frame. Also used to pass global
/// overrides via [`MergeConfig::frame_defaults`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameConfig {
    pub blend_mode: Option<BlendMode>,
    /// Reference slot to blend against.
    pub blend_source: Option<u32>,
    /// Whether this input's metadata boxes are copied to the output.
    pub copy_boxes: Option<bool>,
    /// Butteraugli distance; values below the lossless threshold encode
    /// losslessly.
    pub distance: Option<f32>,
    /// Frame duration in milliseconds. Mutually exclusive with
    /// `duration_ticks`.
    pub duration_ms: Option<u32>,
    /// Frame duration in animation ticks. Mutually exclusive with
    /// `duration_ms`.
    pub duration_ticks: Option<u32>,
    pub effort: Option<i32>,
    /// Input JXL path; absent means a 1×1 transparent placeholder frame.
    pub file: Option<PathBuf>,
    pub ma_prev_channels: Option<i32>,
    pub ma_tree_learn_pct: Option<i32>,
    pub name: Option<String>,
    /// Crop offset of this layer on the canvas.
    pub offset: Option<(i32, i32)>,
    pub patches: Option<i32>,
    /// Reference slot to save this frame into, 0 through 3.
    pub save_as_reference: Option<u32>,
}

impl FrameConfig {
    /// Copies every set field of `overrides` onto `self`; unset fields are
    /// left untouched.
    pub fn update(&mut self, overrides: &FrameConfig) -> &mut Self {
        if let Some(v) = overrides.blend_mode {
            self.blend_mode = Some(v);
        }
        if let Some(v) = overrides.blend_source {
            self.blend_source = Some(v);
        }
        if let Some(v) = overrides.copy_boxes {
            self.copy_boxes = Some(v);
        }
        if let Some(v) = overrides.distance {
            self.distance = Some(v);
        }
        if let Some(v) = overrides.duration_ms {
            self.duration_ms = Some(v);
        }
        if let Some(v) = overrides.duration_ticks {
            self.duration_ticks = Some(v);
        }
        if let Some(v) = overrides.effort {
            self.effort = Some(v);
        }
        if let Some(v) = &overrides.file {
            self.file = Some(v.clone());
        }
        if let Some(v) = overrides.ma_prev_channels {
            self.ma_prev_channels = Some(v);
        }
        if let Some(v) = overrides.ma_tree_learn_pct {
            self.ma_tree_learn_pct = Some(v);
        }
        if let Some(v) = &overrides.name {
            self.name = Some(v.clone());
        }
        if let Some(v) = overrides.offset {
            self.offset = Some(v);
        }
        if let Some(v) = overrides.patches {
            self.patches = Some(v);
        }
        if let Some(v) = overrides.save_as_reference {
            self.save_as_reference = Some(v);
        }
        self
    }

    pub fn is_all_default(&self) -> bool {
        *self == Self::default()
    }

    /// Unsets optional integer fields holding `-1`, which means "use the
    /// library default" and must not reach the encoder.
    pub fn normalize(&mut self) {
        for field in [
            &mut self.effort,
            &mut self.ma_prev_channels,
            &mut self.ma_tree_learn_pct,
            &mut self.patches,
        ] {
            if *field == Some(-1) {
                *field = None;
            }
        }
    }
}

/// Top-level merge configuration.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeConfig {
    /// Animation loop count; 0 means loop forever.
    pub loops: Option<u32>,
    /// Explicit ticks-per-second fraction, overriding the automatic choice.
    pub ticks_per_second: Option<(u32, u32)>,
    /// Output orientation, 1 through 8 as in Exif.
    pub orientation: Option<u32>,
    pub color: Option<ColorSpec>,
    /// Data type used while shuttling pixels between decoders and encoder.
    pub data_type: Option<DataType>,
    pub intrinsic_xsize: Option<u32>,
    pub intrinsic_ysize: Option<u32>,
    /// Canvas size; auto-computed from the frames when absent.
    pub xsize: Option<u32>,
    pub ysize: Option<u32>,
    pub box_defaults: BoxConfig,
    pub frame_defaults: FrameConfig,
    pub codestream_level: Option<i32>,
    /// Effort used when compressing `brob` boxes, 0 through 11.
    pub brotli_effort: Option<i32>,
    pub frames: Vec<FrameConfig>,
    pub boxes: Vec<BoxConfig>,
}

impl MergeConfig {
    /// Unsets optional fields holding the `-1` "library default" sentinel.
    pub fn normalize(&mut self) {
        if self.codestream_level == Some(-1) {
            self.codestream_level = None;
        }
        if self.brotli_effort == Some(-1) {
            self.brotli_effort = None;
        }
        self.frame_defaults.normalize();
        for frame in &mut self.frames {
            frame.normalize();
        }
    }

    /// Checks the structural constraints that must hold before encoding
    /// begins.
    pub fn validate(&self) -> Result<(), ComposeError> {
        if self.frames.is_empty() {
            return Err(ComposeError::InvalidConfig("cannot merge zero images".into()));
        }
        if self.xsize.is_some() != self.ysize.is_some() {
            return Err(ComposeError::InvalidConfig(
                "if either of xsize and ysize is set, both must be set".into(),
            ));
        }
        if self.intrinsic_xsize.is_some() != self.intrinsic_ysize.is_some() {
            return Err(ComposeError::InvalidConfig(
                "if either of intrinsicXsize and intrinsicYsize is set, both must be set".into(),
            ));
        }
        if let Some((_, 0)) = self.ticks_per_second {
            return Err(ComposeError::InvalidConfig(
                "ticks-per-second denominator can't be 0".into(),
            ));
        }
        for (index, frame) in self.frames.iter().enumerate() {
            let mut resolved = self.frame_defaults.clone();
            resolved.update(frame);
            if resolved.duration_ms.is_some() && resolved.duration_ticks.is_some() {
                return Err(ComposeError::InvalidConfig(format!(
                    "frame {index} sets both durationMs and durationTicks"
                )));
            }
        }
        for boxes in &self.boxes {
            let mut resolved = self.box_defaults.clone();
            resolved.update(boxes);
            resolved.box_type()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_copies_only_set_fields() {
        let mut base = FrameConfig {
            distance: Some(1.0),
            effort: Some(7),
            ..FrameConfig::default()
        };
        base.update(&FrameConfig {
            effort: Some(9),
            name: Some("layer".into()),
            ..FrameConfig::default()
        });
        assert_eq!(base.distance, Some(1.0));
        assert_eq!(base.effort, Some(9));
        assert_eq!(base.name.as_deref(), Some("layer"));
    }

    #[test]
    fn normalize_clears_library_default_sentinels() {
        let mut frame = FrameConfig {
            effort: Some(-1),
            patches: Some(1),
            ..FrameConfig::default()
        };
        frame.normalize();
        assert_eq!(frame.effort, None);
        assert_eq!(frame.patches, Some(1));
    }

    #[test]
    fn validate_rejects_half_specified_canvas() {
        let mut config = MergeConfig {
            frames: vec![FrameConfig::default()],
            xsize: Some(64),
            ..MergeConfig::default()
        };
        assert!(config.validate().is_err());
        config.ysize = Some(64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_conflicting_durations() {
        let config = MergeConfig {
            frames: vec![FrameConfig {
                duration_ms: Some(100),
                duration_ticks: Some(4),
                ..FrameConfig::default()
            }],
            ..MergeConfig::default()
        };
        assert!(config.validate().is_err());

        // The conflict can also come from defaults plus an override.
        let config = MergeConfig {
            frame_defaults: FrameConfig {
                duration_ms: Some(100),
                ..FrameConfig::default()
            },
            frames: vec![FrameConfig {
                duration_ticks: Some(4),
                ..FrameConfig::default()
            }],
            ..MergeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_reserved_box_types() {
        for ty in ["jxlc", "JXL_", "ftyp", "jbrd", "abcde", "ab"] {
            let config = MergeConfig {
                frames: vec![FrameConfig::default()],
                boxes: vec![BoxConfig {
                    ty: Some(ty.into()),
                    ..BoxConfig::default()
                }],
                ..MergeConfig::default()
            };
            assert!(config.validate().is_err(), "{ty:?} should be rejected");
        }

        let config = MergeConfig {
            frames: vec![FrameConfig::default()],
            boxes: vec![BoxConfig {
                ty: Some("jumb".into()),
                ..BoxConfig::default()
            }],
            ..MergeConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
