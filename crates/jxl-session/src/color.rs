//! Colour profile description and structural equivalence.
//!
//! Profiles are compared, never converted; two profiles are "equivalent"
//! when decoded pixels can be reinterpreted from one to the other without a
//! colour transform.

/// Which of the two profiles carried by an image is being asked about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ColorProfileTarget {
    /// The profile the image was tagged with at encode time.
    Original,
    /// The profile that applies to pixels decoded through this session.
    Data,
}

/// Chromaticity coordinate pair.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct CustomXy {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ColorSpace {
    #[default]
    Rgb,
    Gray,
    Xyb,
    Unknown,
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub enum WhitePoint {
    #[default]
    D65,
    Custom(CustomXy),
    E,
    Dci,
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub enum Primaries {
    #[default]
    Srgb,
    Custom {
        red: CustomXy,
        green: CustomXy,
        blue: CustomXy,
    },
    Bt2100,
    P3,
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub enum TransferFunction {
    Gamma(f64),
    Bt709,
    Unknown,
    Linear,
    #[default]
    Srgb,
    Pq,
    Dci,
    Hlg,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RenderingIntent {
    Perceptual,
    #[default]
    Relative,
    Saturation,
    Absolute,
}

/// Structured colour profile, as opposed to an opaque ICC blob.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ColorEncoding {
    pub color_space: ColorSpace,
    pub white_point: WhitePoint,
    pub primaries: Primaries,
    pub transfer_function: TransferFunction,
    pub rendering_intent: RenderingIntent,
}

/// Canonical sRGB primaries, in xy.
pub const SRGB_PRIMARIES: [[f64; 2]; 3] = [
    [0.639998686, 0.330010138],
    [0.300003784, 0.600003357],
    [0.150002046, 0.059997204],
];

/// Canonical white points, in xy.
pub const WP_D65: [f64; 2] = [0.3127, 0.3290];
pub const WP_E: [f64; 2] = [1.0 / 3.0, 1.0 / 3.0];
pub const WP_DCI: [f64; 2] = [0.314, 0.351];

const XY_TOLERANCE: f64 = 1e-9;
const GAMMA_TOLERANCE: f64 = 1e-6;

impl ColorEncoding {
    /// The sRGB profile, or its grayscale variant.
    pub fn srgb(gray: bool) -> Self {
        Self {
            color_space: if gray {
                ColorSpace::Gray
            } else {
                ColorSpace::Rgb
            },
            white_point: WhitePoint::D65,
            primaries: Primaries::Srgb,
            transfer_function: TransferFunction::Srgb,
            rendering_intent: RenderingIntent::Relative,
        }
    }

    /// The xy coordinates of the red, green and blue primaries, if they can
    /// be determined for this encoding.
    pub fn primaries_xy(&self) -> Option<[[f64; 2]; 3]> {
        match self.primaries {
            Primaries::Srgb => Some(SRGB_PRIMARIES),
            Primaries::Custom { red, green, blue } => {
                Some([[red.x, red.y], [green.x, green.y], [blue.x, blue.y]])
            }
            Primaries::Bt2100 | Primaries::P3 => None,
        }
    }

    /// The xy coordinates of the white point, if they can be determined.
    pub fn white_point_xy(&self) -> Option<[f64; 2]> {
        match self.white_point {
            WhitePoint::D65 => Some(WP_D65),
            WhitePoint::E => Some(WP_E),
            WhitePoint::Dci => Some(WP_DCI),
            WhitePoint::Custom(xy) => Some([xy.x, xy.y]),
        }
    }

    /// The gamma exponent, for power-law transfer functions.
    pub fn gamma(&self) -> Option<f64> {
        match self.transfer_function {
            TransferFunction::Linear => Some(1.0),
            TransferFunction::Gamma(gamma) => Some(gamma),
            _ => None,
        }
    }
}

/// A colour profile held as an encoded description, an ICC blob, or both.
///
/// When both are present, consumers prefer the encoded description.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ColorProfile {
    pub encoded: Option<ColorEncoding>,
    pub icc: Vec<u8>,
}

impl ColorProfile {
    pub fn from_encoded(encoded: ColorEncoding) -> Self {
        Self {
            encoded: Some(encoded),
            icc: Vec::new(),
        }
    }

    pub fn from_icc(icc: Vec<u8>) -> Self {
        Self { encoded: None, icc }
    }

    /// Whether this profile holds anything at all.
    pub fn is_present(&self) -> bool {
        self.encoded.is_some() || !self.icc.is_empty()
    }
}

/// Structural equivalence of two profiles.
///
/// Encoded profiles match when colour space, primaries, transfer function
/// and white point agree, counting custom values that reproduce a canonical
/// value. ICC profiles match when the byte ranges covered by the profile ID
/// are identical. Rendering intent is always ignored.
pub fn profiles_match(left: &ColorProfile, right: &ColorProfile) -> bool {
    if let (Some(left_enc), Some(right_enc)) = (&left.encoded, &right.encoded) {
        return encodings_match(left_enc, right_enc);
    }
    icc_match(&left.icc, &right.icc)
}

pub fn encodings_match(left: &ColorEncoding, right: &ColorEncoding) -> bool {
    if left.color_space != right.color_space
        || left.color_space == ColorSpace::Unknown
        || right.color_space == ColorSpace::Unknown
    {
        tracing::trace!("Color spaces don't match");
        return false;
    }

    let left_custom_primaries = matches!(left.primaries, Primaries::Custom { .. });
    let right_custom_primaries = matches!(right.primaries, Primaries::Custom { .. });
    if left.primaries != right.primaries && !left_custom_primaries && !right_custom_primaries {
        tracing::trace!("Primaries don't match");
        return false;
    }
    if left.primaries != right.primaries || left_custom_primaries {
        let (Some(left_rgb), Some(right_rgb)) = (left.primaries_xy(), right.primaries_xy()) else {
            tracing::trace!("Could not derive xy for both profiles' primaries");
            return false;
        };
        for (l, r) in left_rgb.iter().zip(&right_rgb) {
            if (l[0] - r[0]).abs() > XY_TOLERANCE || (l[1] - r[1]).abs() > XY_TOLERANCE {
                tracing::trace!("Primaries xy mismatch");
                return false;
            }
        }
    }

    if left.transfer_function == TransferFunction::Unknown
        || right.transfer_function == TransferFunction::Unknown
    {
        tracing::trace!("Unknown transfer function");
        return false;
    }
    let left_power = matches!(
        left.transfer_function,
        TransferFunction::Gamma(_) | TransferFunction::Linear
    );
    let right_power = matches!(
        right.transfer_function,
        TransferFunction::Gamma(_) | TransferFunction::Linear
    );
    if left_power && right_power {
        let (Some(left_gamma), Some(right_gamma)) = (left.gamma(), right.gamma()) else {
            return false;
        };
        if (left_gamma - right_gamma).abs() > GAMMA_TOLERANCE {
            tracing::trace!(left_gamma, right_gamma, "Gamma doesn't match");
            return false;
        }
    } else if left.transfer_function != right.transfer_function {
        tracing::trace!("Transfer functions don't match");
        return false;
    }

    let left_custom_wp = matches!(left.white_point, WhitePoint::Custom(_));
    let right_custom_wp = matches!(right.white_point, WhitePoint::Custom(_));
    if left.white_point != right.white_point && !left_custom_wp && !right_custom_wp {
        tracing::trace!("White points don't match");
        return false;
    }
    if left.white_point != right.white_point || left_custom_wp {
        let (Some(left_wp), Some(right_wp)) = (left.white_point_xy(), right.white_point_xy())
        else {
            return false;
        };
        if (left_wp[0] - right_wp[0]).abs() > XY_TOLERANCE
            || (left_wp[1] - right_wp[1]).abs() > XY_TOLERANCE
        {
            tracing::trace!("White point xy mismatch");
            return false;
        }
    }

    // Rendering intent is ignored.
    true
}

fn icc_match(left: &[u8], right: &[u8]) -> bool {
    // Compare the ranges over which the embedded MD5 is calculated; the MD5
    // itself is allowed to be blank. Skipped: profile flags [44, 48),
    // rendering intent [64, 68) and the MD5 [84, 100).
    left.len() >= 128
        && left.len() == right.len()
        && left[..44] == right[..44]
        && left[48..64] == right[48..64]
        && left[68..84] == right[68..84]
        && left[100..] == right[100..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb_with_custom_primaries() -> ColorEncoding {
        ColorEncoding {
            primaries: Primaries::Custom {
                red: CustomXy {
                    x: SRGB_PRIMARIES[0][0],
                    y: SRGB_PRIMARIES[0][1],
                },
                green: CustomXy {
                    x: SRGB_PRIMARIES[1][0],
                    y: SRGB_PRIMARIES[1][1],
                },
                blue: CustomXy {
                    x: SRGB_PRIMARIES[2][0],
                    y: SRGB_PRIMARIES[2][1],
                },
            },
            ..ColorEncoding::srgb(false)
        }
    }

    #[test]
    fn equivalence_is_reflexive_and_symmetric() {
        let a = ColorProfile::from_encoded(ColorEncoding::srgb(false));
        let b = ColorProfile::from_encoded(srgb_with_custom_primaries());
        assert!(profiles_match(&a, &a));
        assert!(profiles_match(&a, &b));
        assert!(profiles_match(&b, &a));
    }

    #[test]
    fn unknown_color_space_never_matches() {
        let unknown = ColorProfile::from_encoded(ColorEncoding {
            color_space: ColorSpace::Unknown,
            ..ColorEncoding::srgb(false)
        });
        assert!(!profiles_match(&unknown, &unknown));
    }

    #[test]
    fn rendering_intent_is_ignored() {
        let a = ColorEncoding::srgb(false);
        let b = ColorEncoding {
            rendering_intent: RenderingIntent::Perceptual,
            ..a
        };
        assert!(encodings_match(&a, &b));
    }

    #[test]
    fn linear_matches_gamma_one() {
        let linear = ColorEncoding {
            transfer_function: TransferFunction::Linear,
            ..ColorEncoding::srgb(false)
        };
        let gamma = ColorEncoding {
            transfer_function: TransferFunction::Gamma(1.0),
            ..ColorEncoding::srgb(false)
        };
        let gamma22 = ColorEncoding {
            transfer_function: TransferFunction::Gamma(1.0 / 2.2),
            ..ColorEncoding::srgb(false)
        };
        assert!(encodings_match(&linear, &gamma));
        assert!(!encodings_match(&linear, &gamma22));
        assert!(!encodings_match(&linear, &ColorEncoding::srgb(false)));
    }

    #[test]
    fn custom_white_point_within_tolerance() {
        let base = ColorEncoding::srgb(false);
        let close = ColorEncoding {
            white_point: WhitePoint::Custom(CustomXy {
                x: WP_D65[0] + 5e-10,
                y: WP_D65[1],
            }),
            ..base
        };
        let far = ColorEncoding {
            white_point: WhitePoint::Custom(CustomXy {
                x: WP_D65[0] + 1e-6,
                y: WP_D65[1],
            }),
            ..base
        };
        assert!(encodings_match(&base, &close));
        assert!(!encodings_match(&base, &far));
    }

    #[test]
    fn icc_ignores_intent_flags_and_md5() {
        let mut left = vec![0u8; 160];
        for (i, b) in left.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut right = left.clone();
        // Flags, rendering intent, MD5.
        right[44..48].fill(0xaa);
        right[64..68].fill(0xbb);
        right[84..100].fill(0xcc);
        assert!(profiles_match(
            &ColorProfile::from_icc(left.clone()),
            &ColorProfile::from_icc(right.clone()),
        ));

        right[130] ^= 1;
        assert!(!profiles_match(
            &ColorProfile::from_icc(left.clone()),
            &ColorProfile::from_icc(right),
        ));

        // Too short for an ICC header.
        let short = vec![0u8; 100];
        assert!(!profiles_match(
            &ColorProfile::from_icc(short.clone()),
            &ColorProfile::from_icc(short),
        ));
        assert!(!profiles_match(
            &ColorProfile::from_icc(left.clone()),
            &ColorProfile::from_icc(left[..150].to_vec()),
        ));
    }
}
