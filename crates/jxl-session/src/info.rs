/// Basic information about the image, available once the codestream header
/// has been parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicInfo {
    pub xsize: u32,
    pub ysize: u32,
    /// Preferred display size. Zero means "same as `xsize`/`ysize`".
    pub intrinsic_xsize: u32,
    pub intrinsic_ysize: u32,
    pub bits_per_sample: u32,
    /// Zero for integer samples.
    pub exponent_bits_per_sample: u32,
    pub num_color_channels: u32,
    pub num_extra_channels: u32,
    /// Zero when the image has no alpha channel.
    pub alpha_bits: u32,
    pub alpha_exponent_bits: u32,
    pub alpha_premultiplied: bool,
    /// Stored orientation, 1 through 8 as in Exif.
    pub orientation: u32,
    pub uses_original_profile: bool,
    /// Whether the image sits in an ISO BMFF-style container.
    pub have_container: bool,
    pub have_animation: bool,
    pub animation: AnimationInfo,
}

/// Animation parameters from the image header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimationInfo {
    pub tps_numerator: u32,
    pub tps_denominator: u32,
    /// `0` means the animation loops forever.
    pub num_loops: u32,
}

/// Kind of an extra (non-colour) channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExtraChannelType {
    Alpha,
    Depth,
    SpotColor,
    SelectionMask,
    Black,
    Cfa,
    Thermal,
    NonOptional,
    Optional,
    Unknown,
}

/// Description of a single extra channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraChannelInfo {
    pub ty: ExtraChannelType,
    pub bits_per_sample: u32,
    pub exponent_bits_per_sample: u32,
    /// Only meaningful for alpha channels.
    pub alpha_premultiplied: bool,
    /// RGBA solidity; only meaningful for spot colour channels.
    pub spot_color: [f32; 4],
    /// Only meaningful for CFA channels.
    pub cfa_channel: u32,
    pub dim_shift: u32,
    /// Length in bytes of the channel name, if any.
    pub name_len: u32,
}

impl Default for ExtraChannelInfo {
    fn default() -> Self {
        Self {
            ty: ExtraChannelType::Alpha,
            bits_per_sample: 8,
            exponent_bits_per_sample: 0,
            alpha_premultiplied: false,
            spot_color: [0.0; 4],
            cfa_channel: 0,
            dim_shift: 0,
            name_len: 0,
        }
    }
}

impl ExtraChannelInfo {
    #[inline]
    pub fn is_alpha(&self) -> bool {
        self.ty == ExtraChannelType::Alpha
    }
}
