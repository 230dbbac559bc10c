/// How a frame or extra channel is blended onto the canvas.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Replace,
    Add,
    Blend,
    MulAdd,
    Mul,
}

/// Blending parameters for a frame or a single extra channel.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BlendInfo {
    pub mode: BlendMode,
    /// Reference slot blended against, 0 through 3.
    pub source: u32,
    /// Index of the alpha channel used for blending.
    pub alpha: u32,
    pub clamp: bool,
}

/// Geometry of a frame relative to the canvas.
///
/// With coalescing enabled every frame covers the canvas exactly; without it
/// the layer may be cropped, larger or smaller than the canvas.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LayerInfo {
    pub have_crop: bool,
    pub crop_x0: i32,
    pub crop_y0: i32,
    pub xsize: u32,
    pub ysize: u32,
    pub blend_info: BlendInfo,
    /// Reference slot this frame is saved into, 0 through 3. `0` combined
    /// with a nonzero duration means the frame is not saved.
    pub save_as_reference: u32,
}

/// Per-frame header as surfaced by the codec session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub layer_info: LayerInfo,
    /// Presentation duration in animation ticks.
    pub duration: u32,
    pub is_last: bool,
    /// Length in bytes of the frame name, if any.
    pub name_len: u32,
}
