/// Four-byte type tag of an ISO BMFF-style container box.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const JXL: Self = Self(*b"JXL ");
    pub const FILE_TYPE: Self = Self(*b"ftyp");
    pub const JXL_LEVEL: Self = Self(*b"jxll");
    pub const CODESTREAM: Self = Self(*b"jxlc");
    pub const PARTIAL_CODESTREAM: Self = Self(*b"jxlp");
    pub const FRAME_INDEX: Self = Self(*b"jxli");
    pub const BROTLI_COMPRESSED: Self = Self(*b"brob");
    pub const JPEG_RECONSTRUCTION: Self = Self(*b"jbrd");
    pub const EXIF: Self = Self(*b"Exif");
    pub const XML: Self = Self(*b"xml ");

    /// Whether this type is reserved for the JXL container format itself.
    ///
    /// Reserved types start with `JXL` in any case, or are exactly `ftyp` or
    /// `jbrd`. User-supplied metadata boxes must not use a reserved type.
    pub fn is_reserved(self) -> bool {
        let t = self.0;
        (t[0].eq_ignore_ascii_case(&b'J')
            && t[1].eq_ignore_ascii_case(&b'X')
            && t[2].eq_ignore_ascii_case(&b'L'))
            || self == Self::FILE_TYPE
            || self == Self::JPEG_RECONSTRUCTION
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}
