/// Result of sniffing the first bytes of an input.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Signature {
    /// Bare JPEG XL codestream.
    Codestream,
    /// JPEG XL codestream in an ISO BMFF-style container.
    Container,
    /// A PNG file. Detected explicitly so callers can give a useful error.
    Png,
    /// The buffer is a prefix of one of the recognised signatures.
    NotEnoughBytes,
    /// Anything else.
    Invalid,
}

pub const CODESTREAM_SIG: [u8; 2] = [0xff, 0x0a];
pub const CONTAINER_SIG: [u8; 12] = [0, 0, 0, 0xc, b'J', b'X', b'L', b' ', 0xd, 0xa, 0x87, 0xa];
const PNG_SIG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Sniffs the signature at the start of `buf`.
pub fn check_signature(buf: &[u8]) -> Signature {
    if buf.starts_with(&CODESTREAM_SIG) {
        Signature::Codestream
    } else if buf.starts_with(&CONTAINER_SIG) {
        Signature::Container
    } else if buf.starts_with(&PNG_SIG) {
        Signature::Png
    } else if CODESTREAM_SIG.starts_with(buf)
        || CONTAINER_SIG.starts_with(buf)
        || PNG_SIG.starts_with(buf)
    {
        Signature::NotEnoughBytes
    } else {
        Signature::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_signatures() {
        assert_eq!(check_signature(&[0xff, 0x0a, 0x00]), Signature::Codestream);
        assert_eq!(check_signature(&CONTAINER_SIG), Signature::Container);
        assert_eq!(
            check_signature(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0]),
            Signature::Png,
        );
        assert_eq!(check_signature(&[0x00, 0x00, 0x00]), Signature::NotEnoughBytes);
        assert_eq!(check_signature(&[]), Signature::NotEnoughBytes);
        assert_eq!(check_signature(b"GIF89a"), Signature::Invalid);
        assert_eq!(check_signature(&[0xff, 0x0b]), Signature::Invalid);
    }
}
