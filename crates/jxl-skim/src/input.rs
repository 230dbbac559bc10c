//! Bounded growable byte window over the original source.
//!
//! The codec always sees a contiguous window of not-yet-consumed bytes. For
//! stream sources the backing buffer starts small and doubles on demand up
//! to a caller-supplied cap; once the cap is reached, consumed bytes are
//! shifted out to make room and the window's absolute offset advances.

use std::io::Read;

use crate::error::{Error, Result};

/// Default cap on buffered input: 64 MiB, expressed in KiB.
pub const DEFAULT_BUFFER_KIB: usize = 64 * 1024;

/// Initial allocation for stream sources.
const DEFAULT_CHUNK_BYTES: usize = 128 * 1024;

#[derive(Debug)]
enum Storage<'src> {
    Owned(Vec<u8>),
    Borrowed(&'src [u8]),
}

#[derive(Debug)]
pub(crate) struct InputBuffer<'src> {
    storage: Storage<'src>,
    /// Current usable capacity; grows lazily up to `max`.
    cap: usize,
    max: usize,
    /// Valid bytes in `[0, len)`.
    len: usize,
    /// Absolute offset of byte 0 within the source.
    offset: u64,
    /// Start of the window last handed to the codec; bytes before it have
    /// been consumed.
    dec_offset: usize,
}

#[derive(Debug)]
pub(crate) struct ReplenishOutcome {
    pub eof: bool,
}

impl<'src> InputBuffer<'src> {
    /// Adopts a caller-owned byte range holding the whole file.
    pub fn for_memory(bytes: &'src [u8]) -> Self {
        Self {
            cap: bytes.len(),
            max: bytes.len(),
            len: bytes.len(),
            storage: Storage::Borrowed(bytes),
            offset: 0,
            dec_offset: 0,
        }
    }

    /// Allocates a buffer for a stream source capped at `max` bytes.
    ///
    /// With `allocate_full` set (used when the file size is known up front)
    /// the full cap is allocated immediately instead of growing lazily.
    pub fn for_stream(max: usize, allocate_full: bool) -> Self {
        let cap = if allocate_full {
            max
        } else {
            max.min(DEFAULT_CHUNK_BYTES)
        };
        Self {
            storage: Storage::Owned(vec![0; cap]),
            cap,
            max,
            len: 0,
            offset: 0,
            dec_offset: 0,
        }
    }

    /// Converts a KiB cap to bytes, `0` selecting the default.
    pub fn cap_bytes(buffer_kib: usize) -> usize {
        let kib = if buffer_kib > 0 {
            buffer_kib
        } else {
            DEFAULT_BUFFER_KIB
        };
        kib.checked_mul(1024).unwrap_or(usize::MAX)
    }

    /// Fills the buffer with the first chunk of the source.
    ///
    /// Returns true when the source hit EOF within this first chunk, which
    /// means the whole file is buffered.
    pub fn prime(&mut self, reader: &mut dyn Read) -> Result<bool> {
        let Storage::Owned(data) = &mut self.storage else {
            return Ok(true);
        };
        let (read, eof) = read_to_fill(reader, &mut data[..self.cap])?;
        self.len = read;
        Ok(eof)
    }

    /// Refills the buffer after the codec asked for more input.
    pub fn replenish(&mut self, reader: &mut dyn Read) -> Result<ReplenishOutcome> {
        let unprocessed = self.len - self.dec_offset;
        if unprocessed == self.len && self.len > 0 {
            return Err(Error::CorruptedStream(format!(
                "codec stalled - last pass consumed 0 of {} buffered bytes",
                self.len
            )));
        }

        let Storage::Owned(data) = &mut self.storage else {
            return Err(Error::CorruptedStream(
                "codec requested input past the end of a fully buffered source".into(),
            ));
        };

        if self.cap < self.max {
            // Grow and keep the unconsumed tail in place.
            let new_cap = self
                .cap
                .checked_mul(2)
                .unwrap_or(self.max)
                .min(self.max);
            data.truncate(self.len);
            data.resize(new_cap, 0);
            tracing::debug!(old_cap = self.cap, new_cap, "Grew input buffer");
            self.cap = new_cap;
        } else {
            // At the cap; shift the unconsumed tail to the head.
            data.copy_within(self.dec_offset..self.len, 0);
            self.offset += self.dec_offset as u64;
            self.len = unprocessed;
            self.dec_offset = 0;
        }

        let (read, eof) = read_to_fill(reader, &mut data[self.len..self.cap])?;
        tracing::trace!(read, eof, "Read next chunk from source");
        self.len += read;
        Ok(ReplenishOutcome { eof })
    }

    /// The contiguous window of not-yet-consumed bytes.
    pub fn window(&self) -> &[u8] {
        &self.bytes()[self.dec_offset..self.len]
    }

    /// All valid bytes, starting at absolute `offset`.
    pub fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(data) => &data[..self.len],
            Storage::Borrowed(data) => data,
        }
    }

    /// Records that the codec consumed `count` bytes of the window.
    pub fn advance(&mut self, count: usize) {
        debug_assert!(self.dec_offset + count <= self.len);
        self.dec_offset += count;
    }

    /// Whether byte 0 of the source is still buffered.
    pub fn start_is_buffered(&self) -> bool {
        self.offset == 0
    }

    /// Replays the buffered bytes from the start of the file.
    pub fn rewind_in_place(&mut self) {
        debug_assert!(self.start_is_buffered());
        self.dec_offset = 0;
    }

    /// Discards all buffered bytes ahead of seeking the source back.
    pub fn reset_for_seek(&mut self) {
        self.len = 0;
        self.offset = 0;
        self.dec_offset = 0;
    }
}

/// Reads until `buf` is full or the reader reports EOF. Returns the number
/// of bytes read and whether EOF was observed.
fn read_to_fill(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<(usize, bool)> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok((filled, true)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok((filled, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that returns at most `chunk` bytes per call.
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let take = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..take].copy_from_slice(&self.data[self.pos..self.pos + take]);
            self.pos += take;
            Ok(take)
        }
    }

    fn reader(len: usize, chunk: usize) -> ChunkedReader {
        ChunkedReader {
            data: (0..len).map(|i| i as u8).collect(),
            pos: 0,
            chunk,
        }
    }

    #[test]
    fn cap_bytes_zero_uses_default() {
        assert_eq!(
            InputBuffer::cap_bytes(0),
            DEFAULT_BUFFER_KIB * 1024
        );
        assert_eq!(InputBuffer::cap_bytes(16), 16 * 1024);
        assert_eq!(InputBuffer::cap_bytes(usize::MAX), usize::MAX);
    }

    #[test]
    fn memory_source_is_fully_buffered() {
        let bytes = [1u8, 2, 3, 4];
        let mut buf = InputBuffer::for_memory(&bytes);
        assert_eq!(buf.window(), &bytes);
        buf.advance(3);
        assert_eq!(buf.window(), &bytes[3..]);
        buf.rewind_in_place();
        assert_eq!(buf.window(), &bytes);
    }

    #[test]
    fn grows_then_shifts() {
        let mut source = reader(100, 7);
        let mut buf = InputBuffer::for_stream(32, false);
        // Cap below the chunk default, so prime fills all 32 bytes... the
        // initial allocation is min(max, chunk) = 32.
        assert!(!buf.prime(&mut source).unwrap());
        assert_eq!(buf.window().len(), 32);

        // Consume 10 bytes, then replenish. Cap == max, so the buffer
        // shifts: offset advances and the window refills to capacity.
        buf.advance(10);
        let outcome = buf.replenish(&mut source).unwrap();
        assert!(!outcome.eof);
        assert!(!buf.start_is_buffered());
        assert_eq!(buf.offset, 10);
        assert_eq!(buf.window().len(), 32);
        assert_eq!(buf.window()[0], 10);

        // Another full round; the source still has bytes left.
        buf.advance(32);
        let outcome = buf.replenish(&mut source).unwrap();
        assert!(!outcome.eof);
        assert_eq!(buf.window(), &(42u8..74).collect::<Vec<_>>()[..]);

        // The final round drains the source and observes EOF.
        buf.advance(32);
        let outcome = buf.replenish(&mut source).unwrap();
        assert!(outcome.eof);
        assert_eq!(buf.window(), &(74u8..100).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn growth_keeps_unconsumed_bytes_in_place() {
        let mut source = reader(100, 100);
        let mut buf = InputBuffer::for_stream(64, false);
        // Force a tiny initial capacity by priming a 16-byte window.
        buf.cap = 16;
        buf.storage = Storage::Owned(vec![0; 16]);
        assert!(!buf.prime(&mut source).unwrap());
        assert_eq!(buf.window().len(), 16);

        buf.advance(5);
        let outcome = buf.replenish(&mut source).unwrap();
        assert!(!outcome.eof);
        // Grew to 32; nothing shifted, so the window resumes at byte 5.
        assert_eq!(buf.cap, 32);
        assert!(buf.start_is_buffered());
        assert_eq!(buf.window()[0], 5);
        assert_eq!(buf.window().len(), 32 - 5);
    }

    #[test]
    fn stall_is_detected() {
        let mut source = reader(10, 10);
        let mut buf = InputBuffer::for_stream(8, true);
        assert!(!buf.prime(&mut source).unwrap());
        // Nothing consumed; the codec is stuck.
        let err = buf.replenish(&mut source).unwrap_err();
        assert!(matches!(err, Error::CorruptedStream(_)));
    }

    #[test]
    fn eof_detected_when_source_runs_dry() {
        let mut source = reader(10, 4);
        let mut buf = InputBuffer::for_stream(64, true);
        assert!(buf.prime(&mut source).unwrap());
        assert_eq!(buf.window().len(), 10);
    }
}
