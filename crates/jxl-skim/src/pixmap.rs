//! Lazy pixel holder.
//!
//! A [`Pixmap`] captures the intent "these pixels exist, possibly not yet
//! materialised": it either owns a raw buffer, or knows how to produce one
//! by decoding a frame from a file or an already-open [`Decoder`].

use std::path::PathBuf;
use std::sync::Arc;

use jxl_session::{CodecSession, DataType, Endianness, PixelFormat};

use crate::error::{Error, Result};
use crate::{frame_buffer_size, row_stride, Decoder, DecoderFlags, DecoderHints};

/// Creates fresh codec sessions for decoders that are constructed on
/// demand, e.g. by a [`Pixmap`] backed by a file path.
pub type SessionFactory = Arc<dyn Fn() -> Box<dyn CodecSession>>;

/// A rectangular array of pixels, stored immediately or decoded lazily
/// from a JXL source on first access.
pub struct Pixmap {
    // Filled on first access when decoding lazily.
    pixels: Option<Vec<u8>>,
    format: PixelFormat,
    xsize: u32,
    ysize: u32,
    path: Option<PathBuf>,
    factory: Option<SessionFactory>,
    decoder: Option<Box<Decoder<'static>>>,
    frame_index: usize,
}

impl std::fmt::Debug for Pixmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pixmap")
            .field("xsize", &self.xsize)
            .field("ysize", &self.ysize)
            .field("format", &self.format)
            .field("buffered", &self.pixels.is_some())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Default for Pixmap {
    fn default() -> Self {
        Self {
            pixels: None,
            format: PixelFormat::default(),
            xsize: 0,
            ysize: 0,
            path: None,
            factory: None,
            decoder: None,
            frame_index: 0,
        }
    }
}

impl Pixmap {
    /// A 1×1 black pixmap; fully transparent if the format has alpha.
    pub fn black_pixel(format: PixelFormat) -> Result<Self> {
        let size = frame_buffer_size(1, 1, &format)?;
        let mut pixmap = Self::default();
        pixmap.set_pixels(1, 1, format, vec![0u8; size])?;
        Ok(pixmap)
    }

    /// Wraps an existing pixel buffer.
    pub fn from_buffer(
        xsize: u32,
        ysize: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        let mut pixmap = Self::default();
        pixmap.set_pixels(xsize, ysize, format, pixels)?;
        Ok(pixmap)
    }

    /// Reads pixels lazily from the named JXL file; nothing is decoded
    /// until first access. `factory` provides the codec session for the
    /// decoder that gets created on demand.
    pub fn from_path(
        path: impl Into<PathBuf>,
        frame_index: usize,
        format: PixelFormat,
        factory: SessionFactory,
    ) -> Self {
        Self {
            format,
            path: Some(path.into()),
            factory: Some(factory),
            frame_index,
            ..Self::default()
        }
    }

    /// Reads pixels lazily through an already-open decoder.
    pub fn from_decoder(decoder: Decoder<'static>, frame_index: usize, format: PixelFormat) -> Self {
        Self {
            format,
            decoder: Some(Box::new(decoder)),
            frame_index,
            ..Self::default()
        }
    }

    /// Resets to empty, as if newly constructed.
    pub fn close(&mut self) {
        *self = Self::default();
    }

    /// Like [`close`][Self::close], but hands the owned decoder (if any)
    /// back to the caller instead of dropping it. Useful when the
    /// decoder's boxes still need to be read after the pixels are done
    /// with.
    pub fn release_decoder(&mut self) -> Option<Decoder<'static>> {
        let decoder = self.decoder.take().map(|b| *b);
        self.close();
        decoder
    }

    /// The format pixels are (or will be) stored in.
    pub fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    /// True if the object holds neither pixels nor a source to decode
    /// them from.
    pub fn is_empty(&self) -> bool {
        self.xsize == 0 && self.decoder.is_none() && self.path.is_none()
    }

    /// Replaces the current contents with the given buffer. Any existing
    /// buffer or input source is forgotten.
    pub fn set_pixels(
        &mut self,
        xsize: u32,
        ysize: u32,
        format: PixelFormat,
        mut pixels: Vec<u8>,
    ) -> Result<()> {
        let required = frame_buffer_size(xsize, ysize, &format)?;
        if pixels.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                got: pixels.len(),
            });
        }
        pixels.truncate(required);
        self.close();
        self.pixels = Some(pixels);
        self.xsize = xsize;
        self.ysize = ysize;
        self.format = format;
        Ok(())
    }

    fn ensure_decoder(&mut self) -> Result<()> {
        if self.decoder.is_some() {
            return Ok(());
        }
        let (Some(path), Some(factory)) = (&self.path, &self.factory) else {
            return Err(Error::Usage(
                "no pixels buffered, and no source to read pixels from",
            ));
        };
        let mut decoder = Decoder::new(factory());
        decoder.open_file(path, DecoderFlags::default(), DecoderHints::default(), 0)?;
        self.decoder = Some(Box::new(decoder));
        Ok(())
    }

    /// Makes sure all pixels are in memory, decoding them if necessary.
    ///
    /// The buffer is sized from the frame's own layer dimensions, which
    /// differ from the canvas for non-coalesced frames.
    pub fn ensure_buffered(&mut self) -> Result<()> {
        if self.pixels.is_some() {
            return Ok(());
        }
        self.ensure_decoder()?;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Error::Usage("no source to read pixels from"));
        };
        let layer = decoder.frame_info(self.frame_index)?.header.layer_info;
        self.xsize = layer.xsize;
        self.ysize = layer.ysize;
        let size = frame_buffer_size(self.xsize, self.ysize, &self.format)?;
        let mut pixels = vec![0u8; size];
        decoder.frame_pixels(self.frame_index, &self.format, Some(&mut pixels), Vec::new())?;
        self.pixels = Some(pixels);
        Ok(())
    }

    /// Frame width in pixels, decoding the frame header if necessary.
    pub fn xsize(&mut self) -> Result<u32> {
        if self.xsize > 0 {
            return Ok(self.xsize);
        }
        self.ensure_decoder()?;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Error::Usage("no source to read pixels from"));
        };
        self.xsize = decoder.frame_info(self.frame_index)?.header.layer_info.xsize;
        Ok(self.xsize)
    }

    /// Frame height in pixels, decoding the frame header if necessary.
    pub fn ysize(&mut self) -> Result<u32> {
        if self.ysize > 0 {
            return Ok(self.ysize);
        }
        self.ensure_decoder()?;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Error::Usage("no source to read pixels from"));
        };
        self.ysize = decoder.frame_info(self.frame_index)?.header.layer_info.ysize;
        Ok(self.ysize)
    }

    /// Size in bytes of the buffer for the current dimensions and format.
    pub fn buffer_size(&mut self) -> Result<usize> {
        let xsize = self.xsize()?;
        let ysize = self.ysize()?;
        frame_buffer_size(xsize, ysize, &self.format)
    }

    /// The pixel data, decoding it first if necessary.
    pub fn data(&mut self) -> Result<&[u8]> {
        self.ensure_buffered()?;
        match &self.pixels {
            Some(pixels) => Ok(pixels),
            None => Err(Error::Usage("no pixels buffered")),
        }
    }

    /// Mutable access to the pixel data, decoding it first if necessary.
    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        self.ensure_buffered()?;
        match &mut self.pixels {
            Some(pixels) => Ok(pixels),
            None => Err(Error::Usage("no pixels buffered")),
        }
    }

    /// Buffers the pixels and transfers them to the caller. A
    /// decoder-backed pixmap can decode them again later; a plain buffer
    /// becomes unusable until new pixels are set.
    pub fn release_pixels(&mut self) -> Result<Vec<u8>> {
        self.ensure_buffered()?;
        Ok(self.pixels.take().unwrap_or_default())
    }

    /// Access to the internal decoder, which lets you query boxes, colour
    /// profiles and the like. `None` if pixels are not being decoded from
    /// a JXL source.
    pub fn decoder(&mut self) -> Result<Option<&mut Decoder<'static>>> {
        if self.decoder.is_none() {
            if self.path.is_none() {
                return Ok(None);
            }
            self.ensure_decoder()?;
        }
        Ok(self.decoder.as_deref_mut())
    }

    /// Adds a fully opaque alpha channel, unless one is already there.
    ///
    /// Before buffering this only widens the intended channel count, so
    /// alpha is included when the pixels are decoded. After buffering the
    /// buffer is rewritten with an opaque trailing channel spliced in.
    ///
    /// Returns `true` iff a new channel was physically added.
    pub fn add_interleaved_alpha(&mut self) -> Result<bool> {
        if self.pixels.is_none() {
            if self.format.num_channels == 1 || self.format.num_channels == 3 {
                self.format.num_channels += 1;
            }
            return Ok(false);
        }
        if self.format.has_alpha_channel() {
            return Ok(false);
        }

        self.ensure_buffered()?;
        let new_format = PixelFormat {
            num_channels: self.format.num_channels + 1,
            ..self.format
        };
        let opaque = opaque_sample(self.format.data_type, self.format.endianness)?;
        let new_size = frame_buffer_size(self.xsize, self.ysize, &new_format)?;
        let mut new_pixels = vec![0u8; new_size];
        let Some(pixels) = &self.pixels else {
            return Err(Error::Usage("no pixels buffered"));
        };
        splice_in_channel(
            pixels,
            &mut new_pixels,
            self.xsize,
            self.ysize,
            &self.format,
            &opaque,
        )?;
        self.format = new_format;
        self.pixels = Some(new_pixels);
        Ok(true)
    }

    /// Removes the interleaved alpha channel, if there is one.
    ///
    /// Before buffering this only narrows the intended channel count; the
    /// preference is reset when a new input is opened.
    pub fn remove_interleaved_alpha(&mut self) -> Result<()> {
        if !self.format.has_alpha_channel() {
            return Ok(());
        }
        if self.pixels.is_none() {
            self.format.num_channels -= 1;
            return Ok(());
        }

        let new_format = PixelFormat {
            num_channels: self.format.num_channels - 1,
            ..self.format
        };
        let new_size = frame_buffer_size(self.xsize, self.ysize, &new_format)?;
        let mut new_pixels = vec![0u8; new_size];
        let Some(pixels) = &self.pixels else {
            return Err(Error::Usage("no pixels buffered"));
        };
        splice_out_channel(
            pixels,
            &mut new_pixels,
            self.xsize,
            self.ysize,
            &self.format,
        )?;
        self.format = new_format;
        self.pixels = Some(new_pixels);
        Ok(())
    }

    /// Whether every alpha sample is at full opacity. Trivially true for
    /// formats without an alpha channel.
    pub fn is_fully_opaque(&mut self) -> Result<bool> {
        if !self.format.has_alpha_channel() {
            return Ok(true);
        }
        self.ensure_buffered()?;
        let Some(pixels) = &self.pixels else {
            return Err(Error::Usage("no pixels buffered"));
        };
        buffer_is_fully_opaque(pixels, self.xsize, self.ysize, &self.format)
    }
}

/// Scans the trailing (alpha) channel of a 2- or 4-channel buffer for any
/// sample below full opacity. Trivially true for 1- and 3-channel formats.
pub fn buffer_is_fully_opaque(
    pixels: &[u8],
    xsize: u32,
    ysize: u32,
    format: &PixelFormat,
) -> Result<bool> {
    if !format.has_alpha_channel() {
        return Ok(true);
    }
    let opaque = opaque_sample(format.data_type, format.endianness)?;
    let bytes_per_sample = format.data_type.bytes_per_sample();
    let bytes_per_pixel = format.bytes_per_pixel().ok_or(Error::BufferTooLarge)?;
    let stride = row_stride(xsize, format).ok_or(Error::BufferTooLarge)?;
    let alpha_offset = bytes_per_pixel - bytes_per_sample;

    for y in 0..ysize as usize {
        let row = &pixels[y * stride..];
        for x in 0..xsize as usize {
            let sample = &row[x * bytes_per_pixel + alpha_offset..][..bytes_per_sample];
            if sample != &opaque[..] {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// The byte pattern of a full-opacity sample.
fn opaque_sample(data_type: DataType, endianness: Endianness) -> Result<Vec<u8>> {
    Ok(match data_type {
        DataType::U8 => vec![0xff],
        DataType::U16 => vec![0xff, 0xff],
        DataType::F32 => match endianness {
            Endianness::Native => 1.0f32.to_ne_bytes().to_vec(),
            Endianness::Big => 1.0f32.to_be_bytes().to_vec(),
            Endianness::Little => 1.0f32.to_le_bytes().to_vec(),
        },
        DataType::F16 => {
            return Err(Error::Usage(
                "alpha processing is not implemented for 16-bit float samples",
            ));
        }
    })
}

/// Copies `src` into `dst`, appending one `sample`-valued channel to every
/// pixel. Row alignment of the format applies to both sides.
fn splice_in_channel(
    src: &[u8],
    dst: &mut [u8],
    xsize: u32,
    ysize: u32,
    in_format: &PixelFormat,
    sample: &[u8],
) -> Result<()> {
    let out_format = PixelFormat {
        num_channels: in_format.num_channels + 1,
        ..*in_format
    };
    let in_bpp = in_format.bytes_per_pixel().ok_or(Error::BufferTooLarge)?;
    let out_bpp = out_format.bytes_per_pixel().ok_or(Error::BufferTooLarge)?;
    let in_stride = row_stride(xsize, in_format).ok_or(Error::BufferTooLarge)?;
    let out_stride = row_stride(xsize, &out_format).ok_or(Error::BufferTooLarge)?;

    for y in 0..ysize as usize {
        let in_row = &src[y * in_stride..];
        let out_row = &mut dst[y * out_stride..];
        for x in 0..xsize as usize {
            let in_pixel = &in_row[x * in_bpp..][..in_bpp];
            let out_pixel = &mut out_row[x * out_bpp..][..out_bpp];
            out_pixel[..in_bpp].copy_from_slice(in_pixel);
            out_pixel[in_bpp..].copy_from_slice(sample);
        }
    }
    Ok(())
}

/// Copies `src` into `dst`, dropping the trailing channel of every pixel.
fn splice_out_channel(
    src: &[u8],
    dst: &mut [u8],
    xsize: u32,
    ysize: u32,
    in_format: &PixelFormat,
) -> Result<()> {
    let out_format = PixelFormat {
        num_channels: in_format.num_channels - 1,
        ..*in_format
    };
    let in_bpp = in_format.bytes_per_pixel().ok_or(Error::BufferTooLarge)?;
    let out_bpp = out_format.bytes_per_pixel().ok_or(Error::BufferTooLarge)?;
    let in_stride = row_stride(xsize, in_format).ok_or(Error::BufferTooLarge)?;
    let out_stride = row_stride(xsize, &out_format).ok_or(Error::BufferTooLarge)?;

    for y in 0..ysize as usize {
        let in_row = &src[y * in_stride..];
        let out_row = &mut dst[y * out_stride..];
        for x in 0..xsize as usize {
            let in_pixel = &in_row[x * in_bpp..][..out_bpp];
            out_row[x * out_bpp..][..out_bpp].copy_from_slice(in_pixel);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_u8() -> PixelFormat {
        PixelFormat {
            num_channels: 3,
            data_type: DataType::U8,
            endianness: Endianness::Native,
            align: 0,
        }
    }

    #[test]
    fn black_pixel_is_transparent_with_alpha() {
        let format = PixelFormat {
            num_channels: 4,
            ..rgb_u8()
        };
        let mut pixmap = Pixmap::black_pixel(format).unwrap();
        assert_eq!(pixmap.data().unwrap(), &[0, 0, 0, 0]);
        assert!(!pixmap.is_fully_opaque().unwrap());
        assert_eq!(pixmap.xsize().unwrap(), 1);
        assert_eq!(pixmap.ysize().unwrap(), 1);
    }

    #[test]
    fn add_alpha_before_buffering_only_widens_format() {
        let mut pixmap = Pixmap::default();
        let mut format = rgb_u8();
        std::mem::swap(&mut pixmap.format, &mut format);
        assert!(!pixmap.add_interleaved_alpha().unwrap());
        assert_eq!(pixmap.pixel_format().num_channels, 4);
    }

    #[test]
    fn add_alpha_splices_opaque_channel() {
        let mut pixmap =
            Pixmap::from_buffer(2, 2, rgb_u8(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
                .unwrap();
        assert!(pixmap.add_interleaved_alpha().unwrap());
        assert_eq!(pixmap.pixel_format().num_channels, 4);
        assert_eq!(
            pixmap.data().unwrap(),
            &[1, 2, 3, 255, 4, 5, 6, 255, 7, 8, 9, 255, 10, 11, 12, 255]
        );
        assert!(pixmap.is_fully_opaque().unwrap());

        // A second call is a no-op.
        assert!(!pixmap.add_interleaved_alpha().unwrap());
    }

    #[test]
    fn add_alpha_respects_row_alignment() {
        let format = PixelFormat {
            num_channels: 1,
            data_type: DataType::U8,
            endianness: Endianness::Native,
            align: 4,
        };
        // 3 pixels per row, padded to 4 bytes; last row unpadded.
        let mut pixmap =
            Pixmap::from_buffer(3, 2, format, vec![1, 2, 3, 0, 4, 5, 6]).unwrap();
        assert!(pixmap.add_interleaved_alpha().unwrap());
        // Rows of 6 bytes padded to 8; last row unpadded.
        assert_eq!(
            pixmap.data().unwrap(),
            &[1, 255, 2, 255, 3, 255, 0, 0, 4, 255, 5, 255, 6, 255]
        );
    }

    #[test]
    fn remove_alpha_drops_trailing_channel() {
        let mut pixmap = Pixmap::from_buffer(
            2,
            1,
            PixelFormat {
                num_channels: 4,
                ..rgb_u8()
            },
            vec![1, 2, 3, 200, 4, 5, 6, 100],
        )
        .unwrap();
        pixmap.remove_interleaved_alpha().unwrap();
        assert_eq!(pixmap.pixel_format().num_channels, 3);
        assert_eq!(pixmap.data().unwrap(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn opacity_scan_checks_each_sample_type() {
        let graya = PixelFormat {
            num_channels: 2,
            data_type: DataType::U8,
            endianness: Endianness::Native,
            align: 0,
        };
        assert!(buffer_is_fully_opaque(&[7, 255, 9, 255], 2, 1, &graya).unwrap());
        assert!(!buffer_is_fully_opaque(&[7, 255, 9, 254], 2, 1, &graya).unwrap());

        let graya_f32 = PixelFormat {
            data_type: DataType::F32,
            ..graya
        };
        let mut buf = Vec::new();
        for sample in [0.5f32, 1.0, 0.25, 1.0] {
            buf.extend_from_slice(&sample.to_ne_bytes());
        }
        assert!(buffer_is_fully_opaque(&buf, 2, 1, &graya_f32).unwrap());
        buf[4..8].copy_from_slice(&0.99f32.to_ne_bytes());
        assert!(!buffer_is_fully_opaque(&buf, 2, 1, &graya_f32).unwrap());

        // RGB is trivially opaque.
        assert!(buffer_is_fully_opaque(&[0, 0, 0], 1, 1, &rgb_u8()).unwrap());
    }

    #[test]
    fn empty_pixmap_reports_usage_error() {
        let mut pixmap = Pixmap::default();
        assert!(pixmap.is_empty());
        let err = pixmap.ensure_buffered().unwrap_err();
        assert!(err.is_usage());
    }
}
