use super::*;

#[cfg(feature = "alloc")]
use alloc::{vec, vec::Vec};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Format {
    Sqoa,
    Qoi,
}

/// Bounds-checked read cursor over the encoded byte stream.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    #[inline(always)]
    fn peek(&self) -> Result<u8, DecodeError> {
        match self.bytes.get(self.pos) {
            Some(&b) => Ok(b),
            None => Err(DecodeError::DataIsTooSmall),
        }
    }

    #[inline(always)]
    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    #[inline(always)]
    fn u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from(bytes[0]) << 24
            | u32::from(bytes[1]) << 16
            | u32::from(bytes[2]) << 8
            | u32::from(bytes[3]))
    }

    #[inline(always)]
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        match self.bytes.get(self.pos..self.pos + len) {
            Some(bytes) => {
                self.pos += len;
                Ok(bytes)
            }
            None => Err(DecodeError::DataIsTooSmall),
        }
    }
}

/// One decoded payload block and the read position inside it.
struct BlockReader {
    buf: [u8; SQOA_BLOCK_SIZE],
    len: usize,
    pos: usize,
}

impl BlockReader {
    fn new() -> Self {
        BlockReader {
            buf: [0; SQOA_BLOCK_SIZE],
            len: 0,
            pos: 0,
        }
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.pos == self.len
    }

    #[inline(always)]
    fn u8(&mut self) -> Result<u8, DecodeError> {
        if likely(self.pos < self.len) {
            let b = self.buf[self.pos];
            self.pos += 1;
            Ok(b)
        } else {
            // A chunk asked for more bytes than its block carries.
            Err(DecodeError::MalformedBlock)
        }
    }

    /// Reads the next block prefix and fills the buffer with its chunks,
    /// expanding entropy coded blocks through BEANS.
    fn refill(&mut self, cursor: &mut Cursor<'_>) -> Result<(), DecodeError> {
        let h = cursor.peek()?;
        match u32::from(h >> 4) {
            SQOA_UNCOMPRESSED => {
                let h = cursor.u8()?;
                let l = cursor.u8()?;
                let len = 1 + ((usize::from(h) << 8 | usize::from(l)) & 0xfff);
                let data = cursor.take(len)?;
                self.buf[..len].copy_from_slice(data);
                self.len = len;
                self.pos = 0;
                Ok(())
            }
            #[cfg(feature = "beans")]
            SQOA_COMP_BEANS => {
                let info = cursor.u32_be()?;
                let words = ((info >> 16 & 0x0fff) as usize + 1) >> 2;
                let len = (info & 0xffff) as usize;
                if words == 0 || len == 0 || len > SQOA_BLOCK_SIZE {
                    return Err(DecodeError::MalformedBlock);
                }

                let mut code = [0u32; SQOA_BLOCK_SIZE / 4];
                for word in code[..words].iter_mut() {
                    *word = cursor.u32_be()?;
                }
                beans::inflate(&mut self.buf[..len], &mut code, words, None)
                    .map_err(|_| DecodeError::MalformedBlock)?;
                self.len = len;
                self.pos = 0;
                Ok(())
            }
            _ => Err(DecodeError::UnknownBlockType),
        }
    }
}

/// Writes `reps` copies of the pixel into the output, never past its end.
/// Returns the number of pixels actually written.
#[inline]
fn emit(
    output: &mut [u8],
    channels: Channels,
    filled: usize,
    total: usize,
    reps: usize,
    px: Rgba,
) -> usize {
    let count = channels.count();
    let reps = reps.min(total - filled);
    let out = &mut output[filled * count..(filled + reps) * count];

    match channels {
        Channels::Rgba => {
            let out: &mut [[u8; 4]] = bytemuck::cast_slice_mut(out);
            out.fill(px.rgba);
        }
        _ => {
            for pixel in out.chunks_exact_mut(count) {
                channels.store(px, pixel);
            }
        }
    }
    reps
}

fn parse_header(bytes: &[u8]) -> Result<(Sqoa, Format, usize), DecodeError> {
    if bytes.len() < SQOA_HEADER_SIZE + SQOA_PADDING.len() {
        return Err(DecodeError::DataIsTooSmall);
    }

    let mut cursor = Cursor::new(bytes);
    let magic = cursor.u32_be()?;
    let width = cursor.u32_be()?;
    let height = cursor.u32_be()?;
    let channels = cursor.u8()?;
    let colorspace = cursor.u8()?;

    let format = match magic {
        SQOA_MAGIC => Format::Sqoa,
        QOI_MAGIC => Format::Qoi,
        _ => return Err(DecodeError::InvalidMagic),
    };

    let channels = match Channels::from_header(channels) {
        Some(channels) => channels,
        None => return Err(DecodeError::InvalidChannelsValue),
    };
    // QOI streams know nothing of grayscale or BGR layouts.
    if format == Format::Qoi && !matches!(channels, Channels::Rgb | Channels::Rgba) {
        return Err(DecodeError::InvalidChannelsValue);
    }

    let colorspace = match colorspace {
        0 => Colorspace::Srgb,
        1 => Colorspace::Linear,
        _ => return Err(DecodeError::InvalidColorSpaceValue),
    };

    let desc = Sqoa {
        width,
        height,
        channels,
        colorspace,
    };
    if !desc.pixel_count_in_range() {
        return Err(DecodeError::InvalidDimensions);
    }

    let offset = match format {
        Format::Sqoa => {
            if cursor.u8()? != SQOA_START {
                return Err(DecodeError::InvalidStartByte);
            }
            SQOA_HEADER_SIZE + 1
        }
        Format::Qoi => SQOA_HEADER_SIZE,
    };

    Ok((desc, format, offset))
}

fn decode_sqoa(bytes: &[u8], channels: Channels, output: &mut [u8]) -> Result<(), DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let mut block = BlockReader::new();
    let mut index = [Rgba::new(); 64];
    let mut px = Rgba::new_opaque();

    let total = output.len() / channels.count();
    let mut filled = 0usize;

    while filled < total {
        if block.is_empty() {
            block.refill(&mut cursor)?;
        }

        let mut b1 = block.u8()?;
        let mut alpha = None;
        if unlikely(b1 == SQOA_OP_ALPHA) {
            alpha = Some(block.u8()?);
            b1 = block.u8()?;
        }

        let mut reps = 1usize;
        let mut run_chunk = false;
        match b1 {
            SQOA_OP_RGB => {
                let r = block.u8()?;
                let g = block.u8()?;
                let b = block.u8()?;
                px.set_rgb(r, g, b);
            }
            SQOA_OP_RGBA => {
                let r = block.u8()?;
                let g = block.u8()?;
                let b = block.u8()?;
                let a = block.u8()?;
                px.set_rgb(r, g, b);
                px.set_a(a);
            }
            SQOA_OP_BIGRUN => {
                run_chunk = true;
                reps = SQOA_MAXRUN;
            }
            0x00..=0x3f => {
                px = index[b1 as usize];
            }
            0x40..=0x7f => {
                let vr = (b1 >> 4 & 0x03).wrapping_sub(2);
                let vg = (b1 >> 2 & 0x03).wrapping_sub(2);
                let vb = (b1 & 0x03).wrapping_sub(2);
                px.add_rgb(vr, vg, vb);
            }
            0x80..=0xbf => {
                let b2 = block.u8()?;
                let vg = (b1 & 0x3f).wrapping_sub(32);
                let vr = (b2 >> 4 & 0x0f).wrapping_sub(8).wrapping_add(vg);
                let vb = (b2 & 0x0f).wrapping_sub(8).wrapping_add(vg);
                px.add_rgb(vr, vg, vb);
            }
            _ => {
                run_chunk = true;
                reps = (b1 & 0x3f) as usize + 1;
            }
        }

        if !run_chunk {
            // An alpha update in front of a run chunk has no pixel to bind
            // to and is dropped.
            if let Some(a) = alpha {
                px.set_a(a);
            }
            index[px.hash()] = px;
        }

        filled += emit(output, channels, filled, total, reps, px);
    }
    Ok(())
}

/// Decodes a plain QOI chunk stream: no blocks, no alpha update chunks, and
/// run lengths up to 62.
fn decode_qoi(bytes: &[u8], channels: Channels, output: &mut [u8]) -> Result<(), DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let mut index = [Rgba::new(); 64];
    let mut px = Rgba::new_opaque();

    let total = output.len() / channels.count();
    let mut filled = 0usize;

    while filled < total {
        let b1 = cursor.u8()?;

        let mut reps = 1usize;
        let mut run_chunk = false;
        match b1 {
            SQOA_OP_RGB => {
                let r = cursor.u8()?;
                let g = cursor.u8()?;
                let b = cursor.u8()?;
                px.set_rgb(r, g, b);
            }
            SQOA_OP_RGBA => {
                let r = cursor.u8()?;
                let g = cursor.u8()?;
                let b = cursor.u8()?;
                let a = cursor.u8()?;
                px.set_rgb(r, g, b);
                px.set_a(a);
            }
            0x00..=0x3f => {
                px = index[b1 as usize];
            }
            0x40..=0x7f => {
                let vr = (b1 >> 4 & 0x03).wrapping_sub(2);
                let vg = (b1 >> 2 & 0x03).wrapping_sub(2);
                let vb = (b1 & 0x03).wrapping_sub(2);
                px.add_rgb(vr, vg, vb);
            }
            0x80..=0xbf => {
                let b2 = cursor.u8()?;
                let vg = (b1 & 0x3f).wrapping_sub(32);
                let vr = (b2 >> 4 & 0x0f).wrapping_sub(8).wrapping_add(vg);
                let vb = (b2 & 0x0f).wrapping_sub(8).wrapping_add(vg);
                px.add_rgb(vr, vg, vb);
            }
            _ => {
                run_chunk = true;
                reps = (b1 & 0x3f) as usize + 1;
            }
        }

        if !run_chunk {
            index[px.hash()] = px;
        }

        filled += emit(output, channels, filled, total, reps, px);
    }
    Ok(())
}

impl Sqoa {
    /// Reads the header of an encoded SQOA (or QOI) image.\
    /// The returned descriptor can be analyzed before proceeding with
    /// [`Sqoa::decode`].
    pub fn decode_header(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (desc, _, _) = parse_header(bytes)?;
        Ok(desc)
    }

    /// Decode a SQOA (or QOI) image from a bytes slice.\
    /// Decoded raw pixels are written into `output` in the channel layout
    /// recorded in the file header.
    ///
    /// On success this function returns `Ok(sqoa)` with `sqoa` describing
    /// image dimensions, channel layout and color space.\
    /// On failure this function returns `Err(err)` with `err` describing
    /// cause of the error.
    #[inline]
    pub fn decode(bytes: &[u8], output: &mut [u8]) -> Result<Self, DecodeError> {
        Self::decode_channels(bytes, None, output)
    }

    /// Decode a SQOA (or QOI) image from a bytes slice.\
    /// When `force` is given the raw pixels are produced in that channel
    /// layout instead of the one recorded in the file header; the returned
    /// descriptor still reports the stored layout.
    pub fn decode_channels(
        bytes: &[u8],
        force: Option<Channels>,
        output: &mut [u8],
    ) -> Result<Self, DecodeError> {
        let (desc, format, offset) = parse_header(bytes)?;
        let channels = force.unwrap_or(desc.channels);

        let px_len = desc.width as usize * desc.height as usize * channels.count();
        let output = match output.get_mut(..px_len) {
            None => return Err(DecodeError::OutputIsTooSmall),
            Some(output) => output,
        };

        match format {
            Format::Sqoa => decode_sqoa(&bytes[offset..], channels, output)?,
            Format::Qoi => decode_qoi(&bytes[offset..], channels, output)?,
        }
        Ok(desc)
    }

    /// Decode a SQOA (or QOI) image from a bytes slice.\
    /// Decoded raw pixels are written into an allocated `Vec`.
    ///
    /// On success this function returns `Ok((sqoa, vec))` with `sqoa`
    /// describing the image and `vec` containing raw pixels data.\
    /// On failure this function returns `Err(err)` with `err` describing
    /// cause of the error.
    #[cfg(feature = "alloc")]
    #[inline]
    pub fn decode_alloc(bytes: &[u8]) -> Result<(Self, Vec<u8>), DecodeError> {
        Self::decode_alloc_channels(bytes, None)
    }

    /// Decode a SQOA (or QOI) image from a bytes slice into an allocated
    /// `Vec`, optionally forcing the output channel layout.
    #[cfg(feature = "alloc")]
    pub fn decode_alloc_channels(
        bytes: &[u8],
        force: Option<Channels>,
    ) -> Result<(Self, Vec<u8>), DecodeError> {
        let desc = Self::decode_header(bytes)?;
        let channels = force.unwrap_or(desc.channels);

        let size = desc.width as usize * desc.height as usize * channels.count();
        let mut output = vec![0; size];
        let desc = Self::decode_channels(bytes, force, &mut output)?;
        Ok((desc, output))
    }
}
