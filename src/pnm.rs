//! Netpbm decoder: PBM (`P1`/`P4`), PGM (`P2`/`P5`) and PPM (`P3`/`P6`).
//!
//! Samples are rescaled to 8 bits on the way in, so the rest of the
//! pipeline only ever sees 0-255 values.
use crate::{Bitmap, Error, Format, Image};
use log::debug;
use rgb::RGB8;

/// Samples are always rescaled to this maximum
const OUTPUT_MAXVAL: u32 = 255;

/// Largest width or height PNG can store
const MAX_DIMENSION: u32 = 0x7FFF_FFFF;

/// Plain (text) or raw (binary) variant of a family
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    Raw,
}

/// Maps `P1`…`P6` to its family and variant.
#[must_use]
pub fn parse_magic(magic: &[u8]) -> Option<(Format, Encoding)> {
    match magic {
        [b'P', b'1', ..] => Some((Format::Monochrome, Encoding::Plain)),
        [b'P', b'4', ..] => Some((Format::Monochrome, Encoding::Raw)),
        [b'P', b'2', ..] => Some((Format::Grayscale, Encoding::Plain)),
        [b'P', b'5', ..] => Some((Format::Grayscale, Encoding::Raw)),
        [b'P', b'3', ..] => Some((Format::FullColor, Encoding::Plain)),
        [b'P', b'6', ..] => Some((Format::FullColor, Encoding::Raw)),
        _ => None,
    }
}

/// Rescales `sample` from `0..=maxval` to `0..=255`, rounding half up.
///
/// `maxval` must be non-zero and `sample <= maxval`.
#[inline]
pub(crate) fn upscale(maxval: u32, sample: u32) -> u8 {
    debug_assert!(maxval > 0 && sample <= maxval);
    ((2 * sample * OUTPUT_MAXVAL + maxval) / (2 * maxval)) as u8
}

#[inline]
fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    #[inline]
    fn next_byte(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Skips whitespace and `#` comments, which run to the end of the line.
    fn skip_separators(&mut self) {
        while let Some(c) = self.peek() {
            if is_space(c) {
                self.pos += 1;
            } else if c == b'#' {
                while let Some(c) = self.next_byte() {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Reads a run of decimal digits. `None` if there are no digits, `Some(None)` on overflow.
    fn digits(&mut self) -> Option<Option<u32>> {
        let start = self.pos;
        let mut value = Some(0u32);
        while let Some(c @ b'0'..=b'9') = self.peek() {
            value = value.and_then(|v| v.checked_mul(10)).and_then(|v| v.checked_add(u32::from(c - b'0')));
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(value)
        }
    }

    fn magic(&mut self) -> Result<(Format, Encoding), Error> {
        let magic = self.data.get(..2).ok_or(Error::new(1))?;
        let found = parse_magic(magic).ok_or(Error::new(1))?;
        self.pos = 2;
        Ok(found)
    }

    fn header_field(&mut self) -> Result<u32, Error> {
        self.skip_separators();
        match self.digits() {
            Some(Some(n)) => Ok(n),
            Some(None) => Err(Error::new(9)),
            None => Err(Error::new(2)),
        }
    }

    fn dimension(&mut self) -> Result<usize, Error> {
        match self.header_field()? {
            0 => Err(Error::new(8)),
            n if n > MAX_DIMENSION => Err(Error::new(9)),
            n => Ok(n as usize),
        }
    }

    fn maxval(&mut self) -> Result<u32, Error> {
        match self.header_field() {
            Ok(n @ 1..=255) => Ok(n),
            Ok(_) => Err(Error::new(3)),
            Err(e) if e.code() == 9 => Err(Error::new(3)),
            Err(e) => Err(e),
        }
    }

    /// Raw rasters start after exactly one whitespace byte.
    fn end_of_header(&mut self, encoding: Encoding) -> Result<(), Error> {
        if encoding == Encoding::Plain {
            return Ok(());
        }
        match self.next_byte() {
            Some(c) if is_space(c) => Ok(()),
            Some(_) => Err(Error::new(2)),
            None => Ok(()),
        }
    }

    /// Fails early when the input can't possibly hold `min_bytes` more bytes of raster,
    /// so a bogus header can't trigger a huge allocation.
    fn ensure_remaining(&self, min_bytes: usize) -> Result<(), Error> {
        if self.remaining() < min_bytes {
            return Err(Error::new(4));
        }
        Ok(())
    }

    fn plain_bit(&mut self) -> Result<bool, Error> {
        self.skip_separators();
        match self.next_byte() {
            Some(b'0') => Ok(false),
            Some(b'1') => Ok(true),
            Some(_) => Err(Error::new(7)),
            None => Err(Error::new(4)),
        }
    }

    fn sample(&mut self, encoding: Encoding, maxval: u32) -> Result<u8, Error> {
        let value = match encoding {
            Encoding::Raw => u32::from(self.next_byte().ok_or(Error::new(4))?),
            Encoding::Plain => {
                self.skip_separators();
                match self.digits() {
                    Some(Some(n)) => n,
                    Some(None) => return Err(Error::new(6)),
                    None if self.peek().is_none() => return Err(Error::new(4)),
                    None => return Err(Error::new(7)),
                }
            },
        };
        if value > maxval {
            return Err(Error::new(6));
        }
        Ok(upscale(maxval, value))
    }
}

/// Parses a complete Netpbm image. `format` is the family the caller expects,
/// usually derived from the file extension.
pub fn decode(input: &[u8], format: Format) -> Result<Image, Error> {
    let mut r = Reader::new(input);
    let (found, encoding) = r.magic()?;
    if found != format {
        return Err(Error::new(1));
    }
    let width = r.dimension()?;
    let height = r.dimension()?;
    let size = width.checked_mul(height).ok_or(Error::new(9))?;

    let image = match format {
        Format::Monochrome => {
            r.end_of_header(encoding)?;
            Image::Mono(Bitmap::new(read_bits(&mut r, encoding, size)?, width, height))
        },
        Format::Grayscale => {
            let maxval = r.maxval()?;
            r.end_of_header(encoding)?;
            r.ensure_remaining(size)?;
            let mut pixels = Vec::new();
            pixels.try_reserve_exact(size)?;
            for _ in 0..size {
                pixels.push(r.sample(encoding, maxval)?);
            }
            Image::Grey(Bitmap::new(pixels, width, height))
        },
        Format::FullColor => {
            let maxval = r.maxval()?;
            r.end_of_header(encoding)?;
            r.ensure_remaining(size.checked_mul(3).ok_or(Error::new(9))?)?;
            let mut pixels = Vec::new();
            pixels.try_reserve_exact(size)?;
            for _ in 0..size {
                let red = r.sample(encoding, maxval)?;
                let green = r.sample(encoding, maxval)?;
                let blue = r.sample(encoding, maxval)?;
                pixels.push(RGB8::new(red, green, blue));
            }
            Image::Rgb(Bitmap::new(pixels, width, height))
        },
    };
    debug!("pnm: decoded {}x{} {:?} ({:?})", width, height, format, encoding);
    Ok(image)
}

/// PBM pixels, `true` for ink.
///
/// Raw bits are read as one continuous MSB-first stream; rows are not byte-aligned.
fn read_bits(r: &mut Reader<'_>, encoding: Encoding, size: usize) -> Result<Vec<bool>, Error> {
    let needed = match encoding {
        Encoding::Plain => size,
        Encoding::Raw => (size + 7) / 8,
    };
    r.ensure_remaining(needed)?;
    let mut pixels = Vec::new();
    pixels.try_reserve_exact(size)?;
    match encoding {
        Encoding::Plain => {
            for _ in 0..size {
                pixels.push(r.plain_bit()?);
            }
        },
        Encoding::Raw => {
            let bytes = &r.data[r.pos..r.pos + needed];
            pixels.extend(bytes.iter().flat_map(|&byte| (0..8).map(move |bit| byte & (0x80 >> bit) != 0)).take(size));
            r.pos += needed;
        },
    }
    Ok(pixels)
}

#[test]
fn upscale_rounds_half_up() {
    assert_eq!(255, upscale(1, 1));
    assert_eq!(0, upscale(1, 0));
    assert_eq!(255, upscale(255, 255));
    assert_eq!(128, upscale(2, 1)); // 127.5
    assert_eq!(17, upscale(15, 1));
    assert_eq!(85, upscale(3, 1));
    for d in 1..=255 {
        assert_eq!(255, upscale(d, d));
        for s in 1..=d {
            assert!(upscale(d, s - 1) <= upscale(d, s));
        }
    }
}

#[test]
fn header_comments_and_whitespace() {
    let img = decode(b"P2\n# made by hand\n  3 # width\n1\n# depth next\n\n2\n0 1 2\n", Format::Grayscale).unwrap();
    let Image::Grey(img) = img else { panic!() };
    assert_eq!((3, 1), (img.width, img.height));
    assert_eq!(vec![0, 128, 255], img.buffer);
}

#[test]
fn plain_bitmap() {
    let img = decode(b"P1\n# c\n3 2\n1 0 1\n011", Format::Monochrome).unwrap();
    let Image::Mono(img) = img else { panic!() };
    assert_eq!(vec![true, false, true, false, true, true], img.buffer);
}

#[test]
fn raw_bitmap_is_dense() {
    // 3x3 = 9 bits, spans two bytes without row padding
    let img = decode(b"P4 3 3\n\xA5\x80", Format::Monochrome).unwrap();
    let Image::Mono(img) = img else { panic!() };
    assert_eq!(vec![true, false, true, false, false, true, false, true, true], img.buffer);
}

#[test]
fn raw_pixmap() {
    let img = decode(b"P6 2 1 255\n\x01\x02\x03\xff\x00\x80", Format::FullColor).unwrap();
    let Image::Rgb(img) = img else { panic!() };
    assert_eq!(vec![RGB8::new(1, 2, 3), RGB8::new(255, 0, 128)], img.buffer);
}

#[test]
fn plain_pixmap_rescaled() {
    let img = decode(b"P3\n1 1\n15\n15 0 7\n", Format::FullColor).unwrap();
    assert_eq!(Some(crate::Pixel::Rgb(RGB8::new(255, 0, 119))), img.pixel(0, 0));
}

#[test]
fn raw_graymap_rescaled() {
    let img = decode(b"P5 2 1 1\n\x00\x01", Format::Grayscale).unwrap();
    let Image::Grey(img) = img else { panic!() };
    assert_eq!(vec![0, 255], img.buffer);
}

#[test]
fn parse_errors() {
    let code = |data: &[u8], format| decode(data, format).unwrap_err().code();
    assert_eq!(1, code(b"P5 1 1 255\n\x00", Format::Monochrome));
    assert_eq!(1, code(b"P9 1 1\n1", Format::Monochrome));
    assert_eq!(1, code(b"P", Format::Monochrome));
    assert_eq!(2, code(b"P2 1\n", Format::Grayscale));
    assert_eq!(2, code(b"P2 1 1 x", Format::Grayscale));
    assert_eq!(3, code(b"P2 1 1 256 0", Format::Grayscale));
    assert_eq!(3, code(b"P2 1 1 0 0", Format::Grayscale));
    assert_eq!(3, code(b"P2 1 1 99999999999 0", Format::Grayscale));
    assert_eq!(4, code(b"P2 2 2 255 1 2 3", Format::Grayscale));
    assert_eq!(4, code(b"P6 1 1 255\n\x01\x02", Format::FullColor));
    assert_eq!(4, code(b"P4 9 1\n\xff", Format::Monochrome));
    assert_eq!(4, code(b"P1 2 1 1", Format::Monochrome));
    assert_eq!(6, code(b"P2 1 1 7 8", Format::Grayscale));
    assert_eq!(6, code(b"P5 1 1 7\n\x08", Format::Grayscale));
    assert_eq!(7, code(b"P1 2 1 1 2", Format::Monochrome));
    assert_eq!(7, code(b"P3 1 1 255 1 2 x", Format::FullColor));
    assert_eq!(8, code(b"P1 0 1", Format::Monochrome));
    assert_eq!(9, code(b"P5 4294967296 1 255\n", Format::Grayscale));
    assert!(Error::new(4).is_input_error());
}
