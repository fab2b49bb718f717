//! Converts Netpbm images (PBM, PGM and PPM, plain and raw) to PNG.
//!
//! The pipeline is: [`decode_memory`] parses the Netpbm source into an [`Image`],
//! [`filter::serialize`] packs it into scanlines, [`filter::filter`] picks a PNG
//! filter per row, [`zlib::compress`] deflates the filtered rows and
//! [`ChunkStream`] frames the result as `IHDR`, `IDAT`… and `IEND` chunks.
//!
//! ```no_run
//! pnmpng::encode_file("in.ppm", "out.png")?;
//! # Ok::<(), pnmpng::Error>(())
//! ```
pub mod chunk;
mod error;
pub mod filter;
pub mod pnm;
pub mod zlib;

pub use crate::chunk::{crc32, Chunk, ChunkStream, Header};
pub use crate::error::Error;
pub use crate::filter::{FilterStrategy, FilterType, Scanlines};
pub use rgb::RGB8;

use log::debug;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Netpbm family of the source image; also decides the PNG pixel layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// PBM (`P1`, `P4`), written as 1-bit greyscale
    Monochrome,
    /// PGM (`P2`, `P5`), written as 8-bit greyscale
    Grayscale,
    /// PPM (`P3`, `P6`), written as 8-bit RGB
    FullColor,
}

/// PNG color type byte of `IHDR`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorType {
    GREY = 0,
    RGB = 2,
}

impl Format {
    /// Picks the format from a `.pbm`, `.pgm` or `.ppm` extension.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or(Error::new(5))?;
        if ext.eq_ignore_ascii_case("pbm") {
            Ok(Self::Monochrome)
        } else if ext.eq_ignore_ascii_case("pgm") {
            Ok(Self::Grayscale)
        } else if ext.eq_ignore_ascii_case("ppm") {
            Ok(Self::FullColor)
        } else {
            Err(Error::new(5))
        }
    }

    /// Family of a `P1`…`P6` magic number, plain or raw.
    #[must_use]
    pub fn from_magic(magic: &[u8]) -> Option<Self> {
        pnm::parse_magic(magic).map(|(format, _)| format)
    }

    /// Samples per pixel
    #[inline]
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            Self::Monochrome | Self::Grayscale => 1,
            Self::FullColor => 3,
        }
    }

    #[inline]
    #[must_use]
    pub fn bitdepth(self) -> u8 {
        match self {
            Self::Monochrome => 1,
            Self::Grayscale | Self::FullColor => 8,
        }
    }

    #[inline]
    #[must_use]
    pub fn colortype(self) -> ColorType {
        match self {
            Self::Monochrome | Self::Grayscale => ColorType::GREY,
            Self::FullColor => ColorType::RGB,
        }
    }

    /// Distance in bytes to the "left" neighbour used by the filters.
    /// 1 when a pixel fits in a byte, bytes per pixel otherwise.
    #[inline]
    #[must_use]
    pub fn bytewidth(self) -> usize {
        self.channels()
    }

    /// Packed scanline length in bytes, not including the filter type byte.
    #[inline]
    #[must_use]
    pub fn row_len(self, width: usize) -> usize {
        match self {
            Self::Monochrome => (width + 7) / 8,
            Self::Grayscale => width,
            Self::FullColor => width * 3,
        }
    }
}

/// Row-major pixels of one image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap<PixelType> {
    /// `width * height` pixels
    pub buffer: Vec<PixelType>,
    pub width: usize,
    pub height: usize,
}

impl<PixelType> Bitmap<PixelType> {
    #[must_use]
    pub fn new(buffer: Vec<PixelType>, width: usize, height: usize) -> Self {
        Self { buffer, width, height }
    }
}

/// Decoded image. Each [`Format`] has its own pixel type, so a buffer can't mix them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Image {
    /// `true` is ink (a `1` in PBM), rendered black
    Mono(Bitmap<bool>),
    Grey(Bitmap<u8>),
    Rgb(Bitmap<RGB8>),
}

/// A single pixel, as read from an [`Image`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pixel {
    Mono(bool),
    Grey(u8),
    Rgb(RGB8),
}

impl Image {
    #[must_use]
    pub fn format(&self) -> Format {
        match self {
            Self::Mono(_) => Format::Monochrome,
            Self::Grey(_) => Format::Grayscale,
            Self::Rgb(_) => Format::FullColor,
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Mono(b) => b.width,
            Self::Grey(b) => b.width,
            Self::Rgb(b) => b.width,
        }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        match self {
            Self::Mono(b) => b.height,
            Self::Grey(b) => b.height,
            Self::Rgb(b) => b.height,
        }
    }

    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> Option<Pixel> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let i = y * self.width() + x;
        match self {
            Self::Mono(b) => b.buffer.get(i).copied().map(Pixel::Mono),
            Self::Grey(b) => b.buffer.get(i).copied().map(Pixel::Grey),
            Self::Rgb(b) => b.buffer.get(i).copied().map(Pixel::Rgb),
        }
    }

    fn buffer_len(&self) -> usize {
        match self {
            Self::Mono(b) => b.buffer.len(),
            Self::Grey(b) => b.buffer.len(),
            Self::Rgb(b) => b.buffer.len(),
        }
    }

    /// Dimensions must be non-zero and match the buffer length.
    pub(crate) fn check(&self) -> Result<(), Error> {
        let (w, h) = (self.width(), self.height());
        if w == 0 || h == 0 {
            return Err(Error::new(8));
        }
        if w.checked_mul(h) != Some(self.buffer_len()) {
            return Err(Error::new(10));
        }
        Ok(())
    }
}

/// Settings of the deflate stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressSettings {
    /// 0-9
    pub level: u8,
    /// The only value the zlib wrappers accept is 8.
    pub mem_level: u8,
    /// `None` derives the window from the amount of filtered data
    pub window_bits: Option<u8>,
}

impl Default for CompressSettings {
    fn default() -> Self {
        Self {
            level: 6,
            mem_level: zlib::DEFAULT_MEM_LEVEL,
            window_bits: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderSettings {
    pub zlibsettings: CompressSettings,
    pub filter_strategy: FilterStrategy,
    /// Maximum data length of a single `IDAT` chunk
    pub max_idat_len: usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            zlibsettings: CompressSettings::default(),
            filter_strategy: FilterStrategy::MINSUM,
            max_idat_len: chunk::MAX_IDAT_LEN,
        }
    }
}

/// Encodes [`Image`]s to PNG
#[derive(Clone, Debug, Default)]
pub struct Encoder {
    settings: EncoderSettings,
}

impl Encoder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set_filter_strategy(&mut self, filter_strategy: FilterStrategy) {
        self.settings.filter_strategy = filter_strategy;
    }

    /// Deflate level 0-9
    #[inline]
    pub fn set_level(&mut self, level: u8) {
        self.settings.zlibsettings.level = level;
    }

    #[inline]
    pub fn set_max_idat_len(&mut self, len: usize) {
        self.settings.max_idat_len = len;
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    #[inline]
    pub fn settings_mut(&mut self) -> &mut EncoderSettings {
        &mut self.settings
    }

    /// Runs the whole pipeline and returns the chunks, ready to be written.
    pub fn encode(&self, image: &Image) -> Result<ChunkStream, Error> {
        let header = Header::new(image.width(), image.height(), image.format())?;
        let scanlines = filter::serialize(image)?;
        let filtered = filter::filter(&scanlines, image.format().bytewidth(), self.settings.filter_strategy)?;
        let compressed = zlib::compress(&filtered, scanlines.row_len() + 1, &self.settings.zlibsettings)?;
        ChunkStream::new(&header, &compressed, self.settings.max_idat_len)
    }

    /// Same as `encode`, but returns the complete PNG file
    pub fn encode_memory(&self, image: &Image) -> Result<Vec<u8>, Error> {
        self.encode(image)?.to_vec()
    }
}

/// Parses a Netpbm file held in memory. The magic number must belong to `format`.
#[inline]
pub fn decode_memory(input: &[u8], format: Format) -> Result<Image, Error> {
    pnm::decode(input, format)
}

/// Reads a Netpbm file, the format is chosen by its extension.
pub fn decode_file<P: AsRef<Path>>(filepath: P) -> Result<Image, Error> {
    let filepath = filepath.as_ref();
    let format = Format::from_path(filepath)?;
    let data = fs::read(filepath).map_err(|_| Error::new(78))?;
    pnm::decode(&data, format)
}

/// Converts a Netpbm file held in memory to a PNG file held in memory
pub fn encode_memory(input: &[u8], format: Format) -> Result<Vec<u8>, Error> {
    let image = decode_memory(input, format)?;
    Encoder::new().encode_memory(&image)
}

/// Converts the Netpbm file at `input` to a PNG file at `output`.
///
/// The output file is created only after the whole PNG has been built,
/// so bad input never leaves a truncated file behind.
pub fn encode_file<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<(), Error> {
    let image = decode_file(input)?;
    let png = Encoder::new().encode(&image)?;
    let output = output.as_ref();
    let file = fs::File::create(output).map_err(|_| Error::new(79))?;
    let mut out = BufWriter::new(file);
    png.write_to(&mut out)?;
    out.flush().map_err(|_| Error::new(79))?;
    debug!("png: wrote {} bytes to {}", png.encoded_len(), output.display());
    Ok(())
}

#[test]
fn format_from_path() {
    assert_eq!(Format::Monochrome, Format::from_path(Path::new("a/b.pbm")).unwrap());
    assert_eq!(Format::Grayscale, Format::from_path(Path::new("b.PGM")).unwrap());
    assert_eq!(Format::FullColor, Format::from_path(Path::new("c.tar.ppm")).unwrap());
    assert_eq!(5, Format::from_path(Path::new("d.png")).unwrap_err().code());
    assert_eq!(5, Format::from_path(Path::new("ppm")).unwrap_err().code());
}

#[test]
fn format_layout() {
    assert_eq!(1, Format::Monochrome.row_len(1));
    assert_eq!(1, Format::Monochrome.row_len(8));
    assert_eq!(2, Format::Monochrome.row_len(9));
    assert_eq!(9, Format::Grayscale.row_len(9));
    assert_eq!(27, Format::FullColor.row_len(9));
    assert_eq!(ColorType::RGB, Format::FullColor.colortype());
    assert_eq!(1, Format::Monochrome.bitdepth());
    assert_eq!(Some(Format::Grayscale), Format::from_magic(b"P5"));
    assert_eq!(None, Format::from_magic(b"P7"));
}

#[test]
fn image_pixel() {
    let img = Image::Grey(Bitmap::new(vec![1, 2, 3, 4, 5, 6], 3, 2));
    assert_eq!(Some(Pixel::Grey(6)), img.pixel(2, 1));
    assert_eq!(None, img.pixel(3, 0));
    assert!(img.check().is_ok());
    let bad = Image::Grey(Bitmap::new(vec![1, 2, 3], 2, 2));
    assert_eq!(10, bad.check().unwrap_err().code());
}
