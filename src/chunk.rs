//! PNG chunks: `IHDR`, `IDAT` and `IEND`, and writing them out as a PNG file.
use crate::{ColorType, Error, Format};
use fallible_collections::FallibleVec;
use log::debug;
use std::io::Write;

/// 8 bytes PNG signature, aka the magic bytes
pub const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Default maximum data length of one `IDAT` chunk
pub const MAX_IDAT_LEN: usize = 8192;

/// PNG's limit for the length of a single chunk
const MAX_CHUNK_LEN: usize = (1 << 31) - 1;

/* CRC polynomial: 0xedb88320 */
const CRC32_TABLE: [u32; 256] = make_crc32_table();

const fn make_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

#[inline]
fn update_crc32(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |r, &d| CRC32_TABLE[((r ^ u32::from(d)) & 255) as usize] ^ (r >> 8))
}

/// Return the CRC of the bytes
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    update_crc32(0xFFFF_FFFF, data) ^ 0xFFFF_FFFF
}

/// Image header: the 13 data bytes of `IHDR`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

impl Header {
    /// Fails when a dimension is zero or doesn't fit in 31 bits.
    pub fn new(width: usize, height: usize, format: Format) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::new(8));
        }
        let width = u32::try_from(width).ok().filter(|&w| w as usize <= MAX_CHUNK_LEN).ok_or(Error::new(9))?;
        let height = u32::try_from(height).ok().filter(|&h| h as usize <= MAX_CHUNK_LEN).ok_or(Error::new(9))?;
        Ok(Self { width, height, format })
    }

    #[inline]
    #[must_use]
    pub fn bitdepth(&self) -> u8 {
        self.format.bitdepth()
    }

    #[inline]
    #[must_use]
    pub fn colortype(&self) -> ColorType {
        self.format.colortype()
    }

    /// Width, height, bit depth, color type, then compression, filter and
    /// interlace methods, which are always 0.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 13] {
        let mut header = [0u8; 13];
        header[0..4].copy_from_slice(&self.width.to_be_bytes());
        header[4..8].copy_from_slice(&self.height.to_be_bytes());
        header[8] = self.bitdepth();
        header[9] = self.colortype() as u8;
        header
    }
}

/// A chunk with its CRC, which covers the type and the data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    type_: [u8; 4],
    data: Vec<u8>,
    crc: u32,
}

impl Chunk {
    pub fn new(type_: [u8; 4], data: &[u8]) -> Result<Self, Error> {
        if data.len() > MAX_CHUNK_LEN {
            return Err(Error::new(77));
        }
        let mut owned = Vec::new();
        owned.try_extend_from_slice(data)?;
        let crc = update_crc32(update_crc32(0xFFFF_FFFF, &type_), data) ^ 0xFFFF_FFFF;
        Ok(Self { type_, data: owned, crc })
    }

    pub fn ihdr(header: &Header) -> Result<Self, Error> {
        Self::new(*b"IHDR", &header.to_bytes())
    }

    pub fn idat(data: &[u8]) -> Result<Self, Error> {
        Self::new(*b"IDAT", data)
    }

    pub fn iend() -> Result<Self, Error> {
        Self::new(*b"IEND", &[])
    }

    /// Length of the data, not including type and CRC
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> [u8; 4] {
        self.type_
    }

    #[inline]
    #[must_use]
    pub fn is_type<C: AsRef<[u8]>>(&self, name: C) -> bool {
        self.type_ == name.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Length, type, data, CRC; integers are big-endian.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&(self.data.len() as u32).to_be_bytes())?;
        out.write_all(&self.type_)?;
        if !self.data.is_empty() {
            out.write_all(&self.data)?;
        }
        out.write_all(&self.crc.to_be_bytes())
    }
}

/// All chunks of one PNG file: `IHDR`, the `IDAT`s, `IEND`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkStream {
    chunks: Vec<Chunk>,
}

impl ChunkStream {
    /// Splits the zlib stream into `IDAT` chunks of at most `max_idat_len` bytes.
    pub fn new(header: &Header, zlib: &[u8], max_idat_len: usize) -> Result<Self, Error> {
        if max_idat_len == 0 || max_idat_len > MAX_CHUNK_LEN {
            return Err(Error::new(23));
        }
        let mut chunks = Vec::new();
        chunks.try_reserve_exact(zlib.len() / max_idat_len + 3)?;
        chunks.try_push(Chunk::ihdr(header)?)?;
        for data in zlib.chunks(max_idat_len) {
            chunks.try_push(Chunk::idat(data)?)?;
        }
        chunks.try_push(Chunk::iend()?)?;
        debug!("png: {}x{} {:?}, {} IDAT chunks for {} bytes", header.width, header.height, header.format, chunks.len() - 2, zlib.len());
        Ok(Self { chunks })
    }

    #[inline]
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// The `IHDR` chunk
    #[inline]
    #[must_use]
    pub fn header(&self) -> &Chunk {
        &self.chunks[0]
    }

    pub fn idat(&self) -> impl ExactSizeIterator<Item = &Chunk> + '_ {
        self.chunks[1..self.chunks.len() - 1].iter()
    }

    /// The `IEND` chunk
    #[inline]
    #[must_use]
    pub fn end(&self) -> &Chunk {
        &self.chunks[self.chunks.len() - 1]
    }

    /// Size of the complete PNG file
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        SIGNATURE.len() + self.chunks.iter().map(|c| c.len() + 12).sum::<usize>()
    }

    /// Writes the signature and every chunk, in order.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        out.write_all(&SIGNATURE).map_err(|_| Error::new(79))?;
        for chunk in &self.chunks {
            chunk.write_to(out).map_err(|_| Error::new(79))?;
        }
        Ok(())
    }

    /// The complete PNG file
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.encoded_len())?;
        self.write_to(&mut out)?;
        Ok(out)
    }
}

#[test]
fn crc_check_values() {
    assert_eq!(0xCBF4_3926, crc32(b"123456789"));
    assert_eq!(0, crc32(b""));
    assert_eq!(0xAE42_6082, crc32(b"IEND"));
    assert_eq!(0xAE42_6082, Chunk::iend().unwrap().crc());
}

#[test]
fn crc_covers_type_and_data() {
    let chunk = Chunk::idat(&[1, 2, 3]).unwrap();
    assert_eq!(crc32(b"IDAT\x01\x02\x03"), chunk.crc());
    assert_ne!(crc32(&[1, 2, 3]), chunk.crc());
}

#[test]
fn header_bytes() {
    let header = Header::new(0x0102_0304, 2, Format::FullColor).unwrap();
    assert_eq!([1, 2, 3, 4, 0, 0, 0, 2, 8, 2, 0, 0, 0], header.to_bytes());
    let header = Header::new(2, 2, Format::Monochrome).unwrap();
    assert_eq!([0, 0, 0, 2, 0, 0, 0, 2, 1, 0, 0, 0, 0], header.to_bytes());
    assert_eq!(8, Header::new(5, 0, Format::Grayscale).unwrap_err().code());
    assert_eq!(9, Header::new(1 << 31, 1, Format::Grayscale).unwrap_err().code());
}

#[test]
fn idat_splitting() {
    let header = Header::new(1, 1, Format::Grayscale).unwrap();
    let zlib: Vec<u8> = (0..20000u32).map(|i| i as u8).collect();
    for (len, count) in [(0, 0), (1, 1), (8192, 1), (8193, 2), (20000, 3)] {
        let stream = ChunkStream::new(&header, &zlib[..len], MAX_IDAT_LEN).unwrap();
        assert_eq!(count, stream.idat().len());
        assert!(stream.header().is_type("IHDR"));
        assert!(stream.end().is_type(b"IEND"));
        assert!(stream.end().is_empty());
        let sizes: Vec<usize> = stream.idat().map(Chunk::len).collect();
        assert!(sizes.iter().rev().skip(1).all(|&s| s == MAX_IDAT_LEN));
        let joined: Vec<u8> = stream.idat().flat_map(|c| c.data().iter().copied()).collect();
        assert_eq!(&zlib[..len], &joined[..]);
    }
    assert_eq!(23, ChunkStream::new(&header, &zlib, 0).unwrap_err().code());
}

#[test]
fn write_framing() {
    let header = Header::new(1, 1, Format::Grayscale).unwrap();
    let stream = ChunkStream::new(&header, &[9, 8, 7], MAX_IDAT_LEN).unwrap();
    let png = stream.to_vec().unwrap();
    assert_eq!(stream.encoded_len(), png.len());
    assert_eq!(&SIGNATURE, &png[..8]);
    assert_eq!(&[0, 0, 0, 13], &png[8..12]);
    assert_eq!(b"IHDR", &png[12..16]);
    let idat = &png[8 + 25..];
    assert_eq!(&[0, 0, 0, 3], &idat[..4]);
    assert_eq!(b"IDAT\x09\x08\x07", &idat[4..11]);
    assert_eq!(&stream.chunks()[1].crc().to_be_bytes(), &idat[11..15]);
    assert_eq!(b"\0\0\0\0IEND\xAE\x42\x60\x82", &idat[15..]);
}
