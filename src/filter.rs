//! Packing pixels into scanlines and choosing a filter for every scanline
//! (PNG filter method 0).
use crate::{Error, Image};
use fallible_collections::FallibleVec;
use log::{debug, trace};
use rgb::ComponentBytes;

/// How the filter type of each scanline is chosen
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterStrategy {
    /// Every filter is zero
    ZERO,
    /// Use the filter whose output bytes add up to the smallest sum
    MINSUM,
}

/// Filter type byte that starts every filtered scanline
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl FilterType {
    pub const ALL: [FilterType; 5] = [Self::None, Self::Sub, Self::Up, Self::Average, Self::Paeth];

    /// Prediction of a byte from its left (`a`), upper (`b`) and upper-left (`c`) neighbours
    #[inline(always)]
    fn predict(self, a: u8, b: u8, c: u8) -> u8 {
        match self {
            Self::None => 0,
            Self::Sub => a,
            Self::Up => b,
            Self::Average => ((u16::from(a) + u16::from(b)) / 2) as u8,
            Self::Paeth => paeth_predictor(a, b, c),
        }
    }
}

fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let (ia, ib, ic) = (i16::from(a), i16::from(b), i16::from(c));
    let p = ia + ib - ic;
    let pa = (p - ia).abs();
    let pb = (p - ib).abs();
    let pc = (p - ic).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Unfiltered image data: `height` scanlines of `row_len` bytes each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scanlines {
    data: Vec<u8>,
    row_len: usize,
    height: usize,
}

impl Scanlines {
    /// Bytes per scanline, without the filter type byte
    #[inline]
    #[must_use]
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    #[must_use]
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        self.data.get(y * self.row_len..(y + 1) * self.row_len)
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        (0..self.height).map(move |y| &self.data[y * self.row_len..(y + 1) * self.row_len])
    }

    /// All scanlines back to back
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Packs the pixels into PNG scanlines.
///
/// Monochrome pixels take one bit each, most significant bit first. Ink is a 0 bit
/// (black), no ink a 1 bit (white); unused bits at the end of a row stay 0.
/// Greyscale pixels take one byte, RGB pixels three.
pub fn serialize(image: &Image) -> Result<Scanlines, Error> {
    image.check()?;
    let width = image.width();
    let height = image.height();
    let row_len = image.format().row_len(width);
    let size = row_len.checked_mul(height).ok_or(Error::new(9))?;

    let mut data = Vec::new();
    data.try_reserve_exact(size)?;
    match image {
        Image::Mono(bitmap) => {
            data.resize(size, 0);
            for (line, pixels) in data.chunks_exact_mut(row_len).zip(bitmap.buffer.chunks_exact(width)) {
                for (x, &ink) in pixels.iter().enumerate() {
                    if !ink {
                        line[x / 8] |= 0x80 >> (x % 8);
                    }
                }
            }
        },
        Image::Grey(bitmap) => data.try_extend_from_slice(&bitmap.buffer)?,
        Image::Rgb(bitmap) => data.try_extend_from_slice(bitmap.buffer.as_bytes())?,
    }
    Ok(Scanlines { data, row_len, height })
}

/// `a`, `b` and `c` of byte `i`, zero where they fall outside the image
#[inline(always)]
fn neighbors(line: &[u8], prevline: Option<&[u8]>, i: usize, bytewidth: usize) -> (u8, u8, u8) {
    let left = i.checked_sub(bytewidth);
    let a = left.map_or(0, |l| line[l]);
    match prevline {
        Some(prev) => (a, prev[i], left.map_or(0, |l| prev[l])),
        None => (a, 0, 0),
    }
}

/// Returns the filter type with the smallest sum of filtered bytes.
///
/// Filtered bytes are summed as unsigned values. On a tie the lowest filter type wins.
#[must_use]
pub fn select_filter(line: &[u8], prevline: Option<&[u8]>, bytewidth: usize) -> FilterType {
    let mut sum = [0usize; 5];
    for (i, &x) in line.iter().enumerate() {
        let (a, b, c) = neighbors(line, prevline, i, bytewidth);
        for (s, filter_type) in sum.iter_mut().zip(FilterType::ALL) {
            *s += usize::from(x.wrapping_sub(filter_type.predict(a, b, c)));
        }
    }

    let mut best = FilterType::None;
    let mut smallest = sum[0];
    for filter_type in FilterType::ALL.into_iter().skip(1) {
        if sum[filter_type as usize] < smallest {
            best = filter_type;
            smallest = sum[filter_type as usize];
        }
    }
    best
}

fn filter_scanline(out: &mut [u8], line: &[u8], prevline: Option<&[u8]>, bytewidth: usize, filter_type: FilterType) {
    for (i, (o, &x)) in out.iter_mut().zip(line).enumerate() {
        let (a, b, c) = neighbors(line, prevline, i, bytewidth);
        *o = x.wrapping_sub(filter_type.predict(a, b, c));
    }
}

/// Filters a single scanline into `out`, which must be `line.len() + 1` bytes long:
/// the filter type followed by the filtered bytes.
///
/// Only the previous (unfiltered) scanline is needed, so rows can be streamed.
pub fn filter_row(out: &mut [u8], line: &[u8], prevline: Option<&[u8]>, bytewidth: usize, strategy: FilterStrategy) -> FilterType {
    debug_assert_eq!(out.len(), line.len() + 1);
    debug_assert!(bytewidth > 0);
    debug_assert!(prevline.map_or(true, |p| p.len() == line.len()));

    let filter_type = match strategy {
        FilterStrategy::ZERO => FilterType::None,
        FilterStrategy::MINSUM => select_filter(line, prevline, bytewidth),
    };
    out[0] = filter_type as u8;
    filter_scanline(&mut out[1..], line, prevline, bytewidth, filter_type);
    filter_type
}

/// Filters all scanlines. The result has `height * (row_len + 1)` bytes.
///
/// `bytewidth` is the distance to the left neighbour: 1 for 1-byte and sub-byte pixels, 3 for RGB.
pub fn filter(scanlines: &Scanlines, bytewidth: usize, strategy: FilterStrategy) -> Result<Vec<u8>, Error> {
    let linebytes = scanlines.row_len();
    let size = (linebytes + 1).checked_mul(scanlines.height()).ok_or(Error::new(9))?;
    let mut out = Vec::new();
    out.try_reserve_exact(size)?;
    out.resize(size, 0);

    let mut used = [0usize; 5];
    let mut prevline = None;
    for (y, (line, filtered)) in scanlines.rows().zip(out.chunks_exact_mut(linebytes + 1)).enumerate() {
        let filter_type = filter_row(filtered, line, prevline, bytewidth, strategy);
        trace!("filter: row {} {:?}", y, filter_type);
        used[filter_type as usize] += 1;
        prevline = Some(line);
    }
    debug!("filter: {} rows of {} bytes, filter types used {:?}", scanlines.height(), linebytes, used);
    Ok(out)
}

#[cfg(test)]
fn unfilter_scanline(recon: &mut [u8], filtered: &[u8], precon: Option<&[u8]>, bytewidth: usize) {
    let filter_type = FilterType::ALL[usize::from(filtered[0])];
    for i in 0..recon.len() {
        let (a, b, c) = neighbors(recon, precon, i, bytewidth);
        recon[i] = filtered[i + 1].wrapping_add(filter_type.predict(a, b, c));
    }
}

#[test]
fn paeth() {
    assert_eq!(0, paeth_predictor(0, 0, 0));
    assert_eq!(20, paeth_predictor(10, 20, 10));
    assert_eq!(20, paeth_predictor(20, 10, 10));
    assert_eq!(5, paeth_predictor(5, 5, 10));
    assert_eq!(5, paeth_predictor(1, 9, 5));
    assert_eq!(255, paeth_predictor(255, 255, 255));
}

#[test]
fn predictions_wrap() {
    let mut out = [0u8; 4];
    filter_row(&mut out, &[5, 3, 250], None, 1, FilterStrategy::ZERO);
    assert_eq!([0, 5, 3, 250], out);
    filter_scanline(&mut out[1..], &[5, 3, 250], Some(&[10, 200, 0]), 1, FilterType::Up);
    assert_eq!([251, 59, 250], out[1..]);
    filter_scanline(&mut out[1..], &[5, 3, 250], Some(&[255, 255, 0]), 1, FilterType::Average);
    // 5 - 127, 3 - (5 + 255) / 2, 250 - (3 + 0) / 2
    assert_eq!([134, 129, 249], out[1..]);
}

#[test]
fn tie_goes_to_lowest_filter_type() {
    // Sub and Paeth both sum to 5
    assert_eq!(FilterType::Sub, select_filter(&[5, 5], None, 1));
    // Up and Paeth both sum to 0
    assert_eq!(FilterType::Up, select_filter(&[10, 20], Some(&[10, 20]), 1));
    // everything sums to 0
    assert_eq!(FilterType::None, select_filter(&[0, 0, 0], Some(&[0, 0, 0]), 3));
    assert_eq!(FilterType::None, select_filter(&[], None, 1));
}

#[test]
fn minsum_picks_sub_for_gradient() {
    let line: Vec<u8> = (0..64).map(|i| i * 3).collect();
    let mut out = vec![0; 65];
    assert_eq!(FilterType::Sub, filter_row(&mut out, &line, None, 1, FilterStrategy::MINSUM));
    assert_eq!(1, out[0]);
    assert!(out[2..].iter().all(|&b| b == 3));
}

#[test]
fn filters_reverse() {
    let mut seed = 7u32;
    let mut random = || {
        seed = 1103515245u32.wrapping_mul(seed).wrapping_add(12345);
        (seed >> 17) as u8
    };
    let prev: Vec<u8> = (0..30).map(|_| random()).collect();
    let line: Vec<u8> = (0..30).map(|_| random()).collect();
    for prevline in [None, Some(&prev[..])] {
        for filter_type in FilterType::ALL {
            let mut out = vec![filter_type as u8; 31];
            filter_scanline(&mut out[1..], &line, prevline, 3, filter_type);
            let mut recon = vec![0; 30];
            unfilter_scanline(&mut recon, &out, prevline, 3);
            assert_eq!(line, recon, "{:?}", filter_type);
        }
    }
}

#[test]
fn serialize_monochrome() {
    use crate::Bitmap;
    let img = Image::Mono(Bitmap::new(vec![true, false, false, true], 2, 2));
    let lines = serialize(&img).unwrap();
    assert_eq!(1, lines.row_len());
    assert_eq!(&[0x40, 0x80], lines.as_bytes());

    let img = Image::Mono(Bitmap::new(vec![false; 9 * 2], 9, 2));
    let lines = serialize(&img).unwrap();
    assert_eq!(2, lines.row_len());
    assert_eq!(&[0xFF, 0x80, 0xFF, 0x80], lines.as_bytes());
}

#[test]
fn serialize_row_lengths() {
    use crate::{Bitmap, RGB8};
    for width in [1, 7, 8, 9, 17] {
        let mono = serialize(&Image::Mono(Bitmap::new(vec![true; width * 3], width, 3))).unwrap();
        assert!(mono.row_len() * 8 >= width && mono.row_len() * 8 < width + 8);
        assert!(mono.rows().all(|r| r.len() == mono.row_len()));

        let grey = serialize(&Image::Grey(Bitmap::new(vec![1; width * 3], width, 3))).unwrap();
        assert_eq!(width, grey.row_len());
        assert_eq!(3, grey.rows().len());

        let rgb = serialize(&Image::Rgb(Bitmap::new(vec![RGB8::new(1, 2, 3); width * 3], width, 3))).unwrap();
        assert_eq!(width * 3, rgb.row_len());
        assert_eq!(Some(&[1, 2, 3][..]), rgb.row(2).map(|r| &r[..3]));
    }
}

#[test]
fn zero_strategy_keeps_raw_bytes() {
    use crate::{Bitmap, RGB8};
    let pixels = (0..35u8).map(|i| RGB8::new(i, i.wrapping_mul(7), 255 - i)).collect();
    let lines = serialize(&Image::Rgb(Bitmap::new(pixels, 7, 5))).unwrap();
    let filtered = filter(&lines, 3, FilterStrategy::ZERO).unwrap();
    assert_eq!(5 * 22, filtered.len());
    assert!(filtered.chunks(22).all(|row| row[0] == 0));
    let raw: Vec<u8> = filtered.chunks(22).flat_map(|row| row[1..].iter().copied()).collect();
    assert_eq!(lines.as_bytes(), &raw[..]);
}
