use crate::{CompressSettings, Error};
use fallible_collections::FallibleVec;
use flate2::{Compression, FlushCompress, Status};
use log::debug;

pub const MIN_WINDOW_BITS: u8 = 9;
pub const MAX_WINDOW_BITS: u8 = 15;
pub const DEFAULT_MEM_LEVEL: u8 = 8;

/// Output is drained from the compressor in bursts of this size
const BURST_SIZE: usize = 32768;

/// Result of a single [`StreamCompressor::feed`] call
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes taken from the input
    pub consumed: usize,
    /// Bytes written to the output
    pub produced: usize,
    /// The stream has been finished and all trailing bytes are written
    pub stream_end: bool,
}

/// A stateful deflate stream.
///
/// Each call may consume only part of the input and may have more output pending
/// than fits in `output`, so callers keep calling until the output isn't full.
/// When `finish` is set the stream is terminated once all input has been taken.
/// Dropping the compressor ends the stream.
pub trait StreamCompressor {
    fn feed(&mut self, input: &[u8], output: &mut [u8], finish: bool) -> Result<Progress, Error>;
}

/// zlib-wrapped deflate from `flate2`
pub struct FlateCompressor {
    gz: flate2::Compress,
}

impl FlateCompressor {
    /// Fails if the configuration can't be honoured: `level` above 9, `window_bits`
    /// outside 9..=15 or a `mem_level` other than 8.
    pub fn new(level: u8, window_bits: u8, mem_level: u8) -> Result<Self, Error> {
        if level > 9 || !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window_bits) || mem_level != DEFAULT_MEM_LEVEL {
            return Err(Error::new(20));
        }
        let level = Compression::new(level.into());
        #[cfg(any(feature = "zlib", feature = "cfzlib", feature = "ngzlib"))]
        let gz = flate2::Compress::new_with_window_bits(level, true, window_bits);
        // miniz_oxide always uses a 32KB window
        #[cfg(not(any(feature = "zlib", feature = "cfzlib", feature = "ngzlib")))]
        let gz = flate2::Compress::new(level, true);
        Ok(Self { gz })
    }
}

impl StreamCompressor for FlateCompressor {
    fn feed(&mut self, input: &[u8], output: &mut [u8], finish: bool) -> Result<Progress, Error> {
        let last_total_in = self.gz.total_in();
        let last_total_out = self.gz.total_out();
        let flush = if finish { FlushCompress::Finish } else { FlushCompress::None };
        let status = self.gz.compress(input, output, flush).map_err(|_| Error::new(21))?;
        Ok(Progress {
            consumed: (self.gz.total_in() - last_total_in) as usize,
            produced: (self.gz.total_out() - last_total_out) as usize,
            stream_end: status == Status::StreamEnd,
        })
    }
}

/// `ceil(log2(len))`, clamped to the window sizes zlib supports
#[must_use]
pub fn window_bits_for(len: usize) -> u8 {
    let bits = len.next_power_of_two().trailing_zeros();
    bits.clamp(MIN_WINDOW_BITS.into(), MAX_WINDOW_BITS.into()) as u8
}

/// Deflates filtered scanlines, `segment_len` (filter byte + scanline) bytes at a time.
pub fn compress(filtered: &[u8], segment_len: usize, settings: &CompressSettings) -> Result<Vec<u8>, Error> {
    let window_bits = settings.window_bits.unwrap_or_else(|| window_bits_for(filtered.len()));
    let mut z = FlateCompressor::new(settings.level, window_bits, settings.mem_level)?;
    let out = deflate_segments(&mut z, filtered, segment_len)?;
    debug!("zlib: {} -> {} bytes, level {}, window_bits {}", filtered.len(), out.len(), settings.level, window_bits);
    Ok(out)
}

/// Feeds every segment to the compressor, the last one finishing the stream.
/// With no segments at all an empty stream is finished.
pub fn deflate_segments<C: StreamCompressor>(z: &mut C, data: &[u8], segment_len: usize) -> Result<Vec<u8>, Error> {
    let count = if segment_len == 0 { 0 } else { (data.len() + segment_len - 1) / segment_len };
    let mut out = Vec::new();
    out.try_reserve_exact(count)?;
    let mut burst = vec![0u8; BURST_SIZE];

    if count == 0 {
        feed_segment(z, &[], &mut burst, &mut out, true)?;
    } else {
        for (i, segment) in data.chunks(segment_len).enumerate() {
            feed_segment(z, segment, &mut burst, &mut out, i + 1 == count)?;
        }
    }
    Ok(out)
}

fn feed_segment<C: StreamCompressor>(z: &mut C, segment: &[u8], burst: &mut [u8], out: &mut Vec<u8>, last: bool) -> Result<(), Error> {
    let mut input = segment;
    loop {
        let progress = z.feed(input, burst, last)?;
        input = input.get(progress.consumed..).ok_or(Error::new(21))?;
        let compressed = burst.get(..progress.produced).ok_or(Error::new(21))?;

        if out.len() + compressed.len() >= out.capacity() {
            let additional = out.capacity() + segment.len() + compressed.len() - out.len();
            out.try_reserve_exact(additional)?;
        }
        out.try_extend_from_slice(compressed)?;

        if last {
            if progress.stream_end {
                break;
            }
            if progress.consumed == 0 && progress.produced == 0 {
                return Err(Error::new(21));
            }
        } else if progress.produced < burst.len() {
            break;
        }
    }
    // a conforming compressor has taken everything once it stops filling the output
    if !input.is_empty() {
        return Err(Error::new(22));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    /// Copies input to output
    struct Passthrough {
        finished: bool,
    }

    impl StreamCompressor for Passthrough {
        fn feed(&mut self, input: &[u8], output: &mut [u8], finish: bool) -> Result<Progress, Error> {
            let n = input.len().min(output.len());
            output[..n].copy_from_slice(&input[..n]);
            self.finished = finish && n == input.len();
            Ok(Progress { consumed: n, produced: n, stream_end: self.finished })
        }
    }

    /// Takes half of the input and stops
    struct Lazy;

    impl StreamCompressor for Lazy {
        fn feed(&mut self, input: &[u8], _: &mut [u8], finish: bool) -> Result<Progress, Error> {
            Ok(Progress { consumed: input.len() / 2, produced: 1, stream_end: finish })
        }
    }

    #[test]
    fn window_bits() {
        assert_eq!(9, window_bits_for(0));
        assert_eq!(9, window_bits_for(1));
        assert_eq!(9, window_bits_for(512));
        assert_eq!(10, window_bits_for(513));
        assert_eq!(14, window_bits_for(16384));
        assert_eq!(15, window_bits_for(16385));
        assert_eq!(15, window_bits_for(1 << 30));
    }

    #[test]
    fn rejects_bad_config() {
        assert_eq!(20, FlateCompressor::new(10, 15, 8).err().unwrap().code());
        assert_eq!(20, FlateCompressor::new(6, 8, 8).err().unwrap().code());
        assert_eq!(20, FlateCompressor::new(6, 16, 8).err().unwrap().code());
        assert_eq!(20, FlateCompressor::new(6, 15, 9).err().unwrap().code());
        assert!(FlateCompressor::new(6, 9, 8).is_ok());
        let settings = CompressSettings { level: 11, ..CompressSettings::default() };
        assert!(!compress(&[0; 10], 5, &settings).unwrap_err().is_input_error());
    }

    #[test]
    fn compress_inflates_back() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8 ^ (i / 1000) as u8).collect();
        let z = compress(&data, 1001, &CompressSettings::default()).unwrap();
        assert!(z.len() < data.len());
        assert_eq!(data, inflate(&z));
    }

    #[test]
    fn empty_input_is_a_complete_stream() {
        let z = compress(&[], 1, &CompressSettings::default()).unwrap();
        assert!(!z.is_empty());
        assert!(inflate(&z).is_empty());
    }

    #[test]
    fn output_is_never_truncated() {
        // several full bursts per segment, and many tiny segments
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
        for segment_len in [70_000, 333, 1] {
            let input = &data[..data.len().min(segment_len * 500)];
            let mut z = Passthrough { finished: false };
            let out = deflate_segments(&mut z, input, segment_len).unwrap();
            assert_eq!(input, &out[..]);
            assert!(z.finished);
        }
    }

    #[test]
    fn unconsumed_input_is_fatal() {
        let err = deflate_segments(&mut Lazy, &[1, 2, 3, 4, 5, 6], 3).unwrap_err();
        assert_eq!(22, err.code());
        assert!(!err.is_input_error());
    }
}
