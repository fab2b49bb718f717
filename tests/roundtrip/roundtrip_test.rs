use pnmpng::*;

const SIZES: [usize; 10] = [1, 2, 3, 7, 8, 9, 15, 16, 17, 64];

#[test]
fn roundtrip_mono() {
    roundtrip_format(Format::Monochrome, 1);
}

#[test]
fn roundtrip_grey() {
    roundtrip_format(Format::Grayscale, 255);
}

#[test]
fn roundtrip_grey_low_maxval() {
    roundtrip_format(Format::Grayscale, 7);
}

#[test]
fn roundtrip_rgb() {
    roundtrip_format(Format::FullColor, 255);
}

#[test]
fn roundtrip_rgb_low_maxval() {
    roundtrip_format(Format::FullColor, 100);
}

#[track_caller]
fn roundtrip_format(format: Format, maxval: u32) {
    let mut seed = 0x2545_F491u32;
    for width in SIZES {
        for height in [1, 2, 5, 17] {
            let samples: Vec<u32> = (0..width * height * format.channels())
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    // runs of equal values so that every filter type gets picked sometimes
                    if seed % 4 == 0 { 0 } else { seed % (maxval + 1) }
                })
                .collect();
            for raw in [false, true] {
                let src = netpbm(format, raw, width, height, maxval, &samples);
                for strategy in [FilterStrategy::ZERO, FilterStrategy::MINSUM] {
                    let image = decode_memory(&src, format).unwrap();
                    let mut encoder = Encoder::new();
                    encoder.set_filter_strategy(strategy);
                    let png = encoder.encode_memory(&image).unwrap();
                    assert_eq!(expected_rows(format, width, maxval, &samples), decode_rows(&png), "{format:?} {width}x{height} raw={raw}");
                }
            }
        }
    }
}

fn netpbm(format: Format, raw: bool, width: usize, height: usize, maxval: u32, samples: &[u32]) -> Vec<u8> {
    let magic = match (format, raw) {
        (Format::Monochrome, false) => "P1",
        (Format::Grayscale, false) => "P2",
        (Format::FullColor, false) => "P3",
        (Format::Monochrome, true) => "P4",
        (Format::Grayscale, true) => "P5",
        (Format::FullColor, true) => "P6",
    };
    let mut out = format!("{magic}\n# roundtrip\n{width} {height}\n").into_bytes();
    if format != Format::Monochrome {
        out.extend_from_slice(format!("{maxval}\n").as_bytes());
    }
    match (format, raw) {
        (Format::Monochrome, true) => {
            let mut bytes = vec![0u8; (samples.len() + 7) / 8];
            for (i, &s) in samples.iter().enumerate() {
                if s != 0 {
                    bytes[i / 8] |= 0x80 >> (i % 8);
                }
            }
            out.extend_from_slice(&bytes);
        },
        (_, true) => out.extend(samples.iter().map(|&s| s as u8)),
        (_, false) => {
            for line in samples.chunks(width * format.channels()) {
                let line: Vec<String> = line.iter().map(|s| s.to_string()).collect();
                out.extend_from_slice(line.join(" ").as_bytes());
                out.push(b'\n');
            }
        },
    }
    out
}

/// Scanlines the PNG should hold
fn expected_rows(format: Format, width: usize, maxval: u32, samples: &[u32]) -> Vec<Vec<u8>> {
    let row_samples = width * format.channels();
    samples
        .chunks(row_samples)
        .map(|line| match format {
            Format::Monochrome => {
                let mut row = vec![0u8; (width + 7) / 8];
                for (x, &ink) in line.iter().enumerate() {
                    if ink == 0 {
                        row[x / 8] |= 0x80 >> (x % 8);
                    }
                }
                row
            },
            _ => line.iter().map(|&s| ((s * 255 * 2 + maxval) / (maxval * 2)) as u8).collect(),
        })
        .collect()
}

fn decode_rows(png: &[u8]) -> Vec<Vec<u8>> {
    let mut decoder = png::Decoder::new(png);
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().unwrap();
    let mut rows = Vec::new();
    while let Some(row) = reader.next_row().unwrap() {
        rows.push(row.data().to_vec());
    }
    rows
}
