use pnmpng::*;
use std::path::PathBuf;

// top-level files create new executables, which is slower
mod roundtrip {
    mod roundtrip_test;
}

struct Decoded {
    info: png::OutputInfo,
    pixels: Vec<u8>,
}

fn decode_png(data: &[u8]) -> Decoded {
    let mut decoder = png::Decoder::new(data);
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().unwrap();
    let mut pixels = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut pixels).unwrap();
    pixels.truncate(info.buffer_size());
    Decoded { info, pixels }
}

/// Type and data of every chunk, checking lengths and CRCs on the way
fn split_chunks(png: &[u8]) -> Vec<([u8; 4], &[u8])> {
    assert_eq!(&chunk::SIGNATURE, &png[..8]);
    let mut rest = &png[8..];
    let mut chunks = Vec::new();
    while !rest.is_empty() {
        let len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
        let type_: [u8; 4] = rest[4..8].try_into().unwrap();
        let data = &rest[8..8 + len];
        let crc = u32::from_be_bytes(rest[8 + len..12 + len].try_into().unwrap());
        assert_eq!(crc32(&rest[4..8 + len]), crc);
        chunks.push((type_, data));
        rest = &rest[12 + len..];
    }
    chunks
}

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pnmpng-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

#[test]
fn plain_bitmap_2x2() {
    let png = encode_memory(b"P1\n2 2\n1 0\n0 1\n", Format::Monochrome).unwrap();
    let chunks = split_chunks(&png);
    assert_eq!(b"IHDR", &chunks[0].0);
    assert_eq!(&[0, 0, 0, 2, 0, 0, 0, 2, 1, 0, 0, 0, 0], chunks[0].1);
    assert_eq!(b"IDAT", &chunks[1].0);
    assert_eq!(b"IEND", &chunks.last().unwrap().0);
    assert_eq!(&[0xAE, 0x42, 0x60, 0x82], &png[png.len() - 4..]);

    let img = decode_png(&png);
    assert_eq!(png::ColorType::Grayscale, img.info.color_type);
    assert_eq!(png::BitDepth::One, img.info.bit_depth);
    assert_eq!((2, 2), (img.info.width, img.info.height));
    assert_eq!(1, img.info.line_size);
    assert_eq!(vec![0x40, 0x80], img.pixels);
}

#[test]
fn graymap_maxval_1_is_rescaled() {
    let png = encode_memory(b"P2 1 1 1 1", Format::Grayscale).unwrap();
    let img = decode_png(&png);
    assert_eq!(png::ColorType::Grayscale, img.info.color_type);
    assert_eq!(png::BitDepth::Eight, img.info.bit_depth);
    assert_eq!(vec![255], img.pixels);
}

#[test]
fn pixmaps() {
    let plain = encode_memory(b"P3\n# two pixels\n2 1\n255\n255 0 0  0 0 255\n", Format::FullColor).unwrap();
    let mut raw_src = b"P6 2 1 255\n".to_vec();
    raw_src.extend_from_slice(&[255, 0, 0, 0, 0, 255]);
    let raw = encode_memory(&raw_src, Format::FullColor).unwrap();
    assert_eq!(plain, raw);

    let img = decode_png(&raw);
    assert_eq!(png::ColorType::Rgb, img.info.color_type);
    assert_eq!(png::BitDepth::Eight, img.info.bit_depth);
    assert_eq!(vec![255, 0, 0, 0, 0, 255], img.pixels);
}

#[test]
fn raw_graymap() {
    let mut src = b"P5 3 2 15 ".to_vec();
    src.extend_from_slice(&[0, 1, 7, 8, 14, 15]);
    let img = decode_png(&encode_memory(&src, Format::Grayscale).unwrap());
    assert_eq!(vec![0, 17, 119, 136, 238, 255], img.pixels);
}

#[test]
fn wrong_family_is_rejected() {
    assert_eq!(1, encode_memory(b"P2 1 1 1 1", Format::FullColor).unwrap_err().code());
    assert_eq!(1, encode_memory(b"PX 1 1 1 1", Format::Grayscale).unwrap_err().code());
    assert!(encode_memory(b"P6 2 2 255\n\0\0\0", Format::FullColor).unwrap_err().is_input_error());
}

#[test]
fn large_image_spans_several_idats() {
    let (w, h) = (300, 200);
    let mut src = format!("P6 {w} {h} 255\n").into_bytes();
    let mut seed = 12345u32;
    for _ in 0..w * h * 3 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        src.push((seed >> 16) as u8);
    }
    let png = encode_memory(&src, Format::FullColor).unwrap();
    let chunks = split_chunks(&png);
    let idats: Vec<_> = chunks.iter().filter(|c| &c.0 == b"IDAT").collect();
    assert!(idats.len() > 1);
    assert!(idats[..idats.len() - 1].iter().all(|c| c.1.len() == chunk::MAX_IDAT_LEN));
    assert!(idats.last().unwrap().1.len() <= chunk::MAX_IDAT_LEN);
    assert_eq!(b"IEND", &chunks.last().unwrap().0);

    let img = decode_png(&png);
    assert_eq!(&src[src.len() - w * h * 3..], &img.pixels[..]);
}

#[test]
fn smaller_idats() {
    let mut src = String::from("P2 64 64 255\n");
    for i in 0..64 * 64 {
        src.push_str(&format!("{} ", i % 256));
    }
    let image = decode_memory(src.as_bytes(), Format::Grayscale).unwrap();
    let mut encoder = Encoder::new();
    encoder.set_max_idat_len(10);
    let stream = encoder.encode(&image).unwrap();
    assert!(stream.idat().len() > 1);
    assert!(stream.idat().all(|c| c.len() <= 10));
    let png = stream.to_vec().unwrap();
    assert_eq!(stream.encoded_len(), png.len());
    let img = decode_png(&png);
    assert_eq!((0..64 * 64).map(|i| (i % 256) as u8).collect::<Vec<_>>(), img.pixels);

    encoder.set_max_idat_len(0);
    assert_eq!(23, encoder.encode(&image).unwrap_err().code());
}

#[test]
fn zero_filter_strategy() {
    let image = decode_memory(b"P2 3 3 9 1 2 3 4 5 6 7 8 9", Format::Grayscale).unwrap();
    let mut encoder = Encoder::new();
    encoder.set_filter_strategy(FilterStrategy::ZERO);
    encoder.set_level(0);
    let png = encoder.encode_memory(&image).unwrap();
    let img = decode_png(&png);
    assert_eq!(vec![28, 57, 85, 113, 142, 170, 198, 227, 255], img.pixels);
}

#[test]
fn encode_file_writes_png() {
    let input = temp_path("in.PGM");
    let output = temp_path("out.png");
    std::fs::write(&input, b"P2\n2 2\n255\n0 64\n128 255\n").unwrap();
    encode_file(&input, &output).unwrap();
    let png = std::fs::read(&output).unwrap();
    assert_eq!(vec![0, 64, 128, 255], decode_png(&png).pixels);

    let image = decode_file(&input).unwrap();
    assert_eq!(Some(Pixel::Grey(128)), image.pixel(0, 1));
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
}

#[test]
fn bad_input_leaves_no_output() {
    let input = temp_path("in.txt");
    let output = temp_path("bad-ext.png");
    std::fs::write(&input, b"P2 1 1 1 1").unwrap();
    assert_eq!(5, encode_file(&input, &output).unwrap_err().code());
    assert!(!output.exists());

    let input = temp_path("truncated.ppm");
    let output = temp_path("truncated.png");
    std::fs::write(&input, b"P3 2 2 255 1 2 3").unwrap();
    assert_eq!(4, encode_file(&input, &output).unwrap_err().code());
    assert!(!output.exists());

    let missing = temp_path("missing.pbm");
    assert_eq!(78, encode_file(&missing, &output).unwrap_err().code());
    let _ = std::fs::remove_file(temp_path("in.txt"));
    let _ = std::fs::remove_file(temp_path("truncated.ppm"));
}
