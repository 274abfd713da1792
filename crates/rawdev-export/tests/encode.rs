//! Integration tests: rendered pipelines encoded, written and read back.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rawdev_export::{OutputFormat, encode, encode_jpeg, encode_png, encode_png16, encode_tiff};
use rawdev_pipeline::{Engine, RenderResult, SourceImage};

fn gradient(width: u32, height: u32) -> SourceImage {
    let samples = (0..height)
        .flat_map(|y| {
            (0..width).flat_map(move |x| {
                let fx = x as f32 / width as f32;
                let fy = y as f32 / height as f32;
                [fx, fy, 0.5 * (fx + fy)]
            })
        })
        .collect();
    SourceImage::from_linear(width, height, 3, samples).unwrap()
}

fn rendered(scale: f32) -> RenderResult {
    let engine = Engine::new();
    let image = gradient(37, 23);
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.set_float("exposure", "exposure", 0.5).unwrap();
    pipeline.render(scale).unwrap()
}

#[test]
fn every_encoder_decodes_to_the_same_dimensions() {
    let result = rendered(1.0);
    let dims = (result.width(), result.height());
    for bytes in [
        encode_png(&result).unwrap(),
        encode_png16(&result).unwrap(),
        encode_jpeg(&result, 85).unwrap(),
        encode_tiff(&result).unwrap(),
    ] {
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), dims);
    }
}

#[test]
fn png_matches_render_pixels() {
    let result = rendered(0.5);
    let decoded = image::load_from_memory(&encode_png(&result).unwrap())
        .unwrap()
        .to_rgba8();
    for (x, y) in [(0, 0), (5, 3), (result.width() - 1, result.height() - 1)] {
        assert_eq!(Some(decoded.get_pixel(x, y).0), result.pixel(x, y));
    }
}

#[test]
fn padded_rows_are_not_leaked() {
    let source = rendered(1.0);
    let stride = source.stride() + 12;
    let mut pixels = vec![0xAB; stride * source.height() as usize];
    for y in 0..source.height() {
        let row = source.row(y).unwrap();
        let start = y as usize * stride;
        pixels[start..start + row.len()].copy_from_slice(row);
    }
    let padded = RenderResult::from_rgba8(source.width(), source.height(), stride, pixels).unwrap();

    assert_eq!(encode_png(&padded).unwrap(), encode_png(&source).unwrap());
    assert_eq!(encode_tiff(&padded).unwrap(), encode_tiff(&source).unwrap());
}

#[test]
fn files_written_by_extension_read_back() {
    let result = rendered(1.0);
    let dir = tempfile::tempdir().unwrap();
    for (name, bits) in [("out.png", 8), ("deep.png", 16), ("out.jpg", 8), ("out.tiff", 8)] {
        let path = dir.path().join(name);
        let format = OutputFormat::from_path(&path, bits, 90).unwrap();
        std::fs::write(&path, encode(&result, format).unwrap()).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(
            (decoded.width(), decoded.height()),
            (result.width(), result.height()),
            "{name}"
        );
        if bits == 16 {
            assert!(matches!(decoded, image::DynamicImage::ImageRgba16(_)));
        }
    }
}
