//! Integration tests: region resolution, tiling and failure reporting
//! through full renders.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use rawdev_pipeline::{
    CommitContext, Engine, EngineConfig, EngineError, ErrorKind, FieldDesc, Kernel, ModuleError,
    ModuleFlags, ModuleKind, ParamLayout, ParamRecord, PixelBuffer, Region, Registry, SourceImage,
    linear_to_srgb,
};

fn noise(width: u32, height: u32) -> SourceImage {
    let mut state = 0x2545_f491_u32;
    let samples = (0..width * height * 3)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 1000) as f32 / 1000.0
        })
        .collect();
    SourceImage::from_linear(width, height, 3, samples).unwrap()
}

fn tiny_ceiling() -> EngineConfig {
    EngineConfig {
        tiling: true,
        tile_memory_limit: 8 * 1024,
        min_tile_size: 4,
    }
}

#[test]
fn no_op_crop_region_dimensions() {
    let engine = Engine::new();
    let image = noise(200, 160);
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.enable_module("crop", true).unwrap();
    for (field, value) in [("cx", 0.0), ("cy", 0.0), ("cw", 1.0), ("ch", 1.0)] {
        pipeline.set_float("crop", field, value).unwrap();
    }
    for (x, y, w, h, scale) in [
        (10, 20, 101, 51, 0.5),
        (0, 0, 200, 160, 1.0),
        (33, 7, 64, 64, 0.25),
        (5, 5, 40, 30, 1.5),
    ] {
        let out = pipeline.render_region(x, y, w, h, scale).unwrap();
        let expect_w = (f64::from(w) * f64::from(scale)).floor() as u32;
        let expect_h = (f64::from(h) * f64::from(scale)).floor() as u32;
        assert_eq!((out.width(), out.height()), (expect_w, expect_h));
    }
}

#[test]
fn crop_aligns_to_three_by_two() {
    let engine = Engine::new();
    let image = SourceImage::from_linear(1000, 1000, 1, vec![0.5; 1000 * 1000]).unwrap();
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.enable_module("crop", true).unwrap();
    pipeline.set_int("crop", "ratio_d", 3).unwrap();
    pipeline.set_int("crop", "ratio_n", 2).unwrap();

    let dims = pipeline.output_dimensions(1.0).unwrap();
    let (w, h) = (i64::from(dims.width), i64::from(dims.height));
    assert!((w * 2 - h * 3).abs() <= 3, "{w}x{h}");
    assert_eq!(w, 999);

    let out = pipeline.render(0.25).unwrap();
    let (w, h) = (i64::from(out.width()), i64::from(out.height()));
    assert!((w * 2 - h * 3).abs() <= 3, "{w}x{h}");
}

#[test]
fn portrait_ratio_flips() {
    let engine = Engine::new();
    let image = noise(120, 120);
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.enable_module("crop", true).unwrap();
    pipeline.set_int("crop", "ratio_d", -3).unwrap();
    pipeline.set_int("crop", "ratio_n", 2).unwrap();
    let dims = pipeline.output_dimensions(1.0).unwrap();
    assert!(dims.height > dims.width);
}

#[test]
fn tiled_render_equals_untiled() {
    let image = noise(61, 47);
    let untiled = Engine::new().with_config(EngineConfig {
        tiling: false,
        ..EngineConfig::default()
    });
    let tiled = Engine::new().with_config(tiny_ceiling());

    let mut renders = Vec::new();
    for engine in [&untiled, &tiled] {
        let mut pipeline = engine.create_pipeline(&image).unwrap();
        pipeline.set_float("exposure", "exposure", 0.4).unwrap();
        pipeline.enable_module("sharpen", true).unwrap();
        pipeline.set_float("sharpen", "radius", 3.0).unwrap();
        pipeline.enable_module("vignette", true).unwrap();
        pipeline.enable_module("crop", true).unwrap();
        pipeline.set_float("crop", "cx", 0.1).unwrap();
        pipeline.set_float("crop", "ch", 0.85).unwrap();
        renders.push(pipeline.render(1.0).unwrap());
    }
    assert_eq!(renders[0], renders[1]);
}

#[test]
fn non_tileable_module_renders_under_tiny_ceiling() {
    let image = noise(40, 30);
    let engine = Engine::new().with_config(tiny_ceiling());
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.enable_module("levels", true).unwrap();
    pipeline.set_int("levels", "mode", 1).unwrap();
    pipeline.enable_module("sharpen", true).unwrap();
    let tiled = pipeline.render(1.0).unwrap();
    assert_eq!((tiled.width(), tiled.height()), (40, 30));

    let untiled_engine = Engine::new().with_config(EngineConfig {
        tiling: false,
        ..EngineConfig::default()
    });
    let mut reference = untiled_engine.create_pipeline(&image).unwrap();
    reference
        .load_history(&pipeline.serialize_history().unwrap())
        .unwrap();
    assert_eq!(reference.render(1.0).unwrap(), tiled);
}

#[test]
fn enormous_scale_is_out_of_memory() {
    let image = noise(8, 6);
    let untiled = Engine::new().with_config(EngineConfig {
        tiling: false,
        ..EngineConfig::default()
    });
    for engine in [Engine::new(), untiled] {
        let pipeline = engine.create_pipeline(&image).unwrap();
        let err = pipeline.render(1.0e9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMemory);
        assert_eq!(err.kind().code(), -6);
        assert!(rawdev_pipeline::last_error().is_some());
    }
}

#[test]
fn bad_profile_surfaces_render_error() {
    let engine = Engine::new();
    let image = noise(8, 8);
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.set_int("colorin", "type", 9).unwrap();
    let err = pipeline.render(1.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Render);
    assert!(matches!(err, EngineError::Render { ref module, .. } if module == "colorin"));
    assert_eq!(err.kind().code(), -11);
}

static FAIL_FIELDS: [FieldDesc; 1] = [FieldDesc::float("strength", 1.0, 0.0, 1.0)];
static FAIL_LAYOUT: ParamLayout = ParamLayout::new(1, &FAIL_FIELDS);

/// A module whose kernel always fails.
struct Broken;

struct BrokenKernel;

impl Kernel for BrokenKernel {
    fn process(&self, _: &PixelBuffer, _: &Region) -> Result<PixelBuffer, ModuleError> {
        Err(ModuleError::Failed {
            module: "broken",
            reason: "sensor on fire".into(),
        })
    }
}

impl ModuleKind for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn layout(&self) -> &'static ParamLayout {
        &FAIL_LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn commit_params(
        &self,
        _: &ParamRecord,
        _: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        Ok(Box::new(BrokenKernel))
    }
}

#[test]
fn kernel_failure_names_the_module() {
    let registry = Registry::builtin().with(Broken).unwrap();
    let engine = Engine::with_registry(registry);
    let image = noise(8, 8);
    let pipeline = engine.create_pipeline(&image).unwrap();
    assert_eq!(pipeline.module_name(pipeline.module_count() - 1), Some("broken"));

    let err = pipeline.render(1.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Render);
    let message = rawdev_pipeline::last_error().unwrap();
    assert!(message.contains("broken") && message.contains("sensor on fire"), "{message}");
}

#[test]
fn srgb_endpoints() {
    assert_eq!(linear_to_srgb(0.0), 0.0);
    assert!((linear_to_srgb(1.0) - 1.0).abs() < 1e-6);
    assert!((linear_to_srgb(0.003_130_8) - 0.040_45).abs() < 1e-4);

    let engine = Engine::new();
    for (value, expected) in [(0.0, 0), (1.0, 255), (2.0, 255)] {
        let image = SourceImage::from_linear(1, 1, 3, vec![value; 3]).unwrap();
        let pipeline = engine.create_pipeline(&image).unwrap();
        let out = pipeline.render(1.0).unwrap();
        assert_eq!(out.pixel(0, 0), Some([expected, expected, expected, 255]));
    }
}
