//! rawdev: apply an edit history to an image and export the render.
//!
//! Loads an image, optionally replays a JSON history document or a legacy
//! XMP sidecar onto the default pipeline, applies individual parameter
//! overrides, then renders and encodes the result.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin rawdev -- [OPTIONS] <IMAGE>
//! rawdev photo.png --set exposure.exposure=1.5 --enable sharpen -o out.jpg
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use rawdev_export::OutputFormat;
use rawdev_pipeline::{
    Engine, EngineConfig, EngineError, FieldKind, ImageLoader, ParamValue, Pipeline, StandardLoader,
};
use tracing_subscriber::EnvFilter;

/// Apply edit history to an image and export the render.
#[derive(Parser)]
#[command(name = "rawdev", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, TIFF).
    #[arg(required_unless_present = "list")]
    image: Option<PathBuf>,

    /// JSON history document to load.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Legacy XMP sidecar to load (after `--history`).
    #[arg(long)]
    xmp: Option<PathBuf>,

    /// Parameter override as `module.field=value`. Repeatable.
    #[arg(long = "set", value_name = "MODULE.FIELD=VALUE")]
    sets: Vec<String>,

    /// Enable a module. Repeatable.
    #[arg(long = "enable", value_name = "MODULE")]
    enables: Vec<String>,

    /// Disable a module. Repeatable.
    #[arg(long = "disable", value_name = "MODULE")]
    disables: Vec<String>,

    /// Render scale relative to the full image.
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Render only this region, as `x,y,w,h` in full-resolution pixels.
    #[arg(long, value_parser = parse_region)]
    region: Option<RegionArg>,

    /// Write the render to this file. The extension picks the format.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = rawdev_export::DEFAULT_JPEG_QUALITY)]
    quality: u8,

    /// PNG bit depth.
    #[arg(long, default_value_t = 8, value_parser = parse_bits)]
    bits: u8,

    /// Write the resulting history document to this file.
    #[arg(long)]
    write_history: Option<PathBuf>,

    /// Write the resulting state as a legacy XMP sidecar.
    #[arg(long)]
    write_xmp: Option<PathBuf>,

    /// Disable tiling regardless of memory use.
    #[arg(long)]
    no_tiling: bool,

    /// Working-memory ceiling in bytes above which renders are tiled.
    #[arg(long, default_value_t = EngineConfig::DEFAULT_TILE_MEMORY_LIMIT)]
    tile_memory_limit: usize,

    /// Smallest tile edge in pixels.
    #[arg(long, default_value_t = EngineConfig::DEFAULT_MIN_TILE_SIZE)]
    min_tile_size: u32,

    /// Full engine config as a JSON string.
    ///
    /// When provided, the individual tiling flags are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// List the registered modules and their parameters, then exit.
    #[arg(long)]
    list: bool,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug)]
struct RegionArg {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

fn parse_region(s: &str) -> Result<RegionArg, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,w,h, got {s:?}"));
    };
    let bad = |what: &str, v: &str| format!("invalid {what} {v:?}");
    Ok(RegionArg {
        x: x.parse().map_err(|_| bad("x", x))?,
        y: y.parse().map_err(|_| bad("y", y))?,
        width: w.parse().map_err(|_| bad("width", w))?,
        height: h.parse().map_err(|_| bad("height", h))?,
    })
}

fn parse_bits(s: &str) -> Result<u8, String> {
    match s {
        "8" => Ok(8),
        "16" => Ok(16),
        _ => Err(format!("bit depth must be 8 or 16, got {s:?}")),
    }
}

/// Split `module.field=value`.
fn split_assignment(s: &str) -> Option<(&str, &str, &str)> {
    let (target, value) = s.split_once('=')?;
    let (module, field) = target.split_once('.')?;
    Some((module.trim(), field.trim(), value.trim()))
}

/// Parse `text` as a value for a field of `kind`.
fn parse_value(kind: FieldKind, text: &str) -> Option<ParamValue> {
    match kind {
        FieldKind::Float => text.parse().ok().map(ParamValue::Float),
        FieldKind::Int => text.parse().ok().map(ParamValue::Int),
        FieldKind::UInt => text.parse().ok().map(ParamValue::UInt),
        FieldKind::Bool => match text {
            "true" | "on" | "1" => Some(ParamValue::Bool(true)),
            "false" | "off" | "0" => Some(ParamValue::Bool(false)),
            _ => None,
        },
    }
}

/// Build the engine config from `--config-json` or the individual flags.
fn config_from_cli(cli: &Cli) -> Result<EngineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }
    Ok(EngineConfig {
        tiling: !cli.no_tiling,
        tile_memory_limit: cli.tile_memory_limit,
        min_tile_size: cli.min_tile_size,
    })
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_modules(engine: &Engine) {
    for descriptor in engine.registry().iter() {
        println!(
            "{} v{} ({})",
            descriptor.name(),
            descriptor.version(),
            if descriptor.default_enabled() {
                "on by default"
            } else {
                "off by default"
            }
        );
        for field in descriptor.layout().fields {
            println!(
                "    {:<28} {:<6} default {} [{}, {}]",
                field.name,
                field.kind.to_string(),
                field.default,
                field.min,
                field.max
            );
        }
    }
}

fn engine_error(context: &str, e: &EngineError) -> String {
    format!("{context}: {e} (code {})", e.kind().code())
}

fn read_text(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

/// Replay history files and command-line edits onto `pipeline`.
fn apply_edits(cli: &Cli, engine: &Engine, pipeline: &mut Pipeline<'_>) -> Result<(), String> {
    if let Some(ref path) = cli.history {
        let text = read_text(path)?;
        pipeline
            .load_history(&text)
            .map_err(|e| engine_error(&format!("Loading {}", path.display()), &e))?;
        tracing::info!(path = %path.display(), "history loaded");
    }
    if let Some(ref path) = cli.xmp {
        pipeline
            .read_xmp_file(path)
            .map_err(|e| engine_error(&format!("Loading {}", path.display()), &e))?;
        tracing::info!(path = %path.display(), "sidecar loaded");
    }

    for assignment in &cli.sets {
        let (module, field, text) = split_assignment(assignment)
            .ok_or_else(|| format!("--set expects module.field=value, got {assignment:?}"))?;
        let kind = engine
            .registry()
            .find(module)
            .and_then(|d| d.layout().field(field))
            .map(|(_, desc)| desc.kind)
            .ok_or_else(|| format!("--set {assignment}: no parameter {module}.{field}"))?;
        let value = parse_value(kind, text)
            .ok_or_else(|| format!("--set {assignment}: {text:?} is not a valid {kind}"))?;
        pipeline
            .set_param(module, field, value)
            .map_err(|e| engine_error(&format!("--set {assignment}"), &e))?;
    }
    for module in &cli.enables {
        pipeline
            .enable_module(module, true)
            .map_err(|e| engine_error(&format!("--enable {module}"), &e))?;
    }
    for module in &cli.disables {
        pipeline
            .enable_module(module, false)
            .map_err(|e| engine_error(&format!("--disable {module}"), &e))?;
    }
    Ok(())
}

fn run(cli: &Cli, loader: &dyn ImageLoader) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let engine = Engine::new().with_config(config);

    if cli.list {
        list_modules(&engine);
        return Ok(());
    }
    let Some(ref image_path) = cli.image else {
        return Err("an input image is required".into());
    };

    let image = loader
        .load(image_path)
        .map_err(|e| engine_error(&format!("Reading {}", image_path.display()), &e))?;
    tracing::info!(
        path = %image_path.display(),
        width = image.width(),
        height = image.height(),
        "image loaded"
    );

    let mut pipeline = engine
        .create_pipeline(&image)
        .map_err(|e| engine_error("Creating pipeline", &e))?;
    apply_edits(cli, &engine, &mut pipeline)?;

    if let Some(ref path) = cli.write_history {
        let text = pipeline
            .serialize_history()
            .map_err(|e| engine_error("Serializing history", &e))?;
        std::fs::write(path, text)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "history written");
    }
    if let Some(ref path) = cli.write_xmp {
        pipeline
            .write_xmp_file(path)
            .map_err(|e| engine_error(&format!("Writing {}", path.display()), &e))?;
    }

    let Some(ref output) = cli.output else {
        return Ok(());
    };
    let format = OutputFormat::from_path(output, cli.bits, cli.quality).ok_or_else(|| {
        format!(
            "Cannot tell the output format of {}; use .png, .jpg or .tif",
            output.display()
        )
    })?;

    let start = Instant::now();
    let result = match cli.region {
        Some(r) => pipeline.render_region(r.x, r.y, r.width, r.height, cli.scale),
        None => pipeline.render(cli.scale),
    }
    .map_err(|e| engine_error("Rendering", &e))?;
    tracing::info!(
        width = result.width(),
        height = result.height(),
        elapsed_ms = start.elapsed().as_millis(),
        "rendered"
    );

    let bytes = rawdev_export::encode(&result, format).map_err(|e| format!("Exporting: {e}"))?;
    std::fs::write(output, &bytes)
        .map_err(|e| format!("Error writing {}: {e}", output.display()))?;
    eprintln!(
        "Wrote {} ({}x{}, {} bytes)",
        output.display(),
        result.width(),
        result.height(),
        bytes.len()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli, &StandardLoader) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn assignment_splits_on_first_dot_and_equals() {
        assert_eq!(
            split_assignment("exposure.exposure=1.5"),
            Some(("exposure", "exposure", "1.5"))
        );
        assert_eq!(
            split_assignment("levels.levels[0]=0.1"),
            Some(("levels", "levels[0]", "0.1"))
        );
        assert_eq!(split_assignment("exposure=1"), None);
        assert_eq!(split_assignment("exposure.exposure"), None);
    }

    #[test]
    fn values_parse_by_field_kind() {
        assert_eq!(parse_value(FieldKind::Float, "1"), Some(ParamValue::Float(1.0)));
        assert_eq!(parse_value(FieldKind::Int, "-3"), Some(ParamValue::Int(-3)));
        assert_eq!(parse_value(FieldKind::UInt, "-3"), None);
        assert_eq!(parse_value(FieldKind::Bool, "on"), Some(ParamValue::Bool(true)));
        assert_eq!(parse_value(FieldKind::Bool, "maybe"), None);
    }

    #[test]
    fn region_parses_four_numbers() {
        let r = parse_region("10, 20,300,200").unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (10, 20, 300, 200));
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("1,2,3,four").is_err());
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::parse_from([
            "rawdev",
            "in.png",
            "--no-tiling",
            "--config-json",
            r#"{"tiling": true, "min_tile_size": 16}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert!(config.tiling);
        assert_eq!(config.min_tile_size, 16);
        assert_eq!(config.tile_memory_limit, EngineConfig::DEFAULT_TILE_MEMORY_LIMIT);
    }

    struct Flat;

    impl ImageLoader for Flat {
        fn load(&self, path: &Path) -> Result<rawdev_pipeline::SourceImage, EngineError> {
            if path.ends_with("missing.png") {
                return Err(EngineError::NotFound {
                    what: "file",
                    name: path.display().to_string(),
                });
            }
            rawdev_pipeline::SourceImage::from_linear(8, 6, 3, vec![0.25; 8 * 6 * 3])
        }
    }

    #[test]
    fn run_uses_the_given_loader() {
        let cli = Cli::parse_from(["rawdev", "flat.png", "--set", "exposure.exposure=1.5"]);
        assert!(run(&cli, &Flat).is_ok());

        let cli = Cli::parse_from(["rawdev", "missing.png"]);
        let err = run(&cli, &Flat).unwrap_err();
        assert!(err.starts_with("Reading missing.png") && err.ends_with("(code -3)"), "{err}");

        let cli = Cli::parse_from(["rawdev", "flat.png", "--set", "exposure.exposure=lots"]);
        let err = run(&cli, &Flat).unwrap_err();
        assert!(err.contains("is not a valid float"), "{err}");
    }

    #[test]
    fn list_needs_no_image() {
        let cli = Cli::try_parse_from(["rawdev", "--list"]).unwrap();
        assert!(cli.list && cli.image.is_none());
        assert!(Cli::try_parse_from(["rawdev"]).is_err());
    }
}
