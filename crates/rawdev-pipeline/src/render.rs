//! Render execution.
//!
//! A render commits every enabled module into a [`Kernel`], resolves the
//! requested region through the chain, runs the kernels (tile by tile when
//! the plan exceeds the memory ceiling) and converts the final float
//! buffer to 8-bit RGBA.

use crate::buffer::PixelBuffer;
use crate::error::{AllocError, EngineError, ModuleError};
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind};
use crate::params::ParamRecord;
use crate::roi::{self, StepRegions};
use crate::source::SourceImage;
use crate::tiling;
use crate::types::{EngineConfig, Region};

// ───────────────────────────── commit ──────────────────────────────

/// One committed module.
struct Stage {
    name: &'static str,
    tileable: bool,
    kernel: Box<dyn Kernel>,
}

impl Stage {
    fn fail(&self, error: ModuleError) -> EngineError {
        render_error(self.name, error)
    }
}

/// Attribute a kernel failure to `module`; allocation failures stay
/// [`EngineError::NoMemory`].
fn render_error(module: &str, error: ModuleError) -> EngineError {
    match error {
        ModuleError::Alloc(alloc) => alloc.into(),
        source => EngineError::Render {
            module: module.to_owned(),
            source,
        },
    }
}

/// The kernels of one render, in chain order.
pub struct CommittedChain {
    stages: Vec<Stage>,
    source_frame: Region,
    output_frame: Region,
}

impl std::fmt::Debug for CommittedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.stages.iter().map(|s| s.name).collect();
        f.debug_struct("CommittedChain")
            .field("stages", &names)
            .field("source_frame", &self.source_frame)
            .field("output_frame", &self.output_frame)
            .finish()
    }
}

impl CommittedChain {
    /// Commit `modules` (enabled instances, in chain order) for a render
    /// of `image` at `scale`.
    ///
    /// Each module sees the full frame as shaped by the modules before it.
    ///
    /// # Errors
    ///
    /// [`EngineError::Render`] naming the module whose parameters could
    /// not be committed.
    pub fn commit<'a>(
        modules: impl IntoIterator<Item = (&'a dyn ModuleKind, &'a ParamRecord)>,
        image: &SourceImage,
        scale: f32,
    ) -> Result<Self, EngineError> {
        let full = image.dimensions().scaled(scale);
        let source_frame = full.full_region(scale);
        let mut frame = source_frame;
        let mut stages = Vec::new();
        for (kind, params) in modules {
            let ctx = CommitContext {
                image,
                scale,
                full,
                frame,
            };
            let stage_name = kind.name();
            let kernel = kind
                .commit_params(params, &ctx)
                .map_err(|e| render_error(stage_name, e))?;
            frame = kernel.compute_output_region(&frame);
            stages.push(Stage {
                name: stage_name,
                tileable: kind.flags().contains(ModuleFlags::ALLOW_TILING),
                kernel,
            });
        }
        Ok(Self {
            stages,
            source_frame,
            output_frame: frame,
        })
    }

    /// The full frame after every committed module.
    #[must_use]
    pub const fn output_frame(&self) -> Region {
        self.output_frame
    }

    /// Names of the committed modules.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|s| s.name)
    }

    /// Produce the pixels of `request` (a region of the scaled source
    /// frame) through the whole chain.
    ///
    /// # Errors
    ///
    /// [`EngineError::Render`] when a kernel fails, [`EngineError::NoMemory`]
    /// when a buffer cannot be allocated.
    pub fn execute(
        &self,
        image: &SourceImage,
        request: &Region,
        config: &EngineConfig,
    ) -> Result<PixelBuffer, EngineError> {
        let kernels = kernel_refs(&self.stages);
        let plan = roi::resolve(&kernels, request, &self.source_frame);
        tracing::debug!(
            source = ?plan.source,
            output = ?plan.output,
            steps = plan.steps.len(),
            peak_bytes = plan.peak_bytes(4),
            "resolved render plan"
        );

        if !tiling::needs_tiling(&plan, config) {
            let input = PixelBuffer::import(image, &plan.source)?;
            return run(&self.stages, &plan.steps, input);
        }

        // The stitched result must fit before the grid is laid out.
        PixelBuffer::ensure_allocatable(&plan.output, 4)?;
        let tileable: Vec<bool> = self.stages.iter().map(|s| s.tileable).collect();
        let mut input = Input::Source(image);
        for segment in tiling::segments(&tileable) {
            let stages = &self.stages[segment.range.clone()];
            let steps = &plan.steps[segment.range];
            let (Some(first), Some(last)) = (steps.first(), steps.last()) else {
                continue;
            };
            let buffer = if segment.tiled {
                Self::run_tiled(stages, &input, &first.input, &last.output, config)?
            } else {
                tracing::debug!(module = stages[0].name, "non-tileable module runs on the full region");
                run(stages, steps, input.fetch(&first.input)?)?
            };
            input = Input::Buffer(buffer);
        }
        match input {
            Input::Buffer(buffer) => Ok(buffer),
            Input::Source(image) => Ok(PixelBuffer::import(image, &plan.source)?),
        }
    }

    fn run_tiled(
        stages: &[Stage],
        input: &Input<'_>,
        available: &Region,
        output: &Region,
        config: &EngineConfig,
    ) -> Result<PixelBuffer, EngineError> {
        let kernels = kernel_refs(stages);
        let overlap = stages
            .iter()
            .fold(0_u32, |sum, s| sum.saturating_add(s.kernel.overlap()));
        let side = tiling::core_side(config.tile_memory_limit, config.min_tile_size, overlap);
        let cores = tiling::grid(output, side);
        tracing::debug!(
            first = stages[0].name,
            modules = stages.len(),
            tiles = cores.len(),
            side,
            overlap,
            "tiling segment"
        );

        let mut stitched: Option<PixelBuffer> = None;
        for core in cores {
            let padded = core.expand(overlap).clamp_to(output);
            let plan = roi::resolve(&kernels, &padded, available);
            let tile = run(stages, &plan.steps, input.fetch(&plan.source)?)?;
            let piece = tile.extract(&core)?;
            if stitched.is_none() {
                stitched = Some(PixelBuffer::new(*output, piece.channels())?);
            }
            if let Some(buffer) = stitched.as_mut() {
                buffer.blit(&piece);
            }
        }
        match stitched {
            Some(buffer) => Ok(buffer),
            None => Ok(input.fetch(output)?),
        }
    }
}

fn kernel_refs(stages: &[Stage]) -> Vec<&dyn Kernel> {
    stages.iter().map(|s| s.kernel.as_ref()).collect()
}

/// Where a segment reads its input from.
enum Input<'a> {
    Source(&'a SourceImage),
    Buffer(PixelBuffer),
}

impl Input<'_> {
    fn fetch(&self, region: &Region) -> Result<PixelBuffer, AllocError> {
        match self {
            Self::Source(image) => PixelBuffer::import(image, region),
            Self::Buffer(buffer) => buffer.extract(region),
        }
    }
}

/// Run `stages` over their resolved `steps`, starting from `buffer`.
fn run(
    stages: &[Stage],
    steps: &[StepRegions],
    mut buffer: PixelBuffer,
) -> Result<PixelBuffer, EngineError> {
    for (stage, step) in stages.iter().zip(steps) {
        if stage.kernel.is_passthrough() {
            continue;
        }
        let next = stage
            .kernel
            .process(&buffer, &step.output)
            .map_err(|e| stage.fail(e))?;
        if !next.region().same_rect(&step.output) {
            return Err(stage.fail(ModuleError::Failed {
                module: stage.name,
                reason: format!(
                    "kernel produced {:?}, plan expected {:?}",
                    next.region(),
                    step.output
                ),
            }));
        }
        buffer = next;
    }
    Ok(buffer)
}

// ───────────────────────── final conversion ──────────────────────────

/// A rendered image: 8-bit RGBA, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    width: u32,
    height: u32,
    stride: usize,
    pixels: Vec<u8>,
}

impl RenderResult {
    /// Wrap existing RGBA8 rows.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] if the dimensions are zero,
    /// `stride < width * 4`, or `pixels` is shorter than `stride * height`.
    pub fn from_rgba8(
        width: u32,
        height: u32,
        stride: usize,
        pixels: Vec<u8>,
    ) -> Result<Self, EngineError> {
        let row = width as usize * 4;
        let needed = stride.checked_mul(height as usize);
        if width == 0 || height == 0 || stride < row || needed.is_none_or(|n| pixels.len() < n) {
            return Err(EngineError::invalid(format!(
                "{} bytes cannot hold {width}x{height} RGBA rows of stride {stride}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            pixels,
        })
    }

    /// Convert a linear float buffer: sRGB transfer on color, alpha kept
    /// linear, both clamped to `[0, 1]`. Mono buffers become gray.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoMemory`] if the output cannot be allocated.
    pub fn from_buffer(buffer: &PixelBuffer) -> Result<Self, EngineError> {
        let region = buffer.region();
        let (width, height) = (region.width, region.height);
        let len = region.area().checked_mul(4).ok_or(AllocError {
            bytes: usize::MAX,
            width,
            height,
        })?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len).map_err(|_| AllocError {
            bytes: len,
            width,
            height,
        })?;
        let channels = buffer.channels();
        for px in buffer.data().chunks_exact(channels) {
            if channels == 1 {
                let v = to_byte(linear_to_srgb(px[0]));
                pixels.extend([v, v, v, u8::MAX]);
            } else {
                pixels.extend([
                    to_byte(linear_to_srgb(px[0])),
                    to_byte(linear_to_srgb(px[1])),
                    to_byte(linear_to_srgb(px[2])),
                    to_byte(px[3]),
                ]);
            }
        }
        Ok(Self {
            width,
            height,
            stride: width as usize * 4,
            pixels,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Bytes between the starts of consecutive rows.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// All bytes, rows `stride` apart.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// The `width * 4` pixel bytes of row `y`.
    #[must_use]
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        self.pixels.get(start..start + self.width as usize * 4)
    }

    /// RGBA of the pixel at `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width {
            return None;
        }
        let at = x as usize * 4;
        self.row(y)
            .and_then(|row| row.get(at..at + 4))
            .map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Consume, keeping the bytes.
    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// The sRGB transfer function.
#[must_use]
pub fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055f32.mul_add(v.powf(1.0 / 2.4), -0.055)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_byte(v: f32) -> u8 {
    v.clamp(0.0, 1.0).mul_add(255.0, 0.5) as u8
}
