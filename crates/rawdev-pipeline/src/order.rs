//! Canonical module chain order.
//!
//! A pipeline's order is fixed when it is created. The order tag is
//! written into history documents so a reader can tell which ordering the
//! parameters were authored against.

use crate::registry::{ModuleDescriptor, Registry};

/// A named total order over module names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOrder {
    tag: &'static str,
    names: &'static [&'static str],
}

/// The `v5.0` scene-referred order.
pub const V50: ChainOrder = ChainOrder {
    tag: "v5.0",
    names: &[
        "rawprepare",
        "invert",
        "temperature",
        "rasterfile",
        "highlights",
        "cacorrect",
        "hotpixels",
        "rawdenoise",
        "demosaic",
        "denoiseprofile",
        "bilateral",
        "rotatepixels",
        "scalepixels",
        "lens",
        "cacorrectrgb",
        "hazeremoval",
        "ashift",
        "flip",
        "enlargecanvas",
        "overlay",
        "clipping",
        "liquify",
        "spots",
        "retouch",
        "exposure",
        "mask_manager",
        "tonemap",
        "toneequal",
        "crop",
        "graduatednd",
        "profile_gamma",
        "equalizer",
        "colorin",
        "channelmixerrgb",
        "diffuse",
        "censorize",
        "negadoctor",
        "blurs",
        "primaries",
        "nlmeans",
        "colorchecker",
        "defringe",
        "atrous",
        "lowpass",
        "highpass",
        "sharpen",
        "colortransfer",
        "colormapping",
        "channelmixer",
        "basicadj",
        "colorbalance",
        "colorequal",
        "colorbalancergb",
        "rgbcurve",
        "rgblevels",
        "basecurve",
        "filmic",
        "sigmoid",
        "agx",
        "filmicrgb",
        "lut3d",
        "colisa",
        "tonecurve",
        "levels",
        "shadhi",
        "zonesystem",
        "globaltonemap",
        "relight",
        "bilat",
        "colorcorrection",
        "colorcontrast",
        "velvia",
        "vibrance",
        "colorzones",
        "bloom",
        "colorize",
        "lowlight",
        "monochrome",
        "grain",
        "soften",
        "splittoning",
        "vignette",
        "colorreconstruct",
        "finalscale",
        "colorout",
        "clahe",
        "overexposed",
        "rawoverexposed",
        "dither",
        "borders",
        "watermark",
        "gamma",
    ],
};

impl ChainOrder {
    /// Tag written into history documents.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        self.tag
    }

    /// Position of `name` in this order.
    #[must_use]
    pub fn rank(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|&n| n == name)
    }

    /// The registry's descriptors arranged in chain order.
    ///
    /// Kinds this order does not name go last, in registration order.
    #[must_use]
    pub fn arrange<'r>(&self, registry: &'r Registry) -> Vec<&'r ModuleDescriptor> {
        let mut ranked: Vec<(usize, &ModuleDescriptor)> = registry
            .iter()
            .map(|d| (self.rank(d.name()).unwrap_or(usize::MAX), d))
            .collect();
        // Stable sort keeps registration order among unranked kinds.
        ranked.sort_by_key(|&(rank, _)| rank);
        for (rank, d) in &ranked {
            if *rank == usize::MAX {
                tracing::debug!(module = d.name(), order = self.tag, "module not in chain order, appended");
            }
        }
        ranked.into_iter().map(|(_, d)| d).collect()
    }
}

impl Default for ChainOrder {
    fn default() -> Self {
        V50
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtin_chain_order() {
        let registry = Registry::builtin();
        let names: Vec<_> = V50.arrange(&registry).iter().map(|d| d.name()).collect();
        assert_eq!(
            names,
            [
                "rawprepare",
                "temperature",
                "demosaic",
                "exposure",
                "crop",
                "colorin",
                "sharpen",
                "levels",
                "vignette",
                "colorout",
            ]
        );
    }

    #[test]
    fn rank_of_unknown_is_none() {
        assert_eq!(V50.rank("rawprepare"), Some(0));
        assert!(V50.rank("not-a-module").is_none());
        assert_eq!(ChainOrder::default().tag(), "v5.0");
    }
}
