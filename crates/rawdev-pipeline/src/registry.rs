//! The module descriptor table.
//!
//! Built once when an [`Engine`](crate::Engine) is initialized and shared
//! read-only by every pipeline it creates. Lookup by name goes through a
//! hash index because it happens on every parameter access and for every
//! entry of every history load.

use std::collections::HashMap;
use std::fmt;

use crate::error::EngineError;
use crate::module::{ModuleFlags, ModuleKind};
use crate::params::{ParamLayout, ParamRecord};

/// Immutable metadata of one registered module kind.
pub struct ModuleDescriptor {
    kind: Box<dyn ModuleKind>,
    defaults: ParamRecord,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("flags", &self.flags())
            .field("default_enabled", &self.default_enabled())
            .finish_non_exhaustive()
    }
}

impl ModuleDescriptor {
    /// Module name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Current parameter version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.kind.version()
    }

    /// Current parameter layout.
    #[must_use]
    pub fn layout(&self) -> &'static ParamLayout {
        self.kind.layout()
    }

    /// Declared capabilities.
    #[must_use]
    pub fn flags(&self) -> ModuleFlags {
        self.kind.flags()
    }

    /// Whether the kernel may run tile by tile.
    #[must_use]
    pub fn allows_tiling(&self) -> bool {
        self.flags().contains(ModuleFlags::ALLOW_TILING)
    }

    /// Whether a fresh pipeline enables this module.
    #[must_use]
    pub fn default_enabled(&self) -> bool {
        self.kind.default_enabled()
    }

    /// Parameters of a fresh instance.
    #[must_use]
    pub const fn default_params(&self) -> &ParamRecord {
        &self.defaults
    }

    /// The module kind behind this descriptor.
    #[must_use]
    pub fn kind(&self) -> &dyn ModuleKind {
        self.kind.as_ref()
    }
}

/// The table of registered module kinds.
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: Vec<ModuleDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every shipped module kind.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for kind in crate::iop::builtin_modules() {
            let name = kind.name();
            if let Err(error) = registry.register(kind) {
                tracing::error!(module = name, %error, "skipping built-in module");
            }
        }
        registry
    }

    /// Add a module kind.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] if the name is empty or
    /// already registered, or if the kind's default parameters are not at
    /// its current version.
    pub fn register(&mut self, kind: Box<dyn ModuleKind>) -> Result<(), EngineError> {
        let name = kind.name();
        if name.is_empty() {
            return Err(EngineError::invalid("module name must not be empty"));
        }
        if self.index.contains_key(name) {
            return Err(EngineError::invalid(format!(
                "module {name} is already registered"
            )));
        }
        let defaults = kind.default_params();
        if defaults.version() != kind.version() {
            return Err(EngineError::invalid(format!(
                "module {name}: default parameters are version {}, module is version {}",
                defaults.version(),
                kind.version()
            )));
        }
        tracing::debug!(module = name, version = kind.version(), "registered module");
        self.index.insert(name, self.descriptors.len());
        self.descriptors.push(ModuleDescriptor { kind, defaults });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn with(mut self, kind: impl ModuleKind + 'static) -> Result<Self, EngineError> {
        self.register(Box::new(kind))?;
        Ok(self)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn count(&self) -> usize {
        self.descriptors.len()
    }

    /// Descriptor at `index` in registration order.
    #[must_use]
    pub fn descriptor_at(&self, index: usize) -> Option<&ModuleDescriptor> {
        self.descriptors.get(index)
    }

    /// Descriptor at a known-valid registration index.
    pub(crate) fn descriptor(&self, index: usize) -> &ModuleDescriptor {
        &self.descriptors[index]
    }

    /// Registration index of the descriptor called `name`.
    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Descriptor called `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// All descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.descriptors.iter()
    }
}
