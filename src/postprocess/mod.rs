//! Post-process modules
//!
//! A [`PostProcessor`] is handed each successfully transformed image, together
//! with the caller's opaque extra parameters. Modules are looked up by name in a
//! [`PostProcessRegistry`].

pub mod framing;
mod visor;

pub use visor::{VISOR_FACES, VisorFaces, feature_path};

use crate::error::{Error, Result};
use crate::types::{Event, ImageDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Consumer invoked once per acquired image
///
/// An error fails only the image it was called for.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Name the module is registered under
    fn name(&self) -> &str;

    /// Handle one image. `events` is the run's event channel, if any.
    async fn process(
        &self,
        descriptor: &ImageDescriptor,
        extra_params: &Map<String, Value>,
        events: Option<&broadcast::Sender<Event>>,
    ) -> Result<()>;
}

/// Registration table of post-process modules
#[derive(Default)]
pub struct PostProcessRegistry {
    modules: BTreeMap<String, Arc<dyn PostProcessor>>,
}

impl PostProcessRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `visor_faces`
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(VisorFaces::new()));
        registry
    }

    /// Register (or replace) a module under its own name
    pub fn register(&mut self, module: Arc<dyn PostProcessor>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Registered module names, sorted
    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Look up a module
    ///
    /// # Errors
    ///
    /// [`Error::UnknownPostProcessModule`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn PostProcessor>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownPostProcessModule(name.to_string()))
    }
}
