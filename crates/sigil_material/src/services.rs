//! Process-wide material services.
//!
//! Groups the shared registries (shader types, shader maps, in-flight
//! compiles), the persistent store and the render queue. Constructed before
//! the first compile request and passed explicitly to everything that needs
//! it; [`MaterialServices::shutdown`] tears it down after the last resource
//! is gone.

use std::sync::Arc;
use std::time::Duration;

use sigil_core::MaterialSettings;
use sigil_render::RenderQueue;
use sigil_shader::{
    ArtifactStore, EchoBackend, GraphTranslator, ImmediateCompiler, MaterialTranslator,
    ShaderCompiler, ShaderCompilingManager, ShaderMapRegistry, ShaderTypeRegistry,
};

pub struct MaterialServices {
    settings: MaterialSettings,
    shader_types: Arc<ShaderTypeRegistry>,
    shader_maps: Arc<ShaderMapRegistry>,
    store: Option<Arc<dyn ArtifactStore>>,
    compiling: Arc<ShaderCompilingManager>,
    render_queue: RenderQueue,
}

impl MaterialServices {
    #[must_use]
    pub fn builder(render_queue: RenderQueue) -> MaterialServicesBuilder {
        MaterialServicesBuilder {
            render_queue,
            settings: MaterialSettings::default(),
            shader_types: None,
            translator: None,
            compiler: None,
            store: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &MaterialSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn shader_types(&self) -> &ShaderTypeRegistry {
        &self.shader_types
    }

    #[inline]
    #[must_use]
    pub fn shader_maps(&self) -> &Arc<ShaderMapRegistry> {
        &self.shader_maps
    }

    /// Persistent store, or `None` in cooked configurations.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn ArtifactStore>> {
        if self.settings.requires_cooked_data {
            None
        } else {
            self.store.as_ref()
        }
    }

    #[inline]
    #[must_use]
    pub fn compiling(&self) -> &Arc<ShaderCompilingManager> {
        &self.compiling
    }

    #[inline]
    #[must_use]
    pub fn render_queue(&self) -> &RenderQueue {
        &self.render_queue
    }

    /// Cancels outstanding compiles and drops unreferenced registry entries.
    pub fn shutdown(&self) {
        self.compiling.shutdown();
        let purged = self.shader_maps.purge();
        log::debug!(
            "Material services shut down ({purged} dead shader map entries, {} live)",
            self.shader_maps.len()
        );
    }
}

pub struct MaterialServicesBuilder {
    render_queue: RenderQueue,
    settings: MaterialSettings,
    shader_types: Option<ShaderTypeRegistry>,
    translator: Option<Arc<dyn MaterialTranslator>>,
    compiler: Option<Arc<dyn ShaderCompiler>>,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl MaterialServicesBuilder {
    #[must_use]
    pub fn settings(mut self, settings: MaterialSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn shader_types(mut self, shader_types: ShaderTypeRegistry) -> Self {
        self.shader_types = Some(shader_types);
        self
    }

    /// Defaults to [`GraphTranslator`].
    #[must_use]
    pub fn translator(mut self, translator: Arc<dyn MaterialTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Defaults to an [`ImmediateCompiler`] over [`EchoBackend`].
    #[must_use]
    pub fn compiler(mut self, compiler: Arc<dyn ShaderCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn build(self) -> MaterialServices {
        let shader_maps = Arc::new(ShaderMapRegistry::new());
        let translator = self
            .translator
            .unwrap_or_else(|| Arc::new(GraphTranslator));
        let compiler = self
            .compiler
            .unwrap_or_else(|| Arc::new(ImmediateCompiler::new(EchoBackend)));
        // Cooked builds never write back either.
        let persist = if self.settings.requires_cooked_data {
            None
        } else {
            self.store.clone()
        };
        let compiling = ShaderCompilingManager::new(
            translator,
            compiler,
            Arc::clone(&shader_maps),
            persist,
        )
        .with_wait_log_interval(Duration::from_millis(
            self.settings.compile_wait_log_interval_ms,
        ));

        MaterialServices {
            settings: self.settings,
            shader_types: Arc::new(self.shader_types.unwrap_or_default()),
            shader_maps,
            store: self.store,
            compiling: Arc::new(compiling),
            render_queue: self.render_queue,
        }
    }
}
