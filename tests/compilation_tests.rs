//! Compilation Pipeline Tests
//!
//! Tests for:
//! - Concurrent requests for one identity: one translation, one shared map
//! - Asynchronous compiles: fallback while pending, swap on completion
//! - Attaching to an in-flight compile and cancelling it
//! - Translation and back-end failures, default material failures
//! - Worker pool compiler end to end

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use parking_lot::Mutex;

use sigil::core::{
    CapabilityTier, CompileError, MaterialSettings, QualityTier, StaticParameterSet,
    TranslationError,
};
use sigil::material::{MaterialLibrary, MaterialResource, MaterialServices};
use sigil::render::{ParameterValue, RenderQueue, RenderWorld, RenderWorldOptions, render_queue};
use sigil::shader::{
    CompileJob, CompileJobResult, CompletionSender, EchoBackend, GraphTranslator,
    MaterialAttribute, MaterialDescription, MaterialGraph, MaterialTranslator, NodeId, NodeKind,
    ShaderBackend, ShaderBinary, ShaderCompiler, ShaderType, ShaderTypeKind, ShaderTypeRegistry,
    TranslatedMaterial, VertexFactoryType, WorkerPoolCompiler,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn shader_types() -> ShaderTypeRegistry {
    let mut types = ShaderTypeRegistry::new();
    types
        .register_shader_type(ShaderType::new("BasePass", ShaderTypeKind::MeshMaterial, "base"))
        .register_vertex_factory(VertexFactoryType::new("LocalVF", "local"));
    types
}

fn tinted(name: &str, tint: [f32; 4]) -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let node = graph.add(NodeKind::VectorParameter {
        name: "Tint".into(),
        default: tint,
    });
    graph.connect(MaterialAttribute::BaseColor, node);
    MaterialDescription::new(name).with_graph(graph)
}

fn default_description() -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let grey = graph.add(NodeKind::Constant([0.5, 0.5, 0.5, 1.0]));
    graph.connect(MaterialAttribute::BaseColor, grey);
    MaterialDescription::new("DefaultSurface").with_graph(graph)
}

fn broken(name: &str) -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let reroute = graph.add(NodeKind::Reroute {
        input: Some(NodeId(0)),
    });
    graph.connect(MaterialAttribute::BaseColor, reroute);
    MaterialDescription::new(name).with_graph(graph)
}

/// Translator that counts calls and sleeps to widen race windows.
struct CountingTranslator {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingTranslator {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MaterialTranslator for CountingTranslator {
    fn translate(
        &self,
        description: &MaterialDescription,
        static_parameters: &StaticParameterSet,
        quality: QualityTier,
        tier: CapabilityTier,
    ) -> Result<TranslatedMaterial, TranslationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        GraphTranslator.translate(description, static_parameters, quality, tier)
    }
}

/// Compiler that holds jobs while its gate is closed.
#[derive(Default)]
struct GateCompiler {
    closed: AtomicBool,
    held: Mutex<Vec<(CompileJob, CompletionSender)>>,
}

impl GateCompiler {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn held(&self) -> usize {
        self.held.lock().len()
    }

    /// Completes every held job.
    fn release(&self) {
        let held = std::mem::take(&mut *self.held.lock());
        for (job, completion) in held {
            completion.complete(echo(&job));
        }
    }
}

fn echo(job: &CompileJob) -> CompileJobResult {
    CompileJobResult {
        group: job.group,
        permutation: job.permutation.clone(),
        result: EchoBackend.compile(job),
    }
}

impl ShaderCompiler for GateCompiler {
    fn submit(&self, job: CompileJob, completion: CompletionSender) {
        if self.closed.load(Ordering::SeqCst) {
            self.held.lock().push((job, completion));
        } else {
            completion.complete(echo(&job));
        }
    }
}

struct Harness {
    library: MaterialLibrary,
    world: RenderWorld,
    compiler: Arc<GateCompiler>,
}

fn async_harness() -> Harness {
    let (queue, receiver) = render_queue();
    let compiler = Arc::new(GateCompiler::default());
    let services = MaterialServices::builder(queue)
        .shader_types(shader_types())
        .compiler(compiler.clone())
        .build();
    let world = RenderWorld::new(receiver, RenderWorldOptions::from(services.settings()));
    let mut library = MaterialLibrary::new(Arc::new(services));
    library.set_default_material(default_description());
    compiler.close();
    Harness {
        library,
        world,
        compiler,
    }
}

fn sync_services(queue: RenderQueue, translator: Arc<dyn MaterialTranslator>) -> MaterialServices {
    MaterialServices::builder(queue)
        .settings(MaterialSettings {
            allow_async_compilation: false,
            ..Default::default()
        })
        .shader_types(shader_types())
        .translator(translator)
        .build()
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn concurrent_requests_translate_once() {
    init_logger();
    let (queue, _receiver) = render_queue();
    let translator = CountingTranslator::new(Duration::from_millis(50));
    let services = sync_services(queue, translator.clone());
    let description = Arc::new(tinted("Shared", [1.0; 4]));

    const THREADS: usize = 8;
    let barrier = Barrier::new(THREADS);
    let maps: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    let mut resource = MaterialResource::new(
                        &services,
                        Arc::clone(&description),
                        None,
                        QualityTier::High,
                        CapabilityTier::Desktop,
                    );
                    barrier.wait();
                    assert!(resource.cache_shaders(&services));
                    Arc::clone(resource.shader_map().unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(translator.calls(), 1);
    assert_eq!(services.compiling().submission_count(), 1);
    assert!(maps.iter().all(|m| Arc::ptr_eq(m, &maps[0])));
    assert_eq!(services.compiling().num_in_flight(), 0);
}

#[test]
fn concurrent_distinct_identities_compile_independently() {
    let (queue, _receiver) = render_queue();
    let translator = CountingTranslator::new(Duration::from_millis(5));
    let services = sync_services(queue, translator.clone());

    std::thread::scope(|scope| {
        for i in 0..4 {
            let services = &services;
            scope.spawn(move || {
                let mut resource = MaterialResource::new(
                    services,
                    Arc::new(tinted("M", [i as f32; 4])),
                    None,
                    QualityTier::High,
                    CapabilityTier::Desktop,
                );
                assert!(resource.cache_shaders(services));
            });
        }
    });
    assert_eq!(translator.calls(), 4);
}

// ============================================================================
// Asynchronous Compile Tests
// ============================================================================

#[test]
fn async_compile_falls_back_then_swaps() {
    init_logger();
    let Harness {
        mut library,
        mut world,
        compiler,
    } = async_harness();
    let default_key = library.default_material().unwrap();
    let default_proxy = library.material(default_key).unwrap().proxy();

    let key = library.add_material(tinted("Pending", [0.0, 1.0, 0.0, 1.0]));
    let proxy = library.material(key).unwrap().proxy();
    let resource = library
        .material(key)
        .unwrap()
        .resource(CapabilityTier::Desktop)
        .unwrap();
    let resource_id = resource.id();
    assert!(resource.shader_map().is_none());
    assert_eq!(resource.outstanding_jobs().len(), 1);
    assert_eq!(compiler.held(), 1);

    world.run_frame();
    let binding = world.prepare_draw(proxy, CapabilityTier::Desktop).unwrap();
    assert!(binding.is_fallback(proxy));
    assert_eq!(binding.parameter_proxy, default_proxy);
    assert!(world.uniform_buffer(proxy, CapabilityTier::Desktop).is_none());

    // Still pending: nothing to apply yet.
    assert_eq!(library.process_compilation_results(), 0);

    compiler.release();
    assert_eq!(library.process_compilation_results(), 1);
    let resource = library
        .material(key)
        .unwrap()
        .resource(CapabilityTier::Desktop)
        .unwrap();
    assert!(resource.has_valid_shader_map());
    assert!(resource.outstanding_jobs().is_empty());

    world.run_frame();
    let binding = world.prepare_draw(proxy, CapabilityTier::Desktop).unwrap();
    assert!(!binding.is_fallback(proxy));
    assert_eq!(binding.resource, resource_id);
    let data = world
        .uniform_buffer(proxy, CapabilityTier::Desktop)
        .unwrap()
        .data();
    assert_eq!(&data[4..8], &1.0f32.to_le_bytes());
}

#[test]
fn consumer_pointer_is_never_incomplete() {
    let Harness {
        mut library,
        mut world,
        compiler,
    } = async_harness();
    let key = library.add_material(tinted("M", [1.0; 4]));
    let resource_id = library
        .material(key)
        .unwrap()
        .resource(CapabilityTier::Desktop)
        .unwrap()
        .id();

    // The render world asserts completeness of every map it receives.
    world.run_frame();
    assert!(world.shader_map(resource_id).is_none());

    compiler.release();
    library.finish_all_compilation();
    world.run_frame();
    let map = world.shader_map(resource_id).unwrap();
    assert!(map.compiled_successfully());
    assert!(world.material(resource_id).unwrap().info().binding.is_bound());
}

#[test]
fn equal_identity_attaches_to_in_flight_compile() {
    let Harness {
        mut library,
        world: _world,
        compiler,
    } = async_harness();
    let first = library.add_material(tinted("First", [1.0; 4]));
    let second = library.add_material(tinted("Second", [1.0; 4]));
    let jobs = |key| {
        library
            .material(key)
            .unwrap()
            .resource(CapabilityTier::Desktop)
            .unwrap()
            .outstanding_jobs()
            .to_vec()
    };
    assert_eq!(jobs(first), jobs(second));
    assert_eq!(library.services().compiling().submission_count(), 2, "default + one");
    assert_eq!(compiler.held(), 1);

    compiler.release();
    assert_eq!(library.process_compilation_results(), 2);
    let map = |key| {
        Arc::clone(
            library
                .material(key)
                .unwrap()
                .resource(CapabilityTier::Desktop)
                .unwrap()
                .shader_map()
                .unwrap(),
        )
    };
    assert!(Arc::ptr_eq(&map(first), &map(second)));
}

#[test]
fn removed_material_discards_late_results() {
    let Harness {
        mut library,
        world: _world,
        compiler,
    } = async_harness();
    let key = library.add_material(tinted("Gone", [1.0; 4]));
    let id = library
        .material(key)
        .unwrap()
        .resource(CapabilityTier::Desktop)
        .unwrap()
        .shader_map_id(library.services());
    library.remove_material(key);
    assert!(library.services().compiling().in_flight_job(&id).is_none());

    compiler.release();
    assert_eq!(library.process_compilation_results(), 0);
    assert!(library.services().shader_maps().find(&id).is_none());
}

#[test]
fn parameters_apply_after_swap() {
    let Harness {
        mut library,
        mut world,
        compiler,
    } = async_harness();
    let key = library.add_material(tinted("M", [0.0; 4]));
    let proxy = library.material(key).unwrap().proxy();
    library
        .set_parameter(key, "Tint", ParameterValue::Vector(glam::Vec4::splat(3.0)))
        .unwrap();
    world.run_frame();

    compiler.release();
    library.process_compilation_results();
    world.run_frame();
    let data = world
        .uniform_buffer(proxy, CapabilityTier::Desktop)
        .unwrap()
        .data();
    assert_eq!(&data[0..4], &3.0f32.to_le_bytes());
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn translation_failure_leaves_no_map() {
    init_logger();
    let (queue, _receiver) = render_queue();
    let services = sync_services(queue, Arc::new(GraphTranslator));
    let mut resource = MaterialResource::new(
        &services,
        Arc::new(broken("Broken")),
        None,
        QualityTier::High,
        CapabilityTier::Desktop,
    );
    assert!(!resource.cache_shaders(&services));
    assert!(resource.shader_map().is_none());
    assert_eq!(resource.compile_errors().len(), 1);
    assert!(resource.compile_errors()[0].contains("Broken"));
    assert_eq!(services.compiling().num_in_flight(), 0);
    assert_eq!(services.compiling().submission_count(), 0);
}

#[test]
fn backend_failure_reports_every_permutation() {
    let (queue, _receiver) = render_queue();
    let backend = |job: &CompileJob| -> Result<ShaderBinary, CompileError> {
        Err(CompileError::new(job.permutation.to_string(), "unsupported"))
    };
    let mut types = shader_types();
    types.register_shader_type(ShaderType::new("DepthOnly", ShaderTypeKind::MeshMaterial, "d"));
    let services = MaterialServices::builder(queue)
        .settings(MaterialSettings {
            allow_async_compilation: false,
            ..Default::default()
        })
        .shader_types(types)
        .compiler(Arc::new(sigil::shader::ImmediateCompiler::new(backend)))
        .build();
    let mut resource = MaterialResource::new(
        &services,
        Arc::new(tinted("M", [1.0; 4])),
        None,
        QualityTier::High,
        CapabilityTier::Desktop,
    );
    assert!(!resource.cache_shaders(&services));
    assert_eq!(resource.compile_errors().len(), 2);
    assert!(services.shader_maps().is_empty());
    assert!(resource.debug_report().contains("unsupported"));
}

#[test]
#[should_panic(expected = "default material")]
fn default_material_failure_is_fatal() {
    let (queue, _receiver) = render_queue();
    let services = MaterialServices::builder(queue)
        .shader_types(shader_types())
        .build();
    let mut library = MaterialLibrary::new(Arc::new(services));
    library.set_default_material(broken("BrokenDefault"));
}

// ============================================================================
// Worker Pool Tests
// ============================================================================

#[test]
fn worker_pool_compiles_asynchronously() {
    init_logger();
    let (queue, receiver) = render_queue();
    let services = MaterialServices::builder(queue)
        .shader_types(shader_types())
        .compiler(Arc::new(WorkerPoolCompiler::new(EchoBackend, 2).unwrap()))
        .build();
    let mut world = RenderWorld::new(receiver, RenderWorldOptions::from(services.settings()));
    let mut library = MaterialLibrary::new(Arc::new(services));
    library.set_default_material(default_description());

    let keys: Vec<_> = (0..4)
        .map(|i| library.add_material(tinted("M", [i as f32; 4])))
        .collect();
    library.finish_all_compilation();
    world.run_frame();

    for key in keys {
        let material = library.material(key).unwrap();
        let resource = material.resource(CapabilityTier::Desktop).unwrap();
        assert!(resource.has_valid_shader_map());
        let binding = world
            .prepare_draw(material.proxy(), CapabilityTier::Desktop)
            .unwrap();
        assert!(!binding.is_fallback(material.proxy()));
    }
}
