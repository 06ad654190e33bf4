//! Render World Tests
//!
//! Tests for:
//! - Invalidation: shader map swaps and parameter changes reach every
//!   dependent proxy, through instance chains
//! - MaterialUpdateContext: batched recompiles, permutation instances
//!   created and released as base descriptions change, single
//!   notification, render-thread sync
//! - Producer/consumer teardown: discard rejected while bound or while a
//!   publish is still queued
//! - Streaming texture stacks: layer compatibility, adopted producer
//!   stacks, producer teardown
//! - Override proxies: colored, textured, selection, lighting density

use std::sync::Arc;

use glam::{Vec2, Vec4};

use sigil::core::{
    CapabilityTier, MaterialSettings, ProxyId, QualityTier, SigilError, StaticParameterSet,
    StreamingProducerId, TextureRef,
};
use sigil::material::{
    MaterialKey, MaterialLibrary, MaterialRef, MaterialResource, MaterialServices,
    MaterialUpdateContext, UpdateContextOptions,
};
use sigil::render::{
    DENSITY_COLOR_PARAMETER, LIGHTMAP_RESOLUTION_PARAMETER, ParameterValue, ProxyKind,
    RenderCommand, RenderQueue, RenderWorld, RenderWorldOptions, SELECTION_COLOR_PARAMETER,
    render_queue,
};
use sigil::shader::{
    MaterialAttribute, MaterialDescription, MaterialGraph, NodeKind, ShaderType, ShaderTypeKind,
    ShaderTypeRegistry, TextureKind, UniformExpression, VertexFactoryType,
};

const DESKTOP: CapabilityTier = CapabilityTier::Desktop;

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

fn settings(defer: bool) -> MaterialSettings {
    MaterialSettings {
        allow_async_compilation: false,
        defer_uniform_expression_caching: defer,
        ..Default::default()
    }
}

fn switchable(name: &str, tint: [f32; 4]) -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let tint = graph.add(NodeKind::VectorParameter {
        name: "Tint".into(),
        default: tint,
    });
    let on = graph.add(NodeKind::Constant([1.0; 4]));
    let off = graph.add(NodeKind::Constant([0.0; 4]));
    let detail = graph.add(NodeKind::StaticSwitch {
        name: "UseDetail".into(),
        default: false,
        on_true: on,
        on_false: off,
    });
    graph.connect(MaterialAttribute::BaseColor, tint);
    graph.connect(MaterialAttribute::Emissive, detail);
    MaterialDescription::new(name)
        .with_graph(graph)
        .with_static_switch("UseDetail", false)
}

fn default_description() -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let grey = graph.add(NodeKind::Constant([0.5, 0.5, 0.5, 1.0]));
    graph.connect(MaterialAttribute::BaseColor, grey);
    MaterialDescription::new("DefaultSurface").with_graph(graph)
}

fn setup(defer: bool) -> (MaterialLibrary, RenderWorld) {
    let (queue, receiver) = render_queue();
    let services = MaterialServices::builder(queue)
        .settings(settings(defer))
        .shader_types(shader_types())
        .build();
    let world = RenderWorld::new(receiver, RenderWorldOptions::from(services.settings()));
    let mut library = MaterialLibrary::new(Arc::new(services));
    library.set_default_material(default_description());
    (library, world)
}

/// Vector `name` as written into `proxy`'s uniform buffer.
fn vector(world: &RenderWorld, proxy: ProxyId, name: &str) -> Vec4 {
    let cache = world.uniform_cache(proxy, DESKTOP).unwrap();
    let map = cache.shader_map().unwrap();
    let set = map.uniform_expression_set().unwrap();
    let index = set
        .vectors
        .iter()
        .position(|e| matches!(e, UniformExpression::VectorParameter { name: n, .. } if n == name))
        .unwrap();
    let offset = set.layout().vector_offset as usize + index * 16;
    let data = &cache.buffer().unwrap().data()[offset..offset + 16];
    Vec4::from_array(bytemuck::pod_read_unaligned::<[f32; 4]>(data))
}

fn proxy_of(library: &MaterialLibrary, target: impl Into<MaterialRef>) -> ProxyId {
    library.proxy(target.into()).unwrap()
}

// ============================================================================
// Invalidation Tests
// ============================================================================

#[test]
fn parameter_change_propagates_to_instances() {
    init_logger();
    for defer in [true, false] {
        let (mut library, mut world) = setup(defer);
        let material = library.add_material(switchable("M", [0.0; 4]));
        let child = library.add_instance(material, StaticParameterSet::new()).unwrap();
        let grandchild = library.add_instance(child, StaticParameterSet::new()).unwrap();
        assert!(!library.instance(child).unwrap().has_static_permutation());
        world.run_frame();

        let leaf = proxy_of(&library, grandchild);
        assert_eq!(vector(&world, leaf, "Tint"), Vec4::ZERO);

        library
            .set_parameter(material, "Tint", ParameterValue::Vector(Vec4::splat(2.0)))
            .unwrap();
        world.run_frame();
        assert_eq!(vector(&world, leaf, "Tint"), Vec4::splat(2.0));

        library
            .set_parameter(child, "Tint", ParameterValue::Vector(Vec4::splat(5.0)))
            .unwrap();
        world.run_frame();
        assert_eq!(vector(&world, leaf, "Tint"), Vec4::splat(5.0));
        assert_eq!(vector(&world, proxy_of(&library, material), "Tint"), Vec4::splat(2.0));

        library.clear_parameter(child, "Tint").unwrap();
        world.run_frame();
        assert_eq!(vector(&world, leaf, "Tint"), Vec4::splat(2.0));
    }
}

#[test]
fn shader_map_swap_invalidates_dependents() {
    let (mut library, mut world) = setup(true);
    let material = library.add_material(switchable("M", [0.0; 4]));
    let child = library.add_instance(material, StaticParameterSet::new()).unwrap();
    world.run_frame();
    let child_proxy = proxy_of(&library, child);
    let before = world.uniform_cache(child_proxy, DESKTOP).unwrap().shader_map().unwrap();

    {
        let mut ctx = MaterialUpdateContext::new(&mut library, UpdateContextOptions::default());
        ctx.edit_material(material, switchable("M", [1.0; 4])).unwrap();
    }
    world.process_commands();
    assert!(!world.uniform_cache(child_proxy, DESKTOP).unwrap().is_valid());
    assert!(world.is_deferred(child_proxy));

    world.update_deferred();
    let cache = world.uniform_cache(child_proxy, DESKTOP).unwrap();
    let after = cache.shader_map().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(cache.is_valid_for(world.shader_map(cache.resource().unwrap()).unwrap()));
    assert_eq!(vector(&world, child_proxy, "Tint"), Vec4::ONE);
}

// ============================================================================
// Update Context Tests
// ============================================================================

#[test]
fn update_context_recompiles_permutation_instances() -> anyhow::Result<()> {
    init_logger();
    let (mut library, mut world) = setup(true);
    let material = library.add_material(switchable("M", [0.0; 4]));
    let plain = library.add_instance(material, StaticParameterSet::new())?;
    let mut detail = StaticParameterSet::new();
    detail.set_switch("UseDetail", true);
    let permuted = library.add_instance(material, detail)?;
    let nested = library.add_instance(permuted, StaticParameterSet::new())?;
    world.run_frame();

    assert!(library.instance(permuted).unwrap().has_static_permutation());
    assert!(library.instance(nested).unwrap().has_static_permutation());
    let translations = library.services().compiling().translation_count();

    {
        let mut ctx = MaterialUpdateContext::new(&mut library, UpdateContextOptions::default());
        ctx.edit_material(material, switchable("M", [0.25; 4]))?;
        assert_eq!(ctx.len(), 1);
    }
    // Base material and one permutation; the nested instance shares the
    // permutation's identity.
    assert_eq!(
        library.services().compiling().translation_count(),
        translations + 2
    );

    let description = Arc::clone(library.material(material).unwrap().description());
    for key in [permuted, nested] {
        let resource = library.instance(key).unwrap().resource(DESKTOP).unwrap();
        assert!(Arc::ptr_eq(resource.description(), &description));
        assert!(resource.has_valid_shader_map());
    }
    let map = |key| {
        Arc::clone(
            library
                .resource(MaterialRef::Instance(key), DESKTOP)
                .unwrap()
                .shader_map()
                .unwrap(),
        )
    };
    assert!(Arc::ptr_eq(&map(permuted), &map(nested)));
    assert!(!Arc::ptr_eq(&map(permuted), &map(plain)));

    world.run_frame();
    let stats = world.stats();
    assert_eq!(stats.materials_updated, 1);
    assert_eq!(stats.render_state_recreations, 1);
    for key in [plain, permuted, nested] {
        assert_eq!(vector(&world, proxy_of(&library, key), "Tint"), Vec4::splat(0.25));
    }
    Ok(())
}

#[test]
fn base_edit_revisits_instance_permutations() -> anyhow::Result<()> {
    init_logger();
    let (mut library, mut world) = setup(true);
    let detail_by_default = || switchable("M", [0.0; 4]).with_static_switch("UseDetail", true);
    let material = library.add_material(detail_by_default());
    let mut detail = StaticParameterSet::new();
    detail.set_switch("UseDetail", true);
    let instance = library.add_instance(material, detail)?;
    world.run_frame();
    assert!(
        !library.instance(instance).unwrap().has_static_permutation(),
        "override equals the base default"
    );

    let rendered_switch = |library: &MaterialLibrary| {
        library
            .resource(MaterialRef::Instance(instance), DESKTOP)
            .unwrap()
            .static_parameters()
            .switch("UseDetail")
    };
    let proxy = proxy_of(&library, instance);

    // The base default flips: the override now changes the shader.
    {
        let mut ctx = MaterialUpdateContext::new(&mut library, UpdateContextOptions::default());
        ctx.edit_material(material, switchable("M", [0.0; 4]))?;
    }
    assert!(library.instance(instance).unwrap().has_static_permutation());
    assert_eq!(rendered_switch(&library), Some(true));
    let own = library.instance(instance).unwrap().resource(DESKTOP).unwrap();
    assert!(own.has_valid_shader_map());
    let own_id = own.id();
    let base = library.material(material).unwrap().resource(DESKTOP).unwrap();
    assert_ne!(
        own.shader_map_id(library.services()),
        base.shader_map_id(library.services())
    );

    world.run_frame();
    let binding = world.prepare_draw(proxy, DESKTOP).unwrap();
    assert_eq!(binding.resource, own_id);
    assert!(!binding.is_fallback(proxy));

    // And back: the override is redundant again and the permutation goes.
    {
        let mut ctx = MaterialUpdateContext::new(&mut library, UpdateContextOptions::default());
        ctx.edit_material(material, detail_by_default())?;
    }
    assert!(!library.instance(instance).unwrap().has_static_permutation());
    assert_eq!(rendered_switch(&library), Some(true));

    world.run_frame();
    let base_id = library.material(material).unwrap().resource(DESKTOP).unwrap().id();
    assert_eq!(world.prepare_draw(proxy, DESKTOP).unwrap().resource, base_id);
    assert!(world.material(own_id).is_none());
    Ok(())
}

#[test]
fn empty_update_context_sends_nothing() {
    let (mut library, mut world) = setup(true);
    world.run_frame();
    let before = world.stats();
    {
        let ctx = MaterialUpdateContext::new(&mut library, UpdateContextOptions::empty());
        assert!(ctx.is_empty());
    }
    world.run_frame();
    assert_eq!(world.stats(), before);
}

#[test]
fn update_context_syncs_with_render_thread() -> anyhow::Result<()> {
    init_logger();
    let (queue, receiver) = render_queue();
    let services = MaterialServices::builder(queue)
        .settings(settings(true))
        .shader_types(shader_types())
        .build();
    let world = RenderWorld::new(receiver, RenderWorldOptions::from(services.settings()));
    let render_thread = world.spawn()?;

    let mut library = MaterialLibrary::new(Arc::new(services));
    library.set_default_material(default_description());
    let material = library.add_material(switchable("M", [0.0; 4]));
    {
        let mut ctx = MaterialUpdateContext::new(
            &mut library,
            UpdateContextOptions::SYNC_WITH_RENDER_THREAD,
        );
        ctx.edit_material(material, switchable("M", [1.0; 4]))?;
    }
    // Everything sent before the context closed has been applied.
    let resource = library.material(material).unwrap().resource(DESKTOP).unwrap();
    assert!(resource.is_consumer_bound());
    assert_eq!(library.services().render_queue().pending(), 0);
    let resource_id = resource.id();

    drop(library);
    let world = render_thread.join().expect("render thread panicked");
    assert_eq!(world.stats().materials_updated, 1);
    assert_eq!(world.stats().render_state_recreations, 0);
    assert!(world.material(resource_id).is_none());
    Ok(())
}

// ============================================================================
// Teardown Tests
// ============================================================================

fn standalone(queue: RenderQueue) -> (MaterialServices, MaterialResource) {
    let services = MaterialServices::builder(queue)
        .settings(settings(true))
        .shader_types(shader_types())
        .build();
    let resource = MaterialResource::new(
        &services,
        Arc::new(switchable("M", [1.0; 4])),
        None,
        QualityTier::High,
        DESKTOP,
    );
    (services, resource)
}

#[test]
fn discard_rejected_while_consumer_bound() {
    let (queue, receiver) = render_queue();
    let mut world = RenderWorld::new(receiver, RenderWorldOptions::default());
    let (services, mut resource) = standalone(queue);

    // Nothing bound yet: discard is allowed and a no-op.
    assert!(resource.discard_shader_map().is_ok());

    assert!(resource.cache_shaders(&services));
    assert!(!resource.is_consumer_bound(), "not applied yet");
    assert!(
        matches!(
            resource.discard_shader_map(),
            Err(SigilError::ShaderMapStillBound(_))
        ),
        "publish still queued"
    );
    assert!(resource.shader_map().is_some());
    assert!(resource.has_pending_publish());
    world.process_commands();
    assert!(!resource.has_pending_publish());
    assert!(resource.is_consumer_bound());
    assert!(Arc::ptr_eq(
        world.shader_map(resource.id()).unwrap(),
        resource.shader_map().unwrap()
    ));
    assert!(matches!(
        resource.discard_shader_map(),
        Err(SigilError::ShaderMapStillBound(_))
    ));
    assert!(resource.shader_map().is_some(), "rejected discard changes nothing");

    resource.release_shader_map(&services);
    assert!(resource.shader_map().is_none());
    assert!(resource.discard_shader_map().is_err(), "release not applied yet");
    world.process_commands();
    assert!(!resource.is_consumer_bound());
    assert!(resource.discard_shader_map().is_ok());
}

#[test]
fn removed_parent_falls_back_to_default() {
    let (mut library, mut world) = setup(false);
    let material = library.add_material(switchable("M", [0.0; 4]));
    let child = library.add_instance(material, StaticParameterSet::new()).unwrap();
    world.run_frame();
    let child_proxy = proxy_of(&library, child);
    assert!(world.uniform_buffer(child_proxy, DESKTOP).is_some());

    library.remove_material(material);
    world.run_frame();
    assert!(world.proxy(child_proxy).is_some());
    assert!(!world.uniform_cache(child_proxy, DESKTOP).unwrap().is_valid());
    assert!(world.uniform_buffer(child_proxy, DESKTOP).is_none());

    // The parent proxy is gone, so the child renders the default material.
    let binding = world.prepare_draw(child_proxy, DESKTOP).unwrap();
    assert!(binding.is_fallback(child_proxy));
    assert_eq!(Some(binding.parameter_proxy), world.default_proxy());
}

// ============================================================================
// Streaming Texture Stack Tests
// ============================================================================

fn streaming_description(layers: u32) -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let uv = graph.add(NodeKind::TexCoord { index: 0 });
    let attributes = [
        MaterialAttribute::BaseColor,
        MaterialAttribute::Emissive,
        MaterialAttribute::Normal,
        MaterialAttribute::WorldPositionOffset,
    ];
    for (i, attribute) in attributes.into_iter().take(layers as usize).enumerate() {
        let sample = graph.add(NodeKind::TextureSample {
            parameter: None,
            texture: TextureRef(100 + i as u32),
            kind: TextureKind::Streaming,
            coordinates: Some(uv),
        });
        graph.connect(attribute, sample);
    }
    MaterialDescription::new("Streamed").with_graph(graph)
}

fn create_producers(library: &MaterialLibrary, tiles: &[u32]) -> Vec<StreamingProducerId> {
    tiles
        .iter()
        .enumerate()
        .map(|(i, &tile_size)| {
            let producer = StreamingProducerId::next();
            library
                .services()
                .render_queue()
                .enqueue(RenderCommand::CreateStreamingProducer {
                    producer,
                    texture: TextureRef(100 + i as u32),
                    tile_size,
                    border: 4,
                    preallocated: false,
                });
            producer
        })
        .collect()
}

#[test]
fn matching_streaming_layers_share_one_allocation() {
    let (mut library, mut world) = setup(true);
    let producers = create_producers(&library, &[128, 128, 128, 128]);
    let material = library.add_material(streaming_description(4));
    world.run_frame();

    let proxy = proxy_of(&library, material);
    let cache = world.uniform_cache(proxy, DESKTOP).unwrap();
    assert_eq!(cache.allocations().len(), 1);
    let allocation = world.streaming().allocation(cache.allocations()[0]).unwrap();
    assert_eq!(allocation.tile_size, 128);
    assert_eq!(world.streaming().producer(producers[2]).unwrap().num_subscribers(), 1);

    library
        .services()
        .render_queue()
        .enqueue(RenderCommand::DestroyStreamingProducer {
            producer: producers[2],
        });
    world.process_commands();
    assert!(!world.uniform_cache(proxy, DESKTOP).unwrap().is_valid());
    assert_eq!(world.streaming().num_allocations(), 0);

    world.update_deferred();
    assert_eq!(world.uniform_cache(proxy, DESKTOP).unwrap().allocations().len(), 1);
}

fn runtime_streaming_description() -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let output = graph.add(NodeKind::RuntimeStreamingTexture {
        parameter: None,
        texture: TextureRef(200),
    });
    graph.connect(MaterialAttribute::BaseColor, output);
    MaterialDescription::new("RuntimeStreamed").with_graph(graph)
}

#[test]
fn runtime_streaming_output_adopts_producer_stack() {
    init_logger();
    let (mut library, mut world) = setup(true);
    let producer = StreamingProducerId::next();
    library
        .services()
        .render_queue()
        .enqueue(RenderCommand::CreateStreamingProducer {
            producer,
            texture: TextureRef(200),
            tile_size: 256,
            border: 8,
            preallocated: true,
        });
    world.run_frame();
    let allocations = world.streaming().num_allocations();
    let stack = world.streaming().producer(producer).unwrap().preallocated().unwrap();

    let material = library.add_material(runtime_streaming_description());
    world.run_frame();

    let proxy = proxy_of(&library, material);
    let cache = world.uniform_cache(proxy, DESKTOP).unwrap();
    assert!(cache.is_valid());
    assert!(cache.allocations().is_empty(), "the producer owns the stack");
    assert_eq!(cache.producers(), &[producer]);
    assert_eq!(world.streaming().num_allocations(), allocations);
    assert_eq!(world.streaming().producer(producer).unwrap().num_subscribers(), 1);

    let buffer = cache.buffer().unwrap();
    let offset = buffer.layout().stack_offset as usize;
    let block = bytemuck::pod_read_unaligned::<[u32; 8]>(&buffer.data()[offset..offset + 32]);
    assert_eq!(block, world.streaming().stack_uniform(stack));
    assert_eq!(block[1], 256);
    assert_eq!(block[2], 8);

    library
        .services()
        .render_queue()
        .enqueue(RenderCommand::DestroyStreamingProducer { producer });
    world.process_commands();
    assert!(!world.uniform_cache(proxy, DESKTOP).unwrap().is_valid());
    assert_eq!(world.streaming().num_allocations(), allocations - 1);
}

#[test]
#[should_panic(expected = "does not match layer 0")]
fn mismatched_streaming_layer_is_fatal() {
    let (mut library, mut world) = setup(true);
    create_producers(&library, &[128, 128, 256, 128]);
    library.add_material(streaming_description(4));
    world.run_frame();
}

// ============================================================================
// Override Proxy Tests
// ============================================================================

fn override_description() -> MaterialDescription {
    let mut graph = MaterialGraph::new();
    let parameter = |graph: &mut MaterialGraph, name: &str, attribute: MaterialAttribute| {
        let node = graph.add(NodeKind::VectorParameter {
            name: name.into(),
            default: [0.0; 4],
        });
        graph.connect(attribute, node);
    };
    parameter(&mut graph, "Tint", MaterialAttribute::BaseColor);
    parameter(&mut graph, SELECTION_COLOR_PARAMETER, MaterialAttribute::Emissive);
    parameter(&mut graph, LIGHTMAP_RESOLUTION_PARAMETER, MaterialAttribute::Normal);
    parameter(&mut graph, DENSITY_COLOR_PARAMETER, MaterialAttribute::WorldPositionOffset);
    let albedo = graph.add(NodeKind::TextureSample {
        parameter: Some("Albedo".into()),
        texture: TextureRef(1),
        kind: TextureKind::Texture2D,
        coordinates: None,
    });
    graph.connect(MaterialAttribute::Roughness, albedo);
    MaterialDescription::new("Overridable").with_graph(graph)
}

fn spawn_proxy(library: &MaterialLibrary, kind: ProxyKind) -> ProxyId {
    let proxy = ProxyId::next();
    library
        .services()
        .render_queue()
        .enqueue(RenderCommand::CreateProxy { proxy, kind });
    proxy
}

fn texture_slot(world: &RenderWorld, proxy: ProxyId) -> u32 {
    let cache = world.uniform_cache(proxy, DESKTOP).unwrap();
    let offset = cache.buffer().unwrap().layout().texture_offset as usize;
    let data = cache.buffer().unwrap().data();
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

#[test]
fn override_proxies_answer_their_parameters() {
    let (mut library, mut world) = setup(true);
    let material: MaterialKey = library.add_material(override_description());
    let parent = proxy_of(&library, material);
    library
        .set_parameter(material, "Tint", ParameterValue::Vector(Vec4::splat(0.5)))
        .unwrap();

    let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
    let colored = spawn_proxy(
        &library,
        ProxyKind::Colored {
            parent,
            parameter: "Tint".into(),
            color: red,
        },
    );
    let textured = spawn_proxy(
        &library,
        ProxyKind::ColoredTextured {
            parent,
            color_parameter: "Tint".into(),
            color: red,
            texture_parameter: "Albedo".into(),
            texture: TextureRef(42),
        },
    );
    let selected = spawn_proxy(&library, ProxyKind::SelectionColor { parent, color: red });
    let density = spawn_proxy(
        &library,
        ProxyKind::LightingDensity {
            parent,
            color: Vec4::ONE,
            lightmap_resolution: Vec2::new(64.0, 32.0),
        },
    );
    world.run_frame();

    assert_eq!(vector(&world, colored, "Tint"), red);
    assert_eq!(texture_slot(&world, colored), 1);

    assert_eq!(vector(&world, textured, "Tint"), red);
    assert_eq!(texture_slot(&world, textured), 42);

    assert_eq!(vector(&world, selected, SELECTION_COLOR_PARAMETER), red);
    assert_eq!(vector(&world, selected, "Tint"), Vec4::splat(0.5));

    assert_eq!(
        vector(&world, density, LIGHTMAP_RESOLUTION_PARAMETER),
        Vec4::new(64.0, 32.0, 1.0, 1.0)
    );
    assert_eq!(vector(&world, density, DENSITY_COLOR_PARAMETER), Vec4::ONE);
    assert_eq!(vector(&world, density, "Tint"), Vec4::splat(0.5));

    // Parent changes reach override proxies as well.
    library
        .set_parameter(material, "Tint", ParameterValue::Vector(Vec4::splat(0.75)))
        .unwrap();
    world.run_frame();
    assert_eq!(vector(&world, selected, "Tint"), Vec4::splat(0.75));
    assert_eq!(vector(&world, colored, "Tint"), red);
}

#[test]
fn pending_material_renders_default_with_default_parameters() {
    let (queue, receiver) = render_queue();
    let services = MaterialServices::builder(queue)
        .shader_types(shader_types())
        .compiler(Arc::new(sigil::shader::ImmediateCompiler::new(
            sigil::shader::EchoBackend,
        )))
        .build();
    let mut world = RenderWorld::new(receiver, RenderWorldOptions::from(services.settings()));
    let mut library = MaterialLibrary::new(Arc::new(services));
    let default_key = library.set_default_material(default_description());
    let key = library.add_material(switchable("Async", [1.0; 4]));
    world.run_frame();

    // ImmediateCompiler finished the job, but nothing applied it yet.
    let proxy = proxy_of(&library, key);
    let binding = world.prepare_draw(proxy, DESKTOP).unwrap();
    assert!(binding.is_fallback(proxy));
    assert_eq!(binding.parameter_proxy, proxy_of(&library, default_key));

    library.process_compilation_results();
    world.run_frame();
    assert!(!world.prepare_draw(proxy, DESKTOP).unwrap().is_fallback(proxy));
}
