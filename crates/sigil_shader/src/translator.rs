//! Reference graph translator.
//!
//! [`GraphTranslator`] walks the output attributes of a [`MaterialGraph`],
//! resolves static switches and reroutes, and produces pseudo shader source
//! together with the uniform expression set and behaviour flags. Subtrees
//! that only depend on parameters and constants are folded into uniform
//! expressions; everything else is emitted as code.
//!
//! Streaming texture samples that share a coordinate source are grouped into
//! one streaming stack (up to [`MAX_STREAMING_LAYERS`] layers per stack).

use std::fmt::Write as _;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use sigil_core::{CapabilityTier, QualityTier, StaticParameterSet, TranslationError};

use crate::compiler::{MaterialTranslator, TranslatedMaterial};
use crate::description::{
    MaterialAttribute, MaterialDescription, MathOp, NodeId, NodeKind, TextureKind,
};
use crate::shader_map::{CompilationOutput, ShaderMapFlags};
use crate::uniform_expression::{
    MAX_STREAMING_LAYERS, StreamingTextureStack, TextureExpression, UniformExpression,
};

/// Translator for [`MaterialGraph`](crate::MaterialGraph)-based descriptions.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphTranslator;

impl MaterialTranslator for GraphTranslator {
    fn translate(
        &self,
        description: &MaterialDescription,
        static_parameters: &StaticParameterSet,
        quality: QualityTier,
        tier: CapabilityTier,
    ) -> Result<TranslatedMaterial, TranslationError> {
        let mut ctx = TranslationContext {
            description,
            static_parameters,
            output: CompilationOutput::default(),
            in_progress: FxHashSet::default(),
            stacks_by_coordinates: FxHashMap::default(),
        };

        let mut source = String::new();
        let _ = writeln!(source, "// {} [{tier} / {quality}]", description.name);
        let _ = writeln!(source, "// {}", description.usage_description());

        for (attribute, node) in description.graph.outputs() {
            let emitted = ctx.emit(node)?;
            let code = match emitted.uniform {
                Some(expression) if is_scalar_attribute(attribute) => {
                    let idx = ctx.output.uniform_expressions.add_scalar(expression);
                    format!("Material.Scalars[{idx}]")
                }
                Some(expression) => {
                    let idx = ctx.output.uniform_expressions.add_vector(expression);
                    format!("Material.Vectors[{idx}]")
                }
                None => emitted.code,
            };
            let _ = writeln!(source, "{} = {code};", attribute.name());

            match attribute {
                MaterialAttribute::WorldPositionOffset => {
                    ctx.output.flags |= ShaderMapFlags::USES_WORLD_POSITION_OFFSET
                        | ShaderMapFlags::MODIFIES_MESH_POSITION;
                }
                MaterialAttribute::PixelDepthOffset => {
                    ctx.output.flags |= ShaderMapFlags::USES_PIXEL_DEPTH_OFFSET;
                }
                _ => {}
            }
        }

        Ok(TranslatedMaterial {
            source: Arc::from(source),
            output: ctx.output,
        })
    }
}

fn is_scalar_attribute(attribute: MaterialAttribute) -> bool {
    matches!(
        attribute,
        MaterialAttribute::Metallic
            | MaterialAttribute::Roughness
            | MaterialAttribute::Opacity
            | MaterialAttribute::OpacityMask
            | MaterialAttribute::PixelDepthOffset
    )
}

struct Emitted {
    code: String,
    /// Set when the subtree only depends on parameters and constants.
    uniform: Option<UniformExpression>,
}

impl Emitted {
    fn code(code: String) -> Self {
        Self {
            code,
            uniform: None,
        }
    }
}

struct TranslationContext<'a> {
    description: &'a MaterialDescription,
    static_parameters: &'a StaticParameterSet,
    output: CompilationOutput,
    in_progress: FxHashSet<NodeId>,
    stacks_by_coordinates: FxHashMap<Option<NodeId>, usize>,
}

impl TranslationContext<'_> {
    fn error(&self, message: String) -> TranslationError {
        TranslationError::Message(format!("{}: {message}", self.description.name))
    }

    fn emit(&mut self, node: NodeId) -> Result<Emitted, TranslationError> {
        let node = self
            .description
            .graph
            .trace_input(&self.description.name, node)?;
        if !self.in_progress.insert(node) {
            return Err(self.error(format!("expression cycle through node {}", node.0)));
        }
        let result = self.emit_node(node);
        self.in_progress.remove(&node);
        result
    }

    fn emit_node(&mut self, id: NodeId) -> Result<Emitted, TranslationError> {
        let description = self.description;
        let Some(node) = description.graph.node(id) else {
            return Err(self.error(format!("missing node {}", id.0)));
        };

        match node {
            NodeKind::Constant(v) => Ok(Emitted {
                code: format!("float4({}, {}, {}, {})", v[0], v[1], v[2], v[3]),
                uniform: Some(UniformExpression::Constant(*v)),
            }),
            NodeKind::ScalarParameter { name, default } => Ok(Emitted {
                code: format!("Param({name})"),
                uniform: Some(UniformExpression::ScalarParameter {
                    name: name.clone(),
                    default: *default,
                }),
            }),
            NodeKind::VectorParameter { name, default } => Ok(Emitted {
                code: format!("Param({name})"),
                uniform: Some(UniformExpression::VectorParameter {
                    name: name.clone(),
                    default: *default,
                }),
            }),
            NodeKind::Math { op, inputs } => self.emit_math(id, *op, inputs),
            NodeKind::StaticSwitch {
                name,
                default,
                on_true,
                on_false,
            } => {
                let value = self.static_parameters.switch(name).unwrap_or(*default);
                let branch = if value { *on_true } else { *on_false };
                self.emit(branch)
            }
            NodeKind::TextureSample {
                parameter,
                texture,
                kind,
                coordinates,
            } => {
                let expression = TextureExpression {
                    parameter: parameter.clone(),
                    default: *texture,
                    kind: *kind,
                };
                let (kind, coordinates) = (*kind, *coordinates);
                let uv = match coordinates {
                    Some(c) => self.emit(c)?.code,
                    None => "TexCoord0".to_string(),
                };
                self.output.num_texture_samples += 1;
                let idx = self.output.uniform_expressions.add_texture(expression);
                if kind == TextureKind::Streaming {
                    self.output.flags |= ShaderMapFlags::USES_STREAMING_TEXTURES;
                    let (stack, layer) = self.add_streaming_layer(coordinates, idx);
                    Ok(Emitted::code(format!(
                        "SampleStack(Stack[{stack}], {layer}, {uv})"
                    )))
                } else {
                    Ok(Emitted::code(format!("Sample{kind:?}(Textures[{idx}], {uv})")))
                }
            }
            NodeKind::RuntimeStreamingTexture { parameter, texture } => {
                let expression = TextureExpression {
                    parameter: parameter.clone(),
                    default: *texture,
                    kind: TextureKind::Streaming,
                };
                let idx = self.output.uniform_expressions.add_texture(expression);
                let stacks = &mut self.output.uniform_expressions.streaming_stacks;
                let stack = match stacks
                    .iter()
                    .position(|s| s.preallocated_expression() == Some(idx))
                {
                    Some(existing) => existing,
                    None => {
                        stacks.push(StreamingTextureStack::preallocated(idx));
                        stacks.len() - 1
                    }
                };
                self.output.flags |= ShaderMapFlags::USES_STREAMING_TEXTURES
                    | ShaderMapFlags::HAS_RUNTIME_STREAMING_OUTPUT;
                Ok(Emitted::code(format!("SampleStack(Stack[{stack}], 0, WorldUV)")))
            }
            NodeKind::ExternalTexture { external_id } => {
                let idx = self
                    .output
                    .uniform_expressions
                    .add_external_texture(*external_id);
                Ok(Emitted::code(format!("SampleExternal(External[{idx}])")))
            }
            NodeKind::CollectionParameter { collection, name } => {
                let collections = &mut self.output.uniform_expressions.parameter_collections;
                let slot = match collections.iter().position(|c| c == collection) {
                    Some(slot) => slot,
                    None => {
                        collections.push(*collection);
                        collections.len() - 1
                    }
                };
                Ok(Emitted::code(format!("Collection[{slot}].{name}")))
            }
            NodeKind::TexCoord { index } => Ok(Emitted::code(format!("TexCoord{index}"))),
            NodeKind::SceneDepth => {
                self.output.flags |= ShaderMapFlags::USES_SCENE_DEPTH;
                Ok(Emitted::code("SceneDepth()".to_string()))
            }
            NodeKind::EyeAdaptation => {
                self.output.flags |= ShaderMapFlags::USES_EYE_ADAPTATION;
                Ok(Emitted::code("EyeAdaptation()".to_string()))
            }
            NodeKind::DistanceCullFade => {
                self.output.flags |= ShaderMapFlags::USES_DISTANCE_CULL_FADE;
                Ok(Emitted::code("DistanceCullFade()".to_string()))
            }
            NodeKind::Reroute { .. } => {
                Err(self.error(format!("unresolved reroute {}", id.0)))
            }
        }
    }

    fn emit_math(
        &mut self,
        id: NodeId,
        op: MathOp,
        inputs: &[NodeId],
    ) -> Result<Emitted, TranslationError> {
        let arity = match op {
            MathOp::Add | MathOp::Multiply => 2,
            MathOp::Saturate => 1,
        };
        if inputs.len() != arity {
            return Err(TranslationError::MissingInput {
                material: self.description.name.clone(),
                node: id.0,
                input: inputs.len() as u32,
            });
        }

        let mut operands = Vec::with_capacity(arity);
        for input in inputs {
            operands.push(self.emit(*input)?);
        }

        let code = match op {
            MathOp::Add => format!("({} + {})", operands[0].code, operands[1].code),
            MathOp::Multiply => format!("({} * {})", operands[0].code, operands[1].code),
            MathOp::Saturate => format!("saturate({})", operands[0].code),
        };

        let mut uniforms = operands.into_iter().map(|o| o.uniform);
        let uniform = match op {
            MathOp::Add | MathOp::Multiply => {
                match (uniforms.next().flatten(), uniforms.next().flatten()) {
                    (Some(a), Some(b)) if op == MathOp::Add => {
                        Some(UniformExpression::Add(Box::new(a), Box::new(b)))
                    }
                    (Some(a), Some(b)) => {
                        Some(UniformExpression::Multiply(Box::new(a), Box::new(b)))
                    }
                    _ => None,
                }
            }
            MathOp::Saturate => uniforms
                .next()
                .flatten()
                .map(|a| UniformExpression::Saturate(Box::new(a))),
        };

        Ok(Emitted { code, uniform })
    }

    fn add_streaming_layer(&mut self, coordinates: Option<NodeId>, expression: u32) -> (usize, u32) {
        let stacks = &mut self.output.uniform_expressions.streaming_stacks;
        if let Some(&stack) = self.stacks_by_coordinates.get(&coordinates) {
            if let Some(layer) = stacks[stack].find_layer(expression) {
                return (stack, layer);
            }
            if let Some(layer) = stacks[stack].add_layer(expression) {
                return (stack, layer);
            }
        }
        let mut stack = StreamingTextureStack::new();
        let layer = stack.add_layer(expression).unwrap_or(0);
        stacks.push(stack);
        let index = stacks.len() - 1;
        self.stacks_by_coordinates.insert(coordinates, index);
        debug_assert!(stacks[index].num_layers() <= MAX_STREAMING_LAYERS);
        (index, layer)
    }
}
