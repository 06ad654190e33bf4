//! Render proxies and the parameter lookup chain.
//!
//! Every proxy answers `{scalar, vector, texture}` lookups from its own
//! overrides first and forwards anything unresolved to its parent. Override
//! variants ([`ProxyKind::Colored`] and friends) answer their fixed
//! parameters before consulting overrides.

use glam::Vec4;
use rustc_hash::FxHashMap;

use sigil_core::{ProxyId, TextureRef, TierMap};
use sigil_shader::ParameterSource;

use crate::queue::{ParameterValue, ProxyKind};
use crate::uniform_cache::UniformExpressionCache;

pub const SELECTION_COLOR_PARAMETER: &str = "SelectionColor";
pub const LIGHTMAP_RESOLUTION_PARAMETER: &str = "LightMapResolutionScale";
pub const DENSITY_COLOR_PARAMETER: &str = "DensityColor";

/// Parent chains longer than this are treated as cycles.
const MAX_CHAIN_DEPTH: usize = 64;

/// Named parameter overrides of one proxy.
#[derive(Debug, Default, Clone)]
pub struct ParameterOverrides {
    scalars: FxHashMap<String, f32>,
    vectors: FxHashMap<String, Vec4>,
    textures: FxHashMap<String, TextureRef>,
}

impl ParameterOverrides {
    pub fn set(&mut self, name: &str, value: ParameterValue) {
        self.clear(name);
        match value {
            ParameterValue::Scalar(v) => {
                self.scalars.insert(name.to_string(), v);
            }
            ParameterValue::Vector(v) => {
                self.vectors.insert(name.to_string(), v);
            }
            ParameterValue::Texture(t) => {
                self.textures.insert(name.to_string(), t);
            }
        }
    }

    pub fn clear(&mut self, name: &str) {
        self.scalars.remove(name);
        self.vectors.remove(name);
        self.textures.remove(name);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.vectors.is_empty() && self.textures.is_empty()
    }
}

/// Consumer-side renderable binding of a material.
#[derive(Debug)]
pub struct RenderProxy {
    pub(crate) kind: ProxyKind,
    pub(crate) overrides: ParameterOverrides,
    pub(crate) caches: TierMap<UniformExpressionCache>,
}

impl RenderProxy {
    pub(crate) fn new(kind: ProxyKind) -> Self {
        Self {
            kind,
            overrides: ParameterOverrides::default(),
            caches: TierMap::default(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &ProxyKind {
        &self.kind
    }

    #[must_use]
    pub fn overrides(&self) -> &ParameterOverrides {
        &self.overrides
    }

    #[must_use]
    pub fn cache(&self, tier: sigil_core::CapabilityTier) -> &UniformExpressionCache {
        &self.caches[tier]
    }

    fn own_scalar(&self, name: &str) -> Option<f32> {
        self.overrides.scalars.get(name).copied()
    }

    fn own_vector(&self, name: &str) -> Option<Vec4> {
        let fixed = match &self.kind {
            ProxyKind::Colored {
                parameter, color, ..
            } if parameter == name => Some(*color),
            ProxyKind::ColoredTextured {
                color_parameter,
                color,
                ..
            } if color_parameter == name => Some(*color),
            ProxyKind::SelectionColor { color, .. } if name == SELECTION_COLOR_PARAMETER => {
                Some(*color)
            }
            ProxyKind::LightingDensity {
                lightmap_resolution,
                ..
            } if name == LIGHTMAP_RESOLUTION_PARAMETER => {
                Some(Vec4::new(lightmap_resolution.x, lightmap_resolution.y, 1.0, 1.0))
            }
            ProxyKind::LightingDensity { color, .. } if name == DENSITY_COLOR_PARAMETER => {
                Some(*color)
            }
            _ => None,
        };
        fixed.or_else(|| self.overrides.vectors.get(name).copied())
    }

    fn own_texture(&self, name: &str) -> Option<TextureRef> {
        match &self.kind {
            ProxyKind::ColoredTextured {
                texture_parameter,
                texture,
                ..
            } if texture_parameter == name => Some(*texture),
            _ => self.overrides.textures.get(name).copied(),
        }
    }
}

/// Parameter view of one proxy through its parent chain.
pub struct ProxyParameters<'a> {
    proxies: &'a FxHashMap<ProxyId, RenderProxy>,
    proxy: ProxyId,
}

impl<'a> ProxyParameters<'a> {
    #[must_use]
    pub fn new(proxies: &'a FxHashMap<ProxyId, RenderProxy>, proxy: ProxyId) -> Self {
        Self { proxies, proxy }
    }

    fn find<T>(&self, lookup: impl Fn(&RenderProxy) -> Option<T>) -> Option<T> {
        let mut current = Some(self.proxy);
        for _ in 0..MAX_CHAIN_DEPTH {
            let proxy = self.proxies.get(&current?)?;
            if let Some(value) = lookup(proxy) {
                return Some(value);
            }
            current = proxy.kind.parent();
        }
        log::warn!("Parameter chain of {} exceeds {MAX_CHAIN_DEPTH} proxies", self.proxy);
        None
    }
}

impl ParameterSource for ProxyParameters<'_> {
    fn scalar_value(&self, name: &str) -> Option<f32> {
        self.find(|p| p.own_scalar(name))
    }

    fn vector_value(&self, name: &str) -> Option<Vec4> {
        self.find(|p| p.own_vector(name))
    }

    fn texture_value(&self, name: &str) -> Option<TextureRef> {
        self.find(|p| p.own_texture(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn chain() -> (FxHashMap<ProxyId, RenderProxy>, ProxyId, ProxyId, ProxyId) {
        let mut proxies = FxHashMap::default();
        let base = ProxyId::next();
        let mut base_proxy = RenderProxy::new(ProxyKind::Material {
            materials: TierMap::default(),
        });
        base_proxy.overrides.set("Roughness", ParameterValue::Scalar(0.5));
        base_proxy
            .overrides
            .set("Tint", ParameterValue::Vector(Vec4::ONE));
        proxies.insert(base, base_proxy);

        let instance = ProxyId::next();
        let mut instance_proxy = RenderProxy::new(ProxyKind::Instance {
            parent: base,
            materials: TierMap::default(),
        });
        instance_proxy
            .overrides
            .set("Roughness", ParameterValue::Scalar(0.9));
        proxies.insert(instance, instance_proxy);

        let colored = ProxyId::next();
        proxies.insert(
            colored,
            RenderProxy::new(ProxyKind::Colored {
                parent: instance,
                parameter: "Tint".into(),
                color: Vec4::new(1.0, 0.0, 0.0, 1.0),
            }),
        );
        (proxies, base, instance, colored)
    }

    #[test]
    fn test_lookup_forwards_to_parent() {
        let (proxies, base, instance, colored) = chain();
        assert_eq!(ProxyParameters::new(&proxies, base).scalar_value("Roughness"), Some(0.5));
        assert_eq!(
            ProxyParameters::new(&proxies, instance).scalar_value("Roughness"),
            Some(0.9)
        );
        assert_eq!(
            ProxyParameters::new(&proxies, instance).vector_value("Tint"),
            Some(Vec4::ONE)
        );
        let view = ProxyParameters::new(&proxies, colored);
        assert_eq!(view.vector_value("Tint"), Some(Vec4::new(1.0, 0.0, 0.0, 1.0)));
        assert_eq!(view.scalar_value("Roughness"), Some(0.9));
        assert_eq!(view.scalar_value("Missing"), None);
    }

    #[test]
    fn test_lighting_density_answers_resolution() {
        let (mut proxies, base, ..) = chain();
        let density = ProxyId::next();
        proxies.insert(
            density,
            RenderProxy::new(ProxyKind::LightingDensity {
                parent: base,
                color: Vec4::splat(0.25),
                lightmap_resolution: Vec2::new(64.0, 32.0),
            }),
        );
        let view = ProxyParameters::new(&proxies, density);
        assert_eq!(
            view.vector_value(LIGHTMAP_RESOLUTION_PARAMETER),
            Some(Vec4::new(64.0, 32.0, 1.0, 1.0))
        );
        assert_eq!(view.vector_value(DENSITY_COLOR_PARAMETER), Some(Vec4::splat(0.25)));
        assert_eq!(view.vector_value("Tint"), Some(Vec4::ONE));
    }

    #[test]
    fn test_overrides_replace_across_kinds() {
        let mut overrides = ParameterOverrides::default();
        overrides.set("X", ParameterValue::Scalar(1.0));
        overrides.set("X", ParameterValue::Texture(TextureRef(3)));
        assert!(overrides.scalars.is_empty());
        overrides.clear("X");
        assert!(overrides.is_empty());
    }
}
