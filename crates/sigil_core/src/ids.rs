//! Process-unique identifiers.
//!
//! Every id type draws from its own atomic counter. Ids are never reused
//! within a process, so a stale id simply fails to resolve.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $prefix:literal) => {
        static $counter: AtomicU64 = AtomicU64::new(1);

        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Allocates a fresh id.
            #[inline]
            #[must_use]
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            #[inline]
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifies one material resource (description × quality × tier).
    ResourceId,
    NEXT_RESOURCE_ID,
    "resource"
);

define_id!(
    /// Identifies one render proxy on the render side.
    ProxyId,
    NEXT_PROXY_ID,
    "proxy"
);

define_id!(
    /// Identifies one in-flight shader map compile.
    CompileJobId,
    NEXT_COMPILE_JOB_ID,
    "job"
);

define_id!(
    /// Identifies one uniform buffer allocation.
    UniformBufferId,
    NEXT_UNIFORM_BUFFER_ID,
    "ubo"
);

define_id!(
    /// Identifies one streaming texture producer.
    StreamingProducerId,
    NEXT_STREAMING_PRODUCER_ID,
    "producer"
);

define_id!(
    /// Identifies one streaming texture stack allocation.
    StreamingAllocationId,
    NEXT_STREAMING_ALLOCATION_ID,
    "allocation"
);

/// Opaque reference to a texture owned by the texture subsystem.
///
/// The render world maps these to texture descriptors. The material system
/// only stores and forwards them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TextureRef(pub u32);

impl fmt::Display for TextureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = ResourceId::next();
        let b = ResourceId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_display_prefix() {
        let id = CompileJobId::next();
        assert!(id.to_string().starts_with("job#"));
    }
}
