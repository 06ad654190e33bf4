//! Stable content hashing.
//!
//! [`StableHasher`] feeds an xxh3-128 stream with explicitly length-prefixed,
//! little-endian encodings. Unlike `std::hash::Hash` with `FxHasher`, the
//! result does not depend on pointer width, symbol interning order or the
//! standard library version, so it may be persisted and used as a store key.

use xxhash_rust::xxh3::Xxh3;

/// Streaming 128-bit hasher with a stable encoding.
pub struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Xxh3::new() }
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_u64(bytes.len() as u64);
        self.inner.update(bytes);
        self
    }

    #[inline]
    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes())
    }

    #[inline]
    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.inner.update(&[v]);
        self
    }

    #[inline]
    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.write_u8(u8::from(v))
    }

    #[inline]
    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    #[inline]
    pub fn write_u128(&mut self, v: u128) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    /// Hashes the bit pattern, so `-0.0` and `0.0` differ.
    #[inline]
    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.write_u32(v.to_bits())
    }

    #[must_use]
    pub fn finish128(&self) -> u128 {
        self.inner.digest128()
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot 128-bit hash of a byte slice.
#[inline]
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u128 {
    xxhash_rust::xxh3::xxh3_128(bytes)
}
