//! Content checksums used as cache keys.
//!
//! A [`Checksum`] is an opaque 128-bit xxh3 digest. The cache layer only ever
//! compares checksums for equality; how they are derived is the business of a
//! [`ChecksumProvider`].

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

use crate::symbols::{Symbol, SymbolRef};
use crate::workspace::{MetadataReference, Project};

pub const HASH_SIZE: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checksum([u8; HASH_SIZE]);

impl Checksum {
    pub const NULL: Checksum = Checksum([0; HASH_SIZE]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; HASH_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Checksum of a single byte buffer.
    pub fn create(data: &[u8]) -> Self {
        Self(xxh3_128(data).to_le_bytes())
    }

    /// Checksum over an ordered list of parts. Parts are length-prefixed so
    /// `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn create_from_parts<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut builder = ChecksumBuilder::new();
        for part in parts {
            builder.update_bytes(part.as_ref());
        }
        builder.finish()
    }

    pub fn combine(first: &Checksum, second: &Checksum) -> Self {
        let mut builder = ChecksumBuilder::new();
        builder.update_checksum(first);
        builder.update_checksum(second);
        builder.finish()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD.encode(self.0))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self)
    }
}

/// Streaming checksum computation.
pub struct ChecksumBuilder {
    hasher: Xxh3,
}

impl Default for ChecksumBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self { hasher: Xxh3::new() }
    }

    pub fn update_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn update_str(&mut self, value: &str) -> &mut Self {
        self.update_bytes(value.as_bytes())
    }

    pub fn update_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn update_checksum(&mut self, checksum: &Checksum) -> &mut Self {
        self.hasher.update(checksum.as_bytes());
        self
    }

    pub fn finish(&self) -> Checksum {
        Checksum(self.hasher.digest128().to_le_bytes())
    }
}

/// Derives cache keys for the inputs of an index build.
pub trait ChecksumProvider: Send + Sync {
    /// Checksum of a metadata reference: the image content plus everything
    /// that changes how the reference is seen (aliases).
    fn metadata_checksum(&self, reference: &MetadataReference) -> Checksum;

    /// Checksum of the declared-symbol surface of a source project.
    fn source_checksum(&self, project: &Project) -> Checksum;
}

/// Default provider hashing actual content.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentChecksumProvider;

impl ChecksumProvider for ContentChecksumProvider {
    fn metadata_checksum(&self, reference: &MetadataReference) -> Checksum {
        let mut builder = ChecksumBuilder::new();
        builder.update_checksum(&reference.image.content_checksum());
        builder.update_u64(reference.aliases.len() as u64);
        for alias in &reference.aliases {
            builder.update_str(alias);
        }
        builder.finish()
    }

    fn source_checksum(&self, project: &Project) -> Checksum {
        let mut builder = ChecksumBuilder::new();
        builder.update_str(project.assembly.name());
        hash_symbol(&mut builder, &project.assembly.global_namespace());
        builder.finish()
    }
}

fn hash_symbol(builder: &mut ChecksumBuilder, symbol: &SymbolRef) {
    builder
        .update_str(symbol.name())
        .update_u64(symbol.kind() as u64)
        .update_u64(symbol.declared_accessibility() as u64)
        .update_u64(symbol.can_be_referenced_by_name() as u64);

    let members = symbol.get_members();
    builder.update_u64(members.len() as u64);
    for member in &members {
        hash_symbol(builder, member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_deterministic() {
        assert_eq!(Checksum::create(b"abc"), Checksum::create(b"abc"));
        assert_ne!(Checksum::create(b"abc"), Checksum::create(b"abd"));
    }

    #[test]
    fn test_parts_are_length_prefixed() {
        let first = Checksum::create_from_parts(["ab", "c"]);
        let second = Checksum::create_from_parts(["a", "bc"]);
        assert_ne!(first, second);
    }

    #[test]
    fn test_combine_is_order_sensitive() {
        let a = Checksum::create(b"a");
        let b = Checksum::create(b"b");
        assert_ne!(Checksum::combine(&a, &b), Checksum::combine(&b, &a));
    }

    #[test]
    fn test_from_slice_requires_exact_length() {
        let checksum = Checksum::create(b"value");
        assert_eq!(Checksum::from_slice(checksum.as_bytes()), Some(checksum));
        assert_eq!(Checksum::from_slice(&[0u8; 4]), None);
    }

    #[test]
    fn test_display_is_base64() {
        let rendered = Checksum::NULL.to_string();
        assert_eq!(rendered, "AAAAAAAAAAAAAAAAAAAAAA==");
    }
}
