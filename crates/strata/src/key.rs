// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Debug, Display, Formatter};

use bytes::{BufMut, Bytes, BytesMut};

/// An opaque, totally ordered cache key.
///
/// Keys are byte strings. Build them with [`CacheKey::from_parts`] when a request is identified
/// by a resource plus a set of variant parameters: parameters are sorted by name and every
/// component is length-prefixed, so logically equivalent requests produce identical bytes and
/// no two distinct requests can be confused by clever separators.
///
/// # Examples
///
/// ```
/// use strata::CacheKey;
///
/// let a = CacheKey::from_parts("avatar/7", [("size", "64"), ("format", "webp")]);
/// let b = CacheKey::from_parts("avatar/7", [("format", "webp"), ("size", "64")]);
/// assert_eq!(a, b);
///
/// let c = CacheKey::from_parts("avatar/7", [("size", "128"), ("format", "webp")]);
/// assert_ne!(a, c);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(Bytes);

impl CacheKey {
    /// Creates a key from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Creates a key from a resource identifier and variant parameters.
    pub fn from_parts<N, V>(resource: &str, variants: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut variants: Vec<(N, V)> = variants.into_iter().collect();
        variants.sort_by(|(left, left_value), (right, right_value)| {
            left.as_ref()
                .cmp(right.as_ref())
                .then_with(|| left_value.as_ref().cmp(right_value.as_ref()))
        });

        let mut buffer = BytesMut::new();
        put_component(&mut buffer, resource.as_bytes());
        for (name, value) in &variants {
            put_component(&mut buffer, name.as_ref().as_bytes());
            put_component(&mut buffer, value.as_ref().as_bytes());
        }

        Self(buffer.freeze())
    }

    /// Parses a key previously produced by [`to_hex`][Self::to_hex].
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        hex::decode(hex).ok().map(|bytes| Self(Bytes::from(bytes)))
    }

    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the lowercase hex encoding of the key, used as its durable-store name.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

fn put_component(buffer: &mut BytesMut, component: &[u8]) {
    let len = u32::try_from(component.len()).unwrap_or(u32::MAX);
    buffer.put_u32(len);
    buffer.put_slice(component);
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) if !text.chars().any(char::is_control) => f.write_str(text),
            _ => write!(f, "0x{}", self.to_hex()),
        }
    }
}

impl Debug for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheKey({self})")
    }
}
