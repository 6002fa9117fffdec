//! Key derivation.
//!
//! A logical name is a sequence of components. Each component is percent-escaped
//! so that only `[A-Za-z0-9._-]` and `%XX` remain, and components are joined with
//! `:`. Since `:` never survives escaping, distinct component lists always yield
//! distinct names.
//!
//! The physical key is `prefix + name`, or `prefix + "#" + hex(xxh3_128(name))`
//! when that would exceed the substrate's key limit.

use std::fmt::Write;

use xxhash_rust::xxh3::xxh3_128;

const SEPARATOR: char = ':';
const HASHED_MARKER: char = '#';

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-')
}

/// Whether `prefix` is usable as a key namespace as-is.
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix.bytes().all(is_plain)
}

/// Percent-escape every byte outside `[A-Za-z0-9._-]`.
pub fn escape_component(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for byte in component.bytes() {
        if is_plain(byte) {
            escaped.push(byte as char);
        } else {
            let _ = write!(escaped, "%{:02X}", byte);
        }
    }
    escaped
}

/// Join escaped components into a logical name.
pub fn compose(components: &[&str]) -> String {
    let mut name = String::new();
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            name.push(SEPARATOR);
        }
        name.push_str(&escape_component(component));
    }
    name
}

/// Physical substrate key for `name` under `prefix`, bounded by `max_len`.
pub fn physical_key(prefix: &str, name: &str, max_len: usize) -> String {
    if prefix.len() + name.len() <= max_len {
        return format!("{}{}", prefix, name);
    }
    format!("{}{}{:032x}", prefix, HASHED_MARKER, xxh3_128(name.as_bytes()))
}
