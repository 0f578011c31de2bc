use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// A type-erased, thread-safe container.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Placeholder replaced by a node's directory basename in target names.
pub const MASK: char = '?';

/// Replaces every mask character in `target` with `basename`.
pub(crate) fn unmask(target: &str, basename: &str) -> String {
    target.replace(MASK, basename)
}

/// Basename of a build-relative node path, e.g. `pages/index` -> `index`.
pub(crate) fn basename(node_path: &str) -> &str {
    Utf8Path::new(node_path)
        .file_name()
        .unwrap_or(node_path)
}

/// Lexically resolves `.` and `..` components.
pub(crate) fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut acc = Utf8PathBuf::new();

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !acc.pop() {
                    acc.push("..");
                }
            }
            other => acc.push(other.as_str()),
        }
    }

    acc
}

/// The payload published for a target.
///
/// By convention a tech publishes either some text, a raw buffer, structured
/// data, or nothing at all. Arbitrary values can be carried as [`Dynamic`].
#[derive(Clone, Default)]
pub enum TargetValue {
    /// The target was built but carries no payload.
    #[default]
    Empty,
    Text(Arc<str>),
    Buffer(Arc<[u8]>),
    Data(serde_json::Value),
    Dynamic(Dynamic),
}

impl TargetValue {
    pub fn dynamic<T: Any + Send + Sync>(value: T) -> Self {
        TargetValue::Dynamic(Arc::new(value))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TargetValue::Empty)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TargetValue::Text(text) => Some(&**text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TargetValue::Text(text) => Some(text.as_bytes()),
            TargetValue::Buffer(buffer) => Some(&**buffer),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            TargetValue::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Downcasts a [`TargetValue::Dynamic`] payload to a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            TargetValue::Dynamic(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for TargetValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TargetValue::Empty, TargetValue::Empty) => true,
            (TargetValue::Text(a), TargetValue::Text(b)) => a == b,
            (TargetValue::Buffer(a), TargetValue::Buffer(b)) => a == b,
            (TargetValue::Data(a), TargetValue::Data(b)) => a == b,
            // opaque payloads compare by identity
            (TargetValue::Dynamic(a), TargetValue::Dynamic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for TargetValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetValue::Empty => write!(f, "Empty"),
            TargetValue::Text(text) => f.debug_tuple("Text").field(text).finish(),
            TargetValue::Buffer(buffer) => write!(f, "Buffer({} bytes)", buffer.len()),
            TargetValue::Data(data) => f.debug_tuple("Data").field(data).finish(),
            TargetValue::Dynamic(_) => write!(f, "Dynamic(*)"),
        }
    }
}

impl From<()> for TargetValue {
    fn from(_: ()) -> Self {
        TargetValue::Empty
    }
}

impl From<&str> for TargetValue {
    fn from(value: &str) -> Self {
        TargetValue::Text(value.into())
    }
}

impl From<String> for TargetValue {
    fn from(value: String) -> Self {
        TargetValue::Text(value.into())
    }
}

impl From<Vec<u8>> for TargetValue {
    fn from(value: Vec<u8>) -> Self {
        TargetValue::Buffer(value.into())
    }
}

impl From<serde_json::Value> for TargetValue {
    fn from(value: serde_json::Value) -> Self {
        TargetValue::Data(value)
    }
}
