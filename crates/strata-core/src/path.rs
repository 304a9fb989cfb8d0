use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A file path used as an identity key (projects, documents, generated outputs).
///
/// Two `FilePath`s compare equal when their lexically normalized forms match ignoring case:
/// `\` and `/` are interchangeable, `.` segments are dropped, `..` segments are folded into their
/// parent, duplicate and trailing separators are ignored. The filesystem is never consulted and
/// symlinks are not resolved.
///
/// The original spelling is preserved for display.
#[derive(Clone)]
pub struct FilePath {
    display: Arc<str>,
    key: Arc<str>,
}

impl FilePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        Self {
            display: Arc::from(path),
            key: Arc::from(normalize_key(path)),
        }
    }

    /// The path as originally spelled by the caller.
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// The normalized comparison key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Final path segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.display
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
    }
}

fn normalize_key(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let has_root = unified.starts_with('/');

    let mut stack: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match stack.last() {
                Some(last) if *last != ".." => {
                    stack.pop();
                }
                // `/..` stays at the root.
                _ if has_root => {}
                _ => stack.push(".."),
            },
            segment => stack.push(segment),
        }
    }

    let mut out = String::with_capacity(unified.len());
    if has_root {
        out.push('/');
    }
    out.push_str(&stack.join("/"));
    out.to_lowercase()
}

impl PartialEq for FilePath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for FilePath {}

impl Hash for FilePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for FilePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.display, f)
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<&str> for FilePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FilePath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for FilePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.display)
    }
}

impl<'de> Deserialize<'de> for FilePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}
