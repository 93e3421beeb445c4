//! Hierarchical names.
//!
//! A [`Name`] is an ordered list of UTF-8 components, written in URI
//! form as `/a/b/c`. Components are stored unescaped; escaping is
//! applied only when rendering to URI form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::escape::{escape_component, unescape};

/// A hierarchical NDN-style name.
///
/// Names are totally ordered (component-wise lexicographic), which is
/// what keeps the replicated entry table sorted identically on every
/// participant.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    /// The empty (root) name.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a name from URI form (`/a/b/c`).
    ///
    /// Empty components are skipped, so `"/a//b/"` parses the same as
    /// `"/a/b"`. Percent-escapes inside components are decoded.
    pub fn from_uri(uri: &str) -> Self {
        let components = uri
            .split('/')
            .filter(|c| !c.is_empty())
            .map(unescape)
            .collect();
        Self { components }
    }

    /// Return a new name with `component` appended.
    pub fn append(&self, component: impl Into<String>) -> Self {
        let mut components = self.components.clone();
        components.push(component.into());
        Self { components }
    }

    /// Append a component in place.
    pub fn push(&mut self, component: impl Into<String>) {
        self.components.push(component.into());
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True if this is the root name.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The component at `i`, if any.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.components.get(i).map(String::as_str)
    }

    /// Iterate over the components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    /// True if every component of `self` matches the corresponding
    /// leading component of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.components.len() >= self.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| a == b)
    }

    /// Render to URI form with each component percent-escaped.
    pub fn to_uri(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for component in &self.components {
            out.push('/');
            out.push_str(&escape_component(component));
        }
        out
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.to_uri())
    }
}

impl From<&str> for Name {
    fn from(uri: &str) -> Self {
        Self::from_uri(uri)
    }
}

impl std::str::FromStr for Name {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uri(s))
    }
}
