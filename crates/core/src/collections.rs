//! Include/exclude sets for namespaces and resource types.

use std::collections::BTreeSet;

/// Include/exclude rules over strings. Excludes win; an empty include set or
/// a `*` entry includes everything not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludesExcludes {
    includes: BTreeSet<String>,
    excludes: BTreeSet<String>,
}

impl IncludesExcludes {
    pub fn new() -> Self { Self::default() }

    pub fn includes<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn excludes<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn should_include(&self, item: &str) -> bool {
        if self.excludes.contains(item) {
            return false;
        }
        self.includes.is_empty() || self.includes.contains("*") || self.includes.contains(item)
    }

    /// Build from raw names, passing every name except `*` through `map`.
    pub fn generate<F>(includes: &[String], excludes: &[String], mut map: F) -> Self
    where
        F: FnMut(&str) -> String,
    {
        let mut mapped = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|item| if item == "*" { item.clone() } else { map(item) })
                .collect()
        };
        let inc = mapped(includes);
        let exc = mapped(excludes);
        Self::new().includes(inc).excludes(exc)
    }
}
