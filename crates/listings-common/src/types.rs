//! Dataset identity types shared by discovery, caching, and storage

use serde::{Deserialize, Serialize};

/// Absolute location of one dataset in the public catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceLocation(String);

impl SourceLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceLocation {
    fn from(location: &str) -> Self {
        Self::new(location)
    }
}

/// Stable identifier of one dataset, derived from its [`SourceLocation`].
///
/// The identifier is the location with the dataset base prefix removed and
/// every path separator replaced by [`DatasetReference::SEPARATOR`]. It is the
/// cache key, the staging file stem, and the object-store key stem, so it
/// never contains `/` or `\`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetReference(String);

impl DatasetReference {
    /// Replacement for path separators inside the identifier
    pub const SEPARATOR: char = '-';

    /// Derive the identifier for `location`.
    ///
    /// Locations outside `base_prefix` fall back to their host-relative
    /// path. Query strings and fragments never take part in the key.
    pub fn from_location(location: &SourceLocation, base_prefix: &str) -> Self {
        let location = location.as_str();
        let suffix = match location.strip_prefix(base_prefix) {
            Some(rest) if !base_prefix.is_empty() => rest,
            _ => host_relative_path(location),
        };

        let suffix = suffix.split(['?', '#']).next().unwrap_or_default();

        let key = suffix
            .trim_matches(is_path_separator)
            .chars()
            .map(|c| if is_path_separator(c) { Self::SEPARATOR } else { c })
            .collect();

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for DatasetReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_path_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Strip `scheme://host` from a URL-like string
fn host_relative_path(location: &str) -> &str {
    match location.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => location,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASE: &str = "http://data.insideairbnb.com/";

    #[test]
    fn test_strips_base_prefix_and_replaces_separators() {
        let location = SourceLocation::new(
            "http://data.insideairbnb.com/united-states/ny/new-york-city/2023-03-06/data/listings.csv.gz",
        );
        let dataset = DatasetReference::from_location(&location, BASE);
        assert_eq!(
            dataset.as_str(),
            "united-states-ny-new-york-city-2023-03-06-data-listings.csv.gz"
        );
    }

    #[test]
    fn test_foreign_host_uses_path() {
        let location = SourceLocation::new("https://mirror.example.org/spain/madrid/listings.csv?x=1#top");
        let dataset = DatasetReference::from_location(&location, BASE);
        assert_eq!(dataset.as_str(), "spain-madrid-listings.csv");
    }

    #[test]
    fn test_location_equal_to_base_is_empty() {
        let dataset = DatasetReference::from_location(&SourceLocation::new(BASE), BASE);
        assert!(dataset.is_empty());
    }

    #[test]
    fn test_source_location_is_trimmed() {
        assert_eq!(SourceLocation::new("  http://a/b  ").as_str(), "http://a/b");
    }

    proptest! {
        #[test]
        fn prop_key_has_no_path_separators(path in "[a-z0-9/\\\\._-]{0,60}") {
            let location = SourceLocation::new(format!("{BASE}{path}"));
            let dataset = DatasetReference::from_location(&location, BASE);
            prop_assert!(!dataset.as_str().contains('/'));
            prop_assert!(!dataset.as_str().contains('\\'));
        }

        #[test]
        fn prop_derivation_is_deterministic(path in "[a-z0-9/._-]{1,60}") {
            let location = SourceLocation::new(format!("{BASE}{path}"));
            prop_assert_eq!(
                DatasetReference::from_location(&location, BASE),
                DatasetReference::from_location(&location.clone(), BASE)
            );
        }
    }
}
