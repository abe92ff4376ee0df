//! Consumer scoping of mappings.
//!
//! A producer can keep consumer specific mappings in a folder named after the
//! consumer, directly under the bundle root:
//!
//! ```text
//! mappings/
//!   baz-service/orders/get.json   <- only visible to baz-service
//!   bar-service/orders/get.json   <- only visible to bar-service
//!   health.json                   <- visible to every consumer
//! ```
//!
//! With per-consumer stubs enabled only the consumer's own folder and the
//! files at the root are served.

use crate::coordinate::StubCoordinate;
use crate::mapping::{Mapping, MappingBundle};
use tracing::debug;

/// Consumer folder a mapping is scoped to, if any.
pub fn consumer_scope(mapping: &Mapping) -> Option<String> {
    let mut segments = mapping.source_segments();
    // The last segment is the file itself
    segments.pop();
    segments.into_iter().next()
}

/// Whether `consumer_name` may see `mapping`.
pub fn is_visible_to(mapping: &Mapping, consumer_name: &str) -> bool {
    match consumer_scope(mapping) {
        Some(scope) => scope == consumer_name,
        None => true,
    }
}

/// Keep the mappings of `bundle` that `consumer_name` may see.
///
/// Returns the bundle unchanged when `enabled` is false. Filtering every
/// mapping away is a legal result.
pub fn filter_for_consumer(
    bundle: &MappingBundle,
    producer: &StubCoordinate,
    consumer_name: &str,
    enabled: bool,
) -> MappingBundle {
    if !enabled {
        return bundle.clone();
    }

    let filtered = bundle.retain(|m| is_visible_to(m, consumer_name));
    debug!(
        "Consumer '{}' sees {} of {} mappings of {}",
        consumer_name,
        filtered.len(),
        bundle.len(),
        producer
    );
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{RequestPattern, ResponseDefinition};

    fn mapping(source: &str) -> Mapping {
        Mapping::new(
            source,
            RequestPattern {
                url: Some(format!("/{source}")),
                ..Default::default()
            },
            ResponseDefinition::default(),
        )
    }

    fn bundle() -> MappingBundle {
        MappingBundle::new(
            "/tmp/foo/mappings",
            vec![
                mapping("baz-service/some/contracts/get.json"),
                mapping("bar-service/some/contracts/get.json"),
                mapping("health.json"),
            ],
        )
    }

    fn producer() -> StubCoordinate {
        "com.example:foo:1.0".parse().unwrap()
    }

    #[test]
    fn test_consumer_sees_own_folder_and_root() {
        let filtered = filter_for_consumer(&bundle(), &producer(), "baz-service", true);
        let sources: Vec<_> = filtered
            .mappings()
            .iter()
            .map(|m| m.source.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            sources,
            vec!["baz-service/some/contracts/get.json", "health.json"]
        );
    }

    #[test]
    fn test_disabled_returns_bundle_unchanged() {
        let original = bundle();
        let filtered = filter_for_consumer(&original, &producer(), "baz-service", false);
        assert_eq!(filtered, original);
    }

    #[test]
    fn test_match_is_exact() {
        let filtered = filter_for_consumer(&bundle(), &producer(), "Baz-Service", true);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.mappings()[0].source.to_string_lossy(), "health.json");
    }

    #[test]
    fn test_filtering_everything_is_not_an_error() {
        let scoped_only = MappingBundle::new(
            "/tmp/foo/mappings",
            vec![mapping("bar-service/get.json")],
        );
        let filtered = filter_for_consumer(&scoped_only, &producer(), "baz-service", true);
        assert!(filtered.is_empty());
        assert_eq!(scoped_only.len(), 1);
    }

    #[test]
    fn test_consumer_name_deeper_in_path_does_not_scope() {
        let m = mapping("orders/baz-service/get.json");
        assert_eq!(consumer_scope(&m).as_deref(), Some("orders"));
        assert!(!is_visible_to(&m, "baz-service"));
    }
}
