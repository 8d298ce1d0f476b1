//! Shared fixtures for the integration tests.

use geodex::{GeoCoord, TypeConfig, TypeInfo};
use geodex_import::{BorderHint, Coast, ImportParameter, Way};

/// Route crate logs to the test harness output.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Registry with one optimizable line type and one plain type.
pub fn test_type_config() -> TypeConfig {
    let mut config = TypeConfig::new();
    config.register(TypeInfo::new("road").with_optimize_low_zoom());
    config.register(TypeInfo::new("building"));
    config
}

/// Import parameters sized for the synthetic dataset: water pyramid
/// around the island's magnification, water border hint (the dataset is
/// an island extract).
pub fn test_parameter() -> ImportParameter {
    ImportParameter::builder()
        .water_index_magnifications(6, 8)
        .border_hint(BorderHint::Water)
        .worker_count(2)
        .batch_size(2)
        .build()
        .expect("valid test parameters")
}

/// Three short road ways arranged as a corner spanning roughly two
/// degrees. Only the first overlaps the canonical query box around
/// (0.5, 0.5).
pub fn corner_ways() -> Vec<Way> {
    vec![
        Way::new(
            1,
            0,
            vec![GeoCoord::new(0.5, 0.45), GeoCoord::new(0.5, 0.55)],
        ),
        Way::new(
            2,
            0,
            vec![GeoCoord::new(0.5, 2.25), GeoCoord::new(0.5, 2.35)],
        ),
        Way::new(
            3,
            0,
            vec![GeoCoord::new(2.3, 2.3), GeoCoord::new(2.4, 2.3)],
        ),
    ]
}

/// A one-degree square island at (3, 3), wound counterclockwise so land
/// lies left of the travel direction.
pub fn square_island() -> Coast {
    Coast::new(
        100,
        vec![
            GeoCoord::new(3.0, 3.0),
            GeoCoord::new(3.0, 4.0),
            GeoCoord::new(4.0, 4.0),
            GeoCoord::new(4.0, 3.0),
            GeoCoord::new(3.0, 3.0),
        ],
    )
}
