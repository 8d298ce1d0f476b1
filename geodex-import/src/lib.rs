//! # Geodex Import - Index Construction for Geodex
//!
//! Import-time counterpart of the `geodex` crate: takes typed ways and
//! coastlines from an (external) raw-data parser and produces the data
//! file plus the quadtree, low-zoom and water index files the query side
//! reads.
//!
//! ## Stages
//!
//! - **Quadtree construction**: features registered at the coarsest
//!   fitting level, arena flattened bottom-up ([`AreaIndexBuilder`])
//! - **Geometry optimization**: endpoint merging and per-zoom-step
//!   simplification with one embedded index per step
//!   ([`build_lod_index`])
//! - **Coastline rasterization**: scanline classification and flood fill
//!   into the land/water pyramid ([`WaterIndexBuilder`])
//! - **Pipeline**: bounded producer/consumer queue with a fixed worker
//!   pool; per-feature errors aggregate into an [`ImportReport`] instead
//!   of aborting the run
//!
//! [`Importer`] wires the stages together over one dataset directory.

pub mod area_builder;
pub mod importer;
pub mod lod_builder;
pub mod parameter;
pub mod pipeline;
pub mod report;
pub mod scanline;
pub mod simplify;
pub mod water_builder;
pub mod way;

pub use area_builder::AreaIndexBuilder;
pub use importer::{Importer, AREA_IDX, FEATURES_DAT, LOD_IDX, WATER_IDX};
pub use lod_builder::{build_lod_index, LodBuildStats};
pub use parameter::{BorderHint, ImportParameter, ImportParameterBuilder};
pub use pipeline::{work_queue, WorkConsumer, WorkProducer, WorkerPool};
pub use report::{ImportIssue, ImportReport};
pub use simplify::{pixel_error_degrees, simplify_polyline, SimplifyMethod};
pub use water_builder::{Coast, WaterIndexBuilder};
pub use way::{merge_ways, Way};
