//! # Geodex - File-Resident Spatial Index for Offline Maps
//!
//! Geodex turns raw geographic vector data into a compact on-disk spatial
//! database and answers bounding-box range queries against it without
//! loading the dataset into memory, sized for offline rendering and
//! routing on memory-constrained devices over multi-gigabyte datasets.
//!
//! ## Features
//!
//! - **Disk-Resident Quadtree**: features indexed at the coarsest level
//!   their bounding box fits, cells loaded on demand
//! - **Bounded Cache**: LRU cache with shared-value pinning, so objects
//!   handed out to a renderer are never reclaimed under it
//! - **Low-Zoom Optimization**: pre-simplified, zoom-bucketed feature
//!   copies selected per query so overview zooms stay cheap
//! - **Land/Water Grid**: coastlines rasterized into a per-magnification
//!   classification pyramid with exact coast fragments
//! - **Cooperative Cancellation**: queries poll a shared breaker and
//!   return partial results instead of blocking callers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use geodex::{AreaIndex, Breaker, GeoBox, TypeConfig, TypeSet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TypeConfig::new();
//! let index = AreaIndex::open("area.idx".as_ref(), 2048, &config)?;
//!
//! let bbox = GeoBox::new(48.1, 11.5, 48.2, 11.6);
//! let result = index.query(&bbox, 14, &TypeSet::full(&config), &Breaker::new())?;
//!
//! for offset in result.offsets {
//!     // load the feature payload at `offset` from the data file
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Import-time construction of the index files lives in the companion
//! `geodex_import` crate.

pub mod area_index;
pub mod breaker;
pub mod cache;
pub mod errors;
pub mod geo;
pub mod lod_index;
pub mod store;
pub mod type_config;
pub mod water_index;

// Re-export core types
pub use area_index::{AreaIndex, AreaIndexResult, IndexCell, DEFAULT_CELL_CACHE_SIZE, MAX_INDEX_LEVEL};
pub use breaker::Breaker;
pub use cache::BoundedCache;
pub use errors::{GeodexError, GeodexResult};
pub use geo::{GeoBox, GeoCoord};
pub use lod_index::{LodIndex, LodIndexResult};
pub use store::{FileOffset, StoreReader, StoreWriter};
pub use type_config::{TypeConfig, TypeId, TypeInfo, TypeSet};
pub use water_index::{CoastSegment, GroundState, GroundTile, WaterIndex};
