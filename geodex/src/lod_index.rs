//! Reader for pre-simplified, zoom-bucketed feature copies.
//!
//! The import-time geometry optimizer writes, per configured zoom step,
//! simplified feature data plus a quadtree over it, all into one file
//! with a trailing directory. At query time the finest step whose zoom is
//! at or below the requested zoom answers; types without optimized data
//! at that step are reported unresolved so the caller can fall back to
//! the full-detail index.
//!
//! File layout: u64 directory offset at position 0, then per-step data
//! blocks and embedded quadtrees, then the directory (step count, and per
//! step: zoom, embedded index header offset, per-type cell ranges).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::area_index::{IndexCell, QuadTraversal, MAX_INDEX_LEVEL};
use crate::breaker::Breaker;
use crate::cache::BoundedCache;
use crate::errors::{GeodexError, GeodexResult};
use crate::geo::{cell_range, GeoBox};
use crate::store::{FileOffset, StoreReader};
use crate::type_config::{TypeConfig, TypeId, TypeSet};

/// Populated cell range of one type at a step's index level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodTypeData {
    pub cell_x_start: u32,
    pub cell_y_start: u32,
    pub cell_x_count: u32,
    pub cell_y_count: u32,
}

impl LodTypeData {
    fn overlaps(&self, range: (u32, u32, u32, u32)) -> bool {
        let (x1, y1, x2, y2) = range;
        x1 < self.cell_x_start + self.cell_x_count
            && x2 >= self.cell_x_start
            && y1 < self.cell_y_start + self.cell_y_count
            && y2 >= self.cell_y_start
    }
}

/// One optimize step: a zoom bucket with its own embedded quadtree.
#[derive(Debug, Clone)]
struct LodStep {
    zoom: u32,
    root_offset: FileOffset,
    max_level: u32,
    types: BTreeMap<TypeId, LodTypeData>,
}

/// Result of a query against the pre-simplified index.
#[derive(Debug, Clone)]
pub struct LodIndexResult {
    pub offsets: Vec<FileOffset>,
    /// Requested types the selected step had optimized data for; the
    /// caller routes the rest to the full-detail index.
    pub resolved_types: TypeSet,
    pub aborted: bool,
}

/// Read handle over an optimized low-zoom index file.
pub struct LodIndex {
    inner: Arc<LodIndexInner>,
}

struct LodIndexInner {
    reader: Mutex<StoreReader>,
    cache: Mutex<BoundedCache<FileOffset, IndexCell>>,
    steps: Vec<LodStep>,
    max_type_id: TypeId,
    closed: AtomicBool,
}

impl LodIndex {
    /// Open an optimized index file, reading the directory and every
    /// step's embedded header.
    pub fn open(path: &Path, cache_size: usize, type_config: &TypeConfig) -> GeodexResult<LodIndex> {
        let mut reader = StoreReader::open(path)?;

        let dir_offset = reader.read_u64()?;
        if dir_offset == 0 || dir_offset >= reader.size() {
            return Err(GeodexError::corrupt(format!(
                "directory offset {} out of range in '{}'",
                dir_offset,
                path.display()
            )));
        }

        reader.set_pos(dir_offset)?;
        let step_count = reader.read_vu32()?;
        let mut steps = Vec::with_capacity(step_count as usize);

        for _ in 0..step_count {
            let zoom = reader.read_vu32()?;
            let header_offset = reader.read_u64()?;
            let type_count = reader.read_vu32()?;
            let mut types = BTreeMap::new();

            for _ in 0..type_count {
                let type_id = reader.read_vu32()?;
                if type_id > type_config.max_type_id() as u32 {
                    return Err(GeodexError::corrupt(format!(
                        "optimize step {}: type id {} out of range in '{}'",
                        zoom,
                        type_id,
                        path.display()
                    )));
                }

                types.insert(
                    type_id as TypeId,
                    LodTypeData {
                        cell_x_start: reader.read_vu32()?,
                        cell_y_start: reader.read_vu32()?,
                        cell_x_count: reader.read_vu32()?,
                        cell_y_count: reader.read_vu32()?,
                    },
                );
            }

            // The embedded header is resolved after the directory scan
            // so the cursor stays inside the directory here.
            steps.push((zoom, header_offset, types));
        }

        let mut resolved = Vec::with_capacity(steps.len());

        for (zoom, header_offset, types) in steps {
            let mut step = LodStep {
                zoom,
                root_offset: 0,
                max_level: 0,
                types,
            };
            if header_offset >= reader.size() {
                return Err(GeodexError::corrupt(format!(
                    "optimize step {}: index header offset {} past end of file in '{}'",
                    step.zoom,
                    header_offset,
                    path.display()
                )));
            }

            reader.set_pos(header_offset)?;
            step.root_offset = reader.read_u64()?;
            step.max_level = reader.read_u32()?;

            if step.root_offset == 0 || step.root_offset >= reader.size() {
                return Err(GeodexError::corrupt(format!(
                    "optimize step {}: root cell offset {} out of range in '{}'",
                    step.zoom,
                    step.root_offset,
                    path.display()
                )));
            }
            if step.max_level > MAX_INDEX_LEVEL {
                return Err(GeodexError::corrupt(format!(
                    "optimize step {}: index level {} exceeds limit in '{}'",
                    step.zoom,
                    step.max_level,
                    path.display()
                )));
            }

            resolved.push(step);
        }

        let mut steps = resolved;
        steps.sort_by_key(|step| step.zoom);

        Ok(LodIndex {
            inner: Arc::new(LodIndexInner {
                reader: Mutex::new(reader),
                cache: Mutex::new(BoundedCache::new(cache_size)),
                steps,
                max_type_id: type_config.max_type_id(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Zoom steps available, ascending.
    pub fn zoom_steps(&self) -> Vec<u32> {
        self.inner.steps.iter().map(|step| step.zoom).collect()
    }

    /// True if the requested zoom falls inside the optimized range.
    /// Past the finest stored step the full-detail index takes over.
    pub fn has_optimizations(&self, zoom: u32) -> bool {
        let max = match self.inner.steps.last() {
            Some(step) => step.zoom,
            None => return false,
        };
        zoom <= max && self.inner.steps.iter().any(|step| step.zoom <= zoom)
    }

    /// Select the finest step at or below the requested zoom, so data is
    /// never more simplified than necessary and never under-simplified.
    fn select_step(&self, zoom: u32) -> Option<&LodStep> {
        if !self.has_optimizations(zoom) {
            return None;
        }
        self.inner
            .steps
            .iter()
            .filter(|step| step.zoom <= zoom)
            .last()
    }

    /// Range query against the step selected for `zoom`.
    pub fn query(
        &self,
        bbox: &GeoBox,
        zoom: u32,
        types: &TypeSet,
        breaker: &Breaker,
    ) -> GeodexResult<LodIndexResult> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(GeodexError::Closed);
        }

        let step = match self.select_step(zoom) {
            Some(step) => step,
            None => {
                return Ok(LodIndexResult {
                    offsets: Vec::new(),
                    resolved_types: TypeSet::default(),
                    aborted: false,
                })
            }
        };

        let mut resolved_types = TypeSet::default();
        let mut query_types = TypeSet::default();
        let range = cell_range(bbox, step.max_level);

        for type_id in types.iter() {
            if let Some(data) = step.types.get(&type_id) {
                resolved_types.insert(type_id);
                if data.overlaps(range) {
                    query_types.insert(type_id);
                }
            }
        }

        // Every resolved type misses the query box entirely: answered
        // without touching the tree.
        if query_types.is_empty() {
            return Ok(LodIndexResult {
                offsets: Vec::new(),
                resolved_types,
                aborted: false,
            });
        }

        let traversal = QuadTraversal {
            reader: &self.inner.reader,
            cache: &self.inner.cache,
            max_type_id: self.inner.max_type_id,
        };

        let (offsets, aborted) = traversal.query(
            step.root_offset,
            step.max_level,
            bbox,
            step.max_level,
            &query_types,
            breaker,
        )?;

        if aborted {
            resolved_types = TypeSet::default();
        }

        Ok(LodIndexResult {
            offsets,
            resolved_types,
            aborted,
        })
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.cache.lock().clear();
    }
}

impl Clone for LodIndex {
    fn clone(&self) -> Self {
        LodIndex {
            inner: Arc::clone(&self.inner),
        }
    }
}
