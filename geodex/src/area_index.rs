//! Quadtree index over feature bounding boxes.
//!
//! The index maps a bounding box plus a type predicate to the data-block
//! offsets that may contain matching features. Features live at the
//! coarsest level whose cell size covers their bounding box, so a range
//! query collects offsets at every visited cell along the descent, not
//! only at the leaves.
//!
//! File layout: a 12-byte header (root cell offset as u64, maximum level
//! as u32) followed by cell records. Cells are written children-first so
//! every record embeds final child offsets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::breaker::Breaker;
use crate::cache::BoundedCache;
use crate::errors::{GeodexError, GeodexResult};
use crate::geo::{cell_bounds, GeoBox};
use crate::store::{FileOffset, StoreReader};
use crate::type_config::{TypeConfig, TypeId, TypeSet};

/// Levels beyond this produce cells smaller than coordinate resolution.
pub const MAX_INDEX_LEVEL: u32 = 24;

/// Default number of cached index cells per index instance.
pub const DEFAULT_CELL_CACHE_SIZE: usize = 2048;

/// Per-type list of data-block offsets stored in one cell.
pub type OffsetList = SmallVec<[FileOffset; 8]>;

/// One materialized quadtree cell.
///
/// Child slot layout (y axis grows northwards):
/// slot 0 = north-west, 1 = north-east, 2 = south-west, 3 = south-east.
/// A zero child offset means the child cell holds no data.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexCell {
    pub children: [FileOffset; 4],
    pub offsets: BTreeMap<TypeId, OffsetList>,
}

impl IndexCell {
    pub fn new() -> IndexCell {
        IndexCell {
            children: [0; 4],
            offsets: BTreeMap::new(),
        }
    }

    /// Serialize this cell at the writer's current position.
    ///
    /// Offset lists must be sorted ascending; they are delta-encoded.
    pub fn write(&self, writer: &mut crate::store::StoreWriter) -> GeodexResult<()> {
        for child in self.children {
            writer.write_u64(child)?;
        }

        writer.write_vu32(self.offsets.len() as u32)?;

        for (type_id, offsets) in &self.offsets {
            debug_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));

            writer.write_vu32(*type_id as u32)?;
            writer.write_vu32(offsets.len() as u32)?;

            let mut last = 0u64;
            for offset in offsets {
                writer.write_vu64(offset - last)?;
                last = *offset;
            }
        }

        Ok(())
    }

    /// Deserialize a cell at the reader's current position, validating
    /// structural invariants against the file size and type registry.
    pub fn read(
        reader: &mut StoreReader,
        cell_offset: FileOffset,
        max_type_id: TypeId,
    ) -> GeodexResult<IndexCell> {
        let file_size = reader.size();
        let mut cell = IndexCell::new();

        for child in cell.children.iter_mut() {
            let offset = reader.read_u64()?;
            if offset >= file_size && offset != 0 {
                return Err(GeodexError::corrupt(format!(
                    "cell at {}: child offset {} past end of file ({} bytes) in '{}'",
                    cell_offset,
                    offset,
                    file_size,
                    reader.path().display()
                )));
            }
            *child = offset;
        }

        let type_count = reader.read_vu32()?;

        for _ in 0..type_count {
            let type_id = reader.read_vu32()?;
            if type_id > max_type_id as u32 {
                return Err(GeodexError::corrupt(format!(
                    "cell at {}: type id {} out of range (max {}) in '{}'",
                    cell_offset,
                    type_id,
                    max_type_id,
                    reader.path().display()
                )));
            }

            let offset_count = reader.read_vu32()?;
            let mut offsets = OffsetList::new();
            let mut last = 0u64;

            for _ in 0..offset_count {
                last += reader.read_vu64()?;
                offsets.push(last);
            }

            cell.offsets.insert(type_id as TypeId, offsets);
        }

        Ok(cell)
    }
}

impl Default for IndexCell {
    fn default() -> Self {
        IndexCell::new()
    }
}

/// Cell coordinates of a child slot, given the parent cell coordinates.
pub(crate) fn child_cell(x: u32, y: u32, slot: usize) -> (u32, u32) {
    match slot {
        0 => (2 * x, 2 * y + 1),
        1 => (2 * x + 1, 2 * y + 1),
        2 => (2 * x, 2 * y),
        _ => (2 * x + 1, 2 * y),
    }
}

/// The slot a cell occupies in its parent, from the cell's own
/// coordinates.
pub fn child_slot(x: u32, y: u32) -> usize {
    match (x % 2 == 0, y % 2 == 0) {
        (true, false) => 0,
        (false, false) => 1,
        (true, true) => 2,
        (false, true) => 3,
    }
}

/// Result of a quadtree range query.
#[derive(Debug, Clone)]
pub struct AreaIndexResult {
    /// Candidate data-block offsets, sorted and deduplicated.
    pub offsets: Vec<FileOffset>,
    /// Requested types this index fully answered for. Empty when the
    /// query was aborted.
    pub resolved_types: TypeSet,
    /// True when the breaker tripped and the result is partial.
    pub aborted: bool,
}

/// Shared descent logic over an on-file quadtree, used by both the
/// full-detail index and the embedded per-zoom-step indexes.
pub(crate) struct QuadTraversal<'a> {
    pub reader: &'a Mutex<StoreReader>,
    pub cache: &'a Mutex<BoundedCache<FileOffset, IndexCell>>,
    pub max_type_id: TypeId,
}

impl QuadTraversal<'_> {
    fn read_cell(&self, offset: FileOffset) -> GeodexResult<Arc<IndexCell>> {
        if let Some(cell) = self.cache.lock().get(&offset) {
            return Ok(cell);
        }

        let cell = {
            let mut reader = self.reader.lock();
            reader.set_pos(offset)?;
            IndexCell::read(&mut reader, offset, self.max_type_id)?
        };

        Ok(self.cache.lock().set(offset, cell))
    }

    /// Walk the tree level by level, collecting offsets of requested
    /// types at every visited cell and descending only into non-empty
    /// children overlapping the query box.
    ///
    /// Returns `(offsets, aborted)`. Corrupt cells degrade the query to
    /// an empty result instead of failing the caller.
    pub fn query(
        &self,
        root_offset: FileOffset,
        index_max_level: u32,
        bbox: &GeoBox,
        max_level: u32,
        types: &TypeSet,
        breaker: &Breaker,
    ) -> GeodexResult<(Vec<FileOffset>, bool)> {
        let limit = max_level.min(index_max_level);
        let mut collected: BTreeSet<FileOffset> = BTreeSet::new();
        let mut current: Vec<(u32, u32, FileOffset)> = vec![(0, 0, root_offset)];
        let mut level = 0u32;

        while !current.is_empty() && level <= limit {
            let mut next = Vec::new();

            for (x, y, offset) in current {
                if breaker.is_tripped() {
                    return Ok((collected.into_iter().collect(), true));
                }

                let cell = match self.read_cell(offset) {
                    Ok(cell) => cell,
                    Err(err) if err.is_corrupt() => {
                        error!("aborting query on corrupt index: {err}");
                        return Ok((Vec::new(), false));
                    }
                    Err(err) => return Err(err),
                };

                for (type_id, offsets) in &cell.offsets {
                    if types.contains(*type_id) {
                        collected.extend(offsets.iter().copied());
                    }
                }

                if level < limit {
                    for slot in 0..4 {
                        let child_offset = cell.children[slot];
                        if child_offset == 0 {
                            continue;
                        }

                        let (cx, cy) = child_cell(x, y, slot);
                        if cell_bounds(cx, cy, level + 1).intersects(bbox) {
                            next.push((cx, cy, child_offset));
                        }
                    }
                }
            }

            current = next;
            level += 1;
        }

        Ok((collected.into_iter().collect(), false))
    }
}

/// Read handle over a full-detail quadtree index file.
pub struct AreaIndex {
    inner: Arc<AreaIndexInner>,
}

impl std::fmt::Debug for AreaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AreaIndex").finish_non_exhaustive()
    }
}

struct AreaIndexInner {
    reader: Mutex<StoreReader>,
    cache: Mutex<BoundedCache<FileOffset, IndexCell>>,
    root_offset: FileOffset,
    max_level: u32,
    max_type_id: TypeId,
    closed: AtomicBool,
}

impl AreaIndex {
    /// Open an index file. Only the header is read; cells load lazily on
    /// query and are cached.
    pub fn open(
        path: &Path,
        cache_size: usize,
        type_config: &TypeConfig,
    ) -> GeodexResult<AreaIndex> {
        let mut reader = StoreReader::open(path)?;

        let root_offset = reader.read_u64()?;
        let max_level = reader.read_u32()?;

        if root_offset == 0 || root_offset >= reader.size() {
            return Err(GeodexError::corrupt(format!(
                "root cell offset {} out of range in '{}'",
                root_offset,
                path.display()
            )));
        }

        if max_level > MAX_INDEX_LEVEL {
            return Err(GeodexError::corrupt(format!(
                "index level {} exceeds limit {} in '{}'",
                max_level,
                MAX_INDEX_LEVEL,
                path.display()
            )));
        }

        Ok(AreaIndex {
            inner: Arc::new(AreaIndexInner {
                reader: Mutex::new(reader),
                cache: Mutex::new(BoundedCache::new(cache_size)),
                root_offset,
                max_level,
                max_type_id: type_config.max_type_id(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn max_level(&self) -> u32 {
        self.inner.max_level
    }

    /// Range query: candidate offsets for all requested types within the
    /// bounding box, visiting levels 0..=`max_level`.
    pub fn query(
        &self,
        bbox: &GeoBox,
        max_level: u32,
        types: &TypeSet,
        breaker: &Breaker,
    ) -> GeodexResult<AreaIndexResult> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(GeodexError::Closed);
        }

        let traversal = QuadTraversal {
            reader: &self.inner.reader,
            cache: &self.inner.cache,
            max_type_id: self.inner.max_type_id,
        };

        let (offsets, aborted) = traversal.query(
            self.inner.root_offset,
            self.inner.max_level,
            bbox,
            max_level,
            types,
            breaker,
        )?;

        // The full-detail index answers for every requested type unless
        // the traversal was cut short.
        let resolved_types = if aborted {
            TypeSet::default()
        } else {
            types.clone()
        };

        Ok(AreaIndexResult {
            offsets,
            resolved_types,
            aborted,
        })
    }

    /// Shrink or grow the cell cache.
    pub fn resize_cache(&self, capacity: usize) {
        self.inner.cache.lock().resize(capacity);
    }

    /// Mark the index closed; later queries fail with `Closed`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.cache.lock().clear();
    }
}

impl Clone for AreaIndex {
    fn clone(&self) -> Self {
        AreaIndex {
            inner: Arc::clone(&self.inner),
        }
    }
}
