//! Quadtree index construction.
//!
//! Features are registered at the coarsest level whose cell size covers
//! their bounding box and in every cell the box overlaps there (at most
//! 2x2, since the box fits one cell's dimensions). Cells accumulate in an
//! in-memory arena and are flattened to disk bottom-up, so every parent
//! record embeds final child offsets and the root lands in the
//! backpatched header.

use std::collections::BTreeMap;

use geodex::area_index::{child_slot, IndexCell, OffsetList};
use geodex::geo::{cell_height, cell_range, cell_width};
use geodex::{FileOffset, GeoBox, GeodexResult, StoreWriter, TypeId};

type CellKey = (u32, u32);

/// Arena builder for one quadtree index.
pub struct AreaIndexBuilder {
    max_level: u32,
    /// Per level, per cell, per type: registered data offsets.
    levels: Vec<BTreeMap<CellKey, BTreeMap<TypeId, Vec<FileOffset>>>>,
    entries: u64,
}

impl AreaIndexBuilder {
    pub fn new(max_level: u32) -> AreaIndexBuilder {
        AreaIndexBuilder {
            max_level,
            levels: (0..=max_level).map(|_| BTreeMap::new()).collect(),
            entries: 0,
        }
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Number of (cell, offset) registrations so far.
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// The deepest level whose cell dimensions cover the bounding box,
    /// clamped to the index maximum. Level 0 always fits.
    pub fn insertion_level(&self, bbox: &GeoBox) -> u32 {
        let mut level = self.max_level;
        while level > 0
            && (cell_width(level) < bbox.width() || cell_height(level) < bbox.height())
        {
            level -= 1;
        }
        level
    }

    /// Register a feature's data-block offset under its bounding box.
    pub fn insert(&mut self, offset: FileOffset, bbox: &GeoBox, type_id: TypeId) {
        debug_assert!(bbox.is_valid());

        let level = self.insertion_level(bbox);
        let (x1, y1, x2, y2) = cell_range(bbox, level);
        let cells = &mut self.levels[level as usize];

        for y in y1..=y2 {
            for x in x1..=x2 {
                cells
                    .entry((x, y))
                    .or_default()
                    .entry(type_id)
                    .or_default()
                    .push(offset);
                self.entries += 1;
            }
        }
    }

    /// Flatten the arena to disk at the writer's current position:
    /// a header (root offset, max level) followed by all cells, deepest
    /// level first. The root offset is backpatched once known.
    ///
    /// Iteration is over ordered maps throughout, so identical input
    /// produces byte-identical output.
    pub fn write(&self, writer: &mut StoreWriter) -> GeodexResult<()> {
        let header_pos = writer.get_pos()?;
        writer.write_u64(0)?;
        writer.write_u32(self.max_level)?;

        // Offsets of the cells one level below the one being written.
        let mut child_offsets: BTreeMap<CellKey, FileOffset> = BTreeMap::new();

        for level in (0..=self.max_level).rev() {
            let mut cells: BTreeMap<CellKey, IndexCell> = BTreeMap::new();

            for (key, types) in &self.levels[level as usize] {
                let cell = cells.entry(*key).or_default();
                for (type_id, offsets) in types {
                    let mut list = OffsetList::from_iter(offsets.iter().copied());
                    list.sort_unstable();
                    list.dedup();
                    cell.offsets.insert(*type_id, list);
                }
            }

            for ((x, y), offset) in &child_offsets {
                let parent = cells.entry((x / 2, y / 2)).or_default();
                parent.children[child_slot(*x, *y)] = *offset;
            }

            let mut written = BTreeMap::new();
            for (key, cell) in &cells {
                let position = writer.get_pos()?;
                cell.write(writer)?;
                written.insert(*key, position);
            }
            child_offsets = written;
        }

        let root_offset = match child_offsets.get(&(0, 0)) {
            Some(offset) => *offset,
            None => {
                // Empty index: a root with no children and no data.
                let position = writer.get_pos()?;
                IndexCell::new().write(writer)?;
                position
            }
        };

        writer.set_pos(header_pos)?;
        writer.write_u64(root_offset)?;
        writer.seek_end()?;

        Ok(())
    }
}
