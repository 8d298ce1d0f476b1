//! Land/water classification grid for background rendering.
//!
//! The import-time rasterizer turns coastline polylines into a pyramid of
//! per-magnification grids whose cells are classified land, water or
//! coast. At query time a bounding box maps to the cell range of the
//! nearest stored level, same-state neighbor cells coalesce into flat
//! rectangle tiles, and coast cells carry the coastline fragments needed
//! for precise rendering.
//!
//! File layout: varint min/max magnification, then one fixed-size header
//! per level (bounding box, cell geometry, flags, payload offset), then
//! per level the bit-packed 2-bit state array, a per-cell segment-offset
//! table for coast cells, and the segment block.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::area_index::MAX_INDEX_LEVEL;
use crate::errors::{GeodexError, GeodexResult};
use crate::geo::{GeoBox, GeoCoord};
use crate::store::{FileOffset, StoreReader, StoreWriter};

/// Size in bytes of one serialized level header.
pub const GROUND_LEVEL_HEADER_SIZE: u64 = 67;

/// Classification of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundState {
    Unknown,
    Land,
    Water,
    Coast,
}

impl GroundState {
    pub fn from_bits(bits: u8) -> GroundState {
        match bits & 3 {
            0 => GroundState::Unknown,
            1 => GroundState::Land,
            2 => GroundState::Water,
            _ => GroundState::Coast,
        }
    }

    pub fn to_bits(self) -> u8 {
        match self {
            GroundState::Unknown => 0,
            GroundState::Land => 1,
            GroundState::Water => 2,
            GroundState::Coast => 3,
        }
    }
}

/// One coastline fragment contributing to a coast cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoastSegment {
    pub from: GeoCoord,
    pub to: GeoCoord,
}

/// One classified ground rectangle (or coast cell) returned by a query.
#[derive(Debug, Clone)]
pub struct GroundTile {
    pub state: GroundState,
    /// Covered area; for non-coast states this may span several
    /// coalesced cells.
    pub bbox: GeoBox,
    /// Contributing coastline fragments; empty unless `state` is
    /// `Coast`.
    pub segments: Vec<CoastSegment>,
}

/// Metadata of one stored pyramid level.
#[derive(Debug, Clone)]
pub struct GroundLevel {
    pub bbox: GeoBox,
    pub cell_width: f64,
    pub cell_height: f64,
    pub cell_x_count: u32,
    pub cell_y_count: u32,
    pub has_cell_data: bool,
    /// State assumed for cells outside the stored grid; for a level
    /// without cell data, the state of every cell.
    pub default_state: GroundState,
    pub cell_array_offset: FileOffset,
    pub bytes_per_entry: u8,
}

impl GroundLevel {
    /// First cell coordinate of the stored grid on each axis, in global
    /// (renormalized) cell space. The level bounding box is cell-aligned
    /// at write time, so the division is exact.
    pub fn cell_origin(&self) -> (u32, u32) {
        let x = ((self.bbox.min_lon + 180.0) / self.cell_width).round() as u32;
        let y = ((self.bbox.min_lat + 90.0) / self.cell_height).round() as u32;
        (x, y)
    }

    /// Serialize the header at the writer's current position
    /// (`GROUND_LEVEL_HEADER_SIZE` bytes, fixed so it can be
    /// backpatched).
    pub fn write_header(&self, writer: &mut StoreWriter) -> GeodexResult<()> {
        writer.write_f64(self.bbox.min_lat)?;
        writer.write_f64(self.bbox.min_lon)?;
        writer.write_f64(self.bbox.max_lat)?;
        writer.write_f64(self.bbox.max_lon)?;
        writer.write_f64(self.cell_width)?;
        writer.write_f64(self.cell_height)?;
        writer.write_u32(self.cell_x_count)?;
        writer.write_u32(self.cell_y_count)?;
        writer.write_u8(self.has_cell_data as u8)?;
        writer.write_u8(self.default_state.to_bits())?;
        writer.write_u64(self.cell_array_offset)?;
        writer.write_u8(self.bytes_per_entry)?;
        Ok(())
    }

    /// Deserialize a header at the reader's current position.
    pub fn read_header(reader: &mut StoreReader) -> GeodexResult<GroundLevel> {
        let bbox = GeoBox {
            min_lat: reader.read_f64()?,
            min_lon: reader.read_f64()?,
            max_lat: reader.read_f64()?,
            max_lon: reader.read_f64()?,
        };
        let cell_width = reader.read_f64()?;
        let cell_height = reader.read_f64()?;
        let cell_x_count = reader.read_u32()?;
        let cell_y_count = reader.read_u32()?;
        let has_cell_data = reader.read_u8()? != 0;
        let default_state = GroundState::from_bits(reader.read_u8()?);
        let cell_array_offset = reader.read_u64()?;
        let bytes_per_entry = reader.read_u8()?;

        let level = GroundLevel {
            bbox,
            cell_width,
            cell_height,
            cell_x_count,
            cell_y_count,
            has_cell_data,
            default_state,
            cell_array_offset,
            bytes_per_entry,
        };

        if !level.bbox.is_valid()
            || level.cell_width <= 0.0
            || level.cell_height <= 0.0
            || level.cell_x_count == 0
            || level.cell_y_count == 0
        {
            return Err(GeodexError::corrupt(format!(
                "ground level with invalid geometry in '{}'",
                reader.path().display()
            )));
        }
        if level.bytes_per_entry > 8 {
            return Err(GeodexError::corrupt(format!(
                "ground level entry width {} out of range in '{}'",
                level.bytes_per_entry,
                reader.path().display()
            )));
        }
        if level.has_cell_data && level.cell_array_offset >= reader.size() {
            return Err(GeodexError::corrupt(format!(
                "ground level cell array offset {} past end of file in '{}'",
                level.cell_array_offset,
                reader.path().display()
            )));
        }

        Ok(level)
    }

    fn cell_count(&self) -> u64 {
        self.cell_x_count as u64 * self.cell_y_count as u64
    }

    /// Byte size of the bit-packed state array (4 cells per byte).
    fn packed_size(&self) -> u64 {
        (self.cell_count() + 3) / 4
    }

    fn coast_table_offset(&self) -> u64 {
        self.cell_array_offset + self.packed_size()
    }

    fn segment_block_offset(&self) -> u64 {
        self.coast_table_offset() + self.cell_count() * self.bytes_per_entry as u64
    }
}

/// Read handle over a land/water grid pyramid file.
pub struct WaterIndex {
    inner: Arc<WaterIndexInner>,
}

impl std::fmt::Debug for WaterIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaterIndex").finish_non_exhaustive()
    }
}

struct WaterIndexInner {
    reader: Mutex<StoreReader>,
    min_mag: u32,
    max_mag: u32,
    levels: Vec<GroundLevel>,
    closed: AtomicBool,
}

impl WaterIndex {
    pub fn open(path: &Path) -> GeodexResult<WaterIndex> {
        let mut reader = StoreReader::open(path)?;

        let min_mag = reader.read_vu32()?;
        let max_mag = reader.read_vu32()?;

        if min_mag > max_mag || max_mag > MAX_INDEX_LEVEL {
            return Err(GeodexError::corrupt(format!(
                "magnification range {}..{} invalid in '{}'",
                min_mag,
                max_mag,
                path.display()
            )));
        }

        let mut levels = Vec::with_capacity((max_mag - min_mag + 1) as usize);
        for _ in min_mag..=max_mag {
            levels.push(GroundLevel::read_header(&mut reader)?);
        }

        Ok(WaterIndex {
            inner: Arc::new(WaterIndexInner {
                reader: Mutex::new(reader),
                min_mag,
                max_mag,
                levels,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn magnification_range(&self) -> (u32, u32) {
        (self.inner.min_mag, self.inner.max_mag)
    }

    /// Ground tiles covering the bounding box at the stored level
    /// nearest to (at or below) the requested magnification.
    pub fn query(&self, bbox: &GeoBox, magnification: u32) -> GeodexResult<Vec<GroundTile>> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(GeodexError::Closed);
        }

        if self.inner.levels.is_empty() {
            return Ok(Vec::new());
        }

        let mag = magnification.clamp(self.inner.min_mag, self.inner.max_mag);
        let level = &self.inner.levels[(mag - self.inner.min_mag) as usize];

        match self.collect_tiles(level, bbox) {
            Ok(tiles) => Ok(tiles),
            Err(err) if err.is_corrupt() => {
                log::error!("returning no ground tiles on corrupt index: {err}");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
    }

    fn collect_tiles(&self, level: &GroundLevel, bbox: &GeoBox) -> GeodexResult<Vec<GroundTile>> {
        let world_cells_x = (360.0 / level.cell_width).round() as i64;
        let world_cells_y = (180.0 / level.cell_height).round() as i64;

        let qx1 = (((bbox.min_lon + 180.0) / level.cell_width).floor() as i64)
            .clamp(0, world_cells_x - 1) as u32;
        let qx2 = (((bbox.max_lon + 180.0) / level.cell_width).floor() as i64)
            .clamp(0, world_cells_x - 1) as u32;
        let qy1 = (((bbox.min_lat + 90.0) / level.cell_height).floor() as i64)
            .clamp(0, world_cells_y - 1) as u32;
        let qy2 = (((bbox.max_lat + 90.0) / level.cell_height).floor() as i64)
            .clamp(0, world_cells_y - 1) as u32;

        let (gx0, gy0) = level.cell_origin();

        let mut tiles = Vec::new();
        let mut active: Vec<OpenRun> = Vec::new();

        for y in qy1..=qy2 {
            let states = self.row_states(level, y, qx1, qx2, gx0, gy0)?;
            let mut row_runs: Vec<OpenRun> = Vec::new();
            let mut run: Option<(u32, GroundState)> = None;

            for (i, state) in states.iter().copied().enumerate() {
                let x = qx1 + i as u32;

                if state == GroundState::Coast {
                    if let Some((x0, s)) = run.take() {
                        row_runs.push(OpenRun::new(x0, x - 1, s, y));
                    }
                    tiles.push(self.coast_tile(level, x, y, gx0, gy0)?);
                    continue;
                }

                match run {
                    Some((_, s)) if s == state => {}
                    Some((x0, s)) => {
                        row_runs.push(OpenRun::new(x0, x - 1, s, y));
                        run = Some((x, state));
                    }
                    None => run = Some((x, state)),
                }
            }
            if let Some((x0, s)) = run {
                row_runs.push(OpenRun::new(x0, qx2, s, y));
            }

            // Extend vertically matching runs from the previous row,
            // flush the rest.
            let mut next_active = Vec::with_capacity(row_runs.len());
            for mut row_run in row_runs {
                let matched = active.iter().position(|open| {
                    open.x0 == row_run.x0
                        && open.x1 == row_run.x1
                        && open.state == row_run.state
                        && open.y1 + 1 == row_run.y0
                });
                if let Some(index) = matched {
                    let open = active.swap_remove(index);
                    row_run.y0 = open.y0;
                }
                next_active.push(row_run);
            }
            for open in active.drain(..) {
                tiles.push(open.into_tile(level));
            }
            active = next_active;
        }

        for open in active {
            tiles.push(open.into_tile(level));
        }

        Ok(tiles)
    }

    /// States for cells (x1..=x2, y) in global cell coordinates. Cells
    /// outside the stored grid take the level default.
    fn row_states(
        &self,
        level: &GroundLevel,
        y: u32,
        x1: u32,
        x2: u32,
        gx0: u32,
        gy0: u32,
    ) -> GeodexResult<Vec<GroundState>> {
        let width = (x2 - x1 + 1) as usize;
        let mut states = vec![level.default_state; width];

        if !level.has_cell_data {
            return Ok(states);
        }
        if y < gy0 || y >= gy0 + level.cell_y_count {
            return Ok(states);
        }

        let lo = x1.max(gx0);
        let hi = x2.min(gx0 + level.cell_x_count - 1);
        if lo > hi {
            return Ok(states);
        }

        let ny = (y - gy0) as u64;
        let nx = level.cell_x_count as u64;
        let first_cell = ny * nx + (lo - gx0) as u64;
        let last_cell = ny * nx + (hi - gx0) as u64;
        let first_byte = first_cell / 4;
        let last_byte = last_cell / 4;

        let bytes = {
            let mut reader = self.inner.reader.lock();
            reader.set_pos(level.cell_array_offset + first_byte)?;
            reader.read_bytes((last_byte - first_byte + 1) as usize)?
        };

        for cell in first_cell..=last_cell {
            let byte = bytes[(cell / 4 - first_byte) as usize];
            let bits = (byte >> (2 * (cell % 4))) & 3;
            let x = lo + (cell - first_cell) as u32;
            states[(x - x1) as usize] = GroundState::from_bits(bits);
        }

        Ok(states)
    }

    /// Build the tile for one coast cell, loading its contributing
    /// segments.
    fn coast_tile(
        &self,
        level: &GroundLevel,
        x: u32,
        y: u32,
        gx0: u32,
        gy0: u32,
    ) -> GeodexResult<GroundTile> {
        let bbox = cell_box(level, x, x, y, y);

        // Only stored cells carry segment lists; a coast default state
        // outside the grid yields a bare coast tile.
        let in_grid = level.has_cell_data
            && x >= gx0
            && x < gx0 + level.cell_x_count
            && y >= gy0
            && y < gy0 + level.cell_y_count;
        if !in_grid || level.bytes_per_entry == 0 {
            return Ok(GroundTile {
                state: GroundState::Coast,
                bbox,
                segments: Vec::new(),
            });
        }

        let cell_index = (y - gy0) as u64 * level.cell_x_count as u64 + (x - gx0) as u64;

        let segments = {
            let mut reader = self.inner.reader.lock();
            let entry_pos =
                level.coast_table_offset() + cell_index * level.bytes_per_entry as u64;
            reader.set_pos(entry_pos)?;
            let raw = reader.read_bytes(level.bytes_per_entry as usize)?;
            let entry = raw
                .iter()
                .rev()
                .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);

            if entry == 0 {
                Vec::new()
            } else {
                reader.set_pos(level.segment_block_offset() + entry - 1)?;
                let count = reader.read_vu32()?;
                let mut segments = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    segments.push(CoastSegment {
                        from: reader.read_coord()?,
                        to: reader.read_coord()?,
                    });
                }
                segments
            }
        };

        Ok(GroundTile {
            state: GroundState::Coast,
            bbox,
            segments,
        })
    }
}

impl Clone for WaterIndex {
    fn clone(&self) -> Self {
        WaterIndex {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A rectangle of same-state cells still open for vertical extension
/// while following rows keep matching its x extent.
#[derive(Debug)]
struct OpenRun {
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
    state: GroundState,
}

impl OpenRun {
    fn new(x0: u32, x1: u32, state: GroundState, y: u32) -> OpenRun {
        OpenRun {
            x0,
            x1,
            y0: y,
            y1: y,
            state,
        }
    }

    fn into_tile(self, level: &GroundLevel) -> GroundTile {
        GroundTile {
            state: self.state,
            bbox: cell_box(level, self.x0, self.x1, self.y0, self.y1),
            segments: Vec::new(),
        }
    }
}

fn cell_box(level: &GroundLevel, x0: u32, x1: u32, y0: u32, y1: u32) -> GeoBox {
    GeoBox {
        min_lat: y0 as f64 * level.cell_height - 90.0,
        min_lon: x0 as f64 * level.cell_width - 180.0,
        max_lat: (y1 + 1) as f64 * level.cell_height - 90.0,
        max_lon: (x1 + 1) as f64 * level.cell_width - 180.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Hand-write a one-level index: a 2x2 grid starting at cell (32, 32)
    /// of magnification 6 (lon/lat origin 0/0), states land, water,
    /// coast (with one segment), land.
    fn write_sample_index(path: &std::path::Path) {
        let cell_width = 360.0 / 64.0;
        let cell_height = 180.0 / 64.0;

        let mut writer = StoreWriter::create(path).unwrap();
        writer.write_vu32(6).unwrap();
        writer.write_vu32(6).unwrap();

        let header_pos = writer.get_pos().unwrap();
        let level = GroundLevel {
            bbox: GeoBox::new(0.0, 0.0, 2.0 * cell_height, 2.0 * cell_width),
            cell_width,
            cell_height,
            cell_x_count: 2,
            cell_y_count: 2,
            has_cell_data: true,
            default_state: GroundState::Water,
            cell_array_offset: header_pos + GROUND_LEVEL_HEADER_SIZE,
            bytes_per_entry: 1,
        };
        level.write_header(&mut writer).unwrap();

        // States packed 4 cells per byte: land, water, coast, land.
        writer.write_u8(0b01_11_10_01).unwrap();
        // Coast table: only cell 2 has segments, at block offset 0.
        writer.write_bytes(&[0, 0, 1, 0]).unwrap();
        // Segment block.
        writer.write_vu32(1).unwrap();
        writer
            .write_coord(&GeoCoord::new(0.5 * cell_height, 0.1))
            .unwrap();
        writer
            .write_coord(&GeoCoord::new(1.5 * cell_height, 0.2))
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_level_header_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("header.idx");

        let level = GroundLevel {
            bbox: GeoBox::new(-10.0, -20.0, 10.0, 20.0),
            cell_width: 0.5,
            cell_height: 0.25,
            cell_x_count: 80,
            cell_y_count: 80,
            has_cell_data: false,
            default_state: GroundState::Land,
            cell_array_offset: 0,
            bytes_per_entry: 0,
        };

        let mut writer = StoreWriter::create(&path).unwrap();
        level.write_header(&mut writer).unwrap();
        assert_eq!(writer.get_pos().unwrap(), GROUND_LEVEL_HEADER_SIZE);
        writer.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        let read = GroundLevel::read_header(&mut reader).unwrap();
        assert_eq!(read.bbox, level.bbox);
        assert_eq!(read.cell_x_count, 80);
        assert!(!read.has_cell_data);
        assert_eq!(read.default_state, GroundState::Land);
    }

    #[test]
    fn test_state_bits_round_trip() {
        for state in [
            GroundState::Unknown,
            GroundState::Land,
            GroundState::Water,
            GroundState::Coast,
        ] {
            assert_eq!(GroundState::from_bits(state.to_bits()), state);
        }
    }

    #[test]
    fn test_query_classifies_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("water.idx");
        write_sample_index(&path);

        let index = WaterIndex::open(&path).unwrap();
        let bbox = GeoBox::new(0.1, 0.1, 5.5, 11.0);
        let tiles = index.query(&bbox, 6).unwrap();

        let coast: Vec<_> = tiles
            .iter()
            .filter(|t| t.state == GroundState::Coast)
            .collect();
        let land = tiles
            .iter()
            .filter(|t| t.state == GroundState::Land)
            .count();
        let water = tiles
            .iter()
            .filter(|t| t.state == GroundState::Water)
            .count();
        let unknown = tiles
            .iter()
            .filter(|t| t.state == GroundState::Unknown)
            .count();

        assert_eq!(coast.len(), 1);
        assert_eq!(coast[0].segments.len(), 1);
        assert_eq!(land, 2);
        assert_eq!(water, 1);
        assert_eq!(unknown, 0);
    }

    #[test]
    fn test_query_outside_grid_uses_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outside.idx");
        write_sample_index(&path);

        let index = WaterIndex::open(&path).unwrap();
        // Entirely west of the stored grid.
        let bbox = GeoBox::new(0.1, -30.0, 2.0, -20.0);
        let tiles = index.query(&bbox, 6).unwrap();

        assert!(!tiles.is_empty());
        assert!(tiles.iter().all(|t| t.state == GroundState::Water));
    }

    #[test]
    fn test_query_coalesces_uniform_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uniform.idx");
        write_sample_index(&path);

        let index = WaterIndex::open(&path).unwrap();
        // A 4x4-cell area fully outside the grid collapses into one
        // default-state rectangle.
        let bbox = GeoBox::new(0.1, -80.0, 10.0, -60.0);
        let tiles = index.query(&bbox, 6).unwrap();

        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].state, GroundState::Water);
    }

    #[test]
    fn test_magnification_clamps_to_stored_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clamp.idx");
        write_sample_index(&path);

        let index = WaterIndex::open(&path).unwrap();
        let bbox = GeoBox::new(0.1, 0.1, 5.5, 11.0);

        // Both far above and far below the stored range resolve to the
        // single stored level.
        assert_eq!(index.query(&bbox, 20).unwrap().len(), index.query(&bbox, 1).unwrap().len());
    }

    #[test]
    fn test_open_rejects_bad_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badrange.idx");

        let mut writer = StoreWriter::create(&path).unwrap();
        writer.write_vu32(9).unwrap();
        writer.write_vu32(3).unwrap();
        writer.finish().unwrap();

        let err = WaterIndex::open(&path).unwrap_err();
        assert!(err.is_corrupt());
    }
}
