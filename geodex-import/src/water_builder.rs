//! Coastline rasterization into the land/water grid pyramid.
//!
//! Per pyramid level the grid starts fully unknown. Cells touched by a
//! coastline segment become coast. Horizontal and vertical scanline
//! passes then classify the direct neighbors of each crossing segment
//! from its travel direction (land lies on the left), processing segments
//! ordered by their extent keys so shared vertices cannot double-toggle a
//! cell. Grid border cells no coastline reached take the configured
//! hint, and a flood fill propagates the resolved states into the rest.
//!
//! Levels are data-independent and rasterize on the worker pool.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, info};
use parking_lot::Mutex;

use geodex::geo::{cell_height, cell_range, cell_width};
use geodex::store::{bytes_needed, vu64_len};
use geodex::water_index::{GroundLevel, GroundState};
use geodex::{GeoBox, GeoCoord, GeodexResult, StoreWriter};

use crate::parameter::{BorderHint, ImportParameter};
use crate::pipeline::WorkerPool;
use crate::report::ImportReport;
use crate::scanline::{scan_convert_line, ScanCell};

/// An ordered point sequence approximating a coastline. Following the
/// travel direction, land is on the left.
#[derive(Debug, Clone, PartialEq)]
pub struct Coast {
    pub id: u64,
    pub nodes: Vec<GeoCoord>,
}

impl Coast {
    pub fn new(id: u64, nodes: Vec<GeoCoord>) -> Coast {
        Coast { id, nodes }
    }

    pub fn is_valid(&self) -> bool {
        self.nodes.len() >= 2 && self.nodes.iter().all(|node| node.is_valid())
    }
}

/// Builds the water index file from a coastline set.
pub struct WaterIndexBuilder<'a> {
    parameter: &'a ImportParameter,
}

impl<'a> WaterIndexBuilder<'a> {
    pub fn new(parameter: &'a ImportParameter) -> WaterIndexBuilder<'a> {
        WaterIndexBuilder { parameter }
    }

    /// Rasterize all pyramid levels over `data_bbox` and write the file.
    /// Malformed coastlines are reported and skipped.
    pub fn build(
        &self,
        coasts: &[Coast],
        data_bbox: &GeoBox,
        writer: &mut StoreWriter,
        report: &mut ImportReport,
    ) -> GeodexResult<()> {
        let min_mag = self.parameter.water_index_min_mag();
        let max_mag = self.parameter.water_index_max_mag();

        let mut valid: Vec<&Coast> = Vec::with_capacity(coasts.len());
        for coast in coasts {
            if coast.is_valid() {
                valid.push(coast);
            } else {
                report.record(
                    coast.id,
                    "coastline",
                    "coastline has fewer than 2 nodes or invalid coordinates",
                );
            }
        }
        report.coastlines_rasterized += valid.len() as u64;

        let hint = match self.parameter.border_hint() {
            BorderHint::Land => GroundState::Land,
            BorderHint::Water => GroundState::Water,
        };

        let mags: Vec<u32> = (min_mag..=max_mag).collect();
        let grids: Vec<Mutex<Option<LevelGrid>>> =
            mags.iter().map(|_| Mutex::new(None)).collect();

        let pool = WorkerPool::new(self.parameter.worker_count().min(mags.len()));
        pool.run(
            mags.len(),
            |producer| {
                for (index, &mag) in mags.iter().enumerate() {
                    producer.push((index, mag));
                }
            },
            |(index, mag): (usize, u32)| {
                let grid = rasterize_level(&valid, data_bbox, mag, hint);
                *grids[index].lock() = Some(grid);
            },
        );

        writer.write_vu32(min_mag)?;
        writer.write_vu32(max_mag)?;

        let mut header_positions = Vec::with_capacity(grids.len());
        for grid in &grids {
            let grid = grid.lock();
            let grid = grid.as_ref().expect("level rasterized");
            header_positions.push(writer.get_pos()?);
            // Placeholder, patched with payload offsets below.
            grid.provisional_header(hint).write_header(writer)?;
        }

        for (index, slot) in grids.iter().enumerate() {
            let grid = slot.lock().take().expect("level rasterized");
            let header = write_level_payload(&grid, hint, writer)?;

            writer.set_pos(header_positions[index])?;
            header.write_header(writer)?;
            writer.seek_end()?;

            debug!(
                "water level {}: {}x{} cells, data={}",
                mags[index], grid.nx, grid.ny, header.has_cell_data
            );
        }

        info!(
            "rasterized {} coastlines into {} water levels",
            valid.len(),
            mags.len()
        );

        Ok(())
    }
}

/// One rasterized pyramid level, cell states byte-per-cell until
/// serialization packs them.
struct LevelGrid {
    bbox: GeoBox,
    cell_width: f64,
    cell_height: f64,
    /// Global cell coordinates of the grid origin.
    x0: i64,
    y0: i64,
    nx: u32,
    ny: u32,
    states: Vec<u8>,
    /// Per coast cell (local coordinates): contributing segments.
    coast_segments: BTreeMap<(u32, u32), Vec<(GeoCoord, GeoCoord)>>,
}

impl LevelGrid {
    fn state(&self, x: u32, y: u32) -> GroundState {
        GroundState::from_bits(self.states[(y as usize) * (self.nx as usize) + x as usize])
    }

    fn set_state(&mut self, x: u32, y: u32, state: GroundState) {
        self.states[(y as usize) * (self.nx as usize) + x as usize] = state.to_bits();
    }

    /// Set a cell to `state` if it is inside the grid and still unknown.
    fn mark_unknown(&mut self, x: i64, y: i64, state: GroundState) {
        if x < 0 || y < 0 || x >= self.nx as i64 || y >= self.ny as i64 {
            return;
        }
        if self.state(x as u32, y as u32) == GroundState::Unknown {
            self.set_state(x as u32, y as u32, state);
        }
    }

    fn uniform_state(&self) -> Option<GroundState> {
        let first = self.states[0];
        self.states
            .iter()
            .all(|state| *state == first)
            .then(|| GroundState::from_bits(first))
    }

    fn provisional_header(&self, hint: GroundState) -> GroundLevel {
        GroundLevel {
            bbox: self.bbox,
            cell_width: self.cell_width,
            cell_height: self.cell_height,
            cell_x_count: self.nx,
            cell_y_count: self.ny,
            has_cell_data: false,
            default_state: hint,
            cell_array_offset: 0,
            bytes_per_entry: 0,
        }
    }
}

/// One coastline segment in cell-unit coordinates with its geographic
/// endpoints.
struct RasterLine {
    ax: f64,
    ay: f64,
    bx: f64,
    by: f64,
}

impl RasterLine {
    /// |slope| against the scan axis, the tie-break between segments
    /// with equal extent keys.
    fn slope_x(&self) -> f64 {
        ((self.by - self.ay) / (self.bx - self.ax)).abs()
    }

    fn slope_y(&self) -> f64 {
        ((self.bx - self.ax) / (self.by - self.ay)).abs()
    }
}

fn rasterize_level(
    coasts: &[&Coast],
    data_bbox: &GeoBox,
    mag: u32,
    hint: GroundState,
) -> LevelGrid {
    let width = cell_width(mag);
    let height = cell_height(mag);

    let x0 = ((data_bbox.min_lon + 180.0) / width).floor() as i64;
    let x1 = ((data_bbox.max_lon + 180.0) / width).floor() as i64;
    let y0 = ((data_bbox.min_lat + 90.0) / height).floor() as i64;
    let y1 = ((data_bbox.max_lat + 90.0) / height).floor() as i64;
    let nx = (x1 - x0 + 1) as u32;
    let ny = (y1 - y0 + 1) as u32;

    let mut grid = LevelGrid {
        bbox: GeoBox {
            min_lat: y0 as f64 * height - 90.0,
            min_lon: x0 as f64 * width - 180.0,
            max_lat: (y1 + 1) as f64 * height - 90.0,
            max_lon: (x1 + 1) as f64 * width - 180.0,
        },
        cell_width: width,
        cell_height: height,
        x0,
        y0,
        nx,
        ny,
        states: vec![GroundState::Unknown.to_bits(); nx as usize * ny as usize],
        coast_segments: BTreeMap::new(),
    };

    set_coastline_cells(&mut grid, coasts, mag);

    let lines = collect_lines(coasts, width, height);
    scan_cells_horizontally(&mut grid, &lines);
    scan_cells_vertically(&mut grid, &lines);

    // Grid border cells no coastline decided take the configured hint.
    for x in 0..nx {
        grid.mark_unknown(x as i64, 0, hint);
        grid.mark_unknown(x as i64, ny as i64 - 1, hint);
    }
    for y in 0..ny {
        grid.mark_unknown(0, y as i64, hint);
        grid.mark_unknown(nx as i64 - 1, y as i64, hint);
    }

    fill(&mut grid);

    // Pockets fully enclosed by coast cells have no resolved neighbor
    // to inherit from; they fall back to the hint.
    let mut leftover = 0u64;
    for y in 0..ny {
        for x in 0..nx {
            if grid.state(x, y) == GroundState::Unknown {
                grid.set_state(x, y, hint);
                leftover += 1;
            }
        }
    }
    if leftover > 0 {
        debug!("water level {}: {} enclosed cells took the border hint", mag, leftover);
    }

    grid
}

/// Mark every cell touched by a segment's bounding box as coast and
/// attach the segment to those cells.
fn set_coastline_cells(grid: &mut LevelGrid, coasts: &[&Coast], mag: u32) {
    for coast in coasts {
        for pair in coast.nodes.windows(2) {
            let seg_box = GeoBox::from_coords(pair).expect("two nodes");
            let (sx1, sy1, sx2, sy2) = cell_range(&seg_box, mag);

            for y in sy1..=sy2 {
                for x in sx1..=sx2 {
                    let lx = x as i64 - grid.x0;
                    let ly = y as i64 - grid.y0;
                    if lx < 0 || ly < 0 || lx >= grid.nx as i64 || ly >= grid.ny as i64 {
                        continue;
                    }

                    grid.set_state(lx as u32, ly as u32, GroundState::Coast);
                    grid.coast_segments
                        .entry((lx as u32, ly as u32))
                        .or_default()
                        .push((pair[0], pair[1]));
                }
            }
        }
    }
}

fn collect_lines(coasts: &[&Coast], width: f64, height: f64) -> Vec<RasterLine> {
    let mut lines = Vec::new();
    for coast in coasts {
        for pair in coast.nodes.windows(2) {
            lines.push(RasterLine {
                ax: (pair[0].lon + 180.0) / width,
                ay: (pair[0].lat + 90.0) / height,
                bx: (pair[1].lon + 180.0) / width,
                by: (pair[1].lat + 90.0) / height,
            });
        }
    }
    lines
}

/// Classify the west/east neighbors of every segment from its vertical
/// travel direction. Two passes: ascending by lower x extent for the
/// west side, descending by upper x extent for the east side, so at
/// shared vertices the outermost segment decides first.
fn scan_cells_horizontally(grid: &mut LevelGrid, lines: &[RasterLine]) {
    let mut ordered: Vec<&RasterLine> = lines.iter().collect();
    let mut cells: Vec<ScanCell> = Vec::new();

    ordered.sort_by(|a, b| {
        a.ax.min(a.bx)
            .total_cmp(&b.ax.min(b.bx))
            .then(a.slope_x().total_cmp(&b.slope_x()))
    });

    for line in &ordered {
        cells.clear();
        scan_convert_line(line.ax, line.ay, line.bx, line.by, &mut cells);

        for cell in &cells {
            let lx = cell.x as i64 - grid.x0;
            let ly = cell.y as i64 - grid.y0;
            if line.by > line.ay {
                grid.mark_unknown(lx - 1, ly, GroundState::Land);
            } else if line.by < line.ay {
                grid.mark_unknown(lx - 1, ly, GroundState::Water);
            }
        }
    }

    ordered.sort_by(|a, b| {
        b.ax.max(b.bx)
            .total_cmp(&a.ax.max(a.bx))
            .then(b.slope_x().total_cmp(&a.slope_x()))
    });

    for line in &ordered {
        cells.clear();
        scan_convert_line(line.ax, line.ay, line.bx, line.by, &mut cells);

        for cell in &cells {
            let lx = cell.x as i64 - grid.x0;
            let ly = cell.y as i64 - grid.y0;
            if line.by > line.ay {
                grid.mark_unknown(lx + 1, ly, GroundState::Water);
            } else if line.by < line.ay {
                grid.mark_unknown(lx + 1, ly, GroundState::Land);
            }
        }
    }
}

/// Same as the horizontal scan with the axes swapped: south/north
/// neighbors from the horizontal travel direction.
fn scan_cells_vertically(grid: &mut LevelGrid, lines: &[RasterLine]) {
    let mut ordered: Vec<&RasterLine> = lines.iter().collect();
    let mut cells: Vec<ScanCell> = Vec::new();

    ordered.sort_by(|a, b| {
        a.ay.min(a.by)
            .total_cmp(&b.ay.min(b.by))
            .then(a.slope_y().total_cmp(&b.slope_y()))
    });

    for line in &ordered {
        cells.clear();
        scan_convert_line(line.ax, line.ay, line.bx, line.by, &mut cells);

        for cell in &cells {
            let lx = cell.x as i64 - grid.x0;
            let ly = cell.y as i64 - grid.y0;
            if line.bx > line.ax {
                grid.mark_unknown(lx, ly - 1, GroundState::Water);
            } else if line.bx < line.ax {
                grid.mark_unknown(lx, ly - 1, GroundState::Land);
            }
        }
    }

    ordered.sort_by(|a, b| {
        b.ay.max(b.by)
            .total_cmp(&a.ay.max(a.by))
            .then(b.slope_y().total_cmp(&a.slope_y()))
    });

    for line in &ordered {
        cells.clear();
        scan_convert_line(line.ax, line.ay, line.bx, line.by, &mut cells);

        for cell in &cells {
            let lx = cell.x as i64 - grid.x0;
            let ly = cell.y as i64 - grid.y0;
            if line.bx > line.ax {
                grid.mark_unknown(lx, ly + 1, GroundState::Land);
            } else if line.bx < line.ax {
                grid.mark_unknown(lx, ly + 1, GroundState::Water);
            }
        }
    }
}

/// 4-connected flood fill from every resolved cell into unknown
/// neighbors. Coast cells are never overwritten.
fn fill(grid: &mut LevelGrid) {
    let mut queue: VecDeque<(u32, u32)> = VecDeque::new();

    for y in 0..grid.ny {
        for x in 0..grid.nx {
            match grid.state(x, y) {
                GroundState::Land | GroundState::Water => queue.push_back((x, y)),
                _ => {}
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let state = grid.state(x, y);

        for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= grid.nx as i64 || ny >= grid.ny as i64 {
                continue;
            }
            if grid.state(nx as u32, ny as u32) == GroundState::Unknown {
                grid.set_state(nx as u32, ny as u32, state);
                queue.push_back((nx as u32, ny as u32));
            }
        }
    }
}

/// Write one level's payload (packed states, coast lookup table, segment
/// block) and return the final header.
fn write_level_payload(
    grid: &LevelGrid,
    hint: GroundState,
    writer: &mut StoreWriter,
) -> GeodexResult<GroundLevel> {
    let mut header = grid.provisional_header(hint);

    if let Some(state) = grid.uniform_state() {
        if state != GroundState::Coast {
            header.has_cell_data = false;
            header.default_state = state;
            return Ok(header);
        }
    }

    header.has_cell_data = true;
    header.default_state = hint;
    header.cell_array_offset = writer.get_pos()?;

    let cell_count = grid.nx as usize * grid.ny as usize;
    let mut packed = vec![0u8; (cell_count + 3) / 4];
    for (index, state) in grid.states.iter().enumerate() {
        packed[index / 4] |= (state & 3) << (2 * (index % 4));
    }
    writer.write_bytes(&packed)?;

    // Assign every coast cell its offset in the segment block; entries
    // are offset+1 so zero keeps meaning "no segments".
    let mut entries: BTreeMap<(u32, u32), u64> = BTreeMap::new();
    let mut block_len = 0u64;
    for (key, segments) in &grid.coast_segments {
        entries.insert(*key, block_len + 1);
        block_len += vu64_len(segments.len() as u64) as u64 + segments.len() as u64 * 16;
    }

    header.bytes_per_entry = if entries.is_empty() {
        0
    } else {
        bytes_needed(block_len)
    };

    if header.bytes_per_entry > 0 {
        let width = header.bytes_per_entry as usize;
        for y in 0..grid.ny {
            for x in 0..grid.nx {
                let entry = entries.get(&(x, y)).copied().unwrap_or(0);
                writer.write_bytes(&entry.to_le_bytes()[..width])?;
            }
        }

        for segments in grid.coast_segments.values() {
            writer.write_vu32(segments.len() as u32)?;
            for (from, to) in segments {
                writer.write_coord(from)?;
                writer.write_coord(to)?;
            }
        }
    }

    Ok(header)
}
