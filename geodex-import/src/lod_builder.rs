//! Low-zoom geometry optimization.
//!
//! For every configured zoom step the optimizer takes the ways of
//! optimizable types, merges chains sharing endpoints, simplifies each
//! polyline to the step's on-screen error budget, writes the simplified
//! copies as data blocks and builds a quadtree over them. A trailing
//! directory enumerates the steps so the query-time reader can pick the
//! finest step at or below a requested zoom.

use std::collections::BTreeMap;

use log::{debug, info};

use geodex::geo::cell_range;
use geodex::{GeoBox, GeodexResult, StoreWriter, TypeConfig, TypeId};

use crate::area_builder::AreaIndexBuilder;
use crate::parameter::ImportParameter;
use crate::simplify::{pixel_error_degrees, simplify_polyline};
use crate::way::{merge_ways, Way};

/// Outcome counters of one optimizer run.
#[derive(Debug, Clone, Default)]
pub struct LodBuildStats {
    pub steps: u32,
    /// Simplified way copies written across all steps.
    pub ways_written: u64,
    /// Input ways folded into another way by endpoint merging.
    pub ways_merged: u64,
    /// Ways dropped because they collapsed below one pixel.
    pub ways_dropped: u64,
}

struct StepDirectoryEntry {
    zoom: u32,
    header_offset: u64,
    /// Per type: populated cell range (origin x, origin y, count x,
    /// count y) at the step's index level.
    types: BTreeMap<TypeId, (u32, u32, u32, u32)>,
}

/// Build the optimized low-zoom index file.
///
/// The writer must be positioned at the start of an empty file; the
/// directory offset occupies the first 8 bytes and is backpatched last.
pub fn build_lod_index(
    parameter: &ImportParameter,
    type_config: &TypeConfig,
    ways: &[Way],
    writer: &mut StoreWriter,
) -> GeodexResult<LodBuildStats> {
    let mut stats = LodBuildStats::default();
    let optimizable = type_config.optimizable_types();

    writer.write_u64(0)?;

    let mut entries: Vec<StepDirectoryEntry> = Vec::new();

    for &zoom in parameter.optimization_zoom_steps() {
        let index_max_level = zoom.clamp(1, parameter.area_index_max_level());
        let error_budget = pixel_error_degrees(zoom, parameter.screen_width(), parameter.dpi());
        let mut builder = AreaIndexBuilder::new(index_max_level);
        let mut step_types: BTreeMap<TypeId, (u32, u32, u32, u32)> = BTreeMap::new();

        for &type_id in &optimizable {
            let type_ways: Vec<Way> = ways
                .iter()
                .filter(|way| way.type_id == type_id)
                .cloned()
                .collect();
            if type_ways.is_empty() {
                continue;
            }

            let input_count = type_ways.len();
            let merged = merge_ways(type_ways);
            stats.ways_merged += (input_count - merged.len()) as u64;

            let mut type_bbox: Option<GeoBox> = None;

            for way in merged {
                let nodes = simplify_polyline(
                    &way.nodes,
                    error_budget / 8.0,
                    parameter.simplify_method(),
                );
                let bbox = match GeoBox::from_coords(&nodes) {
                    Some(bbox) => bbox,
                    None => continue,
                };

                // Ways smaller than the error budget would not survive
                // rendering at this zoom.
                if bbox.width() <= error_budget && bbox.height() <= error_budget {
                    stats.ways_dropped += 1;
                    continue;
                }

                let offset = writer.get_pos()?;
                Way {
                    id: way.id,
                    type_id,
                    nodes,
                }
                .write(writer)?;

                builder.insert(offset, &bbox, type_id);
                type_bbox = Some(match type_bbox {
                    Some(existing) => existing.union(&bbox),
                    None => bbox,
                });
                stats.ways_written += 1;
            }

            if let Some(bbox) = type_bbox {
                let (x1, y1, x2, y2) = cell_range(&bbox, index_max_level);
                step_types.insert(type_id, (x1, y1, x2 - x1 + 1, y2 - y1 + 1));
            }
        }

        let header_offset = writer.get_pos()?;
        builder.write(writer)?;

        debug!(
            "optimize step {}: {} cell entries, {} types",
            zoom,
            builder.entry_count(),
            step_types.len()
        );

        entries.push(StepDirectoryEntry {
            zoom,
            header_offset,
            types: step_types,
        });
        stats.steps += 1;
    }

    let directory_offset = writer.get_pos()?;
    writer.write_vu32(entries.len() as u32)?;

    for entry in &entries {
        writer.write_vu32(entry.zoom)?;
        writer.write_u64(entry.header_offset)?;
        writer.write_vu32(entry.types.len() as u32)?;
        for (type_id, (x1, y1, count_x, count_y)) in &entry.types {
            writer.write_vu32(*type_id as u32)?;
            writer.write_vu32(*x1)?;
            writer.write_vu32(*y1)?;
            writer.write_vu32(*count_x)?;
            writer.write_vu32(*count_y)?;
        }
    }

    writer.set_pos(0)?;
    writer.write_u64(directory_offset)?;
    writer.seek_end()?;

    info!(
        "optimized {} ways over {} zoom steps ({} merged away, {} dropped)",
        stats.ways_written, stats.steps, stats.ways_merged, stats.ways_dropped
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geodex::{Breaker, GeoCoord, LodIndex, StoreReader, TypeInfo, TypeSet};
    use tempfile::tempdir;

    fn optimizable_config() -> TypeConfig {
        let mut config = TypeConfig::new();
        config.register(TypeInfo::new("highway_motorway").with_optimize_low_zoom());
        config.register(TypeInfo::new("building"));
        config
    }

    fn long_way(id: u64, type_id: TypeId, lat: f64) -> Way {
        // A 40-degree polyline with mild noise, plenty to survive any
        // low-zoom error budget.
        let nodes = (0..=40)
            .map(|i| GeoCoord::new(lat + if i % 2 == 0 { 0.0 } else { 0.01 }, i as f64))
            .collect();
        Way::new(id, type_id, nodes)
    }

    fn build(path: &std::path::Path, parameter: &ImportParameter, config: &TypeConfig, ways: &[Way]) -> LodBuildStats {
        let mut writer = StoreWriter::create(path).unwrap();
        let stats = build_lod_index(parameter, config, ways, &mut writer).unwrap();
        writer.finish().unwrap();
        stats
    }

    #[test]
    fn test_optimized_way_found_via_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lod.idx");
        let config = optimizable_config();
        let parameter = ImportParameter::default();

        let ways = vec![long_way(1, 0, 10.0)];
        let stats = build(&path, &parameter, &config, &ways);
        assert_eq!(stats.steps, 3);
        assert!(stats.ways_written >= 3);

        let index = LodIndex::open(&path, 64, &config).unwrap();
        let mut types = TypeSet::new(&config);
        types.insert(0);

        let bbox = GeoBox::new(9.5, 15.0, 10.5, 25.0);
        let result = index.query(&bbox, 6, &types, &Breaker::new()).unwrap();

        assert!(!result.aborted);
        assert!(result.resolved_types.contains(0));
        assert_eq!(result.offsets.len(), 1);

        // The offset points at a readable simplified copy.
        let mut reader = StoreReader::open(&path).unwrap();
        reader.set_pos(result.offsets[0]).unwrap();
        let way = Way::read(&mut reader).unwrap();
        assert_eq!(way.id, 1);
        assert!(way.nodes.len() <= 41);
    }

    #[test]
    fn test_non_optimizable_type_unresolved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unresolved.idx");
        let config = optimizable_config();
        let parameter = ImportParameter::default();

        let ways = vec![long_way(1, 0, 10.0), long_way(2, 1, 20.0)];
        build(&path, &parameter, &config, &ways);

        let index = LodIndex::open(&path, 64, &config).unwrap();
        let mut types = TypeSet::new(&config);
        types.insert(1); // building, not optimized

        let bbox = GeoBox::new(19.5, 15.0, 20.5, 25.0);
        let result = index.query(&bbox, 6, &types, &Breaker::new()).unwrap();

        assert!(result.offsets.is_empty());
        assert!(!result.resolved_types.contains(1));
    }

    #[test]
    fn test_zoom_beyond_steps_has_no_optimizations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beyond.idx");
        let config = optimizable_config();
        let parameter = ImportParameter::default();

        build(&path, &parameter, &config, &[long_way(1, 0, 10.0)]);

        let index = LodIndex::open(&path, 64, &config).unwrap();
        assert!(index.has_optimizations(6));
        assert!(index.has_optimizations(8));
        assert!(!index.has_optimizations(14));
    }

    #[test]
    fn test_coarser_step_is_more_simplified() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("steps.idx");
        let config = optimizable_config();
        let parameter = ImportParameter::default();

        build(&path, &parameter, &config, &[long_way(1, 0, 10.0)]);

        let index = LodIndex::open(&path, 64, &config).unwrap();
        let mut types = TypeSet::new(&config);
        types.insert(0);
        let bbox = GeoBox::new(9.0, -1.0, 11.0, 41.0);

        let mut reader = StoreReader::open(&path).unwrap();
        let mut node_counts = Vec::new();
        for zoom in [4, 8] {
            let result = index.query(&bbox, zoom, &types, &Breaker::new()).unwrap();
            assert_eq!(result.offsets.len(), 1);
            reader.set_pos(result.offsets[0]).unwrap();
            node_counts.push(Way::read(&mut reader).unwrap().nodes.len());
        }

        assert!(node_counts[0] <= node_counts[1]);
    }

    #[test]
    fn test_idempotent_output() {
        let dir = tempdir().unwrap();
        let path_a = dir.path().join("a.idx");
        let path_b = dir.path().join("b.idx");
        let config = optimizable_config();
        let parameter = ImportParameter::default();

        let ways = vec![long_way(1, 0, 10.0), long_way(2, 0, -30.0)];
        build(&path_a, &parameter, &config, &ways);
        build(&path_b, &parameter, &config, &ways);

        assert_eq!(
            std::fs::read(&path_a).unwrap(),
            std::fs::read(&path_b).unwrap()
        );
    }

    #[test]
    fn test_no_steps_produces_empty_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nosteps.idx");
        let config = optimizable_config();
        let parameter = ImportParameter::builder()
            .optimization_zoom_steps(Vec::new())
            .build()
            .unwrap();

        let stats = build(&path, &parameter, &config, &[long_way(1, 0, 10.0)]);
        assert_eq!(stats.steps, 0);

        let index = LodIndex::open(&path, 64, &config).unwrap();
        assert!(!index.has_optimizations(4));
    }
}
