//! End-to-end import: raw ways and coastlines in, index files out.
//!
//! Validation and measurement run batched on the worker pool behind a
//! bounded queue; the single-writer stages (data blocks, quadtree
//! flatten) consume the batches in sequence order, so output files are
//! identical across runs.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use parking_lot::Mutex;

use geodex::{GeoBox, GeodexResult, StoreWriter, TypeConfig};

use crate::area_builder::AreaIndexBuilder;
use crate::lod_builder::build_lod_index;
use crate::parameter::ImportParameter;
use crate::pipeline::WorkerPool;
use crate::report::ImportReport;
use crate::water_builder::{Coast, WaterIndexBuilder};
use crate::way::Way;

/// File names produced by an import run.
pub const FEATURES_DAT: &str = "features.dat";
pub const AREA_IDX: &str = "area.idx";
pub const LOD_IDX: &str = "lod.idx";
pub const WATER_IDX: &str = "water.idx";

/// Drives all import stages over one dataset.
pub struct Importer {
    parameter: ImportParameter,
    type_config: TypeConfig,
}

struct PreparedWay {
    way: Way,
    bbox: GeoBox,
}

struct BatchResult {
    prepared: Vec<PreparedWay>,
    report: ImportReport,
}

impl Importer {
    pub fn new(parameter: ImportParameter, type_config: TypeConfig) -> Importer {
        Importer {
            parameter,
            type_config,
        }
    }

    /// Import `ways` and `coasts` into `directory`, producing the data
    /// file and all index files. Malformed inputs are collected into the
    /// returned report; only I/O failures abort the run.
    pub fn import(
        &self,
        ways: Vec<Way>,
        coasts: Vec<Coast>,
        directory: &Path,
    ) -> GeodexResult<ImportReport> {
        let mut report = ImportReport::new();

        let batches = into_batches(ways, self.parameter.batch_size());
        let batch_count = batches.len();
        let results: Mutex<BTreeMap<usize, BatchResult>> = Mutex::new(BTreeMap::new());

        let pool = WorkerPool::new(self.parameter.worker_count());
        pool.run(
            self.parameter.queue_depth(),
            move |producer| {
                for batch in batches {
                    producer.push(batch);
                }
            },
            |(sequence, batch): (usize, Vec<Way>)| {
                let mut prepared = Vec::with_capacity(batch.len());
                let mut partial = ImportReport::new();

                for way in batch {
                    if !way.is_valid() {
                        partial.record(
                            way.id,
                            "geometry",
                            "way has fewer than 2 nodes or invalid coordinates",
                        );
                        continue;
                    }
                    let bbox = way.bounding_box().expect("validated way has nodes");
                    prepared.push(PreparedWay { way, bbox });
                }

                results.lock().insert(
                    sequence,
                    BatchResult {
                        prepared,
                        report: partial,
                    },
                );
            },
        );

        // Single-writer stage: data blocks and index arena, in batch
        // sequence order. The leading feature count keeps offset 0 free
        // for the reserved null pointer; it is patched once known.
        let mut data_writer = StoreWriter::create(&directory.join(FEATURES_DAT))?;
        data_writer.write_u32(0)?;
        let mut builder = AreaIndexBuilder::new(self.parameter.area_index_max_level());
        let mut valid_ways: Vec<Way> = Vec::new();
        let mut data_bbox: Option<GeoBox> = None;

        for (_, batch) in results.into_inner() {
            report.merge(batch.report);

            for prepared in batch.prepared {
                let offset = data_writer.get_pos()?;
                prepared.way.write(&mut data_writer)?;
                builder.insert(offset, &prepared.bbox, prepared.way.type_id);

                data_bbox = Some(match data_bbox {
                    Some(bbox) => bbox.union(&prepared.bbox),
                    None => prepared.bbox,
                });
                report.features_indexed += 1;
                valid_ways.push(prepared.way);
            }
        }
        data_writer.set_pos(0)?;
        data_writer.write_u32(valid_ways.len() as u32)?;
        data_writer.finish()?;

        let mut area_writer = StoreWriter::create(&directory.join(AREA_IDX))?;
        builder.write(&mut area_writer)?;
        area_writer.finish()?;

        let mut lod_writer = StoreWriter::create(&directory.join(LOD_IDX))?;
        let lod_stats =
            build_lod_index(&self.parameter, &self.type_config, &valid_ways, &mut lod_writer)?;
        report.ways_optimized += lod_stats.ways_written;
        lod_writer.finish()?;

        for coast in &coasts {
            if coast.is_valid() {
                let bbox = GeoBox::from_coords(&coast.nodes).expect("valid coast has nodes");
                data_bbox = Some(match data_bbox {
                    Some(existing) => existing.union(&bbox),
                    None => bbox,
                });
            }
        }

        match data_bbox {
            Some(bbox) => {
                let mut water_writer = StoreWriter::create(&directory.join(WATER_IDX))?;
                WaterIndexBuilder::new(&self.parameter).build(
                    &coasts,
                    &bbox,
                    &mut water_writer,
                    &mut report,
                )?;
                water_writer.finish()?;
            }
            None => {
                warn!("no valid features or coastlines, skipping the water index");
            }
        }

        info!(
            "import finished: {} features over {} batches, {} skipped, {} coastlines",
            report.features_indexed, batch_count, report.features_skipped,
            report.coastlines_rasterized
        );

        Ok(report)
    }
}

/// Split ways into sequence-numbered batches for the pipeline.
fn into_batches(ways: Vec<Way>, batch_size: usize) -> Vec<(usize, Vec<Way>)> {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(batch_size.min(ways.len()));

    for way in ways {
        current.push(way);
        if current.len() == batch_size {
            batches.push((batches.len(), std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        batches.push((batches.len(), current));
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use geodex::GeoCoord;
    use tempfile::tempdir;

    fn test_config() -> TypeConfig {
        let mut config = TypeConfig::new();
        config.register(geodex::TypeInfo::new("road").with_optimize_low_zoom());
        config
    }

    fn sample_ways() -> Vec<Way> {
        (0..20)
            .map(|i| {
                let lat = i as f64;
                Way::new(
                    i as u64,
                    0,
                    vec![
                        GeoCoord::new(lat, 0.0),
                        GeoCoord::new(lat, 1.0),
                    ],
                )
            })
            .collect()
    }

    #[test]
    fn test_into_batches_numbering() {
        let batches = into_batches(sample_ways(), 8);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].0, 0);
        assert_eq!(batches[0].1.len(), 8);
        assert_eq!(batches[2].1.len(), 4);
    }

    #[test]
    fn test_import_writes_all_files() {
        let dir = tempdir().unwrap();
        let parameter = ImportParameter::builder()
            .batch_size(4)
            .worker_count(3)
            .build()
            .unwrap();
        let importer = Importer::new(parameter, test_config());

        let report = importer
            .import(sample_ways(), Vec::new(), dir.path())
            .unwrap();

        assert_eq!(report.features_indexed, 20);
        assert!(report.is_clean());
        assert!(dir.path().join(FEATURES_DAT).exists());
        assert!(dir.path().join(AREA_IDX).exists());
        assert!(dir.path().join(LOD_IDX).exists());
        assert!(dir.path().join(WATER_IDX).exists());
    }

    #[test]
    fn test_import_reports_bad_ways() {
        let dir = tempdir().unwrap();
        let importer = Importer::new(ImportParameter::default(), test_config());

        let mut ways = sample_ways();
        ways.push(Way::new(999, 0, vec![GeoCoord::new(0.0, 0.0)]));

        let report = importer.import(ways, Vec::new(), dir.path()).unwrap();

        assert_eq!(report.features_indexed, 20);
        assert_eq!(report.features_skipped, 1);
        assert_eq!(report.issues[0].feature_id, 999);
    }

    #[test]
    fn test_import_empty_dataset_skips_water() {
        let dir = tempdir().unwrap();
        let importer = Importer::new(ImportParameter::default(), test_config());

        let report = importer.import(Vec::new(), Vec::new(), dir.path()).unwrap();

        assert_eq!(report.features_indexed, 0);
        assert!(dir.path().join(AREA_IDX).exists());
        assert!(!dir.path().join(WATER_IDX).exists());
    }

    #[test]
    fn test_import_is_deterministic_across_worker_counts() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let config = test_config();

        let parameter_a = ImportParameter::builder()
            .worker_count(1)
            .batch_size(3)
            .build()
            .unwrap();
        let parameter_b = ImportParameter::builder()
            .worker_count(4)
            .batch_size(3)
            .build()
            .unwrap();

        Importer::new(parameter_a, config.clone())
            .import(sample_ways(), Vec::new(), dir_a.path())
            .unwrap();
        Importer::new(parameter_b, config)
            .import(sample_ways(), Vec::new(), dir_b.path())
            .unwrap();

        for file in [FEATURES_DAT, AREA_IDX, LOD_IDX] {
            assert_eq!(
                std::fs::read(dir_a.path().join(file)).unwrap(),
                std::fs::read(dir_b.path().join(file)).unwrap(),
                "{file} differs"
            );
        }
    }
}
