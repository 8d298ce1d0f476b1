//! Aggregated per-feature error reporting for import runs.
//!
//! A handful of malformed inputs must never block indexing millions of
//! valid ones: stages record issues here and keep going. The front end
//! decides how to surface the aggregate.

/// One skipped or degraded input feature.
#[derive(Debug, Clone)]
pub struct ImportIssue {
    /// Id of the offending way or coastline.
    pub feature_id: u64,
    /// Import stage that rejected it.
    pub stage: &'static str,
    pub message: String,
}

/// Outcome summary of an import run.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Per-feature problems, in processing order.
    pub issues: Vec<ImportIssue>,
    /// Features written to the data file and indexed.
    pub features_indexed: u64,
    /// Features dropped as malformed.
    pub features_skipped: u64,
    /// Coastlines rasterized into the water grid.
    pub coastlines_rasterized: u64,
    /// Simplified way copies written across all optimization steps.
    pub ways_optimized: u64,
}

impl ImportReport {
    pub fn new() -> ImportReport {
        ImportReport::default()
    }

    pub fn record(&mut self, feature_id: u64, stage: &'static str, message: impl Into<String>) {
        self.features_skipped += 1;
        self.issues.push(ImportIssue {
            feature_id,
            stage,
            message: message.into(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Fold another report (for example from a worker) into this one.
    pub fn merge(&mut self, other: ImportReport) {
        self.issues.extend(other.issues);
        self.features_indexed += other.features_indexed;
        self.features_skipped += other.features_skipped;
        self.coastlines_rasterized += other.coastlines_rasterized;
        self.ways_optimized += other.ways_optimized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_is_clean() {
        let report = ImportReport::new();
        assert!(report.is_clean());
        assert_eq!(report.features_indexed, 0);
    }

    #[test]
    fn test_record_counts_skip() {
        let mut report = ImportReport::new();
        report.record(42, "geometry", "way has fewer than 2 nodes");

        assert!(!report.is_clean());
        assert_eq!(report.features_skipped, 1);
        assert_eq!(report.issues[0].feature_id, 42);
        assert_eq!(report.issues[0].stage, "geometry");
    }

    #[test]
    fn test_merge_accumulates() {
        let mut a = ImportReport::new();
        a.features_indexed = 10;
        a.record(1, "geometry", "bad");

        let mut b = ImportReport::new();
        b.features_indexed = 5;
        b.coastlines_rasterized = 2;
        b.record(2, "coastline", "unclosed");

        a.merge(b);
        assert_eq!(a.features_indexed, 15);
        assert_eq!(a.features_skipped, 2);
        assert_eq!(a.coastlines_rasterized, 2);
        assert_eq!(a.issues.len(), 2);
    }
}
