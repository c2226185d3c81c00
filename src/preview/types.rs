//! Preview data model.
//!
//! The service returns either a single-file preview or a multi-file preview
//! (recognised by a `files` list). Both decode into [`PreviewResponse`] and are
//! converted once into the tagged [`PreviewSnapshot`], so nothing downstream
//! has to guess the shape again.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of point records materialized per file preview.
pub const MAX_PREVIEW_POINTS: usize = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Records and statistics
// ─────────────────────────────────────────────────────────────────────────────

/// One surveyed point in PNEZD order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub point: i64,
    pub northing: f64,
    pub easting: f64,
    pub elevation: f64,
    #[serde(default)]
    pub description: String,
}

impl PointRecord {
    pub fn is_finite(&self) -> bool {
        self.northing.is_finite() && self.easting.is_finite() && self.elevation.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub std_dev: f64,
}

impl ElevationStats {
    /// Computes statistics over finite elevations. Returns `None` if there are none.
    ///
    /// Quartiles use linear interpolation between closest ranks; the standard
    /// deviation is the population deviation.
    pub fn from_elevations(elevations: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = elevations.iter().copied().filter(|e| e.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            q1: percentile(&sorted, 0.25),
            median: percentile(&sorted, 0.5),
            q3: percentile(&sorted, 0.75),
            std_dev: variance.sqrt(),
        })
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Bounding box of the surveyed area in projected units.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialCoverage {
    pub min_northing: f64,
    pub max_northing: f64,
    pub min_easting: f64,
    pub max_easting: f64,
    pub area: f64,
}

impl SpatialCoverage {
    pub fn from_points(points: &[PointRecord]) -> Option<Self> {
        let mut finite = points.iter().filter(|p| p.is_finite());
        let first = finite.next()?;

        let mut coverage = Self {
            min_northing: first.northing,
            max_northing: first.northing,
            min_easting: first.easting,
            max_easting: first.easting,
            area: 0.0,
        };
        for p in finite {
            coverage.min_northing = coverage.min_northing.min(p.northing);
            coverage.max_northing = coverage.max_northing.max(p.northing);
            coverage.min_easting = coverage.min_easting.min(p.easting);
            coverage.max_easting = coverage.max_easting.max(p.easting);
        }
        coverage.area = (coverage.max_northing - coverage.min_northing)
            * (coverage.max_easting - coverage.min_easting);
        Some(coverage)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMetrics {
    pub point_density: Option<f64>,
    pub ground_point_ratio: Option<f64>,
    pub outliers_removed: Option<u64>,
    pub breaklines_detected: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadata {
    pub file_name: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub point_format: Option<String>,
    pub source_epsg: Option<u32>,
    pub target_epsg: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-file preview
// ─────────────────────────────────────────────────────────────────────────────

/// Preview statistics for one file (or for the merged output).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePreview {
    pub filename: Option<String>,
    #[serde(alias = "points")]
    pub preview_points: Vec<PointRecord>,
    #[serde(alias = "total_points_processed")]
    pub total_points: u64,
    pub elevation_stats: Option<ElevationStats>,
    pub spatial_coverage: Option<SpatialCoverage>,
    pub quality_metrics: Option<QualityMetrics>,
    pub metadata: Option<FileMetadata>,
}

impl FilePreview {
    /// A preview is usable if it carries at least one point or reports a
    /// positive processed-point count.
    pub fn has_data(&self) -> bool {
        !self.preview_points.is_empty() || self.total_points > 0
    }

    /// Processed-point count, falling back to the materialized points when the
    /// service reported none.
    pub fn point_count(&self) -> u64 {
        self.total_points.max(self.preview_points.len() as u64)
    }

    /// Display name: explicit file name, then metadata, then `fallback`.
    pub fn display_name(&self, fallback: &str) -> String {
        self.filename
            .clone()
            .or_else(|| self.metadata.as_ref().and_then(|m| m.file_name.clone()))
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Drops non-finite records and caps the materialized points.
    fn normalized(mut self) -> Self {
        self.preview_points.retain(PointRecord::is_finite);
        self.preview_points.truncate(MAX_PREVIEW_POINTS);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MultiFilePreview {
    pub files: Vec<FilePreview>,
    pub merged: Option<FilePreview>,
    pub file_count: usize,
}

/// Preview of a completed job. Stored whole and replaced whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreviewSnapshot {
    #[default]
    Empty,
    Single(FilePreview),
    Multi(MultiFilePreview),
}

impl PreviewSnapshot {
    /// Single-file: the file has data. Multi-file: any file, or the merged
    /// variant, has data.
    pub fn is_valid(&self) -> bool {
        match self {
            PreviewSnapshot::Empty => false,
            PreviewSnapshot::Single(file) => file.has_data(),
            PreviewSnapshot::Multi(multi) => {
                multi.files.iter().any(FilePreview::has_data)
                    || multi.merged.as_ref().is_some_and(FilePreview::has_data)
            }
        }
    }

    /// Aggregate processed-point count. For multi-file previews this is the sum
    /// over constituent files, or the merged count when no files are listed.
    pub fn total_points(&self) -> u64 {
        match self {
            PreviewSnapshot::Empty => 0,
            PreviewSnapshot::Single(file) => file.point_count(),
            PreviewSnapshot::Multi(multi) if multi.files.is_empty() => multi
                .merged
                .as_ref()
                .map(FilePreview::point_count)
                .unwrap_or(0),
            PreviewSnapshot::Multi(multi) => multi.files.iter().map(FilePreview::point_count).sum(),
        }
    }
}

/// Raw body of `GET /api/v1/jobs/{id}/preview`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviewResponse {
    #[serde(default)]
    pub files: Option<Vec<FilePreview>>,
    #[serde(default, alias = "merged_preview")]
    pub merged: Option<FilePreview>,
    #[serde(default)]
    pub file_count: Option<usize>,
    #[serde(flatten)]
    pub single: FilePreview,
}

impl From<PreviewResponse> for PreviewSnapshot {
    fn from(response: PreviewResponse) -> Self {
        match response.files {
            Some(files) => {
                let files: Vec<FilePreview> =
                    files.into_iter().map(FilePreview::normalized).collect();
                let file_count = response.file_count.unwrap_or(files.len());
                PreviewSnapshot::Multi(MultiFilePreview {
                    files,
                    merged: response.merged.map(FilePreview::normalized),
                    file_count,
                })
            }
            None => PreviewSnapshot::Single(response.single.normalized()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: i64, elevation: f64) -> serde_json::Value {
        json!({
            "point": id,
            "northing": 100.0 + id as f64,
            "easting": 200.0,
            "elevation": elevation,
            "description": "GND",
        })
    }

    fn decode(value: serde_json::Value) -> PreviewSnapshot {
        serde_json::from_value::<PreviewResponse>(value).unwrap().into()
    }

    #[test]
    fn single_shape_without_files_list() {
        let snapshot = decode(json!({
            "filename": "site.las",
            "preview_points": [point(1, 10.0)],
            "total_points": 1200,
            "elevation_stats": {"min": 9.0, "max": 12.0, "mean": 10.1}
        }));

        match &snapshot {
            PreviewSnapshot::Single(file) => {
                assert_eq!(file.filename.as_deref(), Some("site.las"));
                assert_eq!(file.preview_points.len(), 1);
                assert_eq!(file.elevation_stats.as_ref().unwrap().max, 12.0);
            }
            other => panic!("expected single, got {:?}", other),
        }
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.total_points(), 1200);
    }

    #[test]
    fn empty_single_is_not_valid() {
        let snapshot = decode(json!({"preview_points": [], "total_points": 0}));
        assert!(!snapshot.is_valid());
    }

    #[test]
    fn multi_valid_if_only_third_of_five_has_points() {
        let mut files = vec![json!({"filename": "a.las"}); 5];
        files[2] = json!({"filename": "c.las", "preview_points": [point(7, 3.0)]});

        let snapshot = decode(json!({"files": files, "file_count": 5}));

        assert!(matches!(&snapshot, PreviewSnapshot::Multi(m) if m.file_count == 5));
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.total_points(), 1);
    }

    #[test]
    fn multi_valid_through_merged_variant() {
        let snapshot = decode(json!({
            "files": [{"filename": "a.las"}],
            "merged": {"total_points": 900}
        }));
        assert!(snapshot.is_valid());
    }

    #[test]
    fn multi_total_sums_files() {
        let snapshot = decode(json!({
            "files": [{"total_points": 100}, {"total_points": 250}],
            "merged": {"total_points": 340}
        }));
        assert_eq!(snapshot.total_points(), 350);
    }

    #[test]
    fn points_are_capped_and_filtered() {
        let points: Vec<_> = (0..80).map(|i| point(i, i as f64)).collect();
        let snapshot = decode(json!({"preview_points": points}));
        match snapshot {
            PreviewSnapshot::Single(file) => {
                assert_eq!(file.preview_points.len(), MAX_PREVIEW_POINTS)
            }
            other => panic!("expected single, got {:?}", other),
        }
    }

    #[test]
    fn snapshot_serializes_with_kind_tag() {
        let value = serde_json::to_value(PreviewSnapshot::Empty).unwrap();
        assert_eq!(value, json!({"kind": "empty"}));

        let value = serde_json::to_value(PreviewSnapshot::Single(FilePreview::default())).unwrap();
        assert_eq!(value["kind"], "single");
    }

    #[test]
    fn elevation_stats_quartiles() {
        let stats = ElevationStats::from_elevations(&[4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.q1, 2.0);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.q3, 4.0);
        assert!((stats.std_dev - 2.0_f64.sqrt()).abs() < 1e-12);

        assert!(ElevationStats::from_elevations(&[]).is_none());
    }

    #[test]
    fn spatial_coverage_bounds() {
        let record = |point: i64, northing: f64, easting: f64| PointRecord {
            point,
            northing,
            easting,
            elevation: 1.0,
            description: String::new(),
        };
        let points = vec![record(1, 10.0, 5.0), record(2, 14.0, 2.0)];
        let coverage = SpatialCoverage::from_points(&points).unwrap();
        assert_eq!(coverage.min_northing, 10.0);
        assert_eq!(coverage.max_easting, 5.0);
        assert_eq!(coverage.area, 12.0);
    }
}
