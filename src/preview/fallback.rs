//! Rebuilds a preview from a raw PNEZD result file.
//!
//! Used when the structured preview endpoint never returns usable data but
//! the job produced a CSV output. Lines are read positionally as
//! `point,northing,easting,elevation,description`.

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use crate::preview::types::{
    ElevationStats, FileMetadata, FilePreview, PointRecord, PreviewSnapshot, SpatialCoverage,
    MAX_PREVIEW_POINTS,
};

/// Tokens that mark the first line as a header row (matched lowercased).
const HEADER_TOKENS: &[&str] = &["point", "northing", "easting"];

/// Parses PNEZD text into at most [`MAX_PREVIEW_POINTS`] finite records.
///
/// - Fields are split on every comma; quotes are ordinary characters.
/// - Blank lines are skipped; an empty input yields an empty list.
/// - The first line is dropped if it contains a header token.
/// - Missing or empty coordinates default to 0. A coordinate that is present
///   but not numeric drops the record.
/// - A missing or unparseable point id becomes the 1-based data line index.
pub fn parse_points(text: &str) -> Vec<PointRecord> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut points = Vec::new();
    let mut line_index = 0usize;
    let mut first = true;

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!("[PREVIEW] Skipping unreadable line: {}", e);
                continue;
            }
        };
        if record.iter().all(str::is_empty) {
            continue;
        }

        if std::mem::take(&mut first) && is_header(&record) {
            continue;
        }

        line_index += 1;
        let parsed = parse_record(&record, line_index);
        if parsed.is_finite() {
            points.push(parsed);
            if points.len() == MAX_PREVIEW_POINTS {
                break;
            }
        } else {
            debug!("[PREVIEW] Dropping line {} with non-numeric coordinates", line_index);
        }
    }

    points
}

/// Builds a single-file snapshot from raw PNEZD text, deriving elevation
/// statistics and spatial coverage from the parsed records.
///
/// Returns [`PreviewSnapshot::Empty`] if no usable record was found.
pub fn snapshot_from_text(text: &str, file_name: &str) -> PreviewSnapshot {
    let points = parse_points(text);
    if points.is_empty() {
        return PreviewSnapshot::Empty;
    }

    let elevations: Vec<f64> = points.iter().map(|p| p.elevation).collect();

    PreviewSnapshot::Single(FilePreview {
        filename: Some(file_name.to_string()),
        total_points: points.len() as u64,
        elevation_stats: ElevationStats::from_elevations(&elevations),
        spatial_coverage: SpatialCoverage::from_points(&points),
        quality_metrics: None,
        metadata: Some(FileMetadata {
            file_name: Some(file_name.to_string()),
            ..Default::default()
        }),
        preview_points: points,
    })
}

fn is_header(record: &StringRecord) -> bool {
    record.iter().any(|field| {
        let lower = field.to_ascii_lowercase();
        HEADER_TOKENS.iter().any(|token| lower.contains(token))
    })
}

fn parse_record(record: &StringRecord, line_index: usize) -> PointRecord {
    let point = record
        .get(0)
        .and_then(parse_point_id)
        .unwrap_or(line_index as i64);

    PointRecord {
        point,
        northing: parse_coordinate(record.get(1)),
        easting: parse_coordinate(record.get(2)),
        elevation: parse_coordinate(record.get(3)),
        description: record.get(4).unwrap_or_default().to_string(),
    }
}

/// Integer ids parse directly; decimal ids are truncated.
fn parse_point_id(field: &str) -> Option<i64> {
    if let Ok(id) = field.parse::<i64>() {
        return Some(id);
    }
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}

fn parse_coordinate(field: Option<&str>) -> f64 {
    match field {
        None | Some("") => 0.0,
        Some(raw) => raw.parse::<f64>().unwrap_or(f64::NAN),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_detected_and_non_numeric_row_dropped() {
        let text = concat!(
            "Point,Northing,Easting,Elevation,Description\n",
            "1,100.0,200.0,10.5,A\n",
            "2,abc,200.0,10.5,B\n",
        );

        let points = parse_points(text);

        assert_eq!(
            points,
            vec![PointRecord {
                point: 1,
                northing: 100.0,
                easting: 200.0,
                elevation: 10.5,
                description: "A".into(),
            }]
        );
    }

    #[test]
    fn headerless_single_line() {
        let points = parse_points("1,10,20,5,x\n");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].point, 1);
        assert_eq!(points[0].elevation, 5.0);
        assert_eq!(points[0].description, "x");
    }

    #[test]
    fn header_detection_is_case_insensitive_and_token_based() {
        let points = parse_points("PT_NORTHING,E,Z\n1,2,3,4\n");
        assert_eq!(points.len(), 1);

        // A numeric first line is data, not a header.
        let points = parse_points("5,1,2,3\n6,1,2,3\n");
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn unbalanced_quote_in_description_stays_on_its_line() {
        let text = concat!(
            "1,100.0,200.0,10.5,\"6 IN CULVERT\n",
            "2,101.0,201.0,11.5,B\n",
            "3,102.0,202.0,12.5,C\n",
        );
        let points = parse_points(text);

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].description, "\"6 IN CULVERT");
        assert_eq!(points[1].point, 2);
        assert_eq!(points[2].description, "C");
    }

    #[test]
    fn empty_input_is_empty_result() {
        assert!(parse_points("").is_empty());
        assert!(parse_points("\n\n  \n").is_empty());
        assert_eq!(snapshot_from_text("", "out.csv"), PreviewSnapshot::Empty);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let points = parse_points("x,1.5\n");
        assert_eq!(points.len(), 1);
        let p = &points[0];
        assert_eq!(p.point, 1, "unparseable id falls back to line index");
        assert_eq!(p.northing, 1.5);
        assert_eq!(p.easting, 0.0);
        assert_eq!(p.elevation, 0.0);
        assert!(p.description.is_empty());
    }

    #[test]
    fn running_index_counts_data_lines_only() {
        let text = "point,northing,easting,elevation\n\n,1,1,1\n,2,2,2\n";
        let ids: Vec<i64> = parse_points(text).iter().map(|p| p.point).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn non_finite_values_dropped() {
        let points = parse_points("1,inf,2,3\n2,1,NaN,3\n3,1,2,3\n");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].point, 3);
    }

    #[test]
    fn result_capped_after_filtering() {
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!("{},bad,0,0\n", i));
        }
        for i in 0..80 {
            text.push_str(&format!("{},{},0,1\n", 100 + i, i));
        }

        let points = parse_points(&text);

        assert_eq!(points.len(), MAX_PREVIEW_POINTS);
        assert_eq!(points[0].point, 100);
    }

    #[test]
    fn snapshot_derives_statistics() {
        let snapshot = snapshot_from_text("1,10,20,5\n2,12,24,7\n", "surface.csv");

        let PreviewSnapshot::Single(file) = snapshot else {
            panic!("expected a single-file snapshot");
        };
        assert_eq!(file.filename.as_deref(), Some("surface.csv"));
        assert_eq!(file.total_points, 2);
        assert_eq!(file.elevation_stats.unwrap().mean, 6.0);
        assert_eq!(file.spatial_coverage.unwrap().area, 8.0);
    }
}
