//! Segment plotting of a finished session log.
//!
//! The log's values are plotted against their 1-based position in the sequence. The caller
//! supplies contiguous index ranges (experiment annotations such as "samples 1–82 =
//! baseline pressure"), each drawn as its own styled trace. Ranges may share an endpoint
//! so adjacent traces join up.
//!
//! This module produces the traces; [`PlotDocument`] serialises them to JSON for whatever
//! renderer sits downstream.

use crate::error::{AppResult, ScanError};
use crate::measurement::MeasurementKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which log rows make up the plotted sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotSeries {
    /// Every row, all kinds interleaved.
    All,
    /// DC voltage rows only.
    Voltage,
    /// DC current rows only.
    Current,
    /// Resistance rows only.
    #[default]
    Resistance,
}

impl PlotSeries {
    /// Kind filter for [`crate::data::series`].
    pub fn kind(&self) -> Option<MeasurementKind> {
        match self {
            PlotSeries::All => None,
            PlotSeries::Voltage => Some(MeasurementKind::Voltage),
            PlotSeries::Current => Some(MeasurementKind::Current),
            PlotSeries::Resistance => Some(MeasurementKind::Resistance),
        }
    }
}

/// One annotated index range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSegment {
    /// First sample, 1-based, inclusive.
    pub start: usize,
    /// Last sample, inclusive; `None` runs to the end of the data.
    #[serde(default)]
    pub end: Option<usize>,
    /// Trace colour name or hex code.
    pub color: String,
    /// Legend label.
    #[serde(default)]
    pub label: Option<String>,
}

impl PlotSegment {
    /// Segment from `start` to `end`, inclusive.
    pub fn new(start: usize, end: Option<usize>, color: impl Into<String>) -> Self {
        Self {
            start,
            end,
            color: color.into(),
            label: None,
        }
    }

    /// Add a legend label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Check that the range is 1-based and not reversed.
    pub fn validate(&self) -> AppResult<()> {
        if self.start == 0 {
            return Err(ScanError::Configuration(
                "Plot segment start is 1-based and must be at least 1".to_string(),
            ));
        }
        if let Some(end) = self.end {
            if end < self.start {
                return Err(ScanError::Configuration(format!(
                    "Plot segment {}..{} ends before it starts",
                    self.start, end
                )));
            }
        }
        Ok(())
    }
}

/// A styled series of `(x, y)` points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    /// Legend label.
    pub label: Option<String>,
    /// Colour.
    pub color: String,
    /// Points with 1-based x.
    pub points: Vec<[f64; 2]>,
}

/// Cut `samples` into one trace per segment.
///
/// `None` samples (failed readings) keep their position but draw no point. Segment ends
/// past the data are clamped; a segment starting past the data yields an empty trace so
/// the legend still lines up with the annotations.
pub fn segment_traces(samples: &[Option<f64>], segments: &[PlotSegment]) -> AppResult<Vec<Trace>> {
    segments
        .iter()
        .map(|segment| {
            segment.validate()?;
            let end = segment.end.unwrap_or(samples.len()).min(samples.len());
            let points = if segment.start > end {
                tracing::warn!(
                    start = segment.start,
                    samples = samples.len(),
                    "Plot segment starts past the end of the data"
                );
                Vec::new()
            } else {
                (segment.start..=end)
                    .filter_map(|x| samples[x - 1].map(|y| [x as f64, y]))
                    .collect()
            };
            Ok(Trace {
                label: segment.label.clone(),
                color: segment.color.clone(),
                points,
            })
        })
        .collect()
}

/// Everything a renderer needs to draw the session plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotDocument {
    /// Plot title.
    pub title: String,
    /// X axis label.
    pub x_label: String,
    /// Y axis label.
    pub y_label: String,
    /// Traces in drawing order.
    pub traces: Vec<Trace>,
}

impl PlotDocument {
    /// Build the document for `samples` and `segments`.
    pub fn build(
        title: impl Into<String>,
        y_label: impl Into<String>,
        samples: &[Option<f64>],
        segments: &[PlotSegment],
    ) -> AppResult<Self> {
        Ok(Self {
            title: title.into(),
            x_label: "Sample".to_string(),
            y_label: y_label.into(),
            traces: segment_traces(samples, segments)?,
        })
    }

    /// Write the document as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ScanError::Io(std::io::Error::other(e)))?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measured(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn traces_use_one_based_positions() {
        let values = measured(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let traces = segment_traces(
            &values,
            &[
                PlotSegment::new(1, Some(3), "blue"),
                PlotSegment::new(3, None, "red").with_label("increased pressure"),
            ],
        )
        .unwrap();

        assert_eq!(traces.len(), 2);
        assert_eq!(
            traces[0].points,
            vec![[1.0, 10.0], [2.0, 11.0], [3.0, 12.0]]
        );
        assert_eq!(
            traces[1].points,
            vec![[3.0, 12.0], [4.0, 13.0], [5.0, 14.0]]
        );
        assert_eq!(traces[1].label.as_deref(), Some("increased pressure"));
    }

    #[test]
    fn failed_samples_leave_a_gap_without_shifting_later_ones() {
        let samples = [Some(12.5), None, Some(4166.7), Some(12.5), Some(0.003), Some(4166.7)];
        let traces = segment_traces(
            &samples,
            &[
                PlotSegment::new(1, Some(3), "blue"),
                PlotSegment::new(4, Some(6), "red"),
            ],
        )
        .unwrap();
        assert_eq!(traces[0].points, vec![[1.0, 12.5], [3.0, 4166.7]]);
        assert_eq!(
            traces[1].points,
            vec![[4.0, 12.5], [5.0, 0.003], [6.0, 4166.7]]
        );
    }

    #[test]
    fn series_names_map_to_kinds() {
        assert_eq!(PlotSeries::default().kind(), Some(MeasurementKind::Resistance));
        assert_eq!(PlotSeries::All.kind(), None);
    }

    #[test]
    fn clamps_segments_to_available_data() {
        let values = measured(&[1.0, 2.0]);
        let traces = segment_traces(
            &values,
            &[
                PlotSegment::new(1, Some(82), "blue"),
                PlotSegment::new(82, Some(174), "red"),
            ],
        )
        .unwrap();
        assert_eq!(traces[0].points.len(), 2);
        assert!(traces[1].points.is_empty());
    }

    #[test]
    fn rejects_zero_based_and_reversed_segments() {
        let one = [Some(1.0)];
        assert!(segment_traces(&one, &[PlotSegment::new(0, None, "blue")]).is_err());
        assert!(segment_traces(&one, &[PlotSegment::new(5, Some(2), "blue")]).is_err());
    }

    #[test]
    fn writes_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.json");
        let doc = PlotDocument::build(
            "Resistance",
            "Resistance",
            &[Some(4166.7), Some(4166.9)],
            &[PlotSegment::new(1, None, "green")],
        )
        .unwrap();
        doc.write_json(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["title"], "Resistance");
        assert_eq!(json["traces"][0]["points"][1][1], 4166.9);
    }
}
