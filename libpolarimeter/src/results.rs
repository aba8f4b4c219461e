use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::asymmetry::AnalysisSnapshot;
use super::channel_roles::Plane;
use super::error::ResultStoreError;
use super::hit::HitData;

/// One published aggregation result. Every field is a string; the blob is the JSON of the
/// three histogram snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub in_yield: String,
    pub out1_yield: String,
    pub out2_yield: String,
    pub rendered_histograms_blob: String,
    pub timestamp: String,
}

impl ResultRecord {
    /// Build a record stamped with the current time
    pub fn new(analysis: &AnalysisSnapshot) -> Result<Self, ResultStoreError> {
        Self::with_timestamp(analysis, time::OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn with_timestamp(
        analysis: &AnalysisSnapshot,
        epoch_seconds: i64,
    ) -> Result<Self, ResultStoreError> {
        Ok(Self {
            in_yield: analysis.result.in_yield.to_string(),
            out1_yield: analysis.result.out1_yield.to_string(),
            out2_yield: analysis.result.out2_yield.to_string(),
            rendered_histograms_blob: serde_json::to_string(&analysis.histograms)?,
            timestamp: epoch_seconds.to_string(),
        })
    }
}

/// Destination of the published results
pub trait ResultStore: Send {
    fn append(&mut self, record: &ResultRecord) -> Result<(), ResultStoreError>;

    fn close(&mut self) -> Result<(), ResultStoreError> {
        Ok(())
    }
}

/// JsonLinesStore appends each record as one line of JSON
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
    bytes_written: u64,
}

impl JsonLinesStore {
    /// Open (or create) the store. Existing records are kept
    pub fn new(path: &Path) -> Result<Self, ResultStoreError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("Publishing results to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records: 0,
            bytes_written: 0,
        })
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Read back every record of a store
    pub fn read_records(path: &Path) -> Result<Vec<ResultRecord>, ResultStoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl ResultStore for JsonLinesStore {
    fn append(&mut self, record: &ResultRecord) -> Result<(), ResultStoreError> {
        let line = serde_json::to_string(record)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records += 1;
        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ResultStoreError> {
        self.writer.flush()?;
        log::info!(
            "Wrote {} results ({}) to {}",
            self.records,
            human_bytes::human_bytes(self.bytes_written as f64),
            self.path.display()
        );
        Ok(())
    }
}

/// Consumer of the histograms, called once per aggregation cycle
pub trait Renderer: Send {
    fn render(&mut self, analysis: &AnalysisSnapshot);

    /// Show the latest raw hit. Optional
    fn render_waveform(&mut self, _hit: &HitData) {}
}

/// SummaryRenderer logs the peak and the counts of each plane's histogram
#[derive(Debug, Default)]
pub struct SummaryRenderer {
    renders: u64,
}

impl SummaryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }
}

impl Renderer for SummaryRenderer {
    fn render(&mut self, analysis: &AnalysisSnapshot) {
        self.renders += 1;
        for plane in Plane::ALL {
            let hist = &analysis.histograms[plane.index()];
            match hist.peak() {
                Some((tof, ps, count)) => log::info!(
                    "{plane}: {} entries ({} outside), peak {count} at TOF {tof:.2} PS {ps:.3}",
                    hist.entries,
                    hist.out_of_range
                ),
                None => log::info!("{plane}: empty"),
            }
        }
    }

    fn render_waveform(&mut self, hit: &HitData) {
        log::debug!(
            "Latest hit at {} ns: {} bytes of waveforms",
            hit.timestamp,
            hit.size_bytes()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetry::{AsymmetryAggregator, RegionOfInterest};
    use crate::histogram::{HistogramBinning, HistogramSnapshot};

    fn analysis() -> AnalysisSnapshot {
        let binning = HistogramBinning::default();
        let aggregator = AsymmetryAggregator::new(binning, RegionOfInterest::covering(&binning));
        for _ in 0..3 {
            aggregator.record(Plane::In, 20.0, 0.25);
        }
        aggregator.record(Plane::Out1, 30.0, 0.25);
        aggregator.analyze(4)
    }

    #[test]
    fn test_record_format() {
        let record = ResultRecord::with_timestamp(&analysis(), 1_700_000_000).unwrap();
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["inYield"], "3");
        assert_eq!(json["out1Yield"], "1");
        assert_eq!(json["out2Yield"], "0");
        assert_eq!(json["timestamp"], "1700000000");
        let blob: Vec<HistogramSnapshot> =
            serde_json::from_str(json["renderedHistogramsBlob"].as_str().unwrap()).unwrap();
        assert_eq!(blob.len(), 3);
        assert_eq!(blob[0].entries, 3);
        assert_eq!(blob[0].bins, vec![(200, 250, 3)]);
    }

    #[test]
    fn test_json_lines_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let record = ResultRecord::new(&analysis()).unwrap();
        {
            let mut store = JsonLinesStore::new(&path).unwrap();
            store.append(&record).unwrap();
            store.close().unwrap();
        }
        {
            let mut store = JsonLinesStore::new(&path).unwrap();
            store.append(&record).unwrap();
            assert_eq!(store.records(), 1);
        }
        let records = JsonLinesStore::read_records(&path).unwrap();
        assert_eq!(records, vec![record.clone(), record]);
    }

    #[test]
    fn test_summary_renderer() {
        let mut renderer = SummaryRenderer::new();
        renderer.render(&analysis());
        renderer.render_waveform(&HitData::new(0, 10));
        assert_eq!(renderer.renders(), 1);
    }
}
