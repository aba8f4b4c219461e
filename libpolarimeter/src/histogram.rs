use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::asymmetry::RegionOfInterest;
use super::constants::*;

/// Fixed binning of the PS vs TOF histograms. Bins are half-open, `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramBinning {
    pub tof_bins: usize,
    pub tof_min: f64,
    pub tof_max: f64,
    pub ps_bins: usize,
    pub ps_min: f64,
    pub ps_max: f64,
}

impl Default for HistogramBinning {
    fn default() -> Self {
        Self {
            tof_bins: DEFAULT_TOF_BINS,
            tof_min: DEFAULT_TOF_MIN,
            tof_max: DEFAULT_TOF_MAX,
            ps_bins: DEFAULT_PS_BINS,
            ps_min: DEFAULT_PS_MIN,
            ps_max: DEFAULT_PS_MAX,
        }
    }
}

fn axis_bin(value: f64, bins: usize, min: f64, max: f64) -> Option<usize> {
    if bins == 0 || !(value >= min && value < max) {
        return None;
    }
    let bin = ((value - min) / (max - min) * bins as f64) as usize;
    Some(bin.min(bins - 1))
}

fn axis_center(bin: usize, bins: usize, min: f64, max: f64) -> f64 {
    min + (bin as f64 + 0.5) * (max - min) / bins as f64
}

impl HistogramBinning {
    pub fn is_valid(&self) -> bool {
        self.tof_bins > 0
            && self.ps_bins > 0
            && self.tof_max > self.tof_min
            && self.ps_max > self.ps_min
    }

    pub fn tof_bin(&self, tof: f64) -> Option<usize> {
        axis_bin(tof, self.tof_bins, self.tof_min, self.tof_max)
    }

    pub fn ps_bin(&self, ps: f64) -> Option<usize> {
        axis_bin(ps, self.ps_bins, self.ps_min, self.ps_max)
    }

    pub fn tof_center(&self, bin: usize) -> f64 {
        axis_center(bin, self.tof_bins, self.tof_min, self.tof_max)
    }

    pub fn ps_center(&self, bin: usize) -> f64 {
        axis_center(bin, self.ps_bins, self.ps_min, self.ps_max)
    }
}

/// Sparse, serializable copy of a histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub binning: HistogramBinning,
    pub entries: u64,
    pub out_of_range: u64,
    /// (tof bin, ps bin, count) of every non-empty bin
    pub bins: Vec<(usize, usize, u64)>,
}

impl HistogramSnapshot {
    /// Bin with the most counts as (tof center, ps center, count)
    pub fn peak(&self) -> Option<(f64, f64, u64)> {
        self.bins
            .iter()
            .max_by_key(|(_, _, count)| *count)
            .map(|(tof, ps, count)| {
                (
                    self.binning.tof_center(*tof),
                    self.binning.ps_center(*ps),
                    *count,
                )
            })
    }

    /// Sum of the counts in the bins whose centers lie inside the region
    pub fn integrate(&self, roi: &RegionOfInterest) -> f64 {
        self.bins
            .iter()
            .filter(|(tof, ps, _)| {
                roi.contains(self.binning.tof_center(*tof), self.binning.ps_center(*ps))
            })
            .map(|(_, _, count)| *count as f64)
            .sum()
    }
}

/// Histogram2D counts (TOF, PS) samples of one detector plane
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    binning: HistogramBinning,
    counts: Array2<u64>,
    entries: u64,
    out_of_range: u64,
}

impl Histogram2D {
    pub fn new(binning: HistogramBinning) -> Self {
        Self {
            counts: Array2::zeros([binning.tof_bins, binning.ps_bins]),
            binning,
            entries: 0,
            out_of_range: 0,
        }
    }

    pub fn binning(&self) -> &HistogramBinning {
        &self.binning
    }

    /// Count a sample. Returns false if it falls outside of the binning
    pub fn fill(&mut self, tof: f64, ps: f64) -> bool {
        match (self.binning.tof_bin(tof), self.binning.ps_bin(ps)) {
            (Some(tof_bin), Some(ps_bin)) => {
                self.counts[[tof_bin, ps_bin]] += 1;
                self.entries += 1;
                true
            }
            _ => {
                self.out_of_range += 1;
                false
            }
        }
    }

    pub fn count(&self, tof_bin: usize, ps_bin: usize) -> u64 {
        self.counts
            .get([tof_bin, ps_bin])
            .copied()
            .unwrap_or(0)
    }

    /// Counts inside the binning
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }

    /// Sum of the counts in the bins whose centers lie inside the region
    pub fn integrate(&self, roi: &RegionOfInterest) -> f64 {
        self.counts
            .indexed_iter()
            .filter(|((tof, ps), count)| {
                **count > 0
                    && roi.contains(self.binning.tof_center(*tof), self.binning.ps_center(*ps))
            })
            .map(|(_, count)| *count as f64)
            .sum()
    }

    /// Counts summed over PS for every TOF bin
    pub fn tof_projection(&self) -> Vec<u64> {
        self.counts.rows().into_iter().map(|row| row.sum()).collect()
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.entries = 0;
        self.out_of_range = 0;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            binning: self.binning,
            entries: self.entries,
            out_of_range: self.out_of_range,
            bins: self
                .counts
                .indexed_iter()
                .filter(|(_, count)| **count > 0)
                .map(|((tof, ps), count)| (tof, ps, *count))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binning() {
        let binning = HistogramBinning::default();
        assert!(binning.is_valid());
        assert_eq!(binning.tof_bin(0.0), Some(0));
        assert_eq!(binning.tof_bin(19.55), Some(195));
        assert_eq!(binning.tof_bin(99.99), Some(999));
        assert_eq!(binning.tof_bin(100.0), None);
        assert_eq!(binning.tof_bin(-0.1), None);
        assert_eq!(binning.ps_bin(f64::NAN), None);
        assert!((binning.tof_center(195) - 19.55).abs() < 1e-9);

        let flat = HistogramBinning {
            ps_max: 0.0,
            ..binning
        };
        assert!(!flat.is_valid());
        let inverted = HistogramBinning {
            tof_min: 50.0,
            tof_max: 10.0,
            ..binning
        };
        assert!(!inverted.is_valid());
    }

    #[test]
    fn test_fill_and_integrate() {
        let mut hist = Histogram2D::new(HistogramBinning::default());
        assert!(hist.fill(20.0, 0.2));
        assert!(hist.fill(20.0, 0.2));
        assert!(hist.fill(80.0, 0.9));
        assert!(!hist.fill(120.0, 0.5));
        assert_eq!(hist.entries(), 3);
        assert_eq!(hist.out_of_range(), 1);
        assert_eq!(hist.count(200, 200), 2);

        let all = RegionOfInterest::covering(hist.binning());
        assert_eq!(hist.integrate(&all), 3.0);
        let early = RegionOfInterest {
            tof_max: 50.0,
            ..all
        };
        assert_eq!(hist.integrate(&early), 2.0);
        assert_eq!(hist.tof_projection()[200], 2);

        let snapshot = hist.snapshot();
        assert_eq!(snapshot.bins.len(), 2);
        assert_eq!(snapshot.integrate(&early), 2.0);
        let (tof, ps, count) = snapshot.peak().unwrap();
        assert!((tof - 20.05).abs() < 1e-9);
        assert!((ps - 0.2005).abs() < 1e-9);
        assert_eq!(count, 2);

        hist.reset();
        assert_eq!(hist.entries(), 0);
        assert_eq!(hist.integrate(&all), 0.0);
        assert_eq!(hist.snapshot().peak(), None);
    }
}
