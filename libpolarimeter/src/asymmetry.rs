use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::channel_roles::Plane;
use super::constants::NUMBER_OF_PLANES;
use super::histogram::{Histogram2D, HistogramBinning, HistogramSnapshot};

/// Inclusive TOF and PS bounds over which the yield is integrated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub tof_min: f64,
    pub tof_max: f64,
    pub ps_min: f64,
    pub ps_max: f64,
}

impl RegionOfInterest {
    /// The region spanning the whole histogram
    pub fn covering(binning: &HistogramBinning) -> Self {
        Self {
            tof_min: binning.tof_min,
            tof_max: binning.tof_max,
            ps_min: binning.ps_min,
            ps_max: binning.ps_max,
        }
    }

    pub fn contains(&self, tof: f64, ps: f64) -> bool {
        tof >= self.tof_min && tof <= self.tof_max && ps >= self.ps_min && ps <= self.ps_max
    }
}

/// Normalized asymmetry |a - b| / (a + b). None if a + b is zero
pub fn asymmetry(yield_a: f64, yield_b: f64) -> Option<f64> {
    let sum = yield_a + yield_b;
    if sum == 0.0 || !sum.is_finite() {
        return None;
    }
    Some((yield_a - yield_b).abs() / sum)
}

/// Yields of one aggregation cycle and the asymmetries between the in-plane and each
/// out-of-plane detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldResult {
    pub in_yield: f64,
    pub out1_yield: f64,
    pub out2_yield: f64,
    pub asymmetry_out1: Option<f64>,
    pub asymmetry_out2: Option<f64>,
    pub hits_processed: u64,
}

impl YieldResult {
    pub fn new(yields: [f64; NUMBER_OF_PLANES], hits_processed: u64) -> Self {
        let [in_yield, out1_yield, out2_yield] = yields;
        Self {
            in_yield,
            out1_yield,
            out2_yield,
            asymmetry_out1: asymmetry(in_yield, out1_yield),
            asymmetry_out2: asymmetry(in_yield, out2_yield),
            hits_processed,
        }
    }

    /// Integrate the region of interest of each plane snapshot
    pub fn from_snapshots(
        snapshots: &[HistogramSnapshot; NUMBER_OF_PLANES],
        roi: &RegionOfInterest,
        hits_processed: u64,
    ) -> Self {
        Self::new(
            [
                snapshots[0].integrate(roi),
                snapshots[1].integrate(roi),
                snapshots[2].integrate(roi),
            ],
            hits_processed,
        )
    }

    pub fn yield_of(&self, plane: Plane) -> f64 {
        match plane {
            Plane::In => self.in_yield,
            Plane::Out1 => self.out1_yield,
            Plane::Out2 => self.out2_yield,
        }
    }

    pub fn log(&self) {
        log::info!(
            "Yields after {} hits -- in: {:.0} out1: {:.0} out2: {:.0}",
            self.hits_processed,
            self.in_yield,
            self.out1_yield,
            self.out2_yield
        );
        for (name, value) in [("out1", self.asymmetry_out1), ("out2", self.asymmetry_out2)] {
            match value {
                Some(a) => log::info!("Asymmetry in/{name}: {a:.4}"),
                None => log::warn!("Asymmetry in/{name} is undefined as both yields are zero"),
            }
        }
    }
}

/// Everything handed to a renderer once per aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub histograms: [HistogramSnapshot; NUMBER_OF_PLANES],
    pub result: YieldResult,
}

/// AsymmetryAggregator accumulates the PS vs TOF histogram of each detector plane.
///
/// Histograms are cumulative over the whole run; they are only cleared by an explicit
/// [`AsymmetryAggregator::reset`]. Each histogram sits behind its own lock, taken for a single
/// increment by the consumer and for a whole copy by readers, so a snapshot is never torn.
#[derive(Debug)]
pub struct AsymmetryAggregator {
    planes: [Mutex<Histogram2D>; NUMBER_OF_PLANES],
    roi: RegionOfInterest,
}

impl AsymmetryAggregator {
    pub fn new(binning: HistogramBinning, roi: RegionOfInterest) -> Self {
        Self {
            planes: std::array::from_fn(|_| Mutex::new(Histogram2D::new(binning))),
            roi,
        }
    }

    pub fn roi(&self) -> &RegionOfInterest {
        &self.roi
    }

    /// Count a (TOF, PS) sample. Samples with a non-positive or undefined TOF are discarded.
    /// Returns true if the sample landed inside the histogram
    pub fn record(&self, plane: Plane, tof: f64, ps: f64) -> bool {
        if tof.is_nan() || tof <= 0.0 || ps.is_nan() {
            return false;
        }
        self.planes[plane.index()].lock().fill(tof, ps)
    }

    /// Integrated counts of the plane over the region of interest
    pub fn compute_yield(&self, plane: Plane) -> f64 {
        self.planes[plane.index()].lock().integrate(&self.roi)
    }

    pub fn entries(&self, plane: Plane) -> u64 {
        self.planes[plane.index()].lock().entries()
    }

    pub fn snapshot(&self, plane: Plane) -> HistogramSnapshot {
        self.planes[plane.index()].lock().snapshot()
    }

    pub fn snapshot_all(&self) -> [HistogramSnapshot; NUMBER_OF_PLANES] {
        Plane::ALL.map(|plane| self.snapshot(plane))
    }

    /// Snapshot every plane and derive the yields from those same snapshots
    pub fn analyze(&self, hits_processed: u64) -> AnalysisSnapshot {
        let histograms = self.snapshot_all();
        let result = YieldResult::from_snapshots(&histograms, &self.roi, hits_processed);
        AnalysisSnapshot { histograms, result }
    }

    pub fn reset(&self, plane: Plane) {
        self.planes[plane.index()].lock().reset();
    }

    pub fn reset_all(&self) {
        for plane in Plane::ALL {
            self.reset(plane);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> AsymmetryAggregator {
        let binning = HistogramBinning::default();
        AsymmetryAggregator::new(binning, RegionOfInterest::covering(&binning))
    }

    #[test]
    fn test_asymmetry() {
        assert_eq!(asymmetry(3.0, 1.0), Some(0.5));
        assert_eq!(asymmetry(0.0, 5.0), Some(1.0));
        assert_eq!(asymmetry(0.0, 0.0), None);
        for (a, b) in [(1.0, 2.0), (10.0, 0.0), (123.5, 77.25), (1e9, 1.0)] {
            assert_eq!(asymmetry(a, b), asymmetry(b, a));
        }
    }

    #[test]
    fn test_record_discards_bad_tof() {
        let agg = aggregator();
        assert!(!agg.record(Plane::In, 0.0, 0.5));
        assert!(!agg.record(Plane::In, -3.0, 0.5));
        assert!(!agg.record(Plane::In, f64::NAN, 0.5));
        assert!(agg.record(Plane::In, 0.05, 0.5));
        assert_eq!(agg.entries(Plane::In), 1);
        assert_eq!(agg.snapshot(Plane::In).out_of_range, 0);
    }

    #[test]
    fn test_yields_and_reset() {
        let agg = aggregator();
        for _ in 0..30 {
            agg.record(Plane::In, 20.0, 0.3);
        }
        for _ in 0..10 {
            agg.record(Plane::Out1, 31.0, 0.3);
        }
        assert_eq!(agg.compute_yield(Plane::In), 30.0);
        assert_eq!(agg.compute_yield(Plane::Out2), 0.0);

        let analysis = agg.analyze(40);
        assert_eq!(analysis.result.in_yield, 30.0);
        assert_eq!(analysis.result.out1_yield, 10.0);
        assert_eq!(analysis.result.asymmetry_out1, Some(0.5));
        assert_eq!(analysis.result.asymmetry_out2, Some(1.0));
        assert_eq!(analysis.result.yield_of(Plane::Out1), 10.0);

        // Cumulative until reset
        agg.record(Plane::In, 20.0, 0.3);
        assert_eq!(agg.compute_yield(Plane::In), 31.0);
        agg.reset(Plane::In);
        assert_eq!(agg.compute_yield(Plane::In), 0.0);
        assert_eq!(agg.compute_yield(Plane::Out1), 10.0);
        agg.reset_all();
        assert_eq!(agg.analyze(0).result.asymmetry_out1, None);
    }

    #[test]
    fn test_yield_is_reproducible() {
        let agg = aggregator();
        for i in 0..500 {
            agg.record(Plane::Out2, 1.0 + (i % 90) as f64, (i % 10) as f64 / 10.0);
        }
        let first = agg.compute_yield(Plane::Out2);
        let snapshot = agg.snapshot(Plane::Out2);
        assert_eq!(first, agg.compute_yield(Plane::Out2));
        assert_eq!(first, snapshot.integrate(agg.roi()));
        assert_eq!(first, 500.0);
    }
}
