use super::asymmetry::AsymmetryAggregator;
use super::beam_signal::BeamSignal;
use super::channel_roles::{Plane, Role};
use super::config::{AcquisitionParameters, AnalysisSettings};
use super::constants::NUMBER_OF_PLANES;
use super::hit::HitData;
use super::signal::{Signal, SignalParameters};
use super::status::{DataQualityCondition, RunCounters};

/// HitProcessor turns one hit into (TOF, PS) samples for each detector plane.
///
/// TOF is the plane's crossing time minus the beam reference time plus the plane's fixed
/// offset, in samples. Every plane which cannot produce a sample is counted under its
/// data-quality condition and skipped.
#[derive(Debug, Clone)]
pub struct HitProcessor {
    signal: Signal,
    beam: BeamSignal,
    time_offsets: [f64; NUMBER_OF_PLANES],
}

impl HitProcessor {
    pub fn new(acquisition: &AcquisitionParameters, analysis: &AnalysisSettings) -> Self {
        Self {
            signal: Signal::new(SignalParameters::from_acquisition(acquisition)),
            beam: BeamSignal::from_settings(acquisition, analysis),
            time_offsets: analysis.time_offsets,
        }
    }

    /// Process a hit into the aggregator. Returns the number of planes recorded
    pub fn process(
        &self,
        hit: &HitData,
        aggregator: &AsymmetryAggregator,
        counters: &RunCounters,
    ) -> usize {
        counters.note_hit_processed();

        let beam_samples = hit.samples(Role::Beam);
        if beam_samples.is_empty() {
            counters.note_quality(DataQualityCondition::MissingChannel);
            return 0;
        }
        let beam_time = match self.beam.process(beam_samples) {
            Some(time) => time,
            None => {
                counters.note_quality(DataQualityCondition::NoCrossing);
                return 0;
            }
        };

        let mut recorded = 0;
        for plane in Plane::ALL {
            let samples = hit.samples(plane.role());
            if samples.is_empty() {
                counters.note_quality(DataQualityCondition::MissingChannel);
                continue;
            }
            let Some(features) = self.signal.process(samples) else {
                counters.note_quality(DataQualityCondition::NoCrossing);
                continue;
            };
            let Some(ratio) = features.ps_ratio() else {
                counters.note_quality(DataQualityCondition::ZeroLongCharge);
                continue;
            };
            let tof = features.trigger_time - beam_time + self.time_offsets[plane.index()];
            if tof.is_nan() || tof <= 0.0 {
                counters.note_quality(DataQualityCondition::TimingAnomaly);
                continue;
            }
            if aggregator.record(plane, tof, ratio) {
                recorded += 1;
            }
        }
        recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetry::RegionOfInterest;
    use crate::config::TriggerPolarity;
    use crate::histogram::HistogramBinning;

    fn step(at: usize) -> Vec<u16> {
        (0..256)
            .map(|i| if i >= at { 10_000 } else { 8000 })
            .collect()
    }

    fn setup() -> (HitProcessor, AsymmetryAggregator, RunCounters) {
        let acquisition = AcquisitionParameters {
            trigger_polarity: TriggerPolarity::Rising,
            ..Default::default()
        };
        let analysis = AnalysisSettings {
            time_offsets: [0.0; 3],
            ..Default::default()
        };
        let binning = HistogramBinning::default();
        (
            HitProcessor::new(&acquisition, &analysis),
            AsymmetryAggregator::new(binning, RegionOfInterest::covering(&binning)),
            RunCounters::new(),
        )
    }

    #[test]
    fn test_full_hit() {
        let (processor, aggregator, counters) = setup();
        let hit = HitData::new(0, 0)
            .with_samples(Role::InPlane, step(120))
            .with_samples(Role::OutPlane1, step(130))
            .with_samples(Role::OutPlane2, step(140))
            .with_samples(Role::Beam, step(100));
        assert_eq!(processor.process(&hit, &aggregator, &counters), 3);
        assert_eq!(counters.hits_processed(), 1);
        // 119.5 - 99.5
        let snapshot = aggregator.snapshot(Plane::In);
        assert_eq!(snapshot.bins.len(), 1);
        assert_eq!(snapshot.bins[0].0, 200);
        assert_eq!(aggregator.snapshot(Plane::Out2).bins[0].0, 400);
    }

    #[test]
    fn test_quality_conditions() {
        let (processor, aggregator, counters) = setup();

        let no_beam = HitData::new(0, 0).with_samples(Role::InPlane, step(120));
        assert_eq!(processor.process(&no_beam, &aggregator, &counters), 0);
        assert_eq!(counters.quality_count(DataQualityCondition::MissingChannel), 1);

        let mixed = HitData::new(0, 1)
            .with_samples(Role::InPlane, vec![8000; 256])
            .with_samples(Role::OutPlane1, step(90))
            .with_samples(Role::Beam, step(100));
        assert_eq!(processor.process(&mixed, &aggregator, &counters), 0);
        assert_eq!(counters.quality_count(DataQualityCondition::NoCrossing), 1);
        assert_eq!(counters.quality_count(DataQualityCondition::TimingAnomaly), 1);
        assert_eq!(counters.quality_count(DataQualityCondition::MissingChannel), 2);
        assert_eq!(counters.hits_processed(), 2);
        assert_eq!(aggregator.entries(Plane::In), 0);
    }
}
