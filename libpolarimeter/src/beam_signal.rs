use super::config::{AcquisitionParameters, AnalysisSettings, TriggerPolarity};
use super::constants::{BEAM_BASELINE_SAMPLES, DEFAULT_BEAM_CFD_FRACTION};
use super::signal::{baseline_window, CorrectedWaveform};

/// BeamSignal finds the reference time of the beam pulse. No charge is integrated.
///
/// The beam pulse arrives before the detector trigger, inside the pre-trigger region, so its
/// baseline is taken from a shorter leading window than the detector planes use.
#[derive(Debug, Clone)]
pub struct BeamSignal {
    threshold: f64,
    cfd_fraction: f64,
    peak_window: usize,
    baseline_samples: usize,
    polarity: TriggerPolarity,
}

impl BeamSignal {
    pub fn new(
        threshold: f64,
        cfd_fraction: f64,
        peak_window: usize,
        baseline_samples: usize,
        polarity: TriggerPolarity,
    ) -> Self {
        Self {
            threshold,
            cfd_fraction,
            peak_window,
            baseline_samples,
            polarity,
        }
    }

    pub fn from_settings(acquisition: &AcquisitionParameters, analysis: &AnalysisSettings) -> Self {
        Self::new(
            analysis.beam_threshold as f64,
            DEFAULT_BEAM_CFD_FRACTION,
            acquisition.short_gate as usize,
            baseline_window(acquisition.pre_trigger_samples()).min(BEAM_BASELINE_SAMPLES),
            acquisition.trigger_polarity,
        )
    }

    /// Reference crossing time in (fractional) samples, or None if the beam pulse is absent
    pub fn process(&self, samples: &[u16]) -> Option<f64> {
        let waveform = CorrectedWaveform::new(samples, self.baseline_samples, self.polarity)?;
        let crossing = waveform.threshold_crossing(self.baseline_samples, self.threshold)?;
        let (time, _) = waveform.cfd(
            self.baseline_samples,
            crossing,
            self.peak_window,
            self.cfd_fraction,
        );
        Some(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beam() -> BeamSignal {
        let acquisition = AcquisitionParameters {
            trigger_polarity: TriggerPolarity::Rising,
            ..Default::default()
        };
        BeamSignal::from_settings(&acquisition, &AnalysisSettings::default())
    }

    #[test]
    fn test_beam_reference_time() {
        let samples: Vec<u16> = (0..256)
            .map(|i| if i >= 100 { 10_000 } else { 8000 })
            .collect();
        let time = beam().process(&samples).unwrap();
        assert!((time - 99.5).abs() < 1e-9);
    }

    #[test]
    fn test_early_beam_pulse() {
        // Pulse inside the nominal pre-trigger region still resolves
        let samples: Vec<u16> = (0..256)
            .map(|i| if i >= 40 { 10_000 } else { 8000 })
            .collect();
        let time = beam().process(&samples).unwrap();
        assert!((time - 39.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_beam() {
        assert_eq!(beam().process(&[]), None);
        assert_eq!(beam().process(&[8000; 256]), None);
    }
}
