use super::config::{AcquisitionParameters, TriggerPolarity};
use super::constants::{BASELINE_GUARD_SAMPLES, MIN_BASELINE_SAMPLES};

/// Parameters of the pulse feature extraction, in samples and ADC counts
#[derive(Debug, Clone, PartialEq)]
pub struct SignalParameters {
    /// Height above the baseline which marks a pulse
    pub threshold: f64,
    /// Fraction of the local peak used for constant fraction timing
    pub cfd_fraction: f64,
    pub short_gate: usize,
    pub long_gate: usize,
    /// Number of leading samples averaged into the baseline
    pub baseline_samples: usize,
    pub polarity: TriggerPolarity,
}

impl SignalParameters {
    /// Derive the extraction parameters of a detector plane.
    ///
    /// The baseline window ends a few samples before the trigger position so it never
    /// overlaps the rising edge of the pulse.
    pub fn from_acquisition(params: &AcquisitionParameters) -> Self {
        Self {
            threshold: params.threshold as f64,
            cfd_fraction: params.cfd_fraction(),
            short_gate: params.short_gate as usize,
            long_gate: params.long_gate as usize,
            baseline_samples: baseline_window(params.pre_trigger_samples()),
            polarity: params.trigger_polarity,
        }
    }
}

/// Length of the baseline window for a given pre-trigger length
pub fn baseline_window(pre_trigger_samples: usize) -> usize {
    pre_trigger_samples
        .saturating_sub(BASELINE_GUARD_SAMPLES)
        .max(MIN_BASELINE_SAMPLES)
}

/// Features of a single pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseFeatures {
    /// Constant fraction crossing time in (fractional) samples
    pub trigger_time: f64,
    /// First sample at or above the constant fraction level; both gates start here
    pub crossing_sample: usize,
    pub short_charge: f64,
    pub long_charge: f64,
}

impl PulseFeatures {
    /// Pulse-shape ratio short/long. None unless the long-gate charge is positive
    pub fn ps_ratio(&self) -> Option<f64> {
        if self.long_charge > 0.0 {
            Some(self.short_charge / self.long_charge)
        } else {
            None
        }
    }
}

/// A waveform with its baseline removed and its polarity corrected so pulses are positive
pub(crate) struct CorrectedWaveform<'a> {
    samples: &'a [u16],
    baseline: f64,
    sign: f64,
}

impl<'a> CorrectedWaveform<'a> {
    /// Returns None if the waveform is too short to hold the baseline window and a pulse
    pub(crate) fn new(
        samples: &'a [u16],
        baseline_samples: usize,
        polarity: TriggerPolarity,
    ) -> Option<Self> {
        if baseline_samples == 0 || samples.len() <= baseline_samples + 1 {
            return None;
        }
        let baseline = samples[..baseline_samples]
            .iter()
            .map(|s| *s as f64)
            .sum::<f64>()
            / baseline_samples as f64;
        let sign = match polarity {
            TriggerPolarity::Rising => 1.0,
            TriggerPolarity::Falling => -1.0,
        };
        Some(Self {
            samples,
            baseline,
            sign,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn value(&self, index: usize) -> f64 {
        self.sign * (self.samples[index] as f64 - self.baseline)
    }

    /// First sample at or after `start` which exceeds `threshold`
    pub(crate) fn threshold_crossing(&self, start: usize, threshold: f64) -> Option<usize> {
        (start..self.len()).find(|idx| self.value(*idx) > threshold)
    }

    /// Constant fraction timing of the pulse found at `crossing`.
    ///
    /// The local peak is searched within `peak_window` samples of the threshold crossing;
    /// the crossing of `fraction * peak` on the leading edge of that pulse (never before
    /// `search_start`) is then interpolated linearly between the two straddling samples.
    /// Returns the interpolated time and the first sample at or above the level.
    pub(crate) fn cfd(
        &self,
        search_start: usize,
        crossing: usize,
        peak_window: usize,
        fraction: f64,
    ) -> (f64, usize) {
        let peak_end = (crossing + peak_window.max(1)).min(self.len());
        let (peak_index, peak) = (crossing..peak_end)
            .map(|idx| (idx, self.value(idx)))
            .fold((crossing, f64::MIN), |best, current| {
                if current.1 > best.1 {
                    current
                } else {
                    best
                }
            });
        let level = fraction * peak;

        // Walk back from the threshold crossing over the contiguous leading edge, or forward
        // to the peak if the level lies above the crossing sample
        let above = if self.value(crossing) >= level {
            let mut idx = crossing;
            while idx > search_start && self.value(idx - 1) >= level {
                idx -= 1;
            }
            idx
        } else {
            (crossing..=peak_index)
                .find(|idx| self.value(*idx) >= level)
                .unwrap_or(crossing)
        };
        if above == 0 {
            return (0.0, 0);
        }
        let before = self.value(above - 1);
        let after = self.value(above);
        let step = after - before;
        let time = if step > 0.0 {
            (above - 1) as f64 + ((level - before) / step).clamp(0.0, 1.0)
        } else {
            above as f64
        };
        (time, above)
    }

    /// Sum of the corrected samples in `[start, start + width)`, clipped to the waveform
    pub(crate) fn integrate(&self, start: usize, width: usize) -> f64 {
        let end = (start + width).min(self.len());
        (start.min(end)..end).map(|idx| self.value(idx)).sum()
    }
}

/// Signal extracts pulse features from the waveform of a detector plane
#[derive(Debug, Clone)]
pub struct Signal {
    params: SignalParameters,
}

impl Signal {
    pub fn new(params: SignalParameters) -> Self {
        Self { params }
    }

    pub fn parameters(&self) -> &SignalParameters {
        &self.params
    }

    /// Extract the features of the first pulse in the waveform.
    ///
    /// Returns None (no trigger) if the waveform is empty, too short, or never crosses the
    /// threshold. This is an expected condition, not an error.
    pub fn process(&self, samples: &[u16]) -> Option<PulseFeatures> {
        let waveform =
            CorrectedWaveform::new(samples, self.params.baseline_samples, self.params.polarity)?;
        let start = self.params.baseline_samples;
        let crossing = waveform.threshold_crossing(start, self.params.threshold)?;
        let (trigger_time, crossing_sample) = waveform.cfd(
            start,
            crossing,
            self.params.short_gate,
            self.params.cfd_fraction,
        );

        Some(PulseFeatures {
            trigger_time,
            crossing_sample,
            short_charge: waveform.integrate(crossing_sample, self.params.short_gate),
            long_charge: waveform.integrate(crossing_sample, self.params.long_gate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_pulse(len: usize, at: usize, baseline: u16, amplitude: u16) -> Vec<u16> {
        (0..len)
            .map(|i| if i >= at { baseline + amplitude } else { baseline })
            .collect()
    }

    fn rising_params() -> SignalParameters {
        let acq = AcquisitionParameters {
            trigger_polarity: TriggerPolarity::Rising,
            ..Default::default()
        };
        SignalParameters::from_acquisition(&acq)
    }

    #[test]
    fn test_parameters_from_acquisition() {
        let params = SignalParameters::from_acquisition(&AcquisitionParameters::default());
        assert_eq!(params.baseline_samples, 47);
        assert_eq!(params.short_gate, 30);
        assert_eq!(params.long_gate, 300);
        assert_eq!(params.cfd_fraction, 0.5);
        assert_eq!(baseline_window(2), 1);
    }

    #[test]
    fn test_step_pulse() {
        let signal = Signal::new(rising_params());
        let features = signal.process(&step_pulse(256, 120, 8000, 2000)).unwrap();
        assert!((features.trigger_time - 120.0).abs() <= 1.0);
        assert_eq!(features.crossing_sample, 120);
        assert_eq!(features.short_charge, 30.0 * 2000.0);
        // Long gate is truncated at the end of the record
        assert_eq!(features.long_charge, 136.0 * 2000.0);
        let ratio = features.ps_ratio().unwrap();
        assert!(ratio > 0.0 && ratio < 1.0);
    }

    #[test]
    fn test_sub_threshold_bump_is_not_timed() {
        let signal = Signal::new(rising_params());
        let mut samples = step_pulse(256, 120, 8000, 2000);
        samples[60] = 8450;
        let features = signal.process(&samples).unwrap();
        assert!((features.trigger_time - 119.5).abs() < 1e-9);
        assert_eq!(features.crossing_sample, 120);
        assert_eq!(features.short_charge, 30.0 * 2000.0);
        assert_eq!(features.long_charge, 136.0 * 2000.0);
    }

    #[test]
    fn test_cfd_level_above_threshold_crossing() {
        // Slow rise: the threshold is crossed well before half of the peak
        let mut samples = vec![8000u16; 256];
        for (k, sample) in samples.iter_mut().skip(100).enumerate() {
            *sample += (k.min(10) * 200) as u16;
        }
        let signal = Signal::new(rising_params());
        let features = signal.process(&samples).unwrap();
        // 600 at sample 103 crosses the threshold, the 1000 level is reached at sample 105
        assert_eq!(features.crossing_sample, 105);
        assert!((features.trigger_time - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_falling_pulse() {
        let mut samples = vec![13000u16; 256];
        for (k, sample) in samples.iter_mut().skip(60).enumerate() {
            *sample -= (3000.0 * (-(k as f64) / 30.0).exp()) as u16;
        }
        let signal = Signal::new(SignalParameters::from_acquisition(
            &AcquisitionParameters::default(),
        ));
        let features = signal.process(&samples).unwrap();
        assert!(features.trigger_time > 59.0 && features.trigger_time <= 60.0);
        assert!(features.short_charge <= features.long_charge);
        let ratio = features.ps_ratio().unwrap();
        assert!(ratio > 0.0 && ratio <= 1.0);
    }

    #[test]
    fn test_flat_waveform_has_no_trigger() {
        let signal = Signal::new(rising_params());
        assert_eq!(signal.process(&[8000; 256]), None);
    }

    #[test]
    fn test_malformed_waveforms() {
        let signal = Signal::new(rising_params());
        assert_eq!(signal.process(&[]), None);
        assert_eq!(signal.process(&[8000; 10]), None);
    }

    #[test]
    fn test_pulse_at_record_end() {
        let signal = Signal::new(rising_params());
        let features = signal.process(&step_pulse(256, 250, 8000, 2000)).unwrap();
        assert_eq!(features.short_charge, 6.0 * 2000.0);
        assert_eq!(features.short_charge, features.long_charge);
    }

    #[test]
    fn test_zero_long_charge_has_no_ratio() {
        let features = PulseFeatures {
            trigger_time: 10.0,
            crossing_sample: 10,
            short_charge: 0.0,
            long_charge: 0.0,
        };
        assert_eq!(features.ps_ratio(), None);
    }
}
