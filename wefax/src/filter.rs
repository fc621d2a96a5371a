use std::f64::consts::TAU;

use biquad::{
    Biquad,
    Coefficients,
    DirectForm2Transposed,
    Q_BUTTERWORTH_F64,
    ToHertz,
    Type,
};

use crate::scan::Scanner;

/// Single-bin tone energy detector (Goertzel).
///
/// Runs the classic two-pole recursion over fixed-size blocks of samples.
/// After each block the bin energy is published and the recursion state is
/// cleared; `energy` is normalized so that a full-scale sinusoid at the bin
/// frequency produces 1.0.
#[derive(Clone, Copy, Debug)]
pub struct GoertzelFilter {
    block_size: f64,
    goertzel_factor: f64,
    scaling_factor: f64,
    threshold: f64,
    s1: f64,
    s2: f64,
    sample_count: f64,
    energy: f64,
}

impl GoertzelFilter {
    /// `frequency` is in cycles per sample.
    pub fn new(frequency: f64, block_size: f64, threshold: f64) -> Self {
        Self {
            block_size,
            goertzel_factor: 2.0 * (TAU * frequency).cos(),
            scaling_factor: 4.0 / (block_size * block_size),
            threshold,
            s1: 0.0,
            s2: 0.0,
            sample_count: 0.0,
            energy: 0.0,
        }
    }

    pub fn process(&mut self, sample: f64) {
        let s0 = sample + self.goertzel_factor * self.s1 - self.s2;
        self.s2 = self.s1;
        self.s1 = s0;
        self.sample_count += 1.0;
        if self.sample_count >= self.block_size {
            self.update();
        }
    }

    fn update(&mut self) {
        self.energy = (self.s2 * self.s2 + self.s1 * self.s1
            - self.goertzel_factor * self.s1 * self.s2)
            * self.scaling_factor;
        self.reset(false);
    }

    /// Clears the recursion state. A full reset also clears the published
    /// energy, for re-entering signal acquisition.
    pub fn reset(&mut self, full: bool) {
        self.s1 = 0.0;
        self.s2 = 0.0;
        self.sample_count = 0.0;
        if full {
            self.energy = 0.0;
        }
    }

    /// Adjustable at any time; does not touch accumulated state.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn active(&self) -> bool {
        self.energy >= self.threshold
    }
}

impl Scanner<f64> for GoertzelFilter {
    type Output = f64;

    #[inline]
    fn scan(&mut self, sample: f64) -> Self::Output {
        self.process(sample);
        self.energy
    }
}

/// Butterworth low-pass biquad section: unity gain at DC, -3 dB at
/// `cutoff_frequency`.
///
/// Panics if the cutoff lies at or beyond the Nyquist frequency.
pub fn lowpass(sample_rate: f64, cutoff_frequency: f64) -> DirectForm2Transposed<f64> {
    DirectForm2Transposed::<f64>::new(
        Coefficients::<f64>::from_params(
            Type::LowPass,
            sample_rate.hz(),
            cutoff_frequency.hz(),
            Q_BUTTERWORTH_F64,
        )
        .unwrap(),
    )
}

impl Scanner<f64> for DirectForm2Transposed<f64> {
    type Output = f64;

    #[inline]
    fn scan(&mut self, sample: f64) -> Self::Output {
        self.run(sample)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::{
        filter::{
            GoertzelFilter,
            lowpass,
        },
        scan::Scanner,
        source::{
            SignalGenerator,
            SineWave,
        },
    };

    const SAMPLE_RATE: f64 = 8000.0;

    fn feed_tone(filter: &mut GoertzelFilter, frequency: f64, amplitude: f64, num_samples: usize) {
        let mut tone = SineWave::new(frequency, SAMPLE_RATE);
        for _ in 0..num_samples {
            filter.process(amplitude * tone.next());
        }
    }

    #[test]
    fn full_scale_tone_converges_to_unit_energy() {
        let block_size = SAMPLE_RATE / 4.0;
        let mut filter = GoertzelFilter::new(300.0 / SAMPLE_RATE, block_size, 0.5);

        // two full blocks
        feed_tone(&mut filter, 300.0, 1.0, 2 * block_size as usize);

        assert_relative_eq!(filter.energy(), 1.0, epsilon = 0.05);
        assert!(filter.active());
    }

    #[test]
    fn energy_scales_with_the_square_of_amplitude() {
        let block_size = SAMPLE_RATE / 4.0;
        let mut full = GoertzelFilter::new(450.0 / SAMPLE_RATE, block_size, 0.5);
        let mut half = GoertzelFilter::new(450.0 / SAMPLE_RATE, block_size, 0.5);

        feed_tone(&mut full, 450.0, 1.0, block_size as usize);
        feed_tone(&mut half, 450.0, 0.5, block_size as usize);

        assert_relative_eq!(half.energy(), 0.25 * full.energy(), epsilon = 0.01);
        assert!(!half.active());
    }

    #[test]
    fn off_frequency_tone_stays_below_threshold() {
        let block_size = SAMPLE_RATE / 4.0;
        let mut filter = GoertzelFilter::new(300.0 / SAMPLE_RATE, block_size, 0.5);

        feed_tone(&mut filter, 1200.0, 1.0, 2 * block_size as usize);

        assert!(filter.energy() < 0.05);
        assert!(!filter.active());
    }

    #[test]
    fn full_reset_clears_published_energy() {
        let block_size = SAMPLE_RATE / 4.0;
        let mut filter = GoertzelFilter::new(300.0 / SAMPLE_RATE, block_size, 0.5);

        feed_tone(&mut filter, 300.0, 1.0, block_size as usize);
        assert!(filter.energy() > 0.5);

        filter.reset(false);
        assert!(filter.energy() > 0.5);

        filter.reset(true);
        assert_eq!(filter.energy(), 0.0);
        assert!(!filter.active());
    }

    #[test]
    fn lowpass_has_unity_gain_at_dc() {
        let mut filter = lowpass(SAMPLE_RATE, 400.0);

        let mut output = 0.0;
        for _ in 0..10_000 {
            output = filter.scan(1.0);
        }

        assert_relative_eq!(output, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn lowpass_attenuates_above_the_corner() {
        let mut filter = lowpass(SAMPLE_RATE, 400.0);
        let mut tone = SineWave::new(3000.0, SAMPLE_RATE);

        // let the filter settle, then measure the output peak
        for _ in 0..1000 {
            filter.scan(tone.next());
        }
        let mut peak: f64 = 0.0;
        for _ in 0..1000 {
            peak = peak.max(filter.scan(tone.next()).abs());
        }

        assert!(peak < 0.05, "peak {peak} not attenuated");
    }
}
