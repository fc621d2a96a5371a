use std::f64::consts::TAU;

use biquad::{
    Biquad,
    DirectForm2Transposed,
};

use crate::{
    filter::lowpass,
    scan::Scanner,
};

/// Phase-locked-loop FM demodulator.
///
/// Tracks the instantaneous frequency of an input tone with a
/// numerically-controlled oscillator and outputs one normalized deviation
/// value per sample: ±1.0 corresponds to ±`deviation_frequency`, with 1.2×
/// headroom, clamped to [-2.0, 2.0].
#[derive(Clone, Debug)]
pub struct PllDemodulator {
    sample_interval: f64,
    gain_tc: f64,
    gain_level: f64,
    loop_gain: f64,
    omega: f64,
    output_gain: f64,
    integral: f64,
    reference: f64,
    output_lowpass: DirectForm2Transposed<f64>,
    sample_count: u64,
    old_sign: i8,
    cycles: u64,
}

impl PllDemodulator {
    pub fn new(
        sample_rate: f64,
        center_frequency: f64,
        deviation_frequency: f64,
        output_lowpass_frequency: f64,
    ) -> Self {
        Self {
            sample_interval: 1.0 / sample_rate,
            gain_tc: 1000.0 / sample_rate,
            gain_level: 0.0,
            loop_gain: 1.0,
            omega: TAU * center_frequency,
            // unit output at maximum deviation, plus 20% headroom
            output_gain: 1.2 * center_frequency / deviation_frequency,
            integral: 0.0,
            reference: 0.0,
            output_lowpass: lowpass(sample_rate, output_lowpass_frequency),
            sample_count: 0,
            old_sign: 0,
            cycles: 0,
        }
    }

    /// Smoothed input envelope used for automatic gain normalization.
    pub fn gain_level(&self) -> f64 {
        self.gain_level
    }

    /// Positive-going zero crossings of the local oscillator since the last
    /// [`reset_cycles`](Self::reset_cycles) call. Divided by the elapsed
    /// measurement interval this gives the average tracked frequency.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn reset_cycles(&mut self) {
        self.cycles = 0;
    }
}

impl Scanner<f64> for PllDemodulator {
    type Output = f64;

    fn scan(&mut self, sample: f64) -> Self::Output {
        let time = self.sample_count as f64 * self.sample_interval;
        self.sample_count += 1;

        self.gain_level += (sample.abs() - self.gain_level) * self.gain_tc;
        self.gain_level = self.gain_level.max(0.1);
        let normalized = sample / self.gain_level;

        let loop_control = normalized * self.reference * self.loop_gain;
        self.integral += loop_control * self.sample_interval;
        // guards against numeric blow-up near DC
        if !self.integral.is_finite() {
            self.integral = 0.0;
        }
        self.reference = (self.omega * (time + self.integral)).sin();

        let sign = if self.reference > 0.0 { 1 } else { -1 };
        if sign > self.old_sign {
            self.cycles += 1;
        }
        self.old_sign = sign;

        let output = self.output_lowpass.run(loop_control) * self.output_gain;
        output.clamp(-2.0, 2.0)
    }
}

/// FM modulator: turns a video value in [-1.0, 1.0] into a subcarrier tone
/// sample. The counterpart of [`PllDemodulator`], used to synthesize test
/// signals.
#[derive(Clone, Copy, Debug)]
pub struct FaxModulator {
    sample_rate: f64,
    center_frequency: f64,
    deviation_frequency: f64,
    phase: f64,
}

impl FaxModulator {
    pub fn new(sample_rate: f64, center_frequency: f64, deviation_frequency: f64) -> Self {
        Self {
            sample_rate,
            center_frequency,
            deviation_frequency,
            phase: 0.0,
        }
    }
}

impl Scanner<f64> for FaxModulator {
    type Output = f64;

    fn scan(&mut self, video: f64) -> Self::Output {
        let frequency = self.center_frequency + video * self.deviation_frequency;
        self.phase += TAU * frequency / self.sample_rate;
        if self.phase > TAU {
            self.phase -= TAU;
        }
        self.phase.sin()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::{
        filter::GoertzelFilter,
        modem::fm::{
            FaxModulator,
            PllDemodulator,
        },
        scan::{
            Scanner,
            ScannerExt,
        },
    };

    const SAMPLE_RATE: f64 = 8000.0;
    const AMPLITUDE: f64 = 10_000.0;

    fn demodulator() -> PllDemodulator {
        PllDemodulator::new(SAMPLE_RATE, 1900.0, 400.0, 650.0)
    }

    #[test]
    fn output_sign_follows_the_transmitted_symbol() {
        // video in, video out
        let mut pipeline = FaxModulator::new(SAMPLE_RATE, 1900.0, 400.0)
            .map(|sample| AMPLITUDE * sample)
            .chain(demodulator());

        let samples_per_symbol = 800;
        for symbol_index in 0..20 {
            let video = if symbol_index % 2 == 0 { 1.0 } else { -1.0 };
            for position in 0..samples_per_symbol {
                let output = pipeline.scan(video);
                // allow latency for the loop filter to settle, then the
                // output sign must match the symbol
                if symbol_index > 0 && position > samples_per_symbol / 4 {
                    assert_eq!(
                        output > 0.0,
                        video > 0.0,
                        "symbol {symbol_index} position {position}: output {output}"
                    );
                }
            }
        }
    }

    #[test]
    fn gain_level_tracks_the_input_envelope() {
        let mut modulator = FaxModulator::new(SAMPLE_RATE, 1900.0, 400.0);
        let mut demodulator = demodulator();

        for _ in 0..SAMPLE_RATE as usize {
            demodulator.scan(AMPLITUDE * modulator.scan(0.0));
        }
        // the envelope follows the rectified carrier closely, so average it
        // over a trailing window
        let window = 1000;
        let mut mean = 0.0;
        for _ in 0..window {
            demodulator.scan(AMPLITUDE * modulator.scan(0.0));
            mean += demodulator.gain_level();
        }
        mean /= window as f64;

        // mean |sin| = 2/pi
        let expected = AMPLITUDE * 2.0 / std::f64::consts::PI;
        assert_relative_eq!(mean, expected, max_relative = 0.15);
    }

    #[test]
    fn cycle_counter_measures_the_carrier_frequency() {
        let mut modulator = FaxModulator::new(SAMPLE_RATE, 1900.0, 400.0);
        let mut demodulator = demodulator();

        // settle, then measure for one second
        for _ in 0..SAMPLE_RATE as usize {
            demodulator.scan(AMPLITUDE * modulator.scan(0.0));
        }
        demodulator.reset_cycles();
        for _ in 0..SAMPLE_RATE as usize {
            demodulator.scan(AMPLITUDE * modulator.scan(0.0));
        }

        let cycles = demodulator.cycles() as f64;
        assert_relative_eq!(cycles, 1900.0, max_relative = 0.05);
    }

    #[test]
    fn modulator_emits_the_white_tone_at_full_deviation() {
        let mut modulator = FaxModulator::new(SAMPLE_RATE, 1900.0, 400.0);
        let block_size = SAMPLE_RATE / 4.0;
        let mut white = GoertzelFilter::new(2300.0 / SAMPLE_RATE, block_size, 0.5);

        for _ in 0..block_size as usize {
            white.process(modulator.scan(1.0));
        }

        assert!(white.active(), "energy {}", white.energy());
    }
}
