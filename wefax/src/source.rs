use std::f64::consts::TAU;

use crate::{
    GetSampleRate,
    modem::{
        fax::{
            LINES_PER_SECOND,
            PLL_CENTER_FREQUENCY,
            PLL_DEVIATION_FREQUENCY,
            START_TONE,
            STOP_TONE,
            SYNC_PULSE_INTERVAL,
        },
        fm::FaxModulator,
    },
    scan::Scanner,
};

pub trait SignalGenerator {
    type Sample;

    fn set_sample_rate(&mut self, sample_rate: f64);
    fn next(&mut self) -> Self::Sample;
}

#[inline]
fn step_from_frequency_and_sample_rate(frequency: f64, sample_rate: f64) -> f64 {
    (TAU * frequency / sample_rate).rem_euclid(TAU)
}

#[derive(Clone, Copy, Debug)]
pub struct SineWave {
    frequency: f64,
    sample_rate: f64,
    phase: f64,
    step: f64,
}

impl SineWave {
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        Self {
            frequency,
            sample_rate,
            phase: 0.0,
            step: step_from_frequency_and_sample_rate(frequency, sample_rate),
        }
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.step = step_from_frequency_and_sample_rate(frequency, self.sample_rate);
    }
}

impl SignalGenerator for SineWave {
    type Sample = f64;

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.step = step_from_frequency_and_sample_rate(self.frequency, sample_rate);
    }

    fn next(&mut self) -> Self::Sample {
        let output = self.phase.sin();
        self.phase += self.step;
        if self.phase > TAU {
            self.phase -= TAU;
        }
        output
    }
}

impl GetSampleRate for SineWave {
    #[inline]
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

#[inline]
pub fn sine(frequency: f64, sample_rate: f64) -> SineWave {
    SineWave::new(frequency, sample_rate)
}

/// Synthesizes a complete WEFAX transmission: start tone, phasing lines
/// (one white sync pulse per line on a black background), image lines with
/// the same sync pulse and a half-black/half-white test pattern, and the
/// stop tone. Past the end it yields silence.
///
/// Samples are already scaled to 16-bit audio amplitude.
#[derive(Clone, Copy, Debug)]
pub struct WefaxSignal {
    sample_rate: f64,
    amplitude: f64,
    modulator: FaxModulator,
    phasing_lines: usize,
    image_lines: usize,
    samples_per_line: usize,
    sync_pulse_samples: usize,
    start_samples: usize,
    phasing_samples: usize,
    image_samples: usize,
    stop_samples: usize,
    position: usize,
}

impl WefaxSignal {
    pub const START_TONE_TIME: f64 = 5.0;
    pub const STOP_TONE_TIME: f64 = 5.0;
    /// Covers the tone-detector lag, the wait for a line boundary and the
    /// full synchronization search.
    pub const DEFAULT_PHASING_LINES: usize = 46;

    pub fn new(sample_rate: f64, image_lines: usize) -> Self {
        let mut this = Self {
            sample_rate,
            amplitude: 16_384.0,
            modulator: FaxModulator::new(
                sample_rate,
                PLL_CENTER_FREQUENCY,
                PLL_DEVIATION_FREQUENCY,
            ),
            phasing_lines: Self::DEFAULT_PHASING_LINES,
            image_lines,
            samples_per_line: 0,
            sync_pulse_samples: 0,
            start_samples: 0,
            phasing_samples: 0,
            image_samples: 0,
            stop_samples: 0,
            position: 0,
        };
        this.recompute();
        this
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_phasing_lines(mut self, phasing_lines: usize) -> Self {
        self.phasing_lines = phasing_lines;
        self.recompute();
        self
    }

    fn recompute(&mut self) {
        self.samples_per_line = (self.sample_rate / f64::from(LINES_PER_SECOND)) as usize;
        self.sync_pulse_samples = (SYNC_PULSE_INTERVAL * self.sample_rate) as usize;
        self.start_samples = (Self::START_TONE_TIME * self.sample_rate) as usize;
        self.phasing_samples = self.phasing_lines * self.samples_per_line;
        self.image_samples = self.image_lines * self.samples_per_line;
        self.stop_samples = (Self::STOP_TONE_TIME * self.sample_rate) as usize;
    }

    /// Total length of the transmission in samples.
    pub fn duration_samples(&self) -> usize {
        self.start_samples + self.phasing_samples + self.image_samples + self.stop_samples
    }

    fn video(&self) -> Option<f64> {
        let mut p = self.position;
        if p < self.start_samples {
            return Some((TAU * START_TONE * p as f64 / self.sample_rate).sin());
        }
        p -= self.start_samples;
        if p < self.phasing_samples {
            let line_position = p % self.samples_per_line;
            return Some(if line_position < self.sync_pulse_samples {
                1.0
            }
            else {
                -1.0
            });
        }
        p -= self.phasing_samples;
        if p < self.image_samples {
            let line_position = p % self.samples_per_line;
            return Some(if line_position < self.sync_pulse_samples {
                1.0
            }
            else if line_position < self.samples_per_line / 2 {
                -1.0
            }
            else {
                1.0
            });
        }
        p -= self.image_samples;
        if p < self.stop_samples {
            return Some((TAU * STOP_TONE * self.position as f64 / self.sample_rate).sin());
        }
        None
    }
}

impl SignalGenerator for WefaxSignal {
    type Sample = f64;

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.modulator =
            FaxModulator::new(sample_rate, PLL_CENTER_FREQUENCY, PLL_DEVIATION_FREQUENCY);
        self.position = 0;
        self.recompute();
    }

    fn next(&mut self) -> Self::Sample {
        let Some(video) = self.video()
        else {
            self.position += 1;
            return 0.0;
        };
        self.position += 1;
        self.amplitude * self.modulator.scan(video)
    }
}

impl GetSampleRate for WefaxSignal {
    #[inline]
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
