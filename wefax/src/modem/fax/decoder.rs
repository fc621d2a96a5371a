use std::sync::Arc;

use biquad::DirectForm2Transposed;
use parking_lot::RwLock;

use crate::{
    GetSampleRate,
    filter::{
        GoertzelFilter,
        lowpass,
    },
    modem::{
        fax::{
            DEFAULT_IMAGE_WIDTH,
            GAIN_THRESHOLD,
            GOERTZEL_ACCEPT,
            LINES_PER_SECOND,
            MAX_IMAGE_LINES,
            PLL_CENTER_FREQUENCY,
            PLL_DEVIATION_FREQUENCY,
            PLL_OUTPUT_LOWPASS_FREQUENCY,
            START_TONE,
            STOP_TONE,
            SYNC_PULSE_INTERVAL,
            SYNC_TIME,
            VIDEO_LOWPASS_FREQUENCY,
            line,
            raster::ScanlineSink,
            state::State,
        },
        fm::PllDemodulator,
    },
    scan::Scanner,
    util::unlerp,
};

/// The demodulator and its filters only make sense with the subcarrier and
/// its sidebands representable.
const MIN_SAMPLE_RATE: u32 = 4800;

#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("sample rate {0} Hz is too low for the fax subcarrier")]
    SampleRateTooLow(u32),
    #[error("image width must be greater than zero")]
    ZeroImageWidth,
}

#[derive(Clone, Copy, Debug)]
struct ControlValues {
    calibration: f64,
    threshold_percent: f64,
    grayscale: bool,
    video_filter: bool,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            calibration: 0.0,
            threshold_percent: 100.0,
            grayscale: true,
            video_filter: false,
        }
    }
}

/// Tunable reception parameters, shared between the decoding thread and a
/// UI thread.
///
/// Clones share state. Writes may happen at any time; the decoder picks
/// changes up at sample or line granularity, so a stale value lives for at
/// most one block.
#[derive(Clone, Debug, Default)]
pub struct Controls {
    shared: Arc<RwLock<ControlValues>>,
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear clock-correction factor, as a fraction of a line per line.
    pub fn calibration(&self) -> f64 {
        self.shared.read().calibration
    }

    pub fn set_calibration(&self, calibration: f64) {
        self.shared.write().calibration = calibration;
    }

    /// Scales the tone detectors' activation threshold; 100.0 is nominal.
    pub fn threshold_percent(&self) -> f64 {
        self.shared.read().threshold_percent
    }

    pub fn set_threshold_percent(&self, threshold_percent: f64) {
        self.shared.write().threshold_percent = threshold_percent;
    }

    /// 8-bit grayscale pixels when true, 1-bit black/white otherwise.
    pub fn grayscale(&self) -> bool {
        self.shared.read().grayscale
    }

    pub fn set_grayscale(&self, grayscale: bool) {
        self.shared.write().grayscale = grayscale;
    }

    /// Extra low-pass stage on the video signal.
    pub fn video_filter(&self) -> bool {
        self.shared.read().video_filter
    }

    pub fn set_video_filter(&self, video_filter: bool) {
        self.shared.write().video_filter = video_filter;
    }

    fn snapshot(&self) -> ControlValues {
        *self.shared.read()
    }
}

/// Reconstructs fax images from a demodulated audio stream, one sample per
/// [`feed`](Self::feed) call.
///
/// The decoder owns the whole reception pipeline: PLL demodulation, start
/// and stop tone detection, the line-synchronization search and pixel
/// sampling. Completed scanlines are handed to the [`ScanlineSink`] in row
/// order; ownership of each row transfers to the sink.
#[derive(Clone, Debug)]
pub struct FaxDecoder<F> {
    sink: F,
    controls: Controls,

    sample_rate: f64,
    image_width: usize,
    samples_per_line: usize,
    sample_increm: f64,
    sync_lines: usize,

    demodulator: PllDemodulator,
    start_tone: GoertzelFilter,
    stop_tone: GoertzelFilter,
    video_lowpass: DirectForm2Transposed<f64>,

    enabled: bool,
    state: State,
    sample_count: i64,
    line_time_delta: i64,
    line_boundary: bool,
    image_line: usize,
    calibration: f64,
    grayscale: bool,
    video_filter: bool,

    // demodulated value and its optionally filtered video counterpart for
    // the current sample
    wsig: f64,
    sig: f64,

    // synchronization search accumulators, allocated for the Sync state only
    sync_array: Vec<f64>,
    sync_line: Vec<f64>,

    // pixel output
    row_index: usize,
    row_pos: f64,
    line_index: usize,
    line_buf: Option<Vec<u8>>,
    sig_sum: f64,
    sig_count: f64,
    emitted_lines: usize,
    image_open: bool,
}

impl<F> FaxDecoder<F>
where
    F: ScanlineSink,
{
    pub fn new(sink: F, sample_rate: u32, controls: Controls) -> Result<Self, ConfigError> {
        Self::with_image_width(sink, sample_rate, DEFAULT_IMAGE_WIDTH, controls)
    }

    pub fn with_image_width(
        sink: F,
        sample_rate: u32,
        image_width: usize,
        controls: Controls,
    ) -> Result<Self, ConfigError> {
        if sample_rate < MIN_SAMPLE_RATE {
            return Err(ConfigError::SampleRateTooLow(sample_rate));
        }
        if image_width == 0 {
            return Err(ConfigError::ZeroImageWidth);
        }

        let sample_rate = f64::from(sample_rate);
        let threshold = GOERTZEL_ACCEPT * controls.threshold_percent() / 100.0;

        let mut this = Self {
            sink,
            sample_rate,
            image_width,
            samples_per_line: (sample_rate / f64::from(LINES_PER_SECOND)) as usize,
            sample_increm: sample_rate / (image_width as f64 * 2.0),
            sync_lines: (SYNC_TIME * LINES_PER_SECOND) as usize,
            demodulator: Self::make_demodulator(sample_rate),
            start_tone: Self::make_tone_detector(sample_rate, START_TONE, threshold),
            stop_tone: Self::make_tone_detector(sample_rate, STOP_TONE, threshold),
            video_lowpass: lowpass(sample_rate, VIDEO_LOWPASS_FREQUENCY),
            enabled: false,
            state: State::WaitSignal,
            sample_count: 0,
            line_time_delta: 0,
            line_boundary: false,
            image_line: 0,
            calibration: controls.calibration(),
            grayscale: true,
            video_filter: false,
            wsig: 0.0,
            sig: 0.0,
            sync_array: Vec::new(),
            sync_line: Vec::new(),
            row_index: 0,
            row_pos: 0.0,
            line_index: 0,
            line_buf: None,
            sig_sum: 0.0,
            sig_count: 0.0,
            emitted_lines: 0,
            image_open: false,
            controls,
        };
        this.refresh_controls();
        Ok(this)
    }

    fn make_demodulator(sample_rate: f64) -> PllDemodulator {
        PllDemodulator::new(
            sample_rate,
            PLL_CENTER_FREQUENCY,
            PLL_DEVIATION_FREQUENCY,
            PLL_OUTPUT_LOWPASS_FREQUENCY,
        )
    }

    fn make_tone_detector(sample_rate: f64, frequency: f64, threshold: f64) -> GoertzelFilter {
        GoertzelFilter::new(frequency / sample_rate, sample_rate / 4.0, threshold)
    }

    /// Starts or stops acquisition. Either direction fully resets the
    /// pipeline; nothing leaks across enable cycles.
    pub fn enable(&mut self, enable: bool) {
        if enable && !self.enabled {
            self.reset();
            tracing::debug!("fax reception enabled");
        }
        else if !enable && self.enabled {
            self.unlock();
            tracing::debug!("fax reception disabled");
        }
        self.enabled = enable;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn reset(&mut self) {
        self.demodulator = Self::make_demodulator(self.sample_rate);
        self.start_tone.reset(true);
        self.stop_tone.reset(true);
        self.video_lowpass = lowpass(self.sample_rate, VIDEO_LOWPASS_FREQUENCY);
        self.state = State::WaitSignal;
        self.sample_count = 0;
        self.line_time_delta = 0;
        self.line_boundary = false;
        self.image_line = 0;
        self.wsig = 0.0;
        self.sig = 0.0;
        self.sync_array = Vec::new();
        self.sync_line = Vec::new();
        self.row_index = 0;
        self.row_pos = 0.0;
        self.line_index = 0;
        self.line_buf = None;
        self.sig_sum = 0.0;
        self.sig_count = 0.0;
        self.emitted_lines = 0;
        self.image_open = false;
        self.refresh_controls();
        self.calibration = self.controls.calibration();
    }

    /// Skips the synchronization search and begins pixel output at the next
    /// line boundary. Manual override for when automatic sync fails.
    pub fn lock(&mut self) {
        if !self.enabled {
            tracing::warn!("lock requested while reception is disabled");
            return;
        }
        self.finish_image();
        self.state = State::WaitLineLock;
    }

    /// Forces reception to end: the in-progress image is finalized, any
    /// partial row is discarded, and the machine returns to acquisition.
    pub fn unlock(&mut self) {
        self.finish_image();
        self.state = State::Finish;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_receiving(&self) -> bool {
        self.enabled && self.state.is_receiving()
    }

    /// Smoothed input envelope, in raw sample units.
    pub fn gain_level(&self) -> f64 {
        self.demodulator.gain_level()
    }

    /// Local-oscillator cycles since the last reset; divide by the elapsed
    /// measurement interval for the tracked audio frequency.
    pub fn frequency_meter_cycles(&self) -> u64 {
        self.demodulator.cycles()
    }

    pub fn reset_frequency_meter(&mut self) {
        self.demodulator.reset_cycles();
    }

    pub fn samples_consumed(&self) -> u64 {
        self.sample_count as u64
    }

    pub fn start_tone_energy(&self) -> f64 {
        self.start_tone.energy()
    }

    pub fn stop_tone_energy(&self) -> f64 {
        self.stop_tone.energy()
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn sink(&self) -> &F {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut F {
        &mut self.sink
    }

    pub fn into_sink(self) -> F {
        self.sink
    }

    pub fn process(&mut self, samples: &[i16]) {
        for &sample in samples {
            self.feed(sample);
        }
    }

    /// Consumes one audio sample.
    pub fn feed(&mut self, sample: i16) {
        if !self.enabled {
            return;
        }

        let row_len = self.samples_per_line as i64;
        self.line_boundary = (self.sample_count - self.line_time_delta) % row_len == 0;
        if self.line_boundary {
            self.refresh_controls();
        }

        self.wsig = self.demodulator.scan(f64::from(sample));
        self.start_tone.scan(self.wsig);
        self.stop_tone.scan(self.wsig);
        self.sig = if self.video_filter {
            self.video_lowpass.scan(self.wsig)
        }
        else {
            self.wsig
        };

        // states may cascade for the same sample
        while self.step() {}

        if self.line_boundary {
            self.image_line += 1;
        }
        self.sample_count += 1;
    }

    fn refresh_controls(&mut self) {
        let values = self.controls.snapshot();
        self.grayscale = values.grayscale;
        self.video_filter = values.video_filter;
        let threshold = GOERTZEL_ACCEPT * values.threshold_percent / 100.0;
        self.start_tone.set_threshold(threshold);
        self.stop_tone.set_threshold(threshold);
    }

    fn step(&mut self) -> bool {
        match self.state {
            State::WaitSignal => self.wait_signal(),
            State::WaitStartBegin => self.wait_start_begin(),
            State::WaitStartEnd => self.wait_start_end(),
            State::WaitFirstLine => self.wait_first_line(),
            State::Sync => self.sync(),
            State::WaitLineLock => self.wait_line_lock(),
            State::Scan => self.emit_pixels(),
            State::Finish => self.finish(),
        }
    }

    fn wait_signal(&mut self) -> bool {
        self.image_line = 0;
        self.line_time_delta = 0;
        if self.demodulator.gain_level() > GAIN_THRESHOLD {
            tracing::debug!(gain_level = self.demodulator.gain_level(), "signal acquired");
            self.state = State::WaitStartBegin;
            return true;
        }
        false
    }

    fn wait_start_begin(&mut self) -> bool {
        if self.demodulator.gain_level() < GAIN_THRESHOLD {
            self.state = State::WaitSignal;
            return true;
        }
        if self.start_tone.active() {
            tracing::debug!(energy = self.start_tone.energy(), "start tone");
            self.state = State::WaitStartEnd;
            return true;
        }
        false
    }

    fn wait_start_end(&mut self) -> bool {
        if !self.start_tone.active() {
            tracing::debug!("start tone ended");
            self.state = State::WaitFirstLine;
            return true;
        }
        false
    }

    fn wait_first_line(&mut self) -> bool {
        if self.line_boundary {
            self.sync_array = Vec::new();
            self.state = State::Sync;
            return true;
        }
        false
    }

    fn sync(&mut self) -> bool {
        if self.sync_array.is_empty() {
            // calibration may have been adjusted since the last image
            self.calibration = self.controls.calibration();
            self.image_line = 0;
            self.row_index = 0;
            self.sync_array = vec![0.0; self.samples_per_line];
            self.sync_line = vec![0.0; self.samples_per_line];
            tracing::debug!(lines = self.sync_lines, "sync search started");
        }

        // accumulate several lines to cope with noisy signals and clock
        // error
        self.sync_line[self.row_index] += self.wsig;
        self.row_index += 1;
        if self.row_index >= self.samples_per_line {
            self.row_index = 0;
            let drift = self.samples_per_line as f64 * self.calibration;
            line::clock_correct(&mut self.sync_line, self.image_line, drift);
            for index in 0..self.samples_per_line {
                self.sync_array[index] += self.sync_line[index];
                self.sync_line[index] = 0.0;
            }
            if self.image_line >= self.sync_lines {
                self.line_time_delta = self.locate_sync_offset();
                tracing::debug!(line_time_delta = self.line_time_delta, "sync offset found");
                self.sync_array = Vec::new();
                self.sync_line = Vec::new();
                self.state = State::WaitLineLock;
                return true;
            }
        }
        false
    }

    /// Integrates the accumulated phasing lines and locates the most
    /// negative excursion of the derivative of the integral's sign, the
    /// white-to-black edge of the phasing pulse.
    fn locate_sync_offset(&self) -> i64 {
        let row_len = self.samples_per_line;
        let tc = 200.0 / self.sample_rate;

        let mut integrated = self.sync_array[row_len - 1];
        let mut old_sign = if integrated > 0.0 { 1.0 } else { -1.0 };
        let mut best_value = f64::INFINITY;
        let mut best_index = 0i64;
        for (index, &value) in self.sync_array.iter().enumerate() {
            integrated += (value - integrated) * tc;
            let sign = if integrated > 0.0 { 1.0 } else { -1.0 };
            let derivative = sign - old_sign;
            old_sign = sign;
            if derivative < best_value {
                best_value = derivative;
                best_index = index as i64;
            }
        }

        // adjust for the elapsed time of the sync accumulation, then align
        // the sync bar by subtracting a factor for the integration time
        // constant
        let elapsed = (self.sync_lines * row_len) as f64 * self.calibration;
        let lag = (SYNC_PULSE_INTERVAL * 0.12 * self.sample_rate) as i64;
        best_index + elapsed as i64 - lag
    }

    fn wait_line_lock(&mut self) -> bool {
        if self.line_boundary {
            // re-read for the manual-lock entry path
            self.calibration = self.controls.calibration();
            self.row_index = 0;
            self.row_pos = 0.0;
            self.line_index = 0;
            self.line_buf = None;
            self.sig_sum = 0.0;
            self.sig_count = 0.0;
            self.emitted_lines = 0;
            self.image_open = true;
            tracing::debug!(calibration = self.calibration, "line locked, starting pixel output");
            self.state = State::Scan;
            return true;
        }
        false
    }

    fn emit_pixels(&mut self) -> bool {
        if self.line_boundary {
            self.row_index = 0;
            self.row_pos = 0.0;
            self.line_index = 0;
            if let Some(row) = self.line_buf.take() {
                self.push_row(row);
            }
            self.line_buf = Some(vec![0; self.image_width]);
            // criteria for end of processing
            if self.stop_tone.active() || self.image_line > MAX_IMAGE_LINES {
                self.state = State::Finish;
                return true;
            }
        }
        if self.row_index as f64 > self.row_pos {
            self.row_pos += self.sample_increm;
            if self.sig_count > 0.0 {
                self.sig_sum /= self.sig_count;
            }
            let value = unlerp(self.sig_sum, -1.0, 1.0).clamp(0.0, 1.0);
            self.sig_sum = 0.0;
            self.sig_count = 0.0;
            let pixel = if self.grayscale {
                (value * 255.0) as u8
            }
            else if value > 0.5 {
                255
            }
            else {
                0
            };
            if let Some(row) = &mut self.line_buf {
                if let Some(slot) = row.get_mut(self.line_index) {
                    *slot = pixel;
                    self.line_index += 1;
                }
            }
        }
        else {
            self.sig_sum += self.sig;
            self.sig_count += 1.0;
        }
        self.row_index += 1;
        false
    }

    fn finish(&mut self) -> bool {
        self.finish_image();
        self.state = State::WaitSignal;
        false
    }

    fn push_row(&mut self, mut row: Vec<u8>) {
        if self.calibration != 0.0 {
            let drift = self.image_width as f64 * self.calibration;
            line::clock_correct(&mut row, self.emitted_lines, drift);
        }
        self.emitted_lines += 1;
        self.sink.accept_line(row);
    }

    fn finish_image(&mut self) {
        // any partial row is discarded; complete rows were already handed
        // off at their line boundaries
        self.line_buf = None;
        if self.image_open {
            self.image_open = false;
            tracing::debug!(lines = self.emitted_lines, "image complete");
            self.sink.image_complete();
        }
    }
}

impl<F> GetSampleRate for FaxDecoder<F> {
    #[inline]
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
