//! Fixed-rate acquisition and spectral analysis.
//!
//! A measurement samples the EMG input N times at a strict cadence, weighs
//! the samples with a Hamming window, runs a forward FFT and reports the
//! frequency of the dominant peak.
//!
//! Sampling is a spin-wait against the board clock, not a timer interrupt:
//! the call blocks the whole node for roughly `N / fs` seconds (about four
//! seconds with the default 8192 samples at 2 kHz).

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use tracing::{debug, info};

use crate::config::SamplingConfig;
use crate::hal::Board;

/// Acquired samples: the signal and its all-zero imaginary companion.
///
/// The length is fixed at construction. Index 0 is never written by
/// acquisition and keeps whatever value it held before.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    real: Vec<f64>,
    imag: Vec<f64>,
}

impl SampleBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            real: vec![0.0; len],
            imag: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }

    pub fn real(&self) -> &[f64] {
        &self.real
    }

    pub fn imag(&self) -> &[f64] {
        &self.imag
    }

    /// Mutable view of the signal. A slice, so the length cannot change.
    pub fn real_mut(&mut self) -> &mut [f64] {
        &mut self.real
    }
}

/// Dominant frequency of the last measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralResult {
    pub frequency_hz: f64,
}

impl SpectralResult {
    /// The frequency rounded to three decimals, as reported upstream.
    pub fn rounded(&self) -> f64 {
        (self.frequency_hz * 1000.0).round() / 1000.0
    }
}

/// Sampler and FFT pipeline.
///
/// Window coefficients and the FFT plan are computed once, so a measurement
/// does not allocate.
pub struct SpectralAnalyzer {
    sampling_hz: f64,
    interval_us: u64,
    buffer: SampleBuffer,
    window: Vec<f64>,
    /// Windowed copy of the buffer, transformed in place.
    spectrum: Vec<Complex64>,
    scratch: Vec<Complex64>,
    fft: Arc<dyn Fft<f64>>,
    last: Option<SpectralResult>,
}

impl SpectralAnalyzer {
    /// Create an analyzer for the given sampling parameters.
    ///
    /// Expects a validated config (`samples >= 4`, positive frequency).
    pub fn new(config: &SamplingConfig) -> Self {
        let n = config.samples;
        let fft = FftPlanner::new().plan_fft_forward(n);
        let scratch = vec![Complex64::default(); fft.get_inplace_scratch_len()];

        Self {
            sampling_hz: config.frequency_hz,
            interval_us: config.interval_micros(),
            buffer: SampleBuffer::new(n),
            window: hamming_window(n),
            spectrum: vec![Complex64::default(); n],
            scratch,
            fft,
            last: None,
        }
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut SampleBuffer {
        &mut self.buffer
    }

    /// Result of the most recent measurement, if any.
    pub fn last_result(&self) -> Option<SpectralResult> {
        self.last
    }

    /// Acquire a full buffer, analyze it and return the dominant frequency.
    ///
    /// Blocks for the whole acquisition. Readings are used as-is; an
    /// out-of-range input only biases the estimate.
    pub fn run_measurement<B: Board + ?Sized>(&mut self, board: &mut B) -> SpectralResult {
        info!(
            "Sampling {} points at {} Hz ({} us interval)",
            self.buffer.len(),
            self.sampling_hz,
            self.interval_us
        );

        let started = board.now_micros();
        self.acquire(board);
        let elapsed = board.now_micros().saturating_sub(started);

        let result = self.analyze();
        info!(
            "Acquired in {} ms, major peak {:.3} Hz",
            elapsed / 1000,
            result.frequency_hz
        );

        self.last = Some(result);
        result
    }

    /// Fill indices `1..N` at the configured cadence.
    fn acquire<B: Board + ?Sized>(&mut self, board: &mut B) {
        let reference = board.now_micros();
        for index in 1..self.buffer.len() {
            self.buffer.real[index] = f64::from(board.read_emg());
            self.buffer.imag[index] = 0.0;

            let deadline = index as u64 * self.interval_us;
            while board.now_micros().saturating_sub(reference) < deadline {
                std::hint::spin_loop();
            }
        }
    }

    /// Window, transform and locate the major peak.
    fn analyze(&mut self) -> SpectralResult {
        for (i, bin) in self.spectrum.iter_mut().enumerate() {
            let w = self.window[i];
            *bin = Complex64::new(self.buffer.real[i] * w, self.buffer.imag[i] * w);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let frequency_hz = major_peak(&self.spectrum, self.sampling_hz);
        debug!("Spectrum computed, peak at {} Hz", frequency_hz);
        SpectralResult { frequency_hz }
    }
}

/// Hamming coefficients for a window of length `n`.
fn hamming_window(n: usize) -> Vec<f64> {
    let span = (n.max(2) - 1) as f64;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / span).cos())
        .collect()
}

/// Frequency of the largest local maximum in the lower half of the spectrum.
///
/// The winning bin is refined by a parabola through its neighbours. A
/// spectrum without any local maximum yields 0 Hz.
fn major_peak(spectrum: &[Complex64], sampling_hz: f64) -> f64 {
    let n = spectrum.len();
    if n < 4 {
        return 0.0;
    }

    let mut peak = 0;
    let mut peak_mag = 0.0;
    for i in 1..=n / 2 {
        let (prev, cur, next) = (
            spectrum[i - 1].norm(),
            spectrum[i].norm(),
            spectrum[i + 1].norm(),
        );
        if prev < cur && cur > next && cur > peak_mag {
            peak = i;
            peak_mag = cur;
        }
    }
    if peak == 0 {
        return 0.0;
    }

    let a = spectrum[peak - 1].norm();
    let b = peak_mag;
    let c = spectrum[peak + 1].norm();
    let denom = a - 2.0 * b + c;
    let delta = if denom != 0.0 { 0.5 * (a - c) / denom } else { 0.0 };

    (peak as f64 + delta) * sampling_hz / n as f64
}
