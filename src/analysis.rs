//! Spectral band analysis and beat detection.
//!
//! Consumes byte-quantized FFT magnitudes (one "pull latest" per frame) and
//! produces eight smoothed band energies plus a decaying beat pulse.

pub const BAND_COUNT: usize = 8;

/// Band edges in Hz: sub, bass, low-mid, mid, upper-mid, presence, brilliance, air.
pub const BAND_EDGES_HZ: [f32; BAND_COUNT + 1] = [
    20.0, 60.0, 250.0, 500.0, 2000.0, 4000.0, 6000.0, 12000.0, 20000.0,
];

const SMOOTHING: f32 = 0.8;
const NOISE_GATE: f32 = 0.08;
const BEAT_AVG_DECAY: f32 = 0.95;
const BEAT_RATIO: f32 = 1.5;
const BEAT_DECAY: f32 = 0.9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandEnergy {
    pub bands: [f32; BAND_COUNT],
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub beat: f32,
}

impl BandEnergy {
    pub const SILENT: Self = Self {
        bands: [0.0; BAND_COUNT],
        bass: 0.0,
        mid: 0.0,
        high: 0.0,
        beat: 0.0,
    };

    pub fn from_bands(bands: [f32; BAND_COUNT], beat: f32) -> Self {
        let bands = bands.map(|b| b.clamp(0.0, 1.0));
        Self {
            bands,
            bass: bands[0].max(bands[1]),
            mid: bands[2].max(bands[3]).max(bands[4]),
            high: bands[5].max(bands[6]).max(bands[7]),
            beat: beat.clamp(0.0, 1.0),
        }
    }

    /// User intensity gain. Values are re-clamped so consumers still see [0,1].
    pub fn scaled(self, gain: f32) -> Self {
        let g = gain.clamp(0.0, 1.0);
        if (g - 1.0).abs() < 1e-3 {
            return self;
        }
        Self::from_bands(self.bands.map(|b| b * g), self.beat * g)
    }

    pub fn is_silent(&self) -> bool {
        self.bands.iter().all(|b| *b == 0.0) && self.beat == 0.0
    }
}

/// Average normalized magnitude of the bins covering `[lo_hz, hi_hz]`.
///
/// `mags` holds N bins spanning 0..sample_rate/2. Degenerate ranges give 0.
pub fn band_energy(mags: &[u8], sample_rate: u32, lo_hz: f32, hi_hz: f32) -> f32 {
    let n = mags.len();
    if n == 0 || sample_rate == 0 {
        return 0.0;
    }
    let bin_size = sample_rate as f32 / (2.0 * n as f32);
    let start = (lo_hz / bin_size).floor();
    let end = (hi_hz / bin_size).floor().min((n - 1) as f32);
    if !start.is_finite() || !end.is_finite() || start < 0.0 || start > end {
        return 0.0;
    }
    let (start, end) = (start as usize, end as usize);
    if start >= n {
        return 0.0;
    }
    let sum: u32 = mags[start..=end].iter().map(|m| *m as u32).sum();
    let count = (end - start + 1) as f32;
    (sum as f32 / (count * 255.0)).clamp(0.0, 1.0)
}

/// Rolling-average bass onset detector with exponential pulse decay.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeatDetector {
    avg: f32,
    beat: f32,
}

impl BeatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_average(avg: f32) -> Self {
        Self { avg, beat: 0.0 }
    }

    pub fn average(&self) -> f32 {
        self.avg
    }

    pub fn beat(&self) -> f32 {
        self.beat
    }

    pub fn update(&mut self, bass: f32) -> f32 {
        let spike = bass > self.avg * BEAT_RATIO;
        self.avg = self.avg * BEAT_AVG_DECAY + bass * (1.0 - BEAT_AVG_DECAY);
        self.beat = if spike {
            1.0
        } else {
            (self.beat * BEAT_DECAY).clamp(0.0, 1.0)
        };
        self.beat
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpectralAnalyzer {
    smoothed: [f32; BAND_COUNT],
    beat: BeatDetector,
    last: BandEnergy,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> BandEnergy {
        self.last
    }

    /// Raw (unsmoothed) band energies after the noise gate.
    pub fn raw_bands(mags: &[u8], sample_rate: u32) -> [f32; BAND_COUNT] {
        let mut raw = [0.0f32; BAND_COUNT];
        for (i, band) in raw.iter_mut().enumerate() {
            *band = band_energy(mags, sample_rate, BAND_EDGES_HZ[i], BAND_EDGES_HZ[i + 1]);
        }
        let mean = raw.iter().sum::<f32>() / BAND_COUNT as f32;
        if mean < NOISE_GATE {
            raw = [0.0; BAND_COUNT];
        }
        raw
    }

    pub fn analyze(&mut self, mags: &[u8], sample_rate: u32) -> BandEnergy {
        let raw = Self::raw_bands(mags, sample_rate);
        for (s, r) in self.smoothed.iter_mut().zip(raw) {
            *s = (*s * SMOOTHING + r * (1.0 - SMOOTHING)).clamp(0.0, 1.0);
        }
        let bass = self.smoothed[0].max(self.smoothed[1]);
        let beat = self.beat.update(bass);
        self.last = BandEnergy::from_bands(self.smoothed, beat);
        self.last
    }

    /// No source attached: zero output, and smoothing restarts from rest.
    pub fn silence(&mut self) -> BandEnergy {
        self.smoothed = [0.0; BAND_COUNT];
        self.beat.reset();
        self.last = BandEnergy::SILENT;
        self.last
    }

    /// Pull from a magnitude source, degrading to silence when it has nothing.
    pub fn tick(
        &mut self,
        source: &dyn crate::audio::MagnitudeSource,
        scratch: &mut Vec<u8>,
    ) -> BandEnergy {
        if source.pull_latest(scratch) && !scratch.is_empty() {
            self.analyze(scratch, source.sample_rate())
        } else {
            self.silence()
        }
    }
}
