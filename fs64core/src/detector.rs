//! Preamble detection and one-shot channel estimation.

use libm::{fabsf, sqrtf};
use log::debug;
use num_complex::Complex32;

use crate::filter::Interpolator;
use crate::protocol::{K, PREAMBLE_LEN};

/// Shaped preamble length in samples.
const TEMPLATE_LEN: usize = K * PREAMBLE_LEN;
/// Correlation segment length. Short enough that a 0.05 rad/sample carrier
/// offset rotates a segment by well under a radian.
const SEG_LEN: usize = 8;
const NUM_SEG: usize = TEMPLATE_LEN / SEG_LEN;
/// Circular sample history; must cover the template plus the confirmation
/// delay.
const BUF_LEN: usize = 192;
/// Non-improving samples after a metric peak before detection is declared.
const CONFIRM: usize = 2;
/// Buffered tail handed back for replay on detection.
pub(crate) const REPLAY_LEN: usize = TEMPLATE_LEN + CONFIRM;

/// Normalized correlation level that starts peak tracking. Noise alone sits
/// near 0.31 on this metric; a clean aligned preamble reaches 1.0 and about
/// 0.9 at the worst half-sample timing offset.
const THRESHOLD: f32 = 0.6;

const ZERO: Complex32 = Complex32 { re: 0.0, im: 0.0 };

/// Correlates incoming samples against the shaped p/n preamble and captures
/// timing, carrier and gain estimates at the correlation peak.
pub(crate) struct PreambleDetector {
    /// Pulse-shaped preamble, the first TEMPLATE_LEN transmit samples of a
    /// frame.
    template: [Complex32; TEMPLATE_LEN],
    template_energy: f32,

    buf: [Complex32; BUF_LEN],
    cursor: usize,
    count: u64,

    /// Peak tracking over the normalized metric.
    active: bool,
    best_metric: f32,
    /// Metric one sample before the current best.
    prev_metric: f32,
    /// Metric one sample after the current best.
    next_metric: f32,
    last_metric: f32,
    age: usize,

    tau_hat: f32,
    gamma_hat: f32,
    dphi_hat: f32,
    phi_hat: f32,

    replay: [Complex32; REPLAY_LEN],
}

impl PreambleDetector {
    pub(crate) fn new(preamble: &[Complex32; PREAMBLE_LEN]) -> Self {
        let mut interp = Interpolator::new();
        let mut template = [ZERO; TEMPLATE_LEN];
        let mut pair = [ZERO; K];
        for (i, s) in preamble.iter().enumerate() {
            interp.execute(*s, &mut pair);
            template[K * i..K * i + K].copy_from_slice(&pair);
        }
        let template_energy = template.iter().map(|t| t.norm_sqr()).sum();

        PreambleDetector {
            template,
            template_energy,
            buf: [ZERO; BUF_LEN],
            cursor: 0,
            count: 0,
            active: false,
            best_metric: 0.0,
            prev_metric: 0.0,
            next_metric: 0.0,
            last_metric: 0.0,
            age: 0,
            tau_hat: 0.0,
            gamma_hat: 1.0,
            dphi_hat: 0.0,
            phi_hat: 0.0,
            replay: [ZERO; REPLAY_LEN],
        }
    }

    /// Push one sample. Returns the buffered tail, starting at the aligned
    /// preamble, exactly once per detection.
    pub(crate) fn execute(&mut self, x: Complex32) -> Option<&[Complex32]> {
        self.buf[self.cursor] = x;
        self.cursor = (self.cursor + 1) % BUF_LEN;
        self.count += 1;
        if self.count < TEMPLATE_LEN as u64 {
            return None;
        }

        let (metric, _, _) = self.correlate(0);
        let mut fired = false;
        if !self.active {
            if metric > THRESHOLD {
                self.active = true;
                self.best_metric = metric;
                self.prev_metric = self.last_metric;
                self.age = 0;
            }
        } else if metric > self.best_metric {
            self.best_metric = metric;
            self.prev_metric = self.last_metric;
            self.age = 0;
        } else {
            if self.age == 0 {
                self.next_metric = metric;
            }
            self.age += 1;
            fired = self.age >= CONFIRM;
        }
        self.last_metric = metric;

        if !fired {
            return None;
        }
        self.capture();
        self.active = false;
        Some(&self.replay)
    }

    pub(crate) fn tau(&self) -> f32 {
        self.tau_hat
    }

    pub(crate) fn gamma(&self) -> f32 {
        self.gamma_hat
    }

    pub(crate) fn dphi(&self) -> f32 {
        self.dphi_hat
    }

    pub(crate) fn phi(&self) -> f32 {
        self.phi_hat
    }

    pub(crate) fn reset(&mut self) {
        self.buf = [ZERO; BUF_LEN];
        self.cursor = 0;
        self.count = 0;
        self.active = false;
        self.best_metric = 0.0;
        self.prev_metric = 0.0;
        self.next_metric = 0.0;
        self.last_metric = 0.0;
        self.age = 0;
        self.tau_hat = 0.0;
        self.gamma_hat = 1.0;
        self.dphi_hat = 0.0;
        self.phi_hat = 0.0;
    }

    /// Segmented correlation over the window ending `lag` samples before the
    /// newest sample. Returns the normalized metric, the per-segment
    /// correlations and the window energy.
    fn correlate(&self, lag: usize) -> (f32, [Complex32; NUM_SEG], f32) {
        let start = self.cursor + BUF_LEN - TEMPLATE_LEN - lag;
        let mut segs = [ZERO; NUM_SEG];
        let mut energy = 0.0f32;
        for (s, seg) in segs.iter_mut().enumerate() {
            let mut acc = ZERO;
            for i in 0..SEG_LEN {
                let n = s * SEG_LEN + i;
                let v = self.buf[(start + n) % BUF_LEN];
                acc += v * self.template[n].conj();
                energy += v.norm_sqr();
            }
            *seg = acc;
        }
        if energy < 1e-9 {
            return (0.0, segs, energy);
        }
        let mut mag = 0.0f32;
        for seg in &segs {
            mag += seg.norm();
        }
        let metric = mag / sqrtf(energy * self.template_energy);
        (metric, segs, energy)
    }

    /// Estimate channel parameters from the peak-aligned window and copy out
    /// the replay tail.
    fn capture(&mut self) {
        let (_, segs, energy) = self.correlate(CONFIRM);

        self.gamma_hat = sqrtf(energy / self.template_energy);
        if self.gamma_hat < 1e-9 {
            self.gamma_hat = 1e-9;
        }

        // carrier offset from the phase slope across segment correlations
        let mut slope = ZERO;
        for s in 0..NUM_SEG - 1 {
            slope += segs[s + 1] * segs[s].conj();
        }
        self.dphi_hat = slope.arg() / SEG_LEN as f32;

        // carrier phase referenced to the first replayed sample
        let mut acc = ZERO;
        for (s, seg) in segs.iter().enumerate() {
            let center = (s * SEG_LEN) as f32 + (SEG_LEN as f32 - 1.0) / 2.0;
            acc += *seg * Complex32::cis(-self.dphi_hat * center);
        }
        self.phi_hat = acc.arg();

        // fractional timing from the metric peak and its neighbours
        let denom = self.prev_metric - 2.0 * self.best_metric + self.next_metric;
        self.tau_hat = if fabsf(denom) > 1e-9 {
            0.5 * (self.prev_metric - self.next_metric) / denom
        } else {
            0.0
        };
        self.tau_hat = self.tau_hat.clamp(-0.5, 0.5);

        let start = self.cursor + BUF_LEN - TEMPLATE_LEN - CONFIRM;
        for (i, r) in self.replay.iter_mut().enumerate() {
            *r = self.buf[(start + i) % BUF_LEN];
        }

        debug!(
            "preamble peak {:.3}: tau {:.4} dphi {:.5} gamma {:.4}",
            self.best_metric, self.tau_hat, self.dphi_hat, self.gamma_hat
        );
    }
}
