//! Root-raised-cosine pulse shaping: the transmit interpolator and the
//! polyphase matched filter bank.

use core::f32::consts::{PI, SQRT_2};
use libm::{cosf, fabsf, sinf, sqrtf};
use num_complex::Complex32;

use crate::protocol::{BETA, K, M, NPFB};

/// Taps per filterbank branch and per transmit filter: the full pulse span
/// at k samples per symbol.
pub(crate) const SPAN: usize = 2 * K * M + 1;

const PROTO_LEN: usize = NPFB * SPAN;
const ZERO: Complex32 = Complex32 { re: 0.0, im: 0.0 };

/// Square-root raised cosine impulse response at time t in symbol units,
/// before amplitude normalization.
fn raw_rrc(t: f32) -> f32 {
    let four_beta_t = 4.0 * BETA * t;
    if fabsf(t) < 1e-6 {
        return 1.0 - BETA + 4.0 * BETA / PI;
    }
    if fabsf(fabsf(four_beta_t) - 1.0) < 1e-4 {
        // singularity at |t| = 1/(4 beta)
        let arg = PI / (4.0 * BETA);
        return BETA / SQRT_2 * ((1.0 + 2.0 / PI) * sinf(arg) + (1.0 - 2.0 / PI) * cosf(arg));
    }
    let num = sinf(PI * t * (1.0 - BETA)) + four_beta_t * cosf(PI * t * (1.0 + BETA));
    let den = PI * t * (1.0 - four_beta_t * four_beta_t);
    num / den
}

/// Amplitude that gives the symbol-rate taps an energy of k, so the matched
/// cascade peaks at k and a unit-modulus symbol stream has unit per-sample
/// power.
fn norm_scale() -> f32 {
    let mut energy = 0.0f32;
    for j in 0..SPAN {
        let h = raw_rrc((j as f32 - (K * M) as f32) / K as f32);
        energy += h * h;
    }
    sqrtf(K as f32 / energy)
}

/// Normalized pulse value at time t in symbol units.
pub(crate) fn pulse(t: f32) -> f32 {
    raw_rrc(t) * norm_scale()
}

/// Matched filter decomposed into npfb branches, each offset by a fraction
/// of a sample for timing correction.
pub(crate) struct MatchedFilterBank {
    taps: [[f32; SPAN]; NPFB],
    window: [Complex32; SPAN],
    cursor: usize,
    scale: f32,
}

impl MatchedFilterBank {
    pub(crate) fn new() -> Self {
        let scale = norm_scale();
        let mut proto = [0.0f32; PROTO_LEN];
        for (l, p) in proto.iter_mut().enumerate() {
            let t = (l as f32 - (K * M * NPFB) as f32) / (K * NPFB) as f32;
            *p = raw_rrc(t) * scale;
        }
        let mut taps = [[0.0f32; SPAN]; NPFB];
        for b in 0..NPFB {
            for j in 0..SPAN {
                taps[b][j] = proto[j * NPFB + b];
            }
        }
        MatchedFilterBank {
            taps,
            window: [ZERO; SPAN],
            cursor: 0,
            scale: 1.0,
        }
    }

    pub(crate) fn push(&mut self, x: Complex32) {
        self.window[self.cursor] = x;
        self.cursor = (self.cursor + 1) % SPAN;
    }

    /// Run one branch over the current window.
    pub(crate) fn execute(&self, branch: usize) -> Complex32 {
        let taps = &self.taps[branch];
        let mut acc = ZERO;
        for j in 0..SPAN {
            acc += self.window[(self.cursor + j) % SPAN] * taps[j];
        }
        acc * self.scale
    }

    pub(crate) fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    pub(crate) fn reset(&mut self) {
        self.window = [ZERO; SPAN];
        self.cursor = 0;
    }
}

/// Transmit pulse shaper producing k samples per pushed symbol.
pub(crate) struct Interpolator {
    taps: [f32; SPAN],
    window: [Complex32; 2 * M + 1],
    cursor: usize,
}

impl Interpolator {
    pub(crate) fn new() -> Self {
        let mut taps = [0.0f32; SPAN];
        for (j, tap) in taps.iter_mut().enumerate() {
            *tap = pulse((j as f32 - (K * M) as f32) / K as f32);
        }
        Interpolator {
            taps,
            window: [ZERO; 2 * M + 1],
            cursor: 0,
        }
    }

    /// Push one symbol and write its k output samples.
    pub(crate) fn execute(&mut self, sym: Complex32, out: &mut [Complex32]) {
        self.window[self.cursor] = sym;
        self.cursor = (self.cursor + 1) % (2 * M + 1);
        for (p, o) in out.iter_mut().enumerate().take(K) {
            let mut acc = ZERO;
            for j in 0..=2 * M {
                let tap = p + K * j;
                if tap < SPAN {
                    // j symbols ago
                    let idx = (self.cursor + 2 * M - j) % (2 * M + 1);
                    acc += self.window[idx] * self.taps[tap];
                }
            }
            *o = acc;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.window = [ZERO; 2 * M + 1];
        self.cursor = 0;
    }
}
