use core::f32::consts::PI;
use num_complex::Complex32;

/// Numerically controlled oscillator for coarse carrier recovery.
pub(crate) struct Nco {
    phase: f32,
    freq: f32,
}

impl Nco {
    pub(crate) fn new() -> Self {
        Nco {
            phase: 0.0,
            freq: 0.0,
        }
    }

    pub(crate) fn set_frequency(&mut self, freq: f32) {
        self.freq = freq;
    }

    pub(crate) fn set_phase(&mut self, phase: f32) {
        self.phase = phase;
    }

    pub(crate) fn frequency(&self) -> f32 {
        self.freq
    }

    /// Mix the current carrier estimate out of one sample.
    pub(crate) fn mix_down(&self, x: Complex32) -> Complex32 {
        x * Complex32::cis(-self.phase)
    }

    /// Advance the phase accumulator by one sample, keeping it in [-pi, pi].
    pub(crate) fn step(&mut self) {
        self.phase += self.freq;
        if self.phase > PI {
            self.phase -= 2.0 * PI;
        } else if self.phase < -PI {
            self.phase += 2.0 * PI;
        }
    }

    /// Clear the phase accumulator. The programmed frequency is a captured
    /// estimate, not filter state; it stays until the next detection
    /// reprograms it.
    pub(crate) fn reset(&mut self) {
        self.phase = 0.0;
    }
}
