//! Pilot-aided residual carrier and gain correction.

use core::f32::consts::FRAC_1_SQRT_2;
use libm::sqrtf;
use log::debug;
use num_complex::Complex32;

use crate::pn::MSequence;
use crate::protocol::{FRAME_SYM_LEN, PAYLOAD_SYM_LEN, PILOT_LEN, PILOT_SPACING};

/// Pilot symbols shared by the frame generator and the synchronizer.
pub(crate) fn pilot_symbols() -> [Complex32; PILOT_LEN] {
    let mut ms = MSequence::new(7, 0x89, 1);
    let mut out = [Complex32::new(0.0, 0.0); PILOT_LEN];
    for p in out.iter_mut() {
        let re = if ms.next_bit() == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
        let im = if ms.next_bit() == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
        *p = Complex32::new(re, im);
    }
    out
}

pub(crate) struct PilotSync {
    pilots: [Complex32; PILOT_LEN],
}

impl PilotSync {
    pub(crate) fn new() -> Self {
        PilotSync {
            pilots: pilot_symbols(),
        }
    }

    /// Estimate residual carrier frequency, phase and gain from the pilots,
    /// then strip the pilot slots and correct the data symbols.
    pub(crate) fn execute(
        &self,
        frame: &[Complex32; FRAME_SYM_LEN],
        out: &mut [Complex32; PAYLOAD_SYM_LEN],
    ) {
        let mut prod = [Complex32::new(0.0, 0.0); PILOT_LEN];
        for (k, p) in prod.iter_mut().enumerate() {
            *p = frame[k * PILOT_SPACING] * self.pilots[k].conj();
        }

        let mut slope = Complex32::new(0.0, 0.0);
        for k in 0..PILOT_LEN - 1 {
            slope += prod[k + 1] * prod[k].conj();
        }
        let dphi = slope.arg() / PILOT_SPACING as f32;

        let mut acc = Complex32::new(0.0, 0.0);
        let mut energy = 0.0f32;
        for (k, p) in prod.iter().enumerate() {
            acc += *p * Complex32::cis(-dphi * (k * PILOT_SPACING) as f32);
            energy += p.norm_sqr();
        }
        let phi = acc.arg();
        let mut gain = sqrtf(energy / PILOT_LEN as f32);
        if gain < 1e-9 {
            gain = 1e-9;
        }
        debug!("pilot sync: dphi {dphi:.6} phi {phi:.4} gain {gain:.4}");

        let mut n = 0;
        for (i, x) in frame.iter().enumerate() {
            if i % PILOT_SPACING == 0 {
                continue;
            }
            out[n] = *x * Complex32::cis(-(phi + dphi * i as f32)) / gain;
            n += 1;
        }
    }
}
