//! Frame generator: the transmit counterpart of the synchronizer.

use num_complex::Complex32;

use crate::filter::Interpolator;
use crate::packet;
use crate::pilot::pilot_symbols;
use crate::pn::MSequence;
use crate::protocol::{
    BLOCK_LEN, FRAME_SAMPLE_LEN, FRAME_SYM_LEN, HEADER_LEN, K, M, PAYLOAD_LEN, PAYLOAD_SYM_LEN,
    PILOT_LEN, PILOT_SPACING, PREAMBLE_LEN,
};

const ZERO: Complex32 = Complex32 { re: 0.0, im: 0.0 };

/// Builds complete transmit frames: p/n preamble, pilot-interleaved coded
/// payload, pulse shaping and filter flush.
pub struct FrameGen64 {
    interp: Interpolator,
    preamble_pn: [Complex32; PREAMBLE_LEN],
    pilots: [Complex32; PILOT_LEN],
}

impl FrameGen64 {
    pub fn new() -> Self {
        let mut ms = MSequence::new(6, 0x43, 1);
        let mut preamble_pn = [ZERO; PREAMBLE_LEN];
        for p in preamble_pn.iter_mut() {
            *p = if ms.next_bit() != 0 {
                Complex32::new(1.0, 0.0)
            } else {
                Complex32::new(-1.0, 0.0)
            };
        }
        FrameGen64 {
            interp: Interpolator::new(),
            preamble_pn,
            pilots: pilot_symbols(),
        }
    }

    /// All symbols of one frame before pulse shaping: preamble followed by
    /// the pilot-interleaved payload.
    pub(crate) fn frame_symbols(
        &self,
        header: &[u8; HEADER_LEN],
        payload: &[u8; PAYLOAD_LEN],
    ) -> [Complex32; PREAMBLE_LEN + FRAME_SYM_LEN] {
        let mut block = [0u8; BLOCK_LEN];
        block[..HEADER_LEN].copy_from_slice(header);
        block[HEADER_LEN..].copy_from_slice(payload);

        let mut data = [ZERO; PAYLOAD_SYM_LEN];
        packet::encode(&block, &mut data);

        let mut syms = [ZERO; PREAMBLE_LEN + FRAME_SYM_LEN];
        syms[..PREAMBLE_LEN].copy_from_slice(&self.preamble_pn);
        let mut pilot = 0;
        let mut sym = 0;
        for (i, s) in syms[PREAMBLE_LEN..].iter_mut().enumerate() {
            if i % PILOT_SPACING == 0 {
                *s = self.pilots[pilot];
                pilot += 1;
            } else {
                *s = data[sym];
                sym += 1;
            }
        }
        syms
    }

    /// Generate one complete frame of baseband samples.
    pub fn generate(
        &mut self,
        header: &[u8; HEADER_LEN],
        payload: &[u8; PAYLOAD_LEN],
        out: &mut [Complex32; FRAME_SAMPLE_LEN],
    ) {
        let syms = self.frame_symbols(header, payload);

        self.interp.reset();
        let mut n = 0;
        for s in syms.iter() {
            self.interp.execute(*s, &mut out[n..n + K]);
            n += K;
        }
        // flush the transmit and receive filter delays
        for _ in 0..2 * M {
            self.interp.execute(ZERO, &mut out[n..n + K]);
            n += K;
        }
    }
}

impl Default for FrameGen64 {
    fn default() -> Self {
        Self::new()
    }
}
