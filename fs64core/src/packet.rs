//! Payload block codec: CRC-24 framing, Golay(24,12) FEC and QPSK symbol
//! mapping.

use core::f32::consts::FRAC_1_SQRT_2;
use num_complex::Complex32;

use crate::bits;
use crate::crc::frame_crc;
use crate::protocol::{BLOCK_LEN, PAYLOAD_SYM_LEN};

/// Block plus its 24-bit crc.
const CODED_LEN: usize = BLOCK_LEN + 3;
/// Golay data words per block.
const WORDS: usize = CODED_LEN * 8 / 12;
/// Coded bits packed into bytes: one 24-bit codeword per data word.
const TYPE3_LEN: usize = WORDS * 3;

/// Map a block to its 600 QPSK payload symbols.
pub(crate) fn encode(block: &[u8; BLOCK_LEN], syms: &mut [Complex32; PAYLOAD_SYM_LEN]) {
    let mut coded = [0u8; CODED_LEN];
    coded[..BLOCK_LEN].copy_from_slice(block);
    let crc = frame_crc(block);
    coded[BLOCK_LEN..].copy_from_slice(&crc.to_be_bytes()[1..4]);

    let mut type3 = [0u8; TYPE3_LEN];
    for w in 0..WORDS {
        let cw = cai_golay::extended::encode(bits::get_word12(&coded, w));
        type3[w * 3..w * 3 + 3].copy_from_slice(&cw.to_be_bytes()[1..4]);
    }

    for (i, sym) in syms.iter_mut().enumerate() {
        let bi = bits::get_bit(&type3, i * 2);
        let bq = bits::get_bit(&type3, i * 2 + 1);
        *sym = Complex32::new(
            if bi == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 },
            if bq == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 },
        );
    }
}

/// Hard-decide 600 QPSK symbols back into the block. Returns whether the
/// crc over the recovered bytes matches.
pub(crate) fn decode(syms: &[Complex32; PAYLOAD_SYM_LEN], block: &mut [u8; BLOCK_LEN]) -> bool {
    let mut type3 = [0u8; TYPE3_LEN];
    for (i, sym) in syms.iter().enumerate() {
        bits::set_bit(&mut type3, i * 2, u8::from(sym.re < 0.0));
        bits::set_bit(&mut type3, i * 2 + 1, u8::from(sym.im < 0.0));
    }

    let mut coded = [0u8; CODED_LEN];
    for w in 0..WORDS {
        let mut cw = 0u32;
        for b in &type3[w * 3..w * 3 + 3] {
            cw = (cw << 8) | u32::from(*b);
        }
        let data = match cai_golay::extended::decode(cw) {
            Some((data, _dist)) => data,
            // uncorrectable word: deliver the systematic half as-is and let
            // the crc flag the block
            None => ((cw >> 12) & 0x0FFF) as u16,
        };
        bits::set_word12(&mut coded, w, data);
    }

    block.copy_from_slice(&coded[..BLOCK_LEN]);
    let mut rx_crc = 0u32;
    for b in &coded[BLOCK_LEN..] {
        rx_crc = (rx_crc << 8) | u32::from(*b);
    }
    frame_crc(block) == rx_crc
}
