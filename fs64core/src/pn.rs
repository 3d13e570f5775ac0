/// Maximal-length sequence generator.
///
/// The characteristic polynomial is given with its x^m coefficient as the
/// top bit, e.g. 0x43 = x^6 + x + 1. Feedback is the parity of the register
/// masked by the tap word `poly >> 1`.
pub(crate) struct MSequence {
    state: u32,
    taps: u32,
    mask: u32,
}

impl MSequence {
    pub(crate) fn new(m: u32, poly: u32, seed: u32) -> Self {
        let mask = (1 << m) - 1;
        MSequence {
            state: seed & mask,
            taps: poly >> 1,
            mask,
        }
    }

    pub(crate) fn next_bit(&mut self) -> u8 {
        let b = ((self.state & self.taps).count_ones() & 1) as u8;
        self.state = ((self.state << 1) | u32::from(b)) & self.mask;
        b
    }
}
