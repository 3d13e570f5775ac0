use num_complex::Complex32;

/// Number of p/n symbols in the preamble.
pub const PREAMBLE_LEN: usize = 64;

/// Decoded block size in bytes: header followed by payload.
pub const BLOCK_LEN: usize = 72;
/// Header portion of the decoded block.
pub const HEADER_LEN: usize = 8;
/// Payload portion of the decoded block.
pub const PAYLOAD_LEN: usize = 64;

/// Modulated payload symbols per frame, before pilot insertion.
pub const PAYLOAD_SYM_LEN: usize = 600;
/// Payload symbols on the air, pilots included.
pub const FRAME_SYM_LEN: usize = 630;
/// A pilot symbol occupies every 21st slot of the payload frame.
pub const PILOT_SPACING: usize = 21;
/// Pilot symbols per frame.
pub const PILOT_LEN: usize = 30;

/// Samples per symbol.
pub(crate) const K: usize = 2;
/// Pulse shaping filter delay in symbols.
pub(crate) const M: usize = 3;
/// Excess bandwidth of the root-raised-cosine pulse.
pub(crate) const BETA: f32 = 0.5;
/// Branches in the polyphase matched filter bank.
pub(crate) const NPFB: usize = 32;

/// Samples in one complete transmitted frame, filter flush included.
pub const FRAME_SAMPLE_LEN: usize = K * (PREAMBLE_LEN + FRAME_SYM_LEN + 2 * M);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Qpsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Crc24,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fec {
    None,
    Golay2412,
}

/// Statistics delivered with each decoded frame.
///
/// Borrowed views are only valid for the duration of the sink callback.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats<'a> {
    /// Error vector magnitude. Reserved, always 0.
    pub evm: f32,
    /// Received signal strength from the detector's gain estimate, dBFS.
    pub rssi: f32,
    /// Carrier frequency offset applied by the mixer, radians per sample.
    pub cfo: f32,
    /// The 600 payload symbols after pilot correction.
    pub framesyms: &'a [Complex32],
    pub mod_scheme: Modulation,
    /// Bits per modulated symbol.
    pub mod_bps: u8,
    pub check: Check,
    pub fec0: Fec,
    pub fec1: Fec,
}
