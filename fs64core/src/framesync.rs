//! The frame synchronizer state machine.

use libm::log10f;
use log::debug;
use num_complex::Complex32;

use crate::detector::{PreambleDetector, REPLAY_LEN};
use crate::filter::MatchedFilterBank;
use crate::nco::Nco;
use crate::packet;
use crate::pilot::PilotSync;
use crate::pn::MSequence;
use crate::protocol::{
    Check, Fec, FrameStats, Modulation, BLOCK_LEN, FRAME_SYM_LEN, HEADER_LEN, K, M, PAYLOAD_LEN,
    PAYLOAD_SYM_LEN, PREAMBLE_LEN,
};

/// Receives each decoded frame, synchronously from within `execute`.
///
/// The borrowed views are only valid for the duration of the call. A sink
/// must not feed samples back into the synchronizer that invoked it.
pub trait FrameSink {
    fn on_frame(
        &mut self,
        header: &[u8; HEADER_LEN],
        header_valid: bool,
        payload: &[u8; PAYLOAD_LEN],
        payload_valid: bool,
        stats: &FrameStats<'_>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Searching for the p/n preamble.
    Detect,
    /// Receiving p/n symbols through the matched filter.
    RxPreamble,
    /// Receiving payload symbols.
    RxPayload,
}

/// Symbol outputs discarded after detection: the matched filter pre-ring.
const PRE_RING: usize = 2 * M;

const ZERO: Complex32 = Complex32 { re: 0.0, im: 0.0 };

/// Converts a stream of baseband samples into decoded 72-byte blocks.
///
/// Single-owner and single-threaded; samples are consumed in arrival order
/// and the sink fires synchronously once per decoded frame.
pub struct FrameSync64<S: FrameSink> {
    sink: S,
    state: State,

    /// Known p/n preamble symbols.
    preamble_pn: [Complex32; PREAMBLE_LEN],

    detector: PreambleDetector,
    mixer: Nco,
    mf: MatchedFilterBank,
    pilot: PilotSync,

    /// Detection-time estimates, captured once per frame.
    tau_hat: f32,
    dphi_hat: f32,
    phi_hat: f32,
    gamma_hat: f32,

    /// Matched filter decimation phase, modulo samples per symbol.
    mf_counter: usize,
    /// Selected polyphase branch.
    pfb_index: usize,

    /// Received p/n symbols.
    preamble_rx: [Complex32; PREAMBLE_LEN],
    /// Received payload symbols, pilots included.
    payload_rx: [Complex32; FRAME_SYM_LEN],
    /// Payload symbols after pilot correction.
    payload_sym: [Complex32; PAYLOAD_SYM_LEN],
    /// Decoded block: header then payload.
    payload_dec: [u8; BLOCK_LEN],

    preamble_counter: usize,
    payload_counter: usize,

    /// Samples the detector handed back at detection, run through the
    /// synchronizer before the caller's input advances.
    replay: [Complex32; REPLAY_LEN],
    replay_len: usize,
    replay_pos: usize,
}

impl<S: FrameSink> FrameSync64<S> {
    pub fn new(sink: S) -> Self {
        let mut ms = MSequence::new(6, 0x43, 1);
        let mut preamble_pn = [ZERO; PREAMBLE_LEN];
        for p in preamble_pn.iter_mut() {
            *p = if ms.next_bit() != 0 {
                Complex32::new(1.0, 0.0)
            } else {
                Complex32::new(-1.0, 0.0)
            };
        }
        let detector = PreambleDetector::new(&preamble_pn);

        FrameSync64 {
            sink,
            state: State::Detect,
            preamble_pn,
            detector,
            mixer: Nco::new(),
            mf: MatchedFilterBank::new(),
            pilot: PilotSync::new(),
            tau_hat: 0.0,
            dphi_hat: 0.0,
            phi_hat: 0.0,
            gamma_hat: 1.0,
            mf_counter: 0,
            pfb_index: 0,
            preamble_rx: [ZERO; PREAMBLE_LEN],
            payload_rx: [ZERO; FRAME_SYM_LEN],
            payload_sym: [ZERO; PAYLOAD_SYM_LEN],
            payload_dec: [0; BLOCK_LEN],
            preamble_counter: 0,
            payload_counter: 0,
            replay: [ZERO; REPLAY_LEN],
            replay_len: 0,
            replay_pos: 0,
        }
    }

    /// Feed samples in arrival order. The sink may fire any number of times
    /// before this returns.
    pub fn execute(&mut self, samples: &[Complex32]) {
        for &x in samples {
            self.step(x);
            // drain any buffered tail the detector asked to run again
            while self.replay_pos < self.replay_len {
                let y = self.replay[self.replay_pos];
                self.replay_pos += 1;
                self.step(y);
            }
        }
    }

    /// Return every stateful component to frame detection.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.mixer.reset();
        self.mf.reset();
        self.state = State::Detect;
        self.preamble_counter = 0;
        self.payload_counter = 0;
        self.mf_counter = 0;
        self.pfb_index = 0;
        self.replay_len = 0;
        self.replay_pos = 0;
    }

    /// The known p/n preamble symbols.
    pub fn preamble(&self) -> &[Complex32; PREAMBLE_LEN] {
        &self.preamble_pn
    }

    /// The p/n symbols received for the most recent frame, retained for
    /// downstream use such as equalizer training.
    pub fn received_preamble(&self) -> &[Complex32; PREAMBLE_LEN] {
        &self.preamble_rx
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn step(&mut self, x: Complex32) {
        match self.state {
            State::Detect => self.seek_preamble(x),
            State::RxPreamble => self.rx_preamble(x),
            State::RxPayload => self.rx_payload(x),
        }
    }

    /// Push one sample through the detector; on detection, capture the
    /// estimates, program the mixer and filterbank and queue the buffered
    /// tail for replay.
    fn seek_preamble(&mut self, x: Complex32) {
        let replay_len = match self.detector.execute(x) {
            Some(tail) => {
                self.replay[..tail.len()].copy_from_slice(tail);
                tail.len()
            }
            None => return,
        };

        self.tau_hat = self.detector.tau();
        self.gamma_hat = self.detector.gamma();
        self.dphi_hat = self.detector.dphi();
        self.phi_hat = self.detector.phi();
        debug!(
            "frame detected: tau {:.4} dphi {:.5} gamma {:.2} dB",
            self.tau_hat,
            self.dphi_hat,
            20.0 * log10f(self.gamma_hat)
        );

        self.mf.set_scale(0.5 / self.gamma_hat);
        // TODO: pick the starting branch from tau_hat once negative offsets
        // are mapped onto the bank
        self.pfb_index = 0;
        self.mixer.set_frequency(self.dphi_hat);
        self.mixer.set_phase(self.phi_hat);

        self.state = State::RxPreamble;
        self.replay_len = replay_len;
        self.replay_pos = 0;
    }

    /// Mix one sample down, run it through the filterbank and decimate 2:1.
    fn sample_step(&mut self, x: Complex32) -> Option<Complex32> {
        let v = self.mixer.mix_down(x);
        self.mixer.step();

        self.mf.push(v);
        let y = self.mf.execute(self.pfb_index);

        self.mf_counter += 1;
        let available = self.mf_counter == 1;
        self.mf_counter %= K;
        available.then_some(y)
    }

    fn rx_preamble(&mut self, x: Complex32) {
        let Some(sym) = self.sample_step(x) else {
            return;
        };
        if self.preamble_counter >= PRE_RING {
            self.preamble_rx[self.preamble_counter - PRE_RING] = sym;
        }
        self.preamble_counter += 1;
        if self.preamble_counter == PREAMBLE_LEN + PRE_RING {
            self.state = State::RxPayload;
        }
    }

    fn rx_payload(&mut self, x: Complex32) {
        let Some(sym) = self.sample_step(x) else {
            return;
        };
        self.payload_rx[self.payload_counter] = sym;
        self.payload_counter += 1;
        if self.payload_counter == FRAME_SYM_LEN {
            self.finish_frame();
        }
    }

    /// Pilot correction, packet decode, sink callback, reset.
    fn finish_frame(&mut self) {
        self.pilot.execute(&self.payload_rx, &mut self.payload_sym);
        let payload_valid = packet::decode(&self.payload_sym, &mut self.payload_dec);
        debug!(
            "frame complete: crc {}",
            if payload_valid { "ok" } else { "fail" }
        );

        let stats = FrameStats {
            evm: 0.0,
            rssi: 20.0 * log10f(self.gamma_hat),
            cfo: self.mixer.frequency(),
            framesyms: &self.payload_sym,
            mod_scheme: Modulation::Qpsk,
            mod_bps: 2,
            check: Check::Crc24,
            fec0: Fec::None,
            fec1: Fec::Golay2412,
        };
        let header: &[u8; HEADER_LEN] = self.payload_dec[..HEADER_LEN].try_into().unwrap();
        let payload: &[u8; PAYLOAD_LEN] = self.payload_dec[HEADER_LEN..].try_into().unwrap();
        self.sink
            .on_frame(header, payload_valid, payload, payload_valid, &stats);

        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::pulse;
    use crate::framegen::FrameGen64;
    use crate::protocol::FRAME_SAMPLE_LEN;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    #[derive(Debug, Clone, PartialEq)]
    struct Decoded {
        header: [u8; HEADER_LEN],
        payload: [u8; PAYLOAD_LEN],
        valid: bool,
        rssi: f32,
        cfo: f32,
    }

    #[derive(Default)]
    struct CollectSink {
        frames: Vec<Decoded>,
    }

    impl FrameSink for CollectSink {
        fn on_frame(
            &mut self,
            header: &[u8; HEADER_LEN],
            header_valid: bool,
            payload: &[u8; PAYLOAD_LEN],
            payload_valid: bool,
            stats: &FrameStats<'_>,
        ) {
            assert_eq!(header_valid, payload_valid);
            assert_eq!(stats.framesyms.len(), PAYLOAD_SYM_LEN);
            assert_eq!(stats.evm, 0.0);
            assert_eq!(stats.mod_bps, 2);
            self.frames.push(Decoded {
                header: *header,
                payload: *payload,
                valid: payload_valid,
                rssi: stats.rssi,
                cfo: stats.cfo,
            });
        }
    }

    fn test_header() -> [u8; HEADER_LEN] {
        [0xAA; HEADER_LEN]
    }

    fn test_payload() -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        payload
    }

    fn test_frame() -> [Complex32; FRAME_SAMPLE_LEN] {
        let mut gen = FrameGen64::new();
        let mut out = [ZERO; FRAME_SAMPLE_LEN];
        gen.generate(&test_header(), &test_payload(), &mut out);
        out
    }

    fn run(samples: &[Complex32]) -> Vec<Decoded> {
        let mut sync = FrameSync64::new(CollectSink::default());
        sync.execute(samples);
        sync.into_sink().frames
    }

    #[test]
    fn clean_frame_round_trip() {
        let mut samples = vec![ZERO; 2000];
        samples.extend(test_frame());

        let frames = run(&samples);
        assert_eq!(frames.len(), 1);
        let f = &frames[0];
        assert!(f.valid);
        assert_eq!(f.header, test_header());
        assert_eq!(f.payload, test_payload());
        assert!(f.rssi.abs() < 0.5, "rssi {}", f.rssi);
        assert!(f.cfo.abs() < 1e-3);
    }

    #[test]
    fn low_gain_frame() {
        let mut samples = vec![ZERO; 500];
        samples.extend(test_frame().iter().map(|x| *x * 0.1));

        let frames = run(&samples);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].valid);
        assert!((frames[0].rssi + 20.0).abs() < 0.5, "rssi {}", frames[0].rssi);
    }

    #[test]
    fn carrier_offset_frames() {
        for dphi in [0.03f32, -0.045] {
            let mut samples = vec![ZERO; 500];
            samples.extend(test_frame());
            let rotated: Vec<Complex32> = samples
                .iter()
                .enumerate()
                .map(|(n, x)| *x * Complex32::cis(dphi * n as f32 + 0.4))
                .collect();

            let frames = run(&rotated);
            assert_eq!(frames.len(), 1, "dphi {dphi}");
            assert!(frames[0].valid, "dphi {dphi}");
            // reported cfo within ten percent of the applied offset
            assert!(
                (frames[0].cfo - dphi).abs() < 0.1 * dphi.abs(),
                "dphi {dphi} cfo {}",
                frames[0].cfo
            );
        }
    }

    #[test]
    fn back_to_back_frames() {
        let frame = test_frame();
        let mut samples = vec![ZERO; 200];
        samples.extend(frame);
        samples.extend(frame);

        let frames = run(&samples);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
        assert!(frames[0].valid);
        assert_eq!(frames[0].payload, test_payload());
    }

    #[test]
    fn random_blocks_round_trip() {
        use rand::Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(0x6673_3634);
        let mut gen = FrameGen64::new();
        let mut sync = FrameSync64::new(CollectSink::default());
        let mut frame = [ZERO; FRAME_SAMPLE_LEN];
        for trial in 0..8usize {
            let mut header = [0u8; HEADER_LEN];
            let mut payload = [0u8; PAYLOAD_LEN];
            rng.fill(&mut header[..]);
            rng.fill(&mut payload[..]);
            gen.generate(&header, &payload, &mut frame);

            let mut samples = vec![ZERO; 150];
            samples.extend(frame);
            sync.execute(&samples);

            let frames = &sync.sink().frames;
            assert_eq!(frames.len(), trial + 1);
            let f = frames.last().unwrap();
            assert!(f.valid, "trial {trial}");
            assert_eq!(f.header, header, "trial {trial}");
            assert_eq!(f.payload, payload, "trial {trial}");
        }
    }

    #[test]
    fn corrupted_payload_still_delivered() {
        let mut frame = test_frame();
        // blank a span of payload samples, far beyond what the fec corrects
        for x in frame[500..900].iter_mut() {
            *x = ZERO;
        }
        let mut samples = vec![ZERO; 300];
        samples.extend(frame);

        let frames = run(&samples);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].valid);
        assert_eq!(frames[0].header, test_header());
        assert_ne!(frames[0].payload, test_payload());
    }

    #[test]
    fn noise_alone_never_fires() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x6453);
        let dist = Normal::new(0.0f32, core::f32::consts::FRAC_1_SQRT_2).unwrap();
        let samples: Vec<Complex32> = (0..200_000)
            .map(|_| Complex32::new(dist.sample(&mut rng), dist.sample(&mut rng)))
            .collect();

        assert!(run(&samples).is_empty());
    }

    /// Synthesize the shaped frame with a fractional-sample delay by direct
    /// pulse evaluation.
    fn shaped_delayed(syms: &[Complex32], tau: f32) -> Vec<Complex32> {
        let total = K * syms.len() + 2 * K * M;
        let mut out = vec![ZERO; total];
        for (i, s) in syms.iter().enumerate() {
            let center = (K * i + K * M) as f32 + tau;
            for (n, o) in out.iter_mut().enumerate() {
                let t = (n as f32 - center) / K as f32;
                if t.abs() <= M as f32 + 0.6 {
                    *o += *s * pulse(t);
                }
            }
        }
        out
    }

    #[test]
    fn fractional_timing_offsets_tolerated() {
        let gen = FrameGen64::new();
        let syms = gen.frame_symbols(&test_header(), &test_payload());
        for tau in [0.0f32, 0.25, 0.5, 0.75] {
            let mut samples = vec![ZERO; 300];
            samples.extend(shaped_delayed(&syms, tau));
            samples.extend(vec![ZERO; 20]);

            let frames = run(&samples);
            assert_eq!(frames.len(), 1, "tau {tau}");
            assert!(frames[0].valid, "tau {tau}");
            assert_eq!(frames[0].payload, test_payload(), "tau {tau}");
        }
    }

    #[test]
    fn additive_noise_tolerated() {
        // 10 dB snr per sample on a unit-power frame
        let sigma = (10.0f32.powf(-1.0) / 2.0).sqrt();
        let frame = test_frame();
        let mut detected = 0;
        let mut valid = 0;
        for trial in 0..16u64 {
            let mut rng = ChaCha8Rng::seed_from_u64(trial);
            let dist = Normal::new(0.0f32, sigma).unwrap();
            let mut samples = vec![ZERO; 400];
            samples.extend(frame);
            samples.extend(vec![ZERO; 50]);
            let noisy: Vec<Complex32> = samples
                .iter()
                .map(|x| *x + Complex32::new(dist.sample(&mut rng), dist.sample(&mut rng)))
                .collect();

            let frames = run(&noisy);
            if let Some(f) = frames.first() {
                detected += 1;
                if f.valid && f.payload == test_payload() {
                    valid += 1;
                }
            }
        }
        assert!(detected >= 15, "detected {detected}/16");
        assert!(valid >= 13, "valid {valid}/16");
    }

    #[test]
    fn detect_state_has_idle_counters() {
        let mut sync = FrameSync64::new(CollectSink::default());
        assert_eq!(sync.state, State::Detect);
        assert_eq!(sync.preamble_counter, 0);
        assert_eq!(sync.payload_counter, 0);

        // a partial frame leaves the synchronizer mid-reception
        let frame = test_frame();
        sync.execute(&frame[..400]);
        assert_ne!(sync.state, State::Detect);

        sync.reset();
        assert_eq!(sync.state, State::Detect);
        assert_eq!(sync.preamble_counter, 0);
        assert_eq!(sync.payload_counter, 0);
        assert_eq!(sync.mf_counter, 0);
        assert_eq!(sync.pfb_index, 0);
    }

    #[test]
    fn reset_is_equivalent_to_fresh() {
        let frame = test_frame();

        let mut fresh = FrameSync64::new(CollectSink::default());
        fresh.execute(&frame);

        let mut reused = FrameSync64::new(CollectSink::default());
        reused.execute(&frame[..300]);
        reused.reset();
        reused.sink_mut().frames.clear();
        reused.execute(&frame);

        let a = fresh.into_sink().frames;
        let b = reused.into_sink().frames;
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn preamble_is_the_known_pn_sequence() {
        let sync = FrameSync64::new(CollectSink::default());
        let bits = [
            1, 1, 1, 1, 1, 0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1, 0, 1, 0, 0, 1,
            0, 0, 1, 1, 1, 0, 0, 0, 1, 0, 1, 1, 1, 1, 0, 0, 1, 0, 1, 0, 0, 0, 1, 1, 0, 0, 0, 0,
            1, 0, 0, 0, 0, 0, 1, 1,
        ];
        for (i, b) in bits.iter().enumerate() {
            let expected = if *b != 0 { 1.0 } else { -1.0 };
            assert_eq!(sync.preamble_pn[i], Complex32::new(expected, 0.0), "symbol {i}");
        }
    }

    #[test]
    fn received_preamble_tracks_the_known_symbols() {
        // after a clean decode the stored p/n symbols should be close to
        // the known sequence
        let mut sync = FrameSync64::new(CollectSink::default());
        let mut samples = vec![ZERO; 300];
        samples.extend(test_frame());
        // stop right before the payload completes so preamble_rx survives
        sync.execute(&samples[..1000]);
        assert_eq!(sync.state, State::RxPayload);
        for (i, (rx, pn)) in sync
            .preamble_rx
            .iter()
            .zip(sync.preamble_pn.iter())
            .enumerate()
        {
            assert!((*rx - *pn).norm() < 0.2, "symbol {i}: {rx} vs {pn}");
        }
    }
}
