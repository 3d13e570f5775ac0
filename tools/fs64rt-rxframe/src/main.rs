use std::{error::Error, fs::File, io::Read, path::PathBuf};

use clap::Parser;
use fs64core::framesync::{FrameSink, FrameSync64};
use fs64core::protocol::{FrameStats, HEADER_LEN, PAYLOAD_LEN};
use num_complex::Complex32;

#[derive(Parser)]
struct Args {
    #[arg(short = 'i', help = "Input IQ file (interleaved little-endian f32)")]
    input: PathBuf,
}

#[derive(Default)]
struct Printer {
    total: usize,
    valid: usize,
}

impl FrameSink for Printer {
    fn on_frame(
        &mut self,
        header: &[u8; HEADER_LEN],
        _header_valid: bool,
        payload: &[u8; PAYLOAD_LEN],
        payload_valid: bool,
        stats: &FrameStats<'_>,
    ) {
        self.total += 1;
        if payload_valid {
            self.valid += 1;
        }
        println!(
            "frame {}: crc {} rssi {:6.1} dB cfo {:8.5} header {:02x?} payload[..8] {:02x?}",
            self.total,
            if payload_valid { "ok  " } else { "fail" },
            stats.rssi,
            stats.cfo,
            header,
            &payload[..8]
        );
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut file = File::open(&args.input)?;
    let mut raw = vec![];
    file.read_to_end(&mut raw)?;

    let samples: Vec<Complex32> = raw
        .chunks_exact(8)
        .map(|c| {
            Complex32::new(
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect();

    let mut sync = FrameSync64::new(Printer::default());
    sync.execute(&samples);

    let printer = sync.into_sink();
    println!(
        "\ntotal frames: {} ({} passed crc)",
        printer.total, printer.valid
    );
    Ok(())
}
