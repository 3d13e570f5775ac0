use std::{error::Error, fs::File, io::BufWriter, io::Write, path::PathBuf};

use clap::Parser;
use fs64core::framegen::FrameGen64;
use fs64core::protocol::{FRAME_SAMPLE_LEN, HEADER_LEN, PAYLOAD_LEN};
use num_complex::Complex32;

#[derive(Parser)]
struct Args {
    #[arg(short = 'o', help = "Output IQ file (interleaved little-endian f32)")]
    output: PathBuf,
    #[arg(short = 'n', default_value = "1", help = "Number of frames to generate")]
    count: usize,
    #[arg(long, default_value = "1000", help = "Idle samples before each frame")]
    gap: usize,
}

fn write_samples(out: &mut impl Write, samples: &[Complex32]) -> std::io::Result<()> {
    for s in samples {
        out.write_all(&s.re.to_le_bytes())?;
        out.write_all(&s.im.to_le_bytes())?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut gen = FrameGen64::new();
    let mut out = BufWriter::new(File::create(&args.output)?);

    let gap = vec![Complex32::new(0.0, 0.0); args.gap];
    let mut frame = [Complex32::new(0.0, 0.0); FRAME_SAMPLE_LEN];
    for n in 0..args.count {
        let header = [n as u8; HEADER_LEN];
        let mut payload = [0u8; PAYLOAD_LEN];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i as u8).wrapping_add(n as u8);
        }
        gen.generate(&header, &payload, &mut frame);
        write_samples(&mut out, &gap)?;
        write_samples(&mut out, &frame)?;
    }

    println!("wrote {} frames to {}", args.count, args.output.display());
    Ok(())
}
