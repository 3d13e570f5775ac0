pub const FRAME_ALG: crc::Algorithm<u32> = crc::Algorithm {
    width: 24,
    poly: 0x864CFB,
    init: 0xB704CE,
    refin: false,
    refout: false,
    xorout: 0x000000,
    check: 0x21CF02,
    residue: 0x000000,
};

pub fn frame_crc(input: &[u8]) -> u32 {
    let crc = crc::Crc::<u32>::new(&FRAME_ALG);
    let mut digest = crc.digest();
    digest.update(input);
    digest.finalize()
}
