// CRC - directory key checksum for archive entries

const POLYNOMIAL: u32 = 0x04C1_1DB7;

const CRC_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = (crc << 8) ^ CRC_TABLE[(((crc >> 24) ^ byte as u32) & 0xFF) as usize];
    }
    crc
}

/// Checksum of `name` including its trailing NUL.
///
/// Case-sensitive: archive callers lower-case the name first.
pub fn checksum(name: &str) -> i32 {
    let crc = update(0, name.as_bytes());
    update(crc, &[0]) as i32
}
