//! Minimal PNG codec for clipboard images.
//!
//! Encoding favors speed over size: RGBA rows go into a single IDAT
//! chunk as stored (uncompressed) deflate blocks with the standard
//! zlib header and Adler-32 trailer. The decoder accepts only stored
//! blocks — the matching reverse path — and returns `None` for
//! anything else rather than guessing.

/// Encode top-down RGBA pixels as a PNG.
pub fn encode_png(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    debug_assert_eq!(rgba.len(), (width * height * 4) as usize);
    let mut png = Vec::with_capacity(rgba.len() + rgba.len() / 16 + 128);
    png.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);

    // IHDR: 8-bit RGBA, no interlace.
    let mut ihdr = [0u8; 13];
    ihdr[0..4].copy_from_slice(&width.to_be_bytes());
    ihdr[4..8].copy_from_slice(&height.to_be_bytes());
    ihdr[8] = 8; // bit depth
    ihdr[9] = 6; // color type RGBA
    write_chunk(&mut png, b"IHDR", &ihdr);

    // IDAT: zlib header, one stored block per row, Adler-32 trailer.
    let row_len = width as usize * 4;
    let stored_row = 1 + row_len; // filter byte + pixels
    let mut idat = Vec::with_capacity(2 + height as usize * (5 + stored_row) + 4);
    idat.push(0x78);
    idat.push(0x01);

    let mut adler = Adler32::new();
    for y in 0..height as usize {
        let last = y == height as usize - 1;
        let len = stored_row as u16;
        idat.push(last as u8);
        idat.extend_from_slice(&len.to_le_bytes());
        idat.extend_from_slice(&(!len).to_le_bytes());
        idat.push(0); // filter: none
        adler.update(&[0]);
        let row = &rgba[y * row_len..(y + 1) * row_len];
        idat.extend_from_slice(row);
        adler.update(row);
    }
    idat.extend_from_slice(&adler.finish().to_be_bytes());
    write_chunk(&mut png, b"IDAT", &idat);

    write_chunk(&mut png, b"IEND", &[]);
    png
}

/// Decode a PNG produced by [`encode_png`] (or any encoder emitting
/// stored deflate blocks) back into top-down RGBA of the expected
/// dimensions. Returns `None` on signature mismatch, non-stored
/// blocks, or truncation.
pub fn decode_png(data: &[u8], expected_w: u32, expected_h: u32) -> Option<Vec<u8>> {
    if data.len() < 8 || data[0] != 0x89 || &data[1..4] != b"PNG" {
        return None;
    }

    // Collect every IDAT payload.
    let mut compressed = Vec::new();
    let mut pos = 8usize;
    while pos + 12 <= data.len() {
        let len = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let kind = &data[pos + 4..pos + 8];
        if kind == b"IDAT" && pos + 8 + len <= data.len() {
            compressed.extend_from_slice(&data[pos + 8..pos + 8 + len]);
        }
        pos += 12 + len;
    }
    if compressed.len() < 6 {
        return None;
    }

    // Skip the 2-byte zlib header, then inflate stored blocks only.
    let mut raw = Vec::with_capacity(expected_h as usize * (1 + expected_w as usize * 4));
    let mut cpos = 2usize;
    loop {
        if cpos + 5 > compressed.len() {
            return None;
        }
        let header = compressed[cpos];
        if header & 0x06 != 0 {
            return None; // fixed/dynamic huffman — not a stored block
        }
        let last = header & 0x01 != 0;
        let len = u16::from_le_bytes(compressed[cpos + 1..cpos + 3].try_into().unwrap()) as usize;
        let nlen = u16::from_le_bytes(compressed[cpos + 3..cpos + 5].try_into().unwrap());
        if nlen != !(len as u16) {
            return None;
        }
        cpos += 5;
        if cpos + len > compressed.len() {
            return None;
        }
        raw.extend_from_slice(&compressed[cpos..cpos + len]);
        cpos += len;
        if last {
            break;
        }
    }

    // Strip per-row filter bytes (only filter 0 is produced).
    let row_len = expected_w as usize * 4;
    let stored_row = 1 + row_len;
    let mut rgba = vec![0u8; expected_h as usize * row_len];
    for y in 0..expected_h as usize {
        let start = y * stored_row;
        if start + stored_row > raw.len() || raw[start] != 0 {
            return None;
        }
        rgba[y * row_len..(y + 1) * row_len].copy_from_slice(&raw[start + 1..start + stored_row]);
    }
    Some(rgba)
}

fn write_chunk(png: &mut Vec<u8>, kind: &[u8; 4], payload: &[u8]) {
    png.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    let crc_start = png.len();
    png.extend_from_slice(kind);
    png.extend_from_slice(payload);
    let crc = crc32(&png[crc_start..]);
    png.extend_from_slice(&crc.to_be_bytes());
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = (crc >> 1) ^ (0xEDB8_8320 & 0u32.wrapping_sub(crc & 1));
        }
    }
    !crc
}

struct Adler32 {
    a: u32,
    b: u32,
}

impl Adler32 {
    fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.a = (self.a + byte as u32) % 65521;
            self.b = (self.b + self.a) % 65521;
        }
    }

    fn finish(self) -> u32 {
        (self.b << 16) | self.a
    }
}
