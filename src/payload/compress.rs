//! Compressed payload codec.
//!
//! The destination decompresses with `DECOMPRESS()` (GZIP) and casts the result to
//! `NVARCHAR(MAX)`, so the JSON text is encoded as UTF-16LE before compressing, then base64'd so it
//! can sit in a plain `VARCHAR` literal.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{LoadError, LoadResult};

/// JSON text → UTF-16LE → gzip → base64.
pub fn compress_json(json: &str) -> LoadResult<String> {
    let wide: Vec<u8> = json.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut encoder = GzEncoder::new(Vec::with_capacity(wide.len() / 4), Compression::default());
    encoder.write_all(&wide)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Reverse of [`compress_json`].
pub fn decompress_json(encoded: &str) -> LoadResult<String> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| LoadError::validation(format!("invalid base64 payload: {e}")))?;

    let mut wide = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut wide)?;
    if wide.len() % 2 != 0 {
        return Err(LoadError::validation(
            "decompressed payload has an odd byte length for UTF-16",
        ));
    }

    let units: Vec<u16> = wide
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| LoadError::validation(format!("decompressed payload is not UTF-16: {e}")))
}
