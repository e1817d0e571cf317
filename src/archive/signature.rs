//! RAR marker detection.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const RAR5_SIGNATURE: &[u8] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];
const RAR4_SIGNATURE: &[u8] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];

/// Size of the prefix searched for a marker, large enough for self-extracting stubs.
pub const SFX_WINDOW_BYTES: usize = 1 << 20;

/// Report whether a RAR4 or RAR5 marker appears in the first
/// [`SFX_WINDOW_BYTES`] + 8 bytes of `path`.
pub fn has_archive_signature(path: &Path) -> io::Result<bool> {
    let file = File::open(path)?;
    let window = (SFX_WINDOW_BYTES + RAR5_SIGNATURE.len()) as u64;
    let mut prefix = Vec::with_capacity(64 * 1024);
    file.take(window).read_to_end(&mut prefix)?;
    Ok(contains(&prefix, RAR5_SIGNATURE) || contains(&prefix, RAR4_SIGNATURE))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
