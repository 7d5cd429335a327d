//! Reading formatter results back out of sandbox memory.

/// Decode the null-terminated string at `offset`.
///
/// Each byte is taken as one character. The scan stops at the first zero byte
/// or at the end of memory; an offset past the end yields the empty string.
pub fn read_c_string(memory: &[u8], offset: usize) -> String {
    let tail = memory.get(offset..).unwrap_or_default();
    tail.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

/// Decode a length-prefixed string: a little-endian `u32` length at `offset`
/// followed by that many single-byte characters, clipped to memory.
pub fn read_prefixed_string(memory: &[u8], offset: usize) -> String {
    let Some(header) = memory.get(offset..offset.saturating_add(4)) else {
        return String::new();
    };
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let start = offset + 4;
    let end = start.saturating_add(len).min(memory.len());
    memory[start..end].iter().map(|&b| char::from(b)).collect()
}
