pub const DELIMITER: [u8; 8] = [0; 8];

/// Builds a framed stream body: a JSON metadata preamble, the zero delimiter,
/// then the UTF-8 body text.
pub fn framed_body(metadata: &str, body: &str) -> Vec<u8> {
    let mut bytes = metadata.as_bytes().to_vec();
    bytes.extend_from_slice(&DELIMITER);
    bytes.extend_from_slice(body.as_bytes());
    return bytes;
}

/// Splits `bytes` at the given offsets. Offsets past the end are ignored.
pub fn split_at(bytes: &[u8], offsets: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks: Vec<Vec<u8>> = vec![];
    let mut start = 0;
    for offset in offsets {
        let end = (*offset).min(bytes.len());
        if end < start {
            continue;
        }
        chunks.push(bytes[start..end].to_vec());
        start = end;
    }
    chunks.push(bytes[start..].to_vec());

    return chunks;
}

/// Splits `bytes` into chunks of `size` bytes, the last one possibly shorter.
pub fn chunks_of(bytes: &[u8], size: usize) -> Vec<Vec<u8>> {
    return bytes
        .chunks(size.max(1))
        .map(|chunk| {
            return chunk.to_vec();
        })
        .collect();
}

pub fn multibyte_fixture() -> &'static str {
    return "Grüße 👋 from the stream, ünïcödé all the way — done.";
}
