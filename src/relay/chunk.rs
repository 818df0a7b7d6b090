/// Discord's per-message character limit.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Split `text` into ordered pieces of at most `max_len` characters.
///
/// Lengths are in Unicode scalar values, so a chunk never ends inside a
/// multi-byte character. Concatenating the chunks yields `text` exactly.
/// Empty text yields no chunks.
pub fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    assert!(max_len > 0, "chunk length must be positive");

    let mut chunks = Vec::with_capacity(text.len() / max_len + 1);
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max_len)
            .map_or(rest.len(), |(idx, _)| idx);
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}
