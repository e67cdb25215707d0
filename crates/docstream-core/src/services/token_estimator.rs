//! Character-based token estimate used for every budget check.

/// Average characters per model token assumed by the estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count of `text`: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_for_chars(text.chars().count())
}

pub fn estimate_tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}
