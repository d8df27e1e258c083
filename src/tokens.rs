//! Heuristic token estimation.
//!
//! Not a tokenizer: Japanese script is counted at roughly 1.5 characters per
//! token and everything else at 4 characters per token. Budgets computed
//! with it are approximate.

/// Characters per token for non-Japanese text.
const CHARS_PER_TOKEN: usize = 4;

/// Whether `c` belongs to the Japanese script (kana, kanji, Japanese
/// punctuation, half-width katakana).
pub fn is_japanese(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'   // CJK symbols and punctuation
        | '\u{3040}'..='\u{309F}' // hiragana
        | '\u{30A0}'..='\u{30FF}' // katakana
        | '\u{31F0}'..='\u{31FF}' // katakana phonetic extensions
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{FF66}'..='\u{FF9F}' // half-width katakana
    )
}

/// Estimate the token count of `text`:
/// `floor(japanese / 1.5) + floor(other / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    let (japanese, other) = text.chars().fold((0usize, 0usize), |(j, o), c| {
        if is_japanese(c) {
            (j + 1, o)
        } else {
            (j, o + 1)
        }
    });
    // japanese / 1.5 == japanese * 2 / 3
    japanese * 2 / 3 + other / CHARS_PER_TOKEN
}
