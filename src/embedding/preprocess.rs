//! Text normalization applied before cache-key hashing and before the
//! backend call. Both paths use the same function, so a cache hit always
//! corresponds to exactly the text the backend would have seen.

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PreprocessingOptions {
    #[serde(default = "default_true")]
    pub normalize_whitespace: bool,
    #[serde(default)]
    pub strip_special_chars: bool,
    #[serde(default)]
    pub lowercase: bool,
    /// Texts longer than this many characters are truncated.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Texts shorter than this many characters are padded with spaces.
    #[serde(default)]
    pub min_length: usize,
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            normalize_whitespace: true,
            strip_special_chars: false,
            lowercase: false,
            max_length: default_max_length(),
            min_length: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_length() -> usize {
    8000
}

/// Punctuation kept by special-character stripping.
fn is_kept_punctuation(c: char) -> bool {
    matches!(
        c,
        '.' | ',' | '!' | '?' | '\'' | '"' | '-' | ':' | ';' | '(' | ')' | '。' | '、' | '！' | '？' | '「' | '」'
    )
}

pub fn preprocess(text: &str, opts: &PreprocessingOptions) -> String {
    let mut out: String = if opts.strip_special_chars {
        text.chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || is_kept_punctuation(*c))
            .collect()
    } else {
        text.to_string()
    };

    if opts.normalize_whitespace {
        out = out.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    if opts.lowercase {
        out = out.to_lowercase();
    }

    let len = out.chars().count();
    if opts.max_length > 0 && len > opts.max_length {
        out = out.chars().take(opts.max_length).collect();
    } else if len < opts.min_length {
        out.extend(std::iter::repeat(' ').take(opts.min_length - len));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_normalized() {
        let opts = PreprocessingOptions::default();
        assert_eq!(preprocess("  hello \n\t world  ", &opts), "hello world");
    }

    #[test]
    fn test_strip_and_lowercase() {
        let opts = PreprocessingOptions {
            strip_special_chars: true,
            lowercase: true,
            ..Default::default()
        };
        assert_eq!(preprocess("Hello, #World! @2024", &opts), "hello, world! 2024");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let opts = PreprocessingOptions {
            max_length: 3,
            ..Default::default()
        };
        assert_eq!(preprocess("会議の議事録", &opts), "会議の");
    }

    #[test]
    fn test_pads_short_text() {
        let opts = PreprocessingOptions {
            normalize_whitespace: false,
            min_length: 5,
            ..Default::default()
        };
        assert_eq!(preprocess("ab", &opts), "ab   ");
    }

    #[test]
    fn test_idempotent() {
        let opts = PreprocessingOptions {
            strip_special_chars: true,
            lowercase: true,
            ..Default::default()
        };
        let once = preprocess("  Mixed   CASE & symbols!! ", &opts);
        assert_eq!(preprocess(&once, &opts), once);
    }
}
