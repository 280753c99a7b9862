//! Shell-like word splitting for queue lines.
//!
//! Follows POSIX word rules closely enough for hand-written job files:
//! whitespace separates words, single quotes are literal, and adjacent
//! quoted and unquoted segments join into one word. Inside double quotes a
//! backslash only escapes `"` and `\`; before anything else (`$`, a
//! backtick) it is kept as written, since queue lines are never expanded.

pub use crate::error::LexError;

/// Characters a backslash may escape inside double quotes.
const DOUBLE_QUOTE_ESCAPES: &[char] = &['"', '\\'];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unquoted,
    Single { start: usize },
    Double { start: usize },
}

/// Split `input` into words.
pub fn split(input: &str) -> Result<Vec<String>, LexError> {
    let mut words = Vec::new();
    let mut word = String::new();
    // Distinguishes an empty quoted word (`""`) from no word at all.
    let mut in_word = false;
    let mut mode = Mode::Unquoted;
    let mut chars = input.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        match mode {
            Mode::Unquoted => match ch {
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                }
                '\\' => {
                    let (_, escaped) = chars.next().ok_or(LexError::TrailingEscape)?;
                    word.push(escaped);
                    in_word = true;
                }
                '\'' => {
                    mode = Mode::Single { start: offset };
                    in_word = true;
                }
                '"' => {
                    mode = Mode::Double { start: offset };
                    in_word = true;
                }
                c => {
                    word.push(c);
                    in_word = true;
                }
            },
            Mode::Single { .. } => match ch {
                '\'' => mode = Mode::Unquoted,
                c => word.push(c),
            },
            Mode::Double { .. } => match ch {
                '"' => mode = Mode::Unquoted,
                '\\' => match chars.peek() {
                    Some(&(_, next)) if DOUBLE_QUOTE_ESCAPES.contains(&next) => {
                        chars.next();
                        word.push(next);
                    }
                    _ => word.push('\\'),
                },
                c => word.push(c),
            },
        }
    }

    match mode {
        Mode::Single { start } => Err(LexError::UnterminatedQuote {
            quote: '\'',
            offset: start,
        }),
        Mode::Double { start } => Err(LexError::UnterminatedQuote {
            quote: '"',
            offset: start,
        }),
        Mode::Unquoted => {
            if in_word {
                words.push(word);
            }
            Ok(words)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(input: &str) -> Vec<String> {
        split(input).unwrap()
    }

    #[test]
    fn plain_words() {
        assert_eq!(words("3 512  512\tcat"), vec!["3", "512", "512", "cat"]);
        assert!(words("   ").is_empty());
    }

    #[test]
    fn double_quotes_keep_spaces() {
        assert_eq!(
            words(r#"3 512 512 "a red bicycle""#),
            vec!["3", "512", "512", "a red bicycle"]
        );
    }

    #[test]
    fn single_quotes_are_literal() {
        assert_eq!(words(r"'a \ b' c"), vec![r"a \ b", "c"]);
    }

    #[test]
    fn adjacent_segments_join() {
        assert_eq!(words(r#"a"b c"'d e'f"#), vec!["ab cd ef"]);
    }

    #[test]
    fn empty_quotes_yield_empty_word() {
        assert_eq!(words(r#"a "" b"#), vec!["a", "", "b"]);
    }

    #[test]
    fn escapes() {
        assert_eq!(words(r"a\ b"), vec!["a b"]);
        assert_eq!(words(r#""say \"hi\"""#), vec![r#"say "hi""#]);
        assert_eq!(words(r#""c:\dir""#), vec![r"c:\dir"]);
    }

    #[test]
    fn dollar_and_backtick_escapes_are_kept_in_double_quotes() {
        assert_eq!(words(r#""cost \$5""#), vec![r"cost \$5"]);
        assert_eq!(words(r#""a \`b\`""#), vec![r"a \`b\`"]);
        assert_eq!(words(r"cost \$5"), vec!["cost", "$5"]);
    }

    #[test]
    fn hash_is_not_a_comment() {
        assert_eq!(words("a #b"), vec!["a", "#b"]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert_eq!(
            split(r#"1 2 3 "open"#),
            Err(LexError::UnterminatedQuote {
                quote: '"',
                offset: 6
            })
        );
        assert!(matches!(
            split("it's"),
            Err(LexError::UnterminatedQuote { quote: '\'', .. })
        ));
    }

    #[test]
    fn trailing_backslash_is_an_error() {
        assert_eq!(split("abc\\"), Err(LexError::TrailingEscape));
    }
}
