//! Job line parser.

use serde::{Deserialize, Serialize};

use super::lexer;
use crate::error::ParseError;

/// A queue line that parsed into a runnable job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedJob {
    /// Number of work units (artifacts) to produce.
    pub count: u32,
    pub height: u32,
    pub width: u32,
    /// Free-text remainder, words re-joined with single spaces.
    pub detail: String,
    /// The trimmed line text as read, without any status marker.
    pub original_line: String,
}

/// Parse a pending line into a job.
///
/// Blank, comment and already-marked lines are filtered out by the reader
/// and are not expected here.
pub fn parse(line: &str) -> Result<ParsedJob, ParseError> {
    let trimmed = line.trim();
    let tokens = lexer::split(trimmed)?;
    if tokens.len() < 4 {
        return Err(ParseError::TooFewFields {
            found: tokens.len(),
        });
    }

    let count = parse_positive("count", &tokens[0])?;
    let height = parse_positive("height", &tokens[1])?;
    let width = parse_positive("width", &tokens[2])?;

    Ok(ParsedJob {
        count,
        height,
        width,
        detail: tokens[3..].join(" "),
        original_line: trimmed.to_string(),
    })
}

fn parse_positive(field: &'static str, value: &str) -> Result<u32, ParseError> {
    let n: u32 = value.parse().map_err(|_| ParseError::NotAnInteger {
        field,
        value: value.to_string(),
    })?;
    if n == 0 {
        return Err(ParseError::NotPositive { field });
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_detail() {
        let job = parse(r#"3 512 512 "a red bicycle""#).unwrap();
        assert_eq!(job.count, 3);
        assert_eq!(job.height, 512);
        assert_eq!(job.width, 512);
        assert_eq!(job.detail, "a red bicycle");
        assert_eq!(job.original_line, r#"3 512 512 "a red bicycle""#);
    }

    #[test]
    fn unquoted_detail_words_join_with_single_spaces() {
        let job = parse("1 768 1024 a   lone    lighthouse").unwrap();
        assert_eq!(job.height, 768);
        assert_eq!(job.width, 1024);
        assert_eq!(job.detail, "a lone lighthouse");
    }

    #[test]
    fn original_line_is_trimmed() {
        let job = parse("  2 64 64 'tiny sprite'  ").unwrap();
        assert_eq!(job.original_line, "2 64 64 'tiny sprite'");
        assert_eq!(job.detail, "tiny sprite");
    }

    #[test]
    fn too_few_fields() {
        assert_eq!(parse("oops"), Err(ParseError::TooFewFields { found: 1 }));
        assert_eq!(
            parse("1 2 3"),
            Err(ParseError::TooFewFields { found: 3 })
        );
        // A quoted run counts as one token
        assert_eq!(
            parse(r#"1 2 "3 cat""#),
            Err(ParseError::TooFewFields { found: 3 })
        );
    }

    #[test]
    fn non_integer_fields() {
        assert_eq!(
            parse("three 512 512 cat"),
            Err(ParseError::NotAnInteger {
                field: "count",
                value: "three".into()
            })
        );
        assert!(matches!(
            parse("1 512.5 512 cat"),
            Err(ParseError::NotAnInteger { field: "height", .. })
        ));
        assert!(matches!(
            parse("1 512 -4 cat"),
            Err(ParseError::NotAnInteger { field: "width", .. })
        ));
    }

    #[test]
    fn zero_is_rejected() {
        assert_eq!(
            parse("0 512 512 cat"),
            Err(ParseError::NotPositive { field: "count" })
        );
    }

    #[test]
    fn lexer_failures_are_parse_failures() {
        assert!(matches!(parse(r#"1 2 3 "unclosed"#), Err(ParseError::Lex(_))));
    }
}
