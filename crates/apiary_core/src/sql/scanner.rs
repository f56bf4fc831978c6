//! Splits a multi-statement SQL buffer into statement spans.
//!
//! A single left-to-right pass over the buffer tracks whether the current
//! position is inside a quoted literal or a comment, so that only semicolons
//! in ordinary SQL text end a statement. The scan never fails: unterminated
//! literals or comments simply run to the end of the buffer.
//!
//! Offsets are byte offsets into the buffer. Every character that changes the
//! scan state is ASCII, so span boundaries always fall on `char` boundaries.

/// Lexical state of the scanner at one position of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// Ordinary SQL text.
    #[default]
    Normal,
    /// Inside `'...'`.
    InSingleQuotedString,
    /// Inside `"..."`.
    InDoubleQuotedString,
    /// Inside `-- ...` up to the end of the line.
    InLineComment,
    /// Inside `/* ... */`.
    InBlockComment,
}

/// One statement found in the buffer.
///
/// `text` is always `&buffer[start..end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementSpan<'a> {
    /// Split point the statement was read from: 0 or just past the previous
    /// `;`. Leading blank lines and comments lie between here and `start`.
    pub region_start: usize,
    /// Offset of the first statement character, past any leading whitespace
    /// and comments.
    pub start: usize,
    /// Exclusive end. For a delimited statement this is the offset of its `;`;
    /// for the final undelimited statement it is the buffer length.
    pub end: usize,
    /// Raw statement text, without the delimiter.
    pub text: &'a str,
    /// Whether the statement was closed by a `;`.
    pub delimited: bool,
}

impl<'a> StatementSpan<'a> {
    /// Statement text with surrounding whitespace removed.
    pub fn trimmed(&self) -> &'a str {
        self.text.trim()
    }

    /// Whether a cursor at `offset` refers to this statement.
    ///
    /// Covers everything from the split point, so a cursor on a header
    /// comment or blank line belongs to the statement below it. A cursor on
    /// the delimiter or right after it still belongs to the statement it
    /// closes.
    pub fn contains(&self, offset: usize) -> bool {
        let last = if self.delimited { self.end + 1 } else { self.end };
        self.region_start <= offset && offset <= last
    }
}

/// Scan `buffer` and return its statements ordered by start offset.
///
/// Regions holding only whitespace or comments (for example between `;;`)
/// produce no span.
pub fn scan(buffer: &str) -> Vec<StatementSpan<'_>> {
    let bytes = buffer.as_bytes();
    let n = bytes.len();
    let mut spans = Vec::new();
    let mut state = ScanState::Normal;
    // Just past the last delimiter in ordinary text.
    let mut split = 0;
    // First content byte of the statement being read, if any yet.
    let mut content_start: Option<usize> = None;
    let mut i = 0;

    while i < n {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();

        match state {
            ScanState::InBlockComment => {
                if c == b'*' && next == Some(b'/') {
                    state = ScanState::Normal;
                    i += 1;
                }
            }
            ScanState::InLineComment => {
                if c == b'\n' || c == b'\r' {
                    state = ScanState::Normal;
                }
            }
            ScanState::InSingleQuotedString => {
                if c == b'\'' && !escaped(bytes, i) {
                    state = ScanState::Normal;
                }
            }
            ScanState::InDoubleQuotedString => {
                if c == b'"' && !escaped(bytes, i) {
                    state = ScanState::Normal;
                }
            }
            ScanState::Normal => match (c, next) {
                (b'/', Some(b'*')) => {
                    state = ScanState::InBlockComment;
                    i += 1;
                }
                (b'-', Some(b'-')) => {
                    state = ScanState::InLineComment;
                    i += 1;
                }
                (b';', _) => {
                    if let Some(start) = content_start.take() {
                        spans.push(StatementSpan {
                            region_start: split,
                            start,
                            end: i,
                            text: &buffer[start..i],
                            delimited: true,
                        });
                    }
                    split = i + 1;
                }
                (b'\'', _) => {
                    content_start.get_or_insert(i);
                    state = ScanState::InSingleQuotedString;
                }
                (b'"', _) => {
                    content_start.get_or_insert(i);
                    state = ScanState::InDoubleQuotedString;
                }
                (c, _) if c.is_ascii_whitespace() => {}
                _ => {
                    content_start.get_or_insert(i);
                }
            },
        }

        i += 1;
    }

    if let Some(start) = content_start {
        spans.push(StatementSpan {
            region_start: split,
            start,
            end: n,
            text: &buffer[start..],
            delimited: false,
        });
    }

    spans
}

/// A quote is escaped when the byte right before it is a backslash.
///
/// This is the single-backslash rule only; doubled quotes (`''`) are read as
/// a close followed by a reopen, which splits the same way.
fn escaped(bytes: &[u8], i: usize) -> bool {
    i > 0 && bytes[i - 1] == b'\\'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(buffer: &str) -> Vec<&str> {
        scan(buffer).iter().map(|s| s.trimmed()).collect()
    }

    #[test]
    fn test_single_statement_without_delimiter() {
        let spans = scan("SELECT * FROM users");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "SELECT * FROM users");
        assert_eq!((spans[0].start, spans[0].end), (0, 19));
        assert!(!spans[0].delimited);
    }

    #[test]
    fn test_multiple_statements() {
        let buffer = "SELECT * FROM users;\nSELECT * FROM orders;\nSELECT * FROM products";
        assert_eq!(
            texts(buffer),
            vec!["SELECT * FROM users", "SELECT * FROM orders", "SELECT * FROM products"]
        );
    }

    #[test]
    fn test_span_offsets_exclude_delimiter_and_leading_whitespace() {
        let spans = scan("SELECT 1;\nSELECT 2");
        assert_eq!((spans[0].start, spans[0].end), (0, 8));
        assert_eq!(spans[0].text, "SELECT 1");
        assert!(spans[0].delimited);
        assert_eq!((spans[1].start, spans[1].end), (10, 18));
        assert_eq!(spans[1].text, "SELECT 2");
        assert!(!spans[1].delimited);
    }

    #[test]
    fn test_region_starts_at_split_point() {
        let buffer = "SELECT 1;;
-- header
SELECT 2";
        let spans = scan(buffer);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].region_start, 0);
        // The empty statement between `;;` still moves the split point.
        assert_eq!(spans[1].region_start, 10);
        assert_eq!(spans[1].trimmed(), "SELECT 2");

        assert!(spans[0].contains(8) && spans[0].contains(9));
        assert!(!spans[0].contains(10));
        assert!(spans[1].contains(10) && spans[1].contains(14));
        assert!(spans[1].contains(buffer.len()));
    }

    #[test]
    fn test_semicolon_in_single_quoted_string() {
        let spans = scan("SELECT * FROM t WHERE name = 'a;b'");
        assert_eq!(spans.len(), 1);
        assert!(spans[0].text.contains("a;b"));
    }

    #[test]
    fn test_semicolon_in_double_quoted_string() {
        assert_eq!(
            texts(r#"SELECT "x;y" AS c; SELECT 2"#),
            vec![r#"SELECT "x;y" AS c"#, "SELECT 2"]
        );
    }

    #[test]
    fn test_backslash_escaped_quote_stays_in_string() {
        let buffer = r"SELECT 'it\'s;fine'; SELECT 2";
        assert_eq!(texts(buffer), vec![r"SELECT 'it\'s;fine'", "SELECT 2"]);
    }

    #[test]
    fn test_doubled_quote_escape_still_protects_semicolon() {
        assert_eq!(texts("SELECT 'it''s;x'; SELECT 2"), vec!["SELECT 'it''s;x'", "SELECT 2"]);
    }

    #[test]
    fn test_statement_may_open_with_a_literal() {
        let spans = scan("'a;b'; SELECT 2");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "'a;b'");
    }

    #[test]
    fn test_line_comment_semicolon_joins_lines_into_one_statement() {
        let spans = scan("SELECT * FROM users -- note ; here\nSELECT * FROM orders");
        // Intentionally one span, not two: the only `;` is inside the comment
        // and only a delimiter in ordinary text ends a statement. Separate
        // statements need a `;` before the comment.
        assert_eq!(spans.len(), 1);
        assert!(spans[0].text.contains("-- note ; here"));

        let spans = scan("SELECT * FROM users; -- note ; here\nSELECT * FROM orders");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].text, "SELECT * FROM orders");
    }

    #[test]
    fn test_line_comment_ends_on_carriage_return() {
        assert_eq!(texts("SELECT 1 -- c\r;SELECT 2"), vec!["SELECT 1 -- c", "SELECT 2"]);
    }

    #[test]
    fn test_semicolon_in_block_comment() {
        let spans = scan("/* comment ; with ; semicolons */\nSELECT 1");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "SELECT 1");
    }

    #[test]
    fn test_multiline_block_comment_between_statements() {
        let buffer = "SELECT * FROM users;\n/* this is a \nmulti-line ; comment */\nSELECT * FROM orders";
        assert_eq!(texts(buffer), vec!["SELECT * FROM users", "SELECT * FROM orders"]);
    }

    #[test]
    fn test_block_comment_opener_is_not_reused_as_closer() {
        // "/*/" must not close the comment it opens
        assert_eq!(texts("/*/ ; */ SELECT 1"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_unterminated_block_comment_runs_to_end() {
        let spans = scan("SELECT 1; SELECT 2 /* never closed ; x");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].end, 38);
    }

    #[test]
    fn test_unterminated_string_runs_to_end() {
        assert_eq!(scan("SELECT 'abc; SELECT 2").len(), 1);
    }

    #[test]
    fn test_empty_and_whitespace_buffers() {
        assert!(scan("").is_empty());
        assert!(scan("   \n\t ").is_empty());
        assert!(scan(";;  ;\n").is_empty());
    }

    #[test]
    fn test_whitespace_only_regions_are_skipped() {
        assert_eq!(texts("SELECT 1;  ;\n;SELECT 2;   "), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_comment_only_buffer_has_no_statements() {
        assert!(scan("-- comment 1\n/* comment 2 */").is_empty());
        assert_eq!(scan("SELECT 1; -- trailing note").len(), 1);
    }

    #[test]
    fn test_mixed_buffer() {
        let buffer = "
-- users
SELECT * FROM users WHERE name = 'Alice;Bob';
/*
multi-line;
comment
*/
SELECT * FROM orders; -- orders;
SELECT 'test;value' AS col
";
        assert_eq!(
            texts(buffer),
            vec![
                "SELECT * FROM users WHERE name = 'Alice;Bob'",
                "SELECT * FROM orders",
                "SELECT 'test;value' AS col",
            ]
        );
    }

    #[test]
    fn test_multibyte_text_keeps_valid_offsets() {
        let buffer = "SELECT '蜂;巢' AS 名; SELECT 2";
        let spans = scan(buffer);
        assert_eq!(spans.len(), 2);
        for span in &spans {
            assert_eq!(&buffer[span.start..span.end], span.text);
        }
    }

    #[test]
    fn test_scan_is_deterministic() {
        let buffer = "SELECT 1; /* x; */ SELECT 'a;' ; -- y;\nSELECT 3";
        assert_eq!(scan(buffer), scan(buffer));
    }

    #[test]
    fn test_spans_are_ordered_and_disjoint() {
        let buffer = "a;b;; 'c;d' ; /* e; */ f -- g;\n h";
        let spans = scan(buffer);
        assert_eq!(spans.len(), 4);
        for pair in spans.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
        for span in &spans {
            assert_eq!(&buffer[span.start..span.end], span.text);
        }
    }
}
