//! Minimal SQL lexer.
//!
//! Produces the bare words of a statement with their byte spans and
//! parenthesis depth, skipping string literals, quoted identifiers and
//! comments. Enough to find top-level clause keywords without parsing.
//!
//! Constructs the lexer does not model faithfully (dollar quotes, `E''`
//! escape strings, unterminated literals, unbalanced parentheses) are
//! flagged on the [`Scan`] so callers that rewrite SQL can refuse it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    /// Parenthesis nesting at the word; 0 is the outermost statement.
    pub depth: usize,
}

impl Word<'_> {
    pub fn is(&self, keyword: &str) -> bool {
        self.text.eq_ignore_ascii_case(keyword)
    }
}

#[derive(Debug, Default)]
pub struct Scan<'a> {
    pub words: Vec<Word<'a>>,
    /// Byte offsets of `;` outside literals and comments.
    pub semicolons: Vec<usize>,
    pub has_comments: bool,
    /// A `)` without a matching `(`, or a `(` never closed.
    pub unbalanced: bool,
    /// A string, quoted identifier or block comment runs to end of input.
    pub unterminated: bool,
    /// `$$...$$` or `$tag$...$tag$`.
    pub dollar_quotes: bool,
    /// `E'...'`, where backslash escapes the quote.
    pub escape_strings: bool,
}

impl<'a> Scan<'a> {
    pub fn top_level(&self) -> impl Iterator<Item = &Word<'a>> {
        self.words.iter().filter(|w| w.depth == 0)
    }

    /// First construct that makes word positions unreliable for rewriting.
    pub fn rewrite_hazard(&self) -> Option<&'static str> {
        if self.unterminated {
            Some("unterminated literal or comment")
        } else if self.unbalanced {
            Some("unbalanced parentheses")
        } else if self.has_comments {
            Some("comments are not allowed")
        } else if self.dollar_quotes {
            Some("dollar-quoted strings are not allowed")
        } else if self.escape_strings {
            Some("escape strings are not allowed")
        } else {
            None
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

pub fn scan(sql: &str) -> Scan<'_> {
    let bytes = sql.as_bytes();
    let mut out = Scan::default();
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                if quote == b'\''
                    && out
                        .words
                        .last()
                        .is_some_and(|w| w.end == i && w.is("E"))
                {
                    out.escape_strings = true;
                }
                i += 1;
                let mut closed = false;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    out.unterminated = true;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                out.has_comments = true;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out.has_comments = true;
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                if i >= bytes.len() {
                    out.unterminated = true;
                }
                i += 2;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                if depth == 0 {
                    out.unbalanced = true;
                } else {
                    depth -= 1;
                }
                i += 1;
            }
            b';' => {
                out.semicolons.push(i);
                i += 1;
            }
            b if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                // `$` cannot start an identifier; `$1` is a parameter,
                // `$$` or `$tag$` opens a dollar quote.
                if b == b'$' && sql[start + 1..i].contains('$') {
                    out.dollar_quotes = true;
                }
                out.words.push(Word {
                    text: &sql[start..i],
                    start,
                    end: i,
                    depth,
                });
            }
            _ => i += 1,
        }
    }

    if depth != 0 {
        out.unbalanced = true;
    }
    out
}
