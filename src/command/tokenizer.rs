use crate::error::ParseError;

/// Splits a request line into shell-style tokens.
///
/// Supports single- and double-quoted spans, backslash escapes inside
/// double quotes, and a `#` that introduces an end-of-line comment when
/// it starts a token outside of quotes. Mirrors Python's
/// `shlex.split(cmd, comments=True)`, hand-rolled as a byte scanner
/// rather than pulling in a shlex crate.
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if bytes[i] == b'#' {
            break;
        }

        let mut token = Vec::new();
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            match bytes[i] {
                b'"' => {
                    i += 1;
                    loop {
                        if i >= bytes.len() {
                            return Err(ParseError::UnterminatedQuote);
                        }
                        match bytes[i] {
                            b'"' => {
                                i += 1;
                                break;
                            }
                            b'\\' if i + 1 < bytes.len() => {
                                token.push(bytes[i + 1]);
                                i += 2;
                            }
                            b => {
                                token.push(b);
                                i += 1;
                            }
                        }
                    }
                }
                b'\'' => {
                    i += 1;
                    loop {
                        if i >= bytes.len() {
                            return Err(ParseError::UnterminatedQuote);
                        }
                        match bytes[i] {
                            b'\'' => {
                                i += 1;
                                break;
                            }
                            b => {
                                token.push(b);
                                i += 1;
                            }
                        }
                    }
                }
                b => {
                    token.push(b);
                    i += 1;
                }
            }
        }
        tokens.push(String::from_utf8_lossy(&token).into_owned());
    }

    Ok(tokens)
}

/// True if `s` needs quoting to survive a `tokenize` round-trip.
fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '#' || c == '\\')
}

/// Inverse of `tokenize` for a single token: quotes and escapes `s` so that
/// `tokenize` applied to the result yields `s` back unchanged. Used by the
/// durability log writer to build reparseable canonical command lines.
pub fn quote_token(s: &str) -> String {
    if !needs_quoting(s) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokenize("SET x hello").unwrap(), vec!["SET", "x", "hello"]);
    }

    #[test]
    fn handles_double_quotes_with_spaces() {
        assert_eq!(
            tokenize(r#"SET x "hello world""#).unwrap(),
            vec!["SET", "x", "hello world"]
        );
    }

    #[test]
    fn handles_single_quotes() {
        assert_eq!(
            tokenize("SET x 'hello world'").unwrap(),
            vec!["SET", "x", "hello world"]
        );
    }

    #[test]
    fn strips_comments() {
        assert_eq!(
            tokenize("SET x hello # a trailing comment").unwrap(),
            vec!["SET", "x", "hello"]
        );
    }

    #[test]
    fn full_line_comment_yields_no_tokens() {
        assert_eq!(tokenize("# just a comment").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn backslash_escape_inside_double_quotes() {
        assert_eq!(
            tokenize(r#"SET x "a \"quoted\" word""#).unwrap(),
            vec!["SET", "x", r#"a "quoted" word"#]
        );
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert_eq!(tokenize(r#"SET x "unterminated"#), Err(ParseError::UnterminatedQuote));
    }

    #[test]
    fn empty_line_yields_no_tokens() {
        assert_eq!(tokenize("").unwrap(), Vec::<String>::new());
        assert_eq!(tokenize("   ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn quote_token_round_trips_through_tokenize() {
        for raw in ["plain", "has space", "has\"quote", "has\\backslash", ""] {
            let quoted = quote_token(raw);
            let line = format!("CMD {quoted}");
            assert_eq!(tokenize(&line).unwrap(), vec!["CMD".to_string(), raw.to_string()]);
        }
    }

    #[test]
    fn quote_token_leaves_plain_tokens_unquoted() {
        assert_eq!(quote_token("plain"), "plain");
    }
}
