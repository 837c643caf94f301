//! Tokenizer for the expression language.

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Uint(u64),
    Double(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, String> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let after_dot = matches!(tokens.last(), Some(Spanned { token: Token::Dot, .. }));
        let peek = chars.get(i + 1).map(|(_, c)| *c);

        let token = if is_ident_start(c) || (after_dot && c.is_ascii_digit()) {
            // Digits directly after a dot are key segments such as `req.1`.
            let start = i;
            while i < chars.len() && is_ident_char(chars[i].1) {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|(_, c)| c).collect();
            let token = match word.as_str() {
                "true" if !after_dot => Token::True,
                "false" if !after_dot => Token::False,
                "null" if !after_dot => Token::Null,
                "in" if !after_dot => Token::In,
                _ => Token::Ident(word),
            };
            tokens.push(Spanned { token, offset });
            continue;
        } else if c.is_ascii_digit() {
            let (token, next) = lex_number(&chars, i)?;
            i = next;
            tokens.push(Spanned { token, offset });
            continue;
        } else if c == '"' || c == '\'' {
            let (token, next) = lex_string(&chars, i)?;
            i = next;
            tokens.push(Spanned { token, offset });
            continue;
        } else {
            match (c, peek) {
                ('&', Some('&')) => Some((Token::AndAnd, 2)),
                ('|', Some('|')) => Some((Token::OrOr, 2)),
                ('=', Some('=')) => Some((Token::EqEq, 2)),
                ('!', Some('=')) => Some((Token::Ne, 2)),
                ('<', Some('=')) => Some((Token::Le, 2)),
                ('>', Some('=')) => Some((Token::Ge, 2)),
                ('<', _) => Some((Token::Lt, 1)),
                ('>', _) => Some((Token::Gt, 1)),
                ('!', _) => Some((Token::Not, 1)),
                ('(', _) => Some((Token::LParen, 1)),
                (')', _) => Some((Token::RParen, 1)),
                ('[', _) => Some((Token::LBracket, 1)),
                (']', _) => Some((Token::RBracket, 1)),
                (',', _) => Some((Token::Comma, 1)),
                ('.', _) => Some((Token::Dot, 1)),
                ('?', _) => Some((Token::Question, 1)),
                (':', _) => Some((Token::Colon, 1)),
                ('+', _) => Some((Token::Plus, 1)),
                ('-', _) => Some((Token::Minus, 1)),
                ('*', _) => Some((Token::Star, 1)),
                ('/', _) => Some((Token::Slash, 1)),
                ('%', _) => Some((Token::Percent, 1)),
                _ => None,
            }
        };

        match token {
            Some((token, width)) => {
                tokens.push(Spanned { token, offset });
                i += width;
            }
            None => return Err(format!("unexpected character '{c}' at {offset}")),
        }
    }

    Ok(tokens)
}

fn lex_number(chars: &[(usize, char)], start: usize) -> Result<(Token, usize), String> {
    let mut i = start;
    let digit_at = |i: usize| chars.get(i).is_some_and(|(_, c)| c.is_ascii_digit());

    if chars[i].1 == '0' && matches!(chars.get(i + 1), Some((_, 'x' | 'X'))) {
        i += 2;
        let begin = i;
        while chars.get(i).is_some_and(|(_, c)| c.is_ascii_hexdigit()) {
            i += 1;
        }
        let digits: String = chars[begin..i].iter().map(|(_, c)| c).collect();
        let value = u64::from_str_radix(&digits, 16)
            .map_err(|_| format!("invalid hex literal at {}", chars[start].0))?;
        return finish_integer(chars, start, i, value);
    }

    while digit_at(i) {
        i += 1;
    }
    let mut is_double = false;
    if matches!(chars.get(i), Some((_, '.'))) && digit_at(i + 1) {
        is_double = true;
        i += 1;
        while digit_at(i) {
            i += 1;
        }
    }
    if matches!(chars.get(i), Some((_, 'e' | 'E'))) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some((_, '+' | '-'))) {
            j += 1;
        }
        if digit_at(j) {
            is_double = true;
            i = j;
            while digit_at(i) {
                i += 1;
            }
        }
    }

    let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
    if is_double {
        let value = text
            .parse::<f64>()
            .map_err(|_| format!("invalid number {text} at {}", chars[start].0))?;
        return Ok((Token::Double(value), i));
    }
    let value = text
        .parse::<u64>()
        .map_err(|_| format!("integer literal {text} out of range at {}", chars[start].0))?;
    finish_integer(chars, start, i, value)
}

fn finish_integer(
    chars: &[(usize, char)],
    start: usize,
    end: usize,
    value: u64,
) -> Result<(Token, usize), String> {
    if matches!(chars.get(end), Some((_, 'u' | 'U'))) {
        return Ok((Token::Uint(value), end + 1));
    }
    // i64::MIN is not representable as a positive literal; `-9223372036854775808` is rejected.
    let value = i64::try_from(value)
        .map_err(|_| format!("integer literal out of range at {}", chars[start].0))?;
    Ok((Token::Int(value), end))
}

fn lex_string(chars: &[(usize, char)], start: usize) -> Result<(Token, usize), String> {
    let quote = chars[start].1;
    let mut value = String::new();
    let mut i = start + 1;

    while let Some(&(offset, c)) = chars.get(i) {
        match c {
            c if c == quote => return Ok((Token::Str(value), i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .map(|(_, c)| *c)
                    .ok_or_else(|| format!("unterminated escape at {offset}"))?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    other => return Err(format!("unknown escape \\{other} at {offset}")),
                });
                i += 2;
            }
            c => {
                value.push(c);
                i += 1;
            }
        }
    }

    Err(format!("unterminated string starting at {}", chars[start].0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_dotted_reference_with_numeric_segment() {
        assert_eq!(
            tokens("probe.X.req.1.resp.code"),
            vec![
                Token::Ident("probe".into()),
                Token::Dot,
                Token::Ident("X".into()),
                Token::Dot,
                Token::Ident("req".into()),
                Token::Dot,
                Token::Ident("1".into()),
                Token::Dot,
                Token::Ident("resp".into()),
                Token::Dot,
                Token::Ident("code".into()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokens("12"), vec![Token::Int(12)]);
        assert_eq!(tokens("12u"), vec![Token::Uint(12)]);
        assert_eq!(tokens("1.5"), vec![Token::Double(1.5)]);
        assert_eq!(tokens("2e3"), vec![Token::Double(2000.0)]);
        assert_eq!(tokens("0x1F"), vec![Token::Int(31)]);
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(tokens(r#""a\"b""#), vec![Token::Str("a\"b".into())]);
        assert_eq!(tokens("'single'"), vec![Token::Str("single".into())]);
        assert!(tokenize("\"open").is_err());
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a >= 1 && !b || c != d"),
            vec![
                Token::Ident("a".into()),
                Token::Ge,
                Token::Int(1),
                Token::AndAnd,
                Token::Not,
                Token::Ident("b".into()),
                Token::OrOr,
                Token::Ident("c".into()),
                Token::Ne,
                Token::Ident("d".into()),
            ]
        );
        assert!(tokenize("a # b").is_err());
    }
}
