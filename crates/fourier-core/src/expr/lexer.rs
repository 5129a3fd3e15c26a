//! Tokenizer for the numeric expression language.

use super::error::{EvalError, EvalResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
}

/// A token with the column it started at, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub column: usize,
}

pub(crate) fn tokenize(input: &str) -> EvalResult<Vec<Spanned>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i + 1;

        if c.is_whitespace() || c == '\\' {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let (value, next) = lex_number(&chars, i)?;
            tokens.push(Spanned {
                token: Token::Num(value),
                column,
            });
            i = next;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(chars[start..i].iter().collect()),
                column,
            });
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            (':', _) => (Token::Colon, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('^', _) => {
                return Err(EvalError::syntax(
                    column,
                    "'^' is bitwise xor; use '**' for powers",
                ))
            }
            _ => {
                return Err(EvalError::syntax(
                    column,
                    format!("unexpected character '{c}'"),
                ))
            }
        };
        tokens.push(Spanned { token, column });
        i += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> EvalResult<(f64, usize)> {
    let mut i = start;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }

    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    text.parse::<f64>()
        .map(|v| (v, i))
        .map_err(|_| EvalError::syntax(start + 1, format!("invalid number '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .expect("tokenize")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_lexes_power_and_floor_division() {
        assert_eq!(
            kinds("t**2 // 3"),
            vec![
                Token::Ident("t".into()),
                Token::DoubleStar,
                Token::Num(2.0),
                Token::DoubleSlash,
                Token::Num(3.0),
            ]
        );
    }

    #[test]
    fn test_lexes_scientific_and_leading_dot() {
        assert_eq!(kinds("1.5e-3 .25"), vec![Token::Num(1.5e-3), Token::Num(0.25)]);
    }

    #[test]
    fn test_rejects_caret() {
        let err = tokenize("t^2").unwrap_err();
        assert!(err.to_string().contains("'**'"));
    }
}
