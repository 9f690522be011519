pub use logos::Span;
use logos::{Lexer, Logos};

// reads hex escapes in the form `xHH` and outputs the corresponding character
fn read_hex_escape(
    iter: &mut std::iter::Peekable<impl Iterator<Item = char>>,
) -> Result<char, LexerError> {
    // consume the x
    let _ = iter.next();

    let mut char_code = 0u32;
    for _ in 0..2 {
        let digit = iter
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or(LexerError::MalformedString)?;
        char_code = char_code * 16 + digit;
    }
    char::from_u32(char_code).ok_or(LexerError::InvalidCodepoint(char_code))
}

fn process_string(lexer: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    let slice = lexer.slice();
    let mut string = String::with_capacity(slice.len());

    // Skip the opening quote
    let mut chars = slice.chars().skip(1).peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.peek().copied() {
                Some('x') => string.push(read_hex_escape(&mut chars)?),
                Some(esc) => {
                    string.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        'e' => '\x1b',
                        '"' => '"',
                        '\\' => '\\',
                        other => Err(LexerError::InvalidEscape(other))?,
                    });
                    _ = chars.next(); // consume
                }
                None => Err(LexerError::MalformedString)?,
            },
            c => string.push(c),
        }
    }

    Ok(Box::from(string.as_str()))
}

fn unterminated_string(_lexer: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    Err(LexerError::UnterminatedString)
}

fn read_decimal(lexer: &mut Lexer<Token>) -> Result<f64, LexerError> {
    lexer
        .slice()
        .parse::<f64>()
        .map_err(|_| LexerError::MalformedNumber)
}

fn read_hex(lexer: &mut Lexer<Token>) -> Result<f64, LexerError> {
    let slice = lexer.slice();
    let (is_neg, digits) = match slice.as_bytes().first() {
        Some(b'-') => (true, &slice[3..]),
        Some(b'+') => (false, &slice[3..]),
        _ => (false, &slice[2..]),
    };
    let value = i64::from_str_radix(digits, 16).map_err(|_| LexerError::NumberTooBig)?;
    // f64 only represents integers exactly up to 2^53
    if value > (1i64 << 53) {
        return Err(LexerError::NumberTooBig);
    }
    let value = value as f64;
    Ok(if is_neg { -value } else { value })
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("invalid Unicode codepoint: {0}")]
    InvalidCodepoint(u32),
    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char),
    #[error("malformed string")]
    MalformedString,
    #[error("unterminated string")]
    UnterminatedString,
    #[error("malformed number")]
    MalformedNumber,
    #[error("number literal too big")]
    NumberTooBig,
}

/// Tokens of the surface syntax. Whitespace, commas and `#` comments are skipped.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n,]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("@(")]
    AtLParen,
    #[token("@[")]
    AtLBracket,
    #[token("@{")]
    AtLBrace,
    #[token("'")]
    Quote,

    #[token("nil")]
    Nil,
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Boolean(bool),

    #[regex(r"[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+)?", read_decimal, priority = 3)]
    #[regex(r"[+-]?0x[0-9a-fA-F]+", read_hex, priority = 4)]
    Number(f64),

    #[regex(r#""([^"\\]|\\.)*""#, process_string)]
    #[regex(r#""([^"\\]|\\.)*"#, unterminated_string)]
    String(Box<str>),

    #[regex(r"[a-zA-Z0-9!$%&*+\-./:<=>?^_|]+", |l| Box::from(l.slice()))]
    Symbol(Box<str>),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

#[cfg(test)]
mod tests {
    use super::{LexerError, Token};
    use arbtest::arbtest;
    use assert2::{assert, check, let_assert};

    fn tokens(source: &str) -> Vec<Result<Token, LexerError>> {
        Token::lexer(source).collect()
    }

    #[test]
    fn delimiters() {
        check!(
            tokens("( ) [ ] { } @( @[ @{ '")
                == vec![
                    Ok(Token::LParen),
                    Ok(Token::RParen),
                    Ok(Token::LBracket),
                    Ok(Token::RBracket),
                    Ok(Token::LBrace),
                    Ok(Token::RBrace),
                    Ok(Token::AtLParen),
                    Ok(Token::AtLBracket),
                    Ok(Token::AtLBrace),
                    Ok(Token::Quote),
                ]
        );
    }

    #[test]
    fn symbol_checklist() {
        macro_rules! test_symbol {
            ($source:literal) => {{
                let mut lexer = Token::lexer($source);
                let token = lexer.next();
                let_assert!(Some(Ok(Token::Symbol(s))) = token);
                assert!(s.as_ref() == $source);
                assert!(lexer.next() == None);
            }};
        }

        test_symbol!(":=");
        test_symbol!("&");
        test_symbol!("+");
        test_symbol!("-");
        test_symbol!("...");
        test_symbol!("<=");
        test_symbol!("nil?");
        test_symbol!("falsey");
        test_symbol!(":value");
        test_symbol!("1st");
    }

    #[test]
    fn literals() {
        check!(tokens("nil") == vec![Ok(Token::Nil)]);
        check!(tokens("true false") == vec![Ok(Token::Boolean(true)), Ok(Token::Boolean(false))]);
        check!(tokens("42") == vec![Ok(Token::Number(42.0))]);
        check!(tokens("-1.5e2") == vec![Ok(Token::Number(-150.0))]);
        check!(tokens(".25") == vec![Ok(Token::Number(0.25))]);
        check!(tokens("0x1F") == vec![Ok(Token::Number(31.0))]);
        check!(tokens("-0x10") == vec![Ok(Token::Number(-16.0))]);
    }

    #[test]
    fn strings() {
        macro_rules! test_string {
            ($source:literal => $target:literal) => {{
                let token = Token::lexer($source).next();
                let_assert!(Some(Ok(Token::String(bs))) = token);
                check!(bs.as_ref() == $target);
            }};
        }

        test_string!(r#""plain""# => "plain");
        test_string!(r#""tab\tnew\nline""# => "tab\tnew\nline");
        test_string!(r#""quote \" and \\""# => "quote \" and \\");
        test_string!(r#""\x41\x62""# => "Ab");
        test_string!("\"multi\nline\"" => "multi\nline");
    }

    #[test]
    fn string_errors() {
        check!(Token::lexer(r#""bad \q""#).next() == Some(Err(LexerError::InvalidEscape('q'))));
        check!(Token::lexer(r#""open"#).next() == Some(Err(LexerError::UnterminatedString)));
    }

    #[test]
    fn trivia_is_skipped() {
        check!(
            tokens("(a, b) # trailing comment\n c")
                == vec![
                    Ok(Token::LParen),
                    Ok(Token::Symbol("a".into())),
                    Ok(Token::Symbol("b".into())),
                    Ok(Token::RParen),
                    Ok(Token::Symbol("c".into())),
                ]
        );
    }

    #[test]
    fn integers_roundtrip() {
        arbtest(|u| {
            let number: i32 = u.arbitrary()?;
            let source = number.to_string();
            check!(
                tokens(&source) == vec![Ok(Token::Number(f64::from(number)))],
                "`{source}` does not roundtrip"
            );
            Ok(())
        });
    }
}
