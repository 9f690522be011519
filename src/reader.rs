//! Reading starts where the lexer leaves off: it nests tokens into [`Value`] forms.
//!
//! Parenthesised and bracketed tuples remember their source span, which the
//! compiler later attaches to instructions and diagnostics.
use std::{iter::Peekable, rc::Rc};

use logos::SpannedIter;

use crate::{
    lexer::{LexerError, Span, Token},
    value::{Struct, Table, Tuple, TupleKind, Value},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("{error}")]
    Lexer { error: LexerError, span: Span },
    #[error("unexpected closing delimiter")]
    UnexpectedClose { span: Span },
    #[error("mismatched delimiter, expected `{expected}`")]
    Mismatched { expected: char, span: Span },
    #[error("unterminated form")]
    Unterminated { span: Span },
    #[error("odd number of entries in dictionary literal")]
    OddEntries { span: Span },
    #[error("expected a form after quote")]
    DanglingQuote { span: Span },
}

impl ReadError {
    pub fn span(&self) -> Span {
        match self {
            Self::Lexer { span, .. }
            | Self::UnexpectedClose { span }
            | Self::Mismatched { span, .. }
            | Self::Unterminated { span }
            | Self::OddEntries { span }
            | Self::DanglingQuote { span } => span.clone(),
        }
    }
}

/// Reads every top-level form in `source`.
pub fn read(source: &str) -> Result<Vec<Value>, ReadError> {
    Reader::new(source).collect()
}

pub struct Reader<'src> {
    tokens: Peekable<SpannedIter<'src, Token>>,
}

#[derive(Clone, Copy)]
enum Closer {
    Paren,
    Bracket,
    Brace,
}

impl Closer {
    fn of(token: &Token) -> Option<Self> {
        match token {
            Token::RParen => Some(Self::Paren),
            Token::RBracket => Some(Self::Bracket),
            Token::RBrace => Some(Self::Brace),
            _ => None,
        }
    }

    fn char(self) -> char {
        match self {
            Self::Paren => ')',
            Self::Bracket => ']',
            Self::Brace => '}',
        }
    }
}

impl<'src> Reader<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            tokens: Token::lexer(source).spanned().peekable(),
        }
    }

    fn next_form(&mut self) -> Result<Option<(Value, Span)>, ReadError> {
        let Some((token, span)) = self.tokens.next() else {
            return Ok(None);
        };
        let token = token.map_err(|error| ReadError::Lexer {
            error,
            span: span.clone(),
        })?;

        let form = match token {
            Token::Nil => (Value::Nil, span),
            Token::Boolean(b) => (Value::Boolean(b), span),
            Token::Number(n) => (Value::Number(n), span),
            Token::String(s) => (Value::String(Rc::from(s)), span),
            Token::Symbol(s) => (Value::symbol(&s), span),
            Token::Quote => {
                let Some((quoted, quoted_span)) = self.next_form()? else {
                    return Err(ReadError::DanglingQuote { span });
                };
                let span = span.start..quoted_span.end;
                let tuple = Tuple::new([Value::symbol("quote"), quoted], TupleKind::Parens)
                    .with_span(span.clone());
                (Value::Tuple(tuple), span)
            }
            Token::LParen => {
                let (items, span) = self.read_until(Closer::Paren, span)?;
                let tuple = Tuple::new(items, TupleKind::Parens).with_span(span.clone());
                (Value::Tuple(tuple), span)
            }
            Token::LBracket => {
                let (items, span) = self.read_until(Closer::Bracket, span)?;
                let tuple = Tuple::new(items, TupleKind::Brackets).with_span(span.clone());
                (Value::Tuple(tuple), span)
            }
            Token::AtLParen => {
                let (items, span) = self.read_until(Closer::Paren, span)?;
                (Value::array(items), span)
            }
            Token::AtLBracket => {
                let (items, span) = self.read_until(Closer::Bracket, span)?;
                (Value::array(items), span)
            }
            Token::LBrace => {
                let (pairs, span) = self.read_pairs(span)?;
                (Value::Struct(Struct::from_pairs(pairs)), span)
            }
            Token::AtLBrace => {
                let (pairs, span) = self.read_pairs(span)?;
                (Value::Table(pairs.into_iter().collect::<Table>()), span)
            }
            Token::RParen | Token::RBracket | Token::RBrace => {
                return Err(ReadError::UnexpectedClose { span })
            }
        };
        Ok(Some(form))
    }

    // reads forms up to and including the closing delimiter, returning the span of the whole form
    fn read_until(&mut self, closer: Closer, open: Span) -> Result<(Vec<Value>, Span), ReadError> {
        let mut items = vec![];
        loop {
            match self.tokens.peek() {
                None => return Err(ReadError::Unterminated { span: open }),
                Some((Ok(token), span)) if Closer::of(token).is_some() => {
                    let found = Closer::of(token).map(Closer::char);
                    let span = span.clone();
                    _ = self.tokens.next();
                    return if found == Some(closer.char()) {
                        Ok((items, open.start..span.end))
                    } else {
                        Err(ReadError::Mismatched {
                            expected: closer.char(),
                            span,
                        })
                    };
                }
                Some(_) => {
                    if let Some((form, _)) = self.next_form()? {
                        items.push(form);
                    }
                }
            }
        }
    }

    fn read_pairs(&mut self, open: Span) -> Result<(Vec<(Value, Value)>, Span), ReadError> {
        let (items, span) = self.read_until(Closer::Brace, open)?;
        if items.len() % 2 != 0 {
            return Err(ReadError::OddEntries { span });
        }
        let pairs = items
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Ok((pairs, span))
    }
}

impl<'src> Iterator for Reader<'src> {
    type Item = Result<Value, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_form()
            .map(|form| form.map(|(value, _)| value))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::{read, ReadError};
    use crate::{
        lexer::LexerError,
        value::{TupleKind, Value},
    };
    use assert2::{check, let_assert};

    #[test]
    fn nested_forms() {
        let_assert!(Ok(forms) = read("(def x [1 @[2] {:a 3}]) 'y"));
        check!(forms.len() == 2);
        check!(forms[0].to_string() == "(def x [1 @[2] {:a 3}])");
        check!(forms[1] == Value::list([Value::symbol("quote"), Value::symbol("y")]));
    }

    #[test]
    fn tuple_kinds_and_spans() {
        let_assert!(Ok(forms) = read("  (f [a])"));
        let_assert!(Value::Tuple(call) = &forms[0]);
        check!(call.kind() == TupleKind::Parens);
        check!(call.span() == Some(2..9));
        let_assert!(Value::Tuple(params) = &call.items()[1]);
        check!(params.kind() == TupleKind::Brackets);
        check!(params.span() == Some(5..8));
    }

    #[test]
    fn tables_read_fresh() {
        let_assert!(Ok(forms) = read("@{:a 1 :b 2}"));
        let_assert!(Value::Table(table) = &forms[0]);
        check!(table.get(&Value::symbol(":b")) == Some(Value::Number(2.0)));
    }

    #[test]
    fn errors() {
        check!(read("(a b") == Err(ReadError::Unterminated { span: 0..1 }));
        check!(read("a)") == Err(ReadError::UnexpectedClose { span: 1..2 }));
        check!(
            read("(a]")
                == Err(ReadError::Mismatched {
                    expected: ')',
                    span: 2..3
                })
        );
        check!(read("{:a}") == Err(ReadError::OddEntries { span: 0..4 }));
        check!(read("'") == Err(ReadError::DanglingQuote { span: 0..1 }));
        check!(
            read("\"oops")
                == Err(ReadError::Lexer {
                    error: LexerError::UnterminatedString,
                    span: 0..5
                })
        );
    }
}
