/*!
Boolean expressions over metadata fields.

The grammar is tiny: atoms of the form `<field>=='<literal>'` or
`<field>=%'<regex>'` combined with `AND`, `OR`, `NOT` and parentheses.
`NOT` binds tightest, then `AND`, then `OR`. An atom fetches every
occurrence of its field, applies the operator per occurrence, then
collapses the counts with the evaluator's [Quantifier]; a field with no
occurrences collapses as zero processed entries.
*/

use std::fmt;

use regex::Regex;

use crate::error::{OaiError, Result};
use crate::metadata::{FieldPath, RecordMetadata};
use crate::model::Quantifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Per-occurrence comparison of an atom.
enum AtomOp {
    /// Exact string equality, `==`.
    Equals,
    /// Regex match, `=%`.
    Matches,
}

#[derive(Debug)]
struct Atom {
    path: FieldPath,
    op: AtomOp,
    literal: String,
    regex: Option<Regex>,
}

impl Atom {
    fn evaluate(&self, metadata: &RecordMetadata, quantifier: Quantifier) -> bool {
        let occurrences = metadata.field_occurrences(&self.path);
        let total = occurrences.len();
        let valid = occurrences
            .iter()
            .filter(|value| match self.op {
                AtomOp::Equals => value.as_str() == self.literal,
                AtomOp::Matches => self
                    .regex
                    .as_ref()
                    .map(|regex| regex.is_match(value))
                    .unwrap_or(false),
            })
            .count();
        quantifier.evaluate(valid, total)
    }
}

#[derive(Debug)]
enum Expr {
    Atom(Atom),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn evaluate(&self, metadata: &RecordMetadata, quantifier: Quantifier) -> bool {
        match self {
            Expr::Atom(atom) => atom.evaluate(metadata, quantifier),
            Expr::Not(inner) => !inner.evaluate(metadata, quantifier),
            // Short-circuit is allowed by the contract.
            Expr::And(left, right) => {
                left.evaluate(metadata, quantifier) && right.evaluate(metadata, quantifier)
            }
            Expr::Or(left, right) => {
                left.evaluate(metadata, quantifier) || right.evaluate(metadata, quantifier)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Atom {
        field: String,
        op: AtomOp,
        literal: String,
    },
}

struct Tokenizer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Tokenizer {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn error(&self, message: impl fmt::Display) -> OaiError {
        OaiError::Expression(format!("{} in expression `{}`", message, self.input))
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&(start, c)) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '(' => {
                    self.chars.next();
                    tokens.push(Token::Open);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::Close);
                }
                _ => {
                    let word = self.take_while(|c| {
                        !c.is_whitespace() && c != '(' && c != ')' && c != '='
                    });
                    match word.as_str() {
                        "AND" => tokens.push(Token::And),
                        "OR" => tokens.push(Token::Or),
                        "NOT" => tokens.push(Token::Not),
                        "" => return Err(self.error(format!("unexpected character at {}", start))),
                        field => tokens.push(self.atom(field.to_owned())?),
                    }
                }
            }
        }
        Ok(tokens)
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if keep(c) {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }

    fn atom(&mut self, field: String) -> Result<Token> {
        let op = match (self.chars.next(), self.chars.next()) {
            (Some((_, '=')), Some((_, '='))) => AtomOp::Equals,
            (Some((_, '=')), Some((_, '%'))) => AtomOp::Matches,
            _ => return Err(self.error(format!("expected == or =% after field `{}`", field))),
        };
        match self.chars.next() {
            Some((_, '\'')) => {}
            _ => return Err(self.error("expected quoted literal")),
        }
        let mut literal = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, escaped)) => literal.push(escaped),
                    None => return Err(self.error("unterminated escape in literal")),
                },
                Some((_, '\'')) => break,
                Some((_, c)) => literal.push(c),
                None => return Err(self.error("unterminated literal")),
            }
        }
        Ok(Token::Atom { field, op, literal })
    }
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
    peeked: Option<Token>,
    source: String,
}

impl Parser {
    fn peek(&mut self) -> Option<&Token> {
        if self.peeked.is_none() {
            self.peeked = self.tokens.next();
        }
        self.peeked.as_ref()
    }

    fn next(&mut self) -> Option<Token> {
        self.peeked.take().or_else(|| self.tokens.next())
    }

    fn error(&self, message: impl fmt::Display) -> OaiError {
        OaiError::Expression(format!("{} in expression `{}`", message, self.source))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.parse_unary()?))),
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(self.error("expected closing parenthesis")),
                }
            }
            Some(Token::Atom { field, op, literal }) => {
                let regex = match op {
                    AtomOp::Matches => Some(
                        Regex::new(&literal)
                            .map_err(|err| self.error(format!("invalid regex: {}", err)))?,
                    ),
                    AtomOp::Equals => None,
                };
                Ok(Expr::Atom(Atom {
                    path: FieldPath::parse(&field),
                    op,
                    literal,
                    regex,
                }))
            }
            Some(token) => Err(self.error(format!("unexpected token {:?}", token))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[derive(Debug)]
/// A parsed, ready-to-evaluate field expression.
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parse an expression, compiling any `=%` regexes up front.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = Tokenizer::new(source).tokenize()?;
        let mut parser = Parser {
            tokens: tokens.into_iter(),
            peeked: None,
            source: source.to_owned(),
        };
        let root = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(OaiError::Expression(format!(
                "trailing tokens in expression `{}`",
                source
            )));
        }
        Ok(Expression {
            source: source.to_owned(),
            root,
        })
    }

    /// Evaluate against a record's metadata, collapsing per-occurrence
    /// outcomes with the given quantifier.
    pub fn evaluate(&self, metadata: &RecordMetadata, quantifier: Quantifier) -> bool {
        self.root.evaluate(metadata, quantifier)
    }

    /// The source text the expression was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }
}
