use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{Error, Result};
use crate::query::{CompareOp, LogicalOp, Query, QueryNode, QueryTree};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Compare(CompareOp, bool),
    Logical(LogicalOp),
    Open,
    Close,
}

fn malformed(msg: String) -> Error {
    Error::MalformedQuery(msg)
}

struct Lexer<'a> {
    text: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer {
            text,
            chars: text.char_indices().peekable(),
        }
    }

    fn eat(&mut self, c: char) -> bool {
        match self.chars.peek() {
            Some(&(_, next)) if next == c => {
                self.chars.next();
                true
            }
            _ => false,
        }
    }

    fn tokens(mut self) -> Result<Vec<(usize, Token)>> {
        let mut out = Vec::new();
        while let Some((at, c)) = self.chars.next() {
            let token = match c {
                c if c.is_whitespace() => continue,
                '(' => Token::Open,
                ')' => Token::Close,
                '=' => {
                    self.eat('=');
                    Token::Compare(CompareOp::Eq, false)
                }
                '!' => {
                    if !self.eat('=') {
                        return Err(malformed(format!("expected '=' after '!' at offset {}", at)));
                    }
                    Token::Compare(CompareOp::Eq, true)
                }
                '<' => {
                    if self.eat('=') {
                        Token::Compare(CompareOp::Le, false)
                    } else if self.eat('>') {
                        Token::Compare(CompareOp::Eq, true)
                    } else {
                        Token::Compare(CompareOp::Lt, false)
                    }
                }
                '>' => {
                    if self.eat('=') {
                        Token::Compare(CompareOp::Ge, false)
                    } else {
                        Token::Compare(CompareOp::Gt, false)
                    }
                }
                '\'' | '"' => Token::Quoted(self.quoted(at, c)?),
                _ => self.word(at),
            };
            out.push((at, token));
        }
        Ok(out)
    }

    fn quoted(&mut self, start: usize, quote: char) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, escaped)) => text.push(escaped),
                    None => break,
                },
                Some((_, c)) if c == quote => return Ok(text),
                Some((_, c)) => text.push(c),
                None => break,
            }
        }
        Err(malformed(format!("unterminated string starting at offset {}", start)))
    }

    fn word(&mut self, start: usize) -> Token {
        let mut end = self.text.len();
        while let Some(&(at, c)) = self.chars.peek() {
            if c.is_whitespace() || "()=<>!'\"".contains(c) {
                end = at;
                break;
            }
            self.chars.next();
        }
        let word = &self.text[start..end];
        if word.eq_ignore_ascii_case("and") {
            Token::Logical(LogicalOp::And)
        } else if word.eq_ignore_ascii_case("or") {
            Token::Logical(LogicalOp::Or)
        } else if word.eq_ignore_ascii_case("not") {
            Token::Logical(LogicalOp::Not)
        } else {
            Token::Word(word.to_string())
        }
    }
}

/// Deepest allowed nesting of `NOT` and parentheses
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    len: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.len, |(at, _)| *at)
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(malformed(format!(
                "nesting deeper than {} at offset {}",
                MAX_DEPTH,
                self.offset()
            )));
        }
        Ok(())
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    /// A chain of `op`-joined operands, flattened into one node
    fn chain<F>(&mut self, op: LogicalOp, mut operand: F) -> Result<QueryTree>
    where
        F: FnMut(&mut Self) -> Result<QueryTree>,
    {
        let first = operand(self)?;
        let mut args = vec![first];
        while self.peek() == Some(&Token::Logical(op)) {
            self.pos += 1;
            args.push(operand(self)?);
        }
        if args.len() == 1 {
            return Ok(args.remove(0));
        }
        Ok(QueryTree::with_children(QueryNode::logical(op), args))
    }

    fn or_expr(&mut self) -> Result<QueryTree> {
        self.chain(LogicalOp::Or, Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<QueryTree> {
        self.chain(LogicalOp::And, Self::not_expr)
    }

    fn not_expr(&mut self) -> Result<QueryTree> {
        if self.peek() == Some(&Token::Logical(LogicalOp::Not)) {
            self.pos += 1;
            self.descend()?;
            let arg = self.not_expr()?;
            self.depth -= 1;
            return Ok(Query::new_not_node(arg));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<QueryTree> {
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            self.descend()?;
            let inner = self.or_expr()?;
            self.depth -= 1;
            let at = self.offset();
            return match self.next() {
                Some(Token::Close) => Ok(inner),
                _ => Err(malformed(format!("expected ')' at offset {}", at))),
            };
        }
        let lhs = self.operand()?;
        let at = self.offset();
        let (op, negated) = match self.next() {
            Some(Token::Compare(op, negated)) => (op, negated),
            _ => return Err(malformed(format!("expected comparison operator at offset {}", at))),
        };
        let rhs = self.operand()?;
        Ok(if negated {
            Query::new_negated_operator_node(op, lhs, rhs)
        } else {
            Query::new_operator_node(op, lhs, rhs)
        })
    }

    fn operand(&mut self) -> Result<QueryTree> {
        let at = self.offset();
        match self.next() {
            Some(Token::Word(word)) => Ok(QueryNode::value(word).into()),
            Some(Token::Quoted(text)) => Ok(QueryNode::quoted(text).into()),
            Some(other) => Err(malformed(format!("unexpected {:?} at offset {}", other, at))),
            None => Err(malformed("unexpected end of query".to_string())),
        }
    }
}

/// Parse an infix filter such as `age >= 30 AND NOT (name = 'bob' OR city <> paris)`.
///
/// Keywords are case-insensitive. `!=` and `<>` produce a negated `=` node.
/// Bare words become unquoted value nodes that the scanner resolves to
/// fields by name; quoted strings are always literals.
pub fn parse_query(text: &str) -> Result<Query> {
    let tokens = Lexer::new(text).tokens()?;
    if tokens.is_empty() {
        return Err(malformed("empty query".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: text.len(),
        depth: 0,
    };
    let root = parser.or_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(malformed(format!("trailing input at offset {}", parser.offset())));
    }
    Ok(Query::with_clause(root))
}
