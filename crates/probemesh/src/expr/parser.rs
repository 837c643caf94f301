//! Recursive descent parser producing the expression tree.
//!
//! Precedence, loosest first: `?:`, `||`, `&&`, relations (`< <= > >= == != in`),
//! `+ -`, `* / %`, unary `! -`, member access and calls.

use super::lexer::{tokenize, Spanned, Token};
use super::value::Value;

/// Deepest nesting accepted before parsing is refused.
pub(crate) const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// A dotted context key such as `probe.X.req.1.resp.code`.
    Reference(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
    Method { target: Box<Expr>, name: String, args: Vec<Expr> },
    Index(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Visit every context reference in the tree.
    pub(crate) fn references<'a>(&'a self, found: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(key) => found.push(key),
            Expr::List(items) | Expr::Call { args: items, .. } => {
                items.iter().for_each(|item| item.references(found))
            }
            Expr::Unary(_, inner) => inner.references(found),
            Expr::Binary(_, left, right)
            | Expr::And(left, right)
            | Expr::Or(left, right)
            | Expr::Index(left, right) => {
                left.references(found);
                right.references(found);
            }
            Expr::Conditional(cond, then, otherwise) => {
                cond.references(found);
                then.references(found);
                otherwise.references(found);
            }
            Expr::Method { target, args, .. } => {
                target.references(found);
                args.iter().for_each(|arg| arg.references(found));
            }
        }
    }
}

pub(crate) fn parse(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let expr = parser.ternary()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some(extra) => Err(format!("unexpected {:?} at {}", extra.token, extra.offset)),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|spanned| spanned.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        if self.eat(&expected) {
            return Ok(());
        }
        match self.tokens.get(self.pos) {
            Some(found) => Err(format!("expected {expected:?} but found {:?} at {}", found.token, found.offset)),
            None => Err(format!("expected {expected:?} but reached end of expression")),
        }
    }

    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("expression nests deeper than {MAX_DEPTH} levels"));
        }
        Ok(())
    }

    /// Count one more node wrapping the left operand of a loop.
    fn wrap(&mut self, wraps: &mut usize) -> Result<(), String> {
        *wraps += 1;
        self.enter()
    }

    fn leave(&mut self, wraps: usize) {
        self.depth -= wraps;
    }

    fn ternary(&mut self) -> Result<Expr, String> {
        self.enter()?;
        let cond = self.or()?;
        let expr = if self.eat(&Token::Question) {
            let then = self.ternary()?;
            self.expect(Token::Colon)?;
            let otherwise = self.ternary()?;
            Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        let mut wraps = 0;
        while self.eat(&Token::OrOr) {
            self.wrap(&mut wraps)?;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.leave(wraps);
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.relation()?;
        let mut wraps = 0;
        while self.eat(&Token::AndAnd) {
            self.wrap(&mut wraps)?;
            let right = self.relation()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.leave(wraps);
        Ok(left)
    }

    fn relation(&mut self) -> Result<Expr, String> {
        let mut left = self.addition()?;
        let mut wraps = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::In) => BinaryOp::In,
                _ => {
                    self.leave(wraps);
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.wrap(&mut wraps)?;
            let right = self.addition()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn addition(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplication()?;
        let mut wraps = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => {
                    self.leave(wraps);
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.wrap(&mut wraps)?;
            let right = self.multiplication()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplication(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        let mut wraps = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => {
                    self.leave(wraps);
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.wrap(&mut wraps)?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            _ => return self.member(),
        };
        self.pos += 1;
        self.enter()?;
        let inner = self.unary()?;
        self.depth -= 1;

        // Fold negative literals.
        Ok(match (op, inner) {
            (UnaryOp::Negate, Expr::Literal(Value::Int(value))) => Expr::Literal(Value::Int(-value)),
            (UnaryOp::Negate, Expr::Literal(Value::Double(value))) => {
                Expr::Literal(Value::Double(-value))
            }
            (op, inner) => Expr::Unary(op, Box::new(inner)),
        })
    }

    fn member(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        let mut wraps = 0;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    other => return Err(format!("expected a name after '.', found {other:?}")),
                };
                if self.eat(&Token::LParen) {
                    self.wrap(&mut wraps)?;
                    let args = self.arguments(Token::RParen)?;
                    expr = Expr::Method { target: Box::new(expr), name, args };
                } else if let Expr::Reference(path) = &mut expr {
                    path.push('.');
                    path.push_str(&name);
                } else {
                    return Err(format!("field selection .{name} is only allowed on context keys"));
                }
            } else if self.eat(&Token::LBracket) {
                self.wrap(&mut wraps)?;
                let index = self.ternary()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                self.leave(wraps);
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let offset = self.tokens.get(self.pos).map(|spanned| spanned.offset);
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Literal(Value::Int(value))),
            Some(Token::Uint(value)) => Ok(Expr::Literal(Value::Uint(value))),
            Some(Token::Double(value)) => Ok(Expr::Literal(Value::Double(value))),
            Some(Token::Str(value)) => Ok(Expr::Literal(Value::String(value))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments(Token::RParen)?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Reference(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => Ok(Expr::List(self.arguments(Token::RBracket)?)),
            Some(other) => Err(format!("unexpected {other:?} at {}", offset.unwrap_or_default())),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    /// Comma separated expressions up to and including `close`.
    fn arguments(&mut self, close: Token) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.eat(&close) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(&close) {
                return Ok(args);
            }
            self.expect(Token::Comma)?;
        }
    }
}
