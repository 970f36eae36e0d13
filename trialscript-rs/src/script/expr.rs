//! Expression lexer, AST, parser, and evaluator.
//!
//! This is the sandboxed evaluator behind `[=expr]` interpolation, compiled
//! conditions and `=expr` loop cells. It understands a small Python-flavoured
//! grammar and nothing else; there is no assignment and no access to the host.
//!
//! Operator precedence (lowest → highest):
//!   or  →  and  →  not  →  comparison (chained)  →  additive  →
//!   multiplicative  →  unary  →  power  →  postfix  →  primary
//!
//! `var.<name>` reads from the experiment variables, a bare `<name>` does the
//! same, and `f(...)` calls one of the functions in [`super::builtins`].

use std::fmt;

use super::value::Value;
use crate::matrix::ValidationError;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("name '{0}' is not defined")]
    UndefinedName(String),
    #[error("type error: {0}")]
    TypeMismatch(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Dependency-injection interface used by the evaluator.
///
/// A [`Workspace`](crate::var::Workspace) implements this over an experiment's
/// variable store and random source.
pub trait EvalContext {
    /// Look up a variable, interpolated.
    fn get_var(&self, name: &str) -> Option<Value>;

    /// Invoke a builtin function.
    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError>;
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    And,
    Or,
    Not,

    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Unknown(char),
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer {
    src: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Lexer {
            src: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_number(&mut self, first: char) -> Result<Token, EvalError> {
        let mut s = String::from(first);
        let mut is_float = first == '.';

        while matches!(self.peek(), Some('0'..='9')) {
            s.push(self.src[self.pos]);
            self.pos += 1;
        }
        if !is_float && self.peek() == Some('.') && matches!(self.peek2(), Some('0'..='9')) {
            is_float = true;
            s.push('.');
            self.pos += 1;
            while matches!(self.peek(), Some('0'..='9')) {
                s.push(self.src[self.pos]);
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let save = self.pos;
            let mut exp = String::from('e');
            self.pos += 1;
            if let Some(sign @ ('+' | '-')) = self.peek() {
                exp.push(sign);
                self.pos += 1;
            }
            if matches!(self.peek(), Some('0'..='9')) {
                is_float = true;
                while matches!(self.peek(), Some('0'..='9')) {
                    exp.push(self.src[self.pos]);
                    self.pos += 1;
                }
                s.push_str(&exp);
            } else {
                self.pos = save;
            }
        }

        if is_float {
            s.parse()
                .map(Token::Float)
                .map_err(|_| EvalError::Syntax(format!("invalid number '{s}'")))
        } else {
            match s.parse() {
                Ok(n) => Ok(Token::Int(n)),
                Err(_) => s
                    .parse()
                    .map(Token::Float)
                    .map_err(|_| EvalError::Syntax(format!("invalid number '{s}'"))),
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, EvalError> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(EvalError::Syntax("unterminated string literal".into())),
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c @ ('\\' | '\'' | '"')) => s.push(c),
                    Some(c) => {
                        s.push('\\');
                        s.push(c);
                    }
                    None => return Err(EvalError::Syntax("unterminated string literal".into())),
                },
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
            }
        }
        Ok(Token::Str(s))
    }

    fn read_ident(&mut self, first: char) -> Token {
        let mut s = String::from(first);
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            s.push(self.src[self.pos]);
            self.pos += 1;
        }
        match s.as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Ident(s),
        }
    }

    fn next_token(&mut self) -> Result<Token, EvalError> {
        self.skip_ws();
        let ch = match self.advance() {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        Ok(match ch {
            '0'..='9' => self.read_number(ch)?,
            '.' if matches!(self.peek(), Some('0'..='9')) => self.read_number(ch)?,
            '"' | '\'' => self.read_string(ch)?,
            c if c.is_alphabetic() || c == '_' => self.read_ident(c),
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => {
                if self.eat('*') {
                    Token::StarStar
                } else {
                    Token::Star
                }
            }
            '/' => {
                if self.eat('/') {
                    Token::SlashSlash
                } else {
                    Token::Slash
                }
            }
            '%' => Token::Percent,
            '=' => {
                if self.eat('=') {
                    Token::Eq
                } else {
                    Token::Unknown('=')
                }
            }
            '!' => {
                if self.eat('=') {
                    Token::Ne
                } else {
                    Token::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Le
                } else if self.eat('>') {
                    Token::Ne
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' if self.eat('&') => Token::And,
            '|' if self.eat('|') => Token::Or,
            '.' => Token::Dot,
            ',' => Token::Comma,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            c => Token::Unknown(c),
        })
    }

    fn tokenize(mut self) -> Result<Vec<Token>, EvalError> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = matches!(t, Token::Eof);
            tokens.push(t);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    /// `var.<name>` and friends.
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// A comparison chain: `a < b <= c`.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Deepest expression tree the parser builds. Counts bracket nesting, prefix
/// operators and operator chains alike.
const MAX_NESTING: usize = 100;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, depth: 0 }
    }

    /// Go one level deeper into the tree; callers restore `depth` on success.
    fn descend(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(EvalError::Syntax(format!("expression nested deeper than {MAX_NESTING} levels")));
        }
        Ok(())
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), EvalError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(EvalError::Syntax(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.descend()?;
        let expr = self.parse_or()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            self.descend()?;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Token::Eq => CmpOp::Eq,
                Token::Ne => CmpOp::Ne,
                Token::Lt => CmpOp::Lt,
                Token::Le => CmpOp::Le,
                Token::Gt => CmpOp::Gt,
                Token::Ge => CmpOp::Ge,
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::SlashSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        self.descend()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_power(&mut self) -> Result<Expr, EvalError> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::StarStar) {
            // Right-associative, and binds tighter than a unary minus on its left.
            self.descend()?;
            let exp = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mark = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.pos += 1;
                    self.descend()?;
                    match self.advance() {
                        Token::Ident(name) => expr = Expr::Attr(Box::new(expr), name),
                        other => {
                            return Err(EvalError::Syntax(format!(
                                "expected attribute name after '.', found {other:?}"
                            )))
                        }
                    }
                }
                Token::LBracket => {
                    self.pos += 1;
                    self.descend()?;
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        self.depth = mark;
        Ok(expr)
    }

    fn parse_list(&mut self, close: &Token) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma, "','")?;
            // Trailing comma.
            if self.eat(close) {
                return Ok(items);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat(&Token::LParen) => {
                    let args = self.parse_list(&Token::RParen)?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Name(name)),
            },
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.parse_list(&Token::RBracket)?)),
            other => Err(EvalError::Syntax(format!("unexpected token {other:?}"))),
        }
    }
}

/// Parse an expression string into an AST.
pub fn parse_expr(src: &str) -> Result<Expr, EvalError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(EvalError::Syntax(format!("unexpected trailing {other:?}"))),
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate an [`Expr`] AST node against the given context.
pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Name(name) => ctx
            .get_var(name)
            .ok_or_else(|| EvalError::UndefinedName(name.clone())),

        Expr::Attr(base, attr) => match base.as_ref() {
            Expr::Name(ns) if ns == "var" => ctx.get_var(attr).ok_or_else(|| {
                EvalError::UndefinedName(format!("var.{attr}"))
            }),
            other => {
                let v = eval_expr(other, ctx)?;
                Err(EvalError::TypeMismatch(format!(
                    "'{}' object has no attribute '{attr}'",
                    v.type_name()
                )))
            }
        },

        Expr::Index(base, index) => {
            let base = eval_expr(base, ctx)?;
            let index = eval_expr(index, ctx)?;
            eval_index(&base, &index)
        }

        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, ctx)?);
            }
            Ok(Value::List(out))
        }

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            match op {
                UnaryOp::Neg => v.arith_neg(),
                UnaryOp::Pos => match v {
                    Value::Int(_) | Value::Float(_) => Ok(v),
                    other => Err(EvalError::TypeMismatch(format!(
                        "bad operand type for unary +: '{}'",
                        other.type_name()
                    ))),
                },
                UnaryOp::Not => Ok(Value::Bool(!v.as_bool())),
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            match op {
                BinOp::Add => l.arith_add(&r),
                BinOp::Sub => l.arith_sub(&r),
                BinOp::Mul => l.arith_mul(&r),
                BinOp::Div => l.arith_div(&r),
                BinOp::FloorDiv => l.arith_floor_div(&r),
                BinOp::Rem => l.arith_rem(&r),
                BinOp::Pow => l.arith_pow(&r),
            }
        }

        Expr::Compare(first, rest) => {
            let mut lhs = eval_expr(first, ctx)?;
            for (op, rhs_expr) in rest {
                let rhs = eval_expr(rhs_expr, ctx)?;
                if !eval_cmp(*op, &lhs, &rhs)? {
                    return Ok(Value::Bool(false));
                }
                lhs = rhs;
            }
            Ok(Value::Bool(true))
        }

        // `and` / `or` short-circuit and yield an operand, not a bool.
        Expr::And(lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            if !l.as_bool() {
                return Ok(l);
            }
            eval_expr(rhs, ctx)
        }
        Expr::Or(lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            if l.as_bool() {
                return Ok(l);
            }
            eval_expr(rhs, ctx)
        }

        Expr::Call(name, arg_exprs) => {
            let mut args = Vec::with_capacity(arg_exprs.len());
            for ae in arg_exprs {
                args.push(eval_expr(ae, ctx)?);
            }
            ctx.call_fn(name, args)
        }
    }
}

fn eval_cmp(op: CmpOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
    use std::cmp::Ordering;
    let ord = l.compare(r);
    match op {
        CmpOp::Eq => Ok(ord == Some(Ordering::Equal)),
        CmpOp::Ne => Ok(ord != Some(Ordering::Equal)),
        _ => {
            let ord = ord.ok_or_else(|| {
                EvalError::TypeMismatch(format!(
                    "'{}' and '{}' cannot be ordered",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            })
        }
    }
}

fn eval_index(base: &Value, index: &Value) -> Result<Value, EvalError> {
    let i = index.as_int().ok_or_else(|| {
        EvalError::TypeMismatch(format!("indices must be integers, not '{}'", index.type_name()))
    })?;
    let resolve = |len: usize| -> Result<usize, EvalError> {
        let idx = if i < 0 { len as i64 + i } else { i };
        if idx < 0 || idx >= len as i64 {
            Err(EvalError::TypeMismatch(format!("index {i} out of range")))
        } else {
            Ok(idx as usize)
        }
    };
    match base {
        Value::List(items) => Ok(items[resolve(items.len())?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[resolve(chars.len())?].to_string()))
        }
        other => Err(EvalError::TypeMismatch(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Convenience: parse and evaluate an expression string.
pub fn eval_str(src: &str, ctx: &mut dyn EvalContext) -> Result<Value, EvalError> {
    let expr = parse_expr(src)?;
    eval_expr(&expr, ctx)
}

// ── Compiled handle ───────────────────────────────────────────────────────────

/// An expression parsed once and evaluated many times, such as an `=expr`
/// loop cell or a compiled break-if condition.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self, EvalError> {
        Ok(CompiledExpr {
            source: source.to_owned(),
            ast: parse_expr(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, ctx: &mut dyn EvalContext) -> Result<Value, EvalError> {
        eval_expr(&self.ast, ctx)
    }
}

impl PartialEq for CompiledExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "={}", self.source)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
