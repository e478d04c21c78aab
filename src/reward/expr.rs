//! Lexer, parser and evaluator for reward and effect statements.
//!
//! ```text
//! stmt    := [IDENT ("=" | "+=" | "-=")] expr
//! expr    := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := sum (("<" | "<=" | ">" | ">=" | "==" | "!=") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := ("-" | "!") unary | primary
//! primary := NUMBER | IDENT | IDENT "(" [expr ("," expr)*] ")" | "(" expr ")"
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// Longest statement source accepted, in bytes
pub const MAX_SOURCE_LEN: usize = 4096;

/// Deepest nesting of parentheses, calls and unary operators
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const OPERATORS: [&str; 19] = [
    "+=", "-=", "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "=", "!",
    "(", ")",
];

fn tokenize(source: &str) -> Result<Vec<Token>> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(Error::Expression(format!(
            "expression longer than {} bytes",
            MAX_SOURCE_LEN
        )));
    }
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // exponent, e.g. 1e-3
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| Error::Expression(format!("invalid number '{}'", text)))?;
            tokens.push(Token::Number(value));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if ident.ends_with('.') {
                return Err(Error::Expression(format!("invalid identifier '{}'", ident)));
            }
            tokens.push(Token::Ident(ident));
            continue;
        }

        if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .ok_or_else(|| Error::Expression(format!("unexpected character '{}'", c)))?;
        i += op.len();
        tokens.push(match *op {
            "(" => Token::LParen,
            ")" => Token::RParen,
            other => Token::Op(other),
        });
    }

    Ok(tokens)
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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
    And,
    Or,
}

impl BinaryOp {
    fn from_token(op: &str) -> Option<Self> {
        Some(match op {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            _ => return None,
        })
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Rem => lhs % rhs,
            BinaryOp::Lt => truth(lhs < rhs),
            BinaryOp::Le => truth(lhs <= rhs),
            BinaryOp::Gt => truth(lhs > rhs),
            BinaryOp::Ge => truth(lhs >= rhs),
            BinaryOp::Eq => truth(lhs == rhs),
            BinaryOp::Ne => truth(lhs != rhs),
            BinaryOp::And => truth(lhs != 0.0 && rhs != 0.0),
            BinaryOp::Or => truth(lhs != 0.0 || rhs != 0.0),
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Assignment operator of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

/// A parsed statement: an expression with an optional assignment target.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: Option<(String, AssignOp)>,
    pub expr: Expr,
}

/// Names the evaluator resolves at runtime.
pub trait Scope {
    /// Value of a variable, `None` when the name is unknown
    fn var(&self, name: &str) -> Option<f64>;

    /// Value of a user function call, `None` when the name is unknown
    fn call(&self, _name: &str) -> Option<Result<f64>> {
        None
    }
}

impl Expr {
    /// Parse a bare expression
    pub fn parse(source: &str) -> Result<Expr> {
        let mut parser = Parser::new(tokenize(source)?);
        let expr = parser.expr()?;
        parser.finish()?;
        Ok(expr)
    }

    /// Visit every variable name referenced by the expression
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Var(name) = e {
                out.push(name.as_str());
            }
        });
        out
    }

    /// Visit every function call as `(name, arity)`
    pub fn calls(&self) -> Vec<(&str, usize)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Call(name, args) = e {
                out.push((name.as_str(), args.len()));
            }
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Number(_) | Expr::Var(_) => {}
            Expr::Unary(_, inner) => inner.walk(&mut *visit),
            Expr::Binary(_, lhs, rhs) => {
                lhs.walk(&mut *visit);
                rhs.walk(&mut *visit);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.walk(&mut *visit);
                }
            }
        }
    }

    /// Evaluate against a scope. Comparisons and logic yield 1.0 / 0.0.
    pub fn eval(&self, scope: &dyn Scope) -> Result<f64> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Var(name) => scope
                .var(name)
                .ok_or_else(|| Error::Expression(format!("unknown name '{}'", name))),
            Expr::Unary(UnaryOp::Neg, inner) => Ok(-inner.eval(scope)?),
            Expr::Unary(UnaryOp::Not, inner) => {
                Ok(if inner.eval(scope)? == 0.0 { 1.0 } else { 0.0 })
            }
            Expr::Binary(op, lhs, rhs) => Ok(op.apply(lhs.eval(scope)?, rhs.eval(scope)?)),
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(scope))
                    .collect::<Result<Vec<f64>>>()?;
                match (name.as_str(), values.as_slice()) {
                    ("abs", [x]) => Ok(x.abs()),
                    ("min", [a, b]) => Ok(a.min(*b)),
                    ("max", [a, b]) => Ok(a.max(*b)),
                    (_, []) => scope
                        .call(name)
                        .unwrap_or_else(|| Err(Error::Expression(format!("unknown function '{}'", name)))),
                    _ => Err(Error::Expression(format!(
                        "function '{}' called with {} arguments",
                        name,
                        values.len()
                    ))),
                }
            }
        }
    }
}

/// Builtin functions and their arity
pub const BUILTINS: [(&str, usize); 3] = [("abs", 1), ("min", 2), ("max", 2)];

impl Statement {
    /// Parse a statement. An empty source parses as the constant `0`.
    pub fn parse(source: &str) -> Result<Statement> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Ok(Statement {
                target: None,
                expr: Expr::Number(0.0),
            });
        }

        let target = match (tokens.first(), tokens.get(1)) {
            (Some(Token::Ident(name)), Some(Token::Op(op))) if matches!(*op, "=" | "+=" | "-=") => {
                let assign = match *op {
                    "=" => AssignOp::Set,
                    "+=" => AssignOp::Add,
                    _ => AssignOp::Sub,
                };
                Some((name.clone(), assign))
            }
            _ => None,
        };

        let skip = if target.is_some() { 2 } else { 0 };
        let mut parser = Parser::new(tokens.into_iter().skip(skip).collect());
        let expr = parser.expr()?;
        parser.finish()?;
        Ok(Statement { target, expr })
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssignOp::Set => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
        })
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Run `parse` one nesting level deeper
    fn nested(&mut self, parse: impl FnOnce(&mut Parser) -> Result<Expr>) -> Result<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(Error::Expression("expression nested too deeply".into()));
        }
        self.depth += 1;
        let expr = parse(self);
        self.depth -= 1;
        expr
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_op(&self, candidates: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if candidates.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn finish(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(Error::Expression(format!("unexpected trailing {:?}", token))),
        }
    }

    fn binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Parser) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut lhs = next(self)?;
        while let Some(op) = self.peek_op(ops) {
            self.pos += 1;
            let rhs = next(self)?;
            let op = BinaryOp::from_token(op)
                .ok_or_else(|| Error::Expression(format!("unknown operator '{}'", op)))?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn expr(&mut self) -> Result<Expr> {
        self.binary_level(&["||"], Parser::and)
    }

    fn and(&mut self) -> Result<Expr> {
        self.binary_level(&["&&"], Parser::comparison)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.sum()?;
        if let Some(op) = self.peek_op(&["<", "<=", ">", ">=", "==", "!="]) {
            self.pos += 1;
            let rhs = self.sum()?;
            let op = BinaryOp::from_token(op)
                .ok_or_else(|| Error::Expression(format!("unknown operator '{}'", op)))?;
            return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn sum(&mut self) -> Result<Expr> {
        self.binary_level(&["+", "-"], Parser::product)
    }

    fn product(&mut self) -> Result<Expr> {
        self.binary_level(&["*", "/", "%"], Parser::unary)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek_op(&["-", "!"]) {
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(Parser::unary)?)))
            }
            Some(_) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.nested(Parser::unary)?)))
            }
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                    return Ok(Expr::Call(name, args));
                }
                loop {
                    args.push(self.nested(Parser::expr)?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        other => {
                            return Err(Error::Expression(format!(
                                "expected ',' or ')' in call to '{}', found {:?}",
                                name, other
                            )))
                        }
                    }
                }
                Ok(Expr::Call(name, args))
            }
            Some(Token::LParen) => {
                let inner = self.nested(Parser::expr)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(Error::Expression(format!("expected ')', found {:?}", other))),
                }
            }
            Some(token) => Err(Error::Expression(format!("unexpected {:?}", token))),
            None => Err(Error::Expression("unexpected end of expression".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapScope(HashMap<&'static str, f64>);

    impl Scope for MapScope {
        fn var(&self, name: &str) -> Option<f64> {
            self.0.get(name).copied()
        }
    }

    fn eval(source: &str, vars: &[(&'static str, f64)]) -> f64 {
        let scope = MapScope(vars.iter().copied().collect());
        Expr::parse(source).unwrap().eval(&scope).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[]), 9.0);
        assert_eq!(eval("-2 * -3", &[]), 6.0);
        assert_eq!(eval("10 % 4 - 1", &[]), 1.0);
    }

    #[test]
    fn test_comparison_and_logic() {
        assert_eq!(eval("1 < 2 && 3 >= 3", &[]), 1.0);
        assert_eq!(eval("1 > 2 || !(0)", &[]), 1.0);
        assert_eq!(eval("2 != 2", &[]), 0.0);
    }

    #[test]
    fn test_dotted_variables_and_builtins() {
        let value = eval(
            "max(coinbase.btcusd.close - prev.coinbase.btcusd.close, 0) + abs(-1)",
            &[("coinbase.btcusd.close", 105.0), ("prev.coinbase.btcusd.close", 100.0)],
        );
        assert_eq!(value, 6.0);
    }

    #[test]
    fn test_scientific_numbers() {
        assert_eq!(eval("1e3 + 2.5E-1", &[]), 1000.25);
        assert_eq!(eval(".5", &[]), 0.5);
    }

    #[test]
    fn test_statement_targets() {
        let stmt = Statement::parse("reward = a - b").unwrap();
        assert_eq!(stmt.target, Some(("reward".to_string(), AssignOp::Set)));

        let stmt = Statement::parse("portfolio.usd -= price").unwrap();
        assert_eq!(stmt.target, Some(("portfolio.usd".to_string(), AssignOp::Sub)));

        let stmt = Statement::parse("a == b").unwrap();
        assert!(stmt.target.is_none());
    }

    #[test]
    fn test_empty_statement_is_zero() {
        let stmt = Statement::parse("   ").unwrap();
        assert_eq!(stmt.expr, Expr::Number(0.0));
    }

    #[test]
    fn test_malformed_expressions() {
        for source in ["1 +", "(1 + 2", "a b", "max(1,", "1 $ 2", "a.", "reward = = 1"] {
            assert!(Statement::parse(source).is_err(), "{} should not parse", source);
        }
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = |depth: usize| format!("{}price{}", "(".repeat(depth), ")".repeat(depth));
        assert!(Expr::parse(&nested(MAX_NESTING - 1)).is_ok());

        let err = Statement::parse(&format!("reward = {}", nested(MAX_NESTING + 1))).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "{}", err);
        assert!(Expr::parse(&format!("{}1", "-".repeat(MAX_NESTING + 1))).is_err());
        assert!(Expr::parse(&format!("{}1{}", "abs(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1))).is_err());
    }

    #[test]
    fn test_deep_nesting_fails_on_a_small_stack() {
        // Far past the bound; must come back as an error rather than overflow.
        let source = format!("reward = {}price{}", "(".repeat(50_000), ")".repeat(50_000));
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || Statement::parse(&source).is_err())
            .unwrap();
        assert!(handle.join().unwrap());

        let chain = format!("reward = {}", vec!["price"; MAX_SOURCE_LEN / 2].join("+"));
        assert!(Statement::parse(&chain).unwrap_err().to_string().contains("longer than"));
    }

    #[test]
    fn test_unknown_variable_fails_eval() {
        let scope = MapScope(HashMap::new());
        assert!(Expr::parse("missing + 1").unwrap().eval(&scope).is_err());
    }

    #[test]
    fn test_collects_names() {
        let expr = Expr::parse("gain(x) + y * min(z, 2)").unwrap();
        let mut vars = expr.variables();
        vars.sort();
        assert_eq!(vars, vec!["x", "y", "z"]);
        assert_eq!(expr.calls(), vec![("gain", 1), ("min", 2)]);
    }
}
