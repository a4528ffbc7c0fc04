//! Band-math expressions
//!
//! Index formulas are expression trees over logical band names rather than
//! provider scripts, so the same tree drives both the band request (which
//! bands to fetch) and the local per-pixel evaluation.
//!
//! Formulas can be built in code:
//!
//! ```
//! use aquasat_algorithms::imagery::Expr;
//!
//! let ndwi = Expr::nd(Expr::band("green"), Expr::band("nir"));
//! assert_eq!(ndwi.bands(), vec!["green", "nir"]);
//! ```
//!
//! or parsed from text, which is how user-defined indices arrive:
//!
//! ```
//! use aquasat_algorithms::imagery::Expr;
//!
//! let expr = Expr::parse("(green - nir) / (green + nir)").unwrap();
//! assert_eq!(expr.bands(), vec!["green", "nir"]);
//! ```

use std::fmt;
use std::ops;

use serde::{Deserialize, Serialize};
use aquasat_core::{Error, Result};

/// Denominators with a magnitude below this evaluate to zero
const DIV_EPSILON: f64 = 1e-10;

/// Expression tree evaluated independently at every pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Literal { value: f64 },
    Band { name: String },
    /// `(a - b) / (a + b)`
    NormalizedDifference { a: Box<Expr>, b: Box<Expr> },
    Ratio { num: Box<Expr>, den: Box<Expr> },
    Difference { a: Box<Expr>, b: Box<Expr> },
    Sum { a: Box<Expr>, b: Box<Expr> },
    Product { a: Box<Expr>, b: Box<Expr> },
    Neg { expr: Box<Expr> },
    /// `above` where `value > threshold`, otherwise `below`
    ThresholdSelect {
        value: Box<Expr>,
        threshold: f64,
        above: Box<Expr>,
        below: Box<Expr>,
    },
}

impl Expr {
    pub fn lit(value: f64) -> Self {
        Expr::Literal { value }
    }

    pub fn band(name: impl Into<String>) -> Self {
        Expr::Band { name: name.into() }
    }

    pub fn nd(a: Expr, b: Expr) -> Self {
        Expr::NormalizedDifference {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn ratio(num: Expr, den: Expr) -> Self {
        Expr::Ratio {
            num: Box::new(num),
            den: Box::new(den),
        }
    }

    pub fn threshold_select(value: Expr, threshold: f64, above: Expr, below: Expr) -> Self {
        Expr::ThresholdSelect {
            value: Box::new(value),
            threshold,
            above: Box::new(above),
            below: Box::new(below),
        }
    }

    /// Parse a textual formula.
    ///
    /// Grammar: `+ - * /`, unary minus, parentheses, numeric literals, band
    /// identifiers and the function `nd(a, b)`.
    pub fn parse(formula: &str) -> Result<Expr> {
        let tokens = tokenize(formula)?;
        if tokens.is_empty() {
            return Err(Error::Algorithm("Empty formula".into()));
        }
        if tokens.len() > MAX_FORMULA_TOKENS {
            return Err(Error::Algorithm(format!(
                "Formula too long: {} tokens (max {})",
                tokens.len(),
                MAX_FORMULA_TOKENS
            )));
        }
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::Algorithm(format!(
                "Unexpected token in formula: {:?}",
                tok
            )));
        }
        Ok(expr)
    }

    /// Band names referenced by the expression, in order of first appearance
    pub fn bands(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_bands(&mut names);
        names
    }

    fn collect_bands<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Literal { .. } => {}
            Expr::Band { name } => {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
            Expr::NormalizedDifference { a, b }
            | Expr::Difference { a, b }
            | Expr::Sum { a, b }
            | Expr::Product { a, b } => {
                a.collect_bands(names);
                b.collect_bands(names);
            }
            Expr::Ratio { num, den } => {
                num.collect_bands(names);
                den.collect_bands(names);
            }
            Expr::Neg { expr } => expr.collect_bands(names),
            Expr::ThresholdSelect {
                value, above, below, ..
            } => {
                value.collect_bands(names);
                above.collect_bands(names);
                below.collect_bands(names);
            }
        }
    }

    /// Evaluate with `sample` supplying band values.
    ///
    /// A zero denominator yields `0.0`. `NaN` samples propagate.
    pub fn eval<F>(&self, sample: &F) -> f64
    where
        F: Fn(&str) -> f64,
    {
        match self {
            Expr::Literal { value } => *value,
            Expr::Band { name } => sample(name),
            Expr::NormalizedDifference { a, b } => {
                let (a, b) = (a.eval(sample), b.eval(sample));
                safe_div(a - b, a + b)
            }
            Expr::Ratio { num, den } => safe_div(num.eval(sample), den.eval(sample)),
            Expr::Difference { a, b } => a.eval(sample) - b.eval(sample),
            Expr::Sum { a, b } => a.eval(sample) + b.eval(sample),
            Expr::Product { a, b } => a.eval(sample) * b.eval(sample),
            Expr::Neg { expr } => -expr.eval(sample),
            Expr::ThresholdSelect {
                value,
                threshold,
                above,
                below,
            } => {
                let v = value.eval(sample);
                if v.is_nan() {
                    f64::NAN
                } else if v > *threshold {
                    above.eval(sample)
                } else {
                    below.eval(sample)
                }
            }
        }
    }

    /// Replace band names with slots in `names` for fast per-pixel evaluation
    pub(crate) fn bind(&self, names: &[&str]) -> Result<Bound> {
        let bin = |a: &Expr, b: &Expr| -> Result<(Box<Bound>, Box<Bound>)> {
            Ok((Box::new(a.bind(names)?), Box::new(b.bind(names)?)))
        };
        Ok(match self {
            Expr::Literal { value } => Bound::Lit(*value),
            Expr::Band { name } => {
                let slot = names.iter().position(|n| *n == name.as_str()).ok_or_else(|| {
                    Error::Algorithm(format!("Band '{}' not bound", name))
                })?;
                Bound::Slot(slot)
            }
            Expr::NormalizedDifference { a, b } => {
                let (a, b) = bin(a, b)?;
                Bound::Nd(a, b)
            }
            Expr::Ratio { num, den } => {
                let (a, b) = bin(num, den)?;
                Bound::Div(a, b)
            }
            Expr::Difference { a, b } => {
                let (a, b) = bin(a, b)?;
                Bound::Sub(a, b)
            }
            Expr::Sum { a, b } => {
                let (a, b) = bin(a, b)?;
                Bound::Add(a, b)
            }
            Expr::Product { a, b } => {
                let (a, b) = bin(a, b)?;
                Bound::Mul(a, b)
            }
            Expr::Neg { expr } => Bound::Neg(Box::new(expr.bind(names)?)),
            Expr::ThresholdSelect {
                value,
                threshold,
                above,
                below,
            } => Bound::Select {
                value: Box::new(value.bind(names)?),
                threshold: *threshold,
                above: Box::new(above.bind(names)?),
                below: Box::new(below.bind(names)?),
            },
        })
    }
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den.abs() < DIV_EPSILON {
        0.0
    } else {
        num / den
    }
}

/// Expression with band names resolved to sample slots
#[derive(Debug)]
pub(crate) enum Bound {
    Lit(f64),
    Slot(usize),
    Nd(Box<Bound>, Box<Bound>),
    Div(Box<Bound>, Box<Bound>),
    Sub(Box<Bound>, Box<Bound>),
    Add(Box<Bound>, Box<Bound>),
    Mul(Box<Bound>, Box<Bound>),
    Neg(Box<Bound>),
    Select {
        value: Box<Bound>,
        threshold: f64,
        above: Box<Bound>,
        below: Box<Bound>,
    },
}

impl Bound {
    pub(crate) fn eval(&self, samples: &[f64]) -> f64 {
        match self {
            Bound::Lit(v) => *v,
            Bound::Slot(i) => samples[*i],
            Bound::Nd(a, b) => {
                let (a, b) = (a.eval(samples), b.eval(samples));
                safe_div(a - b, a + b)
            }
            Bound::Div(a, b) => safe_div(a.eval(samples), b.eval(samples)),
            Bound::Sub(a, b) => a.eval(samples) - b.eval(samples),
            Bound::Add(a, b) => a.eval(samples) + b.eval(samples),
            Bound::Mul(a, b) => a.eval(samples) * b.eval(samples),
            Bound::Neg(a) => -a.eval(samples),
            Bound::Select {
                value,
                threshold,
                above,
                below,
            } => {
                let v = value.eval(samples);
                if v.is_nan() {
                    f64::NAN
                } else if v > *threshold {
                    above.eval(samples)
                } else {
                    below.eval(samples)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Operator sugar
// ---------------------------------------------------------------------------

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::Sum {
            a: Box::new(self),
            b: Box::new(rhs),
        }
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::Difference {
            a: Box::new(self),
            b: Box::new(rhs),
        }
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::Product {
            a: Box::new(self),
            b: Box::new(rhs),
        }
    }
}

impl ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::ratio(self, rhs)
    }
}

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg {
            expr: Box::new(self),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value } => write!(f, "{}", value),
            Expr::Band { name } => write!(f, "{}", name),
            Expr::NormalizedDifference { a, b } => write!(f, "nd({}, {})", a, b),
            Expr::Ratio { num, den } => write!(f, "({} / {})", num, den),
            Expr::Difference { a, b } => write!(f, "({} - {})", a, b),
            Expr::Sum { a, b } => write!(f, "({} + {})", a, b),
            Expr::Product { a, b } => write!(f, "({} * {})", a, b),
            Expr::Neg { expr } => write!(f, "-{}", expr),
            Expr::ThresholdSelect {
                value,
                threshold,
                above,
                below,
            } => write!(f, "select({} > {}, {}, {})", value, threshold, above, below),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(formula: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = formula.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(chars[i]));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| Error::Algorithm(format!("Invalid number: {}", text)))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => {
                return Err(Error::Algorithm(format!(
                    "Unexpected character '{}' in formula",
                    c
                )));
            }
        }
    }

    Ok(tokens)
}

/// Longest accepted formula, in tokens
const MAX_FORMULA_TOKENS: usize = 1024;

/// Deepest accepted nesting of parentheses, `nd` calls and unary signs
const MAX_NESTING: usize = 64;

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

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<Expr>) -> Result<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(Error::Algorithm(format!(
                "Formula nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let expr = f(self);
        self.depth -= 1;
        expr
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        match self.advance() {
            Some(ref tok) if *tok == want => Ok(()),
            other => Err(Error::Algorithm(format!(
                "Expected {:?}, found {:?}",
                want, other
            ))),
        }
    }

    /// expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = *op;
            self.advance();
            let right = self.parse_term()?;
            left = if op == '+' { left + right } else { left - right };
        }

        Ok(left)
    }

    /// term = factor (('*' | '/') factor)*
    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;

        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let op = *op;
            self.advance();
            let right = self.parse_factor()?;
            left = if op == '*' { left * right } else { left / right };
        }

        Ok(left)
    }

    /// factor = number | band | nd '(' expr ',' expr ')' | '(' expr ')' | ('-' | '+') factor
    fn parse_factor(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::lit(n)),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::band(name));
                }
                if !name.eq_ignore_ascii_case("nd") {
                    return Err(Error::Algorithm(format!("Unknown function '{}'", name)));
                }
                self.advance();
                self.nested(|p| {
                    let a = p.parse_expr()?;
                    p.expect(Token::Comma)?;
                    let b = p.parse_expr()?;
                    p.expect(Token::RParen)?;
                    Ok(Expr::nd(a, b))
                })
            }
            Some(Token::LParen) => self.nested(|p| {
                let expr = p.parse_expr()?;
                p.expect(Token::RParen)?;
                Ok(expr)
            }),
            Some(Token::Op('-')) => self.nested(|p| Ok(-p.parse_factor()?)),
            Some(Token::Op('+')) => self.nested(|p| p.parse_factor()),
            other => Err(Error::Algorithm(format!(
                "Unexpected token in formula: {:?}",
                other
            ))),
        }
    }
}
