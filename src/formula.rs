//! Derivation formulas.
//!
//! A [`Formula`] is an operator name applied to an ordered operand list. Each
//! operand is a field reference, a constant or a nested formula. Formulas are
//! totally ordered (name first, then operands), which lets the compliance
//! registry keep them in ordered maps and probe for structural duplicates.
//!
//! The text form is the one used in reports and tests:
//!
//! ```text
//! TableSum(Orders, amount)
//! TableSelection(Orders, InInterval(IntervalBounds(12.5, 40), `Orders amount`))
//! EQc(channel, "web")
//! ```

use crate::MISSING;
use crate::error::FormulaError;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// --- Constants --------------------------------------------------------------

/// Constant operand. Continuous constants compare with a total float order so
/// that formulas can be used as ordered-map keys.
#[derive(Debug, Clone)]
pub enum Constant {
    Continuous(f64),
    Symbol(String),
}

impl Ord for Constant {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Constant::Continuous(a), Constant::Continuous(b)) => a.total_cmp(b),
            (Constant::Symbol(a), Constant::Symbol(b)) => a.cmp(b),
            (Constant::Continuous(_), Constant::Symbol(_)) => Ordering::Less,
            (Constant::Symbol(_), Constant::Continuous(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Constant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Constant {}

// --- Formula ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operand {
    Field(String),
    Constant(Constant),
    Formula(Formula),
}

impl Operand {
    pub fn field(name: impl Into<String>) -> Self {
        Operand::Field(name.into())
    }

    pub fn continuous(value: f64) -> Self {
        Operand::Constant(Constant::Continuous(value))
    }

    pub fn symbol(value: impl Into<String>) -> Self {
        Operand::Constant(Constant::Symbol(value.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Formula {
    pub name: String,
    pub operands: Vec<Operand>,
}

impl Formula {
    pub fn new(name: impl Into<String>) -> Self {
        Formula { name: name.into(), operands: Vec::new() }
    }

    pub fn with_operands(name: impl Into<String>, operands: Vec<Operand>) -> Self {
        Formula { name: name.into(), operands }
    }

    pub fn operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        self.operand(Operand::field(name))
    }

    pub fn continuous(self, value: f64) -> Self {
        self.operand(Operand::continuous(value))
    }

    pub fn symbol(self, value: impl Into<String>) -> Self {
        self.operand(Operand::symbol(value))
    }

    pub fn nested(self, formula: Formula) -> Self {
        self.operand(Operand::Formula(formula))
    }

    /// Every field name referenced by the formula, depth first.
    pub fn field_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_field_refs(&mut refs);
        refs
    }

    fn collect_field_refs<'a>(&'a self, refs: &mut Vec<&'a str>) {
        for operand in &self.operands {
            match operand {
                Operand::Field(name) => refs.push(name),
                Operand::Formula(inner) => inner.collect_field_refs(refs),
                Operand::Constant(_) => {}
            }
        }
    }

    /// Parse the text form produced by `Display`.
    ///
    /// # Example
    ///
    /// ```
    /// use fieldsmith::Formula;
    ///
    /// let formula = Formula::parse("TableSum(Orders, amount)").unwrap();
    /// assert_eq!(formula.name, "TableSum");
    /// assert_eq!(formula.field_refs(), vec!["Orders", "amount"]);
    /// ```
    pub fn parse(text: &str) -> Result<Formula, FormulaError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let formula = parser.formula()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(formula),
            Some((offset, token)) => Err(FormulaError::UnexpectedToken {
                found: token.to_string(),
                offset: *offset,
                expected: "end of formula",
            }),
        }
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Formula::parse(s)
    }
}

// --- Text form --------------------------------------------------------------

/// Shortest readable text for a continuous value.
pub(crate) fn format_continuous(value: f64) -> String {
    if value == MISSING {
        return "#Missing".to_string();
    }
    let magnitude = value.abs();
    if value.fract() == 0.0 && magnitude < 1e15 {
        format!("{}", value as i64)
    } else if magnitude >= 1e15 || magnitude < 1e-5 {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

pub(crate) fn write_field_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if regex!(r"^[A-Za-z_][A-Za-z0-9_]*$").is_match(name) {
        f.write_str(name)
    } else {
        write!(f, "`{}`", name.replace('`', "``"))
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Continuous(v) => f.write_str(&format_continuous(*v)),
            Constant::Symbol(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(name) => write_field_name(f, name),
            Operand::Constant(c) => c.fmt(f),
            Operand::Formula(inner) => inner.fmt(f),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            operand.fmt(f)?;
        }
        f.write_str(")")
    }
}

// --- Parser -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Comma,
    Missing,
    Number(f64),
    Ident(String),
    Quoted(String),
    Text(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::Missing => f.write_str("#Missing"),
            Token::Number(v) => f.write_str(&format_continuous(*v)),
            Token::Ident(s) => f.write_str(s),
            Token::Quoted(s) => write!(f, "`{s}`"),
            Token::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let re = regex!(
        r#"^\s*(?:(?P<punct>[(),])|(?P<missing>#Missing)|(?P<number>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|`(?P<quoted>(?:[^`]|``)*)`|"(?P<text>(?:[^"\\]|\\.)*)")"#
    );

    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }
        let offset = pos + (rest.len() - trimmed.len());
        let caps = re.captures(rest).ok_or(FormulaError::UnexpectedChar(offset))?;
        let end = caps.get(0).map_or(rest.len(), |m| m.end());

        let token = if let Some(m) = caps.name("punct") {
            match m.as_str() {
                "(" => Token::Open,
                ")" => Token::Close,
                _ => Token::Comma,
            }
        } else if caps.name("missing").is_some() {
            Token::Missing
        } else if let Some(m) = caps.name("number") {
            let value = m.as_str().parse::<f64>().map_err(|_| FormulaError::InvalidNumber(m.as_str().to_string()))?;
            Token::Number(value)
        } else if let Some(m) = caps.name("ident") {
            Token::Ident(m.as_str().to_string())
        } else if let Some(m) = caps.name("quoted") {
            Token::Quoted(m.as_str().replace("``", "`"))
        } else if let Some(m) = caps.name("text") {
            Token::Text(unescape(m.as_str()))
        } else {
            return Err(FormulaError::UnexpectedChar(offset));
        };

        tokens.push((offset, token));
        pos += end;
    }
    Ok(tokens)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn next(&mut self, expected: &'static str) -> Result<(usize, Token), FormulaError> {
        let item = self.tokens.get(self.pos).cloned().ok_or(FormulaError::UnexpectedEnd(expected))?;
        self.pos += 1;
        Ok(item)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn formula(&mut self) -> Result<Formula, FormulaError> {
        let name = match self.next("formula name")? {
            (_, Token::Ident(name)) => name,
            (offset, other) => return Err(unexpected(other, offset, "formula name")),
        };
        match self.next("`(`")? {
            (_, Token::Open) => {}
            (offset, other) => return Err(unexpected(other, offset, "`(`")),
        }

        let mut formula = Formula::new(name);
        if self.peek() == Some(&Token::Close) {
            self.pos += 1;
            return Ok(formula);
        }
        loop {
            formula.operands.push(self.operand()?);
            match self.next("`,` or `)`")? {
                (_, Token::Comma) => continue,
                (_, Token::Close) => break,
                (offset, other) => return Err(unexpected(other, offset, "`,` or `)`")),
            }
        }
        Ok(formula)
    }

    fn operand(&mut self) -> Result<Operand, FormulaError> {
        let (offset, token) = self.next("operand")?;
        match token {
            Token::Ident(name) => {
                if self.peek() == Some(&Token::Open) {
                    self.pos -= 1;
                    Ok(Operand::Formula(self.formula()?))
                } else {
                    Ok(Operand::Field(name))
                }
            }
            Token::Quoted(name) => Ok(Operand::Field(name)),
            Token::Text(value) => Ok(Operand::symbol(value)),
            Token::Number(value) => Ok(Operand::continuous(value)),
            Token::Missing => Ok(Operand::continuous(MISSING)),
            other => Err(unexpected(other, offset, "operand")),
        }
    }
}

fn unexpected(token: Token, offset: usize, expected: &'static str) -> FormulaError {
    FormulaError::UnexpectedToken { found: token.to_string(), offset, expected }
}
