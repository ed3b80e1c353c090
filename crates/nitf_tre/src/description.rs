//! Description programs: the field catalogs that drive reading and writing of a TRE.
//!
//! A [`Program`] is a flat list of [`DescriptionEntry`] values. Loops and conditionals
//! are bracketed by `Loop`/`EndLoop` and `If`/`EndIf` pairs and the list always ends in
//! a single `End`. Programs are validated once, on construction, and are immutable
//! afterwards so they can be shared between any number of TRE instances.

use std::{collections::HashSet, fmt};

use crate::{
    error::{Error, Result},
    field::{Field, FieldTable, FieldType},
};

/// Arithmetic operator used in length expressions and loop count adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(ArithOp::Add),
            "-" => Some(ArithOp::Sub),
            "*" => Some(ArithOp::Mul),
            "/" => Some(ArithOp::Div),
            "%" => Some(ArithOp::Rem),
            _ => None,
        }
    }

    /// Apply the operator, returning `None` on overflow or division by zero
    pub fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            ArithOp::Add => lhs.checked_add(rhs),
            ArithOp::Sub => lhs.checked_sub(rhs),
            ArithOp::Mul => lhs.checked_mul(rhs),
            ArithOp::Div => lhs.checked_div(rhs),
            ArithOp::Rem => lhs.checked_rem(rhs),
        }
    }

    /// Solve `x op rhs = result` for `x` where that has a single answer
    pub fn invert(self, result: i64, rhs: i64) -> Option<i64> {
        match self {
            ArithOp::Add => result.checked_sub(rhs),
            ArithOp::Sub => result.checked_add(rhs),
            ArithOp::Mul if rhs != 0 && result % rhs == 0 => Some(result / rhs),
            _ => None,
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
        })
    }
}

/// Token of a postfix length expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Constant(i64),
    Field(String),
    Op(ArithOp),
}

/// Postfix expression computing a field length from earlier fields
///
/// `"SECLEN"` is the length stored in `SECLEN`; `"NPART 2 *"` doubles `NPART`.
/// An operator applied to a single operand treats the missing left operand as `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    tokens: Vec<Token>,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = text
            .split_whitespace()
            .map(|word| {
                if let Some(op) = ArithOp::parse(word) {
                    Token::Op(op)
                } else if let Ok(value) = word.parse() {
                    Token::Constant(value)
                } else {
                    Token::Field(word.to_owned())
                }
            })
            .collect::<Vec<_>>();

        let mut depth = 0usize;
        for token in &tokens {
            match token {
                Token::Op(_) if depth == 0 => {
                    return Err(Error::CustomError(format!(
                        "operator without operands in expression {text:?}"
                    )))
                }
                Token::Op(_) => depth = depth.max(2) - 1,
                _ => depth += 1,
            }
        }
        if depth != 1 {
            return Err(Error::CustomError(format!(
                "expression {text:?} does not reduce to a single value"
            )));
        }

        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Field names the expression reads
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Field(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Evaluate with `lookup` supplying field values
    pub fn evaluate(&self, mut lookup: impl FnMut(&str) -> Result<i64>) -> Result<i64> {
        let mut stack: Vec<i64> = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            match token {
                Token::Constant(value) => stack.push(*value),
                Token::Field(name) => stack.push(lookup(name)?),
                Token::Op(op) => {
                    let rhs = stack.pop().unwrap_or_default();
                    let lhs = stack.pop().unwrap_or_default();
                    let value = op.apply(lhs, rhs).ok_or_else(|| {
                        Error::CustomError(format!("cannot evaluate {lhs} {op} {rhs}"))
                    })?;
                    stack.push(value);
                }
            }
        }
        stack
            .pop()
            .ok_or_else(|| Error::CustomError("empty length expression".into()))
    }

    /// The field this expression can be solved for, with the inverse mapping
    ///
    /// Only `FIELD`, `FIELD k op` and `k FIELD +`/`k FIELD *` shapes are solvable.
    pub(crate) fn solve_for(&self, length: i64) -> Option<(&str, i64)> {
        match self.tokens.as_slice() {
            [Token::Field(name)] => Some((name.as_str(), length)),
            [Token::Field(name), Token::Constant(k), Token::Op(op)] => {
                Some((name.as_str(), op.invert(length, *k)?))
            }
            [Token::Constant(k), Token::Field(name), Token::Op(op @ (ArithOp::Add | ArithOp::Mul))] => {
                Some((name.as_str(), op.invert(length, *k)?))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match token {
                Token::Constant(value) => write!(f, "{value}")?,
                Token::Field(name) => f.write_str(name)?,
                Token::Op(op) => write!(f, "{op}")?,
            }
        }
        Ok(())
    }
}

/// Byte length of a literal field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Length {
    Fixed(usize),

    /// Everything left in the record
    Gobble,

    /// Computed from earlier fields
    Conditional(Expression),
}

/// Repeat count of a loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Count {
    Constant(usize),
    Field {
        tag: String,
        adjust: Option<(ArithOp, i64)>,
    },
}

impl Count {
    /// Parse a referenced count with an optional adjustment such as `"+1"` or `"/2"`
    pub fn field(tag: impl Into<String>, adjust: Option<&str>) -> Result<Self> {
        let tag = tag.into();
        let adjust = match adjust.map(str::trim).filter(|a| !a.is_empty()) {
            None => None,
            Some(text) => {
                let op = text.get(..1).and_then(ArithOp::parse).ok_or_else(|| {
                    Error::CustomError(format!("unknown loop count operator in {text:?}"))
                })?;
                let operand = text[1..].trim().parse().map_err(|_| {
                    Error::CustomError(format!("invalid loop count operand in {text:?}"))
                })?;
                Some((op, operand))
            }
        };
        Ok(Count::Field { tag, adjust })
    }
}

/// Test applied to a referenced field by an `If` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `eq`/`ne`: text comparison, trailing blanks ignored
    Text { equal: bool, operand: String },

    /// `<`, `>`, `<=`, `>=`, `==`, `!=` against an integer
    Numeric { comparator: Comparator, operand: i64 },

    /// `&`: true when any bit of the mask is set
    Mask(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl Condition {
    /// Parse `"<op> <operand>"`, e.g. `"eq Y"`, `"> 0"` or `"& 0x80000000"`
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |why: &str| Error::CustomError(format!("{why} in condition {text:?}"));

        let trimmed = text.trim_start();
        let (op, operand) = trimmed.split_once(' ').unwrap_or((trimmed, ""));

        let numeric = |comparator| -> Result<Self> {
            let operand = operand
                .trim()
                .parse()
                .map_err(|_| invalid("non-numeric operand"))?;
            Ok(Condition::Numeric {
                comparator,
                operand,
            })
        };

        match op {
            "eq" | "ne" => Ok(Condition::Text {
                equal: op == "eq",
                operand: operand.trim_end().to_owned(),
            }),
            "<" => numeric(Comparator::Lt),
            ">" => numeric(Comparator::Gt),
            "<=" => numeric(Comparator::Le),
            ">=" => numeric(Comparator::Ge),
            "==" => numeric(Comparator::Eq),
            "!=" => numeric(Comparator::Ne),
            "&" => {
                let operand = operand.trim();
                let mask = match operand
                    .strip_prefix("0x")
                    .or_else(|| operand.strip_prefix("0X"))
                {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => operand.parse(),
                };
                mask.map(Condition::Mask)
                    .map_err(|_| invalid("invalid mask"))
            }
            _ => Err(invalid("unknown comparator")),
        }
    }

    /// Evaluate against a field value, `None` when the value cannot be compared
    pub fn evaluate(&self, field: &Field) -> Option<bool> {
        match self {
            Condition::Text { equal, operand } => {
                let value = String::from_utf8_lossy(field.as_bytes());
                Some((value.trim_end() == operand.as_str()) == *equal)
            }
            Condition::Numeric {
                comparator,
                operand,
            } => {
                let value = field.to_integer()?;
                Some(match comparator {
                    Comparator::Lt => value < *operand,
                    Comparator::Gt => value > *operand,
                    Comparator::Le => value <= *operand,
                    Comparator::Ge => value >= *operand,
                    Comparator::Eq => value == *operand,
                    Comparator::Ne => value != *operand,
                })
            }
            Condition::Mask(mask) => Some(field.to_unsigned()? & mask != 0),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Text { equal, operand } => {
                write!(f, "{} {operand}", if *equal { "eq" } else { "ne" })
            }
            Condition::Numeric {
                comparator,
                operand,
            } => {
                let symbol = match comparator {
                    Comparator::Lt => "<",
                    Comparator::Gt => ">",
                    Comparator::Le => "<=",
                    Comparator::Ge => ">=",
                    Comparator::Eq => "==",
                    Comparator::Ne => "!=",
                };
                write!(f, "{symbol} {operand}")
            }
            Condition::Mask(mask) => write!(f, "& 0x{mask:X}"),
        }
    }
}

/// A field the program reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    pub field_type: FieldType,
    pub length: Length,
    pub label: Option<String>,
    pub tag: String,
}

/// One instruction of a description program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionEntry {
    Literal(FieldEntry),
    If { condition: Condition, tag: String },
    EndIf,
    Loop(Count),
    EndLoop,
    End,
}

impl DescriptionEntry {
    fn literal(field_type: FieldType, length: Length, label: &str, tag: &str) -> Self {
        DescriptionEntry::Literal(FieldEntry {
            field_type,
            length,
            label: (!label.is_empty()).then(|| label.to_owned()),
            tag: tag.to_owned(),
        })
    }

    pub fn alphanumeric(length: usize, label: &str, tag: &str) -> Self {
        Self::literal(FieldType::Alphanumeric, Length::Fixed(length), label, tag)
    }

    pub fn numeric(length: usize, label: &str, tag: &str) -> Self {
        Self::literal(FieldType::Numeric, Length::Fixed(length), label, tag)
    }

    pub fn binary(length: usize, label: &str, tag: &str) -> Self {
        Self::literal(FieldType::Binary, Length::Fixed(length), label, tag)
    }

    /// A field taking every byte left in the record
    pub fn gobble(field_type: FieldType, label: &str, tag: &str) -> Self {
        Self::literal(field_type, Length::Gobble, label, tag)
    }

    /// A field whose length is computed by `expression`
    pub fn conditional(field_type: FieldType, expression: &str, label: &str, tag: &str) -> Result<Self> {
        Ok(Self::literal(
            field_type,
            Length::Conditional(Expression::parse(expression)?),
            label,
            tag,
        ))
    }

    pub fn repeat(count: usize) -> Self {
        DescriptionEntry::Loop(Count::Constant(count))
    }

    pub fn repeat_by(tag: &str) -> Self {
        DescriptionEntry::Loop(Count::Field {
            tag: tag.to_owned(),
            adjust: None,
        })
    }

    pub fn when(condition: &str, tag: &str) -> Result<Self> {
        Ok(DescriptionEntry::If {
            condition: Condition::parse(condition)?,
            tag: tag.to_owned(),
        })
    }
}

/// A validated description program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    name: String,
    entries: Vec<DescriptionEntry>,
    /// For every `Loop`/`If` the index of its closing entry, and for every
    /// `EndLoop` the index of its opening `Loop`.
    partners: Vec<usize>,
    /// Number of loops enclosing each entry
    depths: Vec<usize>,
}

impl Program {
    /// Validate and build a program
    ///
    /// Rejects unbalanced or crossed `Loop`/`If` nesting, a missing or repeated `End`,
    /// and references to fields that no earlier entry declares.
    pub fn new(name: impl Into<String>, entries: Vec<DescriptionEntry>) -> Result<Self> {
        let name = name.into();
        let mut partners = vec![usize::MAX; entries.len()];
        let mut depths = Vec::with_capacity(entries.len());
        let mut open: Vec<usize> = Vec::new();
        let mut declared: HashSet<&str> = HashSet::new();
        let mut loops = 0usize;

        match entries.iter().position(|e| *e == DescriptionEntry::End) {
            Some(end) if end + 1 == entries.len() => {}
            Some(end) => {
                return Err(Error::malformed(
                    &name,
                    format!("entry {end} ends the program before its last entry"),
                ))
            }
            None => return Err(Error::malformed(&name, "program has no End entry")),
        }

        let check_reference = |declared: &HashSet<&str>, tag: &str, at: usize| {
            if declared.contains(tag) {
                Ok(())
            } else {
                Err(Error::malformed(
                    &name,
                    format!("entry {at} refers to {tag} before it is declared"),
                ))
            }
        };

        for (at, entry) in entries.iter().enumerate() {
            match entry {
                DescriptionEntry::Literal(field) => {
                    if field.tag.is_empty() {
                        return Err(Error::malformed(&name, format!("entry {at} has no tag")));
                    }
                    if let Length::Conditional(expression) = &field.length {
                        for tag in expression.references() {
                            check_reference(&declared, tag, at)?;
                        }
                    }
                    declared.insert(field.tag.as_str());
                }
                DescriptionEntry::If { tag, .. } => {
                    check_reference(&declared, tag, at)?;
                    open.push(at);
                }
                DescriptionEntry::Loop(count) => {
                    if let Count::Field { tag, .. } = count {
                        check_reference(&declared, tag, at)?;
                    }
                    open.push(at);
                    depths.push(loops);
                    loops += 1;
                    continue;
                }
                DescriptionEntry::EndIf | DescriptionEntry::EndLoop => {
                    let expected_loop = *entry == DescriptionEntry::EndLoop;
                    let opener = open.pop().filter(|&o| {
                        matches!(entries[o], DescriptionEntry::Loop(_)) == expected_loop
                    });
                    let Some(opener) = opener else {
                        return Err(Error::malformed(
                            &name,
                            format!("entry {at} closes a block that is not open"),
                        ));
                    };
                    partners[opener] = at;
                    if expected_loop {
                        partners[at] = opener;
                        loops -= 1;
                    }
                }
                DescriptionEntry::End => {
                    if let Some(unclosed) = open.last() {
                        return Err(Error::malformed(
                            &name,
                            format!("entry {unclosed} is never closed"),
                        ));
                    }
                }
            }
            depths.push(loops);
        }

        Ok(Self {
            name,
            entries,
            partners,
            depths,
        })
    }

    /// One binary field taking all of the data
    pub(crate) fn raw(name: &str, tag: &str, label: &str) -> Self {
        Self {
            name: name.to_owned(),
            entries: vec![
                DescriptionEntry::gobble(FieldType::Binary, label, tag),
                DescriptionEntry::End,
            ],
            partners: vec![usize::MAX; 2],
            depths: vec![0; 2],
        }
    }

    /// Name used to pick this program among several registered for a tag
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[DescriptionEntry] {
        &self.entries
    }

    /// All literal fields, in program order
    pub fn fields(&self) -> impl Iterator<Item = &FieldEntry> {
        self.entries.iter().filter_map(|e| match e {
            DescriptionEntry::Literal(field) => Some(field),
            _ => None,
        })
    }

    /// Total length of the record when it has no loops, conditions or variable fields
    pub fn fixed_length(&self) -> Option<usize> {
        self.entries.iter().try_fold(0usize, |total, entry| match entry {
            DescriptionEntry::Literal(FieldEntry {
                length: Length::Fixed(n),
                ..
            }) => Some(total + n),
            DescriptionEntry::End => Some(total),
            _ => None,
        })
    }

    /// Find the literal producing a field `tag` nested `depth` loops deep
    pub fn literal(&self, tag: &str, depth: usize) -> Option<&FieldEntry> {
        self.entries
            .iter()
            .zip(&self.depths)
            .find_map(|(entry, d)| match entry {
                DescriptionEntry::Literal(field) if field.tag == tag && *d == depth => {
                    Some(field)
                }
                _ => None,
            })
    }

    /// Fill a table with blank values for every field outside of loops and conditions
    pub fn defaults(&self) -> FieldTable {
        let mut table = FieldTable::new();
        let mut blocks = 0usize;
        for entry in &self.entries {
            match entry {
                DescriptionEntry::Loop(_) | DescriptionEntry::If { .. } => blocks += 1,
                DescriptionEntry::EndLoop | DescriptionEntry::EndIf => blocks -= 1,
                DescriptionEntry::Literal(field) if blocks == 0 => {
                    let length = match field.length {
                        Length::Fixed(n) => n,
                        _ => 0,
                    };
                    table.insert(
                        field.tag.as_str().into(),
                        Field::blank(field.field_type, length),
                    );
                }
                _ => {}
            }
        }
        table
    }

    pub(crate) fn partner(&self, at: usize) -> usize {
        self.partners[at]
    }
}
