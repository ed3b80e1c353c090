//! Text format for description catalogs.
//!
//! A catalog holds the descriptions for one or more tags. Each description is a
//! list of initializer-style entries:
//!
//! ```text
//! @tre BANDSB
//! @description BANDSB *
//! {NITF_BCS_N, 5, "Number of Bands", "COUNT"},
//! {NITF_BINARY, 4, "Bit-wise Parameter Existence Mask Field", "EXISTENCE_MASK"},
//! {NITF_IF, 0, "& 0x80000000", "EXISTENCE_MASK"},
//! {NITF_BCS_A, 24, "Radiometric Quantity", "RADIOMETRIC_QUANTITY"},
//! {NITF_ENDIF, 0, NULL, NULL},
//! {NITF_LOOP, 0, NULL, "COUNT"},
//! {NITF_BCS_A, 50, "Band Identifier", "BID"},
//! {NITF_ENDLOOP, 0, NULL, NULL},
//! {NITF_END, 0, NULL, NULL}
//! ```
//!
//! | Entry                                         | Meaning                                         |
//! |-----------------------------------------------|-------------------------------------------------|
//! | `{NITF_BCS_A, n, label, tag}`                 | `n` byte text field                             |
//! | `{NITF_BCS_N, n, label, tag}`                 | `n` byte numeric field                          |
//! | `{NITF_BINARY, n, label, tag}`                | `n` byte binary field                           |
//! | `{type, NITF_TRE_GOBBLE, label, tag}`         | field taking the rest of the record (`-1`)      |
//! | `{type, NITF_TRE_CONDITIONAL_LENGTH, label, tag, "expr"}` | length from a postfix expression (`-100`) |
//! | `{NITF_LOOP, 0, NULL, tag}`                   | repeat by the value of `tag`                    |
//! | `{NITF_LOOP, 0, "+1", tag}`                   | repeat by the adjusted value of `tag`           |
//! | `{NITF_LOOP, 0, NITF_CONST_N, "4"}`           | repeat a constant number of times               |
//! | `{NITF_IF, 0, "eq Y", tag}`                   | conditional block                               |
//! | `{NITF_ENDLOOP, ...}`, `{NITF_ENDIF, ...}`    | block ends                                      |
//! | `{NITF_END, 0, NULL, NULL}`                   | end of the description                          |
//!
//! `@description <name> [<length>|*]` may be omitted when a tag has a single
//! description; it then takes the tag's name and matches any length.
//! Comments use `//`, `/* */` or `#`.

use std::{ops::Range, sync::Arc};

use miette::NamedSource;
use winnow::{
    ascii::{digit1, multispace1},
    combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated, terminated},
    error::{StrContext, StrContextValue},
    prelude::*,
    stream::Located,
    token::{any, none_of, one_of, take_till, take_until, take_while},
};

use crate::{
    description::{Condition, Count, DescriptionEntry, Expression, FieldEntry, Length, Program},
    error::{CatalogError, Error, Result},
    field::FieldType,
    registry::{Candidate, ExpectedLength},
};

type Stream<'s> = Located<&'s str>;

/// Descriptions a catalog provides for one tag
#[derive(Debug, Clone)]
pub struct TreCatalog {
    pub tag: String,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Str(String),
    Ident(String),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Directive(String, String),
    Entry(Vec<Value>),
}

fn trivia(input: &mut Stream<'_>) -> PResult<()> {
    repeat(
        0..,
        alt((
            multispace1.void(),
            ("//", take_till(0.., ['\n'])).void(),
            ("/*", take_until(0.., "*/"), "*/").void(),
            ('#', take_till(0.., ['\n'])).void(),
        )),
    )
    .parse_next(input)
}

fn identifier<'s>(input: &mut Stream<'s>) -> PResult<&'s str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn integer(input: &mut Stream<'_>) -> PResult<i64> {
    (opt('-'), digit1)
        .take()
        .try_map(|digits: &str| digits.parse::<i64>())
        .parse_next(input)
}

fn string(input: &mut Stream<'_>) -> PResult<String> {
    let escaped = preceded(
        '\\',
        any.map(|c: char| match c {
            'n' => '\n',
            't' => '\t',
            other => other,
        }),
    );
    delimited(
        '"',
        repeat(0.., alt((none_of(['"', '\\']), escaped))),
        cut_err('"').context(StrContext::Expected(StrContextValue::CharLiteral('"'))),
    )
    .parse_next(input)
}

fn value(input: &mut Stream<'_>) -> PResult<Value> {
    alt((
        string.map(Value::Str),
        integer.map(Value::Int),
        identifier.map(|name| match name {
            "NULL" => Value::Null,
            name => Value::Ident(name.to_owned()),
        }),
    ))
    .context(StrContext::Label("value"))
    .parse_next(input)
}

fn entry(input: &mut Stream<'_>) -> PResult<Vec<Value>> {
    preceded(
        ('{', trivia),
        cut_err(terminated(
            separated(1.., terminated(value, trivia), (',', trivia)),
            (opt((',', trivia)), '}'),
        )),
    )
    .context(StrContext::Expected(StrContextValue::CharLiteral('}')))
    .parse_next(input)
}

fn directive(input: &mut Stream<'_>) -> PResult<Item> {
    preceded(
        '@',
        cut_err((identifier, take_till(0.., ['\n', '\r']))),
    )
    .map(|(name, args): (&str, &str)| Item::Directive(name.to_owned(), args.trim().to_owned()))
    .parse_next(input)
}

fn items(input: &mut Stream<'_>) -> PResult<Vec<(Item, Range<usize>)>> {
    preceded(
        trivia,
        repeat(
            0..,
            terminated(
                alt((directive, entry.map(Item::Entry))).with_span(),
                (trivia, opt(','), trivia),
            ),
        ),
    )
    .parse_next(input)
}

struct Assembler<'a> {
    source: &'a str,
    text: &'a str,
    catalogs: Vec<TreCatalog>,
    /// Description being collected: name, expected length, entries and where it started
    current: Option<(String, ExpectedLength, Vec<DescriptionEntry>, Range<usize>)>,
}

impl Assembler<'_> {
    fn error(&self, message: impl Into<String>, span: Range<usize>) -> CatalogError {
        CatalogError {
            message: message.into(),
            src: NamedSource::new(self.source, self.text.to_owned()),
            span: span.into(),
        }
    }

    fn finish_description(&mut self) -> Result<()> {
        let Some((name, length, entries, span)) = self.current.take() else {
            return Ok(());
        };
        let program = Program::new(name, entries).map_err(|e| self.error(e.to_string(), span))?;
        if let Some(catalog) = self.catalogs.last_mut() {
            catalog.candidates.push(Candidate {
                program: Arc::new(program),
                length,
            });
        }
        Ok(())
    }

    fn directive(&mut self, name: &str, args: &str, span: Range<usize>) -> Result<()> {
        let mut words = args.split_whitespace();
        match name {
            "tre" => {
                self.finish_description()?;
                let tag = words
                    .next()
                    .ok_or_else(|| self.error("@tre needs a tag", span))?;
                self.catalogs.push(TreCatalog {
                    tag: tag.to_owned(),
                    candidates: Vec::new(),
                });
            }
            "description" => {
                self.finish_description()?;
                if self.catalogs.is_empty() {
                    return Err(self.error("@description before any @tre", span).into());
                }
                let name = words
                    .next()
                    .ok_or_else(|| self.error("@description needs a name", span.clone()))?;
                let length = match words.next() {
                    None | Some("*") => ExpectedLength::Any,
                    Some(n) => ExpectedLength::Exact(
                        n.parse()
                            .map_err(|_| self.error(format!("invalid length {n:?}"), span.clone()))?,
                    ),
                };
                self.current = Some((name.to_owned(), length, Vec::new(), span));
            }
            other => return Err(self.error(format!("unknown directive @{other}"), span).into()),
        }
        Ok(())
    }

    fn entry(&mut self, values: &[Value], span: Range<usize>) -> Result<()> {
        let entry = entry_from_values(values).map_err(|message| self.error(message, span.clone()))?;

        if self.current.is_none() {
            let catalog = self
                .catalogs
                .last()
                .ok_or_else(|| self.error("entry before any @tre", span.clone()))?;
            if !catalog.candidates.is_empty() {
                return Err(self
                    .error("entry after the end of a description", span)
                    .into());
            }
            self.current = Some((catalog.tag.clone(), ExpectedLength::Any, Vec::new(), span));
        }

        let ends = entry == DescriptionEntry::End;
        if let Some((_, _, entries, _)) = self.current.as_mut() {
            entries.push(entry);
        }
        if ends {
            self.finish_description()?;
        }
        Ok(())
    }
}

fn entry_from_values(values: &[Value]) -> std::result::Result<DescriptionEntry, String> {
    let kind = match values.first() {
        Some(Value::Ident(kind)) => kind.as_str(),
        other => return Err(format!("expected an entry type, found {other:?}")),
    };

    let text = |at: usize| -> Option<&str> {
        match values.get(at) {
            Some(Value::Str(s)) | Some(Value::Ident(s)) => Some(s.as_str()),
            _ => None,
        }
    };
    let tag = || text(3).ok_or_else(|| format!("{kind} entry needs a tag"));

    let field_type = match kind {
        "NITF_BCS_A" => FieldType::Alphanumeric,
        "NITF_BCS_N" => FieldType::Numeric,
        "NITF_BINARY" => FieldType::Binary,
        "NITF_LOOP" => {
            let count = match text(2) {
                Some("CONSTANT") | Some("NITF_CONST_N") => {
                    let tag = tag()?;
                    Count::Constant(
                        tag.trim()
                            .parse()
                            .map_err(|_| format!("constant loop count {tag:?} is not a number"))?,
                    )
                }
                adjust => Count::field(tag()?, adjust).map_err(|e| e.to_string())?,
            };
            return Ok(DescriptionEntry::Loop(count));
        }
        "NITF_IF" => {
            let condition = text(2).ok_or("NITF_IF needs a condition")?;
            return Ok(DescriptionEntry::If {
                condition: Condition::parse(condition)
                    .map_err(|e| e.to_string())?,
                tag: tag()?.to_owned(),
            });
        }
        "NITF_ENDLOOP" => return Ok(DescriptionEntry::EndLoop),
        "NITF_ENDIF" => return Ok(DescriptionEntry::EndIf),
        "NITF_END" => return Ok(DescriptionEntry::End),
        other => return Err(format!("unknown entry type {other}")),
    };

    let conditional = || -> std::result::Result<Length, String> {
        let expression = text(4).ok_or("conditional length needs an expression")?;
        Expression::parse(expression)
            .map(Length::Conditional)
            .map_err(|e| e.to_string())
    };

    let length = match values.get(1) {
        Some(Value::Int(-1)) => Length::Gobble,
        Some(Value::Ident(s)) if s == "NITF_TRE_GOBBLE" => Length::Gobble,
        Some(Value::Int(-100)) => conditional()?,
        Some(Value::Ident(s)) if s == "NITF_TRE_CONDITIONAL_LENGTH" => conditional()?,
        Some(Value::Int(n)) if *n >= 0 => Length::Fixed(*n as usize),
        other => return Err(format!("invalid field length {other:?}")),
    };

    Ok(DescriptionEntry::Literal(FieldEntry {
        field_type,
        length,
        label: text(2).map(str::to_owned),
        tag: tag()?.to_owned(),
    }))
}

/// Parse catalog text; `source` names it in diagnostics
pub fn parse(source: &str, text: &str) -> Result<Vec<TreCatalog>> {
    let items = items.parse(Located::new(text)).map_err(|e| {
        let offset = e.offset();
        CatalogError {
            message: e.inner().to_string(),
            src: NamedSource::new(source, text.to_owned()),
            span: (offset, 0).into(),
        }
    })?;

    let mut assembler = Assembler {
        source,
        text,
        catalogs: Vec::new(),
        current: None,
    };
    for (item, span) in items {
        match item {
            Item::Directive(name, args) => assembler.directive(&name, &args, span)?,
            Item::Entry(values) => assembler.entry(&values, span)?,
        }
    }

    if let Some((name, _, _, span)) = &assembler.current {
        return Err(assembler
            .error(format!("description {name} has no NITF_END"), span.clone())
            .into());
    }
    if let Some(empty) = assembler.catalogs.iter().find(|c| c.candidates.is_empty()) {
        return Err(Error::CustomError(format!(
            "{source}: @tre {} has no descriptions",
            empty.tag
        )));
    }

    Ok(assembler.catalogs)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    const BANDSB: &str = r#"
        // excerpt
        @tre BANDSB
        {NITF_BCS_N, 5, "Number of Bands", "COUNT"},
        {NITF_BINARY, 4, "Existence Mask", "EXISTENCE_MASK"},
        {NITF_IF, 0, "& 0x80000000", "EXISTENCE_MASK"},
        {NITF_BCS_A, 24, "Radiometric Quantity", "RADIOMETRIC_QUANTITY"},
        {NITF_ENDIF, 0, NULL, NULL},
        {NITF_LOOP, 0, NULL, "COUNT"},
        {NITF_BCS_A, 50, "Band Identifier", "BID"},
        {NITF_ENDLOOP, 0, NULL, NULL},
        {NITF_END, 0, NULL, NULL}
    "#;

    #[test]
    fn parses_single_description() -> Result<()> {
        let catalogs = parse("BANDSB.catalog", BANDSB)?;
        assert_eq!(catalogs.len(), 1);
        assert_eq!(catalogs[0].tag, "BANDSB");

        let candidate = &catalogs[0].candidates[0];
        assert_eq!(candidate.length, ExpectedLength::Any);
        assert_eq!(candidate.program.name(), "BANDSB");
        assert_eq!(candidate.program.entries().len(), 9);
        assert_eq!(
            candidate.program.entries()[0],
            DescriptionEntry::numeric(5, "Number of Bands", "COUNT")
        );
        Ok(())
    }

    #[test]
    fn parses_overloaded_descriptions() -> Result<()> {
        let text = r#"
            @tre ACFTA
            @description ACFTA_10 10
            {NITF_BCS_A, 10, "Mission", "AC_MSN_ID"}, {NITF_END, 0, NULL, NULL}
            /* longer form */
            @description ACFTA_20 20
            {NITF_BCS_A, 20, "Mission", "AC_MSN_ID"},
            {NITF_END, 0, NULL, NULL},
            @tre NOTE
            {NITF_BCS_A, NITF_TRE_GOBBLE, "Text", "TEXT"}
            {NITF_END, 0, NULL, NULL}
        "#;

        let catalogs = parse("mixed", text)?;
        assert_eq!(catalogs.len(), 2);
        let lengths = catalogs[0]
            .candidates
            .iter()
            .map(|c| c.length)
            .collect::<Vec<_>>();
        assert_eq!(
            lengths,
            vec![ExpectedLength::Exact(10), ExpectedLength::Exact(20)]
        );
        assert_eq!(
            catalogs[1].candidates[0].program.entries()[0],
            DescriptionEntry::gobble(FieldType::Alphanumeric, "Text", "TEXT")
        );
        Ok(())
    }

    #[test]
    fn parses_loop_forms_and_expressions() -> Result<()> {
        let text = r#"
            @tre LOOPS
            {NITF_BCS_N, 2, NULL, "N"},
            {NITF_LOOP, 0, "+1", "N"},
            {NITF_BCS_N, 1, NULL, "A"},
            {NITF_ENDLOOP, 0, NULL, NULL},
            {NITF_LOOP, 0, NITF_CONST_N, "3"},
            {NITF_BCS_N, 1, NULL, "B"},
            {NITF_ENDLOOP, 0, NULL, NULL},
            {NITF_BCS_A, NITF_TRE_CONDITIONAL_LENGTH, "Tail", "TAIL", "N 2 *"},
            {NITF_END, 0, NULL, NULL}
        "#;

        let catalogs = parse("loops", text)?;
        let entries = catalogs[0].candidates[0].program.entries().to_vec();
        assert_eq!(entries[1], DescriptionEntry::Loop(Count::field("N", Some("+1"))?));
        assert_eq!(entries[4], DescriptionEntry::repeat(3));
        assert_eq!(
            entries[7],
            DescriptionEntry::conditional(FieldType::Alphanumeric, "N 2 *", "Tail", "TAIL")?
        );
        Ok(())
    }

    #[test]
    fn reports_syntax_errors_with_location() {
        let text = "@tre BAD\n{NITF_BCS_A, 2, \"Label\" \"TAG\"}\n";
        let Err(Error::Catalog(error)) = parse("bad.catalog", text) else {
            panic!("expected a catalog error");
        };
        assert!(error.span.offset() > 9);
    }

    #[test]
    fn reports_malformed_programs() {
        let text = r#"
            @tre BAD
            {NITF_BCS_N, 2, NULL, "N"},
            {NITF_LOOP, 0, NULL, "N"},
            {NITF_END, 0, NULL, NULL}
        "#;
        assert!(matches!(parse("bad", text), Err(Error::Catalog(_))));

        let unterminated = "@tre BAD\n{NITF_BCS_N, 2, NULL, \"N\"}\n";
        assert!(matches!(parse("bad", unterminated), Err(Error::Catalog(_))));
    }
}
