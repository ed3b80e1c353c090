//! Execution of a description program.
//!
//! The [`Walker`] steps through a [`Program`] with an explicit stack of loop and
//! condition frames and yields every literal field that is live for the current
//! data, together with its [`TagPath`]. Reading and writing drive the same walker;
//! they differ only in what they do with each visited field.

use crate::{
    description::{ArithOp, Count, DescriptionEntry, FieldEntry, Length, Program},
    error::{Error, Result},
    field::{Field, FieldTable, TagPath},
};

/// What a walk is for, deciding where loop counts come from and how missing
/// references are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Counts come from count fields; missing references are bad data
    Read,

    /// Counts come from the iterations present in the table, and count fields
    /// are rewritten to match
    Reconcile,

    /// Counts come from count fields; missing references are missing input
    Write,
}

/// Bytes read and fields stored so far in a read walk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Progress {
    bytes: usize,
    fields: usize,
}

#[derive(Debug)]
enum Frame {
    Loop {
        start: usize,
        index: usize,
        count: usize,
        /// Progress when the current iteration began
        mark: Progress,
    },
    If,
}

/// A live literal field
#[derive(Debug)]
pub(crate) struct Visit<'p> {
    pub field: &'p FieldEntry,
    pub path: TagPath,
    /// Iteration index of every enclosing loop, outermost first
    pub scope: Vec<usize>,
}

/// Resolved byte length of a visited field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldLength {
    Exact(usize),
    Remaining,
}

pub(crate) struct Walker<'p> {
    program: &'p Program,
    tag: &'p str,
    mode: Mode,
    pc: usize,
    stack: Vec<Frame>,
    progress: Progress,
}

/// Look up a referenced field from inside `scope`
///
/// The plain tag is tried first, then the tag with one, two, ... of the current
/// loop indices appended.
pub(crate) fn resolve<'t>(
    table: &'t FieldTable,
    name: &str,
    scope: &[usize],
) -> Option<(TagPath, &'t Field)> {
    (0..=scope.len()).find_map(|depth| {
        let path = TagPath::new(name, &scope[..depth]);
        table.get(&path).map(|field| (path, field))
    })
}

impl<'p> Walker<'p> {
    pub fn new(program: &'p Program, tag: &'p str, mode: Mode) -> Self {
        Self {
            program,
            tag,
            mode,
            pc: 0,
            stack: Vec::new(),
            progress: Progress::default(),
        }
    }

    /// Record that a visited field was stored with `bytes` bytes of data
    pub fn advance(&mut self, bytes: usize) {
        self.progress.bytes += bytes;
        self.progress.fields += 1;
    }

    fn scope(&self) -> Vec<usize> {
        self.stack
            .iter()
            .filter_map(|frame| match frame {
                Frame::Loop { index, .. } => Some(*index),
                Frame::If => None,
            })
            .collect()
    }

    fn missing(&self, name: &str) -> Error {
        match self.mode {
            Mode::Read => Error::invalid(self.tag, format!("{name} is referenced before it is set")),
            Mode::Reconcile | Mode::Write => Error::IncompleteRecord {
                tag: self.tag.to_owned(),
                field: name.to_owned(),
            },
        }
    }

    fn reference<'t>(
        &self,
        table: &'t FieldTable,
        name: &str,
        scope: &[usize],
    ) -> Result<(TagPath, &'t Field)> {
        resolve(table, name, scope).ok_or_else(|| self.missing(name))
    }

    fn integer(&self, table: &FieldTable, name: &str, scope: &[usize]) -> Result<i64> {
        let (path, field) = self.reference(table, name, scope)?;
        field.to_integer().ok_or_else(|| {
            Error::invalid(
                self.tag,
                format!("{path} holds {:?}, which is not a number", field.to_string()),
            )
        })
    }

    /// Advance to the next live literal field
    pub fn next(&mut self, table: &mut FieldTable) -> Result<Option<Visit<'p>>> {
        let entries = self.program.entries();
        loop {
            let Some(entry) = entries.get(self.pc) else {
                return Ok(None);
            };

            match entry {
                DescriptionEntry::Literal(field) => {
                    self.pc += 1;
                    let scope = self.scope();
                    return Ok(Some(Visit {
                        field,
                        path: TagPath::new(field.tag.as_str(), &scope),
                        scope,
                    }));
                }
                DescriptionEntry::If { condition, tag } => {
                    let scope = self.scope();
                    let (path, field) = self.reference(table, tag, &scope)?;
                    let active = condition.evaluate(field).ok_or_else(|| {
                        Error::invalid(
                            self.tag,
                            format!("cannot test {path} = {:?} with {condition}", field.to_string()),
                        )
                    })?;
                    if active {
                        self.stack.push(Frame::If);
                        self.pc += 1;
                    } else {
                        self.pc = self.program.partner(self.pc) + 1;
                    }
                }
                DescriptionEntry::EndIf => {
                    self.stack.pop();
                    self.pc += 1;
                }
                DescriptionEntry::Loop(count) => {
                    let count = self.count(count, table)?;
                    if count == 0 {
                        self.pc = self.program.partner(self.pc) + 1;
                    } else {
                        self.stack.push(Frame::Loop {
                            start: self.pc,
                            index: 0,
                            count,
                            mark: self.progress,
                        });
                        self.pc += 1;
                    }
                }
                DescriptionEntry::EndLoop => {
                    let progress = self.progress;
                    let again = match self.stack.last_mut() {
                        Some(Frame::Loop {
                            start,
                            index,
                            count,
                            mark,
                        }) if *index + 1 < *count => {
                            let stalled = self.mode == Mode::Read && mark.bytes == progress.bytes;
                            if stalled && mark.fields != progress.fields {
                                return Err(Error::invalid(
                                    self.tag,
                                    format!(
                                        "loop at entry {start} reads no data but has {} iterations left",
                                        *count - *index - 1
                                    ),
                                ));
                            }
                            // an iteration that read and stored nothing repeats identically
                            if stalled {
                                None
                            } else {
                                *index += 1;
                                *mark = progress;
                                Some(*start + 1)
                            }
                        }
                        _ => None,
                    };
                    match again {
                        Some(pc) => self.pc = pc,
                        None => {
                            self.stack.pop();
                            self.pc += 1;
                        }
                    }
                }
                DescriptionEntry::End => return Ok(None),
            }
        }
    }

    fn count(&self, count: &Count, table: &mut FieldTable) -> Result<usize> {
        let scope = self.scope();
        let (tag, adjust) = match count {
            Count::Constant(n) => return Ok(*n),
            Count::Field { tag, adjust } => (tag, adjust),
        };

        if self.mode == Mode::Reconcile {
            let (certain, any) = self.present_iterations(table, &scope);
            let present = match certain {
                Some(n) => n,
                None => self
                    .declared(tag, adjust, table, &scope)
                    .map_or(any, |declared| declared.max(any)),
            };
            let stored = match adjust {
                None => Some(present as i64),
                Some((op, k)) => op.invert(present as i64, *k),
            };
            if let Some(stored) = stored {
                self.store_integer(table, tag, &scope, stored)?;
                return Ok(present);
            }
        }

        self.declared(tag, adjust, table, &scope)
    }

    /// Loop count held by the count field
    fn declared(
        &self,
        tag: &str,
        adjust: &Option<(ArithOp, i64)>,
        table: &FieldTable,
        scope: &[usize],
    ) -> Result<usize> {
        let value = self.integer(table, tag, scope)?;
        let value = match adjust {
            None => value,
            Some((op, k)) => op.apply(value, *k).ok_or_else(|| {
                Error::invalid(self.tag, format!("cannot evaluate {tag} = {value} {op} {k}"))
            })?,
        };
        usize::try_from(value).map_err(|_| {
            Error::invalid(self.tag, format!("loop count from {tag} is negative ({value})"))
        })
    }

    /// Iterations of the loop at `pc` that have fields in the table
    ///
    /// The first value counts only fields read on every iteration, and is `None`
    /// when every field of the body sits inside a condition or a nested loop. An
    /// iteration may then hold no fields at all, so the table alone cannot tell how
    /// many there are. The second value counts every field of the body.
    fn present_iterations(&self, table: &FieldTable, scope: &[usize]) -> (Option<usize>, usize) {
        let end = self.program.partner(self.pc);
        let mut nesting = 0usize;
        let mut certain = None;
        let mut any = 0;
        for entry in &self.program.entries()[self.pc + 1..end] {
            match entry {
                DescriptionEntry::If { .. } | DescriptionEntry::Loop(_) => nesting += 1,
                DescriptionEntry::EndIf | DescriptionEntry::EndLoop => {
                    nesting = nesting.saturating_sub(1)
                }
                DescriptionEntry::Literal(field) => {
                    let extent = table.extent(&field.tag, scope);
                    any = any.max(extent);
                    if nesting == 0 {
                        certain = Some(certain.unwrap_or(0).max(extent));
                    }
                }
                DescriptionEntry::End => {}
            }
        }
        (certain, any)
    }

    /// Rewrite a referenced count or length field, keeping its width
    pub fn store_integer(
        &self,
        table: &mut FieldTable,
        name: &str,
        scope: &[usize],
        value: i64,
    ) -> Result<()> {
        let (path, field) = self.reference(table, name, scope)?;
        if field.to_integer() == Some(value) {
            return Ok(());
        }

        let updated = Field::from_integer(field.field_type(), field.len(), value).ok_or_else(|| {
            Error::invalid(
                self.tag,
                format!("{value} does not fit in the {} bytes of {path}", field.len()),
            )
        })?;
        table.insert(path, updated);
        Ok(())
    }

    /// Byte length of a visited field given the values parsed so far
    pub fn length(&self, visit: &Visit<'_>, table: &FieldTable) -> Result<FieldLength> {
        let expression = match &visit.field.length {
            Length::Fixed(n) => return Ok(FieldLength::Exact(*n)),
            Length::Gobble => return Ok(FieldLength::Remaining),
            Length::Conditional(expression) => expression,
        };

        let value = expression
            .evaluate(|name| self.integer(table, name, &visit.scope))
            .map_err(|e| match e {
                Error::CustomError(reason) => Error::invalid(self.tag, reason),
                e => e,
            })?;
        usize::try_from(value)
            .map(FieldLength::Exact)
            .map_err(|_| {
                Error::invalid(
                    self.tag,
                    format!("length of {} evaluates to {value}", visit.path),
                )
            })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        description::{DescriptionEntry as E, Program},
        field::FieldType,
    };

    fn points() -> Result<Program> {
        Program::new(
            "POINTS",
            vec![
                E::numeric(2, "Number of points", "NUMPTS"),
                E::repeat_by("NUMPTS"),
                E::alphanumeric(3, "Latitude", "LAT"),
                E::EndLoop,
                E::End,
            ],
        )
    }

    fn paths(program: &Program, table: &mut FieldTable, mode: Mode) -> Result<Vec<String>> {
        let mut walker = Walker::new(program, "TEST", mode);
        let mut visited = Vec::new();
        while let Some(visit) = walker.next(table)? {
            visited.push(visit.path.to_string());
        }
        Ok(visited)
    }

    #[test]
    fn walks_loop_from_count_field() -> Result<()> {
        let program = points()?;
        let mut table = FieldTable::new();
        table.insert("NUMPTS".into(), Field::new(FieldType::Numeric, "02"));

        assert_eq!(
            paths(&program, &mut table, Mode::Read)?,
            vec!["NUMPTS", "LAT[0]", "LAT[1]"]
        );
        Ok(())
    }

    #[test]
    fn zero_count_skips_body() -> Result<()> {
        let program = points()?;
        let mut table = FieldTable::new();
        table.insert("NUMPTS".into(), Field::new(FieldType::Numeric, "00"));

        assert_eq!(paths(&program, &mut table, Mode::Read)?, vec!["NUMPTS"]);
        Ok(())
    }

    #[test]
    fn negative_or_text_count_is_invalid() -> Result<()> {
        let program = points()?;
        for value in ["-1", "XX"] {
            let mut table = FieldTable::new();
            table.insert("NUMPTS".into(), Field::new(FieldType::Numeric, value));
            assert!(matches!(
                paths(&program, &mut table, Mode::Read),
                Err(Error::InvalidRecord { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn reconcile_counts_present_iterations() -> Result<()> {
        let program = points()?;
        let mut table = FieldTable::new();
        table.insert("NUMPTS".into(), Field::new(FieldType::Numeric, "02"));
        for i in 0..3 {
            table.insert(TagPath::new("LAT", &[i]), Field::new(FieldType::Alphanumeric, "abc"));
        }

        assert_eq!(
            paths(&program, &mut table, Mode::Reconcile)?,
            vec!["NUMPTS", "LAT[0]", "LAT[1]", "LAT[2]"]
        );
        assert_eq!(
            table.get(&TagPath::from("NUMPTS")),
            Some(&Field::new(FieldType::Numeric, "03"))
        );
        Ok(())
    }

    #[test]
    fn reconcile_keeps_count_of_conditional_body() -> Result<()> {
        let program = Program::new(
            "BANDS",
            vec![
                E::numeric(2, "Count", "COUNT"),
                E::binary(1, "Mask", "MASK"),
                E::repeat_by("COUNT"),
                E::when("& 0x01", "MASK")?,
                E::alphanumeric(3, "Band", "BAND"),
                E::EndIf,
                E::EndLoop,
                E::End,
            ],
        )?;

        let mut table = FieldTable::new();
        table.insert("COUNT".into(), Field::new(FieldType::Numeric, "05"));
        table.insert("MASK".into(), Field::new(FieldType::Binary, [0u8]));
        assert_eq!(
            paths(&program, &mut table, Mode::Reconcile)?,
            vec!["COUNT", "MASK"]
        );
        assert_eq!(
            table.get(&TagPath::from("COUNT")),
            Some(&Field::new(FieldType::Numeric, "05"))
        );

        // fields beyond the stored count still raise it
        table.insert("MASK".into(), Field::new(FieldType::Binary, [1u8]));
        for i in 0..6 {
            table.insert(TagPath::new("BAND", &[i]), Field::new(FieldType::Alphanumeric, "RED"));
        }
        paths(&program, &mut table, Mode::Reconcile)?;
        assert_eq!(
            table.get(&TagPath::from("COUNT")),
            Some(&Field::new(FieldType::Numeric, "06"))
        );
        Ok(())
    }

    #[test]
    fn conditions_and_nested_loops() -> Result<()> {
        let program = Program::new(
            "NESTED",
            vec![
                E::alphanumeric(1, "Has grid", "FLAG"),
                E::when("eq Y", "FLAG")?,
                E::numeric(1, "Rows", "ROWS"),
                E::repeat_by("ROWS"),
                E::numeric(1, "Columns", "COLS"),
                E::repeat_by("COLS"),
                E::numeric(1, "Value", "V"),
                E::EndLoop,
                E::EndLoop,
                E::EndIf,
                E::End,
            ],
        )?;

        let mut table = FieldTable::new();
        table.insert("FLAG".into(), Field::new(FieldType::Alphanumeric, "Y"));
        table.insert("ROWS".into(), Field::new(FieldType::Numeric, "2"));
        table.insert(TagPath::new("COLS", &[0]), Field::new(FieldType::Numeric, "1"));
        table.insert(TagPath::new("COLS", &[1]), Field::new(FieldType::Numeric, "2"));

        assert_eq!(
            paths(&program, &mut table, Mode::Read)?,
            vec!["FLAG", "ROWS", "COLS[0]", "V[0][0]", "COLS[1]", "V[1][0]", "V[1][1]"]
        );

        table.insert("FLAG".into(), Field::new(FieldType::Alphanumeric, "N"));
        assert_eq!(paths(&program, &mut table, Mode::Read)?, vec!["FLAG"]);
        Ok(())
    }

    #[test]
    fn resolve_prefers_plain_then_longer_scopes() {
        let mut table = FieldTable::new();
        table.insert(TagPath::new("N", &[1]), Field::new(FieldType::Numeric, "5"));
        assert_eq!(
            resolve(&table, "N", &[1, 0]).map(|(path, _)| path),
            Some(TagPath::new("N", &[1]))
        );

        table.insert("N".into(), Field::new(FieldType::Numeric, "7"));
        assert_eq!(
            resolve(&table, "N", &[1, 0]).map(|(path, _)| path),
            Some(TagPath::from("N"))
        );
        assert!(resolve(&table, "M", &[]).is_none());
    }
}
