//! Parsing TRE data into a field table

use bon::Builder;
use tracing::{instrument, trace, warn};

use crate::{
    cursor::{ByteCursor, Window},
    description::Program,
    error::{Error, Result},
    field::{Field, FieldTable},
    walk::{FieldLength, Mode, Walker},
};

/// Options for how TRE data should be parsed
#[derive(Debug, Clone, Copy, Builder)]
pub struct ParseOptions {
    /// Fail instead of warning when a description ends before the declared length
    #[builder(default)]
    pub strict_length: bool,

    /// Keep TREs that cannot be parsed as raw blobs when reading an extension section
    #[builder(default = true)]
    pub raw_fallback: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Fields parsed from one TRE
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub fields: FieldTable,

    /// Bytes the description consumed, at most the declared length
    pub consumed: usize,
}

/// Parse `length` bytes of TRE data at the current cursor position
///
/// Whatever the outcome, the cursor is left at the declared end of the data so the
/// caller can carry on with the next record.
#[instrument(skip(program, cursor, options), fields(program = program.name()), err)]
pub fn read_fields<C: ByteCursor + ?Sized>(
    program: &Program,
    tag: &str,
    cursor: &mut C,
    length: usize,
    options: &ParseOptions,
) -> Result<ReadOutcome> {
    let mut window = Window::new(cursor, length)?;
    let mut fields = FieldTable::new();

    let walked = walk(program, tag, &mut window, &mut fields);
    let consumed = window.consumed();
    window.finish()?;
    walked?;

    if consumed < length {
        let reason = format!(
            "description {} ended after {consumed} of {length} bytes",
            program.name()
        );
        if options.strict_length {
            return Err(Error::invalid(tag, reason));
        }
        warn!("{tag}: {reason}");
    }

    Ok(ReadOutcome { fields, consumed })
}

fn walk<C: ByteCursor + ?Sized>(
    program: &Program,
    tag: &str,
    window: &mut Window<'_, C>,
    fields: &mut FieldTable,
) -> Result<()> {
    let mut walker = Walker::new(program, tag, Mode::Read);
    while let Some(visit) = walker.next(fields)? {
        let needed = match walker.length(&visit, fields)? {
            FieldLength::Exact(n) => n,
            FieldLength::Remaining => window.remaining(),
        };

        let data = window.take(needed)?.map_err(|shortfall| Error::TruncatedRecord {
            tag: tag.to_owned(),
            field: visit.path.to_string(),
            needed: shortfall.needed,
            available: shortfall.available,
        })?;

        trace!("{} = {:?}", visit.path, String::from_utf8_lossy(&data));
        walker.advance(data.len());
        fields.insert(visit.path, Field::new(visit.field.field_type, data));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        description::DescriptionEntry as E,
        field::{FieldType, TagPath},
    };

    fn dimensions() -> Result<Program> {
        Program::new(
            "BGDIM",
            vec![
                E::numeric(5, "Width", "BGWIDTH"),
                E::numeric(5, "Height", "BGHEIGHT"),
                E::End,
            ],
        )
    }

    #[traced_test]
    #[test]
    fn reads_fixed_fields() -> Result<()> {
        let mut cursor = Cursor::new(b"0102400768".to_vec());
        let outcome = read_fields(&dimensions()?, "BGDIM", &mut cursor, 10, &ParseOptions::default())?;

        assert_eq!(outcome.consumed, 10);
        assert_eq!(
            outcome.fields.get(&TagPath::from("BGWIDTH")),
            Some(&Field::new(FieldType::Numeric, "01024"))
        );
        assert_eq!(
            outcome.fields.get(&TagPath::from("BGHEIGHT")),
            Some(&Field::new(FieldType::Numeric, "00768"))
        );
        Ok(())
    }

    #[traced_test]
    #[test]
    fn underrun_warns_or_fails_when_strict() -> Result<()> {
        let program = dimensions()?;
        let input = b"0102400768XX".to_vec();

        let outcome = read_fields(
            &program,
            "BGDIM",
            &mut Cursor::new(input.clone()),
            12,
            &ParseOptions::default(),
        )?;
        assert_eq!(outcome.consumed, 10);
        assert!(logs_contain("ended after 10 of 12 bytes"));

        let strict = ParseOptions::builder().strict_length(true).build();
        let result = read_fields(&program, "BGDIM", &mut Cursor::new(input), 12, &strict);
        assert!(matches!(result, Err(Error::InvalidRecord { .. })));
        Ok(())
    }

    #[test]
    fn failure_leaves_cursor_at_boundary() -> Result<()> {
        let mut cursor = Cursor::new(b"01024007|next".to_vec());
        let result = read_fields(&dimensions()?, "BGDIM", &mut cursor, 8, &ParseOptions::default());

        assert!(matches!(
            result,
            Err(Error::TruncatedRecord {
                needed: 5,
                available: 3,
                ..
            })
        ));
        assert_eq!(cursor.position(), 8);
        Ok(())
    }

    #[test]
    fn gobble_takes_the_rest() -> Result<()> {
        let program = Program::new(
            "NOTE",
            vec![
                E::alphanumeric(2, "Kind", "KIND"),
                E::gobble(FieldType::Alphanumeric, "Text", "TEXT"),
                E::End,
            ],
        )?;

        let outcome = read_fields(
            &program,
            "NOTE",
            &mut Cursor::new(b"ABhello".to_vec()),
            7,
            &ParseOptions::default(),
        )?;
        assert_eq!(
            outcome.fields.get(&TagPath::from("TEXT")).map(Field::as_bytes),
            Some(&b"hello"[..])
        );

        let empty = read_fields(
            &program,
            "NOTE",
            &mut Cursor::new(b"AB".to_vec()),
            2,
            &ParseOptions::default(),
        )?;
        assert_eq!(
            empty.fields.get(&TagPath::from("TEXT")).map(Field::len),
            Some(0)
        );
        Ok(())
    }

    #[test]
    fn loop_without_data_is_rejected() -> Result<()> {
        let program = Program::new(
            "REPEAT",
            vec![
                E::numeric(9, "Count", "COUNT"),
                E::repeat_by("COUNT"),
                E::gobble(FieldType::Alphanumeric, "Rest", "REST"),
                E::EndLoop,
                E::End,
            ],
        )?;

        let mut cursor = Cursor::new(b"050000000".to_vec());
        let result = read_fields(&program, "REPEAT", &mut cursor, 9, &ParseOptions::default());
        assert!(matches!(result, Err(Error::InvalidRecord { .. })));
        assert_eq!(cursor.position(), 9);

        // one iteration may still take an empty rest
        let outcome = read_fields(
            &program,
            "REPEAT",
            &mut Cursor::new(b"000000001".to_vec()),
            9,
            &ParseOptions::default(),
        )?;
        assert_eq!(
            outcome.fields.get(&TagPath::new("REST", &[0])).map(Field::len),
            Some(0)
        );
        Ok(())
    }

    #[test]
    fn skipped_iterations_store_nothing() -> Result<()> {
        let program = Program::new(
            "BANDS",
            vec![
                E::numeric(9, "Count", "COUNT"),
                E::binary(1, "Mask", "MASK"),
                E::repeat_by("COUNT"),
                E::when("& 0x01", "MASK")?,
                E::alphanumeric(3, "Band", "BAND"),
                E::EndIf,
                E::EndLoop,
                E::End,
            ],
        )?;

        let outcome = read_fields(
            &program,
            "BANDS",
            &mut Cursor::new(b"999999999\x00".to_vec()),
            10,
            &ParseOptions::default(),
        )?;
        assert_eq!(outcome.consumed, 10);
        assert_eq!(outcome.fields.len(), 2);
        Ok(())
    }
}
