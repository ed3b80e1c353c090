//! Serializing a field table back into TRE data

use std::io::{self, Write};

use tracing::{debug, instrument};

use crate::{
    description::{Length, Program},
    error::{Error, Result},
    field::FieldTable,
    walk::{resolve, FieldLength, Mode, Walker},
};

/// Bring count and length fields in line with the values actually present
///
/// Every loop count field is set to the number of iterations found in the table,
/// and every field that a conditional length refers to is set to the stored length
/// of the field it sizes, when the length expression can be solved for it.
#[instrument(skip(program, fields), fields(program = program.name()), err)]
pub fn reconcile(program: &Program, tag: &str, fields: &mut FieldTable) -> Result<()> {
    let mut walker = Walker::new(program, tag, Mode::Reconcile);
    while let Some(visit) = walker.next(fields)? {
        let Length::Conditional(expression) = &visit.field.length else {
            continue;
        };
        let Some(stored) = fields.get(&visit.path).map(|f| f.len() as i64) else {
            continue;
        };

        match expression.solve_for(stored) {
            Some((name, value)) if resolve(fields, name, &visit.scope).is_some() => {
                walker.store_integer(fields, name, &visit.scope, value)?;
            }
            _ => debug!("{tag}: length of {} is not recomputed", visit.path),
        }
    }
    Ok(())
}

/// Write the fields of one TRE, returning the number of bytes written
///
/// The table is reconciled on a private copy first, so stale counts and lengths in
/// `fields` never reach the output.
#[instrument(skip(program, fields, sink), fields(program = program.name()), err)]
pub fn write_fields<W: Write + ?Sized>(
    program: &Program,
    tag: &str,
    fields: &FieldTable,
    sink: &mut W,
) -> Result<usize> {
    let mut fields = fields.clone();
    reconcile(program, tag, &mut fields)?;

    let mut walker = Walker::new(program, tag, Mode::Write);
    let mut written = 0;
    while let Some(visit) = walker.next(&mut fields)? {
        let length = walker.length(&visit, &fields)?;

        let Some(field) = fields.get(&visit.path) else {
            if length == FieldLength::Exact(0) {
                continue;
            }
            return Err(Error::IncompleteRecord {
                tag: tag.to_owned(),
                field: visit.path.to_string(),
            });
        };

        if let FieldLength::Exact(expected) = length {
            if field.len() != expected {
                return Err(Error::invalid(
                    tag,
                    format!(
                        "{} holds {} bytes but the description requires {expected}",
                        visit.path,
                        field.len()
                    ),
                ));
            }
        }

        sink.write_all(field.as_bytes())?;
        written += field.len();
    }

    Ok(written)
}

/// Number of bytes [`write_fields`] would produce
pub fn computed_length(program: &Program, tag: &str, fields: &FieldTable) -> Result<usize> {
    write_fields(program, tag, fields, &mut io::sink())
}
