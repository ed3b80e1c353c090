//! A single tagged record extension and its fields

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, OnceLock},
};

use crate::{
    description::{Length, Program},
    error::{Error, Result},
    field::{Field, FieldTable, FieldType, TagPath},
    handler::{DescriptionHandler, TreHandler},
    write::reconcile,
};

/// Field holding the data of a TRE without a description
pub const RAW_DATA: &str = "raw_data";

/// Name of the description used for raw TREs
pub const RAW_DESCRIPTION: &str = "raw";

fn raw_program() -> Arc<Program> {
    static RAW: OnceLock<Arc<Program>> = OnceLock::new();
    RAW.get_or_init(|| Arc::new(Program::raw(RAW_DESCRIPTION, RAW_DATA, "Unknown raw data")))
        .clone()
}

/// A TRE: its tag, the description it follows and its field values
///
/// Cloning copies the fields and shares the description.
#[derive(Debug, Clone)]
pub struct Tre {
    tag: String,
    program: Arc<Program>,
    handler: Arc<dyn TreHandler>,
    fields: FieldTable,
}

/// A field together with its description label, as listed by [`Tre::describe`]
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub path: &'a TagPath,
    pub label: Option<&'a str>,
    pub field: &'a Field,
}

impl fmt::Display for FieldDescription<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) = [{}]",
            self.label.unwrap_or(self.path.name()),
            self.path,
            self.field
        )
    }
}

impl Tre {
    /// An empty TRE following `program`, read and written by the interpreter
    pub fn new(tag: impl Into<String>, program: Arc<Program>) -> Self {
        Self::from_parts(tag, program, Arc::new(DescriptionHandler), FieldTable::new())
    }

    pub(crate) fn from_parts(
        tag: impl Into<String>,
        program: Arc<Program>,
        handler: Arc<dyn TreHandler>,
        fields: FieldTable,
    ) -> Self {
        Self {
            tag: tag.into(),
            program,
            handler,
            fields,
        }
    }

    /// A TRE holding `data` as one opaque binary field
    pub fn raw(tag: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let mut fields = FieldTable::new();
        fields.insert(RAW_DATA.into(), Field::new(FieldType::Binary, data));
        Self::from_parts(tag, raw_program(), Arc::new(DescriptionHandler), fields)
    }

    pub fn is_raw(&self) -> bool {
        Arc::ptr_eq(&self.program, &raw_program())
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Name of the description this TRE follows
    pub fn id(&self) -> &str {
        self.program.name()
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, path: impl Into<TagPath>) -> Option<&Field> {
        self.fields.get(&path.into())
    }

    pub fn contains(&self, path: impl Into<TagPath>) -> bool {
        self.fields.contains_key(&path.into())
    }

    /// Fields in table order
    pub fn iter(&self) -> impl Iterator<Item = (&TagPath, &Field)> {
        self.fields.iter()
    }

    /// Fields whose path contains `pattern`
    pub fn find<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = (&'a TagPath, &'a Field)> {
        self.fields.find(pattern)
    }

    /// Set a field, creating it if needed
    ///
    /// The path must name a field of the description at the right loop depth.
    /// Values shorter than a fixed width are padded: text on the right with blanks,
    /// numbers on the left with zeros. Longer values are rejected, as are binary
    /// values of the wrong size. Variable-length fields take the value as is.
    ///
    /// Adding an iteration past a loop's count does not change the count field;
    /// [`Tre::reconcile`] does, and writing always does.
    pub fn set(&mut self, path: impl Into<TagPath>, value: impl AsRef<[u8]>) -> Result<()> {
        let path = path.into();
        let value = value.as_ref();
        let entry = self
            .program
            .literal(path.name(), path.depth())
            .ok_or_else(|| Error::UnknownField {
                tag: self.tag.clone(),
                field: path.to_string(),
            })?;

        let invalid = |reason: String| Error::InvalidField {
            tag: self.tag.clone(),
            field: path.to_string(),
            reason,
        };

        let data = match entry.length {
            Length::Fixed(width) if value.len() > width => {
                return Err(invalid(format!(
                    "{} bytes do not fit in {width}",
                    value.len()
                )))
            }
            Length::Fixed(width) => match entry.field_type {
                FieldType::Alphanumeric => {
                    let mut data = value.to_vec();
                    data.resize(width, b' ');
                    data
                }
                FieldType::Numeric => {
                    let (sign, digits) = match value.first() {
                        Some(sign @ (b'+' | b'-')) => (Some(*sign), &value[1..]),
                        _ => (None, value),
                    };
                    let mut data = Vec::with_capacity(width);
                    data.extend(sign);
                    data.resize(width - digits.len(), b'0');
                    data.extend_from_slice(digits);
                    data
                }
                FieldType::Binary if value.len() != width => {
                    return Err(invalid(format!(
                        "binary value has {} bytes, expected {width}",
                        value.len()
                    )))
                }
                FieldType::Binary => value.to_vec(),
            },
            Length::Gobble | Length::Conditional(_) => value.to_vec(),
        };

        let field = Field::new(entry.field_type, data);
        self.fields.insert(path, field);
        Ok(())
    }

    pub fn remove(&mut self, path: impl Into<TagPath>) -> Option<Field> {
        self.fields.remove(&path.into())
    }

    /// Add blank values for every unset field outside of loops and conditions
    pub fn fill_defaults(&mut self) {
        for (path, field) in self.program.defaults() {
            if !self.fields.contains_key(&path) {
                self.fields.insert(path, field);
            }
        }
    }

    /// Update loop counts and conditional lengths to match the fields present
    pub fn reconcile(&mut self) -> Result<()> {
        reconcile(&self.program, &self.tag, &mut self.fields)
    }

    /// Write the data of this TRE, returning the number of bytes written
    pub fn write(&self, sink: &mut dyn Write) -> Result<usize> {
        self.handler
            .write(&self.program, &self.tag, &self.fields, sink)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.write(&mut data)?;
        Ok(data)
    }

    /// Length of the data [`Tre::write`] would produce
    pub fn compute_length(&self) -> Result<usize> {
        self.write(&mut io::sink())
    }

    /// Whether every field the description requires is present and well sized
    pub fn is_sane(&self) -> bool {
        self.compute_length().is_ok()
    }

    /// Fields with their description labels, in table order
    pub fn describe(&self) -> impl Iterator<Item = FieldDescription<'_>> {
        self.fields.iter().map(|(path, field)| FieldDescription {
            path,
            label: self
                .program
                .literal(path.name(), path.depth())
                .and_then(|entry| entry.label.as_deref()),
            field,
        })
    }
}

impl fmt::Display for Tre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.tag, self.id())?;
        for description in self.describe() {
            writeln!(f, "  {description}")?;
        }
        Ok(())
    }
}
