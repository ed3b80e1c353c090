//! Field values and the ordered table a TRE keeps them in.

use std::{fmt, str::FromStr};

use byteorder::{BigEndian, ByteOrder};
use derive_more::derive::{Deref, Display, IntoIterator};
use indexmap::IndexMap;

use crate::error::Error;

/// Encoding class of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FieldType {
    /// BCS-A: printable characters, blank padded on the right
    #[display("BCS-A")]
    Alphanumeric,

    /// BCS-N: digits with an optional sign, zero padded on the left
    #[display("BCS-N")]
    Numeric,

    /// Opaque bytes; two, four and eight byte integers are big-endian
    #[display("binary")]
    Binary,
}

impl FieldType {
    /// Byte used to fill a blank field of this type
    pub const fn fill(self) -> u8 {
        match self {
            FieldType::Alphanumeric => b' ',
            FieldType::Numeric => b'0',
            FieldType::Binary => 0,
        }
    }
}

/// Key of a field inside a [`FieldTable`]
///
/// Fields outside of any loop use their plain tag. Fields inside loops carry one
/// index per enclosing loop, outermost first, and render as `LON[0][1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagPath {
    Plain(String),
    Indexed(String, Vec<usize>),
}

impl TagPath {
    pub fn new(name: impl Into<String>, indices: &[usize]) -> Self {
        if indices.is_empty() {
            TagPath::Plain(name.into())
        } else {
            TagPath::Indexed(name.into(), indices.to_vec())
        }
    }

    /// The tag without any loop indices
    pub fn name(&self) -> &str {
        match self {
            TagPath::Plain(name) | TagPath::Indexed(name, _) => name,
        }
    }

    pub fn indices(&self) -> &[usize] {
        match self {
            TagPath::Plain(_) => &[],
            TagPath::Indexed(_, indices) => indices,
        }
    }

    /// Number of loops the path sits inside
    pub fn depth(&self) -> usize {
        self.indices().len()
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        for index in self.indices() {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

impl FromStr for TagPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::CustomError(format!("invalid field path {s:?}"));

        let (name, mut rest) = match s.find('[') {
            Some(at) => s.split_at(at),
            None => (s, ""),
        };
        if name.is_empty() {
            return Err(invalid());
        }

        let mut indices = Vec::new();
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[').ok_or_else(invalid)?;
            let close = inner.find(']').ok_or_else(invalid)?;
            indices.push(inner[..close].parse().map_err(|_| invalid())?);
            rest = &inner[close + 1..];
        }

        Ok(TagPath::new(name, &indices))
    }
}

impl From<&str> for TagPath {
    /// Parses `NAME[i][j]`, treating anything unparsable as a plain tag
    fn from(value: &str) -> Self {
        value
            .parse()
            .unwrap_or_else(|_| TagPath::Plain(value.to_owned()))
    }
}

impl From<String> for TagPath {
    fn from(value: String) -> Self {
        TagPath::from(value.as_str())
    }
}

impl From<&TagPath> for TagPath {
    fn from(value: &TagPath) -> Self {
        value.clone()
    }
}

/// A single field value, stored as the raw bytes found on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    field_type: FieldType,
    data: Vec<u8>,
}

impl Field {
    pub fn new(field_type: FieldType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            field_type,
            data: data.into(),
        }
    }

    /// A field of `length` fill bytes for its type
    pub fn blank(field_type: FieldType, length: usize) -> Self {
        Self::new(field_type, vec![field_type.fill(); length])
    }

    /// Encode an integer into a field of exactly `width` bytes
    ///
    /// Text fields are zero padded on the left, binary fields are written big-endian.
    /// Returns `None` if the value does not fit.
    pub fn from_integer(field_type: FieldType, width: usize, value: i64) -> Option<Self> {
        match field_type {
            FieldType::Binary => {
                if width == 0 || width > 8 || value < 0 {
                    return None;
                }
                let value = value as u64;
                if width < 8 && value >> (width * 8) != 0 {
                    return None;
                }
                let mut data = vec![0; width];
                BigEndian::write_uint(&mut data, value, width);
                Some(Self::new(field_type, data))
            }
            _ => {
                let text = format!("{value:0width$}");
                (text.len() == width).then(|| Self::new(field_type, text))
            }
        }
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Text view of the value, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Integer value of the field
    ///
    /// Text is trimmed of blanks before parsing. Binary fields of up to eight bytes
    /// are read as big-endian unsigned integers.
    pub fn to_integer(&self) -> Option<i64> {
        match self.field_type {
            FieldType::Binary => self.to_unsigned().and_then(|v| i64::try_from(v).ok()),
            _ => self.as_str()?.trim().parse().ok(),
        }
    }

    /// Unsigned value of the field, used for bit mask conditions
    pub fn to_unsigned(&self) -> Option<u64> {
        match self.field_type {
            FieldType::Binary => match self.data.len() {
                1..=8 => Some(BigEndian::read_uint(&self.data, self.data.len())),
                _ => None,
            },
            _ => self.as_str()?.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field_type {
            FieldType::Binary => {
                write!(f, "0x")?;
                for byte in &self.data {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            _ => f.write_str(&String::from_utf8_lossy(&self.data)),
        }
    }
}

/// Ordered mapping of [`TagPath`] to [`Field`]
///
/// Iteration follows insertion order, which for parsed TREs is the order the
/// description visits the fields. Equality ignores order.
#[derive(Debug, Clone, Default, PartialEq, Deref, IntoIterator)]
#[into_iterator(owned, ref)]
pub struct FieldTable {
    fields: IndexMap<TagPath, Field>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping the position of a replaced one
    pub fn insert(&mut self, path: TagPath, field: Field) -> Option<Field> {
        self.fields.insert(path, field)
    }

    pub fn get_mut(&mut self, path: &TagPath) -> Option<&mut Field> {
        self.fields.get_mut(path)
    }

    pub fn remove(&mut self, path: &TagPath) -> Option<Field> {
        self.fields.shift_remove(path)
    }

    /// Fields whose rendered path contains `pattern`
    pub fn find<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = (&'a TagPath, &'a Field)> {
        self.fields
            .iter()
            .filter(move |(path, _)| path.to_string().contains(pattern))
    }

    /// Number of iterations present for a loop level
    ///
    /// Looks at every field called `name` whose indices start with `prefix` and
    /// returns one past the largest index found right after the prefix.
    pub fn extent(&self, name: &str, prefix: &[usize]) -> usize {
        self.fields
            .keys()
            .filter(|path| path.name() == name)
            .filter_map(|path| {
                let indices = path.indices();
                (indices.len() > prefix.len() && indices.starts_with(prefix))
                    .then(|| indices[prefix.len()] + 1)
            })
            .max()
            .unwrap_or(0)
    }
}
