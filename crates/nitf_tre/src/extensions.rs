//! Extension sections: the concatenated TREs inside a container header.
//!
//! | Offset (bytes) | Field | Description                                    |
//! |----------------|-------|------------------------------------------------|
//! | 0x0000         | CETAG | 6 bytes: tag, blank padded on the right        |
//! | 0x0006         | CEL   | 5 bytes: ASCII decimal length of the data      |
//! | 0x000B         | CEDATA| CEL bytes: the TRE data                        |
//!
//! Records follow each other with no padding until the section length is used up.

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument, warn};

use crate::{
    cursor::ByteCursor,
    error::{Error, Result},
    registry::HandlerRegistry,
    tre::Tre,
};

/// Largest data length the five digit CEL field can express
pub const MAX_DATA_LENGTH: usize = 99_999;

/// Header in front of every TRE in an extension section
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct ExtensionHeader {
    pub tag: [u8; 6],
    pub length: [u8; 5],
}

impl ExtensionHeader {
    pub const SIZE: usize = 11;

    pub fn new(tag: &str, length: usize) -> Result<Self> {
        if tag.is_empty() || tag.len() > 6 || !tag.is_ascii() {
            return Err(Error::CustomError(format!("invalid TRE tag {tag:?}")));
        }
        if length > MAX_DATA_LENGTH {
            return Err(Error::invalid(
                tag,
                format!("{length} bytes exceed the largest TRE ({MAX_DATA_LENGTH})"),
            ));
        }

        let mut header = Self {
            tag: [b' '; 6],
            length: [b'0'; 5],
        };
        header.tag[..tag.len()].copy_from_slice(tag.as_bytes());
        header.length.copy_from_slice(format!("{length:05}").as_bytes());
        Ok(header)
    }

    /// Tag with trailing blanks removed
    pub fn tag(&self) -> String {
        String::from_utf8_lossy(&self.tag).trim_end().to_owned()
    }

    pub fn data_length(&self) -> Result<usize> {
        std::str::from_utf8(&self.length)
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| {
                Error::invalid(
                    &self.tag(),
                    format!(
                        "length {:?} is not a number",
                        String::from_utf8_lossy(&self.length)
                    ),
                )
            })
    }
}

/// The TREs of one extension section, in order
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    tres: Vec<Tre>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tres.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tre> {
        self.tres.iter()
    }

    pub fn push(&mut self, tre: Tre) {
        self.tres.push(tre);
    }

    pub fn remove(&mut self, index: usize) -> Option<Tre> {
        (index < self.tres.len()).then(|| self.tres.remove(index))
    }

    /// Every TRE with the given tag
    pub fn by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Tre> {
        self.tres.iter().filter(move |tre| tre.tag() == tag)
    }

    /// Read a section of `length` bytes
    ///
    /// Each TRE is parsed inside its own declared length. A TRE that has no handler
    /// or fails to parse is kept as a raw TRE when the registry's options allow it,
    /// and reading continues with the next one.
    #[instrument(skip(registry, reader), err)]
    pub fn read<R: Read + Seek>(
        registry: &HandlerRegistry,
        reader: &mut R,
        length: usize,
    ) -> Result<Self> {
        let start = reader.stream_position()?;
        let end = start + length as u64;
        let mut extensions = Self::new();

        let mut position = start;
        while position < end {
            let available = (end - position) as usize;
            if available < ExtensionHeader::SIZE {
                return Err(Error::TruncatedRecord {
                    tag: "extensions".into(),
                    field: "CETAG".into(),
                    needed: ExtensionHeader::SIZE,
                    available,
                });
            }

            let header = ExtensionHeader::read(reader)?;
            let tag = header.tag();
            let data_length = header.data_length()?;
            let data_start = position + ExtensionHeader::SIZE as u64;
            if data_length > available - ExtensionHeader::SIZE {
                return Err(Error::TruncatedRecord {
                    tag,
                    field: "CEDATA".into(),
                    needed: data_length,
                    available: available - ExtensionHeader::SIZE,
                });
            }

            let tre = match registry.read_tre(&tag, data_length, &mut *reader) {
                Ok(tre) => tre,
                Err(e) if registry.options().raw_fallback => {
                    match e {
                        Error::UnknownTre { .. } => debug!("{e}, keeping raw data"),
                        _ => warn!("{tag}: {e}, keeping raw data"),
                    }
                    reader.seek(SeekFrom::Start(data_start))?;
                    let data = reader.read_bytes(data_length)?;
                    Tre::raw(tag, data)
                }
                Err(e) => return Err(e),
            };
            extensions.push(tre);

            position = data_start + data_length as u64;
            reader.seek(SeekFrom::Start(position))?;
        }

        Ok(extensions)
    }

    /// Write every TRE with its header, returning the number of bytes written
    #[instrument(skip_all, err)]
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<usize> {
        let mut written = 0;
        for tre in &self.tres {
            let data = tre.to_bytes()?;
            ExtensionHeader::new(tre.tag(), data.len())?.write(writer)?;
            writer.write_all(&data)?;
            written += ExtensionHeader::SIZE + data.len();
        }
        Ok(written)
    }
}

impl<'a> IntoIterator for &'a Extensions {
    type Item = &'a Tre;
    type IntoIter = std::slice::Iter<'a, Tre>;

    fn into_iter(self) -> Self::IntoIter {
        self.tres.iter()
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn header_formats_tag_and_length() -> Result<()> {
        let header = ExtensionHeader::new("BGDIM", 10)?;
        assert_eq!(&header.tag, b"BGDIM ");
        assert_eq!(&header.length, b"00010");
        assert_eq!(header.tag(), "BGDIM");
        assert_eq!(header.data_length()?, 10);

        let mut out = Cursor::new(Vec::new());
        header.write(&mut out)?;
        assert_eq!(out.into_inner(), b"BGDIM 00010".to_vec());

        assert!(ExtensionHeader::new("TOOLONG", 1).is_err());
        assert!(ExtensionHeader::new("BIG", 100_000).is_err());
        Ok(())
    }

    #[test]
    fn header_rejects_non_numeric_length() -> Result<()> {
        let header = ExtensionHeader::read(&mut Cursor::new(b"BGDIM 0001X"))?;
        assert!(matches!(header.data_length(), Err(Error::InvalidRecord { .. })));
        Ok(())
    }
}
