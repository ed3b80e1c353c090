//! Byte sources the interpreter reads from.

use std::io::{self, Read, Seek, SeekFrom};

/// Synchronous, seekable source of bytes
///
/// Implemented for every [`Read`] + [`Seek`] type, so a `Cursor<&[u8]>` or a
/// buffered file can be handed to the interpreter directly.
pub trait ByteCursor {
    /// Read up to `n` bytes, returning fewer only at end of input
    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>>;

    /// Current absolute offset
    fn tell(&mut self) -> io::Result<u64>;

    /// Move to an absolute offset
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
}

impl<T: Read + Seek> ByteCursor for T {
    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(n.min(u16::MAX as usize));
        self.by_ref().take(n as u64).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }
}

/// Shortfall reported when a read would cross the end of a [`Window`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shortfall {
    pub needed: usize,
    pub available: usize,
}

/// Bounded view over one TRE's data
///
/// Reads never go past the declared length, and [`Window::finish`] leaves the
/// underlying cursor exactly at the declared end whatever was consumed.
pub(crate) struct Window<'a, C: ByteCursor + ?Sized> {
    inner: &'a mut C,
    start: u64,
    limit: usize,
    consumed: usize,
}

impl<'a, C: ByteCursor + ?Sized> Window<'a, C> {
    pub fn new(inner: &'a mut C, limit: usize) -> io::Result<Self> {
        let start = inner.tell()?;
        Ok(Self {
            inner,
            start,
            limit,
            consumed: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.consumed
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Read exactly `n` bytes or report how many were available
    pub fn take(&mut self, n: usize) -> io::Result<Result<Vec<u8>, Shortfall>> {
        if n > self.remaining() {
            return Ok(Err(Shortfall {
                needed: n,
                available: self.remaining(),
            }));
        }

        let data = self.inner.read_bytes(n)?;
        self.consumed += data.len();
        if data.len() < n {
            return Ok(Err(Shortfall {
                needed: n,
                available: data.len(),
            }));
        }
        Ok(Ok(data))
    }

    /// Position the underlying cursor at the declared end of the window
    pub fn finish(self) -> io::Result<()> {
        self.inner.seek_to(self.start + self.limit as u64)
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn window_stops_at_declared_length() -> io::Result<()> {
        let mut cursor = Cursor::new(b"0123456789".to_vec());
        cursor.seek_to(2)?;

        let mut window = Window::new(&mut cursor, 5)?;
        assert_eq!(window.take(3)?, Ok(b"234".to_vec()));
        assert_eq!(
            window.take(3)?,
            Err(Shortfall {
                needed: 3,
                available: 2
            })
        );
        assert_eq!(window.consumed(), 3);
        window.finish()?;

        assert_eq!(cursor.tell()?, 7);
        Ok(())
    }

    #[test]
    fn window_reports_short_input() -> io::Result<()> {
        let mut cursor = Cursor::new(b"abc".to_vec());
        let mut window = Window::new(&mut cursor, 10)?;
        assert_eq!(
            window.take(5)?,
            Err(Shortfall {
                needed: 5,
                available: 3
            })
        );
        Ok(())
    }
}
