//! Binary save-state encoding.
//!
//! A save state is the concatenation of every unit's section, each opened by
//! a 4-byte integrity marker. All multi-byte values are big endian.

use thiserror::Error;

/// Marker written before each section and verified when reading it back.
pub const INTEGRITY_MARKER: u32 = 0xFEED_BEEF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveStateError {
    #[error("save state integrity check failed in section `{section}`")]
    IntegrityCheck { section: &'static str },
    #[error("save state ended unexpectedly in section `{section}`")]
    UnexpectedEof { section: &'static str },
    #[error("invalid value 0x{value:02X} in section `{section}`")]
    InvalidValue { section: &'static str, value: u32 },
    #[error("save state has {0} unread trailing bytes")]
    TrailingBytes(usize),
    #[error("no cartridge is loaded")]
    NoCartridge,
}

/// Append-only big-endian writer.
#[derive(Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker(&mut self) {
        self.u32(INTEGRITY_MARKER);
    }

    pub fn u8(&mut self, val: u8) {
        self.buf.push(val);
    }

    pub fn bool(&mut self, val: bool) {
        self.buf.push(val as u8);
    }

    pub fn u16(&mut self, val: u16) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn u32(&mut self, val: u32) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a save-state buffer.
///
/// The reader remembers the section named by the most recent marker so
/// truncation errors point at the unit whose data ran short.
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            section: "header",
        }
    }

    /// Verify the integrity marker that opens `section`.
    pub fn marker(&mut self, section: &'static str) -> Result<(), SaveStateError> {
        self.section = section;
        if self.u32()? != INTEGRITY_MARKER {
            return Err(SaveStateError::IntegrityCheck { section });
        }
        Ok(())
    }

    pub fn section(&self) -> &'static str {
        self.section
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SaveStateError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(SaveStateError::UnexpectedEof {
                section: self.section,
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, SaveStateError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, SaveStateError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, SaveStateError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, SaveStateError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], SaveStateError> {
        self.take(len)
    }

    pub fn fill(&mut self, out: &mut [u8]) -> Result<(), SaveStateError> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    /// Error for a decoded value outside its valid range.
    pub fn invalid(&self, value: u32) -> SaveStateError {
        SaveStateError::InvalidValue {
            section: self.section,
            value,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn finish(self) -> Result<(), SaveStateError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(SaveStateError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_mismatch_names_section() {
        let mut w = StateWriter::new();
        w.u32(0xDEAD_BEEF);
        let data = w.into_inner();
        let mut r = StateReader::new(&data);
        assert_eq!(
            r.marker("timer"),
            Err(SaveStateError::IntegrityCheck { section: "timer" })
        );
    }

    #[test]
    fn values_are_big_endian() {
        let mut w = StateWriter::new();
        w.marker();
        w.u16(0x1234);
        w.bool(true);
        let data = w.into_inner();
        assert_eq!(&data[..], &[0xFE, 0xED, 0xBE, 0xEF, 0x12, 0x34, 0x01]);

        let mut r = StateReader::new(&data);
        r.marker("test").unwrap();
        assert_eq!(r.u16().unwrap(), 0x1234);
        assert!(r.bool().unwrap());
        r.finish().unwrap();
    }

    #[test]
    fn truncated_buffer_reports_current_section() {
        let mut w = StateWriter::new();
        w.marker();
        w.u8(1);
        let data = w.into_inner();
        let mut r = StateReader::new(&data);
        r.marker("serial").unwrap();
        r.u8().unwrap();
        assert_eq!(
            r.u16(),
            Err(SaveStateError::UnexpectedEof { section: "serial" })
        );
    }
}
