//! Bounds-checked read cursor over untrusted bytes.

/// Error returned when a read would run past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("need {needed} bytes at offset {offset}, only {available} available")]
pub struct OutOfBounds {
    pub offset: usize,
    pub needed: usize,
    pub available: usize,
}

/// Explicit offset + remaining length; every slice is validated before it is handed out.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], OutOfBounds> {
        if n > self.remaining() {
            return Err(OutOfBounds {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], OutOfBounds> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, OutOfBounds> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, OutOfBounds> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16_le(&mut self) -> Result<i16, OutOfBounds> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, OutOfBounds> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64_le(&mut self) -> Result<f64, OutOfBounds> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Fixed-width, NUL-padded string field. Text ends at the first NUL.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String, OutOfBounds> {
        let raw = self.take(width)?;
        Ok(nul_terminated_lossy(raw))
    }
}

/// Text up to the first NUL (or the whole slice), invalid UTF-8 replaced.
pub fn nul_terminated_lossy(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Write `text` into a fixed-width NUL-padded field. Text is truncated so that at least one NUL remains.
pub fn write_fixed_str(out: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(width.saturating_sub(1));
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (width - n), 0);
}
