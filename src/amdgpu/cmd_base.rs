use crate::error::{IgtError, IgtResult};

/// A growable dword command buffer.
///
/// `cdw` counts the dwords emitted so far; `max_dw` is the reserved capacity.
/// Emitting past the end doubles the reservation.
#[derive(Debug, Clone, Default)]
pub struct CmdBase {
    buf: Vec<u32>,
    cdw: u32,
}

impl CmdBase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(size_dw: u32) -> Self {
        let mut base = Self::new();
        base.allocate_buf(size_dw);
        base
    }

    /// Reset the buffer to `size_dw` zeroed dwords and rewind `cdw`.
    pub fn allocate_buf(&mut self, size_dw: u32) {
        self.buf.clear();
        self.buf.resize(size_dw as usize, 0);
        self.cdw = 0;
    }

    /// Zero the contents and rewind, keeping the reservation.
    pub fn reset(&mut self) {
        self.buf.fill(0);
        self.cdw = 0;
    }

    #[must_use]
    pub const fn cdw(&self) -> u32 {
        self.cdw
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn max_dw(&self) -> u32 {
        self.buf.len() as u32
    }

    /// The emitted dwords.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.buf[..self.cdw as usize]
    }

    /// Little-endian bytes of the emitted dwords, ready to copy into an IB.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_slice().iter().flat_map(|dw| dw.to_le_bytes()).collect()
    }

    fn ensure(&mut self, end_dw: usize) {
        if end_dw > self.buf.len() {
            let new_len = end_dw.max(self.buf.len() * 2).max(16);
            self.buf.resize(new_len, 0);
        }
    }

    pub fn emit(&mut self, value: u32) {
        let at = self.cdw as usize;
        self.ensure(at + 1);
        self.buf[at] = value;
        self.cdw += 1;
    }

    /// Emit `value` until `cdw & mask == 0`.
    pub fn emit_aligned(&mut self, mask: u32, value: u32) {
        while self.cdw & mask != 0 {
            self.emit(value);
        }
    }

    pub fn emit_repeat(&mut self, value: u32, count: u32) {
        for _ in 0..count {
            self.emit(value);
        }
    }

    /// Overwrite an already reserved dword without moving `cdw`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `offset_dw` is outside the reservation.
    pub fn emit_at_offset(&mut self, value: u32, offset_dw: u32) -> IgtResult<()> {
        let slot = self.buf.get_mut(offset_dw as usize).ok_or_else(|| {
            IgtError::InvalidArgument(format!("offset {offset_dw} beyond {} dwords", self.cdw))
        })?;
        *slot = value;
        Ok(())
    }

    /// Copy `size_bytes` of `data` to `cdw + offset_bytes / 4`, then advance `cdw`
    /// past both the gap and the copied data.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the offset or size is not dword aligned or
    /// `data` is shorter than `size_bytes`.
    pub fn emit_buf(&mut self, data: &[u8], offset_bytes: u32, size_bytes: u32) -> IgtResult<()> {
        if offset_bytes % 4 != 0 || size_bytes % 4 != 0 {
            return Err(IgtError::InvalidArgument(format!(
                "emit_buf offset {offset_bytes} / size {size_bytes} not dword aligned"
            )));
        }
        let src = data.get(..size_bytes as usize).ok_or_else(|| {
            IgtError::InvalidArgument(format!(
                "emit_buf wants {size_bytes} bytes, got {}",
                data.len()
            ))
        })?;

        let start = self.cdw as usize + (offset_bytes / 4) as usize;
        let count = (size_bytes / 4) as usize;
        self.ensure(start + count);
        for (slot, chunk) in self.buf[start..start + count]
            .iter_mut()
            .zip(src.chunks_exact(4))
        {
            *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.cdw += (offset_bytes + size_bytes) >> 2;
        Ok(())
    }
}
