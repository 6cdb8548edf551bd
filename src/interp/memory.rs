//! Flat little-endian byte memory

use super::ExecError;

/// Address 0 stays unmapped so null reads fail
const BASE: u64 = 16;

#[derive(Debug, Clone, Default)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Memory { bytes: vec![0; BASE as usize] }
    }

    /// Reserves `size` zeroed bytes aligned to `align`
    pub fn alloc(&mut self, size: u64, align: u64) -> u64 {
        let align = align.max(1);
        let start = (self.bytes.len() as u64).div_ceil(align) * align;
        self.bytes.resize((start + size.max(1)) as usize, 0);
        start
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, ExecError> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(ExecError::OutOfBounds { addr, len })?;
        if addr < BASE || end > self.bytes.len() {
            return Err(ExecError::OutOfBounds { addr, len });
        }
        Ok(start..end)
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], ExecError> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), ExecError> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, addr: u64, byte: u8, len: usize) -> Result<(), ExecError> {
        let range = self.range(addr, len)?;
        self.bytes[range].fill(byte);
        Ok(())
    }

    pub fn read_uint(&self, addr: u64, size: usize) -> Result<u64, ExecError> {
        let mut raw = [0u8; 8];
        raw[..size.min(8)].copy_from_slice(self.read(addr, size.min(8))?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn write_uint(&mut self, addr: u64, value: u64, size: usize) -> Result<(), ExecError> {
        let raw = value.to_le_bytes();
        self.write(addr, &raw[..size.min(8)])
    }

    /// Reads a NUL-terminated string
    pub fn read_c_str(&self, addr: u64) -> Result<String, ExecError> {
        let start = self.range(addr, 0)?.start;
        let tail = &self.bytes[start..];
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(ExecError::OutOfBounds { addr, len: tail.len() })?;
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }

    /// Copies `values` into fresh memory and returns its address
    pub fn alloc_i64s(&mut self, values: &[i64]) -> u64 {
        let addr = self.alloc(8 * values.len() as u64, 8);
        for (i, value) in values.iter().enumerate() {
            let at = (addr + 8 * i as u64) as usize;
            self.bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        addr
    }

    pub fn alloc_f32s(&mut self, values: &[f32]) -> u64 {
        let addr = self.alloc(4 * values.len() as u64, 16);
        for (i, value) in values.iter().enumerate() {
            let at = (addr + 4 * i as u64) as usize;
            self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        addr
    }
}
