use crate::cpu::ExecutionError;

// Flat byte-addressable memory, little endian. Accesses need not be
// aligned, only in bounds.
pub(crate) struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub(crate) fn new(size: usize) -> Memory {
        Memory {
            bytes: vec![0; size],
        }
    }

    fn check(&self, addr: u32, len: u32) -> Result<usize, ExecutionError> {
        let end = addr as u64 + len as u64;
        if end > self.bytes.len() as u64 {
            return Err(ExecutionError::OutOfBounds { addr, len });
        }
        Ok(addr as usize)
    }

    pub(crate) fn load_byte(&self, addr: u32) -> Result<u8, ExecutionError> {
        let at = self.check(addr, 1)?;
        Ok(self.bytes[at])
    }

    pub(crate) fn load_half(&self, addr: u32) -> Result<u16, ExecutionError> {
        let at = self.check(addr, 2)?;
        Ok(u16::from_le_bytes([self.bytes[at], self.bytes[at + 1]]))
    }

    pub(crate) fn load_word(&self, addr: u32) -> Result<u32, ExecutionError> {
        let at = self.check(addr, 4)?;
        Ok(u32::from_le_bytes([
            self.bytes[at],
            self.bytes[at + 1],
            self.bytes[at + 2],
            self.bytes[at + 3],
        ]))
    }

    pub(crate) fn store_byte(&mut self, addr: u32, value: u8) -> Result<(), ExecutionError> {
        let at = self.check(addr, 1)?;
        self.bytes[at] = value;
        Ok(())
    }

    pub(crate) fn store_half(&mut self, addr: u32, value: u16) -> Result<(), ExecutionError> {
        let at = self.check(addr, 2)?;
        self.bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub(crate) fn store_word(&mut self, addr: u32, value: u32) -> Result<(), ExecutionError> {
        let at = self.check(addr, 4)?;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    // instruction fetch shares the data path
    pub(crate) fn fetch_word(&self, addr: u32) -> Result<u32, ExecutionError> {
        self.load_word(addr)
    }
}
