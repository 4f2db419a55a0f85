use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::memory_subsystem::memory::Memory;

#[derive(Debug, Error)]
pub(crate) enum LoadError {
    #[error("failed to read program image {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: '{token}' is not an address marker or a hex byte")]
    Parse { line: usize, token: String },
    #[error("line {line}: address {addr:#010x} lies outside memory")]
    OutOfRange { line: usize, addr: u32 },
    #[error("program image contains no bytes")]
    Empty,
}

// Loads a hex program image. A token of the form `@1000` switches the write
// position to that (hex) address; every other token is one hex byte, stored
// at consecutive addresses. Returns the entry point, the address of the
// first segment.
pub(crate) fn load(path: &Path, memory: &mut Memory) -> Result<u32, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_string(&text, memory)
}

pub(crate) fn load_from_string(text: &str, memory: &mut Memory) -> Result<u32, LoadError> {
    let mut addr: u32 = 0;
    let mut entry: Option<u32> = None;
    let mut loaded_any = false;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        for token in line.split_whitespace() {
            if let Some(hex) = token.strip_prefix('@') {
                addr = u32::from_str_radix(hex, 16).map_err(|_| LoadError::Parse {
                    line: line_no,
                    token: token.to_string(),
                })?;
                entry.get_or_insert(addr);
                continue;
            }
            let byte = u8::from_str_radix(token, 16).map_err(|_| LoadError::Parse {
                line: line_no,
                token: token.to_string(),
            })?;
            memory
                .store_byte(addr, byte)
                .map_err(|_| LoadError::OutOfRange {
                    line: line_no,
                    addr,
                })?;
            entry.get_or_insert(addr);
            addr += 1;
            loaded_any = true;
        }
    }

    if !loaded_any {
        return Err(LoadError::Empty);
    }
    Ok(entry.unwrap_or(0))
}
