//! Per-format in-memory object containers.
//!
//! Each image owns the sections, symbol table and string table of one
//! output artifact and knows how to serialize itself to bytes. The
//! writers in [`crate::writer`] do all bookkeeping through these types.

pub mod elf;
pub mod macho;
pub mod mscoff;

/// Append-only string table shared by the ELF and Mach-O images.
pub struct StringTable {
    data: Vec<u8>,
}

impl StringTable {
    pub fn new() -> Self {
        // Offset 0 is the empty string.
        Self { data: vec![0] }
    }

    /// Appends `name` and returns the offset of this insertion.
    ///
    /// Duplicate names are deliberately not coalesced; each call yields
    /// a fresh entry and callers may rely on per-call identity.
    pub fn add(&mut self, name: &str) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(name.as_bytes());
        self.data.push(0);
        offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_table_does_not_deduplicate() {
        let mut strtab = StringTable::new();
        let first = strtab.add("const");
        let second = strtab.add("const");
        assert_eq!(first, 1);
        assert_eq!(second, first + "const".len() as u32 + 1);
        assert_eq!(strtab.bytes(), b"\0const\0const\0");
    }
}
