//! In-memory MS-COFF object.
//!
//! One `.text` section plus a symbol table. Symbol names of eight bytes
//! or fewer are stored inline in the 18-byte symbol record; longer names
//! spill into the length-prefixed string table that follows the symbol
//! table.

use std::mem;

use object::endian::{LittleEndian as LE, U16, U16Bytes, U32, U32Bytes};
use object::pe;
use object::pod::bytes_of;

use crate::abi::Abi;

// Complex-type shift: the function bit lives in the upper nibble of the
// low byte of the symbol type field.
const SYM_DTYPE_SHIFT: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    External,
    Static,
}

impl StorageClass {
    fn value(&self) -> u8 {
        match self {
            StorageClass::External => pe::IMAGE_SYM_CLASS_EXTERNAL,
            StorageClass::Static => pe::IMAGE_SYM_CLASS_STATIC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    Function,
    None,
}

impl SymbolType {
    fn value(&self) -> u16 {
        match self {
            SymbolType::Function => pe::IMAGE_SYM_DTYPE_FUNCTION << SYM_DTYPE_SHIFT,
            SymbolType::None => pe::IMAGE_SYM_TYPE_NULL,
        }
    }
}

/// One symbol-table record, prior to name placement.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    /// Offset within the owning section.
    pub value: u32,
    /// 1-based section number; the text section is 1.
    pub section_number: u16,
    pub symbol_type: SymbolType,
    pub storage_class: StorageClass,
}

/// In-memory COFF object file with one text section.
pub struct Image {
    abi: Abi,
    text: Vec<u8>,
    symbols: Vec<SymbolEntry>,
}

impl Image {
    pub fn new(abi: Abi) -> Self {
        Self {
            abi,
            text: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Current text-section length; the placement offset of the next
    /// appended function.
    pub fn text_len(&self) -> u64 {
        self.text.len() as u64
    }

    pub fn append_text(&mut self, bytes: &[u8]) {
        self.text.extend_from_slice(bytes);
    }

    pub fn add_symbol(&mut self, entry: SymbolEntry) {
        self.symbols.push(entry);
    }

    /// Places a symbol name: inline when it fits in eight bytes,
    /// otherwise spilled to the string table (zero marker plus offset).
    fn encode_name(name: &str, strings: &mut Vec<u8>) -> [u8; 8] {
        let mut encoded = [0u8; 8];
        if name.len() <= 8 {
            encoded[..name.len()].copy_from_slice(name.as_bytes());
        } else {
            // String-table offsets count the 4-byte length prefix.
            let offset = strings.len() as u32 + 4;
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
            encoded[4..].copy_from_slice(&offset.to_le_bytes());
        }
        encoded
    }

    /// Serializes the image: file header, one section header, raw text
    /// data, symbol table, then the length-prefixed string table.
    pub fn to_bytes(&self) -> Vec<u8> {
        // The file and section headers carry aligned fields; only the
        // 18-byte symbol records use the unaligned Bytes types.
        let u16v = |v: u16| U16::new(LE, v);
        let u32v = |v: u32| U32::new(LE, v);

        let header_size = mem::size_of::<pe::ImageFileHeader>();
        let section_header_size = mem::size_of::<pe::ImageSectionHeader>();
        let symbol_size = mem::size_of::<pe::ImageSymbol>();

        let text_offset = header_size + section_header_size;
        let symbol_offset = text_offset + self.text.len();

        let file_header = pe::ImageFileHeader {
            machine: u16v(self.abi.coff_machine()),
            number_of_sections: u16v(1),
            time_date_stamp: u32v(0),
            pointer_to_symbol_table: u32v(symbol_offset as u32),
            number_of_symbols: u32v(self.symbols.len() as u32),
            size_of_optional_header: u16v(0),
            characteristics: u16v(0),
        };

        let mut text_name = [0u8; 8];
        text_name[..5].copy_from_slice(b".text");
        let text_header = pe::ImageSectionHeader {
            name: text_name,
            virtual_size: u32v(0),
            virtual_address: u32v(0),
            size_of_raw_data: u32v(self.text.len() as u32),
            pointer_to_raw_data: u32v(text_offset as u32),
            pointer_to_relocations: u32v(0),
            pointer_to_linenumbers: u32v(0),
            number_of_relocations: u16v(0),
            number_of_linenumbers: u16v(0),
            characteristics: u32v(
                pe::IMAGE_SCN_CNT_CODE
                    | pe::IMAGE_SCN_MEM_READ
                    | pe::IMAGE_SCN_MEM_EXECUTE
                    | pe::IMAGE_SCN_ALIGN_16BYTES,
            ),
        };

        let mut buffer = bytes_of(&file_header).to_vec();
        buffer.extend_from_slice(bytes_of(&text_header));
        buffer.extend_from_slice(&self.text);
        debug_assert_eq!(buffer.len(), symbol_offset);
        debug_assert_eq!(symbol_size, 18);

        let mut strings = Vec::new();
        for symbol in &self.symbols {
            let entry = pe::ImageSymbol {
                name: Self::encode_name(&symbol.name, &mut strings),
                value: U32Bytes::new(LE, symbol.value),
                section_number: U16Bytes::new(LE, symbol.section_number),
                typ: U16Bytes::new(LE, symbol.symbol_type.value()),
                storage_class: symbol.storage_class.value(),
                number_of_aux_symbols: 0,
            };
            buffer.extend_from_slice(bytes_of(&entry));
        }

        // Length prefix counts itself.
        buffer.extend_from_slice(&(strings.len() as u32 + 4).to_le_bytes());
        buffer.extend_from_slice(&strings);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_inline() {
        let mut strings = Vec::new();
        let encoded = Image::encode_name("add", &mut strings);
        assert_eq!(&encoded[..3], b"add");
        assert_eq!(&encoded[3..], &[0; 5]);
        assert!(strings.is_empty());
    }

    #[test]
    fn long_names_spill_to_the_string_table() {
        let mut strings = Vec::new();
        let encoded = Image::encode_name("a_rather_long_name", &mut strings);
        assert_eq!(&encoded[..4], &[0; 4]);
        assert_eq!(u32::from_le_bytes(encoded[4..].try_into().unwrap()), 4);
        assert_eq!(&strings[..], b"a_rather_long_name\0");
    }

    #[test]
    fn machine_field_matches_abi() {
        let mut image = Image::new(Abi::Win64);
        image.append_text(&[0xc3]);
        let bytes = image.to_bytes();
        assert_eq!(
            u16::from_le_bytes([bytes[0], bytes[1]]),
            pe::IMAGE_FILE_MACHINE_AMD64
        );
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 1);
    }
}
