//! In-memory Mach-O object.
//!
//! Single-section model: every function lands in `__TEXT,__text` and the
//! image carries only a symbol table next to it. No relocation records
//! are emitted; constant references must already be position-independent
//! or resolved at encode time.

use std::mem;

use object::endian::{U16, U32, U64, U64Bytes};
use object::macho;
use object::pod::bytes_of;
use object::{BigEndian, Endianness};

use crate::abi::Abi;
use crate::formats::StringTable;
use crate::utils::{align_up, pad_to};

// Segment protection bits; the object crate does not expose these.
const VM_PROT_READ: u32 = 0x1;
const VM_PROT_WRITE: u32 = 0x2;
const VM_PROT_EXECUTE: u32 = 0x4;

/// One `nlist_64` entry. Symbols written by this backend are always
/// defined and section-relative (`N_SECT`).
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Offset into the image's string table.
    pub string_offset: u32,
    /// 1-based section ordinal; the text section is 1.
    pub section_number: u8,
    /// Offset within the owning section.
    pub value: u64,
    pub external: bool,
}

/// In-memory Mach-O object file with one text section.
pub struct Image {
    abi: Abi,
    text: Vec<u8>,
    symbols: Vec<Symbol>,
    string_table: StringTable,
}

impl Image {
    pub fn new(abi: Abi) -> Self {
        Self {
            abi,
            text: Vec::new(),
            symbols: Vec::new(),
            string_table: StringTable::new(),
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

    /// Interns a symbol name, returning its string-table offset.
    /// Entries are never coalesced.
    pub fn intern(&mut self, name: &str) -> u32 {
        self.string_table.add(name)
    }

    pub fn add_symbol(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    fn pad_name(name: &str) -> [u8; 16] {
        let mut padded = [0u8; 16];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        padded
    }

    /// Serializes the image: header, LC_SEGMENT_64 with one section_64,
    /// LC_SYMTAB, then text bytes, nlist table and string table.
    pub fn to_bytes(&self) -> Vec<u8> {
        let e = self.abi.endianness();
        let u32v = |v: u32| U32::new(e, v);
        let u64v = |v: u64| U64::new(e, v);

        let header_size = mem::size_of::<macho::MachHeader64<Endianness>>();
        let segment_size = mem::size_of::<macho::SegmentCommand64<Endianness>>()
            + mem::size_of::<macho::Section64<Endianness>>();
        let symtab_size = mem::size_of::<macho::SymtabCommand<Endianness>>();
        let sizeofcmds = (segment_size + symtab_size) as u32;

        let text_offset = header_size + segment_size + symtab_size;
        let symbol_offset = align_up((text_offset + self.text.len()) as u64, 8) as usize;
        let nlist_size = mem::size_of::<macho::Nlist64<Endianness>>();
        let string_offset = symbol_offset + self.symbols.len() * nlist_size;

        let header = macho::MachHeader64::<Endianness> {
            // The magic field is declared big-endian, so a little-endian
            // image stores the byte-swapped magic.
            magic: match e {
                Endianness::Little => U32::new(BigEndian, macho::MH_CIGAM_64),
                Endianness::Big => U32::new(BigEndian, macho::MH_MAGIC_64),
            },
            cputype: u32v(self.abi.macho_cpu_type()),
            cpusubtype: u32v(self.abi.macho_cpu_subtype()),
            filetype: u32v(macho::MH_OBJECT),
            ncmds: u32v(2),
            sizeofcmds: u32v(sizeofcmds),
            flags: u32v(0),
            reserved: u32v(0),
        };

        let segment = macho::SegmentCommand64::<Endianness> {
            cmd: u32v(macho::LC_SEGMENT_64),
            cmdsize: u32v(segment_size as u32),
            // Object files carry a single unnamed segment.
            segname: [0; 16],
            vmaddr: u64v(0),
            vmsize: u64v(self.text.len() as u64),
            fileoff: u64v(text_offset as u64),
            filesize: u64v(self.text.len() as u64),
            maxprot: u32v(VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE),
            initprot: u32v(VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE),
            nsects: u32v(1),
            flags: u32v(0),
        };

        let text_section = macho::Section64::<Endianness> {
            sectname: Self::pad_name("__text"),
            segname: Self::pad_name("__TEXT"),
            addr: u64v(0),
            size: u64v(self.text.len() as u64),
            offset: u32v(text_offset as u32),
            align: u32v(4),
            reloff: u32v(0),
            nreloc: u32v(0),
            flags: u32v(
                macho::S_ATTR_PURE_INSTRUCTIONS | macho::S_ATTR_SOME_INSTRUCTIONS,
            ),
            reserved1: u32v(0),
            reserved2: u32v(0),
            reserved3: u32v(0),
        };

        let symtab = macho::SymtabCommand::<Endianness> {
            cmd: u32v(macho::LC_SYMTAB),
            cmdsize: u32v(symtab_size as u32),
            symoff: u32v(symbol_offset as u32),
            nsyms: u32v(self.symbols.len() as u32),
            stroff: u32v(string_offset as u32),
            strsize: u32v(self.string_table.bytes().len() as u32),
        };

        let mut buffer = bytes_of(&header).to_vec();
        buffer.extend_from_slice(bytes_of(&segment));
        buffer.extend_from_slice(bytes_of(&text_section));
        buffer.extend_from_slice(bytes_of(&symtab));
        buffer.extend_from_slice(&self.text);
        pad_to(&mut buffer, 8);

        for symbol in &self.symbols {
            let mut n_type = macho::N_SECT;
            if symbol.external {
                n_type |= macho::N_EXT;
            }
            let entry = macho::Nlist64::<Endianness> {
                n_strx: u32v(symbol.string_offset),
                n_type,
                n_sect: symbol.section_number,
                n_desc: U16::new(e, 0),
                n_value: U64Bytes::new(e, symbol.value),
            };
            buffer.extend_from_slice(bytes_of(&entry));
        }

        buffer.extend_from_slice(self.string_table.bytes());
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_magic_and_filetype() {
        let mut image = Image::new(Abi::Darwin64);
        image.append_text(&[0xc3]);
        let bytes = image.to_bytes();
        // Little-endian image: the file starts cf fa ed fe.
        assert_eq!(&bytes[..4], &macho::MH_MAGIC_64.to_le_bytes());
        assert_eq!(&bytes[..4], &[0xcf, 0xfa, 0xed, 0xfe]);
        // filetype at offset 12.
        assert_eq!(
            u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            macho::MH_OBJECT
        );
    }

    #[test]
    fn text_offset_tracks_appends() {
        let mut image = Image::new(Abi::Darwin64);
        assert_eq!(image.text_len(), 0);
        image.append_text(&[0x90, 0x90]);
        assert_eq!(image.text_len(), 2);
        image.append_text(&[0xc3]);
        assert_eq!(image.text_len(), 3);
    }
}
