//! In-memory ELF relocatable object.
//!
//! An [`Image`] owns an ordered list of sections, a symbol table and two
//! string tables, and serializes itself to a complete ET_REL artifact.
//! Construction binds `.shstrtab`, `.strtab` and `.symtab` immediately so
//! later sections (notably `.rela.text`) can reference the symbol table
//! index in their headers; content sections are bound by the writer.
//!
//! Serialization builds the file from the `object` crate's raw header
//! structs: each header is filled with endian-aware field types and
//! appended with `bytes_of`.

use object::elf;
use object::endian::{U16, U32, U64};
use object::pod::bytes_of;
use object::Endianness;

use crate::abi::Abi;
use crate::formats::StringTable;
use crate::utils::align_up;

/// Index of a section bound to an [`Image`]. Index 0 is the reserved
/// null section; the first bound section gets index 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionIndex(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    None,
    Function,
    DataObject,
    /// Source-file marker (`STT_FILE`); uses `SHN_ABS` as its section.
    File,
}

/// One symbol-table entry. `name_offset` is an offset into the image's
/// `.strtab`, obtained from [`Image::intern`].
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name_offset: u32,
    /// Offset within the owning section.
    pub value: u64,
    pub size: u64,
    pub section_index: SectionIndex,
    pub binding: SymbolBinding,
    pub kind: SymbolKind,
}

impl Symbol {
    fn st_info(&self) -> u8 {
        let binding = match self.binding {
            SymbolBinding::Local => elf::STB_LOCAL,
            SymbolBinding::Global => elf::STB_GLOBAL,
            SymbolBinding::Weak => elf::STB_WEAK,
        };
        let kind = match self.kind {
            SymbolKind::None => elf::STT_NOTYPE,
            SymbolKind::Function => elf::STT_FUNC,
            SymbolKind::DataObject => elf::STT_OBJECT,
            SymbolKind::File => elf::STT_FILE,
        };
        (binding << 4) | kind
    }
}

/// A section being built. Header metadata is fixed at bind time except
/// for sizes and offsets, which are derived from the content during
/// serialization.
pub struct Section {
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub align: u64,
    pub link: u32,
    pub info: u32,
    pub entry_size: u64,
    pub data: Vec<u8>,
    name_offset: u32,
}

impl Section {
    pub fn new(name: &str, sh_type: u32) -> Self {
        Self {
            name: name.to_string(),
            sh_type,
            flags: 0,
            align: 1,
            link: 0,
            info: 0,
            entry_size: 0,
            data: Vec::new(),
            name_offset: 0,
        }
    }

    /// An SHT_PROGBITS section with the given flags and alignment.
    pub fn progbits(name: &str, flags: u64, align: u64) -> Self {
        let mut section = Section::new(name, elf::SHT_PROGBITS);
        section.flags = flags;
        section.align = align;
        section
    }

    /// Current content length. This is the placement offset of whatever
    /// gets appended next, so callers must capture it before appending.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

/// In-memory ELF relocatable object file.
pub struct Image {
    abi: Abi,
    sections: Vec<Section>,
    shstrtab: StringTable,
    strtab: StringTable,
    symbols: Vec<Symbol>,
    shstrtab_index: SectionIndex,
    strtab_index: SectionIndex,
    symtab_index: SectionIndex,
}

impl Image {
    pub fn new(abi: Abi) -> Self {
        let mut image = Self {
            abi,
            sections: Vec::new(),
            shstrtab: StringTable::new(),
            strtab: StringTable::new(),
            symbols: Vec::new(),
            shstrtab_index: SectionIndex(0),
            strtab_index: SectionIndex(0),
            symtab_index: SectionIndex(0),
        };

        image.shstrtab_index = image.bind_section(Section::new(".shstrtab", elf::SHT_STRTAB));
        image.strtab_index = image.bind_section(Section::new(".strtab", elf::SHT_STRTAB));

        let word = abi.pointer_size();
        let mut symtab = Section::new(".symtab", elf::SHT_SYMTAB);
        symtab.align = word;
        symtab.entry_size = if abi.elf_bitness() == 64 { 24 } else { 16 };
        symtab.link = image.strtab_index.0 as u32;
        image.symtab_index = image.bind_section(symtab);

        image
    }

    /// Binds `section` into the image, assigning the next index.
    /// Sections are never unbound or reordered.
    pub fn bind_section(&mut self, mut section: Section) -> SectionIndex {
        section.name_offset = self.shstrtab.add(&section.name);
        let index = SectionIndex((self.sections.len() + 1) as u16);
        tracing::debug!(name = %section.name, index = index.0, "bound section");
        self.sections.push(section);
        index
    }

    pub fn section(&self, index: SectionIndex) -> &Section {
        &self.sections[index.0 as usize - 1]
    }

    pub fn section_mut(&mut self, index: SectionIndex) -> &mut Section {
        &mut self.sections[index.0 as usize - 1]
    }

    pub fn symtab_index(&self) -> SectionIndex {
        self.symtab_index
    }

    /// Interns a symbol name into `.strtab`, returning its offset.
    pub fn intern(&mut self, name: &str) -> u32 {
        self.strtab.add(name)
    }

    /// Adds a symbol, returning its table index. The leading null entry
    /// occupies index 0, so the first added symbol is index 1.
    ///
    /// The symbol's `section_index` must refer to a section already
    /// bound to this image, or be a reserved index such as `SHN_ABS`.
    pub fn add_symbol(&mut self, symbol: Symbol) -> u32 {
        debug_assert!(
            (symbol.section_index.0 as usize) <= self.sections.len()
                || symbol.section_index.0 >= elf::SHN_LORESERVE
        );
        self.symbols.push(symbol);
        self.symbols.len() as u32
    }

    /// `sh_info` for the symbol table: one past the index of the last
    /// local symbol (the null entry counts as local).
    fn local_symbol_bound(&self) -> u32 {
        self.symbols
            .iter()
            .rposition(|s| s.binding == SymbolBinding::Local)
            .map(|i| i as u32 + 2)
            .unwrap_or(1)
    }

    fn section_content(&self, position: usize) -> Vec<u8> {
        let index = SectionIndex((position + 1) as u16);
        if index == self.shstrtab_index {
            self.shstrtab.bytes().to_vec()
        } else if index == self.strtab_index {
            self.strtab.bytes().to_vec()
        } else if index == self.symtab_index {
            if self.abi.elf_bitness() == 64 {
                self.symtab_bytes64()
            } else {
                self.symtab_bytes32()
            }
        } else {
            self.sections[position].data.clone()
        }
    }

    fn symtab_bytes64(&self) -> Vec<u8> {
        let e = self.abi.endianness();
        let null = elf::Sym64::<Endianness> {
            st_name: U32::new(e, 0),
            st_info: 0,
            st_other: 0,
            st_shndx: U16::new(e, 0),
            st_value: U64::new(e, 0),
            st_size: U64::new(e, 0),
        };
        let mut data = bytes_of(&null).to_vec();
        for symbol in &self.symbols {
            let entry = elf::Sym64::<Endianness> {
                st_name: U32::new(e, symbol.name_offset),
                st_info: symbol.st_info(),
                st_other: elf::STV_DEFAULT,
                st_shndx: U16::new(e, symbol.section_index.0),
                st_value: U64::new(e, symbol.value),
                st_size: U64::new(e, symbol.size),
            };
            data.extend_from_slice(bytes_of(&entry));
        }
        data
    }

    fn symtab_bytes32(&self) -> Vec<u8> {
        let e = self.abi.endianness();
        let null = elf::Sym32::<Endianness> {
            st_name: U32::new(e, 0),
            st_value: U32::new(e, 0),
            st_size: U32::new(e, 0),
            st_info: 0,
            st_other: 0,
            st_shndx: U16::new(e, 0),
        };
        let mut data = bytes_of(&null).to_vec();
        for symbol in &self.symbols {
            let entry = elf::Sym32::<Endianness> {
                st_name: U32::new(e, symbol.name_offset),
                st_value: U32::new(e, symbol.value as u32),
                st_size: U32::new(e, symbol.size as u32),
                st_info: symbol.st_info(),
                st_other: elf::STV_DEFAULT,
                st_shndx: U16::new(e, symbol.section_index.0),
            };
            data.extend_from_slice(bytes_of(&entry));
        }
        data
    }

    /// Serializes the whole image to bytes: file header, section
    /// contents in index order, then the section header table.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.abi.elf_bitness() == 64 {
            self.to_bytes64()
        } else {
            self.to_bytes32()
        }
    }

    fn layout(&self, header_size: u64, contents: &[Vec<u8>]) -> (Vec<u64>, u64) {
        let mut offset = header_size;
        let mut offsets = Vec::with_capacity(contents.len());
        for (section, content) in self.sections.iter().zip(contents) {
            if !content.is_empty() {
                offset = align_up(offset, section.align.max(1));
            }
            offsets.push(offset);
            offset += content.len() as u64;
        }
        let shoff = align_up(offset, self.abi.pointer_size());
        (offsets, shoff)
    }

    fn to_bytes64(&self) -> Vec<u8> {
        let e = self.abi.endianness();
        let u16v = |v: u16| U16::new(e, v);
        let u32v = |v: u32| U32::new(e, v);
        let u64v = |v: u64| U64::new(e, v);

        let contents: Vec<Vec<u8>> = (0..self.sections.len())
            .map(|i| self.section_content(i))
            .collect();
        let (offsets, shoff) = self.layout(64, &contents);
        let shnum = self.sections.len() as u16 + 1;

        let file_header = elf::FileHeader64::<Endianness> {
            e_ident: elf::Ident {
                magic: elf::ELFMAG,
                class: elf::ELFCLASS64,
                data: match e {
                    Endianness::Little => elf::ELFDATA2LSB,
                    Endianness::Big => elf::ELFDATA2MSB,
                },
                version: elf::EV_CURRENT,
                os_abi: elf::ELFOSABI_SYSV,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: u16v(elf::ET_REL),
            e_machine: u16v(self.abi.elf_machine()),
            e_version: u32v(elf::EV_CURRENT as u32),
            e_entry: u64v(0),
            e_phoff: u64v(0),
            e_shoff: u64v(shoff),
            e_flags: u32v(0),
            e_ehsize: u16v(64),
            e_phentsize: u16v(0),
            e_phnum: u16v(0),
            e_shentsize: u16v(64),
            e_shnum: u16v(shnum),
            e_shstrndx: u16v(self.shstrtab_index.0),
        };

        let mut buffer = bytes_of(&file_header).to_vec();
        for (content, offset) in contents.iter().zip(&offsets) {
            buffer.resize(*offset as usize, 0);
            buffer.extend_from_slice(content);
        }
        buffer.resize(shoff as usize, 0);

        let null_header = elf::SectionHeader64::<Endianness> {
            sh_name: u32v(0),
            sh_type: u32v(elf::SHT_NULL),
            sh_flags: u64v(0),
            sh_addr: u64v(0),
            sh_offset: u64v(0),
            sh_size: u64v(0),
            sh_link: u32v(0),
            sh_info: u32v(0),
            sh_addralign: u64v(0),
            sh_entsize: u64v(0),
        };
        buffer.extend_from_slice(bytes_of(&null_header));

        for (i, section) in self.sections.iter().enumerate() {
            let info = if SectionIndex((i + 1) as u16) == self.symtab_index {
                self.local_symbol_bound()
            } else {
                section.info
            };
            let header = elf::SectionHeader64::<Endianness> {
                sh_name: u32v(section.name_offset),
                sh_type: u32v(section.sh_type),
                sh_flags: u64v(section.flags),
                sh_addr: u64v(0),
                sh_offset: u64v(offsets[i]),
                sh_size: u64v(contents[i].len() as u64),
                sh_link: u32v(section.link),
                sh_info: u32v(info),
                sh_addralign: u64v(section.align),
                sh_entsize: u64v(section.entry_size),
            };
            buffer.extend_from_slice(bytes_of(&header));
        }

        buffer
    }

    fn to_bytes32(&self) -> Vec<u8> {
        let e = self.abi.endianness();
        let u16v = |v: u16| U16::new(e, v);
        let u32v = |v: u32| U32::new(e, v);

        let contents: Vec<Vec<u8>> = (0..self.sections.len())
            .map(|i| self.section_content(i))
            .collect();
        let (offsets, shoff) = self.layout(52, &contents);
        let shnum = self.sections.len() as u16 + 1;

        let file_header = elf::FileHeader32::<Endianness> {
            e_ident: elf::Ident {
                magic: elf::ELFMAG,
                class: elf::ELFCLASS32,
                data: match e {
                    Endianness::Little => elf::ELFDATA2LSB,
                    Endianness::Big => elf::ELFDATA2MSB,
                },
                version: elf::EV_CURRENT,
                os_abi: elf::ELFOSABI_SYSV,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: u16v(elf::ET_REL),
            e_machine: u16v(self.abi.elf_machine()),
            e_version: u32v(elf::EV_CURRENT as u32),
            e_entry: u32v(0),
            e_phoff: u32v(0),
            e_shoff: u32v(shoff as u32),
            e_flags: u32v(0),
            e_ehsize: u16v(52),
            e_phentsize: u16v(0),
            e_phnum: u16v(0),
            e_shentsize: u16v(40),
            e_shnum: u16v(shnum),
            e_shstrndx: u16v(self.shstrtab_index.0),
        };

        let mut buffer = bytes_of(&file_header).to_vec();
        for (content, offset) in contents.iter().zip(&offsets) {
            buffer.resize(*offset as usize, 0);
            buffer.extend_from_slice(content);
        }
        buffer.resize(shoff as usize, 0);

        let null_header = elf::SectionHeader32::<Endianness> {
            sh_name: u32v(0),
            sh_type: u32v(elf::SHT_NULL),
            sh_flags: u32v(0),
            sh_addr: u32v(0),
            sh_offset: u32v(0),
            sh_size: u32v(0),
            sh_link: u32v(0),
            sh_info: u32v(0),
            sh_addralign: u32v(0),
            sh_entsize: u32v(0),
        };
        buffer.extend_from_slice(bytes_of(&null_header));

        for (i, section) in self.sections.iter().enumerate() {
            let info = if SectionIndex((i + 1) as u16) == self.symtab_index {
                self.local_symbol_bound()
            } else {
                section.info
            };
            let header = elf::SectionHeader32::<Endianness> {
                sh_name: u32v(section.name_offset),
                sh_type: u32v(section.sh_type),
                sh_flags: u32v(section.flags as u32),
                sh_addr: u32v(0),
                sh_offset: u32v(offsets[i] as u32),
                sh_size: u32v(contents[i].len() as u32),
                sh_link: u32v(section.link),
                sh_info: u32v(info),
                sh_addralign: u32v(section.align as u32),
                sh_entsize: u32v(section.entry_size as u32),
            };
            buffer.extend_from_slice(bytes_of(&header));
        }

        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_sections_get_monotonic_indices() {
        let mut image = Image::new(Abi::SysV64);
        // .shstrtab, .strtab, .symtab occupy 1..=3.
        assert_eq!(image.symtab_index().0, 3);
        let text = image.bind_section(Section::progbits(
            ".text",
            (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64,
            16,
        ));
        let rodata = image.bind_section(Section::progbits(".rodata", elf::SHF_ALLOC as u64, 8));
        assert_eq!(text.0, 4);
        assert_eq!(rodata.0, 5);
    }

    #[test]
    fn symbol_indices_count_the_null_entry() {
        let mut image = Image::new(Abi::SysV64);
        let text = image.bind_section(Section::progbits(
            ".text",
            (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64,
            16,
        ));
        let name_offset = image.intern("f");
        let index = image.add_symbol(Symbol {
            name_offset,
            value: 0,
            size: 1,
            section_index: text,
            binding: SymbolBinding::Global,
            kind: SymbolKind::Function,
        });
        assert_eq!(index, 1);
    }

    #[test]
    fn local_symbol_bound_is_one_past_last_local() {
        let mut image = Image::new(Abi::SysV64);
        let text = image.bind_section(Section::progbits(
            ".text",
            (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64,
            16,
        ));
        assert_eq!(image.local_symbol_bound(), 1);
        let name = image.intern("local");
        image.add_symbol(Symbol {
            name_offset: name,
            value: 0,
            size: 0,
            section_index: text,
            binding: SymbolBinding::Local,
            kind: SymbolKind::DataObject,
        });
        assert_eq!(image.local_symbol_bound(), 2);
    }

    #[test]
    fn serialized_image_starts_with_elf_magic() {
        let mut image = Image::new(Abi::SysV64);
        let text = image.bind_section(Section::progbits(
            ".text",
            (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64,
            16,
        ));
        image.section_mut(text).append(&[0xc3]);
        let bytes = image.to_bytes();
        assert_eq!(&bytes[..4], b"\x7fELF");
        assert_eq!(bytes[4], elf::ELFCLASS64);
    }

    #[test]
    fn elf32_uses_32_bit_headers() {
        let image = Image::new(Abi::SysV32);
        let bytes = image.to_bytes();
        assert_eq!(bytes[4], elf::ELFCLASS32);
        // e_ehsize at offset 40 in the 32-bit header.
        assert_eq!(u16::from_le_bytes([bytes[40], bytes[41]]), 52);
    }
}
