//! Target ABI descriptions.
//!
//! The writers are generic over a small closed set of target ABIs. Each
//! ABI supplies the byte order, pointer width and per-format machine
//! identifiers the binary writers need. All currently supported targets
//! are little-endian, but the endianness is plumbed through the
//! [`Encoder`](crate::encoder::Encoder) so a big-endian target only has
//! to touch this module.

use object::Endianness;
use object::{elf, macho, pe};

/// A target ABI supported by the binary writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    /// System V x86-64 (ELF64).
    SysV64,
    /// System V i686 (ELF32).
    SysV32,
    /// macOS x86-64 (Mach-O).
    Darwin64,
    /// Windows x64 (MS-COFF).
    Win64,
    /// Windows x86 (MS-COFF, 32-bit).
    Win32,
}

impl Abi {
    pub fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    /// Width of the ELF object format for this target (64 or 32).
    pub fn elf_bitness(&self) -> u8 {
        match self {
            Abi::SysV32 | Abi::Win32 => 32,
            _ => 64,
        }
    }

    /// Pointer size in bytes.
    pub fn pointer_size(&self) -> u64 {
        match self {
            Abi::SysV32 | Abi::Win32 => 4,
            _ => 8,
        }
    }

    /// ELF `e_machine` value.
    pub fn elf_machine(&self) -> u16 {
        match self {
            Abi::SysV32 | Abi::Win32 => elf::EM_386,
            _ => elf::EM_X86_64,
        }
    }

    /// Mach-O `cputype` value.
    pub fn macho_cpu_type(&self) -> u32 {
        macho::CPU_TYPE_X86_64
    }

    /// Mach-O `cpusubtype` value.
    pub fn macho_cpu_subtype(&self) -> u32 {
        macho::CPU_SUBTYPE_X86_64_ALL
    }

    /// COFF `Machine` value.
    pub fn coff_machine(&self) -> u16 {
        match self {
            Abi::SysV32 | Abi::Win32 => pe::IMAGE_FILE_MACHINE_I386,
            _ => pe::IMAGE_FILE_MACHINE_AMD64,
        }
    }
}
