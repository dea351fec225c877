//! Output writers.
//!
//! One writer variant per output format: textual assembly, ELF, Mach-O,
//! MS-COFF, and a null writer that disables output. A writer is opened
//! into a [`WriterScope`], which registers it as the active writer for
//! the duration of the scope and guarantees exactly one of two outcomes
//! on exit: [`WriterScope::close`] finalizes the artifact, and dropping
//! the scope without closing it (the error path) restores the registry
//! and deletes the partial output file. Successful close is the only
//! path that leaves a file on disk.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;

use crate::abi::Abi;
use crate::encoder::Encoder;
use crate::error::EmitError;
use crate::formats::{elf, macho, mscoff};
use crate::function::{Dialect, FunctionSource};
use crate::registry::{self, ActiveWriter, Saved};

/// An output writer for one artifact, dispatched by format.
pub enum Writer {
    Text(TextWriter),
    Elf(ElfWriter),
    MachO(MachOWriter),
    MsCoff(MsCoffWriter),
    Null,
}

impl Writer {
    /// A textual assembly writer. `dialect_name` must be one of
    /// `go`, `nasm`, `masm`, `gas`.
    pub fn text(
        output_path: impl Into<PathBuf>,
        dialect_name: &str,
        input_path: Option<&Path>,
    ) -> Result<Writer> {
        let dialect = Dialect::from_name(dialect_name)?;
        let prefix = dialect.comment_prefix();
        let banner = match input_path {
            Some(input) => format!(
                "{} Generated by objemit {} from {}",
                prefix,
                env!("CARGO_PKG_VERSION"),
                input.display()
            ),
            None => format!("{} Generated by objemit {}", prefix, env!("CARGO_PKG_VERSION")),
        };
        Ok(Writer::Text(TextWriter {
            output_path: output_path.into(),
            dialect,
            header: format!("{}\n\n", banner),
            file: None,
        }))
    }

    /// An ELF relocatable-object writer. `input_path`, when given, is
    /// recorded as an `STT_FILE` symbol naming the source.
    pub fn elf(
        output_path: impl Into<PathBuf>,
        abi: Abi,
        input_path: Option<&Path>,
    ) -> Result<Writer> {
        if !matches!(abi, Abi::SysV64 | Abi::SysV32) {
            return Err(EmitError::Configuration(format!(
                "ELF output requires a System V target, got {:?}",
                abi
            ))
            .into());
        }
        let mut image = elf::Image::new(abi);
        if let Some(input) = input_path {
            let name_offset = image.intern(&input.display().to_string());
            image.add_symbol(elf::Symbol {
                name_offset,
                value: 0,
                size: 0,
                section_index: elf::SectionIndex(object::elf::SHN_ABS),
                binding: elf::SymbolBinding::Local,
                kind: elf::SymbolKind::File,
            });
        }
        // Every object has code; .rodata and .rela.text are bound
        // lazily when the first function needs them.
        let text = image.bind_section(elf::Section::progbits(
            ".text",
            (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64,
            16,
        ));
        Ok(Writer::Elf(ElfWriter {
            output_path: output_path.into(),
            abi,
            image,
            text,
            rodata: None,
            rela_text: None,
            file: None,
        }))
    }

    /// A Mach-O object writer.
    pub fn macho(output_path: impl Into<PathBuf>, abi: Abi) -> Result<Writer> {
        if abi != Abi::Darwin64 {
            return Err(EmitError::Configuration(format!(
                "Mach-O output requires a Darwin target, got {:?}",
                abi
            ))
            .into());
        }
        Ok(Writer::MachO(MachOWriter {
            output_path: output_path.into(),
            image: macho::Image::new(abi),
            file: None,
        }))
    }

    /// An MS-COFF object writer.
    pub fn mscoff(output_path: impl Into<PathBuf>, abi: Abi) -> Result<Writer> {
        if !matches!(abi, Abi::Win64 | Abi::Win32) {
            return Err(EmitError::Configuration(format!(
                "MS-COFF output requires a Windows target, got {:?}",
                abi
            ))
            .into());
        }
        Ok(Writer::MsCoff(MsCoffWriter {
            output_path: output_path.into(),
            image: mscoff::Image::new(abi),
            file: None,
        }))
    }

    /// A writer that disables output for its scope.
    pub fn null() -> Writer {
        Writer::Null
    }

    /// Opens the writer as the active writer, creating its backing file.
    pub fn open(mut self) -> Result<WriterScope> {
        self.open_backing()?;
        let is_null = matches!(self, Writer::Null);
        let writer = Rc::new(RefCell::new(self));
        let saved = if is_null {
            registry::deactivate()
        } else {
            registry::activate(Rc::clone(&writer))
        };
        Ok(WriterScope {
            writer,
            saved: Some(saved),
            closed: false,
        })
    }

    /// Appends one function's output.
    ///
    /// Every writer requires the function to be bound to an ABI; a
    /// violation is a caller bug, not a recoverable condition.
    pub fn add_function(&mut self, function: &dyn FunctionSource) -> Result<()> {
        if !function.is_abi_bound() {
            return Err(EmitError::Precondition(format!(
                "function `{}` must be bound to an ABI before it can be written",
                function.name()
            ))
            .into());
        }
        match self {
            Writer::Text(writer) => writer.add_function(function),
            Writer::Elf(writer) => writer.add_function(function),
            Writer::MachO(writer) => writer.add_function(function),
            Writer::MsCoff(writer) => writer.add_function(function),
            Writer::Null => Err(EmitError::Precondition(
                "no output is active; the null writer does not accept functions".into(),
            )
            .into()),
        }
    }

    fn open_backing(&mut self) -> Result<()> {
        match self {
            Writer::Text(writer) => writer.open(),
            Writer::Elf(writer) => {
                writer.file = Some(File::create(&writer.output_path).map_err(EmitError::Io)?);
                Ok(())
            }
            Writer::MachO(writer) => {
                writer.file = Some(File::create(&writer.output_path).map_err(EmitError::Io)?);
                Ok(())
            }
            Writer::MsCoff(writer) => {
                writer.file = Some(File::create(&writer.output_path).map_err(EmitError::Io)?);
                Ok(())
            }
            Writer::Null => Ok(()),
        }
    }

    fn finalize(&mut self) -> Result<()> {
        match self {
            Writer::Text(writer) => writer.finalize(),
            Writer::Elf(writer) => {
                let bytes = writer.image.to_bytes();
                commit_bytes(&writer.output_path, writer.file.take(), &bytes)
            }
            Writer::MachO(writer) => {
                let bytes = writer.image.to_bytes();
                commit_bytes(&writer.output_path, writer.file.take(), &bytes)
            }
            Writer::MsCoff(writer) => {
                let bytes = writer.image.to_bytes();
                commit_bytes(&writer.output_path, writer.file.take(), &bytes)
            }
            Writer::Null => Ok(()),
        }
    }

    fn abort(&mut self) {
        let output_path = match self {
            Writer::Text(writer) => {
                writer.file = None;
                Some(&writer.output_path)
            }
            Writer::Elf(writer) => {
                writer.file = None;
                Some(&writer.output_path)
            }
            Writer::MachO(writer) => {
                writer.file = None;
                Some(&writer.output_path)
            }
            Writer::MsCoff(writer) => {
                writer.file = None;
                Some(&writer.output_path)
            }
            Writer::Null => None,
        };
        if let Some(path) = output_path {
            tracing::debug!(path = %path.display(), "removing partial output");
            if let Err(err) = fs::remove_file(path) {
                // Cleanup must never mask the in-flight failure.
                tracing::warn!(path = %path.display(), error = %err, "failed to remove partial output");
            }
        }
    }
}

/// Writes the serialized image through the backing file handle. On
/// failure the partial output is removed and only the write error is
/// returned.
fn commit_bytes(output_path: &Path, file: Option<File>, bytes: &[u8]) -> Result<()> {
    let mut file = file.ok_or_else(|| EmitError::Precondition("writer is not open".into()))?;
    if let Err(err) = file.write_all(bytes).and_then(|_| file.flush()) {
        drop(file);
        let _ = fs::remove_file(output_path);
        return Err(EmitError::Io(err).into());
    }
    tracing::debug!(path = %output_path.display(), size = bytes.len(), "wrote object file");
    Ok(())
}

/// Scope guard for an open writer.
///
/// Holds the registry's saved previous occupant and restores it on every
/// exit path. `close` finalizes the artifact; dropping the guard without
/// closing aborts and deletes the output file.
pub struct WriterScope {
    writer: ActiveWriter,
    saved: Option<Saved>,
    closed: bool,
}

impl WriterScope {
    pub fn add_function(&self, function: &dyn FunctionSource) -> Result<()> {
        self.writer.borrow_mut().add_function(function)
    }

    /// Restores the previously active writer and finalizes the artifact.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        if let Some(saved) = self.saved.take() {
            registry::restore(saved);
        }
        self.writer.borrow_mut().finalize()
    }
}

impl Drop for WriterScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(saved) = self.saved.take() {
            registry::restore(saved);
        }
        self.writer.borrow_mut().abort();
    }
}

/// Textual assembly output.
pub struct TextWriter {
    output_path: PathBuf,
    dialect: Dialect,
    header: String,
    file: Option<File>,
}

impl TextWriter {
    fn open(&mut self) -> Result<()> {
        let mut file = File::create(&self.output_path).map_err(EmitError::Io)?;
        if let Err(err) = file
            .write_all(self.header.as_bytes())
            .and_then(|_| file.flush())
        {
            drop(file);
            let _ = fs::remove_file(&self.output_path);
            return Err(EmitError::Io(err).into());
        }
        self.file = Some(file);
        Ok(())
    }

    fn add_function(&mut self, function: &dyn FunctionSource) -> Result<()> {
        let text = function.format(self.dialect)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| EmitError::Precondition("writer is not open".into()))?;
        // Flush per function so a crash still leaves a valid prefix of
        // the intended file.
        file.write_all(text.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .map_err(EmitError::Io)?;
        tracing::debug!(function = function.name(), "wrote assembly text");
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| EmitError::Precondition("writer is not open".into()))?;
        if let Err(err) = file.flush() {
            drop(file);
            let _ = fs::remove_file(&self.output_path);
            return Err(EmitError::Io(err).into());
        }
        Ok(())
    }
}

/// ELF relocatable-object output.
pub struct ElfWriter {
    output_path: PathBuf,
    abi: Abi,
    image: elf::Image,
    text: elf::SectionIndex,
    rodata: Option<elf::SectionIndex>,
    rela_text: Option<elf::SectionIndex>,
    file: Option<File>,
}

impl ElfWriter {
    fn add_function(&mut self, function: &dyn FunctionSource) -> Result<()> {
        let encoded = function.encode()?;

        // Placement offset must be captured before the append.
        let function_offset = self.image.section(self.text).len();
        self.image.section_mut(self.text).append(&encoded.code);
        tracing::debug!(
            function = function.name(),
            offset = function_offset,
            size = encoded.code.len(),
            "appended code"
        );

        let mut function_rodata_offset = 0;
        if !encoded.const_data.is_empty() {
            let rodata = match self.rodata {
                Some(index) => index,
                None => {
                    let index = self.image.bind_section(elf::Section::progbits(
                        ".rodata",
                        object::elf::SHF_ALLOC as u64,
                        8,
                    ));
                    self.rodata = Some(index);
                    index
                }
            };
            function_rodata_offset = self.image.section(rodata).len();
            self.image.section_mut(rodata).append(&encoded.const_data);
        }

        // This map is scoped to the current call; each function's
        // constants are independent.
        let mut symbol_map: HashMap<&str, u32> = HashMap::new();
        for const_symbol in &encoded.const_symbols {
            let rodata = self.rodata.ok_or_else(|| {
                EmitError::Encoding(format!(
                    "constant symbol `{}` declared without constant data",
                    const_symbol.name
                ))
            })?;
            let name_offset = self.image.intern(&const_symbol.name);
            let index = self.image.add_symbol(elf::Symbol {
                name_offset,
                value: function_rodata_offset + const_symbol.offset,
                size: const_symbol.size,
                section_index: rodata,
                binding: elf::SymbolBinding::Local,
                kind: elf::SymbolKind::DataObject,
            });
            symbol_map.insert(const_symbol.name.as_str(), index);
        }

        if !encoded.relocations.is_empty() {
            let rela_text = match self.rela_text {
                Some(index) => index,
                None => {
                    let mut section = elf::Section::new(".rela.text", object::elf::SHT_RELA);
                    section.align = self.abi.pointer_size();
                    section.entry_size = if self.abi.elf_bitness() == 64 { 24 } else { 12 };
                    section.link = self.image.symtab_index().0 as u32;
                    section.info = self.text.0 as u32;
                    let index = self.image.bind_section(section);
                    self.rela_text = Some(index);
                    index
                }
            };

            let encoder = Encoder::new(self.abi.endianness(), self.abi.elf_bitness());
            for relocation in &encoded.relocations {
                let symbol_index =
                    *symbol_map.get(relocation.symbol.as_str()).ok_or_else(|| {
                        EmitError::Encoding(format!(
                            "relocation references unknown constant symbol `{}`",
                            relocation.symbol
                        ))
                    })?;
                let info = if self.abi.elf_bitness() == 64 {
                    ((symbol_index as u64) << 32) | object::elf::R_X86_64_PC32 as u64
                } else {
                    ((symbol_index as u64) << 8) | object::elf::R_386_PC32 as u64
                };
                // The relocated operand is 4 bytes wide and relative to
                // the end of the field.
                let addend: i64 = -4;
                let mut entry = encoder.word(function_offset + relocation.offset);
                entry.extend_from_slice(&encoder.word(info));
                entry.extend_from_slice(&encoder.word(addend as u64));
                self.image.section_mut(rela_text).append(&entry);
            }
        }

        let name_offset = self.image.intern(function.name());
        self.image.add_symbol(elf::Symbol {
            name_offset,
            value: function_offset,
            size: encoded.code.len() as u64,
            section_index: self.text,
            binding: elf::SymbolBinding::Global,
            kind: elf::SymbolKind::Function,
        });
        Ok(())
    }
}

/// Mach-O object output.
///
/// No relocation records are emitted for constant data; the encoder must
/// produce position-independent references or resolve them itself.
pub struct MachOWriter {
    output_path: PathBuf,
    image: macho::Image,
    file: Option<File>,
}

impl MachOWriter {
    fn add_function(&mut self, function: &dyn FunctionSource) -> Result<()> {
        let encoded = function.encode()?;
        let code = encoded.flattened();
        let function_offset = self.image.text_len();
        self.image.append_text(&code);
        // Darwin C symbol convention.
        let string_offset = self.image.intern(&format!("_{}", function.name()));
        self.image.add_symbol(macho::Symbol {
            string_offset,
            section_number: 1,
            value: function_offset,
            external: true,
        });
        tracing::debug!(
            function = function.name(),
            offset = function_offset,
            "appended code"
        );
        Ok(())
    }
}

/// MS-COFF object output.
pub struct MsCoffWriter {
    output_path: PathBuf,
    image: mscoff::Image,
    file: Option<File>,
}

impl MsCoffWriter {
    fn add_function(&mut self, function: &dyn FunctionSource) -> Result<()> {
        let encoded = function.encode()?;
        let code = encoded.flattened();
        let function_offset = self.image.text_len();
        self.image.append_text(&code);
        self.image.add_symbol(mscoff::SymbolEntry {
            name: function.name().to_string(),
            value: function_offset as u32,
            section_number: 1,
            symbol_type: mscoff::SymbolType::Function,
            storage_class: mscoff::StorageClass::External,
        });
        tracing::debug!(
            function = function.name(),
            offset = function_offset,
            "appended code"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elf_rejects_non_sysv_targets() {
        let err = Writer::elf("out.o", Abi::Darwin64, None).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<EmitError>(),
            Some(EmitError::Configuration(_))
        ));
    }

    #[test]
    fn macho_rejects_non_darwin_targets() {
        let err = Writer::macho("out.o", Abi::SysV64).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<EmitError>(),
            Some(EmitError::Configuration(_))
        ));
    }

    #[test]
    fn mscoff_rejects_non_windows_targets() {
        let err = Writer::mscoff("out.obj", Abi::SysV32).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<EmitError>(),
            Some(EmitError::Configuration(_))
        ));
    }

    #[test]
    fn text_rejects_unknown_dialects() {
        let err = Writer::text("out.s", "intel", None).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<EmitError>(),
            Some(EmitError::Configuration(_))
        ));
    }
}
