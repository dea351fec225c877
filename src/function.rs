//! The seam between the writers and the instruction encoder.
//!
//! Writers never encode instructions themselves; they consume functions
//! through the [`FunctionSource`] trait and receive already-encoded
//! machine code plus the constant-data and relocation records needed to
//! place it in an object file.

use anyhow::Result;

use crate::error::EmitError;

/// Textual assembly dialect accepted by the text writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Plan 9 style assembly with Go line comments.
    Go,
    Nasm,
    Masm,
    Gas,
}

impl Dialect {
    /// Parses a dialect by its configuration name.
    ///
    /// Anything outside the fixed set fails with
    /// [`EmitError::Configuration`], before any file is touched.
    pub fn from_name(name: &str) -> Result<Dialect> {
        match name {
            "go" => Ok(Dialect::Go),
            "nasm" => Ok(Dialect::Nasm),
            "masm" => Ok(Dialect::Masm),
            "gas" => Ok(Dialect::Gas),
            other => Err(EmitError::Configuration(format!(
                "unknown assembly format: {}",
                other
            ))
            .into()),
        }
    }

    /// Line-comment prefix, used for the generated-file banner.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Dialect::Go => "//",
            Dialect::Nasm | Dialect::Masm => ";",
            Dialect::Gas => "#",
        }
    }
}

/// A named constant emitted alongside a function's code.
#[derive(Debug, Clone)]
pub struct ConstSymbol {
    pub name: String,
    /// Offset within the function's constant-data blob.
    pub offset: u64,
    pub size: u64,
}

/// A patch site inside a function's code that refers to one of its
/// constants by name.
#[derive(Debug, Clone)]
pub struct CodeRelocation {
    /// Offset within the function's code bytes.
    pub offset: u64,
    /// Name of the referenced constant symbol.
    pub symbol: String,
}

/// The result of encoding one function.
#[derive(Debug, Clone, Default)]
pub struct EncodedFunction {
    pub code: Vec<u8>,
    pub const_data: Vec<u8>,
    pub const_symbols: Vec<ConstSymbol>,
    pub relocations: Vec<CodeRelocation>,
}

impl EncodedFunction {
    /// Code followed by constant data as one flat blob.
    ///
    /// The Mach-O and MS-COFF writers emit functions this way: constant
    /// references must already be position-independent or resolved at
    /// encode time, since those writers emit no relocations.
    pub fn flattened(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.code.len() + self.const_data.len());
        bytes.extend_from_slice(&self.code);
        bytes.extend_from_slice(&self.const_data);
        bytes
    }
}

/// Interface the writers consume from the instruction encoder.
pub trait FunctionSource {
    /// Symbol name of the function.
    fn name(&self) -> &str;

    /// Whether the function has been bound to a target ABI. Every
    /// writer requires this before accepting the function.
    fn is_abi_bound(&self) -> bool;

    /// Renders the function as assembly text in the given dialect.
    fn format(&self, dialect: Dialect) -> Result<String>;

    /// Encodes the function to machine code. Failures should be raised
    /// as [`EmitError::Encoding`].
    fn encode(&self) -> Result<EncodedFunction>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmitError;

    #[test]
    fn known_dialects_parse() {
        assert_eq!(Dialect::from_name("go").unwrap(), Dialect::Go);
        assert_eq!(Dialect::from_name("nasm").unwrap(), Dialect::Nasm);
        assert_eq!(Dialect::from_name("masm").unwrap(), Dialect::Masm);
        assert_eq!(Dialect::from_name("gas").unwrap(), Dialect::Gas);
    }

    #[test]
    fn unknown_dialect_is_a_configuration_error() {
        let err = Dialect::from_name("intel").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EmitError>(),
            Some(EmitError::Configuration(_))
        ));
    }

    #[test]
    fn comment_prefixes() {
        assert_eq!(Dialect::Go.comment_prefix(), "//");
        assert_eq!(Dialect::Nasm.comment_prefix(), ";");
        assert_eq!(Dialect::Masm.comment_prefix(), ";");
        assert_eq!(Dialect::Gas.comment_prefix(), "#");
    }

    #[test]
    fn flattened_is_code_then_const_data() {
        let encoded = EncodedFunction {
            code: vec![0xc3],
            const_data: vec![1, 2, 3],
            ..Default::default()
        };
        assert_eq!(encoded.flattened(), vec![0xc3, 1, 2, 3]);
    }
}
