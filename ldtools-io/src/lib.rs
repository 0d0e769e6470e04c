use std::fs;
use std::path::Path;

use ldtools_core::code::CodeStandard;
use ldtools_core::document::Document;
use ldtools_core::errors::DomError;
use thiserror::Error;

pub mod codegen;
pub mod parser;
pub mod reader;

pub use codegen::{CodeGenerator, EmitOptions, emit_document, emit_element, format_number};
pub use parser::{parse_document, parse_document_named, parse_element, parse_page};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Dom(#[from] DomError),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError>;
}

/// `.ldr`/`.dat`/`.mpd` 文本文件的读写入口。
#[derive(Debug, Clone, Copy, Default)]
pub struct LdrFacade {
    standard: CodeStandard,
}

impl LdrFacade {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存时使用的发布标准。
    pub fn with_standard(standard: CodeStandard) -> Self {
        Self { standard }
    }

    pub fn standard(&self) -> CodeStandard {
        self.standard
    }
}

impl DocumentLoader for LdrFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path.file_name().and_then(|name| name.to_str());
        let mut document = parser::parse_document_named(&data, file_name)?;
        document.set_path(Some(path.to_path_buf()));
        Ok(document)
    }
}

impl DocumentSaver for LdrFacade {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError> {
        let text = CodeGenerator::new(document).document(document, self.standard);
        fs::write(path, text).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}
