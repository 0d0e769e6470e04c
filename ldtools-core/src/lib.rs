pub mod colour;
pub mod document;
pub mod element;
pub mod geometry;
pub mod reference;
pub mod registry;
pub mod target;
pub mod texmap;

pub mod errors {
    use thiserror::Error;

    /// DOM 层的错误分类：`InvalidArgument` 属于校验错误，其余均为状态错误。
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum DomError {
        #[error("invalid argument: {0}")]
        InvalidArgument(String),
        #[error("object is locked")]
        Locked,
        #[error("object is frozen")]
        Frozen,
        #[error("object is already a member of a collection")]
        AlreadyMember,
        #[error("index {index} out of range (len {len})")]
        IndexOutOfRange { index: usize, len: usize },
        #[error("object {0} not found")]
        NotFound(u64),
        #[error("object is not attached to a collection")]
        NotAttached,
        #[error("invalid operation: {0}")]
        InvalidOperation(String),
    }

    impl DomError {
        pub fn invalid(message: impl Into<String>) -> Self {
            Self::InvalidArgument(message.into())
        }

        pub fn operation(message: impl Into<String>) -> Self {
            Self::InvalidOperation(message.into())
        }

        /// 校验类错误（参数/格式）与状态类错误需要调用方区分处理。
        #[inline]
        pub fn is_validation(&self) -> bool {
            matches!(self, Self::InvalidArgument(_))
        }
    }
}

pub mod code {
    use serde::{Deserialize, Serialize};

    /// 代码生成所遵循的发布标准。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum CodeStandard {
        #[default]
        Full,
        OfficialModelRepository,
        PartsLibrary,
    }

    impl CodeStandard {
        /// 仅零件库发布会把 `InlineOnPublish` 的目标展开。
        #[inline]
        pub fn inlines_references(self) -> bool {
            matches!(self, CodeStandard::PartsLibrary)
        }

        #[inline]
        pub fn is_parts_library(self) -> bool {
            matches!(self, CodeStandard::PartsLibrary)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub enum Winding {
        #[default]
        Normal,
        Reversed,
    }

    impl Winding {
        #[inline]
        pub fn is_reversed(self) -> bool {
            matches!(self, Winding::Reversed)
        }

        #[inline]
        pub fn reversed(self) -> Self {
            match self {
                Winding::Normal => Winding::Reversed,
                Winding::Reversed => Winding::Normal,
            }
        }

        #[inline]
        pub fn reversed_if(self, condition: bool) -> Self {
            if condition { self.reversed() } else { self }
        }
    }
}

pub use errors::DomError;
