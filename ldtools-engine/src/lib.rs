pub mod analytics;
pub mod command;
mod history;
pub mod library;
pub mod resolve;
pub mod workspace;

pub mod errors {
    use ldtools_core::errors::DomError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error(transparent)]
        Dom(#[from] DomError),
        #[error("element with id {0} not found")]
        ElementNotFound(u64),
        #[error("page with id {0} not found")]
        PageNotFound(u64),
        #[error("step with id {0} not found")]
        StepNotFound(u64),
        #[error("no transaction is open")]
        NoTransaction,
        #[error("a transaction is already open")]
        TransactionOpen,
        #[error("fix is not applicable: {0}")]
        FixNotApplicable(String),
        #[error("unknown command: {0}")]
        UnknownCommand(String),
        #[error("invalid command: {0}")]
        InvalidCommand(String),
    }
}

pub use analytics::{Analyzer, Fix, Problem, ProblemKind, Severity};
pub use errors::EngineError;
pub use library::{ChangeKind, DirectorySource, Library, LibrarySource, MemorySource};
pub use resolve::{Resolution, TargetContext};
pub use workspace::{DocumentEvent, Workspace};

use ldtools_config::LoggingConfig;
use tracing_subscriber::{EnvFilter, fmt};

/// 按配置安装全局日志订阅器。重复调用时保留已安装的订阅器。
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
