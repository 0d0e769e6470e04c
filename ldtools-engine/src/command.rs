use std::collections::BTreeMap;

use ldtools_core::code::CodeStandard;
use ldtools_core::element::ElementId;
use tracing::debug;

use crate::analytics::Fix;
use crate::errors::EngineError;
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    /// 按空白拆分命令行：第一个词为命令名。
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let name = words.next()?.to_string();
        Some(Self {
            name,
            args: words.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

/// 处理结果直接转换为响应：成功时携带提示，失败时携带错误描述。
impl From<Result<String, EngineError>> for CommandResponse {
    fn from(result: Result<String, EngineError>) -> Self {
        match result {
            Ok(message) => Self {
                success: true,
                message: Some(message),
            },
            Err(error) => Self {
                success: false,
                message: Some(error.to_string()),
            },
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, args: &[String], workspace: &mut Workspace) -> Result<String, EngineError>;
}

/// 按名称分发命令；名称有序，便于列出。
pub struct CommandBus {
    handlers: BTreeMap<&'static str, Box<dyn CommandHandler>>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: BTreeMap::new(),
        };
        bus.register(UndoCommand);
        bus.register(RedoCommand);
        bus.register(ReverseWindingCommand);
        bus.register(RepairBowtieCommand);
        bus.register(FixAllCommand);
        bus.register(ClearSelectionCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(&self, request: &CommandRequest, workspace: &mut Workspace) -> CommandResponse {
        let result = match self.handlers.get(request.name.as_str()) {
            Some(handler) => handler.execute(&request.args, workspace),
            None => Err(EngineError::UnknownCommand(request.name.clone())),
        };
        if let Err(error) = &result {
            debug!(command = %request.name, error = %error, "命令失败");
        }
        result.into()
    }

    /// 执行一行文本命令。
    pub fn run(&self, line: &str, workspace: &mut Workspace) -> CommandResponse {
        match CommandRequest::parse(line) {
            Some(request) => self.dispatch(&request, workspace),
            None => CommandResponse::from(Err::<String, _>(invalid("空命令"))),
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidCommand(message.into())
}

/// 命令的目标元素：参数中给出的标识，缺省时为当前选中集。
fn targets(args: &[String], workspace: &Workspace) -> Result<Vec<ElementId>, EngineError> {
    if args.is_empty() {
        let selection = workspace.selection();
        if selection.is_empty() {
            return Err(invalid("未指定元素且选中集为空"));
        }
        return Ok(selection);
    }
    args.iter()
        .map(|arg| {
            let raw: u64 = arg.parse().map_err(|_| invalid(format!("无效的元素标识: {arg}")))?;
            workspace
                .element_id(raw)
                .ok_or(EngineError::ElementNotFound(raw))
        })
        .collect()
}

fn parse_standard(arg: Option<&String>) -> Result<CodeStandard, EngineError> {
    match arg.map(|value| value.to_ascii_lowercase()) {
        None => Ok(CodeStandard::Full),
        Some(value) => match value.as_str() {
            "full" => Ok(CodeStandard::Full),
            "omr" | "official_model_repository" => Ok(CodeStandard::OfficialModelRepository),
            "parts" | "parts_library" => Ok(CodeStandard::PartsLibrary),
            other => Err(invalid(format!("未知的发布标准: {other}"))),
        },
    }
}

struct UndoCommand;

impl CommandHandler for UndoCommand {
    fn name(&self) -> &'static str {
        "undo"
    }

    fn execute(&self, _args: &[String], workspace: &mut Workspace) -> Result<String, EngineError> {
        if workspace.undo()? {
            Ok("已撤销".to_string())
        } else {
            Err(invalid("没有可撤销的操作"))
        }
    }
}

struct RedoCommand;

impl CommandHandler for RedoCommand {
    fn name(&self) -> &'static str {
        "redo"
    }

    fn execute(&self, _args: &[String], workspace: &mut Workspace) -> Result<String, EngineError> {
        if workspace.redo()? {
            Ok("已重做".to_string())
        } else {
            Err(invalid("没有可重做的操作"))
        }
    }
}

struct ReverseWindingCommand;

impl CommandHandler for ReverseWindingCommand {
    fn name(&self) -> &'static str {
        "reverse_winding"
    }

    fn execute(&self, args: &[String], workspace: &mut Workspace) -> Result<String, EngineError> {
        let ids = targets(args, workspace)?;
        reverse_all(workspace, &ids)?;
        Ok(format!("已反转 {} 个元素的绕向", ids.len()))
    }
}

/// 多个元素在同一个事务中反转，撤销一次即可还原。
fn reverse_all(workspace: &mut Workspace, ids: &[ElementId]) -> Result<(), EngineError> {
    workspace.begin("反转绕向")?;
    for id in ids {
        if let Err(error) = workspace.reverse_winding(*id) {
            workspace.rollback()?;
            return Err(error);
        }
    }
    workspace.commit()
}

struct RepairBowtieCommand;

impl CommandHandler for RepairBowtieCommand {
    fn name(&self) -> &'static str {
        "repair_bowtie"
    }

    fn execute(&self, args: &[String], workspace: &mut Workspace) -> Result<String, EngineError> {
        let mut repaired = 0;
        for id in targets(args, workspace)? {
            if workspace.apply_fix(id, &Fix::RepairBowtie)? {
                repaired += 1;
            }
        }
        if repaired == 0 {
            return Err(invalid("没有需要修复的蝴蝶结四边形"));
        }
        Ok(format!("已修复 {repaired} 个四边形"))
    }
}

struct FixAllCommand;

impl CommandHandler for FixAllCommand {
    fn name(&self) -> &'static str {
        "fix_all"
    }

    fn execute(&self, args: &[String], workspace: &mut Workspace) -> Result<String, EngineError> {
        let count = workspace.fix_all(parse_standard(args.first())?)?;
        Ok(format!("已修复 {count} 个问题"))
    }
}

struct ClearSelectionCommand;

impl CommandHandler for ClearSelectionCommand {
    fn name(&self) -> &'static str {
        "clear_selection"
    }

    fn execute(&self, _args: &[String], workspace: &mut Workspace) -> Result<String, EngineError> {
        workspace.clear_selection();
        Ok("选中集已清空".to_string())
    }
}
