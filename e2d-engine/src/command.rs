use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use e2d_core::geometry::Vector2;
use tracing::warn;

use crate::document::{CommandOutcome, Document};
use crate::errors::EngineError;
use crate::host::EntityHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// 一步位移（世界坐标）。
    pub fn offset(self, cell_scale: f32) -> Vector2 {
        let unit = match self {
            Direction::Up => Vector2::new(0.0, 1.0),
            Direction::Down => Vector2::new(0.0, -1.0),
            Direction::Left => Vector2::new(-1.0, 0.0),
            Direction::Right => Vector2::new(1.0, 0.0),
        };
        unit.scaled(cell_scale)
    }
}

/// 文档能够执行的全部编辑命令。
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Transform(Direction),
    NextTemplate,
    PreviousTemplate,
    SelectTemplate(usize),
    NextLayer,
    PreviousLayer,
    SetLayer(usize),
    NewLayer,
    NormalMode,
    ToggleGrab,
    ToggleScale,
    ToggleBox,
    ToggleLine,
    TogglePalette,
    Create,
    Erase,
    Clone,
    Rotate,
    FlipX,
    FlipY,
    SelectSimilar,
    SelectAllInLayer,
    PinCursor,
    DeselectAll,
    ToggleAll,
    ToggleHideLayer,
    ToggleHideOtherLayers,
    Undo,
    FocusView,
    Flush,
    Write(PathBuf),
    Load(PathBuf),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Transform(Direction::Up) => "transform_up",
            Command::Transform(Direction::Down) => "transform_down",
            Command::Transform(Direction::Left) => "transform_left",
            Command::Transform(Direction::Right) => "transform_right",
            Command::NextTemplate => "next_template",
            Command::PreviousTemplate => "previous_template",
            Command::SelectTemplate(_) => "select_template",
            Command::NextLayer => "next_layer",
            Command::PreviousLayer => "previous_layer",
            Command::SetLayer(_) => "set_layer",
            Command::NewLayer => "new_layer",
            Command::NormalMode => "normal_mode",
            Command::ToggleGrab => "toggle_grab",
            Command::ToggleScale => "toggle_scale",
            Command::ToggleBox => "toggle_box",
            Command::ToggleLine => "toggle_line",
            Command::TogglePalette => "toggle_palette",
            Command::Create => "create",
            Command::Erase => "erase",
            Command::Clone => "clone",
            Command::Rotate => "rotate",
            Command::FlipX => "flip_x",
            Command::FlipY => "flip_y",
            Command::SelectSimilar => "select_similar",
            Command::SelectAllInLayer => "select_all_in_layer",
            Command::PinCursor => "pin_cursor",
            Command::DeselectAll => "deselect_all",
            Command::ToggleAll => "toggle_all",
            Command::ToggleHideLayer => "toggle_hide_layer",
            Command::ToggleHideOtherLayers => "toggle_hide_other_layers",
            Command::Undo => "undo",
            Command::FocusView => "focus_view",
            Command::Flush => "flush",
            Command::Write(_) => "write",
            Command::Load(_) => "load",
        }
    }
}

/// 解析一行文本命令，例如 `select_template 2` 或 `write level.lvl`。
impl FromStr for Command {
    type Err = EngineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let request = CommandRequest::parse(line)
            .ok_or_else(|| EngineError::UnknownCommand(line.trim().to_string()))?;
        CommandBus::new().parse(&request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// 按空白切分：第一个词是命令名，其余为参数。空行返回 `None`。
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let name = words.next()?;
        Some(Self {
            name: name.to_string(),
            args: words.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
    pub outcome: Option<CommandOutcome>,
}

impl CommandResponse {
    pub fn ok(outcome: CommandOutcome, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            outcome: Some(outcome),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            outcome: None,
        }
    }
}

pub struct CommandContext<'a, H: EntityHost> {
    pub document: &'a mut Document<H>,
}

type CommandParser = fn(&[String]) -> Result<Command, EngineError>;

/// 命令名到解析函数的注册表，负责把文本请求转换成 [`Command`] 并交给文档执行。
pub struct CommandBus {
    parsers: HashMap<&'static str, CommandParser>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            parsers: HashMap::new(),
        };
        bus.register("transform_up", |_| Ok(Command::Transform(Direction::Up)));
        bus.register("transform_down", |_| Ok(Command::Transform(Direction::Down)));
        bus.register("transform_left", |_| Ok(Command::Transform(Direction::Left)));
        bus.register("transform_right", |_| {
            Ok(Command::Transform(Direction::Right))
        });
        bus.register("next_template", |_| Ok(Command::NextTemplate));
        bus.register("previous_template", |_| Ok(Command::PreviousTemplate));
        bus.register("select_template", |args| {
            index_arg("select_template", args).map(Command::SelectTemplate)
        });
        bus.register("next_layer", |_| Ok(Command::NextLayer));
        bus.register("previous_layer", |_| Ok(Command::PreviousLayer));
        bus.register("set_layer", |args| {
            index_arg("set_layer", args).map(Command::SetLayer)
        });
        bus.register("new_layer", |_| Ok(Command::NewLayer));
        bus.register("normal_mode", |_| Ok(Command::NormalMode));
        bus.register("toggle_grab", |_| Ok(Command::ToggleGrab));
        bus.register("toggle_scale", |_| Ok(Command::ToggleScale));
        bus.register("toggle_box", |_| Ok(Command::ToggleBox));
        bus.register("toggle_line", |_| Ok(Command::ToggleLine));
        bus.register("toggle_palette", |_| Ok(Command::TogglePalette));
        bus.register("create", |_| Ok(Command::Create));
        bus.register("erase", |_| Ok(Command::Erase));
        bus.register("clone", |_| Ok(Command::Clone));
        bus.register("rotate", |_| Ok(Command::Rotate));
        bus.register("flip_x", |_| Ok(Command::FlipX));
        bus.register("flip_y", |_| Ok(Command::FlipY));
        bus.register("select_similar", |_| Ok(Command::SelectSimilar));
        bus.register("select_all_in_layer", |_| Ok(Command::SelectAllInLayer));
        bus.register("pin_cursor", |_| Ok(Command::PinCursor));
        bus.register("deselect_all", |_| Ok(Command::DeselectAll));
        bus.register("toggle_all", |_| Ok(Command::ToggleAll));
        bus.register("toggle_hide_layer", |_| Ok(Command::ToggleHideLayer));
        bus.register("toggle_hide_other_layers", |_| {
            Ok(Command::ToggleHideOtherLayers)
        });
        bus.register("undo", |_| Ok(Command::Undo));
        bus.register("focus_view", |_| Ok(Command::FocusView));
        bus.register("flush", |_| Ok(Command::Flush));
        bus.register("write", |args| path_arg("write", args).map(Command::Write));
        bus.register("load", |args| path_arg("load", args).map(Command::Load));
        bus
    }

    pub fn register(&mut self, name: &'static str, parser: CommandParser) {
        self.parsers.insert(name, parser);
    }

    pub fn parse(&self, request: &CommandRequest) -> Result<Command, EngineError> {
        let parser = self
            .parsers
            .get(request.name.as_str())
            .ok_or_else(|| EngineError::UnknownCommand(request.name.clone()))?;
        parser(&request.args)
    }

    pub fn dispatch<H: EntityHost>(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_, H>,
    ) -> CommandResponse {
        if !self.parsers.contains_key(request.name.as_str()) {
            return CommandResponse::err(format!("未知命令: {}", request.name));
        }
        let result = self
            .parse(request)
            .and_then(|command| context.document.apply(command));
        match result {
            Ok(outcome) => CommandResponse::ok(outcome, context.document.status()),
            Err(err) => {
                warn!(command = %request.name, %err, "命令执行失败");
                CommandResponse::err(err.to_string())
            }
        }
    }

    /// 按字母顺序列出已注册命令。
    pub fn available_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

fn index_arg(command: &'static str, args: &[String]) -> Result<usize, EngineError> {
    args.first()
        .and_then(|arg| arg.parse().ok())
        .ok_or(EngineError::InvalidArgument {
            command,
            expected: "a non-negative index",
        })
}

fn path_arg(command: &'static str, args: &[String]) -> Result<PathBuf, EngineError> {
    args.first()
        .map(PathBuf::from)
        .ok_or(EngineError::InvalidArgument {
            command,
            expected: "a file path",
        })
}

#[cfg(test)]
mod tests {
    use e2d_core::entity::TemplateRegistry;

    use super::*;
    use crate::document::{DocumentSettings, Mode};
    use crate::host::MemoryHost;

    fn request(line: &str) -> CommandRequest {
        CommandRequest::parse(line).unwrap()
    }

    #[test]
    fn every_registered_name_round_trips() {
        let bus = CommandBus::new();
        for name in bus.available_commands() {
            let line = match name {
                "select_template" | "set_layer" => format!("{name} 0"),
                "write" | "load" => format!("{name} level.lvl"),
                _ => name.to_string(),
            };
            let command: Command = line.parse().unwrap();
            assert_eq!(command.name(), name);
        }
        assert_eq!(bus.available_commands().len(), 35);
    }

    #[test]
    fn arguments_are_validated() {
        assert_eq!(
            "select_template 3".parse::<Command>().unwrap(),
            Command::SelectTemplate(3)
        );
        assert!(matches!(
            "set_layer".parse::<Command>(),
            Err(EngineError::InvalidArgument {
                command: "set_layer",
                ..
            })
        ));
        assert!(matches!(
            "select_template -1".parse::<Command>(),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            "launch".parse::<Command>(),
            Err(EngineError::UnknownCommand(name)) if name == "launch"
        ));
        assert!(CommandRequest::parse("   ").is_none());
    }

    #[test]
    fn dispatch_reports_status_and_failures() {
        let templates = TemplateRegistry::from_names(["grass"]).unwrap();
        let mut document = Document::new(MemoryHost::new(), templates, DocumentSettings::default());
        let bus = CommandBus::new();
        let mut context = CommandContext {
            document: &mut document,
        };

        let response = bus.dispatch(&request("create"), &mut context);
        assert!(response.success);
        assert_eq!(response.outcome, Some(CommandOutcome::Applied));
        assert_eq!(response.message.as_deref(), Some("created 1"));

        let response = bus.dispatch(&request("toggle_grab"), &mut context);
        assert!(response.success);
        assert_eq!(context.document.mode(), Mode::Grab);

        let response = bus.dispatch(&request("set_layer 4"), &mut context);
        assert!(!response.success);

        let response = bus.dispatch(&request("explode"), &mut context);
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("未知命令: explode"));
    }
}
