use std::io::{BufRead, Write};

use e2d_core::geometry::GridIndex;
use e2d_engine::{
    CommandBus, CommandContext, CommandRequest, Document, EntityHost, MemoryHost,
};
use tracing::{debug, info, warn};

use crate::loader::{DocumentSource, LoadedDocument};

/// 打印关卡概览与当前图层，`repl` 为 true 时继续从标准输入读取命令。
pub fn run(loaded: LoadedDocument, repl: bool) -> std::io::Result<()> {
    let LoadedDocument {
        mut document,
        source,
    } = loaded;
    let bus = CommandBus::new();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match &source {
        DocumentSource::Level(path) => writeln!(out, "已加载关卡：{}", path.display())?,
        DocumentSource::Demo => writeln!(out, "未指定关卡，已构建内置示例")?,
    }
    for line in summary(&document) {
        writeln!(out, "{line}")?;
    }
    write!(out, "{}", render_layer(&document))?;

    if repl {
        writeln!(out, "支持的命令: {}", bus.available_commands().join(", "))?;
        let stdin = std::io::stdin();
        let executed = run_repl(&bus, &mut document, stdin.lock(), &mut out)?;
        info!(executed, "命令循环结束");
    }

    let destroyed = document.flush();
    debug!(destroyed, "退出前销毁待删除实体");
    Ok(())
}

/// 逐行读取命令并执行。`show` 打印当前图层，`help` 列出命令，`quit`/`exit` 结束。
/// 返回成功执行的命令数量。
pub fn run_repl<H, R, W>(
    bus: &CommandBus,
    document: &mut Document<H>,
    input: R,
    out: &mut W,
) -> std::io::Result<usize>
where
    H: EntityHost,
    R: BufRead,
    W: Write,
{
    let mut executed = 0;
    for line in input.lines() {
        let line = line?;
        let Some(request) = CommandRequest::parse(&line) else {
            continue;
        };
        match request.name.as_str() {
            name if name.starts_with('#') => continue,
            "quit" | "exit" => break,
            "help" => {
                writeln!(out, "支持的命令: {}", bus.available_commands().join(", "))?;
                continue;
            }
            "show" => {
                write!(out, "{}", render_layer(document))?;
                continue;
            }
            _ => {}
        }

        let mut context = CommandContext {
            document: &mut *document,
        };
        let response = bus.dispatch(&request, &mut context);
        let message = response.message.unwrap_or_default();
        if response.success {
            executed += 1;
            writeln!(out, "[命令] {message}")?;
        } else {
            warn!(command = %request.name, "命令被拒绝");
            writeln!(out, "[错误] {message}")?;
        }
    }
    Ok(executed)
}

/// 关卡概览：元数据、网格尺寸、模式与各图层统计。
pub fn summary<H: EntityHost>(document: &Document<H>) -> Vec<String> {
    let size = document.grid().scaled_bounds();
    let metadata = document.metadata();
    let viewport = document.viewport();
    let mut lines = vec![
        format!("关卡: {} (作者: {})", metadata.name, display_author(&metadata.author)),
        format!(
            "网格: {}x{}, 格子大小={:.2}, 图层数={}",
            size.width,
            size.height,
            document.grid().cell_scale(),
            document.grid().layer_count()
        ),
        format!(
            "模式: {:?}, 当前图层: {}, 当前模板: {}",
            document.mode(),
            document.layer(),
            document.palette_index()
        ),
        format!(
            "视口中心=({:.2}, {:.2}), 正交尺寸={:.2}",
            viewport.center.x(),
            viewport.center.y(),
            viewport.ortho_size
        ),
    ];
    for (index, layer) in document.grid().layers().enumerate() {
        let count = layer
            .occupied_cells()
            .filter(|(_, entity)| document.store().is_alive(*entity))
            .count();
        lines.push(format!(
            "  - 图层 {index}: z={:.1}, 实体={count}, 可见={}",
            layer.z_depth,
            if layer.visible { "是" } else { "否" }
        ));
    }
    lines
}

fn display_author(author: &str) -> &str {
    if author.is_empty() { "<无>" } else { author }
}

/// 以字符画输出当前图层，上方为 y 最大的一行。
///
/// 实体显示为模板名首字母（小写）；光标所在格子显示为 `+`，压在实体上时首字母大写；
/// 隐藏图层只显示光标。
pub fn render_layer<H: EntityHost>(document: &Document<H>) -> String {
    let size = document.grid().scaled_bounds();
    let visible = document
        .grid()
        .layer(document.layer())
        .is_some_and(|layer| layer.visible);
    let mapping = document.grid().mapping();
    let cursors = document.cursors();

    let mut view = String::with_capacity((size.width as usize + 1) * size.height as usize);
    for y in (0..size.height as i32).rev() {
        for x in 0..size.width as i32 {
            let index = GridIndex::new(x, y);
            let glyph = visible
                .then(|| document.entity_at(index))
                .flatten()
                .and_then(|entity| document.find_template(entity))
                .and_then(|template| document.templates().get(template))
                .and_then(|template| template.name.chars().next())
                .map(|glyph| glyph.to_ascii_lowercase());
            let has_cursor = cursors.contains(mapping.to_world(index, 0.0));
            view.push(match (glyph, has_cursor) {
                (Some(glyph), true) => glyph.to_ascii_uppercase(),
                (Some(glyph), false) => glyph,
                (None, true) => '+',
                (None, false) => '.',
            });
        }
        view.push('\n');
    }
    view
}

/// 供测试与嵌入使用：在内存宿主文档上执行一段脚本，返回全部输出。
pub fn run_script(document: &mut Document<MemoryHost>, script: &str) -> std::io::Result<String> {
    let bus = CommandBus::new();
    let mut out = Vec::new();
    run_repl(&bus, document, script.as_bytes(), &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use e2d_core::entity::TemplateRegistry;
    use e2d_core::geometry::{Point3, Rect};
    use e2d_engine::{Command, DocumentSettings};

    use super::*;

    fn document() -> Document<MemoryHost> {
        let templates = TemplateRegistry::from_names(["grass", "stone"]).unwrap();
        let settings = DocumentSettings {
            bounds: Rect::new(0.0, 0.0, 3.0, 2.0),
            ..DocumentSettings::default()
        };
        Document::new(MemoryHost::new(), templates, settings)
    }

    #[test]
    fn render_marks_entities_and_cursor() {
        let mut doc = document();
        doc.place_cursor(Point3::new(0.0, 0.0, 0.0)).unwrap();
        doc.apply(Command::Create).unwrap();
        doc.place_cursor(Point3::new(2.0, 1.0, 0.0)).unwrap();

        assert_eq!(render_layer(&doc), "..+\ng..\n");

        doc.apply(Command::SelectTemplate(1)).unwrap();
        doc.apply(Command::Create).unwrap();
        doc.place_cursor(Point3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(render_layer(&doc), "..s\ng+.\n");
    }

    #[test]
    fn hidden_layer_only_shows_cursor() {
        let mut doc = document();
        doc.place_cursor(Point3::new(0.0, 0.0, 0.0)).unwrap();
        doc.apply(Command::Create).unwrap();
        doc.apply(Command::ToggleHideLayer).unwrap();
        assert_eq!(render_layer(&doc), "...\n+..\n");
    }

    #[test]
    fn repl_reports_success_and_errors() {
        let mut doc = document();
        let output = run_script(
            &mut doc,
            "# comment\n\ncreate\nbogus\nset_layer 9\nundo\nquit\ncreate\n",
        )
        .unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "[命令] created 1");
        assert_eq!(lines[1], "[错误] 未知命令: bogus");
        assert!(lines[2].starts_with("[错误] "));
        assert!(lines[3].starts_with("[命令] 1 change; "));
        assert_eq!(lines.len(), 4);
        assert_eq!(doc.alive_count(), 0);
    }

    #[test]
    fn summary_lists_layers() {
        let doc = document();
        let lines = summary(&doc);
        assert_eq!(lines[0], "关卡: untitled (作者: <无>)");
        assert!(lines[1].starts_with("网格: 3x2"));
        assert_eq!(lines.len(), 5);
    }
}
