use std::mem;

use ldtools_core::colour::{ColourDefinition, ColourValue, Rgba, system_colour};
use ldtools_core::document::{
    BfcMode, Document, Page, PageHeader, PageType, Step, StepMode, StepTransform,
    split_target_name,
};
use ldtools_core::element::{
    BfcFlag, Element, ElementId, ElementKind, Group, Line, OptionalLine, Quadrilateral, Triangle,
};
use ldtools_core::errors::DomError;
use ldtools_core::geometry::{Matrix4, Vector3};
use ldtools_core::reference::Reference;
use ldtools_core::texmap::{Projection, Texmap, TexmapRole};

use crate::IoError;
use crate::reader::{LineReader, strip_keywords, syntax, tokenize};

const DEFAULT_PAGE_NAME: &str = "Untitled.ldr";

/// 解析完整文本；包含 `0 FILE` 时按多页面文档处理。
pub fn parse_document(text: &str) -> Result<Document, IoError> {
    parse_document_named(text, None)
}

/// `default_name` 用于没有 `0 Name:`/`0 FILE` 的单页面文本（通常取文件名）。
pub fn parse_document_named(text: &str, default_name: Option<&str>) -> Result<Document, IoError> {
    let mut reader = LineReader::new(text);
    let mut document = Document::new();
    let mut builder: Option<PageBuilder> = None;
    while let Some((line_no, line)) = reader.next_line() {
        if let Some(name) = strip_keywords(line, &["0", "FILE"]) {
            if let Some(current) = builder.take() {
                document.push_page(current.finish()?)?;
            }
            builder = Some(PageBuilder::new(Some(name.trim_matches('"')), true));
            continue;
        }
        if strip_keywords(line, &["0", "NOFILE"]).is_some() {
            let current = builder
                .take()
                .ok_or_else(|| syntax(line_no, "NOFILE 之前没有对应的 FILE"))?;
            document.push_page(current.finish()?)?;
            continue;
        }
        builder
            .get_or_insert_with(|| PageBuilder::new(default_name, true))
            .process(line_no, line)?;
    }
    if let Some(current) = builder.take() {
        document.push_page(current.finish()?)?;
    }
    Ok(document)
}

/// 解析单个页面，取文本中的第一页。
pub fn parse_page(text: &str) -> Result<Page, IoError> {
    let mut document = parse_document(text)?;
    let id = document
        .pages()
        .first()
        .map(Page::id)
        .ok_or_else(|| IoError::InvalidDocument("文本中没有页面".to_string()))?;
    let (_, page) = document.remove_page(id)?;
    Ok(page)
}

/// 解析恰好产生一个元素的语句（允许前置的 INVERTNEXT/LOCKNEXT 等修饰行）。
pub fn parse_element(text: &str) -> Result<Element, IoError> {
    let mut builder = PageBuilder::new(None, false);
    let mut reader = LineReader::new(text);
    let mut last_line = 0;
    while let Some((line_no, line)) = reader.next_line() {
        builder.process(line_no, line)?;
        last_line = line_no;
    }
    if builder.texmap.is_some() {
        return Err(syntax(last_line, "纹理映射缺少 END"));
    }
    if !builder.steps.is_empty() || builder.current.len() != 1 {
        return Err(syntax(last_line, "文本没有构成单个元素"));
    }
    Ok(builder.current.remove(0)?)
}

#[derive(Debug, Default)]
struct Pending {
    invert: bool,
    locked: bool,
    group: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Decoration {
    ghosted: bool,
    hidden: bool,
    textured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TexmapMode {
    Block,
    Fallback,
    Next,
}

struct OpenTexmap {
    texmap: Texmap,
    mode: TexmapMode,
    pending: Pending,
}

struct PageBuilder {
    header: PageHeader,
    org_type: Option<PageType>,
    named: bool,
    in_header: bool,
    title_seen: bool,
    steps: Vec<Step>,
    current: Step,
    pending: Pending,
    texmap: Option<OpenTexmap>,
    memberships: Vec<(ElementId, String)>,
    last_line: usize,
}

impl PageBuilder {
    fn new(file_name: Option<&str>, header_allowed: bool) -> Self {
        let (name, page_type) = split_target_name(file_name.unwrap_or(DEFAULT_PAGE_NAME));
        Self {
            header: PageHeader::new(name, page_type),
            org_type: None,
            named: false,
            in_header: header_allowed,
            title_seen: !header_allowed,
            steps: Vec::new(),
            current: Step::new(),
            pending: Pending::default(),
            texmap: None,
            memberships: Vec::new(),
            last_line: 0,
        }
    }

    fn process(&mut self, line_no: usize, line: &str) -> Result<(), IoError> {
        self.last_line = line_no;
        let (decoration, statement) = strip_decorations(line);
        let tokens = tokenize(statement).map_err(|message| syntax(line_no, message))?;
        let Some(kind) = tokens.first() else {
            return Ok(());
        };
        match kind.as_str() {
            "0" => self.meta(line_no, statement, &tokens, decoration),
            "1" => {
                let element = parse_reference(line_no, &tokens)?;
                self.add_element(line_no, element, decoration)
            }
            "2" => {
                let [a, b] = parse_points::<2>(line_no, &tokens)?;
                let colour = parse_colour(line_no, &tokens[1])?;
                let element = Element::with_colour(ElementKind::Line(Line::new(a, b)), colour);
                self.add_element(line_no, element, decoration)
            }
            "3" => {
                let [a, b, c] = parse_points::<3>(line_no, &tokens)?;
                let colour = parse_colour(line_no, &tokens[1])?;
                let element = Element::triangle(colour, a, b, c);
                self.add_element(line_no, element, decoration)
            }
            "4" => {
                let vertices = parse_points::<4>(line_no, &tokens)?;
                let colour = parse_colour(line_no, &tokens[1])?;
                let element = Element::with_colour(
                    ElementKind::Quadrilateral(Quadrilateral { vertices }),
                    colour,
                );
                self.add_element(line_no, element, decoration)
            }
            "5" => {
                let vertices = parse_points::<4>(line_no, &tokens)?;
                let colour = parse_colour(line_no, &tokens[1])?;
                let element =
                    Element::with_colour(ElementKind::OptionalLine(OptionalLine { vertices }), colour);
                self.add_element(line_no, element, decoration)
            }
            other => Err(syntax(line_no, format!("未知的语句类型 \"{other}\""))),
        }
    }

    fn meta(
        &mut self,
        line_no: usize,
        statement: &str,
        tokens: &[String],
        decoration: Decoration,
    ) -> Result<(), IoError> {
        let keyword = tokens.get(1).map(|token| token.to_ascii_uppercase()).unwrap_or_default();

        if self.in_header {
            if let Some(value) = strip_keywords(statement, &["0", "Name:"]) {
                let (name, page_type) = split_target_name(value);
                self.header.name = name;
                self.header.page_type = page_type;
                self.named = true;
                return Ok(());
            }
            if let Some(value) = strip_keywords(statement, &["0", "Author:"]) {
                self.header.author = value.to_string();
                return Ok(());
            }
            if keyword == "!LDRAW_ORG" {
                self.parse_org(tokens);
                return Ok(());
            }
            let is_meta = keyword.starts_with('!')
                || keyword == "//"
                || matches!(
                    keyword.as_str(),
                    "BFC" | "STEP" | "ROTSTEP" | "MLCAD" | "GROUP" | "GHOST"
                );
            if !self.title_seen && !self.named && !is_meta && self.current.is_empty() {
                self.header.title = strip_keywords(statement, &["0"]).unwrap_or_default().to_string();
                self.title_seen = true;
                return Ok(());
            }
        }

        match keyword.as_str() {
            "STEP" => self.close_step(line_no, StepTransform::default()),
            "ROTSTEP" => {
                let transform = parse_rotstep(line_no, &tokens[2..])?;
                self.close_step(line_no, transform)
            }
            "BFC" => self.parse_bfc(line_no, &tokens[2..], decoration),
            "!LDTOOLS" => {
                match tokens.get(2).map(|token| token.to_ascii_uppercase()).as_deref() {
                    Some("LOCKNEXT") => self.pending.locked = true,
                    Some("INLINEONPUBLISH") => self.header.inline_on_publish = true,
                    _ => return self.add_comment(line_no, statement, decoration),
                }
                Ok(())
            }
            "MLCAD" => match strip_keywords(statement, &["0", "MLCAD", "BTG"]) {
                Some(name) if !name.is_empty() => {
                    self.pending.group = Some(name.to_string());
                    Ok(())
                }
                _ => self.add_comment(line_no, statement, decoration),
            },
            "GROUP" if tokens.len() >= 4 && tokens[2].parse::<usize>().is_ok() => {
                let name = strip_keywords(statement, &["0", "GROUP", tokens[2].as_str()]).unwrap_or_default();
                let group = Group::new(name).map_err(|error| dom(line_no, error))?;
                self.add_element(line_no, Element::new(ElementKind::Group(group)), decoration)
            }
            "!COLOUR" => {
                let definition = parse_colour_definition(line_no, tokens)?;
                let element = Element::new(ElementKind::ColourDefinition(definition));
                self.add_element(line_no, element, decoration)
            }
            "!TEXMAP" => self.parse_texmap(line_no, tokens),
            _ => self.add_comment(line_no, statement, decoration),
        }
    }

    fn parse_org(&mut self, tokens: &[String]) {
        let Some(keyword) = tokens.get(2) else {
            return;
        };
        if let Some(page_type) = PageType::from_org_keyword(keyword) {
            self.org_type = Some(page_type);
        }
        let official = !keyword.starts_with("Unofficial_");
        self.header.release = tokens
            .iter()
            .position(|token| token.eq_ignore_ascii_case("UPDATE"))
            .and_then(|index| tokens.get(index + 1))
            .filter(|_| official)
            .cloned();
    }

    fn parse_bfc(&mut self, line_no: usize, words: &[String], decoration: Decoration) -> Result<(), IoError> {
        let words: Vec<String> = words.iter().map(|word| word.to_ascii_uppercase()).collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        let flag = match words.as_slice() {
            ["INVERTNEXT"] => {
                self.pending.invert = true;
                return Ok(());
            }
            ["CERTIFY"] | ["CERTIFY", "CCW"] => {
                self.header.bfc = BfcMode::CertifiedCounterClockwise;
                return Ok(());
            }
            ["CERTIFY", "CW"] => {
                self.header.bfc = BfcMode::CertifiedClockwise;
                return Ok(());
            }
            ["NOCERTIFY"] => {
                self.header.bfc = BfcMode::Disabled;
                return Ok(());
            }
            ["CLIP"] => BfcFlag::Clip,
            ["NOCLIP"] => BfcFlag::NoClip,
            ["CW"] => BfcFlag::Clockwise,
            ["CCW"] => BfcFlag::CounterClockwise,
            ["CLIP", "CW"] | ["CW", "CLIP"] => BfcFlag::ClipClockwise,
            ["CLIP", "CCW"] | ["CCW", "CLIP"] => BfcFlag::ClipCounterClockwise,
            _ => return Err(syntax(line_no, format!("无法识别的 BFC 语句 \"{}\"", words.join(" ")))),
        };
        self.add_element(line_no, Element::new(ElementKind::BfcFlag(flag)), decoration)
    }

    fn parse_texmap(&mut self, line_no: usize, tokens: &[String]) -> Result<(), IoError> {
        let command = tokens.get(2).map(|token| token.to_ascii_uppercase()).unwrap_or_default();
        match command.as_str() {
            "START" | "NEXT" => {
                if self.texmap.is_some() {
                    return Err(syntax(line_no, "纹理映射不能嵌套"));
                }
                let texmap = parse_texmap_header(line_no, &tokens[3..])?;
                let mode = if command == "START" {
                    TexmapMode::Block
                } else {
                    TexmapMode::Next
                };
                self.in_header = false;
                self.texmap = Some(OpenTexmap {
                    texmap,
                    mode,
                    pending: mem::take(&mut self.pending),
                });
                Ok(())
            }
            "FALLBACK" => match self.texmap.as_mut() {
                Some(open) if open.mode == TexmapMode::Block => {
                    open.mode = TexmapMode::Fallback;
                    Ok(())
                }
                _ => Err(syntax(line_no, "FALLBACK 不在纹理映射块中")),
            },
            "END" => match self.texmap.as_ref().map(|open| open.mode) {
                Some(TexmapMode::Block | TexmapMode::Fallback) => self.finish_texmap(line_no),
                _ => Err(syntax(line_no, "END 不在纹理映射块中")),
            },
            other => Err(syntax(line_no, format!("未知的 !TEXMAP 命令 \"{other}\""))),
        }
    }

    fn finish_texmap(&mut self, line_no: usize) -> Result<(), IoError> {
        let Some(open) = self.texmap.take() else {
            return Ok(());
        };
        let mut element = Element::new(ElementKind::Texmap(open.texmap));
        if let Some(group) = open.pending.group {
            self.memberships.push((element.id(), group));
        }
        element.set_locked(open.pending.locked);
        self.current.push(element).map_err(|error| dom(line_no, error))
    }

    fn close_step(&mut self, line_no: usize, transform: StepTransform) -> Result<(), IoError> {
        if self.texmap.is_some() {
            return Err(syntax(line_no, "纹理映射内不能结束步骤"));
        }
        self.in_header = false;
        self.title_seen = true;
        let mut step = mem::take(&mut self.current);
        step.set_transform(transform);
        self.steps.push(step);
        Ok(())
    }

    fn add_comment(&mut self, line_no: usize, statement: &str, decoration: Decoration) -> Result<(), IoError> {
        let text = strip_keywords(statement, &["0", "//"])
            .or_else(|| strip_keywords(statement, &["0"]))
            .unwrap_or_default();
        let element = Element::comment(text).map_err(|error| dom(line_no, error))?;
        let in_header = self.in_header;
        self.add_element(line_no, element, decoration)?;
        // 注释不会结束页面头部。
        self.in_header = in_header;
        Ok(())
    }

    fn add_element(&mut self, line_no: usize, mut element: Element, decoration: Decoration) -> Result<(), IoError> {
        self.in_header = false;
        self.title_seen = true;
        let pending = mem::take(&mut self.pending);
        if pending.invert {
            if let ElementKind::Reference(reference) = element.kind_mut_unlocked() {
                reference.set_invert(true);
            }
        }
        if decoration.ghosted {
            element.set_ghosted(true).map_err(|error| dom(line_no, error))?;
        }
        if decoration.hidden {
            element.set_visible(false).map_err(|error| dom(line_no, error))?;
        }
        if let Some(group) = pending.group {
            self.memberships.push((element.id(), group));
        }
        element.set_locked(pending.locked);

        if let Some(open) = self.texmap.as_mut() {
            let role = match open.mode {
                TexmapMode::Block if decoration.textured => TexmapRole::Texture,
                TexmapMode::Block | TexmapMode::Next => TexmapRole::Shared,
                TexmapMode::Fallback => TexmapRole::Fallback,
            };
            open.texmap
                .push(role, element)
                .map_err(|error| dom(line_no, error))?;
            if open.mode == TexmapMode::Next {
                self.finish_texmap(line_no)?;
            }
            return Ok(());
        }
        if decoration.textured {
            return Err(syntax(line_no, "`0 !:` 只能出现在纹理映射块中"));
        }
        self.current.push(element).map_err(|error| dom(line_no, error))
    }

    fn finish(mut self) -> Result<Page, IoError> {
        if self.texmap.is_some() {
            return Err(syntax(self.last_line, "纹理映射缺少 END"));
        }
        if let Some(page_type) = self.org_type {
            self.header.page_type = page_type;
        }
        if !self.current.is_empty() || self.steps.is_empty() {
            self.steps.push(mem::take(&mut self.current));
        }
        let mut page = Page::with_header(self.header)?;
        page.remove_step(0)?;
        for step in self.steps {
            page.push_step(step)?;
        }
        for (member, name) in self.memberships {
            let mut group_id = None;
            page.visit_elements(&mut |element| {
                if group_id.is_none() && element.as_group().is_some_and(|group| group.name() == name) {
                    group_id = Some(element.id());
                }
            });
            let Some(group_id) = group_id else {
                continue;
            };
            if let ElementKind::Group(group) = page.find_element_mut(group_id)?.kind_mut_unlocked() {
                if !group.contains(member) {
                    group.add_member(member)?;
                }
            }
        }
        Ok(page)
    }
}

fn strip_decorations(line: &str) -> (Decoration, &str) {
    let mut decoration = Decoration::default();
    let mut rest = line;
    loop {
        if let Some(next) = strip_keywords(rest, &["0", "!:"]) {
            decoration.textured = true;
            rest = next;
        } else if let Some(next) = strip_keywords(rest, &["0", "GHOST"]) {
            decoration.ghosted = true;
            rest = next;
        } else if let Some(next) = strip_keywords(rest, &["0", "MLCAD", "HIDE"]) {
            decoration.hidden = true;
            rest = next;
        } else {
            return (decoration, rest);
        }
    }
}

fn dom(line: usize, error: DomError) -> IoError {
    syntax(line, error.to_string())
}

fn parse_number(line: usize, token: &str) -> Result<f64, IoError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| syntax(line, format!("\"{token}\" 不是有效数值")))
}

fn parse_colour(line: usize, token: &str) -> Result<ColourValue, IoError> {
    token
        .parse::<ColourValue>()
        .map_err(|error| dom(line, error))
}

/// 形如 `n colour x1 y1 z1 ...` 的几何语句。
fn parse_points<const N: usize>(line: usize, tokens: &[String]) -> Result<[Vector3; N], IoError> {
    if tokens.len() != 2 + N * 3 {
        return Err(syntax(
            line,
            format!("语句需要 {} 个字段，实际 {}", 2 + N * 3, tokens.len()),
        ));
    }
    let mut points = [Vector3::ZERO; N];
    for (index, point) in points.iter_mut().enumerate() {
        let base = 2 + index * 3;
        *point = Vector3::new(
            parse_number(line, &tokens[base])?,
            parse_number(line, &tokens[base + 1])?,
            parse_number(line, &tokens[base + 2])?,
        );
    }
    Ok(points)
}

fn parse_reference(line: usize, tokens: &[String]) -> Result<Element, IoError> {
    if tokens.len() < 15 {
        return Err(syntax(line, "引用语句至少需要 15 个字段"));
    }
    let colour = parse_colour(line, &tokens[1])?;
    let mut values = [0.0; 12];
    for (index, value) in values.iter_mut().enumerate() {
        *value = parse_number(line, &tokens[2 + index])?;
    }
    let reference = Reference::new(tokens[14..].join(" "), Matrix4::from_ldraw(values))
        .map_err(|error| dom(line, error))?;
    Ok(Element::reference(colour, reference))
}

fn parse_rotstep(line: usize, words: &[String]) -> Result<StepTransform, IoError> {
    if words.first().is_some_and(|word| word.eq_ignore_ascii_case("END")) {
        return Ok(StepTransform::reset());
    }
    if words.len() < 3 {
        return Err(syntax(line, "ROTSTEP 需要三个角度"));
    }
    let mode = match words.get(3).map(|word| word.to_ascii_uppercase()).as_deref() {
        None | Some("REL") => StepMode::Relative,
        Some("ABS") => StepMode::Absolute,
        Some("ADD") => StepMode::Additive,
        Some(other) => return Err(syntax(line, format!("未知的 ROTSTEP 模式 \"{other}\""))),
    };
    StepTransform::new(
        mode,
        parse_number(line, &words[0])?,
        parse_number(line, &words[1])?,
        parse_number(line, &words[2])?,
    )
    .map_err(|error| dom(line, error))
}

fn parse_texmap_header(line: usize, words: &[String]) -> Result<Texmap, IoError> {
    let projection = words
        .first()
        .and_then(|word| Projection::from_keyword(word))
        .ok_or_else(|| syntax(line, "!TEXMAP 缺少投影方式"))?;
    let extents = match projection {
        Projection::Planar => 0,
        Projection::Cylindrical => 1,
        Projection::Spherical => 2,
    };
    if words.len() < 11 + extents {
        return Err(syntax(line, "!TEXMAP 参数不足"));
    }
    let mut points = [Vector3::ZERO; 3];
    for (index, point) in points.iter_mut().enumerate() {
        let base = 1 + index * 3;
        *point = Vector3::new(
            parse_number(line, &words[base])?,
            parse_number(line, &words[base + 1])?,
            parse_number(line, &words[base + 2])?,
        );
    }
    let texture_index = 10 + extents;
    let mut texmap = Texmap::new(projection, points, words[texture_index].clone())
        .map_err(|error| dom(line, error))?;
    if extents >= 1 {
        texmap
            .set_horizontal_extent(parse_number(line, &words[10])?)
            .map_err(|error| dom(line, error))?;
    }
    if extents == 2 {
        texmap
            .set_vertical_extent(parse_number(line, &words[11])?)
            .map_err(|error| dom(line, error))?;
    }
    if words
        .get(texture_index + 1)
        .is_some_and(|word| word.eq_ignore_ascii_case("GLOSSMAP"))
    {
        let glossmap = words
            .get(texture_index + 2)
            .cloned()
            .ok_or_else(|| syntax(line, "GLOSSMAP 缺少文件名"))?;
        texmap
            .set_glossmap(Some(glossmap))
            .map_err(|error| dom(line, error))?;
    }
    Ok(texmap)
}

/// `0 !COLOUR name CODE n VALUE v EDGE e [ALPHA a] ...`，其余材质关键字忽略。
fn parse_colour_definition(line: usize, tokens: &[String]) -> Result<ColourDefinition, IoError> {
    let name = tokens
        .get(2)
        .ok_or_else(|| syntax(line, "!COLOUR 缺少名称"))?;
    let mut code = None;
    let mut value = None;
    let mut edge = None;
    let mut alpha = 0xFF;
    let mut index = 3;
    while index < tokens.len() {
        let key = tokens[index].to_ascii_uppercase();
        let argument = tokens.get(index + 1);
        match (key.as_str(), argument) {
            ("CODE", Some(raw)) => {
                code = Some(
                    raw.parse::<u32>()
                        .map_err(|_| syntax(line, format!("颜色代码 \"{raw}\" 无效")))?,
                );
                index += 2;
            }
            ("VALUE", Some(raw)) => {
                value = Some(parse_rgb(line, raw)?);
                index += 2;
            }
            ("EDGE", Some(raw)) => {
                edge = Some(parse_rgb(line, raw)?);
                index += 2;
            }
            ("ALPHA", Some(raw)) => {
                alpha = raw
                    .parse::<u8>()
                    .map_err(|_| syntax(line, format!("ALPHA \"{raw}\" 无效")))?;
                index += 2;
            }
            _ => index += 1,
        }
    }
    let code = code.ok_or_else(|| syntax(line, "!COLOUR 缺少 CODE"))?;
    let value = value.ok_or_else(|| syntax(line, "!COLOUR 缺少 VALUE"))?;
    let edge = edge.unwrap_or(0);
    ColourDefinition::new(
        name.clone(),
        code,
        Rgba::from_rgb(value, alpha),
        Rgba::from_rgb(edge, 0xFF),
    )
    .map_err(|error| dom(line, error))
}

/// `#RRGGBB`、`0xRRGGBB`，或者系统调色板代码（取其颜色值）。
fn parse_rgb(line: usize, raw: &str) -> Result<u32, IoError> {
    let hex = raw
        .strip_prefix('#')
        .or_else(|| raw.strip_prefix("0x"))
        .or_else(|| raw.strip_prefix("0X"));
    if let Some(hex) = hex {
        return u32::from_str_radix(hex, 16)
            .map(|value| value & 0x00FF_FFFF)
            .map_err(|_| syntax(line, format!("颜色值 \"{raw}\" 无效")));
    }
    raw.parse::<u32>()
        .ok()
        .and_then(system_colour)
        .map(|&(_, _, rgb, _, _)| rgb)
        .ok_or_else(|| syntax(line, format!("颜色值 \"{raw}\" 无效")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldtools_core::element::HasColour;

    #[test]
    fn parses_header_and_steps() {
        let text = "0 Brick 2 x 4\r\n0 Name: 3001.dat\r\n0 Author: Someone\r\n0 !LDRAW_ORG Part UPDATE 2004-03\r\n0 BFC CERTIFY CCW\r\n\r\n4 16 0 0 0 1 0 0 1 1 0 0 1 0\r\n0 STEP\r\n2 24 0 0 0 1 0 0\r\n";
        let page = parse_page(text).unwrap();
        let header = page.header();
        assert_eq!(header.title, "Brick 2 x 4");
        assert_eq!(page.target_name(), "3001.dat");
        assert_eq!(header.author, "Someone");
        assert_eq!(header.page_type, PageType::Part);
        assert_eq!(header.release.as_deref(), Some("2004-03"));
        assert_eq!(header.bfc, BfcMode::CertifiedCounterClockwise);
        assert_eq!(page.steps().len(), 2);
        assert_eq!(page.steps()[0].len(), 1);
        assert_eq!(page.steps()[1].len(), 1);
    }

    #[test]
    fn pending_modifiers_apply_to_next_element() {
        let text = "0 BFC INVERTNEXT\n0 !LDTOOLS LOCKNEXT\n0 GHOST 0 MLCAD HIDE 1 4 0 0 0 1 0 0 0 1 0 0 0 1 \"my part.dat\"\n";
        let element = parse_element(text).unwrap();
        let reference = element.as_reference().unwrap();
        assert!(reference.invert());
        assert_eq!(reference.target_name(), "my part.dat");
        assert!(element.is_locked());
        assert!(element.is_ghosted());
        assert!(!element.is_visible());
        assert_eq!(element.colour(), ColourValue::index(4));
    }

    #[test]
    fn multi_page_documents_split_on_file() {
        let text = "0 FILE main.ldr\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 sub.ldr\n0 NOFILE\n0 FILE sub.ldr\n3 16 0 0 0 1 0 0 0 0 1\n0 NOFILE\n";
        let document = parse_document(text).unwrap();
        assert_eq!(document.len(), 2);
        assert_eq!(document.pages()[0].target_name(), "main.ldr");
        assert_eq!(document.pages()[1].target_name(), "sub.ldr");
        assert!(document.find_page("SUB.LDR").is_some());
    }

    #[test]
    fn texmap_blocks_route_geometry_by_role() {
        let text = "0 !TEXMAP START PLANAR 0 0 0 1 0 0 0 0 1 logo.png GLOSSMAP shine.png\n0 !: 3 16 0 0 0 1 0 0 0 0 1\n4 16 0 0 0 1 0 0 1 0 1 0 0 1\n0 !TEXMAP FALLBACK\n3 16 0 0 0 1 0 0 0 0 1\n0 !TEXMAP END\n";
        let element = parse_element(text).unwrap();
        let texmap = element.as_texmap().unwrap();
        assert_eq!(texmap.geometry(TexmapRole::Texture).len(), 1);
        assert_eq!(texmap.geometry(TexmapRole::Shared).len(), 1);
        assert_eq!(texmap.geometry(TexmapRole::Fallback).len(), 1);
        assert_eq!(texmap.glossmap(), Some("shine.png"));

        let next = "0 !TEXMAP NEXT SPHERICAL 0 0 0 1 0 0 0 0 1 90 45 \"my logo.png\"\n3 16 0 0 0 1 0 0 0 0 1\n";
        let element = parse_element(next).unwrap();
        let texmap = element.as_texmap().unwrap();
        assert_eq!(texmap.texture(), "my logo.png");
        assert_eq!(texmap.horizontal_extent(), 90.0);
        assert_eq!(texmap.vertical_extent(), 45.0);
        assert_eq!(texmap.geometry(TexmapRole::Shared).len(), 1);
    }

    #[test]
    fn groups_collect_marked_members() {
        let text = "0 Name: wall.ldr\n0 MLCAD BTG Left Wall\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 3001.dat\n0 GROUP 1 Left Wall\n";
        let page = parse_page(text).unwrap();
        let memberships = page.group_memberships();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships.values().next().map(String::as_str), Some("Left Wall"));
    }

    #[test]
    fn colour_definitions_are_parsed() {
        let element = parse_element("0 !COLOUR Glass CODE 100 VALUE #AABBCC EDGE #333333 ALPHA 128 LUMINANCE 5").unwrap();
        let ElementKind::ColourDefinition(definition) = element.kind() else {
            panic!("expected colour definition");
        };
        assert_eq!(definition.code, 100);
        assert_eq!(definition.value.rgb(), 0xAABBCC);
        assert_eq!(definition.value.a, 128);
    }

    #[test]
    fn syntax_errors_report_line_numbers() {
        let error = parse_document("0 Name: a.dat\n\n3 16 0 0 0 1 0 0\n").unwrap_err();
        assert!(matches!(error, IoError::Syntax { line: 3, .. }));
        let error = parse_document("9 nonsense\n").unwrap_err();
        assert!(matches!(error, IoError::Syntax { line: 1, .. }));
        assert!(parse_document("0 !TEXMAP START PLANAR 0 0 0 1 0 0 0 0 1 a.png\n").is_err());
    }
}
