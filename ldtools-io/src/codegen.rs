use std::collections::HashMap;

use ldtools_core::code::{CodeStandard, Winding};
use ldtools_core::colour::{ColourDefinition, ColourValue, LocalPalette};
use ldtools_core::document::{BfcMode, Document, Page, PageHeader, Step, StepMode};
use ldtools_core::element::{Element, ElementId, ElementKind, HasCoordinates};
use ldtools_core::geometry::{Matrix4, Vector3};
use ldtools_core::reference::Reference;
use ldtools_core::target::{NoTargets, TargetLookup, normalize_name, page_is_flat};
use ldtools_core::texmap::{Projection, Texmap, TexmapRole};
use serde::{Deserialize, Serialize};

use crate::reader::quote_if_needed;

pub const LINE_END: &str = "\r\n";

/// 单次输出的四个参数：发布标准、覆盖颜色、变换与绕向。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmitOptions {
    pub standard: CodeStandard,
    /// 仅当元素自身颜色为主色时生效。
    pub colour: ColourValue,
    pub transform: Matrix4,
    pub winding: Winding,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self::new(CodeStandard::Full)
    }
}

impl EmitOptions {
    pub fn new(standard: CodeStandard) -> Self {
        Self {
            standard,
            colour: ColourValue::MAIN,
            transform: Matrix4::IDENTITY,
            winding: Winding::Normal,
        }
    }
}

/// 输出作用域：当前页面的调色板、组成员与 BFC 状态。
struct Scope {
    palette: LocalPalette,
    groups: HashMap<ElementId, String>,
    /// 当前几何所属页面的绕向约定。
    convention: BfcMode,
    /// 输出流此处是否处于 BFC 认证状态。
    certified: bool,
    drop_bfc: bool,
    /// 累积变换是否镜像。只影响图元顶点顺序，嵌套引用的矩阵已携带镜像。
    mirrored: bool,
    stack: Vec<String>,
}

impl Scope {
    fn detached() -> Self {
        Self {
            palette: LocalPalette::new(),
            groups: HashMap::new(),
            convention: BfcMode::Disabled,
            certified: false,
            drop_bfc: false,
            mirrored: false,
            stack: Vec::new(),
        }
    }

    fn for_page(page: &Page) -> Self {
        Self {
            palette: page.palette(),
            groups: page.group_memberships(),
            convention: page.bfc(),
            certified: page.bfc().is_enabled(),
            drop_bfc: false,
            mirrored: false,
            stack: vec![normalize_name(&page.target_name())],
        }
    }

    fn inlined(&self, target: &Page, mirror: bool) -> Self {
        let certified = self.certified && target.bfc().is_enabled();
        let mut stack = self.stack.clone();
        stack.push(normalize_name(&target.target_name()));
        Self {
            palette: target.palette(),
            groups: target.group_memberships(),
            convention: target.bfc(),
            certified,
            drop_bfc: !certified,
            mirrored: self.mirrored != mirror,
            stack,
        }
    }
}

/// 代码生成器。相同输入总是得到逐字节相同的输出。
pub struct CodeGenerator<'a> {
    lookup: &'a dyn TargetLookup,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(lookup: &'a dyn TargetLookup) -> Self {
        Self { lookup }
    }

    /// 多页面文档以 `0 FILE`/`0 NOFILE` 包裹每一页。
    pub fn document(&self, document: &Document, standard: CodeStandard) -> String {
        let mut out = String::new();
        if let [page] = document.pages() {
            self.write_page(&mut out, page, standard);
            return out;
        }
        for page in document.pages() {
            push_line(
                &mut out,
                &format!("0 FILE {}", quote_if_needed(&page.target_name())),
            );
            self.write_page(&mut out, page, standard);
            push_line(&mut out, "0 NOFILE");
        }
        out
    }

    pub fn page(&self, page: &Page, standard: CodeStandard) -> String {
        let mut out = String::new();
        self.write_page(&mut out, page, standard);
        out
    }

    /// 输出未挂接到页面的元素：无调色板、无 BFC 上下文。
    pub fn element(&self, element: &Element, options: &EmitOptions) -> String {
        let mut out = String::new();
        self.write_element(&mut out, element, options, &Scope::detached(), false);
        out
    }

    /// 以 `page` 为上下文输出其中的元素。
    pub fn element_in_page(&self, page: &Page, element: &Element, options: &EmitOptions) -> String {
        let mut out = String::new();
        self.write_element(&mut out, element, options, &Scope::for_page(page), false);
        out
    }

    fn write_page(&self, out: &mut String, page: &Page, standard: CodeStandard) {
        write_header(out, page.header(), standard);
        let scope = Scope::for_page(page);
        let options = EmitOptions::new(standard);
        let total = page
            .steps()
            .iter()
            .flat_map(Step::elements)
            .filter(|element| produces_code(element, standard))
            .count();
        let last_step = page.steps().len().saturating_sub(1);
        let mut emitted = 0;
        for (index, step) in page.steps().iter().enumerate() {
            for element in step.elements() {
                if !produces_code(element, standard) {
                    continue;
                }
                emitted += 1;
                self.write_element(out, element, &options, &scope, emitted < total);
            }
            if index != last_step {
                if let Some(statement) = step_statement(step, standard) {
                    push_line(out, &statement);
                }
            }
        }
    }

    fn write_element(
        &self,
        out: &mut String,
        element: &Element,
        options: &EmitOptions,
        scope: &Scope,
        has_following: bool,
    ) {
        if options.standard.is_parts_library() {
            if !produces_code(element, options.standard) {
                return;
            }
            self.write_body(out, element, options, scope, has_following);
            return;
        }

        if let Some(group) = scope.groups.get(&element.id()) {
            push_line(out, &format!("0 MLCAD BTG {group}"));
        }
        if element.is_locked() {
            push_line(out, "0 !LDTOOLS LOCKNEXT");
        }
        // 纹理映射的可见/虚化属性由内部元素各自输出。
        if matches!(element.kind(), ElementKind::Texmap(_)) {
            self.write_body(out, element, options, scope, has_following);
            return;
        }
        let mut body = String::new();
        self.write_body(&mut body, element, options, scope, has_following);
        let mut prefix = String::new();
        if element.is_ghosted() {
            prefix.push_str("0 GHOST ");
        }
        if !element.is_visible() {
            prefix.push_str("0 MLCAD HIDE ");
        }
        for line in body.lines() {
            out.push_str(&prefix);
            push_line(out, line);
        }
    }

    fn write_body(
        &self,
        out: &mut String,
        element: &Element,
        options: &EmitOptions,
        scope: &Scope,
        has_following: bool,
    ) {
        use ldtools_core::element::HasColour;

        let colour = effective_colour(element.colour(), options, &scope.palette);
        match element.kind() {
            ElementKind::Comment(comment) => {
                if comment.text().is_empty() {
                    push_line(out, "0 //");
                } else {
                    push_line(out, &format!("0 // {}", comment.text()));
                }
            }
            ElementKind::Line(shape) => push_shape(out, 2, colour, shape, options, scope),
            ElementKind::Triangle(shape) => push_shape(out, 3, colour, shape, options, scope),
            ElementKind::Quadrilateral(shape) => push_shape(out, 4, colour, shape, options, scope),
            ElementKind::OptionalLine(shape) => push_shape(out, 5, colour, shape, options, scope),
            ElementKind::Reference(reference) => {
                self.write_reference(out, reference, colour, options, scope, has_following);
            }
            ElementKind::Texmap(texmap) => self.write_texmap(out, texmap, options, scope),
            ElementKind::Group(group) => {
                push_line(
                    out,
                    &format!("0 GROUP {} {}", group.members().len(), group.name()),
                );
            }
            ElementKind::BfcFlag(flag) => {
                if !scope.drop_bfc {
                    let flag = flag.with_winding(options.winding);
                    push_line(out, &format!("0 BFC {}", flag.keyword()));
                }
            }
            ElementKind::ColourDefinition(definition) => {
                push_line(out, &colour_statement(definition));
            }
        }
    }

    fn write_reference(
        &self,
        out: &mut String,
        reference: &Reference,
        colour: ColourValue,
        options: &EmitOptions,
        scope: &Scope,
        has_following: bool,
    ) {
        let target = self.lookup.find_target(reference.target_name());
        if options.standard.inlines_references() {
            let key = normalize_name(reference.target_name());
            if let Some(page) = target
                .as_deref()
                .filter(|page| page.header().inline_on_publish && !scope.stack.contains(&key))
            {
                self.write_inlined(out, reference, page, colour, options, scope, has_following);
                return;
            }
        }

        let flat = target
            .as_deref()
            .is_some_and(|page| page_is_flat(page, self.lookup));
        let mut local = *reference.matrix();
        let mut invert = reference.invert();
        if options.winding.is_reversed() {
            if flat {
                local = Matrix4::mirror_y().then(&local);
            } else {
                invert = !invert;
            }
        }
        if invert && !scope.drop_bfc {
            push_line(out, "0 BFC INVERTNEXT");
        }
        let matrix = local.then(&options.transform);
        push_line(
            out,
            &format!(
                "1 {colour} {} {}",
                join_numbers(&matrix.to_ldraw()),
                quote_if_needed(reference.target_name())
            ),
        );
    }

    /// 把目标页面的元素展开到当前位置，并协调两侧的 BFC 状态。
    #[allow(clippy::too_many_arguments)]
    fn write_inlined(
        &self,
        out: &mut String,
        reference: &Reference,
        target: &Page,
        colour: ColourValue,
        options: &EmitOptions,
        scope: &Scope,
        has_following: bool,
    ) {
        let inner_scope = scope.inlined(target, reference.matrix().determinant() < 0.0);
        let winding = options
            .winding
            .reversed_if(reference.invert())
            .reversed_if(scope.convention.opposes(target.bfc()));
        let inner = EmitOptions {
            standard: options.standard,
            colour,
            transform: reference.matrix().then(&options.transform),
            winding,
        };
        let noclip = scope.certified && !target.bfc().is_enabled();
        if noclip {
            push_line(out, "0 BFC NOCLIP");
        }
        let elements: Vec<&Element> = target
            .steps()
            .iter()
            .flat_map(Step::elements)
            .filter(|element| produces_code(element, options.standard))
            .collect();
        for (index, element) in elements.iter().enumerate() {
            self.write_element(out, element, &inner, &inner_scope, index + 1 < elements.len());
        }
        if noclip && has_following {
            push_line(out, "0 BFC CLIP");
        }
    }

    fn write_texmap(&self, out: &mut String, texmap: &Texmap, options: &EmitOptions, scope: &Scope) {
        let header = texmap_header(texmap, options);
        if texmap.is_empty() {
            if !options.standard.is_parts_library() {
                push_line(out, &format!("0 !TEXMAP START {header}"));
                push_line(out, "0 !TEXMAP END");
            }
            return;
        }

        let texture = texmap.geometry(TexmapRole::Texture);
        let shared = texmap.geometry(TexmapRole::Shared);
        let fallback = texmap.geometry(TexmapRole::Fallback);
        if fallback.is_empty() && texture.len() + shared.len() == 1 {
            if let Some(single) = texture.first().or(shared.first()) {
                let mut code = String::new();
                self.write_element(&mut code, single, options, scope, false);
                if code.lines().count() == 1 {
                    push_line(out, &format!("0 !TEXMAP NEXT {header}"));
                    out.push_str(&code);
                    return;
                }
            }
        }

        push_line(out, &format!("0 !TEXMAP START {header}"));
        let total = texmap.len();
        let mut emitted = 0;
        for element in texture {
            emitted += 1;
            let mut code = String::new();
            self.write_element(&mut code, element, options, scope, emitted < total);
            for line in code.lines() {
                push_line(out, &format!("0 !: {line}"));
            }
        }
        for element in shared {
            emitted += 1;
            self.write_element(out, element, options, scope, emitted < total);
        }
        if !fallback.is_empty() {
            push_line(out, "0 !TEXMAP FALLBACK");
            for element in fallback {
                emitted += 1;
                self.write_element(out, element, options, scope, emitted < total);
            }
        }
        push_line(out, "0 !TEXMAP END");
    }
}

/// 不依赖任何目标查找的元素输出。
pub fn emit_element(element: &Element, options: &EmitOptions) -> String {
    CodeGenerator::new(&NoTargets).element(element, options)
}

/// 以文档自身为查找范围输出整个文档。
pub fn emit_document(document: &Document, standard: CodeStandard) -> String {
    CodeGenerator::new(document).document(document, standard)
}

/// 步骤结束语句；零件库标准下不输出。
pub fn step_statement(step: &Step, standard: CodeStandard) -> Option<String> {
    if standard.is_parts_library() {
        return None;
    }
    let transform = step.transform();
    let (x, y, z) = transform.angles();
    let statement = match transform.mode() {
        StepMode::Additive if transform.is_zero() => "0 STEP".to_string(),
        StepMode::Reset => "0 ROTSTEP END".to_string(),
        StepMode::Relative if transform.is_zero() => "0 ROTSTEP END".to_string(),
        mode => {
            let keyword = match mode {
                StepMode::Additive => "ADD",
                StepMode::Absolute => "ABS",
                _ => "REL",
            };
            format!(
                "0 ROTSTEP {} {} {} {keyword}",
                format_number(x),
                format_number(y),
                format_number(z)
            )
        }
    };
    Some(statement)
}

fn write_header(out: &mut String, header: &PageHeader, standard: CodeStandard) {
    if !header.title.is_empty() {
        push_line(out, &format!("0 {}", header.title));
    }
    push_line(out, &format!("0 Name: {}", header.target_name()));
    if !header.author.is_empty() {
        push_line(out, &format!("0 Author: {}", header.author));
    }
    if let Some(keyword) = header.page_type.org_keyword() {
        match &header.release {
            Some(release) => push_line(out, &format!("0 !LDRAW_ORG {keyword} UPDATE {release}")),
            None => push_line(out, &format!("0 !LDRAW_ORG Unofficial_{keyword}")),
        }
    }
    match header.bfc {
        BfcMode::CertifiedClockwise => push_line(out, "0 BFC CERTIFY CW"),
        BfcMode::CertifiedCounterClockwise => push_line(out, "0 BFC CERTIFY CCW"),
        BfcMode::Disabled => {}
    }
    if header.inline_on_publish && !standard.is_parts_library() {
        push_line(out, "0 !LDTOOLS INLINEONPUBLISH");
    }
}

/// 元素自身颜色优先；零件库标准下私有调色板颜色改写为直接颜色。
fn effective_colour(own: ColourValue, options: &EmitOptions, palette: &LocalPalette) -> ColourValue {
    let colour = if own.is_main() { options.colour } else { own };
    if options.standard.is_parts_library() {
        if let Some(definition) = palette.get(colour) {
            return definition.direct_value();
        }
    }
    colour
}

/// 该元素在给定标准下是否产生任何输出。
fn produces_code(element: &Element, standard: CodeStandard) -> bool {
    if !standard.is_parts_library() {
        return true;
    }
    if !element.is_visible() || element.is_ghosted() {
        return false;
    }
    match element.kind() {
        ElementKind::Group(_) | ElementKind::ColourDefinition(_) => false,
        ElementKind::Texmap(texmap) => !texmap.is_empty(),
        _ => true,
    }
}

fn push_shape<S: HasCoordinates + Copy>(
    out: &mut String,
    code: u8,
    colour: ColourValue,
    shape: &S,
    options: &EmitOptions,
    scope: &Scope,
) {
    let mut shape = *shape;
    if options.winding.is_reversed() != scope.mirrored {
        shape.reverse_winding();
    }
    let values: Vec<f64> = shape
        .coordinates()
        .iter()
        .flat_map(|point| {
            let point = options.transform.transform_point(*point);
            [point.x(), point.y(), point.z()]
        })
        .collect();
    push_line(out, &format!("{code} {colour} {}", join_numbers(&values)));
}

fn texmap_header(texmap: &Texmap, options: &EmitOptions) -> String {
    let points: Vec<f64> = texmap
        .points()
        .iter()
        .flat_map(|point| {
            let point: Vector3 = options.transform.transform_point(*point);
            [point.x(), point.y(), point.z()]
        })
        .collect();
    let mut header = format!("{} {}", texmap.projection().keyword(), join_numbers(&points));
    match texmap.projection() {
        Projection::Planar => {}
        Projection::Cylindrical => {
            header.push(' ');
            header.push_str(&format_number(texmap.horizontal_extent()));
        }
        Projection::Spherical => {
            header.push(' ');
            header.push_str(&format_number(texmap.horizontal_extent()));
            header.push(' ');
            header.push_str(&format_number(texmap.vertical_extent()));
        }
    }
    header.push(' ');
    header.push_str(&quote_if_needed(texmap.texture()));
    if let Some(glossmap) = texmap.glossmap() {
        header.push_str(" GLOSSMAP ");
        header.push_str(&quote_if_needed(glossmap));
    }
    header
}

fn colour_statement(definition: &ColourDefinition) -> String {
    let mut statement = format!(
        "0 !COLOUR {} CODE {} VALUE {} EDGE {}",
        definition.name,
        definition.code,
        definition.value.hex(),
        definition.edge.hex()
    );
    if !definition.value.is_opaque() {
        statement.push_str(&format!(" ALPHA {}", definition.value.a));
    }
    statement
}

/// 最多保留 6 位小数，去掉多余的零与负零。
pub fn format_number(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    let mut text = format!("{rounded:.6}");
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

fn join_numbers(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| format_number(*value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str(LINE_END);
}
