use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::colour::LocalPalette;
use crate::element::{Element, ElementId, ElementKind};
use crate::errors::DomError;
use crate::reference::Reference;
use crate::target;

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_STEP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(u64);

impl PageId {
    fn fresh() -> Self {
        Self(NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(u64);

impl StepId {
    fn fresh() -> Self {
        Self(NEXT_STEP_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 页面类型决定目标名的前缀与扩展名。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PageType {
    #[default]
    Model,
    Part,
    Shortcut,
    Subpart,
    Primitive,
    HiresPrimitive,
    LoresPrimitive,
}

impl PageType {
    pub fn extension(self) -> &'static str {
        match self {
            PageType::Model => ".ldr",
            _ => ".dat",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            PageType::Subpart => "s\\",
            PageType::HiresPrimitive => "48\\",
            PageType::LoresPrimitive => "8\\",
            _ => "",
        }
    }

    #[inline]
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            PageType::Primitive | PageType::HiresPrimitive | PageType::LoresPrimitive
        )
    }

    /// `!LDRAW_ORG` 中的类型标记，模型没有。
    pub fn org_keyword(self) -> Option<&'static str> {
        match self {
            PageType::Model => None,
            PageType::Part => Some("Part"),
            PageType::Shortcut => Some("Shortcut"),
            PageType::Subpart => Some("Subpart"),
            PageType::Primitive => Some("Primitive"),
            PageType::HiresPrimitive => Some("48_Primitive"),
            PageType::LoresPrimitive => Some("8_Primitive"),
        }
    }

    pub fn from_org_keyword(keyword: &str) -> Option<Self> {
        let keyword = keyword
            .strip_prefix("Unofficial_")
            .unwrap_or(keyword)
            .to_ascii_lowercase();
        match keyword.as_str() {
            "part" => Some(PageType::Part),
            "shortcut" => Some(PageType::Shortcut),
            "subpart" => Some(PageType::Subpart),
            "primitive" => Some(PageType::Primitive),
            "48_primitive" => Some(PageType::HiresPrimitive),
            "8_primitive" => Some(PageType::LoresPrimitive),
            "model" => Some(PageType::Model),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BfcMode {
    #[default]
    Disabled,
    CertifiedClockwise,
    CertifiedCounterClockwise,
}

impl BfcMode {
    #[inline]
    pub fn is_enabled(self) -> bool {
        !matches!(self, BfcMode::Disabled)
    }

    /// 两者都启用且绕向约定相反。
    pub fn opposes(self, other: BfcMode) -> bool {
        self.is_enabled() && other.is_enabled() && self != other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepMode {
    #[default]
    Additive,
    Relative,
    Absolute,
    Reset,
}

/// 步骤的视图旋转描述，角度单位为度，范围 [-360, 360]。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepTransform {
    mode: StepMode,
    x: f64,
    y: f64,
    z: f64,
}

impl StepTransform {
    pub fn new(mode: StepMode, x: f64, y: f64, z: f64) -> Result<Self, DomError> {
        for angle in [x, y, z] {
            if !angle.is_finite() || !(-360.0..=360.0).contains(&angle) {
                return Err(DomError::invalid(format!("旋转角 {angle} 超出 [-360, 360]")));
            }
        }
        Ok(Self { mode, x, y, z })
    }

    pub fn reset() -> Self {
        Self {
            mode: StepMode::Reset,
            ..Self::default()
        }
    }

    #[inline]
    pub fn mode(&self) -> StepMode {
        self.mode
    }

    #[inline]
    pub fn angles(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    id: StepId,
    transform: StepTransform,
    elements: Vec<Element>,
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        self.transform == other.transform && self.elements == other.elements
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::new()
    }
}

impl Step {
    pub fn new() -> Self {
        Self::with_transform(StepTransform::default())
    }

    pub fn with_transform(transform: StepTransform) -> Self {
        Self {
            id: StepId::fresh(),
            transform,
            elements: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> StepId {
        self.id
    }

    #[inline]
    pub fn transform(&self) -> StepTransform {
        self.transform
    }

    #[inline]
    pub fn set_transform(&mut self, transform: StepTransform) {
        self.transform = transform;
    }

    #[inline]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn position(&self, id: ElementId) -> Option<usize> {
        self.elements.iter().position(|element| element.id() == id)
    }

    pub fn push(&mut self, element: Element) -> Result<(), DomError> {
        self.insert(self.elements.len(), element)
    }

    pub fn insert(&mut self, index: usize, element: Element) -> Result<(), DomError> {
        if self.elements.iter().any(|existing| existing.find(element.id()).is_some()) {
            return Err(DomError::AlreadyMember);
        }
        if index > self.elements.len() {
            return Err(DomError::IndexOutOfRange {
                index,
                len: self.elements.len(),
            });
        }
        self.elements.insert(index, element);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Element, DomError> {
        if index >= self.elements.len() {
            return Err(DomError::IndexOutOfRange {
                index,
                len: self.elements.len(),
            });
        }
        Ok(self.elements.remove(index))
    }

    /// 原位替换，保持位置。
    pub fn replace(&mut self, index: usize, element: Element) -> Result<Element, DomError> {
        let len = self.elements.len();
        let slot = self
            .elements
            .get_mut(index)
            .ok_or(DomError::IndexOutOfRange { index, len })?;
        Ok(std::mem::replace(slot, element))
    }

    pub fn find(&self, id: ElementId) -> Option<&Element> {
        self.elements.iter().find_map(|element| element.find(id))
    }

    pub fn find_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.iter_mut().find_map(|element| element.find_mut(id))
    }

    pub fn duplicate(&self) -> Step {
        Step {
            id: StepId::fresh(),
            transform: self.transform,
            elements: self.elements.iter().map(Element::duplicate).collect(),
        }
    }
}

/// 页面头部的标量属性，整体快照便于撤销。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageHeader {
    pub name: String,
    pub title: String,
    pub author: String,
    pub page_type: PageType,
    pub bfc: BfcMode,
    pub inline_on_publish: bool,
    pub is_locked: bool,
    /// `UPDATE` 发布标记；缺失即视为未发布。
    pub release: Option<String>,
}

impl PageHeader {
    pub fn new(name: impl Into<String>, page_type: PageType) -> Self {
        Self {
            name: name.into(),
            title: String::new(),
            author: String::new(),
            page_type,
            bfc: BfcMode::Disabled,
            inline_on_publish: false,
            is_locked: false,
            release: None,
        }
    }

    /// 由名称和类型派生的目标名，如 `s\3001s01.dat`。
    pub fn target_name(&self) -> String {
        format!(
            "{}{}{}",
            self.page_type.prefix(),
            self.name,
            self.page_type.extension()
        )
    }

    /// 重定向页面的目标名（标题以 `~Moved to ` 开头）。
    pub fn redirect(&self) -> Option<&str> {
        self.title
            .strip_prefix("~Moved to ")
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn validate(&self) -> Result<(), DomError> {
        if self.name.trim().is_empty() {
            return Err(DomError::invalid("页面名称不能为空"));
        }
        for value in [&self.name, &self.title, &self.author] {
            if value.contains(['\r', '\n']) {
                return Err(DomError::invalid("页面属性不能跨行"));
            }
        }
        Ok(())
    }
}

/// 由目标名拆分出名称与类型：去掉扩展名与已知前缀。
pub fn split_target_name(target_name: &str) -> (String, PageType) {
    let trimmed = target_name.trim();
    let lower = trimmed.to_ascii_lowercase();
    let (stem, is_model) = if lower.ends_with(".ldr") || lower.ends_with(".mpd") {
        (&trimmed[..trimmed.len() - 4], true)
    } else if lower.ends_with(".dat") {
        (&trimmed[..trimmed.len() - 4], false)
    } else {
        (trimmed, false)
    };
    if is_model {
        return (stem.to_string(), PageType::Model);
    }
    let stem_lower = stem.to_ascii_lowercase().replace('/', "\\");
    for page_type in [
        PageType::Subpart,
        PageType::HiresPrimitive,
        PageType::LoresPrimitive,
    ] {
        if stem_lower.starts_with(page_type.prefix()) {
            return (stem[page_type.prefix().len()..].to_string(), page_type);
        }
    }
    (stem.to_string(), PageType::Part)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    id: PageId,
    header: PageHeader,
    steps: Vec<Step>,
    is_frozen: bool,
}

impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.steps == other.steps
    }
}

impl Page {
    /// 新页面带一个空步骤。
    pub fn new(name: impl Into<String>, page_type: PageType) -> Result<Self, DomError> {
        Self::with_header(PageHeader::new(name, page_type))
    }

    pub fn with_header(header: PageHeader) -> Result<Self, DomError> {
        header.validate()?;
        Ok(Self {
            id: PageId::fresh(),
            header,
            steps: vec![Step::new()],
            is_frozen: false,
        })
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.header.name
    }

    #[inline]
    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    #[inline]
    pub fn bfc(&self) -> BfcMode {
        self.header.bfc
    }

    #[inline]
    pub fn target_name(&self) -> String {
        self.header.target_name()
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.is_frozen
    }

    /// 冻结不可逆；库页面加载后立即冻结。
    #[inline]
    pub fn freeze(&mut self) {
        self.is_frozen = true;
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.header.is_locked
    }

    /// 替换头部。冻结页面拒绝；锁定页面只允许修改锁定标志本身。
    pub fn set_header(&mut self, header: PageHeader) -> Result<PageHeader, DomError> {
        self.ensure_unfrozen()?;
        header.validate()?;
        if self.header.is_locked {
            let unlocked_only = PageHeader {
                is_locked: self.header.is_locked,
                ..header.clone()
            };
            if unlocked_only != self.header {
                return Err(DomError::Locked);
            }
        }
        Ok(std::mem::replace(&mut self.header, header))
    }

    /// 不做锁定检查的头部替换，供撤销与内部簿记使用。
    pub fn replace_header_unchecked(&mut self, header: PageHeader) -> PageHeader {
        std::mem::replace(&mut self.header, header)
    }

    #[inline]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|step| step.id() == id)
    }

    pub fn step_position(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|step| step.id() == id)
    }

    /// 冻结或锁定的页面不提供可变步骤。
    pub fn step_mut(&mut self, id: StepId) -> Result<&mut Step, DomError> {
        self.ensure_mutable()?;
        self.step_mut_unlocked(id)
    }

    /// 忽略页面锁定，供撤销与内部簿记使用；冻结页面仍然拒绝。
    pub fn step_mut_unlocked(&mut self, id: StepId) -> Result<&mut Step, DomError> {
        self.ensure_unfrozen()?;
        self.steps
            .iter_mut()
            .find(|step| step.id() == id)
            .ok_or(DomError::NotFound(id.get()))
    }

    pub fn step_at_mut(&mut self, index: usize) -> Result<&mut Step, DomError> {
        self.ensure_mutable()?;
        let len = self.steps.len();
        self.steps
            .get_mut(index)
            .ok_or(DomError::IndexOutOfRange { index, len })
    }

    pub fn push_step(&mut self, step: Step) -> Result<(), DomError> {
        self.insert_step(self.steps.len(), step)
    }

    pub fn insert_step(&mut self, index: usize, step: Step) -> Result<(), DomError> {
        self.ensure_mutable()?;
        self.insert_step_unlocked(index, step)
    }

    pub fn insert_step_unlocked(&mut self, index: usize, step: Step) -> Result<(), DomError> {
        self.ensure_unfrozen()?;
        if self.steps.iter().any(|existing| existing.id() == step.id()) {
            return Err(DomError::AlreadyMember);
        }
        if index > self.steps.len() {
            return Err(DomError::IndexOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        self.steps.insert(index, step);
        Ok(())
    }

    pub fn remove_step(&mut self, index: usize) -> Result<Step, DomError> {
        self.ensure_mutable()?;
        self.remove_step_unlocked(index)
    }

    pub fn remove_step_unlocked(&mut self, index: usize) -> Result<Step, DomError> {
        self.ensure_unfrozen()?;
        if index >= self.steps.len() {
            return Err(DomError::IndexOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        Ok(self.steps.remove(index))
    }

    /// 追加到最后一个步骤，没有步骤时先创建。
    pub fn push_element(&mut self, element: Element) -> Result<ElementId, DomError> {
        self.ensure_mutable()?;
        if self.steps.is_empty() {
            self.steps.push(Step::new());
        }
        let id = element.id();
        let last = self.steps.len() - 1;
        self.steps[last].push(element)?;
        Ok(id)
    }

    /// 返回元素所在步骤与步骤内的顶层位置；纹理映射内部元素返回其容器的位置。
    pub fn locate(&self, id: ElementId) -> Option<(StepId, usize)> {
        self.steps.iter().find_map(|step| {
            step.elements()
                .iter()
                .position(|element| element.find(id).is_some())
                .map(|index| (step.id(), index))
        })
    }

    pub fn find_element(&self, id: ElementId) -> Option<&Element> {
        self.steps.iter().find_map(|step| step.find(id))
    }

    pub fn find_element_mut(&mut self, id: ElementId) -> Result<&mut Element, DomError> {
        self.ensure_mutable()?;
        self.steps
            .iter_mut()
            .find_map(|step| step.find_mut(id))
            .ok_or(DomError::NotFound(id.get()))
    }

    /// 深度优先遍历所有元素（含纹理映射内部）。
    pub fn visit_elements(&self, visitor: &mut dyn FnMut(&Element)) {
        for step in &self.steps {
            for element in step.elements() {
                element.visit(visitor);
            }
        }
    }

    pub fn references(&self) -> Vec<(ElementId, &Reference)> {
        let mut found = Vec::new();
        for step in &self.steps {
            for element in step.elements() {
                collect_references(element, &mut found);
            }
        }
        found
    }

    /// 页面内 `!COLOUR` 定义构成的私有调色板。
    pub fn palette(&self) -> LocalPalette {
        let mut palette = LocalPalette::new();
        self.visit_elements(&mut |element| {
            if let ElementKind::ColourDefinition(definition) = element.kind() {
                palette.define(definition.clone());
            }
        });
        palette
    }

    /// 元素标识到其所属组名的映射。
    pub fn group_memberships(&self) -> HashMap<ElementId, String> {
        let mut memberships = HashMap::new();
        self.visit_elements(&mut |element| {
            if let Some(group) = element.as_group() {
                for member in group.members() {
                    memberships.insert(*member, group.name().to_string());
                }
            }
        });
        memberships
    }

    /// 深拷贝：新标识、未冻结，组成员随之重映射。
    pub fn duplicate(&self) -> Page {
        let mut remap = HashMap::new();
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let copy = step.duplicate();
                for (old, new) in step.elements().iter().zip(copy.elements()) {
                    let mut old_ids = Vec::new();
                    let mut new_ids = Vec::new();
                    old.visit(&mut |element| old_ids.push(element.id()));
                    new.visit(&mut |element| new_ids.push(element.id()));
                    remap.extend(old_ids.into_iter().zip(new_ids));
                }
                copy
            })
            .collect::<Vec<_>>();
        let mut page = Page {
            id: PageId::fresh(),
            header: self.header.clone(),
            steps,
            is_frozen: false,
        };
        for step in &mut page.steps {
            for element in &mut step.elements {
                if let ElementKind::Group(group) = element.kind_mut_unlocked() {
                    group.remap_members(|member| remap.get(&member).copied().unwrap_or(member));
                }
            }
        }
        page
    }

    fn ensure_mutable(&self) -> Result<(), DomError> {
        self.ensure_unfrozen()?;
        if self.header.is_locked {
            Err(DomError::Locked)
        } else {
            Ok(())
        }
    }

    fn ensure_unfrozen(&self) -> Result<(), DomError> {
        if self.is_frozen {
            Err(DomError::Frozen)
        } else {
            Ok(())
        }
    }
}

fn collect_references<'a>(element: &'a Element, found: &mut Vec<(ElementId, &'a Reference)>) {
    match element.kind() {
        ElementKind::Reference(reference) => found.push((element.id(), reference)),
        ElementKind::Texmap(texmap) => {
            for child in texmap.all_elements() {
                collect_references(child, found);
            }
        }
        _ => {}
    }
}

/// 有序页面集合，对页面拥有独占所有权。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    path: Option<PathBuf>,
    pages: Vec<Page>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            pages: Vec::new(),
        }
    }

    #[inline]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[inline]
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    #[inline]
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.iter().find(|page| page.id() == id)
    }

    pub fn page_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.pages.iter_mut().find(|page| page.id() == id)
    }

    pub fn page_position(&self, id: PageId) -> Option<usize> {
        self.pages.iter().position(|page| page.id() == id)
    }

    /// 按目标名查找（不区分大小写），同名时文档顺序中最后一个胜出。
    pub fn find_page(&self, target_name: &str) -> Option<&Page> {
        self.pages
            .iter()
            .rev()
            .find(|page| target::names_match(&page.target_name(), target_name))
    }

    pub fn push_page(&mut self, page: Page) -> Result<(), DomError> {
        self.insert_page(self.pages.len(), page)
    }

    /// 冻结页面与已存在的页面不能插入。
    pub fn insert_page(&mut self, index: usize, page: Page) -> Result<(), DomError> {
        if page.is_frozen() {
            return Err(DomError::Frozen);
        }
        if self.page(page.id()).is_some() {
            return Err(DomError::AlreadyMember);
        }
        if index > self.pages.len() {
            return Err(DomError::IndexOutOfRange {
                index,
                len: self.pages.len(),
            });
        }
        self.pages.insert(index, page);
        Ok(())
    }

    pub fn remove_page(&mut self, id: PageId) -> Result<(usize, Page), DomError> {
        let index = self.page_position(id).ok_or(DomError::NotFound(id.get()))?;
        Ok((index, self.pages.remove(index)))
    }

    pub fn replace_page(&mut self, id: PageId, page: Page) -> Result<Page, DomError> {
        if page.is_frozen() {
            return Err(DomError::Frozen);
        }
        let index = self.page_position(id).ok_or(DomError::NotFound(id.get()))?;
        if page.id() != id && self.page(page.id()).is_some() {
            return Err(DomError::AlreadyMember);
        }
        Ok(std::mem::replace(&mut self.pages[index], page))
    }

    /// 元素所在的页面、步骤与顶层位置。
    pub fn locate_element(&self, id: ElementId) -> Option<(PageId, StepId, usize)> {
        self.pages.iter().find_map(|page| {
            page.locate(id)
                .map(|(step, index)| (page.id(), step, index))
        })
    }

    pub fn find_element(&self, id: ElementId) -> Option<&Element> {
        self.pages.iter().find_map(|page| page.find_element(id))
    }

    pub fn find_element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.pages
            .iter_mut()
            .find_map(|page| page.find_element_mut(id).ok())
    }

    pub fn page_of_element(&self, id: ElementId) -> Option<&Page> {
        self.pages
            .iter()
            .find(|page| page.find_element(id).is_some())
    }

    pub fn page_of_step(&self, id: StepId) -> Option<&Page> {
        self.pages.iter().find(|page| page.step(id).is_some())
    }

    /// 所有引用及其所在页面。
    pub fn references(&self) -> Vec<(PageId, ElementId, &Reference)> {
        self.pages
            .iter()
            .flat_map(|page| {
                page.references()
                    .into_iter()
                    .map(move |(id, reference)| (page.id(), id, reference))
            })
            .collect()
    }
}
