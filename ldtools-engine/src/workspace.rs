use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use ldtools_config::AppConfig;
use ldtools_core::code::CodeStandard;
use ldtools_core::document::{Document, Page, PageHeader, PageId, Step, StepId};
use ldtools_core::element::{Element, ElementId, ElementKind};
use ldtools_core::errors::DomError;
use ldtools_core::geometry::Matrix4;
use ldtools_core::target::{TargetLookup, TargetPage, TargetStatus, normalize_name, page_is_flat};
use ldtools_io::{CodeGenerator, EmitOptions};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::analytics::{self, Analyzer, Fix, Problem, TargetInfo};
use crate::errors::EngineError;
use crate::history::{Change, History, ResolutionSnapshot, Transaction};
use crate::library::{Library, LibrarySubscription};
use crate::resolve::{CachedResolution, TargetContext, TargetSource};

const DEFAULT_HISTORY_LIMIT: usize = 256;

/// 文档变化通知，在事务提交、撤销与重做时统一发出。
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    PageAdded(PageId),
    PageRemoved(PageId),
    PageChanged(PageId),
    StepAdded { page: PageId, step: StepId },
    StepRemoved { page: PageId, step: StepId },
    ElementAdded { step: StepId, element: ElementId },
    ElementRemoved { step: StepId, element: ElementId },
    ElementChanged(ElementId),
    /// 引用的解析结果（目标身份或状态）发生变化，每次逻辑修改至多一次。
    TargetChanged {
        element: ElementId,
        status: TargetStatus,
    },
}

#[derive(Debug)]
struct OpenTransaction {
    label: String,
    changes: Vec<Change>,
    events: Vec<DocumentEvent>,
}

/// 活动文档：持有 `Document`，维护引用解析缓存、撤销栈与选中集。
///
/// 所有修改都在文档线程上同步执行；库的变化通过 [`Workspace::process_library_events`]
/// 在调用方选择的时机并入。
#[derive(Debug)]
pub struct Workspace {
    document: Document,
    library: Option<Arc<Library>>,
    subscription: Option<LibrarySubscription>,
    analyzer: Analyzer,
    cache: ResolutionSnapshot,
    history: History,
    open: Option<OpenTransaction>,
    subscribers: Vec<Sender<DocumentEvent>>,
    selected: FxHashSet<ElementId>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(Document::new())
    }
}

impl Workspace {
    pub fn new(document: Document) -> Self {
        let mut workspace = Self {
            document,
            library: None,
            subscription: None,
            analyzer: Analyzer::default(),
            cache: ResolutionSnapshot::default(),
            history: History::with_limit(DEFAULT_HISTORY_LIMIT),
            open: None,
            subscribers: Vec::new(),
            selected: FxHashSet::default(),
        };
        workspace.cache = workspace.resolve_all();
        workspace
    }

    /// 绑定零件库并订阅其变化通知。
    pub fn with_library(document: Document, library: Arc<Library>) -> Self {
        let mut workspace = Self::new(document);
        workspace.attach_library(library);
        workspace
    }

    /// 按配置创建：配置了库根目录时挂接磁盘库，分析阈值取自配置。
    pub fn from_config(document: Document, config: &AppConfig) -> Self {
        let mut workspace = Self::new(document);
        workspace.analyzer = Analyzer::new(config.analytics);
        if !config.library.roots.is_empty() {
            workspace.attach_library(Arc::new(Library::from_config(&config.library)));
        }
        workspace
    }

    fn attach_library(&mut self, library: Arc<Library>) {
        self.subscription = Some(library.subscribe());
        self.library = Some(library);
        self.cache = self.resolve_all();
    }

    #[inline]
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// 取回文档。未提交的事务被丢弃。
    pub fn into_document(mut self) -> Document {
        if self.open.is_some() {
            self.rollback_open();
        }
        self.document
    }

    #[inline]
    pub fn library(&self) -> Option<&Arc<Library>> {
        self.library.as_ref()
    }

    pub fn set_analyzer(&mut self, analyzer: Analyzer) {
        self.analyzer = analyzer;
    }

    /// 当前文档与库构成的解析作用域。
    pub fn context(&self) -> TargetContext<'_> {
        TargetContext::new(Some(&self.document), self.library.as_deref())
    }

    /// 订阅文档事件。接收端被丢弃后自动退订。
    pub fn subscribe(&mut self) -> Receiver<DocumentEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.push(sender);
        receiver
    }

    /// 按原始数值查找元素标识（包括纹理映射内部的元素）。
    pub fn element_id(&self, raw: u64) -> Option<ElementId> {
        let mut found = None;
        for page in self.document.pages() {
            page.visit_elements(&mut |element| {
                if element.id().get() == raw {
                    found = Some(element.id());
                }
            });
            if found.is_some() {
                break;
            }
        }
        found
    }

    // ---- 事务 ----

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.open.is_some()
    }

    pub fn begin(&mut self, label: impl Into<String>) -> Result<(), EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionOpen);
        }
        self.open = Some(OpenTransaction {
            label: label.into(),
            changes: Vec::new(),
            events: Vec::new(),
        });
        Ok(())
    }

    /// 提交事务：重新解析所有引用，与提交前的缓存比较后发出事件并记录撤销项。
    pub fn commit(&mut self) -> Result<(), EngineError> {
        let open = self.open.take().ok_or(EngineError::NoTransaction)?;
        if open.changes.is_empty() {
            return Ok(());
        }
        let after = self.resolve_all();
        let before = std::mem::replace(&mut self.cache, after.clone());
        let mut events = open.events;
        events.extend(target_changes(&before, &after));
        debug!(label = %open.label, changes = open.changes.len(), "事务已提交");
        self.history.record(Transaction {
            label: open.label,
            changes: open.changes,
            before,
            after,
            library_generation: self.library_generation(),
        });
        self.publish(events);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), EngineError> {
        if self.open.is_none() {
            return Err(EngineError::NoTransaction);
        }
        self.rollback_open();
        Ok(())
    }

    fn rollback_open(&mut self) {
        self.revert_to(0, 0);
        self.open = None;
    }

    /// 撤回打开事务中 `changes`/`events` 位置之后的部分。
    fn revert_to(&mut self, changes: usize, events: usize) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        let undone: Vec<Change> = open.changes.drain(changes..).collect();
        open.events.truncate(events);
        for change in undone.iter().rev() {
            if let Err(error) = apply_change(&mut self.document, &change.inverse(), true) {
                warn!(error = %error, "回滚修改失败");
            }
        }
    }

    /// 在事务中执行 `f`；没有打开的事务时自动开启并提交。失败时撤回 `f` 已做的修改。
    fn mutate<R>(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut Self) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let auto = self.open.is_none();
        if auto {
            self.begin(label)?;
        }
        let (changes, events) = self
            .open
            .as_ref()
            .map_or((0, 0), |open| (open.changes.len(), open.events.len()));
        match f(self) {
            Ok(value) => {
                if auto {
                    self.commit()?;
                }
                Ok(value)
            }
            Err(error) => {
                self.revert_to(changes, events);
                if auto {
                    self.open = None;
                }
                Err(error)
            }
        }
    }

    fn execute(&mut self, change: Change) -> Result<(), EngineError> {
        self.record(change, false)
    }

    /// `unlocked` 为真时跳过页面锁定检查，用于内部簿记（例如跟随页面改名）。
    fn record(&mut self, change: Change, unlocked: bool) -> Result<(), EngineError> {
        if self.open.is_none() {
            return Err(EngineError::NoTransaction);
        }
        let events = apply_change(&mut self.document, &change, unlocked)?;
        if let Some(open) = self.open.as_mut() {
            open.changes.push(change);
            open.events.extend(events);
        }
        Ok(())
    }

    // ---- 撤销/重做 ----

    #[inline]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.history.undo_label()
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.history.redo_label()
    }

    /// 撤销最近的事务，同时恢复提交前的解析缓存。没有可撤销项时返回 `false`。
    pub fn undo(&mut self) -> Result<bool, EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionOpen);
        }
        let Some(transaction) = self.history.pop_undo() else {
            return Ok(false);
        };
        let inverse: Vec<Change> = transaction.changes.iter().rev().map(Change::inverse).collect();
        let events = match self.replay(&inverse) {
            Ok(events) => events,
            Err(error) => {
                self.history.push_undo(transaction);
                return Err(error);
            }
        };
        let restored = self.restore(&transaction.before, transaction.library_generation);
        self.finish_replay(events, restored);
        debug!(label = %transaction.label, "已撤销");
        self.history.push_redo(transaction);
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionOpen);
        }
        let Some(transaction) = self.history.pop_redo() else {
            return Ok(false);
        };
        let events = match self.replay(&transaction.changes) {
            Ok(events) => events,
            Err(error) => {
                self.history.push_redo(transaction);
                return Err(error);
            }
        };
        let restored = self.restore(&transaction.after, transaction.library_generation);
        self.finish_replay(events, restored);
        debug!(label = %transaction.label, "已重做");
        self.history.push_undo(transaction);
        Ok(true)
    }

    /// 依次应用修改；中途失败时把已应用的部分倒回去。
    fn replay(&mut self, changes: &[Change]) -> Result<Vec<DocumentEvent>, EngineError> {
        let mut events = Vec::new();
        for (done, change) in changes.iter().enumerate() {
            match apply_change(&mut self.document, change, true) {
                Ok(produced) => events.extend(produced),
                Err(error) => {
                    for applied in changes[..done].iter().rev() {
                        if let Err(undo_error) =
                            apply_change(&mut self.document, &applied.inverse(), true)
                        {
                            warn!(error = %undo_error, "重放失败后无法恢复文档");
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(events)
    }

    /// 库在事务之后有过变化时，快照不再可信，改为完整解析。
    fn restore(&self, snapshot: &ResolutionSnapshot, generation: u64) -> ResolutionSnapshot {
        if generation == self.library_generation() {
            snapshot.clone()
        } else {
            self.resolve_all()
        }
    }

    fn finish_replay(&mut self, mut events: Vec<DocumentEvent>, restored: ResolutionSnapshot) {
        events.extend(target_changes(&self.cache, &restored));
        self.cache = restored;
        self.publish(events);
    }

    // ---- 页面 ----

    pub fn add_page(&mut self, page: Page) -> Result<PageId, EngineError> {
        let index = self.document.len();
        self.insert_page(index, page)
    }

    pub fn insert_page(&mut self, index: usize, page: Page) -> Result<PageId, EngineError> {
        let id = page.id();
        self.mutate("添加页面", |workspace| {
            workspace.ensure_unique_elements(&page)?;
            workspace.execute(Change::PageInserted { index, page })
        })?;
        Ok(id)
    }

    pub fn remove_page(&mut self, id: PageId) -> Result<Page, EngineError> {
        self.mutate("删除页面", |workspace| {
            let index = workspace
                .document
                .page_position(id)
                .ok_or(EngineError::PageNotFound(id.get()))?;
            let page = workspace.document.pages()[index].clone();
            workspace.execute(Change::PageRemoved {
                index,
                page: page.clone(),
            })?;
            Ok(page)
        })
    }

    pub fn replace_page(&mut self, id: PageId, page: Page) -> Result<Page, EngineError> {
        self.mutate("替换页面", |workspace| {
            let index = workspace
                .document
                .page_position(id)
                .ok_or(EngineError::PageNotFound(id.get()))?;
            let before = workspace.document.pages()[index].clone();
            workspace.execute(Change::PageReplaced {
                index,
                before: before.clone(),
                after: page,
            })?;
            Ok(before)
        })
    }

    /// 修改页面头部。页面改名时，解析到该页面的引用会同步改写目标名，即使引用已锁定。
    pub fn set_page_header(&mut self, id: PageId, header: PageHeader) -> Result<(), EngineError> {
        self.mutate("修改页面属性", |workspace| {
            let page = workspace
                .document
                .page(id)
                .ok_or(EngineError::PageNotFound(id.get()))?;
            let before = page.header().clone();
            if before == header {
                return Ok(());
            }
            let renamed = normalize_name(&before.target_name()) != normalize_name(&header.target_name());
            let dependents = if renamed {
                workspace.dependents(id)
            } else {
                Vec::new()
            };
            let new_name = header.target_name();
            workspace.execute(Change::PageHeader {
                page: id,
                before,
                after: header,
            })?;
            for element in dependents {
                workspace.edit_element(element, true, |element| {
                    if let ElementKind::Reference(reference) = element.kind_mut_unlocked() {
                        reference.set_target_name(new_name.clone())?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
    }

    // ---- 步骤 ----

    pub fn add_step(&mut self, page: PageId, step: Step) -> Result<StepId, EngineError> {
        let id = step.id();
        self.mutate("添加步骤", |workspace| {
            let index = workspace
                .document
                .page(page)
                .ok_or(EngineError::PageNotFound(page.get()))?
                .steps()
                .len();
            for element in step.elements() {
                workspace.ensure_unique_element(element)?;
            }
            workspace.execute(Change::StepInserted { page, index, step })
        })?;
        Ok(id)
    }

    pub fn remove_step(&mut self, id: StepId) -> Result<Step, EngineError> {
        self.mutate("删除步骤", |workspace| {
            let page = workspace
                .document
                .page_of_step(id)
                .ok_or(EngineError::StepNotFound(id.get()))?;
            let page_id = page.id();
            let index = page
                .step_position(id)
                .ok_or(EngineError::StepNotFound(id.get()))?;
            let step = page.steps()[index].clone();
            workspace.execute(Change::StepRemoved {
                page: page_id,
                index,
                step: step.clone(),
            })?;
            Ok(step)
        })
    }

    // ---- 元素 ----

    /// 追加到步骤末尾。
    pub fn add_element(&mut self, step: StepId, element: Element) -> Result<ElementId, EngineError> {
        let index = self
            .document
            .page_of_step(step)
            .and_then(|page| page.step(step))
            .map(Step::len)
            .ok_or(EngineError::StepNotFound(step.get()))?;
        self.insert_element(step, index, element)
    }

    pub fn insert_element(
        &mut self,
        step: StepId,
        index: usize,
        element: Element,
    ) -> Result<ElementId, EngineError> {
        let id = element.id();
        self.mutate("添加元素", |workspace| {
            workspace.ensure_unique_element(&element)?;
            workspace.execute(Change::ElementInserted {
                step,
                index,
                element,
            })
        })?;
        Ok(id)
    }

    /// 从步骤中移除顶层元素。锁定元素不能移除。
    pub fn remove_element(&mut self, id: ElementId) -> Result<Element, EngineError> {
        self.mutate("删除元素", |workspace| workspace.detach_element(id))
    }

    fn detach_element(&mut self, id: ElementId) -> Result<Element, EngineError> {
        let (_, step, index) = self
            .document
            .locate_element(id)
            .ok_or(EngineError::ElementNotFound(id.get()))?;
        let element = self
            .top_level(step, index)
            .filter(|element| element.id() == id)
            .cloned()
            .ok_or_else(|| EngineError::Dom(DomError::operation("只能移除步骤中的顶层元素")))?;
        if element.is_locked() {
            return Err(DomError::Locked.into());
        }
        self.execute(Change::ElementRemoved {
            step,
            index,
            element: element.clone(),
        })?;
        Ok(element)
    }

    /// 把元素移到另一个步骤（或同一步骤的其他位置）。`index` 是移除之后的目标位置。
    pub fn move_element(&mut self, id: ElementId, step: StepId, index: usize) -> Result<(), EngineError> {
        self.mutate("移动元素", |workspace| {
            let element = workspace.detach_element(id)?;
            workspace.execute(Change::ElementInserted {
                step,
                index,
                element,
            })
        })
    }

    /// 编辑元素（可以是纹理映射内部的元素）。闭包在副本上运行，失败时文档不变；
    /// 没有实际变化时不产生撤销项与事件。
    pub fn update_element<R>(
        &mut self,
        id: ElementId,
        f: impl FnOnce(&mut Element) -> Result<R, DomError>,
    ) -> Result<R, EngineError> {
        self.mutate("编辑元素", |workspace| workspace.edit_element(id, false, f))
    }

    fn edit_element<R>(
        &mut self,
        id: ElementId,
        unlocked: bool,
        f: impl FnOnce(&mut Element) -> Result<R, DomError>,
    ) -> Result<R, EngineError> {
        let (_, step, index) = self
            .document
            .locate_element(id)
            .ok_or(EngineError::ElementNotFound(id.get()))?;
        let before = self
            .top_level(step, index)
            .cloned()
            .ok_or(EngineError::ElementNotFound(id.get()))?;
        let mut after = before.clone();
        let target = after
            .find_mut(id)
            .ok_or(EngineError::ElementNotFound(id.get()))?;
        let result = f(target)?;
        if after != before {
            self.record(
                Change::ElementReplaced {
                    step,
                    index,
                    edited: id,
                    before,
                    after,
                },
                unlocked,
            )?;
        }
        Ok(result)
    }

    pub fn set_target_name(&mut self, id: ElementId, name: impl Into<String>) -> Result<(), EngineError> {
        let name = name.into();
        self.update_element(id, |element| match element.kind_mut()? {
            ElementKind::Reference(reference) => reference.set_target_name(name),
            _ => Err(DomError::operation("元素不是引用")),
        })
    }

    pub fn set_matrix(&mut self, id: ElementId, matrix: Matrix4) -> Result<(), EngineError> {
        self.update_element(id, |element| match element.kind_mut()? {
            ElementKind::Reference(reference) => reference.set_matrix(matrix),
            _ => Err(DomError::operation("元素不是引用")),
        })
    }

    /// 反转绕向。引用按目标是否为平面图形决定切换 `Invert` 还是折入 Y 镜像。
    pub fn reverse_winding(&mut self, id: ElementId) -> Result<(), EngineError> {
        let element = self
            .document
            .find_element(id)
            .ok_or(EngineError::ElementNotFound(id.get()))?;
        let mut names = FxHashSet::default();
        element.visit(&mut |nested| {
            if let Some(reference) = nested.as_reference() {
                names.insert(normalize_name(reference.target_name()));
            }
        });
        let context = self.context();
        let flat: FxHashMap<String, bool> = names
            .into_iter()
            .map(|name| {
                let is_flat = context
                    .find_target(&name)
                    .is_some_and(|target| page_is_flat(&target, &context));
                (name, is_flat)
            })
            .collect();
        self.update_element(id, |element| {
            element.reverse_winding(&|reference| {
                flat.get(&normalize_name(reference.target_name()))
                    .copied()
                    .unwrap_or(false)
            })
        })
    }

    /// 执行修复。`Fix::Delete` 移除元素，其余只修改元素自身。
    pub fn apply_fix(&mut self, id: ElementId, fix: &Fix) -> Result<bool, EngineError> {
        if !fix.is_intra_element() {
            self.remove_element(id)?;
            return Ok(true);
        }
        self.update_element(id, |element| analytics::apply_fix(element, fix))
            .map_err(|error| match error {
                EngineError::Dom(DomError::InvalidOperation(message)) => {
                    EngineError::FixNotApplicable(message)
                }
                other => other,
            })
    }

    /// 在一个事务中对所有可自动修复的问题执行第一个修复，返回成功修改的数量。
    /// 删除类修复需要显式调用，锁定元素被跳过。
    pub fn fix_all(&mut self, standard: CodeStandard) -> Result<usize, EngineError> {
        let problems = self.analyze(standard);
        self.mutate("全部修复", |workspace| {
            let mut fixed = 0;
            for problem in problems {
                let Some(fix) = problem.fixes.iter().find(|fix| fix.is_intra_element()) else {
                    continue;
                };
                match workspace.apply_fix(problem.element, fix) {
                    Ok(true) => fixed += 1,
                    Ok(false) => {}
                    Err(error) => {
                        debug!(element = problem.element.get(), error = %error, "跳过无法修复的问题")
                    }
                }
            }
            Ok(fixed)
        })
    }

    // ---- 查询 ----

    fn resolution(&self, id: ElementId) -> Option<CachedResolution> {
        if self.open.is_none() {
            if let Some(cached) = self.cache.get(&id) {
                return Some(cached.clone());
            }
        }
        let page = self.document.page_of_element(id)?;
        let reference = page.find_element(id)?.as_reference()?;
        Some(CachedResolution::from(&self.context().resolve(Some(page), reference)))
    }

    /// 引用的解析状态；不是文档中的引用时返回 `None`。
    pub fn target_status(&self, id: ElementId) -> Option<TargetStatus> {
        self.resolution(id).map(|resolution| resolution.status)
    }

    pub fn target(&self, id: ElementId) -> Option<TargetPage<'_>> {
        match self.resolution(id)?.source {
            TargetSource::None => None,
            TargetSource::Local(page) => self.document.page(page).map(TargetPage::Local),
            TargetSource::Library(page) => Some(TargetPage::Shared(page)),
        }
    }

    /// 解析到指定页面的所有引用。
    pub fn dependents(&self, page: PageId) -> Vec<ElementId> {
        let mut found: Vec<ElementId> = self
            .document
            .references()
            .into_iter()
            .map(|(_, id, _)| id)
            .filter(|id| {
                self.resolution(*id)
                    .is_some_and(|resolution| resolution.source == TargetSource::Local(page))
            })
            .collect();
        found.sort();
        found
    }

    pub fn emit_document(&self, standard: CodeStandard) -> String {
        let context = self.context();
        CodeGenerator::new(&context).document(&self.document, standard)
    }

    pub fn emit_element(&self, id: ElementId, options: &EmitOptions) -> Result<String, EngineError> {
        let page = self
            .document
            .page_of_element(id)
            .ok_or(EngineError::ElementNotFound(id.get()))?;
        let element = page
            .find_element(id)
            .ok_or(EngineError::ElementNotFound(id.get()))?;
        let context = self.context();
        Ok(CodeGenerator::new(&context).element_in_page(page, element, options))
    }

    /// 分析文档中的所有元素。问题是数据，没有问题时返回空集合。
    pub fn analyze(&self, standard: CodeStandard) -> Vec<Problem> {
        let fresh;
        let snapshot = if self.open.is_some() {
            fresh = self.resolve_all();
            &fresh
        } else {
            &self.cache
        };
        let mut problems = Vec::new();
        for page in self.document.pages() {
            page.visit_elements(&mut |element| {
                let info = if element.as_reference().is_some() {
                    target_info(&self.document, snapshot.get(&element.id()))
                } else {
                    TargetInfo::unresolved()
                };
                problems.extend(self.analyzer.check(element, standard, info));
            });
        }
        problems
    }

    // ---- 库事件 ----

    /// 在文档线程上并入库的变化：重新解析受影响的引用并发出 `TargetChanged`。
    /// 通道溢出过时重新解析全部引用。事务打开期间不处理，返回发出的事件数。
    pub fn process_library_events(&mut self) -> usize {
        if self.open.is_some() {
            return 0;
        }
        let Some(subscription) = &self.subscription else {
            return 0;
        };
        let drain = subscription.drain();
        if drain.is_empty() {
            return 0;
        }
        let names: FxHashSet<String> = drain.events.into_iter().map(|event| event.name).collect();
        let context = self.context();
        let mut refreshed = self.cache.clone();
        for page in self.document.pages() {
            for (id, reference) in page.references() {
                let affected = drain.lagged
                    || names.contains(&normalize_name(reference.target_name()))
                    || self.cache.get(&id).is_none_or(|cached| {
                        matches!(cached.source, TargetSource::Library(_))
                            || cached.status == TargetStatus::CircularReference
                    });
                if affected {
                    let resolution = context.resolve(Some(page), reference);
                    refreshed.insert(id, CachedResolution::from(&resolution));
                }
            }
        }
        let events = target_changes(&self.cache, &refreshed);
        debug!(
            files = names.len(),
            lagged = drain.lagged,
            changed = events.len(),
            "已处理库变化"
        );
        let count = events.len();
        self.cache = refreshed;
        self.publish(events);
        count
    }

    // ---- 选中集 ----

    #[inline]
    pub fn selection_len(&self) -> usize {
        self.selected.len()
    }

    #[inline]
    pub fn is_selected(&self, id: ElementId) -> bool {
        self.selected.contains(&id)
    }

    /// 选中指定元素。若元素不存在则返回错误。
    pub fn select(&mut self, id: ElementId) -> Result<(), EngineError> {
        if self.document.find_element(id).is_none() {
            return Err(EngineError::ElementNotFound(id.get()));
        }
        self.selected.insert(id);
        Ok(())
    }

    pub fn deselect(&mut self, id: ElementId) -> bool {
        self.selected.remove(&id)
    }

    /// 切换选中状态，返回切换后的状态。
    pub fn toggle_selection(&mut self, id: ElementId) -> Result<bool, EngineError> {
        if self.document.find_element(id).is_none() {
            return Err(EngineError::ElementNotFound(id.get()));
        }
        if self.selected.insert(id) {
            Ok(true)
        } else {
            self.selected.remove(&id);
            Ok(false)
        }
    }

    #[inline]
    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// 按标识排序的选中元素。
    pub fn selection(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self.selected.iter().copied().collect();
        ids.sort();
        ids
    }

    // ---- 内部 ----

    fn library_generation(&self) -> u64 {
        self.library.as_ref().map_or(0, |library| library.generation())
    }

    fn resolve_all(&self) -> ResolutionSnapshot {
        let context = self.context();
        let mut snapshot = ResolutionSnapshot::default();
        for page in self.document.pages() {
            for (id, reference) in page.references() {
                let resolution = context.resolve(Some(page), reference);
                snapshot.insert(id, CachedResolution::from(&resolution));
            }
        }
        snapshot
    }

    fn top_level(&self, step: StepId, index: usize) -> Option<&Element> {
        self.document
            .page_of_step(step)
            .and_then(|page| page.step(step))
            .and_then(|step| step.elements().get(index))
    }

    fn ensure_unique_element(&self, element: &Element) -> Result<(), EngineError> {
        let mut duplicate = false;
        element.visit(&mut |nested| {
            duplicate |= self.document.find_element(nested.id()).is_some();
        });
        if duplicate {
            return Err(DomError::AlreadyMember.into());
        }
        Ok(())
    }

    fn ensure_unique_elements(&self, page: &Page) -> Result<(), EngineError> {
        let mut duplicate = false;
        page.visit_elements(&mut |element| {
            duplicate |= self.document.find_element(element.id()).is_some();
        });
        if duplicate {
            return Err(DomError::AlreadyMember.into());
        }
        Ok(())
    }

    fn publish(&mut self, events: Vec<DocumentEvent>) {
        let document = &self.document;
        self.selected
            .retain(|id| document.find_element(*id).is_some());
        if events.is_empty() {
            return;
        }
        self.subscribers
            .retain(|sender| events.iter().all(|event| sender.send(event.clone()).is_ok()));
    }
}

/// 缓存条目转换为分析输入。
fn target_info<'a>(document: &'a Document, cached: Option<&'a CachedResolution>) -> TargetInfo<'a> {
    let Some(cached) = cached else {
        return TargetInfo::unresolved();
    };
    let (page, is_local) = match &cached.source {
        TargetSource::None => (None, false),
        TargetSource::Local(page) => (document.page(*page), true),
        TargetSource::Library(page) => (Some(&**page), false),
    };
    TargetInfo {
        status: cached.status,
        page,
        is_local,
    }
}

/// 两次解析之间发生变化的引用。新增的引用不算变化。
fn target_changes(before: &ResolutionSnapshot, after: &ResolutionSnapshot) -> Vec<DocumentEvent> {
    let mut changed: Vec<(ElementId, TargetStatus)> = after
        .iter()
        .filter(|(id, now)| before.get(*id).is_some_and(|was| was != *now))
        .map(|(id, now)| (*id, now.status))
        .collect();
    changed.sort_by_key(|(id, _)| *id);
    changed
        .into_iter()
        .map(|(element, status)| DocumentEvent::TargetChanged { element, status })
        .collect()
}

fn step_mut(document: &mut Document, id: StepId, unlocked: bool) -> Result<&mut Step, EngineError> {
    let page = document
        .page_of_step(id)
        .map(Page::id)
        .ok_or(EngineError::StepNotFound(id.get()))?;
    let page = document
        .page_mut(page)
        .ok_or(EngineError::StepNotFound(id.get()))?;
    if unlocked {
        Ok(page.step_mut_unlocked(id)?)
    } else {
        Ok(page.step_mut(id)?)
    }
}

/// 把一次修改作用到文档上。`unlocked` 为真时（撤销、重做、回滚与内部簿记）跳过锁定检查。
fn apply_change(
    document: &mut Document,
    change: &Change,
    unlocked: bool,
) -> Result<Vec<DocumentEvent>, EngineError> {
    let events = match change {
        Change::PageInserted { index, page } => {
            document.insert_page(*index, page.clone())?;
            vec![DocumentEvent::PageAdded(page.id())]
        }
        Change::PageRemoved { page, .. } => {
            document.remove_page(page.id())?;
            vec![DocumentEvent::PageRemoved(page.id())]
        }
        Change::PageReplaced { before, after, .. } => {
            document.replace_page(before.id(), after.clone())?;
            if before.id() == after.id() {
                vec![DocumentEvent::PageChanged(after.id())]
            } else {
                vec![
                    DocumentEvent::PageRemoved(before.id()),
                    DocumentEvent::PageAdded(after.id()),
                ]
            }
        }
        Change::PageHeader { page, after, .. } => {
            let target = document
                .page_mut(*page)
                .ok_or(EngineError::PageNotFound(page.get()))?;
            if unlocked {
                target.replace_header_unchecked(after.clone());
            } else {
                target.set_header(after.clone())?;
            }
            vec![DocumentEvent::PageChanged(*page)]
        }
        Change::StepInserted { page, index, step } => {
            let target = document
                .page_mut(*page)
                .ok_or(EngineError::PageNotFound(page.get()))?;
            if unlocked {
                target.insert_step_unlocked(*index, step.clone())?;
            } else {
                target.insert_step(*index, step.clone())?;
            }
            vec![DocumentEvent::StepAdded {
                page: *page,
                step: step.id(),
            }]
        }
        Change::StepRemoved { page, index, step } => {
            let target = document
                .page_mut(*page)
                .ok_or(EngineError::PageNotFound(page.get()))?;
            if target.steps().get(*index).map(Step::id) != Some(step.id()) {
                return Err(EngineError::StepNotFound(step.id().get()));
            }
            if unlocked {
                target.remove_step_unlocked(*index)?;
            } else {
                target.remove_step(*index)?;
            }
            vec![DocumentEvent::StepRemoved {
                page: *page,
                step: step.id(),
            }]
        }
        Change::ElementInserted {
            step,
            index,
            element,
        } => {
            step_mut(document, *step, unlocked)?.insert(*index, element.clone())?;
            vec![DocumentEvent::ElementAdded {
                step: *step,
                element: element.id(),
            }]
        }
        Change::ElementRemoved {
            step,
            index,
            element,
        } => {
            let target = step_mut(document, *step, unlocked)?;
            if target.elements().get(*index).map(Element::id) != Some(element.id()) {
                return Err(EngineError::ElementNotFound(element.id().get()));
            }
            target.remove(*index)?;
            vec![DocumentEvent::ElementRemoved {
                step: *step,
                element: element.id(),
            }]
        }
        Change::ElementReplaced {
            step,
            index,
            edited,
            after,
            ..
        } => {
            step_mut(document, *step, unlocked)?.replace(*index, after.clone())?;
            vec![DocumentEvent::ElementChanged(*edited)]
        }
    };
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldtools_core::colour::ColourValue;
    use ldtools_core::document::PageType;
    use ldtools_core::geometry::Vector3;
    use ldtools_core::reference::Reference;

    fn reference_to(name: &str) -> Element {
        Element::reference(ColourValue::MAIN, Reference::new(name, Matrix4::IDENTITY).unwrap())
    }

    fn model_with_reference(target: &str) -> (Workspace, StepId, ElementId) {
        let mut page = Page::new("model", PageType::Model).unwrap();
        let element = reference_to(target);
        let id = page.push_element(element).unwrap();
        let step = page.steps()[0].id();
        let mut document = Document::new();
        document.push_page(page).unwrap();
        (Workspace::new(document), step, id)
    }

    fn drain(receiver: &Receiver<DocumentEvent>) -> Vec<DocumentEvent> {
        receiver.try_iter().collect()
    }

    #[test]
    fn failed_transaction_steps_leave_document_unchanged() {
        let (mut workspace, step, id) = model_with_reference("x.dat");
        let events = workspace.subscribe();
        workspace.begin("批量").unwrap();
        workspace
            .add_element(step, Element::line(ColourValue::EDGE, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0)))
            .unwrap();
        let error = workspace
            .update_element(id, |element| match element.kind_mut()? {
                ElementKind::Reference(reference) => reference.set_target_name(""),
                _ => Ok(()),
            })
            .unwrap_err();
        assert!(matches!(error, EngineError::Dom(ref dom) if dom.is_validation()));
        workspace.rollback().unwrap();

        assert_eq!(workspace.document().pages()[0].steps()[0].len(), 1);
        assert!(drain(&events).is_empty());
        assert!(!workspace.can_undo());
    }

    #[test]
    fn nested_transactions_are_rejected() {
        let mut workspace = Workspace::default();
        workspace.begin("a").unwrap();
        assert!(matches!(workspace.begin("b"), Err(EngineError::TransactionOpen)));
        assert!(matches!(workspace.undo(), Err(EngineError::TransactionOpen)));
        workspace.commit().unwrap();
        assert!(matches!(workspace.commit(), Err(EngineError::NoTransaction)));
    }

    #[test]
    fn no_op_edits_record_nothing() {
        let (mut workspace, _, id) = model_with_reference("x.dat");
        let events = workspace.subscribe();
        workspace.set_target_name(id, "x.dat").unwrap();
        assert!(!workspace.can_undo());
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn locked_elements_refuse_edits_and_removal() {
        let (mut workspace, _, id) = model_with_reference("x.dat");
        workspace
            .update_element(id, |element| {
                element.set_locked(true);
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            workspace.set_target_name(id, "y.dat"),
            Err(EngineError::Dom(DomError::Locked))
        ));
        assert!(matches!(
            workspace.remove_element(id),
            Err(EngineError::Dom(DomError::Locked))
        ));
    }

    #[test]
    fn duplicate_element_ids_are_rejected() {
        let (mut workspace, step, id) = model_with_reference("x.dat");
        let copy = workspace.document().find_element(id).unwrap().clone();
        assert!(matches!(
            workspace.add_element(step, copy),
            Err(EngineError::Dom(DomError::AlreadyMember))
        ));
        let fresh = workspace.document().find_element(id).unwrap().duplicate();
        assert!(workspace.add_element(step, fresh).is_ok());
    }

    #[test]
    fn selection_tracks_document() {
        let (mut workspace, _, id) = model_with_reference("x.dat");
        workspace.select(id).unwrap();
        assert!(workspace.is_selected(id));
        assert!(!workspace.toggle_selection(id).unwrap());
        assert!(workspace.toggle_selection(id).unwrap());

        workspace.remove_element(id).unwrap();
        assert_eq!(workspace.selection_len(), 0);
        assert!(matches!(workspace.select(id), Err(EngineError::ElementNotFound(_))));
    }
}
