use ldtools_core::document::{Page, PageHeader, PageId, Step, StepId};
use ldtools_core::element::{Element, ElementId};
use rustc_hash::FxHashMap;

use crate::resolve::CachedResolution;

/// 可逆的单步修改。每个变体都携带正反两个方向所需的全部数据。
#[derive(Debug, Clone)]
pub(crate) enum Change {
    PageInserted {
        index: usize,
        page: Page,
    },
    PageRemoved {
        index: usize,
        page: Page,
    },
    PageReplaced {
        index: usize,
        before: Page,
        after: Page,
    },
    PageHeader {
        page: PageId,
        before: PageHeader,
        after: PageHeader,
    },
    StepInserted {
        page: PageId,
        index: usize,
        step: Step,
    },
    StepRemoved {
        page: PageId,
        index: usize,
        step: Step,
    },
    ElementInserted {
        step: StepId,
        index: usize,
        element: Element,
    },
    ElementRemoved {
        step: StepId,
        index: usize,
        element: Element,
    },
    /// 顶层元素整体替换；`edited` 是实际被修改的（可能嵌套的）元素。
    ElementReplaced {
        step: StepId,
        index: usize,
        edited: ElementId,
        before: Element,
        after: Element,
    },
}

impl Change {
    pub(crate) fn inverse(&self) -> Change {
        match self.clone() {
            Change::PageInserted { index, page } => Change::PageRemoved { index, page },
            Change::PageRemoved { index, page } => Change::PageInserted { index, page },
            Change::PageReplaced {
                index,
                before,
                after,
            } => Change::PageReplaced {
                index,
                before: after,
                after: before,
            },
            Change::PageHeader {
                page,
                before,
                after,
            } => Change::PageHeader {
                page,
                before: after,
                after: before,
            },
            Change::StepInserted { page, index, step } => Change::StepRemoved { page, index, step },
            Change::StepRemoved { page, index, step } => Change::StepInserted { page, index, step },
            Change::ElementInserted {
                step,
                index,
                element,
            } => Change::ElementRemoved {
                step,
                index,
                element,
            },
            Change::ElementRemoved {
                step,
                index,
                element,
            } => Change::ElementInserted {
                step,
                index,
                element,
            },
            Change::ElementReplaced {
                step,
                index,
                edited,
                before,
                after,
            } => Change::ElementReplaced {
                step,
                index,
                edited,
                before: after,
                after: before,
            },
        }
    }
}

pub(crate) type ResolutionSnapshot = FxHashMap<ElementId, CachedResolution>;

/// 一次已提交的事务，连同提交前后的解析缓存。
#[derive(Debug, Clone)]
pub(crate) struct Transaction {
    pub label: String,
    pub changes: Vec<Change>,
    pub before: ResolutionSnapshot,
    pub after: ResolutionSnapshot,
    /// 提交时的库版本；不一致说明缓存快照可能已过期。
    pub library_generation: u64,
}

/// 撤销/重做栈。
#[derive(Debug, Default)]
pub(crate) struct History {
    undo: Vec<Transaction>,
    redo: Vec<Transaction>,
    limit: Option<usize>,
}

impl History {
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, transaction: Transaction) {
        self.redo.clear();
        self.undo.push(transaction);
        if let Some(limit) = self.limit {
            if self.undo.len() > limit {
                let excess = self.undo.len() - limit;
                self.undo.drain(..excess);
            }
        }
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Transaction> {
        self.undo.pop()
    }

    pub(crate) fn push_undo(&mut self, transaction: Transaction) {
        self.undo.push(transaction);
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Transaction> {
        self.redo.pop()
    }

    pub(crate) fn push_redo(&mut self, transaction: Transaction) {
        self.redo.push(transaction);
    }

    pub(crate) fn undo_label(&self) -> Option<&str> {
        self.undo.last().map(|transaction| transaction.label.as_str())
    }

    pub(crate) fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(|transaction| transaction.label.as_str())
    }

    pub(crate) fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub(crate) fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}
