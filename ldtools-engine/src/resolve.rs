use std::sync::Arc;

use ldtools_core::document::{Document, Page, PageId};
use ldtools_core::reference::Reference;
use ldtools_core::target::{TargetLookup, TargetPage, TargetStatus, normalize_name};
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::library::{Library, LibraryLookup};

/// 单次解析的结果。
#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub status: TargetStatus,
    pub target: Option<TargetPage<'a>>,
}

impl Resolution<'_> {
    fn failed(status: TargetStatus) -> Self {
        Self {
            status,
            target: None,
        }
    }
}

/// 缓存中保存的解析结果：不借用文档，只记录目标的身份。
#[derive(Debug, Clone, Default)]
pub enum TargetSource {
    #[default]
    None,
    Local(PageId),
    Library(Arc<Page>),
}

impl PartialEq for TargetSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TargetSource::None, TargetSource::None) => true,
            (TargetSource::Local(a), TargetSource::Local(b)) => a == b,
            (TargetSource::Library(a), TargetSource::Library(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedResolution {
    pub status: TargetStatus,
    pub source: TargetSource,
}

impl From<&Resolution<'_>> for CachedResolution {
    fn from(resolution: &Resolution<'_>) -> Self {
        let source = match &resolution.target {
            None => TargetSource::None,
            Some(TargetPage::Local(page)) => TargetSource::Local(page.id()),
            Some(TargetPage::Shared(page)) => TargetSource::Library(Arc::clone(page)),
        };
        Self {
            status: resolution.status,
            source,
        }
    }
}

enum Lookup<'a> {
    Found(TargetPage<'a>),
    NotFound,
    Unloadable,
}

/// 解析作用域：引用所在（或指定的）文档，以及可选的外部库。
/// 未挂接到文档的引用把它作为显式的目标上下文传入。
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetContext<'a> {
    document: Option<&'a Document>,
    library: Option<&'a Library>,
}

impl<'a> TargetContext<'a> {
    pub fn new(document: Option<&'a Document>, library: Option<&'a Library>) -> Self {
        Self { document, library }
    }

    pub fn document(&self) -> Option<&'a Document> {
        self.document
    }

    /// 解析顺序：文档内页面优先，其次外部库；找到后检查是否回到 `origin`。
    pub fn resolve(&self, origin: Option<&Page>, reference: &Reference) -> Resolution<'a> {
        let name = reference.target_name().trim();
        if name.is_empty() {
            return Resolution::failed(TargetStatus::Missing);
        }
        let target = match self.lookup(name) {
            Lookup::Found(target) => target,
            Lookup::NotFound => return Resolution::failed(TargetStatus::Missing),
            Lookup::Unloadable => return Resolution::failed(TargetStatus::Unloadable),
        };
        if let Some(origin) = origin {
            let origin_key = normalize_name(&origin.target_name());
            if self.reaches(&target, &origin_key) {
                trace!(target_name = name, origin = %origin_key, "检测到循环引用");
                return Resolution::failed(TargetStatus::CircularReference);
            }
        }
        Resolution {
            status: TargetStatus::Resolved,
            target: Some(target),
        }
    }

    fn lookup(&self, name: &str) -> Lookup<'a> {
        if let Some(page) = self.document.and_then(|document| document.find_page(name)) {
            return Lookup::Found(TargetPage::Local(page));
        }
        match self.library.map(|library| library.lookup(name)) {
            Some(LibraryLookup::Found(page)) => Lookup::Found(TargetPage::Shared(page)),
            Some(LibraryLookup::Unloadable) => Lookup::Unloadable,
            Some(LibraryLookup::NotFound) | None => Lookup::NotFound,
        }
    }

    /// 沿目标页面的引用链深度优先搜索 `origin_key`。
    fn reaches(&self, start: &TargetPage<'a>, origin_key: &str) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack = vec![start.clone()];
        while let Some(page) = stack.pop() {
            let key = normalize_name(&page.target_name());
            if key == origin_key {
                return true;
            }
            if !visited.insert(key) {
                continue;
            }
            for (_, reference) in page.references() {
                let name = reference.target_name();
                if normalize_name(name) == origin_key {
                    return true;
                }
                if let Lookup::Found(next) = self.lookup(name) {
                    stack.push(next);
                }
            }
        }
        false
    }
}

impl TargetLookup for TargetContext<'_> {
    fn find_target(&self, name: &str) -> Option<TargetPage<'_>> {
        match self.lookup(name) {
            Lookup::Found(page) => Some(page),
            Lookup::NotFound | Lookup::Unloadable => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MemorySource;
    use ldtools_core::colour::ColourValue;
    use ldtools_core::document::PageType;
    use ldtools_core::element::Element;
    use ldtools_core::geometry::Matrix4;

    fn referencing(name: &str, target: &str) -> Page {
        let (name, page_type) = ldtools_core::document::split_target_name(name);
        let mut page = Page::new(name, page_type).unwrap();
        let reference = Reference::new(target, Matrix4::IDENTITY).unwrap();
        page.push_element(Element::reference(ColourValue::MAIN, reference))
            .unwrap();
        page
    }

    fn first_reference(page: &Page) -> &Reference {
        page.references()[0].1
    }

    #[test]
    fn self_reference_is_circular() {
        let mut document = Document::new();
        document.push_page(referencing("a.dat", "A.DAT")).unwrap();
        let context = TargetContext::new(Some(&document), None);
        let page = &document.pages()[0];
        let resolution = context.resolve(Some(page), first_reference(page));
        assert_eq!(resolution.status, TargetStatus::CircularReference);
        assert!(resolution.target.is_none());
    }

    #[test]
    fn mutual_references_are_circular_from_both_sides() {
        let mut document = Document::new();
        document.push_page(referencing("a.dat", "b.dat")).unwrap();
        document.push_page(referencing("b.dat", "a.dat")).unwrap();
        let context = TargetContext::new(Some(&document), None);
        for page in document.pages() {
            let resolution = context.resolve(Some(page), first_reference(page));
            assert_eq!(resolution.status, TargetStatus::CircularReference);
        }
    }

    #[test]
    fn local_pages_win_over_library() {
        let source = MemorySource::new();
        source.insert("3001.dat", "0 Name: 3001.dat\n");
        let library = Library::new(source, 4);
        let mut document = Document::new();
        document.push_page(referencing("model.ldr", "3001.dat")).unwrap();

        let origin = &document.pages()[0];
        let context = TargetContext::new(Some(&document), Some(&library));
        let from_library = context.resolve(Some(origin), first_reference(origin));
        assert_eq!(from_library.status, TargetStatus::Resolved);
        assert!(matches!(from_library.target, Some(TargetPage::Shared(_))));

        let mut document = document.clone();
        document.push_page(Page::new("3001", PageType::Part).unwrap()).unwrap();
        let origin = &document.pages()[0];
        let context = TargetContext::new(Some(&document), Some(&library));
        let local = context.resolve(Some(origin), first_reference(origin));
        assert!(local.target.as_ref().is_some_and(TargetPage::is_local));
    }

    #[test]
    fn missing_and_unloadable_are_ordinary_outcomes() {
        let source = MemorySource::new();
        source.insert("bad.dat", "1 16 nonsense\n");
        let library = Library::new(source, 4);
        let context = TargetContext::new(None, Some(&library));

        let missing = Reference::new("none.dat", Matrix4::IDENTITY).unwrap();
        assert_eq!(context.resolve(None, &missing).status, TargetStatus::Missing);
        let broken = Reference::new("bad.dat", Matrix4::IDENTITY).unwrap();
        assert_eq!(context.resolve(None, &broken).status, TargetStatus::Unloadable);
    }

    #[test]
    fn duplicate_local_names_resolve_to_last_page() {
        let mut document = Document::new();
        document.push_page(Page::new("part", PageType::Part).unwrap()).unwrap();
        document.push_page(Page::new("PART", PageType::Part).unwrap()).unwrap();
        let last = document.pages()[1].id();
        let context = TargetContext::new(Some(&document), None);
        let reference = Reference::new("part.dat", Matrix4::IDENTITY).unwrap();
        let resolution = context.resolve(None, &reference);
        assert_eq!(CachedResolution::from(&resolution).source, TargetSource::Local(last));
    }

    #[test]
    fn cycles_through_library_pages_are_detected() {
        let source = MemorySource::new();
        source.insert("lib.dat", "0 Name: lib.dat\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 model.ldr\n");
        let library = Library::new(source, 4);
        let mut document = Document::new();
        document.push_page(referencing("model.ldr", "lib.dat")).unwrap();
        let origin = &document.pages()[0];
        let context = TargetContext::new(Some(&document), Some(&library));
        let resolution = context.resolve(Some(origin), first_reference(origin));
        assert_eq!(resolution.status, TargetStatus::CircularReference);
    }
}
