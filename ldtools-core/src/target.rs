use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::{Document, Page};
use crate::element::ElementKind;
use crate::geometry::{BoundingBox3, DISTANCE_TOLERANCE, Matrix4};

/// 引用目标的解析状态；解析失败是普通状态而不是错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TargetStatus {
    #[default]
    Unresolved,
    Resolved,
    Missing,
    Unloadable,
    CircularReference,
}

/// 解析得到的目标页面：文档内的借用，或库中共享的冻结页面。
#[derive(Debug, Clone)]
pub enum TargetPage<'a> {
    Local(&'a Page),
    Shared(Arc<Page>),
}

impl TargetPage<'_> {
    #[inline]
    pub fn is_local(&self) -> bool {
        matches!(self, TargetPage::Local(_))
    }
}

impl Deref for TargetPage<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        match self {
            TargetPage::Local(page) => page,
            TargetPage::Shared(page) => page,
        }
    }
}

/// 按目标名查找页面的能力；代码生成与平面判定只依赖这个接口。
pub trait TargetLookup {
    fn find_target(&self, name: &str) -> Option<TargetPage<'_>>;
}

impl TargetLookup for Document {
    fn find_target(&self, name: &str) -> Option<TargetPage<'_>> {
        self.find_page(name).map(TargetPage::Local)
    }
}

/// 不提供任何目标的查找。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTargets;

impl TargetLookup for NoTargets {
    fn find_target(&self, _name: &str) -> Option<TargetPage<'_>> {
        None
    }
}

/// 目标名比较形式：小写、`/` 统一为 `\`。
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace('/', "\\")
}

#[inline]
pub fn names_match(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

/// 页面（递归展开引用后）的所有顶点是否都落在 Y = 0 平面上。
pub fn page_is_flat(page: &Page, lookup: &dyn TargetLookup) -> bool {
    let mut bounds = BoundingBox3::empty();
    let mut stack = vec![normalize_name(&page.target_name())];
    accumulate_bounds(page, &Matrix4::IDENTITY, lookup, &mut stack, &mut bounds);
    !bounds.is_empty()
        && bounds.min().y().abs() <= DISTANCE_TOLERANCE
        && bounds.max().y().abs() <= DISTANCE_TOLERANCE
}

/// 页面在 `transform` 下的包围盒，无法解析或成环的引用被忽略。
pub fn page_bounds(page: &Page, transform: &Matrix4, lookup: &dyn TargetLookup) -> BoundingBox3 {
    let mut bounds = BoundingBox3::empty();
    let mut stack = vec![normalize_name(&page.target_name())];
    accumulate_bounds(page, transform, lookup, &mut stack, &mut bounds);
    bounds
}

fn accumulate_bounds(
    page: &Page,
    transform: &Matrix4,
    lookup: &dyn TargetLookup,
    stack: &mut Vec<String>,
    bounds: &mut BoundingBox3,
) {
    page.visit_elements(&mut |element| match element.kind() {
        ElementKind::Reference(reference) => {
            let key = normalize_name(reference.target_name());
            if stack.contains(&key) {
                return;
            }
            if let Some(target) = lookup.find_target(reference.target_name()) {
                stack.push(key);
                let combined = reference.matrix().then(transform);
                accumulate_bounds(&target, &combined, lookup, stack, bounds);
                stack.pop();
            }
        }
        kind => {
            if let Some(shape) = kind.coordinates() {
                for point in shape.coordinates() {
                    bounds.include_point(transform.transform_point(*point));
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colour::ColourValue;
    use crate::document::PageType;
    use crate::element::Element;
    use crate::geometry::Vector3;
    use crate::reference::Reference;

    fn disc() -> Page {
        let mut page = Page::new("4-4disc", PageType::Primitive).unwrap();
        page.push_element(Element::triangle(
            ColourValue::MAIN,
            Vector3::ZERO,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ))
        .unwrap();
        page
    }

    #[test]
    fn names_compare_case_and_separator_insensitively() {
        assert!(names_match("S/3001s01.DAT", "s\\3001s01.dat"));
        assert!(!names_match("3001.dat", "3002.dat"));
    }

    #[test]
    fn flat_detection_follows_references() {
        let mut document = Document::new();
        document.push_page(disc()).unwrap();

        let mut wrapper = Page::new("wrapper", PageType::Part).unwrap();
        let lying = Reference::new("4-4disc.dat", Matrix4::from_scale(Vector3::new(2.0, 1.0, 2.0))).unwrap();
        wrapper.push_element(Element::reference(ColourValue::MAIN, lying)).unwrap();
        assert!(page_is_flat(&wrapper, &document));

        let mut raised = Page::new("raised", PageType::Part).unwrap();
        let lifted = Reference::new("4-4disc.dat", Matrix4::from_translation(Vector3::new(0.0, 4.0, 0.0))).unwrap();
        raised.push_element(Element::reference(ColourValue::MAIN, lifted)).unwrap();
        raised
            .push_element(Element::reference(ColourValue::MAIN, Reference::new("4-4disc.dat", Matrix4::IDENTITY).unwrap()))
            .unwrap();
        assert!(!page_is_flat(&raised, &document));
    }

    #[test]
    fn empty_or_unresolvable_pages_are_not_flat() {
        let page = Page::new("empty", PageType::Part).unwrap();
        assert!(!page_is_flat(&page, &NoTargets));
    }

    #[test]
    fn self_reference_does_not_recurse_forever() {
        let mut document = Document::new();
        let mut page = disc();
        page.push_element(Element::reference(ColourValue::MAIN, Reference::new("4-4disc.dat", Matrix4::IDENTITY).unwrap()))
            .unwrap();
        document.push_page(page).unwrap();
        let page = document.find_page("4-4disc.dat").unwrap();
        assert!(page_is_flat(page, &document));
    }
}
