use serde::{Deserialize, Serialize};

/// 元素变体标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementTag {
    Comment,
    Line,
    OptionalLine,
    Triangle,
    Quadrilateral,
    Reference,
    Texmap,
    Group,
    BfcFlag,
    ColourDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub has_colour: bool,
    pub has_coordinates: bool,
    pub is_container: bool,
    pub supports_code: bool,
    pub has_winding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementTypeInfo {
    pub tag: ElementTag,
    pub name: &'static str,
    pub icon: &'static str,
    pub capabilities: Capabilities,
}

const fn caps(
    has_colour: bool,
    has_coordinates: bool,
    is_container: bool,
    has_winding: bool,
) -> Capabilities {
    Capabilities {
        has_colour,
        has_coordinates,
        is_container,
        supports_code: true,
        has_winding,
    }
}

/// 静态注册表，顺序与 [`ElementTag`] 声明一致。
pub const ELEMENT_TYPES: &[ElementTypeInfo] = &[
    ElementTypeInfo {
        tag: ElementTag::Comment,
        name: "Comment",
        icon: "comment",
        capabilities: caps(false, false, false, false),
    },
    ElementTypeInfo {
        tag: ElementTag::Line,
        name: "Line",
        icon: "line",
        capabilities: caps(true, true, false, false),
    },
    ElementTypeInfo {
        tag: ElementTag::OptionalLine,
        name: "Optional Line",
        icon: "optional-line",
        capabilities: caps(true, true, false, false),
    },
    ElementTypeInfo {
        tag: ElementTag::Triangle,
        name: "Triangle",
        icon: "triangle",
        capabilities: caps(true, true, false, true),
    },
    ElementTypeInfo {
        tag: ElementTag::Quadrilateral,
        name: "Quadrilateral",
        icon: "quadrilateral",
        capabilities: caps(true, true, false, true),
    },
    ElementTypeInfo {
        tag: ElementTag::Reference,
        name: "Reference",
        icon: "reference",
        capabilities: caps(true, false, false, true),
    },
    ElementTypeInfo {
        tag: ElementTag::Texmap,
        name: "Texmap",
        icon: "texmap",
        capabilities: caps(false, false, true, true),
    },
    ElementTypeInfo {
        tag: ElementTag::Group,
        name: "Group",
        icon: "group",
        capabilities: caps(false, false, false, false),
    },
    ElementTypeInfo {
        tag: ElementTag::BfcFlag,
        name: "BFC Flag",
        icon: "bfc",
        capabilities: caps(false, false, false, true),
    },
    ElementTypeInfo {
        tag: ElementTag::ColourDefinition,
        name: "Colour Definition",
        icon: "colour",
        capabilities: caps(false, false, false, false),
    },
];

pub fn info(tag: ElementTag) -> &'static ElementTypeInfo {
    &ELEMENT_TYPES[tag as usize]
}
