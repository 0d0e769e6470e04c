use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomError;

/// 颜色值：调色板索引、`MAIN`/`EDGE` 占位符，或 `0x2RRGGBB`/`0x3RRGGBB` 形式的直接颜色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColourValue(pub u32);

const DIRECT_OPAQUE: u32 = 0x0200_0000;
const DIRECT_TRANSPARENT: u32 = 0x0300_0000;
const TRANSPARENCY_BIT: u32 = 0x0100_0000;

impl ColourValue {
    pub const MAIN: ColourValue = ColourValue(16);
    pub const EDGE: ColourValue = ColourValue(24);

    #[inline]
    pub fn index(code: u32) -> Self {
        Self(code)
    }

    /// 构造直接颜色，`transparent` 为真时置位透明标志。
    #[inline]
    pub fn direct(rgb: u32, transparent: bool) -> Self {
        let base = if transparent { DIRECT_TRANSPARENT } else { DIRECT_OPAQUE };
        Self(base | (rgb & 0x00FF_FFFF))
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_direct(self) -> bool {
        matches!(self.0 & 0xFF00_0000, DIRECT_OPAQUE | DIRECT_TRANSPARENT)
    }

    #[inline]
    pub fn is_transparent_direct(self) -> bool {
        self.is_direct() && self.0 & TRANSPARENCY_BIT != 0
    }

    /// 直接颜色的 RGB 分量。
    #[inline]
    pub fn rgb(self) -> Option<u32> {
        self.is_direct().then_some(self.0 & 0x00FF_FFFF)
    }

    #[inline]
    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }
}

impl Default for ColourValue {
    fn default() -> Self {
        Self::MAIN
    }
}

impl fmt::Display for ColourValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_direct() {
            write!(f, "0x{:07X}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for ColourValue {
    type Err = DomError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let invalid = || DomError::invalid(format!("无法解析颜色值 \"{raw}\""));
        if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            let value = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
            return Ok(Self(value));
        }
        if let Some(hex) = raw.strip_prefix('#') {
            let value = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
            return match hex.len() {
                6 => Ok(Self::direct(value, false)),
                8 => {
                    let alpha = value >> 24;
                    Ok(Self::direct(value & 0x00FF_FFFF, alpha < 0xFF))
                }
                _ => Err(invalid()),
            };
        }
        raw.parse::<u32>().map(Self).map_err(|_| invalid())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    #[inline]
    pub fn from_rgb(rgb: u32, alpha: u8) -> Self {
        Self {
            r: ((rgb >> 16) & 0xFF) as u8,
            g: ((rgb >> 8) & 0xFF) as u8,
            b: (rgb & 0xFF) as u8,
            a: alpha,
        }
    }

    #[inline]
    pub fn rgb(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }

    #[inline]
    pub fn is_opaque(self) -> bool {
        self.a == 0xFF
    }

    pub fn hex(self) -> String {
        format!("#{:06X}", self.rgb())
    }
}

/// 透明直接颜色的默认 alpha。
pub const DIRECT_TRANSPARENT_ALPHA: u8 = 0x80;

/// 页面内 `!COLOUR` 定义的颜色。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColourDefinition {
    pub name: String,
    pub code: u32,
    pub value: Rgba,
    pub edge: Rgba,
}

impl ColourDefinition {
    pub fn new(name: impl Into<String>, code: u32, value: Rgba, edge: Rgba) -> Result<Self, DomError> {
        let name = name.into();
        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            return Err(DomError::invalid("颜色名称不能为空且不能包含空白"));
        }
        if ColourValue(code).is_direct() || code == ColourValue::MAIN.0 || code == ColourValue::EDGE.0
        {
            return Err(DomError::invalid(format!("颜色代码 {code} 不能用于本地调色板")));
        }
        Ok(Self {
            name,
            code,
            value,
            edge,
        })
    }

    /// 与该定义等价的直接颜色编码。
    #[inline]
    pub fn direct_value(&self) -> ColourValue {
        ColourValue::direct(self.value.rgb(), !self.value.is_opaque())
    }
}

/// 页面私有调色板。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalPalette {
    entries: Vec<ColourDefinition>,
}

impl LocalPalette {
    pub fn new() -> Self {
        Self::default()
    }

    /// 后定义的同码颜色覆盖先前定义。
    pub fn define(&mut self, definition: ColourDefinition) {
        self.entries.retain(|existing| existing.code != definition.code);
        self.entries.push(definition);
    }

    pub fn get(&self, value: ColourValue) -> Option<&ColourDefinition> {
        if value.is_direct() {
            return None;
        }
        self.entries.iter().find(|entry| entry.code == value.0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColourDefinition> {
        self.entries.iter()
    }
}

/// 系统调色板条目：(代码, 名称, 颜色, 边线颜色, alpha)。
pub type SystemColour = (u32, &'static str, u32, u32, u8);

pub const SYSTEM_PALETTE: &[SystemColour] = &[
    (0, "Black", 0x1B2A34, 0x808080, 0xFF),
    (1, "Blue", 0x1E5AA8, 0x333333, 0xFF),
    (2, "Green", 0x00852B, 0x333333, 0xFF),
    (3, "Dark_Turquoise", 0x069D9F, 0x333333, 0xFF),
    (4, "Red", 0xB40000, 0x333333, 0xFF),
    (5, "Dark_Pink", 0xD3359D, 0x333333, 0xFF),
    (6, "Brown", 0x543324, 0x1E1E1E, 0xFF),
    (7, "Light_Grey", 0x8A928D, 0x333333, 0xFF),
    (8, "Dark_Grey", 0x545955, 0x333333, 0xFF),
    (9, "Light_Blue", 0x97CBD9, 0x333333, 0xFF),
    (10, "Bright_Green", 0x58AB41, 0x333333, 0xFF),
    (14, "Yellow", 0xFAC80A, 0x333333, 0xFF),
    (15, "White", 0xF4F4F4, 0x333333, 0xFF),
    (16, "Main_Colour", 0x7F7F7F, 0x333333, 0xFF),
    (19, "Tan", 0xE4CD9E, 0x333333, 0xFF),
    (24, "Edge_Colour", 0x7F7F7F, 0x333333, 0xFF),
    (25, "Orange", 0xD67923, 0x333333, 0xFF),
    (28, "Dark_Tan", 0x958A73, 0x333333, 0xFF),
    (33, "Trans_Dark_Blue", 0x0020A0, 0x000064, 0x80),
    (34, "Trans_Green", 0x237841, 0x184632, 0x80),
    (36, "Trans_Red", 0xC91A09, 0x880000, 0x80),
    (46, "Trans_Yellow", 0xF5CD2F, 0x8E7400, 0x80),
    (47, "Trans_Clear", 0xFCFCFC, 0xC3C3C3, 0x80),
    (70, "Reddish_Brown", 0x5F3109, 0x333333, 0xFF),
    (71, "Light_Bluish_Grey", 0xA0A5A9, 0x333333, 0xFF),
    (72, "Dark_Bluish_Grey", 0x6C6E68, 0x333333, 0xFF),
];

pub fn system_colour(code: u32) -> Option<&'static SystemColour> {
    SYSTEM_PALETTE.iter().find(|entry| entry.0 == code)
}

/// 颜色解析上下文：当前主色/边线色与可选的页面调色板。
#[derive(Debug, Clone, Copy)]
pub struct ColourContext<'a> {
    pub main: Rgba,
    pub edge: Rgba,
    pub palette: Option<&'a LocalPalette>,
}

impl Default for ColourContext<'_> {
    fn default() -> Self {
        Self {
            main: Rgba::from_rgb(0x7F7F7F, 0xFF),
            edge: Rgba::from_rgb(0x333333, 0xFF),
            palette: None,
        }
    }
}

impl<'a> ColourContext<'a> {
    pub fn with_palette(palette: &'a LocalPalette) -> Self {
        Self {
            palette: Some(palette),
            ..Self::default()
        }
    }

    /// 把逻辑颜色解析为 RGBA；未知索引返回 `None`。
    pub fn resolve(&self, value: ColourValue) -> Option<Rgba> {
        if let Some(rgb) = value.rgb() {
            let alpha = if value.is_transparent_direct() {
                DIRECT_TRANSPARENT_ALPHA
            } else {
                0xFF
            };
            return Some(Rgba::from_rgb(rgb, alpha));
        }
        if value == ColourValue::MAIN {
            return Some(self.main);
        }
        if value == ColourValue::EDGE {
            return Some(self.edge);
        }
        if let Some(definition) = self.palette.and_then(|palette| palette.get(value)) {
            return Some(definition.value);
        }
        system_colour(value.0).map(|&(_, _, rgb, _, alpha)| Rgba::from_rgb(rgb, alpha))
    }

    /// 该颜色对应的边线颜色。
    pub fn resolve_edge(&self, value: ColourValue) -> Option<Rgba> {
        if value.is_direct() {
            return Some(self.edge);
        }
        if value == ColourValue::MAIN || value == ColourValue::EDGE {
            return Some(self.edge);
        }
        if let Some(definition) = self.palette.and_then(|palette| palette.get(value)) {
            return Some(definition.edge);
        }
        system_colour(value.0).map(|&(_, _, _, edge, _)| Rgba::from_rgb(edge, 0xFF))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indexed_and_direct_forms() {
        assert_eq!("16".parse::<ColourValue>().unwrap(), ColourValue::MAIN);
        assert_eq!(
            "0x2FF0000".parse::<ColourValue>().unwrap(),
            ColourValue::direct(0xFF0000, false)
        );
        assert_eq!(
            "#00FF00".parse::<ColourValue>().unwrap(),
            ColourValue::direct(0x00FF00, false)
        );
        let translucent = "#800000FF".parse::<ColourValue>().unwrap();
        assert!(translucent.is_transparent_direct());
        assert_eq!(translucent.rgb(), Some(0x0000FF));
        assert!("#12345".parse::<ColourValue>().is_err());
        assert!("red".parse::<ColourValue>().unwrap_err().is_validation());
    }

    #[test]
    fn display_uses_hex_for_direct_colours() {
        assert_eq!(ColourValue::index(4).to_string(), "4");
        assert_eq!(ColourValue::direct(0x00AA11, false).to_string(), "0x200AA11");
        assert_eq!(ColourValue::direct(0x00AA11, true).to_string(), "0x300AA11");
    }

    #[test]
    fn context_prefers_local_palette_over_system() {
        let mut palette = LocalPalette::new();
        palette.define(
            ColourDefinition::new(
                "Custom_Red",
                4,
                Rgba::from_rgb(0xFF0000, 0xFF),
                Rgba::from_rgb(0, 0xFF),
            )
            .unwrap(),
        );
        let context = ColourContext::with_palette(&palette);
        assert_eq!(context.resolve(ColourValue::index(4)).unwrap().rgb(), 0xFF0000);
        assert_eq!(context.resolve(ColourValue::index(1)).unwrap().rgb(), 0x1E5AA8);
        assert_eq!(context.resolve(ColourValue::MAIN), Some(context.main));
        assert_eq!(context.resolve(ColourValue::EDGE), Some(context.edge));
        assert!(context.resolve(ColourValue::index(9999)).is_none());
        let transparent = context.resolve(ColourValue::direct(0x123456, true)).unwrap();
        assert_eq!(transparent.a, DIRECT_TRANSPARENT_ALPHA);
    }

    #[test]
    fn definitions_reject_sentinel_codes() {
        let value = Rgba::from_rgb(0, 0xFF);
        assert!(ColourDefinition::new("Main", 16, value, value).is_err());
        assert!(ColourDefinition::new("Has Space", 100, value, value).is_err());
        let definition = ColourDefinition::new("Glass", 100, Rgba::from_rgb(0xABCDEF, 0x40), value).unwrap();
        assert_eq!(definition.direct_value(), ColourValue::direct(0xABCDEF, true));
    }
}
