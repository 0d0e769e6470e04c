use serde::{Deserialize, Serialize};

use crate::errors::DomError;
use crate::element::{Element, ElementId, ElementKind};
use crate::geometry::Vector3;
use crate::reference::Reference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Projection {
    Planar,
    Cylindrical,
    Spherical,
}

impl Projection {
    pub fn keyword(self) -> &'static str {
        match self {
            Projection::Planar => "PLANAR",
            Projection::Cylindrical => "CYLINDRICAL",
            Projection::Spherical => "SPHERICAL",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "PLANAR" => Some(Projection::Planar),
            "CYLINDRICAL" => Some(Projection::Cylindrical),
            "SPHERICAL" => Some(Projection::Spherical),
            _ => None,
        }
    }
}

/// 纹理映射中元素所处的几何角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TexmapRole {
    Texture,
    Shared,
    Fallback,
}

impl TexmapRole {
    pub const ALL: [TexmapRole; 3] = [TexmapRole::Texture, TexmapRole::Shared, TexmapRole::Fallback];
}

/// 纹理映射区域：三组几何（纹理/共享/回退）与投影参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texmap {
    projection: Projection,
    points: [Vector3; 3],
    horizontal_extent: f64,
    vertical_extent: f64,
    texture: String,
    glossmap: Option<String>,
    texture_geometry: Vec<Element>,
    shared_geometry: Vec<Element>,
    fallback_geometry: Vec<Element>,
}

impl Texmap {
    pub fn new(
        projection: Projection,
        points: [Vector3; 3],
        texture: impl Into<String>,
    ) -> Result<Self, DomError> {
        let mut texmap = Self {
            projection,
            points,
            horizontal_extent: 360.0,
            vertical_extent: 360.0,
            texture: String::new(),
            glossmap: None,
            texture_geometry: Vec::new(),
            shared_geometry: Vec::new(),
            fallback_geometry: Vec::new(),
        };
        texmap.set_texture(texture)?;
        Ok(texmap)
    }

    #[inline]
    pub fn projection(&self) -> Projection {
        self.projection
    }

    #[inline]
    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
    }

    #[inline]
    pub fn points(&self) -> [Vector3; 3] {
        self.points
    }

    #[inline]
    pub fn set_points(&mut self, points: [Vector3; 3]) {
        self.points = points;
    }

    #[inline]
    pub fn horizontal_extent(&self) -> f64 {
        self.horizontal_extent
    }

    pub fn set_horizontal_extent(&mut self, degrees: f64) -> Result<(), DomError> {
        self.horizontal_extent = validate_extent(degrees)?;
        Ok(())
    }

    #[inline]
    pub fn vertical_extent(&self) -> f64 {
        self.vertical_extent
    }

    pub fn set_vertical_extent(&mut self, degrees: f64) -> Result<(), DomError> {
        self.vertical_extent = validate_extent(degrees)?;
        Ok(())
    }

    #[inline]
    pub fn texture(&self) -> &str {
        &self.texture
    }

    pub fn set_texture(&mut self, texture: impl Into<String>) -> Result<(), DomError> {
        self.texture = validate_file_name(texture.into(), "纹理")?;
        Ok(())
    }

    #[inline]
    pub fn glossmap(&self) -> Option<&str> {
        self.glossmap.as_deref()
    }

    pub fn set_glossmap(&mut self, glossmap: Option<String>) -> Result<(), DomError> {
        self.glossmap = glossmap
            .map(|name| validate_file_name(name, "光泽贴图"))
            .transpose()?;
        Ok(())
    }

    pub fn geometry(&self, role: TexmapRole) -> &[Element] {
        match role {
            TexmapRole::Texture => &self.texture_geometry,
            TexmapRole::Shared => &self.shared_geometry,
            TexmapRole::Fallback => &self.fallback_geometry,
        }
    }

    fn geometry_mut(&mut self, role: TexmapRole) -> &mut Vec<Element> {
        match role {
            TexmapRole::Texture => &mut self.texture_geometry,
            TexmapRole::Shared => &mut self.shared_geometry,
            TexmapRole::Fallback => &mut self.fallback_geometry,
        }
    }

    pub fn all_elements(&self) -> impl Iterator<Item = &Element> {
        self.texture_geometry
            .iter()
            .chain(self.shared_geometry.iter())
            .chain(self.fallback_geometry.iter())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.all_elements().next().is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.all_elements().count()
    }

    pub fn push(&mut self, role: TexmapRole, element: Element) -> Result<(), DomError> {
        let index = self.geometry(role).len();
        self.insert(role, index, element)
    }

    /// 只接受几何、引用与注释；同一标识不能重复加入。
    pub fn insert(&mut self, role: TexmapRole, index: usize, element: Element) -> Result<(), DomError> {
        match element.kind() {
            ElementKind::Texmap(_)
            | ElementKind::Group(_)
            | ElementKind::BfcFlag(_)
            | ElementKind::ColourDefinition(_) => {
                return Err(DomError::operation(format!(
                    "纹理映射不能包含 {:?}",
                    element.tag()
                )));
            }
            _ => {}
        }
        if self.all_elements().any(|existing| existing.find(element.id()).is_some()) {
            return Err(DomError::AlreadyMember);
        }
        let collection = self.geometry_mut(role);
        if index > collection.len() {
            return Err(DomError::IndexOutOfRange {
                index,
                len: collection.len(),
            });
        }
        collection.insert(index, element);
        Ok(())
    }

    pub fn remove(&mut self, role: TexmapRole, index: usize) -> Result<Element, DomError> {
        let collection = self.geometry_mut(role);
        if index >= collection.len() {
            return Err(DomError::IndexOutOfRange {
                index,
                len: collection.len(),
            });
        }
        Ok(collection.remove(index))
    }

    /// 空纹理映射视为可见；否则任一元素可见即可见。
    pub fn is_visible(&self) -> bool {
        self.is_empty() || self.all_elements().any(Element::is_visible)
    }

    /// 广播写入所有元素，忽略其锁定状态。
    pub fn set_visible(&mut self, visible: bool) {
        for role in TexmapRole::ALL {
            for element in self.geometry_mut(role) {
                element.force_visible(visible);
            }
        }
    }

    pub fn is_ghosted(&self) -> bool {
        self.all_elements().any(Element::is_ghosted)
    }

    pub fn set_ghosted(&mut self, ghosted: bool) {
        for role in TexmapRole::ALL {
            for element in self.geometry_mut(role) {
                element.force_ghosted(ghosted);
            }
        }
    }

    pub(crate) fn reverse_winding(
        &mut self,
        target_is_flat: &dyn Fn(&Reference) -> bool,
    ) -> Result<(), DomError> {
        if self.all_elements().any(Element::is_locked) {
            return Err(DomError::Locked);
        }
        for role in TexmapRole::ALL {
            for element in self.geometry_mut(role) {
                element.reverse_winding(target_is_flat)?;
            }
        }
        Ok(())
    }

    pub(crate) fn refresh_ids(&mut self) {
        for role in TexmapRole::ALL {
            for element in self.geometry_mut(role) {
                element.refresh_id();
            }
        }
    }

    pub(crate) fn find_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.texture_geometry
            .iter_mut()
            .chain(self.shared_geometry.iter_mut())
            .chain(self.fallback_geometry.iter_mut())
            .find_map(|element| element.find_mut(id))
    }
}

fn validate_extent(degrees: f64) -> Result<f64, DomError> {
    if degrees.is_finite() && degrees > 0.0 && degrees <= 360.0 {
        Ok(degrees)
    } else {
        Err(DomError::invalid(format!("角度范围 {degrees} 不在 (0, 360] 内")))
    }
}

fn validate_file_name(name: String, what: &str) -> Result<String, DomError> {
    if name.trim().is_empty() || name.contains(['\r', '\n', '"']) {
        return Err(DomError::invalid(format!("{what}文件名无效: \"{name}\"")));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colour::ColourValue;

    fn sample() -> Texmap {
        Texmap::new(
            Projection::Planar,
            [Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)],
            "sticker.png",
        )
        .unwrap()
    }

    fn line() -> Element {
        Element::line(ColourValue::EDGE, Vector3::ZERO, Vector3::new(1.0, 0.0, 0.0))
    }

    fn triangle() -> Element {
        Element::triangle(
            ColourValue::MAIN,
            Vector3::ZERO,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
    }

    #[test]
    fn visibility_is_aggregated_over_all_roles() {
        let mut texmap = sample();
        assert!(texmap.is_visible());

        let mut hidden = line();
        hidden.set_visible(false).unwrap();
        texmap.push(TexmapRole::Texture, hidden).unwrap();
        assert!(!texmap.is_visible());

        texmap.push(TexmapRole::Fallback, triangle()).unwrap();
        assert!(texmap.is_visible());

        texmap.set_visible(false);
        assert!(texmap.all_elements().all(|element| !element.is_visible()));
        assert!(!texmap.is_visible());
    }

    #[test]
    fn ghosting_broadcast_reaches_locked_children() {
        let mut texmap = sample();
        let mut locked = triangle();
        locked.set_locked(true);
        texmap.push(TexmapRole::Shared, locked).unwrap();
        assert!(!texmap.is_ghosted());
        texmap.set_ghosted(true);
        assert!(texmap.is_ghosted());
    }

    #[test]
    fn rejects_duplicates_nesting_and_bad_extents() {
        let mut texmap = sample();
        let element = line();
        texmap.push(TexmapRole::Shared, element.clone()).unwrap();
        assert_eq!(texmap.push(TexmapRole::Texture, element), Err(DomError::AlreadyMember));

        let nested = Element::new(ElementKind::Texmap(sample()));
        assert!(texmap.push(TexmapRole::Texture, nested).is_err());

        assert!(texmap.set_horizontal_extent(0.0).is_err());
        assert!(texmap.set_vertical_extent(361.0).is_err());
        assert!(texmap.set_horizontal_extent(360.0).is_ok());
        assert!(texmap.set_texture("").is_err());
        assert_eq!(texmap.texture(), "sticker.png");
        assert!(texmap.remove(TexmapRole::Fallback, 0).is_err());
    }
}
