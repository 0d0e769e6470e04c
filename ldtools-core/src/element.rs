use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::code::Winding;
use crate::colour::{ColourDefinition, ColourValue};
use crate::errors::DomError;
use crate::geometry::{DISTANCE_TOLERANCE, Vector3};
use crate::reference::Reference;
use crate::registry::{self, ElementTag};
use crate::texmap::Texmap;

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// 元素标识，进程内唯一；`Clone` 保留标识，`duplicate` 分配新标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(u64);

impl ElementId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 提供原始数值，便于日志输出。
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 具有可写颜色的对象。
pub trait HasColour {
    fn colour(&self) -> ColourValue;
    fn set_colour(&mut self, colour: ColourValue) -> Result<(), DomError>;
}

/// 由有序顶点构成的几何体。
pub trait HasCoordinates {
    fn coordinates(&self) -> &[Vector3];
    fn coordinates_mut(&mut self) -> &mut [Vector3];

    /// 绕向反转：默认把顶点顺序整体倒置。
    fn reverse_winding(&mut self) {
        self.coordinates_mut().reverse();
    }

    fn coordinate(&self, index: usize) -> Option<Vector3> {
        self.coordinates().get(index).copied()
    }

    fn set_coordinate(&mut self, index: usize, value: Vector3) -> Result<(), DomError> {
        let len = self.coordinates().len();
        let slot = self
            .coordinates_mut()
            .get_mut(index)
            .ok_or(DomError::IndexOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    /// 任意两个顶点重合。
    fn is_colocated(&self) -> bool {
        let points = self.coordinates();
        points
            .iter()
            .enumerate()
            .any(|(i, a)| points[i + 1..].iter().any(|b| a.coincides(*b)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    text: String,
}

impl Comment {
    pub fn new(text: impl Into<String>) -> Result<Self, DomError> {
        let text = text.into();
        if text.contains(['\r', '\n']) {
            return Err(DomError::invalid("注释不能跨行"));
        }
        Ok(Self { text })
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub vertices: [Vector3; 2],
}

impl Line {
    pub fn new(a: Vector3, b: Vector3) -> Self {
        Self { vertices: [a, b] }
    }
}

impl HasCoordinates for Line {
    fn coordinates(&self) -> &[Vector3] {
        &self.vertices
    }

    fn coordinates_mut(&mut self) -> &mut [Vector3] {
        &mut self.vertices
    }
}

/// 条件线：前两个点为端点，后两个点为控制点。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionalLine {
    pub vertices: [Vector3; 4],
}

impl OptionalLine {
    pub fn new(a: Vector3, b: Vector3, control1: Vector3, control2: Vector3) -> Self {
        Self {
            vertices: [a, b, control1, control2],
        }
    }

    pub fn controls(&self) -> [Vector3; 2] {
        [self.vertices[2], self.vertices[3]]
    }
}

impl HasCoordinates for OptionalLine {
    fn coordinates(&self) -> &[Vector3] {
        &self.vertices
    }

    fn coordinates_mut(&mut self) -> &mut [Vector3] {
        &mut self.vertices
    }

    fn reverse_winding(&mut self) {
        self.vertices.swap(0, 1);
    }

    fn is_colocated(&self) -> bool {
        self.vertices[0].coincides(self.vertices[1]) || self.vertices[2].coincides(self.vertices[3])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub vertices: [Vector3; 3],
}

impl Triangle {
    pub fn new(a: Vector3, b: Vector3, c: Vector3) -> Self {
        Self {
            vertices: [a, b, c],
        }
    }

    pub fn is_colinear(&self) -> bool {
        let [a, b, c] = self.vertices;
        points_colinear(a, b, c)
    }

    pub fn normal(&self) -> Option<Vector3> {
        let [a, b, c] = self.vertices;
        (b - a).cross(c - a).normalize()
    }
}

impl HasCoordinates for Triangle {
    fn coordinates(&self) -> &[Vector3] {
        &self.vertices
    }

    fn coordinates_mut(&mut self) -> &mut [Vector3] {
        &mut self.vertices
    }
}

/// 小于该值的翘曲量视为共面。
pub const WARP_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub vertices: [Vector3; 4],
}

impl Quadrilateral {
    pub fn new(a: Vector3, b: Vector3, c: Vector3, d: Vector3) -> Self {
        Self {
            vertices: [a, b, c, d],
        }
    }

    /// 任意三个相邻顶点共线，四边形退化为三角形或线段。
    pub fn is_colinear(&self) -> bool {
        let v = &self.vertices;
        (0..4).any(|i| points_colinear(v[i], v[(i + 1) % 4], v[(i + 2) % 4]))
    }

    /// 各角转向相对参考法向的正负计数。
    fn turn_signs(&self) -> Option<(usize, usize)> {
        let v = &self.vertices;
        let turns: Vec<Vector3> = (0..4)
            .map(|i| {
                let prev = v[(i + 3) % 4];
                let next = v[(i + 1) % 4];
                (v[i] - prev).cross(next - v[i])
            })
            .collect();
        let reference = turns
            .iter()
            .copied()
            .max_by(|a, b| a.length_squared().total_cmp(&b.length_squared()))?
            .normalize()?;
        let mut positive = 0;
        let mut negative = 0;
        for turn in &turns {
            let sign = turn.dot(reference);
            if sign > DISTANCE_TOLERANCE {
                positive += 1;
            } else if sign < -DISTANCE_TOLERANCE {
                negative += 1;
            }
        }
        Some((positive, negative))
    }

    /// 边自相交（蝴蝶结形）。
    pub fn is_bowtie(&self) -> bool {
        matches!(self.turn_signs(), Some((2, 2)))
    }

    /// 存在大于等于 180° 的内角。
    pub fn is_concave(&self) -> bool {
        matches!(self.turn_signs(), Some((3, 1)) | Some((1, 3)))
    }

    /// 翘曲量：两种对角剖分下两三角形法向夹角的最大值，取 `1 - |n1·n2|`，范围 [0, 1]。
    pub fn warp(&self) -> f64 {
        let v = &self.vertices;
        let split = |a: usize, b: usize, c: usize, d: usize| -> f64 {
            let first = Triangle::new(v[a], v[b], v[c]).normal();
            let second = Triangle::new(v[a], v[c], v[d]).normal();
            match (first, second) {
                (Some(n1), Some(n2)) => (1.0 - n1.dot(n2).abs()).max(0.0),
                _ => 0.0,
            }
        };
        split(0, 1, 2, 3).max(split(1, 2, 3, 0))
    }

    pub fn is_warped(&self) -> bool {
        self.warp() > WARP_TOLERANCE
    }

    /// 依次尝试 `[v0,v2,v1,v3]` 与 `[v0,v1,v3,v2]`，采用第一个不自相交的排列。
    pub fn repair_bowtie(&mut self) -> bool {
        if !self.is_bowtie() {
            return false;
        }
        let [a, b, c, d] = self.vertices;
        for candidate in [[a, c, b, d], [a, b, d, c]] {
            let quad = Quadrilateral { vertices: candidate };
            if !quad.is_bowtie() {
                *self = quad;
                return true;
            }
        }
        false
    }
}

impl HasCoordinates for Quadrilateral {
    fn coordinates(&self) -> &[Vector3] {
        &self.vertices
    }

    fn coordinates_mut(&mut self) -> &mut [Vector3] {
        &mut self.vertices
    }
}

fn points_colinear(a: Vector3, b: Vector3, c: Vector3) -> bool {
    let u = b - a;
    let v = c - b;
    u.cross(v).length() <= DISTANCE_TOLERANCE * u.length().max(1.0) * v.length().max(1.0)
}

/// 成组元素，成员通过元素标识反向引用，不拥有成员。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    name: String,
    members: Vec<ElementId>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Result<Self, DomError> {
        let name = name.into();
        if name.trim().is_empty() || name.contains(['\r', '\n']) {
            return Err(DomError::invalid("组名不能为空"));
        }
        Ok(Self {
            name,
            members: Vec::new(),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn members(&self) -> &[ElementId] {
        &self.members
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.members.contains(&id)
    }

    pub fn add_member(&mut self, id: ElementId) -> Result<(), DomError> {
        if self.contains(id) {
            return Err(DomError::AlreadyMember);
        }
        self.members.push(id);
        Ok(())
    }

    pub(crate) fn remap_members(&mut self, map: impl Fn(ElementId) -> ElementId) {
        for member in &mut self.members {
            *member = map(*member);
        }
    }

    pub fn remove_member(&mut self, id: ElementId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| *member != id);
        before != self.members.len()
    }
}

/// `0 BFC ...` 语句。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BfcFlag {
    Clip,
    NoClip,
    Clockwise,
    CounterClockwise,
    ClipClockwise,
    ClipCounterClockwise,
}

impl BfcFlag {
    pub fn keyword(self) -> &'static str {
        match self {
            BfcFlag::Clip => "CLIP",
            BfcFlag::NoClip => "NOCLIP",
            BfcFlag::Clockwise => "CW",
            BfcFlag::CounterClockwise => "CCW",
            BfcFlag::ClipClockwise => "CLIP CW",
            BfcFlag::ClipCounterClockwise => "CLIP CCW",
        }
    }

    /// 在反向绕行下输出时交换 CW 与 CCW。
    pub fn with_winding(self, winding: Winding) -> Self {
        if !winding.is_reversed() {
            return self;
        }
        match self {
            BfcFlag::Clockwise => BfcFlag::CounterClockwise,
            BfcFlag::CounterClockwise => BfcFlag::Clockwise,
            BfcFlag::ClipClockwise => BfcFlag::ClipCounterClockwise,
            BfcFlag::ClipCounterClockwise => BfcFlag::ClipClockwise,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Comment(Comment),
    Line(Line),
    OptionalLine(OptionalLine),
    Triangle(Triangle),
    Quadrilateral(Quadrilateral),
    Reference(Reference),
    Texmap(Texmap),
    Group(Group),
    BfcFlag(BfcFlag),
    ColourDefinition(ColourDefinition),
}

impl ElementKind {
    pub fn tag(&self) -> ElementTag {
        match self {
            ElementKind::Comment(_) => ElementTag::Comment,
            ElementKind::Line(_) => ElementTag::Line,
            ElementKind::OptionalLine(_) => ElementTag::OptionalLine,
            ElementKind::Triangle(_) => ElementTag::Triangle,
            ElementKind::Quadrilateral(_) => ElementTag::Quadrilateral,
            ElementKind::Reference(_) => ElementTag::Reference,
            ElementKind::Texmap(_) => ElementTag::Texmap,
            ElementKind::Group(_) => ElementTag::Group,
            ElementKind::BfcFlag(_) => ElementTag::BfcFlag,
            ElementKind::ColourDefinition(_) => ElementTag::ColourDefinition,
        }
    }

    /// 几何类元素的顶点。
    pub fn coordinates(&self) -> Option<&dyn HasCoordinates> {
        match self {
            ElementKind::Line(shape) => Some(shape),
            ElementKind::OptionalLine(shape) => Some(shape),
            ElementKind::Triangle(shape) => Some(shape),
            ElementKind::Quadrilateral(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn coordinates_mut(&mut self) -> Option<&mut dyn HasCoordinates> {
        match self {
            ElementKind::Line(shape) => Some(shape),
            ElementKind::OptionalLine(shape) => Some(shape),
            ElementKind::Triangle(shape) => Some(shape),
            ElementKind::Quadrilateral(shape) => Some(shape),
            _ => None,
        }
    }
}

/// 图元：公共属性（颜色、可见、虚化、锁定）加上具体变体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    id: ElementId,
    colour: ColourValue,
    is_visible: bool,
    is_ghosted: bool,
    is_locked: bool,
    kind: ElementKind,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.colour == other.colour
            && self.is_visible() == other.is_visible()
            && self.is_ghosted() == other.is_ghosted()
            && self.is_locked == other.is_locked
            && self.kind == other.kind
    }
}

impl From<ElementKind> for Element {
    fn from(kind: ElementKind) -> Self {
        Self::new(kind)
    }
}

impl Element {
    /// 线类元素默认使用边线色，其余使用主色。
    pub fn new(kind: ElementKind) -> Self {
        let colour = match kind {
            ElementKind::Line(_) | ElementKind::OptionalLine(_) => ColourValue::EDGE,
            _ => ColourValue::MAIN,
        };
        Self::with_colour(kind, colour)
    }

    pub fn with_colour(kind: ElementKind, colour: ColourValue) -> Self {
        Self {
            id: ElementId::fresh(),
            colour,
            is_visible: true,
            is_ghosted: false,
            is_locked: false,
            kind,
        }
    }

    pub fn comment(text: impl Into<String>) -> Result<Self, DomError> {
        Ok(Self::new(ElementKind::Comment(Comment::new(text)?)))
    }

    pub fn line(colour: ColourValue, a: Vector3, b: Vector3) -> Self {
        Self::with_colour(ElementKind::Line(Line::new(a, b)), colour)
    }

    pub fn triangle(colour: ColourValue, a: Vector3, b: Vector3, c: Vector3) -> Self {
        Self::with_colour(ElementKind::Triangle(Triangle::new(a, b, c)), colour)
    }

    pub fn quadrilateral(colour: ColourValue, vertices: [Vector3; 4]) -> Self {
        Self::with_colour(
            ElementKind::Quadrilateral(Quadrilateral { vertices }),
            colour,
        )
    }

    pub fn reference(colour: ColourValue, reference: Reference) -> Self {
        Self::with_colour(ElementKind::Reference(reference), colour)
    }

    #[inline]
    pub fn id(&self) -> ElementId {
        self.id
    }

    #[inline]
    pub fn tag(&self) -> ElementTag {
        self.kind.tag()
    }

    #[inline]
    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    /// 受锁定保护的可变访问。
    pub fn kind_mut(&mut self) -> Result<&mut ElementKind, DomError> {
        self.ensure_unlocked()?;
        Ok(&mut self.kind)
    }

    /// 内部簿记使用（如目标改名跟随），忽略锁定。
    #[inline]
    pub fn kind_mut_unlocked(&mut self) -> &mut ElementKind {
        &mut self.kind
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    /// 锁定状态本身总是可以修改。
    #[inline]
    pub fn set_locked(&mut self, locked: bool) {
        self.is_locked = locked;
    }

    /// 纹理映射的可见性由其包含的元素聚合得出。
    pub fn is_visible(&self) -> bool {
        match &self.kind {
            ElementKind::Texmap(texmap) => texmap.is_visible(),
            _ => self.is_visible,
        }
    }

    pub fn set_visible(&mut self, visible: bool) -> Result<(), DomError> {
        self.ensure_unlocked()?;
        self.force_visible(visible);
        Ok(())
    }

    pub fn is_ghosted(&self) -> bool {
        match &self.kind {
            ElementKind::Texmap(texmap) => texmap.is_ghosted(),
            _ => self.is_ghosted,
        }
    }

    pub fn set_ghosted(&mut self, ghosted: bool) -> Result<(), DomError> {
        self.ensure_unlocked()?;
        self.force_ghosted(ghosted);
        Ok(())
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match &self.kind {
            ElementKind::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_quadrilateral(&self) -> Option<&Quadrilateral> {
        match &self.kind {
            ElementKind::Quadrilateral(quad) => Some(quad),
            _ => None,
        }
    }

    pub fn as_texmap(&self) -> Option<&Texmap> {
        match &self.kind {
            ElementKind::Texmap(texmap) => Some(texmap),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match &self.kind {
            ElementKind::Group(group) => Some(group),
            _ => None,
        }
    }

    /// 反转绕向。引用需要知道目标是否为平面图形，由 `target_is_flat` 回答。
    pub fn reverse_winding(
        &mut self,
        target_is_flat: &dyn Fn(&Reference) -> bool,
    ) -> Result<(), DomError> {
        self.ensure_unlocked()?;
        match &mut self.kind {
            ElementKind::Reference(reference) => {
                let flat = target_is_flat(reference);
                reference.reverse_winding(flat);
            }
            ElementKind::Texmap(texmap) => texmap.reverse_winding(target_is_flat)?,
            ElementKind::BfcFlag(flag) => *flag = flag.with_winding(Winding::Reversed),
            kind => {
                if let Some(shape) = kind.coordinates_mut() {
                    shape.reverse_winding();
                }
            }
        }
        Ok(())
    }

    /// 深拷贝并分配新标识（包括纹理映射内部的元素）。
    pub fn duplicate(&self) -> Element {
        let mut copy = self.clone();
        copy.id = ElementId::fresh();
        if let ElementKind::Texmap(texmap) = &mut copy.kind {
            texmap.refresh_ids();
        }
        copy
    }

    pub(crate) fn refresh_id(&mut self) {
        *self = self.duplicate();
    }

    /// 深度优先访问自身及其包含的元素。
    pub fn visit(&self, visitor: &mut dyn FnMut(&Element)) {
        visitor(self);
        if let ElementKind::Texmap(texmap) = &self.kind {
            for child in texmap.all_elements() {
                child.visit(visitor);
            }
        }
    }

    /// 按标识查找自身或内部元素。
    pub fn find(&self, id: ElementId) -> Option<&Element> {
        if self.id == id {
            return Some(self);
        }
        match &self.kind {
            ElementKind::Texmap(texmap) => texmap.all_elements().find_map(|child| child.find(id)),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.kind {
            ElementKind::Texmap(texmap) => texmap.find_mut(id),
            _ => None,
        }
    }

    pub(crate) fn force_visible(&mut self, visible: bool) {
        match &mut self.kind {
            ElementKind::Texmap(texmap) => texmap.set_visible(visible),
            _ => self.is_visible = visible,
        }
    }

    pub(crate) fn force_ghosted(&mut self, ghosted: bool) {
        match &mut self.kind {
            ElementKind::Texmap(texmap) => texmap.set_ghosted(ghosted),
            _ => self.is_ghosted = ghosted,
        }
    }

    fn ensure_unlocked(&self) -> Result<(), DomError> {
        if self.is_locked {
            Err(DomError::Locked)
        } else {
            Ok(())
        }
    }
}

impl HasColour for Element {
    #[inline]
    fn colour(&self) -> ColourValue {
        self.colour
    }

    fn set_colour(&mut self, colour: ColourValue) -> Result<(), DomError> {
        if !registry::info(self.tag()).capabilities.has_colour {
            return Err(DomError::operation(format!(
                "{} 不支持颜色",
                registry::info(self.tag()).name
            )));
        }
        self.ensure_unlocked()?;
        self.colour = colour;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Matrix4;

    fn v(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z)
    }

    /// 对任意几何体通用的绕向检查：反转两次恢复原样。
    fn assert_double_reverse_is_identity<T: HasCoordinates + Clone + PartialEq + std::fmt::Debug>(
        shape: &T,
    ) {
        let mut copy = shape.clone();
        copy.reverse_winding();
        copy.reverse_winding();
        assert_eq!(&copy, shape);
    }

    fn assert_set_coordinate_bounds<T: HasCoordinates>(shape: &mut T) {
        let len = shape.coordinates().len();
        assert!(shape.set_coordinate(0, v(7.0, 7.0, 7.0)).is_ok());
        assert_eq!(shape.coordinate(0), Some(v(7.0, 7.0, 7.0)));
        assert_eq!(
            shape.set_coordinate(len, Vector3::ZERO),
            Err(DomError::IndexOutOfRange { index: len, len })
        );
    }

    #[test]
    fn coordinate_capability_holds_for_all_shapes() {
        let mut line = Line::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0));
        let mut optional = OptionalLine::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0), v(0.0, -1.0, 0.0));
        let mut triangle = Triangle::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0));
        let mut quad = Quadrilateral::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(1.0, 1.0, 0.0), v(0.0, 1.0, 0.0));
        assert_double_reverse_is_identity(&line);
        assert_double_reverse_is_identity(&optional);
        assert_double_reverse_is_identity(&triangle);
        assert_double_reverse_is_identity(&quad);
        assert_set_coordinate_bounds(&mut line);
        assert_set_coordinate_bounds(&mut optional);
        assert_set_coordinate_bounds(&mut triangle);
        assert_set_coordinate_bounds(&mut quad);
    }

    #[test]
    fn quadrilateral_reverse_winding_inverts_order() {
        let mut quad = Quadrilateral::new(v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0), v(0.0, 0.0, 1.0), v(1.0, 1.0, 1.0));
        quad.reverse_winding();
        assert_eq!(
            quad.vertices,
            [v(1.0, 1.0, 1.0), v(0.0, 0.0, 1.0), v(0.0, 1.0, 0.0), v(1.0, 0.0, 0.0)]
        );
    }

    #[test]
    fn optional_line_reverse_keeps_controls() {
        let mut optional = OptionalLine::new(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0), v(0.0, -1.0, 0.0));
        optional.reverse_winding();
        assert_eq!(optional.vertices[0], v(1.0, 0.0, 0.0));
        assert_eq!(optional.controls(), [v(0.0, 1.0, 0.0), v(0.0, -1.0, 0.0)]);
    }

    #[test]
    fn bowtie_is_detected_and_repaired() {
        let mut quad = Quadrilateral::new(v(0.0, 0.0, 0.0), v(10.0, 10.0, 0.0), v(10.0, 0.0, 0.0), v(0.0, 10.0, 0.0));
        assert!(quad.is_bowtie());
        assert!(!quad.is_concave());
        assert!(quad.repair_bowtie());
        assert!(!quad.is_bowtie());
        assert_eq!(
            quad.vertices,
            [v(0.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(10.0, 10.0, 0.0), v(0.0, 10.0, 0.0)]
        );
        assert!(!quad.repair_bowtie());
    }

    #[test]
    fn concave_colinear_and_colocated_quads() {
        let dart = Quadrilateral::new(v(0.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(2.0, 2.0, 0.0), v(0.0, 10.0, 0.0));
        assert!(dart.is_concave());
        assert!(!dart.is_bowtie());

        let colinear = Quadrilateral::new(v(0.0, 0.0, 0.0), v(5.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(0.0, 10.0, 0.0));
        assert!(colinear.is_colinear());

        let colocated = Quadrilateral::new(v(0.0, 0.0, 0.0), v(0.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(0.0, 10.0, 0.0));
        assert!(colocated.is_colocated());

        let square = Quadrilateral::new(v(0.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(10.0, 10.0, 0.0), v(0.0, 10.0, 0.0));
        assert!(!square.is_colinear());
        assert!(!square.is_colocated());
        assert!(!square.is_concave());
        assert!(!square.is_warped());
    }

    #[test]
    fn warp_grows_with_out_of_plane_offset() {
        let flat = Quadrilateral::new(v(0.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(10.0, 10.0, 0.0), v(0.0, 10.0, 0.0));
        let slight = Quadrilateral::new(v(0.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(10.0, 10.0, 1.0), v(0.0, 10.0, 0.0));
        let heavy = Quadrilateral::new(v(0.0, 0.0, 0.0), v(10.0, 0.0, 0.0), v(10.0, 10.0, 20.0), v(0.0, 10.0, 0.0));
        assert!(flat.warp() < 1e-12);
        assert!(slight.is_warped());
        assert!(heavy.warp() > slight.warp());
        assert!(heavy.warp() <= 1.0);
    }

    #[test]
    fn locked_element_refuses_edits_but_accepts_unlock() {
        let mut element = Element::line(ColourValue::EDGE, v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0));
        element.set_locked(true);
        assert_eq!(element.set_colour(ColourValue::index(4)), Err(DomError::Locked));
        assert_eq!(element.set_visible(false), Err(DomError::Locked));
        assert!(element.kind_mut().is_err());
        assert!(element.is_visible());
        element.set_locked(false);
        assert!(element.set_colour(ColourValue::index(4)).is_ok());
        assert_eq!(element.colour(), ColourValue::index(4));
    }

    #[test]
    fn comments_do_not_accept_colour() {
        let mut comment = Element::comment("hello").unwrap();
        assert!(!comment.set_colour(ColourValue::index(1)).unwrap_err().is_validation());
        assert!(Element::comment("two\nlines").is_err());
    }

    #[test]
    fn duplicate_assigns_fresh_identity_and_keeps_content() {
        let element = Element::reference(ColourValue::index(4), Reference::new("3001.dat", Matrix4::IDENTITY).unwrap());
        let clone = element.clone();
        let copy = element.duplicate();
        assert_eq!(clone.id(), element.id());
        assert_ne!(copy.id(), element.id());
        assert_eq!(copy, element);
    }

    #[test]
    fn bfc_flags_swap_under_reversed_winding() {
        assert_eq!(BfcFlag::Clockwise.with_winding(Winding::Reversed), BfcFlag::CounterClockwise);
        assert_eq!(BfcFlag::ClipCounterClockwise.with_winding(Winding::Reversed), BfcFlag::ClipClockwise);
        assert_eq!(BfcFlag::NoClip.with_winding(Winding::Reversed), BfcFlag::NoClip);
        assert_eq!(BfcFlag::Clockwise.with_winding(Winding::Normal), BfcFlag::Clockwise);
    }
}
