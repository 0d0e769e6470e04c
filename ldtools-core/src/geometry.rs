use std::ops::{Add, Mul, Neg, Sub};

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

/// 顶点比较所用的距离容差，LDraw 坐标通常不超过 6 位小数。
pub const DISTANCE_TOLERANCE: f64 = 1e-6;

/// 三维向量/点，内部以 `glam::DVec3` 表示。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3(pub DVec3);

impl Vector3 {
    pub const ZERO: Vector3 = Vector3(DVec3::ZERO);

    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(DVec3::new(x, y, z))
    }

    #[inline]
    pub fn x(self) -> f64 {
        self.0.x
    }

    #[inline]
    pub fn y(self) -> f64 {
        self.0.y
    }

    #[inline]
    pub fn z(self) -> f64 {
        self.0.z
    }

    #[inline]
    pub fn as_vec3(self) -> DVec3 {
        self.0
    }

    #[inline]
    pub fn length(self) -> f64 {
        self.0.length()
    }

    #[inline]
    pub fn length_squared(self) -> f64 {
        self.0.length_squared()
    }

    #[inline]
    pub fn dot(self, other: Vector3) -> f64 {
        self.0.dot(other.0)
    }

    #[inline]
    pub fn cross(self, other: Vector3) -> Vector3 {
        Self(self.0.cross(other.0))
    }

    #[inline]
    pub fn normalize(self) -> Option<Self> {
        let len = self.0.length();
        if len <= f64::EPSILON {
            None
        } else {
            Some(Self(self.0 / len))
        }
    }

    /// 在 [`DISTANCE_TOLERANCE`] 范围内视为同一点。
    #[inline]
    pub fn coincides(self, other: Vector3) -> bool {
        self.0.abs_diff_eq(other.0, DISTANCE_TOLERANCE)
    }
}

impl From<DVec3> for Vector3 {
    fn from(value: DVec3) -> Self {
        Self(value)
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3(self.0 + rhs.0)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3(self.0 - rhs.0)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f64) -> Vector3 {
        Vector3(self.0 * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        Vector3(-self.0)
    }
}

/// 4x4 变换矩阵，采用行向量约定：`p' = p * M`，第 4 行为平移，第 4 列恒为 (0,0,0,1)。
///
/// 内部的 `DMat4` 以列存储；在该约定下 glam 的第 i 列恰好等于行向量矩阵的第 i 行，
/// 因此 `transform_point3` 可以直接使用。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix4(pub DMat4);

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix4 {
    pub const IDENTITY: Matrix4 = Matrix4(DMat4::IDENTITY);

    /// 按行向量约定的行构造矩阵，不做任何校验。
    #[inline]
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self(DMat4::from_cols_array_2d(&rows))
    }

    #[inline]
    pub fn rows(&self) -> [[f64; 4]; 4] {
        self.0.to_cols_array_2d()
    }

    /// 从 LDraw 引用语句的 12 个数值构造：`x y z a b c d e f g h i`。
    pub fn from_ldraw(values: [f64; 12]) -> Self {
        let [x, y, z, a, b, c, d, e, f, g, h, i] = values;
        Self::from_rows([
            [a, d, g, 0.0],
            [b, e, h, 0.0],
            [c, f, i, 0.0],
            [x, y, z, 1.0],
        ])
    }

    /// 输出 LDraw 引用语句所需的 12 个数值。
    pub fn to_ldraw(&self) -> [f64; 12] {
        let r = self.rows();
        [
            r[3][0], r[3][1], r[3][2], r[0][0], r[1][0], r[2][0], r[0][1], r[1][1], r[2][1],
            r[0][2], r[1][2], r[2][2],
        ]
    }

    #[inline]
    pub fn from_translation(offset: Vector3) -> Self {
        Self(DMat4::from_translation(offset.0))
    }

    #[inline]
    pub fn from_scale(scale: Vector3) -> Self {
        Self(DMat4::from_scale(scale.0))
    }

    /// Y 轴镜像（缩放 (1,-1,1)）。
    #[inline]
    pub fn mirror_y() -> Self {
        Self::from_scale(Vector3::new(1.0, -1.0, 1.0))
    }

    /// 第 4 列是否为 (0,0,0,1)。
    pub fn is_affine(&self) -> bool {
        let rows = self.rows();
        rows[0][3] == 0.0 && rows[1][3] == 0.0 && rows[2][3] == 0.0 && rows[3][3] == 1.0
    }

    #[inline]
    pub fn transform_point(&self, point: Vector3) -> Vector3 {
        Vector3(self.0.transform_point3(point.0))
    }

    /// 先应用 `self` 再应用 `outer` 的组合变换。
    #[inline]
    pub fn then(&self, outer: &Matrix4) -> Matrix4 {
        Matrix4(outer.0 * self.0)
    }

    #[inline]
    pub fn determinant(&self) -> f64 {
        self.0.determinant()
    }

    #[inline]
    pub fn translation(&self) -> Vector3 {
        Vector3(self.0.col(3).truncate())
    }

    /// 第 `index` 个局部坐标轴经变换后的向量（3x3 部分的第 `index` 行）。
    #[inline]
    pub fn axis(&self, index: usize) -> Vector3 {
        Vector3(self.0.col(index).truncate())
    }

    pub fn set_axis(&mut self, index: usize, axis: Vector3) {
        let column = self.0.col_mut(index);
        column.x = axis.x();
        column.y = axis.y();
        column.z = axis.z();
    }

    /// 各局部轴的缩放量。
    pub fn axis_scale(&self) -> Vector3 {
        Vector3::new(
            self.axis(0).length(),
            self.axis(1).length(),
            self.axis(2).length(),
        )
    }
}

/// 轴对齐包围盒。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox3 {
    min: Vector3,
    max: Vector3,
}

impl Default for BoundingBox3 {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox3 {
    #[inline]
    pub fn new(min: Vector3, max: Vector3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn empty() -> Self {
        Self {
            min: Vector3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Vector3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x() > self.max.x() || self.min.y() > self.max.y() || self.min.z() > self.max.z()
    }

    #[inline]
    pub fn min(&self) -> Vector3 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> Vector3 {
        self.max
    }

    pub fn include_point(&mut self, point: Vector3) {
        if self.is_empty() {
            self.min = point;
            self.max = point;
            return;
        }
        self.min = Vector3(self.min.0.min(point.0));
        self.max = Vector3(self.max.0.max(point.0));
    }

    pub fn include_box(&mut self, other: &BoundingBox3) {
        if other.is_empty() {
            return;
        }
        self.include_point(other.min);
        self.include_point(other.max);
    }

    #[inline]
    pub fn size(&self) -> Vector3 {
        if self.is_empty() {
            Vector3::ZERO
        } else {
            self.max - self.min
        }
    }

    #[inline]
    pub fn center(&self) -> Vector3 {
        debug_assert!(!self.is_empty());
        Vector3((self.min.0 + self.max.0) * 0.5)
    }
}
