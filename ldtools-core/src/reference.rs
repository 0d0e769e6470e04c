use serde::{Deserialize, Serialize};

use crate::errors::DomError;
use crate::geometry::Matrix4;

pub const UNDEFINED_TARGET: &str = "Undefined";

/// 对另一页面的实例化：变换矩阵 + 目标名 + 反转标志。
///
/// 目标本身不存放在这里，解析结果由引擎层按元素标识缓存。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    matrix: Matrix4,
    target_name: String,
    invert: bool,
}

impl Default for Reference {
    fn default() -> Self {
        Self {
            matrix: Matrix4::IDENTITY,
            target_name: UNDEFINED_TARGET.to_string(),
            invert: false,
        }
    }
}

impl Reference {
    pub fn new(target_name: impl Into<String>, matrix: Matrix4) -> Result<Self, DomError> {
        let mut reference = Self::default();
        reference.set_target_name(target_name)?;
        reference.set_matrix(matrix)?;
        Ok(reference)
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix4 {
        &self.matrix
    }

    /// 第 4 列必须为 (0,0,0,1)，否则拒绝且保留原矩阵。
    pub fn set_matrix(&mut self, matrix: Matrix4) -> Result<(), DomError> {
        if !matrix.is_affine() {
            return Err(DomError::invalid("变换矩阵第 4 列必须为 (0,0,0,1)"));
        }
        if matrix.0.to_cols_array().iter().any(|value| !value.is_finite()) {
            return Err(DomError::invalid("变换矩阵包含非有限数值"));
        }
        self.matrix = matrix;
        Ok(())
    }

    #[inline]
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn set_target_name(&mut self, name: impl Into<String>) -> Result<(), DomError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomError::invalid("引用目标名不能为空"));
        }
        if trimmed.contains(['\r', '\n']) {
            return Err(DomError::invalid("引用目标名不能跨行"));
        }
        self.target_name = trimmed.to_string();
        Ok(())
    }

    #[inline]
    pub fn invert(&self) -> bool {
        self.invert
    }

    #[inline]
    pub fn set_invert(&mut self, invert: bool) {
        self.invert = invert;
    }

    /// 立体目标翻转 `invert`；平面目标把 Y 镜像并入矩阵，`invert` 不变。
    pub fn reverse_winding(&mut self, target_is_flat: bool) {
        if target_is_flat {
            self.matrix = Matrix4::mirror_y().then(&self.matrix);
        } else {
            self.invert = !self.invert;
        }
    }
}
