use ldtools_config::AnalyticsConfig;
use ldtools_core::code::CodeStandard;
use ldtools_core::document::{Page, PageType};
use ldtools_core::element::{Element, ElementId, ElementKind, HasCoordinates};
use ldtools_core::errors::DomError;
use ldtools_core::geometry::{DISTANCE_TOLERANCE, Matrix4, Vector3};
use ldtools_core::reference::Reference;
use ldtools_core::target::TargetStatus;

/// 缩放检测的容差。
const SCALE_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProblemKind {
    Colocated,
    Colinear,
    Bowtie,
    Concave,
    Warped { warp: f64 },
    MatrixSingular {
        zero_rows: Vec<usize>,
        zero_columns: Vec<usize>,
    },
    TargetMissing,
    TargetUnloadable,
    TargetCircularReference,
    TargetScaled,
    TargetMirrored,
    TargetInverted,
    TargetRedirect { to: String },
    TargetUnreleased,
}

/// 修复动作。除 `Delete` 外都只修改元素自身。
#[derive(Debug, Clone, PartialEq)]
pub enum Fix {
    RepairBowtie,
    RepairSingular,
    /// `symmetric_only` 时只统一 X/Z 缩放（图元允许沿对称轴缩放）。
    Unscale { symmetric_only: bool },
    Unmirror,
    ClearInvert,
    FollowRedirect(String),
    Delete,
}

impl Fix {
    #[inline]
    pub fn is_intra_element(&self) -> bool {
        !matches!(self, Fix::Delete)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub element: ElementId,
    pub kind: ProblemKind,
    pub severity: Severity,
    pub fixes: Vec<Fix>,
}

/// 引用的解析信息，由调用方提供。
#[derive(Debug, Clone, Copy)]
pub struct TargetInfo<'a> {
    pub status: TargetStatus,
    pub page: Option<&'a Page>,
    /// 目标来自文档本身而不是零件库。
    pub is_local: bool,
}

impl TargetInfo<'_> {
    pub fn unresolved() -> Self {
        Self {
            status: TargetStatus::Unresolved,
            page: None,
            is_local: false,
        }
    }
}

/// 同一缺陷在 `Full` 下较宽松，在发布标准下升级。
fn by_standard(standard: CodeStandard, full: Severity, publish: Severity) -> Severity {
    match standard {
        CodeStandard::Full => full,
        CodeStandard::OfficialModelRepository | CodeStandard::PartsLibrary => publish,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Analyzer {
    config: AnalyticsConfig,
}

impl Analyzer {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    /// 检查单个元素（不递归进入纹理映射）。没有问题时返回空集合。
    pub fn check(&self, element: &Element, standard: CodeStandard, target: TargetInfo<'_>) -> Vec<Problem> {
        let mut problems = Vec::new();
        let mut report = |kind: ProblemKind, severity: Severity, fixes: Vec<Fix>| {
            problems.push(Problem {
                element: element.id(),
                kind,
                severity,
                fixes,
            });
        };
        match element.kind() {
            ElementKind::Line(shape) => {
                if shape.is_colocated() {
                    report(ProblemKind::Colocated, by_standard(standard, Severity::Warning, Severity::Error), vec![Fix::Delete]);
                }
            }
            ElementKind::OptionalLine(shape) => {
                if shape.is_colocated() {
                    report(ProblemKind::Colocated, by_standard(standard, Severity::Warning, Severity::Error), vec![Fix::Delete]);
                }
            }
            ElementKind::Triangle(shape) => {
                if shape.is_colocated() {
                    report(ProblemKind::Colocated, by_standard(standard, Severity::Warning, Severity::Error), vec![Fix::Delete]);
                } else if shape.is_colinear() {
                    report(ProblemKind::Colinear, by_standard(standard, Severity::Warning, Severity::Error), vec![Fix::Delete]);
                }
            }
            ElementKind::Quadrilateral(shape) => {
                if shape.is_colocated() {
                    report(ProblemKind::Colocated, by_standard(standard, Severity::Warning, Severity::Error), vec![Fix::Delete]);
                } else if shape.is_colinear() {
                    report(ProblemKind::Colinear, by_standard(standard, Severity::Warning, Severity::Error), vec![Fix::Delete]);
                } else if shape.is_bowtie() {
                    report(ProblemKind::Bowtie, by_standard(standard, Severity::Warning, Severity::Error), vec![Fix::RepairBowtie]);
                } else {
                    if shape.is_concave() {
                        report(ProblemKind::Concave, by_standard(standard, Severity::Warning, Severity::Error), Vec::new());
                    }
                    if shape.is_warped() {
                        let warp = shape.warp();
                        report(ProblemKind::Warped { warp }, self.warp_severity(warp, standard), Vec::new());
                    }
                }
            }
            ElementKind::Reference(reference) => {
                for (kind, severity, fixes) in self.check_reference(reference, standard, target) {
                    report(kind, severity, fixes);
                }
            }
            ElementKind::Comment(_)
            | ElementKind::Texmap(_)
            | ElementKind::Group(_)
            | ElementKind::BfcFlag(_)
            | ElementKind::ColourDefinition(_) => {}
        }
        problems
    }

    /// 三级阈值：低于 `warp_warning` 为提示，低于 `warp_error` 为警告，其余为错误。
    pub fn warp_severity(&self, warp: f64, standard: CodeStandard) -> Severity {
        let severity = if warp >= self.config.warp_error {
            Severity::Error
        } else if warp >= self.config.warp_warning {
            Severity::Warning
        } else {
            Severity::Information
        };
        if standard == CodeStandard::Full {
            severity
        } else {
            severity.max(Severity::Warning)
        }
    }

    fn check_reference(
        &self,
        reference: &Reference,
        standard: CodeStandard,
        target: TargetInfo<'_>,
    ) -> Vec<(ProblemKind, Severity, Vec<Fix>)> {
        let mut found = Vec::new();
        match target.status {
            TargetStatus::Missing => found.push((
                ProblemKind::TargetMissing,
                by_standard(standard, Severity::Warning, Severity::Error),
                Vec::new(),
            )),
            TargetStatus::Unloadable => {
                found.push((ProblemKind::TargetUnloadable, Severity::Error, Vec::new()))
            }
            TargetStatus::CircularReference => found.push((
                ProblemKind::TargetCircularReference,
                Severity::Error,
                vec![Fix::Delete],
            )),
            TargetStatus::Unresolved | TargetStatus::Resolved => {}
        }

        let matrix = reference.matrix();
        let singular = matrix.determinant().abs() <= self.config.singular_tolerance;
        if singular {
            let (zero_rows, zero_columns) = zero_lines(matrix);
            let fixes = if zero_rows.is_empty() && zero_columns.is_empty() {
                Vec::new()
            } else {
                vec![Fix::RepairSingular]
            };
            found.push((
                ProblemKind::MatrixSingular {
                    zero_rows,
                    zero_columns,
                },
                Severity::Error,
                fixes,
            ));
        }

        let Some(page) = target.page else {
            return found;
        };
        if let Some(to) = page.header().redirect() {
            found.push((
                ProblemKind::TargetRedirect { to: to.to_string() },
                by_standard(standard, Severity::Warning, Severity::Error),
                vec![Fix::FollowRedirect(to.to_string())],
            ));
        }
        if !target.is_local && page.page_type() != PageType::Model && page.header().release.is_none() {
            let severity = match standard {
                CodeStandard::Full => Severity::Information,
                CodeStandard::OfficialModelRepository => Severity::Warning,
                CodeStandard::PartsLibrary => Severity::Error,
            };
            found.push((ProblemKind::TargetUnreleased, severity, Vec::new()));
        }
        if singular {
            return found;
        }

        let primitive = page.page_type().is_primitive();
        let scale = matrix.axis_scale();
        let scaled = if primitive {
            (scale.x() - scale.z()).abs() > SCALE_TOLERANCE
        } else {
            [scale.x(), scale.y(), scale.z()]
                .iter()
                .any(|s| (s - 1.0).abs() > SCALE_TOLERANCE)
        };
        if scaled {
            found.push((
                ProblemKind::TargetScaled,
                by_standard(standard, Severity::Warning, Severity::Error),
                vec![Fix::Unscale {
                    symmetric_only: primitive,
                }],
            ));
        }
        let restricted = matches!(
            page.page_type(),
            PageType::Model | PageType::Part | PageType::Shortcut
        );
        if restricted && matrix.determinant() < 0.0 {
            found.push((
                ProblemKind::TargetMirrored,
                by_standard(standard, Severity::Warning, Severity::Error),
                vec![Fix::Unmirror],
            ));
        }
        if reference.invert() && (restricted || !page.bfc().is_enabled()) {
            found.push((
                ProblemKind::TargetInverted,
                by_standard(standard, Severity::Information, Severity::Warning),
                vec![Fix::ClearInvert],
            ));
        }
        found
    }
}

/// 3x3 部分中全零的行与列。
fn zero_lines(matrix: &Matrix4) -> (Vec<usize>, Vec<usize>) {
    let rows = matrix.rows();
    let zero = |value: f64| value.abs() <= DISTANCE_TOLERANCE;
    let zero_rows = (0..3)
        .filter(|&row| (0..3).all(|column| zero(rows[row][column])))
        .collect();
    let zero_columns = (0..3)
        .filter(|&column| (0..3).all(|row| zero(rows[row][column])))
        .collect();
    (zero_rows, zero_columns)
}

/// 在元素自身上执行修复，返回是否发生了修改。`Delete` 需要由持有元素的容器完成。
pub fn apply_fix(element: &mut Element, fix: &Fix) -> Result<bool, DomError> {
    if !fix.is_intra_element() {
        return Err(DomError::operation("删除元素需要元素挂接在步骤中"));
    }
    match (element.kind_mut()?, fix) {
        (ElementKind::Quadrilateral(quad), Fix::RepairBowtie) => Ok(quad.repair_bowtie()),
        (ElementKind::Reference(reference), Fix::RepairSingular) => {
            let mut rows = reference.matrix().rows();
            let (zero_rows, zero_columns) = zero_lines(reference.matrix());
            for index in zero_rows.into_iter().chain(zero_columns) {
                rows[index][index] = 1.0;
            }
            let repaired = Matrix4::from_rows(rows);
            let changed = repaired != *reference.matrix();
            reference.set_matrix(repaired)?;
            Ok(changed)
        }
        (ElementKind::Reference(reference), Fix::Unscale { symmetric_only }) => {
            let mut matrix = *reference.matrix();
            let scale = matrix.axis_scale();
            let targets = if *symmetric_only {
                let mean = (scale.x() + scale.z()) / 2.0;
                [mean, scale.y(), mean]
            } else {
                [1.0; 3]
            };
            for (index, length) in targets.into_iter().enumerate() {
                let axis = matrix.axis(index);
                if let Some(unit) = axis.normalize() {
                    matrix.set_axis(index, unit * length);
                }
            }
            let changed = matrix != *reference.matrix();
            reference.set_matrix(matrix)?;
            Ok(changed)
        }
        (ElementKind::Reference(reference), Fix::Unmirror) => {
            let mut matrix = *reference.matrix();
            if matrix.determinant() >= 0.0 {
                return Ok(false);
            }
            let axis = matrix.axis(0);
            matrix.set_axis(0, -axis);
            reference.set_matrix(matrix)?;
            Ok(true)
        }
        (ElementKind::Reference(reference), Fix::ClearInvert) => {
            let changed = reference.invert();
            reference.set_invert(false);
            Ok(changed)
        }
        (ElementKind::Reference(reference), Fix::FollowRedirect(to)) => {
            if reference.target_name() == to {
                return Ok(false);
            }
            reference.set_target_name(to.clone())?;
            Ok(true)
        }
        _ => Err(DomError::operation("该修复不适用于此元素")),
    }
}
