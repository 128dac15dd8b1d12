//! 表达式 DAG 节点类型
//!
//! 节点是封闭的 tagged union：常量、变量、一元/二元运算、三种注解，
//! 以及着色器程序。子节点用 NodeId 引用，NodeData 本身就是 hash-consing 的键：
//! 子节点已经是规范实例，所以 (tag, 子节点 id, 字面量) 完全决定结构。

use std::fmt;

use crate::error::{GraphError, Result};
use crate::shader::ShaderProgram;
use crate::types::ValueType;

pub type NodeId = u32;

/// 一元操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// 算术取反 (-x)
    Neg,
    Abs,
    /// 欧几里得范数，结果恒为标量
    Length,
}

impl UnaryOp {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "-" | "neg" => Some(UnaryOp::Neg),
            "abs" => Some(UnaryOp::Abs),
            "length" => Some(UnaryOp::Length),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Abs => "abs",
            UnaryOp::Length => "length",
        }
    }

    pub fn result_type(self, operand: ValueType) -> ValueType {
        match self {
            UnaryOp::Neg | UnaryOp::Abs => operand,
            UnaryOp::Length => ValueType::Float,
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 二元操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Dot,
    Cross,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 7] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::Dot,
        BinaryOp::Cross,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "+" => Some(BinaryOp::Add),
            "-" => Some(BinaryOp::Sub),
            "*" => Some(BinaryOp::Mul),
            "/" => Some(BinaryOp::Div),
            "%" | "mod" => Some(BinaryOp::Mod),
            "dot" => Some(BinaryOp::Dot),
            "cross" => Some(BinaryOp::Cross),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Dot => "dot",
            BinaryOp::Cross => "cross",
        }
    }

    /// 二元运算的类型规则
    ///
    /// 检查顺序不可调换：
    /// 1. 任一侧为标量：结果为另一侧类型（广播）
    /// 2. `*` 且两侧都是向量：逐分量乘积（Hadamard），结果取左侧类型
    /// 3. `*` 的矩阵情形：要求 L.cols == R.rows，结果按 (L.rows, R.cols) 查表
    pub fn result_type(self, left: ValueType, right: ValueType) -> Result<ValueType> {
        let mismatch = || GraphError::TypeMismatch {
            op: self,
            left,
            right,
        };

        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => {
                if left.is_scalar() {
                    Ok(right)
                } else if right.is_scalar() || left == right {
                    Ok(left)
                } else {
                    Err(mismatch())
                }
            }
            BinaryOp::Mul => {
                if left.is_scalar() {
                    Ok(right)
                } else if right.is_scalar() {
                    Ok(left)
                } else if left.is_vector() && right.is_vector() {
                    Ok(left)
                } else if left.cols() == right.rows() {
                    ValueType::from_dims(left.rows(), right.cols()).ok_or_else(mismatch)
                } else {
                    Err(mismatch())
                }
            }
            BinaryOp::Dot => {
                if left.is_vector() && left == right {
                    Ok(ValueType::Float)
                } else {
                    Err(mismatch())
                }
            }
            BinaryOp::Cross => {
                if left == ValueType::Vec3 && right == ValueType::Vec3 {
                    Ok(ValueType::Vec3)
                } else {
                    Err(mismatch())
                }
            }
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 注解种类
///
/// 注解只在分阶段改写时用于分类，不能被格式化或求值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    /// 顶点属性输入
    Attribute,
    /// 阶段边界：在顶点阶段计算，以 varying 传给片元阶段
    Fragment,
    Uniform,
}

impl AnnotationKind {
    pub fn name(self) -> &'static str {
        match self {
            AnnotationKind::Attribute => "Attribute",
            AnnotationKind::Fragment => "Fragment",
            AnnotationKind::Uniform => "Uniform",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 节点数据（存储在 NodeManager 中）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeData {
    /// 常量
    ///
    /// 统一使用 u64 存储（f64 通过 to_bits 转换），以便参与 Hash/Eq
    Constant { ty: ValueType, bits: Vec<u64> },

    /// 变量：格式化/求值时由外部按名字解析
    Variable { ty: ValueType, name: String },

    Unary { op: UnaryOp, operand: NodeId },

    Binary {
        lhs: NodeId,
        op: BinaryOp,
        rhs: NodeId,
    },

    /// Attribute / Fragment / Uniform 包装
    Annotation { kind: AnnotationKind, inner: NodeId },

    /// 单个着色阶段程序
    Shader(ShaderProgram),
}

impl NodeData {
    /// 创建常量数据
    ///
    /// -0.0 归一为 0.0，两者 intern 到同一个节点
    pub fn constant(ty: ValueType, values: &[f64]) -> Self {
        let bits = values
            .iter()
            .map(|v| if *v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
            .collect();
        NodeData::Constant { ty, bits }
    }

    /// 获取常量的浮点值
    pub fn literal_values(&self) -> Option<Vec<f64>> {
        match self {
            NodeData::Constant { bits, .. } => {
                Some(bits.iter().map(|b| f64::from_bits(*b)).collect())
            }
            _ => None,
        }
    }

    /// 直接子节点（有序）
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeData::Constant { .. } | NodeData::Variable { .. } => Vec::new(),
            NodeData::Unary { operand, .. } => vec![*operand],
            NodeData::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeData::Annotation { inner, .. } => vec![*inner],
            NodeData::Shader(program) => program.outputs.values().copied().collect(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            NodeData::Constant { .. } => "Constant",
            NodeData::Variable { .. } => "Variable",
            NodeData::Unary { .. } => "Unary",
            NodeData::Binary { .. } => "Binary",
            NodeData::Annotation { kind, .. } => kind.name(),
            NodeData::Shader(_) => "Shader",
        }
    }

    pub fn is_expr(&self) -> bool {
        !matches!(self, NodeData::Shader(_))
    }

    pub fn annotation_kind(&self) -> Option<AnnotationKind> {
        match self {
            NodeData::Annotation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ValueType::*;

    #[test]
    fn test_unary_op_from_str() {
        assert_eq!(UnaryOp::from_str("-"), Some(UnaryOp::Neg));
        assert_eq!(UnaryOp::from_str("abs"), Some(UnaryOp::Abs));
        assert_eq!(UnaryOp::from_str("length"), Some(UnaryOp::Length));
        assert_eq!(UnaryOp::from_str("??"), None);
    }

    #[test]
    fn test_binary_op_from_str() {
        for op in BinaryOp::ALL {
            assert_eq!(BinaryOp::from_str(op.symbol()), Some(op));
        }
        assert_eq!(BinaryOp::from_str("mod"), Some(BinaryOp::Mod));
        assert_eq!(BinaryOp::from_str("<<"), None);
    }

    #[test]
    fn test_unary_result_type() {
        for ty in ValueType::ALL {
            assert_eq!(UnaryOp::Neg.result_type(ty), ty);
            assert_eq!(UnaryOp::Abs.result_type(ty), ty);
            assert_eq!(UnaryOp::Length.result_type(ty), Float);
        }
    }

    /// 在合同内的 (op, L, R) 组合及其结果类型，其余组合全部是类型错误
    fn expected_type(op: BinaryOp, l: ValueType, r: ValueType) -> Option<ValueType> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => {
                if l == Float {
                    Some(r)
                } else if r == Float || l == r {
                    Some(l)
                } else {
                    None
                }
            }
            BinaryOp::Mul => match (l, r) {
                (Float, _) => Some(r),
                (_, Float) => Some(l),
                (Vec2 | Vec3 | Vec4, Vec2 | Vec3 | Vec4) => Some(l),
                (Mat2, Mat2) | (Mat2, Vec2) => Some(r),
                (Mat3, Mat3) | (Mat3, Vec3) => Some(r),
                (Mat4, Mat4) | (Mat4, Vec4) => Some(r),
                _ => None,
            },
            BinaryOp::Dot => match (l, r) {
                (Vec2, Vec2) | (Vec3, Vec3) | (Vec4, Vec4) => Some(Float),
                _ => None,
            },
            BinaryOp::Cross => match (l, r) {
                (Vec3, Vec3) => Some(Vec3),
                _ => None,
            },
        }
    }

    #[test]
    fn test_binary_type_rule_totality() {
        for op in BinaryOp::ALL {
            for l in ValueType::ALL {
                for r in ValueType::ALL {
                    let actual = op.result_type(l, r);
                    match expected_type(op, l, r) {
                        Some(ty) => assert_eq!(actual, Ok(ty), "{l} {op} {r}"),
                        None => assert_eq!(
                            actual,
                            Err(GraphError::TypeMismatch { op, left: l, right: r }),
                            "{l} {op} {r}"
                        ),
                    }
                }
            }
        }
    }

    #[test]
    fn test_hadamard_keeps_left_type() {
        assert_eq!(BinaryOp::Mul.result_type(Vec2, Vec3), Ok(Vec2));
        assert_eq!(BinaryOp::Mul.result_type(Vec4, Vec4), Ok(Vec4));
    }

    #[test]
    fn test_matrix_shape_rule() {
        assert_eq!(BinaryOp::Mul.result_type(Mat3, Vec3), Ok(Vec3));
        assert!(BinaryOp::Mul.result_type(Vec3, Mat3).is_err());
        assert!(BinaryOp::Mul.result_type(Mat2, Mat3).is_err());
    }

    #[test]
    fn test_constant_normalizes_negative_zero() {
        assert_eq!(
            NodeData::constant(Float, &[-0.0]),
            NodeData::constant(Float, &[0.0])
        );
        assert_ne!(
            NodeData::constant(Float, &[1.0]),
            NodeData::constant(Float, &[-1.0])
        );
    }

    #[test]
    fn test_literal_values_roundtrip() {
        let data = NodeData::constant(Vec3, &[3.0, 0.5, -4.25]);
        assert_eq!(data.literal_values(), Some(vec![3.0, 0.5, -4.25]));
        assert!(data.children().is_empty());
    }

    #[test]
    fn test_children_order() {
        let data = NodeData::Binary {
            lhs: 7,
            op: BinaryOp::Sub,
            rhs: 3,
        };
        assert_eq!(data.children(), vec![7, 3]);
        assert_eq!(data.tag(), "Binary");
    }

    #[test]
    fn test_annotation_tag() {
        let data = NodeData::Annotation {
            kind: AnnotationKind::Uniform,
            inner: 0,
        };
        assert_eq!(data.tag(), "Uniform");
        assert_eq!(data.annotation_kind(), Some(AnnotationKind::Uniform));
        assert!(data.is_expr());
    }
}
