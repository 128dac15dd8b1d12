//! Value-Type 注册表
//!
//! 封闭的代数类型集合：标量、2/3/4 维向量、2x2/3x3/4x4 矩阵。
//! 每个类型只有一个实例（Copy 枚举），按值比较即按身份比较。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 代数值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ValueType {
    pub const ALL: [ValueType; 7] = [
        ValueType::Float,
        ValueType::Vec2,
        ValueType::Vec3,
        ValueType::Vec4,
        ValueType::Mat2,
        ValueType::Mat3,
        ValueType::Mat4,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "float" => Some(ValueType::Float),
            "vec2" => Some(ValueType::Vec2),
            "vec3" => Some(ValueType::Vec3),
            "vec4" => Some(ValueType::Vec4),
            "mat2" => Some(ValueType::Mat2),
            "mat3" => Some(ValueType::Mat3),
            "mat4" => Some(ValueType::Mat4),
            _ => None,
        }
    }

    /// 按 (rows, cols) 查找类型
    pub fn from_dims(rows: usize, cols: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.dims() == (rows, cols))
    }

    /// 着色语言中的类型名（同时也是构造函数名）
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Float => "float",
            ValueType::Vec2 => "vec2",
            ValueType::Vec3 => "vec3",
            ValueType::Vec4 => "vec4",
            ValueType::Mat2 => "mat2",
            ValueType::Mat3 => "mat3",
            ValueType::Mat4 => "mat4",
        }
    }

    /// (rows, cols)：向量是 n x 1 的列
    #[inline]
    pub fn dims(self) -> (usize, usize) {
        match self {
            ValueType::Float => (1, 1),
            ValueType::Vec2 => (2, 1),
            ValueType::Vec3 => (3, 1),
            ValueType::Vec4 => (4, 1),
            ValueType::Mat2 => (2, 2),
            ValueType::Mat3 => (3, 3),
            ValueType::Mat4 => (4, 4),
        }
    }

    #[inline]
    pub fn rows(self) -> usize {
        self.dims().0
    }

    #[inline]
    pub fn cols(self) -> usize {
        self.dims().1
    }

    /// 分量个数（rows * cols）
    #[inline]
    pub fn length(self) -> usize {
        let (rows, cols) = self.dims();
        rows * cols
    }

    #[inline]
    pub fn is_scalar(self) -> bool {
        matches!(self, ValueType::Float)
    }

    #[inline]
    pub fn is_vector(self) -> bool {
        matches!(self, ValueType::Vec2 | ValueType::Vec3 | ValueType::Vec4)
    }

    #[inline]
    pub fn is_matrix(self) -> bool {
        matches!(self, ValueType::Mat2 | ValueType::Mat3 | ValueType::Mat4)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
