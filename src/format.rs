//! 着色语言表达式格式化器
//!
//! - 变量：原样输出名字
//! - 常量：标量为带小数点的数字（`2` -> `2.0`），向量/矩阵用类型构造函数
//! - `+ - * /`：`(A op B)`；`mod dot cross`：`op(A, B)`
//! - `-`：`(-A)`；`abs length`：`op(A)`

use crate::error::{GraphError, Result};
use crate::graph::{BinaryOp, NodeId, NodeManager, UnaryOp};
use crate::types::ValueType;
use crate::visit::{walk, CacheStats, ExprVisitor, Memo, Operand};

/// 一次性格式化
pub fn format_expr(manager: &NodeManager, root: NodeId) -> Result<String> {
    Formatter::new().format(manager, root)
}

/// 带缓存的格式化器
///
/// 表达式文本与方言无关，同一个 Formatter 可以服务多个着色器。
/// 缓存按 NodeId 存放，传入另一个 NodeManager 时会先清空。
#[derive(Debug, Default)]
pub struct Formatter {
    memo: Memo<String>,
}

impl Formatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(&mut self, manager: &NodeManager, root: NodeId) -> Result<String> {
        walk(manager, root, &mut GlslSyntax, &mut self.memo)
    }

    pub fn stats(&self) -> CacheStats {
        self.memo.stats()
    }
}

struct GlslSyntax;

impl ExprVisitor for GlslSyntax {
    type Output = String;
    const ACTION: &'static str = "formatting";

    fn constant(&mut self, ty: ValueType, values: &[f64]) -> Result<String> {
        if ty.is_scalar() {
            return format_literal(values[0]);
        }

        let components = values
            .iter()
            .map(|v| format_literal(*v))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("{}({})", ty.name(), components.join(", ")))
    }

    fn variable(&mut self, _ty: ValueType, name: &str) -> Result<String> {
        Ok(name.to_string())
    }

    fn unary(&mut self, op: UnaryOp, operand: Operand<'_, String>) -> Result<String> {
        Ok(match op {
            // `--` 会被读成自减运算符
            UnaryOp::Neg if operand.value.starts_with('-') => format!("(- {})", operand.value),
            UnaryOp::Neg => format!("(-{})", operand.value),
            UnaryOp::Abs | UnaryOp::Length => format!("{}({})", op.symbol(), operand.value),
        })
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        _ty: ValueType,
        lhs: Operand<'_, String>,
        rhs: Operand<'_, String>,
    ) -> Result<String> {
        Ok(match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                format!("({} {} {})", lhs.value, op.symbol(), rhs.value)
            }
            // 目标语言没有这三个中缀运算符
            BinaryOp::Mod => format!("mod({}, {})", lhs.value, rhs.value),
            BinaryOp::Dot | BinaryOp::Cross => {
                format!("{}({}, {})", op.symbol(), lhs.value, rhs.value)
            }
        })
    }
}

/// 浮点字面量：整数值也必须带小数点
pub fn format_literal(value: f64) -> Result<String> {
    if !value.is_finite() {
        return Err(GraphError::NonFiniteLiteral(value));
    }
    if value.fract() == 0.0 {
        Ok(format!("{:.1}", value))
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AnnotationKind;

    #[test]
    fn test_format_literal() {
        assert_eq!(format_literal(2.0).unwrap(), "2.0");
        assert_eq!(format_literal(-3.0).unwrap(), "-3.0");
        assert_eq!(format_literal(0.25).unwrap(), "0.25");
        assert_eq!(format_literal(1e-7).unwrap(), "0.0000001");
        assert_eq!(
            format_literal(f64::INFINITY),
            Err(GraphError::NonFiniteLiteral(f64::INFINITY))
        );
        assert!(format_literal(f64::NAN).is_err());
    }

    #[test]
    fn test_scalar_times_variable() {
        let mut nodes = NodeManager::new();
        let two = nodes.constant(ValueType::Float, &[2.0]).unwrap();
        let x = nodes.variable(ValueType::Float, "x");
        let expr = nodes.binary(two, BinaryOp::Mul, x).unwrap();

        assert_eq!(format_expr(&nodes, expr).unwrap(), "(2.0 * x)");
    }

    #[test]
    fn test_vector_constant() {
        let mut nodes = NodeManager::new();
        let v = nodes.constant(ValueType::Vec3, &[3.0, 0.0, 4.5]).unwrap();

        assert_eq!(format_expr(&nodes, v).unwrap(), "vec3(3.0, 0.0, 4.5)");
    }

    #[test]
    fn test_matrix_constant() {
        let mut nodes = NodeManager::new();
        let m = nodes.constant(ValueType::Mat2, &[1.0, 0.0, 0.0, 1.0]).unwrap();

        assert_eq!(format_expr(&nodes, m).unwrap(), "mat2(1.0, 0.0, 0.0, 1.0)");
    }

    #[test]
    fn test_function_call_operators() {
        let mut nodes = NodeManager::new();
        let a = nodes.variable(ValueType::Vec3, "a");
        let b = nodes.variable(ValueType::Vec3, "b");
        let s = nodes.variable(ValueType::Float, "s");

        let cross = nodes.binary(a, BinaryOp::Cross, b).unwrap();
        let dot = nodes.binary(a, BinaryOp::Dot, cross).unwrap();
        let modulo = nodes.binary(dot, BinaryOp::Mod, s).unwrap();
        let len = nodes.unary(UnaryOp::Length, a).unwrap();
        let abs = nodes.unary(UnaryOp::Abs, modulo).unwrap();
        let neg = nodes.unary(UnaryOp::Neg, len).unwrap();
        let root = nodes.binary(abs, BinaryOp::Sub, neg).unwrap();

        assert_eq!(
            format_expr(&nodes, root).unwrap(),
            "(abs(mod(dot(a, cross(a, b)), s)) - (-length(a)))"
        );
    }

    #[test]
    fn test_negating_negative_literal() {
        let mut nodes = NodeManager::new();
        let c = nodes.constant(ValueType::Float, &[-3.0]).unwrap();
        let neg = nodes.unary(UnaryOp::Neg, c).unwrap();
        let twice = nodes.unary(UnaryOp::Neg, neg).unwrap();

        assert_eq!(format_expr(&nodes, neg).unwrap(), "(- -3.0)");
        assert_eq!(format_expr(&nodes, twice).unwrap(), "(-(- -3.0))");
    }

    #[test]
    fn test_annotation_cannot_be_formatted() {
        let mut nodes = NodeManager::new();
        let x = nodes.variable(ValueType::Float, "x");
        let uni = nodes.uniform(x).unwrap();
        let root = nodes.binary(x, BinaryOp::Add, uni).unwrap();

        assert_eq!(
            format_expr(&nodes, root),
            Err(GraphError::IllegalAnnotation {
                kind: AnnotationKind::Uniform,
                action: "formatting",
            })
        );
    }

    #[test]
    fn test_formatter_reused_across_managers() {
        let mut first = NodeManager::new();
        let x = first.variable(ValueType::Float, "x");
        let mut second = NodeManager::new();
        let y = second.variable(ValueType::Float, "y");
        assert_eq!(x, y);

        let mut formatter = Formatter::new();
        assert_eq!(formatter.format(&first, x).unwrap(), "x");
        assert_eq!(formatter.format(&second, y).unwrap(), "y");
        assert_eq!(formatter.format(&first, x).unwrap(), "x");
    }

    #[test]
    fn test_formatter_cache_shared_between_roots() {
        let mut nodes = NodeManager::new();
        let x = nodes.variable(ValueType::Float, "x");
        let y = nodes.variable(ValueType::Float, "y");
        let sum = nodes.binary(x, BinaryOp::Add, y).unwrap();
        let a = nodes.binary(sum, BinaryOp::Mul, x).unwrap();
        let b = nodes.binary(sum, BinaryOp::Div, y).unwrap();

        let mut formatter = Formatter::new();
        assert_eq!(formatter.format(&nodes, a).unwrap(), "((x + y) * x)");
        assert_eq!(formatter.format(&nodes, b).unwrap(), "((x + y) / y)");
        assert!(formatter.stats().cache_hits >= 2);
    }
}
