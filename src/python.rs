//! Python 绑定
//!
//! Python 只持有 u32 节点 id；类型和操作符以字符串传入（`"vec3"`、`"+"`、`"length"`）

use std::cell::RefCell;
use std::collections::HashMap;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::GraphError;
use crate::eval::evaluate;
use crate::format::format_expr;
use crate::graph::{BinaryOp, NodeId, NodeManager, UnaryOp};
use crate::shader::{Dialect, EmitOptions};
use crate::technique::Technique;
use crate::types::ValueType;

impl From<GraphError> for PyErr {
    fn from(err: GraphError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn parse_type(ty: &str) -> PyResult<ValueType> {
    ValueType::from_str(ty).ok_or_else(|| PyValueError::new_err(format!("unknown value type `{}`", ty)))
}

/// Python 持有的表达式图
///
/// 使用 RefCell 支持内部可变性（单线程，一个编译会话一个实例）
#[pyclass(unsendable)]
pub struct ShaderGraph {
    manager: RefCell<NodeManager>,
}

#[pymethods]
impl ShaderGraph {
    #[new]
    fn new() -> Self {
        ShaderGraph {
            manager: RefCell::new(NodeManager::new()),
        }
    }

    #[staticmethod]
    fn with_capacity(capacity: usize) -> Self {
        ShaderGraph {
            manager: RefCell::new(NodeManager::with_capacity(capacity)),
        }
    }

    /// 创建常量
    ///
    /// Args:
    ///     ty: 类型名，如 "vec3"
    ///     values: 分量列表（矩阵按列主序）
    ///
    /// Raises:
    ///     ValueError: 类型名未知或分量个数不符
    fn constant(&self, ty: &str, values: Vec<f64>) -> PyResult<NodeId> {
        let ty = parse_type(ty)?;
        Ok(self.manager.borrow_mut().constant(ty, &values)?)
    }

    fn variable(&self, ty: &str, name: &str) -> PyResult<NodeId> {
        let ty = parse_type(ty)?;
        Ok(self.manager.borrow_mut().variable(ty, name))
    }

    /// 一元运算："-"、"abs"、"length"
    fn unary(&self, op: &str, operand: NodeId) -> PyResult<NodeId> {
        let op = UnaryOp::from_str(op)
            .ok_or_else(|| PyValueError::new_err(format!("unknown unary operator `{}`", op)))?;
        Ok(self.manager.borrow_mut().unary(op, operand)?)
    }

    /// 二元运算："+"、"-"、"*"、"/"、"%"、"dot"、"cross"
    ///
    /// Raises:
    ///     ValueError: 操作数类型组合不合法
    fn binary(&self, lhs: NodeId, op: &str, rhs: NodeId) -> PyResult<NodeId> {
        let op = BinaryOp::from_str(op)
            .ok_or_else(|| PyValueError::new_err(format!("unknown binary operator `{}`", op)))?;
        Ok(self.manager.borrow_mut().binary(lhs, op, rhs)?)
    }

    fn attribute(&self, inner: NodeId) -> PyResult<NodeId> {
        Ok(self.manager.borrow_mut().attribute(inner)?)
    }

    fn fragment(&self, inner: NodeId) -> PyResult<NodeId> {
        Ok(self.manager.borrow_mut().fragment(inner)?)
    }

    fn uniform(&self, inner: NodeId) -> PyResult<NodeId> {
        Ok(self.manager.borrow_mut().uniform(inner)?)
    }

    /// 标记存活的根（sweep 之前对每个根调用一次）
    fn mark(&self, root: NodeId) -> PyResult<()> {
        Ok(self.manager.borrow_mut().mark(root)?)
    }

    /// 回收未标记的节点
    ///
    /// Returns:
    ///     int: 被删除的节点数量
    fn sweep(&self) -> usize {
        self.manager.borrow_mut().sweep()
    }

    fn node_count(&self) -> usize {
        self.manager.borrow().len()
    }

    fn type_of(&self, node: NodeId) -> PyResult<&'static str> {
        Ok(self.manager.borrow().type_of(node)?.name())
    }

    /// 数值求值
    ///
    /// Args:
    ///     root: 表达式根
    ///     bindings: 变量名 -> 分量列表
    ///
    /// Returns:
    ///     List[float]: 结果分量
    fn evaluate(&self, root: NodeId, bindings: HashMap<String, Vec<f64>>) -> PyResult<Vec<f64>> {
        Ok(evaluate(&self.manager.borrow(), root, &bindings)?)
    }

    /// 格式化为着色语言表达式文本
    fn format(&self, root: NodeId) -> PyResult<String> {
        Ok(format_expr(&self.manager.borrow(), root)?)
    }

    /// 编译 Technique
    ///
    /// Args:
    ///     position: 位置表达式
    ///     color: 颜色表达式（可包含注解）
    ///     dialect: "glsl100" 或 "glsl300es"
    ///
    /// Returns:
    ///     Tuple[str, str]: (顶点源码, 片元源码)
    #[pyo3(signature = (position, color, dialect = "glsl100"))]
    fn compile(&self, position: NodeId, color: NodeId, dialect: &str) -> PyResult<(String, String)> {
        let dialect = Dialect::from_str(dialect)
            .ok_or_else(|| PyValueError::new_err(format!("unknown dialect `{}`", dialect)))?;
        let compiled = Technique::new(position, color)
            .build(&mut self.manager.borrow_mut(), &EmitOptions::new(dialect))?;
        Ok((compiled.vertex_source, compiled.fragment_source))
    }

    fn __repr__(&self) -> String {
        format!("<ShaderGraph nodes={}>", self.manager.borrow().len())
    }
}

/// Python 模块定义
#[pymodule]
fn shadegraph_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ShaderGraph>()?;
    Ok(())
}
