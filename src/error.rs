//! 错误类型
//!
//! 所有错误在检测点即为致命错误，原样传播给直接调用者，不做重试或降级。

use crate::graph::{AnnotationKind, BinaryOp, NodeId};
use crate::shader::ShaderKind;
use crate::types::ValueType;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// 操作数类型组合不在类型规则内
    #[error("type error: `{op}` is not defined for {left} and {right}")]
    TypeMismatch {
        op: BinaryOp,
        left: ValueType,
        right: ValueType,
    },

    #[error("constant of type {ty} needs {expected} components, found {found}")]
    ConstantArity {
        ty: ValueType,
        expected: usize,
        found: usize,
    },

    #[error("unbound variable `{0}`")]
    UnboundVariable(String),

    #[error("variable `{name}` has type {ty} ({expected} components) but is bound to {found}")]
    BindingArity {
        name: String,
        ty: ValueType,
        expected: usize,
        found: usize,
    },

    /// 注解节点必须先由分阶段改写消除
    #[error("{kind} nodes must be removed from the graph prior to {action}")]
    IllegalAnnotation {
        kind: AnnotationKind,
        action: &'static str,
    },

    #[error("{stage} stage has no `{name}` output")]
    MissingReservedOutput { stage: ShaderKind, name: String },

    #[error("node {0} is not in the pool")]
    UnknownNode(NodeId),

    #[error("node {0} is not an expression")]
    NotAnExpression(NodeId),

    #[error("node {0} is not a shader program")]
    NotAShader(NodeId),

    #[error("{0} has no shading-language literal")]
    NonFiniteLiteral(f64),
}
