//! ShadeGraph Rust Backend - 着色器表达式编译器
//!
//! 表达式以 hash-consed DAG 的形式存放在 NodeManager 中：
//! - `graph`: 节点池、类型化构造器、mark-and-sweep、结构改写
//! - `eval` / `format`: 数值求值与着色语言文本，共用 `visit` 的缓存遍历
//! - `shader`: 单阶段程序定义与两种方言的源码装配
//! - `technique`: 把一对 (位置, 颜色) 表达式拆成顶点/片元两个阶段
//!
//! Python 绑定在 `python` feature 下编译。

pub mod error;
pub mod eval;
pub mod format;
pub mod graph;
pub mod shader;
pub mod technique;
pub mod types;
pub mod visit;

#[cfg(feature = "python")]
mod python;

pub use error::{GraphError, Result};
pub use eval::{evaluate, Bindings, Evaluator};
pub use format::{format_expr, Formatter};
pub use graph::{AnnotationKind, BinaryOp, NodeData, NodeId, NodeManager, UnaryOp};
pub use shader::{
    Assembler, Dialect, EmitOptions, Interface, Precision, ReservedNames, ShaderKind, ShaderProgram,
};
pub use technique::{CompiledTechnique, StageDefinitions, Technique};
pub use types::ValueType;
pub use visit::CacheStats;

#[cfg(feature = "python")]
pub use python::ShaderGraph;
