//! 表达式 DAG
//!
//! - `nodes`: 节点类型、操作符与类型规则
//! - `manager`: NodeManager 节点池（interning + 回收 + 改写）

pub mod manager;
pub mod nodes;

pub use manager::NodeManager;
pub use nodes::{AnnotationKind, BinaryOp, NodeData, NodeId, UnaryOp};
