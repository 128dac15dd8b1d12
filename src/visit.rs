//! 表达式访问器
//!
//! 格式化器和求值器共用同一个后序遍历：
//! 1. **显式栈**：深图不会栈溢出
//! 2. **按 NodeId 缓存**：共享子图只计算一次；NodeId 永不复用，缓存跨调用有效
//! 3. **注解即错误**：在展开注解节点之前就报错，指明注解种类

use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::graph::{BinaryOp, NodeData, NodeId, NodeManager, UnaryOp};
use crate::types::ValueType;

/// 已计算的子节点结果及其类型
#[derive(Debug)]
pub struct Operand<'a, T> {
    pub ty: ValueType,
    pub value: &'a T,
}

impl<T> Clone for Operand<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Operand<'_, T> {}

/// 按节点种类分派的访问器
///
/// 子节点结果由 `walk` 先算好再传入，访问器自己不递归。
pub trait ExprVisitor {
    type Output: Clone;

    /// 出现在 IllegalAnnotation 错误里的动作名，例如 "formatting"
    const ACTION: &'static str;

    fn constant(&mut self, ty: ValueType, values: &[f64]) -> Result<Self::Output>;

    fn variable(&mut self, ty: ValueType, name: &str) -> Result<Self::Output>;

    fn unary(&mut self, op: UnaryOp, operand: Operand<'_, Self::Output>) -> Result<Self::Output>;

    fn binary(
        &mut self,
        op: BinaryOp,
        ty: ValueType,
        lhs: Operand<'_, Self::Output>,
        rhs: Operand<'_, Self::Output>,
    ) -> Result<Self::Output>;
}

/// 按 NodeId 缓存的访问结果
#[derive(Debug, Clone)]
pub struct Memo<T> {
    /// 缓存所属节点池的编号
    session: Option<u64>,
    cache: HashMap<NodeId, T>,
    cache_hits: usize,
    cache_misses: usize,
}

impl<T> Memo<T> {
    pub fn new() -> Self {
        Memo {
            session: None,
            cache: HashMap::new(),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    /// 换了节点池就清空：同一个 NodeId 在另一个池里是另一个节点
    fn attach(&mut self, session: u64) {
        if self.session != Some(session) {
            self.clear();
            self.session = Some(session);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_nodes: self.cache.len(),
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            hit_rate: if self.cache_hits + self.cache_misses > 0 {
                self.cache_hits as f64 / (self.cache_hits + self.cache_misses) as f64
            } else {
                0.0
            },
        }
    }

    pub fn clear(&mut self) {
        self.session = None;
        self.cache.clear();
        self.cache_hits = 0;
        self.cache_misses = 0;
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub cached_nodes: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub hit_rate: f64,
}

/// 后序遍历 root，对每个不同节点调用一次访问器
pub fn walk<V: ExprVisitor>(
    manager: &NodeManager,
    root: NodeId,
    visitor: &mut V,
    memo: &mut Memo<V::Output>,
) -> Result<V::Output> {
    memo.attach(manager.session());
    let mut stack = vec![(root, false)];

    while let Some((id, expanded)) = stack.pop() {
        if !expanded {
            if memo.cache.contains_key(&id) {
                memo.cache_hits += 1;
                continue;
            }

            let data = manager.get(id)?;
            match data {
                NodeData::Annotation { kind, .. } => {
                    return Err(GraphError::IllegalAnnotation {
                        kind: *kind,
                        action: V::ACTION,
                    });
                }
                NodeData::Shader(_) => return Err(GraphError::NotAnExpression(id)),
                _ => {}
            }

            stack.push((id, true));
            for child in data.children().into_iter().rev() {
                stack.push((child, false));
            }
            continue;
        }

        if memo.cache.contains_key(&id) {
            continue;
        }

        let data = manager.get(id)?;
        let output = match data {
            NodeData::Constant { ty, .. } => {
                let values = data.literal_values().unwrap_or_default();
                visitor.constant(*ty, &values)?
            }
            NodeData::Variable { ty, name } => visitor.variable(*ty, name)?,
            NodeData::Unary { op, operand } => {
                let operand = Operand {
                    ty: manager.type_of(*operand)?,
                    value: &memo.cache[operand],
                };
                visitor.unary(*op, operand)?
            }
            NodeData::Binary { lhs, op, rhs } => {
                let ty = manager.type_of(id)?;
                let lhs = Operand {
                    ty: manager.type_of(*lhs)?,
                    value: &memo.cache[lhs],
                };
                let rhs = Operand {
                    ty: manager.type_of(*rhs)?,
                    value: &memo.cache[rhs],
                };
                visitor.binary(*op, ty, lhs, rhs)?
            }
            NodeData::Annotation { .. } | NodeData::Shader(_) => {
                return Err(GraphError::NotAnExpression(id));
            }
        };

        memo.cache_misses += 1;
        memo.cache.insert(id, output);
    }

    memo.cache
        .get(&root)
        .cloned()
        .ok_or(GraphError::UnknownNode(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AnnotationKind;

    /// 统计每种节点被访问的次数
    #[derive(Default)]
    struct CountingVisitor {
        visits: usize,
    }

    impl ExprVisitor for CountingVisitor {
        type Output = usize;
        const ACTION: &'static str = "counting";

        fn constant(&mut self, _ty: ValueType, _values: &[f64]) -> Result<usize> {
            self.visits += 1;
            Ok(1)
        }

        fn variable(&mut self, _ty: ValueType, _name: &str) -> Result<usize> {
            self.visits += 1;
            Ok(1)
        }

        fn unary(&mut self, _op: UnaryOp, operand: Operand<'_, usize>) -> Result<usize> {
            self.visits += 1;
            Ok(operand.value + 1)
        }

        fn binary(
            &mut self,
            _op: BinaryOp,
            _ty: ValueType,
            lhs: Operand<'_, usize>,
            rhs: Operand<'_, usize>,
        ) -> Result<usize> {
            self.visits += 1;
            Ok(lhs.value + rhs.value + 1)
        }
    }

    #[test]
    fn test_shared_subgraph_visited_once() {
        let mut nodes = NodeManager::new();
        let x = nodes.variable(ValueType::Float, "x");
        let mut root = x;
        // 每层都引用上一层两次：树展开后有 2^20 个叶子
        for _ in 0..20 {
            root = nodes.binary(root, BinaryOp::Add, root).unwrap();
        }

        let mut visitor = CountingVisitor::default();
        let mut memo = Memo::new();
        let size = walk(&nodes, root, &mut visitor, &mut memo).unwrap();

        assert_eq!(visitor.visits, 21);
        assert_eq!(size, (1 << 21) - 1);
        assert!(memo.stats().cache_hits >= 20);
    }

    #[test]
    fn test_memo_reused_across_walks() {
        let mut nodes = NodeManager::new();
        let x = nodes.variable(ValueType::Float, "x");
        let neg = nodes.unary(UnaryOp::Neg, x).unwrap();
        let abs = nodes.unary(UnaryOp::Abs, neg).unwrap();

        let mut visitor = CountingVisitor::default();
        let mut memo = Memo::new();
        walk(&nodes, neg, &mut visitor, &mut memo).unwrap();
        walk(&nodes, abs, &mut visitor, &mut memo).unwrap();

        assert_eq!(visitor.visits, 3);
        let stats = memo.stats();
        assert_eq!(stats.cached_nodes, 3);
        assert_eq!(stats.cache_misses, 3);
    }

    #[test]
    fn test_annotation_is_rejected_before_its_operand() {
        let mut nodes = NodeManager::new();
        let x = nodes.variable(ValueType::Float, "x");
        let attr = nodes.attribute(x).unwrap();
        let root = nodes.unary(UnaryOp::Abs, attr).unwrap();

        let mut visitor = CountingVisitor::default();
        let result = walk(&nodes, root, &mut visitor, &mut Memo::new());

        assert_eq!(
            result,
            Err(GraphError::IllegalAnnotation {
                kind: AnnotationKind::Attribute,
                action: "counting",
            })
        );
        assert_eq!(visitor.visits, 0);
    }

    #[test]
    fn test_memo_follows_manager() {
        // 两个池里的 NodeId 0 是不同的节点
        let mut first = NodeManager::new();
        let a = first.variable(ValueType::Float, "a");
        let mut second = NodeManager::new();
        let b = second.variable(ValueType::Float, "b");
        let b2 = second.unary(UnaryOp::Neg, b).unwrap();
        assert_eq!(a, b);

        let mut visitor = CountingVisitor::default();
        let mut memo = Memo::new();
        assert_eq!(walk(&first, a, &mut visitor, &mut memo).unwrap(), 1);
        assert_eq!(walk(&second, b2, &mut visitor, &mut memo).unwrap(), 2);

        assert_eq!(visitor.visits, 3);
        assert_eq!(memo.stats().cached_nodes, 2);
    }

    #[test]
    fn test_deep_chain() {
        let mut nodes = NodeManager::new();
        let mut root = nodes.variable(ValueType::Float, "x");
        for _ in 0..50_000 {
            root = nodes.unary(UnaryOp::Neg, root).unwrap();
        }

        let mut visitor = CountingVisitor::default();
        let depth = walk(&nodes, root, &mut visitor, &mut Memo::new()).unwrap();
        assert_eq!(depth, 50_001);
    }
}
