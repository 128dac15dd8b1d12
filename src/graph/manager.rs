//! NodeManager - 节点池（interner + mark-and-sweep 回收器）
//!
//! 所有节点只能通过这里的类型化构造器创建：
//! - 结构相同的子图总是解析到同一个 NodeId（hash-consing）
//! - `mark` 标记从根可达的节点，`sweep` 删除未标记的节点
//! - NodeId 单调递增、永不复用，sweep 之后旧 id 只会查不到，不会指向别的节点

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use super::nodes::{AnnotationKind, BinaryOp, NodeData, NodeId, UnaryOp};
use crate::error::{GraphError, Result};
use crate::shader::ShaderProgram;
use crate::types::ValueType;

/// 池中的一项：节点数据 + 构造时计算好的结果类型（着色器节点没有类型）
#[derive(Debug, Clone)]
struct Entry {
    data: NodeData,
    ty: Option<ValueType>,
}

/// 每个 NodeManager 实例的唯一编号
static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// 节点池
#[derive(Debug)]
pub struct NodeManager {
    /// 区分不同节点池：NodeId 只在同一个池内有意义
    session: u64,
    nodes: HashMap<NodeId, Entry>,
    /// 结构键 -> 规范实例
    index: HashMap<NodeData, NodeId>,
    /// 仅在一次回收周期内使用
    marked: HashSet<NodeId>,
    next_id: NodeId,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带预分配容量的节点池
    pub fn with_capacity(capacity: usize) -> Self {
        NodeManager {
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            nodes: HashMap::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            marked: HashSet::new(),
            next_id: 0,
        }
    }

    /// 节点池编号，按 NodeId 缓存结果的一方用它判断缓存是否属于本池
    #[inline]
    pub fn session(&self) -> u64 {
        self.session
    }

    // =========================================================================
    // 类型化构造器
    // =========================================================================

    /// 创建常量
    ///
    /// Args:
    ///     ty: 值类型
    ///     values: 字面量分量，个数必须等于 `ty.length()`（矩阵按列主序）
    pub fn constant(&mut self, ty: ValueType, values: &[f64]) -> Result<NodeId> {
        if values.len() != ty.length() {
            return Err(GraphError::ConstantArity {
                ty,
                expected: ty.length(),
                found: values.len(),
            });
        }
        Ok(self.intern(NodeData::constant(ty, values), Some(ty)))
    }

    /// 创建或获取变量
    pub fn variable(&mut self, ty: ValueType, name: &str) -> NodeId {
        let data = NodeData::Variable {
            ty,
            name: name.to_string(),
        };
        self.intern(data, Some(ty))
    }

    pub fn unary(&mut self, op: UnaryOp, operand: NodeId) -> Result<NodeId> {
        let ty = op.result_type(self.type_of(operand)?);
        Ok(self.intern(NodeData::Unary { op, operand }, Some(ty)))
    }

    /// 创建二元表达式
    ///
    /// 类型规则在这里检查，不合法的操作数组合直接返回 TypeMismatch
    pub fn binary(&mut self, lhs: NodeId, op: BinaryOp, rhs: NodeId) -> Result<NodeId> {
        let ty = op.result_type(self.type_of(lhs)?, self.type_of(rhs)?)?;
        Ok(self.intern(NodeData::Binary { lhs, op, rhs }, Some(ty)))
    }

    /// 用注解包装子表达式，类型与被包装者相同
    pub fn annotate(&mut self, kind: AnnotationKind, inner: NodeId) -> Result<NodeId> {
        let ty = self.type_of(inner)?;
        Ok(self.intern(NodeData::Annotation { kind, inner }, Some(ty)))
    }

    pub fn attribute(&mut self, inner: NodeId) -> Result<NodeId> {
        self.annotate(AnnotationKind::Attribute, inner)
    }

    pub fn fragment(&mut self, inner: NodeId) -> Result<NodeId> {
        self.annotate(AnnotationKind::Fragment, inner)
    }

    pub fn uniform(&mut self, inner: NodeId) -> Result<NodeId> {
        self.annotate(AnnotationKind::Uniform, inner)
    }

    /// 把着色器程序放入节点池，所有输出必须是池中的表达式
    pub fn shader(&mut self, program: ShaderProgram) -> Result<NodeId> {
        for &output in program.outputs.values() {
            self.type_of(output)?;
        }
        Ok(self.intern(NodeData::Shader(program), None))
    }

    fn intern(&mut self, data: NodeData, ty: Option<ValueType>) -> NodeId {
        if let Some(&id) = self.index.get(&data) {
            trace!(id, tag = data.tag(), "intern hit");
            return id;
        }

        let id = self.next_id;
        self.next_id += 1;
        trace!(id, tag = data.tag(), "intern miss");

        self.index.insert(data.clone(), id);
        self.nodes.insert(id, Entry { data, ty });
        id
    }

    // =========================================================================
    // 查询方法
    // =========================================================================

    /// 获取节点数据
    pub fn get(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes
            .get(&id)
            .map(|entry| &entry.data)
            .ok_or(GraphError::UnknownNode(id))
    }

    /// 获取表达式的结果类型（O(1)，构造时已计算）
    pub fn type_of(&self, id: NodeId) -> Result<ValueType> {
        let entry = self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))?;
        entry.ty.ok_or(GraphError::NotAnExpression(id))
    }

    pub fn shader_program(&self, id: NodeId) -> Result<&ShaderProgram> {
        match self.get(id)? {
            NodeData::Shader(program) => Ok(program),
            _ => Err(GraphError::NotAShader(id)),
        }
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.get(id)?.children())
    }

    /// 按结构键查找规范实例（不创建）
    pub fn lookup(&self, data: &NodeData) -> Option<NodeId> {
        self.index.get(data).copied()
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// 获取节点数量
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 结构签名，例如 `Binary(Constant(float,[2]),*,Variable(float,x))`
    pub fn signature(&self, root: NodeId) -> Result<String> {
        let mut rendered: HashMap<NodeId, String> = HashMap::new();

        for id in self.post_order(root)? {
            let data = self.get(id)?;
            let text = match data {
                NodeData::Constant { ty, .. } => {
                    let values = data.literal_values().unwrap_or_default();
                    let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    format!("Constant({},[{}])", ty, joined.join(","))
                }
                NodeData::Variable { ty, name } => format!("Variable({},{})", ty, name),
                NodeData::Unary { op, operand } => {
                    format!("Unary({},{})", op, rendered[operand])
                }
                NodeData::Binary { lhs, op, rhs } => {
                    format!("Binary({},{},{})", rendered[lhs], op, rendered[rhs])
                }
                NodeData::Annotation { kind, inner } => format!("{}({})", kind, rendered[inner]),
                NodeData::Shader(program) => {
                    let mut text = format!(
                        "Shader({},[{}],[{}],{{",
                        program.kind,
                        join_interface(&program.inputs),
                        join_interface(&program.uniforms)
                    );
                    for (i, (name, expr)) in program.outputs.iter().enumerate() {
                        if i > 0 {
                            text.push(',');
                        }
                        let _ = write!(text, "{}={}", name, rendered[expr]);
                    }
                    text.push_str("})");
                    text
                }
            };
            rendered.insert(id, text);
        }

        rendered.remove(&root).ok_or(GraphError::UnknownNode(root))
    }

    // =========================================================================
    // 遍历
    // =========================================================================

    /// 从 root 可达的所有不同节点，子节点先于父节点（显式栈，避免深图栈溢出）
    pub fn post_order(&self, root: NodeId) -> Result<Vec<NodeId>> {
        self.post_order_pruned(root, |_| false)
    }

    /// 同 `post_order`，但 `prune` 命中的节点只输出自身、不展开子节点
    fn post_order_pruned(&self, root: NodeId, prune: impl Fn(NodeId) -> bool) -> Result<Vec<NodeId>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }

            let data = self.get(id)?;
            stack.push((id, true));
            if prune(id) {
                continue;
            }
            // 逆序压栈保证左子树先处理
            for child in data.children().into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }

        Ok(order)
    }

    /// 收集从 root 可达、满足 predicate 的不同节点
    ///
    /// 深度优先前序，每个节点只访问一次（即使被多个父节点引用）
    pub fn collect(&self, root: NodeId, predicate: impl Fn(&NodeData) -> bool) -> Result<Vec<NodeId>> {
        let mut collected = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }

            let data = self.get(id)?;
            if predicate(data) {
                collected.push(id);
            }
            for child in data.children().into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push(child);
                }
            }
        }

        Ok(collected)
    }

    /// 收集某种注解的所有不同节点
    pub fn collect_annotations(&self, root: NodeId, kind: AnnotationKind) -> Result<Vec<NodeId>> {
        self.collect(root, |data| data.annotation_kind() == Some(kind))
    }

    // =========================================================================
    // 回收
    // =========================================================================

    /// 标记 root 及其所有可达节点
    pub fn mark(&mut self, root: NodeId) -> Result<()> {
        let reachable = self.collect(root, |_| true)?;
        self.marked.extend(reachable);
        Ok(())
    }

    /// 删除所有未标记的节点，然后清空标记集合
    ///
    /// Returns:
    ///     被删除的节点数量
    pub fn sweep(&mut self) -> usize {
        let marked = std::mem::take(&mut self.marked);
        let before = self.nodes.len();

        self.nodes.retain(|id, _| marked.contains(id));
        self.index.retain(|_, id| marked.contains(id));

        let removed = before - self.nodes.len();
        debug!(removed, retained = self.nodes.len(), "sweep");
        removed
    }

    // =========================================================================
    // 改写
    // =========================================================================

    /// 把 root 中所有 target 替换为 replacement，返回新的根
    ///
    /// 从不修改已有节点：受影响的祖先经由 interner 重建，未受影响的分支保持原 id。
    /// 非目标注解会包着改写后的子节点重建，而不是被剥掉。
    pub fn substitute(&mut self, root: NodeId, target: NodeId, replacement: NodeId) -> Result<NodeId> {
        self.type_of(replacement)?;

        let order = self.post_order_pruned(root, |id| id == target)?;
        let mut rebuilt: HashMap<NodeId, NodeId> = HashMap::with_capacity(order.len());

        for id in order {
            let new_id = if id == target {
                replacement
            } else {
                match self.get(id)?.clone() {
                    NodeData::Constant { .. } | NodeData::Variable { .. } => id,
                    NodeData::Unary { op, operand } => {
                        let operand_new = rebuilt[&operand];
                        if operand_new == operand {
                            id
                        } else {
                            self.unary(op, operand_new)?
                        }
                    }
                    NodeData::Binary { lhs, op, rhs } => {
                        let (lhs_new, rhs_new) = (rebuilt[&lhs], rebuilt[&rhs]);
                        if lhs_new == lhs && rhs_new == rhs {
                            id
                        } else {
                            self.binary(lhs_new, op, rhs_new)?
                        }
                    }
                    NodeData::Annotation { kind, inner } => {
                        let inner_new = rebuilt[&inner];
                        if inner_new == inner {
                            id
                        } else {
                            self.annotate(kind, inner_new)?
                        }
                    }
                    NodeData::Shader(_) => return Err(GraphError::NotAnExpression(id)),
                }
            };
            rebuilt.insert(id, new_id);
        }

        rebuilt.get(&root).copied().ok_or(GraphError::UnknownNode(root))
    }
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

fn join_interface(items: &[crate::shader::Interface]) -> String {
    items
        .iter()
        .map(|item| format!("{}:{}", item.name, item.ty))
        .collect::<Vec<_>>()
        .join(",")
}
