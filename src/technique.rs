//! Technique - 分阶段改写
//!
//! 一个 Technique 由位置表达式和颜色表达式组成。颜色表达式里的注解决定了
//! 哪些子表达式要搬到顶点阶段计算、哪些要作为 uniform 由外部提供：
//!
//! 1. `Fragment(e)`：e 在顶点阶段计算，经 varying `v_Varying<i>` 传给片元阶段
//! 2. `Uniform(e)`：片元阶段声明 uniform `u_Uniform<i>`
//! 3. 顶点阶段里的 `Attribute(e)` / `Uniform(e)` 再由 `lift_vertex_inputs`
//!    变成顶点输入 `a_Attribute<i>` 和顶点 uniform
//!
//! 所有改写都经由 NodeManager 重建，原图不变。

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::{AnnotationKind, NodeData, NodeId, NodeManager};
use crate::shader::{Assembler, EmitOptions, Interface, ReservedNames, ShaderKind, ShaderProgram};

/// 位置 + 颜色表达式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Technique {
    pub position: NodeId,
    pub color: NodeId,
}

/// 分阶段后的两个程序定义
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDefinitions {
    pub vertex: ShaderProgram,
    pub fragment: ShaderProgram,
    /// 接口名 -> 为它提供数据的表达式（注解包装的那个子表达式）
    ///
    /// 只包含 attribute 和 uniform；varying 的来源就是顶点输出。
    pub bindings: BTreeMap<String, NodeId>,
    /// uniform 注解节点 -> 已分配的名字，两个阶段共用
    uniform_names: HashMap<NodeId, String>,
}

/// 编译结果：两个着色器节点及其源码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTechnique {
    pub vertex: NodeId,
    pub fragment: NodeId,
    pub vertex_source: String,
    pub fragment_source: String,
}

impl Technique {
    pub fn new(position: NodeId, color: NodeId) -> Self {
        Technique { position, color }
    }

    /// 把两个根都标记为存活
    pub fn mark(&self, manager: &mut NodeManager) -> Result<()> {
        manager.mark(self.position)?;
        manager.mark(self.color)
    }

    /// 拆分为顶点/片元两个阶段
    ///
    /// 同一个注解节点无论被引用多少次都只占一个接口槽位；
    /// 图中不存在的注解不会被访问。
    ///
    /// 嵌套的 `Fragment(Fragment(x))` 占两个槽位：外层改写后内层已不在颜色图中，
    /// 但它仍是一个不同的 Fragment 节点，片元输入数始终等于不同 Fragment 节点数。
    pub fn split(&self, manager: &mut NodeManager, reserved: &ReservedNames) -> Result<StageDefinitions> {
        let mut vertex = ShaderProgram::new(ShaderKind::Vertex);
        let mut fragment = ShaderProgram::new(ShaderKind::Fragment);
        let mut bindings = BTreeMap::new();
        let mut uniform_names = HashMap::new();
        let mut color = self.color;

        let varyings = manager.collect_annotations(color, AnnotationKind::Fragment)?;
        for (i, &annotation) in varyings.iter().enumerate() {
            let name = format!("v_Varying{}", i);
            let ty = manager.type_of(annotation)?;

            vertex.outputs.insert(name.clone(), wrapped(manager, annotation)?);
            fragment.inputs.push(Interface::new(name.clone(), ty));

            let reference = manager.variable(ty, &name);
            color = manager.substitute(color, annotation, reference)?;
        }

        // 在改写后的图上收集：Fragment 内部的 uniform 已经移到顶点阶段
        let uniforms = manager.collect_annotations(color, AnnotationKind::Uniform)?;
        for (i, &annotation) in uniforms.iter().enumerate() {
            let name = format!("u_Uniform{}", i);
            let ty = manager.type_of(annotation)?;

            fragment.uniforms.push(Interface::new(name.clone(), ty));
            bindings.insert(name.clone(), wrapped(manager, annotation)?);
            uniform_names.insert(annotation, name.clone());

            let reference = manager.variable(ty, &name);
            color = manager.substitute(color, annotation, reference)?;
        }

        vertex.outputs.insert(reserved.position.clone(), self.position);
        fragment.outputs.insert(reserved.color.clone(), color);

        debug!(
            varyings = varyings.len(),
            uniforms = uniforms.len(),
            "split technique"
        );

        Ok(StageDefinitions {
            vertex,
            fragment,
            bindings,
            uniform_names,
        })
    }

    /// 拆分、提升顶点输入、装配两个阶段的源码
    pub fn build(&self, manager: &mut NodeManager, options: &EmitOptions) -> Result<CompiledTechnique> {
        let mut stages = self.split(manager, &options.reserved)?;
        stages.lift_vertex_inputs(manager)?;

        let vertex = manager.shader(stages.vertex.clone())?;
        let fragment = manager.shader(stages.fragment.clone())?;

        let mut assembler = Assembler::new(options.clone());
        let vertex_source = assembler.assemble(manager, &stages.vertex)?;
        let fragment_source = assembler.assemble(manager, &stages.fragment)?;

        Ok(CompiledTechnique {
            vertex,
            fragment,
            vertex_source,
            fragment_source,
        })
    }
}

impl StageDefinitions {
    /// 消除顶点阶段输出里的注解
    ///
    /// - `Fragment(e)` 在顶点阶段没有意义，直接换成 e
    /// - 每个不同的 `Attribute` 节点变成顶点输入 `a_Attribute<i>`
    /// - 每个不同的 `Uniform` 节点变成顶点 uniform；片元阶段已有的沿用原名，
    ///   新的接着编号
    pub fn lift_vertex_inputs(&mut self, manager: &mut NodeManager) -> Result<()> {
        let mut attribute_names: HashMap<NodeId, String> = HashMap::new();
        let mut next_uniform = self.uniform_names.len();
        let mut lifted_uniforms = 0;

        let outputs: Vec<(String, NodeId)> = self
            .vertex
            .outputs
            .iter()
            .map(|(name, &expr)| (name.clone(), expr))
            .collect();

        for (output, mut expr) in outputs {
            // 嵌套的 Fragment：每轮至少消掉一个节点
            while let Some(&annotation) = manager
                .collect_annotations(expr, AnnotationKind::Fragment)?
                .first()
            {
                let inner = wrapped(manager, annotation)?;
                expr = manager.substitute(expr, annotation, inner)?;
            }

            for annotation in manager.collect_annotations(expr, AnnotationKind::Attribute)? {
                let ty = manager.type_of(annotation)?;
                let name = match attribute_names.get(&annotation) {
                    Some(name) => name.clone(),
                    None => {
                        let name = format!("a_Attribute{}", attribute_names.len());
                        attribute_names.insert(annotation, name.clone());
                        self.vertex.inputs.push(Interface::new(name.clone(), ty));
                        self.bindings.insert(name.clone(), wrapped(manager, annotation)?);
                        name
                    }
                };
                let reference = manager.variable(ty, &name);
                expr = manager.substitute(expr, annotation, reference)?;
            }

            for annotation in manager.collect_annotations(expr, AnnotationKind::Uniform)? {
                let ty = manager.type_of(annotation)?;
                let name = match self.uniform_names.get(&annotation) {
                    Some(name) => name.clone(),
                    None => {
                        let name = format!("u_Uniform{}", next_uniform);
                        next_uniform += 1;
                        self.uniform_names.insert(annotation, name.clone());
                        self.bindings.insert(name.clone(), wrapped(manager, annotation)?);
                        name
                    }
                };
                if !self.vertex.uniforms.iter().any(|u| u.name == name) {
                    self.vertex.uniforms.push(Interface::new(name.clone(), ty));
                    lifted_uniforms += 1;
                }
                let reference = manager.variable(ty, &name);
                expr = manager.substitute(expr, annotation, reference)?;
            }

            self.vertex.outputs.insert(output, expr);
        }

        debug!(
            attributes = attribute_names.len(),
            uniforms = lifted_uniforms,
            "lifted vertex inputs"
        );
        Ok(())
    }
}

/// 注解包装的子表达式
fn wrapped(manager: &NodeManager, annotation: NodeId) -> Result<NodeId> {
    match manager.get(annotation)? {
        NodeData::Annotation { inner, .. } => Ok(*inner),
        _ => Err(GraphError::NotAnExpression(annotation)),
    }
}
