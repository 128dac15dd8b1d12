//! 着色器程序与源码装配
//!
//! `ShaderProgram` 是单个阶段的定义：输入、uniform 和按名字排序的输出表。
//! `Assembler` 把它装配成目标方言的完整源码文本：
//!
//! ```text
//! #version 100
//! precision highp float;
//! attribute vec2 a_Attribute0;
//! varying vec2 v_Varying0;
//! void main(void) {
//!   v_Varying0 = a_Attribute0;
//!   gl_Position = vec4(a_Attribute0, 0.0, 1.0);
//! }
//! ```
//!
//! 相同的 (阶段, 输入, uniform, 输出, 方言) 总是得到逐字节相同的文本。

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::format::Formatter;
use crate::graph::{NodeId, NodeManager};
use crate::types::ValueType;

/// 着色阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderKind::Vertex => f.write_str("vertex"),
            ShaderKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// 声明的接口变量（输入或 uniform）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interface {
    pub name: String,
    pub ty: ValueType,
}

impl Interface {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Interface {
            name: name.into(),
            ty,
        }
    }
}

/// 单个阶段的程序定义
///
/// 输入和 uniform 保持声明顺序；输出用 BTreeMap，按名字字典序遍历，
/// 与插入顺序无关。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderProgram {
    pub kind: ShaderKind,
    pub inputs: Vec<Interface>,
    pub uniforms: Vec<Interface>,
    pub outputs: BTreeMap<String, NodeId>,
}

impl ShaderProgram {
    pub fn new(kind: ShaderKind) -> Self {
        ShaderProgram {
            kind,
            inputs: Vec::new(),
            uniforms: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.inputs.push(Interface::new(name, ty));
        self
    }

    pub fn with_uniform(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.uniforms.push(Interface::new(name, ty));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, expr: NodeId) -> Self {
        self.outputs.insert(name.into(), expr);
        self
    }

    /// 每个输出拆成一个独立程序，输入和 uniform 原样保留
    pub fn split_outputs(&self) -> Vec<ShaderProgram> {
        self.outputs
            .iter()
            .map(|(name, &expr)| ShaderProgram {
                kind: self.kind,
                inputs: self.inputs.clone(),
                uniforms: self.uniforms.clone(),
                outputs: BTreeMap::from([(name.clone(), expr)]),
            })
            .collect()
    }
}

// =============================================================================
// 配置
// =============================================================================

/// 目标方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// attribute / varying，片元输出写 gl_FragColor
    #[default]
    #[serde(rename = "glsl100")]
    Legacy,
    /// in / out
    #[serde(rename = "glsl300es")]
    Modern,
}

impl Dialect {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "glsl100" => Some(Dialect::Legacy),
            "glsl300es" => Some(Dialect::Modern),
            _ => None,
        }
    }

    /// 源码第一行
    pub fn marker(self) -> &'static str {
        match self {
            Dialect::Legacy => "#version 100",
            Dialect::Modern => "#version 300 es",
        }
    }

    fn input_qualifier(self, kind: ShaderKind) -> &'static str {
        match (self, kind) {
            (Dialect::Legacy, ShaderKind::Vertex) => "attribute",
            (Dialect::Legacy, ShaderKind::Fragment) => "varying",
            (Dialect::Modern, _) => "in",
        }
    }

    fn output_qualifier(self) -> &'static str {
        match self {
            Dialect::Legacy => "varying",
            Dialect::Modern => "out",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Legacy => f.write_str("glsl100"),
            Dialect::Modern => f.write_str("glsl300es"),
        }
    }
}

/// 默认浮点精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Precision {
    #[serde(rename = "lowp")]
    Low,
    #[serde(rename = "mediump")]
    Medium,
    #[default]
    #[serde(rename = "highp")]
    High,
}

impl Precision {
    pub fn keyword(self) -> &'static str {
        match self {
            Precision::Low => "lowp",
            Precision::Medium => "mediump",
            Precision::High => "highp",
        }
    }
}

/// 映射到阶段内建变量的输出名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservedNames {
    /// 顶点阶段必需，写入 gl_Position
    pub position: String,
    /// 旧方言片元阶段必需，写入 gl_FragColor
    pub color: String,
}

impl Default for ReservedNames {
    fn default() -> Self {
        ReservedNames {
            position: "o_Position".to_string(),
            color: "o_Color".to_string(),
        }
    }
}

/// 源码生成选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitOptions {
    pub dialect: Dialect,
    pub precision: Precision,
    pub reserved: ReservedNames,
}

impl EmitOptions {
    pub fn new(dialect: Dialect) -> Self {
        EmitOptions {
            dialect,
            ..Default::default()
        }
    }
}

// =============================================================================
// 装配
// =============================================================================

/// 源码装配器
///
/// 内部的 Formatter 缓存跨程序共享：顶点和片元阶段引用的同一子表达式只格式化一次。
#[derive(Debug, Default)]
pub struct Assembler {
    formatter: Formatter,
    options: EmitOptions,
}

impl Assembler {
    pub fn new(options: EmitOptions) -> Self {
        Assembler {
            formatter: Formatter::new(),
            options,
        }
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    /// 装配池中的着色器节点
    pub fn assemble_node(&mut self, manager: &NodeManager, id: NodeId) -> Result<String> {
        let program = manager.shader_program(id)?;
        self.assemble(manager, program)
    }

    /// 装配完整源码
    ///
    /// 失败时不产生任何部分输出
    pub fn assemble(&mut self, manager: &NodeManager, program: &ShaderProgram) -> Result<String> {
        let dialect = self.options.dialect;
        let reserved = self.options.reserved.clone();

        // 内建输出：顶点阶段的 position，以及旧方言片元阶段的 color
        let builtin = match (program.kind, dialect) {
            (ShaderKind::Vertex, _) => Some((&reserved.position, "gl_Position")),
            (ShaderKind::Fragment, Dialect::Legacy) => Some((&reserved.color, "gl_FragColor")),
            (ShaderKind::Fragment, Dialect::Modern) => None,
        };
        let builtin_expr = match builtin {
            Some((name, _)) => Some(program.outputs.get(name.as_str()).copied().ok_or_else(
                || GraphError::MissingReservedOutput {
                    stage: program.kind,
                    name: name.clone(),
                },
            )?),
            None => None,
        };

        let mut declarations = Vec::new();
        let mut body = Vec::new();

        let input_qualifier = dialect.input_qualifier(program.kind);
        for input in &program.inputs {
            declarations.push(format!("{} {} {};", input_qualifier, input.ty, input.name));
        }
        for uniform in &program.uniforms {
            declarations.push(format!("uniform {} {};", uniform.ty, uniform.name));
        }

        for (name, &expr) in &program.outputs {
            if builtin.is_some_and(|(reserved_name, _)| reserved_name == name) {
                continue;
            }
            let ty = manager.type_of(expr)?;
            let text = self.formatter.format(manager, expr)?;

            if program.kind == ShaderKind::Fragment && dialect == Dialect::Legacy {
                // 旧方言片元阶段没有用户声明的输出
                body.push(format!("{} {} = {};", ty, name, text));
            } else {
                declarations.push(format!("{} {} {};", dialect.output_qualifier(), ty, name));
                body.push(format!("{} = {};", name, text));
            }
        }

        if let (Some((_, target)), Some(expr)) = (builtin, builtin_expr) {
            let text = self.formatter.format(manager, expr)?;
            body.push(format!("{} = {};", target, text));
        }

        let mut source = String::new();
        let _ = writeln!(source, "{}", dialect.marker());
        let _ = writeln!(source, "precision {} float;", self.options.precision.keyword());
        for line in &declarations {
            let _ = writeln!(source, "{}", line);
        }
        source.push_str("void main(void) {\n");
        for line in &body {
            let _ = writeln!(source, "  {}", line);
        }
        source.push_str("}\n");

        debug!(
            stage = %program.kind,
            dialect = %dialect,
            bytes = source.len(),
            "assembled shader"
        );
        Ok(source)
    }
}
