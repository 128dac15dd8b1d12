//! 求值器 - 在给定变量绑定下计算表达式的数值
//!
//! 用于脱离文本生成测试图的语义。矩阵按列主序存储：
//! 元素 (r, c) 位于 `c * rows + r`，与着色语言一致。

use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::graph::{BinaryOp, NodeId, NodeManager, UnaryOp};
use crate::types::ValueType;
use crate::visit::{walk, CacheStats, ExprVisitor, Memo, Operand};

/// 变量名 -> 分量
pub type Bindings = HashMap<String, Vec<f64>>;

/// 一次性求值
pub fn evaluate(manager: &NodeManager, root: NodeId, bindings: &Bindings) -> Result<Vec<f64>> {
    walk(manager, root, &mut Arithmetic { bindings }, &mut Memo::new())
}

/// 带缓存的求值器
///
/// 缓存只对当前绑定和当前节点池有效：`bind` 会清空缓存，换一个 NodeManager 也会
#[derive(Debug, Default)]
pub struct Evaluator {
    bindings: Bindings,
    memo: Memo<Vec<f64>>,
}

impl Evaluator {
    pub fn new(bindings: Bindings) -> Self {
        Evaluator {
            bindings,
            memo: Memo::new(),
        }
    }

    pub fn bind(&mut self, name: &str, value: Vec<f64>) {
        self.bindings.insert(name.to_string(), value);
        self.memo.clear();
    }

    pub fn evaluate(&mut self, manager: &NodeManager, root: NodeId) -> Result<Vec<f64>> {
        let mut arithmetic = Arithmetic {
            bindings: &self.bindings,
        };
        walk(manager, root, &mut arithmetic, &mut self.memo)
    }

    pub fn stats(&self) -> CacheStats {
        self.memo.stats()
    }
}

struct Arithmetic<'a> {
    bindings: &'a Bindings,
}

impl ExprVisitor for Arithmetic<'_> {
    type Output = Vec<f64>;
    const ACTION: &'static str = "evaluating";

    fn constant(&mut self, _ty: ValueType, values: &[f64]) -> Result<Vec<f64>> {
        Ok(values.to_vec())
    }

    fn variable(&mut self, ty: ValueType, name: &str) -> Result<Vec<f64>> {
        let value = self
            .bindings
            .get(name)
            .ok_or_else(|| GraphError::UnboundVariable(name.to_string()))?;

        if value.len() != ty.length() {
            return Err(GraphError::BindingArity {
                name: name.to_string(),
                ty,
                expected: ty.length(),
                found: value.len(),
            });
        }
        Ok(value.clone())
    }

    fn unary(&mut self, op: UnaryOp, operand: Operand<'_, Vec<f64>>) -> Result<Vec<f64>> {
        let value = operand.value;
        Ok(match op {
            UnaryOp::Neg => value.iter().map(|x| -x).collect(),
            UnaryOp::Abs => value.iter().map(|x| x.abs()).collect(),
            UnaryOp::Length => vec![value.iter().map(|x| x * x).sum::<f64>().sqrt()],
        })
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        ty: ValueType,
        lhs: Operand<'_, Vec<f64>>,
        rhs: Operand<'_, Vec<f64>>,
    ) -> Result<Vec<f64>> {
        let (a, b) = (lhs.value, rhs.value);

        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => {
                let f = elementwise(op);
                Ok(broadcast(ty, lhs, rhs, f))
            }
            BinaryOp::Mul => {
                if lhs.ty.is_vector() && rhs.ty.is_vector() && rhs.ty.length() < ty.length() {
                    // Hadamard 乘积取左侧类型，右侧分量不够时没有定义
                    Err(GraphError::TypeMismatch {
                        op,
                        left: lhs.ty,
                        right: rhs.ty,
                    })
                } else if lhs.ty.is_scalar() || rhs.ty.is_scalar() || (lhs.ty.is_vector() && rhs.ty.is_vector()) {
                    Ok(broadcast(ty, lhs, rhs, |x, y| x * y))
                } else {
                    Ok(matmul(lhs.ty, a, rhs.ty, b, ty))
                }
            }
            BinaryOp::Dot => Ok(vec![a.iter().zip(b).map(|(x, y)| x * y).sum()]),
            BinaryOp::Cross => Ok(vec![
                a[1] * b[2] - a[2] * b[1],
                a[2] * b[0] - a[0] * b[2],
                a[0] * b[1] - a[1] * b[0],
            ]),
        }
    }
}

fn elementwise(op: BinaryOp) -> fn(f64, f64) -> f64 {
    match op {
        BinaryOp::Add => |x, y| x + y,
        BinaryOp::Sub => |x, y| x - y,
        BinaryOp::Div => |x, y| x / y,
        // 着色语言的 mod：x - y * floor(x / y)
        _ => |x, y| x - y * (x / y).floor(),
    }
}

/// 逐分量运算：标量一侧广播到结果的每个分量
fn broadcast(
    ty: ValueType,
    lhs: Operand<'_, Vec<f64>>,
    rhs: Operand<'_, Vec<f64>>,
    f: impl Fn(f64, f64) -> f64,
) -> Vec<f64> {
    let component = |operand: &Operand<'_, Vec<f64>>, i: usize| {
        if operand.ty.is_scalar() {
            operand.value[0]
        } else {
            operand.value[i]
        }
    };
    (0..ty.length())
        .map(|i| f(component(&lhs, i), component(&rhs, i)))
        .collect()
}

/// 列主序矩阵乘法（也覆盖 matN * vecN）
fn matmul(lt: ValueType, a: &[f64], rt: ValueType, b: &[f64], out: ValueType) -> Vec<f64> {
    let (rows, inner) = lt.dims();
    let cols = rt.cols();
    let mut output = vec![0.0; out.length()];

    for j in 0..cols {
        for i in 0..rows {
            output[j * rows + i] = (0..inner).map(|k| a[k * rows + i] * b[j * inner + k]).sum();
        }
    }
    output
}
