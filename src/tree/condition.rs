use std::cmp::Ordering;

use super::{Node, NodeInfo};
use crate::context::EvalContext;
use crate::error::LessResult;
use crate::output::{CssOptions, Output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    And,
    Or,
    Lt,
    Gt,
    Eq,
    Ge,
    Le,
}

impl ConditionOp {
    pub fn parse(text: &str) -> Option<ConditionOp> {
        match text {
            "and" => Some(ConditionOp::And),
            "or" => Some(ConditionOp::Or),
            "<" => Some(ConditionOp::Lt),
            ">" => Some(ConditionOp::Gt),
            "=" => Some(ConditionOp::Eq),
            ">=" => Some(ConditionOp::Ge),
            "<=" | "=<" => Some(ConditionOp::Le),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionOp::And => "and",
            ConditionOp::Or => "or",
            ConditionOp::Lt => "<",
            ConditionOp::Gt => ">",
            ConditionOp::Eq => "=",
            ConditionOp::Ge => ">=",
            ConditionOp::Le => "<=",
        }
    }
}

/// 守卫条件，例如 `(@a > 0) and not (@b = true)`。
#[derive(Debug, Clone)]
pub struct Condition {
    pub op: ConditionOp,
    pub lvalue: Box<Node>,
    pub rvalue: Box<Node>,
    pub negate: bool,
    pub info: NodeInfo,
}

impl Condition {
    pub fn new(op: ConditionOp, lvalue: Node, rvalue: Node, negate: bool) -> Self {
        Self {
            op,
            lvalue: Box::new(lvalue),
            rvalue: Box::new(rvalue),
            negate,
            info: NodeInfo::default(),
        }
    }

    pub fn eval_bool(&self, ctx: &mut EvalContext) -> LessResult<bool> {
        let result = match self.op {
            ConditionOp::And => evaluate_guard(&self.lvalue, ctx)? && evaluate_guard(&self.rvalue, ctx)?,
            ConditionOp::Or => evaluate_guard(&self.lvalue, ctx)? || evaluate_guard(&self.rvalue, ctx)?,
            op => {
                let a = self.lvalue.eval(ctx)?;
                let b = self.rvalue.eval(ctx)?;
                match Node::compare(&a, &b) {
                    Some(Ordering::Less) => matches!(op, ConditionOp::Lt | ConditionOp::Le),
                    Some(Ordering::Equal) => {
                        matches!(op, ConditionOp::Eq | ConditionOp::Ge | ConditionOp::Le)
                    }
                    Some(Ordering::Greater) => matches!(op, ConditionOp::Gt | ConditionOp::Ge),
                    None => false,
                }
            }
        };
        Ok(result != self.negate)
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        if self.negate {
            output.add("not ", None, None);
        }
        self.lvalue.gen_css(opts, output)?;
        output.add(&format!(" {} ", self.op.as_str()), None, None);
        self.rvalue.gen_css(opts, output)
    }
}

/// 守卫求值：条件节点直接求布尔值，其它节点求值后看是否为 `true`。
pub(crate) fn evaluate_guard(node: &Node, ctx: &mut EvalContext) -> LessResult<bool> {
    match node {
        Node::Condition(condition) => condition.eval_bool(ctx),
        other => Ok(other.eval(ctx)?.is_truthy()),
    }
}
