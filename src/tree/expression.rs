use super::{Anonymous, Dimension, Node, NodeInfo};
use crate::context::{EvalContext, MathMode};
use crate::error::{LessError, LessResult};
use crate::output::{CssOptions, Output};

/// 二元运算符。`./` 是显式除法，即使在括号外也参与计算。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    DotDiv,
}

impl Op {
    pub fn parse(text: &str) -> Option<Op> {
        match text.trim() {
            "+" => Some(Op::Add),
            "-" => Some(Op::Sub),
            "*" => Some(Op::Mul),
            "/" => Some(Op::Div),
            "./" => Some(Op::DotDiv),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::DotDiv => "./",
        }
    }

    pub fn is_division(self) -> bool {
        matches!(self, Op::Div | Op::DotDiv)
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div | Op::DotDiv => a / b,
        }
    }
}

/// 空格分隔的值序列，例如 `1px solid red`。
#[derive(Debug, Clone)]
pub struct Expression {
    pub value: Vec<Node>,
    /// 源码中被括号包裹。
    pub parens: bool,
    /// 括号位于运算表达式内部。
    pub parens_in_op: bool,
    pub no_spacing: bool,
    pub info: NodeInfo,
}

impl Expression {
    pub fn new(value: Vec<Node>) -> Self {
        Self {
            value,
            parens: false,
            parens_in_op: false,
            no_spacing: false,
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        let math_on = ctx.is_math_on(None);
        let mut double_paren = false;
        if self.parens {
            ctx.in_parenthesis();
        }
        let result = match self.value.len() {
            0 => Ok(Node::Expression(self.clone())),
            1 => {
                let only = &self.value[0];
                if only.parens() && !only.parens_in_op() && !ctx.in_calc() {
                    double_paren = true;
                }
                only.eval(ctx)
            }
            _ => self
                .value
                .iter()
                .map(|item| item.eval(ctx))
                .collect::<LessResult<Vec<_>>>()
                .map(|value| {
                    Node::Expression(Expression {
                        value,
                        parens: false,
                        parens_in_op: false,
                        no_spacing: self.no_spacing,
                        info: self.info.clone(),
                    })
                }),
        };
        if self.parens {
            ctx.out_of_parenthesis();
        }
        let result = result?;
        if self.parens && self.parens_in_op && !math_on && !double_paren && !result.is_dimension() {
            return Ok(Node::Paren(Paren::new(result)));
        }
        Ok(result)
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        for (i, item) in self.value.iter().enumerate() {
            item.gen_css(opts, output)?;
            if self.no_spacing {
                continue;
            }
            if let Some(next) = self.value.get(i + 1) {
                let comma = matches!(next, Node::Anonymous(Anonymous { value, .. }) if value == ",");
                if !comma {
                    output.add(" ", None, None);
                }
            }
        }
        Ok(())
    }
}

/// 逗号分隔的列表。
#[derive(Debug, Clone)]
pub struct Value {
    pub value: Vec<Node>,
    pub info: NodeInfo,
}

impl Value {
    pub fn new(value: Vec<Node>) -> Self {
        Self {
            value,
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        if self.value.len() == 1 {
            return self.value[0].eval(ctx);
        }
        let value = self
            .value
            .iter()
            .map(|item| item.eval(ctx))
            .collect::<LessResult<Vec<_>>>()?;
        Ok(Node::Value(Value {
            value,
            info: self.info.clone(),
        }))
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        let separator = if opts.compress { "," } else { ", " };
        for (i, item) in self.value.iter().enumerate() {
            item.gen_css(opts, output)?;
            if i + 1 < self.value.len() {
                output.add(separator, None, None);
            }
        }
        Ok(())
    }
}

/// 求值后保留下来的括号。
#[derive(Debug, Clone)]
pub struct Paren {
    pub value: Box<Node>,
    pub info: NodeInfo,
}

impl Paren {
    pub fn new(value: Node) -> Self {
        Self {
            value: Box::new(value),
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Paren> {
        Ok(Paren {
            value: Box::new(self.value.eval(ctx)?),
            info: self.info.clone(),
        })
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        output.add("(", self.info.file_info(), self.info.index);
        self.value.gen_css(opts, output)?;
        output.add(")", None, None);
        Ok(())
    }
}

/// 一元负号，例如 `-@x`。
#[derive(Debug, Clone)]
pub struct Negative {
    pub value: Box<Node>,
    pub info: NodeInfo,
}

impl Negative {
    pub fn new(value: Node) -> Self {
        Self {
            value: Box::new(value),
            info: NodeInfo::default(),
        }
    }

    /// 数学开启时改写为 `-1 * value`，否则保留负号。
    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        if ctx.is_math_on(None) {
            let operation = Operation::new(
                Op::Mul,
                Node::Dimension(Dimension::number(-1.0)),
                (*self.value).clone(),
                false,
            );
            return operation.eval(ctx);
        }
        Ok(Node::Negative(Negative {
            value: Box::new(self.value.eval(ctx)?),
            info: self.info.clone(),
        }))
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        output.add("-", self.info.file_info(), self.info.index);
        self.value.gen_css(opts, output)
    }
}

/// 二元运算。
#[derive(Debug, Clone)]
pub struct Operation {
    pub op: Op,
    pub left: Box<Node>,
    pub right: Box<Node>,
    /// 运算符两侧是否有空白，决定输出格式。
    pub is_spaced: bool,
    pub info: NodeInfo,
}

impl Operation {
    pub fn new(op: Op, left: Node, right: Node, is_spaced: bool) -> Self {
        Self {
            op,
            left: Box::new(left),
            right: Box::new(right),
            is_spaced,
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        let mut a = self.left.eval(ctx)?;
        let mut b = self.right.eval(ctx)?;
        if !ctx.is_math_on(Some(self.op)) {
            return Ok(self.rewrap(a, b));
        }
        let op = if self.op == Op::DotDiv { Op::Div } else { self.op };
        if let (Node::Dimension(dim), Node::Color(_)) = (&a, &b) {
            a = Node::Color(dim.to_color());
        }
        if let (Node::Color(_), Node::Dimension(dim)) = (&a, &b) {
            b = Node::Color(dim.to_color());
        }
        let located = |err: LessError| err.with_location(self.info.index, self.info.file_info());
        match (&a, &b) {
            (Node::Dimension(left), Node::Dimension(right)) => {
                let mut result = left.operate(ctx, op, right).map_err(located)?;
                result.info = self.info.clone();
                return Ok(Node::Dimension(result));
            }
            (Node::Color(left), Node::Color(right)) => {
                let mut result = left.operate(op, right);
                result.info = self.info.clone();
                return Ok(Node::Color(result));
            }
            _ => {}
        }
        let pending_division = [&a, &b]
            .iter()
            .any(|node| matches!(node, Node::Operation(inner) if inner.op == Op::Div));
        if pending_division && ctx.math == MathMode::ParensDivision {
            return Ok(self.rewrap(a, b));
        }
        Err(located(LessError::operation("无法对该类型执行运算")))
    }

    fn rewrap(&self, left: Node, right: Node) -> Node {
        Node::Operation(Operation {
            op: self.op,
            left: Box::new(left),
            right: Box::new(right),
            is_spaced: self.is_spaced,
            info: self.info.clone(),
        })
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        self.left.gen_css(opts, output)?;
        if self.is_spaced {
            output.add(" ", None, None);
        }
        output.add(self.op.as_str(), self.info.file_info(), self.info.index);
        if self.is_spaced {
            output.add(" ", None, None);
        }
        self.right.gen_css(opts, output)
    }
}
