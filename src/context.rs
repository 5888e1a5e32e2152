//! 求值上下文：作用域帧链、数学模式与括号/calc 状态。

use std::fmt;
use std::mem;
use std::rc::Rc;

use crate::error::{LessError, LessResult};
use crate::functions::FunctionRegistry;
use crate::output::CssOptions;
use crate::tree::{Declaration, FileInfo, Keyword, Node, Op, Ruleset, Selector};
use crate::CompileOptions;

/// 运算符何时参与计算。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MathMode {
    /// 总是计算。
    Always,
    /// 除 `/` 之外总是计算，`/` 只在括号内计算。
    #[default]
    ParensDivision,
    /// 只在括号内计算。
    Strict,
}

impl MathMode {
    pub fn parse(text: &str) -> Option<MathMode> {
        match text.trim().to_ascii_lowercase().as_str() {
            "always" | "0" => Some(MathMode::Always),
            "parens-division" | "1" => Some(MathMode::ParensDivision),
            "parens" | "strict" | "2" => Some(MathMode::Strict),
            _ => None,
        }
    }
}

/// 作用域链中的一层：规则集及其函数表。
#[derive(Debug, Clone)]
pub struct Frame {
    pub ruleset: Rc<Ruleset>,
    pub registry: FunctionRegistry,
}

/// `default()` 的求值结果，只在匹配 mixin 守卫期间存在。
#[derive(Debug, Clone, Default)]
pub struct DefaultFunc {
    value: Option<bool>,
    error: Option<LessError>,
}

impl DefaultFunc {
    pub fn with_value(value: bool) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    pub fn with_error(error: LessError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    pub fn eval(&self) -> LessResult<Option<Node>> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(self.value.map(|value| Node::Keyword(Keyword::boolean(value))))
    }
}

/// 重新解析插值选择器的前端接口。
pub trait NodeParser: fmt::Debug {
    fn parse_selectors(
        &self,
        text: &str,
        index: Option<usize>,
        file_info: Option<Rc<FileInfo>>,
    ) -> LessResult<Vec<Selector>>;
}

#[derive(Debug)]
pub struct EvalContext {
    /// 最内层在前。
    frames: Vec<Frame>,
    pub math: MathMode,
    pub strict_units: bool,
    pub compress: bool,
    pub num_precision: usize,
    pub strict_imports: bool,
    pub math_on: bool,
    parens_stack: Vec<bool>,
    calc_stack: Vec<bool>,
    in_calc: bool,
    /// 每个声明求值时压入一层，记录其中引用的变量是否带 `!important`。
    pub important_scope: Vec<bool>,
    pub default_func: Option<DefaultFunc>,
    evaluating: Vec<String>,
    global_registry: FunctionRegistry,
    pub parser: Option<Rc<dyn NodeParser>>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            math: MathMode::default(),
            strict_units: false,
            compress: false,
            num_precision: 8,
            strict_imports: false,
            math_on: true,
            parens_stack: Vec::new(),
            calc_stack: Vec::new(),
            in_calc: false,
            important_scope: Vec::new(),
            default_func: None,
            evaluating: Vec::new(),
            global_registry: FunctionRegistry::global(),
            parser: None,
        }
    }
}

impl EvalContext {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            math: options.math,
            strict_units: options.strict_units,
            compress: options.minify,
            num_precision: options.num_precision,
            strict_imports: options.strict_imports,
            ..Self::default()
        }
    }

    pub fn css_options(&self) -> CssOptions {
        CssOptions {
            compress: self.compress,
            strict_units: self.strict_units,
            num_precision: self.num_precision,
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// 进入规则集，函数表继承自当前最内层。
    pub fn push_frame(&mut self, ruleset: Rc<Ruleset>) {
        let registry = self.function_registry().inherit();
        self.frames.insert(0, Frame { ruleset, registry });
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.remove(0))
        }
    }

    pub fn innermost_mut(&mut self) -> Option<&mut Rc<Ruleset>> {
        self.frames.first_mut().map(|frame| &mut frame.ruleset)
    }

    pub fn function_registry(&self) -> FunctionRegistry {
        self.frames
            .first()
            .map(|frame| frame.registry.clone())
            .unwrap_or_else(|| self.global_registry.clone())
    }

    /// 由内向外查找变量声明，最内层优先。
    pub fn variable(&self, name: &str) -> Option<Declaration> {
        self.frames
            .iter()
            .find_map(|frame| frame.ruleset.variable(name))
    }

    /// 返回第一个含有该属性的帧中的全部同名声明。
    pub fn property(&self, name: &str) -> Option<Vec<Declaration>> {
        self.frames.iter().find_map(|frame| {
            let found = frame.ruleset.property(name);
            (!found.is_empty()).then_some(found)
        })
    }

    pub fn is_math_on(&self, op: Option<Op>) -> bool {
        if !self.math_on {
            return false;
        }
        if op == Some(Op::Div) && self.math != MathMode::Always && self.parens_stack.is_empty() {
            return false;
        }
        if self.math == MathMode::Strict {
            return !self.parens_stack.is_empty();
        }
        true
    }

    pub fn in_parenthesis(&mut self) {
        self.parens_stack.push(true);
    }

    pub fn out_of_parenthesis(&mut self) {
        self.parens_stack.pop();
    }

    pub fn enter_calc(&mut self) {
        self.calc_stack.push(true);
        self.in_calc = true;
    }

    pub fn exit_calc(&mut self) {
        self.calc_stack.pop();
        if self.calc_stack.is_empty() {
            self.in_calc = false;
        }
    }

    pub fn in_calc(&self) -> bool {
        self.in_calc
    }

    /// 标记变量（或属性）开始求值；已在求值中说明存在循环引用。
    pub fn begin_evaluating(&mut self, name: &str) -> bool {
        if self.evaluating.iter().any(|current| current == name) {
            return false;
        }
        self.evaluating.push(name.to_string());
        true
    }

    pub fn end_evaluating(&mut self, name: &str) {
        if let Some(pos) = self.evaluating.iter().rposition(|current| current == name) {
            self.evaluating.remove(pos);
        }
    }

    /// 记录当前声明引用了 `!important` 变量。
    pub fn mark_important(&mut self) {
        if let Some(last) = self.important_scope.last_mut() {
            *last = true;
        }
    }

    /// 在另一组帧上求值，数学与括号状态重置为初始值，结束后恢复。
    pub fn with_frames<T, F>(&mut self, frames: Vec<Frame>, f: F) -> LessResult<T>
    where
        F: FnOnce(&mut EvalContext) -> LessResult<T>,
    {
        let saved_frames = mem::replace(&mut self.frames, frames);
        let saved_math_on = mem::replace(&mut self.math_on, true);
        let saved_parens = mem::take(&mut self.parens_stack);
        let saved_calc = mem::take(&mut self.calc_stack);
        let saved_in_calc = mem::replace(&mut self.in_calc, false);
        let result = f(self);
        self.frames = saved_frames;
        self.math_on = saved_math_on;
        self.parens_stack = saved_parens;
        self.calc_stack = saved_calc;
        self.in_calc = saved_in_calc;
        result
    }

    /// 安装 `default()` 状态执行闭包，结束后恢复原状态。
    pub fn with_default_func<T, F>(&mut self, state: Option<DefaultFunc>, f: F) -> T
    where
        F: FnOnce(&mut EvalContext) -> T,
    {
        let saved = mem::replace(&mut self.default_func, state);
        let result = f(self);
        self.default_func = saved;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Dimension;

    fn ruleset_with(name: &str, value: f64) -> Rc<Ruleset> {
        let decl = Declaration::variable(name, Node::Dimension(Dimension::number(value)));
        Rc::new(Ruleset::new(None, vec![Node::Declaration(decl)]))
    }

    #[test]
    fn inner_frame_shadows_outer() {
        let mut ctx = EvalContext::default();
        ctx.push_frame(ruleset_with("@x", 1.0));
        ctx.push_frame(ruleset_with("@x", 2.0));
        let decl = ctx.variable("@x").unwrap();
        assert_eq!(decl.value.as_dimension().unwrap().value, 2.0);
        ctx.pop_frame();
        let decl = ctx.variable("@x").unwrap();
        assert_eq!(decl.value.as_dimension().unwrap().value, 1.0);
    }

    #[test]
    fn math_modes() {
        let mut ctx = EvalContext::default();
        assert!(ctx.is_math_on(Some(Op::Add)));
        assert!(!ctx.is_math_on(Some(Op::Div)));
        ctx.in_parenthesis();
        assert!(ctx.is_math_on(Some(Op::Div)));
        ctx.out_of_parenthesis();

        ctx.math = MathMode::Strict;
        assert!(!ctx.is_math_on(Some(Op::Add)));
        ctx.in_parenthesis();
        assert!(ctx.is_math_on(Some(Op::Add)));
        ctx.out_of_parenthesis();

        ctx.math = MathMode::Always;
        assert!(ctx.is_math_on(Some(Op::Div)));
        ctx.math_on = false;
        assert!(!ctx.is_math_on(Some(Op::Add)));
    }

    #[test]
    fn calc_stack_nests() {
        let mut ctx = EvalContext::default();
        ctx.enter_calc();
        ctx.enter_calc();
        ctx.exit_calc();
        assert!(ctx.in_calc());
        ctx.exit_calc();
        assert!(!ctx.in_calc());
    }

    #[test]
    fn with_frames_restores_state() {
        let mut ctx = EvalContext::default();
        ctx.push_frame(ruleset_with("@x", 1.0));
        ctx.math_on = false;
        let seen = ctx
            .with_frames(Vec::new(), |inner| {
                assert!(inner.math_on);
                Ok(inner.variable("@x").is_some())
            })
            .unwrap();
        assert!(!seen);
        assert!(!ctx.math_on);
        assert!(ctx.variable("@x").is_some());
    }

    #[test]
    fn child_registry_does_not_leak_into_parent() {
        let mut ctx = EvalContext::default();
        ctx.push_frame(ruleset_with("@x", 1.0));
        let outer = ctx.function_registry();
        ctx.push_frame(ruleset_with("@y", 1.0));
        ctx.function_registry().add(
            "only-inner",
            crate::functions::LessFunction::new(|_, _| Ok(None)),
        );
        assert!(ctx.function_registry().get("only-inner").is_some());
        assert!(outer.get("only-inner").is_none());
    }

    #[test]
    fn math_mode_names() {
        assert_eq!(MathMode::parse("always"), Some(MathMode::Always));
        assert_eq!(MathMode::parse("strict"), Some(MathMode::Strict));
        assert_eq!(MathMode::parse("nope"), None);
    }
}
