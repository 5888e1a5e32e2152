use super::{Node, NodeInfo};
use crate::context::EvalContext;
use crate::error::LessResult;
use crate::functions::FunctionCaller;
use crate::output::{CssOptions, Output};

/// 函数调用 `name(args...)`。找不到同名函数时原样输出，参数照常求值。
#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub args: Vec<Node>,
    /// `calc()` 内部不做算术折叠。
    pub calc: bool,
    pub info: NodeInfo,
}

impl Call {
    pub fn new<S: Into<String>>(name: S, args: Vec<Node>) -> Self {
        let name = name.into();
        Self {
            calc: name == "calc",
            name,
            args,
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        let saved_math_on = ctx.math_on;
        ctx.math_on = !self.calc;
        let entered_calc = self.calc || ctx.in_calc();
        if entered_calc {
            ctx.enter_calc();
        }
        let result = self.eval_inner(ctx);
        if entered_calc {
            ctx.exit_calc();
        }
        ctx.math_on = saved_math_on;
        result
    }

    fn eval_inner(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        let caller = FunctionCaller::new(
            &self.name,
            ctx,
            self.info.index,
            self.info.file_info.clone(),
        );
        if caller.is_valid() {
            let called = caller.call(&self.args).map_err(|err| {
                if err.location().is_some_and(|loc| loc.line.is_some()) {
                    return err;
                }
                err.with_location(self.info.index, self.info.file_info())
                    .map_message(|message| format!("函数 `{}` 求值出错: {message}", self.name))
            })?;
            if let Some(mut result) = called {
                let info = result.info_mut();
                info.index = self.info.index;
                info.file_info = self.info.file_info.clone();
                return Ok(result);
            }
        }
        let args = self
            .args
            .iter()
            .map(|arg| arg.eval(ctx))
            .collect::<LessResult<Vec<_>>>()?;
        Ok(Node::Call(Call {
            name: self.name.clone(),
            args,
            calc: self.calc,
            info: self.info.clone(),
        }))
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        output.add(&format!("{}(", self.name), self.info.file_info(), self.info.index);
        for (i, arg) in self.args.iter().enumerate() {
            arg.gen_css(opts, output)?;
            if i + 1 < self.args.len() {
                output.add(", ", None, None);
            }
        }
        output.add(")", None, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LessError;
    use crate::functions::LessFunction;
    use crate::tree::{Dimension, Keyword, Op, Operation, Ruleset};
    use std::rc::Rc;

    fn px(value: f64) -> Node {
        Node::Dimension(Dimension::with_unit(value, "px"))
    }

    #[test]
    fn unknown_function_is_kept_with_evaluated_args() {
        let mut ctx = EvalContext::default();
        ctx.math = crate::context::MathMode::Always;
        let sum = Node::Operation(Operation::new(Op::Add, px(1.0), px(2.0), true));
        let result = Call::new("translate", vec![sum, px(4.0)]).eval(&mut ctx).unwrap();
        assert_eq!(result.to_plain_css(), "translate(3px, 4px)");
    }

    #[test]
    fn calc_keeps_operations() {
        let mut ctx = EvalContext::default();
        let sum = Node::Operation(Operation::new(Op::Add, px(1.0), px(2.0), true));
        let result = Call::new("calc", vec![sum]).eval(&mut ctx).unwrap();
        assert_eq!(result.to_plain_css(), "calc(1px + 2px)");
        assert!(ctx.math_on);
        assert!(!ctx.in_calc());
    }

    #[test]
    fn builtin_result_takes_call_position() {
        let mut ctx = EvalContext::default();
        let mut call = Call::new("percentage", vec![Node::Dimension(Dimension::number(0.25))]);
        call.info.index = Some(12);
        let result = call.eval(&mut ctx).unwrap();
        assert_eq!(result.to_plain_css(), "25%");
        assert_eq!(result.index(), Some(12));
    }

    #[test]
    fn untyped_failures_become_runtime_errors() {
        let mut ctx = EvalContext::default();
        ctx.push_frame(Rc::new(Ruleset::new(None, Vec::new())));
        ctx.function_registry().add(
            "boom",
            LessFunction::new(|_, _| Err(LessError::eval("炸了"))),
        );
        let mut call = Call::new("boom", Vec::new());
        call.info.index = Some(3);
        let err = call.eval(&mut ctx).unwrap_err();
        assert_eq!(err.error_type(), "Runtime");
        assert!(err.message().contains("boom"));
        assert_eq!(err.location().and_then(|loc| loc.index), Some(3));
    }

    #[test]
    fn typed_failures_keep_their_type() {
        let mut ctx = EvalContext::default();
        let call = Call::new("ceil", vec![Node::Keyword(Keyword::new("x"))]);
        let err = call.eval(&mut ctx).unwrap_err();
        assert_eq!(err.error_type(), "Argument");
    }
}
