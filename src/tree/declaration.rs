use super::values::interpolate;
use super::{Node, NodeInfo};
use crate::context::{EvalContext, MathMode};
use crate::error::{LessError, LessResult};
use crate::output::{CssOptions, Output};

/// 属性声明 `name: value`，变量声明以 `@` 开头。
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub value: Box<Node>,
    pub important: bool,
    /// 名称中含 `@{var}` 插值。
    pub interpolated: bool,
    pub variable: bool,
    pub info: NodeInfo,
}

impl Declaration {
    pub fn new<S: Into<String>>(name: S, value: Node) -> Self {
        let name = name.into();
        Self {
            interpolated: name.contains("@{") || name.contains("${"),
            variable: name.starts_with('@') && !name.starts_with("@{"),
            name,
            value: Box::new(value),
            important: false,
            info: NodeInfo::default(),
        }
    }

    pub fn variable<S: Into<String>>(name: S, value: Node) -> Self {
        Self {
            variable: true,
            ..Self::new(name, value)
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Declaration> {
        let located = |err: LessError| err.with_location(self.info.index, self.info.file_info());
        let (name, variable) = if self.interpolated {
            (interpolate(ctx, &self.name, &self.info).map_err(located)?, false)
        } else {
            (self.name.clone(), self.variable)
        };

        let saved_math = ctx.math;
        // `font: 12px/1.5` 的斜杠不是除法
        if name == "font" && ctx.math == MathMode::Always {
            ctx.math = MathMode::ParensDivision;
        }
        ctx.important_scope.push(false);
        let result = self.value.eval(ctx);
        let inherited_important = ctx.important_scope.pop().unwrap_or(false);
        ctx.math = saved_math;

        let mut value = result.map_err(located)?;
        value.info_mut().inherit_from(&self.info);
        if !variable && matches!(value, Node::DetachedRuleset(_)) {
            return Err(located(LessError::syntax("规则集不能作为属性值求值")));
        }
        Ok(Declaration {
            name,
            value: Box::new(value),
            important: self.important || inherited_important,
            interpolated: false,
            variable,
            info: self.info.clone(),
        })
    }

    /// 输出 `name: value`，分号与缩进由序列化器负责。
    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        let separator = if opts.compress { ":" } else { ": " };
        output.add(
            &format!("{}{separator}", self.name),
            self.info.file_info(),
            self.info.index,
        );
        self.value
            .gen_css(opts, output)
            .map_err(|err| err.with_location(self.info.index, self.info.file_info()))?;
        if self.important {
            output.add(if opts.compress { "!important" } else { " !important" }, None, None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{DetachedRuleset, Dimension, Op, Operation, Ruleset, Variable};
    use std::rc::Rc;

    fn num(value: f64) -> Node {
        Node::Dimension(Dimension::number(value))
    }

    #[test]
    fn interpolated_name_becomes_property() {
        let mut ctx = EvalContext::default();
        ctx.push_frame(Rc::new(Ruleset::new(
            None,
            vec![Declaration::variable("@side", Node::Keyword(crate::tree::Keyword::new("left"))).into()],
        )));
        let decl = Declaration::new("margin-@{side}", num(1.0)).eval(&mut ctx).unwrap();
        assert_eq!(decl.name, "margin-left");
        assert!(!decl.variable);
    }

    #[test]
    fn computed_values_take_the_declaration_position() {
        let mut ctx = EvalContext::default();
        ctx.math = MathMode::Always;
        let mut decl = Declaration::new(
            "width",
            Node::Operation(Operation::new(Op::Add, num(1.0), num(2.0), true)),
        );
        decl.info = NodeInfo::at(Some(9), Some(Rc::new(crate::tree::FileInfo::new("a.less"))));
        let decl = decl.eval(&mut ctx).unwrap();
        assert_eq!(decl.value.to_plain_css(), "3");
        assert_eq!(decl.value.info().index, Some(9));
        assert_eq!(decl.value.info().file_info().map(|f| f.filename.as_str()), Some("a.less"));
    }

    #[test]
    fn font_shorthand_keeps_slash_in_always_mode() {
        let mut ctx = EvalContext::default();
        ctx.math = MathMode::Always;
        let value = Node::Operation(Operation::new(Op::Div, num(12.0), num(1.5), false));
        let decl = Declaration::new("font", value.clone()).eval(&mut ctx).unwrap();
        assert_eq!(decl.value.to_plain_css(), "12/1.5");
        assert_eq!(ctx.math, MathMode::Always);
        let decl = Declaration::new("line-height", value).eval(&mut ctx).unwrap();
        assert_eq!(decl.value.to_plain_css(), "8");
    }

    #[test]
    fn important_variable_propagates() {
        let mut ctx = EvalContext::default();
        let mut source = Declaration::variable("@w", num(2.0));
        source.important = true;
        ctx.push_frame(Rc::new(Ruleset::new(None, vec![source.into()])));
        let decl = Declaration::new(
            "width",
            Node::Variable(Variable::new("@w", NodeInfo::default())),
        )
        .eval(&mut ctx)
        .unwrap();
        assert!(decl.important);
        assert!(ctx.important_scope.is_empty());
    }

    #[test]
    fn detached_ruleset_on_property_is_rejected() {
        let mut ctx = EvalContext::default();
        let detached = Node::DetachedRuleset(DetachedRuleset::new(Rc::new(Ruleset::new(None, Vec::new()))));
        let err = Declaration::new("color", detached).eval(&mut ctx).unwrap_err();
        assert_eq!(err.error_type(), "Syntax");
    }

    #[test]
    fn gen_css_formats() {
        let mut decl = Declaration::new("margin", num(0.0));
        decl.important = true;
        assert_eq!(Node::Declaration(decl.clone()).to_plain_css(), "margin: 0 !important");
        let compressed = CssOptions {
            compress: true,
            ..CssOptions::default()
        };
        assert_eq!(
            Node::Declaration(decl).to_css(&compressed).unwrap(),
            "margin:0!important"
        );
    }
}
