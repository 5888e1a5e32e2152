use std::rc::Rc;

use super::{Node, NodeInfo, Ruleset};
use crate::context::EvalContext;
use crate::error::{LessError, LessResult};
use crate::output::CssOptions;

/// 条件类 at 规则，块内声明会冒泡到外层选择器之下。
const CONDITIONAL: &[&str] = &["@media", "@supports", "@document", "@container", "@layer"];

/// `@media`、`@font-face`、`@charset` 等 at 规则。
#[derive(Debug, Clone)]
pub struct AtRule {
    pub name: String,
    pub value: Option<Box<Node>>,
    pub block: Option<Rc<Ruleset>>,
    /// 为真时块内规则不继承外层选择器。
    pub is_rooted: bool,
    pub info: NodeInfo,
}

impl AtRule {
    pub fn new<S: Into<String>>(name: S, value: Option<Node>, block: Option<Ruleset>) -> Self {
        let name = name.into();
        let is_rooted = !CONDITIONAL
            .iter()
            .any(|conditional| name.eq_ignore_ascii_case(conditional));
        Self {
            name,
            value: value.map(Box::new),
            block: block.map(Rc::new),
            is_rooted,
            info: NodeInfo::default(),
        }
    }

    pub fn is_charset(&self) -> bool {
        self.name.eq_ignore_ascii_case("@charset")
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<AtRule> {
        let located = |err: LessError| err.with_location(self.info.index, self.info.file_info());
        let value = match &self.value {
            Some(value) => Some(Box::new(value.eval(ctx).map_err(located)?)),
            None => None,
        };
        let block = match &self.block {
            Some(block) => {
                let mut evaluated = block.eval(ctx).map_err(located)?;
                evaluated.root = self.is_rooted;
                Some(Rc::new(evaluated))
            }
            None => None,
        };
        Ok(AtRule {
            name: self.name.clone(),
            value,
            block,
            is_rooted: self.is_rooted,
            info: self.info.clone(),
        })
    }

    /// 块之前的部分，例如 `@media screen and (min-width: 10px)`。
    pub fn prelude(&self, opts: &CssOptions) -> LessResult<String> {
        match &self.value {
            Some(value) => {
                let value = value.to_css(opts)?;
                if value.is_empty() {
                    Ok(self.name.clone())
                } else {
                    Ok(format!("{} {}", self.name, value))
                }
            }
            None => Ok(self.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Anonymous, Declaration, Dimension, Quoted, Variable};
    use pretty_assertions::assert_eq;

    #[test]
    fn conditional_rules_are_not_rooted() {
        assert!(!AtRule::new("@media", None, None).is_rooted);
        assert!(!AtRule::new("@Supports", None, None).is_rooted);
        assert!(AtRule::new("@font-face", None, None).is_rooted);
        assert!(AtRule::new("@charset", None, None).is_charset());
    }

    #[test]
    fn evaluates_value_and_block() {
        let mut ctx = EvalContext::default();
        ctx.push_frame(Rc::new(Ruleset::new(
            None,
            vec![Declaration::variable("@w", Node::Dimension(Dimension::with_unit(10.0, "px"))).into()],
        )));
        let at_rule = AtRule::new(
            "@media",
            Some(Node::Anonymous(Anonymous::new("screen"))),
            Some(Ruleset::new(
                None,
                vec![Declaration::new("width", Node::Variable(Variable::new("@w", NodeInfo::default()))).into()],
            )),
        );
        let evaluated = at_rule.eval(&mut ctx).unwrap();
        assert_eq!(evaluated.prelude(&CssOptions::default()).unwrap(), "@media screen");
        let block = evaluated.block.unwrap();
        assert!(!block.root);
        assert_eq!(block.rules()[0].to_plain_css(), "width: 10px");
    }

    #[test]
    fn statement_rule_has_no_block() {
        let charset = AtRule::new("@charset", Some(Node::Quoted(Quoted::new('"', "utf-8", false))), None);
        let evaluated = charset.eval(&mut EvalContext::default()).unwrap();
        assert!(evaluated.block.is_none());
        assert_eq!(evaluated.prelude(&CssOptions::default()).unwrap(), "@charset \"utf-8\"");
    }
}
