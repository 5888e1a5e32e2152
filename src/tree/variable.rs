use super::{Call, DetachedRuleset, Node, NodeInfo, Ruleset};
use crate::context::EvalContext;
use crate::error::{LessError, LessResult};

/// 变量引用 `@name`，`@@name` 表示以另一个变量的值作为变量名。
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub info: NodeInfo,
}

impl Variable {
    pub fn new<S: Into<String>>(name: S, info: NodeInfo) -> Self {
        Self {
            name: name.into(),
            info,
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        let name = if let Some(inner) = self.name.strip_prefix("@@") {
            let target = Variable::new(format!("@{inner}"), self.info.clone()).eval(ctx)?;
            format!("@{}", target.text_value()?)
        } else {
            self.name.clone()
        };
        let located = |err: LessError| err.with_location(self.info.index, self.info.file_info());
        if !ctx.begin_evaluating(&name) {
            return Err(located(LessError::name(format!("变量 {name} 存在循环定义"))));
        }
        let result = match ctx.variable(&name) {
            Some(decl) => {
                if decl.important {
                    ctx.mark_important();
                }
                if ctx.in_calc() {
                    Call::new("_SELF", vec![*decl.value]).eval(ctx)
                } else {
                    decl.value.eval(ctx)
                }
            }
            None => Err(LessError::name(format!("变量 {name} 未定义"))),
        };
        ctx.end_evaluating(&name);
        result.map_err(located)
    }
}

/// 属性引用 `$name`，取同名声明中的最后一个。
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub info: NodeInfo,
}

impl Property {
    pub fn new<S: Into<String>>(name: S, info: NodeInfo) -> Self {
        Self {
            name: name.into(),
            info,
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        let located = |err: LessError| err.with_location(self.info.index, self.info.file_info());
        if !ctx.begin_evaluating(&self.name) {
            return Err(located(LessError::name(format!(
                "属性 {} 存在循环引用",
                self.name
            ))));
        }
        let result = match ctx.property(&self.name).and_then(|mut found| found.pop()) {
            Some(decl) => {
                if decl.important {
                    ctx.mark_important();
                }
                decl.value.eval(ctx)
            }
            None => Err(LessError::name(format!(
                "属性 '{}' 未定义",
                self.name.trim_start_matches('$')
            ))),
        };
        ctx.end_evaluating(&self.name);
        result.map_err(located)
    }
}

/// 调用分离规则集：`@detached();`。
#[derive(Debug, Clone)]
pub struct VariableCall {
    pub variable: String,
    pub important: bool,
    pub info: NodeInfo,
}

impl VariableCall {
    pub fn new<S: Into<String>>(variable: S, important: bool) -> Self {
        Self {
            variable: variable.into(),
            important,
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Ruleset> {
        let value = Variable::new(self.variable.clone(), self.info.clone()).eval(ctx)?;
        let detached = match value {
            Node::DetachedRuleset(detached) => detached,
            Node::Ruleset(ruleset) => DetachedRuleset::new(ruleset),
            _ => {
                return Err(LessError::runtime(format!(
                    "无法调用变量 {}，它不是规则集",
                    self.variable
                ))
                .with_location(self.info.index, self.info.file_info()))
            }
        };
        let ruleset = detached.call_eval(ctx)?;
        Ok(if self.important {
            ruleset.make_important()
        } else {
            ruleset
        })
    }
}
