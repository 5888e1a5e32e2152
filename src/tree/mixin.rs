use std::rc::Rc;

use tracing::debug;

use super::condition::evaluate_guard;
use super::ruleset::{next_node_id, MixinCandidate, MixinTarget};
use super::{Declaration, Expression, Node, NodeInfo, Ruleset, Selector};
use crate::context::{DefaultFunc, EvalContext, Frame};
use crate::error::{LessError, LessResult};

/// 调用实参，`name` 为具名参数，`expand` 表示 `@list...` 展开。
#[derive(Debug, Clone)]
pub struct MixinArg {
    pub name: Option<String>,
    pub value: Node,
    pub expand: bool,
}

impl MixinArg {
    pub fn positional(value: Node) -> Self {
        Self {
            name: None,
            value,
            expand: false,
        }
    }

    pub fn named<S: Into<String>>(name: S, value: Node) -> Self {
        Self {
            name: Some(name.into()),
            value,
            expand: false,
        }
    }
}

/// 形参：`@name`、`@name: default`、`@rest...` 或字面量模式（无名字）。
#[derive(Debug, Clone)]
pub struct MixinParam {
    pub name: Option<String>,
    pub value: Option<Node>,
    pub variadic: bool,
}

impl MixinParam {
    pub fn named<S: Into<String>>(name: S, default: Option<Node>) -> Self {
        Self {
            name: Some(name.into()),
            value: default,
            variadic: false,
        }
    }

    pub fn pattern(value: Node) -> Self {
        Self {
            name: None,
            value: Some(value),
            variadic: false,
        }
    }

    pub fn rest(name: Option<String>) -> Self {
        Self {
            name,
            value: None,
            variadic: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MixinDefinition {
    pub name: String,
    pub selectors: Vec<Selector>,
    pub params: Vec<MixinParam>,
    pub rules: Vec<Node>,
    pub condition: Option<Box<Node>>,
    pub variadic: bool,
    /// 定义处的作用域快照，求值后才有。
    pub frames: Option<Vec<Frame>>,
    required: usize,
    optional_parameters: Vec<String>,
    pub id: usize,
    pub info: NodeInfo,
}

impl MixinDefinition {
    pub fn new<S: Into<String>>(
        name: S,
        params: Vec<MixinParam>,
        rules: Vec<Node>,
        condition: Option<Node>,
        variadic: bool,
    ) -> Self {
        let name = name.into();
        let name = if name.is_empty() {
            "anonymous mixin".to_string()
        } else {
            name
        };
        let required = params
            .iter()
            .filter(|param| param.name.is_none() || param.value.is_none())
            .count();
        let optional_parameters = params
            .iter()
            .filter(|param| param.value.is_some())
            .filter_map(|param| param.name.clone())
            .collect();
        Self {
            selectors: vec![Selector::simple(name.clone())],
            name,
            params,
            rules,
            condition: condition.map(Box::new),
            variadic,
            frames: None,
            required,
            optional_parameters,
            id: next_node_id(),
            info: NodeInfo::default(),
        }
    }

    /// 普通规则集被当作 mixin 调用时的无参数定义。
    pub fn from_ruleset(ruleset: &Ruleset) -> Self {
        let mut definition = Self::new("", Vec::new(), ruleset.rules().to_vec(), None, false);
        definition.id = ruleset.original_id;
        definition
            .info
            .copy_visibility_info(ruleset.info.visibility_info());
        definition
    }

    /// 捕获当前作用域。
    pub fn eval(&self, ctx: &EvalContext) -> MixinDefinition {
        MixinDefinition {
            frames: Some(
                self.frames
                    .clone()
                    .unwrap_or_else(|| ctx.frames().to_vec()),
            ),
            ..self.clone()
        }
    }

    pub fn rulesets(&self) -> Vec<MixinTarget> {
        self.rules
            .iter()
            .filter_map(|rule| match rule {
                Node::Ruleset(ruleset) => Some(MixinTarget::Ruleset(ruleset.clone())),
                Node::MixinDefinition(definition) => {
                    Some(MixinTarget::Definition(definition.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn mixin_frames(&self, ctx: &EvalContext) -> Vec<Frame> {
        let mut frames = self.frames.clone().unwrap_or_default();
        frames.extend(ctx.frames().iter().cloned());
        frames
    }

    fn registry_frame(ruleset: Ruleset, frames: &[Frame], ctx: &EvalContext) -> Frame {
        let registry = frames
            .first()
            .map(|frame| frame.registry.inherit())
            .unwrap_or_else(|| ctx.function_registry().inherit());
        Frame {
            ruleset: Rc::new(ruleset),
            registry,
        }
    }

    /// 把实参绑定到形参，返回只含参数声明的作用域。
    fn eval_params(
        &self,
        ctx: &mut EvalContext,
        mixin_frames: &[Frame],
        args: &[MixinArg],
        evaluated: &mut Vec<Option<Node>>,
    ) -> LessResult<Ruleset> {
        let mut frame = Ruleset::new(None, Vec::new());
        let mut args = args.to_vec();
        evaluated.resize(self.params.len().max(args.len()), None);

        let mut i = 0;
        while i < args.len() {
            let Some(name) = args[i].name.clone() else {
                i += 1;
                continue;
            };
            let slot = self
                .params
                .iter()
                .enumerate()
                .position(|(j, param)| evaluated[j].is_none() && param.name.as_deref() == Some(name.as_str()));
            let Some(slot) = slot else {
                return Err(LessError::runtime(format!(
                    "{} 没有名为 {} 的参数",
                    self.name, name
                )));
            };
            let value = args[i].value.eval(ctx)?;
            evaluated[slot] = Some(value.clone());
            frame
                .rules_mut()
                .insert(0, Declaration::variable(name, value).into());
            args.remove(i);
        }

        let mut arg_index = 0;
        for (i, param) in self.params.iter().enumerate() {
            if evaluated[i].is_some() {
                continue;
            }
            if let Some(name) = &param.name {
                if param.variadic {
                    let rest = args
                        .iter()
                        .skip(arg_index)
                        .map(|arg| arg.value.eval(ctx))
                        .collect::<LessResult<Vec<_>>>()?;
                    let value = Expression::new(rest).eval(ctx)?;
                    frame
                        .rules_mut()
                        .insert(0, Declaration::variable(name.clone(), value).into());
                } else {
                    let value = match (args.get(arg_index), &param.value) {
                        (Some(arg), _) => arg.value.eval(ctx)?,
                        (None, Some(default)) => {
                            let mut frames = vec![Self::registry_frame(frame.clone(), mixin_frames, ctx)];
                            frames.extend(mixin_frames.iter().cloned());
                            let value = ctx.with_frames(frames, |inner| default.eval(inner))?;
                            frame.reset_cache();
                            value
                        }
                        (None, None) => {
                            return Err(LessError::runtime(format!(
                                "{} 的参数个数不对（传入 {} 个，需要 {} 个）",
                                self.name,
                                args.len(),
                                self.params.len()
                            )))
                        }
                    };
                    frame
                        .rules_mut()
                        .insert(0, Declaration::variable(name.clone(), value.clone()).into());
                    evaluated[i] = Some(value);
                }
            }
            if param.variadic {
                for j in arg_index..args.len() {
                    evaluated[j] = Some(args[j].value.eval(ctx)?);
                }
            }
            arg_index += 1;
        }
        Ok(frame)
    }

    /// 调用 mixin：绑定参数与 `@arguments`，在定义处作用域中求值规则体。
    pub fn eval_call(&self, ctx: &mut EvalContext, args: &[MixinArg], important: bool) -> LessResult<Ruleset> {
        let mixin_frames = self.mixin_frames(ctx);
        let mut evaluated = Vec::new();
        let mut params = self.eval_params(ctx, &mixin_frames, args, &mut evaluated)?;
        let arguments = Expression::new(evaluated.into_iter().flatten().collect()).eval(ctx)?;
        params
            .rules_mut()
            .insert(0, Declaration::variable("@arguments", arguments).into());

        let mut own = Ruleset::new(None, self.rules.clone());
        own.id = self.id;
        let mut frames = vec![
            Self::registry_frame(own, &mixin_frames, ctx),
            Self::registry_frame(params, &mixin_frames, ctx),
        ];
        frames.extend(mixin_frames);

        let mut body = Ruleset::new(None, self.rules.clone());
        body.original_id = self.id;
        let result = ctx.with_frames(frames, |inner| body.eval(inner))?;
        Ok(if important {
            result.make_important()
        } else {
            result
        })
    }

    pub fn accepts_no_args(&self) -> bool {
        if self.variadic {
            self.required <= 1
        } else {
            self.required == 0
        }
    }

    /// 参数个数与字面量模式是否匹配。
    pub fn match_args(&self, args: &[MixinArg], ctx: &mut EvalContext) -> LessResult<bool> {
        let required_args = args
            .iter()
            .filter(|arg| {
                arg.name
                    .as_ref()
                    .map_or(true, |name| !self.optional_parameters.contains(name))
            })
            .count();
        if self.variadic {
            if required_args + 1 < self.required {
                return Ok(false);
            }
        } else if required_args < self.required || args.len() > self.params.len() {
            return Ok(false);
        }
        let opts = ctx.css_options();
        for (param, arg) in self.params.iter().zip(args).take(required_args) {
            if param.name.is_some() || param.variadic {
                continue;
            }
            if let Some(pattern) = &param.value {
                let expected = pattern.eval(ctx)?.to_css(&opts)?;
                let actual = arg.value.eval(ctx)?.to_css(&opts)?;
                if expected != actual {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// 在绑定了参数的作用域中求值守卫。
    pub fn match_condition(&self, args: &[MixinArg], ctx: &mut EvalContext) -> LessResult<bool> {
        let Some(condition) = &self.condition else {
            return Ok(true);
        };
        let mixin_frames = self.mixin_frames(ctx);
        let params = self.eval_params(ctx, &mixin_frames, args, &mut Vec::new())?;
        let mut frames = vec![Self::registry_frame(params, &mixin_frames, ctx)];
        frames.extend(mixin_frames);
        ctx.with_frames(frames, |inner| evaluate_guard(condition, inner))
    }
}

/// mixin 调用，例如 `.border(1px; solid) !important;`。
#[derive(Debug, Clone)]
pub struct MixinCall {
    pub selector: Selector,
    pub args: Vec<MixinArg>,
    pub important: bool,
    pub info: NodeInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultGroup {
    /// 守卫结果与 `default()` 无关。
    Neutral,
    /// 只有 `default()` 为真时匹配。
    WhenDefault,
    /// 只有 `default()` 为假时匹配。
    WhenNotDefault,
}

impl MixinCall {
    pub fn new(selector: Selector, args: Vec<MixinArg>, important: bool) -> Self {
        Self {
            selector,
            args,
            important,
            info: NodeInfo::default(),
        }
    }

    fn format(&self, selector: &Selector, args: &[MixinArg], ctx: &EvalContext) -> String {
        let opts = ctx.css_options();
        let args = args
            .iter()
            .map(|arg| {
                let value = arg.value.to_css(&opts).unwrap_or_else(|_| "???".to_string());
                match &arg.name {
                    Some(name) => format!("{name}:{value}"),
                    None => value,
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({args})", selector.to_css(&opts).trim())
    }

    fn eval_args(&self, ctx: &mut EvalContext) -> LessResult<Vec<MixinArg>> {
        let mut args = Vec::new();
        for arg in &self.args {
            let value = arg.value.eval(ctx)?;
            if arg.expand && matches!(value, Node::Expression(_) | Node::Value(_)) {
                args.extend(value.list_items().into_iter().map(MixinArg::positional));
            } else {
                args.push(MixinArg {
                    name: arg.name.clone(),
                    value,
                    expand: false,
                });
            }
        }
        Ok(args)
    }

    /// 两次求值守卫（`default()` 分别为假和真），据此分组；都不匹配时返回 `None`。
    fn default_group(
        candidate: &MixinCandidate,
        args: &[MixinArg],
        ctx: &mut EvalContext,
    ) -> LessResult<Option<DefaultGroup>> {
        let mut results = [false; 2];
        for (slot, value) in [false, true].into_iter().enumerate() {
            results[slot] = ctx.with_default_func(Some(DefaultFunc::with_value(value)), |ctx| {
                for namespace in &candidate.path {
                    if !namespace.match_condition(&[], ctx)? {
                        return Ok(false);
                    }
                }
                candidate.rule.match_condition(args, ctx)
            })?;
        }
        Ok(match results {
            [false, false] => None,
            [when_false, when_true] if when_false == when_true => Some(DefaultGroup::Neutral),
            [_, true] => Some(DefaultGroup::WhenDefault),
            _ => Some(DefaultGroup::WhenNotDefault),
        })
    }

    pub fn eval_rules(&self, ctx: &mut EvalContext) -> LessResult<Vec<Node>> {
        let located = |err: LessError| err.with_location(self.info.index, self.info.file_info());
        let selector = self.selector.eval(ctx).map_err(located)?;
        let args = self.eval_args(ctx).map_err(located)?;
        let active: Vec<usize> = ctx
            .frames()
            .iter()
            .map(|frame| frame.ruleset.original_id)
            .collect();

        let mut found_any = false;
        for depth in 0..ctx.frames().len() {
            let mixins = {
                let frame = &ctx.frames()[depth].ruleset;
                frame.find(&selector, None, MixinTarget::accepts_no_args)
            };
            if mixins.is_empty() {
                continue;
            }
            found_any = true;

            let mut matched = false;
            let mut candidates = Vec::new();
            for candidate in mixins {
                if let MixinTarget::Ruleset(ruleset) = &candidate.rule {
                    if active.contains(&ruleset.original_id) {
                        continue;
                    }
                }
                if candidate.rule.match_args(&args, ctx).map_err(located)? {
                    matched = true;
                    if let Some(group) = Self::default_group(&candidate, &args, ctx).map_err(located)? {
                        candidates.push((candidate.rule, group));
                    }
                }
            }

            let count = |group: DefaultGroup| candidates.iter().filter(|(_, g)| *g == group).count();
            let wanted = if count(DefaultGroup::Neutral) > 0 {
                DefaultGroup::WhenNotDefault
            } else {
                if count(DefaultGroup::WhenDefault) + count(DefaultGroup::WhenNotDefault) > 1 {
                    return Err(located(LessError::runtime(format!(
                        "匹配 `{}` 时 default() 的用法有歧义",
                        self.format(&selector, &args, ctx)
                    ))));
                }
                DefaultGroup::WhenDefault
            };

            let mut rules = Vec::new();
            for (rule, group) in candidates {
                if group != DefaultGroup::Neutral && group != wanted {
                    continue;
                }
                let definition = match rule {
                    MixinTarget::Definition(definition) => definition,
                    MixinTarget::Ruleset(ruleset) => Rc::new(MixinDefinition::from_ruleset(&ruleset)),
                };
                let mut produced = definition
                    .eval_call(ctx, &args, self.important)
                    .map_err(located)?
                    .into_rules();
                if self.info.blocks_visibility() {
                    for node in produced.iter_mut() {
                        node.info_mut().add_visibility_block();
                    }
                }
                rules.extend(produced);
            }
            if matched {
                return Ok(rules);
            }
        }

        let call = self.format(&selector, &args, ctx);
        if found_any {
            debug!(mixin = %call, "没有匹配的 mixin 定义");
            Err(located(LessError::runtime(format!(
                "没有找到与 `{call}` 匹配的定义"
            ))))
        } else {
            debug!(mixin = %call, "mixin 未定义");
            Err(located(LessError::name(format!(
                "`{}` 未定义",
                selector.to_css(&ctx.css_options()).trim()
            ))))
        }
    }
}

/// 分离规则集 `@dr: { ... }`，求值时捕获定义处的作用域。
#[derive(Debug, Clone)]
pub struct DetachedRuleset {
    pub ruleset: Rc<Ruleset>,
    pub frames: Option<Vec<Frame>>,
    pub info: NodeInfo,
}

impl DetachedRuleset {
    pub fn new(ruleset: Rc<Ruleset>) -> Self {
        Self {
            ruleset,
            frames: None,
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &EvalContext) -> DetachedRuleset {
        DetachedRuleset {
            frames: Some(
                self.frames
                    .clone()
                    .unwrap_or_else(|| ctx.frames().to_vec()),
            ),
            ..self.clone()
        }
    }

    pub fn call_eval(&self, ctx: &mut EvalContext) -> LessResult<Ruleset> {
        match &self.frames {
            Some(frames) => {
                let mut all = frames.clone();
                all.extend(ctx.frames().iter().cloned());
                ctx.with_frames(all, |inner| self.ruleset.eval(inner))
            }
            None => self.ruleset.eval(ctx),
        }
    }
}
