use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use super::condition::evaluate_guard;
use super::{Declaration, ImportRoot, MixinArg, MixinDefinition, Node, NodeInfo, Selector};
use crate::context::{DefaultFunc, EvalContext};
use crate::error::{LessError, LessResult};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn next_node_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// 可以被 mixin 调用命中的规则：普通规则集或带参数的 mixin 定义。
#[derive(Debug, Clone)]
pub enum MixinTarget {
    Ruleset(Rc<Ruleset>),
    Definition(Rc<MixinDefinition>),
}

impl MixinTarget {
    pub fn id(&self) -> usize {
        match self {
            MixinTarget::Ruleset(ruleset) => ruleset.id,
            MixinTarget::Definition(definition) => definition.id,
        }
    }

    fn selectors(&self) -> &[Selector] {
        match self {
            MixinTarget::Ruleset(ruleset) => ruleset.selectors.as_deref().unwrap_or_default(),
            MixinTarget::Definition(definition) => &definition.selectors,
        }
    }

    fn find(&self, selector: &Selector, self_id: Option<usize>, filter: RuleFilter) -> Vec<MixinCandidate> {
        match self {
            MixinTarget::Ruleset(ruleset) => ruleset.find(selector, self_id, filter),
            MixinTarget::Definition(definition) => {
                find_among(definition.rulesets(), selector, self_id, filter)
            }
        }
    }

    /// 不带参数也能调用，可以作为命名空间继续向内查找。
    pub fn accepts_no_args(&self) -> bool {
        match self {
            MixinTarget::Ruleset(_) => true,
            MixinTarget::Definition(definition) => definition.accepts_no_args(),
        }
    }

    pub fn match_args(&self, args: &[MixinArg], ctx: &mut EvalContext) -> LessResult<bool> {
        match self {
            MixinTarget::Ruleset(ruleset) => Ok(ruleset.match_args(args)),
            MixinTarget::Definition(definition) => definition.match_args(args, ctx),
        }
    }

    pub fn match_condition(&self, args: &[MixinArg], ctx: &mut EvalContext) -> LessResult<bool> {
        match self {
            MixinTarget::Ruleset(ruleset) => ruleset.match_condition(ctx),
            MixinTarget::Definition(definition) => definition.match_condition(args, ctx),
        }
    }
}

/// 一次查找的结果：命中的规则及其所在的命名空间链（由内向外）。
#[derive(Debug, Clone)]
pub struct MixinCandidate {
    pub rule: MixinTarget,
    pub path: Vec<MixinTarget>,
}

pub type RuleFilter = fn(&MixinTarget) -> bool;

#[derive(Debug, Clone)]
pub struct Ruleset {
    /// `None` 表示根或匿名块。
    pub selectors: Option<Vec<Selector>>,
    rules: Vec<Node>,
    pub root: bool,
    pub first_root: bool,
    pub allow_imports: bool,
    /// 选择器连接后的完整路径，由 `JoinSelectorVisitor` 填写。
    pub paths: Vec<Vec<Selector>>,
    pub id: usize,
    /// 求值得到的规则集沿用源规则集的标识，用于识别递归调用。
    pub original_id: usize,
    variables: RefCell<Option<IndexMap<String, Declaration>>>,
    properties: RefCell<Option<IndexMap<String, Vec<Declaration>>>>,
    lookups: RefCell<HashMap<String, Vec<MixinCandidate>>>,
    pub info: NodeInfo,
}

impl Ruleset {
    pub fn new(selectors: Option<Vec<Selector>>, rules: Vec<Node>) -> Self {
        let id = next_node_id();
        Self {
            selectors,
            rules,
            root: false,
            first_root: false,
            allow_imports: false,
            paths: Vec::new(),
            id,
            original_id: id,
            variables: RefCell::new(None),
            properties: RefCell::new(None),
            lookups: RefCell::new(HashMap::new()),
            info: NodeInfo::default(),
        }
    }

    pub fn root(rules: Vec<Node>) -> Self {
        Self {
            root: true,
            first_root: true,
            allow_imports: true,
            ..Self::new(None, rules)
        }
    }

    pub fn rules(&self) -> &[Node] {
        &self.rules
    }

    /// 可变访问规则列表，缓存随之失效。
    pub fn rules_mut(&mut self) -> &mut Vec<Node> {
        self.reset_cache();
        &mut self.rules
    }

    pub fn into_rules(self) -> Vec<Node> {
        self.rules
    }

    pub fn reset_cache(&mut self) {
        self.variables.replace(None);
        self.properties.replace(None);
        self.lookups.borrow_mut().clear();
    }

    fn collect_variables(&self) -> IndexMap<String, Declaration> {
        let mut found = IndexMap::new();
        for rule in &self.rules {
            match rule {
                Node::Declaration(decl) if decl.variable => {
                    found.insert(decl.name.clone(), decl.clone());
                }
                Node::Import(import) => {
                    if let Some(ImportRoot::Tree(root)) = &import.root {
                        found.extend(root.collect_variables());
                    }
                }
                _ => {}
            }
        }
        found
    }

    /// 同一规则集中后出现的变量声明生效。
    pub fn variable(&self, name: &str) -> Option<Declaration> {
        let mut cache = self.variables.borrow_mut();
        let variables = cache.get_or_insert_with(|| self.collect_variables());
        variables.get(name).cloned()
    }

    /// 以 `$name` 为键返回全部同名属性声明。
    pub fn property(&self, name: &str) -> Vec<Declaration> {
        let mut cache = self.properties.borrow_mut();
        let properties = cache.get_or_insert_with(|| {
            let mut found: IndexMap<String, Vec<Declaration>> = IndexMap::new();
            for rule in &self.rules {
                if let Node::Declaration(decl) = rule {
                    if !decl.variable {
                        found
                            .entry(format!("${}", decl.name))
                            .or_default()
                            .push(decl.clone());
                    }
                }
            }
            found
        });
        properties.get(name).cloned().unwrap_or_default()
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

    /// 在子规则中查找与 `selector` 匹配的 mixin，结果按选择器文本缓存。
    pub fn find(&self, selector: &Selector, self_id: Option<usize>, filter: RuleFilter) -> Vec<MixinCandidate> {
        let key = selector.to_css(&Default::default());
        if let Some(found) = self.lookups.borrow().get(&key) {
            return found.clone();
        }
        let found = find_among(self.rulesets(), selector, self_id, filter);
        self.lookups.borrow_mut().insert(key, found.clone());
        found
    }

    pub fn match_args(&self, args: &[MixinArg]) -> bool {
        args.is_empty()
    }

    /// 作为 mixin 使用时，由最后一个选择器的守卫决定是否匹配。
    pub fn match_condition(&self, ctx: &mut EvalContext) -> LessResult<bool> {
        let Some(last) = self.selectors.as_ref().and_then(|selectors| selectors.last()) else {
            return Ok(true);
        };
        match &last.condition {
            Some(condition) => evaluate_guard(condition, ctx),
            None => Ok(last.evald_condition),
        }
    }

    pub fn make_important(&self) -> Ruleset {
        Ruleset {
            rules: self.rules.iter().map(Node::make_important).collect(),
            ..self.clone()
        }
        .fresh()
    }

    fn fresh(mut self) -> Ruleset {
        self.id = next_node_id();
        self.reset_cache();
        self
    }

    /// 不进入作用域地展开本规则集中的导入，合并导入内容时使用。
    pub fn eval_imports(&mut self, ctx: &mut EvalContext) -> LessResult<()> {
        let mut i = 0;
        while i < self.rules.len() {
            if let Node::Import(import) = &self.rules[i] {
                let produced = import.eval_rules(ctx)?;
                let count = produced.len();
                self.rules_mut().splice(i..=i, produced);
                i += count;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Ruleset> {
        let mut has_passing = true;
        let selectors = match &self.selectors {
            Some(selectors) if !selectors.is_empty() => {
                let guard = DefaultFunc::with_error(LessError::syntax(
                    "default() 目前只能用在带参数的 mixin 守卫中",
                ));
                let evaluated = ctx
                    .with_default_func(Some(guard), |ctx| {
                        selectors
                            .iter()
                            .map(|selector| selector.eval(ctx))
                            .collect::<LessResult<Vec<_>>>()
                    })
                    .map_err(|err| err.with_location(self.info.index, self.info.file_info()))?;
                has_passing = evaluated.iter().any(|selector| selector.evald_condition);
                Some(reparse_interpolated(ctx, evaluated, has_passing))
            }
            other => other.clone(),
        };

        let ruleset = Ruleset {
            selectors,
            rules: if has_passing {
                self.rules.clone()
            } else {
                Vec::new()
            },
            root: self.root,
            first_root: self.first_root,
            allow_imports: self.allow_imports,
            paths: Vec::new(),
            original_id: self.original_id,
            info: self.info.clone(),
            ..Ruleset::new(None, Vec::new())
        };

        ctx.push_frame(Rc::new(ruleset));
        let outcome = eval_innermost(ctx);
        let frame = ctx.pop_frame();
        outcome?;
        let frame = frame.ok_or_else(|| LessError::runtime("作用域栈不平衡"))?;
        Ok(Rc::try_unwrap(frame.ruleset).unwrap_or_else(|shared| (*shared).clone()))
    }
}

/// 含插值的选择器求值后重新解析，解析失败时保留原结果。
fn reparse_interpolated(ctx: &EvalContext, selectors: Vec<Selector>, passing: bool) -> Vec<Selector> {
    if !selectors.iter().any(Selector::has_variable) {
        return selectors;
    }
    let Some(parser) = ctx.parser.clone() else {
        return selectors;
    };
    let opts = ctx.css_options();
    let text = selectors
        .iter()
        .map(|selector| selector.to_css(&opts))
        .collect::<Vec<_>>()
        .join(",");
    let (index, file_info) = selectors
        .first()
        .map(|first| (first.info.index, first.info.file_info.clone()))
        .unwrap_or_default();
    match parser.parse_selectors(&text, index, file_info) {
        Ok(parsed) if !parsed.is_empty() => parsed
            .into_iter()
            .map(|mut selector| {
                selector.evald_condition = passing;
                selector
            })
            .collect(),
        _ => selectors,
    }
}

fn find_among(
    candidates: Vec<MixinTarget>,
    selector: &Selector,
    self_id: Option<usize>,
    filter: RuleFilter,
) -> Vec<MixinCandidate> {
    let mut found = Vec::new();
    for rule in candidates {
        if Some(rule.id()) == self_id {
            continue;
        }
        for own in rule.selectors() {
            let matched = selector.match_selector(own);
            if matched == 0 {
                continue;
            }
            if selector.elements.len() > matched {
                if filter(&rule) {
                    let rest = Selector::new(selector.elements[matched..].to_vec());
                    for mut candidate in rule.find(&rest, self_id, filter) {
                        candidate.path.push(rule.clone());
                        found.push(candidate);
                    }
                }
            } else {
                found.push(MixinCandidate {
                    rule: rule.clone(),
                    path: Vec::new(),
                });
            }
            break;
        }
    }
    found
}

fn frame_rule(ctx: &EvalContext, index: usize) -> Option<Node> {
    ctx.frames().first()?.ruleset.rules.get(index).cloned()
}

fn frame_ruleset(ctx: &mut EvalContext) -> LessResult<&mut Ruleset> {
    ctx.innermost_mut()
        .map(Rc::make_mut)
        .ok_or_else(|| LessError::runtime("没有可写入的作用域"))
}

fn splice_frame(ctx: &mut EvalContext, index: usize, produced: Vec<Node>) -> LessResult<usize> {
    let count = produced.len();
    frame_ruleset(ctx)?.rules_mut().splice(index..=index, produced);
    Ok(count)
}

fn evals_first(rule: &Node) -> bool {
    matches!(rule, Node::MixinDefinition(_) | Node::DetachedRuleset(_))
}

/// 在最内层作用域上就地求值其规则。
fn eval_innermost(ctx: &mut EvalContext) -> LessResult<()> {
    let (root, allow_imports) = ctx
        .frames()
        .first()
        .map(|frame| (frame.ruleset.root, frame.ruleset.allow_imports))
        .unwrap_or_default();

    if root || allow_imports || !ctx.strict_imports {
        let mut i = 0;
        while let Some(rule) = frame_rule(ctx, i) {
            match rule {
                Node::Import(import) => {
                    let produced = import.eval_rules(ctx)?;
                    i += splice_frame(ctx, i, produced)?;
                }
                _ => i += 1,
            }
        }
    }

    let mut i = 0;
    while let Some(rule) = frame_rule(ctx, i) {
        if evals_first(&rule) {
            let evaluated = rule.eval(ctx)?;
            frame_ruleset(ctx)?.rules_mut()[i] = evaluated;
        }
        i += 1;
    }

    let mut i = 0;
    while let Some(rule) = frame_rule(ctx, i) {
        let produced = match &rule {
            Node::MixinCall(call) => {
                let produced = call.eval_rules(ctx)?;
                let current = ctx.frames().first().map(|frame| frame.ruleset.clone());
                produced
                    .into_iter()
                    .filter(|node| match node {
                        Node::Declaration(decl) if decl.variable => current
                            .as_ref()
                            .map_or(true, |ruleset| ruleset.variable(&decl.name).is_none()),
                        _ => true,
                    })
                    .collect()
            }
            Node::VariableCall(call) => call
                .eval(ctx)?
                .into_rules()
                .into_iter()
                .filter(|node| !node.is_variable_declaration())
                .collect(),
            _ => {
                i += 1;
                continue;
            }
        };
        i += splice_frame(ctx, i, produced)?;
    }

    let mut i = 0;
    while let Some(rule) = frame_rule(ctx, i) {
        if !evals_first(&rule) {
            let evaluated = rule.eval(ctx)?;
            frame_ruleset(ctx)?.rules_mut()[i] = evaluated;
        }
        i += 1;
    }

    // 只有 `&` 的子规则集并入当前规则列表
    let frame = frame_ruleset(ctx)?;
    let rules = std::mem::take(frame.rules_mut());
    let mut folded = Vec::with_capacity(rules.len());
    for rule in rules {
        match rule {
            Node::Ruleset(child) if is_parent_only(&child) => {
                let visibility = child.info.visibility_info();
                for sub in child.rules.iter() {
                    if sub.is_variable_declaration() {
                        continue;
                    }
                    let mut sub = sub.clone();
                    sub.info_mut().copy_visibility_info(visibility);
                    folded.push(sub);
                }
            }
            other => folded.push(other),
        }
    }
    *frame.rules_mut() = folded;
    Ok(())
}

fn is_parent_only(ruleset: &Ruleset) -> bool {
    matches!(&ruleset.selectors, Some(selectors) if selectors.len() == 1 && selectors[0].is_just_parent_selector())
}
