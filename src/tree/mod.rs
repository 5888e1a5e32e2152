//! 语法树节点模型。
//!
//! 每种节点是 [`Node`] 的一个变体，`eval` 总是返回新节点而不修改自身，
//! 所以同一棵树可以在不同作用域下被多次求值。

mod atrule;
mod call;
mod color;
mod condition;
mod declaration;
mod dimension;
mod expression;
mod import;
mod mixin;
mod ruleset;
mod selector;
mod unit;
mod values;
mod variable;

pub use atrule::AtRule;
pub use call::Call;
pub use color::{Color, Hsl, Hsv};
pub use condition::{Condition, ConditionOp};
pub use declaration::Declaration;
pub use dimension::Dimension;
pub use expression::{Expression, Negative, Op, Operation, Paren, Value};
pub use import::{Import, ImportOptions, ImportRoot, ImportSkip};
pub use mixin::{DetachedRuleset, MixinArg, MixinCall, MixinDefinition, MixinParam};
pub use ruleset::{MixinCandidate, MixinTarget, RuleFilter, Ruleset};
pub use selector::{join_selector, path_to_css, Combinator, Element, Selector};
pub use unit::{Unit, UnitGroup};
pub use values::{Anonymous, Comment, Keyword, Quoted, Url};
pub use variable::{Property, Variable, VariableCall};

use std::cmp::Ordering;
use std::path::PathBuf;
use std::rc::Rc;

use crate::context::EvalContext;
use crate::error::LessResult;
use crate::output::{CssOptions, CssOutput, Output};
use crate::visitor::Visitor;

/// 节点所属源文件的信息。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileInfo {
    pub filename: String,
    pub current_directory: PathBuf,
    /// 通过 `(reference)` 导入的文件。
    pub reference: bool,
}

impl FileInfo {
    pub fn new<S: Into<String>>(filename: S) -> Self {
        let filename = filename.into();
        let current_directory = PathBuf::from(&filename)
            .parent()
            .map(|dir| dir.to_path_buf())
            .unwrap_or_default();
        Self {
            filename,
            current_directory,
            reference: false,
        }
    }
}

/// 可见性计数与显式可见标记的快照。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VisibilityInfo {
    pub visibility_blocks: u32,
    pub node_visible: Option<bool>,
}

/// 所有节点共有的位置与可见性元数据。
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub index: Option<usize>,
    pub file_info: Option<Rc<FileInfo>>,
    visibility_blocks: u32,
    node_visible: Option<bool>,
}

impl NodeInfo {
    pub fn at(index: Option<usize>, file_info: Option<Rc<FileInfo>>) -> Self {
        Self {
            index,
            file_info,
            ..Self::default()
        }
    }

    /// 用父节点的位置补齐缺失字段，构造时调用一次。
    pub fn inherit_from(&mut self, parent: &NodeInfo) {
        if self.index.is_none() {
            self.index = parent.index;
        }
        if self.file_info.is_none() {
            self.file_info = parent.file_info.clone();
        }
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        self.file_info.as_deref()
    }

    pub fn add_visibility_block(&mut self) {
        self.visibility_blocks += 1;
    }

    pub fn blocks_visibility(&self) -> bool {
        self.visibility_blocks != 0
    }

    pub fn visibility_info(&self) -> VisibilityInfo {
        VisibilityInfo {
            visibility_blocks: self.visibility_blocks,
            node_visible: self.node_visible,
        }
    }

    pub fn copy_visibility_info(&mut self, info: VisibilityInfo) {
        self.visibility_blocks = info.visibility_blocks;
        self.node_visible = info.node_visible;
    }

    /// 输出阶段是否应该跳过该节点。
    pub fn is_hidden(&self) -> bool {
        self.blocks_visibility() && self.node_visible != Some(true)
    }
}

/// 节点种类判别标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Anonymous,
    Keyword,
    Dimension,
    Color,
    Quoted,
    Url,
    Comment,
    Expression,
    Value,
    Paren,
    Negative,
    Operation,
    Call,
    Variable,
    Property,
    Condition,
    Declaration,
    Ruleset,
    AtRule,
    Import,
    MixinDefinition,
    MixinCall,
    DetachedRuleset,
    VariableCall,
}

#[derive(Debug, Clone)]
pub enum Node {
    Anonymous(Anonymous),
    Keyword(Keyword),
    Dimension(Dimension),
    Color(Color),
    Quoted(Quoted),
    Url(Url),
    Comment(Comment),
    Expression(Expression),
    Value(Value),
    Paren(Paren),
    Negative(Negative),
    Operation(Operation),
    Call(Call),
    Variable(Variable),
    Property(Property),
    Condition(Condition),
    Declaration(Declaration),
    Ruleset(Rc<Ruleset>),
    AtRule(AtRule),
    Import(Import),
    MixinDefinition(Rc<MixinDefinition>),
    MixinCall(MixinCall),
    DetachedRuleset(DetachedRuleset),
    VariableCall(VariableCall),
}

macro_rules! each_variant {
    ($node:expr, $inner:ident => $body:expr) => {
        match $node {
            Node::Anonymous($inner) => $body,
            Node::Keyword($inner) => $body,
            Node::Dimension($inner) => $body,
            Node::Color($inner) => $body,
            Node::Quoted($inner) => $body,
            Node::Url($inner) => $body,
            Node::Comment($inner) => $body,
            Node::Expression($inner) => $body,
            Node::Value($inner) => $body,
            Node::Paren($inner) => $body,
            Node::Negative($inner) => $body,
            Node::Operation($inner) => $body,
            Node::Call($inner) => $body,
            Node::Variable($inner) => $body,
            Node::Property($inner) => $body,
            Node::Condition($inner) => $body,
            Node::Declaration($inner) => $body,
            Node::AtRule($inner) => $body,
            Node::Import($inner) => $body,
            Node::MixinCall($inner) => $body,
            Node::DetachedRuleset($inner) => $body,
            Node::VariableCall($inner) => $body,
            Node::Ruleset($inner) => $body,
            Node::MixinDefinition($inner) => $body,
        }
    };
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Anonymous(_) => NodeKind::Anonymous,
            Node::Keyword(_) => NodeKind::Keyword,
            Node::Dimension(_) => NodeKind::Dimension,
            Node::Color(_) => NodeKind::Color,
            Node::Quoted(_) => NodeKind::Quoted,
            Node::Url(_) => NodeKind::Url,
            Node::Comment(_) => NodeKind::Comment,
            Node::Expression(_) => NodeKind::Expression,
            Node::Value(_) => NodeKind::Value,
            Node::Paren(_) => NodeKind::Paren,
            Node::Negative(_) => NodeKind::Negative,
            Node::Operation(_) => NodeKind::Operation,
            Node::Call(_) => NodeKind::Call,
            Node::Variable(_) => NodeKind::Variable,
            Node::Property(_) => NodeKind::Property,
            Node::Condition(_) => NodeKind::Condition,
            Node::Declaration(_) => NodeKind::Declaration,
            Node::Ruleset(_) => NodeKind::Ruleset,
            Node::AtRule(_) => NodeKind::AtRule,
            Node::Import(_) => NodeKind::Import,
            Node::MixinDefinition(_) => NodeKind::MixinDefinition,
            Node::MixinCall(_) => NodeKind::MixinCall,
            Node::DetachedRuleset(_) => NodeKind::DetachedRuleset,
            Node::VariableCall(_) => NodeKind::VariableCall,
        }
    }

    pub fn info(&self) -> &NodeInfo {
        each_variant!(self, inner => &inner.info)
    }

    /// 共享节点（规则集、mixin 定义）在写入前会被复制一份。
    pub fn info_mut(&mut self) -> &mut NodeInfo {
        match self {
            Node::Ruleset(ruleset) => &mut Rc::make_mut(ruleset).info,
            Node::MixinDefinition(definition) => &mut Rc::make_mut(definition).info,
            Node::Anonymous(inner) => &mut inner.info,
            Node::Keyword(inner) => &mut inner.info,
            Node::Dimension(inner) => &mut inner.info,
            Node::Color(inner) => &mut inner.info,
            Node::Quoted(inner) => &mut inner.info,
            Node::Url(inner) => &mut inner.info,
            Node::Comment(inner) => &mut inner.info,
            Node::Expression(inner) => &mut inner.info,
            Node::Value(inner) => &mut inner.info,
            Node::Paren(inner) => &mut inner.info,
            Node::Negative(inner) => &mut inner.info,
            Node::Operation(inner) => &mut inner.info,
            Node::Call(inner) => &mut inner.info,
            Node::Variable(inner) => &mut inner.info,
            Node::Property(inner) => &mut inner.info,
            Node::Condition(inner) => &mut inner.info,
            Node::Declaration(inner) => &mut inner.info,
            Node::AtRule(inner) => &mut inner.info,
            Node::Import(inner) => &mut inner.info,
            Node::MixinCall(inner) => &mut inner.info,
            Node::DetachedRuleset(inner) => &mut inner.info,
            Node::VariableCall(inner) => &mut inner.info,
        }
    }

    pub fn index(&self) -> Option<usize> {
        self.info().index
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        self.info().file_info()
    }

    pub fn with_info(mut self, info: NodeInfo) -> Self {
        *self.info_mut() = info;
        self
    }

    pub fn is_dimension(&self) -> bool {
        matches!(self, Node::Dimension(_))
    }

    pub fn as_dimension(&self) -> Option<&Dimension> {
        match self {
            Node::Dimension(dim) => Some(dim),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<&Color> {
        match self {
            Node::Color(color) => Some(color),
            _ => None,
        }
    }

    /// 括号分组标记，只有表达式会携带。
    pub fn parens(&self) -> bool {
        matches!(self, Node::Expression(expr) if expr.parens)
    }

    pub fn parens_in_op(&self) -> bool {
        matches!(self, Node::Expression(expr) if expr.parens_in_op)
    }

    pub fn mark_parens_in_op(&mut self) {
        if let Node::Expression(expr) = self {
            expr.parens_in_op = true;
        }
    }

    /// 节点的原始文本值，用于插值与 `@@name` 间接引用。
    pub fn text_value(&self) -> LessResult<String> {
        match self {
            Node::Quoted(quoted) => Ok(quoted.value.clone()),
            Node::Keyword(keyword) => Ok(keyword.value.clone()),
            Node::Anonymous(anonymous) => Ok(anonymous.value.clone()),
            other => other.to_css(&CssOptions::default()),
        }
    }

    /// 列表类节点的子项；其它节点视作只有自身一项。
    pub fn list_items(&self) -> Vec<Node> {
        match self {
            Node::Value(value) => value.value.clone(),
            Node::Expression(expr) => expr.value.clone(),
            other => vec![other.clone()],
        }
    }

    pub fn is_variable_declaration(&self) -> bool {
        matches!(self, Node::Declaration(decl) if decl.variable)
    }

    /// 逻辑真值：`true` 关键字或求值为真的条件。
    pub fn is_truthy(&self) -> bool {
        matches!(self, Node::Keyword(keyword) if keyword.value == "true")
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        match self {
            Node::Anonymous(_)
            | Node::Keyword(_)
            | Node::Dimension(_)
            | Node::Color(_)
            | Node::Comment(_) => Ok(self.clone()),
            Node::Quoted(quoted) => quoted.eval(ctx).map(Node::Quoted),
            Node::Url(url) => url.eval(ctx).map(Node::Url),
            Node::Expression(expr) => expr.eval(ctx),
            Node::Value(value) => value.eval(ctx),
            Node::Paren(paren) => paren.eval(ctx).map(Node::Paren),
            Node::Negative(negative) => negative.eval(ctx),
            Node::Operation(operation) => operation.eval(ctx),
            Node::Call(call) => call.eval(ctx),
            Node::Variable(variable) => variable.eval(ctx),
            Node::Property(property) => property.eval(ctx),
            Node::Condition(condition) => {
                let result = condition.eval_bool(ctx)?;
                Ok(Node::Keyword(Keyword::boolean(result)))
            }
            Node::Declaration(decl) => decl.eval(ctx).map(Node::Declaration),
            Node::Ruleset(ruleset) => Ok(Node::Ruleset(Rc::new(ruleset.eval(ctx)?))),
            Node::AtRule(at_rule) => at_rule.eval(ctx).map(Node::AtRule),
            Node::MixinDefinition(definition) => {
                Ok(Node::MixinDefinition(Rc::new(definition.eval(ctx))))
            }
            Node::DetachedRuleset(detached) => Ok(Node::DetachedRuleset(detached.eval(ctx))),
            // 会展开为多个节点的规则由 `eval_rules` 处理。
            Node::Import(_) | Node::MixinCall(_) | Node::VariableCall(_) => Ok(self.clone()),
        }
    }

    /// 规则位置上的求值：导入、mixin 调用与规则集调用会展开为零个或多个节点。
    pub fn eval_rules(&self, ctx: &mut EvalContext) -> LessResult<Vec<Node>> {
        match self {
            Node::Import(import) => import.eval_rules(ctx),
            Node::MixinCall(call) => call.eval_rules(ctx),
            Node::VariableCall(call) => Ok(call.eval(ctx)?.into_rules()),
            other => Ok(vec![other.eval(ctx)?]),
        }
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        match self {
            Node::Anonymous(inner) => inner.gen_css(output),
            Node::Keyword(inner) => inner.gen_css(output)?,
            Node::Dimension(inner) => inner.gen_css(opts, output)?,
            Node::Color(inner) => inner.gen_css(opts, output),
            Node::Quoted(inner) => inner.gen_css(output),
            Node::Url(inner) => inner.gen_css(opts, output)?,
            Node::Comment(inner) => inner.gen_css(output),
            Node::Expression(inner) => inner.gen_css(opts, output)?,
            Node::Value(inner) => inner.gen_css(opts, output)?,
            Node::Paren(inner) => inner.gen_css(opts, output)?,
            Node::Negative(inner) => inner.gen_css(opts, output)?,
            Node::Operation(inner) => inner.gen_css(opts, output)?,
            Node::Call(inner) => inner.gen_css(opts, output)?,
            Node::Variable(inner) => output.add(&inner.name, inner.info.file_info(), inner.info.index),
            Node::Property(inner) => output.add(&inner.name, inner.info.file_info(), inner.info.index),
            Node::Condition(inner) => inner.gen_css(opts, output)?,
            Node::Declaration(inner) => inner.gen_css(opts, output)?,
            Node::Ruleset(inner) => crate::serializer::Serializer::new(opts.compress)
                .write_ruleset(inner, opts, output)?,
            Node::AtRule(inner) => crate::serializer::Serializer::new(opts.compress)
                .write_at_rule(inner, opts, output)?,
            Node::Import(inner) => inner.gen_css(opts, output)?,
            Node::MixinDefinition(_)
            | Node::MixinCall(_)
            | Node::DetachedRuleset(_)
            | Node::VariableCall(_) => {}
        }
        Ok(())
    }

    pub fn to_css(&self, opts: &CssOptions) -> LessResult<String> {
        let mut output = CssOutput::new();
        self.gen_css(opts, &mut output)?;
        Ok(output.into_string())
    }

    /// 不带上下文的 CSS 文本，比较与模式匹配使用。
    pub fn to_plain_css(&self) -> String {
        self.to_css(&CssOptions::default()).unwrap_or_default()
    }

    /// 先让访问者处理自身，再按需深入子节点。
    pub fn accept(&mut self, visitor: &mut dyn Visitor) -> LessResult<()> {
        if visitor.visit(self)? {
            self.accept_children(visitor)?;
        }
        visitor.visit_out(self)
    }

    fn accept_children(&mut self, visitor: &mut dyn Visitor) -> LessResult<()> {
        match self {
            Node::Expression(Expression { value, .. }) | Node::Value(Value { value, .. }) => {
                for item in value.iter_mut() {
                    item.accept(visitor)?;
                }
            }
            Node::Paren(Paren { value, .. })
            | Node::Negative(Negative { value, .. })
            | Node::Url(Url { value, .. })
            | Node::Declaration(Declaration { value, .. }) => value.accept(visitor)?,
            Node::Operation(operation) => {
                operation.left.accept(visitor)?;
                operation.right.accept(visitor)?;
            }
            Node::Condition(condition) => {
                condition.lvalue.accept(visitor)?;
                condition.rvalue.accept(visitor)?;
            }
            Node::Call(call) => {
                for arg in call.args.iter_mut() {
                    arg.accept(visitor)?;
                }
            }
            Node::Ruleset(ruleset) => {
                for rule in Rc::make_mut(ruleset).rules_mut() {
                    rule.accept(visitor)?;
                }
            }
            Node::AtRule(at_rule) => {
                if let Some(value) = at_rule.value.as_mut() {
                    value.accept(visitor)?;
                }
                if let Some(block) = at_rule.block.as_mut() {
                    for rule in Rc::make_mut(block).rules_mut() {
                        rule.accept(visitor)?;
                    }
                }
            }
            Node::Import(import) => {
                import.path.accept(visitor)?;
                if let Some(features) = import.features.as_mut() {
                    features.accept(visitor)?;
                }
            }
            Node::MixinDefinition(definition) => {
                for rule in Rc::make_mut(definition).rules.iter_mut() {
                    rule.accept(visitor)?;
                }
            }
            Node::MixinCall(call) => {
                for arg in call.args.iter_mut() {
                    arg.value.accept(visitor)?;
                }
            }
            Node::DetachedRuleset(detached) => {
                for rule in Rc::make_mut(&mut detached.ruleset).rules_mut() {
                    rule.accept(visitor)?;
                }
            }
            Node::Anonymous(_)
            | Node::Keyword(_)
            | Node::Dimension(_)
            | Node::Color(_)
            | Node::Quoted(_)
            | Node::Comment(_)
            | Node::Variable(_)
            | Node::Property(_)
            | Node::VariableCall(_) => {}
        }
        Ok(())
    }

    /// 把规则及其嵌套声明标记为 `!important`。
    pub fn make_important(&self) -> Node {
        match self {
            Node::Declaration(decl) => {
                let mut decl = decl.clone();
                decl.important = true;
                Node::Declaration(decl)
            }
            Node::Ruleset(ruleset) => Node::Ruleset(Rc::new(ruleset.make_important())),
            other => other.clone(),
        }
    }

    fn has_compare(&self) -> bool {
        matches!(
            self,
            Node::Dimension(_) | Node::Color(_) | Node::Quoted(_) | Node::Anonymous(_)
        )
    }

    fn compare_to(&self, other: &Node) -> Option<Ordering> {
        match self {
            Node::Dimension(dim) => dim.compare(other),
            Node::Color(color) => color.compare(other),
            Node::Quoted(quoted) => quoted.compare(other),
            Node::Anonymous(anonymous) => anonymous.compare(other),
            _ => None,
        }
    }

    /// 通用比较：`None` 表示不可比较。
    pub fn compare(a: &Node, b: &Node) -> Option<Ordering> {
        if a.has_compare() && !matches!(b, Node::Quoted(_) | Node::Anonymous(_)) {
            return a.compare_to(b);
        }
        if b.has_compare() {
            return b.compare_to(a).map(Ordering::reverse);
        }
        if a.kind() != b.kind() {
            return None;
        }
        match (a, b) {
            (Node::Expression(Expression { value: left, .. }), Node::Expression(Expression { value: right, .. }))
            | (Node::Value(Value { value: left, .. }), Node::Value(Value { value: right, .. })) => {
                if left.len() != right.len() {
                    return None;
                }
                for (x, y) in left.iter().zip(right.iter()) {
                    if Node::compare(x, y) != Some(Ordering::Equal) {
                        return None;
                    }
                }
                Some(Ordering::Equal)
            }
            (Node::Keyword(x), Node::Keyword(y)) => (x.value == y.value).then_some(Ordering::Equal),
            _ => (a.to_plain_css() == b.to_plain_css()).then_some(Ordering::Equal),
        }
    }
}

impl From<Dimension> for Node {
    fn from(value: Dimension) -> Self {
        Node::Dimension(value)
    }
}

impl From<Color> for Node {
    fn from(value: Color) -> Self {
        Node::Color(value)
    }
}

impl From<Keyword> for Node {
    fn from(value: Keyword) -> Self {
        Node::Keyword(value)
    }
}

impl From<Anonymous> for Node {
    fn from(value: Anonymous) -> Self {
        Node::Anonymous(value)
    }
}

impl From<Quoted> for Node {
    fn from(value: Quoted) -> Self {
        Node::Quoted(value)
    }
}

impl From<Declaration> for Node {
    fn from(value: Declaration) -> Self {
        Node::Declaration(value)
    }
}

impl From<Ruleset> for Node {
    fn from(value: Ruleset) -> Self {
        Node::Ruleset(Rc::new(value))
    }
}
