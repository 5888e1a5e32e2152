use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use super::{Anonymous, AtRule, Expression, Node, NodeInfo, Ruleset};
use crate::context::EvalContext;
use crate::error::{LessError, LessResult};
use crate::functions::Plugin;
use crate::output::{CssOptions, Output};
use crate::utils::normalize_path;

static CSS_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#.&?]css([?;].*)?$").expect("CSS 扩展名正则编译失败"));

/// `@import (less, reference, ...)` 括号中的选项。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOptions {
    /// 显式的 `(less)` 或 `(css)`，未指定时按扩展名判断。
    pub less: Option<bool>,
    pub inline: bool,
    pub reference: bool,
    pub optional: bool,
    pub multiple: bool,
    pub once: bool,
    pub is_plugin: bool,
}

/// 导入加载完成后挂到节点上的内容。
#[derive(Debug, Clone)]
pub enum ImportRoot {
    Tree(Rc<Ruleset>),
    Inline(String),
    Plugin(Rc<dyn Plugin>),
}

/// 求值时是否跳过导入。`Once` 由第一次求值决定，同一节点之后沿用该结果。
#[derive(Debug, Clone, Default)]
pub enum ImportSkip {
    #[default]
    No,
    Yes,
    Once {
        key: String,
        seen: Rc<RefCell<HashSet<String>>>,
        decided: Rc<Cell<Option<bool>>>,
    },
}

impl ImportSkip {
    /// 每个导入节点各自持有一份判定结果，克隆出的节点共享它。
    pub fn once(key: impl Into<String>, seen: Rc<RefCell<HashSet<String>>>) -> Self {
        ImportSkip::Once {
            key: key.into(),
            seen,
            decided: Rc::new(Cell::new(None)),
        }
    }

    fn should_skip(&self) -> bool {
        match self {
            ImportSkip::No => false,
            ImportSkip::Yes => true,
            ImportSkip::Once { key, seen, decided } => {
                if let Some(skip) = decided.get() {
                    return skip;
                }
                let skip = !seen.borrow_mut().insert(key.clone());
                decided.set(Some(skip));
                skip
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Import {
    pub path: Box<Node>,
    pub features: Option<Box<Node>>,
    pub options: ImportOptions,
    /// 作为普通 CSS `@import` 原样输出。
    pub css: bool,
    pub root: Option<ImportRoot>,
    pub skip: ImportSkip,
    pub imported_filename: Option<String>,
    pub info: NodeInfo,
}

impl Import {
    pub fn new(path: Node, features: Option<Node>, options: ImportOptions, info: NodeInfo) -> Self {
        let mut import = Self {
            path: Box::new(path),
            features: features.map(Box::new),
            css: false,
            options,
            root: None,
            skip: ImportSkip::No,
            imported_filename: None,
            info,
        };
        import.css = if import.options.less.is_some() || import.options.inline {
            import.options.less != Some(true) || import.options.inline
        } else {
            import
                .get_path()
                .map_or(false, |path| CSS_EXTENSION.is_match(&path))
        };
        import
    }

    fn path_value(&self) -> &Node {
        match self.path.as_ref() {
            Node::Url(url) => url.value.as_ref(),
            other => other,
        }
    }

    /// 导入路径的字符串值，路径不是字符串时返回 `None`。
    pub fn get_path(&self) -> Option<String> {
        match self.path_value() {
            Node::Quoted(quoted) => Some(quoted.value.clone()),
            Node::Anonymous(anonymous) => Some(anonymous.value.clone()),
            _ => None,
        }
    }

    /// 路径含插值或本身不是字符串，需要先求值。
    pub fn is_variable_import(&self) -> bool {
        match self.path_value() {
            Node::Quoted(quoted) => quoted.contains_variables(),
            _ => true,
        }
    }

    /// 加载文件前只求值路径。
    pub fn eval_for_import(&self, ctx: &mut EvalContext) -> LessResult<Import> {
        let path = self.path_value().eval(ctx)?;
        let mut evaluated = Import::new(
            path,
            self.features.as_deref().cloned(),
            self.options.clone(),
            self.info.clone(),
        );
        evaluated
            .info
            .copy_visibility_info(self.info.visibility_info());
        Ok(evaluated)
    }

    fn eval_path(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        Ok(match self.path.eval(ctx)? {
            Node::Quoted(mut quoted) => {
                quoted.value = normalize_path(&quoted.value);
                Node::Quoted(quoted)
            }
            other => other,
        })
    }

    /// 特性列表以 `layer(...)` 开头。
    fn layer_features(features: &Node) -> Option<Node> {
        let expr = match features {
            Node::Value(value) if value.value.len() == 1 => &value.value[0],
            other => other,
        };
        let Node::Expression(expr) = expr else {
            return None;
        };
        let is_layer = expr.value.len() >= 2
            && matches!(&expr.value[0], Node::Keyword(keyword) if keyword.value == "layer")
            && matches!(&expr.value[1], Node::Paren(_));
        if !is_layer {
            return None;
        }
        let mut layer = Expression::new(expr.value[..2].to_vec());
        layer.no_spacing = true;
        let mut rest = vec![Node::Expression(layer)];
        rest.extend(expr.value[2..].iter().cloned());
        Some(Node::Expression(Expression::new(rest)))
    }

    /// 求值为零个或多个规则。
    pub fn eval_rules(&self, ctx: &mut EvalContext) -> LessResult<Vec<Node>> {
        let mut produced = self.eval_inner(ctx)?;
        if self.options.reference || self.info.blocks_visibility() {
            for node in produced.iter_mut() {
                node.info_mut().add_visibility_block();
            }
        }
        Ok(produced)
    }

    fn eval_inner(&self, ctx: &mut EvalContext) -> LessResult<Vec<Node>> {
        let located = |err: LessError| err.with_location(self.info.index, self.info.file_info());
        let features = match &self.features {
            Some(features) => Some(features.eval(ctx).map_err(located)?),
            None => None,
        };

        if self.options.is_plugin {
            if let Some(ImportRoot::Plugin(plugin)) = &self.root {
                plugin.eval(ctx).map_err(|err| {
                    LessError::plugin(format!("插件 {} 求值出错: {}", plugin.name(), err.message()))
                        .with_location(self.info.index, self.info.file_info())
                })?;
                if let Some(frame) = ctx.frames().first() {
                    frame.registry.add_multiple(plugin.functions());
                }
                debug!(plugin = plugin.name(), "插件函数已注册");
            }
            return Ok(Vec::new());
        }

        if self.skip.should_skip() {
            trace!(path = ?self.get_path(), "跳过重复导入");
            return Ok(Vec::new());
        }

        let layer = features.as_ref().and_then(Self::layer_features);
        if let Some(ImportRoot::Inline(contents)) = &self.root {
            let mut contents = Anonymous::rule(contents.clone());
            contents.info.file_info = self.info.file_info.clone();
            return Ok(wrap_in_media(vec![Node::Anonymous(contents)], features));
        }
        if self.css || layer.is_some() {
            let path = self.eval_path(ctx).map_err(located)?;
            let mut passthrough = Import::new(path, layer.or(features), self.options.clone(), self.info.clone());
            passthrough.css = true;
            return Ok(vec![Node::Import(passthrough)]);
        }
        match &self.root {
            Some(ImportRoot::Tree(root)) => {
                let mut ruleset = Ruleset::new(None, root.rules().to_vec());
                ruleset.eval_imports(ctx)?;
                Ok(wrap_in_media(ruleset.into_rules(), features))
            }
            _ => Ok(Vec::new()),
        }
    }

    /// 输出 `@import path features;`，只对原样输出的导入有效。
    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        if !self.css {
            return Ok(());
        }
        output.add("@import ", self.info.file_info(), self.info.index);
        self.path.gen_css(opts, output)?;
        if let Some(features) = &self.features {
            output.add(" ", None, None);
            features.gen_css(opts, output)?;
        }
        output.add(";", None, None);
        Ok(())
    }
}

fn wrap_in_media(rules: Vec<Node>, features: Option<Node>) -> Vec<Node> {
    match features {
        Some(features) => vec![Node::AtRule(AtRule::new(
            "@media",
            Some(features),
            Some(Ruleset::new(None, rules)),
        ))],
        None => rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::LessFunction;
    use crate::tree::{Declaration, Dimension, Keyword, Paren, Quoted, Url};
    use pretty_assertions::assert_eq;

    fn quoted(path: &str) -> Node {
        Node::Quoted(Quoted::new('"', path, false))
    }

    fn import(path: &str, options: ImportOptions) -> Import {
        Import::new(quoted(path), None, options, NodeInfo::default())
    }

    #[test]
    fn css_is_detected_from_extension_and_options() {
        assert!(import("a.css", ImportOptions::default()).css);
        assert!(import("a.css?v=1", ImportOptions::default()).css);
        assert!(!import("a.less", ImportOptions::default()).css);
        let forced = ImportOptions {
            less: Some(false),
            ..ImportOptions::default()
        };
        assert!(import("a.less", forced).css);
        let less = ImportOptions {
            less: Some(true),
            ..ImportOptions::default()
        };
        assert!(!import("a.css", less).css);
    }

    #[test]
    fn path_through_url_and_variables() {
        let url = Import::new(
            Node::Url(Url::new(quoted("x.less"))),
            None,
            ImportOptions::default(),
            NodeInfo::default(),
        );
        assert_eq!(url.get_path().as_deref(), Some("x.less"));
        assert!(!url.is_variable_import());
        assert!(import("@{dir}/x.less", ImportOptions::default()).is_variable_import());
    }

    #[test]
    fn css_import_passes_through_with_normalized_path() {
        let produced = import("./a/../b.css", ImportOptions::default())
            .eval_rules(&mut EvalContext::default())
            .unwrap();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].to_plain_css(), "@import \"b.css\";");
    }

    #[test]
    fn merged_tree_is_spliced_and_referenced_rules_are_blocked() {
        let root = Ruleset::root(vec![Declaration::variable("@x", Node::Dimension(Dimension::number(1.0))).into()]);
        let mut node = import(
            "lib.less",
            ImportOptions {
                reference: true,
                ..ImportOptions::default()
            },
        );
        node.root = Some(ImportRoot::Tree(Rc::new(root)));
        let produced = node.eval_rules(&mut EvalContext::default()).unwrap();
        assert_eq!(produced.len(), 1);
        assert!(produced[0].info().blocks_visibility());
    }

    #[test]
    fn once_gate_is_decided_per_node() {
        let seen = Rc::new(RefCell::new(HashSet::new()));
        let tree = Rc::new(Ruleset::root(vec![
            Declaration::new("color", Keyword::new("red").into()).into(),
        ]));
        let gated = |seen: &Rc<RefCell<HashSet<String>>>| {
            let mut node = import("lib.less", ImportOptions::default());
            node.root = Some(ImportRoot::Tree(tree.clone()));
            node.skip = ImportSkip::once("/lib.less", seen.clone());
            node
        };
        let first = gated(&seen);
        let second = gated(&seen);
        let mut ctx = EvalContext::default();
        assert_eq!(first.eval_rules(&mut ctx).unwrap().len(), 1);
        assert!(second.eval_rules(&mut ctx).unwrap().is_empty());
        // 同一节点再次求值（例如位于 mixin 体内）仍然输出
        assert_eq!(first.clone().eval_rules(&mut ctx).unwrap().len(), 1);
        assert!(second.eval_rules(&mut ctx).unwrap().is_empty());
    }

    #[test]
    fn inline_contents_with_features_are_wrapped_in_media() {
        let mut node = Import::new(
            quoted("raw.css"),
            Some(Node::Keyword(Keyword::new("print"))),
            ImportOptions {
                inline: true,
                ..ImportOptions::default()
            },
            NodeInfo::default(),
        );
        node.root = Some(ImportRoot::Inline(".raw{}".into()));
        let produced = node.eval_rules(&mut EvalContext::default()).unwrap();
        let Node::AtRule(media) = &produced[0] else {
            panic!("应为 @media");
        };
        assert_eq!(media.prelude(&CssOptions::default()).unwrap(), "@media print");
        assert_eq!(media.block.as_ref().unwrap().rules()[0].to_plain_css(), ".raw{}");
    }

    #[test]
    fn layer_feature_forces_passthrough() {
        let layer = Node::Expression(Expression::new(vec![
            Node::Keyword(Keyword::new("layer")),
            Node::Paren(Paren::new(Node::Keyword(Keyword::new("base")))),
        ]));
        let node = Import::new(quoted("theme.less"), Some(layer), ImportOptions::default(), NodeInfo::default());
        let produced = node.eval_rules(&mut EvalContext::default()).unwrap();
        assert_eq!(produced[0].to_plain_css(), "@import \"theme.less\" layer(base);");
    }

    #[derive(Debug)]
    struct Doubler;

    impl Plugin for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn functions(&self) -> Vec<(String, LessFunction)> {
            vec![(
                "double".to_string(),
                LessFunction::new(|_, args| {
                    Ok(args
                        .first()
                        .and_then(Node::as_dimension)
                        .map(|dim| Node::Dimension(Dimension::new(dim.value * 2.0, dim.unit.clone()))))
                }),
            )]
        }
    }

    #[test]
    fn plugin_registers_into_innermost_frame() {
        let mut ctx = EvalContext::default();
        ctx.push_frame(Rc::new(Ruleset::root(Vec::new())));
        let mut node = import(
            "doubler",
            ImportOptions {
                is_plugin: true,
                ..ImportOptions::default()
            },
        );
        node.root = Some(ImportRoot::Plugin(Rc::new(Doubler)));
        assert!(node.eval_rules(&mut ctx).unwrap().is_empty());
        assert!(ctx.function_registry().get("double").is_some());
        assert!(crate::functions::FunctionRegistry::global().get("double").is_none());
    }
}
