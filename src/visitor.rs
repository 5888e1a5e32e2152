//! 整树遍历。

use std::rc::Rc;

use crate::error::LessResult;
use crate::tree::{join_selector, Node, Selector};

/// 遍历钩子：`visit` 返回假时跳过该节点的子节点。
pub trait Visitor {
    fn visit(&mut self, node: &mut Node) -> LessResult<bool>;

    fn visit_out(&mut self, _node: &mut Node) -> LessResult<()> {
        Ok(())
    }
}

/// 求值之后计算每个规则集的完整选择器路径。
#[derive(Debug)]
pub struct JoinSelectorVisitor {
    contexts: Vec<Vec<Vec<Selector>>>,
}

impl Default for JoinSelectorVisitor {
    fn default() -> Self {
        Self {
            contexts: vec![Vec::new()],
        }
    }
}

impl JoinSelectorVisitor {
    pub fn run(&mut self, root: &mut Node) -> LessResult<()> {
        root.accept(self)
    }

    fn current(&self) -> Vec<Vec<Selector>> {
        self.contexts.last().cloned().unwrap_or_default()
    }
}

impl Visitor for JoinSelectorVisitor {
    fn visit(&mut self, node: &mut Node) -> LessResult<bool> {
        match node {
            Node::Ruleset(ruleset) => {
                let context = self.current();
                let ruleset = Rc::make_mut(ruleset);
                let mut paths = Vec::new();
                if !ruleset.root {
                    let selectors: Vec<Selector> = ruleset
                        .selectors
                        .take()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|selector| selector.evald_condition)
                        .collect();
                    if selectors.is_empty() {
                        ruleset.rules_mut().clear();
                    } else {
                        for selector in &selectors {
                            join_selector(&mut paths, &context, selector);
                        }
                        ruleset.selectors = Some(selectors);
                    }
                    ruleset.paths = paths.clone();
                }
                self.contexts.push(paths);
                Ok(true)
            }
            Node::AtRule(at_rule) => {
                let context_empty = self.current().is_empty();
                if let Some(mut block) = at_rule.block.take() {
                    let inner = Rc::make_mut(&mut block);
                    if at_rule.is_rooted || context_empty {
                        inner.root = true;
                    } else {
                        inner.root = false;
                        if inner.selectors.is_none() {
                            inner.selectors = Some(Selector::create_empty_selectors());
                        }
                    }
                    // 块本身也要作为规则集访问，才能得到路径
                    let mut block = Node::Ruleset(block);
                    block.accept(self)?;
                    if let Node::Ruleset(block) = block {
                        at_rule.block = Some(block);
                    }
                }
                Ok(false)
            }
            Node::MixinDefinition(_) | Node::DetachedRuleset(_) | Node::Declaration(_) => Ok(false),
            _ => Ok(true),
        }
    }

    fn visit_out(&mut self, node: &mut Node) -> LessResult<()> {
        if matches!(node, Node::Ruleset(_)) {
            self.contexts.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{AtRule, Anonymous, Declaration, Keyword, Ruleset};
    use crate::output::CssOptions;
    use crate::tree::path_to_css;
    use pretty_assertions::assert_eq;

    fn nested(selector: &str, rules: Vec<Node>) -> Node {
        Ruleset::new(Some(vec![Selector::simple(selector)]), rules).into()
    }

    fn paths_of(node: &Node) -> Vec<String> {
        let Node::Ruleset(ruleset) = node else {
            panic!("应为规则集");
        };
        ruleset
            .paths
            .iter()
            .map(|path| path_to_css(path, &CssOptions::default()))
            .collect()
    }

    #[test]
    fn nested_rulesets_get_full_paths() {
        let mut root: Node = Ruleset::root(vec![nested(".a", vec![nested(".b", Vec::new())])]).into();
        JoinSelectorVisitor::default().run(&mut root).unwrap();
        let Node::Ruleset(root) = &root else { unreachable!() };
        let a = &root.rules()[0];
        assert_eq!(paths_of(a), vec![".a"]);
        let Node::Ruleset(a) = a else { unreachable!() };
        assert_eq!(paths_of(&a.rules()[0]), vec![".a .b"]);
    }

    #[test]
    fn failed_guards_drop_the_ruleset_body() {
        let mut selector = Selector::simple(".hidden");
        selector.evald_condition = false;
        let hidden = Ruleset::new(
            Some(vec![selector]),
            vec![Declaration::new("color", Keyword::new("red").into()).into()],
        );
        let mut root: Node = Ruleset::root(vec![hidden.into()]).into();
        JoinSelectorVisitor::default().run(&mut root).unwrap();
        let Node::Ruleset(root) = &root else { unreachable!() };
        let Node::Ruleset(hidden) = &root.rules()[0] else { unreachable!() };
        assert!(hidden.selectors.is_none());
        assert!(hidden.rules().is_empty());
    }

    #[test]
    fn conditional_at_rule_block_inherits_parent_paths() {
        let media = AtRule::new(
            "@media",
            Some(Node::Anonymous(Anonymous::new("print"))),
            Some(Ruleset::new(None, vec![Declaration::new("color", Keyword::new("red").into()).into()])),
        );
        let mut root: Node = Ruleset::root(vec![nested(".a", vec![Node::AtRule(media)])]).into();
        JoinSelectorVisitor::default().run(&mut root).unwrap();
        let Node::Ruleset(root) = &root else { unreachable!() };
        let Node::Ruleset(a) = &root.rules()[0] else { unreachable!() };
        let Node::AtRule(media) = &a.rules()[0] else { unreachable!() };
        let block = media.block.as_ref().unwrap();
        assert!(!block.root);
        assert_eq!(paths_of(&Node::Ruleset(block.clone())), vec![".a"]);
    }

    #[test]
    fn top_level_at_rule_block_is_root() {
        let media = AtRule::new(
            "@media",
            Some(Node::Anonymous(Anonymous::new("print"))),
            Some(Ruleset::new(None, vec![nested(".b", Vec::new())])),
        );
        let mut root: Node = Ruleset::root(vec![Node::AtRule(media)]).into();
        JoinSelectorVisitor::default().run(&mut root).unwrap();
        let Node::Ruleset(root) = &root else { unreachable!() };
        let Node::AtRule(media) = &root.rules()[0] else { unreachable!() };
        let block = media.block.as_ref().unwrap();
        assert!(block.root);
        assert_eq!(paths_of(&block.rules()[0]), vec![".b"]);
    }
}
