use crate::error::LessResult;
use crate::output::{CssOptions, Output};
use crate::tree::{path_to_css, AtRule, Node, Ruleset};
use crate::utils::{collapse_whitespace, indent};

/// 块内的一行：声明需要分号结尾，注释等原样输出。
#[derive(Debug, Clone)]
enum Line {
    Declaration(String),
    Raw(String),
}

/// 扁平化后的输出块，嵌套规则集已经展开为同级。
#[derive(Debug, Clone)]
enum Block {
    Rule { selectors: Vec<String>, body: Vec<Line> },
    AtRule { prelude: String, body: Vec<Line>, children: Vec<Block> },
    Raw(String),
}

#[derive(Debug, Default)]
struct Stylesheet {
    charset: Option<String>,
    imports: Vec<String>,
    blocks: Vec<Block>,
}

/// 把求值并连接过选择器的树展开为 `Block` 列表。
struct Flattener<'a> {
    opts: &'a CssOptions,
    sheet: Stylesheet,
}

impl<'a> Flattener<'a> {
    fn new(opts: &'a CssOptions) -> Self {
        Self {
            opts,
            sheet: Stylesheet::default(),
        }
    }

    fn push_loose(body: &mut Option<&mut Vec<Line>>, blocks: &mut Vec<Block>, line: Line) {
        match body {
            Some(body) => body.push(line),
            None => {
                let text = match line {
                    Line::Declaration(text) => format!("{text};"),
                    Line::Raw(text) => text,
                };
                blocks.push(Block::Raw(text));
            }
        }
    }

    fn ruleset(
        &mut self,
        ruleset: &Ruleset,
        body: Option<&mut Vec<Line>>,
        blocks: &mut Vec<Block>,
    ) -> LessResult<()> {
        if ruleset.info.is_hidden() {
            return Ok(());
        }
        if ruleset.root {
            return self.rules(ruleset.rules(), body, blocks);
        }
        if ruleset.paths.is_empty() {
            return Ok(());
        }
        let mut own = Vec::new();
        let mut nested = Vec::new();
        self.rules(ruleset.rules(), Some(&mut own), &mut nested)?;
        if !own.is_empty() {
            let selectors = ruleset
                .paths
                .iter()
                .map(|path| path_to_css(path, self.opts))
                .collect();
            blocks.push(Block::Rule {
                selectors,
                body: own,
            });
        }
        blocks.extend(nested);
        Ok(())
    }

    fn rules(
        &mut self,
        rules: &[Node],
        mut body: Option<&mut Vec<Line>>,
        blocks: &mut Vec<Block>,
    ) -> LessResult<()> {
        for rule in rules {
            if rule.info().is_hidden() {
                continue;
            }
            match rule {
                Node::Declaration(decl) if !decl.variable => {
                    Self::push_loose(&mut body, blocks, Line::Declaration(rule.to_css(self.opts)?));
                }
                Node::Comment(comment) if !comment.is_silent(self.opts.compress) => {
                    Self::push_loose(&mut body, blocks, Line::Raw(rule.to_css(self.opts)?));
                }
                Node::Anonymous(anonymous) if anonymous.rule_like => {
                    Self::push_loose(&mut body, blocks, Line::Raw(rule.to_css(self.opts)?));
                }
                Node::Ruleset(ruleset) => self.ruleset(ruleset, body.as_deref_mut(), blocks)?,
                Node::AtRule(at_rule) => self.at_rule(at_rule, body.as_deref_mut(), blocks)?,
                Node::Import(import) if import.css => {
                    self.sheet.imports.push(rule.to_css(self.opts)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn at_rule(
        &mut self,
        at_rule: &AtRule,
        mut body: Option<&mut Vec<Line>>,
        blocks: &mut Vec<Block>,
    ) -> LessResult<()> {
        let prelude = at_rule.prelude(self.opts)?;
        let Some(block) = &at_rule.block else {
            if at_rule.is_charset() {
                // 只保留第一个 @charset
                self.sheet.charset.get_or_insert(format!("{prelude};"));
            } else {
                Self::push_loose(&mut body, blocks, Line::Raw(format!("{prelude};")));
            }
            return Ok(());
        };
        let mut inner = Vec::new();
        let mut children = Vec::new();
        self.ruleset(block, Some(&mut inner), &mut children)?;
        if !inner.is_empty() || !children.is_empty() {
            blocks.push(Block::AtRule {
                prelude,
                body: inner,
                children,
            });
        }
        Ok(())
    }
}

/// 负责将扁平化的规则转换为最终 CSS 文本。
pub struct Serializer {
    minify: bool,
}

impl Serializer {
    pub fn new(minify: bool) -> Self {
        Self { minify }
    }

    /// 序列化整棵根规则集。
    pub fn to_css(&self, root: &Ruleset, opts: &CssOptions) -> LessResult<String> {
        let mut flattener = Flattener::new(opts);
        let mut blocks = Vec::new();
        flattener.ruleset(root, None, &mut blocks)?;
        let mut sheet = flattener.sheet;
        sheet.blocks = blocks;
        Ok(self.render(&sheet))
    }

    pub fn write_ruleset(
        &self,
        ruleset: &Ruleset,
        opts: &CssOptions,
        output: &mut dyn Output,
    ) -> LessResult<()> {
        let css = self.to_css(ruleset, opts)?;
        output.add(&css, ruleset.info.file_info(), ruleset.info.index);
        Ok(())
    }

    pub fn write_at_rule(
        &self,
        at_rule: &AtRule,
        opts: &CssOptions,
        output: &mut dyn Output,
    ) -> LessResult<()> {
        let mut flattener = Flattener::new(opts);
        let mut blocks = Vec::new();
        flattener.at_rule(at_rule, None, &mut blocks)?;
        let mut sheet = flattener.sheet;
        sheet.blocks = blocks;
        output.add(&self.render(&sheet), at_rule.info.file_info(), at_rule.info.index);
        Ok(())
    }

    fn render(&self, sheet: &Stylesheet) -> String {
        if self.minify {
            self.render_minified(sheet)
        } else {
            self.render_pretty(sheet)
        }
    }

    fn hoisted(sheet: &Stylesheet) -> impl Iterator<Item = &String> {
        sheet.charset.iter().chain(sheet.imports.iter())
    }

    fn render_pretty(&self, sheet: &Stylesheet) -> String {
        let mut output = String::new();
        for line in Self::hoisted(sheet) {
            output.push_str(line.trim());
            output.push('\n');
        }
        if !output.is_empty() && !sheet.blocks.is_empty() {
            output.push('\n');
        }
        for (idx, block) in sheet.blocks.iter().enumerate() {
            self.render_block_pretty(block, 0, &mut output);
            let next_is_raw = matches!(sheet.blocks.get(idx + 1), Some(Block::Raw(_)));
            if idx + 1 < sheet.blocks.len() && !(matches!(block, Block::Raw(_)) && next_is_raw) {
                output.push('\n');
            }
        }
        output.trim().to_string()
    }

    fn render_minified(&self, sheet: &Stylesheet) -> String {
        let mut output = String::new();
        for line in Self::hoisted(sheet) {
            output.push_str(line.trim());
            output.push('\n');
        }
        for block in &sheet.blocks {
            self.render_block_minified(block, &mut output);
        }
        while output.ends_with('\n') {
            output.pop();
        }
        output
    }

    fn render_body_pretty(&self, body: &[Line], level: usize, output: &mut String) {
        for line in body {
            output.push_str(&indent(level));
            match line {
                Line::Declaration(text) => {
                    output.push_str(text.trim());
                    output.push(';');
                }
                Line::Raw(text) => output.push_str(text.trim()),
            }
            output.push('\n');
        }
    }

    fn render_block_pretty(&self, block: &Block, level: usize, output: &mut String) {
        match block {
            Block::Rule { selectors, body } => {
                output.push_str(&indent(level));
                output.push_str(&selectors.join(", "));
                output.push_str(" {\n");
                self.render_body_pretty(body, level + 1, output);
                output.push_str(&indent(level));
                output.push_str("}\n");
            }
            Block::AtRule {
                prelude,
                body,
                children,
            } => {
                output.push_str(&indent(level));
                output.push_str(prelude.trim());
                output.push_str(" {\n");
                self.render_body_pretty(body, level + 1, output);
                for child in children {
                    self.render_block_pretty(child, level + 1, output);
                    if !output.ends_with('\n') {
                        output.push('\n');
                    }
                }
                output.push_str(&indent(level));
                output.push_str("}\n");
            }
            Block::Raw(text) => {
                output.push_str(&indent(level));
                output.push_str(text.trim());
                output.push('\n');
            }
        }
    }

    fn render_body_minified(&self, body: &[Line], output: &mut String) {
        let mut need_separator = false;
        for line in body {
            match line {
                Line::Declaration(text) => {
                    if need_separator {
                        output.push(';');
                    }
                    output.push_str(text.trim());
                    need_separator = true;
                }
                Line::Raw(text) => {
                    if need_separator {
                        output.push(';');
                    }
                    output.push_str(text.trim());
                    need_separator = false;
                }
            }
        }
    }

    fn render_block_minified(&self, block: &Block, output: &mut String) {
        match block {
            Block::Rule { selectors, body } => {
                output.push_str(&selectors.join(","));
                output.push('{');
                self.render_body_minified(body, output);
                output.push('}');
            }
            Block::AtRule {
                prelude,
                body,
                children,
            } => {
                output.push_str(&collapse_whitespace(prelude));
                output.push('{');
                self.render_body_minified(body, output);
                for child in children {
                    self.render_block_minified(child, output);
                }
                output.push('}');
            }
            Block::Raw(text) => output.push_str(text.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Anonymous, Comment, Declaration, Import, ImportOptions, Keyword, NodeInfo, Quoted, Selector};
    use crate::visitor::JoinSelectorVisitor;
    use pretty_assertions::assert_eq;

    fn decl(name: &str, value: &str) -> Node {
        Declaration::new(name, Keyword::new(value).into()).into()
    }

    fn nested(selector: &str, rules: Vec<Node>) -> Node {
        Ruleset::new(Some(vec![Selector::simple(selector)]), rules).into()
    }

    fn render(rules: Vec<Node>, minify: bool) -> String {
        let mut root: Node = Ruleset::root(rules).into();
        JoinSelectorVisitor::default().run(&mut root).unwrap();
        let Node::Ruleset(root) = root else { unreachable!() };
        let opts = CssOptions {
            compress: minify,
            ..CssOptions::default()
        };
        Serializer::new(minify).to_css(&root, &opts).unwrap()
    }

    fn sample() -> Vec<Node> {
        vec![
            nested(
                ".a",
                vec![
                    decl("color", "red"),
                    nested(".b", vec![decl("margin", "auto"), decl("padding", "none")]),
                ],
            ),
            Node::AtRule(AtRule::new(
                "@media",
                Some(Node::Anonymous(Anonymous::new("print"))),
                Some(Ruleset::new(None, vec![nested(".c", vec![decl("display", "none")])])),
            )),
        ]
    }

    #[test]
    fn pretty_output_flattens_nesting() {
        assert_eq!(
            render(sample(), false),
            ".a {\n  color: red;\n}\n\n.a .b {\n  margin: auto;\n  padding: none;\n}\n\n@media print {\n  .c {\n    display: none;\n  }\n}"
        );
    }

    #[test]
    fn minified_output() {
        assert_eq!(
            render(sample(), true),
            ".a{color:red}.a .b{margin:auto;padding:none}@media print{.c{display:none}}"
        );
    }

    #[test]
    fn imports_and_charset_are_hoisted() {
        let import = Import::new(
            Node::Quoted(Quoted::new('"', "base.css", false)),
            None,
            ImportOptions::default(),
            NodeInfo::default(),
        );
        let charset = AtRule::new("@charset", Some(Node::Quoted(Quoted::new('"', "utf-8", false))), None);
        let css = render(
            vec![nested(".a", vec![decl("color", "red")]), Node::Import(import), Node::AtRule(charset)],
            false,
        );
        assert_eq!(css, "@charset \"utf-8\";\n@import \"base.css\";\n\n.a {\n  color: red;\n}");
    }

    #[test]
    fn bubbled_media_keeps_parent_selector() {
        let media = AtRule::new(
            "@media",
            Some(Node::Anonymous(Anonymous::new("print"))),
            Some(Ruleset::new(None, vec![decl("color", "black")])),
        );
        let css = render(vec![nested(".a", vec![decl("color", "red"), Node::AtRule(media)])], false);
        assert_eq!(css, ".a {\n  color: red;\n}\n\n@media print {\n  .a {\n    color: black;\n  }\n}");
    }

    #[test]
    fn hidden_and_silent_nodes_are_skipped() {
        let mut hidden = nested(".ref", vec![decl("color", "red")]);
        hidden.info_mut().add_visibility_block();
        let css = render(
            vec![
                Node::Comment(Comment::new("// gone", true)),
                Node::Comment(Comment::new("/* kept */", false)),
                hidden,
                Declaration::variable("@x", Keyword::new("y").into()).into(),
                nested(".a", vec![decl("color", "blue")]),
            ],
            false,
        );
        assert_eq!(css, "/* kept */\n\n.a {\n  color: blue;\n}");
    }
}
