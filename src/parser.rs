//! LESS 源码解析：带回退的游标式递归下降，直接产出语法树节点。

use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::NodeParser;
use crate::error::{LessError, LessResult};
use crate::tree::{
    Anonymous, AtRule, Call, Color, Combinator, Comment, Condition, ConditionOp, Declaration,
    DetachedRuleset, Dimension, Element, Expression, FileInfo, Import, ImportOptions, Keyword,
    MixinArg, MixinCall, MixinDefinition, MixinParam, Negative, Node, NodeInfo, Op, Operation,
    Paren, Property, Quoted, Ruleset, Selector, Url, Value, Variable, VariableCall,
};

static DIMENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([+-]?(?:\d*\.\d+|\d+)(?:[eE][+-]?\d+)?)(%|[a-zA-Z_]+)?").expect("数值正则编译失败")
});

static HEX_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#([A-Fa-f0-9]{8}|[A-Fa-f0-9]{6}|[A-Fa-f0-9]{3,4})([\w.#\[])?")
        .expect("颜色正则编译失败")
});

static KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[\w-]|\\(?:[A-Fa-f0-9]{1,6} ?|[^A-Fa-f0-9]))+").expect("关键字正则编译失败")
});

/// 值表达式的公共终止符。
const VALUE_STOPS: &[char] = &[',', ';', '{', '}', ')', '!'];

/// LESS 解析器，负责把源码转换成以根规则集为顶点的节点树。
#[derive(Debug, Default, Clone)]
pub struct LessParser {
    file_info: Option<Rc<FileInfo>>,
}

impl LessParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 节点位置信息会带上所属文件，供错误定位与引用导入使用。
    pub fn with_file_info(file_info: Rc<FileInfo>) -> Self {
        Self {
            file_info: Some(file_info),
        }
    }

    pub fn file_info(&self) -> Option<&Rc<FileInfo>> {
        self.file_info.as_ref()
    }

    pub fn parse(&self, input: &str) -> LessResult<Ruleset> {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let mut cursor = Cursor::new(input);
        let rules = self.parse_rules(&mut cursor, false)?;
        let mut root = Ruleset::root(rules);
        root.info = self.info(0);
        Ok(root)
    }

    /// 解析逗号分隔的选择器列表。`offset` 是文本在源文件中的起点。
    pub fn parse_selector_list(&self, text: &str, offset: usize) -> LessResult<Vec<Selector>> {
        let mut cursor = Cursor::with_offset(text, offset);
        let mut selectors = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.is_eof() {
                break;
            }
            selectors.push(self.parse_selector(&mut cursor)?);
            cursor.skip_whitespace_and_comments();
            if !cursor.match_str(",") {
                break;
            }
        }
        cursor.skip_whitespace_and_comments();
        if !cursor.is_eof() || selectors.is_empty() {
            return Err(LessError::parse("选择器不合法", cursor.index()));
        }
        Ok(selectors)
    }

    fn info(&self, index: usize) -> NodeInfo {
        NodeInfo::at(Some(index), self.file_info.clone())
    }

    fn parse_rules(&self, cursor: &mut Cursor<'_>, in_block: bool) -> LessResult<Vec<Node>> {
        let mut rules = Vec::new();
        loop {
            cursor.skip_whitespace();
            if cursor.is_eof() {
                if in_block {
                    return Err(LessError::parse("缺少与之匹配的 '}'", cursor.index()));
                }
                break;
            }
            if cursor.starts_with('}') {
                if in_block {
                    cursor.advance_char();
                    break;
                }
                return Err(LessError::parse("多余的 '}'", cursor.index()));
            }
            if cursor.match_str(";") {
                continue;
            }
            if cursor.starts_with_str("/*") {
                let index = cursor.index();
                let text = cursor.read_block_comment()?;
                rules.push(Node::Comment(Comment::new(text, false)).with_info(self.info(index)));
                continue;
            }
            if cursor.starts_with_str("//") {
                cursor.consume_comment();
                continue;
            }
            rules.push(self.parse_rule(cursor)?);
        }
        Ok(rules)
    }

    fn parse_rule(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        match cursor.peek_char() {
            Some('@') if cursor.peek_nth(1) != Some('{') => self.parse_at_statement(cursor),
            Some('.') | Some('#') => {
                if cursor.lookahead_is_mixin_definition()? {
                    self.parse_mixin_definition(cursor)
                } else if cursor.lookahead_is_mixin_call() {
                    self.parse_mixin_call(cursor)
                } else {
                    self.parse_ruleset(cursor)
                }
            }
            _ => match cursor.detect_body_kind() {
                Some(BodyKind::Declaration) => self.parse_declaration(cursor),
                Some(BodyKind::NestedRule) => self.parse_ruleset(cursor),
                None => Err(LessError::parse("无法识别的语句", cursor.index())),
            },
        }
    }

    fn parse_at_statement(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let mut lookahead = cursor.clone();
        lookahead.advance_char();
        let ident = lookahead.read_identifier();
        if ident.is_empty() {
            return Err(LessError::parse("at 规则名称不合法", cursor.index()));
        }
        if cursor.lookahead_is_variable_decl()? && !ident.eq_ignore_ascii_case("page") {
            return self.parse_variable(cursor);
        }
        if ident.eq_ignore_ascii_case("import") {
            return self.parse_import(cursor);
        }
        if ident.eq_ignore_ascii_case("plugin") {
            return self.parse_plugin(cursor);
        }
        if cursor.lookahead_is_detached_call()? {
            return self.parse_detached_call(cursor);
        }
        self.parse_at_rule(cursor)
    }

    fn parse_variable(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        cursor.expect_char('@')?;
        let name = format!("@{}", cursor.read_identifier());
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(':')?;
        cursor.skip_whitespace_and_comments();

        if cursor.starts_with('{') {
            let block_index = cursor.index();
            cursor.advance_char();
            let rules = self.parse_rules(cursor, true)?;
            let mut ruleset = Ruleset::new(None, rules);
            ruleset.info = self.info(block_index);
            let detached = Node::DetachedRuleset(DetachedRuleset::new(Rc::new(ruleset)))
                .with_info(self.info(block_index));
            cursor.skip_whitespace();
            cursor.match_str(";");
            let mut decl = Declaration::variable(name, detached);
            decl.info = self.info(index);
            return Ok(Node::Declaration(decl));
        }

        let (value, important) = self.parse_declaration_value(cursor, &name)?;
        let mut decl = Declaration::variable(name, value);
        decl.important = important;
        decl.info = self.info(index);
        Ok(Node::Declaration(decl))
    }

    fn parse_declaration(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        let name = cursor.read_property_name();
        if name.is_empty() {
            return Err(LessError::parse("属性名不能为空", index));
        }
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(':')?;
        cursor.skip_whitespace_and_comments();
        let (value, important) = self.parse_declaration_value(cursor, &name)?;
        let mut decl = Declaration::new(name, value);
        decl.important = important;
        decl.info = self.info(index);
        Ok(Node::Declaration(decl))
    }

    /// 解析 `;` 或 `}` 之前的声明值。表达式解析不完整时整段按原文保留。
    fn parse_declaration_value(&self, cursor: &mut Cursor<'_>, name: &str) -> LessResult<(Node, bool)> {
        let start = cursor.clone();
        let index = cursor.index();
        if !name.starts_with("--") {
            let value = self.parse_value_list(cursor)?;
            cursor.skip_whitespace_and_comments();
            let important = cursor.parse_important();
            cursor.skip_whitespace_and_comments();
            if matches!(cursor.peek_char(), None | Some(';') | Some('}')) {
                cursor.match_str(";");
                let value = value.unwrap_or_else(|| Node::Anonymous(Anonymous::new("")));
                return Ok((value, important));
            }
        }

        *cursor = start;
        let raw = cursor.read_raw_value();
        cursor.match_str(";");
        let trimmed = raw.trim();
        let (text, important) = match trimmed.strip_suffix("!important") {
            Some(rest) => (rest.trim_end(), true),
            None => (trimmed, false),
        };
        if text.is_empty() && !name.starts_with("--") {
            return Err(LessError::parse(format!("属性 {name} 缺少值"), index));
        }
        Ok((Node::Anonymous(Anonymous::new(text)).with_info(self.info(index)), important))
    }

    fn parse_ruleset(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        let text = cursor.read_selector_text()?;
        let mut selectors = self.parse_selector_list(&text, index)?;
        cursor.skip_whitespace_and_comments();
        if cursor.starts_with_keyword("when") {
            cursor.consume_keyword("when");
            let condition = self.parse_guard(cursor)?;
            selectors = selectors
                .into_iter()
                .map(|selector| selector.with_condition(condition.clone()))
                .collect();
            cursor.skip_whitespace_and_comments();
        }
        cursor.expect_char('{')?;
        let rules = self.parse_rules(cursor, true)?;
        let mut ruleset = Ruleset::new(Some(selectors), rules);
        ruleset.info = self.info(index);
        Ok(Node::Ruleset(Rc::new(ruleset)))
    }

    fn parse_selector(&self, cursor: &mut Cursor<'_>) -> LessResult<Selector> {
        let index = cursor.index();
        let mut elements = Vec::new();
        loop {
            let spaced = cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                None | Some(',') => break,
                _ => {}
            }
            let element_index = cursor.index();
            let combinator = match cursor.peek_char() {
                Some(ch @ ('>' | '+' | '~')) => {
                    cursor.advance_char();
                    cursor.skip_whitespace_and_comments();
                    Combinator::new(&ch.to_string())
                }
                _ if spaced && !elements.is_empty() => Combinator::new(" "),
                _ => Combinator::default(),
            };
            let value = cursor.read_selector_element()?;
            let mut element = Element::new(combinator, value);
            element.info = self.info(element_index);
            elements.push(element);
        }
        if elements.is_empty() {
            return Err(LessError::parse("选择器为空", index));
        }
        let mut selector = Selector::new(elements);
        selector.info = self.info(index);
        Ok(selector)
    }

    fn parse_at_rule(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        cursor.expect_char('@')?;
        let name = format!("@{}", cursor.read_identifier());
        let prelude = self.parse_prelude(cursor, &['{', ';', '}'])?;
        cursor.skip_whitespace_and_comments();
        let block = if cursor.starts_with('{') {
            let block_index = cursor.index();
            cursor.advance_char();
            let rules = self.parse_rules(cursor, true)?;
            let mut ruleset = Ruleset::new(None, rules);
            ruleset.info = self.info(block_index);
            Some(ruleset)
        } else {
            cursor.match_str(";");
            None
        };
        let mut at_rule = AtRule::new(name, prelude, block);
        at_rule.info = self.info(index);
        Ok(Node::AtRule(at_rule))
    }

    /// at 规则与导入的媒体查询部分：括号里的 `name: value` 会被解析，其余按词保留。
    fn parse_prelude(&self, cursor: &mut Cursor<'_>, stops: &[char]) -> LessResult<Option<Node>> {
        let mut groups: Vec<Vec<Node>> = vec![Vec::new()];
        loop {
            cursor.skip_whitespace_and_comments();
            let Some(ch) = cursor.peek_char() else { break };
            if stops.contains(&ch) {
                break;
            }
            let index = cursor.index();
            let node = match ch {
                ',' => {
                    cursor.advance_char();
                    groups.push(Vec::new());
                    continue;
                }
                '(' => self.parse_feature(cursor)?,
                '"' | '\'' => self.parse_quoted(cursor)?,
                '~' if matches!(cursor.peek_nth(1), Some('"' | '\'')) => self.parse_quoted(cursor)?,
                '@' if cursor.peek_nth(1).is_some_and(is_ident_char) => {
                    cursor.advance_char();
                    let name = format!("@{}", cursor.read_identifier());
                    Node::Variable(Variable::new(name, self.info(index)))
                }
                _ if cursor.starts_with_ignore_case("url(") => self.parse_url(cursor)?,
                _ => {
                    let word = cursor.read_prelude_word();
                    if word.is_empty() {
                        return Err(LessError::parse(format!("意外的字符 '{ch}'"), index));
                    }
                    if KEYWORD.find(&word).is_some_and(|m| m.end() == word.len()) {
                        Node::Keyword(Keyword::new(word))
                    } else {
                        Node::Anonymous(Anonymous::new(word))
                    }
                }
            };
            if let Some(group) = groups.last_mut() {
                group.push(node.with_info(self.info(index)));
            }
        }
        let mut expressions: Vec<Node> = groups
            .into_iter()
            .filter(|group| !group.is_empty())
            .map(|group| Node::Expression(Expression::new(group)))
            .collect();
        Ok(match expressions.len() {
            0 => None,
            1 => expressions.pop(),
            _ => Some(Node::Value(Value::new(expressions))),
        })
    }

    /// `(max-width: 100px)` 或 `(base)` 这样的括号项。
    fn parse_feature(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.expect_char('(')?;
        cursor.skip_whitespace_and_comments();
        let mut lookahead = cursor.clone();
        let name = lookahead.read_property_name();
        lookahead.skip_whitespace();
        let inner = if !name.is_empty() && lookahead.starts_with(':') {
            lookahead.advance_char();
            *cursor = lookahead;
            cursor.skip_whitespace_and_comments();
            let value_start = cursor.clone();
            let value = match self.parse_value_list(cursor)? {
                Some(value) if cursor.peek_after_whitespace() == Some(')') => value,
                _ => {
                    *cursor = value_start;
                    Node::Anonymous(Anonymous::new(cursor.read_balanced_until(')')?.trim()))
                }
            };
            Node::Expression(Expression::new(vec![
                Node::Anonymous(Anonymous::new(format!("{name}:"))),
                value,
            ]))
        } else {
            self.parse_prelude(cursor, &[')'])?
                .unwrap_or_else(|| Node::Anonymous(Anonymous::new("")))
        };
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(')')?;
        Ok(Node::Paren(Paren::new(inner)))
    }

    fn parse_import(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        cursor.expect_char('@')?;
        cursor.read_identifier();
        cursor.skip_whitespace_and_comments();
        let mut options = ImportOptions::default();
        if cursor.starts_with('(') {
            cursor.advance_char();
            let raw = cursor.read_until(')')?;
            cursor.advance_char();
            for option in raw.split(',').map(str::trim).filter(|option| !option.is_empty()) {
                match option {
                    "less" => options.less = Some(true),
                    "css" => options.less = Some(false),
                    "inline" => options.inline = true,
                    "reference" => options.reference = true,
                    "optional" => options.optional = true,
                    "multiple" => options.multiple = true,
                    "once" => options.once = true,
                    other => {
                        return Err(LessError::parse(format!("未知的导入选项 {other}"), index));
                    }
                }
            }
            cursor.skip_whitespace_and_comments();
        }
        let path = self.parse_import_path(cursor, index)?;
        let features = self.parse_prelude(cursor, &[';', '}'])?;
        cursor.skip_whitespace_and_comments();
        cursor.match_str(";");
        Ok(Node::Import(Import::new(path, features, options, self.info(index))))
    }

    fn parse_plugin(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        cursor.expect_char('@')?;
        cursor.read_identifier();
        cursor.skip_whitespace_and_comments();
        let path = self.parse_import_path(cursor, index)?;
        cursor.skip_whitespace_and_comments();
        cursor.match_str(";");
        let options = ImportOptions {
            is_plugin: true,
            ..ImportOptions::default()
        };
        Ok(Node::Import(Import::new(path, None, options, self.info(index))))
    }

    fn parse_import_path(&self, cursor: &mut Cursor<'_>, index: usize) -> LessResult<Node> {
        if cursor.starts_with_ignore_case("url(") {
            return self.parse_url(cursor);
        }
        match cursor.peek_char() {
            Some('"' | '\'') => self.parse_quoted(cursor),
            Some('@') => {
                let start = cursor.index();
                cursor.advance_char();
                let name = format!("@{}", cursor.read_identifier());
                Ok(Node::Variable(Variable::new(name, self.info(start))))
            }
            _ => Err(LessError::parse("导入路径必须是字符串或 url()", index)),
        }
    }

    fn parse_detached_call(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        cursor.expect_char('@')?;
        let name = format!("@{}", cursor.read_identifier());
        cursor.skip_whitespace_and_comments();
        cursor.expect_char('(')?;
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(')')?;
        cursor.skip_whitespace_and_comments();
        let important = cursor.parse_important();
        cursor.skip_whitespace_and_comments();
        cursor.match_str(";");
        let mut call = VariableCall::new(name, important);
        call.info = self.info(index);
        Ok(Node::VariableCall(call))
    }

    fn parse_mixin_definition(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        let name = cursor.read_mixin_name()?;
        cursor.skip_whitespace_and_comments();
        cursor.expect_char('(')?;
        let (params, variadic) = self.parse_mixin_params(cursor)?;
        cursor.skip_whitespace_and_comments();
        let condition = if cursor.starts_with_keyword("when") {
            cursor.consume_keyword("when");
            Some(self.parse_guard(cursor)?)
        } else {
            None
        };
        cursor.skip_whitespace_and_comments();
        cursor.expect_char('{')?;
        let rules = self.parse_rules(cursor, true)?;
        let mut definition = MixinDefinition::new(name, params, rules, condition, variadic);
        definition.info = self.info(index);
        Ok(Node::MixinDefinition(Rc::new(definition)))
    }

    /// 参数列表中出现顶层 `;` 时以分号分隔，逗号留给值列表。
    fn parse_mixin_params(&self, cursor: &mut Cursor<'_>) -> LessResult<(Vec<MixinParam>, bool)> {
        let separator = cursor.argument_separator();
        let mut params = Vec::new();
        let mut variadic = false;
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.match_str(")") {
                break;
            }
            let index = cursor.index();
            if cursor.match_str("...") {
                params.push(MixinParam::rest(None));
                variadic = true;
            } else if cursor.starts_with('@') && cursor.peek_nth(1).is_some_and(is_ident_char) {
                cursor.advance_char();
                let name = format!("@{}", cursor.read_identifier());
                cursor.skip_whitespace_and_comments();
                if cursor.match_str("...") {
                    params.push(MixinParam::rest(Some(name)));
                    variadic = true;
                } else if cursor.match_str(":") {
                    cursor.skip_whitespace_and_comments();
                    let value = self.parse_mixin_value(cursor, separator)?;
                    params.push(MixinParam::named(name, Some(value)));
                } else {
                    params.push(MixinParam::named(name, None));
                }
            } else {
                let value = self.parse_mixin_value(cursor, separator)?;
                params.push(MixinParam::pattern(value));
            }
            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                Some(ch) if ch == separator => {
                    cursor.advance_char();
                }
                Some(')') => {}
                _ => return Err(LessError::parse("mixin 参数列表不合法", index)),
            }
        }
        Ok((params, variadic))
    }

    fn parse_mixin_call(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        let mut elements = Vec::new();
        loop {
            let spaced = cursor.skip_whitespace_and_comments();
            let element_index = cursor.index();
            let combinator = if cursor.match_str(">") {
                cursor.skip_whitespace_and_comments();
                Combinator::new(">")
            } else if spaced && !elements.is_empty() {
                Combinator::new(" ")
            } else {
                Combinator::default()
            };
            if !matches!(cursor.peek_char(), Some('.') | Some('#')) {
                break;
            }
            let mut element = Element::new(combinator, cursor.read_mixin_name()?);
            element.info = self.info(element_index);
            elements.push(element);
        }
        let mut selector = Selector::new(elements);
        selector.info = self.info(index);

        cursor.skip_whitespace_and_comments();
        let args = if cursor.match_str("(") {
            self.parse_mixin_args(cursor)?
        } else {
            Vec::new()
        };
        cursor.skip_whitespace_and_comments();
        let important = cursor.parse_important();
        cursor.skip_whitespace_and_comments();
        cursor.match_str(";");
        let mut call = MixinCall::new(selector, args, important);
        call.info = self.info(index);
        Ok(Node::MixinCall(call))
    }

    fn parse_mixin_args(&self, cursor: &mut Cursor<'_>) -> LessResult<Vec<MixinArg>> {
        let separator = cursor.argument_separator();
        let mut args = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.match_str(")") {
                break;
            }
            let index = cursor.index();
            let mut lookahead = cursor.clone();
            let named = if lookahead.match_str("@") && lookahead.peek_char().is_some_and(is_ident_char) {
                let name = format!("@{}", lookahead.read_identifier());
                lookahead.skip_whitespace_and_comments();
                if lookahead.match_str(":") {
                    Some((name, false))
                } else if lookahead.match_str("...") {
                    Some((name, true))
                } else {
                    None
                }
            } else {
                None
            };
            match named {
                Some((name, false)) => {
                    *cursor = lookahead;
                    cursor.skip_whitespace_and_comments();
                    let value = self.parse_mixin_value(cursor, separator)?;
                    args.push(MixinArg::named(name, value));
                }
                Some((name, true)) => {
                    *cursor = lookahead;
                    let mut arg = MixinArg::positional(Node::Variable(Variable::new(name, self.info(index))));
                    arg.expand = true;
                    args.push(arg);
                }
                None => {
                    let value = self.parse_mixin_value(cursor, separator)?;
                    args.push(MixinArg::positional(value));
                }
            }
            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                Some(ch) if ch == separator => {
                    cursor.advance_char();
                }
                Some(')') => {}
                _ => return Err(LessError::parse("mixin 实参列表不合法", index)),
            }
        }
        Ok(args)
    }

    /// mixin 的单个实参或默认值，可以是分离规则集。
    fn parse_mixin_value(&self, cursor: &mut Cursor<'_>, separator: char) -> LessResult<Node> {
        let index = cursor.index();
        if cursor.match_str("{") {
            let rules = self.parse_rules(cursor, true)?;
            let mut ruleset = Ruleset::new(None, rules);
            ruleset.info = self.info(index);
            return Ok(Node::DetachedRuleset(DetachedRuleset::new(Rc::new(ruleset))).with_info(self.info(index)));
        }
        let value = if separator == ';' {
            self.parse_value_list(cursor)?
        } else {
            self.parse_expression(cursor)?
        };
        value.ok_or_else(|| LessError::parse("缺少 mixin 参数值", index))
    }

    /// 逗号分隔的值列表。
    fn parse_value_list(&self, cursor: &mut Cursor<'_>) -> LessResult<Option<Node>> {
        let index = cursor.index();
        let mut expressions = Vec::new();
        loop {
            let Some(expression) = self.parse_expression(cursor)? else {
                break;
            };
            expressions.push(expression);
            cursor.skip_whitespace_and_comments();
            if !cursor.match_str(",") {
                break;
            }
        }
        if expressions.is_empty() {
            return Ok(None);
        }
        Ok(Some(Node::Value(Value::new(expressions)).with_info(self.info(index))))
    }

    /// 空格分隔的表达式。
    fn parse_expression(&self, cursor: &mut Cursor<'_>) -> LessResult<Option<Node>> {
        let index = cursor.index();
        let mut items = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                None => break,
                Some(ch) if VALUE_STOPS.contains(&ch) => break,
                _ => {}
            }
            match self.parse_addition(cursor)? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(Node::Expression(Expression::new(items)).with_info(self.info(index))))
    }

    fn parse_addition(&self, cursor: &mut Cursor<'_>) -> LessResult<Option<Node>> {
        let index = cursor.index();
        let Some(mut acc) = self.parse_multiplication(cursor)? else {
            return Ok(None);
        };
        loop {
            let before = cursor.clone();
            let spaced = cursor.skip_whitespace_and_comments();
            let op = match cursor.peek_char() {
                Some('+') => Op::Add,
                Some('-') => Op::Sub,
                _ => {
                    *cursor = before;
                    break;
                }
            };
            // `1 -1` 是两个值，`1 - 1` 与 `1-1` 才是减法
            let spaced_after = cursor.peek_nth(1).is_some_and(char::is_whitespace);
            if spaced && !spaced_after {
                *cursor = before;
                break;
            }
            cursor.advance_char();
            cursor.skip_whitespace_and_comments();
            let Some(mut right) = self.parse_multiplication(cursor)? else {
                *cursor = before;
                break;
            };
            acc.mark_parens_in_op();
            right.mark_parens_in_op();
            acc = Node::Operation(Operation::new(op, acc, right, spaced)).with_info(self.info(index));
        }
        Ok(Some(acc))
    }

    fn parse_multiplication(&self, cursor: &mut Cursor<'_>) -> LessResult<Option<Node>> {
        let index = cursor.index();
        let Some(mut acc) = self.parse_operand(cursor)? else {
            return Ok(None);
        };
        loop {
            let before = cursor.clone();
            let spaced = cursor.skip_whitespace_and_comments();
            let op = if cursor.match_str("./") {
                Op::DotDiv
            } else if cursor.starts_with('/') && !cursor.starts_with_str("//") && !cursor.starts_with_str("/*") {
                cursor.advance_char();
                Op::Div
            } else if cursor.match_str("*") {
                Op::Mul
            } else {
                *cursor = before;
                break;
            };
            cursor.skip_whitespace_and_comments();
            let Some(mut right) = self.parse_operand(cursor)? else {
                *cursor = before;
                break;
            };
            acc.mark_parens_in_op();
            right.mark_parens_in_op();
            acc = Node::Operation(Operation::new(op, acc, right, spaced)).with_info(self.info(index));
        }
        Ok(Some(acc))
    }

    fn parse_operand(&self, cursor: &mut Cursor<'_>) -> LessResult<Option<Node>> {
        let index = cursor.index();
        if cursor.starts_with('-') && matches!(cursor.peek_nth(1), Some('@' | '(' | '$')) {
            let before = cursor.clone();
            cursor.advance_char();
            return match self.parse_operand_inner(cursor)? {
                Some(inner) => Ok(Some(Node::Negative(Negative::new(inner)).with_info(self.info(index)))),
                None => {
                    *cursor = before;
                    Ok(None)
                }
            };
        }
        self.parse_operand_inner(cursor)
    }

    fn parse_operand_inner(&self, cursor: &mut Cursor<'_>) -> LessResult<Option<Node>> {
        let index = cursor.index();
        if cursor.starts_with('(') {
            let before = cursor.clone();
            cursor.advance_char();
            cursor.skip_whitespace_and_comments();
            if let Some(inner) = self.parse_addition(cursor)? {
                cursor.skip_whitespace_and_comments();
                if cursor.match_str(")") {
                    let mut expression = Expression::new(vec![inner]);
                    expression.parens = true;
                    expression.info = self.info(index);
                    return Ok(Some(Node::Expression(expression)));
                }
            }
            *cursor = before;
            return Ok(None);
        }
        self.parse_entity(cursor)
    }

    fn parse_entity(&self, cursor: &mut Cursor<'_>) -> LessResult<Option<Node>> {
        let index = cursor.index();
        let Some(ch) = cursor.peek_char() else {
            return Ok(None);
        };
        let node = match ch {
            '"' | '\'' => self.parse_quoted(cursor)?,
            '~' if matches!(cursor.peek_nth(1), Some('"' | '\'')) => self.parse_quoted(cursor)?,
            '@' if matches!(cursor.peek_nth(1), Some('@')) || cursor.peek_nth(1).is_some_and(is_ident_char) => {
                cursor.advance_char();
                let mut name = String::from("@");
                if cursor.match_str("@") {
                    name.push('@');
                }
                name.push_str(&cursor.read_identifier());
                Node::Variable(Variable::new(name, self.info(index)))
            }
            '$' if cursor.peek_nth(1).is_some_and(is_ident_char) => {
                cursor.advance_char();
                let name = format!("${}", cursor.read_identifier());
                Node::Property(Property::new(name, self.info(index)))
            }
            '#' => {
                let Some(captures) = HEX_COLOR.captures(cursor.rest()) else {
                    return Ok(None);
                };
                if captures.get(2).is_some() {
                    return Ok(None);
                }
                let text = captures.get(0).map_or("", |m| m.as_str()).to_string();
                let Some(color) = Color::from_hex(&text) else {
                    return Ok(None);
                };
                cursor.advance_bytes(text.len());
                Node::Color(color)
            }
            '%' if cursor.peek_nth(1) == Some('(') => {
                cursor.advance_char();
                cursor.advance_char();
                let args = self.parse_call_args(cursor, "%")?;
                Node::Call(Call::new("%", args))
            }
            _ if cursor.starts_with_ignore_case("url(") => self.parse_url(cursor)?,
            _ if ch.is_ascii_digit() || matches!(ch, '.' | '+' | '-') && DIMENSION.is_match(cursor.rest()) => {
                let Some(captures) = DIMENSION.captures(cursor.rest()) else {
                    return Ok(None);
                };
                let whole = captures.get(0).map_or(0, |m| m.len());
                let number = captures.get(1).map_or("0", |m| m.as_str());
                let unit = captures.get(2).map_or("", |m| m.as_str());
                let value: f64 = number
                    .parse()
                    .map_err(|_| LessError::parse(format!("数值 {number} 不合法"), index))?;
                cursor.advance_bytes(whole);
                Node::Dimension(Dimension::with_unit(value, unit))
            }
            _ => {
                let Some(word) = KEYWORD.find(cursor.rest()).map(|m| m.as_str().to_string()) else {
                    return Ok(None);
                };
                cursor.advance_bytes(word.len());
                if cursor.starts_with('(') {
                    cursor.advance_char();
                    let args = self.parse_call_args(cursor, &word)?;
                    Node::Call(Call::new(word, args))
                } else {
                    match Color::from_keyword(&word) {
                        Some(color) => Node::Color(color),
                        None => Node::Keyword(Keyword::new(word)),
                    }
                }
            }
        };
        Ok(Some(node.with_info(self.info(index))))
    }

    /// 左括号已消费。`if` 与 `boolean` 的第一个参数是条件表达式。
    fn parse_call_args(&self, cursor: &mut Cursor<'_>, name: &str) -> LessResult<Vec<Node>> {
        let mut args = Vec::new();
        let takes_condition = name.eq_ignore_ascii_case("if") || name.eq_ignore_ascii_case("boolean");
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.match_str(")") {
                break;
            }
            let index = cursor.index();
            let arg = if takes_condition && args.is_empty() {
                Some(self.parse_condition(cursor, false)?)
            } else if cursor.starts_with('{') {
                cursor.advance_char();
                let rules = self.parse_rules(cursor, true)?;
                let ruleset = Ruleset::new(None, rules);
                Some(Node::DetachedRuleset(DetachedRuleset::new(Rc::new(ruleset))))
            } else if let Some(assignment) = cursor.read_assignment() {
                Some(Node::Anonymous(Anonymous::new(assignment)))
            } else {
                self.parse_expression(cursor)?
            };
            let Some(arg) = arg else {
                return Err(LessError::parse(format!("函数 {name} 的参数不合法"), index));
            };
            args.push(arg.with_info(self.info(index)));
            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                Some(',') | Some(';') => {
                    cursor.advance_char();
                }
                Some(')') => {}
                _ => return Err(LessError::parse(format!("函数 {name} 缺少 ')'"), cursor.index())),
            }
        }
        Ok(args)
    }

    fn parse_quoted(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        let escaped = cursor.match_str("~");
        let quote = match cursor.advance_char() {
            Some(quote @ ('"' | '\'')) => quote,
            _ => return Err(LessError::parse("期待字符串", index)),
        };
        let mut content = String::new();
        loop {
            match cursor.advance_char() {
                None => return Err(LessError::parse("字符串缺少结束引号", index)),
                Some('\\') => {
                    content.push('\\');
                    if let Some(next) = cursor.advance_char() {
                        content.push(next);
                    }
                }
                Some(ch) if ch == quote => break,
                Some(ch) => content.push(ch),
            }
        }
        Ok(Node::Quoted(Quoted::new(quote, content, escaped)).with_info(self.info(index)))
    }

    fn parse_url(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        cursor.advance_bytes("url(".len());
        cursor.skip_whitespace();
        let inner_index = cursor.index();
        let value = match cursor.peek_char() {
            Some('"' | '\'') => self.parse_quoted(cursor)?,
            Some('@') if cursor.peek_nth(1).is_some_and(is_ident_char) => {
                let mut lookahead = cursor.clone();
                lookahead.advance_char();
                let name = format!("@{}", lookahead.read_identifier());
                if lookahead.peek_after_whitespace() == Some(')') {
                    *cursor = lookahead;
                    Node::Variable(Variable::new(name, self.info(inner_index)))
                } else {
                    Node::Anonymous(Anonymous::new(cursor.read_balanced_until(')')?.trim_end()))
                }
            }
            _ => Node::Anonymous(Anonymous::new(cursor.read_balanced_until(')')?.trim_end())),
        };
        cursor.skip_whitespace();
        cursor.expect_char(')')?;
        Ok(Node::Url(Url::new(value)).with_info(self.info(index)))
    }

    /// `when` 之后的守卫，逗号表示或。
    fn parse_guard(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.skip_whitespace_and_comments();
        self.parse_condition(cursor, true)
    }

    fn parse_condition(&self, cursor: &mut Cursor<'_>, comma_is_or: bool) -> LessResult<Node> {
        let index = cursor.index();
        let mut left = self.parse_condition_and(cursor)?;
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.starts_with_keyword("or") {
                cursor.consume_keyword("or");
            } else if comma_is_or && cursor.starts_with(',') {
                cursor.advance_char();
            } else {
                break;
            }
            let right = self.parse_condition_and(cursor)?;
            left = Node::Condition(Condition::new(ConditionOp::Or, left, right, false)).with_info(self.info(index));
        }
        Ok(left)
    }

    fn parse_condition_and(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let index = cursor.index();
        let mut left = self.parse_condition_atom(cursor)?;
        loop {
            cursor.skip_whitespace_and_comments();
            if !cursor.starts_with_keyword("and") {
                break;
            }
            cursor.consume_keyword("and");
            let right = self.parse_condition_atom(cursor)?;
            left = Node::Condition(Condition::new(ConditionOp::And, left, right, false)).with_info(self.info(index));
        }
        Ok(left)
    }

    fn parse_condition_atom(&self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.skip_whitespace_and_comments();
        let index = cursor.index();
        let negate = if cursor.starts_with_keyword("not") {
            cursor.consume_keyword("not");
            cursor.skip_whitespace_and_comments();
            true
        } else {
            false
        };

        if cursor.starts_with('(') {
            let before = cursor.clone();
            cursor.advance_char();
            if let Ok(inner) = self.parse_condition(cursor, false) {
                cursor.skip_whitespace_and_comments();
                let compared = matches!(cursor.peek_nth(1).filter(|_| cursor.starts_with(')')), Some(_))
                    && matches!(
                        cursor.rest()[1..].trim_start().chars().next(),
                        Some('<' | '>' | '=')
                    );
                if !compared && cursor.match_str(")") {
                    return Ok(match inner {
                        Node::Condition(mut condition) if negate => {
                            condition.negate = !condition.negate;
                            Node::Condition(condition)
                        }
                        other => other,
                    });
                }
            }
            *cursor = before;
        }

        let left = self
            .parse_addition(cursor)?
            .ok_or_else(|| LessError::parse("条件表达式不合法", index))?;
        cursor.skip_whitespace_and_comments();
        let op = [">=", "<=", "=<", ">", "<", "="]
            .into_iter()
            .find(|op| cursor.starts_with_str(op))
            .and_then(|op| {
                cursor.advance_bytes(op.len());
                ConditionOp::parse(op)
            });
        let condition = match op {
            Some(op) => {
                cursor.skip_whitespace_and_comments();
                let right = self
                    .parse_addition(cursor)?
                    .ok_or_else(|| LessError::parse("比较运算缺少右侧操作数", cursor.index()))?;
                Condition::new(op, left, right, negate)
            }
            None => Condition::new(ConditionOp::Eq, left, Node::Keyword(Keyword::boolean(true)), negate),
        };
        Ok(Node::Condition(condition).with_info(self.info(index)))
    }
}

impl NodeParser for LessParser {
    fn parse_selectors(
        &self,
        text: &str,
        index: Option<usize>,
        file_info: Option<Rc<FileInfo>>,
    ) -> LessResult<Vec<Selector>> {
        let parser = LessParser {
            file_info: file_info.or_else(|| self.file_info.clone()),
        };
        parser.parse_selector_list(text, index.unwrap_or(0))
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

/// 带位置指针的输入游标，提供便捷的字符读取与回退功能。
struct Cursor<'a> {
    source: &'a str,
    len: usize,
    position: usize,
    /// 子文本在源文件中的起点。
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self::with_offset(source, 0)
    }

    fn with_offset(source: &'a str, offset: usize) -> Self {
        Self {
            source,
            len: source.len(),
            position: 0,
            offset,
        }
    }

    /// 源文件中的绝对位置。
    fn index(&self) -> usize {
        self.offset + self.position
    }

    fn rest(&self) -> &'a str {
        &self.source[self.position..]
    }

    fn is_eof(&self) -> bool {
        self.position >= self.len
    }

    fn starts_with(&self, ch: char) -> bool {
        self.peek_char() == Some(ch)
    }

    fn starts_with_str(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn starts_with_ignore_case(&self, prefix: &str) -> bool {
        self.rest()
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn peek_after_whitespace(&self) -> Option<char> {
        self.rest().chars().find(|ch| !ch.is_whitespace())
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        Some(ch)
    }

    fn advance_bytes(&mut self, count: usize) {
        self.position = (self.position + count).min(self.len);
    }

    fn expect_char(&mut self, expect: char) -> LessResult<()> {
        let index = self.index();
        match self.advance_char() {
            Some(ch) if ch == expect => Ok(()),
            Some(ch) => Err(LessError::parse(format!("期待字符 '{expect}', 却得到 '{ch}'"), index)),
            None => Err(LessError::parse(format!("期待字符 '{expect}'"), index)),
        }
    }

    /// 返回是否跳过了空白。
    fn skip_whitespace(&mut self) -> bool {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance_char();
            } else {
                break;
            }
        }
        self.position > start
    }

    fn skip_whitespace_and_comments(&mut self) -> bool {
        let start = self.position;
        loop {
            self.skip_whitespace();
            if self.starts_with('/') && self.consume_comment() {
                continue;
            }
            break;
        }
        self.position > start
    }

    fn consume_comment(&mut self) -> bool {
        if self.match_str("//") {
            while let Some(ch) = self.peek_char() {
                self.advance_char();
                if ch == '\n' {
                    break;
                }
            }
            true
        } else if self.match_str("/*") {
            while self.peek_char().is_some() {
                if self.match_str("*/") {
                    break;
                }
                self.advance_char();
            }
            true
        } else {
            false
        }
    }

    fn read_block_comment(&mut self) -> LessResult<String> {
        let start = self.position;
        let index = self.index();
        self.advance_bytes(2);
        match self.rest().find("*/") {
            Some(end) => {
                self.advance_bytes(end + 2);
                Ok(self.source[start..self.position].to_string())
            }
            None => Err(LessError::parse("块注释没有闭合", index)),
        }
    }

    fn match_str(&mut self, prefix: &str) -> bool {
        if self.starts_with_str(prefix) {
            self.position += prefix.len();
            true
        } else {
            false
        }
    }

    fn starts_with_keyword(&self, keyword: &str) -> bool {
        if !self.starts_with_str(keyword) {
            return false;
        }
        match self.rest()[keyword.len()..].chars().next() {
            Some(ch) => !is_ident_char(ch),
            None => true,
        }
    }

    fn consume_keyword(&mut self, keyword: &str) {
        self.position += keyword.len();
    }

    fn parse_important(&mut self) -> bool {
        let mut lookahead = self.clone();
        if !lookahead.match_str("!") {
            return false;
        }
        lookahead.skip_whitespace();
        if lookahead.starts_with_keyword("important") {
            lookahead.consume_keyword("important");
            *self = lookahead;
            return true;
        }
        false
    }

    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(ch) = self.peek_char() {
            if is_ident_char(ch) {
                ident.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }
        ident
    }

    fn read_property_name(&mut self) -> String {
        let mut name = String::new();
        let mut pending_interpolation = false;
        while let Some(ch) = self.peek_char() {
            if ch == ':' || ch == ';' || ch == ')' {
                break;
            }
            if ch == '{' && !pending_interpolation {
                break;
            }
            if ch.is_control() {
                break;
            }
            self.advance_char();
            name.push(ch);
            if ch == '@' || ch == '$' {
                pending_interpolation = true;
            } else if ch == '{' && pending_interpolation {
                while let Some(inner) = self.advance_char() {
                    name.push(inner);
                    if inner == '}' {
                        pending_interpolation = false;
                        break;
                    }
                }
            } else if !ch.is_whitespace() {
                pending_interpolation = false;
            }
        }
        name.trim().to_string()
    }

    fn read_until(&mut self, end: char) -> LessResult<String> {
        let mut result = String::new();
        while let Some(ch) = self.peek_char() {
            if ch == end {
                break;
            }
            result.push(ch);
            self.advance_char();
        }
        if self.peek_char() != Some(end) {
            return Err(LessError::parse(format!("期待字符 '{end}'"), self.index()));
        }
        Ok(result)
    }

    /// 读到同层的 `end` 为止（不消费），跳过字符串与嵌套括号。
    fn read_balanced_until(&mut self, end: char) -> LessResult<String> {
        let start = self.position;
        let mut depth = 0usize;
        while let Some(ch) = self.peek_char() {
            match ch {
                '"' | '\'' => {
                    self.skip_string(ch);
                    continue;
                }
                '(' | '[' => depth += 1,
                ')' | ']' if depth > 0 => depth -= 1,
                _ if ch == end && depth == 0 => {
                    return Ok(self.source[start..self.position].to_string());
                }
                _ => {}
            }
            self.advance_char();
        }
        Err(LessError::parse(format!("期待字符 '{end}'"), self.index()))
    }

    /// 原样读取声明值，直到同层的 `;` 或 `}`。
    fn read_raw_value(&mut self) -> String {
        let start = self.position;
        let mut depth = 0usize;
        while let Some(ch) = self.peek_char() {
            match ch {
                '"' | '\'' => {
                    self.skip_string(ch);
                    continue;
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' if depth > 0 => depth -= 1,
                '}' if depth > 0 => depth -= 1,
                ';' | '}' if depth == 0 => break,
                _ => {}
            }
            self.advance_char();
        }
        self.source[start..self.position].to_string()
    }

    fn skip_string(&mut self, quote: char) {
        self.advance_char();
        while let Some(ch) = self.advance_char() {
            if ch == '\\' {
                self.advance_char();
            } else if ch == quote {
                break;
            }
        }
    }

    /// `opacity=50` 这类 IE 赋值参数。
    fn read_assignment(&mut self) -> Option<String> {
        let mut lookahead = self.clone();
        let name = lookahead.read_identifier();
        if name.is_empty() || lookahead.starts_with_str("==") || !lookahead.match_str("=") {
            return None;
        }
        let start = lookahead.position;
        while let Some(ch) = lookahead.peek_char() {
            if ch == ',' || ch == ')' {
                break;
            }
            lookahead.advance_char();
        }
        let value = lookahead.source[start..lookahead.position].trim_end().to_string();
        *self = lookahead;
        Some(format!("{name}={value}"))
    }

    /// 读取选择器文本，停在同层的 `{` 或守卫关键字 `when` 前。
    fn read_selector_text(&mut self) -> LessResult<String> {
        let start = self.position;
        let index = self.index();
        let mut depth = 0usize;
        while let Some(ch) = self.peek_char() {
            match ch {
                '"' | '\'' => {
                    self.skip_string(ch);
                    continue;
                }
                '@' if self.peek_nth(1) == Some('{') => {
                    self.read_until('}')?;
                }
                '(' | '[' => depth += 1,
                ')' | ']' if depth > 0 => depth -= 1,
                '{' if depth == 0 => {
                    return Ok(self.source[start..self.position].to_string());
                }
                ';' | '}' if depth == 0 => break,
                ch if ch.is_whitespace() && depth == 0 => {
                    let mut lookahead = self.clone();
                    lookahead.skip_whitespace();
                    if lookahead.starts_with_keyword("when") {
                        let text = self.source[start..self.position].to_string();
                        *self = lookahead;
                        return Ok(text);
                    }
                }
                _ => {}
            }
            self.advance_char();
        }
        Err(LessError::parse("选择器之后缺少 '{'", index))
    }

    fn read_selector_element(&mut self) -> LessResult<String> {
        let index = self.index();
        let mut value = String::new();
        match self.peek_char() {
            Some(ch @ ('&' | '*')) => {
                self.advance_char();
                value.push(ch);
                return Ok(value);
            }
            Some('[') => {
                self.advance_char();
                let inner = self.read_balanced_until(']')?;
                self.advance_char();
                return Ok(format!("[{inner}]"));
            }
            Some('(') => {
                self.advance_char();
                let inner = self.read_balanced_until(')')?;
                self.advance_char();
                return Ok(format!("({inner})"));
            }
            Some(':') => {
                while self.match_str(":") {
                    value.push(':');
                }
            }
            Some(ch @ ('.' | '#')) => {
                self.advance_char();
                value.push(ch);
            }
            _ => {}
        }
        self.read_element_word(&mut value)?;
        if value.starts_with(':') && self.starts_with('(') {
            self.advance_char();
            let inner = self.read_balanced_until(')')?;
            self.advance_char();
            value.push_str(&format!("({inner})"));
        }
        if value.is_empty() || value == "." || value == "#" {
            let found = self.peek_char().map(String::from).unwrap_or_default();
            return Err(LessError::parse(format!("选择器中出现意外的字符 '{found}'"), index));
        }
        Ok(value)
    }

    fn read_element_word(&mut self, value: &mut String) -> LessResult<()> {
        while let Some(ch) = self.peek_char() {
            if ch == '@' && self.peek_nth(1) == Some('{') {
                value.push_str(&self.read_until('}')?);
                self.advance_char();
                value.push('}');
            } else if ch == '\\' {
                self.advance_char();
                value.push('\\');
                if let Some(escaped) = self.advance_char() {
                    value.push(escaped);
                }
            } else if is_ident_char(ch) || ch == '%' {
                self.advance_char();
                value.push(ch);
            } else {
                break;
            }
        }
        Ok(())
    }

    /// at 规则前导中的一个词。
    fn read_prelude_word(&mut self) -> String {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | ',' | ';' | '{' | '}') {
                break;
            }
            self.advance_char();
        }
        self.source[start..self.position].to_string()
    }

    /// 参数列表中同层出现 `;` 时以分号分隔。
    fn argument_separator(&self) -> char {
        let mut lookahead = self.clone();
        let mut depth = 0usize;
        while let Some(ch) = lookahead.peek_char() {
            match ch {
                '"' | '\'' => {
                    lookahead.skip_string(ch);
                    continue;
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                ';' if depth == 0 => return ';',
                _ => {}
            }
            lookahead.advance_char();
        }
        ','
    }

    fn lookahead_is_variable_decl(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        lookahead.expect_char('@')?;
        lookahead.read_identifier();
        lookahead.skip_whitespace();
        Ok(lookahead.peek_char() == Some(':'))
    }

    fn lookahead_is_mixin_definition(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        if !matches!(lookahead.peek_char(), Some('.') | Some('#')) {
            return Ok(false);
        }
        lookahead.advance_char();
        let ident = lookahead.read_identifier();
        if ident.is_empty() {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        if lookahead.peek_char() != Some('(') {
            return Ok(false);
        }
        lookahead.advance_char();
        if lookahead.read_balanced_until(')').is_err() {
            return Ok(false);
        }
        lookahead.advance_char();
        lookahead.skip_whitespace_and_comments();
        if lookahead.starts_with_keyword("when") {
            lookahead.consume_keyword("when");
            lookahead.skip_whitespace_and_comments();
            lookahead.skip_guard_condition();
            lookahead.skip_whitespace_and_comments();
        }
        Ok(lookahead.peek_char() == Some('{'))
    }

    fn skip_guard_condition(&mut self) {
        let mut depth = 0usize;
        while let Some(ch) = self.peek_char() {
            if ch == '{' && depth == 0 {
                break;
            }
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.advance_char();
        }
    }

    /// `.m;`、`.m();`、`#ns > .m();` 都是调用：同层的 `;` 或 `}` 先于 `{` 出现。
    fn lookahead_is_mixin_call(&self) -> bool {
        let mut lookahead = self.clone();
        let mut depth = 0usize;
        while let Some(ch) = lookahead.peek_char() {
            match ch {
                '"' | '\'' => {
                    lookahead.skip_string(ch);
                    continue;
                }
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '@' if lookahead.peek_nth(1) == Some('{') => {
                    if lookahead.read_until('}').is_err() {
                        return false;
                    }
                }
                '{' if depth == 0 => return false,
                ';' | '}' if depth == 0 => return true,
                _ => {}
            }
            lookahead.advance_char();
        }
        true
    }

    fn lookahead_is_detached_call(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        if !lookahead.starts_with('@') {
            return Ok(false);
        }
        lookahead.advance_char();
        let ident = lookahead.read_identifier();
        if ident.is_empty() {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        if !lookahead.match_str("(") {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        if !lookahead.match_str(")") {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        lookahead.parse_important();
        lookahead.skip_whitespace_and_comments();
        Ok(matches!(lookahead.peek_char(), None | Some(';') | Some('}')))
    }

    fn read_mixin_name(&mut self) -> LessResult<String> {
        let index = self.index();
        match self.advance_char() {
            Some(prefix @ ('.' | '#')) => {
                let mut name = String::new();
                name.push(prefix);
                self.read_element_word(&mut name)?;
                if name.len() == 1 {
                    return Err(LessError::parse("mixin 名称不合法", index));
                }
                Ok(name)
            }
            _ => Err(LessError::parse("期待 mixin 名称", index)),
        }
    }

    /// 通过向前查看判断接下来的语句类型（声明或子规则）。
    fn detect_body_kind(&self) -> Option<BodyKind> {
        let mut iter = self.clone();
        iter.skip_whitespace_and_comments();
        let mut saw_colon = false;
        let mut depth = 0usize;
        while let Some(ch) = iter.peek_char() {
            match ch {
                '"' | '\'' => {
                    iter.skip_string(ch);
                    continue;
                }
                '@' | '$' if iter.peek_nth(1) == Some('{') => {
                    if iter.read_until('}').is_err() {
                        return None;
                    }
                }
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '{' if depth == 0 => return Some(BodyKind::NestedRule),
                ';' if depth == 0 => return Some(BodyKind::Declaration),
                '}' if depth == 0 => {
                    return saw_colon.then_some(BodyKind::Declaration);
                }
                ':' => saw_colon = true,
                _ => {}
            }
            iter.advance_char();
        }
        saw_colon.then_some(BodyKind::Declaration)
    }
}

impl<'a> Clone for Cursor<'a> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            len: self.len,
            position: self.position,
            offset: self.offset,
        }
    }
}

enum BodyKind {
    Declaration,
    NestedRule,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CssOptions;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Vec<Node> {
        LessParser::new().parse(input).expect("解析失败").into_rules()
    }

    fn declaration(node: &Node) -> &Declaration {
        match node {
            Node::Declaration(decl) => decl,
            other => panic!("应为声明，实际为 {:?}", other.kind()),
        }
    }

    #[test]
    fn parses_variables_and_declarations() {
        let rules = parse("@width: 10px;\n.box { width: @width * 2; color: #fff !important; }");
        let var = declaration(&rules[0]);
        assert!(var.variable);
        assert_eq!(var.name, "@width");
        assert_eq!(var.value.to_plain_css(), "10px");

        let Node::Ruleset(ruleset) = &rules[1] else { panic!("应为规则集") };
        let selectors = ruleset.selectors.as_ref().unwrap();
        assert_eq!(selectors[0].to_css(&CssOptions::default()), ".box");
        let width = declaration(&ruleset.rules()[0]);
        assert_eq!(width.name, "width");
        let color = declaration(&ruleset.rules()[1]);
        assert!(color.important);
        assert_eq!(color.value.to_plain_css(), "#fff");
    }

    #[test]
    fn spaced_minus_before_number_starts_a_new_value() {
        let rules = parse("a { margin: 1px -2px; padding: 3px - 1px; }");
        let Node::Ruleset(ruleset) = &rules[0] else { panic!("应为规则集") };
        let margin = declaration(&ruleset.rules()[0]);
        let Node::Value(value) = margin.value.as_ref() else { panic!("应为值列表") };
        let Node::Expression(expr) = &value.value[0] else { panic!("应为表达式") };
        assert_eq!(expr.value.len(), 2);

        let padding = declaration(&ruleset.rules()[1]);
        let Node::Value(value) = padding.value.as_ref() else { panic!("应为值列表") };
        let Node::Expression(expr) = &value.value[0] else { panic!("应为表达式") };
        assert!(matches!(expr.value[0], Node::Operation(_)));
    }

    #[test]
    fn selectors_keep_combinators_and_pseudo_classes() {
        let selectors = LessParser::new()
            .parse_selector_list("ul > li:not(.a), &-suffix:hover, a[href='x'] + b", 0)
            .unwrap();
        let opts = CssOptions::default();
        let rendered: Vec<String> = selectors.iter().map(|s| s.to_css(&opts)).collect();
        assert_eq!(rendered, vec!["ul > li:not(.a)", "&-suffix:hover", "a[href='x'] + b"]);
        assert_eq!(selectors[1].elements[0].value, "&");
    }

    #[test]
    fn interpolated_selector_is_marked_variable() {
        let selectors = LessParser::new().parse_selector_list(".@{name}-item", 0).unwrap();
        assert!(selectors[0].has_variable());
    }

    #[test]
    fn guarded_ruleset_gets_a_condition() {
        let rules = parse(".a when (@mode = dark) { color: black; }");
        let Node::Ruleset(ruleset) = &rules[0] else { panic!("应为规则集") };
        let selector = &ruleset.selectors.as_ref().unwrap()[0];
        assert!(selector.condition.is_some());
        assert_eq!(selector.to_css(&CssOptions::default()), ".a");
    }

    #[test]
    fn parses_mixin_definition_with_params_and_guard() {
        let rules = parse(".m(@a; @b: 1px, 2px; @rest...) when (iscolor(@a)) { color: @a; }");
        let Node::MixinDefinition(definition) = &rules[0] else { panic!("应为 mixin 定义") };
        assert_eq!(definition.name, ".m");
        assert_eq!(definition.params.len(), 3);
        assert_eq!(definition.params[1].name.as_deref(), Some("@b"));
        assert!(matches!(definition.params[1].value, Some(Node::Value(_))));
        assert!(definition.variadic);
        assert!(definition.condition.is_some());
    }

    #[test]
    fn parses_mixin_calls() {
        let rules = parse(".a { .m(1px, @x: red) !important; #ns > .inner; .plain; }");
        let Node::Ruleset(ruleset) = &rules[0] else { panic!("应为规则集") };
        let Node::MixinCall(call) = &ruleset.rules()[0] else { panic!("应为 mixin 调用") };
        assert!(call.important);
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.args[1].name.as_deref(), Some("@x"));

        let Node::MixinCall(namespaced) = &ruleset.rules()[1] else { panic!("应为 mixin 调用") };
        let values: Vec<&str> = namespaced.selector.elements.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["#ns", ".inner"]);
        assert_eq!(namespaced.selector.elements[1].combinator.value, ">");
        assert!(matches!(ruleset.rules()[2], Node::MixinCall(_)));
    }

    #[test]
    fn parses_detached_rulesets_and_calls() {
        let rules = parse("@dr: { color: red; }\n.a { @dr(); }");
        let var = declaration(&rules[0]);
        assert!(matches!(var.value.as_ref(), Node::DetachedRuleset(_)));
        let Node::Ruleset(ruleset) = &rules[1] else { panic!("应为规则集") };
        let Node::VariableCall(call) = &ruleset.rules()[0] else { panic!("应为分离规则集调用") };
        assert_eq!(call.variable, "@dr");
    }

    #[test]
    fn parses_imports_with_options_and_features() {
        let rules = parse("@import (reference, optional) \"lib\" screen;\n@plugin \"my-plugin\";");
        let Node::Import(import) = &rules[0] else { panic!("应为导入") };
        assert!(import.options.reference);
        assert!(import.options.optional);
        assert_eq!(import.get_path().as_deref(), Some("lib"));
        assert!(import.features.is_some());
        let Node::Import(plugin) = &rules[1] else { panic!("应为插件导入") };
        assert!(plugin.options.is_plugin);
    }

    #[test]
    fn unknown_import_option_is_a_parse_error() {
        let err = LessParser::new().parse("@import (bogus) \"a\";").unwrap_err();
        assert_eq!(err.error_type(), "Parse");
    }

    #[test]
    fn parses_media_prelude_and_nested_blocks() {
        let rules = parse("@media screen and (max-width: 100px) { .a { color: red; } }");
        let Node::AtRule(at_rule) = &rules[0] else { panic!("应为 at 规则") };
        assert_eq!(at_rule.name, "@media");
        assert_eq!(
            at_rule.prelude(&CssOptions::default()).unwrap(),
            "@media screen and (max-width: 100px)"
        );
        assert_eq!(at_rule.block.as_ref().unwrap().rules().len(), 1);
    }

    #[test]
    fn statement_at_rules_and_comments() {
        let rules = parse("@charset \"utf-8\";\n/* keep */\n// drop\na { b: c }");
        let Node::AtRule(charset) = &rules[0] else { panic!("应为 at 规则") };
        assert!(charset.block.is_none());
        let Node::Comment(comment) = &rules[1] else { panic!("应为注释") };
        assert_eq!(comment.value, "/* keep */");
        assert_eq!(rules.len(), 3);
    }

    #[test]
    fn custom_properties_keep_raw_text() {
        let rules = parse(":root { --font: \"a\",  b; --w: 10px; }");
        let Node::Ruleset(ruleset) = &rules[0] else { panic!("应为规则集") };
        let font = declaration(&ruleset.rules()[0]);
        assert_eq!(font.value.to_plain_css(), "\"a\",  b");
        assert_eq!(declaration(&ruleset.rules()[1]).value.to_plain_css(), "10px");
    }

    #[test]
    fn urls_and_calls() {
        let rules = parse("a { background: url(img/a.png) no-repeat; width: calc(100% - 10px); }");
        let Node::Ruleset(ruleset) = &rules[0] else { panic!("应为规则集") };
        assert_eq!(
            declaration(&ruleset.rules()[0]).value.to_plain_css(),
            "url(img/a.png) no-repeat"
        );
        assert_eq!(declaration(&ruleset.rules()[1]).value.to_plain_css(), "calc(100% - 10px)");
    }

    #[test]
    fn numbers_accept_exponents() {
        let rules = parse("a { width: 1e3px; height: 2.5E-1em; margin: 1em; }");
        let Node::Ruleset(ruleset) = &rules[0] else { panic!("应为规则集") };
        assert_eq!(declaration(&ruleset.rules()[0]).value.to_plain_css(), "1000px");
        assert_eq!(declaration(&ruleset.rules()[1]).value.to_plain_css(), "0.25em");
        assert_eq!(declaration(&ruleset.rules()[2]).value.to_plain_css(), "1em");
    }

    #[test]
    fn unclosed_block_reports_position() {
        let err = LessParser::new().parse(".a { color: red;").unwrap_err();
        assert_eq!(err.error_type(), "Parse");
    }
}
