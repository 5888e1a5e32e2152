use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::{Node, NodeInfo, Property, Variable};
use crate::context::EvalContext;
use crate::error::{LessError, LessResult};
use crate::output::{CssOptions, Output};

static VARIABLE_INTERPOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\{([\w-]+)\}").expect("变量插值正则编译失败"));
static PROPERTY_INTERPOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([\w-]+)\}").expect("属性插值正则编译失败"));

/// 标识符关键字，例如 `auto`、`true`。
#[derive(Debug, Clone)]
pub struct Keyword {
    pub value: String,
    pub info: NodeInfo,
}

impl Keyword {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self {
            value: value.into(),
            info: NodeInfo::default(),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(if value { "true" } else { "false" })
    }

    pub fn gen_css(&self, output: &mut dyn Output) -> LessResult<()> {
        if self.value == "%" {
            return Err(LessError::syntax("孤立的 % 缺少数值")
                .with_location(self.info.index, self.info.file_info()));
        }
        output.add(&self.value, self.info.file_info(), self.info.index);
        Ok(())
    }
}

/// 原样输出的文本片段。
#[derive(Debug, Clone)]
pub struct Anonymous {
    pub value: String,
    /// 作为规则（而非值）出现，例如 `(inline)` 导入的内容。
    pub rule_like: bool,
    pub info: NodeInfo,
}

impl Anonymous {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self {
            value: value.into(),
            rule_like: false,
            info: NodeInfo::default(),
        }
    }

    pub fn rule<S: Into<String>>(value: S) -> Self {
        Self {
            rule_like: true,
            ..Self::new(value)
        }
    }

    pub fn gen_css(&self, output: &mut dyn Output) {
        if !self.value.is_empty() {
            output.add(&self.value, self.info.file_info(), self.info.index);
        }
    }

    pub fn compare(&self, other: &Node) -> Option<Ordering> {
        let mine = Node::Anonymous(self.clone()).to_plain_css();
        (mine == other.to_plain_css()).then_some(Ordering::Equal)
    }
}

/// 引号字符串；`escaped` 为真时输出不带引号（`~"..."`）。
#[derive(Debug, Clone)]
pub struct Quoted {
    pub quote: char,
    pub value: String,
    pub escaped: bool,
    pub info: NodeInfo,
}

impl Quoted {
    pub fn new<S: Into<String>>(quote: char, value: S, escaped: bool) -> Self {
        Self {
            quote,
            value: value.into(),
            escaped,
            info: NodeInfo::default(),
        }
    }

    pub fn gen_css(&self, output: &mut dyn Output) {
        let file_info = self.info.file_info();
        if !self.escaped {
            output.add(&self.quote.to_string(), file_info, self.info.index);
        }
        output.add(&self.value, file_info, self.info.index);
        if !self.escaped {
            output.add(&self.quote.to_string(), file_info, self.info.index);
        }
    }

    pub fn contains_variables(&self) -> bool {
        VARIABLE_INTERPOLATION.is_match(&self.value)
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Quoted> {
        let value = interpolate(ctx, &self.value, &self.info)?;
        Ok(Quoted {
            value,
            ..self.clone()
        })
    }

    /// 两个非转义字符串按原始值比较，与引号风格无关。
    pub fn compare(&self, other: &Node) -> Option<Ordering> {
        match other {
            Node::Quoted(other) if !self.escaped && !other.escaped => {
                Some(self.value.cmp(&other.value))
            }
            _ => {
                let mine = Node::Quoted(self.clone()).to_plain_css();
                (mine == other.to_plain_css()).then_some(Ordering::Equal)
            }
        }
    }
}

/// 展开文本中的 `@{var}` 与 `${prop}`，直到结果不再变化。
pub fn interpolate(ctx: &mut EvalContext, text: &str, info: &NodeInfo) -> LessResult<String> {
    let value = replace_until_stable(ctx, text, &VARIABLE_INTERPOLATION, |ctx, name| {
        Node::Variable(Variable::new(format!("@{name}"), info.clone())).eval(ctx)
    })?;
    replace_until_stable(ctx, &value, &PROPERTY_INTERPOLATION, |ctx, name| {
        Node::Property(Property::new(format!("${name}"), info.clone())).eval(ctx)
    })
}

fn replace_until_stable<F>(
    ctx: &mut EvalContext,
    text: &str,
    pattern: &Regex,
    mut lookup: F,
) -> LessResult<String>
where
    F: FnMut(&mut EvalContext, &str) -> LessResult<Node>,
{
    let mut current = text.to_string();
    loop {
        if !pattern.is_match(&current) {
            return Ok(current);
        }
        let mut next = String::with_capacity(current.len());
        let mut last = 0;
        for caps in pattern.captures_iter(&current) {
            let (whole, name) = split_capture(&caps);
            next.push_str(&current[last..whole.0]);
            let resolved = lookup(ctx, name)?;
            match &resolved {
                Node::Quoted(quoted) => next.push_str(&quoted.value),
                other => next.push_str(&other.to_css(&ctx.css_options())?),
            }
            last = whole.1;
        }
        next.push_str(&current[last..]);
        if next == current {
            return Ok(next);
        }
        current = next;
    }
}

fn split_capture<'a>(caps: &Captures<'a>) -> ((usize, usize), &'a str) {
    let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
    let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    (whole, name)
}

/// 注释节点，`//` 行注释不会出现在输出中。
#[derive(Debug, Clone)]
pub struct Comment {
    pub value: String,
    pub is_line_comment: bool,
    pub info: NodeInfo,
}

impl Comment {
    pub fn new<S: Into<String>>(value: S, is_line_comment: bool) -> Self {
        Self {
            value: value.into(),
            is_line_comment,
            info: NodeInfo::default(),
        }
    }

    pub fn gen_css(&self, output: &mut dyn Output) {
        output.add(&self.value, self.info.file_info(), self.info.index);
    }

    /// 压缩模式下只保留 `/*!` 开头的注释。
    pub fn is_silent(&self, compress: bool) -> bool {
        self.is_line_comment || (compress && !self.value.starts_with("/*!"))
    }
}

/// `url(...)`。
#[derive(Debug, Clone)]
pub struct Url {
    pub value: Box<Node>,
    pub info: NodeInfo,
}

impl Url {
    pub fn new(value: Node) -> Self {
        Self {
            value: Box::new(value),
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Url> {
        Ok(Url {
            value: Box::new(self.value.eval(ctx)?),
            info: self.info.clone(),
        })
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        output.add("url(", self.info.file_info(), self.info.index);
        self.value.gen_css(opts, output)?;
        output.add(")", None, None);
        Ok(())
    }
}
