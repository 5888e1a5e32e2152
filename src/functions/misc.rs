//! 字符串与列表函数。

use once_cell::sync::Lazy;
use regex::Regex;

use super::{arg, dimension_arg, FunctionRegistry, LessFunction};
use crate::error::LessError;
use crate::tree::{Anonymous, Dimension, Node, Quoted};
use crate::utils::encode_uri;

static FORMAT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)%[sda]").expect("格式化占位符正则编译失败"));

pub(crate) fn register(registry: &FunctionRegistry) {
    registry.add(
        "e",
        LessFunction::new(|_, args| {
            let text = arg(args, 0, "e")?.text_value()?;
            Ok(Some(Anonymous::new(text).into()))
        }),
    );
    registry.add(
        "escape",
        LessFunction::new(|_, args| {
            let text = arg(args, 0, "escape")?.text_value()?;
            Ok(Some(Anonymous::new(escape(&text)).into()))
        }),
    );
    registry.add(
        "%",
        LessFunction::new(|_, args| {
            let Some(Node::Quoted(template)) = args.first() else {
                return Err(LessError::argument("% 的第一个参数必须是字符串"));
            };
            let mut result = template.value.clone();
            for value in &args[1..] {
                let Some(found) = FORMAT_TOKEN.find(&result) else {
                    break;
                };
                let range = found.range();
                let token = found.as_str().to_string();
                let text = match value {
                    Node::Quoted(quoted) if token.eq_ignore_ascii_case("%s") => quoted.value.clone(),
                    other => other.to_plain_css(),
                };
                let text = if token.ends_with(|ch: char| ch.is_ascii_uppercase()) {
                    encode_uri_component(&text)
                } else {
                    text
                };
                result.replace_range(range, &text);
            }
            let result = result.replace("%%", "%");
            Ok(Some(
                Quoted::new(template.quote, result, template.escaped).into(),
            ))
        }),
    );
    registry.add(
        "length",
        LessFunction::new(|_, args| {
            let count = arg(args, 0, "length")?.list_items().len();
            Ok(Some(Dimension::number(count as f64).into()))
        }),
    );
    registry.add(
        "extract",
        LessFunction::new(|_, args| {
            let items = arg(args, 0, "extract")?.list_items();
            let index = dimension_arg(args, 1, "extract")?.value;
            if index < 1.0 || index.fract() != 0.0 {
                return Ok(None);
            }
            Ok(items.get(index as usize - 1).cloned())
        }),
    );
    // calc() 中引用变量时包裹一层，结果原样返回。
    registry.add(
        "_self",
        LessFunction::new(|_, args| Ok(Some(arg(args, 0, "_SELF")?.clone()))),
    );
}

fn escape(text: &str) -> String {
    encode_uri(text)
        .replace('=', "%3D")
        .replace(':', "%3A")
        .replace('#', "%23")
        .replace(';', "%3B")
        .replace('(', "%28")
        .replace(')', "%29")
}

fn encode_uri_component(text: &str) -> String {
    encode_uri(text)
        .replace(';', "%3B")
        .replace(',', "%2C")
        .replace('/', "%2F")
        .replace('?', "%3F")
        .replace(':', "%3A")
        .replace('@', "%40")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('+', "%2B")
        .replace('$', "%24")
        .replace('#', "%23")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvalContext;
    use crate::tree::{Keyword, Value};

    fn call(name: &str, args: &[Node]) -> Option<Node> {
        let mut ctx = EvalContext::default();
        let func = FunctionRegistry::global().get(name).unwrap();
        func.invoke(&mut ctx, args).unwrap()
    }

    #[test]
    fn e_strips_quotes() {
        let result = call("e", &[Quoted::new('"', "a b", false).into()]).unwrap();
        assert_eq!(result.to_plain_css(), "a b");
    }

    #[test]
    fn escape_encodes_reserved_characters() {
        let result = call("escape", &[Quoted::new('"', "a=1;b(c)", false).into()]).unwrap();
        assert_eq!(result.to_plain_css(), "a%3D1%3Bb%28c%29");
    }

    #[test]
    fn format_fills_placeholders_in_order() {
        let args = [
            Quoted::new('"', "%s-%d %%", false).into(),
            Quoted::new('"', "x", false).into(),
            Dimension::with_unit(2.0, "px").into(),
        ];
        let result = call("%", &args).unwrap();
        assert_eq!(result.to_plain_css(), "\"x-2px %\"");
    }

    #[test]
    fn length_and_extract() {
        let list = Node::Value(Value::new(vec![
            Keyword::new("a").into(),
            Keyword::new("b").into(),
            Keyword::new("c").into(),
        ]));
        assert_eq!(call("length", &[list.clone()]).unwrap().to_plain_css(), "3");
        let second = call("extract", &[list.clone(), Dimension::number(2.0).into()]).unwrap();
        assert_eq!(second.to_plain_css(), "b");
        assert!(call("extract", &[list, Dimension::number(9.0).into()]).is_none());
        let single = call("length", &[Keyword::new("solo").into()]).unwrap();
        assert_eq!(single.to_plain_css(), "1");
    }
}
