use once_cell::sync::Lazy;
use regex::Regex;

use super::values::interpolate;
use super::{Node, NodeInfo};
use crate::context::EvalContext;
use crate::error::LessResult;
use crate::output::{CssOptions, CssOutput, Output};

static MIXIN_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,&#*.\w-]([\w-]|(\\.))*").expect("mixin 元素正则编译失败"));

/// 组合符：空串、空格、`>`、`+`、`~` 等。
#[derive(Debug, Clone, PartialEq)]
pub struct Combinator {
    pub value: String,
    pub empty_or_whitespace: bool,
}

impl Combinator {
    pub fn new(value: &str) -> Self {
        if value == " " {
            return Self {
                value: " ".to_string(),
                empty_or_whitespace: true,
            };
        }
        let value = value.trim().to_string();
        Self {
            empty_or_whitespace: value.is_empty(),
            value,
        }
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) {
        let bare = opts.compress || matches!(self.value.as_str(), "" | " " | "|");
        if bare {
            output.add(&self.value, None, None);
        } else {
            output.add(&format!(" {} ", self.value), None, None);
        }
    }
}

impl Default for Combinator {
    fn default() -> Self {
        Self::new("")
    }
}

/// 选择器中的一个简单选择器及其前导组合符。
#[derive(Debug, Clone)]
pub struct Element {
    pub combinator: Combinator,
    pub value: String,
    /// 值中含 `@{var}` 插值，求值后需要重新解析。
    pub is_variable: bool,
    pub info: NodeInfo,
}

impl Element {
    pub fn new<S: Into<String>>(combinator: Combinator, value: S) -> Self {
        let value = value.into();
        Self {
            is_variable: value.contains("@{"),
            combinator,
            value,
            info: NodeInfo::default(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Element> {
        if !self.is_variable {
            return Ok(self.clone());
        }
        let value = interpolate(ctx, &self.value, &self.info)?;
        Ok(Element {
            value,
            ..self.clone()
        })
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) {
        self.combinator.gen_css(opts, output);
        output.add(&self.value, self.info.file_info(), self.info.index);
    }
}

#[derive(Debug, Clone)]
pub struct Selector {
    pub elements: Vec<Element>,
    /// 选择器守卫 `when (...)`。
    pub condition: Option<Box<Node>>,
    pub evald_condition: bool,
    pub media_empty: bool,
    pub info: NodeInfo,
}

impl Selector {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements,
            condition: None,
            evald_condition: true,
            media_empty: false,
            info: NodeInfo::default(),
        }
    }

    pub fn with_condition(mut self, condition: Node) -> Self {
        self.condition = Some(Box::new(condition));
        self.evald_condition = false;
        self
    }

    /// 由单个元素构成的选择器，mixin 定义的名字就是这样表示的。
    pub fn simple<S: Into<String>>(value: S) -> Self {
        Self::new(vec![Element::new(Combinator::default(), value)])
    }

    /// 保留位置、可见性与守卫结果，替换元素。
    pub fn derive(&self, elements: Vec<Element>) -> Selector {
        Selector {
            elements,
            condition: None,
            evald_condition: self.evald_condition,
            media_empty: self.media_empty,
            info: self.info.clone(),
        }
    }

    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Selector> {
        let evald_condition = match &self.condition {
            Some(condition) => super::condition::evaluate_guard(condition, ctx)?,
            None => self.evald_condition,
        };
        let elements = self
            .elements
            .iter()
            .map(|element| element.eval(ctx))
            .collect::<LessResult<Vec<_>>>()?;
        Ok(Selector {
            evald_condition,
            condition: None,
            ..self.derive(elements)
        })
    }

    pub fn has_variable(&self) -> bool {
        self.elements.iter().any(|element| element.is_variable)
    }

    pub fn is_just_parent_selector(&self) -> bool {
        !self.media_empty
            && self.elements.len() == 1
            && self.elements[0].value == "&"
            && self.elements[0].combinator.empty_or_whitespace
    }

    /// mixin 调用视角下的元素序列，例如 `#ns > .m` 得到 `["#ns", ".m"]`。
    pub fn mixin_elements(&self) -> Vec<String> {
        let joined: String = self
            .elements
            .iter()
            .map(|element| format!("{}{}", element.combinator.value, element.value))
            .collect();
        let mut found: Vec<String> = MIXIN_ELEMENT
            .find_iter(&joined)
            .map(|m| m.as_str().to_string())
            .collect();
        if found.first().is_some_and(|first| first == "&") {
            found.remove(0);
        }
        found
    }

    /// 调用方选择器（自身）与定义方选择器 `other` 前缀匹配，返回匹配的元素个数。
    pub fn match_selector(&self, other: &Selector) -> usize {
        let wanted = other.mixin_elements();
        if wanted.is_empty() || self.elements.len() < wanted.len() {
            return 0;
        }
        let matched = self
            .elements
            .iter()
            .zip(wanted.iter())
            .all(|(element, name)| &element.value == name);
        if matched {
            wanted.len()
        } else {
            0
        }
    }

    /// `first` 为假时，空组合符的首元素前补一个空格（后代关系）。
    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output, first: bool) {
        let leading_descendant = self
            .elements
            .first()
            .is_some_and(|element| element.combinator.value.is_empty());
        if !first && leading_descendant {
            output.add(" ", None, None);
        }
        for element in &self.elements {
            element.gen_css(opts, output);
        }
    }

    pub fn to_css(&self, opts: &CssOptions) -> String {
        let mut output = CssOutput::new();
        self.gen_css(opts, &mut output, true);
        output.into_string()
    }

    /// `@media` 等块内部用来承接父选择器的空选择器。
    pub fn create_empty_selectors() -> Vec<Selector> {
        let mut selector = Selector::simple("&");
        selector.media_empty = true;
        vec![selector]
    }
}

/// 把一条选择器路径渲染为文本。
pub fn path_to_css(path: &[Selector], opts: &CssOptions) -> String {
    let mut output = CssOutput::new();
    for (i, selector) in path.iter().enumerate() {
        selector.gen_css(opts, &mut output, i == 0);
    }
    output.into_string().trim().to_string()
}

/// 把 `selector` 放进父级路径集合 `context` 中，结果追加到 `paths`。
///
/// 每个 `&` 都会被父级路径逐一替换，多个 `&` 因此产生笛卡尔积；
/// 不含 `&` 的选择器接在每条父级路径之后。
pub fn join_selector(paths: &mut Vec<Vec<Selector>>, context: &[Vec<Selector>], selector: &Selector) {
    let mut new_paths = Vec::new();
    let had_parent = replace_parent_selector(&mut new_paths, context, selector);
    if !had_parent {
        new_paths = if context.is_empty() {
            vec![vec![selector.clone()]]
        } else {
            context
                .iter()
                .map(|parent| {
                    let mut path: Vec<Selector> = parent
                        .iter()
                        .map(|sel| {
                            let mut derived = sel.derive(sel.elements.clone());
                            derived.info.copy_visibility_info(selector.info.visibility_info());
                            derived
                        })
                        .collect();
                    path.push(selector.clone());
                    path
                })
                .collect()
        };
    }
    paths.extend(new_paths);
}

fn replace_parent_selector(
    paths: &mut Vec<Vec<Selector>>,
    context: &[Vec<Selector>],
    selector: &Selector,
) -> bool {
    let mut had_parent = false;
    let mut current: Vec<Element> = Vec::new();
    let mut new_selectors: Vec<Vec<Selector>> = vec![Vec::new()];

    for element in &selector.elements {
        if element.value != "&" {
            current.push(element.clone());
            continue;
        }
        had_parent = true;
        merge_elements_onto_selectors(std::mem::take(&mut current), &mut new_selectors);
        let mut multiplied = Vec::new();
        for mut sel in new_selectors {
            if context.is_empty() {
                // 没有父级时保留 `&` 的组合符，挂到下一个元素上
                if let Some(first) = sel.first_mut() {
                    first
                        .elements
                        .push(Element::new(element.combinator.clone(), ""));
                }
                multiplied.push(sel);
            } else {
                for parent in context {
                    multiplied.push(add_replacement_into_path(&sel, parent, element, selector));
                }
            }
        }
        new_selectors = multiplied;
    }
    merge_elements_onto_selectors(current, &mut new_selectors);

    for path in new_selectors {
        if !path.is_empty() {
            paths.push(path);
        }
    }
    had_parent
}

fn add_replacement_into_path(
    beginning: &[Selector],
    add_path: &[Selector],
    replaced: &Element,
    original: &Selector,
) -> Vec<Selector> {
    let mut new_path: Vec<Selector> = beginning.to_vec();
    let mut joined = match new_path.pop() {
        Some(last) => original.derive(last.elements),
        None => original.derive(Vec::new()),
    };

    if let Some(parent_first) = add_path.first() {
        if let Some(parent_el) = parent_first.elements.first() {
            let mut combinator = replaced.combinator.clone();
            if combinator.empty_or_whitespace && !parent_el.combinator.empty_or_whitespace {
                combinator = parent_el.combinator.clone();
            }
            let mut head = Element::new(combinator, parent_el.value.clone());
            head.info = replaced.info.clone();
            joined.elements.push(head);
            joined
                .elements
                .extend(parent_first.elements.iter().skip(1).cloned());
        }
    }

    if !joined.elements.is_empty() {
        new_path.push(joined);
    }
    new_path.extend(
        add_path
            .iter()
            .skip(1)
            .map(|sel| sel.derive(sel.elements.clone())),
    );
    new_path
}

fn merge_elements_onto_selectors(elements: Vec<Element>, selectors: &mut Vec<Vec<Selector>>) {
    if elements.is_empty() {
        return;
    }
    if selectors.is_empty() {
        selectors.push(vec![Selector::new(elements)]);
        return;
    }
    for path in selectors.iter_mut() {
        match path.last_mut() {
            Some(last) => last.elements.extend(elements.iter().cloned()),
            None => path.push(Selector::new(elements.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sel(parts: &[(&str, &str)]) -> Selector {
        Selector::new(
            parts
                .iter()
                .map(|(comb, value)| Element::new(Combinator::new(comb), *value))
                .collect(),
        )
    }

    fn render(paths: &[Vec<Selector>]) -> Vec<String> {
        paths
            .iter()
            .map(|path| path_to_css(path, &CssOptions::default()))
            .collect()
    }

    #[test]
    fn ampersand_joins_onto_single_parent() {
        let context = vec![vec![sel(&[("", ".parent")])]];
        let mut paths = Vec::new();
        join_selector(&mut paths, &context, &sel(&[("", "&"), ("", ".child")]));
        assert_eq!(render(&paths), vec![".parent.child"]);
    }

    #[test]
    fn descendant_fans_out_over_parents() {
        let context = vec![vec![sel(&[("", ".p1")])], vec![sel(&[("", ".p2")])]];
        let mut paths = Vec::new();
        join_selector(&mut paths, &context, &sel(&[("", "&"), (" ", ".child")]));
        assert_eq!(render(&paths), vec![".p1 .child", ".p2 .child"]);
    }

    #[test]
    fn implicit_descendant_without_ampersand() {
        let context = vec![vec![sel(&[("", ".a")])]];
        let mut paths = Vec::new();
        join_selector(&mut paths, &context, &sel(&[("", ".b")]));
        assert_eq!(render(&paths), vec![".a .b"]);
        let mut paths = Vec::new();
        join_selector(&mut paths, &context, &sel(&[(">", ".b")]));
        assert_eq!(render(&paths), vec![".a > .b"]);
    }

    #[test]
    fn repeated_ampersand_uses_the_same_parent() {
        let context = vec![vec![sel(&[("", ".parent")])]];
        let mut paths = Vec::new();
        join_selector(&mut paths, &context, &sel(&[("", "&"), ("", "-and-"), ("", "&")]));
        assert_eq!(render(&paths), vec![".parent-and-.parent"]);
    }

    #[test]
    fn trailing_ampersand_reverses_nesting() {
        let context = vec![vec![sel(&[("", ".a")])]];
        let mut paths = Vec::new();
        join_selector(&mut paths, &context, &sel(&[("", ".b"), (" ", "&")]));
        assert_eq!(render(&paths), vec![".b .a"]);
    }

    #[test]
    fn ampersand_at_root_is_dropped() {
        let mut paths = Vec::new();
        join_selector(&mut paths, &[], &sel(&[("", "&"), ("", ".x")]));
        assert_eq!(render(&paths), vec![".x"]);
    }

    #[test]
    fn mixin_elements_strip_combinators() {
        let call = sel(&[("", "#ns"), (">", ".m")]);
        assert_eq!(call.mixin_elements(), vec!["#ns".to_string(), ".m".to_string()]);
        let namespace = sel(&[("", "#ns")]);
        assert_eq!(call.match_selector(&namespace), 1);
        assert_eq!(namespace.match_selector(&call), 0);
        assert_eq!(sel(&[("", "#ns"), ("", ".m")]).match_selector(&call), 2);
    }

    #[test]
    fn just_parent_selector() {
        assert!(sel(&[("", "&")]).is_just_parent_selector());
        assert!(!sel(&[("", "&"), ("", ".x")]).is_just_parent_selector());
        assert!(!Selector::create_empty_selectors()[0].is_just_parent_selector());
    }

    #[test]
    fn compressed_combinators_have_no_spaces() {
        let path = vec![sel(&[("", ".a")]), sel(&[(">", ".b")])];
        let opts = CssOptions {
            compress: true,
            ..CssOptions::default()
        };
        assert_eq!(path_to_css(&path, &opts), ".a>.b");
    }
}
