//! less_oxide_engine 库入口，提供面向 Rust 与 Node.js 的 LESS 编译能力。
//! 编译分为五个阶段：解析（Parser）→ 导入加载（ImportManager）→ 语义求值（tree）
//! → 选择器拼接（JoinSelectorVisitor）→ CSS 序列化（Serializer）。

mod context;
mod error;
pub mod functions;
mod importer;
mod output;
mod parser;
mod serializer;
pub mod tree;
mod utils;
mod visitor;

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

pub use crate::context::{DefaultFunc, EvalContext, Frame, MathMode, NodeParser};
pub use crate::error::{LessError, LessResult, Location};
pub use crate::functions::{FunctionCaller, FunctionRegistry, LessFunction, Plugin};
pub use crate::importer::{FileManager, FileSystemFileManager, ImportManager, LoadedFile};
pub use crate::output::{CssOptions, CssOutput, Output};
pub use crate::parser::LessParser;
pub use crate::serializer::Serializer;
pub use crate::visitor::{JoinSelectorVisitor, Visitor};

use crate::tree::{FileInfo, Node};

/// LESS 编译配置。
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 是否输出压缩后的 CSS。
    pub minify: bool,
    /// 当前源文件所在目录，用于解析相对 @import。
    pub current_dir: Option<PathBuf>,
    /// 额外的检索目录。
    pub include_paths: Vec<PathBuf>,
    pub math: MathMode,
    /// 为真时不兼容单位的运算直接报错。
    pub strict_units: bool,
    /// 数值输出保留的小数位数。
    pub num_precision: usize,
    pub strict_imports: bool,
    /// 插在源码之前的变量，源码中的同名声明可以覆盖它们。
    pub global_vars: IndexMap<String, String>,
    /// 追加在源码之后的变量，会覆盖源码中的同名声明。
    pub modify_vars: IndexMap<String, String>,
    /// 供 `@plugin "name";` 查找的插件。
    pub plugins: IndexMap<String, Rc<dyn Plugin>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            minify: false,
            current_dir: None,
            include_paths: Vec::new(),
            math: MathMode::ParensDivision,
            strict_units: false,
            num_precision: 8,
            strict_imports: false,
            global_vars: IndexMap::new(),
            modify_vars: IndexMap::new(),
            plugins: IndexMap::new(),
        }
    }
}

/// 编译 LESS 源码为 CSS 文本。
///
/// # 参数
/// * `source` - 待编译的 LESS 字符串
/// * `options` - 编译配置
pub fn compile(source: &str, options: CompileOptions) -> LessResult<String> {
    compile_with(source, &options, &FileSystemFileManager)
}

/// 使用自定义文件管理器编译，导入的文件都经由它读取。
pub fn compile_with(source: &str, options: &CompileOptions, file_manager: &dyn FileManager) -> LessResult<String> {
    compile_source(source, None, options, file_manager)
}

/// 从文件路径编译 LESS，自动处理 @import。
pub fn compile_file<P: AsRef<Path>>(path: P, mut options: CompileOptions) -> LessResult<String> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)
        .map_err(|err| LessError::eval(format!("读取文件 {} 失败: {err}", path.display())))?;
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if let Some(parent) = path.parent() {
        if options.current_dir.is_none() {
            options.current_dir = Some(parent.to_path_buf());
        }
        if options.include_paths.is_empty() {
            options.include_paths.push(parent.to_path_buf());
        }
    }
    let filename = path.to_string_lossy().into_owned();
    compile_source(&source, Some(&filename), &options, &FileSystemFileManager)
}

fn compile_source(
    source: &str,
    filename: Option<&str>,
    options: &CompileOptions,
    file_manager: &dyn FileManager,
) -> LessResult<String> {
    debug!(file = filename.unwrap_or("<input>"), minify = options.minify, "开始编译");
    let parser = match filename {
        Some(filename) => LessParser::with_file_info(Rc::new(FileInfo::new(filename))),
        None => LessParser::new(),
    };
    let source = inject_variables(source, options);
    let root = parser.parse(&source)?;
    let root = ImportManager::new(options, file_manager).run(root, filename)?;

    let mut ctx = EvalContext::new(options);
    ctx.parser = Some(Rc::new(parser));
    let evaluated = root.eval(&mut ctx)?;

    let mut tree = Node::Ruleset(Rc::new(evaluated));
    JoinSelectorVisitor::default().run(&mut tree)?;
    let Node::Ruleset(root) = tree else {
        return Err(LessError::eval("求值结果不是根规则集"));
    };
    let css = Serializer::new(options.minify).to_css(&root, &ctx.css_options())?;
    debug!(bytes = css.len(), "编译完成");
    Ok(css)
}

/// `global_vars` 放在最前，`modify_vars` 放在最后。
fn inject_variables(source: &str, options: &CompileOptions) -> String {
    if options.global_vars.is_empty() && options.modify_vars.is_empty() {
        return source.to_string();
    }
    let declare = |vars: &IndexMap<String, String>| -> String {
        vars.iter()
            .map(|(name, value)| {
                let name = name.trim_start_matches('@');
                let value = value.trim().trim_end_matches(';');
                format!("@{name}: {value};\n")
            })
            .collect()
    };
    let mut injected = declare(&options.global_vars);
    injected.push_str(source);
    if !options.modify_vars.is_empty() {
        injected.push('\n');
        injected.push_str(&declare(&options.modify_vars));
    }
    injected
}

#[cfg(feature = "node")]
use napi::{Error, Result};
#[cfg(feature = "node")]
use napi_derive::napi;

/// Node.js 侧的编译选项对象。
#[cfg(feature = "node")]
#[napi(object)]
pub struct JsCompileOptions {
    /// 是否压缩输出 CSS。
    pub minify: Option<bool>,
    /// 源文件路径，用于解析 @import。
    pub filename: Option<String>,
    /// `always`、`parens-division` 或 `parens`。
    pub math: Option<String>,
    pub strict_units: Option<bool>,
    pub include_paths: Option<Vec<String>>,
    pub global_vars: Option<std::collections::HashMap<String, String>>,
    pub modify_vars: Option<std::collections::HashMap<String, String>>,
}

/// 暴露给 Node.js 的同步编译函数。
#[cfg(feature = "node")]
#[napi]
pub fn compile_less(source: String, options: Option<JsCompileOptions>) -> Result<String> {
    let opt = options.unwrap_or(JsCompileOptions {
        minify: None,
        filename: None,
        math: None,
        strict_units: None,
        include_paths: None,
        global_vars: None,
        modify_vars: None,
    });
    let mut compile_options = CompileOptions {
        minify: opt.minify.unwrap_or(false),
        strict_units: opt.strict_units.unwrap_or(false),
        ..CompileOptions::default()
    };
    if let Some(math) = opt.math.as_deref() {
        compile_options.math = MathMode::parse(math)
            .ok_or_else(|| Error::from_reason(format!("未知的 math 选项 {math}")))?;
    }
    if let Some(paths) = opt.include_paths {
        compile_options.include_paths = paths.into_iter().map(PathBuf::from).collect();
    }
    compile_options.global_vars = opt.global_vars.unwrap_or_default().into_iter().collect();
    compile_options.modify_vars = opt.modify_vars.unwrap_or_default().into_iter().collect();
    if let Some(filename) = opt.filename {
        let path = PathBuf::from(&filename);
        if let Some(parent) = path.parent() {
            let dir = parent.to_path_buf();
            compile_options.current_dir = Some(dir.clone());
            compile_options.include_paths.push(dir);
        }
    }
    compile(&source, compile_options).map_err(|err| Error::from_reason(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn compile_basic_variable() {
        let src = r"@base: #111;
body {
  color: @base;
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert_eq!(css, "body {\n  color: #111;\n}");
    }

    #[test]
    fn compile_nested_selectors() {
        let src = r".btn {
  color: #fff;
  &:hover {
    color: #000;
  }
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains(".btn:hover"));
        assert!(css.contains("color: #000"));
    }

    #[test]
    fn compile_important_flag() {
        let src = r"@base: 10px;
.box {
  margin: @base !important;
}";
        let css = compile(
            src,
            CompileOptions {
                minify: true,
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(css.contains("margin:10px!important"));
        assert!(!css.contains("!important!important"));
    }

    #[test]
    fn compile_mixin_invocation() {
        let src = r".rounded(@radius) {
  border-radius: @radius;
}

.card {
  .rounded(8px);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert_eq!(css, ".card {\n  border-radius: 8px;\n}");
    }

    #[test]
    fn compile_arithmetic_expression() {
        let src = r"@base: 10px;
.box {
  width: @base + 5px;
  padding: (@base * 2);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("width: 15px"));
        assert!(css.contains("padding: 20px"));
    }

    #[test]
    fn global_and_modify_vars_wrap_the_source() {
        let mut options = CompileOptions::default();
        options.global_vars.insert("gap".into(), "4px".into());
        options.modify_vars.insert("@color".into(), "blue;".into());
        let css = compile(".a { margin: @gap; color: @color; }\n@color: red;", options).unwrap();
        assert_eq!(css, ".a {\n  margin: 4px;\n  color: blue;\n}");
    }

    #[test]
    fn undefined_variable_is_a_name_error() {
        let err = compile(".a { color: @nope; }", CompileOptions::default()).unwrap_err();
        assert_eq!(err.error_type(), "Name");
    }
}
