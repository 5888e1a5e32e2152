//! 导入加载：求值之前把 `@import` 指向的文件读入、解析，并把结果挂到导入节点上。

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::context::EvalContext;
use crate::error::{LessError, LessResult};
use crate::functions::Plugin;
use crate::parser::LessParser;
use crate::tree::{FileInfo, Import, ImportRoot, ImportSkip, Node, Ruleset};
use crate::visitor::Visitor;
use crate::CompileOptions;

/// 读入的文件内容。`filename` 是解析后的完整路径，用作缓存键。
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFile {
    pub filename: String,
    pub contents: String,
}

/// 文件加载协作者。
pub trait FileManager: Debug {
    fn load_file_sync(&self, path: &str, current_dir: &Path, include_paths: &[PathBuf]) -> LessResult<LoadedFile>;
}

/// 依次在当前目录与检索目录中查找，无扩展名时补 `.less`。
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemFileManager;

impl FileSystemFileManager {
    fn resolve_path(target: &str, current_dir: &Path, include_paths: &[PathBuf]) -> Option<PathBuf> {
        let raw = Path::new(target);
        let mut candidates = Vec::new();
        if raw.is_absolute() {
            candidates.push(raw.to_path_buf());
        } else {
            candidates.push(current_dir.join(raw));
            for base in include_paths {
                candidates.push(base.join(raw));
            }
        }
        candidates.iter().find_map(|candidate| Self::find_existing(candidate))
    }

    fn find_existing(candidate: &Path) -> Option<PathBuf> {
        let mut attempts = vec![candidate.to_path_buf()];
        if candidate.extension().is_none() {
            attempts.push(candidate.with_extension("less"));
        }
        attempts
            .into_iter()
            .find(|attempt| attempt.is_file())
            .map(|found| found.canonicalize().unwrap_or(found))
    }
}

impl FileManager for FileSystemFileManager {
    fn load_file_sync(&self, path: &str, current_dir: &Path, include_paths: &[PathBuf]) -> LessResult<LoadedFile> {
        let resolved = Self::resolve_path(path, current_dir, include_paths)
            .ok_or_else(|| LessError::eval(format!("无法解析 @import 路径 {path}")))?;
        let contents = fs::read_to_string(&resolved)
            .map_err(|err| LessError::eval(format!("读取文件 {} 失败: {err}", resolved.display())))?;
        Ok(LoadedFile {
            filename: resolved.to_string_lossy().into_owned(),
            contents,
        })
    }
}

/// 遍历解析树，为每个导入节点加载内容。
#[derive(Debug)]
pub struct ImportManager<'a> {
    options: &'a CompileOptions,
    file_manager: &'a dyn FileManager,
    /// 已解析的文件，按完整路径缓存。
    cache: HashMap<String, Rc<Ruleset>>,
    /// 正在导入中的文件链，用于发现循环导入。
    stack: Vec<String>,
    /// 各层文件的根规则集，求值变量路径时作为作用域。
    scopes: Vec<Rc<Ruleset>>,
    /// 只导入一次的文件在求值时登记到这里。
    seen: Rc<RefCell<HashSet<String>>>,
}

impl<'a> ImportManager<'a> {
    pub fn new(options: &'a CompileOptions, file_manager: &'a dyn FileManager) -> Self {
        Self {
            options,
            file_manager,
            cache: HashMap::new(),
            stack: Vec::new(),
            scopes: Vec::new(),
            seen: Rc::new(RefCell::new(HashSet::new())),
        }
    }

    /// 处理入口文件。`filename` 为空表示源码不来自文件。
    pub fn run(&mut self, root: Ruleset, filename: Option<&str>) -> LessResult<Ruleset> {
        if let Some(filename) = filename {
            self.stack.push(filename.to_string());
        }
        let mut node = Node::Ruleset(Rc::new(root));
        let outcome = self.visit_file(&mut node);
        if filename.is_some() {
            self.stack.pop();
        }
        outcome?;
        match node {
            Node::Ruleset(root) => Ok(Rc::try_unwrap(root).unwrap_or_else(|shared| (*shared).clone())),
            _ => Err(LessError::eval("导入处理后根节点丢失")),
        }
    }

    fn visit_file(&mut self, root: &mut Node) -> LessResult<()> {
        if let Node::Ruleset(ruleset) = root {
            self.scopes.push(ruleset.clone());
        }
        let outcome = root.accept(self);
        if matches!(root, Node::Ruleset(_)) {
            self.scopes.pop();
        }
        outcome
    }

    fn scope_context(&self) -> EvalContext {
        let mut ctx = EvalContext::new(self.options);
        for scope in &self.scopes {
            ctx.push_frame(scope.clone());
        }
        ctx
    }

    fn current_dir(&self, import: &Import) -> PathBuf {
        import
            .info
            .file_info()
            .map(|info| info.current_directory.clone())
            .filter(|dir| !dir.as_os_str().is_empty())
            .or_else(|| self.options.current_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn process(&mut self, import: &mut Import) -> LessResult<()> {
        let located = |err: LessError| err.with_location(import.info.index, import.info.file_info());
        let mut evaluated = if import.is_variable_import() {
            let mut ctx = self.scope_context();
            import.eval_for_import(&mut ctx).map_err(located)?
        } else {
            import.clone()
        };

        let Some(path) = evaluated.get_path() else {
            return Err(located(LessError::eval("导入路径必须是字符串")));
        };

        if evaluated.options.is_plugin {
            let plugin = self
                .find_plugin(&path)
                .ok_or_else(|| located(LessError::plugin(format!("找不到插件 {path}"))))?;
            debug!(plugin = plugin.name(), "插件已加载");
            evaluated.root = Some(ImportRoot::Plugin(plugin));
            *import = evaluated;
            return Ok(());
        }

        if evaluated.css && !evaluated.options.inline {
            *import = evaluated;
            return Ok(());
        }

        let current_dir = self.current_dir(&evaluated);
        let file = match self
            .file_manager
            .load_file_sync(&path, &current_dir, &self.options.include_paths)
        {
            Ok(file) => file,
            Err(err) if evaluated.options.optional => {
                debug!(path = %path, error = %err, "可选导入不存在，已跳过");
                evaluated.skip = ImportSkip::Yes;
                *import = evaluated;
                return Ok(());
            }
            Err(err) => return Err(located(err)),
        };
        debug!(path = %path, file = %file.filename, "已加载导入文件");
        evaluated.imported_filename = Some(file.filename.clone());

        if !evaluated.options.multiple {
            evaluated.skip = ImportSkip::once(file.filename.clone(), self.seen.clone());
        }

        if evaluated.options.inline {
            evaluated.root = Some(ImportRoot::Inline(file.contents));
            *import = evaluated;
            return Ok(());
        }

        if self.stack.contains(&file.filename) {
            warn!(file = %file.filename, "检测到循环导入，已跳过");
            evaluated.skip = ImportSkip::Yes;
            *import = evaluated;
            return Ok(());
        }

        let reference = evaluated.options.reference
            || import.info.file_info().is_some_and(|info| info.reference);
        let tree = match self.cache.get(&file.filename) {
            Some(tree) => tree.clone(),
            None => {
                let tree = self.load_tree(&file, reference)?;
                self.cache.insert(file.filename.clone(), tree.clone());
                tree
            }
        };
        evaluated.root = Some(ImportRoot::Tree(tree));
        *import = evaluated;
        Ok(())
    }

    fn load_tree(&mut self, file: &LoadedFile, reference: bool) -> LessResult<Rc<Ruleset>> {
        let mut file_info = FileInfo::new(file.filename.clone());
        file_info.reference = reference;
        let parser = LessParser::with_file_info(Rc::new(file_info));
        let parsed = parser.parse(&file.contents).map_err(|err| match err {
            LessError::ParseError { message, position } => LessError::ParseError {
                message: format!("{message} (文件: {})", file.filename),
                position,
            },
            other => other,
        })?;

        self.stack.push(file.filename.clone());
        let mut node = Node::Ruleset(Rc::new(parsed));
        let outcome = self.visit_file(&mut node);
        self.stack.pop();
        outcome?;
        match node {
            Node::Ruleset(tree) => Ok(tree),
            _ => Err(LessError::eval("导入文件解析结果不是规则集")),
        }
    }

    /// 先按原名查找，再按去掉目录与扩展名后的名字查找。
    fn find_plugin(&self, path: &str) -> Option<Rc<dyn Plugin>> {
        if let Some(plugin) = self.options.plugins.get(path) {
            return Some(plugin.clone());
        }
        let stem = Path::new(path).file_stem()?.to_str()?;
        self.options.plugins.get(stem).cloned()
    }
}

impl Visitor for ImportManager<'_> {
    fn visit(&mut self, node: &mut Node) -> LessResult<bool> {
        match node {
            Node::Import(import) => {
                self.process(import)?;
                Ok(false)
            }
            Node::Ruleset(_) | Node::AtRule(_) | Node::MixinDefinition(_) | Node::DetachedRuleset(_) => Ok(true),
            Node::Declaration(decl) => Ok(matches!(decl.value.as_ref(), Node::DetachedRuleset(_))),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::LessFunction;
    use pretty_assertions::assert_eq;

    /// 内存中的文件表，键为完整路径。
    #[derive(Debug, Default)]
    struct MemoryFileManager {
        files: HashMap<String, String>,
    }

    impl MemoryFileManager {
        fn with(mut self, name: &str, contents: &str) -> Self {
            self.files.insert(name.to_string(), contents.to_string());
            self
        }
    }

    impl FileManager for MemoryFileManager {
        fn load_file_sync(&self, path: &str, _current_dir: &Path, _include_paths: &[PathBuf]) -> LessResult<LoadedFile> {
            let name = if path.ends_with(".less") || path.ends_with(".css") {
                path.to_string()
            } else {
                format!("{path}.less")
            };
            self.files
                .get(&name)
                .map(|contents| LoadedFile {
                    filename: name.clone(),
                    contents: contents.clone(),
                })
                .ok_or_else(|| LessError::eval(format!("无法解析 @import 路径 {path}")))
        }
    }

    fn imports(root: &Ruleset) -> Vec<&Import> {
        root.rules()
            .iter()
            .filter_map(|rule| match rule {
                Node::Import(import) => Some(import),
                _ => None,
            })
            .collect()
    }

    fn run(source: &str, files: &MemoryFileManager) -> LessResult<Ruleset> {
        let options = CompileOptions::default();
        let root = LessParser::new().parse(source)?;
        ImportManager::new(&options, files).run(root, None)
    }

    #[test]
    fn attaches_parsed_tree_and_once_gate() {
        let files = MemoryFileManager::default().with("vars.less", "@c: red;");
        let root = run("@import \"vars\";", &files).unwrap();
        let import = imports(&root)[0];
        assert_eq!(import.imported_filename.as_deref(), Some("vars.less"));
        let Some(ImportRoot::Tree(tree)) = &import.root else {
            panic!("应挂上解析树");
        };
        assert_eq!(tree.rules().len(), 1);
        assert!(matches!(import.skip, ImportSkip::Once { .. }));
    }

    #[test]
    fn multiple_option_disables_the_once_gate() {
        let files = MemoryFileManager::default().with("a.less", ".a { b: c; }");
        let root = run("@import (multiple) \"a\";", &files).unwrap();
        assert!(matches!(imports(&root)[0].skip, ImportSkip::No));
    }

    #[test]
    fn variable_paths_use_root_variables() {
        let files = MemoryFileManager::default().with("themes/dark.less", "@bg: black;");
        let root = run("@theme: dark;\n@import \"themes/@{theme}\";", &files).unwrap();
        assert_eq!(imports(&root)[0].imported_filename.as_deref(), Some("themes/dark.less"));
    }

    #[test]
    fn missing_optional_import_is_skipped() {
        let files = MemoryFileManager::default();
        let root = run("@import (optional) \"nope\";", &files).unwrap();
        assert!(matches!(imports(&root)[0].skip, ImportSkip::Yes));
        let err = run("@import \"nope\";", &files).unwrap_err();
        assert!(err.message().contains("nope"));
    }

    #[test]
    fn recursive_imports_are_skipped() {
        let files = MemoryFileManager::default()
            .with("a.less", "@import \"b\";\n.a { x: y; }")
            .with("b.less", "@import \"a\";");
        let root = run("@import \"a\";", &files).unwrap();
        let Some(ImportRoot::Tree(a)) = &imports(&root)[0].root else {
            panic!("应挂上 a 的解析树");
        };
        let Some(ImportRoot::Tree(b)) = &imports(a)[0].root else {
            panic!("应挂上 b 的解析树");
        };
        assert!(matches!(imports(b)[0].skip, ImportSkip::Yes));
    }

    #[test]
    fn css_imports_are_not_loaded_and_inline_keeps_text() {
        let files = MemoryFileManager::default().with("raw.css", ".raw{}");
        let root = run("@import \"site.css\";\n@import (inline) \"raw.css\";", &files).unwrap();
        let found = imports(&root);
        assert!(found[0].css);
        assert!(found[0].root.is_none());
        assert!(matches!(&found[1].root, Some(ImportRoot::Inline(text)) if text == ".raw{}"));
        assert!(matches!(found[1].skip, ImportSkip::Once { .. }));
    }

    #[test]
    fn plugins_resolve_by_stem() {
        #[derive(Debug)]
        struct Noop;
        impl Plugin for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            fn functions(&self) -> Vec<(String, LessFunction)> {
                Vec::new()
            }
        }

        let mut options = CompileOptions::default();
        options.plugins.insert("noop".to_string(), Rc::new(Noop));
        let files = MemoryFileManager::default();
        let root = LessParser::new().parse("@plugin \"plugins/noop.js\";").unwrap();
        let root = ImportManager::new(&options, &files).run(root, None).unwrap();
        assert!(matches!(imports(&root)[0].root, Some(ImportRoot::Plugin(_))));

        let root = LessParser::new().parse("@plugin \"missing\";").unwrap();
        let err = ImportManager::new(&options, &files).run(root, None).unwrap_err();
        assert_eq!(err.error_type(), "Plugin");
    }
}
