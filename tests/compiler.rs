use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use less_oxide_engine::tree::{Dimension, Node};
use less_oxide_engine::{
    compile, compile_file, compile_with, CompileOptions, FileManager, LessError, LessFunction, LessResult,
    LoadedFile, MathMode, Plugin,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn minified() -> CompileOptions {
    CompileOptions {
        minify: true,
        ..CompileOptions::default()
    }
}

#[test]
fn variable_and_nesting() {
    let src = r"@spacing: 8px;
.container {
  padding: @spacing;
  .title {
    margin-bottom: @spacing;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(
        css,
        ".container {\n  padding: 8px;\n}\n\n.container .title {\n  margin-bottom: 8px;\n}"
    );
}

#[test]
fn minify_output() {
    let src = r".demo {
  color: #333;
  font-weight: bold;
}";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".demo{color:#333;font-weight:bold}");
}

#[test]
fn mixin_and_color_functions() {
    let src = r".rounded(@radius) {
  border-radius: @radius;
}

.badge {
  .rounded(4px);
  background: lighten(#123456, 15%);
}";
    let css = compile(src, minified()).unwrap();
    assert!(css.contains(".badge{border-radius:4px"));
    assert!(css.contains("background:#1f5a95"));
    assert!(!css.contains(".rounded"));
}

#[test]
fn mixin_default_and_override() {
    let src = r".shadow(@x: 0, @y: 2px, @blur: 4px) {
  box-shadow: @x @y @blur rgba(0, 0, 0, 0.4);
}

.dialog {
  .shadow();
}

.dialog-elevated {
  .shadow(0, 8px, 16px);
}";
    let css = compile(src, minified()).unwrap();
    assert!(css.contains(".dialog{box-shadow:0 2px 4px rgba(0,0,0,0.4)}"));
    assert!(css.contains(".dialog-elevated{box-shadow:0 8px 16px rgba(0,0,0,0.4)}"));
}

#[test]
fn arithmetic_multiple_segments_minified() {
    let src = r"@base: 5px;
.layout {
  padding: (@base * 2) (@base * 4) (@base / 5);
}";
    let css = compile(src, minified()).unwrap();
    assert!(css.contains(".layout{padding:10px 20px 1px}"));
}

#[test]
fn division_outside_parens_is_kept_by_default() {
    let src = ".a { font: 12px/1.5 serif; width: (10px / 2); }";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains("font: 12px/1.5 serif;"));
    assert!(css.contains("width: 5px;"));

    let always = CompileOptions {
        math: MathMode::Always,
        ..CompileOptions::default()
    };
    let css = compile(".a { width: 10px / 2; }", always).unwrap();
    assert!(css.contains("width: 5px;"));
}

#[test]
fn import_statement_passthrough() {
    let src = r#"@import (css) "https://cdn.example.com/reset.css";
body {
  color: #333;
}"#;
    let css = compile(src, minified()).unwrap();
    assert!(css.starts_with(r#"@import "https://cdn.example.com/reset.css";"#));
    assert!(css.contains("body{color:#333}"));
}

#[test]
fn nested_media_queries_and_supports() {
    let src = r".panel {
  color: #333;
  @media (min-width: 800px) {
    color: #000;
    .panel__title {
      font-size: 20px;
    }
  }
}

@media (max-width: 600px) {
  .panel {
    width: 100%;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains(".panel {\n  color: #333;"));
    assert!(css.contains("@media (min-width: 800px)"));
    assert!(css.contains(".panel .panel__title"));
    assert!(css.contains("@media (max-width: 600px)"));
    assert!(css.contains(".panel {\n    width: 100%;"));
}

#[test]
fn font_face_and_keyframes_blocks() {
    let src = r"@font-face {
  font-family: 'Open Sans';
  src: url('/fonts/open-sans.woff2') format('woff2');
}

@keyframes fade-in {
  from {
    opacity: 0;
  }
  to {
    opacity: 1;
  }
}";
    let css = compile(src, minified()).unwrap();
    assert!(css.contains(
        "@font-face{font-family:'Open Sans';src:url('/fonts/open-sans.woff2') format('woff2')}"
    ));
    assert!(css.contains("@keyframes fade-in{from{opacity:0}to{opacity:1}}"));
}

#[test]
fn guarded_mixins_and_default() {
    let src = r".size(@a) when (@a > 10) {
  width: big;
}
.size(@a) when (default()) {
  width: small;
}
.x {
  .size(20);
}
.y {
  .size(5);
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(css, ".x {\n  width: big;\n}\n\n.y {\n  width: small;\n}");
}

#[test]
fn guarded_rulesets_follow_variables() {
    let src = r".theme when (@mode = dark) {
  color: black;
}";
    let mut options = CompileOptions::default();
    options.global_vars.insert("mode".into(), "dark".into());
    let css = compile(src, options).unwrap();
    assert_eq!(css, ".theme {\n  color: black;\n}");

    let mut options = CompileOptions::default();
    options.global_vars.insert("mode".into(), "light".into());
    let css = compile(src, options).unwrap();
    assert_eq!(css, "");
}

#[test]
fn detached_rulesets_are_called_in_place() {
    let src = r"@detached: {
  background: red;
};
.top {
  @detached();
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(css, ".top {\n  background: red;\n}");
}

#[test]
fn parent_selector_and_interpolation() {
    let src = r"@name: banner;
.@{name} {
  &-title {
    color: red;
  }
  .dark & {
    color: white;
  }
}";
    let css = compile(src, minified()).unwrap();
    assert!(css.contains(".banner-title{color:red}"));
    assert!(css.contains(".dark .banner{color:white}"));
}

#[test]
fn compile_file_resolves_relative_imports() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("_vars.less"), "@brand: #0af;\n").unwrap();
    fs::write(
        dir.path().join("main.less"),
        "@import \"_vars\";\n.logo { color: @brand; }\n",
    )
    .unwrap();
    let css = compile_file(dir.path().join("main.less"), minified()).unwrap();
    assert_eq!(css, ".logo{color:#0af}");
}

#[test]
fn repeated_imports_are_emitted_once() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("shared.less"), ".shared { color: red; }\n").unwrap();
    fs::write(
        dir.path().join("main.less"),
        "@import \"shared.less\";\n@import \"shared.less\";\n@import (multiple) \"shared.less\";\n",
    )
    .unwrap();
    let css = compile_file(dir.path().join("main.less"), minified()).unwrap();
    assert_eq!(css.matches(".shared{color:red}").count(), 2);
}

#[test]
fn reference_imports_only_surface_through_mixins() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("lib.less"),
        ".btn { color: red; }\n.unused { color: blue; }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("main.less"),
        "@import (reference) \"lib\";\n.x { .btn(); }\n",
    )
    .unwrap();
    let css = compile_file(dir.path().join("main.less"), CompileOptions::default()).unwrap();
    assert!(css.contains(".x {\n  color: red;\n}"));
    assert!(!css.contains(".unused"));
    assert!(!css.contains(".btn"));
}

#[test]
fn reference_import_variables_resolve_without_output() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("lib.less"),
        "@libvar: 7px;\n.lib { color: red; }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("main.less"),
        "@import (reference) \"lib\";\n.x { w: @libvar; }\n",
    )
    .unwrap();
    let css = compile_file(dir.path().join("main.less"), CompileOptions::default()).unwrap();
    assert_eq!(css, ".x {\n  w: 7px;\n}");
}

#[test]
fn imports_inside_mixins_apply_on_every_call() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("part.less"), "color: red;\n").unwrap();
    fs::write(
        dir.path().join("main.less"),
        ".m() { @import \"part\"; }\n.x { .m(); }\n.y { .m(); }\n",
    )
    .unwrap();
    let css = compile_file(dir.path().join("main.less"), minified()).unwrap();
    assert_eq!(css.matches("color:red").count(), 2);
    assert!(css.contains(".y{color:red}"));
}

#[test]
fn repeated_inline_imports_are_emitted_once() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("raw.css"), ".raw{}").unwrap();
    fs::write(
        dir.path().join("main.less"),
        "@import (inline) \"raw.css\";\n@import (inline) \"raw.css\";\n",
    )
    .unwrap();
    let css = compile_file(dir.path().join("main.less"), CompileOptions::default()).unwrap();
    assert_eq!(css.matches(".raw{}").count(), 1);
}

#[test]
fn inline_imports_copy_contents_verbatim() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("raw.css"), ".raw{color:@not-a-var}").unwrap();
    fs::write(dir.path().join("main.less"), "@import (inline) \"raw.css\";\n").unwrap();
    let css = compile_file(dir.path().join("main.less"), CompileOptions::default()).unwrap();
    assert_eq!(css, ".raw{color:@not-a-var}");
}

#[derive(Debug, Default)]
struct MemoryFiles {
    files: HashMap<String, String>,
}

impl FileManager for MemoryFiles {
    fn load_file_sync(&self, path: &str, _current_dir: &Path, _include_paths: &[PathBuf]) -> LessResult<LoadedFile> {
        let key = if path.ends_with(".less") {
            path.to_string()
        } else {
            format!("{path}.less")
        };
        self.files
            .get(&key)
            .map(|contents| LoadedFile {
                filename: key.clone(),
                contents: contents.clone(),
            })
            .ok_or_else(|| LessError::eval(format!("missing {key}")))
    }
}

#[test]
fn custom_file_manager_and_variable_import_paths() {
    let mut files = MemoryFiles::default();
    files
        .files
        .insert("themes/dark.less".into(), "@bg: #000;\n".into());
    let src = "@theme: dark;\n@import \"themes/@{theme}\";\nbody { background: @bg; }";
    let css = compile_with(src, &minified(), &files).unwrap();
    assert_eq!(css, "body{background:#000}");
}

#[test]
fn optional_imports_may_be_missing() {
    let files = MemoryFiles::default();
    let css = compile_with(
        "@import (optional) \"nowhere\";\n.a { b: c; }",
        &minified(),
        &files,
    )
    .unwrap();
    assert_eq!(css, ".a{b:c}");
    assert!(compile_with("@import \"nowhere\";", &minified(), &files).is_err());
}

#[derive(Debug)]
struct Spacing;

impl Plugin for Spacing {
    fn name(&self) -> &str {
        "spacing"
    }

    fn functions(&self) -> Vec<(String, LessFunction)> {
        vec![(
            "grid".to_string(),
            LessFunction::new(|_, args| {
                Ok(args
                    .first()
                    .and_then(Node::as_dimension)
                    .map(|dim| Node::Dimension(Dimension::new(dim.value * 8.0, dim.unit.clone()))))
            }),
        )]
    }
}

#[test]
fn plugins_add_functions_to_their_scope() {
    let mut options = minified();
    options.plugins.insert("spacing".into(), Rc::new(Spacing));
    let css = compile("@plugin \"spacing\";\n.a { margin: grid(2px); }", options).unwrap();
    assert_eq!(css, ".a{margin:16px}");

    let err = compile("@plugin \"absent\";", CompileOptions::default()).unwrap_err();
    assert_eq!(err.error_type(), "Plugin");
}

#[test]
fn errors_carry_their_kind() {
    let err = compile(".a { color: red;", CompileOptions::default()).unwrap_err();
    assert_eq!(err.error_type(), "Parse");

    let err = compile(".a { .missing(); }", CompileOptions::default()).unwrap_err();
    assert_eq!(err.error_type(), "Name");

    let err = compile(
        ".m(@a) { width: @a; }\n.a { .m(1, 2, 3); }",
        CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.error_type(), "Runtime");
}
