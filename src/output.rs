//! CSS 文本输出端：节点只负责追加片段，不会回读。

use crate::tree::FileInfo;

/// 生成 CSS 时影响数值与颜色格式的选项。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CssOptions {
    pub compress: bool,
    pub strict_units: bool,
    pub num_precision: usize,
}

impl Default for CssOptions {
    fn default() -> Self {
        Self {
            compress: false,
            strict_units: false,
            num_precision: 8,
        }
    }
}

/// 只追加、带位置标注的字符串输出端。
pub trait Output {
    fn add(&mut self, chunk: &str, file_info: Option<&FileInfo>, index: Option<usize>);

    fn is_empty(&self) -> bool;
}

/// 直接拼接为字符串的输出端。
#[derive(Debug, Default)]
pub struct CssOutput {
    buffer: String,
}

impl CssOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_string(self) -> String {
        self.buffer
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

impl Output for CssOutput {
    fn add(&mut self, chunk: &str, _file_info: Option<&FileInfo>, _index: Option<usize>) {
        self.buffer.push_str(chunk);
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
