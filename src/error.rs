use std::fmt;
use thiserror::Error;

use crate::tree::FileInfo;

/// 错误在源码中的位置信息，字段均可缺省。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub index: Option<usize>,
    pub filename: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.index.is_none() && self.filename.is_none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() && self.line.is_none() {
            return Ok(());
        }
        f.write_str(" (")?;
        let mut parts = Vec::new();
        if let Some(filename) = &self.filename {
            parts.push(format!("文件 {filename}"));
        }
        if let Some(line) = self.line {
            parts.push(format!("行 {line}"));
        }
        if let Some(column) = self.column {
            parts.push(format!("列 {column}"));
        }
        if let Some(index) = self.index {
            parts.push(format!("位置 {index}"));
        }
        f.write_str(&parts.join(", "))?;
        f.write_str(")")
    }
}

/// 编译过程中统一的错误类型。
///
/// 除解析错误与无类型的求值错误外，每个变体对应一种带 `type` 判别的求值错误，
/// 在函数调用边界与规则集边界补齐位置信息。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LessError {
    #[error("解析失败: {message} (位置 {position})")]
    ParseError { message: String, position: usize },
    #[error("语义求值失败: {0}")]
    EvalError(String),
    #[error("参数错误: {message}{location}")]
    Argument { message: String, location: Location },
    #[error("运算错误: {message}{location}")]
    Operation { message: String, location: Location },
    #[error("语法错误: {message}{location}")]
    Syntax { message: String, location: Location },
    #[error("运行时错误: {message}{location}")]
    Runtime { message: String, location: Location },
    #[error("名称错误: {message}{location}")]
    Name { message: String, location: Location },
    #[error("插件错误: {message}{location}")]
    Plugin { message: String, location: Location },
}

pub type LessResult<T> = Result<T, LessError>;

impl LessError {
    pub fn parse<S: Into<String>>(message: S, position: usize) -> Self {
        LessError::ParseError {
            message: message.into(),
            position,
        }
    }

    pub fn eval<S: Into<String>>(message: S) -> Self {
        LessError::EvalError(message.into())
    }

    pub fn argument<S: Into<String>>(message: S) -> Self {
        LessError::Argument {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn operation<S: Into<String>>(message: S) -> Self {
        LessError::Operation {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn syntax<S: Into<String>>(message: S) -> Self {
        LessError::Syntax {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn runtime<S: Into<String>>(message: S) -> Self {
        LessError::Runtime {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn name<S: Into<String>>(message: S) -> Self {
        LessError::Name {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn plugin<S: Into<String>>(message: S) -> Self {
        LessError::Plugin {
            message: message.into(),
            location: Location::default(),
        }
    }

    /// 错误类别名称，与 `type` 判别字段一致。
    pub fn error_type(&self) -> &'static str {
        match self {
            LessError::ParseError { .. } => "Parse",
            LessError::EvalError(_) => "Eval",
            LessError::Argument { .. } => "Argument",
            LessError::Operation { .. } => "Operation",
            LessError::Syntax { .. } => "Syntax",
            LessError::Runtime { .. } => "Runtime",
            LessError::Name { .. } => "Name",
            LessError::Plugin { .. } => "Plugin",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LessError::ParseError { message, .. } => message,
            LessError::EvalError(message) => message,
            LessError::Argument { message, .. }
            | LessError::Operation { message, .. }
            | LessError::Syntax { message, .. }
            | LessError::Runtime { message, .. }
            | LessError::Name { message, .. }
            | LessError::Plugin { message, .. } => message,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            LessError::ParseError { .. } | LessError::EvalError(_) => None,
            LessError::Argument { location, .. }
            | LessError::Operation { location, .. }
            | LessError::Syntax { location, .. }
            | LessError::Runtime { location, .. }
            | LessError::Name { location, .. }
            | LessError::Plugin { location, .. } => Some(location),
        }
    }

    fn location_mut(&mut self) -> Option<&mut Location> {
        match self {
            LessError::ParseError { .. } | LessError::EvalError(_) => None,
            LessError::Argument { location, .. }
            | LessError::Operation { location, .. }
            | LessError::Syntax { location, .. }
            | LessError::Runtime { location, .. }
            | LessError::Name { location, .. }
            | LessError::Plugin { location, .. } => Some(location),
        }
    }

    /// 只在尚未记录位置时补上节点的位置。
    pub fn with_location(mut self, index: Option<usize>, file_info: Option<&FileInfo>) -> Self {
        if let LessError::EvalError(message) = self {
            self = LessError::runtime(message);
        }
        if let Some(location) = self.location_mut() {
            if location.index.is_none() {
                location.index = index;
            }
            if location.filename.is_none() {
                location.filename = file_info.map(|info| info.filename.clone());
            }
        }
        self
    }

    /// 同类别替换消息，保留已有位置。
    pub fn map_message<F: FnOnce(&str) -> String>(self, f: F) -> Self {
        match self {
            LessError::ParseError { message, position } => LessError::ParseError {
                message: f(&message),
                position,
            },
            LessError::EvalError(message) => LessError::EvalError(f(&message)),
            LessError::Argument { message, location } => LessError::Argument {
                message: f(&message),
                location,
            },
            LessError::Operation { message, location } => LessError::Operation {
                message: f(&message),
                location,
            },
            LessError::Syntax { message, location } => LessError::Syntax {
                message: f(&message),
                location,
            },
            LessError::Runtime { message, location } => LessError::Runtime {
                message: f(&message),
                location,
            },
            LessError::Name { message, location } => LessError::Name {
                message: f(&message),
                location,
            },
            LessError::Plugin { message, location } => LessError::Plugin {
                message: f(&message),
                location,
            },
        }
    }
}
