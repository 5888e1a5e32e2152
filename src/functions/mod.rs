//! 函数注册表与调用约定。
//!
//! 注册表按作用域继承：子表可以覆盖父表的同名函数，但不会修改父表。

mod color;
mod math;
mod misc;
mod types;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::EvalContext;
use crate::error::{LessError, LessResult};
use crate::tree::{Color, Dimension, Expression, FileInfo, Node, Op};

type FunctionImpl = dyn Fn(&mut EvalContext, &[Node]) -> LessResult<Option<Node>>;

/// 可注册的函数实现。`eval_args` 为假时收到未求值的参数。
#[derive(Clone)]
pub struct LessFunction {
    pub eval_args: bool,
    func: Rc<FunctionImpl>,
}

impl LessFunction {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&mut EvalContext, &[Node]) -> LessResult<Option<Node>> + 'static,
    {
        Self {
            eval_args: true,
            func: Rc::new(func),
        }
    }

    /// 接收原始参数的函数，例如 `if`、`isdefined`。
    pub fn raw<F>(func: F) -> Self
    where
        F: Fn(&mut EvalContext, &[Node]) -> LessResult<Option<Node>> + 'static,
    {
        Self {
            eval_args: false,
            func: Rc::new(func),
        }
    }

    pub fn invoke(&self, ctx: &mut EvalContext, args: &[Node]) -> LessResult<Option<Node>> {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for LessFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LessFunction")
            .field("eval_args", &self.eval_args)
            .finish_non_exhaustive()
    }
}

struct RegistryScope {
    parent: Option<FunctionRegistry>,
    functions: RefCell<IndexMap<String, LessFunction>>,
}

/// 按作用域链查找的函数表，克隆只复制句柄。
#[derive(Clone)]
pub struct FunctionRegistry {
    scope: Rc<RegistryScope>,
}

thread_local! {
    static GLOBAL_REGISTRY: FunctionRegistry = {
        let registry = FunctionRegistry::empty();
        math::register(&registry);
        color::register(&registry);
        types::register(&registry);
        misc::register(&registry);
        registry
    };
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            scope: Rc::new(RegistryScope {
                parent: None,
                functions: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// 内置函数所在的全局表。
    pub fn global() -> Self {
        GLOBAL_REGISTRY.with(|registry| registry.clone())
    }

    pub fn add(&self, name: &str, func: LessFunction) {
        self.scope
            .functions
            .borrow_mut()
            .insert(name.to_ascii_lowercase(), func);
    }

    pub fn add_multiple<I>(&self, functions: I)
    where
        I: IntoIterator<Item = (String, LessFunction)>,
    {
        for (name, func) in functions {
            self.add(&name, func);
        }
    }

    pub fn get(&self, name: &str) -> Option<LessFunction> {
        let key = name.to_ascii_lowercase();
        if let Some(found) = self.scope.functions.borrow().get(&key) {
            return Some(found.clone());
        }
        self.scope.parent.as_ref().and_then(|parent| parent.get(&key))
    }

    pub fn local_names(&self) -> Vec<String> {
        self.scope.functions.borrow().keys().cloned().collect()
    }

    pub fn inherit(&self) -> FunctionRegistry {
        FunctionRegistry {
            scope: Rc::new(RegistryScope {
                parent: Some(self.clone()),
                functions: RefCell::new(IndexMap::new()),
            }),
        }
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("local", &self.local_names())
            .field("has_parent", &self.scope.parent.is_some())
            .finish()
    }
}

/// 宿主注册的插件，通过 `@plugin "name";` 引入。
pub trait Plugin: fmt::Debug {
    fn name(&self) -> &str;

    fn functions(&self) -> Vec<(String, LessFunction)>;

    /// 插件被导入时调用一次。
    fn eval(&self, _ctx: &mut EvalContext) -> LessResult<()> {
        Ok(())
    }
}

/// 单个调用点上的函数调用者。
pub struct FunctionCaller<'a> {
    name: String,
    ctx: &'a mut EvalContext,
    func: Option<LessFunction>,
    pub index: Option<usize>,
    pub file_info: Option<Rc<FileInfo>>,
}

impl<'a> FunctionCaller<'a> {
    pub fn new(
        name: &str,
        ctx: &'a mut EvalContext,
        index: Option<usize>,
        file_info: Option<Rc<FileInfo>>,
    ) -> Self {
        let name = name.to_ascii_lowercase();
        let func = ctx.function_registry().get(&name);
        Self {
            name,
            ctx,
            func,
            index,
            file_info,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self) -> bool {
        self.func.is_some()
    }

    /// 按调用约定求值并规整参数，再调用函数。
    pub fn call(self, args: &[Node]) -> LessResult<Option<Node>> {
        let Some(func) = self.func else {
            return Ok(None);
        };
        let args = if func.eval_args {
            args.iter()
                .map(|arg| arg.eval(self.ctx))
                .collect::<LessResult<Vec<_>>>()?
        } else {
            args.to_vec()
        };
        let args: Vec<Node> = args
            .into_iter()
            .filter(|arg| !matches!(arg, Node::Comment(_)))
            .map(normalize_argument)
            .collect();
        func.invoke(self.ctx, &args)
    }
}

/// 去掉注释并展开只含一个子节点的表达式，括号内的除法保持原样。
fn normalize_argument(arg: Node) -> Node {
    let Node::Expression(expr) = arg else {
        return arg;
    };
    let parens = expr.parens;
    let mut children: Vec<Node> = expr
        .value
        .into_iter()
        .filter(|child| !matches!(child, Node::Comment(_)))
        .collect();
    if children.len() == 1 {
        let division = matches!(&children[0], Node::Operation(op) if op.op == Op::Div);
        if parens && division {
            let mut kept = Expression::new(children);
            kept.parens = true;
            kept.info = expr.info;
            return Node::Expression(kept);
        }
        return children.remove(0);
    }
    let mut rebuilt = Expression::new(children);
    rebuilt.info = expr.info;
    Node::Expression(rebuilt)
}

pub(crate) fn arg<'n>(args: &'n [Node], index: usize, func: &str) -> LessResult<&'n Node> {
    args.get(index)
        .ok_or_else(|| LessError::argument(format!("{func} 缺少第 {} 个参数", index + 1)))
}

pub(crate) fn dimension_arg<'n>(args: &'n [Node], index: usize, func: &str) -> LessResult<&'n Dimension> {
    arg(args, index, func)?
        .as_dimension()
        .ok_or_else(|| LessError::argument(format!("{func} 的参数必须是数值")))
}

pub(crate) fn color_arg<'n>(args: &'n [Node], index: usize, func: &str) -> LessResult<&'n Color> {
    arg(args, index, func)?
        .as_color()
        .ok_or_else(|| LessError::argument(format!("{func} 的参数必须是颜色")))
}
