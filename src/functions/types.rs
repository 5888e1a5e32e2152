//! 类型判断与逻辑函数。

use super::{arg, FunctionRegistry, LessFunction};
use crate::error::LessError;
use crate::tree::{Anonymous, Keyword, Node};

fn predicate<F>(test: F) -> LessFunction
where
    F: Fn(&Node) -> bool + 'static,
{
    LessFunction::new(move |_, args| {
        let result = args.first().is_some_and(|node| test(node));
        Ok(Some(Keyword::boolean(result).into()))
    })
}

fn unit_predicate(unit: &'static str) -> LessFunction {
    predicate(move |n| matches!(n, Node::Dimension(d) if d.unit.is(unit)))
}

pub(crate) fn register(registry: &FunctionRegistry) {
    registry.add("isnumber", predicate(|n| matches!(n, Node::Dimension(_))));
    registry.add("iscolor", predicate(|n| matches!(n, Node::Color(_))));
    registry.add("isstring", predicate(|n| matches!(n, Node::Quoted(_))));
    registry.add("iskeyword", predicate(|n| matches!(n, Node::Keyword(_))));
    registry.add("isurl", predicate(|n| matches!(n, Node::Url(_))));
    registry.add("isruleset", predicate(|n| matches!(n, Node::DetachedRuleset(_))));
    registry.add("ispixel", unit_predicate("px"));
    registry.add("isem", unit_predicate("em"));
    registry.add("ispercentage", unit_predicate("%"));
    registry.add(
        "isunit",
        LessFunction::new(|_, args| {
            let unit = args
                .get(1)
                .ok_or_else(|| LessError::argument("isunit 缺少第二个参数"))?
                .text_value()?;
            let result = matches!(args.first(), Some(Node::Dimension(d)) if d.unit.is(&unit));
            Ok(Some(Keyword::boolean(result).into()))
        }),
    );
    registry.add(
        "isdefined",
        LessFunction::raw(|ctx, args| {
            let defined = arg(args, 0, "isdefined")?.eval(ctx).is_ok();
            Ok(Some(Keyword::boolean(defined).into()))
        }),
    );
    registry.add(
        "boolean",
        LessFunction::new(|_, args| {
            let truthy = arg(args, 0, "boolean")?.is_truthy();
            Ok(Some(Keyword::boolean(truthy).into()))
        }),
    );
    registry.add(
        "if",
        LessFunction::raw(|ctx, args| {
            let condition = arg(args, 0, "if")?.eval(ctx)?;
            let branch = if condition.is_truthy() {
                args.get(1)
            } else {
                args.get(2)
            };
            match branch {
                Some(node) => node.eval(ctx).map(Some),
                None => Ok(Some(Anonymous::new("").into())),
            }
        }),
    );
    registry.add(
        "default",
        LessFunction::new(|ctx, _| match &ctx.default_func {
            Some(state) => state.eval(),
            None => Err(LessError::syntax("default() 只能在 mixin 守卫中使用")),
        }),
    );
}
