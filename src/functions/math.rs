//! 数值函数：取整、百分比、最值、单位转换。

use super::{arg, dimension_arg, FunctionRegistry, LessFunction};
use crate::error::{LessError, LessResult};
use crate::tree::{Anonymous, Dimension, Keyword, Node, Operation, Unit};

pub(crate) fn register(registry: &FunctionRegistry) {
    let helpers: [(&str, fn(f64) -> f64, Option<&str>); 10] = [
        ("ceil", f64::ceil, None),
        ("floor", f64::floor, None),
        ("sqrt", f64::sqrt, None),
        ("abs", f64::abs, None),
        ("tan", f64::tan, Some("")),
        ("sin", f64::sin, Some("")),
        ("cos", f64::cos, Some("")),
        ("atan", f64::atan, Some("rad")),
        ("asin", f64::asin, Some("rad")),
        ("acos", f64::acos, Some("rad")),
    ];
    for (name, func, unit) in helpers {
        registry.add(
            name,
            LessFunction::new(move |_, args| {
                math_helper(dimension_arg(args, 0, name)?, func, unit).map(Some)
            }),
        );
    }
    registry.add(
        "round",
        LessFunction::new(|_, args| {
            let places = match args.get(1) {
                Some(node) => dimension_arg(std::slice::from_ref(node), 0, "round")?.value,
                None => 0.0,
            };
            let factor = 10f64.powi(places.max(0.0) as i32);
            let n = dimension_arg(args, 0, "round")?;
            math_helper(n, move |v| (v * factor).round() / factor, None).map(Some)
        }),
    );
    registry.add(
        "percentage",
        LessFunction::new(|_, args| {
            math_helper(dimension_arg(args, 0, "percentage")?, |v| v * 100.0, Some("%")).map(Some)
        }),
    );
    registry.add(
        "pi",
        LessFunction::new(|_, _| Ok(Some(Dimension::number(std::f64::consts::PI).into()))),
    );
    registry.add(
        "mod",
        LessFunction::new(|_, args| {
            let a = dimension_arg(args, 0, "mod")?;
            let b = dimension_arg(args, 1, "mod")?;
            Ok(Some(Dimension::new(a.value % b.value, a.unit.clone()).into()))
        }),
    );
    registry.add(
        "pow",
        LessFunction::new(|_, args| {
            let (Some(Node::Dimension(x)), Some(Node::Dimension(y))) = (args.first(), args.get(1))
            else {
                return Err(LessError::argument("pow 的参数必须是数值"));
            };
            Ok(Some(Dimension::new(x.value.powf(y.value), x.unit.clone()).into()))
        }),
    );
    registry.add("min", LessFunction::new(|_, args| Ok(min_max(true, args))));
    registry.add("max", LessFunction::new(|_, args| Ok(min_max(false, args))));
    registry.add(
        "unit",
        LessFunction::new(|_, args| {
            let value = match arg(args, 0, "unit")? {
                Node::Dimension(dim) => dim,
                Node::Operation(Operation { .. }) => {
                    return Err(LessError::argument(
                        "unit 的第一个参数必须是数值，是否漏写了括号？",
                    ))
                }
                _ => return Err(LessError::argument("unit 的第一个参数必须是数值")),
            };
            let unit = match args.get(1) {
                Some(Node::Keyword(Keyword { value, .. })) => value.clone(),
                Some(other) => other.to_plain_css(),
                None => String::new(),
            };
            Ok(Some(Dimension::new(value.value, Unit::parse(&unit)).into()))
        }),
    );
    registry.add(
        "get-unit",
        LessFunction::new(|_, args| {
            let dim = dimension_arg(args, 0, "get-unit")?;
            Ok(Some(Anonymous::new(dim.unit.to_string()).into()))
        }),
    );
    registry.add(
        "convert",
        LessFunction::new(|_, args| {
            let dim = dimension_arg(args, 0, "convert")?;
            let target = arg(args, 1, "convert")?.text_value()?;
            Ok(Some(dim.convert_to_unit(&target).into()))
        }),
    );
}

/// 对数值执行函数；指定单位时先统一单位。
fn math_helper<F>(n: &Dimension, func: F, unit: Option<&str>) -> LessResult<Node>
where
    F: Fn(f64) -> f64,
{
    match unit {
        None => Ok(Dimension::new(func(n.value), n.unit.clone()).into()),
        Some(unit) => {
            let unified = n.unify();
            Ok(Dimension::new(func(unified.value), Unit::parse(unit)).into())
        }
    }
}

/// `min`/`max`：不兼容的单位或没有数值参数时返回 `None`，调用保持原样。
fn min_max(is_min: bool, args: &[Node]) -> Option<Node> {
    let mut dimensions = Vec::new();
    for item in args {
        match item {
            Node::Dimension(dim) => dimensions.push(dim.clone()),
            Node::Value(_) | Node::Expression(_) => {
                dimensions.extend(item.list_items().iter().filter_map(|n| n.as_dimension().cloned()));
            }
            _ => {}
        }
    }
    let first_unit = dimensions
        .iter()
        .map(|dim| dim.unit.to_string())
        .find(|unit| !unit.is_empty());
    let unify = |dim: &Dimension| -> Dimension {
        match &first_unit {
            Some(unit) if dim.unit.is_empty() => Dimension::with_unit(dim.value, unit).unify(),
            _ => dim.unify(),
        }
    };
    let mut winner: Option<(Dimension, Dimension)> = None;
    for dim in dimensions {
        let unified = unify(&dim);
        match &winner {
            None => winner = Some((dim, unified)),
            Some((_, best)) => {
                if best.unit.to_string() != unified.unit.to_string() {
                    return None;
                }
                let better = if is_min {
                    unified.value < best.value
                } else {
                    unified.value > best.value
                };
                if better {
                    winner = Some((dim, unified));
                }
            }
        }
    }
    let (mut result, _) = winner?;
    if result.unit.is_empty() {
        if let Some(unit) = first_unit {
            result.unit = Unit::parse(&unit);
        }
    }
    Some(result.into())
}
