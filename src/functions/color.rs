//! 颜色构造、通道读取、调整与混合函数。

use super::{arg, color_arg, dimension_arg, FunctionRegistry, LessFunction};
use crate::error::{LessError, LessResult};
use crate::tree::{Color, Dimension, Expression, Hsl, Node, Op, Operation};

pub(crate) fn register(registry: &FunctionRegistry) {
    registry.add("rgb", LessFunction::new(|_, args| rgb(args)));
    registry.add(
        "rgba",
        LessFunction::new(|_, args| Ok(rgba(args).ok().map(|c| c.with_value("rgba").into()))),
    );
    registry.add("hsl", LessFunction::new(|_, args| hsl(args)));
    registry.add(
        "hsla",
        LessFunction::new(|_, args| Ok(hsla(args).ok().map(|c| c.with_value("hsla").into()))),
    );

    registry.add("red", channel_getter("red", |c| Dimension::number(c.rgb[0])));
    registry.add("green", channel_getter("green", |c| Dimension::number(c.rgb[1])));
    registry.add("blue", channel_getter("blue", |c| Dimension::number(c.rgb[2])));
    registry.add("alpha", channel_getter("alpha", |c| Dimension::number(c.to_hsl().a)));
    registry.add("hue", channel_getter("hue", |c| Dimension::number(c.to_hsl().h)));
    registry.add(
        "saturation",
        channel_getter("saturation", |c| Dimension::with_unit(c.to_hsl().s * 100.0, "%")),
    );
    registry.add(
        "lightness",
        channel_getter("lightness", |c| Dimension::with_unit(c.to_hsl().l * 100.0, "%")),
    );
    registry.add("luma", channel_getter("luma", |c| {
        Dimension::with_unit(c.luma() * c.alpha * 100.0, "%")
    }));

    registry.add("lighten", adjuster("lighten", HslField::Lightness, 1.0));
    registry.add("darken", adjuster("darken", HslField::Lightness, -1.0));
    registry.add("saturate", adjuster("saturate", HslField::Saturation, 1.0));
    registry.add("desaturate", adjuster("desaturate", HslField::Saturation, -1.0));
    registry.add("fadein", adjuster("fadein", HslField::Alpha, 1.0));
    registry.add("fadeout", adjuster("fadeout", HslField::Alpha, -1.0));
    registry.add(
        "fade",
        LessFunction::new(|_, args| {
            let color = color_arg(args, 0, "fade")?;
            let amount = dimension_arg(args, 1, "fade")?;
            let mut hsl = color.to_hsl();
            hsl.a = clamp(amount.value / 100.0);
            Ok(Some(keep_notation(color, hsl).into()))
        }),
    );
    registry.add(
        "spin",
        LessFunction::new(|_, args| {
            let color = color_arg(args, 0, "spin")?;
            let amount = dimension_arg(args, 1, "spin")?;
            let mut hsl = color.to_hsl();
            let hue = (hsl.h + amount.value) % 360.0;
            hsl.h = if hue < 0.0 { 360.0 + hue } else { hue };
            Ok(Some(keep_notation(color, hsl).into()))
        }),
    );
    registry.add(
        "greyscale",
        LessFunction::new(|_, args| {
            let color = color_arg(args, 0, "greyscale")?;
            let mut hsl = color.to_hsl();
            hsl.s = 0.0;
            Ok(Some(keep_notation(color, hsl).into()))
        }),
    );
    registry.add(
        "mix",
        LessFunction::new(|_, args| {
            let first = color_arg(args, 0, "mix")?;
            let second = color_arg(args, 1, "mix")?;
            let weight = match args.get(2) {
                Some(_) => dimension_arg(args, 2, "mix")?.value,
                None => 50.0,
            };
            Ok(Some(mix(first, second, weight).into()))
        }),
    );
    registry.add(
        "tint",
        LessFunction::new(|_, args| {
            let color = color_arg(args, 0, "tint")?;
            let weight = dimension_arg(args, 1, "tint")?.value;
            let white = Color::new([255.0; 3], 1.0);
            Ok(Some(mix(&white, color, weight).into()))
        }),
    );
    registry.add(
        "shade",
        LessFunction::new(|_, args| {
            let color = color_arg(args, 0, "shade")?;
            let weight = dimension_arg(args, 1, "shade")?.value;
            let black = Color::new([0.0; 3], 1.0);
            Ok(Some(mix(&black, color, weight).into()))
        }),
    );
    registry.add(
        "contrast",
        LessFunction::new(|_, args| {
            let Some(color) = arg(args, 0, "contrast")?.as_color() else {
                return Ok(None);
            };
            let mut dark = match args.get(1) {
                Some(node) => color_from(node, "contrast")?.clone(),
                None => Color::new([0.0; 3], 1.0),
            };
            let mut light = match args.get(2) {
                Some(node) => color_from(node, "contrast")?.clone(),
                None => Color::new([255.0; 3], 1.0),
            };
            if dark.luma() > light.luma() {
                std::mem::swap(&mut dark, &mut light);
            }
            let threshold = match args.get(3) {
                Some(node) => number(node)?,
                None => 0.43,
            };
            let chosen = if color.luma() < threshold { light } else { dark };
            Ok(Some(chosen.into()))
        }),
    );

    for (name, mode) in BLEND_MODES {
        registry.add(
            name,
            LessFunction::new(move |_, args| {
                let bottom = color_arg(args, 0, name)?;
                let top = color_arg(args, 1, name)?;
                Ok(Some(color_blend(mode, bottom, top).into()))
            }),
        );
    }
}

const BLEND_MODES: [(&str, fn(f64, f64) -> f64); 8] = [
    ("multiply", blend_multiply),
    ("screen", blend_screen),
    ("overlay", blend_overlay),
    ("softlight", blend_softlight),
    ("hardlight", blend_hardlight),
    ("difference", blend_difference),
    ("exclusion", blend_exclusion),
    ("negation", blend_negation),
];

#[derive(Clone, Copy)]
enum HslField {
    Lightness,
    Saturation,
    Alpha,
}

impl HslField {
    fn slot(self, hsl: &mut Hsl) -> &mut f64 {
        match self {
            HslField::Lightness => &mut hsl.l,
            HslField::Saturation => &mut hsl.s,
            HslField::Alpha => &mut hsl.a,
        }
    }
}

fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// 颜色函数的数值参数，百分比按 0..1 计。
fn number(node: &Node) -> LessResult<f64> {
    match node {
        Node::Dimension(dim) if dim.unit.is("%") => Ok(dim.value / 100.0),
        Node::Dimension(dim) => Ok(dim.value),
        _ => Err(LessError::argument("颜色函数的参数必须是数值")),
    }
}

/// 百分比按 `size` 缩放，其余同 [`number`]。
fn scaled(node: &Node, size: f64) -> LessResult<f64> {
    match node {
        Node::Dimension(dim) if dim.unit.is("%") => Ok(dim.value * size / 100.0),
        other => number(other),
    }
}

fn color_from<'n>(node: &'n Node, func: &str) -> LessResult<&'n Color> {
    node.as_color()
        .ok_or_else(|| LessError::argument(format!("{func} 的参数必须是颜色")))
}

/// `rgb(r g b / a)` 这类空格分隔写法会以单个表达式传入。
fn split_space_separated(args: &[Node]) -> Vec<Node> {
    let [Node::Expression(Expression { value, .. })] = args else {
        return args.to_vec();
    };
    let mut parts: Vec<Node> = value.iter().take(3).cloned().collect();
    if let Some(Node::Operation(Operation { op: Op::Div, left, right, .. })) = parts.get(2).cloned() {
        parts[2] = *left;
        parts.push(*right);
    }
    parts
}

fn rgb(args: &[Node]) -> LessResult<Option<Node>> {
    let mut parts = split_space_separated(args);
    if parts.len() == 3 {
        parts.push(Dimension::number(1.0).into());
    }
    Ok(rgba(&parts).ok().map(|c| c.with_value("rgb").into()))
}

fn rgba(args: &[Node]) -> LessResult<Color> {
    if let Some(Node::Color(color)) = args.first() {
        let alpha = match args.get(1) {
            Some(node) => number(node)?,
            None => color.alpha,
        };
        return Ok(Color::new(color.rgb, alpha));
    }
    let r = scaled(arg(args, 0, "rgba")?, 255.0)?;
    let g = scaled(arg(args, 1, "rgba")?, 255.0)?;
    let b = scaled(arg(args, 2, "rgba")?, 255.0)?;
    let alpha = number(arg(args, 3, "rgba")?)?;
    Ok(Color::new([r, g, b], alpha))
}

fn hsl(args: &[Node]) -> LessResult<Option<Node>> {
    let mut parts = split_space_separated(args);
    if parts.len() == 3 {
        parts.push(Dimension::number(1.0).into());
    }
    Ok(hsla(&parts).ok().map(|c| c.with_value("hsl").into()))
}

fn hsla(args: &[Node]) -> LessResult<Color> {
    if let Some(Node::Color(color)) = args.first() {
        let alpha = match args.get(1) {
            Some(node) => number(node)?,
            None => color.alpha,
        };
        return Ok(Color::new(color.rgb, alpha));
    }
    let h = number(arg(args, 0, "hsla")?)?;
    let s = clamp(number(arg(args, 1, "hsla")?)?);
    let l = clamp(number(arg(args, 2, "hsla")?)?);
    let a = clamp(number(arg(args, 3, "hsla")?)?);
    Ok(Color::from_hsl(Hsl { h, s, l, a }))
}

/// 调整后的颜色沿用原颜色的 rgb/hsl 写法，十六进制与关键字改为 rgb。
fn keep_notation(original: &Color, hsl: Hsl) -> Color {
    let notation = match original.value.as_deref() {
        Some(value) if value.starts_with("rgb") || value.starts_with("hsl") => value.to_string(),
        _ => "rgb".to_string(),
    };
    Color::from_hsl(hsl).with_value(notation)
}

fn channel_getter(name: &'static str, read: fn(&Color) -> Dimension) -> LessFunction {
    LessFunction::new(move |_, args| Ok(Some(read(color_arg(args, 0, name)?).into())))
}

/// `lighten` 一类函数：按百分比调整某个 HSL 分量，第三个参数为 `relative` 时按比例调整。
fn adjuster(name: &'static str, field: HslField, sign: f64) -> LessFunction {
    LessFunction::new(move |_, args| {
        let color = color_arg(args, 0, name)?;
        let amount = dimension_arg(args, 1, name)?.value / 100.0;
        let relative = args
            .get(2)
            .is_some_and(|method| method.text_value().is_ok_and(|text| text == "relative"));
        let mut hsl = color.to_hsl();
        let slot = field.slot(&mut hsl);
        let delta = if relative { *slot * amount } else { amount };
        *slot = clamp(*slot + sign * delta);
        Ok(Some(keep_notation(color, hsl).into()))
    })
}

/// 按权重混合两种颜色，权重以百分比表示第一种颜色所占比例。
fn mix(first: &Color, second: &Color, weight: f64) -> Color {
    let p = weight / 100.0;
    let w = p * 2.0 - 1.0;
    let a = first.to_hsl().a - second.to_hsl().a;
    let w1 = (if w * a == -1.0 { w } else { (w + a) / (1.0 + w * a) } + 1.0) / 2.0;
    let w2 = 1.0 - w1;
    let mut rgb = [0.0; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        *channel = first.rgb[i] * w1 + second.rgb[i] * w2;
    }
    let alpha = first.alpha * p + second.alpha * (1.0 - p);
    Color::new(rgb, alpha)
}

fn color_blend(mode: fn(f64, f64) -> f64, bottom: &Color, top: &Color) -> Color {
    let ab = bottom.alpha;
    let at = top.alpha;
    let ar = at + ab * (1.0 - at);
    let mut result = [0.0; 3];
    for (i, channel) in result.iter_mut().enumerate() {
        let cb = bottom.rgb[i] / 255.0;
        let cs = top.rgb[i] / 255.0;
        let mut cr = mode(cb, cs);
        if ar > 0.0 {
            cr = (at * cs + ab * (cb - at * (cb + cs - cr))) / ar;
        }
        *channel = cr * 255.0;
    }
    Color::new(result, ar)
}

fn blend_multiply(cb: f64, cs: f64) -> f64 {
    cb * cs
}

fn blend_screen(cb: f64, cs: f64) -> f64 {
    cb + cs - cb * cs
}

fn blend_overlay(cb: f64, cs: f64) -> f64 {
    let cb = cb * 2.0;
    if cb <= 1.0 {
        blend_multiply(cb, cs)
    } else {
        blend_screen(cb - 1.0, cs)
    }
}

fn blend_softlight(cb: f64, cs: f64) -> f64 {
    let mut d = 1.0;
    let mut e = cb;
    if cs > 0.5 {
        e = 1.0;
        d = if cb > 0.25 {
            cb.sqrt()
        } else {
            ((16.0 * cb - 12.0) * cb + 4.0) * cb
        };
    }
    cb - (1.0 - 2.0 * cs) * e * (d - cb)
}

fn blend_hardlight(cb: f64, cs: f64) -> f64 {
    blend_overlay(cs, cb)
}

fn blend_difference(cb: f64, cs: f64) -> f64 {
    (cb - cs).abs()
}

fn blend_exclusion(cb: f64, cs: f64) -> f64 {
    cb + cs - 2.0 * cb * cs
}

fn blend_negation(cb: f64, cs: f64) -> f64 {
    1.0 - (cb + cs - 1.0).abs()
}
