use std::cmp::Ordering;

use indexmap::IndexMap;

use super::{Color, Node, NodeInfo, Op, Unit, UnitGroup};
use crate::context::EvalContext;
use crate::error::{LessError, LessResult};
use crate::output::{CssOptions, Output};
use crate::utils::{format_number, fround};

/// 带单位的数值，例如 `10px`、`50%`、`1.5`。
#[derive(Debug, Clone, Default)]
pub struct Dimension {
    pub value: f64,
    pub unit: Unit,
    pub info: NodeInfo,
}

impl Dimension {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self {
            value,
            unit,
            info: NodeInfo::default(),
        }
    }

    /// 由数值与单个单位名构造。
    pub fn with_unit(value: f64, unit: &str) -> Self {
        Self::new(value, Unit::parse(unit))
    }

    pub fn number(value: f64) -> Self {
        Self::new(value, Unit::default())
    }

    pub fn to_color(&self) -> Color {
        Color::new([self.value, self.value, self.value], 1.0)
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) -> LessResult<()> {
        if opts.strict_units && !self.unit.is_singular() {
            return Err(LessError::syntax(format!(
                "数值包含多个单位，请修正单位或使用 unit 函数。错误单位: {}",
                self.unit
            ))
            .with_location(self.info.index, self.info.file_info()));
        }
        let value = fround(self.value, opts.num_precision);
        let mut text = format_number(value);
        if opts.compress {
            if value == 0.0 && self.unit.is_length() {
                output.add(&text, self.info.file_info(), self.info.index);
                return Ok(());
            }
            if value > 0.0 && value < 1.0 {
                text.remove(0);
            }
        }
        output.add(&text, self.info.file_info(), self.info.index);
        self.unit.gen_css(opts, output);
        Ok(())
    }

    /// 二元运算，`+`/`-` 先把右操作数换算为左操作数的单位。
    pub fn operate(&self, ctx: &EvalContext, op: Op, other: &Dimension) -> LessResult<Dimension> {
        let mut value = op.apply(self.value, other.value);
        let mut unit = self.unit.clone();
        match op {
            Op::Add | Op::Sub => {
                if unit.numerator.is_empty() && unit.denominator.is_empty() {
                    unit = other.unit.clone();
                    if self.unit.backup_unit.is_some() {
                        unit.backup_unit = self.unit.backup_unit.clone();
                    }
                } else if other.unit.numerator.is_empty() && unit.denominator.is_empty() {
                    // 右侧无单位时沿用左侧单位
                } else {
                    let converted = other.convert_to(&self.unit.used_units());
                    if ctx.strict_units && converted.unit.to_string() != unit.to_string() {
                        return Err(LessError::operation(format!(
                            "单位不兼容，请修正单位或使用 unit 函数。错误单位: '{}' 与 '{}'",
                            unit, converted.unit
                        )));
                    }
                    value = op.apply(self.value, converted.value);
                }
            }
            Op::Mul => {
                unit.numerator.extend(other.unit.numerator.iter().cloned());
                unit.denominator.extend(other.unit.denominator.iter().cloned());
                unit.numerator.sort();
                unit.denominator.sort();
                unit.cancel();
            }
            Op::Div | Op::DotDiv => {
                unit.numerator.extend(other.unit.denominator.iter().cloned());
                unit.denominator.extend(other.unit.numerator.iter().cloned());
                unit.numerator.sort();
                unit.denominator.sort();
                unit.cancel();
            }
        }
        Ok(Dimension::new(value, unit))
    }

    /// 按单位组换算到目标单位。
    pub fn convert_to(&self, conversions: &IndexMap<UnitGroup, String>) -> Dimension {
        let mut value = self.value;
        let mut unit = self.unit.clone();
        for (group, target) in conversions {
            let table = group.table();
            let Some(target_factor) = table.get(target.as_str()).copied() else {
                continue;
            };
            unit.map(|atom, denominator| match table.get(atom) {
                Some(factor) => {
                    if denominator {
                        value /= factor / target_factor;
                    } else {
                        value *= factor / target_factor;
                    }
                    target.clone()
                }
                None => atom.to_string(),
            });
        }
        unit.cancel();
        Dimension::new(value, unit)
    }

    /// 换算到单个目标单位，未知单位保持原样。
    pub fn convert_to_unit(&self, target: &str) -> Dimension {
        let mut conversions = IndexMap::new();
        if let Some(group) = UnitGroup::of(target) {
            conversions.insert(group, target.to_string());
        }
        self.convert_to(&conversions)
    }

    /// 统一到各组的基准单位（px、s、rad）。
    pub fn unify(&self) -> Dimension {
        let conversions = IndexMap::from([
            (UnitGroup::Length, "px".to_string()),
            (UnitGroup::Duration, "s".to_string()),
            (UnitGroup::Angle, "rad".to_string()),
        ]);
        self.convert_to(&conversions)
    }

    pub fn compare(&self, other: &Node) -> Option<Ordering> {
        let Node::Dimension(other) = other else {
            return None;
        };
        let (a, b) = if self.unit.is_empty() || other.unit.is_empty() {
            (self.value, other.value)
        } else {
            let left = self.unify();
            let right = other.unify();
            if !left.unit.is(&right.unit.to_string()) {
                return None;
            }
            (left.value, right.value)
        };
        a.partial_cmp(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CssOutput;

    fn css(dim: &Dimension, opts: &CssOptions) -> String {
        let mut out = CssOutput::new();
        dim.gen_css(opts, &mut out).unwrap();
        out.into_string()
    }

    #[test]
    fn convert_round_trip_is_idempotent() {
        let original = Dimension::with_unit(2.5, "in");
        for target in ["px", "cm", "mm", "pt", "pc", "m"] {
            let back = original.convert_to_unit(target).convert_to_unit("in");
            assert!((back.value - original.value).abs() < 1e-9, "{target}");
            assert_eq!(back.unit.to_string(), "in");
        }
        let angle = Dimension::with_unit(90.0, "deg");
        let back = angle.convert_to_unit("turn").convert_to_unit("deg");
        assert!((back.value - 90.0).abs() < 1e-9);
    }

    #[test]
    fn addition_converts_right_operand() {
        let ctx = EvalContext::default();
        let sum = Dimension::with_unit(1.0, "cm")
            .operate(&ctx, Op::Add, &Dimension::with_unit(10.0, "mm"))
            .unwrap();
        assert!((sum.value - 2.0).abs() < 1e-9);
        assert_eq!(sum.unit.to_string(), "cm");
    }

    #[test]
    fn unitless_left_operand_adopts_right_unit() {
        let ctx = EvalContext::default();
        let sum = Dimension::number(2.0)
            .operate(&ctx, Op::Add, &Dimension::with_unit(3.0, "px"))
            .unwrap();
        assert_eq!(sum.unit.to_string(), "px");
        assert_eq!(sum.value, 5.0);
    }

    #[test]
    fn strict_units_reject_incompatible_addition() {
        let mut ctx = EvalContext::default();
        ctx.strict_units = true;
        let err = Dimension::with_unit(1.0, "px")
            .operate(&ctx, Op::Add, &Dimension::with_unit(1.0, "s"))
            .unwrap_err();
        assert_eq!(err.error_type(), "Operation");
    }

    #[test]
    fn division_by_zero_is_infinite() {
        let ctx = EvalContext::default();
        let result = Dimension::with_unit(10.0, "px")
            .operate(&ctx, Op::Div, &Dimension::with_unit(0.0, "px"))
            .unwrap();
        assert!(result.value.is_infinite());
        assert!(result.value > 0.0);
        assert_eq!(css(&result, &CssOptions::default()), "Infinitypx");
    }

    #[test]
    fn division_keeps_backup_unit() {
        let ctx = EvalContext::default();
        let result = Dimension::with_unit(10.0, "px")
            .operate(&ctx, Op::Div, &Dimension::with_unit(2.0, "px"))
            .unwrap();
        assert!(result.unit.is_empty());
        assert_eq!(css(&result, &CssOptions::default()), "5px");
    }

    #[test]
    fn multiplication_builds_compound_unit() {
        let ctx = EvalContext::default();
        let result = Dimension::with_unit(2.0, "px")
            .operate(&ctx, Op::Mul, &Dimension::with_unit(3.0, "em"))
            .unwrap();
        assert_eq!(result.unit.to_string(), "em*px");
        let strict = CssOptions {
            strict_units: true,
            ..CssOptions::default()
        };
        let mut out = CssOutput::new();
        assert!(result.gen_css(&strict, &mut out).is_err());
    }

    #[test]
    fn compress_drops_zero_units_and_leading_zero() {
        let opts = CssOptions {
            compress: true,
            ..CssOptions::default()
        };
        assert_eq!(css(&Dimension::with_unit(0.0, "px"), &opts), "0");
        assert_eq!(css(&Dimension::with_unit(0.5, "em"), &opts), ".5em");
        assert_eq!(css(&Dimension::with_unit(0.0, "s"), &opts), "0s");
    }

    #[test]
    fn compare_unifies_units() {
        let a = Dimension::with_unit(1.0, "in");
        let b = Node::Dimension(Dimension::with_unit(96.0, "px"));
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
        let c = Node::Dimension(Dimension::with_unit(1.0, "s"));
        assert_eq!(a.compare(&c), None);
        let d = Node::Dimension(Dimension::number(3.0));
        assert_eq!(a.compare(&d), Some(Ordering::Less));
    }
}
