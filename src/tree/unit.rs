use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::output::{CssOptions, Output};

/// 可互相换算的单位组。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitGroup {
    Length,
    Duration,
    Angle,
}

impl UnitGroup {
    pub const ALL: [UnitGroup; 3] = [UnitGroup::Length, UnitGroup::Duration, UnitGroup::Angle];

    /// 组内各单位相对基准单位的换算系数。
    pub fn table(self) -> &'static IndexMap<&'static str, f64> {
        match self {
            UnitGroup::Length => &LENGTH,
            UnitGroup::Duration => &DURATION,
            UnitGroup::Angle => &ANGLE,
        }
    }

    pub fn of(unit: &str) -> Option<UnitGroup> {
        UnitGroup::ALL
            .into_iter()
            .find(|group| group.table().contains_key(unit))
    }
}

static LENGTH: Lazy<IndexMap<&'static str, f64>> = Lazy::new(|| {
    IndexMap::from([
        ("m", 1.0),
        ("cm", 0.01),
        ("mm", 0.001),
        ("in", 0.0254),
        ("px", 0.0254 / 96.0),
        ("pt", 0.0254 / 72.0),
        ("pc", 0.0254 / 72.0 * 12.0),
    ])
});

static DURATION: Lazy<IndexMap<&'static str, f64>> =
    Lazy::new(|| IndexMap::from([("s", 1.0), ("ms", 0.001)]));

static ANGLE: Lazy<IndexMap<&'static str, f64>> = Lazy::new(|| {
    IndexMap::from([
        ("rad", 1.0 / (2.0 * std::f64::consts::PI)),
        ("deg", 1.0 / 360.0),
        ("grad", 1.0 / 400.0),
        ("turn", 1.0),
    ])
});

static LENGTH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(px|em|ex|ch|rem|in|cm|mm|pc|pt|ex|vw|vh|vmin|vmax)$")
        .expect("长度单位正则编译失败")
});

/// 数值单位：分子与分母两组有序的原子单位。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unit {
    pub numerator: Vec<String>,
    pub denominator: Vec<String>,
    /// 单位被约掉后仍用于输出的备用单位。
    pub backup_unit: Option<String>,
}

impl Unit {
    pub fn new(numerator: Vec<String>, denominator: Vec<String>) -> Self {
        Self::with_backup(numerator, denominator, None)
    }

    pub fn with_backup(
        mut numerator: Vec<String>,
        mut denominator: Vec<String>,
        backup_unit: Option<String>,
    ) -> Self {
        numerator.sort();
        denominator.sort();
        let backup_unit = backup_unit.or_else(|| numerator.first().cloned());
        Self {
            numerator,
            denominator,
            backup_unit,
        }
    }

    /// 由单个单位名构造，空字符串表示无单位。
    pub fn parse(unit: &str) -> Self {
        if unit.is_empty() {
            Self::default()
        } else {
            Self::new(vec![unit.to_string()], Vec::new())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.numerator.is_empty() && self.denominator.is_empty()
    }

    pub fn is_singular(&self) -> bool {
        self.numerator.len() <= 1 && self.denominator.is_empty()
    }

    pub fn is_length(&self) -> bool {
        LENGTH_UNIT.is_match(&self.to_string())
    }

    /// 忽略大小写比较单位文本。
    pub fn is(&self, unit: &str) -> bool {
        self.to_string().eq_ignore_ascii_case(unit)
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) {
        if self.numerator.len() == 1 {
            output.add(&self.numerator[0], None, None);
        } else if !opts.strict_units {
            if let Some(backup) = &self.backup_unit {
                output.add(backup, None, None);
            } else if let Some(first) = self.denominator.first() {
                output.add(first, None, None);
            }
        }
    }

    /// 对每个原子单位做映射，第二个参数表示是否位于分母。
    pub fn map<F: FnMut(&str, bool) -> String>(&mut self, mut f: F) {
        for atom in self.numerator.iter_mut() {
            *atom = f(atom, false);
        }
        for atom in self.denominator.iter_mut() {
            *atom = f(atom, true);
        }
    }

    /// 每个单位组里最先出现的单位。
    pub fn used_units(&self) -> IndexMap<UnitGroup, String> {
        let mut result = IndexMap::new();
        for group in UnitGroup::ALL {
            for atom in self.numerator.iter().chain(self.denominator.iter()) {
                if group.table().contains_key(atom.as_str()) && !result.contains_key(&group) {
                    result.insert(group, atom.clone());
                }
            }
        }
        result
    }

    /// 约掉分子分母中相同的单位。
    pub fn cancel(&mut self) {
        let mut counter: IndexMap<String, i32> = IndexMap::new();
        for atom in &self.numerator {
            *counter.entry(atom.clone()).or_insert(0) += 1;
        }
        for atom in &self.denominator {
            *counter.entry(atom.clone()).or_insert(0) -= 1;
        }
        self.numerator.clear();
        self.denominator.clear();
        for (atom, count) in counter {
            if count > 0 {
                for _ in 0..count {
                    self.numerator.push(atom.clone());
                }
            } else if count < 0 {
                for _ in 0..(-count) {
                    self.denominator.push(atom.clone());
                }
            }
        }
        self.numerator.sort();
        self.denominator.sort();
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.numerator.join("*"))?;
        for atom in &self.denominator {
            write!(f, "/{atom}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn cancel_removes_shared_atoms() {
        let mut unit = Unit::new(units(&["px", "s"]), units(&["px"]));
        unit.cancel();
        assert_eq!(unit.numerator, units(&["s"]));
        assert!(unit.denominator.is_empty());
        assert_eq!(unit.backup_unit.as_deref(), Some("px"));
    }

    #[test]
    fn to_string_joins_parts() {
        let unit = Unit::new(units(&["px", "em"]), units(&["s"]));
        assert_eq!(unit.to_string(), "em*px/s");
    }

    #[test]
    fn used_units_picks_first_per_group() {
        let unit = Unit::new(units(&["cm", "px"]), units(&["ms"]));
        let used = unit.used_units();
        assert_eq!(used.get(&UnitGroup::Length).map(String::as_str), Some("cm"));
        assert_eq!(used.get(&UnitGroup::Duration).map(String::as_str), Some("ms"));
    }

    #[test]
    fn length_detection() {
        assert!(Unit::parse("px").is_length());
        assert!(!Unit::parse("s").is_length());
        assert!(!Unit::default().is_length());
    }
}
