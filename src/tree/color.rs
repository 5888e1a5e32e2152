use std::cmp::Ordering;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use super::{Node, NodeInfo, Op};
use crate::output::{CssOptions, Output};
use crate::utils::{format_number, fround};

/// 色相、饱和度、亮度表示，`h` 取 0..360，其余取 0..1。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
    pub a: f64,
}

/// 色相、饱和度、明度表示。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
    pub a: f64,
}

/// RGB 颜色，通道取值 0..255，`value` 保存源码中的原始写法。
#[derive(Debug, Clone)]
pub struct Color {
    pub rgb: [f64; 3],
    pub alpha: f64,
    pub value: Option<String>,
    pub info: NodeInfo,
}

impl Color {
    pub fn new(rgb: [f64; 3], alpha: f64) -> Self {
        Self {
            rgb,
            alpha,
            value: None,
            info: NodeInfo::default(),
        }
    }

    pub fn with_value<S: Into<String>>(mut self, value: S) -> Self {
        self.value = Some(value.into());
        self
    }

    /// 解析 `#rgb`、`#rgba`、`#rrggbb`、`#rrggbbaa`，保留原始文本。
    pub fn from_hex(text: &str) -> Option<Color> {
        let hex = text.strip_prefix('#').unwrap_or(text);
        if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        let digits: Vec<f64> = match hex.len() {
            3 | 4 => hex
                .chars()
                .map(|ch| ch.to_digit(16).map(|d| (d * 17) as f64))
                .collect::<Option<Vec<_>>>()?,
            6 | 8 => (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok().map(f64::from))
                .collect::<Option<Vec<_>>>()?,
            _ => return None,
        };
        let alpha = digits.get(3).map(|a| a / 255.0).unwrap_or(1.0);
        Some(Color::new([digits[0], digits[1], digits[2]], alpha).with_value(format!("#{hex}")))
    }

    /// 按 CSS 颜色关键字构造，`transparent` 为全透明黑色。
    pub fn from_keyword(keyword: &str) -> Option<Color> {
        let lowered = keyword.to_ascii_lowercase();
        if lowered == "transparent" {
            return Some(Color::new([0.0, 0.0, 0.0], 0.0).with_value(keyword));
        }
        let packed = *KEYWORDS.get(lowered.as_str())?;
        let rgb = [
            ((packed >> 16) & 0xff) as f64,
            ((packed >> 8) & 0xff) as f64,
            (packed & 0xff) as f64,
        ];
        Some(Color::new(rgb, 1.0).with_value(keyword))
    }

    /// 由 HSL 构造，`h` 以度为单位。
    pub fn from_hsl(hsl: Hsl) -> Color {
        let h = (hsl.h % 360.0 + 360.0) % 360.0 / 360.0;
        let s = hsl.s.clamp(0.0, 1.0);
        let l = hsl.l.clamp(0.0, 1.0);
        if s <= 0.0 {
            return Color::new([l * 255.0; 3], hsl.a.clamp(0.0, 1.0));
        }
        let q = if l <= 0.5 { l * (s + 1.0) } else { l + s - l * s };
        let p = l * 2.0 - q;
        let rgb = [
            hue_to_rgb(p, q, h + 1.0 / 3.0) * 255.0,
            hue_to_rgb(p, q, h) * 255.0,
            hue_to_rgb(p, q, h - 1.0 / 3.0) * 255.0,
        ];
        Color::new(rgb, hsl.a.clamp(0.0, 1.0))
    }

    /// 相对亮度（WCAG 定义）。
    pub fn luma(&self) -> f64 {
        let channel = |c: f64| {
            let c = c / 255.0;
            if c <= 0.03928 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        };
        0.2126 * channel(self.rgb[0]) + 0.7152 * channel(self.rgb[1]) + 0.0722 * channel(self.rgb[2])
    }

    pub fn to_hsl(&self) -> Hsl {
        let r = self.rgb[0] / 255.0;
        let g = self.rgb[1] / 255.0;
        let b = self.rgb[2] / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        let d = max - min;
        if d == 0.0 {
            return Hsl {
                h: 0.0,
                s: 0.0,
                l,
                a: self.alpha,
            };
        }
        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };
        let h = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        Hsl {
            h: h * 60.0,
            s,
            l,
            a: self.alpha,
        }
    }

    pub fn to_hsv(&self) -> Hsv {
        let r = self.rgb[0] / 255.0;
        let g = self.rgb[1] / 255.0;
        let b = self.rgb[2] / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let d = max - min;
        let s = if max == 0.0 { 0.0 } else { d / max };
        let h = if d == 0.0 {
            0.0
        } else if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        Hsv {
            h: h * 60.0,
            s,
            v: max,
            a: self.alpha,
        }
    }

    /// `#rrggbb` 形式。
    pub fn to_hex(&self) -> String {
        let mut hex = String::from("#");
        for channel in self.rgb {
            hex.push_str(&format!("{:02x}", clamp_channel(channel)));
        }
        hex
    }

    pub fn to_css(&self, opts: &CssOptions) -> String {
        let alpha = fround(self.alpha, opts.num_precision);
        let function = match self.value.as_deref() {
            Some(value) if value.starts_with("rgb") => (alpha < 1.0).then_some("rgba"),
            Some(value) if value.starts_with("hsl") => {
                Some(if alpha < 1.0 { "hsla" } else { "hsl" })
            }
            Some(value) => return value.to_string(),
            None => (alpha < 1.0).then_some("rgba"),
        };
        let separator = if opts.compress { "," } else { ", " };
        let alpha_text = format_number(alpha.clamp(0.0, 1.0));
        match function {
            Some("rgba") => {
                let mut args: Vec<String> = self
                    .rgb
                    .iter()
                    .map(|c| clamp_channel(*c).to_string())
                    .collect();
                args.push(alpha_text);
                format!("rgba({})", args.join(separator))
            }
            Some(name) => {
                let hsl = self.to_hsl();
                let mut args = vec![
                    format_number(fround(hsl.h, opts.num_precision)),
                    format!("{}%", format_number(fround(hsl.s * 100.0, opts.num_precision))),
                    format!("{}%", format_number(fround(hsl.l * 100.0, opts.num_precision))),
                ];
                if name == "hsla" {
                    args.push(alpha_text);
                }
                format!("{name}({})", args.join(separator))
            }
            None => {
                let hex = self.to_hex();
                if opts.compress {
                    let bytes = hex.as_bytes();
                    if bytes[1] == bytes[2] && bytes[3] == bytes[4] && bytes[5] == bytes[6] {
                        return format!(
                            "#{}{}{}",
                            bytes[1] as char, bytes[3] as char, bytes[5] as char
                        );
                    }
                }
                hex
            }
        }
    }

    pub fn gen_css(&self, opts: &CssOptions, output: &mut dyn Output) {
        output.add(&self.to_css(opts), self.info.file_info(), self.info.index);
    }

    /// 逐通道运算，透明度按 `a1 * (1 - a2) + a2` 合成。
    pub fn operate(&self, op: Op, other: &Color) -> Color {
        let alpha = self.alpha * (1.0 - other.alpha) + other.alpha;
        let mut rgb = [0.0; 3];
        for (i, channel) in rgb.iter_mut().enumerate() {
            *channel = op.apply(self.rgb[i], other.rgb[i]);
        }
        Color::new(rgb, alpha)
    }

    pub fn compare(&self, other: &Node) -> Option<Ordering> {
        match other {
            Node::Color(other) if other.rgb == self.rgb && other.alpha == self.alpha => {
                Some(Ordering::Equal)
            }
            _ => None,
        }
    }
}

fn clamp_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    match t {
        _ if t * 6.0 < 1.0 => p + (q - p) * t * 6.0,
        _ if t * 2.0 < 1.0 => q,
        _ if t * 3.0 < 2.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}

static KEYWORDS: Lazy<IndexMap<&'static str, u32>> = Lazy::new(|| {
    IndexMap::from([
        ("aliceblue", 0xf0f8ff),
        ("antiquewhite", 0xfaebd7),
        ("aqua", 0x00ffff),
        ("aquamarine", 0x7fffd4),
        ("azure", 0xf0ffff),
        ("beige", 0xf5f5dc),
        ("bisque", 0xffe4c4),
        ("black", 0x000000),
        ("blanchedalmond", 0xffebcd),
        ("blue", 0x0000ff),
        ("blueviolet", 0x8a2be2),
        ("brown", 0xa52a2a),
        ("burlywood", 0xdeb887),
        ("cadetblue", 0x5f9ea0),
        ("chartreuse", 0x7fff00),
        ("chocolate", 0xd2691e),
        ("coral", 0xff7f50),
        ("cornflowerblue", 0x6495ed),
        ("cornsilk", 0xfff8dc),
        ("crimson", 0xdc143c),
        ("cyan", 0x00ffff),
        ("darkblue", 0x00008b),
        ("darkcyan", 0x008b8b),
        ("darkgoldenrod", 0xb8860b),
        ("darkgray", 0xa9a9a9),
        ("darkgrey", 0xa9a9a9),
        ("darkgreen", 0x006400),
        ("darkkhaki", 0xbdb76b),
        ("darkmagenta", 0x8b008b),
        ("darkolivegreen", 0x556b2f),
        ("darkorange", 0xff8c00),
        ("darkorchid", 0x9932cc),
        ("darkred", 0x8b0000),
        ("darksalmon", 0xe9967a),
        ("darkseagreen", 0x8fbc8f),
        ("darkslateblue", 0x483d8b),
        ("darkslategray", 0x2f4f4f),
        ("darkslategrey", 0x2f4f4f),
        ("darkturquoise", 0x00ced1),
        ("darkviolet", 0x9400d3),
        ("deeppink", 0xff1493),
        ("deepskyblue", 0x00bfff),
        ("dimgray", 0x696969),
        ("dimgrey", 0x696969),
        ("dodgerblue", 0x1e90ff),
        ("firebrick", 0xb22222),
        ("floralwhite", 0xfffaf0),
        ("forestgreen", 0x228b22),
        ("fuchsia", 0xff00ff),
        ("gainsboro", 0xdcdcdc),
        ("ghostwhite", 0xf8f8ff),
        ("gold", 0xffd700),
        ("goldenrod", 0xdaa520),
        ("gray", 0x808080),
        ("grey", 0x808080),
        ("green", 0x008000),
        ("greenyellow", 0xadff2f),
        ("honeydew", 0xf0fff0),
        ("hotpink", 0xff69b4),
        ("indianred", 0xcd5c5c),
        ("indigo", 0x4b0082),
        ("ivory", 0xfffff0),
        ("khaki", 0xf0e68c),
        ("lavender", 0xe6e6fa),
        ("lavenderblush", 0xfff0f5),
        ("lawngreen", 0x7cfc00),
        ("lemonchiffon", 0xfffacd),
        ("lightblue", 0xadd8e6),
        ("lightcoral", 0xf08080),
        ("lightcyan", 0xe0ffff),
        ("lightgoldenrodyellow", 0xfafad2),
        ("lightgray", 0xd3d3d3),
        ("lightgrey", 0xd3d3d3),
        ("lightgreen", 0x90ee90),
        ("lightpink", 0xffb6c1),
        ("lightsalmon", 0xffa07a),
        ("lightseagreen", 0x20b2aa),
        ("lightskyblue", 0x87cefa),
        ("lightslategray", 0x778899),
        ("lightslategrey", 0x778899),
        ("lightsteelblue", 0xb0c4de),
        ("lightyellow", 0xffffe0),
        ("lime", 0x00ff00),
        ("limegreen", 0x32cd32),
        ("linen", 0xfaf0e6),
        ("magenta", 0xff00ff),
        ("maroon", 0x800000),
        ("mediumaquamarine", 0x66cdaa),
        ("mediumblue", 0x0000cd),
        ("mediumorchid", 0xba55d3),
        ("mediumpurple", 0x9370d8),
        ("mediumseagreen", 0x3cb371),
        ("mediumslateblue", 0x7b68ee),
        ("mediumspringgreen", 0x00fa9a),
        ("mediumturquoise", 0x48d1cc),
        ("mediumvioletred", 0xc71585),
        ("midnightblue", 0x191970),
        ("mintcream", 0xf5fffa),
        ("mistyrose", 0xffe4e1),
        ("moccasin", 0xffe4b5),
        ("navajowhite", 0xffdead),
        ("navy", 0x000080),
        ("oldlace", 0xfdf5e6),
        ("olive", 0x808000),
        ("olivedrab", 0x6b8e23),
        ("orange", 0xffa500),
        ("orangered", 0xff4500),
        ("orchid", 0xda70d6),
        ("palegoldenrod", 0xeee8aa),
        ("palegreen", 0x98fb98),
        ("paleturquoise", 0xafeeee),
        ("palevioletred", 0xd87093),
        ("papayawhip", 0xffefd5),
        ("peachpuff", 0xffdab9),
        ("peru", 0xcd853f),
        ("pink", 0xffc0cb),
        ("plum", 0xdda0dd),
        ("powderblue", 0xb0e0e6),
        ("purple", 0x800080),
        ("rebeccapurple", 0x663399),
        ("red", 0xff0000),
        ("rosybrown", 0xbc8f8f),
        ("royalblue", 0x4169e1),
        ("saddlebrown", 0x8b4513),
        ("salmon", 0xfa8072),
        ("sandybrown", 0xf4a460),
        ("seagreen", 0x2e8b57),
        ("seashell", 0xfff5ee),
        ("sienna", 0xa0522d),
        ("silver", 0xc0c0c0),
        ("skyblue", 0x87ceeb),
        ("slateblue", 0x6a5acd),
        ("slategray", 0x708090),
        ("slategrey", 0x708090),
        ("snow", 0xfffafa),
        ("springgreen", 0x00ff7f),
        ("steelblue", 0x4682b4),
        ("tan", 0xd2b48c),
        ("teal", 0x008080),
        ("thistle", 0xd8bfd8),
        ("tomato", 0xff6347),
        ("turquoise", 0x40e0d0),
        ("violet", 0xee82ee),
        ("wheat", 0xf5deb3),
        ("white", 0xffffff),
        ("whitesmoke", 0xf5f5f5),
        ("yellow", 0xffff00),
        ("yellowgreen", 0x9acd32),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(compress: bool) -> CssOptions {
        CssOptions {
            compress,
            ..CssOptions::default()
        }
    }

    #[test]
    fn original_text_is_kept() {
        let color = Color::from_hex("#111").unwrap();
        assert_eq!(color.rgb, [17.0, 17.0, 17.0]);
        assert_eq!(color.to_css(&opts(false)), "#111");
        let named = Color::from_keyword("Red").unwrap();
        assert_eq!(named.to_css(&opts(false)), "Red");
    }

    #[test]
    fn computed_colors_print_as_hex_or_rgba() {
        let color = Color::new([255.0, 0.0, 0.0], 1.0);
        assert_eq!(color.to_css(&opts(false)), "#ff0000");
        assert_eq!(color.to_css(&opts(true)), "#f00");
        let translucent = Color::new([255.0, 255.0, 255.0], 0.4).with_value("rgb");
        assert_eq!(translucent.to_css(&opts(false)), "rgba(255, 255, 255, 0.4)");
        assert_eq!(translucent.to_css(&opts(true)), "rgba(255,255,255,0.4)");
    }

    #[test]
    fn hsl_origin_prints_hsl() {
        let color = Color::from_hsl(Hsl {
            h: 120.0,
            s: 1.0,
            l: 0.5,
            a: 1.0,
        })
        .with_value("hsl");
        assert_eq!(color.to_css(&opts(false)), "hsl(120, 100%, 50%)");
    }

    #[test]
    fn hsl_round_trip() {
        let color = Color::from_hex("#336699").unwrap();
        let back = Color::from_hsl(color.to_hsl());
        for i in 0..3 {
            assert!((back.rgb[i] - color.rgb[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn operate_composites_alpha() {
        let a = Color::new([10.0, 20.0, 30.0], 0.5);
        let b = Color::new([1.0, 2.0, 3.0], 0.5);
        let sum = a.operate(Op::Add, &b);
        assert_eq!(sum.rgb, [11.0, 22.0, 33.0]);
        assert_eq!(sum.alpha, 0.75);
    }

    #[test]
    fn compare_requires_equal_channels() {
        let a = Color::from_hex("#fff").unwrap();
        let b = Node::Color(Color::from_hex("#ffffff").unwrap());
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
        let c = Node::Color(Color::from_hex("#fffffe").unwrap());
        assert_eq!(a.compare(&c), None);
    }
}
