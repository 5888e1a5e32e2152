/// 压缩多余空白字符，主要用于输出压缩模式。
pub fn collapse_whitespace(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                result.push(' ');
                last_was_space = true;
            }
        } else {
            result.push(ch);
            last_was_space = false;
        }
    }
    result.trim().to_string()
}

/// 保持相对缩进的辅助函数。
pub fn indent(level: usize) -> String {
    const INDENT: &str = "  ";
    (0..level).map(|_| INDENT).collect()
}

/// 按精度四舍五入，消除二进制浮点的尾差。
pub fn fround(value: f64, precision: usize) -> f64 {
    if precision == 0 || !value.is_finite() {
        return value;
    }
    format!("{:.*}", precision, value + 2e-16)
        .parse()
        .unwrap_or(value)
}

/// 数字的 CSS 文本形式：整数不带小数点，无穷大写作 `Infinity`。
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}

/// 去掉路径中的 `.` 段并折叠 `..` 段。
pub fn normalize_path(path: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                if result.is_empty() || result.last() == Some(&"..") {
                    result.push(segment);
                } else {
                    result.pop();
                }
            }
            other => result.push(other),
        }
    }
    result.join("/")
}

/// 与浏览器 `encodeURI` 一致的百分号编码。
pub fn encode_uri(input: &str) -> String {
    const KEEP: &str = ";,/?:@&=+$-_.!~*'()#";
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || KEEP.contains(ch) {
            result.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                result.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fround_trims_float_noise() {
        assert_eq!(fround(0.1 + 0.2, 8), 0.3);
        assert_eq!(fround(f64::INFINITY, 8), f64::INFINITY);
    }

    #[test]
    fn numbers_print_like_css() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
    }

    #[test]
    fn normalize_collapses_segments() {
        assert_eq!(normalize_path("a/./b/../c.css"), "a/c.css");
        assert_eq!(normalize_path("../x/../y.css"), "../y.css");
    }

    #[test]
    fn encode_uri_escapes_spaces() {
        assert_eq!(encode_uri("a b"), "a%20b");
        assert_eq!(encode_uri("a=b"), "a=b");
    }
}
