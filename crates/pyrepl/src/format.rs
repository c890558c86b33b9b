//! The format-spec mini-language, `str.format` and printf-style `%`.

use std::rc::Rc;

use crate::{
    exception::{ExcType, RunError, RunResult},
    value::{Number, Value, float_repr},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
    /// Padding goes between the sign and the digits.
    AfterSign,
}

/// A parsed `[[fill]align][sign][#][0][width][,|_][.precision][type]`.
#[derive(Debug, Clone, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<Align>,
    sign: Option<char>,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid_spec(spec: &str) -> RunError {
    ExcType::ValueError.error(format!("Invalid format specifier '{spec}'"))
}

impl FormatSpec {
    fn parse(spec: &str) -> RunResult<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = Self::default();
        let mut i = 0;
        let align_of = |c: char| match c {
            '<' => Some(Align::Left),
            '>' => Some(Align::Right),
            '^' => Some(Align::Center),
            '=' => Some(Align::AfterSign),
            _ => None,
        };
        if chars.len() >= 2
            && let Some(align) = align_of(chars[1])
        {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(align);
            i = 2;
        } else if let Some(align) = chars.first().copied().and_then(align_of) {
            parsed.align = Some(align);
            i = 1;
        }
        if let Some(&c) = chars.get(i)
            && matches!(c, '+' | '-' | ' ')
        {
            parsed.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            parsed.fill.get_or_insert('0');
            parsed.align.get_or_insert(Align::AfterSign);
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            parsed.width = digits(&chars[start..i]).ok_or_else(|| invalid_spec(spec))?;
        }
        if let Some(&c) = chars.get(i)
            && matches!(c, ',' | '_')
        {
            parsed.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i == start {
                return Err(ExcType::ValueError.error("Format specifier missing precision"));
            }
            parsed.precision = digits(&chars[start..i]);
        }
        if let Some(&c) = chars.get(i) {
            parsed.kind = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return Err(invalid_spec(spec));
        }
        Ok(parsed)
    }

    fn pad(&self, body: &str, sign: &str, default_align: Align) -> String {
        let len = body.chars().count() + sign.chars().count();
        if len >= self.width {
            return format!("{sign}{body}");
        }
        let fill = self.fill.unwrap_or(' ');
        let padding = self.width - len;
        let repeat = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
        match self.align.unwrap_or(default_align) {
            Align::Left => format!("{sign}{body}{}", repeat(padding)),
            Align::Right => format!("{}{sign}{body}", repeat(padding)),
            Align::Center => {
                let left = padding / 2;
                format!("{}{sign}{body}{}", repeat(left), repeat(padding - left))
            }
            Align::AfterSign => format!("{sign}{}{body}", repeat(padding)),
        }
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }
}

fn digits(chars: &[char]) -> Option<usize> {
    chars.iter().collect::<String>().parse().ok()
}

/// `format(value, spec)` for builtin values.
pub(crate) fn format_value(value: &Value, spec: &str) -> RunResult<String> {
    if spec.is_empty() {
        return Ok(value.py_str());
    }
    let parsed = FormatSpec::parse(spec)?;
    match (value.as_number(), parsed.kind) {
        (None, _) => {
            if !matches!(parsed.kind, None | Some('s')) || parsed.sign.is_some() {
                return Err(ExcType::ValueError.error(format!(
                    "Unknown format code '{}' for object of type '{}'",
                    parsed.kind.unwrap_or('s'),
                    value.type_name()
                )));
            }
            let mut text = value.py_str();
            if let Some(precision) = parsed.precision {
                text = text.chars().take(precision).collect();
            }
            Ok(parsed.pad(&text, "", Align::Left))
        }
        (Some(number), kind) => format_number(&number, &parsed, kind, value),
    }
}

fn format_number(number: &Number, spec: &FormatSpec, kind: Option<char>, value: &Value) -> RunResult<String> {
    let is_int = !matches!(number, Number::Float(_));
    let (negative, body) = match kind {
        Some(code @ ('d' | 'x' | 'X' | 'o' | 'b' | 'n')) => {
            let Some(int) = number.to_bigint().filter(|_| is_int) else {
                return Err(unknown_code(code, value));
            };
            let magnitude = int.magnitude();
            let digits = match code {
                'x' => format!("{magnitude:x}"),
                'X' => format!("{magnitude:X}"),
                'o' => format!("{magnitude:o}"),
                'b' => format!("{magnitude:b}"),
                _ => magnitude.to_string(),
            };
            let prefix = match (spec.alternate, code) {
                (true, 'x') => "0x",
                (true, 'X') => "0X",
                (true, 'o') => "0o",
                (true, 'b') => "0b",
                _ => "",
            };
            (int.sign() == num_bigint::Sign::Minus, format!("{prefix}{}", group(&digits, spec.grouping)))
        }
        Some(code @ ('f' | 'F' | 'e' | 'E' | '%' | 'g' | 'G')) => {
            let f = number.to_f64();
            let precision = spec.precision.unwrap_or(6);
            let magnitude = f.abs();
            let text = match code {
                'f' | 'F' => fixed(magnitude, precision, spec.grouping),
                'e' | 'E' => {
                    let text = exponent(magnitude, precision);
                    if code == 'E' { text.to_uppercase() } else { text }
                }
                '%' => format!("{}%", fixed(magnitude * 100.0, precision, spec.grouping)),
                _ => general(magnitude, precision.max(1)),
            };
            (f.is_sign_negative() && !f.is_nan() && f != 0.0, text)
        }
        None => match number {
            Number::Float(f) => {
                let text = match spec.precision {
                    Some(precision) => general(f.abs(), precision.max(1)),
                    None => float_repr(f.abs()),
                };
                (f.is_sign_negative() && *f != 0.0, text)
            }
            _ => {
                let int = number.to_bigint().unwrap_or_default();
                (
                    int.sign() == num_bigint::Sign::Minus,
                    group(&int.magnitude().to_string(), spec.grouping),
                )
            }
        },
        Some(code) => return Err(unknown_code(code, value)),
    };
    Ok(spec.pad(&body, spec.sign_for(negative), Align::Right))
}

fn unknown_code(code: char, value: &Value) -> RunError {
    ExcType::ValueError.error(format!(
        "Unknown format code '{code}' for object of type '{}'",
        value.type_name()
    ))
}

/// Inserts a thousands separator into the integer part of `digits`.
fn group(digits: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return digits.to_owned();
    };
    let (int_part, rest) = digits.split_at(digits.find('.').unwrap_or(digits.len()));
    let mut out = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

fn fixed(value: f64, precision: usize, grouping: Option<char>) -> String {
    if !value.is_finite() {
        return non_finite(value);
    }
    group(&format!("{value:.precision$}"), grouping)
}

fn exponent(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return non_finite(value);
    }
    // Rust prints `1.5e3`; Python wants `1.5e+03`.
    let text = format!("{value:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

/// The `g` presentation: fixed or exponent depending on magnitude, trailing zeros dropped.
fn general(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return non_finite(value);
    }
    if value == 0.0 {
        return "0".to_owned();
    }
    #[expect(clippy::cast_possible_truncation, reason = "decimal exponent of a finite f64 fits in i32")]
    let exp = value.log10().floor() as i32;
    let precision_i = i32::try_from(precision).unwrap_or(i32::MAX);
    if exp < -4 || exp >= precision_i {
        let text = exponent(value, precision - 1);
        match text.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{exp}", trim_zeros(mantissa)),
            None => text,
        }
    } else {
        let decimals = usize::try_from(precision_i - 1 - exp).unwrap_or(0);
        trim_zeros(&format!("{value:.decimals$}")).to_owned()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn non_finite(value: f64) -> String {
    if value.is_nan() { "nan".to_owned() } else { "inf".to_owned() }
}

/// `template.format(*args, **kwargs)`.
pub(crate) fn str_format(template: &str, args: &[Value], kwargs: &[(Rc<str>, Value)]) -> RunResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(ExcType::ValueError.error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(ExcType::ValueError.error("Single '{' encountered in format string")),
                    }
                }
                let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conversion)) => (name, Some(conversion)),
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    let value = args
                        .get(auto_index)
                        .ok_or_else(|| ExcType::IndexError.error(format!(
                            "Replacement index {auto_index} out of range for positional args tuple"
                        )))?;
                    auto_index += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index).ok_or_else(|| {
                        ExcType::IndexError.error(format!(
                            "Replacement index {index} out of range for positional args tuple"
                        ))
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(key, _)| &**key == name)
                        .map(|(_, value)| value)
                        .ok_or_else(|| ExcType::key_error(&Value::Str(name.into())))?
                };
                let converted = match conversion {
                    Some("r") => Value::Str(value.py_repr().into()),
                    Some("s") => Value::Str(value.py_str().into()),
                    None => value.clone(),
                    Some(other) => {
                        return Err(ExcType::ValueError.error(format!(
                            "Unknown conversion specifier {other}"
                        )));
                    }
                };
                out.push_str(&format_value(&converted, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// `template % args`, supporting `%s %r %d %i %f %x %%` with optional width and precision.
pub(crate) fn percent_format(template: &str, args: &Value) -> RunResult<String> {
    let args: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut args = args.into_iter();
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        while let Some(&c) = chars.peek()
            && (c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | ' ' | '#'))
        {
            spec.push(c);
            chars.next();
        }
        let Some(code) = chars.next() else {
            return Err(ExcType::ValueError.error("incomplete format"));
        };
        if code == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| ExcType::type_error("not enough arguments for format string"))?;
        let spec = spec.replacen('-', "<", 1);
        let text = match code {
            's' => format_value(&Value::Str(arg.py_str().into()), &spec)?,
            'r' => format_value(&Value::Str(arg.py_repr().into()), &spec)?,
            'd' | 'i' | 'u' => match arg.as_number() {
                Some(Number::Float(f)) => {
                    #[expect(clippy::cast_possible_truncation, reason = "%d truncates toward zero like int()")]
                    let truncated = Value::Int(f.trunc() as i64);
                    format_value(&truncated, &format!("{spec}d"))?
                }
                Some(_) => format_value(&arg, &format!("{spec}d"))?,
                None => {
                    return Err(ExcType::type_error(format!(
                        "%{code} format: a real number is required, not {}",
                        arg.type_name()
                    )));
                }
            },
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                if arg.as_number().is_none() {
                    return Err(ExcType::type_error(format!(
                        "must be real number, not {}",
                        arg.type_name()
                    )));
                }
                format_value(&arg, &format!("{spec}{code}"))?
            }
            other => {
                return Err(ExcType::ValueError.error(format!(
                    "unsupported format character '{other}'"
                )));
            }
        };
        out.push_str(&text);
    }
    if args.next().is_some() {
        return Err(ExcType::type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn fmt(value: impl Into<Value>, spec: &str) -> String {
        format_value(&value.into(), spec).unwrap()
    }

    #[test]
    fn numbers() {
        assert_eq!(fmt(1.23456_f64, ".2f"), "1.23");
        assert_eq!(fmt(42_i64, "05d"), "00042");
        assert_eq!(fmt(-42_i64, "05d"), "-0042");
        assert_eq!(fmt(1_234_567_i64, ","), "1,234,567");
        assert_eq!(fmt(255_i64, "#x"), "0xff");
        assert_eq!(fmt(0.25_f64, ".0%"), "25%");
        assert_eq!(fmt(12345.678_f64, ".3e"), "1.235e+04");
        assert_eq!(fmt(0.000_012_5_f64, "g"), "1.25e-05");
    }

    #[test]
    fn alignment() {
        assert_eq!(fmt("ab", ">5"), "   ab");
        assert_eq!(fmt("ab", "*^6"), "**ab**");
        assert_eq!(fmt(7_i64, "<3"), "7  ");
    }

    #[test]
    fn bad_codes_are_rejected() {
        let err = format_value(&Value::Str("x".into()), "d").unwrap_err();
        assert_eq!(
            err.into_exception().summary(),
            "ValueError: Unknown format code 'd' for object of type 'str'"
        );
    }

    #[test]
    fn str_format_fields() {
        let args = [Value::Int(1), Value::Str("two".into())];
        let kwargs = [("name".into(), Value::Float(2.5))];
        assert_eq!(
            str_format("{} {!r} {name:.1f} {0} {{}}", &args, &kwargs).unwrap(),
            "1 'two' 2.5 1 {}"
        );
    }

    #[test]
    fn percent_formatting() {
        let args = Value::tuple(vec![Value::Str("x".into()), Value::Int(3), Value::Float(0.5)]);
        assert_eq!(percent_format("%s=%d (%.2f) 100%%", &args).unwrap(), "x=3 (0.50) 100%");
        let err = percent_format("%s", &Value::tuple(vec![])).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::TypeError);
    }
}
