//! Named value transforms applied with `{{ expr | name }}` or `{{ expr | name:arg }}`.
//!
//! A filter that cannot make sense of its *input* returns `Null`; only an
//! argument it cannot interpret is an error.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TemplateError};
use crate::value::Value;

pub trait Filter: Send + Sync {
    fn apply(&self, input: &Value, arg: Option<&str>, culture: &Culture) -> Result<Value>;
}

impl<F> Filter for F
where
    F: Fn(&Value, Option<&str>, &Culture) -> Result<Value> + Send + Sync,
{
    fn apply(&self, input: &Value, arg: Option<&str>, culture: &Culture) -> Result<Value> {
        self(input, arg, culture)
    }
}

/// Number and date formatting conventions handed to every filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Culture {
    pub name: String,
    pub decimal_separator: char,
    pub group_separator: Option<char>,
    pub currency_symbol: String,
    /// `12,00 €` rather than `€12,00`.
    pub currency_after: bool,
    pub date_format: String,
}

impl Default for Culture {
    fn default() -> Self {
        Self::invariant()
    }
}

impl Culture {
    pub fn invariant() -> Self {
        Self {
            name: "invariant".to_string(),
            decimal_separator: '.',
            group_separator: Some(','),
            currency_symbol: "¤".to_string(),
            currency_after: false,
            date_format: "%Y-%m-%d".to_string(),
        }
    }

    pub fn en_us() -> Self {
        Self {
            name: "en-US".to_string(),
            currency_symbol: "$".to_string(),
            date_format: "%m/%d/%Y".to_string(),
            ..Self::invariant()
        }
    }

    pub fn en_gb() -> Self {
        Self {
            name: "en-GB".to_string(),
            currency_symbol: "£".to_string(),
            date_format: "%d/%m/%Y".to_string(),
            ..Self::invariant()
        }
    }

    pub fn de_de() -> Self {
        Self {
            name: "de-DE".to_string(),
            decimal_separator: ',',
            group_separator: Some('.'),
            currency_symbol: "€".to_string(),
            currency_after: true,
            date_format: "%d.%m.%Y".to_string(),
        }
    }

    pub fn fr_fr() -> Self {
        Self {
            name: "fr-FR".to_string(),
            decimal_separator: ',',
            group_separator: Some('\u{a0}'),
            currency_symbol: "€".to_string(),
            currency_after: true,
            date_format: "%d/%m/%Y".to_string(),
        }
    }

    /// Case-insensitive preset lookup (`en-us`, `de_DE`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "invariant" => Some(Self::invariant()),
            "en-us" | "en" => Some(Self::en_us()),
            "en-gb" => Some(Self::en_gb()),
            "de-de" | "de" => Some(Self::de_de()),
            "fr-fr" | "fr" => Some(Self::fr_fr()),
            _ => None,
        }
    }

    /// Rounds half away from zero to `decimals` places and applies separators.
    pub fn format_number(&self, value: Decimal, decimals: u32) -> String {
        let rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
        let text = rounded.abs().to_string();
        let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));

        let mut out = String::with_capacity(text.len() + 8);
        if rounded.is_sign_negative() && !rounded.is_zero() {
            out.push('-');
        }
        let len = int_part.len();
        for (i, c) in int_part.chars().enumerate() {
            if let Some(sep) = self.group_separator {
                if i > 0 && (len - i) % 3 == 0 {
                    out.push(sep);
                }
            }
            out.push(c);
        }
        if decimals > 0 {
            out.push(self.decimal_separator);
            let mut frac: String = frac_part.chars().take(decimals as usize).collect();
            while frac.len() < decimals as usize {
                frac.push('0');
            }
            out.push_str(&frac);
        }
        out
    }

    pub fn format_currency(&self, value: Decimal, decimals: u32) -> String {
        let number = self.format_number(value.abs(), decimals);
        let sign = if value.is_sign_negative() && !value.round_dp(decimals).is_zero() {
            "-"
        } else {
            ""
        };
        if self.currency_after {
            format!("{}{}\u{a0}{}", sign, number, self.currency_symbol)
        } else {
            format!("{}{}{}", sign, self.currency_symbol, number)
        }
    }
}

/// Name → filter table plus the culture passed to every call.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
    culture: Culture,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry")
            .field("filters", &names)
            .field("culture", &self.culture.name)
            .finish()
    }
}

impl FilterRegistry {
    /// An empty registry; every `|` lookup fails with `UnknownFilter`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("upper", |v: &Value, _: Option<&str>, _: &Culture| -> Result<Value> {
            Ok(map_text(v, |s| s.to_uppercase()))
        });
        registry.register("lower", |v: &Value, _: Option<&str>, _: &Culture| -> Result<Value> {
            Ok(map_text(v, |s| s.to_lowercase()))
        });
        registry.register("trim", |v: &Value, _: Option<&str>, _: &Culture| -> Result<Value> {
            Ok(map_text(v, |s| s.trim().to_string()))
        });
        registry.register("capitalize", |v: &Value, _: Option<&str>, _: &Culture| -> Result<Value> {
            Ok(map_text(v, capitalize))
        });
        registry.register("length", length);
        registry.register("default", default);
        registry.register("truncate", truncate);
        registry.register("join", join);
        registry.register("number", |v: &Value, arg: Option<&str>, c: &Culture| -> Result<Value> {
            let decimals = decimals_arg("number", arg, 0)?;
            Ok(numeric(v)
                .map(|n| Value::String(c.format_number(n, decimals)))
                .unwrap_or(Value::Null))
        });
        registry.register("currency", |v: &Value, arg: Option<&str>, c: &Culture| -> Result<Value> {
            let decimals = decimals_arg("currency", arg, 2)?;
            Ok(numeric(v)
                .map(|n| Value::String(c.format_currency(n, decimals)))
                .unwrap_or(Value::Null))
        });
        registry.register("percent", |v: &Value, arg: Option<&str>, c: &Culture| -> Result<Value> {
            let decimals = decimals_arg("percent", arg, 0)?;
            Ok(numeric(v)
                .and_then(|n| n.checked_mul(Decimal::ONE_HUNDRED))
                .map(|n| Value::String(format!("{}%", c.format_number(n, decimals))))
                .unwrap_or(Value::Null))
        });
        registry.register("date", date);
        registry
    }

    pub fn with_culture(mut self, culture: Culture) -> Self {
        self.culture = culture;
        self
    }

    pub fn register(&mut self, name: impl Into<String>, filter: impl Filter + 'static) {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn culture(&self) -> &Culture {
        &self.culture
    }

    pub fn apply(&self, name: &str, input: &Value, arg: Option<&str>) -> Result<Value> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFilter(name.to_string()))?;
        filter.apply(input, arg, &self.culture)
    }
}

fn map_text(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Number(_) | Value::Bool(_) => Value::String(f(&value.to_string())),
        _ => Value::Null,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn numeric(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn invalid_arg(filter: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::InvalidFilterArgument {
        filter: filter.to_string(),
        message: message.into(),
    }
}

fn decimals_arg(filter: &str, arg: Option<&str>, default: u32) -> Result<u32> {
    match arg {
        None => Ok(default),
        Some(text) => match text.parse::<u32>() {
            Ok(n) if n <= 28 => Ok(n),
            _ => Err(invalid_arg(filter, format!("`{}` is not a decimal count (0-28)", text))),
        },
    }
}

fn length(value: &Value, _: Option<&str>, _: &Culture) -> Result<Value> {
    Ok(match value {
        Value::Null => Value::from(0usize),
        other => other.len().map(Value::from).unwrap_or(Value::Null),
    })
}

fn default(value: &Value, arg: Option<&str>, _: &Culture) -> Result<Value> {
    let fallback = arg.ok_or_else(|| invalid_arg("default", "a fallback value is required"))?;
    Ok(match value {
        Value::Null => Value::from(fallback),
        Value::String(s) if s.is_empty() => Value::from(fallback),
        other => other.clone(),
    })
}

fn truncate(value: &Value, arg: Option<&str>, _: &Culture) -> Result<Value> {
    let max = arg
        .ok_or_else(|| invalid_arg("truncate", "a length is required"))?
        .parse::<usize>()
        .map_err(|_| invalid_arg("truncate", "length must be a non-negative integer"))?;
    Ok(map_text(value, |s| {
        if s.chars().count() <= max {
            s.to_string()
        } else {
            let mut cut: String = s.chars().take(max).collect();
            cut.push_str("...");
            cut
        }
    }))
}

fn join(value: &Value, arg: Option<&str>, _: &Culture) -> Result<Value> {
    let separator = arg.unwrap_or(", ");
    Ok(match value {
        Value::Array(items) => Value::String(
            items
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(separator),
        ),
        _ => Value::Null,
    })
}

fn date(value: &Value, arg: Option<&str>, culture: &Culture) -> Result<Value> {
    let pattern = arg.unwrap_or(&culture.date_format);
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(invalid_arg("date", format!("invalid date format `{}`", pattern)));
    }

    let Some(text) = value.as_str() else {
        return Ok(Value::Null);
    };
    let Some(moment) = parse_datetime(text.trim()) else {
        return Ok(Value::Null);
    };

    let mut out = String::new();
    write!(out, "{}", moment.format_with_items(items.iter()))
        .map_err(|_| invalid_arg("date", format!("format `{}` does not apply to this date", pattern)))?;
    Ok(Value::String(out))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    fn apply(name: &str, input: Value, arg: Option<&str>) -> Result<Value> {
        FilterRegistry::with_builtins().apply(name, &input, arg)
    }

    #[test]
    fn number_grouping_and_rounding() {
        let en = Culture::en_us();
        assert_eq!(en.format_number(dec("1234567.891"), 2), "1,234,567.89");
        assert_eq!(en.format_number(dec("2.5"), 0), "3");
        assert_eq!(en.format_number(dec("-2.5"), 0), "-3");
        assert_eq!(en.format_number(dec("5"), 2), "5.00");
        assert_eq!(en.format_number(dec("999"), 0), "999");
        assert_eq!(en.format_number(dec("-0.001"), 2), "0.00");
        assert_eq!(Culture::de_de().format_number(dec("1234.5"), 2), "1.234,50");
    }

    #[test]
    fn currency_placement_follows_culture() {
        assert_eq!(Culture::en_us().format_currency(dec("1234.5"), 2), "$1,234.50");
        assert_eq!(Culture::en_us().format_currency(dec("-3"), 2), "-$3.00");
        assert_eq!(
            Culture::de_de().format_currency(dec("1234.5"), 2),
            "1.234,50\u{a0}€"
        );
    }

    #[test]
    fn culture_lookup_by_name() {
        assert_eq!(Culture::from_name("de_DE"), Some(Culture::de_de()));
        assert_eq!(Culture::from_name("EN-us"), Some(Culture::en_us()));
        assert_eq!(Culture::from_name("xx-YY"), None);
    }

    #[test]
    fn text_filters() {
        assert_eq!(apply("upper", Value::from("abc"), None).unwrap(), Value::from("ABC"));
        assert_eq!(apply("lower", Value::from("ÄB"), None).unwrap(), Value::from("äb"));
        assert_eq!(apply("trim", Value::from("  x "), None).unwrap(), Value::from("x"));
        assert_eq!(apply("capitalize", Value::from("élan"), None).unwrap(), Value::from("Élan"));
        assert_eq!(apply("upper", Value::Null, None).unwrap(), Value::Null);
        assert_eq!(
            apply("truncate", Value::from("abcdef"), Some("3")).unwrap(),
            Value::from("abc...")
        );
        assert_eq!(apply("truncate", Value::from("ab"), Some("3")).unwrap(), Value::from("ab"));
    }

    #[test]
    fn default_and_length() {
        assert_eq!(apply("default", Value::Null, Some("n/a")).unwrap(), Value::from("n/a"));
        assert_eq!(apply("default", Value::from("x"), Some("n/a")).unwrap(), Value::from("x"));
        assert_eq!(
            apply("length", Value::Array(vec![Value::Null, Value::Null]), None).unwrap(),
            Value::from(2usize)
        );
        assert_eq!(apply("length", Value::Null, None).unwrap(), Value::from(0usize));
    }

    #[test]
    fn join_arrays() {
        let items = Value::Array(vec![Value::from("a"), Value::from(1i64), Value::Null]);
        assert_eq!(apply("join", items.clone(), None).unwrap(), Value::from("a, 1, "));
        assert_eq!(apply("join", items, Some("/")).unwrap(), Value::from("a/1/"));
    }

    #[test]
    fn numeric_filters_degrade_on_bad_input() {
        assert_eq!(apply("currency", Value::from("abc"), None).unwrap(), Value::Null);
        assert_eq!(
            apply("number", Value::from("12.345"), Some("1")).unwrap(),
            Value::from("12.3")
        );
        assert_eq!(
            apply("percent", Value::Number(dec("0.256")), Some("1")).unwrap(),
            Value::from("25.6%")
        );
    }

    #[test]
    fn bad_arguments_are_errors() {
        for (name, arg) in [("truncate", Some("x")), ("currency", Some("-1")), ("default", None)] {
            let err = apply(name, Value::from("v"), arg).unwrap_err();
            assert!(matches!(err, TemplateError::InvalidFilterArgument { .. }), "{name}");
        }
    }

    #[test]
    fn dates_use_argument_or_culture_format() {
        let registry = FilterRegistry::with_builtins().with_culture(Culture::de_de());
        let input = Value::from("2024-03-05");
        assert_eq!(registry.apply("date", &input, None).unwrap(), Value::from("05.03.2024"));
        assert_eq!(
            registry.apply("date", &input, Some("%Y/%m/%d")).unwrap(),
            Value::from("2024/03/05")
        );
        assert_eq!(
            registry
                .apply("date", &Value::from("2024-03-05T14:30:00Z"), Some("%H:%M"))
                .unwrap(),
            Value::from("14:30")
        );
        assert_eq!(registry.apply("date", &Value::from("soon"), None).unwrap(), Value::Null);
    }

    #[test]
    fn unknown_filter() {
        assert_eq!(
            apply("shout", Value::Null, None).unwrap_err(),
            TemplateError::UnknownFilter("shout".to_string())
        );
    }

    #[test]
    fn custom_closure_filters_receive_culture() {
        let mut registry = FilterRegistry::new().with_culture(Culture::fr_fr());
        registry.register("culture", |_: &Value, _: Option<&str>, c: &Culture| -> Result<Value> {
            Ok(Value::from(c.name.as_str()))
        });
        assert_eq!(registry.apply("culture", &Value::Null, None).unwrap(), Value::from("fr-FR"));
        assert!(registry.contains("culture"));
        assert!(!registry.contains("upper"));
    }
}
