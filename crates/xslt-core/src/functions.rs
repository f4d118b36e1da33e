//! The XSLT Function Library (component C): the functions XPath expressions inside a
//! stylesheet can call beyond the core XPath 1.0 set. These are plain, arena-independent
//! helpers; the ones that need to produce or navigate nodes (`current`, `document`,
//! `key`, `node-set`) live in `resolvers.rs` where the run's document arena is in scope.

use crate::context::{DecimalFormat, EngineState};
use crate::error::{XsltError, XsltResult};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// A small, well-known list of names this engine recognizes, used by
/// `function-available()`. XPath 1.0's core functions are always available and are not
/// repeated here.
const KNOWN_EXTENSION_FUNCTIONS: &[&str] = &[
    "current",
    "document",
    "key",
    "format-number",
    "generate-id",
    "system-property",
    "function-available",
    "element-available",
    "unparsed-entity-uri",
    "node-set",
    "replace",
    "matches",
    "lower-case",
    "upper-case",
];

pub fn function_available(name: &str, user_defined: &[String]) -> bool {
    KNOWN_EXTENSION_FUNCTIONS.contains(&name) || user_defined.iter().any(|n| n == name)
}

pub fn lower_case(s: &str) -> String {
    s.to_lowercase()
}

pub fn upper_case(s: &str) -> String {
    s.to_uppercase()
}

pub fn regex_matches(subject: &str, pattern: &str) -> XsltResult<bool> {
    let re = regex::Regex::new(pattern).map_err(|e| XsltError::function("matches", e))?;
    Ok(re.is_match(subject))
}

pub fn regex_replace(subject: &str, pattern: &str, replacement: &str) -> XsltResult<String> {
    let re = regex::Regex::new(pattern).map_err(|e| XsltError::function("replace", e))?;
    Ok(re.replace_all(subject, replacement.replace('\\', "$")).into_owned())
}

/// Computes a hash-based generator id for a node, in the spirit of a `xmur3` string hash
/// feeding a `mulberry32` PRNG step: deterministic for the lifetime of this run (the
/// salt is the owning `Dom`'s address, stable for as long as that tree is alive) and
/// free of any structure an author could rely on (unlike a raw node index).
pub fn generate_id(dom_addr: usize, node_index: usize) -> String {
    let seed = xmur3(&format!("{:x}:{}", dom_addr, node_index));
    let hashed = mulberry32(seed);
    format!("id{:012x}", hashed)
}

static GENERATE_ID_CALLS: AtomicU64 = AtomicU64::new(0);

/// The no-argument `generate-id()` case: a random 48-bit hex id, fresh on every call.
/// There is no `rand` dependency in this workspace, so randomness comes from
/// `RandomState`'s process-seeded SipHash keys, mixed with a call counter so two calls
/// within the same process never collide even if they land on the same keys.
pub fn generate_id_random() -> String {
    let call = GENERATE_ID_CALLS.fetch_add(1, Ordering::Relaxed);
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(call);
    let bits = hasher.finish() & 0xFFFF_FFFF_FFFF;
    format!("id{:012x}", bits)
}

fn xmur3(s: &str) -> u32 {
    let mut h: u32 = 0x9e3779b9u32.wrapping_add(s.len() as u32);
    for c in s.bytes() {
        h = h.wrapping_add(c as u32);
        h = h.wrapping_mul(0x85ebca6b);
        h ^= h >> 13;
    }
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

fn mulberry32(seed: u32) -> u32 {
    let mut a = seed.wrapping_add(0x6D2B79F5);
    a ^= a >> 15;
    a = a.wrapping_mul(a | 1);
    a ^= a.wrapping_add(a ^ (a >> 7)).wrapping_mul(a | 61);
    a ^ (a >> 14)
}

struct Subpattern {
    prefix: String,
    suffix: String,
    min_int_digits: usize,
    grouping: Option<usize>,
    min_frac_digits: usize,
    max_frac_digits: usize,
    is_percent: bool,
    is_per_mille: bool,
}

fn parse_subpattern(pattern: &str, fmt: &DecimalFormat) -> Subpattern {
    let prefix_end = pattern
        .find(|c| c == fmt.digit || c == fmt.zero_digit || c == fmt.decimal_separator || c == fmt.grouping_separator)
        .unwrap_or(pattern.len());
    let prefix = pattern[..prefix_end].to_string();

    let suffix_start = pattern
        .rfind(|c| c == fmt.digit || c == fmt.zero_digit || c == fmt.decimal_separator || c == fmt.grouping_separator)
        .map(|i| i + pattern[i..].chars().next().unwrap().len_utf8())
        .unwrap_or(pattern.len());
    let suffix = pattern[suffix_start..].to_string();

    let digits = &pattern[prefix_end..suffix_start];
    let (int_part, frac_part) = match digits.split_once(fmt.decimal_separator) {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let min_int_digits = int_part.chars().filter(|&c| c == fmt.zero_digit).count();
    let grouping = int_part
        .rsplit(fmt.grouping_separator)
        .next()
        .filter(|_| int_part.contains(fmt.grouping_separator))
        .map(|g| g.chars().count());

    let (min_frac_digits, max_frac_digits) = match frac_part {
        Some(f) => {
            let min = f.chars().take_while(|&c| c == fmt.zero_digit).count();
            (min, f.chars().count())
        }
        None => (0, 0),
    };

    Subpattern {
        prefix: prefix.replace(fmt.percent, "").replace(fmt.per_mille, ""),
        suffix: suffix.replace(fmt.percent, "").replace(fmt.per_mille, ""),
        min_int_digits: min_int_digits.max(1),
        grouping,
        min_frac_digits,
        max_frac_digits,
        is_percent: pattern.contains(fmt.percent),
        is_per_mille: pattern.contains(fmt.per_mille),
    }
}

/// Renders `value` per `pattern` using `fmt`'s symbols (the decimal-format picker
/// algorithm: positive and negative subpatterns separated by `fmt.pattern_separator`,
/// a default negative subpattern of `fmt.minus_sign` + the positive one when only one
/// subpattern is given).
pub fn format_number(value: f64, pattern: &str, fmt: &DecimalFormat) -> String {
    if value.is_nan() {
        return fmt.nan.clone();
    }
    let subpatterns: Vec<&str> = pattern.splitn(2, fmt.pattern_separator).collect();
    let positive = parse_subpattern(subpatterns[0], fmt);
    let negative = subpatterns.get(1).map(|p| parse_subpattern(p, fmt));

    if value.is_infinite() {
        let sign = if value < 0.0 { fmt.minus_sign.to_string() } else { String::new() };
        return format!("{}{}", sign, fmt.infinity);
    }

    let is_negative = value.is_sign_negative() && value != 0.0;
    let sub = if is_negative { negative.as_ref().unwrap_or(&positive) } else { &positive };

    let mut magnitude = value.abs();
    if sub.is_percent {
        magnitude *= 100.0;
    } else if sub.is_per_mille {
        magnitude *= 1000.0;
    }

    let scaled = round_to(magnitude, sub.max_frac_digits);
    let int_digits = scaled.trunc() as i64;
    let mut frac = scaled.fract();
    if frac < 0.0 {
        frac = -frac;
    }

    let mut int_str = int_digits.to_string();
    while int_str.len() < sub.min_int_digits {
        int_str.insert(0, fmt.zero_digit);
    }
    if let Some(group) = sub.grouping {
        if group > 0 {
            int_str = group_digits(&int_str, group, fmt.grouping_separator);
        }
    }

    let mut frac_str = format!("{:.*}", sub.max_frac_digits, frac);
    if let Some(dot_pos) = frac_str.find('.') {
        frac_str = frac_str[dot_pos + 1..].to_string();
    } else {
        frac_str.clear();
    }
    while frac_str.len() > sub.min_frac_digits && frac_str.ends_with(fmt.zero_digit) {
        frac_str.pop();
    }

    let mut out = String::new();
    out.push_str(&sub.prefix);
    if negative.is_none() && is_negative {
        out.push(fmt.minus_sign);
    }
    out.push_str(&digitize(&int_str, fmt.zero_digit));
    if !frac_str.is_empty() {
        out.push(fmt.decimal_separator);
        out.push_str(&digitize(&frac_str, fmt.zero_digit));
    }
    if sub.is_percent {
        out.push(fmt.percent);
    } else if sub.is_per_mille {
        out.push(fmt.per_mille);
    }
    out.push_str(&sub.suffix);
    out
}

fn round_to(value: f64, places: usize) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

fn group_digits(digits: &str, group: usize, sep: char) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = Vec::new();
    for (i, c) in chars.iter().rev().enumerate() {
        if i > 0 && i % group == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out.reverse();
    out.into_iter().collect()
}

fn digitize(ascii_digits: &str, zero_digit: char) -> String {
    if zero_digit == '0' {
        return ascii_digits.to_string();
    }
    let offset = zero_digit as u32 - '0' as u32;
    ascii_digits
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                char::from_u32(c as u32 + offset).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

/// Looks up the named decimal format (or the unnamed default when `name` is `None`).
pub fn pick_decimal_format<'e>(engine: &'e EngineState, name: Option<&str>) -> Option<&'e DecimalFormat> {
    engine
        .decimal_formats
        .get(&crate::context::DecimalFormatKey(name.map(|s| s.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_basic_grouping_and_fraction() {
        let fmt = DecimalFormat::default();
        assert_eq!(format_number(1234.5, "#,##0.00", &fmt), "1,234.50");
    }

    #[test]
    fn format_number_negative_subpattern() {
        let fmt = DecimalFormat::default();
        assert_eq!(format_number(-1234.5, "#,##0.00;(#,##0.00)", &fmt), "(1,234.50)");
    }

    #[test]
    fn format_number_default_negative_uses_minus_sign() {
        let fmt = DecimalFormat::default();
        assert_eq!(format_number(-42.0, "0", &fmt), "-42");
    }

    #[test]
    fn format_number_percent() {
        let fmt = DecimalFormat::default();
        assert_eq!(format_number(0.5, "0%", &fmt), "50%");
    }

    #[test]
    fn generate_id_is_deterministic_for_same_inputs() {
        assert_eq!(generate_id(0x1000, 3), generate_id(0x1000, 3));
        assert_ne!(generate_id(0x1000, 3), generate_id(0x1000, 4));
        assert_eq!(generate_id(0x1000, 3).len(), "id".len() + 12);
    }

    #[test]
    fn generate_id_random_is_fresh_every_call() {
        let a = generate_id_random();
        let b = generate_id_random();
        assert_ne!(a, b);
        assert_eq!(a.len(), "id".len() + 12);
    }

    #[test]
    fn matches_and_replace() {
        assert!(regex_matches("hello123", r"^[a-z]+\d+$").unwrap());
        assert_eq!(regex_replace("2024-01-02", r"(\d+)-(\d+)-(\d+)", r"\2/\3/\1").unwrap(), "01/02/2024");
    }

    #[test]
    fn function_available_knows_extension_functions() {
        assert!(function_available("format-number", &[]));
        assert!(!function_available("not-a-function", &[]));
        assert!(function_available("my-func", &["my-func".to_string()]));
    }
}
