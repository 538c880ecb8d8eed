//! Version detection and substitution in pack filenames.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Oldest minor version the matcher recognises (`1.6`).
pub const MIN_MINOR_VERSION: u32 = 6;

static VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"1\.(\d{1,2})(?:\.\d{1,2})?").unwrap());

/// Returns every distinct `1.x` / `1.x.y` version in `filename` with `x >= 6`.
pub fn detect_versions(filename: &str) -> BTreeSet<String> {
    version_matches(filename)
        .map(|found| found.as_str().to_string())
        .collect()
}

/// Supported version matches that start a number, so `r11.19` yields nothing.
fn version_matches(filename: &str) -> impl Iterator<Item = regex::Match<'_>> {
    VERSION_REGEX.captures_iter(filename).filter_map(|captures| {
        let whole = captures.get(0)?;
        let preceding = filename[..whole.start()].bytes().next_back();
        if preceding.is_some_and(|byte| byte.is_ascii_digit() || byte == b'.') {
            return None;
        }
        let minor = captures.get(1)?.as_str().parse::<u32>().ok()?;
        (minor >= MIN_MINOR_VERSION).then_some(whole)
    })
}

/// Leftmost version of a range label such as `1.20.x-1.20.1`.
pub fn base_version_of(label: &str) -> String {
    label
        .split('-')
        .next()
        .unwrap_or(label)
        .trim()
        .to_string()
}

/// Replaces the single detected version in `filename` with `replacement`.
///
/// Leaves the name untouched unless `detected` holds exactly one version.
pub fn substitute(filename: &str, detected: &BTreeSet<String>, replacement: &str) -> String {
    let Some(version) = single(detected) else {
        return filename.to_string();
    };
    let mut output = String::with_capacity(filename.len());
    let mut last = 0;
    for found in version_matches(filename).filter(|found| found.as_str() == version) {
        output.push_str(&filename[last..found.start()]);
        output.push_str(replacement);
        last = found.end();
    }
    output.push_str(&filename[last..]);
    output
}

pub fn single(detected: &BTreeSet<String>) -> Option<&str> {
    if detected.len() == 1 {
        detected.first().map(String::as_str)
    } else {
        None
    }
}

/// Filename without a trailing `.zip`.
pub fn file_stem(filename: &str) -> &str {
    let len = filename.len();
    if len > 4 && filename.is_char_boundary(len - 4) && filename[len - 4..].eq_ignore_ascii_case(".zip") {
        &filename[..len - 4]
    } else {
        filename
    }
}

/// Makes a version label safe to embed in a filename.
pub fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_whitespace() => '_',
            ch => ch,
        })
        .collect()
}
