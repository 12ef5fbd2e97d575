//! Name normalization for file names and object keys

use std::sync::OnceLock;

use regex::Regex;

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static pattern is valid"))
}

/// Lowercase `name` and collapse every run of characters outside `[a-z0-9]`
/// into a single underscore.
///
/// ```
/// use pipeline_results::naming::normalize;
///
/// assert_eq!(normalize("Stateless tests (asan, 1/2)"), "stateless_tests_asan_1_2_");
/// ```
pub fn normalize(name: &str) -> String {
    separator_pattern()
        .replace_all(&name.to_lowercase(), "_")
        .into_owned()
}
