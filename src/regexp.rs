use regex::{Regex, RegexBuilder};

/// REPOSITORY_REGEXP is the anchored grammar for the repository component of
// a registry reference: lowercase path components separated by slashes.
pub const REPOSITORY_REGEXP: &str =
    r"^[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*)*$";

/// TAG_REGEXP is the anchored grammar for a tag: a word character followed
// by up to 127 word characters, dots and dashes.
pub const TAG_REGEXP: &str = r"^[\w][\w.-]{0,127}$";

pub fn must_compile(r: &str) -> Regex {
    RegexBuilder::new(r)
        .size_limit(10 * (1 << 21))
        .build()
        .unwrap()
}
