//! Regular expressions shared by the extraction passes of several dialects.

use once_cell::sync::Lazy;
use regex::Regex;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static pattern {pattern}: {e}"))
}

pub static MD5: Lazy<Regex> = Lazy::new(|| compile(r"\b[a-fA-F0-9]{32}\b"));
pub static SHA1: Lazy<Regex> = Lazy::new(|| compile(r"\b[a-fA-F0-9]{40}\b"));
pub static SHA256: Lazy<Regex> = Lazy::new(|| compile(r"\b[a-fA-F0-9]{64}\b"));

pub static IPV4: Lazy<Regex> = Lazy::new(|| compile(r"\b(?:\d{1,3}\.){3}\d{1,3}\b"));
pub static IPV6: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(?:[0-9a-f]{0,4}:){2,7}[0-9a-f]{0,4}\b"));

pub static PORT: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\bport\s*(?:=|is|:)?\s*(\d{1,5})\b"));

/// `name.ext` for executable and script extensions.
pub static PROCESS_BINARY: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b([A-Za-z0-9_-]+\.(?:exe|dll|bat|cmd|ps1|vbs))\b"));

/// `name.exe` only.
pub static PROCESS_EXE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\b([A-Za-z0-9_-]+\.exe)\b"));

/// Windows drive/UNC or POSIX absolute paths, starting at a token boundary.
pub static FILE_PATH: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?:^|[\s'"=(])((?:[A-Za-z]:\\|\\\\)[^\s'"]+|/[^\s'"]+)"#)
});

pub static DOMAIN_PHRASE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r#"(?i)\bdomain\s+(?:(?:is|equals|like|contains)\s+|=\s*)?['"]?([A-Za-z0-9_.-]+)['"]?"#,
    )
});

pub static USER_PHRASE: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?i)\buser(?:name)?\s+(?:(?:is|equals|like)\s+|=\s*)?['"]?([A-Za-z0-9_.@-]+)['"]?"#)
});

pub static HOST_PHRASE: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?i)\b(?:hostname|host|server|agent)\s+(?:named\s+)?['"]?([A-Za-z0-9_.-]{2,})['"]?"#)
});

/// Double or single quoted substrings, backslash escapes allowed inside.
pub static QUOTED: Lazy<Regex> = Lazy::new(|| {
    compile(r#""([^"\\]*(?:\\.[^"\\]*)*)"|'([^'\\]*(?:\\.[^'\\]*)*)'"#)
});

/// Command line switches such as `-enc`, `--flag` or `/c`.
pub static FLAG: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|\s)([-/]{1,2}[A-Za-z][A-Za-z0-9_]*)"));

pub static WORD: Lazy<Regex> = Lazy::new(|| compile(r"[A-Za-z0-9_.\-]+"));

/// Filters [`IPV6`] matches down to full (eight group) or `::` compressed
/// addresses, so clock times such as `10:30:00` are not taken for addresses.
pub fn plausible_ipv6(candidate: &str) -> bool {
    candidate.contains("::") || candidate.matches(':').count() == 7
}

/// Returns the text of whichever alternative of [`QUOTED`] matched.
pub fn quoted_content<'t>(caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
    caps.get(1).or_else(|| caps.get(2))
}
