//! Pulls a renderable component out of partially streamed model output.
//!
//! `extract` re-scans the whole buffer on every call. It returns `None`
//! until a fenced block has been closed, so a half-written snippet is never
//! handed to the renderer.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

/// Fenced-block delimiter.
pub const FENCE: &str = "```";

/// Identifiers the renderer provides to generated code.
pub const DEFAULT_SCOPE: &[&str] = &["React", "useState", "useEffect", "useRef"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedComponent {
    pub source_code: String,
    /// Top-level component name, absent when none could be identified.
    /// Without a name no mount call is appended.
    pub component_name: Option<String>,
}

/// Extract the first fenced code block as normalized, mountable source.
pub fn extract(full_text: &str) -> Option<ExtractedComponent> {
    let mut segments = full_text.split(FENCE);
    segments.next()?;
    let body = segments.next()?;
    // A third segment only exists once the closing fence has arrived.
    segments.next()?;

    let body = lang_tag().replace(body, "");
    let code = reflow(body.trim());
    let code = strip_noise(&code);
    if code.is_empty() {
        return None;
    }

    let Some(name) = component_name(&code) else {
        return Some(ExtractedComponent {
            source_code: code,
            component_name: None,
        });
    };

    Some(ExtractedComponent {
        source_code: with_single_mount(&code, &name),
        component_name: Some(name),
    })
}

/// Canonical mount call for a component.
pub fn mount_call(name: &str) -> String {
    format!("render(<{name} />);")
}

/// Where the reflow scanner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    /// Inside a `'` or `"` string. Ends at the matching quote or a newline.
    Quoted(char),
    Template,
    LineComment,
    BlockComment,
}

/// Put a line break after `;` and `}` and between `><` when the following
/// text sits on the same line. Only horizontal whitespace outside string,
/// template and comment text is replaced, so no token changes.
fn reflow(code: &str) -> String {
    let mut out = String::with_capacity(code.len() + code.len() / 16);
    let mut scan = Scan::Code;
    let mut prev = '\0';
    let mut chars = code.char_indices();

    while let Some((i, ch)) = chars.next() {
        out.push(ch);
        let before = std::mem::replace(&mut prev, ch);
        let rest = &code[i + ch.len_utf8()..];

        match scan {
            Scan::Code => {}
            Scan::Quoted(quote) => {
                if ch == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == quote || ch == '\n' {
                    scan = Scan::Code;
                }
                continue;
            }
            Scan::Template => {
                if ch == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == '`' {
                    scan = Scan::Code;
                }
                continue;
            }
            Scan::LineComment => {
                if ch == '\n' {
                    scan = Scan::Code;
                }
                continue;
            }
            Scan::BlockComment => {
                if ch == '*' && rest.starts_with('/') {
                    chars.next();
                    out.push('/');
                    scan = Scan::Code;
                }
                continue;
            }
        }

        match ch {
            '\'' | '"' => scan = Scan::Quoted(ch),
            '`' => scan = Scan::Template,
            '/' if rest.starts_with('/') => scan = Scan::LineComment,
            '/' if rest.starts_with('*') => {
                chars.next();
                out.push('*');
                scan = Scan::BlockComment;
            }
            ';' | '}' | '>' => {
                let gap = rest.len() - rest.trim_start_matches([' ', '\t', '\r']).len();
                let next = rest[gap..].chars().next();
                let should_break = match ch {
                    // `=>` is an arrow, not the end of a tag
                    '>' => before != '=' && next == Some('<'),
                    _ => next.is_some_and(|c| c != '\n'),
                };
                if should_break {
                    out.push('\n');
                    // gap is ASCII, one char per byte
                    for _ in 0..gap {
                        chars.next();
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Remove imports, exports, comments and `Name;` statements left behind by them.
fn strip_noise(code: &str) -> String {
    let code = import_from().replace_all(code, "");
    let code = import_bare().replace_all(&code, "");
    let code = export_default_name().replace_all(&code, "");
    let code = export_keyword().replace_all(&code, "");
    let code = block_comment().replace_all(&code, "");
    let code = line_comment().replace_all(&code, "${1}");
    let code = bare_identifier_line().replace_all(&code, |caps: &Captures| {
        if is_statement_keyword(&caps[1]) {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    let code = blank_runs().replace_all(&code, "\n\n");
    code.trim().to_string()
}

fn is_statement_keyword(word: &str) -> bool {
    matches!(word, "break" | "continue" | "return" | "debugger")
}

fn component_name(code: &str) -> Option<String> {
    function_decl()
        .captures(code)
        .or_else(|| arrow_decl().captures(code))
        .map(|caps| caps[1].to_string())
}

/// Drop manual root mounting and stray `render(...)` lines, then end the code
/// with exactly one mount call. A mount the model already placed last is kept.
fn with_single_mount(code: &str, name: &str) -> String {
    let code = create_root_pair().replace_all(code, "");
    let code = create_root_chained().replace_all(&code, "");
    let code = legacy_render().replace_all(&code, "");
    let code = code.trim();

    let existing_last = mount_line()
        .find_iter(code)
        .last()
        .filter(|m| code[m.end()..].trim().is_empty())
        .map(|m| m.as_str().trim().to_string());
    let mount = existing_last.unwrap_or_else(|| mount_call(name));

    let body = mount_line().replace_all(code, "");
    let body = blank_runs().replace_all(&body, "\n\n");
    let body = body.trim();
    if body.is_empty() {
        mount
    } else {
        format!("{body}\n\n{mount}")
    }
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("extractor regex must compile"))
}

fn lang_tag() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"(?i)^\s*(?:jsx|js)\b")
}

fn import_from() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r#"\bimport\s[^;]*?\bfrom\s*['"][^'"\n]*['"][ \t]*;?"#)
}

fn import_bare() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r#"\bimport\s*['"][^'"\n]*['"][ \t]*;?"#)
}

fn export_default_name() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(
        &CACHED,
        r"(?m)^[ \t]*export[ \t]+default[ \t]+[A-Za-z_$][\w$]*[ \t]*;?[ \t]*$",
    )
}

fn export_keyword() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"\bexport\s+(?:default\s+)?")
}

fn block_comment() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"(?s)/\*.*?\*/")
}

fn line_comment() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    // `://` is a URL, not a comment
    cached(&CACHED, r"(?m)(^|[^:])//.*$")
}

/// `Name;` alone on a line. The semicolon keeps JSX text such as a button
/// label out of reach.
fn bare_identifier_line() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"(?m)^[ \t]*([A-Za-z_$][\w$]*)[ \t]*;[ \t]*$")
}

fn blank_runs() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"\n(?:[ \t]*\n){2,}")
}

fn function_decl() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"\bfunction\s+([A-Z][\w$]*)\s*\(")
}

fn arrow_decl() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"\bconst\s+([A-Z][\w$]*)\s*=\s*\(")
}

fn create_root_pair() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(
        &CACHED,
        r"(?:const|let|var)\s+[\w$]+\s*=\s*(?:ReactDOM\.)?createRoot\([^;]*\)\s*;\s*[\w$]+\.render\([^;]*\)[ \t]*;?",
    )
}

fn create_root_chained() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"(?:ReactDOM\.)?createRoot\([^;]*\)[ \t]*;?")
}

fn legacy_render() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"ReactDOM\.render\([^;]*\)[ \t]*;?")
}

fn mount_line() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    cached(&CACHED, r"(?m)^[ \t]*render\([^;\n]*\)[ \t]*;?[ \t]*$")
}
