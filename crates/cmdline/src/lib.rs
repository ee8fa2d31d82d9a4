//! Quote-aware scanning of command strings.
//!
//! Every execution tier funnels raw command strings through this crate before
//! deciding how to run them: [`tokenize`] produces argv-style tokens,
//! [`has_operators`] decides direct exec vs. interpreter exec, and
//! [`is_background`] spots the trailing fire-and-forget marker. All functions
//! are pure and never fail; malformed input degrades gracefully.

use tracing::debug;

/// Result of tokenizing a command string.
///
/// `balanced` is `false` when the input ended inside an open quote. The
/// tokens are still usable (best-effort, like an interactive shell), but
/// callers that care can log or branch on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenized {
    pub tokens: Vec<String>,
    pub balanced: bool,
}

/// Splits a command string into argv-style tokens.
///
/// Single quotes, double quotes, and backslash escapes are honored; quote
/// characters are consumed, escaped characters are kept literally. Unquoted
/// whitespace separates tokens and empty tokens are dropped. A backslash
/// escapes the next character even inside quotes.
///
/// Unbalanced quotes never fail: the partial token is flushed and the
/// condition is reported through [`Tokenized::balanced`].
///
/// # Examples
///
/// ```
/// use echelon_cmdline::tokenize;
///
/// let t = tokenize("echo 'hello world' done");
/// assert_eq!(t.tokens, vec!["echo", "hello world", "done"]);
/// assert!(t.balanced);
///
/// let t = tokenize(r#"printf "a\"b""#);
/// assert_eq!(t.tokens, vec!["printf", "a\"b"]);
///
/// let t = tokenize("echo 'unclosed");
/// assert_eq!(t.tokens, vec!["echo", "unclosed"]);
/// assert!(!t.balanced);
/// ```
pub fn tokenize(input: &str) -> Tokenized {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '\'' && !in_double {
            in_single = !in_single;
        } else if ch == '"' && !in_single {
            in_double = !in_double;
        } else if ch.is_whitespace() && !in_single && !in_double {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let balanced = !in_single && !in_double;
    if !balanced {
        debug!(target: "echelon_cmdline", command = %input, "unbalanced quotes in command string");
    }
    Tokenized { tokens, balanced }
}

/// Returns `true` if the command contains a shell operator outside quotes.
///
/// Operators are `|`, `&`, `;`, `>` and `<` (which covers `||`, `&&` and
/// compound redirections). A command with any of them must run through an
/// interpreter; anything else can exec its tokens directly.
///
/// # Examples
///
/// ```
/// use echelon_cmdline::has_operators;
///
/// assert!(has_operators("echo a | grep b"));
/// assert!(has_operators("make && make install"));
/// assert!(has_operators("echo hi > out.txt"));
/// assert!(!has_operators("echo a"));
/// assert!(!has_operators("echo 'a|b'"));
/// ```
pub fn has_operators(input: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '\'' && !in_double {
            in_single = !in_single;
        } else if ch == '"' && !in_single {
            in_double = !in_double;
        } else if !in_single && !in_double && matches!(ch, '|' | '&' | ';' | '>' | '<') {
            return true;
        }
    }
    false
}

/// Returns `true` if the command ends in a lone unquoted `&`.
///
/// A trailing `&` marks fire-and-forget execution. `&&` is a logical
/// operator, not a background marker, and quoted or escaped ampersands do
/// not count.
///
/// # Examples
///
/// ```
/// use echelon_cmdline::is_background;
///
/// assert!(is_background("sleep 30 &"));
/// assert!(!is_background("true && echo ok"));
/// assert!(!is_background("echo 'a &'"));
/// ```
pub fn is_background(input: &str) -> bool {
    trailing_ampersand(input).is_some()
}

/// Removes a trailing background marker, if present.
///
/// Returns the command unchanged when [`is_background`] would be `false`.
///
/// # Examples
///
/// ```
/// use echelon_cmdline::strip_background;
///
/// assert_eq!(strip_background("sleep 30 &"), "sleep 30");
/// assert_eq!(strip_background("echo hi"), "echo hi");
/// ```
pub fn strip_background(input: &str) -> &str {
    match trailing_ampersand(input) {
        Some(idx) => input[..idx].trim_end(),
        None => input,
    }
}

/// Byte index of a trailing lone `&` that is active (outside quotes,
/// unescaped), or `None`.
fn trailing_ampersand(input: &str) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    // (byte index, char, active outside quotes/escapes)
    let mut scanned: Vec<(usize, char, bool)> = Vec::with_capacity(input.len());

    for (idx, ch) in input.char_indices() {
        if escaped {
            scanned.push((idx, ch, false));
            escaped = false;
        } else if ch == '\\' {
            scanned.push((idx, ch, false));
            escaped = true;
        } else if ch == '\'' && !in_double {
            in_single = !in_single;
            scanned.push((idx, ch, false));
        } else if ch == '"' && !in_single {
            in_double = !in_double;
            scanned.push((idx, ch, false));
        } else {
            scanned.push((idx, ch, !in_single && !in_double));
        }
    }

    let mut rev = scanned
        .iter()
        .rev()
        .skip_while(|(_, ch, active)| *active && ch.is_whitespace());
    match rev.next() {
        Some(&(idx, '&', true)) => match rev.next() {
            // && is a logical operator, not a background marker
            Some(&(_, '&', true)) => None,
            _ => Some(idx),
        },
        _ => None,
    }
}

/// First word of the command and of every operator-separated segment.
///
/// Segments are split on unquoted `|`, `&` and `;`; the first token of each
/// is the word that names the program being run. Used for command
/// classification (e.g. lenient exit codes for search tools), so quoted
/// operators never split and arguments are never included.
///
/// # Examples
///
/// ```
/// use echelon_cmdline::command_words;
///
/// assert_eq!(command_words("grep foo *.rs | wc -l"), vec!["grep", "wc"]);
/// assert_eq!(command_words("echo 'a|b'"), vec!["echo"]);
/// ```
pub fn command_words(input: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            current.push(ch);
            escaped = true;
        } else if ch == '\'' && !in_double {
            in_single = !in_single;
            current.push(ch);
        } else if ch == '"' && !in_single {
            in_double = !in_double;
            current.push(ch);
        } else if !in_single && !in_double && matches!(ch, '|' | '&' | ';') {
            if !current.trim().is_empty() {
                segments.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        } else {
            current.push(ch);
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }

    segments
        .iter()
        .filter_map(|segment| tokenize(segment).tokens.into_iter().next())
        .collect()
}
