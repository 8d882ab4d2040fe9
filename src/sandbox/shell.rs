//! Command-line helpers shared by the provider and the backends.

/// Substrings in a backend error that mean the sandbox was reclaimed.
const EXPIRY_MARKERS: &[&str] = &["sandbox_stopped", "410", "Gone", "is no longer available"];

/// Path segments never reported by file listings.
pub const EXCLUDED_SEGMENTS: &[&str] = &["node_modules", ".git", ".next", "dist", "build"];

/// Whether an error message signals that the remote sandbox is gone.
pub fn is_expiry_signal(message: &str) -> bool {
    EXPIRY_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Split a command line into an executable and its arguments.
///
/// Tokens are whitespace separated. Single- or double-quoted runs are kept
/// together with the quotes removed, so `sh -c "a | b"` yields three tokens.
/// No other shell syntax is interpreted.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Resolve a sandbox path against the fixed root unless already absolute.
pub fn resolve_path(root: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), path)
    }
}

/// Parent directory of an absolute sandbox path, if any.
pub fn parent_dir(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

/// Escape content for a double-quoted `printf '%b'` argument.
///
/// Order matters: backslashes first so later escapes are not doubled.
/// Backslashes are escaped twice (once for the shell, once for `%b`).
pub fn escape_for_printf(content: &str) -> String {
    content
        .replace('\\', "\\\\\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('\n', "\\n")
}

/// Quote a single shell word so nothing in it is expanded.
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Script writing `content` to `path` byte-for-byte.
pub fn write_file_script(path: &str, content: &str) -> String {
    format!(
        "printf '%b' \"{}\" > {}",
        escape_for_printf(content),
        shell_quote(path)
    )
}

/// Script listing regular files under `directory` relative to it.
pub fn list_files_script(directory: &str) -> String {
    let directory = match directory.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    let exclusions = EXCLUDED_SEGMENTS
        .iter()
        .map(|segment| format!("-not -path '*/{}/*'", segment))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "cd {} && find . -type f {} | sed 's|^\\./||'",
        shell_quote(directory),
        exclusions
    )
}
