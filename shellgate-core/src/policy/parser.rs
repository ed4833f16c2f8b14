/// Splits a submitted line into base command names (parser
/// contract). Shell-approximate, not a full shell grammar: quoting is not
/// interpreted and patterns match literal bytes.
pub fn parse_command(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    split_on_separators(line)
        .into_iter()
        .filter_map(|segment| extract_base_command(segment.trim()))
        .collect()
}

/// Splits on `|`, `||`, `&&`, `;` with surrounding whitespace tolerated.
/// A lone `|` must not also consume the second `|` of a `||` token, so the
/// two-character separators are matched first.
fn split_on_separators(line: &str) -> Vec<&str> {
    let bytes = line.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let two = if i + 1 < bytes.len() { &line[i..i + 2] } else { "" };
        let sep_len = if two == "||" || two == "&&" {
            Some(2)
        } else if bytes[i] == b'|' || bytes[i] == b';' {
            Some(1)
        } else {
            None
        };
        if let Some(len) = sep_len {
            parts.push(&line[start..i]);
            i += len;
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&line[start..]);
    parts
}

/// Strips leading `NAME=VALUE` environment assignments (repeatable) and a
/// single leading `sudo ` prefix, then extracts the basename.
fn extract_base_command(segment: &str) -> Option<String> {
    if segment.is_empty() {
        return None;
    }

    let mut rest = segment;
    loop {
        let first_token = rest.split_whitespace().next()?;
        if is_env_assignment(first_token) {
            match rest.split_once(char::is_whitespace) {
                Some((_, remainder)) => rest = remainder.trim_start(),
                None => return None,
            }
        } else {
            break;
        }
    }

    if let Some(stripped) = rest.strip_prefix("sudo ") {
        rest = stripped.trim_start();
    }

    if rest.is_empty() {
        return None;
    }

    let token = rest.split_whitespace().next()?;
    let basename = match token.rfind('/') {
        Some(idx) => &token[idx + 1..],
        None => token,
    };
    if basename.is_empty() {
        None
    } else {
        Some(basename.to_string())
    }
}

fn is_env_assignment(token: &str) -> bool {
    match token.find('=') {
        Some(0) => false,
        Some(idx) => token[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    }
}

/// Glob matching (`*` any run, `?` any single byte), case-insensitive, as
/// used by `fnmatch.fnmatch` in the system this gateway replaces.
pub fn glob_match(command: &str, pattern: &str) -> bool {
    if command.is_empty() || pattern.is_empty() {
        return false;
    }
    glob_match_bytes(
        command.to_lowercase().as_bytes(),
        pattern.to_lowercase().as_bytes(),
    )
}

fn glob_match_bytes(text: &[u8], pattern: &[u8]) -> bool {
    // Standard DP-free greedy glob match with backtracking on `*`.
    let (mut ti, mut pi) = (0usize, 0usize);
    let (mut star_idx, mut star_ti) = (None, 0usize);

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == b'?' || pattern[pi] == text[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == b'*' {
            star_idx = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(si) = star_idx {
            pi = si + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }

    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_only() {
        assert!(parse_command("").is_empty());
        assert!(parse_command("   ").is_empty());
    }

    #[test]
    fn splits_pipelines_and_chains() {
        assert_eq!(
            parse_command("cat /etc/passwd | grep root && rm -rf /tmp ; ls"),
            vec!["cat", "grep", "rm", "ls"]
        );
    }

    #[test]
    fn strips_env_assignment_and_sudo() {
        assert_eq!(parse_command("FOO=bar sudo /usr/bin/systemctl restart x"), vec!["systemctl"]);
    }

    #[test]
    fn takes_basename_after_final_slash() {
        assert_eq!(parse_command("/usr/bin/env python3"), vec!["env"]);
    }

    #[test]
    fn double_pipe_is_one_separator_not_two_singles() {
        assert_eq!(parse_command("true || false"), vec!["true", "false"]);
    }

    #[test]
    fn glob_matching_is_case_insensitive() {
        assert!(glob_match("RM", "r?"));
        assert!(glob_match("reboot", "re*"));
        assert!(!glob_match("ls", "rm"));
    }
}
