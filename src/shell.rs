//! POSIX shell quoting for commands run through `sh -c` / `bash -c` in
//! helper and project containers.

/// Quote `s` for a POSIX shell. Words made only of safe characters pass
/// through; everything else is single-quoted.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | ','))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote each argument and join them with spaces.
pub fn join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_words_pass_through() {
        assert_eq!(quote("traefik/config"), "traefik/config");
        assert_eq!(quote("a-http.yaml"), "a-http.yaml");
    }

    #[test]
    fn unsafe_words_are_quoted() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn join_quotes_each() {
        assert_eq!(join(&["rm", "-f", "my file"]), "rm -f 'my file'");
    }
}
