use echelon_cmdline::command_words;

/// Classifies command exit codes into success or failure.
///
/// Search tools exit 1 to mean "no matches", which callers almost never want
/// reported as a failure. The families that get this leniency are
/// configuration, not hardcoded substrings: a family name matches only the
/// basename of a command word (the first token of the string or of an
/// operator-separated segment), so `echo grep` is not lenient but
/// `/usr/bin/grep x | wc -l` is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    lenient_families: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(Self::default_families())
    }
}

impl CommandPolicy {
    pub fn new(lenient_families: Vec<String>) -> Self {
        Self { lenient_families }
    }

    /// Families lenient out of the box.
    pub fn default_families() -> Vec<String> {
        ["grep", "egrep", "fgrep", "rg"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Whether any segment of `command` runs a lenient-family program.
    pub fn is_lenient(&self, command: &str) -> bool {
        command_words(command).iter().any(|word| {
            let base = word.rsplit('/').next().unwrap_or(word);
            self.lenient_families.iter().any(|family| family == base)
        })
    }

    /// Derive the success flag for a finished command.
    ///
    /// Exit 0 always succeeds; exit 1 succeeds only for lenient-family
    /// commands; everything else fails.
    pub fn success_for(&self, command: &str, exit_code: i32) -> bool {
        match exit_code {
            0 => true,
            1 => self.is_lenient(command),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_zero_always_succeeds() {
        let policy = CommandPolicy::default();
        assert!(policy.success_for("false", 0));
        assert!(policy.success_for("grep x", 0));
    }

    #[test]
    fn test_search_family_exit_one_succeeds() {
        let policy = CommandPolicy::default();
        assert!(policy.success_for("grep missing file.txt", 1));
        assert!(policy.success_for("rg -n TODO src", 1));
    }

    #[test]
    fn test_search_family_exit_two_fails() {
        let policy = CommandPolicy::default();
        assert!(!policy.success_for("grep missing no-such-file", 2));
    }

    #[test]
    fn test_non_family_exit_one_fails() {
        let policy = CommandPolicy::default();
        assert!(!policy.success_for("ls /does/not/exist", 1));
    }

    #[test]
    fn test_family_matched_by_basename() {
        let policy = CommandPolicy::default();
        assert!(policy.success_for("/usr/bin/grep pattern file", 1));
        assert!(policy.success_for("/opt/tools/rg pattern", 1));
    }

    #[test]
    fn test_family_in_argument_position_does_not_match() {
        let policy = CommandPolicy::default();
        assert!(!policy.success_for("echo grep", 1));
        assert!(!policy.success_for("which grep", 1));
    }

    #[test]
    fn test_family_anywhere_in_pipeline_matches() {
        let policy = CommandPolicy::default();
        assert!(policy.success_for("cat log.txt | grep ERROR", 1));
        assert!(policy.success_for("grep -c x f && echo found", 1));
    }

    #[test]
    fn test_custom_families() {
        let policy = CommandPolicy::new(vec!["findstr".to_string()]);
        assert!(policy.success_for("findstr /i error log.txt", 1));
        assert!(!policy.success_for("grep x", 1));
    }
}
