// Validation constants and project-name rules

use regex::Regex;
use std::sync::OnceLock;

/// Hard ceiling on completed phase records per app session
pub const MAX_PHASES: usize = 12;

/// Bootstrap commands kept per session after dedup
pub const MAX_COMMANDS_HISTORY: usize = 10;

/// Images accepted on a single user suggestion
pub const MAX_IMAGES_PER_MESSAGE: usize = 8;

/// Decoded size ceiling per suggestion image
pub const MAX_IMAGE_SIZE_BYTES: usize = 2 * 1024 * 1024;

/// Review cycles run before finalizing an app session
pub const MAX_REVIEW_CYCLES: usize = 2;

/// Longest prefix of the user query kept when deriving a project name
pub const PROJECT_NAME_PREFIX_LEN: usize = 20;

const PROJECT_NAME_PATTERN: &str = "^[a-z0-9-_]{3,50}$";

/// Compiled project-name regex (`^[a-z0-9-_]{3,50}$`)
pub fn project_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PROJECT_NAME_PATTERN).expect("static pattern"))
}

/// Check a project name against the naming rules
pub fn is_valid_project_name(name: &str) -> bool {
    project_name_regex().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_rules() {
        assert!(is_valid_project_name("counter-app-x7f2"));
        assert!(is_valid_project_name("abc"));
        assert!(!is_valid_project_name("ab"));
        assert!(!is_valid_project_name("Has-Upper"));
        assert!(!is_valid_project_name("spaces not allowed"));
        assert!(!is_valid_project_name(&"a".repeat(51)));
    }
}
