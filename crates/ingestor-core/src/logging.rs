//! Builds a `tracing_subscriber::EnvFilter` directive string from the
//! `--log-scopes` / `[logging] log_scopes` mini-language: a
//! comma-separated list of `+SCOPE`, `-SCOPE` or `ALL` tokens, translated
//! to the module targets of this workspace's crates.
//!
//! Replaces the original global `LoggingScope` bitmask and call-stack
//! depth counter with ordinary per-target filtering and
//! `#[tracing::instrument]` spans: no mutable global state to keep in
//! sync with the code it observes.

const KNOWN_SCOPES: &[(&str, &str)] = &[
    ("machine", "ingestor_core::machine"),
    ("pr", "ingestor_core::pr"),
    ("scheduler", "ingestor_core::scheduler"),
    ("ingest", "ingestor_core::ingest"),
    ("objectstore", "ingestor_objectstore"),
    ("git", "ingestor_git"),
];

/// Turns a scopes expression into an `EnvFilter`-compatible directive
/// string at the given base level, e.g. `"+git,-objectstore"` at `debug`
/// becomes `"debug,ingestor_git=debug,ingestor_objectstore=off"`.
pub fn build_filter_directives(scopes: Option<&str>, base_level: &str) -> String {
    let Some(scopes) = scopes.filter(|s| !s.trim().is_empty()) else {
        return base_level.to_string();
    };

    if scopes.trim().eq_ignore_ascii_case("all") {
        return base_level.to_string();
    }

    let mut directives = vec![base_level.to_string()];
    for token in scopes.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (enabled, name) = match token.strip_prefix('-') {
            Some(rest) => (false, rest),
            None => (true, token.strip_prefix('+').unwrap_or(token)),
        };
        if let Some((_, target)) = KNOWN_SCOPES.iter().find(|(scope, _)| *scope == name) {
            let level = if enabled { base_level } else { "off" };
            directives.push(format!("{target}={level}"));
        }
    }
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_scopes_is_just_the_base_level() {
        assert_eq!(build_filter_directives(None, "info"), "info");
    }

    #[test]
    fn all_keyword_is_just_the_base_level() {
        assert_eq!(build_filter_directives(Some("ALL"), "info"), "info");
    }

    #[test]
    fn minus_prefix_disables_a_scope() {
        let directive = build_filter_directives(Some("-objectstore"), "debug");
        assert_eq!(directive, "debug,ingestor_objectstore=off");
    }

    #[test]
    fn plus_prefix_and_bare_name_both_enable_at_base_level() {
        assert_eq!(build_filter_directives(Some("+git"), "warn"), "warn,ingestor_git=warn");
        assert_eq!(build_filter_directives(Some("git"), "warn"), "warn,ingestor_git=warn");
    }

    #[test]
    fn unknown_scopes_are_ignored() {
        assert_eq!(build_filter_directives(Some("bogus"), "info"), "info");
    }
}
