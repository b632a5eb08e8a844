//! Staging pull-request templates, the tarball contents-overview renderer,
//! and grouped-mode approval-checkbox decoding.

use std::collections::BTreeMap;

use ingestor_types::Link2Pr;

const MEMBER_THRESHOLD: usize = 100;
const MAX_BODY_CHARS: usize = 60_000;

pub fn staging_branch_name(link2pr: &Link2Pr, sequence: u64) -> String {
    format!("staging/{}-{}-{}", link2pr.repo_dashed(), link2pr.pr, sequence)
}

pub fn individual_pr_title(cvmfs_repo: &str, artifact_name: &str) -> String {
    format!("[{cvmfs_repo}] Ingest {artifact_name}")
}

pub fn grouped_pr_title(cvmfs_repo: &str, link2pr: &Link2Pr, sequence: u64) -> String {
    format!("[{cvmfs_repo}] Staging PR #{sequence} for {}#{}", link2pr.repo, link2pr.pr)
}

/// Fills `{name}`-style placeholders in a configured body template.
pub fn render_body(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Renders a tarball's member list for inclusion in a PR body.
///
/// Below [`MEMBER_THRESHOLD`] entries every member is listed individually.
/// Above it, entries under a shared `.../init` prefix are collapsed into a
/// single note (EESSI compat-layer init trees can run to thousands of near-
/// identical paths that add nothing for a reviewer), the rest are grouped
/// into `software` / `modules` / `init` / `other` buckets, and the result is
/// capped at [`MAX_BODY_CHARS`] with a truncation footer.
pub fn contents_overview(mut members: Vec<String>) -> String {
    members.sort();

    if members.len() <= MEMBER_THRESHOLD {
        return members.join("\n");
    }

    let init_prefix = shared_init_prefix(&members);
    let visible: Vec<&String> = members
        .iter()
        .filter(|m| init_prefix.as_deref().is_none_or(|p| !m.starts_with(p)))
        .collect();
    let omitted = members.len() - visible.len();

    let mut out = String::new();
    for (bucket, items) in bucket_members(&visible) {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("**{bucket}** ({})\n", items.len()));
        for item in items {
            out.push_str(item);
            out.push('\n');
        }
        out.push('\n');
    }

    if let Some(prefix) = &init_prefix {
        out.push_str(&format!("_{omitted} entries under `{prefix}` omitted._\n"));
    }

    if out.chars().count() > MAX_BODY_CHARS {
        out = out.chars().take(MAX_BODY_CHARS).collect();
        out.push_str("\n\n_contents list truncated; see the tarball for the full listing._\n");
    }

    out
}

fn shared_init_prefix(members: &[String]) -> Option<String> {
    members.iter().find(|m| *m == "init" || m.ends_with("/init")).cloned()
}

fn bucket_members<'a>(members: &[&'a String]) -> Vec<(&'static str, Vec<&'a String>)> {
    let mut buckets: BTreeMap<&'static str, Vec<&'a String>> = BTreeMap::new();
    buckets.insert("software", Vec::new());
    buckets.insert("modules", Vec::new());
    buckets.insert("init", Vec::new());
    buckets.insert("other", Vec::new());

    for member in members {
        let bucket = if member.starts_with("software/") || member.contains("/software/") {
            "software"
        } else if member.starts_with("modules/") || member.contains("/modules/") {
            "modules"
        } else if member.starts_with("init/") || member.contains("/init/") {
            "init"
        } else {
            "other"
        };
        buckets.get_mut(bucket).unwrap().push(*member);
    }

    vec![
        ("software", buckets.remove("software").unwrap()),
        ("modules", buckets.remove("modules").unwrap()),
        ("init", buckets.remove("init").unwrap()),
        ("other", buckets.remove("other").unwrap()),
    ]
}

/// Decodes grouped-mode approval checkboxes from a PR body:
/// `- [x] path/to/artifact.tar.gz` means approved, `- [ ] ...` pending.
pub fn decode_checkboxes(body: &str) -> Vec<(String, bool)> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("- [x] ").or_else(|| line.strip_prefix("- [X] ")) {
                Some((rest.trim().to_string(), true))
            } else {
                line.strip_prefix("- [ ] ").map(|rest| (rest.trim().to_string(), false))
            }
        })
        .collect()
}

pub fn all_approved(body: &str) -> bool {
    let boxes = decode_checkboxes(body);
    !boxes.is_empty() && boxes.iter().all(|(_, checked)| *checked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link2pr() -> Link2Pr {
        Link2Pr { repo: "EESSI/software-layer".to_string(), pr: 42 }
    }

    #[test]
    fn staging_branch_embeds_repo_pr_and_sequence() {
        assert_eq!(staging_branch_name(&link2pr(), 3), "staging/EESSI-software-layer-42-3");
    }

    #[test]
    fn individual_pr_title_matches_required_format() {
        assert_eq!(individual_pr_title("cvmfs.test", "bar.tar.gz"), "[cvmfs.test] Ingest bar.tar.gz");
    }

    #[test]
    fn grouped_pr_title_matches_required_format() {
        assert_eq!(
            grouped_pr_title("cvmfs.test", &link2pr(), 3),
            "[cvmfs.test] Staging PR #3 for EESSI/software-layer#42"
        );
    }

    #[test]
    fn render_body_substitutes_placeholders() {
        let rendered = render_body("Ingesting {name} for {pr}", &[("name", "foo.tar.gz"), ("pr", "42")]);
        assert_eq!(rendered, "Ingesting foo.tar.gz for 42");
    }

    #[test]
    fn small_member_list_is_listed_verbatim() {
        let members = vec!["a".to_string(), "b".to_string()];
        assert_eq!(contents_overview(members), "a\nb");
    }

    #[test]
    fn large_member_list_is_bucketed_and_init_collapsed() {
        let mut members: Vec<String> = (0..150).map(|i| format!("software/pkg{i}")).collect();
        members.push("init".to_string());
        members.extend((0..50).map(|i| format!("init/sub{i}")));

        let overview = contents_overview(members);
        assert!(overview.contains("**software**"));
        assert!(overview.contains("entries under `init` omitted"));
        assert!(!overview.contains("init/sub0"));
    }

    #[test]
    fn decode_checkboxes_reads_checked_and_unchecked() {
        let body = "- [x] a.tar.gz\n- [ ] b.tar.gz\nnot a checkbox line\n";
        let boxes = decode_checkboxes(body);
        assert_eq!(boxes, vec![("a.tar.gz".to_string(), true), ("b.tar.gz".to_string(), false)]);
    }

    #[test]
    fn all_approved_requires_every_box_checked() {
        assert!(all_approved("- [x] a\n- [x] b\n"));
        assert!(!all_approved("- [x] a\n- [ ] b\n"));
        assert!(!all_approved("no boxes here"));
    }
}
