//! Discovers ingestible tasks in a staging bucket and bounds how many
//! re-dispatch rounds one scheduler invocation may take.

use ingestor_objectstore::ObjectSummary;
use ingestor_types::ArtifactId;

/// A payload object paired with its metadata-document sibling, found by
/// the `.tar.gz` / `.tar.gz.<ext>` naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTask {
    pub artifact: ArtifactId,
    pub metadata_key: String,
}

/// Pairs every `.tar.gz` object in `objects` with its metadata document
/// sibling, skipping payloads whose metadata hasn't landed yet.
pub fn discover_tasks(bucket: &str, objects: &[ObjectSummary], metadata_ext: &str) -> Vec<DiscoveredTask> {
    let keys: std::collections::HashSet<&str> = objects.iter().map(|o| o.key.as_str()).collect();

    objects
        .iter()
        .filter(|o| o.key.ends_with(".tar.gz"))
        .filter_map(|o| {
            let metadata_key = format!("{}.{metadata_ext}", o.key);
            keys.contains(metadata_key.as_str())
                .then(|| DiscoveredTask { artifact: ArtifactId::new(bucket, o.key.clone()), metadata_key })
        })
        .collect()
}

/// A bucket scan can surface new work as a side effect of processing
/// existing work (e.g. merging a staging PR frees up the next artifact in
/// the same group). Re-run `round` until it reports no further progress,
/// bounded so a misbehaving state store can't wedge the process in an
/// infinite loop.
pub const MAX_REDISPATCH_ROUNDS: usize = 10;

pub fn run_until_stable<F>(mut round: F) -> anyhow::Result<usize>
where
    F: FnMut() -> anyhow::Result<usize>,
{
    let mut rounds = 0;
    loop {
        let processed = round()?;
        rounds += 1;
        if processed == 0 || rounds >= MAX_REDISPATCH_ROUNDS {
            return Ok(rounds);
        }
    }
}
