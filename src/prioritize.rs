//! Reorder the records file so the next metrics pass starts with chosen members

use anyhow::Result;
use std::path::Path;
use tracing::warn;

use crate::store::{load_records, save_records};
use crate::types::PostRecord;

/// Order: unmeasured posts of `targets`, other unmeasured posts, measured posts.
/// Relative order inside each group is kept. Returns the number of prioritized posts.
pub fn prioritize(records: Vec<PostRecord>, targets: &[String]) -> (Vec<PostRecord>, usize) {
    let is_target = |r: &PostRecord| {
        r.member_name
            .as_ref()
            .is_some_and(|m| targets.iter().any(|t| t == m))
    };

    let (done, todo): (Vec<PostRecord>, Vec<PostRecord>) =
        records.into_iter().partition(|r| r.is_measured());
    let (mut ordered, other): (Vec<PostRecord>, Vec<PostRecord>) =
        todo.into_iter().partition(|r| is_target(r));

    let priority_count = ordered.len();
    ordered.extend(other);
    ordered.extend(done);
    (ordered, priority_count)
}

pub fn run_prioritize(data: &Path, targets: &[String]) -> Result<()> {
    let Some(records) = load_records(data)? else {
        warn!(path = %data.display(), "Records file not found, nothing to reorder");
        return Ok(());
    };

    let (ordered, priority_count) = prioritize(records, targets);
    save_records(data, &ordered)?;

    println!(
        "Reordered! The next metrics pass starts with {} posts of {}.",
        priority_count,
        targets.join(", ")
    );
    Ok(())
}
