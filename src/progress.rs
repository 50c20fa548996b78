use crate::model::JobSnapshot;

/// Maps a job snapshot to a 0-100 percentage.
///
/// The server has reported progress in three shapes over time. The first one
/// present wins, in this order:
///
/// 1. `processedFiles / totalFiles`, only when `totalFiles > 0`
/// 2. `results.len() / files.len()`, only when `files` is non-empty
/// 3. `progress`, taken as an already computed percentage
///
/// A snapshot with none of them keeps `previous`, so the bar never drops back
/// to zero between polls.
pub fn normalize(job: &JobSnapshot, previous: u8) -> u8 {
    if let (Some(done), Some(total)) = (job.processed_files, job.total_files) {
        if total > 0 {
            return ratio_percent(u64::from(done), u64::from(total));
        }
    }

    if let (Some(results), Some(files)) = (&job.results, &job.files) {
        if !files.is_empty() {
            return ratio_percent(results.len() as u64, files.len() as u64);
        }
    }

    if let Some(p) = job.progress {
        if p.is_finite() {
            return p.round().clamp(0.0, 100.0) as u8;
        }
    }

    previous
}

/// Rounded `100 * done / total`, clamped to 100. `total` must be non-zero.
pub(crate) fn ratio_percent(done: u64, total: u64) -> u8 {
    let pct = (done.saturating_mul(200) + total) / (total * 2);
    pct.min(100) as u8
}
