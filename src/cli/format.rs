//! Output formatting for CLI display.

use jiff::Timestamp;

use crate::model::{Change, ChangeTag, EventKind, HistoryEntry, JobState, LogLevel, ProgressEvent};

/// Multi-line job state for `catwatch status`.
pub(super) fn format_status(state: &JobState, now: Timestamp) -> String {
    let mut lines = vec![format!("Status:    {}", state.status)];

    if let Some(job_id) = state.job_id {
        lines.push(format!("Job:       {}", &job_id.to_string()[..8]));
    }
    if state.status.is_active() || state.progress.done > 0 {
        let progress = match (state.progress.total, state.progress.percentage()) {
            (Some(total), Some(pct)) => format!("{} / {total} ({pct}%)", state.progress.done),
            _ => state.progress.done.to_string(),
        };
        lines.push(format!("Progress:  {progress}"));
    }
    if let Some(item) = &state.current_item {
        lines.push(format!("Current:   {item}"));
    }
    if state.status.is_active() {
        lines.push(format!("Elapsed:   {}", format_duration(state.elapsed_secs)));
        if let Some(remaining) = state.estimated_remaining_secs {
            lines.push(format!("Remaining: ~{}", format_duration(remaining)));
        }
    }
    if let Some(error) = &state.error {
        lines.push(format!("Error:     {error}"));
    }
    if let Some(last_run) = state.last_run {
        lines.push(format!("Last run:  {last_run}"));
    }
    if let Some(next_run) = state.next_run {
        let when = if next_run > now {
            let secs = u64::try_from(next_run.duration_since(now).as_secs()).unwrap_or(0);
            format!("in {}", format_duration(secs))
        } else {
            "due".to_string()
        };
        lines.push(format!("Next run:  {next_run} ({when})"));
    }
    lines.join("\n")
}

/// Compact duration: `45s`, `3m 5s`, `2h 0m`, `6d 23h`.
pub(super) fn format_duration(secs: u64) -> String {
    let (d, h, m, s) = (secs / 86_400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    match (d, h, m) {
        (0, 0, 0) => format!("{s}s"),
        (0, 0, _) => format!("{m}m {s}s"),
        (0, _, _) => format!("{h}h {m}m"),
        _ => format!("{d}d {h}h"),
    }
}

/// One line per finished job for `catwatch history`.
pub(super) fn format_history_entry(entry: &HistoryEntry) -> String {
    let items = if entry.new_count > 0 || entry.modified_count > 0 {
        format!(
            "{} items, {} new, {} modified",
            entry.item_count, entry.new_count, entry.modified_count
        )
    } else {
        format!("{} items", entry.item_count)
    };
    let mut parts = vec![
        entry.job_id.to_string()[..8].to_string(),
        entry.finished_at.strftime("%Y-%m-%d %H:%M").to_string(),
        format!("[{}]", entry.outcome.as_str()),
        items,
        format!("({})", format_duration(entry.duration_secs)),
    ];
    if let Some(error) = &entry.error {
        parts.push(error.clone());
    }
    parts.join("  ")
}

/// One line per change for `catwatch changes`.
pub(super) fn format_change(change: &Change) -> String {
    let record = &change.record;
    let id = record
        .resource_id
        .as_deref()
        .map(|id| format!("#{id} "))
        .unwrap_or_default();
    let version = record.version.as_deref().unwrap_or("?");

    match change.tag {
        ChangeTag::New => format!("[new]      {id}{}  {version}", record.label()),
        ChangeTag::Modified => {
            let before = change
                .previous
                .as_ref()
                .and_then(|p| p.version.as_deref())
                .unwrap_or("?");
            let date = record
                .updated_date
                .as_deref()
                .map(|d| format!("  (updated {d})"))
                .unwrap_or_default();
            format!(
                "[modified] {id}{}  {before} -> {version}{date}",
                record.label()
            )
        }
    }
}

/// One line per activity event for `catwatch log`.
pub(super) fn format_event(event: &ProgressEvent) -> String {
    let at = event.at.strftime("%Y-%m-%d %H:%M:%S");
    match &event.kind {
        EventKind::Log { message, level } => {
            let level = match level {
                LogLevel::Info => "info",
                LogLevel::Warning => "warn",
                LogLevel::Error => "error",
            };
            format!("{at}  {level:<5}  {message}")
        }
        EventKind::Progress {
            done,
            total,
            current_item,
        } => {
            let line = match total {
                Some(total) => format!("{at}  prog   {done} / {total}"),
                None => format!("{at}  prog   {done}"),
            };
            match current_item {
                Some(item) => format!("{line}  {item}"),
                None => line,
            }
        }
    }
}
