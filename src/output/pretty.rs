use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::features::store::Record;
use crate::features::sync::{ItemFailure, QueueStats, SyncEvent, SyncQueueItem, SyncReport};

/// Format queue items as a pretty table
pub fn format_items_pretty(items: &[SyncQueueItem], title: &str) -> String {
    if items.is_empty() {
        return format!("{title} (0 items)\n  No items");
    }

    let mut output = format!("{title} ({} items)\n", items.len());
    output.push_str(&"─".repeat(72));
    output.push('\n');
    output.push_str(&format!(
        "{:<6} {:<8} {:<28} {:<17} {}\n",
        "ID", "Op", "Target", "Created", "Status"
    ));
    output.push_str(&"─".repeat(72));
    output.push('\n');

    for item in items {
        let status = if item.is_synced() {
            "✓ synced".green().to_string()
        } else if item.attempts > 0 {
            format!("✗ {} attempts", item.attempts).red().to_string()
        } else {
            "pending".dimmed().to_string()
        };

        output.push_str(&format!(
            "{:<6} {:<8} {:<28} {:<17} {}\n",
            item.id,
            item.operation.display_name(),
            truncate(&item.target(), 28),
            item.created_at.format("%Y-%m-%d %H:%M"),
            status
        ));

        if let Some(error) = &item.error_message {
            output.push_str(&format!("       {}\n", truncate(error, 60).red()));
        }
    }

    output
}

/// Format queue statistics
pub fn format_stats_pretty(stats: &QueueStats) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Queue Status".bold().to_string());
    lines.push("─".repeat(40));

    lines.push(format!(
        "  Pending:    {} {}",
        stats.pending,
        if stats.pending > 0 {
            "changes waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));
    lines.push(format!("  Synced:     {} {}", stats.synced, "changes".dimmed()));
    lines.push(format!(
        "  Stuck:      {} {}",
        stats.stuck,
        if stats.stuck > 0 {
            format!("failed {}+ times, need attention", stats.stuck_threshold).red()
        } else {
            "".normal()
        }
    ));

    if let Some(oldest) = stats.oldest_pending {
        lines.push(format!("  Oldest:     {}", relative_age(oldest).dimmed()));
    }

    if stats.pending > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'assessor-sync sync' to push pending changes"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Format the outcome of a sync pass
pub fn format_report_pretty(report: &SyncReport) -> String {
    if report.total == 0 {
        return "No pending changes to sync.".to_string();
    }

    let mut lines = vec![format!(
        "Synced {} of {} changes",
        report.synced_count().to_string().green(),
        report.total
    )];

    if !report.failures.is_empty() {
        lines.push(format!(
            "{} failed and will be retried on the next pass:",
            report.failures.len().to_string().red()
        ));
        for failure in &report.failures {
            lines.push(format_failure(failure));
        }
    }

    if report.pending > 0 {
        lines.push(format!("{} still pending", report.pending).dimmed().to_string());
    }

    lines.join("\n")
}

/// One line per engine event, for watch mode
pub fn format_event_pretty(event: &SyncEvent) -> String {
    let time = Utc::now().format("%H:%M:%S").to_string().dimmed();
    match event {
        SyncEvent::SyncStart => format!("{time} sync started"),
        SyncEvent::SyncProgress(p) => format!("{time}   {}/{} ({:.0}%)", p.current, p.total, p.percent),
        SyncEvent::SyncComplete {
            synced_count,
            pending,
        } => format!(
            "{time} {} synced {synced_count}, {pending} pending",
            "✓".green()
        ),
        SyncEvent::SyncError {
            errors,
            synced_count,
            fatal,
        } => match fatal {
            Some(message) => format!("{time} {} sync aborted: {message}", "✗".red()),
            None => format!(
                "{time} {} synced {synced_count}, {} failed",
                "✗".red(),
                errors.len()
            ),
        },
    }
}

fn format_failure(failure: &ItemFailure) -> String {
    let target = match &failure.record_id {
        Some(id) => format!("{}/{id}", failure.table_name),
        None => failure.table_name.clone(),
    };
    format!(
        "  #{:<5} {:<8} {}  {}",
        failure.item_id,
        failure.operation,
        target,
        failure.message.red()
    )
}

/// Format the records of a table
pub fn format_records_pretty(records: &[Record], table: &str) -> String {
    if records.is_empty() {
        return format!("{table} (0 records)\n  No records");
    }

    let mut output = format!("{table} ({} records)\n", records.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for record in records {
        let summary = serde_json::Value::Object(record.fields.clone()).to_string();
        output.push_str(&format!(
            "{}  {}\n",
            record.id.bold(),
            truncate(&summary, 60).dimmed()
        ));
    }

    output
}

/// Format a single record with one field per line
pub fn format_record_pretty(record: &Record) -> String {
    let mut output = format!("{}\n", record.id.bold());
    output.push_str(&format!(
        "  {}: {}\n",
        "Updated".dimmed(),
        record.last_updated.to_rfc3339()
    ));

    for (key, value) in &record.fields {
        let shown = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        output.push_str(&format!("  {}: {}\n", key.dimmed(), shown));
    }

    output
}

fn relative_age(since: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(since);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
