//! Formatting utilities for table output and age display

use chrono::{DateTime, Utc};

/// Format an age in whole seconds as a human-readable string.
///
/// Breakpoints: under 60s → seconds, under 1h → minutes, under 1d → hours,
/// otherwise days. Always truncates, never rounds (3599s is "59m", 3600s is
/// "1h").
pub fn format_age_secs(secs: i64) -> String {
    if secs < 0 {
        return "0s".to_string();
    }
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Format a creation timestamp as an age relative to now
pub fn format_age(timestamp: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*timestamp).num_seconds();
    format_age_secs(secs)
}

/// Print rows as a column-aligned table with headers.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        println!("{}", headers.join("  "));
        return;
    }

    let num_cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < num_cols {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:<width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_line.join("  "));

    for row in rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:<width$}", cell, width = w)
            })
            .collect();
        println!("{}", line.join("  "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn age_unit_boundaries_truncate() {
        // Each boundary flips units exactly at the breakpoint
        assert_eq!(format_age_secs(59), "59s");
        assert_eq!(format_age_secs(60), "1m");
        assert_eq!(format_age_secs(3599), "59m");
        assert_eq!(format_age_secs(3600), "1h");
        assert_eq!(format_age_secs(86399), "23h");
        assert_eq!(format_age_secs(86400), "1d");
    }

    #[test]
    fn age_truncates_not_rounds() {
        assert_eq!(format_age_secs(119), "1m");
        assert_eq!(format_age_secs(7199), "1h");
        assert_eq!(format_age_secs(172799), "1d");
    }

    #[test]
    fn age_zero_and_future() {
        assert_eq!(format_age_secs(0), "0s");
        // Clock skew can put creation in the future; clamp rather than panic
        assert_eq!(format_age_secs(-5), "0s");
    }

    #[test]
    fn age_from_timestamp() {
        let ts = Utc::now() - Duration::minutes(12);
        assert_eq!(format_age(&ts), "12m");
    }

    #[test]
    fn age_from_timestamp_days() {
        let ts = Utc::now() - Duration::days(7);
        assert_eq!(format_age(&ts), "7d");
    }
}
