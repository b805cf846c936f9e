//! 📊 The end-of-run table. Numbers with commas, because "1000000 docs" is a war crime.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use stashx::StatsSnapshot;

/// 🔢 "1000000" → "1,000,000"
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

pub(crate) fn render(stats: &StatsSnapshot, skipped: u64, elapsed: Duration) -> Table {
    let rows = [
        ("appended", stats.appended),
        ("skipped input lines", skipped),
        ("rejected", stats.rejected),
        ("formatted", stats.formatted),
        ("format failures", stats.format_failures),
        ("pushes", stats.pushes),
        ("pushed documents", stats.pushed_documents),
        ("failed pushes", stats.failed_pushes),
        ("dropped documents", stats.dropped_documents),
    ];

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(format_number(value)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.add_row(vec![
        Cell::new("elapsed"),
        Cell::new(format_duration(elapsed)).set_alignment(CellAlignment::Right),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_an_hour_grows_a_third_column() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_the_table_shows_every_counter() {
        let stats = StatsSnapshot {
            appended: 1_500,
            pushed_documents: 1_499,
            dropped_documents: 1,
            ..StatsSnapshot::default()
        };
        let rendered = render(&stats, 2, Duration::from_secs(3)).to_string();
        assert!(rendered.contains("1,500"));
        assert!(rendered.contains("dropped documents"));
        assert!(rendered.contains("00:03"));
    }
}
