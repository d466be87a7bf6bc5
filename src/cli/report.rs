use std::fmt::Write;

use ansi_term::{Colour, Style};
use chrono::{DateTime, Utc};

use crate::{
    domain::SiteBlacklist,
    host::{
        analytics::{AnalyticsSummary, Period},
        storage::entities::SiteTimers,
    },
    utils::time::{elapsed_seconds, format_time},
};

fn heading(text: &str) -> String {
    Style::new().bold().paint(text).to_string()
}

fn muted(text: &str) -> String {
    Colour::Fixed(244).paint(text).to_string()
}

/// One line per stored timer, longest running first.
pub fn sites_report(
    timers: &SiteTimers,
    blacklist: &SiteBlacklist,
    now: DateTime<Utc>,
    show_seconds: bool,
) -> String {
    if timers.is_empty() {
        return muted("No site timers");
    }

    let mut rows = timers
        .iter()
        .map(|(site, start)| (site, elapsed_seconds(start, now)))
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = heading("Site timers");
    for (site, elapsed) in rows {
        let _ = write!(out, "\n{}\t{site}", format_time(elapsed as i64, show_seconds));
        if blacklist.contains(site) {
            let _ = write!(out, "\t{}", muted("(blacklisted)"));
        }
    }
    out
}

pub fn analytics_report(summary: &AnalyticsSummary, period: Period) -> String {
    let title = match period {
        Period::Daily => "Today",
        Period::Weekly => "Last 7 days",
        Period::Monthly => "Last 30 days",
    };
    let mut out = heading(title);
    if summary.site_count == 0 {
        let _ = write!(out, "\n{}", muted("No usage recorded"));
        return out;
    }

    let _ = write!(out, "\nTotal time\t{}", format_time(summary.total_time as i64, false));
    let _ = write!(
        out,
        "\nDaily average\t{}",
        format_time(summary.daily_average as i64, false)
    );
    let _ = write!(out, "\nSites visited\t{}", summary.site_count);
    if let Some((site, seconds)) = &summary.most_visited {
        let _ = write!(
            out,
            "\nMost visited\t{site} ({})",
            format_time(*seconds as i64, false)
        );
    }

    let _ = write!(out, "\n\n{}", heading("Sites"));
    for (site, seconds) in &summary.sites {
        let percentage = *seconds as f64 * 100.0 / summary.total_time as f64;
        let _ = write!(
            out,
            "\n{}\t{}%\t{site}",
            format_time(*seconds as i64, false),
            percentage as i32
        );
    }

    if summary.trend.len() > 1 {
        let _ = write!(out, "\n\n{}", heading("Daily totals"));
        for (day, seconds) in &summary.trend {
            let _ = write!(out, "\n{day}\t{}", format_time(*seconds as i64, false));
        }
    }
    out
}

pub fn blacklist_report(blacklist: &SiteBlacklist) -> String {
    if blacklist.entries().is_empty() {
        return muted("Blacklist is empty");
    }
    let mut out = heading("Blacklisted sites");
    for entry in blacklist.entries() {
        let _ = write!(out, "\n{entry}");
    }
    out
}
