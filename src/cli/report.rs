use std::fmt::Write;

use ansi_term::{Colour, Style};

use crate::{
    daemon::storage::entities::HOURS_PER_DAY,
    tracking::{
        blocking::RedirectRule,
        query::{SiteAttempts, SiteTime},
    },
    utils::time::format_duration_ms,
};

const BAR_WIDTH: u64 = 30;

fn paint(colored: bool, style: Style, text: &str) -> String {
    if colored {
        style.paint(text).to_string()
    } else {
        text.to_string()
    }
}

fn bar(value: u64, max: u64) -> String {
    if max == 0 {
        return String::new();
    }
    let width = (value * BAR_WIDTH).div_ceil(max);
    "#".repeat(width as usize)
}

pub fn render_top_sites(sites: &[SiteTime], colored: bool) -> String {
    if sites.is_empty() {
        return "No browsing recorded\n".into();
    }
    let width = sites.iter().map(|v| v.domain.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (index, site) in sites.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. {:<width$}  {}",
            index + 1,
            site.domain,
            paint(colored, Colour::Green.bold(), &format_duration_ms(site.time_ms)),
        );
    }
    out
}

/// One row per hour. Busy hours are highlighted, empty hours dimmed.
pub fn render_heatmap(hours: &[u64; HOURS_PER_DAY], colored: bool) -> String {
    let max = hours.iter().copied().max().unwrap_or(0);
    let mut out = String::new();
    for (hour, count) in hours.iter().enumerate() {
        let style = match *count {
            0 => Style::new().dimmed(),
            v if v * 2 >= max => Colour::Red.bold(),
            _ => Colour::Yellow.normal(),
        };
        let row = format!("{hour:02}:00 {count:>4} {}", bar(*count, max));
        let _ = writeln!(out, "{}", paint(colored, style, row.trim_end()));
    }
    out
}

pub fn render_profile(domain: &str, hours: &[u64; HOURS_PER_DAY], colored: bool) -> String {
    let max = hours.iter().copied().max().unwrap_or(0);
    let total = hours.iter().sum::<u64>();
    let mut out = format!(
        "{} {}\n",
        paint(colored, Style::new().bold(), domain),
        format_duration_ms(total)
    );
    for (hour, time) in hours.iter().enumerate() {
        if *time == 0 {
            continue;
        }
        let _ = writeln!(
            out,
            "{hour:02}:00 {:>8} {}",
            format_duration_ms(*time),
            paint(colored, Colour::Cyan.normal(), &bar(*time, max)),
        );
    }
    out
}

pub fn render_attempts(attempts: &[SiteAttempts], colored: bool) -> String {
    if attempts.is_empty() {
        return "Block list is empty\n".into();
    }
    let width = attempts.iter().map(|v| v.domain.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in attempts {
        let style = if entry.count > 0 {
            Colour::Red.bold()
        } else {
            Style::new().dimmed()
        };
        let _ = writeln!(
            out,
            "{:<width$}  {}",
            entry.domain,
            paint(colored, style, &entry.count.to_string())
        );
    }
    out
}

pub fn render_rules(rules: &[RedirectRule]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(rules)
}

#[cfg(test)]
mod tests {
    use super::{bar, render_attempts, render_heatmap, render_profile, render_top_sites};
    use crate::tracking::query::{SiteAttempts, SiteTime};

    #[test]
    fn test_bar_scales_to_max() {
        assert_eq!(bar(10, 10).len(), 30);
        assert_eq!(bar(1, 10).len(), 3);
        assert_eq!(bar(0, 10), "");
        assert_eq!(bar(0, 0), "");
    }

    #[test]
    fn test_top_sites_plain() {
        let sites = vec![
            SiteTime {
                domain: "a.com".into(),
                time_ms: 3_900_000,
            },
            SiteTime {
                domain: "long.b.com".into(),
                time_ms: 42_000,
            },
        ];
        assert_eq!(
            render_top_sites(&sites, false),
            " 1. a.com       1h 5m\n 2. long.b.com  42s\n"
        );
        assert_eq!(render_top_sites(&[], false), "No browsing recorded\n");
    }

    #[test]
    fn test_heatmap_has_every_hour() {
        let mut hours = [0; 24];
        hours[9] = 4;
        hours[10] = 1;
        let plain = render_heatmap(&hours, false);
        let lines = plain.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 24);
        assert_eq!(lines[0], "00:00    0");
        assert_eq!(lines[9], format!("09:00    4 {}", "#".repeat(30)));

        let colored = render_heatmap(&hours, true);
        assert!(colored.contains("\u{1b}["));
    }

    #[test]
    fn test_profile_skips_empty_hours() {
        let mut hours = [0; 24];
        hours[13] = 60_000;
        let plain = render_profile("a.com", &hours, false);
        assert_eq!(
            plain,
            format!("a.com 1m 0s\n13:00    1m 0s {}\n", "#".repeat(30))
        );
    }

    #[test]
    fn test_attempts_plain() {
        let attempts = vec![SiteAttempts {
            domain: "b.com".into(),
            count: 2,
        }];
        assert_eq!(render_attempts(&attempts, false), "b.com  2\n");
        assert_eq!(render_attempts(&[], false), "Block list is empty\n");
    }
}
