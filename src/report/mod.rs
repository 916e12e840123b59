//! Text and JSON rendering of search results and run summaries.

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Table};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{DownloadOutcome, RunSummary, SearchResults};

const TITLE_WIDTH: usize = 50;
const DETAIL_WIDTH: usize = 60;

/// Truncate to `max` characters, marking the cut with `...`
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn or_na(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("N/A")
}

/// Render search results as a table
pub fn render_hits(results: &SearchResults) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Query: {}", results.query);
    let _ = writeln!(out, "Total hits: {}", results.total);
    if let Some(detail) = &results.interrupted {
        let _ = writeln!(out, "Search interrupted: {}", detail);
    }

    if results.hits.is_empty() {
        out.push_str("No results.\n");
        return out;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Title", "DOI", "Year", "Source", "Cited by"]);

    for (index, hit) in results.hits.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(truncate(&hit.title, TITLE_WIDTH)).add_attribute(Attribute::Bold),
            Cell::new(or_na(hit.usable_identifier())),
            Cell::new(hit.year.map_or_else(|| "N/A".to_string(), |y| y.to_string())),
            Cell::new(truncate(&hit.source, 30)),
            Cell::new(hit.cited_by),
        ]);
    }

    let _ = writeln!(out, "{table}");
    out
}

fn outcome_detail(outcome: &DownloadOutcome) -> String {
    match (&outcome.path, &outcome.error) {
        (_, Some(error)) => truncate(error, DETAIL_WIDTH),
        (Some(path), None) => path.display().to_string(),
        (None, None) => String::new(),
    }
}

/// Render a run summary: header lines, warnings, then one row per outcome
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    if let Some(params) = summary.params() {
        let _ = writeln!(out, "Query: {}", params.query);
        let _ = writeln!(out, "Sort: {}", params.sort);
        let _ = writeln!(out, "Latest mode: {}", params.latest_mode);
        let _ = writeln!(
            out,
            "From year: {}",
            params
                .from_year
                .map_or_else(|| "N/A".to_string(), |y| y.to_string())
        );
        let _ = writeln!(
            out,
            "Quantity mode: {} | Target: {} ({:?}) | Stop policy: {}",
            params.quantity_mode, params.target, params.provenance, params.stop_policy
        );
        let _ = writeln!(
            out,
            "Search cap: {} | Attempt cap: {}",
            params.search_cap, params.attempt_cap
        );
        if let Some(cap) = params.success_cap {
            let _ = writeln!(out, "Success cap: {}", cap);
        }
        let _ = writeln!(out, "Total hits: {}", summary.total_hits());
        let _ = writeln!(out, "Scanned entries: {}", summary.scanned());
        let _ = writeln!(
            out,
            "Candidates with DOI: {} | Missing DOI: {}",
            summary.candidate_count(),
            summary.missing_identifier_count()
        );
    } else {
        let _ = writeln!(out, "Identifiers: {}", summary.candidate_count());
    }

    let fallback = summary.fallback();
    let _ = writeln!(out, "Fallback: {}", fallback.mode);
    if let Some(command) = &fallback.command {
        let _ = writeln!(out, "Fallback command: {}", command);
    }
    let _ = writeln!(
        out,
        "Downloaded: {} | Already present: {} | Attempted: {}",
        summary.succeeded(),
        summary.already_present(),
        summary.attempted()
    );

    for warning in summary.warnings() {
        let _ = writeln!(out, "Warning: {}", warning);
    }

    if summary.outcomes().is_empty() {
        return out;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "DOI", "Status", "Method", "Title", "Path / Error"]);

    for (index, outcome) in summary.outcomes().iter().enumerate() {
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(&outcome.identifier),
            Cell::new(outcome.status.as_str()).add_attribute(Attribute::Bold),
            Cell::new(outcome.method),
            Cell::new(truncate(or_na(outcome.title.as_deref()), TITLE_WIDTH)),
            Cell::new(outcome_detail(outcome)),
        ]);
    }

    let _ = writeln!(out, "\n{table}");
    out
}

/// Pretty JSON for any report
pub fn to_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}

/// Print `value` as JSON, or write it to `out` and print the path
pub fn emit_json<T: Serialize>(value: &T, out: Option<&Path>) -> std::io::Result<()> {
    let json = to_json(value)?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, json)?;
            println!("{}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
