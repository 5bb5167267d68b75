//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use rbk_store::LoadReport;
use rbk_types::{OutputFormat, RollbackInfo, RollbackRecord, RollbackState};
use serde::Serialize;
use std::io;
use std::path::PathBuf;

/// Findings of `rbk verify`
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub records: usize,
    pub next_id: u64,
    /// Rollbacks with a commit journal on disk
    pub commits_in_flight: Vec<u64>,
    pub corrupt: Vec<CorruptEntry>,
    pub stray_temps: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct CorruptEntry {
    pub path: PathBuf,
    pub message: String,
}

impl VerifyReport {
    pub fn new(report: &LoadReport, next_id: u64) -> Self {
        Self {
            records: report.records.len(),
            next_id,
            commits_in_flight: report.journals.iter().map(|j| j.rollback_id.get()).collect(),
            corrupt: report
                .corrupt
                .iter()
                .map(|c| CorruptEntry {
                    path: c.path.clone(),
                    message: c.error.to_string(),
                })
                .collect(),
            stray_temps: report.stray_temps.clone(),
        }
    }

    pub fn problems(&self) -> usize {
        self.corrupt.len() + self.stray_temps.len() + self.commits_in_flight.len()
    }
}

/// Output renderer for CLI results
#[derive(Clone, Copy)]
pub struct OutputRenderer {
    format: OutputFormat,
}

impl OutputRenderer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn render_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        println!("{json}");
        Ok(())
    }

    /// Render a list of rollbacks
    pub fn render_rollbacks(&self, rollbacks: &[RollbackInfo], empty: &str) -> io::Result<()> {
        if self.format == OutputFormat::Json {
            return Self::render_json(rollbacks);
        }
        if rollbacks.is_empty() {
            println!("{empty}");
            return Ok(());
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Packages").add_attribute(Attribute::Bold),
            Cell::new("Staged").add_attribute(Attribute::Bold),
            Cell::new("Caused by").add_attribute(Attribute::Bold),
        ]);
        for info in rollbacks {
            table.add_row(vec![
                Cell::new(info.id),
                Cell::new(package_lines(info)),
                Cell::new(if info.is_staged { "yes" } else { "no" }),
                Cell::new(cause_line(info)),
            ]);
        }

        println!("{table}");
        Ok(())
    }

    /// Render full records, e.g. quarantined entries
    pub fn render_records(&self, records: &[RollbackRecord], empty: &str) -> io::Result<()> {
        if self.format == OutputFormat::Json {
            return Self::render_json(records);
        }
        if records.is_empty() {
            println!("{empty}");
            return Ok(());
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("State").add_attribute(Attribute::Bold),
            Cell::new("Packages").add_attribute(Attribute::Bold),
            Cell::new("Failure").add_attribute(Attribute::Bold),
        ]);
        for record in records {
            table.add_row(vec![
                Cell::new(record.id()),
                state_cell(record.state),
                Cell::new(package_lines(&record.info)),
                Cell::new(record.failure.as_deref().unwrap_or("-")),
            ]);
        }

        println!("{table}");
        Ok(())
    }

    /// Render one record in detail
    pub fn render_record(&self, record: &RollbackRecord) -> io::Result<()> {
        if self.format == OutputFormat::Json {
            return Self::render_json(record);
        }

        println!("Rollback {}", record.id());
        println!();
        println!("State:     {}", record.state);
        println!("Created:   {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(at) = record.available_at {
            println!("Available: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(at) = record.committed_at {
            println!("Committed: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(session) = record.info.committed_session_id {
            println!("Session:   {session}");
        }
        println!("Staged:    {}", if record.info.is_staged { "yes" } else { "no" });
        if let Some(failure) = &record.failure {
            println!("Failure:   {failure}");
        }
        println!();
        println!("Packages:");
        for package in &record.info.packages {
            println!("  {package}");
        }
        if !record.info.cause_packages.is_empty() {
            println!("Caused by: {}", cause_line(&record.info));
        }
        Ok(())
    }

    /// Render verification findings
    pub fn render_verify(&self, report: &VerifyReport) -> io::Result<()> {
        if self.format == OutputFormat::Json {
            return Self::render_json(report);
        }

        println!("Records:      {}", report.records);
        println!("Next id:      {}", report.next_id);
        if report.problems() == 0 {
            println!("[OK] Rollback data is consistent.");
            return Ok(());
        }

        for entry in &report.corrupt {
            println!("[CORRUPT] {}: {}", entry.path.display(), entry.message);
        }
        for path in &report.stray_temps {
            println!("[STRAY]   {}", path.display());
        }
        for id in &report.commits_in_flight {
            println!("[JOURNAL] commit of rollback {id} was interrupted");
        }
        Ok(())
    }
}

fn package_lines(info: &RollbackInfo) -> String {
    info.packages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn cause_line(info: &RollbackInfo) -> String {
    if info.cause_packages.is_empty() {
        return "-".to_string();
    }
    info.cause_packages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn state_cell(state: RollbackState) -> Cell {
    let cell = Cell::new(state);
    match state {
        RollbackState::Available | RollbackState::Committed => cell.fg(Color::Green),
        RollbackState::Enabled => cell.fg(Color::Yellow),
        RollbackState::PartiallyApplied => cell.fg(Color::Red),
        RollbackState::Expired | RollbackState::Cancelled => cell.fg(Color::DarkGrey),
    }
}
