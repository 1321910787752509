//! Text and JSON renderings of command results.

use crate::error::{ApiError, StorageError};
use crate::mount::MountEntry;
use crate::store::{RebuildReport, SimulationRecord};
use crate::types::{short_identity, SearchField};
use comfy_table::Table;

pub fn records_json(records: &[SimulationRecord]) -> Result<String, ApiError> {
    serde_json::to_string_pretty(records)
        .map_err(|e| ApiError::StorageError(StorageError::Serialization(e)))
}

/// Short uuid, host and name of each record.
pub fn records_table(records: &[SimulationRecord]) -> String {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["UUID", "Host", "Name", "Tags"]);
    for record in records {
        table.add_row(vec![
            short_identity(&record.uuid).to_string(),
            record.host.clone(),
            record.name.clone(),
            record.joined_tags(),
        ]);
    }
    table.to_string()
}

/// One value of `field` per line.
pub fn field_lines(records: &[SimulationRecord], field: SearchField) -> String {
    records
        .iter()
        .map(|r| r.field_display(field))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Aligned `key : value` listing of one record.
pub fn record_info(record: &SimulationRecord) -> String {
    [
        ("name", record.name.clone()),
        ("uuid", record.uuid.clone()),
        ("tags", record.joined_tags()),
        ("simcode", record.simcode.clone().unwrap_or_default()),
        ("path", record.path.display().to_string()),
    ]
    .iter()
    .map(|(key, value)| format!("{:10} : {}", key, value))
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn rebuild_summary(report: &RebuildReport) -> String {
    format!(
        "Cache rebuilt: {} simulations found in {} directories, {} vanished entries scrubbed",
        report.ingested, report.directories_visited, report.scrubbed
    )
}

/// Directory names longer than this are shortened in listings.
const SHORT_FILE_LEN: usize = 8;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Name of the directory entry
    pub file: String,
    /// Simulation name, or `file` for anything that is not a simulation
    pub name: String,
    pub tags: String,
}

/// Listing sorted by name, simulations shown as `name -> directory`.
pub fn directory_listing(entries: &[ListEntry], full_names: bool, show_tags: bool) -> String {
    let name_width = entries.iter().map(|e| e.name.chars().count()).max().unwrap_or(0);
    let tag_width = entries.iter().map(|e| e.tags.chars().count()).max().unwrap_or(0);

    let mut sorted: Vec<&ListEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.file.cmp(&b.file)));

    sorted
        .into_iter()
        .map(|entry| {
            if entry.file == entry.name {
                return entry.name.clone();
            }
            let mut line = format!("{:width$}", entry.name, width = name_width);
            if show_tags {
                line.push_str(&format!(" | {:width$}", entry.tags, width = tag_width));
            }
            line.push_str(" -> ");
            if full_names || entry.file.chars().count() <= SHORT_FILE_LEN {
                line.push_str(&entry.file);
            } else {
                line.extend(entry.file.chars().take(SHORT_FILE_LEN));
                line.push_str("...");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn mounts_table(entries: &[MountEntry]) -> String {
    if entries.is_empty() {
        return "No simloc mounts.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["#", "Endpoint", "Mount point"]);
    for (index, entry) in entries.iter().enumerate() {
        table.add_row(vec![
            index.to_string(),
            entry.source.clone(),
            entry.target.display().to_string(),
        ]);
    }
    table.to_string()
}
