//! Record extraction from on-disk simulation metadata.
//!
//! A directory is a simulation when one of its metadata directories carries a
//! uuid, either as `uuid.txt`, as a `uuid` file, or as the single entry of a
//! `uuid/` directory.

use crate::store::SimulationRecord;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Names of metadata directories, in lookup order.
pub const META_DIR_NAMES: [&str; 3] = ["meta", "job", ".sheep.d"];

/// Turns a directory into a simulation record, or declines.
pub trait RecordExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> std::io::Result<Option<SimulationRecord>>;

    /// Whether the walker should skip this directory entirely.
    fn is_metadata_dir(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| META_DIR_NAMES.contains(&n))
            .unwrap_or(false)
    }
}

/// Reads `name.txt`, `tags.txt`, `simcode.txt` and the uuid from the first
/// metadata directory present.
#[derive(Debug, Default, Clone)]
pub struct MetaDirExtractor;

impl MetaDirExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Walk up from `start` to the closest simulation directory.
    pub fn locate(&self, start: &Path) -> std::io::Result<Option<SimulationRecord>> {
        let start = dunce::canonicalize(start)?;
        for dir in start.ancestors() {
            if let Some(record) = self.extract(dir)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

impl RecordExtractor for MetaDirExtractor {
    fn extract(&self, path: &Path) -> std::io::Result<Option<SimulationRecord>> {
        let Some((meta_dir, uuid)) = find_uuid(path)? else {
            return Ok(None);
        };

        let name = read_trimmed(&meta_dir.join("name.txt"))?
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
        let tags = match fs::File::open(meta_dir.join("tags.txt")) {
            Ok(file) => BufReader::new(file)
                .lines()
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        let simcode = read_trimmed(&meta_dir.join("simcode.txt"))?.filter(|s| !s.is_empty());

        let mut record = SimulationRecord::new(uuid, name, path).with_tags(tags);
        record.simcode = simcode;
        Ok(Some(record))
    }
}

fn read_trimmed(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn first_line(path: &Path) -> std::io::Result<Option<String>> {
    let file = fs::File::open(path)?;
    let line = BufReader::new(file).lines().next().transpose()?;
    Ok(line.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()))
}

/// Locate the metadata directory and the uuid stored in it.
fn find_uuid(dir: &Path) -> std::io::Result<Option<(PathBuf, String)>> {
    for meta_name in META_DIR_NAMES {
        let meta_dir = dir.join(meta_name);
        let uuid_entry = meta_dir.join("uuid");
        let uuid_file = meta_dir.join("uuid.txt");

        if uuid_entry.is_file() {
            if let Some(uuid) = first_line(&uuid_entry)? {
                return Ok(Some((meta_dir, uuid)));
            }
        } else if uuid_entry.is_dir() {
            let mut names: Vec<String> = fs::read_dir(&uuid_entry)?
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            if let Some(uuid) = names.into_iter().next() {
                return Ok(Some((meta_dir, uuid)));
            }
        } else if uuid_file.is_file() {
            if let Some(uuid) = first_line(&uuid_file)? {
                return Ok(Some((meta_dir, uuid)));
            }
        }
    }
    Ok(None)
}
