// Project persistence - timestamped JSON saves under the config directory
//
// Layout: $HOME/.config/gridseq/projects/<project>/<timestamp>[_name].json
// Loading never touches the live engine on failure: the state tree is parsed
// and clamped first, and only then applied.

pub mod state;

pub use state::{apply, capture, ProjectState};

use chrono::NaiveDateTime;
use std::fs;
use std::path::PathBuf;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("config directory unavailable: {0}")]
    ConfigDir(String),

    #[error("no saves found in project {0}")]
    NoSaves(String),

    #[error("invalid save filename: {0}")]
    InvalidFilename(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One timestamped save file, for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveInfo {
    pub filename: String,
    /// Optional label parsed from the filename (empty if unnamed)
    pub name: String,
    pub timestamp: NaiveDateTime,
}

/// Root directory for all projects
pub fn projects_dir() -> Result<PathBuf, ProjectError> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| ProjectError::ConfigDir("HOME is not set".to_string()))?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("gridseq")
        .join("projects"))
}

fn project_dir(project: &str) -> Result<PathBuf, ProjectError> {
    Ok(projects_dir()?.join(project))
}

/// All project folder names, sorted
pub fn list_projects() -> Result<Vec<String>, ProjectError> {
    let dir = projects_dir()?;
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut projects = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            projects.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    projects.sort();
    Ok(projects)
}

/// Parse "<timestamp>[_name].json" into its parts
fn parse_save_filename(filename: &str) -> Option<SaveInfo> {
    let base = filename.strip_suffix(".json")?;
    if base.len() < TIMESTAMP_FORMAT.len() {
        return None;
    }
    // Timestamp is the first 19 chars: 2024-01-15_14-30-00
    let (ts_str, rest) = base.split_at(19);
    let timestamp = NaiveDateTime::parse_from_str(ts_str, TIMESTAMP_FORMAT).ok()?;
    let name = rest.strip_prefix('_').unwrap_or("").to_string();
    Some(SaveInfo {
        filename: filename.to_string(),
        name,
        timestamp,
    })
}

/// Timestamped saves of a project, newest first
pub fn list_saves(project: &str) -> Result<Vec<SaveInfo>, ProjectError> {
    let dir = project_dir(project)?;
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut saves = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        if let Some(info) = parse_save_filename(&filename) {
            saves.push(info);
        }
    }

    saves.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(saves)
}

/// Write a new timestamped save of the state tree
pub fn save_project(project: &str, state: &ProjectState) -> Result<String, ProjectError> {
    let project = if project.is_empty() { "untitled" } else { project };
    let dir = project_dir(project)?;
    fs::create_dir_all(&dir)?;

    let data = serde_json::to_string_pretty(state)?;
    let filename = format!(
        "{}.json",
        chrono::Local::now().format(TIMESTAMP_FORMAT)
    );
    fs::write(dir.join(&filename), data)?;
    Ok(filename)
}

/// Load a specific save, or the most recent one when `filename` is None.
/// The returned tree is already range-clamped.
pub fn load_project(project: &str, filename: Option<&str>) -> Result<ProjectState, ProjectError> {
    let dir = project_dir(project)?;

    let filename = match filename {
        Some(f) => f.to_string(),
        None => list_saves(project)?
            .first()
            .map(|s| s.filename.clone())
            .ok_or_else(|| ProjectError::NoSaves(project.to_string()))?,
    };

    let data = fs::read_to_string(dir.join(&filename))?;
    let mut state: ProjectState = serde_json::from_str(&data)?;
    state.clamp();
    Ok(state)
}

/// Create an empty project folder
pub fn create_project(name: &str) -> Result<(), ProjectError> {
    Ok(fs::create_dir_all(project_dir(name)?)?)
}

pub fn delete_save(project: &str, filename: &str) -> Result<(), ProjectError> {
    Ok(fs::remove_file(project_dir(project)?.join(filename))?)
}

pub fn delete_project(name: &str) -> Result<(), ProjectError> {
    Ok(fs::remove_dir_all(project_dir(name)?)?)
}

pub fn rename_project(old_name: &str, new_name: &str) -> Result<(), ProjectError> {
    Ok(fs::rename(project_dir(old_name)?, project_dir(new_name)?)?)
}

/// Change the label part of a save filename, keeping its timestamp
pub fn rename_save(project: &str, filename: &str, new_name: &str) -> Result<String, ProjectError> {
    let info = parse_save_filename(filename)
        .ok_or_else(|| ProjectError::InvalidFilename(filename.to_string()))?;

    let new_filename = if new_name.is_empty() {
        format!("{}.json", info.timestamp.format(TIMESTAMP_FORMAT))
    } else {
        format!(
            "{}_{}.json",
            info.timestamp.format(TIMESTAMP_FORMAT),
            sanitize_filename(new_name)
        )
    };

    let dir = project_dir(project)?;
    fs::rename(dir.join(filename), dir.join(&new_filename))?;
    Ok(new_filename)
}

/// Strip characters that are unsafe in filenames
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            ' ' | '/' | '\\' | ':' => Some('-'),
            '*' | '?' | '"' | '<' | '>' | '|' => None,
            c => Some(c),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_save_filename() {
        let info = parse_save_filename("2024-01-15_14-30-00.json").unwrap();
        assert_eq!(info.name, "");
        assert_eq!(
            info.timestamp,
            NaiveDateTime::parse_from_str("2024-01-15_14-30-00", TIMESTAMP_FORMAT).unwrap()
        );

        let named = parse_save_filename("2024-01-15_14-30-00_my-song.json").unwrap();
        assert_eq!(named.name, "my-song");
    }

    #[test]
    fn test_parse_rejects_non_saves() {
        assert!(parse_save_filename("notes.txt").is_none());
        assert!(parse_save_filename("readme.json").is_none());
        assert!(parse_save_filename("2024-99-99_99-99-99.json").is_none());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my song"), "my-song");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a-b-c-d");
        assert_eq!(sanitize_filename("odd*?\"<>|name"), "oddname");
    }

    #[test]
    fn test_serialization_round_trip_is_stable() {
        let state = ProjectState::default();
        let first = serde_json::to_string(&state).unwrap();
        let reparsed: ProjectState = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&reparsed).unwrap();
        assert_eq!(first, second);
    }
}
