// Static seed data: player ownership and team name aliases, loaded from CSV.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::db::{Database, OwnershipImport};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("failed to store seed data: {0}")]
    Store(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Raw CSV rows
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawOwnership {
    player: String,
    team: String,
}

#[derive(Debug, Deserialize)]
struct RawAlias {
    alias: String,
    team: String,
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

fn ownership_from_reader<R: Read>(rdr: R) -> Result<Vec<(String, String)>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut rows = Vec::new();
    for result in reader.deserialize::<RawOwnership>() {
        match result {
            Ok(raw) => {
                let player = raw.player.trim();
                let team = raw.team.trim();
                if player.is_empty() || team.is_empty() {
                    warn!("skipping ownership row with empty player or team");
                    continue;
                }
                rows.push((player.to_string(), team.to_string()));
            }
            Err(e) => warn!("skipping malformed ownership row: {}", e),
        }
    }
    Ok(rows)
}

fn aliases_from_reader<R: Read>(rdr: R) -> Result<Vec<(String, String)>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut rows = Vec::new();
    for result in reader.deserialize::<RawAlias>() {
        match result {
            Ok(raw) => rows.push((raw.alias.trim().to_string(), raw.team.trim().to_string())),
            Err(e) => warn!("skipping malformed alias row: {}", e),
        }
    }
    Ok(rows)
}

fn open(path: &Path) -> Result<std::fs::File, SeedError> {
    std::fs::File::open(path).map_err(|e| SeedError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

/// Read `player,team` rows from a CSV file.
pub fn load_ownership(path: &Path) -> Result<Vec<(String, String)>, SeedError> {
    ownership_from_reader(open(path)?).map_err(|e| SeedError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Read `alias,team` rows from a CSV file.
pub fn load_aliases(path: &Path) -> Result<Vec<(String, String)>, SeedError> {
    aliases_from_reader(open(path)?).map_err(|e| SeedError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load the ownership CSV into the store. Safe to run on every start.
pub fn seed_ownership(db: &Database, path: &Path) -> Result<OwnershipImport, SeedError> {
    let rows = load_ownership(path)?;
    let report = db.import_ownership(&rows)?;
    info!(
        path = %path.display(),
        players = report.players,
        new_links = report.links,
        created_teams = report.created_teams,
        "ownership seed loaded"
    );
    Ok(report)
}

/// Register every alias in the CSV. Aliases whose target team is unknown are
/// skipped with a warning. Returns how many were stored.
pub fn seed_aliases(db: &Database, path: &Path) -> Result<usize, SeedError> {
    let rows = load_aliases(path)?;
    let mut stored = 0;
    for (alias, team) in rows {
        match db.add_team_alias(&alias, &team) {
            Ok(()) => stored += 1,
            Err(e) => warn!(alias = %alias, team = %team, "skipping alias: {e:#}"),
        }
    }
    info!(path = %path.display(), aliases = stored, "team aliases loaded");
    Ok(stored)
}
