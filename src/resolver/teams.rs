//! Team abbreviation tables.
//!
//! Tickers carry short codes ("SEA", "WAS"); the odds provider uses full
//! names. Built-in tables cover the current NFL and NBA codes. A JSON object
//! of `code → full name` can replace them without a rebuild.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::types::Sport;

const NFL_TEAMS: &[(&str, &str)] = &[
    ("ARI", "Arizona Cardinals"),
    ("ATL", "Atlanta Falcons"),
    ("BAL", "Baltimore Ravens"),
    ("BUF", "Buffalo Bills"),
    ("CAR", "Carolina Panthers"),
    ("CHI", "Chicago Bears"),
    ("CIN", "Cincinnati Bengals"),
    ("CLE", "Cleveland Browns"),
    ("DAL", "Dallas Cowboys"),
    ("DEN", "Denver Broncos"),
    ("DET", "Detroit Lions"),
    ("GB", "Green Bay Packers"),
    ("HOU", "Houston Texans"),
    ("IND", "Indianapolis Colts"),
    ("JAC", "Jacksonville Jaguars"),
    ("KC", "Kansas City Chiefs"),
    ("LA", "Los Angeles Rams"),
    ("LAC", "Los Angeles Chargers"),
    ("LV", "Las Vegas Raiders"),
    ("MIA", "Miami Dolphins"),
    ("MIN", "Minnesota Vikings"),
    ("NE", "New England Patriots"),
    ("NO", "New Orleans Saints"),
    ("NYG", "New York Giants"),
    ("NYJ", "New York Jets"),
    ("PHI", "Philadelphia Eagles"),
    ("PIT", "Pittsburgh Steelers"),
    ("SEA", "Seattle Seahawks"),
    ("SF", "San Francisco 49ers"),
    ("TB", "Tampa Bay Buccaneers"),
    ("TEN", "Tennessee Titans"),
    ("WAS", "Washington Commanders"),
];

const NBA_TEAMS: &[(&str, &str)] = &[
    ("ATL", "Atlanta Hawks"),
    ("BKN", "Brooklyn Nets"),
    ("BOS", "Boston Celtics"),
    ("CHA", "Charlotte Hornets"),
    ("CHI", "Chicago Bulls"),
    ("CLE", "Cleveland Cavaliers"),
    ("DAL", "Dallas Mavericks"),
    ("DEN", "Denver Nuggets"),
    ("DET", "Detroit Pistons"),
    ("GSW", "Golden State Warriors"),
    ("HOU", "Houston Rockets"),
    ("IND", "Indiana Pacers"),
    ("LAC", "Los Angeles Clippers"),
    ("LAL", "Los Angeles Lakers"),
    ("MEM", "Memphis Grizzlies"),
    ("MIA", "Miami Heat"),
    ("MIL", "Milwaukee Bucks"),
    ("MIN", "Minnesota Timberwolves"),
    ("NOP", "New Orleans Pelicans"),
    ("NYK", "New York Knicks"),
    ("OKC", "Oklahoma City Thunder"),
    ("ORL", "Orlando Magic"),
    ("PHI", "Philadelphia 76ers"),
    ("PHX", "Phoenix Suns"),
    ("POR", "Portland Trail Blazers"),
    ("SAC", "Sacramento Kings"),
    ("SAS", "San Antonio Spurs"),
    ("TOR", "Toronto Raptors"),
    ("UTA", "Utah Jazz"),
    ("WAS", "Washington Wizards"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamTable {
    codes: HashMap<String, String>,
}

impl TeamTable {
    pub fn new(codes: HashMap<String, String>) -> Self {
        Self { codes }
    }

    pub fn builtin(sport: Sport) -> Self {
        let entries = match sport {
            Sport::Nfl => NFL_TEAMS,
            Sport::Nba => NBA_TEAMS,
        };
        Self::new(
            entries
                .iter()
                .map(|(code, name)| (code.to_string(), name.to_string()))
                .collect(),
        )
    }

    /// Load a `{"SEA": "Seattle Seahawks", ...}` object from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AppError::MissingInput(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let codes: HashMap<String, String> = serde_json::from_str(&raw)?;
        if codes.is_empty() {
            return Err(AppError::Config(format!(
                "team table {} has no entries",
                path.display()
            )));
        }
        Ok(Self::new(codes))
    }

    /// File override when configured, otherwise the built-in table for `sport`.
    pub fn load(path: Option<&Path>, sport: Sport) -> Result<Self> {
        match path {
            Some(p) => Self::from_json_file(p),
            None => Ok(Self::builtin(sport)),
        }
    }

    pub fn full_name(&self, code: &str) -> Option<&str> {
        self.codes.get(code).map(String::as_str)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// All codes, sorted.
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.codes.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_tables_cover_each_league() {
        assert_eq!(TeamTable::builtin(Sport::Nfl).len(), 32);
        assert_eq!(TeamTable::builtin(Sport::Nba).len(), 30);
        assert_eq!(
            TeamTable::builtin(Sport::Nba).full_name("WAS"),
            Some("Washington Wizards")
        );
        assert_eq!(
            TeamTable::builtin(Sport::Nfl).full_name("WAS"),
            Some("Washington Commanders")
        );
    }

    #[test]
    fn file_table_replaces_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"TOR": "Toronto Argonauts", "MTL": "Montreal Alouettes"}}"#).unwrap();

        let table = TeamTable::load(Some(file.path()), Sport::Nfl).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.full_name("MTL"), Some("Montreal Alouettes"));
        assert!(!table.contains("SEA"));
    }

    #[test]
    fn missing_table_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = TeamTable::load(Some(&dir.path().join("nope.json")), Sport::Nfl).unwrap_err();
        assert!(matches!(err, AppError::MissingInput(_)));
    }
}
