//! CSV desired-state loader.
//!
//! Reads joiner, mover, leaver and lifecycle-status sheets into
//! [`DesiredStateRecord`]s. Field completeness is left to the controller so a
//! row with blanks is reported with the exact missing field.

use std::collections::BTreeMap;
use std::path::Path;

use clap::ValueEnum;
use iamsync_core::{Error, Result};
use iamsync_reconciler::{DesiredStateRecord, LifecycleAction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const USERNAME: &str = "username";
const ACTION: &str = "action";
const STATUS: &str = "status";
const GROUP: &str = "group";
const POLICY: &str = "policy";
const DEPARTMENT: &str = "department";

const KNOWN_COLUMNS: [&str; 6] = [USERNAME, ACTION, STATUS, GROUP, POLICY, DEPARTMENT];

/// Kind of sheet, which decides the action of rows without an `action`
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    /// New joiners: every row provisions.
    Provision,
    /// Role changes: every row moves.
    Mover,
    /// Departures: every row leaves.
    Leaver,
    /// `status` column: `active` moves, `inactive` leaves.
    Lifecycle,
}

/// A row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based line number in the input.
    pub line: u64,
    pub reason: String,
}

/// Records and rejected rows of one input file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedBatch {
    pub records: Vec<DesiredStateRecord>,
    pub rejected: Vec<RejectedRow>,
}

impl LoadedBatch {
    /// Rejected rows as `(label, reason)` pairs for the run report.
    pub fn rejected_entries(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.rejected
            .iter()
            .map(|row| (format!("line {}", row.line), row.reason.clone()))
    }
}

/// Load a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid CSV.
pub fn load_file(path: &Path, kind: LoaderKind) -> Result<LoadedBatch> {
    let bytes = std::fs::read(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    let batch = parse(&bytes, kind)?;
    info!(
        path = %path.display(),
        records = batch.records.len(),
        rejected = batch.rejected.len(),
        "Loaded desired state"
    );
    Ok(batch)
}

/// Parse CSV input.
///
/// # Errors
///
/// Returns an error if the input is not valid CSV or has no `username`
/// column.
pub fn parse(input: &[u8], kind: LoaderKind) -> Result<LoadedBatch> {
    let input = input.strip_prefix(UTF8_BOM).unwrap_or(input);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::csv_parse_failed(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    let columns = Columns::new(&headers)?;

    let mut batch = LoadedBatch::default();
    for row in reader.records() {
        let row = row.map_err(|e| Error::csv_parse_failed(e.to_string()))?;
        let line = row.position().map_or(0, csv::Position::line);
        let field = |index: Option<usize>| index.and_then(|i| row.get(i)).unwrap_or("");

        match determine_action(kind, field(columns.action), field(columns.status)) {
            Ok(action) => {
                let attributes = columns
                    .extra
                    .iter()
                    .filter_map(|(i, name)| {
                        row.get(*i)
                            .filter(|value| !value.is_empty())
                            .map(|value| (name.clone(), value.to_string()))
                    })
                    .collect::<BTreeMap<_, _>>();
                batch.records.push(DesiredStateRecord {
                    username: field(Some(columns.username)).to_string(),
                    action,
                    group: field(columns.group).to_string(),
                    policy: field(columns.policy).to_string(),
                    department: field(columns.department).to_string(),
                    attributes,
                });
            }
            Err(reason) => {
                warn!(line, reason = %reason, "Rejected input row");
                batch.rejected.push(RejectedRow { line, reason });
            }
        }
    }

    debug!(
        records = batch.records.len(),
        rejected = batch.rejected.len(),
        "Parsed desired-state input"
    );
    Ok(batch)
}

/// Column positions resolved from the header row.
struct Columns {
    username: usize,
    action: Option<usize>,
    status: Option<usize>,
    group: Option<usize>,
    policy: Option<usize>,
    department: Option<usize>,
    /// Non-vocabulary columns, kept as attributes under their original name.
    extra: Vec<(usize, String)>,
}

impl Columns {
    fn new(headers: &[String]) -> Result<Self> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(name))
        };
        let username = position(USERNAME)
            .ok_or_else(|| Error::csv_parse_failed("missing required column 'username'"))?;
        let extra = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| {
                !header.is_empty()
                    && !KNOWN_COLUMNS
                        .iter()
                        .any(|known| header.eq_ignore_ascii_case(known))
            })
            .map(|(i, header)| (i, header.clone()))
            .collect();

        Ok(Self {
            username,
            action: position(ACTION),
            status: position(STATUS),
            group: position(GROUP),
            policy: position(POLICY),
            department: position(DEPARTMENT),
            extra,
        })
    }
}

fn determine_action(
    kind: LoaderKind,
    explicit: &str,
    status: &str,
) -> std::result::Result<LifecycleAction, String> {
    if !explicit.is_empty() {
        return explicit
            .parse::<LifecycleAction>()
            .map_err(|e| e.to_string());
    }
    match kind {
        LoaderKind::Provision => Ok(LifecycleAction::Provision),
        LoaderKind::Mover => Ok(LifecycleAction::Move),
        LoaderKind::Leaver => Ok(LifecycleAction::Leave),
        LoaderKind::Lifecycle => match status.to_ascii_lowercase().as_str() {
            "active" => Ok(LifecycleAction::Move),
            "inactive" => Ok(LifecycleAction::Leave),
            "" => Err("missing lifecycle status".to_string()),
            _ => Err(format!(
                "unknown lifecycle status '{status}' (expected active or inactive)"
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_provision_sheet_with_bom() -> TestResult {
        let input = b"\xEF\xBB\xBFusername,group,policy,department\n\
                      alice, eng ,EngReadOnly,Engineering\n";
        let batch = parse(input, LoaderKind::Provision)?;

        assert_eq!(batch.records.len(), 1);
        let alice = &batch.records[0];
        assert_eq!(alice.username, "alice");
        assert_eq!(alice.group, "eng");
        assert_eq!(alice.action, LifecycleAction::Provision);
        assert!(alice.attributes.is_empty());
        Ok(())
    }

    #[test]
    fn test_lifecycle_status_selects_action() -> TestResult {
        let input = b"username,status,group,policy,department\n\
                      alice,Active,finance,FinanceReadOnly,Finance\n\
                      bob,inactive,,,\n\
                      carol,pending,,,\n";
        let batch = parse(input, LoaderKind::Lifecycle)?;

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].action, LifecycleAction::Move);
        assert_eq!(batch.records[1].action, LifecycleAction::Leave);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].line, 4);
        assert!(batch.rejected[0].reason.contains("pending"));
        Ok(())
    }

    #[test]
    fn test_explicit_action_wins() -> TestResult {
        let input = b"username,action\nalice,LEAVE\nbob,promote\n";
        let batch = parse(input, LoaderKind::Provision)?;

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].action, LifecycleAction::Leave);
        assert_eq!(batch.rejected.len(), 1);
        Ok(())
    }

    #[test]
    fn test_extra_columns_become_attributes() -> TestResult {
        let input = b"Username,Group,Policy,Department,CostCenter\n\
                      alice,eng,EngReadOnly,Engineering,42\n";
        let batch = parse(input, LoaderKind::Mover)?;

        let alice = &batch.records[0];
        assert_eq!(alice.group, "eng");
        assert_eq!(alice.attributes.get("CostCenter").map(String::as_str), Some("42"));
        Ok(())
    }

    #[test]
    fn test_missing_username_column_is_an_error() {
        let input = b"name,group\nalice,eng\n";
        assert!(matches!(
            parse(input, LoaderKind::Provision),
            Err(Error::CsvParseFailed { .. })
        ));
    }

    #[test]
    fn test_blank_fields_are_kept_for_validation() -> TestResult {
        let input = b"username,group,policy,department\nalice,,EngReadOnly,Engineering\n";
        let batch = parse(input, LoaderKind::Provision)?;

        assert_eq!(batch.records.len(), 1);
        assert!(batch.records[0].validate().is_err());
        Ok(())
    }
}
