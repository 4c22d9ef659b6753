//! `validate-conflicts`: compare an incoming register against what is already
//! on file.
//!
//! Drawing numbers are matched on a normalised key so that `A_101 (2).pdf`,
//! `ARCH-101-REV-B` and `AR 101` all land on `AR-101`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use docket_core::{Job, JobError};
use docket_infra::jobs::{decode_payload, JobContext, JobHandler};

const EXTENSIONS: &[&str] = &[
    ".PDF", ".DWG", ".DXF", ".DWF", ".RVT", ".IFC", ".XLSX", ".XLS", ".CSV", ".DOCX", ".DOC",
    ".ZIP", ".PNG", ".JPG", ".JPEG", ".TIF", ".TIFF",
];
const SUFFIX_WORDS: &[&str] = &["DRAFT", "COPY", "FINAL", "SUPERSEDED"];

/// Canonical discipline codes and the spellings that map onto them.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("AR", &["ARC", "ARCH", "ARCHITECTURAL", "ARCHITECTURE"]),
    ("ST", &["STR", "STRUCT", "STRUCTURAL", "STRUCTURE"]),
    ("ME", &["MEC", "MECH", "MECHANICAL"]),
    ("EL", &["ELE", "ELEC", "ELECTRICAL"]),
    ("CI", &["CIV", "CIVIL"]),
    ("GN", &["GEN", "GENERAL"]),
];

fn strip_extension(key: &str) -> &str {
    EXTENSIONS
        .iter()
        .find_map(|ext| key.strip_suffix(ext))
        .unwrap_or(key)
}

fn is_copy_number(seg: &str) -> bool {
    seg.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn is_revision_tag(seg: &str) -> bool {
    if let Some(rev) = seg.strip_prefix("REV") {
        return !rev.is_empty() && rev.len() <= 3 && rev.chars().all(|c| c.is_ascii_alphanumeric());
    }
    match seg.strip_prefix('R') {
        Some(rev) if rev.len() == 1 => rev.chars().all(|c| c.is_ascii_alphanumeric()),
        Some(rev) => !rev.is_empty() && rev.len() <= 3 && rev.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Number of trailing segments that are noise (copy markers, revision tags).
fn trailing_noise(segments: &[&str]) -> usize {
    match segments {
        [.., "REV", rev] if rev.chars().all(|c| c.is_ascii_alphanumeric()) && rev.len() <= 3 => 2,
        [.., last] if SUFFIX_WORDS.contains(last) || is_copy_number(last) || is_revision_tag(last) => 1,
        _ => 0,
    }
}

fn canonical_category(seg: &str, first: bool) -> Option<&'static str> {
    CATEGORIES.iter().find_map(|(code, aliases)| {
        let single = first && seg.len() == 1 && code.starts_with(seg);
        (aliases.contains(&seg) || single).then_some(*code)
    })
}

/// Normalised drawing key used to match incoming rows to existing files.
pub fn normalize_drawing_key(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let stem = strip_extension(&upper);

    let unified: String = stem
        .chars()
        .map(|c| match c {
            ' ' | '_' | '.' | '/' | '\\' => '-',
            other => other,
        })
        .collect();

    let mut segments: Vec<&str> = unified
        .split('-')
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, seg)| canonical_category(seg, i == 0).unwrap_or(seg))
        .collect();

    loop {
        let noise = trailing_noise(&segments);
        if noise == 0 || noise >= segments.len() {
            break;
        }
        segments.truncate(segments.len() - noise);
    }

    segments.join("-")
}

fn preliminary_number(rev: &str) -> Option<u64> {
    rev.strip_prefix('P').and_then(|n| n.parse().ok())
}

/// Total order over revision labels.
///
/// Numbers compare numerically; preliminary `P<n>` revisions precede every
/// issued revision; everything else compares by length, then text, so `Z`
/// sorts before `AA`. A missing revision sorts first.
pub fn compare_revisions(a: &str, b: &str) -> Ordering {
    let a = a.trim().to_uppercase();
    let b = b.trim().to_uppercase();

    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    match (preliminary_number(&a), preliminary_number(&b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(&b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => {
            let (x, y) = (significant(&a), significant(&b));
            x.len()
                .cmp(&y.len())
                .then_with(|| x.cmp(y))
                .then_with(|| a.cmp(&b))
        }
    }
}

/// Digits without leading zeros, so length-then-text matches numeric order.
fn significant(rev: &str) -> &str {
    if rev.bytes().all(|b| b.is_ascii_digit()) {
        match rev.trim_start_matches('0') {
            "" => "0",
            digits => digits,
        }
    } else {
        rev
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingRow {
    pub drawing_no: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingFile {
    pub drawing_no: String,
    #[serde(default)]
    pub revision: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    rows: Vec<IncomingRow>,
    #[serde(default)]
    existing: Vec<ExistingFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictReason {
    /// Same revision as the latest file on record
    Duplicate,
    /// Older than the latest file on record
    Outdated,
    /// Key already seen earlier in the same batch
    DuplicateInBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub drawing_no: String,
    pub key: String,
    pub reason: ConflictReason,
    pub incoming_revision: Option<String>,
    pub existing_revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
    pub latest: BTreeMap<String, ExistingFile>,
    pub checked: usize,
    pub skipped: usize,
}

/// Latest existing file per normalised key.
#[derive(Debug, Default, Clone)]
pub struct LatestIndex {
    by_key: HashMap<String, ExistingFile>,
}

impl LatestIndex {
    pub fn build<'a>(existing: impl IntoIterator<Item = &'a ExistingFile>) -> Self {
        let mut by_key: HashMap<String, ExistingFile> = HashMap::new();
        for file in existing {
            let key = normalize_drawing_key(&file.drawing_no);
            if key.is_empty() {
                continue;
            }
            let newer = by_key.get(&key).is_none_or(|current| {
                file.uploaded_at.cmp(&current.uploaded_at).then_with(|| {
                    compare_revisions(
                        file.revision.as_deref().unwrap_or_default(),
                        current.revision.as_deref().unwrap_or_default(),
                    )
                }) == Ordering::Greater
            });
            if newer {
                by_key.insert(key, file.clone());
            }
        }
        Self { by_key }
    }

    pub fn get(&self, key: &str) -> Option<&ExistingFile> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Classify incoming rows in order.
    pub fn check(&self, rows: &[IncomingRow]) -> ConflictReport {
        let mut seen: HashMap<String, Option<String>> = HashMap::new();
        let mut conflicts = Vec::new();
        let mut checked = 0;
        let mut skipped = 0;

        for row in rows {
            let key = normalize_drawing_key(&row.drawing_no);
            if key.is_empty() {
                skipped += 1;
                continue;
            }
            checked += 1;

            let incoming = row.revision.as_deref().unwrap_or_default();
            let conflict = |reason, existing_revision: Option<String>| Conflict {
                drawing_no: row.drawing_no.clone(),
                key: key.clone(),
                reason,
                incoming_revision: row.revision.clone(),
                existing_revision,
            };

            if let Some(earlier) = seen.get(&key) {
                conflicts.push(conflict(ConflictReason::DuplicateInBatch, earlier.clone()));
                continue;
            }

            if let Some(existing) = self.by_key.get(&key) {
                let on_file = existing.revision.as_deref().unwrap_or_default();
                match compare_revisions(incoming, on_file) {
                    Ordering::Equal => conflicts
                        .push(conflict(ConflictReason::Duplicate, existing.revision.clone())),
                    Ordering::Less => conflicts
                        .push(conflict(ConflictReason::Outdated, existing.revision.clone())),
                    Ordering::Greater => {}
                }
            }

            seen.insert(key, row.revision.clone());
        }

        ConflictReport {
            conflicts,
            latest: self
                .by_key
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            checked,
            skipped,
        }
    }
}

pub struct ValidateConflicts;

#[async_trait::async_trait]
impl JobHandler for ValidateConflicts {
    async fn handle(&self, job: &Job, _ctx: &JobContext) -> Result<JsonValue, JobError> {
        let payload: Payload = decode_payload(job)?;
        let report = LatestIndex::build(&payload.existing).check(&payload.rows);
        serde_json::to_value(report).map_err(|e| JobError::failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn existing(drawing_no: &str, revision: &str, day: u32) -> ExistingFile {
        ExistingFile {
            drawing_no: drawing_no.to_string(),
            revision: Some(revision.to_string()),
            uploaded_at: Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap(),
        }
    }

    fn row(drawing_no: &str, revision: &str) -> IncomingRow {
        IncomingRow {
            drawing_no: drawing_no.to_string(),
            revision: Some(revision.to_string()),
            date: None,
        }
    }

    #[test]
    fn normalises_noise_away() {
        let cases = [
            ("AR-101", "AR-101"),
            ("ar_101.pdf", "AR-101"),
            ("ARCH 101 (2)", "AR-101"),
            ("A-101-REV-B", "AR-101"),
            ("Architectural/101_R3.dwg", "AR-101"),
            ("ST-200-DRAFT", "ST-200"),
            ("struct.200 - copy", "ST-200"),
            ("ME-300-REVC-FINAL", "ME-300"),
            ("  elec-12-superseded ", "EL-12"),
            ("GEN-001", "GN-001"),
            ("CIVIL-9-R12", "CI-9"),
        ];
        for (raw, expected) in cases {
            assert_eq!(normalize_drawing_key(raw), expected, "input {raw:?}");
        }
    }

    #[test]
    fn lone_noise_segment_is_kept() {
        assert_eq!(normalize_drawing_key("DRAFT"), "DRAFT");
        assert_eq!(normalize_drawing_key("REV-A"), "REV-A");
        assert_eq!(normalize_drawing_key(""), "");
    }

    #[test]
    fn revision_ordering() {
        use Ordering::*;
        assert_eq!(compare_revisions("2", "10"), Less);
        assert_eq!(compare_revisions("P3", "A"), Less);
        assert_eq!(compare_revisions("P2", "P10"), Less);
        assert_eq!(compare_revisions("Z", "AA"), Less);
        assert_eq!(compare_revisions("b", "B"), Equal);
        assert_eq!(compare_revisions("", "P1"), Less);
        assert_eq!(compare_revisions("C01", "C02"), Less);
    }

    #[test]
    fn latest_upload_wins() {
        let files = vec![
            existing("AR-101", "C", 1),
            existing("ar_101.pdf", "B", 5),
            existing("ST-1", "A", 2),
        ];
        let index = LatestIndex::build(&files);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("AR-101").unwrap().revision.as_deref(), Some("B"));
    }

    #[test]
    fn classifies_rows() {
        let files = vec![existing("AR-101", "B", 1), existing("ST-200", "C", 1)];
        let rows = vec![
            row("AR-101", "B"),
            row("ST 200", "A"),
            row("ME-1", "A"),
            row("me_1.pdf", "A"),
            row("ST-200", "D"),
            row("   ", "A"),
        ];

        let report = LatestIndex::build(&files).check(&rows);
        let reasons: Vec<_> = report
            .conflicts
            .iter()
            .map(|c| (c.drawing_no.as_str(), c.reason))
            .collect();

        assert_eq!(
            reasons,
            vec![
                ("AR-101", ConflictReason::Duplicate),
                ("ST 200", ConflictReason::Outdated),
                ("me_1.pdf", ConflictReason::DuplicateInBatch),
                ("ST-200", ConflictReason::DuplicateInBatch),
            ]
        );
        assert_eq!(report.checked, 5);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            serde_json::to_value(report.conflicts[2].reason).unwrap(),
            "duplicate-in-batch"
        );
    }

    fn revision() -> impl Strategy<Value = String> {
        prop_oneof![
            "[0-9]{1,3}",
            "P[0-9]{1,2}",
            "[A-Z]{1,2}",
            "[A-Z][0-9]{2}",
        ]
    }

    proptest! {
        #[test]
        fn normalisation_is_idempotent(raw in "[A-Za-z0-9 _./()-]{0,24}") {
            let once = normalize_drawing_key(&raw);
            prop_assert_eq!(normalize_drawing_key(&once), once);
        }

        #[test]
        fn revision_order_is_antisymmetric(a in revision(), b in revision()) {
            prop_assert_eq!(compare_revisions(&a, &b), compare_revisions(&b, &a).reverse());
        }

        #[test]
        fn revision_order_is_transitive(a in revision(), b in revision(), c in revision()) {
            let mut v = vec![a, b, c];
            v.sort_by(|x, y| compare_revisions(x, y));
            prop_assert_ne!(compare_revisions(&v[0], &v[2]), Ordering::Greater);
            prop_assert_ne!(compare_revisions(&v[0], &v[1]), Ordering::Greater);
            prop_assert_ne!(compare_revisions(&v[1], &v[2]), Ordering::Greater);
        }
    }
}
