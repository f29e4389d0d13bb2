use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use admission_core::{ConversationLog, FaqRecord, RuleKeywordTable};

#[derive(Debug, Deserialize)]
struct CsvRow {
    question: String,
    answer: String,
    category: String,
    #[serde(default)]
    keywords: Option<String>,
}

impl CsvRow {
    fn into_record(self) -> FaqRecord {
        let keywords = self.keywords.and_then(|raw| {
            let parsed: Vec<String> = raw
                .split(';')
                .map(str::trim)
                .filter(|keyword| !keyword.is_empty())
                .map(ToString::to_string)
                .collect();
            if parsed.is_empty() {
                None
            } else {
                Some(parsed)
            }
        });
        FaqRecord {
            question: self.question,
            answer: self.answer,
            category: self.category,
            keywords,
        }
    }
}

// The nested-document form is either the original `{"faqs": [...]}` wrapper or
// a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FaqDocument {
    Wrapped { faqs: Vec<FaqRecord> },
    Bare(Vec<FaqRecord>),
}

/// Load FAQ records from the delimited tabular form. Keywords are a
/// semicolon-separated cell; an empty cell means "derive from the question."
///
/// # Errors
/// Fails when the file cannot be read or a row does not parse.
pub fn load_faq_csv(path: &Path) -> Result<Vec<FaqRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open FAQ CSV {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.with_context(|| format!("invalid FAQ CSV row in {}", path.display()))?;
        records.push(row.into_record());
    }
    Ok(records)
}

/// Load FAQ records from the nested-document fallback form.
///
/// # Errors
/// Fails when the file cannot be read or parsed.
pub fn load_faq_json(path: &Path) -> Result<Vec<FaqRecord>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read FAQ JSON {}", path.display()))?;
    let document: FaqDocument = serde_json::from_str(&body)
        .with_context(|| format!("failed to parse FAQ JSON {}", path.display()))?;
    Ok(match document {
        FaqDocument::Wrapped { faqs } | FaqDocument::Bare(faqs) => faqs,
    })
}

/// Load the FAQ source, preferring the tabular form and falling back to the
/// nested-document form when the CSV is absent.
///
/// # Errors
/// Fails when neither source exists or the present one does not parse; callers
/// treat this as a degradation, not a fatal error.
pub fn load_faq_records(csv_path: &Path, json_path: &Path) -> Result<Vec<FaqRecord>> {
    if csv_path.exists() {
        return load_faq_csv(csv_path);
    }
    if json_path.exists() {
        return load_faq_json(json_path);
    }
    bail!(
        "no FAQ source found (looked for {} and {})",
        csv_path.display(),
        json_path.display()
    )
}

/// Load the curated rule-keyword table from YAML. The table is independent of
/// the FAQ data and may name categories the catalog does not have.
///
/// # Errors
/// Fails when the file cannot be read or parsed.
pub fn load_rule_table(path: &Path) -> Result<RuleKeywordTable> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read rule table {}", path.display()))?;
    let table: RuleKeywordTable = serde_yaml::from_str(&body)
        .with_context(|| format!("failed to parse rule table {}", path.display()))?;
    Ok(table)
}

/// Rule table from the YAML file when present, built-in default otherwise.
///
/// # Errors
/// Fails only when the file exists but does not parse.
pub fn load_rule_table_or_default(path: &Path) -> Result<RuleKeywordTable> {
    if path.exists() {
        load_rule_table(path)
    } else {
        Ok(RuleKeywordTable::default())
    }
}

/// Persist the session's conversation log as a JSON array.
///
/// # Errors
/// Fails when the file cannot be written; callers downgrade this to a warning.
pub fn save_conversation_log(path: &Path, log: &ConversationLog) -> Result<()> {
    let body = log.to_json_pretty().context("failed to serialize conversation log")?;
    fs::write(path, body)
        .with_context(|| format!("failed to write conversation log {}", path.display()))
}

/// # Errors
/// Fails when the file cannot be read or parsed.
pub fn load_conversation_log(path: &Path) -> Result<ConversationLog> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read conversation log {}", path.display()))?;
    let log: ConversationLog = serde_json::from_str(&body)
        .with_context(|| format!("failed to parse conversation log {}", path.display()))?;
    Ok(log)
}
