use std::collections::HashSet;

use crate::error::ProcessError;
use crate::processor::{CleanRecord, DedupOutcome, RawRecord, RecordProcessor};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Required columns as `(export header, English alias)`.
const COLUMNS: [(&str, &str); 6] = [
    ("URL", "url"),
    ("来源名称", "source_name"),
    ("作者用户名称", "author"),
    ("标题", "title"),
    ("命中句子", "hit_sentence"),
    ("语言", "language"),
];

/// Decodes upload bytes as UTF-8 or BOM-marked UTF-16.
pub fn decode(bytes: &[u8]) -> Result<String, ProcessError> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return std::str::from_utf8(rest)
            .map(str::to_string)
            .map_err(|e| ProcessError::Decode(e.to_string()));
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ProcessError::Decode(format!("upload is not valid UTF-8 ({})", e)))
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Result<String, ProcessError> {
    if bytes.len() % 2 != 0 {
        return Err(ProcessError::Decode(
            "UTF-16 payload has an odd number of bytes".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| ProcessError::Decode(e.to_string()))
}

/// Treats blank and `nan`/`null` placeholders as absent.
fn clean_value(value: Option<&String>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") || value.eq_ignore_ascii_case("null")
    {
        None
    } else {
        Some(value.to_string())
    }
}

/// Canonical form used to compare hit sentences.
pub fn normalize_sentence(sentence: &str) -> String {
    sentence.trim().replace("\r\n", "\n").replace('\r', "\n")
}

/// Default record processor for CSV media exports.
#[derive(Debug, Default, Clone)]
pub struct CsvRecordProcessor;

impl CsvRecordProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Resolves each required column to the header that carries it.
    fn map_columns<'a>(headers: &[&'a String]) -> Result<Vec<&'a String>, ProcessError> {
        let mut mapped = Vec::with_capacity(COLUMNS.len());
        let mut missing = Vec::new();

        for (name, alias) in COLUMNS {
            let found = headers
                .iter()
                .find(|h| h.as_str() == name)
                .or_else(|| headers.iter().find(|h| h.eq_ignore_ascii_case(alias)));
            match found {
                Some(header) => mapped.push(*header),
                None => missing.push(name.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(mapped)
        } else {
            Err(ProcessError::MissingColumns(missing))
        }
    }
}

impl RecordProcessor for CsvRecordProcessor {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<RawRecord>, ProcessError> {
        let text = decode(bytes)?;
        let mut reader = ::csv::ReaderBuilder::new()
            .flexible(true)
            .trim(::csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ProcessError::CsvParse(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| ProcessError::CsvParse(e.to_string()))?;
            if row.iter().all(str::is_empty) {
                continue;
            }
            let record: RawRecord = headers
                .iter()
                .cloned()
                .zip(row.iter().map(str::to_string))
                .collect();
            records.push(record);
        }

        if records.is_empty() {
            return Err(ProcessError::EmptyData);
        }
        log::debug!("Parsed {} rows with {} columns", records.len(), headers.len());
        Ok(records)
    }

    fn clean(&self, raw: Vec<RawRecord>) -> Result<Vec<CleanRecord>, ProcessError> {
        let Some(first) = raw.first() else {
            return Err(ProcessError::EmptyData);
        };
        let headers: Vec<&String> = first.keys().collect();
        let columns: Vec<String> = Self::map_columns(&headers)?
            .into_iter()
            .cloned()
            .collect();

        let cleaned = raw
            .iter()
            .map(|row| CleanRecord {
                url: clean_value(row.get(&columns[0])),
                source_name: clean_value(row.get(&columns[1])),
                author: clean_value(row.get(&columns[2])),
                title: clean_value(row.get(&columns[3])),
                hit_sentence: clean_value(row.get(&columns[4])),
                language: clean_value(row.get(&columns[5])),
            })
            .collect();
        Ok(cleaned)
    }

    fn deduplicate(&self, records: Vec<CleanRecord>) -> DedupOutcome {
        let total = records.len();
        let mut seen = HashSet::new();

        let kept: Vec<CleanRecord> = records
            .into_iter()
            .filter(|record| match record.hit_sentence.as_deref() {
                Some(sentence) => {
                    let normalized = normalize_sentence(sentence);
                    normalized.is_empty() || seen.insert(normalized)
                }
                None => true,
            })
            .collect();

        DedupOutcome {
            removed: total - kept.len(),
            total,
            records: kept,
        }
    }
}
