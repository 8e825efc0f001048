use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

// Input files are named after the hour they cover, e.g.
// "pagecounts-20080101-000000.gz". No timezone is given; the stamp is used as
// is. Don't assume a particular extension.
static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^pagecounts-(\d{8}-\d{6})\..*$").expect("file name pattern is valid")
});

/// One line of an input file, labeled with the file it came from and its
/// byte offset within that file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogLine {
    pub source: String,
    pub offset: u64,
    pub text: String,
}

/// One decoded page-view record for a project/page/hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub date_time: String,
    pub project_code: String,
    pub page_name: String,
    pub page_views: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("failed to parse filename: {file_name}")]
    BadFileName { file_name: String },
    #[error("failed to parse record in file {file_name}, position {offset}: {text}")]
    BadRecord {
        file_name: String,
        offset: u64,
        text: String,
    },
}

fn base_name(source: &str) -> &str {
    source.rsplit('/').next().unwrap_or(source)
}

/// Extracts the `YYYYMMDD-HHMMSS` stamp from a source path.
pub fn date_time_of(source: &str) -> Result<String, DecodeError> {
    let file_name = base_name(source);
    FILE_NAME
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
        .ok_or_else(|| DecodeError::BadFileName {
            file_name: file_name.to_owned(),
        })
}

fn parse_count(field: &str) -> Option<i64> {
    field.parse::<i64>().ok().filter(|n| *n >= 0)
}

/// Decodes one line. Lines are `projectCode pageName pageViews bytes`,
/// split on the first three spaces.
pub fn decode(line: &RawLogLine) -> Result<Observation, DecodeError> {
    let date_time = date_time_of(&line.source)?;

    let bad_record = || DecodeError::BadRecord {
        file_name: base_name(&line.source).to_owned(),
        offset: line.offset,
        text: line.text.clone(),
    };

    let text = line.text.trim_end_matches(['\r', '\n']);
    let mut fields = text.splitn(4, ' ');
    let (project_code, page_name, page_views, bytes) =
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(p), Some(n), Some(v), Some(b)) => (p, n, v, b),
            _ => return Err(bad_record()),
        };

    let page_views = parse_count(page_views).ok_or_else(bad_record)?;
    let bytes = parse_count(bytes).ok_or_else(bad_record)?;

    Ok(Observation {
        date_time,
        project_code: project_code.to_owned(),
        page_name: page_name.to_owned(),
        page_views,
        bytes,
    })
}

/// Splits the contents of one input file into lines. A trailing newline does
/// not produce an empty final line.
pub fn read_lines<'a>(source: &'a str, data: &'a [u8]) -> impl Iterator<Item = RawLogLine> + 'a {
    let mut offset = 0_u64;
    data.split_inclusive(|b| *b == b'\n').map(move |chunk| {
        let line = RawLogLine {
            source: source.to_owned(),
            offset,
            text: String::from_utf8_lossy(chunk)
                .trim_end_matches(['\r', '\n'])
                .to_owned(),
        };
        offset += chunk.len() as u64;
        line
    })
}
