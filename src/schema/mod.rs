use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    encoding::{Decode, Encode, KeyReader, KeyWriter},
    record::Observation,
};

// Every cell lives in the single family "p". The store keeps one version per
// cell and no compression is configured here; both are table settings owned
// by whoever creates the target table.
pub const FAMILY: &[u8] = b"p";
pub const VIEWS_QUALIFIER: &[u8] = b"views";
pub const BYTES_QUALIFIER: &[u8] = b"bytes";

/// A single key-value unit bound for the store. Cells order by row, family,
/// qualifier and finally value, all compared as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cell {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn new(row: Vec<u8>, qualifier: &[u8], value: Vec<u8>) -> Self {
        Cell {
            row,
            family: FAMILY.to_vec(),
            qualifier: qualifier.to_vec(),
            value,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}",
            String::from_utf8_lossy(&self.row),
            String::from_utf8_lossy(&self.family),
            String::from_utf8_lossy(&self.qualifier)
        )
    }
}

impl Encode for Cell {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        (&self.row, (&self.family, (&self.qualifier, &self.value))).write_bytes(kw)
    }
}

impl Decode for Cell {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let (row, (family, (qualifier, value))) =
            <(Vec<u8>, (Vec<u8>, (Vec<u8>, Vec<u8>)))>::decode(kr)?;
        Ok(Cell {
            row,
            family,
            qualifier,
            value,
        })
    }
}

/// The composite value stored by the wide schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WideValue {
    pub views: i64,
    pub bytes: i64,
}

impl WideValue {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(buf: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(buf)?)
    }
}

/// Reads back a tall-schema counter value.
pub fn read_counter(buf: &[u8]) -> anyhow::Result<i64> {
    Ok(i64::from_be_bytes(buf.try_into()?))
}

/// How observations are laid out as cells. Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// `project/page/dateTime => {p:views, p:bytes}`.
    Tall,
    /// `project/page => {p:dateTime => {"views":..,"bytes":..}}`.
    Wide,
}

impl Schema {
    pub fn row_key(&self, obs: &Observation) -> Vec<u8> {
        match self {
            Schema::Tall => format!(
                "{}/{}/{}",
                obs.project_code, obs.page_name, obs.date_time
            ),
            Schema::Wide => format!("{}/{}", obs.project_code, obs.page_name),
        }
        .into_bytes()
    }

    pub fn encode(&self, obs: &Observation) -> anyhow::Result<Vec<Cell>> {
        let row = self.row_key(obs);
        let cells = match self {
            Schema::Tall => vec![
                Cell::new(row.clone(), VIEWS_QUALIFIER, obs.page_views.to_be_bytes().to_vec()),
                Cell::new(row, BYTES_QUALIFIER, obs.bytes.to_be_bytes().to_vec()),
            ],
            Schema::Wide => {
                let value = WideValue {
                    views: obs.page_views,
                    bytes: obs.bytes,
                };
                vec![Cell::new(row, obs.date_time.as_bytes(), value.encode()?)]
            }
        };
        Ok(cells)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Schema::Tall => "tall",
            Schema::Wide => "wide",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('-') {
            "tall" => Ok(Schema::Tall),
            "wide" => Ok(Schema::Wide),
            other => Err(format!("unknown schema {:?}, expected tall or wide", other)),
        }
    }
}
