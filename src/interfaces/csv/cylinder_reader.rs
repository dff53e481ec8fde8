use crate::domain::cylinder::{CylinderDraft, CylinderStatus};
use crate::domain::geo::Location;
use crate::error::{LogisticsError, Result};
use serde::Deserialize;
use std::io::Read;

/// One inventory row as it appears in the import file.
#[derive(Debug, Deserialize)]
struct CylinderRow {
    serial_number: String,
    #[serde(default)]
    status: Option<CylinderStatus>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

impl From<CylinderRow> for CylinderDraft {
    fn from(row: CylinderRow) -> Self {
        let location = (row.address.is_some() || row.latitude.is_some() || row.longitude.is_some())
            .then(|| Location {
                address: row.address,
                latitude: row.latitude,
                longitude: row.longitude,
                notes: None,
            });
        Self {
            serial_number: row.serial_number,
            status: row.status.unwrap_or_default(),
            location,
        }
    }
}

/// Reads cylinder inventory from a CSV source.
///
/// Columns are `serial_number,status,address,latitude,longitude`; everything
/// but the serial number may be left empty. Whitespace is trimmed and short
/// rows are accepted.
pub struct CylinderReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CylinderReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one draft per row, so large inventories are streamed.
    pub fn drafts(self) -> impl Iterator<Item = Result<CylinderDraft>> {
        self.reader.into_deserialize::<CylinderRow>().map(|result| {
            result
                .map(CylinderDraft::from)
                .map_err(LogisticsError::from)
        })
    }
}
