//! Column metadata of the target table.

use common::warehouse::CatalogRow;
use common::{ColumnEncoding, TableRef, WarehouseError, WarehouseSession};
use serde::Serialize;

use crate::error::{AdvisorError, CatalogError};

/// One column of the target table as the catalog reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Position in the table, unique and used for output ordering
    pub ordinal: i32,
    /// Encoding currently attached to the column, if any
    pub current_encoding: Option<ColumnEncoding>,
}

/// Read the columns of `table`, ordered by ordinal.
///
/// A missing table (or schema) yields an empty catalog answer and is reported
/// as [`CatalogError::TableNotFound`].
pub async fn describe_columns<S: WarehouseSession + ?Sized>(
    session: &mut S,
    table: &TableRef,
) -> Result<Vec<ColumnDescriptor>, AdvisorError> {
    log::debug!("Reading column catalog for {table}");

    let rows = session
        .column_catalog(table)
        .await
        .map_err(|e| catalog_failure(table, e))?;

    if rows.is_empty() {
        return Err(CatalogError::TableNotFound(table.clone()).into());
    }

    let mut columns: Vec<ColumnDescriptor> = rows.into_iter().map(describe_row).collect();
    columns.sort_by_key(|c| c.ordinal);

    if let Some(pair) = columns.windows(2).find(|w| w[0].ordinal == w[1].ordinal) {
        return Err(CatalogError::DuplicateOrdinal {
            table: table.clone(),
            ordinal: pair[0].ordinal,
        }
        .into());
    }

    log::debug!("Found {} columns in {table}", columns.len());
    Ok(columns)
}

fn catalog_failure(table: &TableRef, error: WarehouseError) -> AdvisorError {
    match error {
        WarehouseError::Connection(_) => AdvisorError::Connectivity(error),
        WarehouseError::PermissionDenied(message) => CatalogError::PermissionDenied {
            table: table.clone(),
            message,
        }
        .into(),
        WarehouseError::NotFound(_) => CatalogError::TableNotFound(table.clone()).into(),
        source => CatalogError::Lookup {
            table: table.clone(),
            source,
        }
        .into(),
    }
}

fn describe_row(row: CatalogRow) -> ColumnDescriptor {
    let current_encoding = row.options.as_deref().and_then(parse_encoding);
    ColumnDescriptor {
        name: row.name,
        ordinal: row.ordinal,
        current_encoding,
    }
}

/// Extract `compresstype=`/`compresslevel=` from per-column storage options.
///
/// Other options (`blocksize=...`) are ignored. Returns `None` when no
/// compression type is present.
pub fn parse_encoding(options: &[String]) -> Option<ColumnEncoding> {
    let mut compression_type = None;
    let mut level = None;

    for option in options {
        let Some((key, value)) = option.split_once('=') else {
            continue;
        };
        let value = value.trim().to_ascii_lowercase();
        match key.trim().to_ascii_lowercase().as_str() {
            "compresstype" => compression_type = Some(value),
            "compresslevel" => level = value.parse::<u8>().ok(),
            _ => {}
        }
    }

    compression_type.map(|compression_type| ColumnEncoding {
        compression_type,
        level,
    })
}
