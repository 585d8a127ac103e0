//! Spreadsheet structure: sheet names and their dimensions.
//!
//! Dimensions come from the used range, the bounding box of non-empty cells.
//! Open XML workbooks are streamed cell by cell and only that box is kept;
//! `.xls` and `.ods` have no streaming reader, so their range is loaded.

use std::io::{self, Read, Seek};
use std::path::Path;

use calamine::{
    DataRef, Reader, Sheets, Xlsb, XlsbError, Xlsx, XlsxError, open_workbook_auto,
};
use serde::Serialize;
use tracing::{debug, instrument};

use super::files::DataKind;
use super::paths::resolve_in_root;
use crate::error::ToolError;

/// Dimensions of one sheet of a spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetDescriptor {
    /// Sheet name as stored in the workbook.
    pub sheet_name: String,
    /// Number of data rows, excluding the header row.
    pub rows: usize,
    /// Number of columns in the used range.
    pub columns: usize,
}

impl SheetDescriptor {
    /// Builds a descriptor from the used range size `(height, width)`.
    ///
    /// The first row of the used range is the header and is not counted.
    #[must_use]
    pub fn from_used_range(sheet_name: impl Into<String>, size: (usize, usize)) -> Self {
        let (height, width) = size;
        Self {
            sheet_name: sheet_name.into(),
            rows: height.saturating_sub(1),
            columns: width,
        }
    }
}

/// Lists the sheets of `file_name` in the workbook's own order.
///
/// # Errors
///
/// - `ToolError::InvalidInput` if the name escapes the data root or the file is
///   not a spreadsheet
/// - `ToolError::NotFound` if the file does not exist
/// - `ToolError::Io` if the file cannot be parsed as a spreadsheet
#[instrument(skip(root), fields(root = %root.display()))]
pub fn list_sheets(root: &Path, file_name: &str) -> Result<Vec<SheetDescriptor>, ToolError> {
    let path = resolve_in_root(root, file_name)?;

    if !path.is_file() || DataKind::from_path(&path) != Some(DataKind::Spreadsheet) {
        return Err(ToolError::InvalidInput(format!(
            "'{file_name}' is not a spreadsheet; only .xlsx, .xlsm, .xls and .ods files have sheets"
        )));
    }

    let mut workbook = open_workbook_auto(&path).map_err(|e| corrupt(file_name, e))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let size = match &mut workbook {
            Sheets::Xlsx(xlsx) => streamed_xlsx_size(xlsx, &name).map_err(|e| e.to_string()),
            Sheets::Xlsb(xlsb) => streamed_xlsb_size(xlsb, &name).map_err(|e| e.to_string()),
            other => other
                .worksheet_range(&name)
                .map(|range| range.get_size())
                .map_err(|e| e.to_string()),
        }
        .map_err(|e| corrupt(file_name, e))?;
        sheets.push(SheetDescriptor::from_used_range(name, size));
    }

    debug!(count = sheets.len(), "Read sheet metadata");
    Ok(sheets)
}

/// Bounding box of the non-empty cells seen so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct UsedBounds {
    /// `((first_row, first_col), (last_row, last_col))`, inclusive.
    corners: Option<((u32, u32), (u32, u32))>,
}

impl UsedBounds {
    fn include(&mut self, (row, col): (u32, u32)) {
        self.corners = Some(match self.corners {
            None => ((row, col), (row, col)),
            Some(((r0, c0), (r1, c1))) => ((r0.min(row), c0.min(col)), (r1.max(row), c1.max(col))),
        });
    }

    /// `(height, width)`, matching calamine's `Range::get_size`.
    fn size(self) -> (usize, usize) {
        match self.corners {
            None => (0, 0),
            Some(((r0, c0), (r1, c1))) => ((r1 - r0 + 1) as usize, (c1 - c0 + 1) as usize),
        }
    }
}

fn streamed_xlsx_size<RS: Read + Seek>(
    workbook: &mut Xlsx<RS>,
    name: &str,
) -> Result<(usize, usize), XlsxError> {
    let mut cells = workbook.worksheet_cells_reader(name)?;
    let mut bounds = UsedBounds::default();
    while let Some(cell) = cells.next_cell()? {
        if !matches!(cell.get_value(), DataRef::Empty) {
            bounds.include(cell.get_position());
        }
    }
    Ok(bounds.size())
}

fn streamed_xlsb_size<RS: Read + Seek>(
    workbook: &mut Xlsb<RS>,
    name: &str,
) -> Result<(usize, usize), XlsbError> {
    let mut cells = workbook.worksheet_cells_reader(name)?;
    let mut bounds = UsedBounds::default();
    while let Some(cell) = cells.next_cell()? {
        if !matches!(cell.get_value(), DataRef::Empty) {
            bounds.include(cell.get_position());
        }
    }
    Ok(bounds.size())
}

fn corrupt(file_name: &str, err: impl std::fmt::Display) -> ToolError {
    ToolError::io(
        format!("cannot read spreadsheet '{file_name}'"),
        io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
    )
}
