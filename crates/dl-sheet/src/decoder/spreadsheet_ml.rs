//! Legacy flat-XML workbooks (SpreadsheetML 2003).
//!
//! `<Workbook><Worksheet ss:Name=..><Table><Row><Cell ss:Index=..><Data>`.
//! Only the first `Table` of each worksheet is read.

use tracing::debug;

use dl_common::{Error, Result};

use super::{rows_to_table, DecodedTable};
use crate::xml::{local_name, XmlEvent, XmlReader};

/// Highest column a cell index may address.
const MAX_COLUMNS: usize = 16_384;

#[derive(Default)]
struct SheetState {
    name: String,
    tables_seen: usize,
    in_table: bool,
    rows: Vec<Vec<String>>,
    row: Option<Vec<String>>,
    cell: Option<String>,
    data_depth: usize,
}

impl SheetState {
    fn finish_cell(&mut self) {
        if let (Some(row), Some(text)) = (self.row.as_mut(), self.cell.take()) {
            row.push(text);
        }
    }
}

/// Decode every worksheet that has a table with rows.
pub fn decode_spreadsheet_ml(text: &str) -> Result<Vec<DecodedTable>> {
    let mut worksheets = 0usize;
    let mut tables = Vec::new();
    let mut sheet: Option<SheetState> = None;

    for event in XmlReader::new(text) {
        match event? {
            XmlEvent::Start(tag) => {
                if tag.is("Worksheet") {
                    worksheets += 1;
                    let name = tag
                        .attr("ss:Name")
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Group {}", worksheets));
                    if tag.self_closing {
                        continue;
                    }
                    sheet = Some(SheetState {
                        name,
                        ..SheetState::default()
                    });
                    continue;
                }
                let Some(state) = sheet.as_mut() else {
                    continue;
                };
                match tag.local_name() {
                    "Table" => {
                        state.tables_seen += 1;
                        state.in_table = state.tables_seen == 1 && !tag.self_closing;
                    }
                    "Row" if state.in_table => {
                        if tag.self_closing {
                            state.rows.push(Vec::new());
                        } else {
                            state.row = Some(Vec::new());
                        }
                    }
                    "Cell" if state.in_table && state.row.is_some() => {
                        if let Some(index) = tag.attr("ss:Index") {
                            let target = index
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .filter(|i| *i <= MAX_COLUMNS)
                                .ok_or_else(|| {
                                    Error::MalformedImport(format!("invalid cell index {:?}", index))
                                })?;
                            if let Some(row) = state.row.as_mut() {
                                while row.len() + 1 < target {
                                    row.push(String::new());
                                }
                            }
                        }
                        state.cell = Some(String::new());
                        if tag.self_closing {
                            state.finish_cell();
                        }
                    }
                    "Data" if state.cell.is_some() && !tag.self_closing => {
                        state.data_depth += 1;
                    }
                    _ => {}
                }
            }
            XmlEvent::Text(content) => {
                if let Some(state) = sheet.as_mut() {
                    if state.data_depth > 0 {
                        if let Some(cell) = state.cell.as_mut() {
                            cell.push_str(&content);
                        }
                    }
                }
            }
            XmlEvent::End(name) => match local_name(name) {
                "Worksheet" => {
                    if let Some(state) = sheet.take() {
                        if state.tables_seen == 0 || state.rows.is_empty() {
                            debug!(sheet = %state.name, "worksheet without rows skipped");
                            continue;
                        }
                        tables.push(rows_to_table(&state.rows, &state.name)?);
                    }
                }
                other => {
                    let Some(state) = sheet.as_mut() else {
                        continue;
                    };
                    match other {
                        "Table" => state.in_table = false,
                        "Row" => {
                            state.finish_cell();
                            if let Some(row) = state.row.take() {
                                state.rows.push(row);
                            }
                        }
                        "Cell" => state.finish_cell(),
                        "Data" => state.data_depth = state.data_depth.saturating_sub(1),
                        _ => {}
                    }
                }
            },
        }
    }

    if worksheets == 0 {
        return Err(Error::MalformedImport("no worksheets found".into()));
    }
    if tables.is_empty() {
        return Err(Error::MalformedImport("no worksheet contains data".into()));
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKBOOK: &str = r#"<?xml version="1.0"?>
<Workbook xmlns="urn:schemas-microsoft-com:office:spreadsheet"
          xmlns:ss="urn:schemas-microsoft-com:office:spreadsheet">
  <Worksheet ss:Name="Lab A">
    <Table>
      <Row/>
      <Row><Cell><Data ss:Type="String">time</Data></Cell><Cell><Data ss:Type="String">temp</Data></Cell><Cell><Data ss:Type="String">hum</Data></Cell></Row>
      <Row><Cell><Data ss:Type="String">0s</Data></Cell><Cell ss:Index="3"><Data ss:Type="Number">40</Data></Cell></Row>
      <Row><Cell><Data ss:Type="String">2s</Data></Cell><Cell><Data ss:Type="Number">21.5</Data></Cell></Row>
    </Table>
  </Worksheet>
  <Worksheet ss:Name="Empty"><Table></Table></Worksheet>
  <Worksheet><Table><Row/><Row><Cell><Data>time</Data></Cell><Cell><Data>x</Data></Cell></Row></Table></Worksheet>
</Workbook>"#;

    #[test]
    fn test_decodes_worksheets_and_index_gaps() {
        let tables = decode_spreadsheet_ml(WORKBOOK).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "Lab A");
        assert_eq!(tables[0].labels, vec!["temp", "hum"]);
        assert_eq!(tables[0].rows[0].values, vec![None, Some(40.0)]);
        assert_eq!(tables[0].rows[1].values, vec![Some(21.5), None]);
        assert_eq!(tables[1].name, "Group 3");
        assert!(tables[1].rows.is_empty());
    }

    #[test]
    fn test_no_worksheets_or_no_data() {
        assert!(matches!(
            decode_spreadsheet_ml("<Workbook/>"),
            Err(Error::MalformedImport(_))
        ));
        assert!(matches!(
            decode_spreadsheet_ml("<Workbook><Worksheet ss:Name=\"a\"/></Workbook>"),
            Err(Error::MalformedImport(_))
        ));
    }

    #[test]
    fn test_header_errors_propagate() {
        let xml = "<Workbook><Worksheet><Table><Row/><Row><Cell><Data>when</Data></Cell></Row></Table></Worksheet></Workbook>";
        assert!(decode_spreadsheet_ml(xml).is_err());
    }
}
