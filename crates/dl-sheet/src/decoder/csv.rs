//! Comma-separated text.

use dl_common::Result;

use super::{rows_to_table, DecodedTable};

/// Split CSV text into rows of cells.
///
/// Double quotes group cells and `""` inside quotes is a literal quote.
/// Carriage returns outside quotes are dropped, so CRLF and LF both work.
pub fn parse_csv_rows(text: &str) -> Vec<Vec<String>> {
    let input = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut current)),
            '\n' => {
                row.push(std::mem::take(&mut current));
                rows.push(std::mem::take(&mut row));
            }
            '\r' => {}
            other => current.push(other),
        }
    }
    if !current.is_empty() || !row.is_empty() {
        row.push(current);
        rows.push(row);
    }
    rows
}

/// Decode one CSV document as a table called `name`.
pub fn decode_csv(text: &str, name: &str) -> Result<DecodedTable> {
    rows_to_table(&parse_csv_rows(text), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_and_line_endings() {
        let rows = parse_csv_rows("a,\"b,c\",\"say \"\"hi\"\"\"\r\n1,2\n");
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b,c".to_string(), "say \"hi\"".to_string()],
                vec!["1".to_string(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn test_quoted_newline_stays_in_cell() {
        let rows = parse_csv_rows("\"x\ny\",z");
        assert_eq!(rows, vec![vec!["x\ny".to_string(), "z".to_string()]]);
    }

    #[test]
    fn test_blank_first_line_is_a_row() {
        let rows = parse_csv_rows("\ntime,a\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![String::new()]);
    }

    #[test]
    fn test_decode_csv() {
        let table = decode_csv("\ntime,temp,hum\n0s,20,50\n1.5s,21,\n", "run").unwrap();
        assert_eq!(table.name, "run");
        assert_eq!(table.labels, vec!["temp", "hum"]);
        assert_eq!(table.rows[1].values, vec![Some(21.0), None]);
    }
}
