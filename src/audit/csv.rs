//! Minimal RFC 4180 row codec for the audit log.
//!
//! Fields holding a comma, a double quote, CR or LF are wrapped in quotes with
//! inner quotes doubled. Rows end with `\n`; `\r\n` is accepted on read and
//! blank lines are skipped.
//!
//! Rows are numbered from 1 in log order. A quoted newline keeps a row going,
//! so a row's number and the physical line it starts on can differ.

/// Where a row sits in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    /// 1-based row number, blank lines not counted.
    pub(crate) row: usize,
    /// 1-based line the row starts on.
    pub(crate) line: usize,
}

/// A row that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RowError {
    pub(crate) at: Position,
    pub(crate) reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Row {
    pub(crate) at: Position,
    pub(crate) fields: Vec<String>,
}

pub(crate) fn encode_row(fields: &[&str]) -> String {
    let mut out = String::with_capacity(fields.iter().map(|f| f.len() + 3).sum::<usize>() + 1);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
    out
}

pub(crate) fn parse_rows(text: &str) -> Result<Vec<Row>, RowError> {
    let mut rows = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut after_quote = false;
    let mut line = 1;
    let mut row_start = 1;
    // The row being read is always the one after the last completed row.
    let here = |rows: &Vec<Row>, line: usize| Position { row: rows.len() + 1, line };

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => {
                    in_quotes = false;
                    after_quote = true;
                }
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            ',' => {
                fields.push(std::mem::take(&mut field));
                after_quote = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                let blank = fields.is_empty() && field.is_empty() && !after_quote;
                if !blank {
                    fields.push(std::mem::take(&mut field));
                    let at = here(&rows, row_start);
                    rows.push(Row { at, fields: std::mem::take(&mut fields) });
                }
                after_quote = false;
                line += 1;
                row_start = line;
            }
            '"' if field.is_empty() && !after_quote => in_quotes = true,
            '"' => {
                return Err(RowError {
                    at: here(&rows, row_start),
                    reason: "bare quote in unquoted field",
                });
            }
            _ if after_quote => {
                return Err(RowError {
                    at: here(&rows, row_start),
                    reason: "unexpected character after closing quote",
                });
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(RowError { at: here(&rows, row_start), reason: "unterminated quoted field" });
    }
    if !fields.is_empty() || !field.is_empty() || after_quote {
        fields.push(field);
        let at = here(&rows, row_start);
        rows.push(Row { at, fields });
    }
    Ok(rows)
}

/// Parses a log prefix that may stop in the middle of a row.
///
/// Returns the rows completed before the cut and the position of the row the
/// cut falls in.
pub(crate) fn parse_prefix(prefix: &str) -> Result<(Vec<Row>, Position), RowError> {
    let mut rows = parse_rows(prefix)?;
    let cut_mid_row = !prefix.is_empty() && !prefix.ends_with('\n');
    let at = match rows.last() {
        Some(last) if cut_mid_row => last.at,
        _ => Position { row: rows.len() + 1, line: prefix.matches('\n').count() + 1 },
    };
    if cut_mid_row {
        rows.pop();
    }
    Ok((rows, at))
}
