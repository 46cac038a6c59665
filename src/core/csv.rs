//! Purpose: Minimal RFC 4180 reader/writer for columnar server payloads.
//! Exports: `parse_records`, `write_record`.
//! Invariants: Quoted fields may hold commas, doubled quotes, and newlines.
//! Invariants: Blank lines are skipped; `""` on its own line is one empty field.

use crate::core::error::{Error, ErrorKind};

pub(crate) fn parse_records(input: &str) -> Result<Vec<Vec<String>>, Error> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut started = false;
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match ch {
            '"' => {
                in_quotes = true;
                started = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                started = true;
            }
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if started || !field.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                started = false;
            }
            other => {
                field.push(other);
                started = true;
            }
        }
    }

    if in_quotes {
        return Err(Error::new(ErrorKind::Corrupt).with_message("unterminated quoted csv field"));
    }
    if started || !field.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

pub(crate) fn write_record<'a, I>(out: &mut String, fields: I)
where
    I: IntoIterator<Item = &'a str>,
{
    let fields: Vec<&str> = fields.into_iter().collect();
    let lone = fields.len() == 1;
    for (idx, value) in fields.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if needs_quotes(value) || (lone && value.is_empty()) {
            out.push('"');
            out.push_str(&value.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

fn needs_quotes(value: &str) -> bool {
    value.contains([',', '"', '\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::{parse_records, write_record};

    #[test]
    fn parses_quoted_fields() {
        let records = parse_records("ID,label\r\nS1,\"a, \"\"b\"\"\nc\"\r\n\nS2,\n").expect("parse");
        assert_eq!(
            records,
            vec![
                vec!["ID".to_string(), "label".to_string()],
                vec!["S1".to_string(), "a, \"b\"\nc".to_string()],
                vec!["S2".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn missing_final_newline_keeps_last_record() {
        let records = parse_records("a,b\n1,2").expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn unterminated_quote_is_corrupt() {
        let err = parse_records("a\n\"open").expect_err("err");
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Corrupt);
    }

    #[test]
    fn lone_empty_field_survives() {
        let mut out = String::new();
        write_record(&mut out, ["x"]);
        write_record(&mut out, [""]);
        assert_eq!(out, "x\n\"\"\n");
        let records = parse_records(&out).expect("parse");
        assert_eq!(records, vec![vec!["x".to_string()], vec![String::new()]]);
    }
}
