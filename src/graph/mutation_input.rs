//! JSONL mutation-input parsing (§6, §11): one `MutationOperation` per
//! line, tolerant of blank lines.

use std::io::BufRead;

use thiserror::Error;

use super::mutation::MutationOperation;

#[derive(Error, Debug)]
pub enum MutationInputError {
    #[error("failed to read mutation input: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed mutation operation on line {line}: {source}")]
    Parse { line: usize, #[source] source: serde_json::Error },
}

/// Parse one `MutationOperation` per non-blank line of `reader`. Line
/// numbers in errors are 1-indexed to match the source file a user would
/// open to fix a bad line.
pub fn parse_jsonl(reader: impl BufRead) -> Result<Vec<MutationOperation>, MutationInputError> {
    let mut operations = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let operation = serde_json::from_str(trimmed)
            .map_err(|source| MutationInputError::Parse { line: index + 1, source })?;
        operations.push(operation);
    }
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::mutation::{EntityType, MutationOperationType};
    use std::io::Cursor;

    #[test]
    fn parses_the_documented_example_batch() {
        let input = r#"
{"op":"DEFINE","type":"node","label":"person","description":"a person","required_properties":["slug","name"]}
{"op":"CREATE","type":"node","id":"person:abc123def4567890","label":"person","set_properties":{"slug":"alice","name":"Alice","data_source_id":"ds-1","source_path":"p.md"}}
{"op":"CREATE","type":"edge","id":"knows:0000abcd0000ef01","label":"knows","start_id":"person:abc123def4567890","end_id":"person:def456abc1237890","set_properties":{"data_source_id":"ds-1","source_path":"p.md"}}
{"op":"DELETE","type":"node","id":"person:abc123def4567890"}
{"op":"UPDATE","type":"node","id":"person:def456abc1237890","set_properties":{"email":"bob@x"},"remove_properties":["old_field"]}
"#;

        let ops = parse_jsonl(Cursor::new(input)).unwrap();
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[0].op, MutationOperationType::Define);
        assert_eq!(ops[0].label.as_deref(), Some("person"));
        assert_eq!(ops[1].op, MutationOperationType::Create);
        assert_eq!(ops[1].entity_type, EntityType::Node);
        assert_eq!(ops[2].entity_type, EntityType::Edge);
        assert_eq!(ops[3].op, MutationOperationType::Delete);
        assert_eq!(ops[4].remove_properties.as_deref(), Some(&["old_field".to_string()][..]));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let input = "\n\n{\"op\":\"DELETE\",\"type\":\"node\",\"id\":\"person:1\"}\n\n";
        let ops = parse_jsonl(Cursor::new(input)).unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn malformed_line_reports_its_line_number() {
        let input = "{\"op\":\"DELETE\",\"type\":\"node\",\"id\":\"person:1\"}\nnot json\n";
        let err = parse_jsonl(Cursor::new(input)).unwrap_err();
        match err {
            MutationInputError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }
}
