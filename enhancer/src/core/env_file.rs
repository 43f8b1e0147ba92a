//! Line-oriented `KEY=value` documents.
//!
//! Parsing keeps every line: blank lines, comments and lines without `=` are
//! retained verbatim as opaque entries so rendering can rewrite only the keys
//! being updated.

/// One line of an env document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub raw: String,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl EnvEntry {
    fn opaque(line: &str) -> Self {
        Self {
            raw: line.to_string(),
            key: None,
            value: None,
        }
    }
}

/// Parse a document into entries, one per line.
pub fn parse(text: &str) -> Vec<EnvEntry> {
    text.lines().map(parse_line).collect()
}

fn parse_line(line: &str) -> EnvEntry {
    let stripped = line.trim();
    if stripped.is_empty() || stripped.starts_with('#') {
        return EnvEntry::opaque(line);
    }
    let Some((key, value)) = line.split_once('=') else {
        return EnvEntry::opaque(line);
    };
    EnvEntry {
        raw: line.to_string(),
        key: Some(key.trim().to_string()),
        value: Some(value.to_string()),
    }
}

/// Ordered key/value view of parsed entries. A repeated key keeps its first
/// position and its last value.
pub fn values(entries: &[EnvEntry]) -> Vec<(String, String)> {
    let mut values: Vec<(String, String)> = Vec::new();
    for entry in entries {
        let Some(key) = &entry.key else { continue };
        let value = entry.value.clone().unwrap_or_default();
        match values.iter_mut().find(|(existing, _)| existing == key) {
            Some(slot) => slot.1 = value,
            None => values.push((key.clone(), value)),
        }
    }
    values
}

/// Render entries with `updates` applied.
///
/// Every line whose key is updated is rewritten in place, duplicates
/// included, so [`values`] agrees with the update. Keys not present are
/// appended after a blank separator line. Everything else is kept as-is.
pub fn render(entries: &[EnvEntry], updates: &[(String, String)]) -> String {
    let mut pending: Vec<(String, String, bool)> = Vec::new();
    for (key, value) in updates {
        match pending.iter_mut().find(|(existing, _, _)| existing == key) {
            Some(slot) => slot.1 = value.clone(),
            None => pending.push((key.clone(), value.clone(), false)),
        }
    }

    let mut lines: Vec<String> = Vec::with_capacity(entries.len() + pending.len() + 1);
    for entry in entries {
        let update = match &entry.key {
            Some(key) => pending
                .iter_mut()
                .find(|(pending_key, _, _)| pending_key == key),
            None => None,
        };
        match update {
            Some((key, value, written)) => {
                *written = true;
                lines.push(format!("{key}={value}"));
            }
            None => lines.push(entry.raw.clone()),
        }
    }

    let appended: Vec<&(String, String, bool)> =
        pending.iter().filter(|(_, _, written)| !written).collect();
    if !appended.is_empty() {
        if lines.last().is_some_and(|line| !line.is_empty()) {
            lines.push(String::new());
        }
        for (key, value, _) in appended {
            lines.push(format!("{key}={value}"));
        }
    }

    let mut rendered = lines.join("\n");
    if !rendered.is_empty() && !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    rendered
}

/// Ensure a non-empty document ends with a newline.
pub fn normalize_document(content: &str) -> String {
    if content.is_empty() || content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn render_rewrites_in_place_and_appends_after_blank_line() {
        let entries = parse("FOO=one\n\nBAR=two\n");
        let rendered = render(&entries, &updates(&[("FOO", "alpha"), ("BAZ", "new")]));
        assert_eq!(rendered, "FOO=alpha\n\nBAR=two\n\nBAZ=new\n");
    }

    #[test]
    fn comments_and_unparsed_lines_survive_untouched() {
        let text = "# service urls\n  SPACED = keep \nnot a pair\nTOKEN=abc=def\n";
        let entries = parse(text);
        assert_eq!(entries[0].key, None);
        assert_eq!(entries[1].key.as_deref(), Some("SPACED"));
        assert_eq!(entries[1].value.as_deref(), Some(" keep "));
        assert_eq!(entries[2].key, None);
        assert_eq!(entries[3].value.as_deref(), Some("abc=def"));

        assert_eq!(render(&entries, &[]), text);
    }

    #[test]
    fn append_to_document_ending_in_blank_line_does_not_double_separate() {
        let entries = parse("A=1\n\n");
        let rendered = render(&entries, &updates(&[("B", "2")]));
        assert_eq!(rendered, "A=1\n\nB=2\n");
    }

    #[test]
    fn render_into_empty_document() {
        let rendered = render(&[], &updates(&[("ONLY", "x")]));
        assert_eq!(rendered, "ONLY=x\n");
    }

    #[test]
    fn values_preserve_first_position() {
        let entries = parse("A=1\nB=2\nA=3\n");
        assert_eq!(
            values(&entries),
            vec![
                ("A".to_string(), "3".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn render_rewrites_every_occurrence_of_a_repeated_key() {
        let entries = parse("A=1\nB=2\nA=3\n");
        let rendered = render(&entries, &updates(&[("A", "9")]));
        assert_eq!(rendered, "A=9\nB=2\nA=9\n");
        assert_eq!(
            values(&parse(&rendered)),
            vec![
                ("A".to_string(), "9".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn normalize_document_adds_trailing_newline() {
        assert_eq!(normalize_document("FOO=bar"), "FOO=bar\n");
        assert_eq!(normalize_document(""), "");
        assert_eq!(normalize_document("X=1\n"), "X=1\n");
    }
}
