//! Composite aggregate-key construction.
//!
//! Every key in the data db is a colon-joined sequence of segments. Callers
//! hand over scalars, nested lists, or optional values; `construct_key`
//! flattens them, drops empties, and joins the rest. Values themselves must
//! never contain `:`; the string dimension parser enforces that at the edge.

/// One argument to [`construct_key`]: a scalar segment, a nested group of
/// segments, or nothing at all.
#[derive(Debug, Clone)]
pub enum KeyPart {
    Atom(String),
    Group(Vec<KeyPart>),
    Skip,
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Atom(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Atom(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::Atom(s.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Atom(n.to_string())
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => KeyPart::Skip,
        }
    }
}

impl<T: Into<KeyPart>> From<Vec<T>> for KeyPart {
    fn from(items: Vec<T>) -> Self {
        KeyPart::Group(items.into_iter().map(Into::into).collect())
    }
}

/// Flatten the given parts, drop skips and empty strings, and join the
/// remaining segments with `:`. No segments at all yields `""`.
pub fn construct_key<I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: Into<KeyPart>,
{
    let mut segments: Vec<String> = Vec::new();
    for part in parts {
        flatten(part.into(), &mut segments);
    }
    segments.join(":")
}

fn flatten(part: KeyPart, out: &mut Vec<String>) {
    match part {
        KeyPart::Atom(s) => {
            if !s.is_empty() {
                out.push(s);
            }
        }
        KeyPart::Group(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        KeyPart::Skip => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_key() {
        assert_eq!(construct_key(Vec::<KeyPart>::new()), "");
    }

    #[test]
    fn scalars_join_with_colon() {
        assert_eq!(
            construct_key(["Activity", "Month:20111101", "Practice:1"]),
            "Activity:Month:20111101:Practice:1"
        );
    }

    #[test]
    fn nested_groups_flatten() {
        let key = construct_key([
            KeyPart::from("Activity"),
            KeyPart::from(vec!["Month", "20111101"]),
            KeyPart::from(vec!["Practice", "1"]),
        ]);
        assert_eq!(key, "Activity:Month:20111101:Practice:1");
    }

    #[test]
    fn flat_and_nested_agree() {
        let flat = construct_key(["a", "b", "c"]);
        let nested = construct_key([KeyPart::from(vec!["a", "b", "c"])]);
        let mixed = construct_key([
            KeyPart::from("a"),
            KeyPart::from(vec!["b"]),
            KeyPart::from("c"),
        ]);
        assert_eq!(flat, nested);
        assert_eq!(flat, mixed);
    }

    #[test]
    fn skips_and_empties_never_appear() {
        let key = construct_key([
            KeyPart::from("Activity"),
            KeyPart::from(vec![String::new()]),
            KeyPart::from(None::<String>),
        ]);
        assert_eq!(key, "Activity");
        let key = construct_key([
            KeyPart::from("Activity"),
            KeyPart::from(vec!["Month", "20111101"]),
            KeyPart::from(Vec::<String>::new()),
        ]);
        assert_eq!(key, "Activity:Month:20111101");
    }
}
