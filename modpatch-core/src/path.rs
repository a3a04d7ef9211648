use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Label(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Label(label) => f.write_str(label),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A sequence of struct labels and list positions starting at the root
/// struct. The empty path is the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Segments are separated by `\` or `/`; a segment made only of digits
    /// is a list position.
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split(['\\', '/'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.parse::<usize>() {
                Ok(index) if part.bytes().all(|b| b.is_ascii_digit()) => Segment::Index(index),
                _ => Segment::Label(part.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn with_label(&self, label: &str) -> Self {
        let mut path = self.clone();
        path.segments.push(Segment::Label(label.to_string()));
        path
    }

    pub fn with_index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.segments.push(Segment::Index(index));
        path
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("\\")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Where a just-created field ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// A struct appended to the list at `list`, now at `index`.
    ListElement { list: FieldPath, index: usize },
    /// A labelled field inside the struct at `parent`.
    StructField { parent: FieldPath, label: String },
}

impl Placement {
    pub fn path(&self) -> FieldPath {
        match self {
            Placement::ListElement { list, index } => list.with_index(*index),
            Placement::StructField { parent, label } => parent.with_label(label),
        }
    }

    pub fn list_index(&self) -> Option<usize> {
        match self {
            Placement::ListElement { index, .. } => Some(*index),
            Placement::StructField { .. } => None,
        }
    }
}

/// The container a field declaration targets. A declared path always wins;
/// an empty one inherits the enclosing declaration's own location, which
/// for a list element already ends in its index and for a struct field
/// ends in its label.
pub fn resolve_container(declared: &FieldPath, parent: Option<&Placement>) -> FieldPath {
    if !declared.is_empty() {
        return declared.clone();
    }
    parent.map(Placement::path).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        let path = FieldPath::parse("ItemList\\3/Tag");
        assert_eq!(
            path.segments(),
            &[
                Segment::Label("ItemList".to_string()),
                Segment::Index(3),
                Segment::Label("Tag".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "ItemList\\3\\Tag");
    }

    #[test]
    fn empty_path_is_root() {
        assert!(FieldPath::parse("").is_empty());
        assert_eq!(FieldPath::root().to_string(), "<root>");
    }

    #[test]
    fn list_element_children_inherit_its_index() {
        let element = Placement::ListElement {
            list: FieldPath::parse("ItemList"),
            index: 4,
        };
        let container = resolve_container(&FieldPath::root(), Some(&element));
        assert_eq!(container, FieldPath::parse("ItemList\\4"));
    }

    #[test]
    fn struct_field_children_inherit_its_label() {
        let field = Placement::StructField {
            parent: FieldPath::parse("ItemList\\0"),
            label: "Props".to_string(),
        };
        let container = resolve_container(&FieldPath::root(), Some(&field));
        assert_eq!(container, FieldPath::parse("ItemList\\0\\Props"));
    }

    #[test]
    fn declared_path_overrides_inheritance() {
        let field = Placement::StructField {
            parent: FieldPath::root(),
            label: "A".to_string(),
        };
        let container = resolve_container(&FieldPath::parse("B"), Some(&field));
        assert_eq!(container, FieldPath::parse("B"));
    }
}
