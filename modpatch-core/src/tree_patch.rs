use crate::memory::{MemoryValue, TokenKind, TokenStore};
use crate::path::{resolve_container, FieldPath, Placement};
use crate::tree::{parse_string_ref, Field, FieldKind, LocString, NodeMut, Struct, Tree};
use crate::value::{Resolver, Scope, ValueExpr};
use crate::{PatchError, Result};

/// Struct type id of a field being added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructId {
    Fixed(u32),
    /// The index the struct lands at in its list.
    ListIndex,
}

/// What a `2DAMEMORY<n>` key inside an AddField section stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeCapture {
    ListIndex,
    FieldPath,
}

/// Part of a localized string a modification addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocPart {
    StringRef,
    Language(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddField {
    /// Change-set section this declaration came from.
    pub section: String,
    pub kind: FieldKind,
    pub path: FieldPath,
    pub label: String,
    pub value: Option<ValueExpr>,
    pub struct_id: StructId,
    pub string_ref: Option<ValueExpr>,
    pub substrings: Vec<(u32, ValueExpr)>,
    pub children: Vec<AddField>,
    pub captures: Vec<(u32, TreeCapture)>,
}

impl AddField {
    pub fn new(section: impl Into<String>, kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            kind,
            path: FieldPath::root(),
            label: label.into(),
            value: None,
            struct_id: StructId::Fixed(0),
            string_ref: None,
            substrings: Vec::new(),
            children: Vec::new(),
            captures: Vec::new(),
        }
    }

    /// Create the field, take its captures, then build its children with
    /// this field's location as their inherited path.
    pub fn apply(&self, root: &mut Struct, parent: Option<&Placement>, tokens: &mut TokenStore) -> Result<()> {
        let container = resolve_container(&self.path, parent);
        let placement = {
            let scope = Scope::Tree {
                list_index: parent.and_then(Placement::list_index),
            };
            let resolver = Resolver::new(tokens, scope);
            let node = root
                .node_mut(container.segments())
                .ok_or_else(|| {
                    PatchError::schema(format!(
                        "no container {container} for a new {} field",
                        self.kind
                    ))
                })?;
            match node {
                NodeMut::List(list) => self.append_to_list(list, container)?,
                NodeMut::Struct(target) => self.insert_into_struct(target, container, &resolver)?,
            }
        };
        log::debug!("added {} field at {}", self.kind, placement.path());

        self.store_captures(&placement, tokens)?;

        for child in &self.children {
            child
                .apply(root, Some(&placement), tokens)
                .map_err(|e| e.in_section(&child.section))?;
        }
        Ok(())
    }

    fn append_to_list(&self, list: &mut Vec<Struct>, container: FieldPath) -> Result<Placement> {
        if !self.label.is_empty() {
            return Err(PatchError::schema(format!(
                "list elements are unlabeled, but label '{}' was given for a new element of the list at {container}",
                self.label
            )));
        }
        if self.kind != FieldKind::Struct {
            return Err(PatchError::schema(format!(
                "only structs can be list elements; a {} field was added to the list at {container}",
                self.kind
            )));
        }
        let index = list.len();
        let type_id = match self.struct_id {
            StructId::Fixed(id) => id,
            StructId::ListIndex => u32::try_from(index)
                .map_err(|_| PatchError::invalid(index.to_string(), "struct type id"))?,
        };
        list.push(Struct::new(type_id));
        Ok(Placement::ListElement {
            list: container,
            index,
        })
    }

    fn insert_into_struct(
        &self,
        target: &mut Struct,
        container: FieldPath,
        resolver: &Resolver<'_>,
    ) -> Result<Placement> {
        if self.label.is_empty() {
            return Err(PatchError::schema(format!(
                "a {} field inside the struct at {container} needs a label",
                self.kind
            )));
        }
        if self.kind == FieldKind::Struct && self.struct_id == StructId::ListIndex {
            return Err(PatchError::schema(format!(
                "TypeId=ListIndex on '{}': the struct at {container} is not a list",
                self.label
            )));
        }

        let field = self.build_field(resolver)?;
        match target.fields.get_mut(self.label.as_str()) {
            Some(existing) if existing.kind() != self.kind => {
                return Err(PatchError::schema(format!(
                    "'{}' in the struct at {container} already holds a {} field, not {}",
                    self.label,
                    existing.kind(),
                    self.kind
                )));
            }
            Some(Field::List(_)) => {
                log::debug!("list '{}' already exists at {container}; reusing it", self.label);
            }
            Some(Field::Struct(existing)) => {
                if let Field::Struct(new) = field {
                    existing.type_id = new.type_id;
                }
            }
            Some(existing) => *existing = field,
            None => {
                target.insert(self.label.clone(), field);
            }
        }
        Ok(Placement::StructField {
            parent: container,
            label: self.label.clone(),
        })
    }

    fn build_field(&self, resolver: &Resolver<'_>) -> Result<Field> {
        match self.kind {
            FieldKind::Struct => {
                let type_id = match self.struct_id {
                    StructId::Fixed(id) => id,
                    StructId::ListIndex => 0,
                };
                Ok(Field::Struct(Struct::new(type_id)))
            }
            FieldKind::List => Ok(Field::List(Vec::new())),
            FieldKind::LocString => {
                let mut loc = LocString::default();
                if let Some(expr) = self.string_ref.as_ref().or(self.value.as_ref()) {
                    loc.string_ref = parse_string_ref(&resolver.resolve(expr)?)?;
                }
                for (id, expr) in &self.substrings {
                    loc.substrings.insert(*id, resolver.resolve(expr)?);
                }
                Ok(Field::LocString(loc))
            }
            kind => {
                let expr = self.value.as_ref().ok_or_else(|| {
                    PatchError::schema(format!("{kind} field '{}' declares no Value", self.label))
                })?;
                Field::from_text(kind, &resolver.resolve(expr)?)
            }
        }
    }

    fn store_captures(&self, placement: &Placement, tokens: &mut TokenStore) -> Result<()> {
        for (token, capture) in &self.captures {
            let value = match capture {
                TreeCapture::ListIndex => {
                    let index = placement.list_index().ok_or_else(|| {
                        PatchError::schema(format!(
                            "2DAMEMORY{token}=ListIndex, but '{}' was not appended to a list",
                            self.label
                        ))
                    })?;
                    MemoryValue::Text(index.to_string())
                }
                TreeCapture::FieldPath => MemoryValue::Path(placement.path()),
            };
            tokens.set_memory(*token, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifyField {
    pub path: FieldPath,
    pub part: Option<LocPart>,
    pub value: ValueExpr,
}

impl ModifyField {
    pub fn apply(&self, root: &mut Struct, tokens: &TokenStore) -> Result<()> {
        let text = Resolver::new(tokens, Scope::Tree { list_index: None }).resolve(&self.value)?;
        modify_at(root, &self.path, self.part, &text)
    }
}

fn modify_at(root: &mut Struct, path: &FieldPath, part: Option<LocPart>, text: &str) -> Result<()> {
    let field = root.field_mut(path).ok_or_else(|| PatchError::TargetNotFound {
        what: format!("field {path}"),
    })?;
    let Some(part) = part else {
        return field.assign_text(text);
    };
    let kind = field.kind();
    let Field::LocString(loc) = field else {
        return Err(PatchError::schema(format!(
            "{path} is a {kind} field, not a localized string"
        )));
    };
    match part {
        LocPart::StringRef => loc.string_ref = parse_string_ref(text)?,
        LocPart::Language(id) => {
            loc.substrings.insert(id, text.to_string());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeModifier {
    AddField(AddField),
    ModifyField(ModifyField),
    /// `2DAMEMORY<n>=expr` at file level: modify the field at the path
    /// captured in token n, or copy a memory token into an unset token n.
    MemoryField { token: u32, value: ValueExpr },
}

impl TreeModifier {
    pub fn apply(&self, tree: &mut Tree, tokens: &mut TokenStore) -> Result<()> {
        match self {
            TreeModifier::AddField(op) => op
                .apply(&mut tree.root, None, tokens)
                .map_err(|e| e.in_section(&op.section)),
            TreeModifier::ModifyField(op) => op.apply(&mut tree.root, tokens),
            TreeModifier::MemoryField { token, value } => {
                apply_memory_field(&mut tree.root, *token, value, tokens)
            }
        }
    }
}

fn apply_memory_field(root: &mut Struct, token: u32, value: &ValueExpr, tokens: &mut TokenStore) -> Result<()> {
    if !tokens.has_memory(token) {
        return match value {
            ValueExpr::Memory(src) => tokens.copy_memory(token, *src),
            _ => Err(PatchError::UndefinedToken {
                kind: TokenKind::Memory,
                id: token,
            }),
        };
    }
    let captured = match tokens.get_memory(token)? {
        MemoryValue::Path(path) => Some(path.clone()),
        MemoryValue::Text(_) => None,
    };
    match (captured, value) {
        (Some(path), _) => {
            let text = Resolver::new(tokens, Scope::Tree { list_index: None }).resolve(value)?;
            modify_at(root, &path, None, &text)
        }
        (None, ValueExpr::Memory(src)) => tokens.copy_memory(token, *src),
        (None, _) => Err(PatchError::schema(format!(
            "2DAMEMORY{token} holds a value, not a captured field path"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creature() -> Tree {
        let mut tree = Tree::new(*b"UTC ");
        tree.root.insert("Tag", Field::String("npc".to_string()));
        tree.root.insert("ItemList", Field::List(Vec::new()));
        tree
    }

    fn list_element(section: &str) -> AddField {
        let mut op = AddField::new(section, FieldKind::Struct, "");
        op.path = FieldPath::parse("ItemList");
        op.struct_id = StructId::ListIndex;
        op
    }

    fn scalar(section: &str, kind: FieldKind, label: &str, value: &str) -> AddField {
        let mut op = AddField::new(section, kind, label);
        op.value = Some(ValueExpr::parse(value));
        op
    }

    #[test]
    fn appends_struct_with_inherited_children() {
        let mut tree = creature();
        let mut tokens = TokenStore::new();
        let mut element = list_element("item");
        element.captures = vec![(0, TreeCapture::ListIndex)];
        element.children = vec![
            scalar("item_res", FieldKind::ResRef, "InventoryRes", "g_w_lghtsbr01"),
            scalar("item_slot", FieldKind::Word, "Slot", "ListIndex"),
        ];

        TreeModifier::AddField(element.clone())
            .apply(&mut tree, &mut tokens)
            .unwrap();

        let res = FieldPath::parse("ItemList\\0\\InventoryRes");
        assert_eq!(
            tree.root.field(&res),
            Some(&Field::ResRef("g_w_lghtsbr01".to_string()))
        );
        assert_eq!(
            tree.root.field(&FieldPath::parse("ItemList\\0\\Slot")),
            Some(&Field::Word(0))
        );
        assert_eq!(tokens.get_memory(0).unwrap(), &MemoryValue::Text("0".to_string()));

        let Some(Field::List(items)) = tree.root.get("ItemList") else {
            panic!("ItemList missing")
        };
        assert_eq!(items[0].type_id, 0);
    }

    #[test]
    fn list_elements_must_be_unlabeled() {
        let mut tree = creature();
        let mut op = list_element("bad");
        op.label = "Item".to_string();
        let err = TreeModifier::AddField(op)
            .apply(&mut tree, &mut TokenStore::new())
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("list elements are unlabeled"));
        assert_eq!(tree, creature());
    }

    #[test]
    fn list_elements_must_be_structs() {
        let mut tree = creature();
        let mut op = scalar("bad", FieldKind::Int, "", "1");
        op.path = FieldPath::parse("ItemList");
        let err = TreeModifier::AddField(op)
            .apply(&mut tree, &mut TokenStore::new())
            .unwrap_err();
        assert!(err.to_string().contains("only structs can be list elements"));
    }

    #[test]
    fn struct_fields_need_a_label() {
        let mut tree = creature();
        let op = scalar("bad", FieldKind::Int, "", "1");
        let err = TreeModifier::AddField(op)
            .apply(&mut tree, &mut TokenStore::new())
            .unwrap_err();
        assert!(matches!(
            err,
            PatchError::InSection { ref source, .. } if matches!(**source, PatchError::SchemaMismatch { .. })
        ));
        assert!(err.to_string().contains("needs a label"));
    }

    #[test]
    fn existing_label_of_other_type_is_rejected() {
        let mut tree = creature();
        let op = scalar("bad", FieldKind::Int, "Tag", "1");
        assert!(TreeModifier::AddField(op)
            .apply(&mut tree, &mut TokenStore::new())
            .is_err());
        assert_eq!(tree.root.get("Tag"), Some(&Field::String("npc".to_string())));
    }

    #[test]
    fn captured_path_targets_the_added_field() {
        let mut tree = creature();
        let mut tokens = TokenStore::new();

        for i in 0..2 {
            let mut element = list_element(&format!("before_{i}"));
            element.children = vec![scalar("tag", FieldKind::String, "Tag", "early")];
            TreeModifier::AddField(element).apply(&mut tree, &mut tokens).unwrap();
        }

        let mut tracked = list_element("tracked");
        let mut tag = scalar("tracked_tag", FieldKind::String, "Tag", "tracked");
        tag.captures = vec![(5, TreeCapture::FieldPath)];
        tracked.children = vec![tag];
        TreeModifier::AddField(tracked).apply(&mut tree, &mut tokens).unwrap();

        for i in 0..3 {
            let mut element = list_element(&format!("after_{i}"));
            element.children = vec![scalar("tag", FieldKind::String, "Tag", "late")];
            TreeModifier::AddField(element).apply(&mut tree, &mut tokens).unwrap();
        }

        TreeModifier::MemoryField {
            token: 5,
            value: ValueExpr::parse("patched"),
        }
        .apply(&mut tree, &mut tokens)
        .unwrap();

        let path = FieldPath::parse("ItemList\\2\\Tag");
        assert_eq!(tokens.get_memory(5).unwrap(), &MemoryValue::Path(path.clone()));
        assert_eq!(tree.root.field(&path), Some(&Field::String("patched".to_string())));
        assert_eq!(
            tree.root.field(&FieldPath::parse("ItemList\\3\\Tag")),
            Some(&Field::String("late".to_string()))
        );
    }

    #[test]
    fn memory_field_copies_into_unset_tokens() {
        let mut tree = creature();
        let mut tokens = TokenStore::new();
        tokens.set_memory(1, MemoryValue::Text("7".to_string())).unwrap();
        TreeModifier::MemoryField {
            token: 2,
            value: ValueExpr::Memory(1),
        }
        .apply(&mut tree, &mut tokens)
        .unwrap();
        assert_eq!(tokens.get_memory(2).unwrap(), &MemoryValue::Text("7".to_string()));

        let err = TreeModifier::MemoryField {
            token: 2,
            value: ValueExpr::parse("3"),
        }
        .apply(&mut tree, &mut tokens)
        .unwrap_err();
        assert!(matches!(err, PatchError::SchemaMismatch { .. }));

        let err = TreeModifier::MemoryField {
            token: 9,
            value: ValueExpr::parse("3"),
        }
        .apply(&mut tree, &mut tokens)
        .unwrap_err();
        assert!(matches!(
            err,
            PatchError::UndefinedToken {
                kind: TokenKind::Memory,
                id: 9
            }
        ));
    }

    #[test]
    fn modify_field_by_path() {
        let mut tree = creature();
        let mut tokens = TokenStore::new();
        tokens.set_memory(0, MemoryValue::Text("renamed".to_string())).unwrap();
        TreeModifier::ModifyField(ModifyField {
            path: FieldPath::parse("Tag"),
            part: None,
            value: ValueExpr::Memory(0),
        })
        .apply(&mut tree, &mut tokens)
        .unwrap();
        assert_eq!(tree.root.get("Tag"), Some(&Field::String("renamed".to_string())));

        let err = TreeModifier::ModifyField(ModifyField {
            path: FieldPath::parse("Missing"),
            part: None,
            value: ValueExpr::parse("1"),
        })
        .apply(&mut tree, &mut tokens)
        .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn localized_string_parts() {
        let mut tree = creature();
        let mut tokens = TokenStore::new();
        tokens.set_string(3, 136_000).unwrap();

        let mut name = AddField::new("name", FieldKind::LocString, "FirstName");
        name.string_ref = Some(ValueExpr::StrRef(3));
        name.substrings = vec![(0, ValueExpr::parse("Bastila"))];
        TreeModifier::AddField(name).apply(&mut tree, &mut tokens).unwrap();

        TreeModifier::ModifyField(ModifyField {
            path: FieldPath::parse("FirstName"),
            part: Some(LocPart::Language(2)),
            value: ValueExpr::parse("Bastila (fr)"),
        })
        .apply(&mut tree, &mut tokens)
        .unwrap();

        let Some(Field::LocString(loc)) = tree.root.get("FirstName") else {
            panic!("FirstName missing")
        };
        assert_eq!(loc.string_ref, Some(136_000));
        assert_eq!(loc.substrings.len(), 2);

        let err = TreeModifier::ModifyField(ModifyField {
            path: FieldPath::parse("Tag"),
            part: Some(LocPart::StringRef),
            value: ValueExpr::parse("1"),
        })
        .apply(&mut tree, &mut tokens)
        .unwrap_err();
        assert!(matches!(err, PatchError::SchemaMismatch { .. }));
    }

    #[test]
    fn missing_container_is_fatal() {
        let mut tree = creature();
        let mut op = scalar("x", FieldKind::Int, "Value", "1");
        op.path = FieldPath::parse("NoSuchStruct");
        let err = TreeModifier::AddField(op)
            .apply(&mut tree, &mut TokenStore::new())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_child_container_fails_the_whole_field() {
        let mut tree = creature();
        let mut element = list_element("item");
        let mut bad = scalar("bad", FieldKind::Int, "X", "1");
        bad.path = FieldPath::parse("NoSuchStruct");
        element.children = vec![bad, scalar("good", FieldKind::Int, "Y", "2")];
        let err = TreeModifier::AddField(element)
            .apply(&mut tree, &mut TokenStore::new())
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("[bad]"));
    }
}
