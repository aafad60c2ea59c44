//! Brand document hydration.
//!
//! Skill results are merged into a single JSON brand document at the
//! dot-paths declared by each skill's output fields. A `.bak` sibling
//! is refreshed before every merge so the last pre-merge content can
//! be rolled back by hand. Merges are ordered by wave, so when two skills
//! target the same path the later wave wins.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::catalog::SkillDefinition;
use crate::error::PipelineError;
use crate::fsutil;

/// Read the value at a dot-path, e.g. `"brand.voice.tone"`.
pub fn get_nested<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.split('.') {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

/// Write `value` at a dot-path, creating intermediate objects as
/// needed. An intermediate non-object is replaced by an object.
pub fn set_nested(root: &mut Value, path: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Default::default());
    }
    match path.split_once('.') {
        None => {
            if let Some(obj) = root.as_object_mut() {
                obj.insert(path.to_string(), value);
            }
        }
        Some((head, rest)) => {
            if let Some(obj) = root.as_object_mut() {
                let next = obj
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Default::default()));
                set_nested(next, rest, value);
            }
        }
    }
}

/// The JSON brand document under hydration.
pub struct BrandDocument {
    path: PathBuf,
    root: Value,
}

impl BrandDocument {
    /// Load the document, or start an empty one if the file does not
    /// exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        let root = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Value::Object(Default::default())
        };
        Ok(Self { path, root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_nested(&self.root, path)
    }

    pub fn set(&mut self, path: &str, value: Value) {
        set_nested(&mut self.root, path, value);
    }

    /// Persist the current document atomically.
    pub fn save(&self) -> Result<(), PipelineError> {
        fsutil::atomic_write_json(&self.path, &self.root)
    }

    /// Refresh the `.bak` sibling with the current on-disk content.
    /// Runs before every merge, so the backup always holds the state
    /// the last merge started from.
    fn backup(&self) -> Result<(), PipelineError> {
        if !self.path.exists() {
            return Ok(());
        }
        let bak = self.path.with_extension("json.bak");
        std::fs::copy(&self.path, &bak)?;
        tracing::debug!(
            target: "brandloom::hydrator",
            backup = %bak.display(),
            "document backed up"
        );
        Ok(())
    }

    /// Merge one skill's result into the document and persist.
    ///
    /// All declared fields are extracted before anything is written; a
    /// missing required field fails the merge with the full missing
    /// list and leaves the document untouched.
    pub fn hydrate(
        &mut self,
        def: &SkillDefinition,
        result: &Value,
    ) -> Result<usize, PipelineError> {
        let mut staged: Vec<(&str, Value)> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        for field in &def.output_fields {
            match get_nested(result, &field.source) {
                Some(v) => staged.push((&field.target, v.clone())),
                None if field.required => missing.push(field.source.clone()),
                None => {}
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::SkillOutputInvalid {
                skill: def.id.clone(),
                missing_fields: missing,
            });
        }
        self.backup()?;
        let applied = staged.len();
        for (target, value) in staged {
            set_nested(&mut self.root, target, value);
        }
        self.save()?;
        tracing::debug!(
            target: "brandloom::hydrator",
            skill = %def.id,
            fields = applied,
            "document hydrated"
        );
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{OutputField, SkillDefinition, SkillKind};
    use serde_json::json;

    fn def_with_fields(fields: Vec<OutputField>) -> SkillDefinition {
        SkillDefinition {
            id: "persona".into(),
            name: "Persona".into(),
            category: "strategy".into(),
            kind: SkillKind::Text,
            wave_hint: None,
            depends_on: vec![],
            optional_depends_on: vec![],
            output_fields: fields,
            anchor: false,
            model: String::new(),
            seed: 0,
            size_hint: None,
            estimated_cost: None,
            description: String::new(),
        }
    }

    fn field(source: &str, target: &str, required: bool) -> OutputField {
        OutputField {
            source: source.into(),
            target: target.into(),
            required,
        }
    }

    #[test]
    fn nested_get_set_roundtrip() {
        let mut root = json!({});
        set_nested(&mut root, "brand.voice.tone", json!("warm"));
        assert_eq!(get_nested(&root, "brand.voice.tone"), Some(&json!("warm")));
        assert!(get_nested(&root, "brand.voice.missing").is_none());

        // Intermediate scalar gets replaced by an object.
        set_nested(&mut root, "brand.voice", json!("flat"));
        set_nested(&mut root, "brand.voice.tone", json!("bold"));
        assert_eq!(get_nested(&root, "brand.voice.tone"), Some(&json!("bold")));

        // Top-level and deep paths both land.
        set_nested(&mut root, "name", json!("acme"));
        set_nested(&mut root, "a.b.c.d", json!(1));
        assert_eq!(get_nested(&root, "name"), Some(&json!("acme")));
        assert_eq!(get_nested(&root, "a.b.c.d"), Some(&json!(1)));
    }

    #[test]
    fn hydrate_applies_declared_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brand.json");
        let mut doc = BrandDocument::load(&path).unwrap();
        let def = def_with_fields(vec![
            field("persona.summary", "brand.persona", true),
            field("persona.tagline", "brand.tagline", false),
        ]);

        let applied = doc
            .hydrate(&def, &json!({"persona": {"summary": "maker-led"}}))
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(doc.get("brand.persona"), Some(&json!("maker-led")));

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(get_nested(&on_disk, "brand.persona"), Some(&json!("maker-led")));
    }

    #[test]
    fn missing_required_field_fails_without_touching_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brand.json");
        std::fs::write(&path, r#"{"brand":{"persona":"old"}}"#).unwrap();
        let mut doc = BrandDocument::load(&path).unwrap();
        let def = def_with_fields(vec![
            field("persona.summary", "brand.persona", true),
            field("persona.tagline", "brand.tagline", true),
        ]);

        let err = doc.hydrate(&def, &json!({"other": 1})).unwrap_err();
        match err {
            PipelineError::SkillOutputInvalid { missing_fields, .. } => {
                assert_eq!(missing_fields, vec!["persona.summary", "persona.tagline"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(doc.get("brand.persona"), Some(&json!("old")));
        // No backup written for a failed merge.
        assert!(!path.with_extension("json.bak").exists());
    }

    #[test]
    fn backup_refreshed_before_every_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brand.json");
        std::fs::write(&path, r#"{"brand":{"persona":"original"}}"#).unwrap();
        let mut doc = BrandDocument::load(&path).unwrap();
        let def = def_with_fields(vec![field("v", "brand.persona", true)]);
        let bak = path.with_extension("json.bak");

        doc.hydrate(&def, &json!({"v": "first"})).unwrap();
        let bak_root: Value =
            serde_json::from_str(&std::fs::read_to_string(&bak).unwrap()).unwrap();
        assert_eq!(
            get_nested(&bak_root, "brand.persona"),
            Some(&json!("original"))
        );

        doc.hydrate(&def, &json!({"v": "second"})).unwrap();
        let bak_root: Value =
            serde_json::from_str(&std::fs::read_to_string(&bak).unwrap()).unwrap();
        // The backup tracks the state each merge started from.
        assert_eq!(get_nested(&bak_root, "brand.persona"), Some(&json!("first")));
        assert_eq!(doc.get("brand.persona"), Some(&json!("second")));
    }

    #[test]
    fn later_merge_wins_on_shared_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = BrandDocument::load(dir.path().join("brand.json")).unwrap();
        let def = def_with_fields(vec![field("v", "brand.hero", true)]);

        doc.hydrate(&def, &json!({"v": "wave-1"})).unwrap();
        doc.hydrate(&def, &json!({"v": "wave-2"})).unwrap();
        assert_eq!(doc.get("brand.hero"), Some(&json!("wave-2")));
    }
}
