//! Canonical plugin ids and the alias table.

use std::collections::HashMap;

use crate::manifest::PluginManifest;

/// Lowercase ASCII slug: alphanumerics kept, every other run becomes one `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Clean a declared id: like [`slugify`] but `.` and `_` survive.
pub fn clean_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out.trim_matches(|c| matches!(c, '.' | '_' | '-')).to_string()
}

/// Content-derived id used when neither the id nor the name yields a slug.
pub fn hash_id(manifest_bytes: &[u8]) -> String {
    let hash = blake3::hash(manifest_bytes).to_hex();
    format!("plugin-{}", &hash.as_str()[..12])
}

/// Canonical id: cleaned declared id, else the slug of the name, else a hash
/// of the manifest bytes.
pub fn canonical_id(manifest: &PluginManifest, manifest_bytes: &[u8]) -> String {
    if let Some(id) = manifest.id.as_deref().map(clean_id).filter(|id| !id.is_empty()) {
        return id;
    }
    let slug = slugify(&manifest.name);
    if !slug.is_empty() {
        return slug;
    }
    hash_id(manifest_bytes)
}

/// Many-to-one map from human-facing keys to canonical ids.
///
/// Keys are matched exactly, then case-insensitively, then by their cleaned
/// form. Canonical ids always map to themselves and win over aliases.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    keys: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from `(id, keys)` pairs. Rebuilding from the same input always
    /// yields the same table.
    pub fn build<'a, I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, K)> + Clone,
        K: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new();
        for (id, _) in entries.clone() {
            table.keys.insert(id.to_string(), id.to_string());
        }
        for (id, keys) in entries {
            for key in keys {
                table.insert_alias(key, id);
            }
        }
        table
    }

    /// Map `key` (and its lowercase and cleaned forms) to `id`, unless taken.
    fn insert_alias(&mut self, key: &str, id: &str) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        for form in [key.to_string(), key.to_lowercase(), clean_id(key)] {
            if form.is_empty() {
                continue;
            }
            self.keys.entry(form).or_insert_with(|| id.to_string());
        }
    }

    /// Canonical id for `key`, if known.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        let key = key.trim();
        self.keys
            .get(key)
            .or_else(|| self.keys.get(&key.to_lowercase()))
            .or_else(|| self.keys.get(&clean_id(key)))
            .map(String::as_str)
    }

    /// Canonical form of `key`: the mapped id, or the cleaned key when unknown.
    /// `canonicalize(canonicalize(k)) == canonicalize(k)`.
    pub fn canonicalize(&self, key: &str) -> String {
        match self.resolve(key) {
            Some(id) => id.to_string(),
            None => clean_id(key),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: Option<&str>, name: &str) -> PluginManifest {
        PluginManifest {
            id: id.map(str::to_string),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Class Bell!! v2 "), "class-bell-v2");
        assert_eq!(slugify("点名"), "");
    }

    #[test]
    fn test_canonical_id_precedence() {
        assert_eq!(canonical_id(&manifest(Some(" Com.Bell "), "Bell"), b"{}"), "com.bell");
        assert_eq!(canonical_id(&manifest(None, "Class Bell"), b"{}"), "class-bell");

        let bytes = r#"{"name":"点名"}"#.as_bytes();
        let id = canonical_id(&manifest(None, "点名"), bytes);
        assert!(id.starts_with("plugin-"));
        assert_eq!(id.len(), "plugin-".len() + 12);
        assert_eq!(id, canonical_id(&manifest(None, "点名"), bytes));
    }

    #[test]
    fn test_alias_resolution() {
        let table = AliasTable::build([
            ("class-bell", vec!["Class Bell", "bell"]),
            ("roll-call", vec!["Roll Call", "bell"]),
        ]);
        assert_eq!(table.resolve("Class Bell"), Some("class-bell"));
        assert_eq!(table.resolve("CLASS BELL"), Some("class-bell"));
        // First claimant keeps a shared alias.
        assert_eq!(table.resolve("bell"), Some("class-bell"));
        assert_eq!(table.resolve("roll-call"), Some("roll-call"));
        assert_eq!(table.resolve("unknown"), None);
    }

    #[test]
    fn test_alias_cannot_shadow_id() {
        let table = AliasTable::build([
            ("alpha", vec!["beta"]),
            ("beta", vec![]),
        ]);
        assert_eq!(table.resolve("beta"), Some("beta"));
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let table = AliasTable::build([("class-bell", vec!["Class Bell", "铃"])]);
        for key in ["Class Bell", "class-bell", "铃", "Some Other Thing", "  x__y ", "-._-a", ""] {
            let once = table.canonicalize(key);
            assert_eq!(table.canonicalize(&once), once, "key {key:?}");
        }
    }
}
