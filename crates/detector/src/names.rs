use std::collections::HashMap;

/// Class id to human-readable label, as embedded by the exporter in the
/// model's `names` metadata entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassNames {
    names: HashMap<u32, String>,
}

impl ClassNames {
    pub fn new(names: HashMap<u32, String>) -> Self {
        Self { names }
    }

    /// Parse a Python-dict style mapping, e.g. `{0: 'person', 1: "bicycle"}`.
    ///
    /// Returns `None` if the string is not of that shape.
    pub fn parse(metadata: &str) -> Option<Self> {
        let body = metadata.trim().strip_prefix('{')?.strip_suffix('}')?;
        let mut names = HashMap::new();
        let mut rest = body.trim_start();

        while !rest.is_empty() {
            let (key, after_key) = rest.split_once(':')?;
            let id: u32 = key.trim().parse().ok()?;

            let after_key = after_key.trim_start();
            let quote = after_key.chars().next().filter(|c| *c == '\'' || *c == '"')?;
            let quoted = &after_key[1..];
            let end = quoted.find(quote)?;
            names.insert(id, quoted[..end].to_string());

            rest = quoted[end + 1..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        Some(Self { names })
    }

    /// Parse `metadata`, logging and falling back to an empty mapping when it
    /// is malformed.
    pub fn parse_or_empty(metadata: &str) -> Self {
        Self::parse(metadata).unwrap_or_else(|| {
            tracing::warn!(
                metadata_len = metadata.len(),
                "Could not parse class names from model metadata, labels will be class ids"
            );
            Self::default()
        })
    }

    pub fn name(&self, class_id: u32) -> String {
        match self.names.get(&class_id) {
            Some(name) => name.clone(),
            None => class_id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
