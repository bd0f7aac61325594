use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

const GEMINI_API_KEY_FIELD: &str = "gemini_api_key";

/// Persistent client settings, holding the user's own model credential.
///
/// Nothing is read lazily: [`CredentialStore::load`] reads the file once at
/// startup and every mutation goes through [`CredentialStore::set_api_key`]
/// or [`CredentialStore::clear_api_key`], which write through immediately.
/// Unknown keys already present in the file are preserved.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    payload: Map<String, Value>,
}

impl CredentialStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let payload = read_json_object(&path).unwrap_or_default();
        Self { path, payload }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn api_key(&self) -> Option<&str> {
        self.payload
            .get(GEMINI_API_KEY_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn set_api_key(&mut self, key: &str) -> anyhow::Result<()> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            anyhow::bail!("API key must not be empty");
        }
        let mut next = self.payload.clone();
        next.insert(
            GEMINI_API_KEY_FIELD.to_string(),
            Value::String(trimmed.to_string()),
        );
        self.commit(next)
    }

    pub fn clear_api_key(&mut self) -> anyhow::Result<()> {
        let mut next = self.payload.clone();
        if next.remove(GEMINI_API_KEY_FIELD).is_none() {
            return Ok(());
        }
        self.commit(next)
    }

    /// Memory only changes once the file write succeeded.
    fn commit(&mut self, next: Map<String, Value>) -> anyhow::Result<()> {
        write_json_object(&self.path, &next)?;
        self.payload = next;
        Ok(())
    }
}

/// Masks a credential for display, keeping the last four characters.
pub fn mask_api_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = key.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
