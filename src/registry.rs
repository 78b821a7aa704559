//! Static app registry: which mini-applications the shell can host.
//!
//! The registry is loaded once at shell start and is immutable for the
//! session. Adding an app is a registry edit, not a protocol change.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ShellError;

/// Static description of one hostable mini-application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Stable app identifier, the registry key.
    pub id: String,
    /// Name shown in the window title bar.
    pub display_name: String,
    /// URL the embedded frame loads.
    pub source_url: String,
    /// Icon asset reference.
    pub icon: String,
    /// Initial window width in pixels.
    pub width: u32,
    /// Initial window height in pixels.
    pub height: u32,
}

/// Immutable `app_id -> AppDescriptor` mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppRegistry {
    apps: BTreeMap<String, AppDescriptor>,
}

impl AppRegistry {
    /// Build a registry from a list of descriptors.
    ///
    /// A duplicate ID keeps the last descriptor, matching "the registry is
    /// whatever the file says" semantics.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = AppDescriptor>) -> Self {
        let apps = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        Self { apps }
    }

    /// Load the registry from a JSON file containing an array of
    /// [`AppDescriptor`] objects.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::RegistryIo`] if the file cannot be read, or
    /// [`ShellError::RegistryFormat`] if it is not the expected JSON shape.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ShellError> {
        let content = std::fs::read_to_string(path)?;
        let descriptors: Vec<AppDescriptor> = serde_json::from_str(&content)?;
        Ok(Self::from_descriptors(descriptors))
    }

    /// Look up an app by ID.
    pub fn get(&self, app_id: &str) -> Option<&AppDescriptor> {
        self.apps.get(app_id)
    }

    /// Number of registered apps.
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Iterate over all descriptors in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &AppDescriptor> {
        self.apps.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn descriptor(id: &str) -> AppDescriptor {
        AppDescriptor {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            source_url: format!("https://apps.example/{id}/index.html"),
            icon: format!("{id}.png"),
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn lookup_by_id() {
        let registry = AppRegistry::from_descriptors([descriptor("notes"), descriptor("paint")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("notes").map(|d| d.display_name.as_str()),
            Some("NOTES")
        );
        assert_eq!(registry.get("solitaire"), None);
    }

    #[test]
    fn duplicate_id_keeps_the_last_descriptor() {
        let mut second = descriptor("notes");
        second.width = 800;
        let registry = AppRegistry::from_descriptors([descriptor("notes"), second]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("notes").map(|d| d.width), Some(800));
    }

    #[test]
    fn iterates_in_id_order() {
        let registry = AppRegistry::from_descriptors([descriptor("paint"), descriptor("notes")]);
        let ids: Vec<&str> = registry.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["notes", "paint"]);
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("failed to create temp file");
        write!(
            file,
            r#"[{{"id":"notes","display_name":"Notes","source_url":"https://apps.example/notes","icon":"notes.png","width":640,"height":480}}]"#
        )
        .expect("write should succeed");

        let registry = AppRegistry::from_path(file.path()).expect("registry should load");
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("notes").map(|d| d.source_url.as_str()),
            Some("https://apps.example/notes")
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = AppRegistry::from_path("/definitely/not/here.json");
        assert!(matches!(result, Err(ShellError::RegistryIo(_))));
    }

    #[test]
    fn invalid_json_is_a_format_error() {
        let mut file = tempfile::NamedTempFile::new().expect("failed to create temp file");
        write!(file, "{{not json").expect("write should succeed");
        let result = AppRegistry::from_path(file.path());
        assert!(matches!(result, Err(ShellError::RegistryFormat(_))));
    }
}
