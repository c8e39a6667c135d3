//! Template loaders.
//!
//! A loader turns a template name such as `"users/by_ids.sql"` into source
//! text. The [`TemplateLoader`] trait defines the interface; an
//! [`Environment`](crate::environment::Environment) asks its loaders in order
//! and uses the first hit.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use jsql_core::error::{JsqlError, JsqlResult};

/// Loads template source text by name.
pub trait TemplateLoader: Send + Sync {
    /// Loads the template source with the given name.
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if the template cannot be found.
    fn load(&self, name: &str) -> JsqlResult<String>;
}

/// Loads templates from one or more directories on the filesystem.
///
/// Searches each configured directory in order and returns the first match.
/// Names that would escape a directory (absolute paths, `..`) never match.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    dirs: Vec<PathBuf>,
}

impl FileSystemLoader {
    /// Creates a new `FileSystemLoader` with the given search directories.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// The directories searched, in order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

fn is_relative_inside(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> JsqlResult<String> {
        if is_relative_inside(name) {
            for dir in &self.dirs {
                let path = dir.join(name);
                if path.is_file() {
                    return std::fs::read_to_string(&path).map_err(|e| {
                        JsqlError::TemplateDoesNotExist(format!(
                            "Error reading template '{}': {e}",
                            path.display()
                        ))
                    });
                }
            }
        }

        Err(JsqlError::TemplateDoesNotExist(format!(
            "Template '{name}' not found in directories: {:?}",
            self.dirs
        )))
    }
}

/// Loads templates from an in-memory map of name to source strings.
///
/// Useful for tests and for applications that keep their query templates
/// embedded in the binary.
#[derive(Debug, Clone, Default)]
pub struct StringLoader {
    templates: HashMap<String, String>,
}

impl StringLoader {
    /// Creates a new empty `StringLoader`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `StringLoader` from a map of template names to source strings.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    /// Adds or replaces a template.
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    /// Builder form of [`add`](Self::add).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.add(name, source);
        self
    }
}

impl TemplateLoader for StringLoader {
    fn load(&self, name: &str) -> JsqlResult<String> {
        self.templates.get(name).cloned().ok_or_else(|| {
            JsqlError::TemplateDoesNotExist(format!("Template '{name}' not found in StringLoader"))
        })
    }
}
