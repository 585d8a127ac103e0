//! Registry of Python libraries permitted inside the sandbox.
//!
//! The list is static. It drives both the `list_available_python_libs` tool and
//! the import allow-list handed to the sandbox, so what callers are told is
//! exactly what their code may import.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::ConfigError;
use crate::sandbox::Preload;

/// A library available to sandboxed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryDescriptor {
    /// Top-level module name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Global name the module is pre-bound to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preloaded_as: Option<&'static str>,
    /// Module bound to `preloaded_as`; a submodule for matplotlib.
    #[serde(skip)]
    pub preload_module: &'static str,
}

const fn lib(
    name: &'static str,
    description: &'static str,
    preloaded_as: Option<&'static str>,
) -> LibraryDescriptor {
    LibraryDescriptor {
        name,
        description,
        preloaded_as,
        preload_module: name,
    }
}

/// Libraries permitted inside the sandbox, in presentation order.
pub const PERMITTED_LIBRARIES: &[LibraryDescriptor] = &[
    lib("pandas", "Data manipulation and analysis", Some("pd")),
    lib("numpy", "Numerical computing", Some("np")),
    LibraryDescriptor {
        name: "matplotlib",
        description: "Plotting and visualization (Agg backend, figures returned as PNG)",
        preloaded_as: Some("plt"),
        preload_module: "matplotlib.pyplot",
    },
    lib("openpyxl", "Excel file reading/writing", Some("openpyxl")),
    lib("json", "JSON encoding and decoding", Some("json")),
    lib("csv", "CSV file reading and writing", Some("csv")),
    lib("math", "Mathematical functions", Some("math")),
    lib("statistics", "Basic statistical functions", Some("statistics")),
    lib("datetime", "Dates and times", Some("datetime")),
    lib("re", "Regular expressions", Some("re")),
];

/// Read-only registry over a list of library descriptors.
#[derive(Debug, Clone, Copy)]
pub struct LibraryRegistry {
    libraries: &'static [LibraryDescriptor],
}

impl LibraryRegistry {
    /// Returns the registry of permitted libraries.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            libraries: PERMITTED_LIBRARIES,
        }
    }

    /// Creates a registry over an arbitrary list.
    #[must_use]
    pub fn from_static(libraries: &'static [LibraryDescriptor]) -> Self {
        Self { libraries }
    }

    /// Checks the registry is usable.
    ///
    /// A malformed registry is a startup error, never a runtime one.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LibraryRegistry` if the list is empty, contains a
    /// duplicate name, or a name that is not a valid top-level module name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.libraries.is_empty() {
            return Err(ConfigError::LibraryRegistry(
                "no libraries configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for library in self.libraries {
            if !is_module_identifier(library.name) {
                return Err(ConfigError::LibraryRegistry(format!(
                    "'{}' is not a valid module name",
                    library.name
                )));
            }
            if !seen.insert(library.name) {
                return Err(ConfigError::LibraryRegistry(format!(
                    "'{}' is listed twice",
                    library.name
                )));
            }
        }
        Ok(())
    }

    /// Returns the descriptors in presentation order.
    #[must_use]
    pub fn list(&self) -> &'static [LibraryDescriptor] {
        self.libraries
    }

    /// Returns the top-level module names sandboxed code may import.
    #[must_use]
    pub fn permitted_imports(&self) -> Vec<String> {
        self.libraries.iter().map(|l| l.name.to_string()).collect()
    }

    /// Returns the `(global name, module)` bindings made before code runs.
    ///
    /// Every library is bound under its own name; libraries with an alias are
    /// bound under the alias as well.
    #[must_use]
    pub fn preloads(&self) -> Vec<Preload> {
        let mut preloads = Vec::new();
        for library in self.libraries {
            preloads.push(Preload::new(library.name, library.name));
            if let Some(alias) = library.preloaded_as {
                if alias != library.name {
                    preloads.push(Preload::new(alias, library.preload_module));
                }
            }
        }
        preloads
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn is_module_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
