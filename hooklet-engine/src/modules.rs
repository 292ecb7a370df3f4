//! Module allow-list provider
//!
//! `%name` rewrites resolve only to modules the operator has explicitly
//! enabled; the catalog supplying that list lives outside the engine.

/// Source of the enabled third-party module names passed to workers
pub trait ModuleCatalog: Send + Sync {
    fn enabled_modules(&self) -> Vec<String>;
}

/// Fixed catalog, handy for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticModuleCatalog {
    names: Vec<String>,
}

impl StaticModuleCatalog {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Catalog with nothing enabled
    pub fn empty() -> Self {
        Self::default()
    }
}

impl ModuleCatalog for StaticModuleCatalog {
    fn enabled_modules(&self) -> Vec<String> {
        self.names.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_catalog() {
        let catalog = StaticModuleCatalog::new(["moment", "slugify"]);
        assert_eq!(catalog.enabled_modules(), vec!["moment", "slugify"]);
        assert!(StaticModuleCatalog::empty().enabled_modules().is_empty());
    }
}
