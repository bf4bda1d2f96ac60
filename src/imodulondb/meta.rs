//! Dataset metadata shown on iModulonDB pages.

use serde::{Deserialize, Serialize};

/// Descriptive metadata of an exported dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImodulondbMeta {
    pub organism: String,
    pub dataset: String,
    pub strain: String,
    pub publication_name: String,
    pub publication_link: String,
    /// Name of the database gene links point to.
    pub gene_link_db: String,
    pub organism_folder: String,
    pub dataset_folder: String,
}

impl Default for ImodulondbMeta {
    fn default() -> Self {
        Self {
            organism: "New Organism".to_string(),
            dataset: "New Dataset".to_string(),
            strain: "Unspecified".to_string(),
            publication_name: "Unpublished Study".to_string(),
            publication_link: String::new(),
            gene_link_db: "External Database".to_string(),
            organism_folder: "new_organism".to_string(),
            dataset_folder: "new_dataset".to_string(),
        }
    }
}

impl ImodulondbMeta {
    /// `(field, value)` pairs in display order.
    pub fn fields(&self) -> [(&'static str, &str); 8] {
        [
            ("organism", &self.organism),
            ("dataset", &self.dataset),
            ("strain", &self.strain),
            ("publication_name", &self.publication_name),
            ("publication_link", &self.publication_link),
            ("gene_link_db", &self.gene_link_db),
            ("organism_folder", &self.organism_folder),
            ("dataset_folder", &self.dataset_folder),
        ]
    }

    /// Fields still holding their default value.
    pub fn unchanged_fields(&self) -> Vec<&'static str> {
        let defaults = Self::default();
        self.fields()
            .iter()
            .zip(defaults.fields().iter())
            .filter(|(ours, default)| ours.1 == default.1)
            .map(|(ours, _)| ours.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fields_are_unchanged() {
        let meta = ImodulondbMeta::default();
        assert_eq!(meta.unchanged_fields().len(), 8);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let meta: ImodulondbMeta =
            serde_yaml::from_str("organism: Escherichia coli\ndataset: PRECISE").unwrap();
        assert_eq!(meta.organism, "Escherichia coli");
        assert_eq!(meta.strain, "Unspecified");
        let unchanged = meta.unchanged_fields();
        assert!(!unchanged.contains(&"organism"));
        assert!(unchanged.contains(&"strain"));
    }
}
