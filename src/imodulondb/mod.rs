//! iModulonDB export.
//!
//! Builds the tables behind the iModulonDB dataset, iModulon and gene pages
//! from an [`IcaData`](crate::data::IcaData) and writes them to the site's
//! folder layout. Drawing the plots is left to the site.

pub mod compat;
pub mod export;
pub mod meta;
pub mod tables;
pub mod tf;

pub use compat::{
    check_compatibility, generate_n_replicates_column, prepare_for_export, CompatibilityReport,
    TableIssue, TfIssue,
};
pub use export::{export, ExportOptions};
pub use meta::ImodulondbMeta;
pub use tables::{
    activity_bar_df, dataset_table, gene_activity_bar_df, gene_basics, gene_hist_df,
    gene_imodulon_table_df, gene_presence, gene_scatter_df, gene_table_df, imodulon_basics,
    imodulon_table_df, regulon_scatter_df, regulon_venn_df, DEFAULT_HIST_BINS, DEFAULT_HIST_TOL,
};
pub use tf::{get_tfs_to_scatter, parse_tf_string, split_tf_string, tf_with_links, BUILTIN_TF_RENAMES};
