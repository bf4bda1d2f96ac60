//! imodulon - iModulon analysis CLI
//!
//! Command-line interface for working with precomputed ICA models of
//! transcriptomic data.

use clap::{Parser, Subcommand, ValueEnum};
use imodulon::compare::{compare_ica, OrthologTable, DEFAULT_COMPARE_CUTOFF};
use imodulon::config::{read_pairs, DatasetConfig};
use imodulon::data::{IcaData, LabeledMatrix, ThresholdMethod};
use imodulon::enrichment::{EnrichmentMethod, TrnEnrichmentOptions};
use imodulon::error::Result;
use imodulon::imodulondb::{check_compatibility, export, ExportOptions};
use imodulon::inference::infer_activities;
use imodulon::io::{load_json_model, save_to_json};
use imodulon::stats::CorrelationMethod;
use imodulon::synthetic::{generate_synthetic, SyntheticConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// CLI-friendly enrichment method enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliEnrichmentMethod {
    /// Intersections and unions of regulons
    Both,
    /// Intersections only (a+b)
    And,
    /// Unions only (a/b)
    Or,
}

impl From<CliEnrichmentMethod> for EnrichmentMethod {
    fn from(method: CliEnrichmentMethod) -> Self {
        match method {
            CliEnrichmentMethod::Both => EnrichmentMethod::Both,
            CliEnrichmentMethod::And => EnrichmentMethod::And,
            CliEnrichmentMethod::Or => EnrichmentMethod::Or,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliCorrelation {
    Pearson,
    Spearman,
}

impl From<CliCorrelation> for CorrelationMethod {
    fn from(method: CliCorrelation) -> Self {
        match method {
            CliCorrelation::Pearson => CorrelationMethod::Pearson,
            CliCorrelation::Spearman => CorrelationMethod::Spearman,
        }
    }
}

/// iModulon analysis of precomputed ICA decompositions
#[derive(Parser)]
#[command(name = "imodulon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a model
    Summary {
        /// Dataset YAML config or saved JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// Also save the loaded model as JSON
        #[arg(long)]
        save_json: Option<PathBuf>,
    },

    /// Recompute iModulon thresholds and write them as CSV
    Thresholds {
        /// Dataset YAML config or saved JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// D'Agostino K² cutoff
        #[arg(long)]
        cutoff: Option<f64>,

        /// Use k-means thresholds instead of D'Agostino
        #[arg(long)]
        kmeans: bool,

        /// Pick the cutoff that best matches the TRN
        #[arg(long)]
        optimize: bool,

        /// Output path for thresholds CSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compute TRN enrichment for every iModulon
    Enrich {
        /// Dataset YAML config or saved JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// Largest number of regulators per regulon (default: 1)
        #[arg(long, default_value = "1")]
        max_regs: usize,

        /// FDR cutoff (default: 1e-5)
        #[arg(long, default_value = "1e-5")]
        fdr: f64,

        /// How regulators are combined
        #[arg(long, value_enum, default_value = "both")]
        method: CliEnrichmentMethod,

        /// Minimum TRN evidence level
        #[arg(long)]
        evidence: Option<f64>,

        /// Allow combinatorial enrichment with many regulators
        #[arg(long)]
        force: bool,

        /// Output path for enrichment CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Save the annotated iModulon table here
        #[arg(long)]
        imodulon_table: Option<PathBuf>,
    },

    /// Infer activities of new expression data
    Infer {
        /// Dataset YAML config or saved JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// New log-TPM expression (genes × samples)
        #[arg(short, long)]
        data: PathBuf,

        /// Reference samples to center on (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        reference: Vec<String>,

        /// Output path for activities CSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Match components of two M matrices
    Compare {
        /// First M matrix
        #[arg(long)]
        m1: PathBuf,

        /// Second M matrix
        #[arg(long)]
        m2: PathBuf,

        /// Ortholog table (gene, subject) for cross-organism comparisons
        #[arg(long)]
        orthologs: Option<PathBuf>,

        /// Minimum |correlation| (default: 0.25)
        #[arg(long, default_value_t = DEFAULT_COMPARE_CUTOFF)]
        cutoff: f64,

        /// Correlation method
        #[arg(long, value_enum, default_value = "pearson")]
        method: CliCorrelation,

        /// Output path for links CSV (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export a model to the iModulonDB site layout
    Export {
        /// Dataset YAML config or saved JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// Site root directory
        #[arg(short, long)]
        output: PathBuf,

        /// Category order on the dataset page (comma-separated)
        #[arg(long, value_delimiter = ',')]
        cat_order: Vec<String>,

        /// Two-column file mapping regulator complexes to genes
        #[arg(long)]
        tfcomplex: Option<PathBuf>,

        /// Skip per-iModulon pages
        #[arg(long)]
        skip_imodulons: bool,

        /// Skip per-gene pages
        #[arg(long)]
        skip_genes: bool,

        /// Keep existing organism annotation files
        #[arg(long)]
        keep_annotations: bool,
    },

    /// Check a model for iModulonDB compatibility
    Check {
        /// Dataset YAML config or saved JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// Two-column file mapping regulator complexes to genes
        #[arg(long)]
        tfcomplex: Option<PathBuf>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a synthetic example dataset
    Example {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Summary { model, save_json } => cmd_summary(&model, save_json.as_deref()),

        Commands::Thresholds {
            model,
            cutoff,
            kmeans,
            optimize,
            output,
        } => cmd_thresholds(&model, cutoff, kmeans, optimize, &output),

        Commands::Enrich {
            model,
            max_regs,
            fdr,
            method,
            evidence,
            force,
            output,
            imodulon_table,
        } => {
            let opts = TrnEnrichmentOptions {
                max_regs,
                fdr,
                method: method.into(),
                force,
                evidence,
            };
            cmd_enrich(&model, &opts, &output, imodulon_table.as_deref())
        }

        Commands::Infer {
            model,
            data,
            reference,
            output,
        } => cmd_infer(&model, &data, &reference, &output),

        Commands::Compare {
            m1,
            m2,
            orthologs,
            cutoff,
            method,
            output,
        } => cmd_compare(&m1, &m2, orthologs.as_deref(), cutoff, method.into(), output.as_deref()),

        Commands::Export {
            model,
            output,
            cat_order,
            tfcomplex,
            skip_imodulons,
            skip_genes,
            keep_annotations,
        } => read_tfcomplex(tfcomplex.as_deref()).and_then(|tfcomplex| {
            let mut opts = ExportOptions::new()
                .with_tfcomplex_to_gene(tfcomplex)
                .with_skip_imodulons(skip_imodulons)
                .with_skip_genes(skip_genes)
                .with_rewrite_annotations(!keep_annotations);
            if !cat_order.is_empty() {
                opts = opts.with_cat_order(cat_order);
            }
            cmd_export(&model, &output, &opts)
        }),

        Commands::Check {
            model,
            tfcomplex,
            format,
        } => cmd_check(&model, tfcomplex.as_deref(), &format),

        Commands::Example { output, seed } => cmd_example(&output, seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Load a model from a saved JSON file or a dataset YAML config.
fn load_model(path: &Path) -> Result<IcaData> {
    eprintln!("Loading model from {:?}...", path);
    let model = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => load_json_model(path)?,
        _ => IcaData::from_config(path)?,
    };
    eprintln!(
        "Loaded {} genes x {} iModulons x {} samples",
        model.n_genes(),
        model.n_imodulons(),
        model.n_samples()
    );
    Ok(model)
}

fn read_tfcomplex(path: Option<&Path>) -> Result<HashMap<String, String>> {
    match path {
        Some(path) => read_pairs(path),
        None => Ok(HashMap::new()),
    }
}

/// Print a model summary
fn cmd_summary(model_path: &Path, save_json: Option<&Path>) -> Result<()> {
    let model = load_model(model_path)?;

    println!("iModulon Model Summary");
    println!("======================");
    println!();
    println!("Dimensions:");
    println!("  Genes:     {}", model.n_genes());
    println!("  Samples:   {}", model.n_samples());
    println!("  iModulons: {}", model.n_imodulons());
    println!("  TRN edges: {}", model.trn().len());
    println!();
    println!("Thresholds:");
    println!("  Method:  {:?}", model.threshold_method());
    println!(
        "  Cutoff:  {}{}",
        model.dagostino_cutoff(),
        if model.cutoff_optimized() { " (optimized)" } else { "" }
    );
    println!();
    println!("{:<20} {:>8} {:>10} {:>10}", "iModulon", "genes", "threshold", "exp_var");
    for (k, threshold) in model.imodulon_names().iter().zip(model.thresholds()) {
        let n_genes = model.imodulon_genes(k)?.len();
        let exp_var = match model.explained_variance(k) {
            Ok(v) => format!("{:.3}", v),
            Err(_) => "-".to_string(),
        };
        println!("{:<20} {:>8} {:>10.4} {:>10}", k, n_genes, threshold, exp_var);
    }

    let single = model.find_single_gene_imodulons();
    if !single.is_empty() {
        println!();
        println!("Single-gene iModulons: {}", single.join(", "));
    }
    if let Ok(total) = model.total_explained_variance() {
        println!();
        println!("Total explained variance: {:.1}%", total * 100.0);
    }

    if let Some(path) = save_json {
        save_to_json(&model, path)?;
        eprintln!("Model saved to {:?}", path);
    }
    Ok(())
}

/// Recompute thresholds
fn cmd_thresholds(
    model_path: &Path,
    cutoff: Option<f64>,
    kmeans: bool,
    optimize: bool,
    output_path: &Path,
) -> Result<()> {
    let mut model = load_model(model_path)?;

    if optimize {
        eprintln!("Optimizing D'Agostino cutoff against the TRN...");
        let result = model.optimize_cutoff()?;
        eprintln!("  Best cutoff: {}", result.best_cutoff);
        model.recompute_thresholds(result.best_cutoff)?;
    } else if kmeans {
        eprintln!("Computing k-means thresholds...");
        let rebuilt = IcaData::builder(model.m().clone(), model.a().clone())
            .threshold_method(ThresholdMethod::KMeans)
            .build()?;
        model.set_thresholds(rebuilt.thresholds().to_vec())?;
    } else {
        let cutoff = cutoff.unwrap_or(model.dagostino_cutoff());
        eprintln!("Computing D'Agostino thresholds (cutoff {})...", cutoff);
        model.recompute_thresholds(cutoff)?;
    }

    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["", "0"])?;
    for (k, threshold) in model.imodulon_names().iter().zip(model.thresholds()) {
        writer.write_record([k.as_str(), threshold.to_string().as_str()])?;
    }
    writer.flush()?;
    eprintln!("Thresholds written to {:?}", output_path);
    Ok(())
}

/// Compute TRN enrichment
fn cmd_enrich(
    model_path: &Path,
    opts: &TrnEnrichmentOptions,
    output_path: &Path,
    imodulon_table: Option<&Path>,
) -> Result<()> {
    let mut model = load_model(model_path)?;

    eprintln!("Computing TRN enrichment...");
    eprintln!("  Max regulators: {}", opts.max_regs);
    eprintln!("  FDR: {}", opts.fdr);
    let results = model.compute_trn_enrichment(opts, true)?;

    let mut writer = csv::Writer::from_path(output_path)?;
    for result in &results {
        writer.serialize(result)?;
    }
    writer.flush()?;

    let n_annotated = model
        .imodulon_names()
        .iter()
        .filter(|k| model.imodulon_table().get_str(k, "regulator").is_some())
        .count();
    eprintln!("Done! {} enriched regulons", results.len());
    eprintln!("  {} of {} iModulons annotated", n_annotated, model.n_imodulons());

    if let Some(path) = imodulon_table {
        model.imodulon_table().to_csv(path)?;
        eprintln!("iModulon table written to {:?}", path);
    }
    Ok(())
}

/// Infer activities of new data
fn cmd_infer(model_path: &Path, data_path: &Path, reference: &[String], output_path: &Path) -> Result<()> {
    let model = load_model(model_path)?;

    eprintln!("Loading expression data...");
    let data = LabeledMatrix::from_csv(data_path)?;
    eprintln!("Loaded {} genes x {} samples", data.n_rows(), data.n_cols());

    let reference = (!reference.is_empty()).then_some(reference);
    if let Some(reference) = reference {
        eprintln!("  Centering on {} reference samples", reference.len());
    }
    let activities = infer_activities(&model, &data, reference)?;

    activities.to_csv(output_path)?;
    eprintln!("Activities written to {:?}", output_path);
    Ok(())
}

/// Compare two decompositions
fn cmd_compare(
    m1_path: &Path,
    m2_path: &Path,
    orthologs: Option<&Path>,
    cutoff: f64,
    method: CorrelationMethod,
    output_path: Option<&Path>,
) -> Result<()> {
    eprintln!("Loading M matrices...");
    let m1 = LabeledMatrix::from_csv(m1_path)?;
    let m2 = LabeledMatrix::from_csv(m2_path)?;
    let orthologs = orthologs.map(OrthologTable::from_csv).transpose()?;

    let links = compare_ica(&m1, &m2, orthologs.as_ref(), cutoff, method)?;
    eprintln!("Found {} links with |r| >= {}", links.len(), cutoff);

    match output_path {
        Some(path) => {
            let mut writer = csv::Writer::from_path(path)?;
            for link in &links {
                writer.serialize(link)?;
            }
            writer.flush()?;
            eprintln!("Links written to {:?}", path);
        }
        None => {
            for link in &links {
                println!("{}\t{}\t{:.3}", link.component1, link.component2, link.correlation);
            }
        }
    }
    Ok(())
}

/// Export to iModulonDB
fn cmd_export(model_path: &Path, output_path: &Path, opts: &ExportOptions) -> Result<()> {
    let model = load_model(model_path)?;
    eprintln!("Exporting to {:?}...", output_path);
    let folder = export(&model, output_path, opts)?;
    eprintln!("Done! Dataset written to {:?}", folder);
    Ok(())
}

/// Check iModulonDB compatibility
fn cmd_check(model_path: &Path, tfcomplex: Option<&Path>, format: &str) -> Result<()> {
    let model = load_model(model_path)?;
    let tfcomplex = read_tfcomplex(tfcomplex)?;
    let report = check_compatibility(&model, &tfcomplex);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_clean() {
        println!("No compatibility issues found.");
        return Ok(());
    }
    if !report.table_issues.is_empty() {
        println!("Table issues:");
        for issue in &report.table_issues {
            println!("  [{}] {}: {}", issue.table, issue.missing_column, issue.solution);
        }
        println!();
    }
    if !report.tf_issues.is_empty() {
        println!("Regulator issues:");
        for issue in &report.tf_issues {
            let mut problems = Vec::new();
            if !issue.in_trn {
                problems.push("not in TRN");
            }
            if !issue.has_link {
                problems.push("no link");
            }
            if !issue.has_gene {
                problems.push("no expressed gene");
            }
            println!("  {}: {}", issue.regulator, problems.join(", "));
        }
        println!();
    }
    if !report.missing_gene_links.is_empty() {
        println!("{} genes without links", report.missing_gene_links.len());
    }
    if !report.missing_dois.is_empty() {
        println!("{} samples without DOIs", report.missing_dois.len());
    }
    if report.has_critical_issues() {
        println!();
        println!("Critical issues found; export will not work.");
    }
    Ok(())
}

/// Write a synthetic example dataset
fn cmd_example(output_dir: &Path, seed: u64) -> Result<()> {
    let config = SyntheticConfig::new("example").with_seed(seed);
    eprintln!("Generating synthetic dataset...");
    let data = generate_synthetic(&config)?;
    data.write_to_dir(output_dir)?;
    std::fs::write(output_dir.join("example_config.yaml"), DatasetConfig::example())?;

    eprintln!("Created example files in {:?}:", output_dir);
    eprintln!("  - dataset.yaml (load with --model)");
    eprintln!("  - M.csv, A.csv, log_tpm.csv");
    eprintln!("  - gene_table.csv, sample_table.csv, trn.csv");
    eprintln!("  - ground_truth.csv (planted iModulons)");
    eprintln!("  - example_config.yaml (annotated config template)");
    eprintln!();
    eprintln!("Try:");
    eprintln!("  imodulon summary -m {:?}", output_dir.join("dataset.yaml"));
    eprintln!("  imodulon enrich -m {:?} -o enrichment.csv", output_dir.join("dataset.yaml"));
    Ok(())
}
