//! Basic example of the iModulon workflow.
//!
//! This example shows how to:
//! 1. Build a synthetic model with planted iModulons
//! 2. Inspect thresholds and iModulon members
//! 3. Annotate iModulons by TRN enrichment
//! 4. Infer activities of new samples
//! 5. Export the model for iModulonDB

use imodulon::prelude::*;

fn main() -> Result<()> {
    println!("=== iModulon Example ===\n");

    let data = generate_synthetic(&SyntheticConfig::default())?;
    let mut model = data.model;

    println!("Model dimensions:");
    println!("  Genes:     {}", model.n_genes());
    println!("  Samples:   {}", model.n_samples());
    println!("  iModulons: {}", model.n_imodulons());
    println!();

    // Thresholds
    println!("=== Thresholds ===\n");
    for (k, threshold) in model.imodulon_names().iter().zip(model.thresholds()) {
        let genes = model.imodulon_genes(k)?;
        println!("  iModulon {}: threshold {:.3}, {} genes", k, threshold, genes.len());
    }
    println!();

    // Enrichment
    println!("=== TRN Enrichment ===\n");
    let opts = TrnEnrichmentOptions {
        max_regs: 2,
        ..Default::default()
    };
    model.compute_trn_enrichment(&opts, true)?;
    for k in model.imodulon_names() {
        let table = model.imodulon_table();
        match table.get_str(k, "regulator") {
            Some(regulator) => println!(
                "  iModulon {}: {} (precision {:.2}, recall {:.2})",
                k,
                regulator,
                table.get_f64(k, "precision").unwrap_or(f64::NAN),
                table.get_f64(k, "recall").unwrap_or(f64::NAN),
            ),
            None => println!("  iModulon {}: no enriched regulator", k),
        }
    }
    println!();

    // Top genes of the first iModulon
    let first = model.imodulon_names()[0].clone();
    let view = model.view_imodulon(&first)?;
    println!("Top genes of iModulon {}:", first);
    for gene in view.genes.iter().take(5) {
        println!("  {} ({}): {:.3}", gene.gene_id, model.num2name(&gene.gene_id), gene.gene_weight);
    }
    println!();

    // Inference on the model's own expression, centered on the controls
    println!("=== Activity Inference ===\n");
    if let Some(x) = model.x() {
        let reference = &data.ground_truth.reference_samples;
        let activities = infer_activities(&model, x, Some(reference.as_slice()))?;
        for (s, sample) in activities.col_ids().iter().enumerate().take(4) {
            println!("  {}: {:.2}", sample, activities.get(0, s));
        }
    }
    println!();

    // Export
    let out = std::env::temp_dir().join("imodulon_demo_site");
    let folder = export(&model, &out, &ExportOptions::default())?;
    println!("Exported iModulonDB files to {}", folder.display());

    Ok(())
}
