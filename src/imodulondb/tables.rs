//! Plot-ready tables behind iModulonDB dataset, iModulon and gene pages.
//!
//! Every table is an [`AnnotationTable`] laid out the way the site reads
//! it, so writing one to CSV is all the export has to do. Single-column
//! tables use `"0"` as the column name.

use super::tf::{get_tfs_to_scatter, parse_tf_string, tf_with_links};
use crate::data::{AnnotationTable, IcaData, Value};
use crate::enrichment::RegulonExpr;
use crate::error::{ImodError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

/// Default number of histogram bins.
pub const DEFAULT_HIST_BINS: usize = 20;

/// Default distance to the threshold for listing unregulated genes.
pub const DEFAULT_HIST_TOL: f64 = 0.001;

const NOT_AVAILABLE: &str = "<i>Not Available</i>";

/// Scatter color without COG information.
const DEFAULT_COLOR: &str = "#1e90ff";

/// Colors assigned to COG categories in sorted order.
const COG_PALETTE: [&str; 24] = [
    "#ff0000", "#ffc0cb", "#bfbf00", "#da70d6", "#c71585", "#008000", "#d3d3d3", "#90ee90",
    "#708090", "#0000ff", "#8b4513", "#40e0d0", "#87cefa", "#00bfbf", "#87ceeb", "#add8e6",
    "#ff00ff", "#1e90ff", "#00ff00", "#f4a460", "#000000", "#daa520", "#d2691e", "#ffa500",
];

const IMODULON_TABLE_COLUMNS: [&str; 8] = [
    "name",
    "regulator_readable",
    "function",
    "category",
    "n_genes",
    "exp_var",
    "precision",
    "recall",
];

const GENE_TABLE_COLUMNS: [&str; 7] = [
    "gene_weight",
    "gene_name",
    "old_locus_tag",
    "gene_product",
    "cog",
    "operon",
    "regulator",
];

/// A one-column table from `(label, value)` rows.
pub(crate) fn series(column: &str, rows: Vec<(String, Value)>) -> Result<AnnotationTable> {
    let mut table = AnnotationTable::new(Vec::new());
    table.ensure_column(column);
    for (label, value) in rows {
        table.add_row(&label)?;
        table.set(&label, column, value)?;
    }
    Ok(table)
}

/// Names in the bracketed, quoted form the site parses, e.g. `['a' 'b']`.
fn gene_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    format!("[{}]", quoted.join(" "))
}

fn cell(table: &AnnotationTable, row: &str, column: &str) -> Value {
    table.get(row, column).cloned().unwrap_or(Value::Missing)
}

/// Regulator string of an iModulon, if it has a non-empty one.
pub(crate) fn regulator_of(model: &IcaData, imodulon: &str) -> Option<String> {
    model
        .imodulon_table()
        .get_str(imodulon, "regulator")
        .filter(|r| !r.trim().is_empty())
}

/// Genes of a set in model order, as gene names.
fn named_in_model_order(model: &IcaData, genes: &HashSet<String>) -> Vec<String> {
    model
        .gene_names()
        .iter()
        .filter(|g| genes.contains(*g))
        .map(|g| model.num2name(g))
        .collect()
}

// Dataset page

/// Metadata box of the dataset page.
pub fn dataset_table(model: &IcaData) -> Result<AnnotationTable> {
    let meta = model.imodulondb_meta();
    let short = if meta.organism == "New Organism" {
        String::new()
    } else {
        let mut words = meta.organism.split_whitespace();
        match (words.next(), words.next()) {
            (Some(genus), Some(species)) => {
                let initial: String = genus.chars().take(1).flat_map(char::to_uppercase).collect();
                format!("<i>{}. {}</i>", initial, species.to_lowercase())
            }
            _ => format!("<i>{}</i>", meta.organism),
        }
    };
    let publication = if meta.publication_link.is_empty() {
        meta.publication_name.clone()
    } else {
        format!(
            "<a href=\"{}\">{}</a>",
            meta.publication_link, meta.publication_name
        )
    };

    let samples = model.sample_table();
    let conditions = if samples.has_column("project") && samples.has_column("condition") {
        Value::from(samples.group_by(&["condition", "project"])?.len())
    } else {
        Value::from("Unknown")
    };

    series(
        "0",
        vec![
            ("Title".into(), format!("{} {}", short, meta.dataset).into()),
            ("Organism".into(), format!("<i>{}</i>", meta.organism).into()),
            ("Strain".into(), meta.strain.as_str().into()),
            ("Publication".into(), publication.into()),
            ("Number of Samples".into(), model.n_samples().into()),
            ("Number of Unique Conditions".into(), conditions),
            ("Number of Genes".into(), model.n_genes().into()),
            ("Number of iModulons".into(), model.n_imodulons().into()),
        ],
    )
}

/// iModulon table of the dataset page, indexed by `k`.
///
/// `category_num` orders the categories: position in `cat_order` when
/// given, else the `new_idx` column, else the iModulon name.
pub fn imodulon_table_df(model: &IcaData, cat_order: Option<&[String]>) -> Result<AnnotationTable> {
    let source = model.imodulon_table();
    let mut table = AnnotationTable::new(model.imodulon_names().to_vec());
    table.set_index_name("k");
    for column in IMODULON_TABLE_COLUMNS {
        table.ensure_column(column);
    }
    table.ensure_column("category_num");

    for k in model.imodulon_names() {
        for column in IMODULON_TABLE_COLUMNS {
            let mut value = cell(source, k, column);
            if column == "category" && value.is_missing() {
                value = Value::from("Uncharacterized");
            }
            table.set(k, column, value)?;
        }

        let category_num = match cat_order {
            Some(order) => {
                let category = table.get_str(k, "category").unwrap_or_default();
                let pos = order.iter().position(|c| *c == category).ok_or_else(|| {
                    ImodError::InvalidParameter(format!(
                        "category '{}' of iModulon {} is not in the category order",
                        category, k
                    ))
                })?;
                Value::from(pos)
            }
            None if source.has_column("new_idx") => cell(source, k, "new_idx"),
            None => Value::from(k.as_str()),
        };
        table.set(k, "category_num", category_num)?;
    }
    Ok(table)
}

/// Gene membership as a boolean gene × iModulon table and as an
/// `(iModulon, Gene)` list.
pub fn gene_presence(model: &IcaData) -> Result<(AnnotationTable, AnnotationTable)> {
    let binarized = model.m_binarized()?;
    let mut matrix = AnnotationTable::new(model.gene_names().to_vec());
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (k, imodulon) in model.imodulon_names().iter().enumerate() {
        matrix.ensure_column(imodulon);
        for (g, gene) in model.gene_names().iter().enumerate() {
            let member = binarized.get(g, k) > 0.0;
            matrix.set(gene, imodulon, member)?;
            if member {
                pairs.push((imodulon.clone(), gene.clone()));
            }
        }
    }

    let mut list = AnnotationTable::new((0..pairs.len()).map(|i| i.to_string()).collect());
    list.ensure_column("iModulon");
    list.ensure_column("Gene");
    for (i, (imodulon, gene)) in pairs.into_iter().enumerate() {
        let row = i.to_string();
        list.set(&row, "iModulon", imodulon)?;
        list.set(&row, "Gene", gene)?;
    }
    Ok((matrix, list))
}

// iModulon page

/// Member genes of an iModulon with one boolean column per regulator in
/// the TRN and a `link` column, indexed by `locus`.
pub fn gene_table_df(model: &IcaData, imodulon: &str) -> Result<AnnotationTable> {
    let view = model.view_imodulon(imodulon)?;
    let mut table = view.to_table()?.select_columns(&GENE_TABLE_COLUMNS);
    table.set_index_name("locus");

    let tfs = regulator_of(model, imodulon)
        .map(|r| parse_tf_string(model, &r).0)
        .unwrap_or_default();
    for tf in &tfs {
        let targets = model.trn().genes_of(tf);
        table.ensure_column(tf);
        for gene in view.gene_ids() {
            table.set(gene, tf, targets.contains(gene))?;
        }
    }

    table.ensure_column("link");
    for gene in view.gene_ids() {
        let link = model.gene_links().get(gene).cloned().map_or(Value::Missing, Value::from);
        table.set(gene, "link", link)?;
    }
    Ok(table)
}

/// Legend label of the regulators (out of `tfs`) that target a gene.
fn tf_combo(tfs: &[String], gene_regulators: &str) -> String {
    let regs: Vec<&str> = gene_regulators.split(',').map(str::trim).collect();
    let hits: Vec<&str> = tfs
        .iter()
        .map(String::as_str)
        .filter(|tf| regs.contains(tf))
        .collect();
    match hits.as_slice() {
        [] => "unreg".to_string(),
        [one] => one.to_string(),
        [a, b] => format!("{} and {}", a, b),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

fn move_to(sorted: &mut Vec<String>, rest: &mut Vec<String>, name: &str) {
    if let Some(pos) = rest.iter().position(|c| c == name) {
        sorted.push(rest.remove(pos));
    }
}

/// Legend order: unregulated, single regulators, pairs, then the rest.
fn sort_combos(tfs: &[String], combos: Vec<String>) -> Vec<String> {
    let mut rest = combos;
    let mut sorted = Vec::with_capacity(rest.len());
    move_to(&mut sorted, &mut rest, "unreg");
    for tf in tfs {
        move_to(&mut sorted, &mut rest, tf);
    }
    for a in tfs {
        for b in tfs {
            move_to(&mut sorted, &mut rest, &format!("{} and {}", a, b));
        }
    }
    sorted.extend(rest);
    sorted
}

/// Histogram of gene weights split by regulator combination.
///
/// Columns are bin midpoints. Bins are laid out so both thresholds fall on
/// bin edges. The `thresh` row holds `-threshold`, `threshold` and the
/// number of combinations; then one count row and one `<combo>_genes` row
/// per combination. Unregulated genes are only listed in bins outside the
/// thresholds (within `tol`).
pub fn gene_hist_df(model: &IcaData, imodulon: &str, bins: usize, tol: f64) -> Result<AnnotationTable> {
    if bins < 3 {
        return Err(ImodError::InvalidParameter(format!(
            "histogram needs at least 3 bins, got {}",
            bins
        )));
    }
    let k = model.imodulon_index(imodulon)?;
    let t = model.thresholds()[k];
    let tfs = regulator_of(model, imodulon)
        .map(|r| parse_tf_string(model, &r).0)
        .unwrap_or_default();

    let mut genes: Vec<(String, f64, String)> = model
        .gene_names()
        .iter()
        .enumerate()
        .map(|(g, name)| {
            let regs = model.gene_table().get_str(name, "regulator").unwrap_or_default();
            (name.clone(), model.m().get(g, k), tf_combo(&tfs, &regs))
        })
        .collect();
    genes.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut unique: Vec<String> = Vec::new();
    for (_, _, combo) in &genes {
        if !unique.contains(combo) {
            unique.push(combo.clone());
        }
    }
    let combos = sort_combos(&tfs, unique);

    let lo = genes.first().map_or(-t, |g| g.1).min(-t);
    let hi = genes.last().map_or(t, |g| g.1).max(t);
    let n_inner = (2.0 * t * bins as f64 / (hi - lo) - 1.0).floor().max(1.0);
    let width = 2.0 * t / n_inner;
    if !(width.is_finite() && width > 0.0) {
        return Err(ImodError::Numerical(format!(
            "cannot bin weights of iModulon {} with threshold {}",
            imodulon, t
        )));
    }
    let xmin = -t - width * ((-t - lo) / width).ceil();
    let mids: Vec<f64> = (0..bins)
        .map(|i| xmin + width / 2.0 + i as f64 * width)
        .collect();
    let labels: Vec<String> = mids.iter().map(|m| m.to_string()).collect();

    let mut index = vec!["thresh".to_string()];
    index.extend(combos.iter().cloned());
    index.extend(combos.iter().map(|c| format!("{}_genes", c)));
    let mut table = AnnotationTable::new(index);
    for label in &labels {
        table.ensure_column(label);
    }

    table.set("thresh", &labels[0], -t)?;
    table.set("thresh", &labels[1], t)?;
    table.set("thresh", &labels[2], combos.len())?;

    for (mid, label) in mids.iter().zip(&labels) {
        let lower = mid - width / 2.0;
        let upper = lower + width;
        let outside = lower + tol >= t || upper - tol <= -t;
        for combo in &combos {
            let names: Vec<String> = genes
                .iter()
                .filter(|(_, w, c)| c == combo && *w < upper && *w > lower)
                .map(|(g, _, _)| model.num2name(g))
                .collect();
            table.set(combo, label, names.len())?;
            let listed = if combo != "unreg" || outside {
                gene_list(&names)
            } else {
                "[]".to_string()
            };
            table.set(&format!("{}_genes", combo), label, listed)?;
        }
    }
    Ok(table)
}

/// Colors for every gene, by COG category.
fn gene_colors(model: &IcaData) -> HashMap<String, &'static str> {
    let genes = model.gene_table();
    if !genes.has_column("cog") {
        return model
            .gene_names()
            .iter()
            .map(|g| (g.clone(), DEFAULT_COLOR))
            .collect();
    }
    let cog_of = |g: &str| genes.get_str(g, "cog").unwrap_or_else(|| "Unknown".to_string());
    let cogs: BTreeSet<String> = model.gene_names().iter().map(|g| cog_of(g)).collect();
    let palette: HashMap<String, &'static str> = cogs
        .into_iter()
        .zip(COG_PALETTE.iter().cycle().copied())
        .collect();
    model
        .gene_names()
        .iter()
        .map(|g| {
            let color = palette.get(&cog_of(g)).copied().unwrap_or(DEFAULT_COLOR);
            (g.clone(), color)
        })
        .collect()
}

/// Gene weight against genome position (or gene number without a `start`
/// column). The first row, `meta`, holds the x-axis label and threshold.
pub fn gene_scatter_df(model: &IcaData, imodulon: &str) -> Result<AnnotationTable> {
    let k = model.imodulon_index(imodulon)?;
    let cutoff = model.thresholds()[k];
    let genes = model.gene_table();
    let by_start = genes.has_column("start");
    let colors = gene_colors(model);

    let mut index = vec!["meta".to_string()];
    index.extend(model.gene_names().iter().cloned());
    let mut table = AnnotationTable::new(index);
    table.set_index_name("locus");
    for column in ["name", "x", "y", "cog", "color", "link"] {
        table.ensure_column(column);
    }
    table.set("meta", "name", if by_start { "start" } else { "gene number" })?;
    table.set("meta", "x", cutoff)?;

    for (g, gene) in model.gene_names().iter().enumerate() {
        let weight = model.m().get(g, k);
        let x = if by_start { cell(genes, gene, "start") } else { Value::from(g) };
        let cog = genes.get_str(gene, "cog").unwrap_or_else(|| "Unknown".to_string());
        table.set(gene, "name", model.num2name(gene))?;
        table.set(gene, "x", x)?;
        table.set(gene, "y", weight)?;
        table.set(gene, "cog", cog)?;
        table.set(gene, "color", colors.get(gene).copied().unwrap_or(DEFAULT_COLOR))?;
        if weight.abs() > cutoff {
            if let Some(link) = model.gene_links().get(gene) {
                table.set(gene, "link", link.as_str())?;
            }
        }
    }
    Ok(table)
}

/// Per-condition bars of one value per sample.
///
/// Samples are grouped by `project` and `condition` in order of first
/// appearance. Each row has the condition (`project__condition`), mean,
/// sample standard deviation, replicate count and every replicate's
/// position in the sample table and value.
fn replicate_bars(model: &IcaData, values: &[f64], prefix: &str) -> Result<AnnotationTable> {
    let samples = model.sample_table();
    let groups = samples.group_by(&["project", "condition"])?;
    let position: HashMap<&str, usize> = model
        .sample_names()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let max_replicates = groups.iter().map(|(_, members)| members.len()).max().unwrap_or(0);

    let mut table = AnnotationTable::new((0..groups.len()).map(|i| i.to_string()).collect());
    let avg = format!("{}_avg", prefix);
    let std = format!("{}_std", prefix);
    for column in ["condition", avg.as_str(), std.as_str(), "n"] {
        table.ensure_column(column);
    }
    for i in 1..=max_replicates {
        table.ensure_column(&format!("rep{}_idx", i));
        table.ensure_column(&format!("rep{}_{}", i, prefix));
    }

    for (row, (key, members)) in groups.iter().enumerate() {
        let row = row.to_string();
        let positions: Vec<usize> = members
            .iter()
            .filter_map(|s| position.get(s.as_str()).copied())
            .collect();
        let vals: Vec<f64> = positions.iter().map(|&p| values[p]).collect();
        let n = vals.len() as f64;
        let mean = vals.iter().sum::<f64>() / n;
        let sd = if vals.len() > 1 {
            (vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            f64::NAN
        };

        table.set(&row, "condition", format!("{}__{}", key[0], key[1]))?;
        table.set(&row, &avg, mean)?;
        table.set(&row, &std, sd)?;
        table.set(&row, "n", vals.len())?;
        for (i, (&p, &v)) in positions.iter().zip(&vals).enumerate() {
            table.set(&row, &format!("rep{}_idx", i + 1), p)?;
            table.set(&row, &format!("rep{}_{}", i + 1, prefix), v)?;
        }
    }
    Ok(table)
}

/// Activity of an iModulon per condition.
pub fn activity_bar_df(model: &IcaData, imodulon: &str) -> Result<AnnotationTable> {
    let k = model.imodulon_index(imodulon)?;
    replicate_bars(model, &model.a().row_values(k), "A")
}

/// Expression of a gene per condition.
pub fn gene_activity_bar_df(model: &IcaData, gene: &str) -> Result<AnnotationTable> {
    let x = model.x().ok_or_else(|| {
        ImodError::InvalidParameter("gene activity bars require the X matrix".to_string())
    })?;
    let values = x.row(gene).ok_or_else(|| ImodError::UnknownGene(gene.to_string()))?;
    replicate_bars(model, &values, "X")
}

/// Overlap of an iModulon with its regulon.
///
/// `None` when the iModulon has no regulator or its regulator string mixes
/// operators without brackets. When one set contains the other, counts move
/// to the `*2` rows so the site draws nested circles.
pub fn regulon_venn_df(model: &IcaData, imodulon: &str) -> Result<Option<AnnotationTable>> {
    let Some(tf) = regulator_of(model, imodulon) else {
        return Ok(None);
    };
    let expr = match RegulonExpr::parse(&tf) {
        Ok(expr) => expr,
        Err(ImodError::ComplexRegulon(_)) => {
            warn!(imodulon, regulator = %tf, "Skipping regulon diagram of a complex regulator");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let reg_genes = expr.genes(model.trn());
    let comp_genes: HashSet<String> = model.imodulon_genes(imodulon)?.into_iter().collect();
    let both: HashSet<String> = reg_genes.intersection(&comp_genes).cloned().collect();

    let (mut reg_n, mut comp_n, mut both_n) = (reg_genes.len(), comp_genes.len(), both.len());
    let (mut reg_n2, mut comp_n2, mut both_n2) = (0, 0, 0);
    if reg_genes == comp_genes {
        (reg_n, comp_n, both_n) = (0, 0, 0);
        both_n2 = reg_genes.len();
    } else if reg_genes.is_subset(&comp_genes) {
        (reg_n, both_n) = (0, 0);
        reg_n2 = reg_genes.len();
    } else if comp_genes.is_subset(&reg_genes) {
        (comp_n, both_n) = (0, 0);
        comp_n2 = comp_genes.len();
    }

    let just_reg: HashSet<String> = reg_genes.difference(&both).cloned().collect();
    let just_comp: HashSet<String> = comp_genes.difference(&both).cloned().collect();

    let rows = ["TF", "reg_genes", "comp_genes", "both_genes", "reg_genes2", "comp_genes2", "both_genes2"];
    let mut table = AnnotationTable::new(rows.iter().map(|r| r.to_string()).collect());
    table.ensure_column("Value");
    table.ensure_column("list");
    table.set("TF", "Value", tf.as_str())?;
    for (row, n) in [
        ("reg_genes", reg_n),
        ("comp_genes", comp_n),
        ("both_genes", both_n),
        ("reg_genes2", reg_n2),
        ("comp_genes2", comp_n2),
        ("both_genes2", both_n2),
    ] {
        table.set(row, "Value", n)?;
    }
    for (row, genes) in [("reg_genes", &just_reg), ("comp_genes", &just_comp), ("both_genes", &both)] {
        table.set(row, "list", gene_list(&named_in_model_order(model, genes)))?;
    }
    Ok(Some(table))
}

/// Least-squares line through `(x, y)`.
#[derive(Debug, Clone, Copy)]
struct LineFit {
    slope: f64,
    intercept: f64,
    r2: f64,
}

fn fit_line(x: &[f64], y: &[f64]) -> LineFit {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        sxx += (xi - mx).powi(2);
        sxy += (xi - mx) * (yi - my);
        syy += (yi - my).powi(2);
    }
    if sxx == 0.0 {
        return LineFit { slope: 0.0, intercept: my, r2: 0.0 };
    }
    let slope = sxy / sxx;
    let r2 = if syy == 0.0 { 0.0 } else { sxy * sxy / (sxx * syy) };
    LineFit { slope, intercept: my - slope * mx, r2 }
}

/// iModulon activity against the expression of its regulators.
///
/// The first six rows (`R2`, `xmin`, `xmid`, `xmax`, `ystart`, `yend`)
/// describe a fitted line per regulator; the remaining rows are samples,
/// labelled by the `sample` column when present. Column `A` holds the
/// activities, then one column per regulator, best fit first. `None` when
/// no regulator has an expression profile.
pub fn regulon_scatter_df(
    model: &IcaData,
    imodulon: &str,
    tfcomplex_to_gene: &HashMap<String, String>,
) -> Result<Option<AnnotationTable>> {
    let k = model.imodulon_index(imodulon)?;
    let (Some(tf_str), Some(x)) = (regulator_of(model, imodulon), model.x()) else {
        return Ok(None);
    };
    let (tfs, _) = get_tfs_to_scatter(model, &tf_str, tfcomplex_to_gene);
    if tfs.is_empty() {
        return Ok(None);
    }
    let activity = model.a().row_values(k);

    let mut fits = tfs
        .into_iter()
        .map(|tf| {
            let locus = model.name2num(&tf)?;
            let expression = x.row(&locus).ok_or_else(|| ImodError::UnknownGene(locus.clone()))?;
            let fit = fit_line(&expression, &activity);
            Ok((tf, fit, expression))
        })
        .collect::<Result<Vec<_>>>()?;
    fits.sort_by(|a, b| b.1.r2.total_cmp(&a.1.r2));

    let samples = model.sample_table();
    let params = ["R2", "xmin", "xmid", "xmax", "ystart", "yend"];
    let mut table = AnnotationTable::new(params.iter().map(|p| p.to_string()).collect());
    let labels: Vec<String> = model
        .sample_names()
        .iter()
        .map(|s| samples.get_str(s, "sample").unwrap_or_else(|| s.clone()))
        .collect();
    for label in &labels {
        table.add_row(label)?;
    }

    table.ensure_column("A");
    for (label, a) in labels.iter().zip(&activity) {
        table.set(label, "A", *a)?;
    }
    for (tf, fit, expression) in &fits {
        table.ensure_column(tf);
        let xmin = expression.iter().copied().fold(f64::INFINITY, f64::min);
        let xmax = expression.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        table.set("R2", tf, fit.r2)?;
        table.set("xmin", tf, xmin)?;
        table.set("xmax", tf, xmax)?;
        table.set("ystart", tf, fit.intercept + fit.slope * xmin)?;
        table.set("yend", tf, fit.intercept + fit.slope * xmax)?;
        for (label, v) in labels.iter().zip(expression) {
            table.set(label, tf, *v)?;
        }
    }
    Ok(Some(table))
}

/// Metadata box of an iModulon page.
pub fn imodulon_basics(
    model: &IcaData,
    imodulon: &str,
    has_venn: bool,
    n_scatter: usize,
) -> Result<AnnotationTable> {
    model.imodulon_index(imodulon)?;
    let table = model.imodulon_table();
    let regulator = match regulator_of(model, imodulon) {
        Some(tf) => Value::from(tf_with_links(model, &tf).0),
        None => Value::Missing,
    };
    series(
        "0",
        vec![
            ("name".into(), cell(table, imodulon, "name")),
            ("TF".into(), cell(table, imodulon, "regulator")),
            ("regulator".into(), regulator),
            ("function".into(), cell(table, imodulon, "function")),
            ("category".into(), cell(table, imodulon, "category")),
            ("has_venn".into(), has_venn.into()),
            ("scatter".into(), n_scatter.into()),
            ("exp_var".into(), cell(table, imodulon, "exp_var")),
            ("precision".into(), cell(table, imodulon, "precision")),
            ("recall".into(), cell(table, imodulon, "recall")),
        ],
    )
}

// Gene page

/// Every iModulon with this gene's weight and membership, members first,
/// then by |weight|.
pub fn gene_imodulon_table_df(model: &IcaData, gene: &str) -> Result<AnnotationTable> {
    let g = model
        .m()
        .row_index(gene)
        .ok_or_else(|| ImodError::UnknownGene(gene.to_string()))?;
    let mut rows: Vec<(usize, bool, f64)> = (0..model.n_imodulons())
        .map(|k| {
            let w = model.m().get(g, k);
            (k, w.abs() > model.thresholds()[k], w)
        })
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.abs().total_cmp(&a.2.abs())));

    let source = model.imodulon_table();
    let names: Vec<String> = rows.iter().map(|r| model.imodulon_names()[r.0].clone()).collect();
    let mut table = AnnotationTable::new(names.clone());
    table.set_index_name("k");
    for column in ["name", "in_iM", "gene_weight", "regulator", "function", "category"] {
        table.ensure_column(column);
    }
    for (k, (_, member, weight)) in names.iter().zip(rows) {
        table.set(k, "name", cell(source, k, "name"))?;
        table.set(k, "in_iM", member)?;
        table.set(k, "gene_weight", weight)?;
        for column in ["regulator", "function", "category"] {
            table.set(k, column, cell(source, k, column))?;
        }
    }
    Ok(table)
}

/// Metadata box of a gene page.
pub fn gene_basics(model: &IcaData, gene: &str) -> Result<AnnotationTable> {
    let genes = model.gene_table();
    if !genes.has_row(gene) {
        return Err(ImodError::UnknownGene(gene.to_string()));
    }
    let link = match model.gene_links().get(gene) {
        Some(link) if !link.trim().is_empty() => Value::from(format!(
            "<a href=\"{}\">{}</a>",
            link,
            model.imodulondb_meta().gene_link_db
        )),
        _ => Value::Missing,
    };
    let rows = vec![
        ("gene_id".to_string(), Value::from(gene)),
        ("name".to_string(), cell(genes, gene, "gene_name")),
        ("operon".to_string(), cell(genes, gene, "operon")),
        ("gene_product".to_string(), cell(genes, gene, "gene_product")),
        ("cog".to_string(), cell(genes, gene, "cog")),
        ("regulator".to_string(), cell(genes, gene, "regulator")),
        ("link".to_string(), link),
    ];
    let filled = rows
        .into_iter()
        .map(|(row, value)| {
            let value = if value.is_missing() { Value::from(NOT_AVAILABLE) } else { value };
            (row, value)
        })
        .collect();
    series("0", filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LabeledMatrix, Trn, TrnEdge};
    use crate::imodulondb::ImodulondbMeta;
    use approx::assert_relative_eq;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    /// Ten genes and two iModulons. "0" holds b0-b3 (threshold 0.3) and is
    /// regulated by crp+fnr; "1" holds b8 only.
    fn create_test_model() -> IcaData {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|g| match g {
                0 => vec![0.6, 0.0],
                1 => vec![0.5, 0.0],
                2 => vec![0.4, 0.1],
                3 => vec![-0.35, 0.0],
                8 => vec![0.0, 0.9],
                _ => vec![0.02 * g as f64 - 0.1, 0.01],
            })
            .collect();
        let m = LabeledMatrix::from_rows(&rows, ids("b", 10), ids("", 2)).unwrap();
        let a = LabeledMatrix::from_rows(
            &[vec![1.0, 3.0, 5.0, 6.0], vec![0.0, 1.0, 0.0, -1.0]],
            ids("", 2),
            ids("s", 4),
        )
        .unwrap();
        // b4 is crp, b5 is fnr; their expression tracks iModulon "0".
        let x_rows: Vec<Vec<f64>> = (0..10)
            .map(|g| match g {
                4 => vec![2.0, 6.0, 10.0, 12.0],
                5 => vec![1.0, 0.0, 1.0, 0.0],
                _ => vec![g as f64; 4],
            })
            .collect();
        let x = LabeledMatrix::from_rows(&x_rows, ids("b", 10), ids("s", 4)).unwrap();

        let mut genes = AnnotationTable::new(ids("b", 10));
        for g in 0..10 {
            let gene = format!("b{}", g);
            let name = match g {
                4 => "crp".to_string(),
                5 => "fnr".to_string(),
                _ => format!("gene{}", g),
            };
            genes.set(&gene, "gene_name", name).unwrap();
            genes.set(&gene, "cog", if g % 2 == 0 { "Energy" } else { "Transport" }).unwrap();
            genes.set(&gene, "start", (g * 100) as f64).unwrap();
        }

        let mut samples = AnnotationTable::new(ids("s", 4));
        for (s, condition) in [("s0", "ctrl"), ("s1", "ctrl"), ("s2", "heat"), ("s3", "heat")] {
            samples.set(s, "project", "base").unwrap();
            samples.set(s, "condition", condition).unwrap();
        }

        let mut imodulons = AnnotationTable::new(ids("", 2));
        imodulons.set("0", "name", "CrpFnr").unwrap();
        imodulons.set("0", "regulator", "crp+fnr").unwrap();
        imodulons.set("0", "function", "Carbon").unwrap();
        imodulons.set("1", "name", "Single").unwrap();

        let trn = Trn::new(vec![
            TrnEdge::new("crp", "b0"),
            TrnEdge::new("crp", "b1"),
            TrnEdge::new("crp", "b6"),
            TrnEdge::new("fnr", "b0"),
            TrnEdge::new("fnr", "b2"),
        ]);
        let meta = ImodulondbMeta {
            organism: "Escherichia coli".to_string(),
            dataset: "test".to_string(),
            gene_link_db: "EcoCyc".to_string(),
            ..ImodulondbMeta::default()
        };

        IcaData::builder(m, a)
            .x(x)
            .gene_table(genes)
            .sample_table(samples)
            .imodulon_table(imodulons)
            .trn(trn)
            .thresholds(vec![0.3, 0.5])
            .gene_links(HashMap::from([("b0".to_string(), "http://ecocyc/b0".to_string())]))
            .imodulondb_meta(meta)
            .build()
            .unwrap()
    }

    #[test]
    fn test_dataset_table() {
        let model = create_test_model();
        let table = dataset_table(&model).unwrap();
        assert_eq!(table.get_str("Title", "0").unwrap(), "<i>E. coli</i> test");
        assert_eq!(table.get_str("Publication", "0").unwrap(), "Unpublished Study");
        assert_eq!(table.get_f64("Number of Unique Conditions", "0"), Some(2.0));
        assert_eq!(table.get_f64("Number of Genes", "0"), Some(10.0));
    }

    #[test]
    fn test_imodulon_table_df() {
        let model = create_test_model();
        let table = imodulon_table_df(&model, None).unwrap();
        assert_eq!(table.index_name(), "k");
        assert_eq!(table.get_str("1", "category").unwrap(), "Uncharacterized");
        assert_eq!(table.get_str("1", "category_num").unwrap(), "1");

        let order = vec!["Uncharacterized".to_string()];
        let table = imodulon_table_df(&model, Some(order.as_slice())).unwrap();
        assert_eq!(table.get_f64("0", "category_num"), Some(0.0));
        let empty: Vec<String> = Vec::new();
        assert!(imodulon_table_df(&model, Some(empty.as_slice())).is_err());
    }

    #[test]
    fn test_gene_presence() {
        let model = create_test_model();
        let (matrix, list) = gene_presence(&model).unwrap();
        assert_eq!(matrix.get_str("b3", "0").unwrap(), "True");
        assert_eq!(matrix.get_str("b3", "1").unwrap(), "False");
        assert_eq!(list.n_rows(), 5);
        assert_eq!(list.get_str("4", "Gene").unwrap(), "b8");
    }

    #[test]
    fn test_gene_table_df() {
        let model = create_test_model();
        let table = gene_table_df(&model, "0").unwrap();
        assert_eq!(table.index(), &["b0", "b1", "b2", "b3"]);
        assert_eq!(table.columns()[0], "gene_weight");
        assert_eq!(table.get_str("b0", "crp").unwrap(), "True");
        assert_eq!(table.get_str("b2", "crp").unwrap(), "False");
        assert_eq!(table.get_str("b2", "fnr").unwrap(), "True");
        assert_eq!(table.get_str("b0", "link").unwrap(), "http://ecocyc/b0");
        assert!(table.get("b1", "link").unwrap().is_missing());
    }

    #[test]
    fn test_tf_combo_labels() {
        let tfs: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(tf_combo(&tfs, ""), "unreg");
        assert_eq!(tf_combo(&tfs, "b,z"), "b");
        assert_eq!(tf_combo(&tfs, "c,a"), "a and c");
        assert_eq!(tf_combo(&tfs, "a,b,c"), "a, b, and c");

        let sorted = sort_combos(
            &tfs,
            vec!["a, b, and c".into(), "b and a".into(), "a and b".into(), "c".into(), "unreg".into()],
        );
        assert_eq!(sorted, vec!["unreg", "c", "a and b", "b and a", "a, b, and c"]);
    }

    #[test]
    fn test_gene_hist_df() {
        let model = create_test_model();
        let table = gene_hist_df(&model, "0", DEFAULT_HIST_BINS, DEFAULT_HIST_TOL).unwrap();
        assert_eq!(table.n_columns(), DEFAULT_HIST_BINS);
        let first = &table.columns()[0];
        assert_eq!(table.get_f64("thresh", first), Some(-0.3));

        // b0 is crp and fnr, b1 and b6 crp only, b2 fnr only, the rest unregulated.
        assert_eq!(&table.index()[1..5], &["unreg", "crp", "fnr", "crp and fnr"]);
        let total = |row: &str| -> f64 {
            table.columns().iter().filter_map(|c| table.get_f64(row, c)).sum()
        };
        assert_relative_eq!(total("crp"), 2.0);
        assert_relative_eq!(total("crp") + total("fnr") + total("crp and fnr"), 4.0);
        assert_relative_eq!(total("unreg"), 6.0);
        assert_eq!(table.get_f64("thresh", &table.columns()[2]), Some(4.0));

        let listed: Vec<String> = table
            .columns()
            .iter()
            .filter_map(|c| table.get_str("crp and fnr_genes", c))
            .filter(|l| l != "[]")
            .collect();
        assert_eq!(listed, vec!["['gene0']"]);
        assert!(gene_hist_df(&model, "0", 2, DEFAULT_HIST_TOL).is_err());
    }

    #[test]
    fn test_gene_scatter_df() {
        let model = create_test_model();
        let table = gene_scatter_df(&model, "0").unwrap();
        assert_eq!(table.index()[0], "meta");
        assert_eq!(table.get_str("meta", "name").unwrap(), "start");
        assert_eq!(table.get_f64("meta", "x"), Some(0.3));
        assert_eq!(table.get_f64("b3", "x"), Some(300.0));
        assert_eq!(table.get_str("b4", "name").unwrap(), "crp");
        // Sorted COGs: Energy takes the first color, Transport the second.
        assert_eq!(table.get_str("b0", "color").unwrap(), "#ff0000");
        assert_eq!(table.get_str("b1", "color").unwrap(), "#ffc0cb");
        assert_eq!(table.get_str("b0", "link").unwrap(), "http://ecocyc/b0");
    }

    #[test]
    fn test_activity_bar_df() {
        let model = create_test_model();
        let table = activity_bar_df(&model, "0").unwrap();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.get_str("0", "condition").unwrap(), "base__ctrl");
        assert_relative_eq!(table.get_f64("0", "A_avg").unwrap(), 2.0);
        assert_relative_eq!(table.get_f64("0", "A_std").unwrap(), 2.0_f64.sqrt());
        assert_eq!(table.get_f64("1", "rep1_idx"), Some(2.0));
        assert_eq!(table.get_f64("1", "rep2_A"), Some(6.0));

        let table = gene_activity_bar_df(&model, "b4").unwrap();
        assert_relative_eq!(table.get_f64("1", "X_avg").unwrap(), 11.0);
        assert!(gene_activity_bar_df(&model, "nope").is_err());
    }

    #[test]
    fn test_regulon_venn_df() {
        let model = create_test_model();
        let table = regulon_venn_df(&model, "0").unwrap().unwrap();
        // crp+fnr targets b0 only, which is inside the iModulon.
        assert_eq!(table.get_str("TF", "Value").unwrap(), "crp+fnr");
        assert_eq!(table.get_f64("reg_genes", "Value"), Some(0.0));
        assert_eq!(table.get_f64("reg_genes2", "Value"), Some(1.0));
        assert_eq!(table.get_f64("comp_genes", "Value"), Some(4.0));
        assert_eq!(table.get_str("both_genes", "list").unwrap(), "['gene0']");
        assert_eq!(
            table.get_str("comp_genes", "list").unwrap(),
            "['gene1' 'gene2' 'gene3']"
        );
        assert!(regulon_venn_df(&model, "1").unwrap().is_none());
    }

    #[test]
    fn test_complex_regulator_has_no_venn() {
        let mut model = create_test_model();
        model.imodulon_table_mut().set("0", "regulator", "crp+fnr/arcA").unwrap();
        assert!(regulon_venn_df(&model, "0").unwrap().is_none());
    }

    #[test]
    fn test_regulon_scatter_df() {
        let model = create_test_model();
        let table = regulon_scatter_df(&model, "0", &HashMap::new()).unwrap().unwrap();
        assert_eq!(table.columns(), &["A", "crp", "fnr"]);
        assert_relative_eq!(table.get_f64("R2", "crp").unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(table.get_f64("xmin", "crp").unwrap(), 2.0);
        assert_relative_eq!(table.get_f64("ystart", "crp").unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(table.get_f64("yend", "crp").unwrap(), 6.0, epsilon = 1e-12);
        assert!(table.get("xmid", "crp").map_or(true, Value::is_missing));
        assert_eq!(table.get_f64("s2", "A"), Some(5.0));
        assert!(regulon_scatter_df(&model, "1", &HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_imodulon_basics() {
        let model = create_test_model();
        let table = imodulon_basics(&model, "0", true, 2).unwrap();
        assert_eq!(table.get_str("name", "0").unwrap(), "CrpFnr");
        assert_eq!(table.get_str("TF", "0").unwrap(), "crp+fnr");
        assert_eq!(table.get_str("regulator", "0").unwrap(), "crp and fnr");
        assert_eq!(table.get_str("has_venn", "0").unwrap(), "True");
        assert_eq!(table.get_f64("scatter", "0"), Some(2.0));
    }

    #[test]
    fn test_gene_imodulon_table_df() {
        let model = create_test_model();
        let table = gene_imodulon_table_df(&model, "b2").unwrap();
        assert_eq!(table.index(), &["0", "1"]);
        assert_eq!(table.get_str("0", "in_iM").unwrap(), "True");

        let table = gene_imodulon_table_df(&model, "b8").unwrap();
        assert_eq!(table.index(), &["1", "0"]);
        assert_eq!(table.get_str("1", "name").unwrap(), "Single");
    }

    #[test]
    fn test_gene_basics() {
        let model = create_test_model();
        let table = gene_basics(&model, "b0").unwrap();
        assert_eq!(table.get_str("name", "0").unwrap(), "gene0");
        assert_eq!(table.get_str("operon", "0").unwrap(), NOT_AVAILABLE);
        assert_eq!(
            table.get_str("link", "0").unwrap(),
            "<a href=\"http://ecocyc/b0\">EcoCyc</a>"
        );
        assert_eq!(gene_basics(&model, "b1").unwrap().get_str("link", "0").unwrap(), NOT_AVAILABLE);
    }
}
