//! Regulator strings of the iModulon table.
//!
//! A regulator string names one or more regulators joined by `+` (all of
//! them) or `/` (any of them), optionally grouped with brackets, e.g.
//! `crp`, `arcA/fnr` or `[crp + glpR] / [fnr]`.

use crate::data::IcaData;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Regulator complexes whose expression is read from one of their genes.
pub const BUILTIN_TF_RENAMES: [(&str, &str); 10] = [
    ("csqR", "yihW"),
    ("hprR", "yedW"),
    ("thi-box", "Thi-box"),
    ("FlhDC", "flhD"),
    ("RcsAB", "rcsB"),
    ("ntrC", "glnG"),
    ("gutR", "srlR"),
    ("IHF", "ihfB"),
    ("H-NS", "hns"),
    ("GadE-RcsB", "gadE"),
];

fn operator_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"[+/]").expect("constant pattern"))
}

/// Regulator names of a string in order of appearance, without duplicates.
pub fn split_tf_string(tf_str: &str) -> Vec<String> {
    let cleaned = tf_str.replace(['[', ']'], "");
    let mut tfs: Vec<String> = Vec::new();
    for tf in operator_splitter().split(&cleaned) {
        let tf = tf.trim();
        if !tf.is_empty() && !tfs.iter().any(|t| t == tf) {
            tfs.push(tf.to_string());
        }
    }
    tfs
}

/// Split a regulator string into regulators present in the TRN and those
/// that are not.
pub fn parse_tf_string(model: &IcaData, tf_str: &str) -> (Vec<String>, Vec<String>) {
    split_tf_string(tf_str)
        .into_iter()
        .partition(|tf| model.trn().contains_regulator(tf))
}

fn link_one(links: &HashMap<String, String>, tf: &str, bad: &mut Vec<String>) -> String {
    match links.get(tf).map(|l| l.trim()) {
        Some(link) if !link.is_empty() => {
            format!("<a href=\"{}\" target=\"_blank\">{}</a>", link, tf)
        }
        _ => {
            if !bad.iter().any(|b| b == tf) {
                bad.push(tf.to_string());
            }
            tf.to_string()
        }
    }
}

/// HTML rendering of a regulator string with links to regulator pages.
///
/// `/` reads as "or" and `+` as "and". Returns the rendering and the
/// regulators without a link.
pub fn tf_with_links(model: &IcaData, tf_str: &str) -> (String, Vec<String>) {
    let links = model.tf_links();
    let mut bad = Vec::new();
    if tf_str.trim().is_empty() {
        return (tf_str.to_string(), bad);
    }
    if tf_str.contains('[') {
        return tf_with_links_brackets(links, tf_str);
    }

    let (parts, joiner): (Vec<&str>, &str) = if tf_str.contains('/') {
        (tf_str.split('/').collect(), " or ")
    } else if tf_str.contains('+') {
        (tf_str.split('+').collect(), " and ")
    } else {
        (vec![tf_str], "")
    };
    let html: Vec<String> = parts
        .iter()
        .map(|tf| link_one(links, tf.trim(), &mut bad))
        .collect();
    (html.join(joiner), bad)
}

/// Bracketed form: `[a + b] / [c]` keeps its operators and brackets.
fn tf_with_links_brackets(links: &HashMap<String, String>, tf_str: &str) -> (String, Vec<String>) {
    let mut bad = Vec::new();
    let union: Vec<&str> = tf_str.split('/').collect();
    let rendered: Vec<String> = union
        .iter()
        .map(|term| {
            let term = term.trim().trim_start_matches('[').trim_end_matches(']');
            term.split('+')
                .map(|tf| link_one(links, tf.trim(), &mut bad))
                .collect::<Vec<_>>()
                .join(" + ")
        })
        .collect();
    let html = if union.len() > 1 {
        format!("[{}]", rendered.join("] / ["))
    } else {
        rendered.join("")
    };
    (html, bad)
}

/// Regulators of a string whose own expression is in X.
///
/// Names are mapped through [`BUILTIN_TF_RENAMES`] and then
/// `tfcomplex_to_gene` before looking up the gene. Returns the regulators
/// (after renaming) with an expression profile and those with no matching
/// gene.
pub fn get_tfs_to_scatter(
    model: &IcaData,
    tf_str: &str,
    tfcomplex_to_gene: &HashMap<String, String>,
) -> (Vec<String>, Vec<String>) {
    let mut renames: HashMap<&str, &str> = BUILTIN_TF_RENAMES.iter().copied().collect();
    for (complex, gene) in tfcomplex_to_gene {
        renames.insert(complex.as_str(), gene.as_str());
    }

    let mut found: Vec<String> = Vec::new();
    let mut bad: Vec<String> = Vec::new();
    for tf in split_tf_string(tf_str) {
        let tf = renames.get(tf.as_str()).map(|g| g.to_string()).unwrap_or(tf);
        match model.name2num(&tf) {
            Ok(locus) => {
                let expressed = model.x().is_some_and(|x| x.row_index(&locus).is_some());
                if expressed && !found.contains(&tf) {
                    found.push(tf);
                }
            }
            Err(_) => {
                if !bad.contains(&tf) {
                    bad.push(tf);
                }
            }
        }
    }
    (found, bad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AnnotationTable, LabeledMatrix, Trn, TrnEdge};

    fn create_test_model() -> IcaData {
        let genes: Vec<String> = (0..4).map(|i| format!("b{}", i)).collect();
        let m = LabeledMatrix::from_rows(
            &[vec![1.0], vec![0.0], vec![0.0], vec![0.0]],
            genes.clone(),
            vec!["0".into()],
        )
        .unwrap();
        let a = LabeledMatrix::from_rows(&[vec![1.0, 2.0]], vec!["0".into()], vec!["s0".into(), "s1".into()])
            .unwrap();
        let x = LabeledMatrix::from_rows(
            &[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0], vec![7.0, 8.0]],
            genes.clone(),
            vec!["s0".into(), "s1".into()],
        )
        .unwrap();
        let mut gene_table = AnnotationTable::new(genes);
        for (g, name) in [("b0", "crp"), ("b1", "fnr"), ("b2", "flhD"), ("b3", "lacZ")] {
            gene_table.set(g, "gene_name", name).unwrap();
        }
        let trn = Trn::new(vec![TrnEdge::new("crp", "b3"), TrnEdge::new("fnr", "b3")]);
        let links = HashMap::from([("crp".to_string(), "https://regulondb/crp".to_string())]);
        IcaData::builder(m, a)
            .x(x)
            .gene_table(gene_table)
            .trn(trn)
            .thresholds(vec![0.5])
            .tf_links(links)
            .build()
            .unwrap()
    }

    #[test]
    fn test_split_tf_string() {
        assert_eq!(split_tf_string("crp+fnr"), vec!["crp", "fnr"]);
        assert_eq!(split_tf_string("[crp + fnr] / [crp]"), vec!["crp", "fnr"]);
        assert!(split_tf_string("").is_empty());
    }

    #[test]
    fn test_parse_tf_string() {
        let model = create_test_model();
        let (good, bad) = parse_tf_string(&model, "crp/arcA");
        assert_eq!(good, vec!["crp"]);
        assert_eq!(bad, vec!["arcA"]);
    }

    #[test]
    fn test_tf_with_links() {
        let model = create_test_model();
        let (html, bad) = tf_with_links(&model, "crp/fnr");
        assert_eq!(
            html,
            "<a href=\"https://regulondb/crp\" target=\"_blank\">crp</a> or fnr"
        );
        assert_eq!(bad, vec!["fnr"]);

        let (html, _) = tf_with_links(&model, "fnr+arcA");
        assert_eq!(html, "fnr and arcA");
        assert_eq!(tf_with_links(&model, "").0, "");
    }

    #[test]
    fn test_tf_with_links_brackets() {
        let model = create_test_model();
        let (html, bad) = tf_with_links(&model, "[fnr + arcA] / [crp]");
        assert_eq!(
            html,
            "[fnr + arcA] / [<a href=\"https://regulondb/crp\" target=\"_blank\">crp</a>]"
        );
        assert_eq!(bad, vec!["fnr", "arcA"]);
    }

    #[test]
    fn test_get_tfs_to_scatter() {
        let model = create_test_model();
        let (found, bad) = get_tfs_to_scatter(&model, "crp+FlhDC+arcA", &HashMap::new());
        assert_eq!(found, vec!["crp", "flhD"]);
        assert_eq!(bad, vec!["arcA"]);

        let custom = HashMap::from([("ArcAB".to_string(), "fnr".to_string())]);
        let (found, bad) = get_tfs_to_scatter(&model, "ArcAB", &custom);
        assert_eq!(found, vec!["fnr"]);
        assert!(bad.is_empty());
    }
}
