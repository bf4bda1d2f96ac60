//! Boolean regulon expressions such as `glpR`, `crp+glpR`, `arcA/fnr` or
//! `[crp + glpR] / [fnr]`.

use crate::data::Trn;
use crate::error::{ImodError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A regulator or a combination of regulators.
///
/// `+` is an intersection of target genes (all regulators), `/` is a union
/// (any regulator). The two may only be mixed when one level is bracketed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegulonExpr {
    Single(String),
    And(Vec<RegulonExpr>),
    Or(Vec<RegulonExpr>),
}

impl RegulonExpr {
    /// Parse a regulon string.
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ImodError::InvalidParameter("empty regulon".to_string()));
        }

        let mut depth = 0i32;
        let mut segments = Vec::new();
        let mut ops = Vec::new();
        let mut start = 0;
        for (i, ch) in text.char_indices() {
            match ch {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(unbalanced(input));
                    }
                }
                '+' | '/' if depth == 0 => {
                    segments.push(&text[start..i]);
                    ops.push(ch);
                    start = i + 1;
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(unbalanced(input));
        }
        segments.push(&text[start..]);

        if ops.iter().any(|&op| op != ops[0]) {
            return Err(ImodError::ComplexRegulon(input.to_string()));
        }

        let mut terms = segments
            .into_iter()
            .map(|segment| parse_term(segment, input))
            .collect::<Result<Vec<_>>>()?;

        match ops.first() {
            None => Ok(terms.remove(0)),
            Some('+') => Ok(RegulonExpr::And(terms)),
            Some(_) => Ok(RegulonExpr::Or(terms)),
        }
    }

    /// Regulator names in order of appearance.
    pub fn regulators(&self) -> Vec<&str> {
        match self {
            RegulonExpr::Single(name) => vec![name.as_str()],
            RegulonExpr::And(terms) | RegulonExpr::Or(terms) => {
                terms.iter().flat_map(|t| t.regulators()).collect()
            }
        }
    }

    /// Number of regulators in the expression.
    pub fn n_regs(&self) -> usize {
        self.regulators().len()
    }

    /// Target genes of the expression in a TRN.
    pub fn genes(&self, trn: &Trn) -> HashSet<String> {
        match self {
            RegulonExpr::Single(name) => trn.genes_of(name),
            RegulonExpr::And(terms) => {
                let mut sets = terms.iter().map(|t| t.genes(trn));
                let first = sets.next().unwrap_or_default();
                sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
            }
            RegulonExpr::Or(terms) => terms.iter().flat_map(|t| t.genes(trn)).collect(),
        }
    }
}

fn unbalanced(input: &str) -> ImodError {
    ImodError::InvalidParameter(format!("unbalanced brackets in regulon '{}'", input))
}

fn parse_term(segment: &str, input: &str) -> Result<RegulonExpr> {
    let term = segment.trim();
    if term.is_empty() {
        return Err(ImodError::InvalidParameter(format!(
            "empty regulator in regulon '{}'",
            input
        )));
    }
    if let Some(inner) = term.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return RegulonExpr::parse(inner);
    }
    if term.contains('[') || term.contains(']') {
        return Err(unbalanced(input));
    }
    Ok(RegulonExpr::Single(term.to_string()))
}

impl fmt::Display for RegulonExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, terms: &[RegulonExpr], op: &str| {
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    write!(f, "{}", op)?;
                }
                match term {
                    RegulonExpr::Single(name) => write!(f, "{}", name)?,
                    nested => write!(f, "[{}]", nested)?,
                }
            }
            Ok(())
        };
        match self {
            RegulonExpr::Single(name) => write!(f, "{}", name),
            RegulonExpr::And(terms) => join(f, terms, "+"),
            RegulonExpr::Or(terms) => join(f, terms, "/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TrnEdge;

    fn create_test_trn() -> Trn {
        Trn::new(vec![
            TrnEdge::new("crp", "g1"),
            TrnEdge::new("crp", "g2"),
            TrnEdge::new("crp", "g3"),
            TrnEdge::new("glpR", "g2"),
            TrnEdge::new("glpR", "g3"),
            TrnEdge::new("glpR", "g4"),
            TrnEdge::new("fnr", "g5"),
        ])
    }

    fn sorted(set: HashSet<String>) -> Vec<String> {
        let mut v: Vec<String> = set.into_iter().collect();
        v.sort();
        v
    }

    #[test]
    fn test_parse_single() {
        assert_eq!(
            RegulonExpr::parse(" glpR ").unwrap(),
            RegulonExpr::Single("glpR".to_string())
        );
    }

    #[test]
    fn test_parse_and_or() {
        let and = RegulonExpr::parse("crp+glpR").unwrap();
        assert_eq!(and.n_regs(), 2);
        assert_eq!(sorted(and.genes(&create_test_trn())), vec!["g2", "g3"]);

        let or = RegulonExpr::parse("crp/fnr").unwrap();
        assert_eq!(sorted(or.genes(&create_test_trn())), vec!["g1", "g2", "g3", "g5"]);
    }

    #[test]
    fn test_mixed_without_brackets_is_complex() {
        let err = RegulonExpr::parse("crp+glpR/fnr").unwrap_err();
        assert!(matches!(err, ImodError::ComplexRegulon(_)));
    }

    #[test]
    fn test_bracketed_mix() {
        let expr = RegulonExpr::parse("[crp + glpR] / [fnr]").unwrap();
        assert_eq!(expr.n_regs(), 3);
        assert_eq!(expr.regulators(), vec!["crp", "glpR", "fnr"]);
        assert_eq!(sorted(expr.genes(&create_test_trn())), vec!["g2", "g3", "g5"]);
        assert_eq!(expr.to_string(), "[crp+glpR]/fnr");
    }

    #[test]
    fn test_unbalanced_brackets() {
        assert!(RegulonExpr::parse("[crp+glpR").is_err());
        assert!(RegulonExpr::parse("crp]").is_err());
        assert!(RegulonExpr::parse("crp+").is_err());
    }

    #[test]
    fn test_unknown_regulator_has_no_genes() {
        let expr = RegulonExpr::parse("lacI").unwrap();
        assert!(expr.genes(&create_test_trn()).is_empty());
    }
}
