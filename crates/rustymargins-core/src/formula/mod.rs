//! Formula parsing for R-style model specifications.
//!
//! This module parses formulas like
//! `"mass ~ bill_len * C(species) + s(flipper_len, k=8) + (1 + bill_len | island)"`
//! into structured components for design matrix construction.

use std::collections::HashSet;

use crate::error::{Result, RustyMarginsError};

/// Parsed smooth term `s(x)` / `s(x, k=8)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothTerm {
    pub var_name: String,
    /// Basis dimension; `None` means "use the configured default".
    pub k: Option<usize>,
}

/// Parsed interaction term
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionTerm {
    pub factors: Vec<String>,
    pub categorical_flags: Vec<bool>,
}

impl InteractionTerm {
    /// Label used for coefficient names, e.g. "bill_len:species".
    pub fn label(&self) -> String {
        self.factors.join(":")
    }

    pub fn involves(&self, var: &str) -> bool {
        self.factors.iter().any(|f| f == var)
    }
}

/// Parsed random-effect term `(1 | g)`, `(1 + x | g)`, `(0 + x | g)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomTerm {
    pub group: String,
    pub intercept: bool,
    pub slopes: Vec<String>,
}

/// Result of parsing a formula
#[derive(Debug, Clone)]
pub struct ParsedFormula {
    pub response: String,
    pub main_effects: Vec<String>,
    pub interactions: Vec<InteractionTerm>,
    pub categorical_vars: HashSet<String>,
    pub smooth_terms: Vec<SmoothTerm>,
    pub random_terms: Vec<RandomTerm>,
    pub has_intercept: bool,
}

impl ParsedFormula {
    /// Every predictor variable named on the right-hand side (fixed part,
    /// smooths, random slopes and grouping factors), without duplicates.
    pub fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        let mut push = |v: &str| {
            if !vars.iter().any(|x| x == v) {
                vars.push(v.to_string());
            }
        };
        self.main_effects.iter().for_each(|v| push(v));
        self.interactions
            .iter()
            .flat_map(|i| i.factors.iter())
            .for_each(|v| push(v));
        self.smooth_terms.iter().for_each(|s| push(&s.var_name));
        for r in &self.random_terms {
            r.slopes.iter().for_each(|v| push(v));
            push(&r.group);
        }
        vars
    }

    /// Variables of the fixed (population-level) part only.
    pub fn fixed_variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        let names = self
            .main_effects
            .iter()
            .chain(self.interactions.iter().flat_map(|i| i.factors.iter()))
            .chain(self.smooth_terms.iter().map(|s| &s.var_name));
        for v in names {
            if !vars.contains(v) {
                vars.push(v.clone());
            }
        }
        vars
    }
}

/// Parse a smooth term like "s(age)" or "s(age, k=8)"
fn parse_smooth_term(term: &str) -> Result<Option<SmoothTerm>> {
    let term = term.trim();
    if !term.starts_with("s(") {
        return Ok(None);
    }
    let end = term
        .rfind(')')
        .ok_or_else(|| RustyMarginsError::FormulaError(format!("unclosed smooth term '{}'", term)))?;
    let inner = &term[2..end];
    let mut parts = inner.split(',');

    let var_name = parts.next().unwrap_or("").trim().to_string();
    if var_name.is_empty() {
        return Err(RustyMarginsError::FormulaError(format!(
            "smooth term '{}' names no variable",
            term
        )));
    }

    let mut k = None;
    for part in parts {
        let part = part.trim();
        let value = match part.split_once('=') {
            Some((key, value)) if key.trim() == "k" => value.trim(),
            Some((key, _)) => {
                return Err(RustyMarginsError::FormulaError(format!(
                    "unknown smooth argument '{}' in '{}'",
                    key.trim(),
                    term
                )))
            }
            // Positional argument is the basis dimension
            None => part,
        };
        let parsed: usize = value.parse().map_err(|_| {
            RustyMarginsError::FormulaError(format!("invalid basis dimension '{}' in '{}'", value, term))
        })?;
        k = Some(parsed);
    }

    Ok(Some(SmoothTerm { var_name, k }))
}

/// Parse a random-effect term like "(1 | g)" or "(1 + x | g)".
fn parse_random_term(term: &str) -> Result<Option<RandomTerm>> {
    let term = term.trim();
    if !(term.starts_with('(') && term.ends_with(')') && term.contains('|')) {
        return Ok(None);
    }
    let inner = &term[1..term.len() - 1];
    let (lhs, group) = inner
        .split_once('|')
        .ok_or_else(|| RustyMarginsError::FormulaError(format!("malformed random term '{}'", term)))?;
    let group = group.trim();
    if group.is_empty() || group.contains(|c: char| c.is_whitespace() || c == '+') {
        return Err(RustyMarginsError::FormulaError(format!(
            "random term '{}' must name a single grouping factor",
            term
        )));
    }

    let mut intercept = true;
    let mut slopes = Vec::new();
    for piece in lhs.split('+') {
        match piece.trim() {
            "1" => intercept = true,
            "0" => intercept = false,
            "" => {
                return Err(RustyMarginsError::FormulaError(format!(
                    "empty component in random term '{}'",
                    term
                )))
            }
            var => slopes.push(var.to_string()),
        }
    }
    if !intercept && slopes.is_empty() {
        return Err(RustyMarginsError::FormulaError(format!(
            "random term '{}' has no random columns",
            term
        )));
    }

    Ok(Some(RandomTerm {
        group: group.to_string(),
        intercept,
        slopes,
    }))
}

/// Split formula RHS by '+', respecting parentheses
fn split_terms(rhs: &str) -> Result<Vec<String>> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;

    for c in rhs.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(RustyMarginsError::FormulaError(format!(
                        "unbalanced ')' in '{}'",
                        rhs
                    )));
                }
                current.push(c);
            }
            '+' if depth == 0 => {
                let term = current.trim().to_string();
                if !term.is_empty() {
                    terms.push(term);
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(RustyMarginsError::FormulaError(format!("unbalanced '(' in '{}'", rhs)));
    }

    let term = current.trim().to_string();
    if !term.is_empty() {
        terms.push(term);
    }

    Ok(terms)
}

/// Clean variable name: "C(var)" -> "var"
fn clean_var_name(term: &str) -> String {
    let term = term.trim();
    if term.starts_with("C(") && term.ends_with(')') {
        term[2..term.len() - 1].trim().to_string()
    } else {
        term.to_string()
    }
}

/// Check if term is categorical
fn is_categorical(term: &str, categorical_vars: &HashSet<String>) -> bool {
    let term = term.trim();
    if term.starts_with("C(") {
        return true;
    }
    categorical_vars.contains(&clean_var_name(term))
}

fn interaction_of(factor_strs: &[&str], categorical_vars: &HashSet<String>) -> InteractionTerm {
    InteractionTerm {
        factors: factor_strs.iter().map(|f| clean_var_name(f)).collect(),
        categorical_flags: factor_strs
            .iter()
            .map(|f| is_categorical(f, categorical_vars))
            .collect(),
    }
}

fn push_unique_interaction(interactions: &mut Vec<InteractionTerm>, term: InteractionTerm) {
    if !interactions.iter().any(|i| i.factors == term.factors) {
        interactions.push(term);
    }
}

/// Parse a formula string into structured components.
///
/// Handles:
/// - Main effects: x1, x2, C(cat)
/// - Interactions: x1:x2, x1*x2 (all lower-order terms included), x1*x2*x3
/// - Intercept removal: 0 + ... or -1
/// - Smooth terms: s(x), s(x, k=8)
/// - Random effects: (1 | g), (1 + x | g), (0 + x | g)
///
/// # Arguments
/// * `formula` - R-style formula like "y ~ x1*C(g) + s(age)"
///
/// # Returns
/// Parsed formula structure with all terms identified
pub fn parse_formula(formula: &str) -> Result<ParsedFormula> {
    // Split into response and predictors
    let parts: Vec<&str> = formula.split('~').collect();
    if parts.len() != 2 {
        return Err(RustyMarginsError::FormulaError(format!(
            "formula must contain exactly one '~': {}",
            formula
        )));
    }

    let response = parts[0].trim().to_string();
    if response.is_empty() {
        return Err(RustyMarginsError::FormulaError(format!(
            "formula has no response: {}",
            formula
        )));
    }
    let mut rhs = parts[1].trim().to_string();

    // Check for intercept removal
    let mut has_intercept = true;

    if let Some(rest) = rhs.strip_prefix("0 +").or_else(|| rhs.strip_prefix("0+")) {
        has_intercept = false;
        rhs = rest.trim().to_string();
    }

    if let Some(rest) = rhs.strip_suffix("- 1").or_else(|| rhs.strip_suffix("-1")) {
        has_intercept = false;
        rhs = rest.trim().trim_end_matches('+').trim().to_string();
    }

    // Find all C(...) categorical markers
    let mut categorical_vars = HashSet::new();
    let mut pos = 0;
    while let Some(start) = rhs[pos..].find("C(") {
        let abs_start = pos + start + 2;
        match rhs[abs_start..].find(')') {
            Some(end) => {
                categorical_vars.insert(rhs[abs_start..abs_start + end].trim().to_string());
                pos = abs_start + end + 1;
            }
            None => break,
        }
    }

    let terms = split_terms(&rhs)?;

    let mut main_effects = Vec::new();
    let mut interactions: Vec<InteractionTerm> = Vec::new();
    let mut smooth_terms = Vec::new();
    let mut random_terms = Vec::new();

    for term in terms {
        if let Some(random) = parse_random_term(&term)? {
            random_terms.push(random);
            continue;
        }

        if let Some(smooth) = parse_smooth_term(&term)? {
            if !smooth_terms.iter().any(|s: &SmoothTerm| s.var_name == smooth.var_name) {
                smooth_terms.push(smooth);
            }
            continue;
        }

        if term.contains('*') {
            // Full crossing: a*b*c = a + b + c + a:b + a:c + b:c + a:b:c
            let factor_strs: Vec<&str> = term.split('*').map(str::trim).collect();

            for f in &factor_strs {
                let clean = clean_var_name(f);
                if !main_effects.contains(&clean) {
                    main_effects.push(clean);
                }
            }

            let m = factor_strs.len();
            let mut subsets: Vec<Vec<&str>> = (1u32..(1 << m))
                .map(|mask| {
                    (0..m)
                        .filter(|i| mask & (1 << i) != 0)
                        .map(|i| factor_strs[i])
                        .collect::<Vec<_>>()
                })
                .filter(|s| s.len() >= 2)
                .collect();
            subsets.sort_by_key(|s| s.len());
            for subset in subsets {
                push_unique_interaction(&mut interactions, interaction_of(&subset, &categorical_vars));
            }
        } else if term.contains(':') {
            // Pure interaction: a:b (no main effects)
            let factor_strs: Vec<&str> = term.split(':').map(str::trim).collect();
            push_unique_interaction(&mut interactions, interaction_of(&factor_strs, &categorical_vars));
        } else {
            let clean = clean_var_name(&term);
            if clean == "1" {
                has_intercept = true;
            } else if clean == "0" {
                has_intercept = false;
            } else if !clean.is_empty() && !main_effects.contains(&clean) {
                main_effects.push(clean);
            }
        }
    }

    Ok(ParsedFormula {
        response,
        main_effects,
        interactions,
        categorical_vars,
        smooth_terms,
        random_terms,
        has_intercept,
    })
}
