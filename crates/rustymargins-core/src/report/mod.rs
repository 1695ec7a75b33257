// =============================================================================
// Text Reports
// =============================================================================
//
// Fixed-width tables for effects, coefficients and predictions, ready to be
// dropped into a rendered document or printed to a terminal.
//
//   Term         Contrast        Estimate   Std.Err  ...
//   ------------------------------------------------ ...
//   bill_len     slope            49.6858    4.1201  ...
//
// Each table is a `Display` wrapper; the `render_*` helpers return Strings.
//
// =============================================================================

use std::fmt;

use crate::effects::EffectEstimate;
use crate::model::CoefficientRow;
use crate::predictions::Prediction;

/// Column width of a label column: its widest entry, but at least the header.
fn label_width<'a, I: Iterator<Item = &'a str>>(header: &str, labels: I) -> usize {
    labels.map(str::len).fold(header.len(), usize::max)
}

fn format_pvalue(p: f64) -> String {
    if p.is_nan() {
        "NA".to_string()
    } else if p < 1e-4 {
        "<1e-04".to_string()
    } else {
        format!("{:.4}", p)
    }
}

/// Effect estimates as a table.
pub struct EffectTable<'a>(pub &'a [EffectEstimate]);

impl fmt::Display for EffectTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.0;
        let contexts: Vec<String> = rows
            .iter()
            .map(|e| {
                e.context
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        let tw = label_width("Term", rows.iter().map(|e| e.term.as_str()));
        let cw = label_width("Contrast", rows.iter().map(|e| e.contrast.as_str()));
        let pw = label_width("Policy", rows.iter().map(|e| e.policy.as_str()));
        let show_context = contexts.iter().any(|c| !c.is_empty());
        let xw = label_width("Context", contexts.iter().map(String::as_str));

        write!(f, "{:<tw$}  {:<cw$}  {:<pw$}", "Term", "Contrast", "Policy", tw = tw, cw = cw, pw = pw)?;
        if show_context {
            write!(f, "  {:<xw$}", "Context", xw = xw)?;
        }
        writeln!(
            f,
            " {:>12} {:>10} {:>8} {:>8} {:>12} {:>12}",
            "Estimate", "Std.Err", "z/t", "P", "Lower", "Upper"
        )?;
        let width = tw + cw + pw + 4 + if show_context { xw + 2 } else { 0 } + 68;
        writeln!(f, "{:-<width$}", "", width = width)?;

        for (e, context) in rows.iter().zip(&contexts) {
            write!(f, "{:<tw$}  {:<cw$}  {:<pw$}", e.term, e.contrast, e.policy, tw = tw, cw = cw, pw = pw)?;
            if show_context {
                write!(f, "  {:<xw$}", context, xw = xw)?;
            }
            writeln!(
                f,
                " {:>12.4} {:>10.4} {:>8.3} {:>8} {:>12.4} {:>12.4}",
                e.estimate,
                e.std_error,
                e.statistic,
                format_pvalue(e.p_value),
                e.conf_low,
                e.conf_high
            )?;
        }
        Ok(())
    }
}

/// Coefficient summary as a table, with significance stars.
pub struct CoefficientTable<'a>(pub &'a [CoefficientRow]);

impl fmt::Display for CoefficientTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tw = label_width("Term", self.0.iter().map(|r| r.term.as_str()));
        writeln!(
            f,
            "{:<tw$} {:>12} {:>10} {:>8} {:>8} {:>12} {:>12}",
            "Term",
            "Estimate",
            "Std.Err",
            "z/t",
            "P",
            "Lower",
            "Upper",
            tw = tw
        )?;
        writeln!(f, "{:-<width$}", "", width = tw + 68)?;
        for r in self.0 {
            writeln!(
                f,
                "{:<tw$} {:>12.4} {:>10.4} {:>8.3} {:>8} {:>12.4} {:>12.4} {}",
                r.term,
                r.estimate,
                r.std_error,
                r.statistic,
                format_pvalue(r.p_value),
                r.conf_low,
                r.conf_high,
                r.stars,
                tw = tw
            )?;
        }
        writeln!(f, "---")?;
        write!(f, "Signif. codes: 0 '***' 0.001 '**' 0.01 '*' 0.05 '.' 0.1 ' ' 1")
    }
}

/// Predictions as a table, one line per row with its variable values.
pub struct PredictionTable<'a>(pub &'a [Prediction]);

impl fmt::Display for PredictionTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self
            .0
            .iter()
            .map(|p| {
                p.values
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        let vw = label_width("Values", labels.iter().map(String::as_str));
        writeln!(
            f,
            "{:>5}  {:<vw$} {:>12} {:>10} {:>12} {:>12}",
            "Row",
            "Values",
            "Estimate",
            "Std.Err",
            "Lower",
            "Upper",
            vw = vw
        )?;
        writeln!(f, "{:-<width$}", "", width = vw + 57)?;
        for (p, label) in self.0.iter().zip(&labels) {
            writeln!(
                f,
                "{:>5}  {:<vw$} {:>12.4} {:>10.4} {:>12.4} {:>12.4}",
                p.row,
                label,
                p.estimate,
                p.std_error,
                p.conf_low,
                p.conf_high,
                vw = vw
            )?;
        }
        Ok(())
    }
}

pub fn render_effects(effects: &[EffectEstimate]) -> String {
    EffectTable(effects).to_string()
}

pub fn render_coefficients(rows: &[CoefficientRow]) -> String {
    CoefficientTable(rows).to_string()
}

pub fn render_predictions(predictions: &[Prediction]) -> String {
    PredictionTable(predictions).to_string()
}
