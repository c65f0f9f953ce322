//! Formatted terminal output.
//!
//! We keep formatting code in one place so the fitting code stays free of
//! presentation concerns.

use crate::domain::{FitOptions, OptionValue};
use crate::report::summary::RunSummary;

/// Format engine options one per line, as a dry run would pass them.
pub fn format_options(options: &FitOptions) -> String {
    let width = options.keys().map(|k| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (key, value) in options {
        let shown = match value {
            OptionValue::Flag(true) => "(flag)".to_string(),
            OptionValue::Flag(false) => "(off)".to_string(),
            other => other.to_string(),
        };
        out.push_str(&format!("  {key:<width$}  {shown}\n"));
    }
    out
}

/// Format the end-of-run summary.
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str("=== asl_multite - Multi-TE ASL modelling ===\n");
    out.push_str(&format!(
        "Data: {} ({:?}, order {})\n",
        summary.data.shape, summary.data.iaf, summary.data.order
    ));
    out.push_str(&format!("TIs (s): {}\n", join(&summary.data.tis)));
    out.push_str(&format!("TEs (s): {}\n", join(&summary.data.tes)));
    out.push_str(&format!("Repeats: {}\n", summary.data.rpts.first().copied().unwrap_or(0)));

    if let Some(init) = &summary.init_outputs {
        out.push_str(&format!("Init fit outputs: {}\n", init.len()));
    }
    out.push_str(&format!("Engine outputs: {}\n", list_or_none(&summary.engine_outputs)));
    out.push_str(&format!("Native maps: {}\n", list_or_none(&summary.native_maps)));
    if summary.registered {
        out.push_str(&format!("Structural maps: {}\n", list_or_none(&summary.struc_maps)));
    } else {
        out.push_str("Structural maps: not registered\n");
    }
    out
}

fn join(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v}")).collect();
    parts.join(", ")
}

fn list_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::asldata::LabelFormat;
    use crate::report::summary::DataSummary;

    #[test]
    fn options_are_aligned_and_flags_marked() {
        let mut opts = FitOptions::new();
        opts.insert("method".into(), "vb".into());
        opts.insert("infertexch".into(), true.into());
        opts.insert("ti".into(), vec![1.0, 2.0].into());
        assert_eq!(
            format_options(&opts),
            "  method      vb\n  infertexch  (flag)\n  ti          1,2\n"
        );
    }

    #[test]
    fn summary_mentions_skipped_registration() {
        let summary = RunSummary {
            tool: "asl_multite".into(),
            version: "0.1.0".into(),
            generated: chrono::Local::now(),
            data: DataSummary {
                shape: "2x1x1x4".into(),
                iaf: LabelFormat::Diff,
                order: "etr".into(),
                tis: vec![1.8],
                tes: vec![0.013, 0.04],
                taus: vec![1.4],
                rpts: vec![2],
            },
            options: FitOptions::new(),
            init_outputs: None,
            engine_outputs: vec!["mean_ftiss".into()],
            native_maps: vec!["perfusion".into()],
            registered: false,
            struc_maps: vec![],
        };
        let text = format_run_summary(&summary);
        assert!(text.contains("TEs (s): 0.013, 0.04"));
        assert!(text.contains("Native maps: perfusion"));
        assert!(text.contains("Structural maps: not registered"));
        assert!(!text.contains("Init fit"));
    }
}
