//! Engine options files.
//!
//! One option per line, `#` starts a comment:
//!
//! ```text
//! # extra options for the multi-TE fit
//! --max-iterations=50
//! t1 = 1.3
//! --infert1
//! --convergence trialmode
//! ```
//!
//! Values are typed on the way in so they can be merged with the built-in
//! options: `true`/`false`, integers, floats and comma-separated float lists
//! are recognised; anything else is kept as text.

use std::path::Path;

use crate::domain::{FitOptions, OptionValue};
use crate::error::AppError;

/// Read and parse an options file.
pub fn read_optfile(path: &Path) -> Result<FitOptions, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::config(format!("Failed to read options file '{}': {e}", path.display()))
    })?;
    parse_optfile(&text)
        .map_err(|e| AppError::config(format!("{}: {}", path.display(), e.message())))
}

pub fn parse_optfile(text: &str) -> Result<FitOptions, AppError> {
    let mut options = FitOptions::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = split_option(line);
        if key.is_empty() {
            return Err(AppError::config(format!(
                "line {}: missing option name in '{}'",
                idx + 1,
                raw.trim()
            )));
        }
        let value = match value {
            Some(v) => parse_value(v),
            None => OptionValue::Flag(true),
        };
        options.insert(key.to_string(), value);
    }
    Ok(options)
}

fn split_option(line: &str) -> (&str, Option<&str>) {
    let line = line.trim_start_matches('-');
    if let Some((key, value)) = line.split_once('=') {
        return (key.trim(), Some(value.trim()));
    }
    match line.split_once(char::is_whitespace) {
        Some((key, value)) => (key.trim(), Some(value.trim())),
        None => (line, None),
    }
}

fn parse_value(text: &str) -> OptionValue {
    match text {
        "true" | "True" => return OptionValue::Flag(true),
        "false" | "False" => return OptionValue::Flag(false),
        _ => {}
    }
    if let Ok(v) = text.parse::<i64>() {
        return OptionValue::Int(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return OptionValue::Float(v);
    }
    if text.contains(',') {
        let parsed: Result<Vec<f64>, _> = text.split(',').map(|p| p.trim().parse::<f64>()).collect();
        if let Ok(values) = parsed {
            return OptionValue::List(values);
        }
    }
    OptionValue::Text(text.to_string())
}

/// Render options in options-file form. Image values are written as `path_for(key)`.
pub fn render_optfile(options: &FitOptions, path_for: impl Fn(&str) -> String) -> String {
    let mut out = String::new();
    for (key, value) in options {
        match value {
            OptionValue::Flag(true) => out.push_str(&format!("--{key}\n")),
            OptionValue::Flag(false) => {}
            OptionValue::Image(_) => out.push_str(&format!("--{key}={}\n", path_for(key))),
            other => out.push_str(&format!("--{key}={other}\n")),
        }
    }
    out
}
