//! `keeper check`: load and validate an ecosystem file without starting it.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::config::{Directive, load_directives};
use crate::error::Error;
use crate::ui;

#[derive(Serialize)]
struct CheckReport<'a> {
    file: &'a Path,
    directives: &'a [Directive],
    warnings: &'a [String],
}

/// Validate `file` and print the resolved directives.
pub fn execute(file: &Path, json: bool) -> Result<()> {
    let loaded = match load_directives(file) {
        Ok(loaded) => loaded,
        Err(err) => {
            if !json {
                ui::print_error_box("Invalid ecosystem file", &err.to_string(), hints(&err));
            }
            return Err(err).with_context(|| format!("Failed to load {}", file.display()));
        },
    };

    if json {
        let report = CheckReport {
            file: &loaded.path,
            directives: &loaded.directives,
            warnings: &loaded.validation.warnings,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize directives")?
        );
        return Ok(());
    }

    println!("{}", loaded.path.display());
    for directive in &loaded.directives {
        println!("  {}", ui::directive_summary(directive));
    }
    ui::print_warnings(&loaded.validation);
    println!("OK: {} directive(s)", loaded.directives.len());
    Ok(())
}

fn hints(err: &Error) -> &'static [&'static str] {
    match err.field() {
        Some("name" | "script") => &["Every [[apps]] entry needs a unique name and a script"],
        Some("max_memory_restart") => &["Use a size such as \"512M\" or \"1G\""],
        Some("min_uptime") => &["Use a duration such as \"10s\" or a number of milliseconds"],
        Some("log_date_format") => &["Use tokens such as YYYY-MM-DD HH:mm:ss Z"],
        Some(_) => &[],
        None => match err {
            Error::ConfigParse { .. } => &["The file must be TOML with one [[apps]] table per process"],
            _ => &[],
        },
    }
}
