//! Terminal output helpers for the CLI.

use crate::config::{Directive, ValidationResult};
use crate::utils::{format_bytes, format_duration};

/// Width of error box separators.
const ERROR_BOX_WIDTH: usize = 60;

/// Print an error box with a title, the error and optional hints.
///
/// Outputs:
/// ```text
/// ============================================================
/// Invalid ecosystem file
/// ============================================================
///
/// invalid field 'script': missing required field
///
/// Hints:
///   - ...
/// ```
pub fn print_error_box(title: &str, detail: &str, hints: &[&str]) {
    eprintln!("\n{}", "=".repeat(ERROR_BOX_WIDTH));
    eprintln!("{title}");
    eprintln!("{}", "=".repeat(ERROR_BOX_WIDTH));

    if !detail.is_empty() {
        eprintln!("\n{detail}");
    }

    if !hints.is_empty() {
        eprintln!("\nHints:");
        for hint in hints {
            eprintln!("  - {hint}");
        }
    }
}

/// Print validation warnings, if any.
pub fn print_warnings(validation: &ValidationResult) {
    if !validation.has_warnings() {
        return;
    }
    eprintln!("Warnings:");
    for warning in &validation.warnings {
        eprintln!("  - {warning}");
    }
}

/// One-line summary of a directive for `keeper check`.
pub fn directive_summary(directive: &Directive) -> String {
    let (program, args) = directive.command_line();
    let memory = directive
        .max_memory_restart
        .map_or_else(|| "unlimited".to_string(), format_bytes);

    format!(
        "{name}: {program} {args} (instances: {instances}, max_restarts: {max}, min_uptime: {uptime}, memory: {memory})",
        name = directive.name,
        program = program.display(),
        args = args.join(" "),
        instances = directive.instances,
        max = directive.max_restarts,
        uptime = format_duration(directive.min_uptime),
    )
}
