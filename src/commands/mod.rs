//! CLI command implementations.
//!
//! - [`start`] - Foreground supervisor
//! - [`check`] - Load and validate an ecosystem file
//! - [`logs`] - Tail a directive's log file

pub mod check;
pub mod logs;
pub mod start;

use crate::config::Directive;
use crate::error::{Error, Result};

/// Keep only the directive named `only`, or every directive when `None`.
///
/// # Errors
///
/// Returns [`Error::ConfigLoad`] if no directive has that name.
pub fn select_directives(directives: Vec<Directive>, only: Option<&str>) -> Result<Vec<Directive>> {
    let Some(only) = only else {
        return Ok(directives);
    };

    let selected: Vec<Directive> = directives.into_iter().filter(|d| d.name == only).collect();
    if selected.is_empty() {
        return Err(Error::config_load(
            "name",
            format!("no directive named '{only}'"),
        ));
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EcosystemConfig;
    use std::path::Path;

    fn two() -> Vec<Directive> {
        let doc = "[[apps]]\nname = \"a\"\nscript = \"a.sh\"\n\n[[apps]]\nname = \"b\"\nscript = \"b.sh\"\n";
        EcosystemConfig::parse(doc, Path::new("test.toml"))
            .unwrap()
            .resolve(Path::new("/srv"), Path::new("/srv/logs"))
            .unwrap()
            .0
    }

    #[test]
    fn test_select_all() {
        assert_eq!(select_directives(two(), None).unwrap().len(), 2);
    }

    #[test]
    fn test_select_one() {
        let selected = select_directives(two(), Some("b")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "b");
    }

    #[test]
    fn test_select_unknown() {
        let err = select_directives(two(), Some("c")).unwrap_err();
        assert_eq!(err.field(), Some("name"));
    }
}
