//! Run summary counters
//!
//! The loader records every non-fatal problem here so a bulk run can end
//! with one line per category instead of a wall of warnings.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::{Error, ErrorKind};

/// Counters shared by everything that runs under one loader.
#[derive(Debug, Default)]
pub struct RunStats {
    packages: Cell<usize>,
    objects: Cell<usize>,
    warnings: Cell<usize>,
    skipped: Cell<usize>,
    missing: Cell<usize>,
    corrupt: Cell<usize>,
    unknown_classes: RefCell<BTreeSet<String>>,
    missing_packages: RefCell<BTreeSet<String>>,
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package_loaded(&self) {
        bump(&self.packages);
    }

    pub fn object_loaded(&self) {
        bump(&self.objects);
    }

    pub fn warning(&self) {
        bump(&self.warnings);
    }

    pub fn skipped(&self) {
        bump(&self.skipped);
    }

    pub fn unknown_class(&self, name: &str) {
        bump(&self.skipped);
        self.unknown_classes.borrow_mut().insert(name.to_string());
    }

    /// Returns `true` the first time `name` is reported.
    pub fn missing_package(&self, name: &str) -> bool {
        let first = self.missing_packages.borrow_mut().insert(name.to_ascii_lowercase());
        if first {
            bump(&self.missing);
        }
        first
    }

    pub fn missing_import(&self) {
        bump(&self.missing);
    }

    /// Count a failure that was caught at a file or object boundary.
    pub fn record_error(&self, error: &Error) {
        match error.kind() {
            ErrorKind::StructuralCorruption => bump(&self.corrupt),
            ErrorKind::MissingResource => bump(&self.missing),
            ErrorKind::UnsupportedDialect | ErrorKind::ConfigurationError | ErrorKind::Io => {
                bump(&self.skipped)
            }
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            packages: self.packages.get(),
            objects: self.objects.get(),
            warnings: self.warnings.get(),
            skipped: self.skipped.get(),
            missing: self.missing.get(),
            corrupt: self.corrupt.get(),
            unknown_classes: self.unknown_classes.borrow().iter().cloned().collect(),
            missing_packages: self.missing_packages.borrow().iter().cloned().collect(),
        }
    }
}

/// Snapshot of [`RunStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub packages: usize,
    pub objects: usize,
    pub warnings: usize,
    pub skipped: usize,
    pub missing: usize,
    pub corrupt: usize,
    pub unknown_classes: Vec<String>,
    pub missing_packages: Vec<String>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.warnings == 0 && self.skipped == 0 && self.missing == 0 && self.corrupt == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Packages loaded:  {}", self.packages)?;
        writeln!(f, "Objects loaded:   {}", self.objects)?;
        writeln!(f, "Warnings:         {}", self.warnings)?;
        writeln!(f, "Skipped:          {}", self.skipped)?;
        writeln!(f, "Missing:          {}", self.missing)?;
        write!(f, "Corrupt:          {}", self.corrupt)?;
        if !self.unknown_classes.is_empty() {
            write!(f, "\nUnknown classes:  {}", self.unknown_classes.join(", "))?;
        }
        if !self.missing_packages.is_empty() {
            write!(f, "\nMissing packages: {}", self.missing_packages.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResultExt;

    #[test]
    fn test_counts_by_kind() {
        let stats = RunStats::new();
        stats.record_error(&Error::corrupt(10, "bad"));
        let wrapped: crate::Result<()> = Err(Error::NotFound("Engine".into()));
        stats.record_error(&wrapped.context("import 3").unwrap_err());
        stats.record_error(&Error::unsupported("compression", "xyz"));

        let summary = stats.summary();
        assert_eq!((summary.corrupt, summary.missing, summary.skipped), (1, 1, 1));
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_missing_package_reported_once() {
        let stats = RunStats::new();
        assert!(stats.missing_package("Engine"));
        assert!(!stats.missing_package("ENGINE"));
        stats.unknown_class("StaticMesh");
        stats.unknown_class("StaticMesh");

        let summary = stats.summary();
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.unknown_classes, vec!["StaticMesh"]);
        let text = summary.to_string();
        assert!(text.contains("Missing packages: engine"));
        assert!(text.contains("Unknown classes:  StaticMesh"));
    }

    #[test]
    fn test_empty_summary_is_clean() {
        assert!(RunStats::new().summary().is_clean());
    }
}
