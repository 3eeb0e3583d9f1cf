//! Execution driver.
//!
//! The copier takes the final operation list and pushes each operation
//! through an executor: the real one prints a summary line and mutates the
//! filesystem, the printing one only prints (dry runs). Summary paths are
//! shown relative to the source/destination roots when possible.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::filesystem::Filesystem;
use crate::operations::Operation;
use crate::paths::{absolute, relative_to, to_posix_string};

pub trait PathFormatter {
    fn format(&self, path: &Path) -> String;
}

pub struct SimpleFormatter;

impl PathFormatter for SimpleFormatter {
    fn format(&self, path: &Path) -> String {
        to_posix_string(path)
    }
}

/// Shows paths relative to the first ancestor among the configured parents.
pub struct RelativeFormatter {
    parents: Vec<PathBuf>,
}

impl RelativeFormatter {
    pub fn new(parents: Vec<PathBuf>) -> Self {
        Self {
            parents: parents.iter().map(|p| absolute(p)).collect(),
        }
    }
}

impl PathFormatter for RelativeFormatter {
    fn format(&self, path: &Path) -> String {
        for parent in &self.parents {
            match relative_to(path, parent) {
                Some(rel) if !rel.as_os_str().is_empty() => return to_posix_string(&rel),
                _ => {}
            }
        }
        to_posix_string(path)
    }
}

pub trait OperationExecutor {
    fn execute(&self, operation: &Operation) -> Result<()>;
}

pub struct Executor<'a> {
    fs: &'a dyn Filesystem,
    formatter: Box<dyn PathFormatter>,
}

impl<'a> Executor<'a> {
    pub fn new(fs: &'a dyn Filesystem, formatter: Box<dyn PathFormatter>) -> Self {
        Self { fs, formatter }
    }
}

impl OperationExecutor for Executor<'_> {
    fn execute(&self, operation: &Operation) -> Result<()> {
        println!("{}", operation.describe(self.formatter.as_ref()));
        operation.execute(self.fs)
    }
}

/// Dry-run executor: announces what would happen, touches nothing.
pub struct PrintingExecutor {
    formatter: Box<dyn PathFormatter>,
}

impl PrintingExecutor {
    pub fn new(formatter: Box<dyn PathFormatter>) -> Self {
        Self { formatter }
    }
}

impl OperationExecutor for PrintingExecutor {
    fn execute(&self, operation: &Operation) -> Result<()> {
        println!("{}", operation.describe(self.formatter.as_ref()));
        Ok(())
    }
}

pub struct Copier<'a> {
    executor: &'a dyn OperationExecutor,
}

impl<'a> Copier<'a> {
    pub fn new(executor: &'a dyn OperationExecutor) -> Self {
        Self { executor }
    }

    pub fn run(&self, operations: &[Operation]) -> Result<()> {
        if operations.is_empty() {
            eprintln!("Nothing to do");
            return Ok(());
        }
        for operation in operations {
            self.executor.execute(operation)?;
        }
        Ok(())
    }
}
