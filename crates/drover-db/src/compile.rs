use std::borrow::Cow;

use drover_common::{Error, Result};

use crate::migration::{Direction, Migration, MigrationSource};

const ANNOTATION: &str = "-- +drover";

/// A migration body reduced to what the runner executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledMigration {
    pub statements: Vec<String>,
    /// Run the statements and the history write inside one transaction.
    pub use_tx: bool,
}

/// Turns a migration into executable statements for one direction.
pub trait MigrationCompiler: Send + Sync {
    fn compile(&self, migration: &Migration, direction: Direction) -> Result<CompiledMigration>;
}

/// Compiles annotated SQL, reading file sources from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCompiler;

impl MigrationCompiler for SqlCompiler {
    fn compile(&self, migration: &Migration, direction: Direction) -> Result<CompiledMigration> {
        let body: Cow<'_, str> = match &migration.source {
            MigrationSource::File(path) => {
                Cow::Owned(std::fs::read_to_string(path).map_err(|e| {
                    Error::Parse(format!(
                        "failed to open SQL migration file {}: {e}",
                        path.display()
                    ))
                })?)
            }
            MigrationSource::Embedded { body, .. } => Cow::Borrowed(body.as_str()),
        };
        parse_sql_migration(&body, direction).map_err(Error::Parse)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Split an annotated SQL body into the statements for `direction`.
///
/// Errors carry the offending line number; the runner attaches the
/// migration's version and name.
pub fn parse_sql_migration(
    body: &str,
    direction: Direction,
) -> std::result::Result<CompiledMigration, String> {
    let mut section = Section::Preamble;
    let mut in_block = false;
    let mut use_tx = true;
    let mut buf = String::new();
    let mut up = Vec::new();
    let mut down = Vec::new();

    for (idx, line) in body.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim();

        if let Some(command) = trimmed.strip_prefix(ANNOTATION) {
            match command.trim().to_ascii_uppercase().as_str() {
                "UP" => {
                    if section != Section::Preamble {
                        return Err(format!("line {lineno}: duplicate Up annotation"));
                    }
                    section = Section::Up;
                }
                "DOWN" => {
                    if section != Section::Up {
                        return Err(format!("line {lineno}: Down annotation must follow Up"));
                    }
                    if in_block || !buf.trim().is_empty() {
                        return Err(format!(
                            "line {lineno}: unfinished statement before Down annotation"
                        ));
                    }
                    section = Section::Down;
                }
                "STATEMENTBEGIN" => {
                    if section == Section::Preamble {
                        return Err(format!(
                            "line {lineno}: StatementBegin outside an Up or Down section"
                        ));
                    }
                    if in_block {
                        return Err(format!("line {lineno}: nested StatementBegin"));
                    }
                    if !buf.trim().is_empty() {
                        return Err(format!(
                            "line {lineno}: unfinished statement before StatementBegin"
                        ));
                    }
                    in_block = true;
                }
                "STATEMENTEND" => {
                    if !in_block {
                        return Err(format!(
                            "line {lineno}: StatementEnd without StatementBegin"
                        ));
                    }
                    in_block = false;
                    let target = if section == Section::Up { &mut up } else { &mut down };
                    flush(&mut buf, target);
                }
                "NO TRANSACTION" => use_tx = false,
                other => return Err(format!("line {lineno}: unknown annotation {other:?}")),
            }
            continue;
        }

        let is_comment = trimmed.starts_with("--");
        if section == Section::Preamble {
            if trimmed.is_empty() || is_comment {
                continue;
            }
            return Err(format!(
                "line {lineno}: SQL found before the {ANNOTATION} Up annotation"
            ));
        }

        if !in_block && buf.is_empty() && (trimmed.is_empty() || is_comment) {
            continue;
        }

        buf.push_str(line);
        buf.push('\n');

        if !in_block && !is_comment && trimmed.ends_with(';') {
            let target = if section == Section::Up { &mut up } else { &mut down };
            flush(&mut buf, target);
        }
    }

    if section == Section::Preamble {
        return Err(format!("missing {ANNOTATION} Up annotation"));
    }
    if in_block {
        return Err("StatementBegin without matching StatementEnd".to_string());
    }
    if !buf.trim().is_empty() {
        return Err(format!(
            "unfinished SQL statement (missing semicolon?): {}",
            one_line(&buf)
        ));
    }

    let statements = if direction.is_up() { up } else { down };
    Ok(CompiledMigration { statements, use_tx })
}

fn flush(buf: &mut String, target: &mut Vec<String>) {
    let statement = buf.trim();
    if !statement.is_empty() {
        target.push(statement.to_string());
    }
    buf.clear();
}

/// Collapse a statement onto one line for log output.
pub(crate) fn one_line(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}
