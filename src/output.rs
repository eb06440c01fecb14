use std::io::{self, Write};

use serde::Serialize;

use crate::frame::Frame;
use crate::pipeline::RunReport;
use crate::registry::DatasetRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput<'a> {
    pub succeeded: bool,
    pub runs: &'a [RunReport],
}

#[derive(Debug, Clone, Serialize)]
pub struct TableOutput<'a> {
    pub table: &'a str,
    pub rows: usize,
    pub records: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Writes command results to stdout as pretty JSON. Logs go to stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_runs(reports: &[RunReport]) -> io::Result<()> {
        Self::print_json(&RunOutput {
            succeeded: reports.iter().all(RunReport::succeeded),
            runs: reports,
        })
    }

    pub fn print_datasets(registry: &DatasetRegistry) -> io::Result<()> {
        Self::print_json(registry)
    }

    pub fn print_table(table: &str, frame: &Frame) -> io::Result<()> {
        Self::print_json(&table_output(table, frame))
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Row objects keyed by column name.
pub fn table_output<'a>(table: &'a str, frame: &Frame) -> TableOutput<'a> {
    let records = frame
        .rows()
        .iter()
        .map(|row| {
            frame
                .columns()
                .iter()
                .zip(row)
                .map(|(column, value)| {
                    (
                        column.clone(),
                        serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect()
        })
        .collect();
    TableOutput {
        table,
        rows: frame.len(),
        records,
    }
}
