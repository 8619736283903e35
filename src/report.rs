//! Tabular reports with selectable fields

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// A single reported value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Num(u64),
}

impl FieldValue {
    pub fn str(value: impl Into<String>) -> Self {
        FieldValue::Str(value.into())
    }

    fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Num(a), FieldValue::Num(b)) => a.cmp(b),
            (a, b) => a.to_string().cmp(&b.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{}", s),
            FieldValue::Num(n) => write!(f, "{}", n),
        }
    }
}

/// Definition of a report field over objects of type `T`
pub struct FieldType<T> {
    pub name: &'static str,
    pub heading: &'static str,
    pub description: &'static str,
    /// Minimum column width
    pub width: usize,
    pub accessor: fn(&T) -> Result<FieldValue>,
}

/// Output formatting options
#[derive(Debug, Clone)]
pub struct ReportOpts {
    pub headings: bool,
    pub separator: String,
    pub aligned: bool,
    /// Print each field as a row instead of a column
    pub columns_as_rows: bool,
    /// Print `PREFIXNAME="value"` pairs using this prefix
    pub field_name_prefix: Option<String>,
}

impl Default for ReportOpts {
    fn default() -> Self {
        ReportOpts {
            headings: true,
            separator: " ".to_string(),
            aligned: true,
            columns_as_rows: false,
            field_name_prefix: None,
        }
    }
}

/// Format the list of fields available in `table`
pub fn help<T>(table: &[FieldType<T>], title: &str) -> String {
    let width = table.iter().map(|f| f.name.len()).max().unwrap_or(0);
    let mut out = format!("{} Fields\n{}\n", title, "-".repeat(title.len() + 7));
    for field in table {
        out.push_str(&format!(
            "  {:<width$} - {}\n",
            field.name,
            field.description,
            width = width
        ));
    }
    out
}

struct SortKey {
    field: usize,
    descending: bool,
}

/// A report under construction
pub struct Report<'t, T> {
    table: &'t [FieldType<T>],
    columns: Vec<usize>,
    sort_keys: Vec<SortKey>,
    opts: ReportOpts,
    rows: Vec<(Vec<FieldValue>, Vec<FieldValue>)>,
}

fn find_field<T>(table: &[FieldType<T>], name: &str) -> Result<usize> {
    table.iter().position(|f| f.name == name).ok_or_else(|| {
        let names: Vec<&str> = table.iter().map(|f| f.name).collect();
        Error::InvalidIdentifier(format!(
            "Unknown field '{}'. Available fields: {}",
            name,
            names.join(", ")
        ))
    })
}

impl<'t, T> Report<'t, T> {
    /// Start a report of `output_fields` (comma separated) from `table`.
    ///
    /// Sort keys are comma separated field names; a leading `-` sorts that
    /// key in descending order.
    pub fn new(
        table: &'t [FieldType<T>],
        output_fields: &str,
        opts: ReportOpts,
        sort_keys: Option<&str>,
    ) -> Result<Self> {
        let columns = output_fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|name| find_field(table, name))
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(Error::InvalidIdentifier("No report fields given".to_string()));
        }

        let sort_keys = sort_keys
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|key| {
                let (name, descending) = match key.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (key.strip_prefix('+').unwrap_or(key), false),
                };
                find_field(table, name).map(|field| SortKey { field, descending })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Report with {} columns and {} sort keys",
            columns.len(),
            sort_keys.len()
        );
        Ok(Report {
            table,
            columns,
            sort_keys,
            opts,
            rows: Vec::new(),
        })
    }

    /// Add one object to the report
    pub fn report_object(&mut self, obj: &T) -> Result<()> {
        let values = self
            .columns
            .iter()
            .map(|&i| (self.table[i].accessor)(obj))
            .collect::<Result<Vec<_>>>()?;
        let keys = self
            .sort_keys
            .iter()
            .map(|k| (self.table[k.field].accessor)(obj))
            .collect::<Result<Vec<_>>>()?;
        self.rows.push((values, keys));
        Ok(())
    }

    fn sort_rows(&mut self) {
        let sort_keys = &self.sort_keys;
        self.rows.sort_by(|(_, a), (_, b)| {
            for (i, key) in sort_keys.iter().enumerate() {
                let ord = a[i].compare(&b[i]);
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    fn column_width(&self, col: usize) -> usize {
        let field = &self.table[self.columns[col]];
        let mut width = field.width.max(field.heading.len());
        for (values, _) in &self.rows {
            width = width.max(values[col].to_string().len());
        }
        width
    }

    fn join_cells(&self, cells: Vec<(String, usize, bool)>) -> String {
        let last = cells.len().saturating_sub(1);
        let parts: Vec<String> = cells
            .into_iter()
            .enumerate()
            .map(|(i, (text, width, right))| {
                if !self.opts.aligned {
                    text
                } else if right {
                    format!("{:>width$}", text, width = width)
                } else if i == last {
                    text
                } else {
                    format!("{:<width$}", text, width = width)
                }
            })
            .collect();
        parts.join(&self.opts.separator)
    }

    fn render_prefixed(&self, prefix: &str) -> String {
        let mut out = String::new();
        for (values, _) in &self.rows {
            let pairs: Vec<String> = self
                .columns
                .iter()
                .zip(values)
                .map(|(&i, value)| {
                    format!(
                        "{}{}=\"{}\"",
                        prefix,
                        self.table[i].name.to_ascii_uppercase(),
                        value
                    )
                })
                .collect();
            out.push_str(&pairs.join(&self.opts.separator));
            out.push('\n');
        }
        out
    }

    fn render_columns(&self) -> String {
        let widths: Vec<usize> = (0..self.columns.len()).map(|c| self.column_width(c)).collect();
        let mut out = String::new();
        if self.opts.headings {
            let cells = self
                .columns
                .iter()
                .zip(&widths)
                .map(|(&i, &w)| (self.table[i].heading.to_string(), w, false))
                .collect();
            out.push_str(&self.join_cells(cells));
            out.push('\n');
        }
        for (values, _) in &self.rows {
            let cells = values
                .iter()
                .zip(&widths)
                .map(|(v, &w)| (v.to_string(), w, matches!(v, FieldValue::Num(_))))
                .collect();
            out.push_str(&self.join_cells(cells));
            out.push('\n');
        }
        out
    }

    fn render_rows(&self) -> String {
        let heading_width = self
            .columns
            .iter()
            .map(|&i| self.table[i].heading.len())
            .max()
            .unwrap_or(0);
        let value_width = self
            .rows
            .iter()
            .flat_map(|(values, _)| values.iter().map(|v| v.to_string().len()))
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        for (col, &i) in self.columns.iter().enumerate() {
            let mut cells = Vec::new();
            if self.opts.headings {
                cells.push((self.table[i].heading.to_string(), heading_width, false));
            }
            for (values, _) in &self.rows {
                cells.push((values[col].to_string(), value_width, false));
            }
            out.push_str(&self.join_cells(cells));
            out.push('\n');
        }
        out
    }

    /// Sort and render the report
    pub fn output(mut self) -> String {
        self.sort_rows();
        match (&self.opts.field_name_prefix, self.opts.columns_as_rows) {
            (Some(prefix), _) => self.render_prefixed(prefix),
            (None, true) => self.render_rows(),
            (None, false) => self.render_columns(),
        }
    }
}
