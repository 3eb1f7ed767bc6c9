//! Human-readable overview tables built from the latest readings.

use crate::devices::DeviceRegistry;
use crate::error::Result;
use crate::snapshot::Snapshot;
use chrono::{DateTime, Local};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const OVERVIEW_FILE: &str = "overview.yaml";

/// Optional page template next to `overview.yaml`; the built-in page is used without it.
pub const TEMPLATE_FILE: &str = "overview.html";

const DEFAULT_TEMPLATE: &str = include_str!("overview.html");

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Overview {
    #[serde(default)]
    pub tables: Vec<TableSpec>,
    #[serde(skip)]
    template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    pub title: String,
    #[serde(default)]
    pub metrics: Vec<ColumnSpec>,
    /// Leading columns taken from the device: "room" or "name"
    #[serde(default)]
    pub group: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub header: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Overview {
    pub fn load(setup: &Path) -> Result<Self> {
        let path = setup.join(OVERVIEW_FILE);
        let overview = if path.exists() {
            info!(file = %path.display(), "loading overview file");
            let raw = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&raw)?
        } else {
            warn!(file = %path.display(), "no overview file, overview page will be empty");
            Self::default()
        };

        let page = setup.join(TEMPLATE_FILE);
        if !page.exists() {
            info!(file = %page.display(), "no overview template, using the built-in page");
            return Ok(overview);
        }

        info!(file = %page.display(), "loading overview template");
        overview.with_template(std::fs::read_to_string(&page)?)
    }

    /// Use `source` as the page template. Syntax errors are reported here, not per request.
    pub fn with_template(mut self, source: String) -> Result<Self> {
        Environment::new().add_template(TEMPLATE_FILE, &source)?;
        self.template = Some(source);
        Ok(self)
    }

    /// Render the page. Values are HTML-escaped by the template engine.
    pub fn render_html(&self, tables: &[Table], generated: DateTime<Local>) -> Result<String> {
        let source = self.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let mut env = Environment::new();
        env.add_template(TEMPLATE_FILE, source)?;

        let html = env.get_template(TEMPLATE_FILE)?.render(context! {
            tables => tables,
            generated => generated.format("%Y-%m-%d %H:%M:%S").to_string(),
        })?;
        Ok(html)
    }

    pub fn tables(
        &self,
        registry: &DeviceRegistry,
        snapshot: &Snapshot,
        details: bool,
    ) -> Vec<Table> {
        self.tables
            .iter()
            .map(|layout| {
                let mut table = build_table(layout, registry, snapshot, details);
                pad(&mut table);
                table
            })
            .collect()
    }
}

/// One row per device identity carrying at least one of the table's metrics.
pub fn build_table(
    layout: &TableSpec,
    registry: &DeviceRegistry,
    snapshot: &Snapshot,
    details: bool,
) -> Table {
    let mut headers = Vec::new();
    if details {
        headers.push("Device".to_string());
    }
    headers.extend(layout.group.iter().map(|g| g.header.clone()));
    headers.extend(layout.metrics.iter().map(|m| m.header.clone()));

    let mut rows = Vec::new();
    for (id, slots) in registry.groups() {
        let find = |metric: &str| {
            slots
                .iter()
                .filter_map(|slot| registry.get(*slot).map(|d| (*slot, d)))
                .find(|(_, d)| d.metric_name() == metric)
        };

        let first = layout.metrics.iter().find_map(|m| find(m.name.as_str()));
        let Some((_, first)) = first else {
            continue;
        };

        let mut row = Vec::with_capacity(headers.len());
        if details {
            row.push(id.to_string());
        }
        for group in &layout.group {
            let cell = match group.name.as_str() {
                "room" => first.room(),
                "name" => first.name(),
                _ => "",
            };
            row.push(cell.to_string());
        }
        for metric in &layout.metrics {
            let cell = match find(metric.name.as_str()) {
                Some((slot, _)) => snapshot.latest(slot).unwrap_or_default(),
                None => "-",
            };
            row.push(cell.to_string());
        }
        rows.push(row);
    }

    let start = usize::from(details);
    let stop = start + layout.group.len();
    rows.sort_by(|a, b| a[start..stop].cmp(&b[start..stop]));

    Table {
        title: layout.title.clone(),
        headers,
        rows,
    }
}

/// Left-align every cell to its column width.
fn pad(table: &mut Table) {
    let mut widths: Vec<usize> = table.headers.iter().map(|h| h.chars().count()).collect();
    for row in &table.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let fit = |cell: &mut String, width: usize| {
        *cell = format!("{:<width$}", cell, width = width);
    };
    for (cell, width) in table.headers.iter_mut().zip(&widths) {
        fit(cell, *width);
    }
    for row in &mut table.rows {
        for (cell, width) in row.iter_mut().zip(&widths) {
            fit(cell, *width);
        }
    }
}
