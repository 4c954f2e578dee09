//! Prompt rendering for the generation, correction and documentation requests.

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::{Environment, Value, context};
use serde::Serialize;
use tracing::{debug, error};

use crate::core::types::{Fault, SignatureMap};

const GENERATION_TEMPLATE: &str = include_str!("prompts/generation.md");
const CORRECTION_TEMPLATE: &str = include_str!("prompts/correction.md");
const DOCUMENTATION_TEMPLATE: &str = include_str!("prompts/documentation.md");

/// Business rules every generated pipeline must apply, in order.
pub const TRANSFORMATION_RULES: &[&str] = &[
    "Load all historical hospital cost report data and any summary or trend data. Do not restrict the data to a fixed range of years; process every year present.",
    "Geographic filter: keep only hospitals in AR, LA, NM, OK and TX.",
    "Identifier standardization: in every loaded dataframe, cast the CCN (or Provider CCN) column to string and left-pad it with zeros to exactly 6 digits (`df['CCN'] = df['CCN'].astype(str).str.zfill(6)`).",
    "Provider type filter: after padding, keep only Critical Access Hospitals, whose 3rd and 4th CCN digits are '13'.",
    "Pre-join deduplication: before any join, drop duplicate rows from the secondary tables (trends, solvency and similar) on the CCN column so the merge cannot multiply rows.",
    "Merge: left-join the deduplicated secondary tables onto the historical base table using the 6-digit CCN and/or the year as keys.",
    "Drop every column that is 100% missing in the merged dataset.",
    "Write the merged dataframe as CSV to the output file. This step is mandatory.",
];

/// A section of the lineage report outline.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportSection {
    pub title: &'static str,
    pub guidance: &'static str,
}

/// Fixed outline of the lineage report.
pub const REPORT_SECTIONS: &[ReportSection] = &[
    ReportSection {
        title: "Executive Summary",
        guidance: "Overview of the final dataset and its role as the single source of truth for exploratory analysis.",
    },
    ReportSection {
        title: "Source Data Inventory",
        guidance: "The kinds of files loaded by the pipeline.",
    },
    ReportSection {
        title: "Data Scoping & Filtering",
        guidance: "The geographic restriction and how Critical Access Hospitals were isolated from the CCN.",
    },
    ReportSection {
        title: "Data Cleaning & Identifier Standardization",
        guidance: "CCN string casting and zero-padding, why it is required, and how fully empty columns were dropped.",
    },
    ReportSection {
        title: "Data Joining Strategy & Entity Relationship Mapping",
        guidance: "Base table grain and composite key, join types, join keys and cardinalities, and pre-join deduplication.",
    },
    ReportSection {
        title: "Quality Assurance Summary",
        guidance: "How the pipeline preserves a one-to-one row mapping with the base data and avoids row inflation.",
    },
];

/// Renders every prompt the agent sends.
///
/// Rendering is deterministic and never fails; an empty signature map still
/// produces a usable generation prompt.
pub struct PromptBuilder {
    env: Environment<'static>,
    data_dir: String,
    dataset_file: String,
    bindings: BTreeMap<String, String>,
}

impl PromptBuilder {
    pub fn new(data_dir: &Path, dataset_file: &str) -> Self {
        let mut env = Environment::new();
        env.add_template("generation", GENERATION_TEMPLATE)
            .expect("generation template should be valid");
        env.add_template("correction", CORRECTION_TEMPLATE)
            .expect("correction template should be valid");
        env.add_template("documentation", DOCUMENTATION_TEMPLATE)
            .expect("documentation template should be valid");
        Self {
            env,
            data_dir: data_dir.display().to_string(),
            dataset_file: dataset_file.to_string(),
            bindings: BTreeMap::new(),
        }
    }

    /// Mention pre-bound modules (alias -> module) in the generation prompt.
    pub fn with_bindings(mut self, bindings: BTreeMap<String, String>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn generation(&self, signatures: &SignatureMap) -> String {
        let rendered_signatures = if signatures.is_empty() {
            None
        } else {
            serde_json::to_string_pretty(signatures).ok()
        };
        self.render(
            "generation",
            context! {
                data_dir => &self.data_dir,
                dataset_file => &self.dataset_file,
                signatures => rendered_signatures,
                rules => TRANSFORMATION_RULES,
                bindings => &self.bindings,
            },
        )
    }

    /// Ask for a complete replacement of `prior_code` that avoids `fault`.
    pub fn correction(&self, prior_code: &str, fault: &Fault) -> String {
        let offending = fault
            .line
            .and_then(|line| prior_code.lines().nth(line.checked_sub(1)? as usize))
            .map(str::trim)
            .filter(|line| !line.is_empty());
        self.render(
            "correction",
            context! {
                fault => fault.to_string(),
                line => fault.line,
                offending => offending,
                code => prior_code,
            },
        )
    }

    pub fn documentation(&self, final_code: &str) -> String {
        self.render(
            "documentation",
            context! {
                code => final_code,
                dataset_file => &self.dataset_file,
                sections => REPORT_SECTIONS,
            },
        )
    }

    fn render(&self, name: &str, ctx: Value) -> String {
        let rendered = self
            .env
            .get_template(name)
            .and_then(|template| template.render(&ctx));
        match rendered {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(template = name, bytes = text.len(), "rendered prompt");
                text
            }
            Err(err) => {
                // Templates are compiled in; fall back to the raw context rather than abort the run.
                error!(template = name, err = %err, "prompt rendering failed");
                format!("{name}\n\n{ctx}")
            }
        }
    }
}
