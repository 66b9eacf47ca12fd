//! Resource catalog and sample selection input files.

use std::io::BufReader;
use std::path::Path;

use indexmap::IndexMap;

/// Default run label when the sample-to-run resolution yielded nothing.
const UNKNOWN_RUN: &str = "unknown_run";

/// URL patterns and report definitions, exported from the Highlander server
/// configuration.
///
/// Patterns use `{analysis}`, `{sample}`, `{run}` and `{file}` placeholders.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Catalog {
    /// URL pattern for variant files (`{analysis}`, `{sample}`).
    pub vcf_url: String,
    /// URL pattern for alignment files (`{analysis}`, `{sample}`).
    pub bam_url: String,
    /// Report definitions, keyed by report name, in server order.
    #[serde(default)]
    pub reports: IndexMap<String, ReportDef>,
}

/// One report kind generated alongside the analyses on the server, e.g. a
/// FastQC archive.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReportDef {
    /// Human readable description, e.g. "Quality control".
    pub description: String,
    /// The software that produced the report, e.g. "FastQC".
    pub software: String,
    /// Analyses for which this report exists on the server.
    #[serde(default)]
    pub analyses: Vec<String>,
    /// File name suffixes, appended to the sample name.
    pub files: Vec<String>,
    /// URL pattern for report files (`{run}`, `{sample}`, `{file}`).
    pub file_url: String,
}

/// One selected sample within an analysis.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SampleSelection {
    /// The analysis (entity) the sample belongs to.
    pub analysis: String,
    /// The sample identifier.
    pub sample: String,
    /// Run label containing the sample, as resolved against the database.
    #[serde(default = "default_run_label")]
    pub run: String,
}

fn default_run_label() -> String {
    UNKNOWN_RUN.to_string()
}

impl Catalog {
    /// Load a catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("could not open catalog {:?}: {}", path, e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("could not parse catalog {:?}: {}", path, e))
    }

    /// Build the variant file URL for one sample.
    pub fn vcf_url_for(&self, analysis: &str, sample: &str) -> String {
        expand(&self.vcf_url, &[("analysis", analysis), ("sample", sample)])
    }

    /// Build the alignment file URL for one sample.
    pub fn bam_url_for(&self, analysis: &str, sample: &str) -> String {
        expand(&self.bam_url, &[("analysis", analysis), ("sample", sample)])
    }
}

impl ReportDef {
    /// Whether this report is generated for samples of `analysis`.
    pub fn covers(&self, analysis: &str) -> bool {
        self.analyses.iter().any(|a| a == analysis)
    }

    /// Build the URL of one report file for one sample.
    pub fn url_for_file(&self, run: &str, sample: &str, file: &str) -> String {
        expand(
            &self.file_url,
            &[("run", run), ("sample", sample), ("file", file)],
        )
    }
}

/// Load the sample selection list from a JSON file.
pub fn load_selections(path: impl AsRef<Path>) -> Result<Vec<SampleSelection>, anyhow::Error> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("could not open samples file {:?}: {}", path, e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| anyhow::anyhow!("could not parse samples file {:?}: {}", path, e))
}

/// Replace `{name}` placeholders in `pattern` by the given values.
fn expand(pattern: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(pattern.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}
