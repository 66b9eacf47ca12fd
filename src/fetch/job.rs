//! Download job construction.

use std::path::PathBuf;

use itertools::Itertools;

use super::catalog::{Catalog, SampleSelection};

/// Upper bound for concurrent downloads.
pub const MAX_CONCURRENT: usize = 10;
/// Default number of concurrent downloads.
pub const DEFAULT_CONCURRENT: usize = 5;

/// The kind of sample resource a task fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// Variant calls (`.vcf`).
    Vcf,
    /// Alignment (`.bam`).
    Bam,
    /// Alignment index (`.bai`).
    BamIndex,
    /// One file of a named report.
    Report { report: String, file: String },
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Vcf => write!(f, "variants (VCF)"),
            ResourceKind::Bam => write!(f, "alignment (BAM)"),
            ResourceKind::BamIndex => write!(f, "alignment index (BAI)"),
            ResourceKind::Report { report, file } => write!(f, "{} report ({})", report, file),
        }
    }
}

/// One file to fetch; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// The analysis the sample belongs to.
    pub analysis: String,
    /// The sample identifier.
    pub sample: String,
    /// What is being fetched.
    pub kind: ResourceKind,
    /// Source URL.
    pub url: String,
    /// Destination path; unique within a job.
    pub dest: PathBuf,
}

impl DownloadTask {
    /// Human-readable description for progress messages.
    pub fn describe(&self) -> String {
        format!("{} {}", self.sample, self.kind)
    }
}

/// Global options of one batch.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Directory the files are written below.
    pub output_dir: PathBuf,
    /// Whether to create one sub-directory per sample.
    pub sample_dirs: bool,
    /// Number of tasks fetched concurrently.
    pub concurrency: usize,
}

/// Which resource kinds to fetch for every selected sample.
#[derive(Debug, Clone, Default)]
pub struct ResourceChoice {
    pub vcf: bool,
    pub bam: bool,
    /// Report names, referring to catalog entries.
    pub reports: Vec<String>,
}

/// The full batch of tasks submitted together.
///
/// Constructed once per run from the user selection and discarded after the
/// run completes.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub options: JobOptions,
    pub tasks: Vec<DownloadTask>,
}

impl DownloadJob {
    /// Expand catalog x selections x resource choice into the task list.
    ///
    /// Per sample the expansion order is reports, then VCF, then BAM with its
    /// index; report tasks are only generated when the report covers the
    /// sample's analysis. Tasks whose destination was already taken by an
    /// earlier task are dropped.
    pub fn build(
        catalog: &Catalog,
        selections: &[SampleSelection],
        choice: &ResourceChoice,
        options: JobOptions,
    ) -> Result<Self, anyhow::Error> {
        for name in &choice.reports {
            if !catalog.reports.contains_key(name) {
                anyhow::bail!(
                    "unknown report {:?}; catalog defines: {}",
                    name,
                    catalog.reports.keys().join(", ")
                );
            }
        }

        let mut tasks = Vec::new();
        for selection in selections {
            let dir = if options.sample_dirs {
                options.output_dir.join(&selection.sample)
            } else {
                options.output_dir.clone()
            };

            for name in &choice.reports {
                let report = &catalog.reports[name];
                if !report.covers(&selection.analysis) {
                    continue;
                }
                tracing::debug!(
                    "expanding {} ({}) for {}",
                    report.description,
                    report.software,
                    selection.sample
                );
                for file in &report.files {
                    tasks.push(DownloadTask {
                        analysis: selection.analysis.clone(),
                        sample: selection.sample.clone(),
                        kind: ResourceKind::Report {
                            report: name.clone(),
                            file: file.clone(),
                        },
                        url: report.url_for_file(&selection.run, &selection.sample, file),
                        dest: dir.join(format!("{}{}", selection.sample, file)),
                    });
                }
            }

            if choice.vcf {
                tasks.push(DownloadTask {
                    analysis: selection.analysis.clone(),
                    sample: selection.sample.clone(),
                    kind: ResourceKind::Vcf,
                    url: catalog.vcf_url_for(&selection.analysis, &selection.sample),
                    dest: dir.join(format!("{}.vcf", selection.sample)),
                });
            }

            if choice.bam {
                let bam_url = catalog.bam_url_for(&selection.analysis, &selection.sample);
                tasks.push(DownloadTask {
                    analysis: selection.analysis.clone(),
                    sample: selection.sample.clone(),
                    kind: ResourceKind::Bam,
                    url: bam_url.clone(),
                    dest: dir.join(format!("{}.bam", selection.sample)),
                });
                tasks.push(DownloadTask {
                    analysis: selection.analysis.clone(),
                    sample: selection.sample.clone(),
                    kind: ResourceKind::BamIndex,
                    url: bam_url.replace(".bam", ".bai"),
                    dest: dir.join(format!("{}.bai", selection.sample)),
                });
            }
        }

        let total = tasks.len();
        let tasks: Vec<_> = tasks.into_iter().unique_by(|t| t.dest.clone()).collect();
        if tasks.len() < total {
            tracing::debug!(
                "dropped {} task(s) with duplicate destinations",
                total - tasks.len()
            );
        }

        let concurrency = options.concurrency.clamp(1, MAX_CONCURRENT);
        Ok(Self {
            options: JobOptions {
                concurrency,
                ..options
            },
            tasks,
        })
    }
}
