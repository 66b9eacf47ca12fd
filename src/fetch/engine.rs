//! Bounded-concurrency batch execution of download tasks.

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::job::{DownloadJob, DownloadTask};
use super::progress::{ErrorLog, ProgressSink, TaskState};

/// Error of a single fetch; caught at the task boundary and recorded in the
/// `ErrorLog`, never propagated to the batch caller.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, timeout, DNS failure, or non-success HTTP status.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Directory creation or file write failure.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
}

/// Run all tasks of `job`, at most `job.options.concurrency` at a time.
///
/// Task failures are isolated: the batch always runs to completion and the
/// accumulated `ErrorLog` is returned once every task has reached a terminal
/// state. No retries; a zero-task job returns immediately without touching
/// the filesystem.
pub async fn run(client: &reqwest::Client, job: &DownloadJob, sinks: &[ProgressSink]) -> ErrorLog {
    debug_assert_eq!(job.tasks.len(), sinks.len());

    let errors = ErrorLog::default();
    futures::stream::iter(job.tasks.iter().zip(sinks.iter()))
        .for_each_concurrent(job.options.concurrency.max(1), |(task, sink)| {
            let errors = &errors;
            async move {
                sink.advance(
                    TaskState::Running,
                    Some(format!("Downloading {}", task.describe())),
                );
                match fetch_task(client, task).await {
                    Ok(bytes) => {
                        tracing::debug!(
                            "fetched {}/{} -> {:?} ({} bytes)",
                            task.analysis,
                            task.sample,
                            &task.dest,
                            bytes
                        );
                        sink.advance(TaskState::Done, Some(format!("{} downloaded", task.sample)));
                    }
                    Err(e) => {
                        tracing::warn!("fetch failed: {} [{}]", task.dest.display(), e);
                        errors.append(task.dest.display().to_string(), e.to_string());
                        sink.advance(TaskState::Failed, Some(e.to_string()));
                    }
                }
            }
        })
        .await;
    debug_assert!(sinks.iter().all(|sink| sink.state().is_terminal()));
    errors
}

/// Fetch one task: ensure the destination directory exists, then stream the
/// response body into the destination file.
///
/// Directory creation is create-if-absent; concurrent creation by tasks
/// sharing a parent directory is not an error. An interrupted fetch leaves a
/// possibly truncated file in place.
async fn fetch_task(client: &reqwest::Client, task: &DownloadTask) -> Result<u64, FetchError> {
    if let Some(parent) = task.dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client.get(&task.url).send().await?.error_for_status()?;

    let mut file = tokio::fs::File::create(&task.dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::fetch::job::{JobOptions, ResourceKind};
    use crate::fetch::progress::TaskState;

    fn task(server_uri: &str, route: &str, sample: &str, dest: PathBuf) -> DownloadTask {
        DownloadTask {
            analysis: "exomes_hg38".into(),
            sample: sample.into(),
            kind: ResourceKind::Vcf,
            url: format!("{}{}", server_uri, route),
            dest,
        }
    }

    fn job_of(tasks: Vec<DownloadTask>, output_dir: &Path, concurrency: usize) -> DownloadJob {
        DownloadJob {
            options: JobOptions {
                output_dir: output_dir.to_path_buf(),
                sample_dirs: false,
                concurrency,
            },
            tasks,
        }
    }

    fn sinks_of(job: &DownloadJob) -> Vec<ProgressSink> {
        job.tasks.iter().map(|_| ProgressSink::new()).collect()
    }

    async fn mount_body(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn all_tasks_fetched_once() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let server = MockServer::start().await;
        let mut tasks = Vec::new();
        for i in 0..5 {
            let route = format!("/S{:03}.vcf", i);
            mount_body(&server, &route, "##fileformat=VCFv4.2\n").await;
            tasks.push(task(
                &server.uri(),
                &route,
                &format!("S{:03}", i),
                tmp_dir.path().join(format!("S{:03}.vcf", i)),
            ));
        }
        let job = job_of(tasks, tmp_dir.path(), 2);
        let sinks = sinks_of(&job);

        let client = reqwest::Client::new();
        let errors = run(&client, &job, &sinks).await;

        assert!(errors.is_empty());
        for sink in &sinks {
            assert_eq!(sink.state(), TaskState::Done);
        }
        let requests = server.received_requests().await.expect("recording enabled");
        assert_eq!(requests.len(), 5);
        for i in 0..5 {
            let content =
                std::fs::read_to_string(tmp_dir.path().join(format!("S{:03}.vcf", i)))?;
            assert_eq!(content, "##fileformat=VCFv4.2\n");
        }

        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failures_are_isolated_per_task() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let server = MockServer::start().await;
        mount_body(&server, "/S001.vcf", "vcf-data").await;
        Mock::given(method("GET"))
            .and(path("/S003_fastqc.zip"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        // No mock for /S002.bam -> 404.

        let tasks = vec![
            task(
                &server.uri(),
                "/S001.vcf",
                "S001",
                tmp_dir.path().join("S001.vcf"),
            ),
            task(
                &server.uri(),
                "/S002.bam",
                "S002",
                tmp_dir.path().join("S002.bam"),
            ),
            task(
                &server.uri(),
                "/S003_fastqc.zip",
                "S003",
                tmp_dir.path().join("S003_fastqc.zip"),
            ),
        ];
        let job = job_of(tasks, tmp_dir.path(), 2);
        let sinks = sinks_of(&job);

        let client = reqwest::Client::new();
        let errors = run(&client, &job, &sinks).await;

        assert_eq!(errors.len(), 2);
        let failed_tasks: Vec<_> = errors.entries().iter().map(|e| e.task.clone()).collect();
        assert!(failed_tasks
            .iter()
            .any(|t| t.ends_with("S002.bam")));
        assert!(failed_tasks
            .iter()
            .any(|t| t.ends_with("S003_fastqc.zip")));
        for entry in errors.entries() {
            assert!(entry.message.starts_with("network error"));
        }

        assert_eq!(sinks[0].state(), TaskState::Done);
        assert_eq!(sinks[1].state(), TaskState::Failed);
        assert_eq!(sinks[2].state(), TaskState::Failed);

        assert_eq!(
            std::fs::read_to_string(tmp_dir.path().join("S001.vcf"))?,
            "vcf-data"
        );
        assert!(!tmp_dir.path().join("S002.bam").exists());
        assert!(logs_contain("fetch failed"));

        Ok(())
    }

    #[tokio::test]
    async fn timeout_is_a_network_error() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/S001.bam"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("bam-data")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let tasks = vec![task(
            &server.uri(),
            "/S001.bam",
            "S001",
            tmp_dir.path().join("S001.bam"),
        )];
        let job = job_of(tasks, tmp_dir.path(), 1);
        let sinks = sinks_of(&job);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()?;
        let errors = run(&client, &job, &sinks).await;

        assert_eq!(errors.len(), 1);
        assert!(errors.entries()[0].message.starts_with("network error"));
        assert_eq!(sinks[0].state(), TaskState::Failed);

        Ok(())
    }

    #[tokio::test]
    async fn empty_job_returns_immediately() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let output_dir = tmp_dir.path().join("never-created");
        let job = job_of(vec![], &output_dir, 5);
        let sinks = sinks_of(&job);

        let client = reqwest::Client::new();
        let errors = run(&client, &job, &sinks).await;

        assert!(errors.is_empty());
        assert!(!output_dir.exists());

        Ok(())
    }

    #[tokio::test]
    async fn concurrent_directory_creation_is_safe() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let shared = tmp_dir.path().join("shared").join("run42");
        let server = MockServer::start().await;

        for round in 0..2 {
            let mut tasks = Vec::new();
            for i in 0..8 {
                let route = format!("/r{}/S{:03}.vcf", round, i);
                mount_body(&server, &route, "vcf-data").await;
                tasks.push(task(
                    &server.uri(),
                    &route,
                    &format!("S{:03}", i),
                    shared.join(format!("S{:03}.vcf", i)),
                ));
            }
            let job = job_of(tasks, tmp_dir.path(), 10);
            let sinks = sinks_of(&job);

            let client = reqwest::Client::new();
            let errors = run(&client, &job, &sinks).await;

            assert!(errors.is_empty(), "round {}: {:?}", round, errors.entries());
            for sink in &sinks {
                assert_eq!(sink.state(), TaskState::Done);
            }
        }

        Ok(())
    }

    #[tokio::test]
    async fn rerun_overwrites_by_path_with_fresh_error_log() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let server = MockServer::start().await;
        mount_body(&server, "/S001.vcf", "alpha").await;
        // /S002.vcf not mounted -> first run fails for it.

        let tasks = vec![
            task(
                &server.uri(),
                "/S001.vcf",
                "S001",
                tmp_dir.path().join("S001.vcf"),
            ),
            task(
                &server.uri(),
                "/S002.vcf",
                "S002",
                tmp_dir.path().join("S002.vcf"),
            ),
        ];
        let job = job_of(tasks, tmp_dir.path(), 2);
        let client = reqwest::Client::new();

        let sinks = sinks_of(&job);
        let errors = run(&client, &job, &sinks).await;
        assert_eq!(errors.len(), 1);

        // The server recovers; an identical job succeeds for both tasks.
        server.reset().await;
        mount_body(&server, "/S001.vcf", "alpha").await;
        mount_body(&server, "/S002.vcf", "beta").await;

        let sinks = sinks_of(&job);
        let errors = run(&client, &job, &sinks).await;
        assert!(errors.is_empty());
        assert_eq!(
            std::fs::read_to_string(tmp_dir.path().join("S001.vcf"))?,
            "alpha"
        );
        assert_eq!(
            std::fs::read_to_string(tmp_dir.path().join("S002.vcf"))?,
            "beta"
        );

        Ok(())
    }
}
