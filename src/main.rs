use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pdf_forge::config::job::{Job, JobFile};
use pdf_forge::config::merged::MergedConfig;
use pdf_forge::config::settings::Settings;
use pdf_forge::config::{self};
use pdf_forge::error::PdfForgeError;
use pdf_forge::pipeline::batch::{BatchOptions, BatchOutput, InputFile, Operation, run_batch_with};

const PERMISSIONS_NOTE: &str = "NOTE: permission flags are advisory; anyone with the user password can decrypt the file";

/// `--json` で標準出力に書くジョブ 1 件の結果
#[derive(Debug, Serialize)]
struct JobSummary {
    job_file: String,
    operation: Option<&'static str>,
    inputs: Vec<String>,
    output: String,
    ok: bool,
    /// 出力の MIME タイプ
    content_type: Option<&'static str>,
    bytes: Option<usize>,
    error_kind: Option<&'static str>,
    error: Option<String>,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: pdf_forge [--json] <jobs.yaml>...");
        eprintln!("  Merge, split, compress, protect, watermark and convert PDF files");
        eprintln!("  according to job specifications.");
        eprintln!("  --json  print a machine-readable summary to stdout");
        return if args.is_empty() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        eprintln!("pdf_forge {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let json = args.iter().any(|a| a == "--json");
    let job_files: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    if job_files.is_empty() {
        eprintln!("ERROR: no job files given");
        return ExitCode::FAILURE;
    }

    let mut summaries: Vec<JobSummary> = Vec::new();

    for job_file_arg in job_files {
        let job_file_path = Path::new(job_file_arg);

        let loaded = load_job_file(job_file_path);
        let (settings, job_file) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("ERROR: {job_file_arg}: {e}");
                summaries.push(JobSummary {
                    job_file: job_file_arg.clone(),
                    operation: None,
                    inputs: Vec::new(),
                    output: String::new(),
                    ok: false,
                    content_type: None,
                    bytes: None,
                    error_kind: Some(e.kind()),
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        // Resolve job file directory for relative paths.
        let job_dir = job_file_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        for job in &job_file.jobs {
            let output_path = resolve_path(&job_dir, &job.output);
            let mut summary = JobSummary {
                job_file: job_file_arg.clone(),
                operation: None,
                inputs: job.inputs.iter().map(|i| i.path().to_string()).collect(),
                output: output_path.display().to_string(),
                ok: false,
                content_type: None,
                bytes: None,
                error_kind: None,
                error: None,
            };

            match run_job(&settings, job, &job_dir, &output_path) {
                Ok((operation, output)) => {
                    eprintln!(
                        "OK: {} -> {} ({}, {} bytes)",
                        summary.inputs.join(", "),
                        output_path.display(),
                        operation.name(),
                        output.bytes().len()
                    );
                    if matches!(operation, Operation::Protect(_)) {
                        eprintln!("{PERMISSIONS_NOTE}");
                    }
                    summary.operation = Some(operation.name());
                    summary.ok = true;
                    summary.content_type = Some(output.content_type());
                    summary.bytes = Some(output.bytes().len());
                }
                Err(e) => {
                    eprintln!(
                        "ERROR: {} -> {}: {e}",
                        summary.inputs.join(", "),
                        output_path.display()
                    );
                    summary.error_kind = Some(e.kind());
                    summary.error = Some(e.to_string());
                }
            }
            summaries.push(summary);
        }
    }

    if json {
        match serde_json::to_string_pretty(&summaries) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("ERROR: Failed to render JSON summary: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if summaries.iter().all(|s| s.ok) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// settings.yaml とジョブファイルを読む。
fn load_job_file(job_file_path: &Path) -> pdf_forge::error::Result<(Settings, JobFile)> {
    // Load settings from the same directory as the job file.
    let settings = config::load_settings_for_job(job_file_path)
        .map_err(|e| e.context("Failed to load settings"))?;

    let yaml_content = std::fs::read_to_string(job_file_path)
        .map_err(|e| PdfForgeError::from(e).context("Failed to read job file"))?;

    let job_file: JobFile = serde_yml::from_str(&yaml_content)
        .map_err(|e| PdfForgeError::from(e).context("Failed to parse job file"))?;
    Ok((settings, job_file))
}

/// 1 ジョブを検証・実行し、出力を書き出す。
fn run_job(
    settings: &Settings,
    job: &Job,
    job_dir: &Path,
    output_path: &Path,
) -> pdf_forge::error::Result<(Operation, BatchOutput)> {
    let merged = MergedConfig::new(settings, job)?;

    let inputs = job
        .inputs
        .iter()
        .map(|spec| {
            let path = resolve_path(job_dir, spec.path());
            let bytes = std::fs::read(&path)
                .map_err(|e| PdfForgeError::from(e).context(&path.display().to_string()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| spec.path().to_string());
            Ok(InputFile {
                name,
                bytes,
                password: spec.password().map(str::to_string),
                pages: spec.pages().map(<[u32]>::to_vec),
            })
        })
        .collect::<pdf_forge::error::Result<Vec<_>>>()?;

    let output = run_batch_with(
        &merged.operation,
        &inputs,
        &BatchOptions {
            parallel_workers: merged.parallel_workers,
        },
    )?;

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, output.bytes())?;
    Ok((merged.operation, output))
}

/// Resolve a potentially relative path against a base directory.
/// If the path is already absolute, return it as-is.
fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
