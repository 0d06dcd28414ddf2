//! CLI entry point for the rswift tool.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rswift_core::{
    Options, OptionsPatch, OpResult, ResultData, ResultStream, SwiftPostObject, SwiftService,
    SwiftUploadObject,
};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut options = Options {
        retries: args.retries,
        object_threads: args.concurrency as usize,
        segment_threads: args.concurrency as usize,
        container_threads: args.concurrency as usize,
        ..Options::default()
    };
    if let Some(url) = &args.os_storage_url {
        options
            .os_options
            .insert("object_storage_url".to_string(), url.clone());
    }
    if let Some(token) = &args.os_auth_token {
        options
            .os_options
            .insert("auth_token".to_string(), token.clone());
    }

    let service = SwiftService::new(options)?;
    let quiet = args.quiet;

    let stream = match args.command {
        Command::List {
            container,
            prefix,
            long,
        } => service.list(
            container,
            Some(&OptionsPatch {
                prefix,
                long: Some(long),
                ..OptionsPatch::default()
            }),
        )?,
        Command::Stat { container, objects } => service.stat(container, objects, None)?,
        Command::Download {
            container,
            objects,
            output,
            output_dir,
            prefix,
            remove_prefix,
            skip_identical,
        } => service.download(
            container,
            if objects.is_empty() {
                None
            } else {
                Some(objects)
            },
            Some(&OptionsPatch {
                out_file: output,
                out_directory: output_dir,
                prefix,
                remove_prefix: Some(remove_prefix),
                skip_identical: Some(skip_identical),
                ..OptionsPatch::default()
            }),
        )?,
        Command::Upload {
            container,
            files,
            segment_size,
            use_slo,
            segment_container,
            leave_segments,
            skip_identical,
            changed,
            headers,
        } => {
            let objects = files
                .into_iter()
                .map(SwiftUploadObject::from_path)
                .collect::<Result<Vec<_>, _>>()?;
            service.upload(
                container,
                objects,
                Some(&OptionsPatch {
                    segment_size,
                    use_slo: Some(use_slo),
                    segment_container,
                    leave_segments: Some(leave_segments),
                    skip_identical: Some(skip_identical),
                    changed: Some(changed),
                    header: Some(headers),
                    ..OptionsPatch::default()
                }),
            )?
        }
        Command::Delete {
            container,
            objects,
            leave_segments,
        } => service.delete(
            container,
            objects,
            Some(&OptionsPatch {
                leave_segments: Some(leave_segments),
                ..OptionsPatch::default()
            }),
        )?,
        Command::Post {
            container,
            objects,
            meta,
            headers,
        } => {
            let objects = objects
                .into_iter()
                .map(SwiftPostObject::new)
                .collect::<Result<Vec<_>, _>>()?;
            service.post(
                container,
                objects,
                Some(&OptionsPatch {
                    meta: Some(meta),
                    header: Some(headers),
                    ..OptionsPatch::default()
                }),
            )?
        }
        Command::Copy {
            container,
            objects,
            destination,
            fresh_metadata,
        } => service.copy(
            container,
            objects,
            Some(&OptionsPatch {
                destination,
                fresh_metadata: Some(fresh_metadata),
                ..OptionsPatch::default()
            }),
        )?,
    };

    let failures = drive(stream, quiet).await;
    if failures > 0 {
        info!(failures, "finished with failures");
        std::process::exit(1);
    }
    Ok(())
}

/// Consumes the result stream, rendering each record; returns the failure
/// count.
async fn drive(mut stream: ResultStream, quiet: bool) -> usize {
    let spinner = if quiet {
        None
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        Some(spinner)
    };

    let mut done = 0usize;
    let mut failures = 0usize;
    while let Some(result) = stream.next().await {
        done += 1;
        if !result.success {
            failures += 1;
        }
        let line = render(&result);
        match &spinner {
            Some(spinner) => {
                if result.success {
                    spinner.println(line);
                } else {
                    spinner.println(format!("error: {line}"));
                }
                spinner.set_message(format!("{done} done, {failures} failed"));
            }
            None => {
                if !result.success {
                    eprintln!("error: {line}");
                } else if !quiet {
                    println!("{line}");
                }
            }
        }
    }
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    failures
}

/// One human-readable line per result.
fn render(result: &OpResult) -> String {
    let suffix = result
        .error
        .as_ref()
        .map(|e| format!(" [{}]", e.message))
        .unwrap_or_default();
    let body = match &result.data {
        ResultData::ListAccountPart { listing, .. }
        | ResultData::ListContainerPart { listing, .. } => listing
            .iter()
            .map(|e| {
                if e.name.is_empty() {
                    e.subdir.clone().unwrap_or_default()
                } else {
                    e.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ResultData::DeleteObject {
            container, object, ..
        }
        | ResultData::DeleteSegment { container, object } => {
            format!("{}: {container}/{object}", result.action)
        }
        ResultData::DeleteContainer { container, .. }
        | ResultData::CreateContainer { container } => {
            format!("{}: {container}", result.action)
        }
        ResultData::UploadObject {
            container,
            object,
            status,
            ..
        } => format!("{}: {container}/{object} ({status})", result.action),
        ResultData::UploadSegment { log_line, .. } => {
            format!("{}: {log_line}", result.action)
        }
        ResultData::DownloadObject {
            container,
            object,
            path,
            read_length,
            ..
        } => format!(
            "{}: {container}/{object} -> {} ({} bytes)",
            result.action,
            path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            read_length.unwrap_or(0)
        ),
        ResultData::StatAccount { headers }
        | ResultData::StatContainer { headers, .. }
        | ResultData::StatObject { headers, .. } => {
            let mut lines: Vec<String> =
                headers.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            lines.sort();
            lines.join("\n")
        }
        ResultData::PostAccount { .. } => format!("{}", result.action),
        ResultData::PostContainer { container, .. } => {
            format!("{}: {container}", result.action)
        }
        ResultData::PostObject {
            container, object, ..
        } => format!("{}: {container}/{object}", result.action),
        ResultData::CopyObject {
            container,
            object,
            destination,
            ..
        } => format!(
            "{}: {container}/{object} -> {}",
            result.action,
            destination.clone().unwrap_or_default()
        ),
    };
    format!("{body}{suffix}")
}
