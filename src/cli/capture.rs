//! `fieldsync capture`: push recorded chunk files through a capture session.
//!
//! Each file is one chunk in order; the last file is the terminal chunk.
//! An empty file counts as "no sound detected".

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::domain::RecordId;

use super::{open_engine, print_notice, Connectivity};

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Chunk files in capture order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Label for a new record
    #[arg(short, long)]
    pub label: Option<String>,

    /// Continue an existing record instead of creating one
    #[arg(long, conflicts_with = "label")]
    pub addendum: Option<String>,

    /// Store chunks locally without contacting the remote
    #[arg(long)]
    pub offline: bool,
}

/// Split the file list into body chunks and the terminal chunk
fn split_chunk_files(files: &[PathBuf]) -> Result<(&Path, &[PathBuf])> {
    let Some((last, rest)) = files.split_last() else {
        anyhow::bail!("No chunk files given");
    };

    for path in files {
        if !path.is_file() {
            anyhow::bail!("Chunk file not found: {}", path.display());
        }
    }

    Ok((last.as_path(), rest))
}

pub async fn run(args: CaptureArgs) -> Result<()> {
    let (last, rest) = split_chunk_files(&args.files)?;

    let connectivity = if args.offline {
        Connectivity::Offline
    } else {
        Connectivity::Probe
    };
    let (engine, _probe) = open_engine(connectivity).await?;
    let mut notices = engine.subscribe();

    let mut session = match &args.addendum {
        Some(parent) => {
            engine.refresh_view().await?;
            engine.start_addendum(&RecordId::new(parent.as_str())).await?
        }
        None => engine.start_capture(args.label.as_deref().unwrap_or("")).await?,
    };

    session.start().await?;
    println!(
        "Capturing {} into {} ({})",
        if session.is_addendum() { "addendum" } else { "record" },
        session.record_id(),
        if engine.is_online() { "online" } else { "offline" }
    );

    for path in rest {
        let payload = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let sound = !payload.is_empty();
        let index = session.push_chunk(payload, sound).await?;
        println!("  chunk {} <- {}", index, path.display());
    }

    let payload = tokio::fs::read(last)
        .await
        .with_context(|| format!("Failed to read {}", last.display()))?;
    let sound = !payload.is_empty();
    let report = session.stop(Some(payload), sound).await?;

    println!("Committed {} chunks", session.record().chunk_count);
    match report {
        Some(report) => {
            println!(
                "Uploaded {} chunk(s) in {} pass(es)",
                report.uploaded.len(),
                report.passes
            );
            if !report.deferred.is_empty() {
                println!("Stored {} chunk(s) for later sync", report.deferred.len());
            }
            if !report.failed.is_empty() {
                println!("{} chunk(s) failed and were kept locally", report.failed.len());
            }
        }
        None => println!("Offline: chunks stored locally until the next sync"),
    }

    while let Ok(notice) = notices.try_recv() {
        print_notice(&notice);
    }

    Ok(())
}
