//! Demo orchestrator: wires a sender and a print agent to one shared store
//! and one loopback network, then runs a job end to end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::mpsc;

use printlink_data_channel::LoopbackNetwork;
use printlink_peer_connection::PeerConnectionManager;
use printlink_print_job::{
    JobEvent, OutgoingFile, PerCopyPricing, PrintAgent, PrintClient, SpoolSurface,
};
use printlink_protocol::{ColorMode, JobStatus, PrintSpec, Sides};
use printlink_signaling::SignalingExchange;
use printlink_store::{DocumentStore, MemoryObjectStore, MemoryStore};
use printlink_transfer::format_file_size;

use crate::config::Config;

/// Files and print settings for the demo job.
#[derive(clap::Args, Debug, Clone)]
pub struct DemoArgs {
    /// File to print (repeatable).
    #[arg(long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// Copies of every file.
    #[arg(long, default_value_t = 1)]
    pub copies: u32,

    /// Print in color instead of black and white.
    #[arg(long)]
    pub color: bool,

    #[arg(long)]
    pub double_sided: bool,

    /// Page selection such as `1-3,5`. Empty prints everything.
    #[arg(long, default_value = "")]
    pub pages: String,
}

impl DemoArgs {
    fn specs(&self) -> PrintSpec {
        PrintSpec {
            copies: self.copies,
            pages: self.pages.clone(),
            color: if self.color {
                ColorMode::Color
            } else {
                ColorMode::BlackAndWhite
            },
            sides: if self.double_sided {
                Sides::Double
            } else {
                Sides::Single
            },
            ..PrintSpec::default()
        }
    }
}

/// Where the demo job ended up.
#[derive(Debug)]
pub struct DemoSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub cost: Option<f64>,
    pub outputs: Vec<PathBuf>,
}

/// Runs one job from submission to `awaitingPayment` (or `completed` with
/// auto-confirmed payment).
pub async fn run_demo(config: &Config, args: DemoArgs) -> anyhow::Result<DemoSummary> {
    let files = read_files(&args).await?;

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let network = LoopbackNetwork::new();
    let peer = || {
        PeerConnectionManager::new(
            SignalingExchange::new(Arc::clone(&store)),
            Arc::new(network.clone()),
            config.rtc.clone(),
        )
    };

    let mut agent = PrintAgent::builder(
        Arc::clone(&store),
        peer(),
        Arc::new(SpoolSurface::new(&config.spool_dir)),
    )
    .pricing(PerCopyPricing {
        rate: config.rate_per_copy,
    })
    .object_store(Arc::new(MemoryObjectStore::new()))
    .build();
    let mut agent_events = agent
        .take_events()
        .context("agent events already taken")?;

    let mut client = PrintClient::new(Arc::clone(&store), peer());
    if let Some(client_events) = client.take_events() {
        tokio::spawn(log_progress(client_events));
    }

    let job = client.submit(&config.merchant_id, "demo", files).await?;
    tracing::info!(
        job = %job.id,
        agent = %config.name,
        size = %format_file_size(job.total_bytes()),
        "demo job submitted"
    );

    let timeout = Duration::from_secs(config.transfer_timeout);
    let mut outputs = Vec::new();
    let status = tokio::time::timeout(timeout, async {
        let (accepted, sent) =
            tokio::join!(agent.accept_job(&job.id), client.send_when_accepted(&job));
        accepted?;
        sent?;
        wait_for_price(&mut agent_events, &mut outputs).await
    })
    .await
    .context("job did not finish within the transfer timeout")??;

    let status = if status == JobStatus::AwaitingPayment && config.auto_confirm_payment {
        agent.confirm_payment(&job.id).await?;
        agent.complete_job(&job.id).await?;
        JobStatus::Completed
    } else {
        status
    };

    let record = agent
        .queue(&config.merchant_id)
        .await?
        .into_iter()
        .find(|r| r.id == job.id)
        .context("job disappeared")?;

    Ok(DemoSummary {
        job_id: job.id,
        status,
        cost: record.cost,
        outputs,
    })
}

async fn read_files(args: &DemoArgs) -> anyhow::Result<Vec<OutgoingFile>> {
    let specs = args.specs();
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let contents = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        files.push(OutgoingFile {
            mime_type: mime_for(path).map(str::to_string),
            name,
            specs: specs.clone(),
            contents,
        });
    }
    Ok(files)
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    Some(mime)
}

/// Follows agent events until the job is priced or fails.
async fn wait_for_price(
    events: &mut mpsc::Receiver<JobEvent>,
    outputs: &mut Vec<PathBuf>,
) -> anyhow::Result<JobStatus> {
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::StatusChanged { job_id, status } => {
                tracing::info!(job = %job_id, %status, "job status");
                if status == JobStatus::AwaitingPayment {
                    return Ok(status);
                }
            }
            JobEvent::FilePrinted { name, output, .. } => {
                tracing::info!(file = %name, output = %output.display(), "file printed");
                outputs.push(output);
            }
            JobEvent::Failed { job_id, reason } => {
                bail!("job {job_id} failed: {reason}");
            }
            JobEvent::Progress(_) => {}
        }
    }
    bail!("agent stopped before the job was priced")
}

async fn log_progress(mut events: mpsc::Receiver<JobEvent>) {
    while let Some(event) = events.recv().await {
        if let JobEvent::Progress(progress) = event {
            tracing::debug!(
                job = %progress.job_id,
                sent = progress.bytes_transferred,
                total = progress.total_bytes,
                percent = progress.percentage(),
                "sending"
            );
        }
    }
}
