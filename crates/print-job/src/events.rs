use std::path::PathBuf;

use printlink_protocol::{JobStatus, TransferProgress};

/// Event emitted by a coordinator for UIs.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    StatusChanged { job_id: String, status: JobStatus },
    Progress(TransferProgress),
    FilePrinted {
        job_id: String,
        name: String,
        output: PathBuf,
    },
    Failed { job_id: String, reason: String },
}
