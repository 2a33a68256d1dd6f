use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Submitted by the sender, not yet accepted by the agent.
    Pending,
    /// The agent accepted the job and is negotiating a peer connection.
    Connecting,
    /// The data channel is open and file bytes are flowing.
    Transferring,
    /// The file arrived and is being printed.
    Processing,
    /// Cost computed, waiting for the sender to pay.
    AwaitingPayment,
    Paid,
    Completed,
    /// Negotiation, transfer or rendering failed. See `failureReason`.
    Failed,
}

impl JobStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Connecting => "connecting",
            JobStatus::Transferring => "transferring",
            JobStatus::Processing => "processing",
            JobStatus::AwaitingPayment => "awaitingPayment",
            JobStatus::Paid => "paid",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Position in the forward lifecycle. `Failed` sits outside it.
    pub fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Connecting => Some(1),
            JobStatus::Transferring => Some(2),
            JobStatus::Processing => Some(3),
            JobStatus::AwaitingPayment => Some(4),
            JobStatus::Paid => Some(5),
            JobStatus::Completed => Some(6),
            JobStatus::Failed => None,
        }
    }

    /// Returns `true` while a peer session should exist for the job.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Connecting | JobStatus::Transferring)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Color mode requested for a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    #[default]
    #[serde(rename = "bw")]
    BlackAndWhite,
    #[serde(rename = "color")]
    Color,
}

/// Single- or double-sided output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sides {
    #[default]
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    #[default]
    A4,
    A3,
    Letter,
    Legal,
}

/// Error returned for a malformed page range such as `"3-1"` or `"a"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid page range: {0}")]
pub struct PageRangeError(pub String);

/// How one document should be printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSpec {
    #[serde(default = "default_copies")]
    pub copies: u32,
    /// Page selection such as `"1-3,5"`. Empty means all pages.
    #[serde(default)]
    pub pages: String,
    #[serde(default)]
    pub color: ColorMode,
    #[serde(default)]
    pub sides: Sides,
    #[serde(default)]
    pub paper_size: PaperSize,
}

fn default_copies() -> u32 {
    1
}

impl Default for PrintSpec {
    fn default() -> Self {
        Self {
            copies: default_copies(),
            pages: String::new(),
            color: ColorMode::default(),
            sides: Sides::default(),
            paper_size: PaperSize::default(),
        }
    }
}

impl PrintSpec {
    /// Number of copies to print; zero is treated as one.
    pub fn effective_copies(&self) -> u32 {
        self.copies.max(1)
    }

    /// Parses `pages` into inclusive `(first, last)` ranges.
    ///
    /// Returns an empty list when all pages are selected.
    pub fn page_ranges(&self) -> Result<Vec<(u32, u32)>, PageRangeError> {
        let pages = self.pages.trim();
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranges = Vec::new();
        for part in pages.split(',') {
            let part = part.trim();
            let parse = |s: &str| {
                s.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| PageRangeError(self.pages.clone()))
            };
            let range = match part.split_once('-') {
                Some((first, last)) => (parse(first)?, parse(last)?),
                None => {
                    let page = parse(part)?;
                    (page, page)
                }
            };
            if range.0 > range.1 {
                return Err(PageRangeError(self.pages.clone()));
            }
            ranges.push(range);
        }
        Ok(ranges)
    }
}

/// Metadata for one file of a print job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// SHA-256 hex digest of the file contents, when the sender computed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub specs: PrintSpec,
}

/// Progress of one blob transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub job_id: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Returns the transfer progress as a percentage (0-100).
    ///
    /// An empty transfer is complete as soon as it is reported.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&JobStatus::AwaitingPayment).unwrap();
        assert_eq!(json, "\"awaitingPayment\"");
        let parsed: JobStatus = serde_json::from_str("\"transferring\"").unwrap();
        assert_eq!(parsed, JobStatus::Transferring);
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn status_rank_is_ordered() {
        let order = [
            JobStatus::Pending,
            JobStatus::Connecting,
            JobStatus::Transferring,
            JobStatus::Processing,
            JobStatus::AwaitingPayment,
            JobStatus::Paid,
            JobStatus::Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert!(JobStatus::Failed.rank().is_none());
    }

    #[test]
    fn print_spec_defaults_from_empty_object() {
        let spec: PrintSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, PrintSpec::default());
        assert_eq!(spec.copies, 1);
        assert_eq!(spec.color, ColorMode::BlackAndWhite);
    }

    #[test]
    fn print_spec_wire_shape() {
        let spec = PrintSpec {
            copies: 2,
            pages: "1-3".into(),
            color: ColorMode::Color,
            sides: Sides::Double,
            paper_size: PaperSize::Letter,
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["color"], "color");
        assert_eq!(v["sides"], "double");
        assert_eq!(v["paperSize"], "Letter");
    }

    #[test]
    fn effective_copies_never_zero() {
        let spec = PrintSpec {
            copies: 0,
            ..PrintSpec::default()
        };
        assert_eq!(spec.effective_copies(), 1);
    }

    #[test]
    fn page_ranges_parse() {
        let spec = PrintSpec {
            pages: "1-3, 5,7-7".into(),
            ..PrintSpec::default()
        };
        assert_eq!(spec.page_ranges().unwrap(), vec![(1, 3), (5, 5), (7, 7)]);
        assert!(PrintSpec::default().page_ranges().unwrap().is_empty());
    }

    #[test]
    fn page_ranges_reject_garbage() {
        for bad in ["3-1", "a", "0", "1-", ",", "2-x"] {
            let spec = PrintSpec {
                pages: bad.into(),
                ..PrintSpec::default()
            };
            assert!(spec.page_ranges().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn progress_percentage() {
        let p = TransferProgress {
            job_id: "j".into(),
            bytes_transferred: 25,
            total_bytes: 100,
        };
        assert!((p.percentage() - 25.0).abs() < f64::EPSILON);

        let empty = TransferProgress {
            job_id: "j".into(),
            bytes_transferred: 0,
            total_bytes: 0,
        };
        assert!((empty.percentage() - 100.0).abs() < f64::EPSILON);
    }
}
