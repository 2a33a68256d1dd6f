use printlink_protocol::FileMetadata;

/// Computes what a job costs once its files have arrived.
pub trait PricingPolicy: Send + Sync {
    fn price(&self, files: &[FileMetadata]) -> f64;
}

/// Flat rate per printed copy, summed over all files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerCopyPricing {
    pub rate: f64,
}

impl Default for PerCopyPricing {
    fn default() -> Self {
        Self { rate: 1.0 }
    }
}

impl PricingPolicy for PerCopyPricing {
    fn price(&self, files: &[FileMetadata]) -> f64 {
        let copies: u64 = files
            .iter()
            .map(|f| u64::from(f.specs.effective_copies()))
            .sum();
        copies as f64 * self.rate
    }
}
