use thiserror::Error;

use vantage_source::Dataset;

/// Failure of one refresh stage. Every variant except `AlreadyRunning` is
/// recorded on the refresh job before it is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Fetch of {dataset} failed: {source}")]
    Fetch {
        dataset: Dataset,
        #[source]
        source: anyhow::Error,
    },

    #[error("Source returned no usable {0} rows")]
    EmptyDataset(Dataset),

    #[error("Transform failed: {0}")]
    Transform(#[source] anyhow::Error),

    #[error("Load failed: {0}")]
    Load(#[source] anyhow::Error),

    #[error("Cache rebuild failed: {0}")]
    CacheRebuild(String),

    #[error("Refresh exceeded its time limit of {0}s")]
    TimedOut(u64),

    #[error("Refresh already running for pipeline {0}")]
    AlreadyRunning(String),

    #[error("Refresh job store failed: {0}")]
    JobStore(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Fetch { .. } | PipelineError::EmptyDataset(_) => "fetch",
            PipelineError::Transform(_) => "transform",
            PipelineError::Load(_) => "load",
            PipelineError::CacheRebuild(_) => "cache_rebuild",
            PipelineError::TimedOut(_)
            | PipelineError::AlreadyRunning(_)
            | PipelineError::JobStore(_) => "lifecycle",
        }
    }

    /// Message, stage and cause chain, as recorded on the failed job.
    pub fn diagnostic(&self) -> String {
        let mut out = format!("{}\n\nStage: {}", self, self.stage());
        let mut cause = std::error::Error::source(self);
        if cause.is_some() {
            out.push_str("\n\nCaused by:");
        }
        let mut depth = 0;
        while let Some(err) = cause {
            out.push_str(&format!("\n    {}: {}", depth, err));
            depth += 1;
            cause = err.source();
        }
        out
    }

    /// Whether re-running the whole pipeline could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::AlreadyRunning(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_not_retryable() {
        assert!(!PipelineError::AlreadyRunning("main".to_string()).is_retryable());
        assert!(PipelineError::EmptyDataset(Dataset::Orders).is_retryable());
        assert!(PipelineError::Load(anyhow::anyhow!("disk full")).is_retryable());
        assert!(PipelineError::TimedOut(3600).is_retryable());
    }

    #[test]
    fn test_diagnostic_lists_causes() {
        let err = PipelineError::Load(anyhow::anyhow!("disk full").context("insert chunk 3"));
        let diagnostic = err.diagnostic();
        assert!(diagnostic.starts_with("Load failed: insert chunk 3"));
        assert!(diagnostic.contains("Stage: load"));
        assert!(diagnostic.contains("disk full"));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineError::EmptyDataset(Dataset::Vendors).stage(), "fetch");
        assert_eq!(PipelineError::CacheRebuild("x".into()).stage(), "cache_rebuild");
    }
}
