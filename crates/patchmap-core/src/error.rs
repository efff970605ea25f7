use std::path::PathBuf;

use crate::layers::LayerRole;

pub type PatchMapResult<T> = Result<T, PatchMapError>;

/// Every way a patch-to-map run can abort.
///
/// Unmatched store rows are deliberately absent: they are counted in
/// [`crate::join::JoinStats`] and never stop a run.
#[derive(thiserror::Error, Debug)]
pub enum PatchMapError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("failed to open raster {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("{layer} layer is not aligned with the basin layer: {attribute} is {found}, expected {expected}")]
    Alignment {
        layer: LayerRole,
        attribute: &'static str,
        expected: String,
        found: String,
    },

    #[error("unable to connect to store: {0}")]
    StoreConnection(String),

    #[error("unable to run query: {0}")]
    StoreQuery(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("tiff error: {0}")]
    Tiff(#[from] tiff::TiffError),
}

impl PatchMapError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn store_connection(msg: impl ToString) -> Self {
        Self::StoreConnection(msg.to_string())
    }

    pub fn store_query(msg: impl ToString) -> Self {
        Self::StoreQuery(msg.to_string())
    }
}
