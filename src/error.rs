use thiserror::Error;

/// The single fallible public operation in this crate: auto-adjust only
/// makes sense against an empty tree.
#[derive(Debug, Error)]
pub enum OctreeError {
    #[error("auto-adjust requires an empty tree; call clear() first or insert without auto_adjust")]
    AutoAdjustOnNonEmptyTree,
}
