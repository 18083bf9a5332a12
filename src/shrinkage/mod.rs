//! Log fold change shrinkage

mod apeglm;

pub use apeglm::{lfc_shrink, ApeglmParams};
