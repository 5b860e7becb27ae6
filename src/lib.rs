pub mod dimred;
mod dense;
mod utils;

pub use dimred::tsne::{TSNEBuilder, TSNEConfig, TsneError, TSNE};
pub use utils::FloatOps;
