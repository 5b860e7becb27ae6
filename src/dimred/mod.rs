//! # Dimensionality Reduction
//!
//! This module provides algorithms for reducing the dimensionality of high-dimensional data
//! while preserving important structural properties.
//!
//! ## Currently Available
//! - **t-SNE** ([`tsne`]): exact t-Distributed Stochastic Neighbor Embedding for non-linear
//!   visualization of clusters and local structure
//!
//! ## Not Covered
//! - Barnes-Hut or FFT accelerated t-SNE; use the exact variant on data sets where an
//!   `n_obs × n_obs` matrix fits in memory
//! - Embedding new observations into an existing fit

pub mod tsne;
