//! Loader of clusterizations in cnl format, and command line support for gecmi.
//!
//! The cnl format lists one cluster per line as whitespace separated node ids:
//!
//! ```text
//! # Clusters: 2, Nodes: 5
//! 1 2 3
//! 3 4 5
//! ```
//!
//! The header comment is optional, a line can start with a cluster label ending with `>`
//! and a node id can carry a share suffix (`12:0.5`) which is ignored.

pub mod header;
pub mod reader;
