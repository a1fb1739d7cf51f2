//! Header of cnl files and size estimation.
//!
//! The header is a leading comment `# Clusters: <n>[,] Nodes: <n>`. Counts are used to preallocate
//! the relation and to check the file once read. A count of 0 means not specified.

use std::path::Path;

/// counts announced by a cnl header. 0 means not specified.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CnlHeader {
    pub clusters: usize,
    pub nodes: usize,
}

impl CnlHeader {
    pub fn new(clusters: usize, nodes: usize) -> Self {
        CnlHeader { clusters, nodes }
    }

    pub fn is_complete(&self) -> bool {
        self.clusters > 0 && self.nodes > 0
    }
}

/// Parses a comment line as a cnl header.
/// Matching is case insensitive and accepts `#clusters:3` as well as `# Clusters: 3, Nodes: 5`.
/// Returns None if the line is not a header. A non numeric count is read as 0.
/// If more clusters than nodes are announced, the number of clusters is clamped to the number of nodes.
pub fn parse_header(line: &str) -> Option<CnlHeader> {
    let line = line.trim_start();
    let body = line.strip_prefix('#')?;
    let cleaned: String = body
        .chars()
        .map(|c| if c == ':' || c == ',' { ' ' } else { c })
        .collect();
    let mut fields = cleaned.split_whitespace();
    //
    if !fields.next()?.eq_ignore_ascii_case("clusters") {
        return None;
    }
    let clusters = fields
        .next()
        .and_then(|f| f.parse::<usize>().ok())
        .unwrap_or(0);
    let nodes = match fields.next() {
        Some(f) if f.eq_ignore_ascii_case("nodes") => fields
            .next()
            .and_then(|f| f.parse::<usize>().ok())
            .unwrap_or(0),
        _ => 0,
    };
    let mut header = CnlHeader::new(clusters, nodes);
    if nodes > 0 && clusters > nodes {
        log::warn!(
            "parse_header, nb clusters ({}) should not exceed nb nodes ({}), fixed",
            clusters,
            nodes
        );
        header.clusters = nodes;
    }
    Some(header)
} // end of parse_header

/// Completes unspecified (null) counts of a header.
///
/// - nodes are estimated from the size in bytes of the input assuming decimal ids, each followed by one delimiter,
///   and divided by membership (mean number of clusters a node belongs to).
/// - clusters are estimated as sqrt(nodes * membership) + 1.
///
/// Returns the completed counts and a flag set if some count was estimated.
/// A non positive membership is reset to 1.
pub fn estimate_sizes(
    nodes: usize,
    clusters: usize,
    input_bytes: u64,
    membership: f64,
) -> (usize, usize, bool) {
    let membership = if membership > 0. {
        membership
    } else {
        log::warn!(
            "estimate_sizes, invalid membership {:.3e} specified, reset to 1",
            membership
        );
        1.
    };
    // typically there are at least twice as many nodes as clusters
    if clusters > 0 && nodes == 0 {
        return (2 * clusters, clusters, true);
    }
    let mut nodes = nodes;
    let mut estimated = false;
    if nodes == 0 {
        if input_bytes == 0 {
            return (nodes, clusters, false);
        }
        // bytes of ids with img digits, img growing with magnitude
        let mut magn: u64 = 10;
        let mut img: u64 = 2;
        let mut remainder = input_bytes % magn;
        let mut nb: u64 = remainder / img;
        while input_bytes >= magn {
            magn = match magn.checked_mul(10) {
                Some(m) => m,
                None => break,
            };
            img += 1;
            nb += (input_bytes - remainder) % magn / img;
            remainder = input_bytes % magn;
        }
        nodes = (nb as f64 / membership) as usize;
        estimated = true;
    }
    let mut clusters = clusters;
    if clusters == 0 {
        clusters = (nodes as f64 * membership).sqrt() as usize + 1;
        estimated = true;
    }
    (nodes, clusters, estimated)
} // end of estimate_sizes

/// size in bytes of a file, 0 if it cannot be known
pub fn input_size(path: &Path) -> u64 {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            log::warn!("input_size, could not get size of {:?} : {}", path, e);
            0
        }
    }
}

//==================================================================================

// end of mod tests
