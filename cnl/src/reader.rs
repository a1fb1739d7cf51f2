//! Reads a clusterization in cnl format into a [BipartiteRelation].

use anyhow::{Context, anyhow};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::path::Path;

use gecmi::prelude::*;

use crate::header::*;

/// What was announced and what was actually read.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReadStats {
    /// header found in the file, if any
    pub header: Option<CnlHeader>,
    /// counts used for preallocation
    pub expected: CnlHeader,
    /// true if expected counts were estimated
    pub estimated: bool,
    /// number of payload lines, i.e the largest module id
    pub nb_clusters: usize,
    /// unique nodes read
    pub nb_nodes: usize,
    /// (node, cluster) couples read, with repetitions
    pub nb_members: usize,
}

impl ReadStats {
    /// mean number of clusters a node belongs to
    pub fn get_membership(&self) -> f64 {
        if self.nb_nodes == 0 {
            return 0.;
        }
        self.nb_members as f64 / self.nb_nodes as f64
    }
}

// parses a member token, dropping an optional share suffix
fn parse_member(token: &str) -> anyhow::Result<ItemId> {
    let id = token.split(':').next().unwrap_or(token);
    let id: u64 = id
        .parse()
        .map_err(|e| anyhow!("bad node id {:?} : {}", token, e))?;
    ItemId::try_from(id).map_err(|_| GecmiError::ItemOverflow(id).into())
}

/// Reads clusters from input.
///
/// Module ids are given by the rank of the payload line, counted from 1. An empty cluster is skipped
/// but still consumes its id. input_bytes (size of input, 0 if unknown) and membership are only used to
/// estimate the sizes to allocate when the header does not give them.
pub fn read_clusters<R: BufRead>(
    input: R,
    input_bytes: u64,
    membership: f64,
) -> anyhow::Result<(BipartiteRelation, ReadStats)> {
    let mut lines = input.lines();
    let mut stats = ReadStats::default();
    // header search stops at the first payload line, which we keep
    let mut pending: Option<String> = None;
    for line in lines.by_ref() {
        let line = line.context("reading cnl header")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('#') {
            pending = Some(line);
            break;
        }
        if let Some(header) = parse_header(trimmed) {
            stats.header = Some(header);
            break;
        }
    }
    //
    let announced = stats.header.unwrap_or_default();
    let (nodes, clusters, estimated) = if announced.is_complete() {
        (announced.nodes, announced.clusters, false)
    } else {
        let bytes = if announced.nodes > 0 { 0 } else { input_bytes };
        estimate_sizes(announced.nodes, announced.clusters, bytes, membership)
    };
    stats.expected = CnlHeader::new(clusters, nodes);
    stats.estimated = estimated;
    log::debug!(
        "read_clusters, expected nodes : {}, clusters : {}, estimated : {}",
        nodes,
        clusters,
        estimated
    );
    let mut relation = BipartiteRelation::with_capacity(nodes, clusters);
    //
    let mut nb_lines: usize = 0;
    for line in pending.into_iter().map(Ok).chain(lines) {
        let line: String = line.context("reading cnl clusters")?;
        let mut tokens = line.split_whitespace().peekable();
        match tokens.peek() {
            None => continue,
            Some(t) if t.starts_with('#') => continue,
            _ => {}
        }
        nb_lines += 1;
        let module = ModuleId::try_from(nb_lines)
            .map_err(|_| anyhow!("too many clusters, line {}", nb_lines))?;
        // skip cluster label
        if tokens.peek().is_some_and(|t| t.ends_with('>')) {
            tokens.next();
        }
        for token in tokens {
            let item = parse_member(token)
                .with_context(|| format!("cluster at payload line {}", nb_lines))?;
            relation.insert(item, module);
            stats.nb_members += 1;
        }
    }
    relation.shrink_to_fit();
    stats.nb_clusters = nb_lines;
    stats.nb_nodes = relation.nb_items();
    //
    log::debug!(
        "read_clusters, nodes : {}, clusters : {}, membership : {:.3e}",
        stats.nb_nodes,
        stats.nb_clusters,
        stats.get_membership()
    );
    if !estimated
        && ((clusters > 0 && clusters != stats.nb_clusters)
            || (nodes > 0 && nodes != stats.nb_nodes))
    {
        log::warn!(
            "the specified number of nodes/clusters does not correspond to the actual one, nodes : ({}, {}), clusters : ({}, {})",
            nodes,
            stats.nb_nodes,
            clusters,
            stats.nb_clusters
        );
    }
    Ok((relation, stats))
} // end of read_clusters

/// Loads a cnl file. membership is the expected mean membership of nodes (1. if unknown).
pub fn load_clusters(path: &Path, membership: f64) -> anyhow::Result<(BipartiteRelation, ReadStats)> {
    log::info!("loading clusters from {:?}", path);
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("could not open file {:?}", path))?;
    let bytes = input_size(path);
    let (relation, stats) = read_clusters(BufReader::new(file), bytes, membership)
        .with_context(|| format!("reading file {:?}", path))?;
    log::info!(
        "loaded {:?}, nb nodes : {}, nb clusters : {}",
        path,
        relation.nb_items(),
        relation.nb_modules()
    );
    Ok((relation, stats))
}

/// Node counts announced by the headers of both inputs, if both announce one.
/// These are the sizes of the original node bases, to be passed to the estimator when the inputs are not synchronized.
pub fn header_item_counts(stats_a: &ReadStats, stats_b: &ReadStats) -> Option<(usize, usize)> {
    match (stats_a.header, stats_b.header) {
        (Some(ha), Some(hb)) if ha.nodes > 0 && hb.nodes > 0 => Some((ha.nodes, hb.nodes)),
        _ => None,
    }
}

//==================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use std::io::{Cursor, Write};

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn read_with_header() {
        log_init_test();
        //
        let text = "# Clusters: 2, Nodes: 5\n1 2 3\n\n3 4 5\n";
        let (relation, stats) = read_clusters(Cursor::new(text), 0, 1.).unwrap();
        assert_eq!(stats.header, Some(CnlHeader::new(2, 5)));
        assert!(!stats.estimated);
        assert_eq!(stats.nb_clusters, 2);
        assert_eq!(stats.nb_nodes, 5);
        assert_eq!(stats.nb_members, 6);
        assert_eq!(relation.modules_of(3), &[1, 2]);
        assert_eq!(relation.items_of(2), &[3, 4, 5]);
        assert!((stats.get_membership() - 1.2).abs() < 1.0e-12);
    }

    #[test]
    fn labels_shares_and_empty_clusters() {
        log_init_test();
        //
        let text = "# some comment\n# clusters:3 nodes:4\nc1> 1 2:0.5\nc2>\n# inner comment\n3 4 2:0.5\n";
        let (relation, stats) = read_clusters(Cursor::new(text), 0, 1.).unwrap();
        assert_eq!(stats.nb_clusters, 3);
        // empty cluster 2 consumed its id
        assert_eq!(relation.nb_modules(), 2);
        assert!(relation.items_of(2).is_empty());
        assert_eq!(relation.items_of(3), &[2, 3, 4]);
        assert_eq!(relation.modules_of(2), &[1, 3]);
    } // end of labels_shares_and_empty_clusters

    #[test]
    fn no_header() {
        log_init_test();
        //
        let text = "1 2\n3 4\n";
        let (relation, stats) = read_clusters(Cursor::new(text), text.len() as u64, 1.).unwrap();
        assert_eq!(stats.header, None);
        assert!(stats.estimated);
        assert_eq!(relation.nb_items(), 4);
        assert_eq!(relation.modules_of(4), &[2]);
    }

    #[test]
    fn bad_ids() {
        log_init_test();
        //
        let res = read_clusters(Cursor::new("1 2\n3 x4\n"), 0, 1.);
        assert!(res.is_err());
        //
        let res = read_clusters(Cursor::new("1 4294967296\n"), 0, 1.);
        let err = res.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GecmiError>(),
            Some(GecmiError::ItemOverflow(4294967296))
        ));
    }

    #[test]
    fn load_file() {
        log_init_test();
        //
        let path = std::env::temp_dir().join(format!("cnl_load_{}.cnl", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "# Clusters: 2, Nodes: 5").unwrap();
            writeln!(file, "1 2 3").unwrap();
            writeln!(file, "4 5").unwrap();
        }
        assert!(input_size(&path) > 0);
        let (relation, stats) = load_clusters(&path, 1.).unwrap();
        assert_eq!(relation.nb_modules(), 2);
        assert_eq!(stats.nb_nodes, 5);
        let _ = std::fs::remove_file(&path);
        //
        assert!(load_clusters(Path::new("/nonexistent/dir/file.cnl"), 1.).is_err());
    }

    #[test]
    fn item_counts_from_headers() {
        log_init_test();
        //
        let stats = |text: &str| read_clusters(Cursor::new(text.to_string()), 0, 1.).unwrap().1;
        let with_nodes = stats("# Clusters: 2, Nodes: 5\n1 2 3\n4 5\n");
        let other = stats("# nodes ignored\n# clusters: 1 nodes: 3\n1 2 3\n");
        let clusters_only = stats("# Clusters: 2\n1 2\n3\n");
        let no_header = stats("1 2\n3 4\n");
        //
        assert_eq!(header_item_counts(&with_nodes, &other), Some((5, 3)));
        assert_eq!(header_item_counts(&other, &with_nodes), Some((3, 5)));
        assert_eq!(header_item_counts(&with_nodes, &clusters_only), None);
        assert_eq!(header_item_counts(&no_header, &with_nodes), None);
        // counts flow to the estimator and select the universe
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2, 3], vec![4, 5]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3]]);
        let (na, nb) = header_item_counts(&with_nodes, &other).unwrap();
        let params = EvalParams::default().with_item_counts(na, nb);
        let estimator = Estimator::new(&rel_a, &rel_b, params, DriverConfig::default()).unwrap();
        assert_eq!(estimator.get_universe_size(), 3);
    } // end of item_counts_from_headers
} // end of mod tests
