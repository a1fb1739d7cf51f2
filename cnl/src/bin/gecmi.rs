//! gecmi : overlapping normalized mutual information between two clusterizations in cnl format.
//!
//! Usage : gecmi [options] clusters1 clusters2
//!
//! - --sync (-s) : synchronize the node base, for example to fairly evaluate against top K selected clusters
//!   made of a subset of the original nodes
//! - --fnmi (-f) : evaluate also fair nmi
//! - --risk (-r) : probability of the value being outside the error bound, default 0.01
//! - --error (-e) : admissible error, default 0.01
//!
//! Log is driven by RUST_LOG as usual with env_logger.

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use cpu_time::ProcessTime;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use gecmi::prelude::*;

use cnl::reader::*;

struct GecmiParams {
    inputs: (PathBuf, PathBuf),
    sync: bool,
    fnmi: bool,
    json: bool,
    membership: f64,
    nb_threads: usize,
    eval: EvalParams,
    config: DriverConfig,
}

fn parse_cmd(matches: &ArgMatches) -> anyhow::Result<GecmiParams> {
    log::debug!("in parse_cmd");
    let inputs: Vec<&PathBuf> = matches
        .get_many::<PathBuf>("input")
        .context("please provide two input files")?
        .collect();
    if inputs.len() != 2 {
        return Err(anyhow::anyhow!(
            "please provide exactly two input files, got {}",
            inputs.len()
        ));
    }
    let risk = *matches.get_one::<f64>("risk").context("risk")?;
    let error = *matches.get_one::<f64>("error").context("error")?;
    let fast = matches.get_flag("fast");
    let mut config = DriverConfig::default();
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config = config.with_seed(*seed);
    }
    Ok(GecmiParams {
        inputs: (inputs[0].clone(), inputs[1].clone()),
        sync: matches.get_flag("sync"),
        fnmi: matches.get_flag("fnmi"),
        json: matches.get_flag("json"),
        membership: *matches.get_one::<f64>("membership").context("membership")?,
        nb_threads: matches
            .get_one::<usize>("threads")
            .copied()
            .unwrap_or_else(num_cpus::get),
        eval: EvalParams::new(risk, error, fast),
        config,
    })
} // end of parse_cmd

//=============================================================================================

pub fn main() -> anyhow::Result<()> {
    //
    let _ = env_logger::builder().try_init();
    //
    let matches = Command::new("gecmi")
        .about("overlapping normalized mutual information between two clusterizations")
        .arg_required_else_help(true)
        .arg(
            Arg::new("input")
                .required(true)
                .num_args(2)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf))
                .help("the two cnl files to compare"),
        )
        .arg(
            Arg::new("sync")
                .short('s')
                .long("sync")
                .action(ArgAction::SetTrue)
                .help("synchronize the node base, removing from the largest collection nodes absent from the other one"),
        )
        .arg(
            Arg::new("fnmi")
                .short('f')
                .long("fnmi")
                .action(ArgAction::SetTrue)
                .help("evaluate also fair nmi"),
        )
        .arg(
            Arg::new("risk")
                .short('r')
                .long("risk")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64))
                .default_value("0.01")
                .help("probability of the value being outside the error bound"),
        )
        .arg(
            Arg::new("error")
                .short('e')
                .long("error")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64))
                .default_value("0.01")
                .help("admissible error"),
        )
        .arg(
            Arg::new("fast")
                .long("fast")
                .action(ArgAction::SetTrue)
                .help("keep ambiguous samples instead of retrying them"),
        )
        .arg(
            Arg::new("membership")
                .short('m')
                .long("membership")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64))
                .default_value("1.0")
                .help("expected mean membership of nodes, used to preallocate when headers are missing"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize))
                .help("number of worker threads, default to number of cpus"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(u64))
                .help("master seed of random generators"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("dump the whole evaluation in json"),
        )
        .get_matches();
    //
    let mut params = parse_cmd(&matches)?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(params.nb_threads)
        .build_global()
        .context("could not initialize thread pool")?;
    log::info!("running with {} threads", params.nb_threads);
    //
    let cpu_start = ProcessTime::now();
    let sys_now = SystemTime::now();
    //
    let (mut rel_a, stats_a) = load_clusters(&params.inputs.0, params.membership)?;
    let (mut rel_b, stats_b) = load_clusters(&params.inputs.1, params.membership)?;
    log::debug!("stats first : {:?}", stats_a);
    log::debug!("stats second : {:?}", stats_b);
    if params.sync {
        synchronize(&mut rel_a, &mut rel_b)?;
    } else if let Some((nb_nodes_a, nb_nodes_b)) = header_item_counts(&stats_a, &stats_b) {
        log::info!("node counts from headers : {}, {}", nb_nodes_a, nb_nodes_b);
        params.eval = params.eval.with_item_counts(nb_nodes_a, nb_nodes_b);
    }
    //
    let evaluation = evaluate_with(&rel_a, &rel_b, &params.eval, &params.config)?;
    //
    if params.json {
        println!("{}", serde_json::to_string(&evaluation)?);
    } else if params.fnmi {
        let (cls1, cls2) = (rel_a.nb_modules(), rel_b.nb_modules());
        println!(
            "NMI: {}, FNMI: {} (cls1: {}, cls2: {})",
            evaluation.nmi_max,
            evaluation.fnmi(cls1, cls2),
            cls1,
            cls2
        );
    } else {
        println!("{}", evaluation.nmi_max);
    }
    //
    let cpu_time: Duration = cpu_start.elapsed();
    log::info!(
        "  sys time(ms) {:?} cpu time(ms) {:?}",
        sys_now.elapsed().map(|d| d.as_millis()).unwrap_or(0),
        cpu_time.as_millis()
    );
    Ok(())
} // end of main
