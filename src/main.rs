use clap::{Parser, ValueEnum};
use rust_tree_annotator::annotate::{self, AnnotateOptions, HeightsSummary};
use rust_tree_annotator::ca_heights::set_heights_by_common_ancestor;
use rust_tree_annotator::clades::TaxonSet;
use rust_tree_annotator::hipstr::HipstrBuilder;
use rust_tree_annotator::io::{TreeStream, read_target_tree, write_nexus_file};
use rust_tree_annotator::scoring::find_mcc_tree;
use rust_tree_annotator::summary::{collect_attributes, read_clades};
use std::path::PathBuf;
use std::time::Instant;

/// Summarize a BEAST posterior tree sample (NEXUS .trees file) into a single
/// annotated consensus tree: MCC or HIPSTR topology, posterior clade support,
/// node height summaries and attribute statistics on every node.
#[derive(Parser, Debug)]
#[command(name = "tree-annotate", version, about = "Annotated summary tree from a BEAST posterior sample")]
struct Args {
    /// Path to BEAST .trees (NEXUS) file; .gz is read transparently
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output path for the annotated NEXUS tree (stdout if omitted, .gz compresses)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Burn-in by number of trees (drop first N trees)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Burn-in by state (keep trees with STATE_ > value)
    #[arg(short = 's', long = "burnin-states", default_value_t = 0)]
    burnin_states: u64,

    /// Summary topology to build: mcc | hipstr
    #[arg(long = "summary", value_enum, default_value_t = TargetArg::Mcc)]
    summary: TargetArg,

    /// Annotate a user-supplied target tree instead of building one
    #[arg(long = "target-tree")]
    target_tree: Option<PathBuf>,

    /// Node height summary: keep | mean | median | ca
    #[arg(long = "heights", value_enum, default_value_t = HeightsArg::Mean)]
    heights: HeightsArg,

    /// Minimum posterior probability for a node to receive attribute statistics
    #[arg(long = "limit", default_value_t = 0.0)]
    limit: f64,

    /// HPD mass level(s) for bivariate traits, comma separated
    #[arg(long = "hpd2d", default_value = "0.80")]
    hpd2d: String,

    /// Compute ESS for branch parameters (requires --burnin-states)
    #[arg(long = "ess", default_value_t = false)]
    ess: bool,

    /// Credibility penalty added before logs in the HIPSTR search
    #[arg(long = "penalty", default_value_t = 0.0)]
    penalty: f64,

    /// Treat integer-valued traits as discrete
    #[arg(long = "force-discrete", default_value_t = false)]
    force_discrete: bool,

    /// Quiet mode: suppresses progress messages
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TargetArg {
    Mcc,
    Hipstr,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum HeightsArg {
    Keep,
    Mean,
    Median,
    Ca,
}

impl From<HeightsArg> for HeightsSummary {
    fn from(arg: HeightsArg) -> Self {
        match arg {
            HeightsArg::Keep => HeightsSummary::Keep,
            HeightsArg::Mean => HeightsSummary::Mean,
            HeightsArg::Median => HeightsSummary::Median,
            HeightsArg::Ca => HeightsSummary::CommonAncestor,
        }
    }
}

fn main() {
    let args = Args::parse();

    let hpd_2d = match parse_hpd_levels(&args.hpd2d) {
        Ok(levels) => levels,
        Err(bad) => {
            eprintln!("Invalid --hpd2d value: {bad}");
            std::process::exit(1);
        }
    };
    if args.ess && args.burnin_states == 0 {
        eprintln!("Specify burn-in as states (--burnin-states) to use --ess.");
        std::process::exit(1);
    }

    let stream = TreeStream::new(&args.input)
        .with_burnin(args.burnin_trees, args.burnin_states)
        .with_force_discrete(args.force_discrete);

    // Target selection, either from the clade registry or a user file
    let heights: HeightsSummary = args.heights.into();
    let (mut target, taxa) = if let Some(target_path) = &args.target_tree {
        log_if(!args.quiet, format!("Reading user target tree {target_path:?}"));
        let target = match read_target_tree(target_path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Failed to read target tree {target_path:?}: {e}");
                std::process::exit(2);
            }
        };
        let taxa = match TaxonSet::from_tree(&target) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Bad target tree: {e}");
                std::process::exit(2);
            }
        };
        (target, taxa)
    } else {
        // Pass 1: register clades and credibilities
        let t0 = Instant::now();
        let mut pass = match read_clades(&stream) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to read trees from {:?}: {e}", args.input);
                std::process::exit(2);
            }
        };
        log_if(!args.quiet, format!("Reading trees {:.3}s", t0.elapsed().as_secs_f64()));
        log_if(
            !args.quiet,
            format!(
                "Read {} trees ({} used) over {} taxa, {} unique clades",
                pass.total_trees,
                pass.trees_used,
                pass.system.taxa().len(),
                pass.system.clade_count()
            ),
        );

        let taxa = pass.system.taxa().clone();
        let t1 = Instant::now();
        let target = match args.summary {
            TargetArg::Mcc => {
                log_if(!args.quiet, "Finding maximum clade credibility tree...".to_string());
                match find_mcc_tree(&stream, &pass.system) {
                    Ok(mcc) => {
                        log_if(
                            !args.quiet,
                            format!(
                                "Best tree: number {} (log clade credibility {:.4}) {:.3}s",
                                mcc.tree_number,
                                mcc.score,
                                t1.elapsed().as_secs_f64()
                            ),
                        );
                        mcc.tree
                    }
                    Err(e) => {
                        eprintln!("Failed to select MCC tree: {e}");
                        std::process::exit(3);
                    }
                }
            }
            TargetArg::Hipstr => {
                log_if(
                    !args.quiet,
                    "Finding highest independent posterior subtree reconstruction...".to_string(),
                );
                let mut builder = HipstrBuilder::new(args.penalty);
                match builder.build(&mut pass.system) {
                    Ok((tree, score)) => {
                        log_if(
                            !args.quiet,
                            format!(
                                "Highest log clade credibility: {score:.4} {:.3}s",
                                t1.elapsed().as_secs_f64()
                            ),
                        );
                        tree
                    }
                    Err(e) => {
                        eprintln!("Failed to build HIPSTR tree: {e}");
                        std::process::exit(3);
                    }
                }
            }
        };
        (target, taxa)
    };

    // Pass over the sample again, collecting per-clade attribute values
    let t2 = Instant::now();
    let attributes = match collect_attributes(&stream, &taxa, &target) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Failed to collect node attributes: {e}");
            std::process::exit(3);
        }
    };
    log_if(
        !args.quiet,
        format!("Collecting node attributes {:.3}s", t2.elapsed().as_secs_f64()),
    );

    let t3 = Instant::now();
    let options = AnnotateOptions {
        heights,
        posterior_limit: args.limit,
        hpd_2d,
        compute_ess: args.ess,
    };
    if let Err(e) = annotate::annotate_tree(&attributes.system, &mut target, &options) {
        eprintln!("Error annotating tree: {e}");
        eprintln!("Please check the tree log file format.");
        std::process::exit(3);
    }
    log_if(!args.quiet, format!("Annotating target tree {:.3}s", t3.elapsed().as_secs_f64()));

    if heights == HeightsSummary::CommonAncestor {
        let t4 = Instant::now();
        match set_heights_by_common_ancestor(&stream, &taxa, &mut target) {
            Ok(used) => log_if(
                !args.quiet,
                format!(
                    "Setting common ancestor heights from {used} trees {:.3}s",
                    t4.elapsed().as_secs_f64()
                ),
            ),
            Err(e) => {
                eprintln!("Failed to set common ancestor heights: {e}");
                std::process::exit(3);
            }
        }
    }

    let t5 = Instant::now();
    if let Err(e) = write_nexus_file(args.output.as_deref(), &taxa, &target) {
        eprintln!("Failed to write output {:?}: {e}", args.output);
        std::process::exit(4);
    }
    log_write_done(!args.quiet, args.output.as_ref(), t5.elapsed().as_secs_f64());
}

fn parse_hpd_levels(text: &str) -> Result<Vec<f64>, String> {
    text.split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| part.to_string()))
        .collect()
}

// Progress goes to stderr so the annotated tree can stream to stdout.
fn log_if(show: bool, msg: String) {
    if show {
        eprintln!("{}", msg);
    }
}

fn log_write_done(show: bool, output: Option<&PathBuf>, secs: f64) {
    if !show {
        return;
    }
    match output {
        None => eprintln!("Writing to stdout {secs:.3}s"),
        Some(_) => eprintln!("Writing to output {secs:.3}s"),
    }
}
