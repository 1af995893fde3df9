use clap::Parser;
use log::debug;

use visword::cli::SubCommandExtend;
use visword::config::SubCommand;
use visword::Opts;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    let threads = opts.threads.unwrap_or_else(num_cpus::get);
    rayon::ThreadPoolBuilder::new().num_threads(threads).build_global()?;
    debug!("使用 {} 个线程", threads);

    match &opts.subcmd {
        SubCommand::Init(config) => config.run(&opts),
        SubCommand::Train(config) => config.run(&opts),
        SubCommand::Evaluate(config) => config.run(&opts),
        SubCommand::Classify(config) => config.run(&opts),
        SubCommand::Vote(config) => config.run(&opts),
        SubCommand::Export(config) => config.run(&opts),
    }
}
