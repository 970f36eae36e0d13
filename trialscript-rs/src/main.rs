use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::filter::LevelFilter;

use trialscript::cli::{self, CliArgs};
use trialscript::config::Experiment;
use trialscript::error::{Error, Result};
use trialscript::loop_item::Step;
use trialscript::script::command::{create_cmd, Command};
use trialscript::table::FilePool;
use trialscript::var::Workspace;

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("trialscript: {e}");
            eprintln!("{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    // Library diagnostics go through `log`; the fmt subscriber picks them up.
    tracing_subscriber::fmt()
        .with_max_level(if args.debug { LevelFilter::DEBUG } else { LevelFilter::WARN })
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("trialscript: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs) -> Result<()> {
    let (exp, errors) = Experiment::load_file(&args.file)
        .map_err(|source| Error::Io { path: args.file.clone(), source })?;
    for e in &errors {
        log::warn!("{}: {e}", args.file.display());
    }

    let pool_dir = match &args.pool_dir {
        Some(d) => d.clone(),
        None => match args.file.parent() {
            Some(p) if p != Path::new("") => p.to_path_buf(),
            _ => PathBuf::from("."),
        },
    };
    let pool = FilePool::load_dir(&pool_dir).map_err(|source| Error::Io { path: pool_dir, source })?;

    let name = match &args.loop_name {
        Some(n) => n.clone(),
        None => exp.loops().next().ok_or(Error::NoLoop)?.name.clone(),
    };
    let store = exp.store();
    let (mut item, errors) = exp
        .build_loop(&name, &store)
        .ok_or_else(|| Error::NoSuchLoop(name.clone()))?;
    for e in &errors {
        log::warn!("{}: {e}", args.file.display());
    }

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut ws = Workspace::new(store, rng);
    item.prepare(&pool, &ws)?;

    let mut count = 0;
    while args.max_cycles.map_or(true, |max| count < max) {
        match item.step(&mut ws)? {
            Step::Run { item: child, cycle, applied } => {
                count += 1;
                let mut cmd = Command::new(if child.is_empty() { "-".to_owned() } else { child });
                cmd.keywords = applied;
                println!("{count}\t{cycle}\t{}", create_cmd(&cmd));
            }
            Step::Done => break,
        }
    }
    log::info!("{name}: {count} cycles");
    Ok(())
}
