//! Command-line argument parsing.
//!
//! Usage:
//!   trialscript [-d] [-s<seed>] [-L<dir>] [-n<max>] <file> [<loop>]

use std::path::PathBuf;

pub const USAGE: &str = "Usage: trialscript [-d] [-s<seed>] [-L<dir>] [-n<max>] <file> [<loop>]";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Debug logging (`-d`).
    pub debug: bool,
    /// RNG seed (`-s<seed>`); random when absent.
    pub seed: Option<u64>,
    /// File pool directory (`-L<dir>`); defaults to the experiment's directory.
    pub pool_dir: Option<PathBuf>,
    /// Stop after this many cycles (`-n<max>`).
    pub max_cycles: Option<usize>,
    /// Experiment file.
    pub file: PathBuf,
    /// Loop to run; the first loop in the file when absent.
    pub loop_name: Option<String>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            i += 1;
            positional.extend(argv[i..].iter().cloned());
            break;
        }

        // Non-flag argument.
        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        // Flag argument: iterate over characters after the leading `-`.
        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,

                // Flags taking a value: -x<value> or -x <value>
                c @ ('s' | 'L' | 'n') => {
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{c} requires an argument"));
                    };
                    match c {
                        's' => {
                            let seed = value.parse().map_err(|_| format!("invalid seed: {value}"))?;
                            args.seed = Some(seed);
                        }
                        'n' => {
                            let max = value
                                .parse()
                                .map_err(|_| format!("invalid cycle count: {value}"))?;
                            args.max_cycles = Some(max);
                        }
                        _ => args.pool_dir = Some(PathBuf::from(value)),
                    }
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    args.file = positional.next().map(PathBuf::from).ok_or("missing experiment file")?;
    args.loop_name = positional.next();
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    Ok(args)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
