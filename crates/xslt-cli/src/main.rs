//! Command-line front end for the transform engine: `xslt transform` runs a stylesheet
//! against an input document, `xslt check` parses a stylesheet and reports syntax
//! errors without running it.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use xslt_core::fetch::FileFetcher;
use xslt_core::{xml, Options, ParamMap};

#[derive(Parser)]
#[command(name = "xslt", about = "A tree-walking XSLT 1.0 transform engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Reject references to undeclared variables instead of treating them as empty.
    #[arg(long, global = true)]
    strict: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a stylesheet against an input document and print the result.
    Transform {
        /// Path to the XSLT stylesheet.
        stylesheet: PathBuf,
        /// Path to the XML input document.
        input: PathBuf,
        /// Write the result to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// A `name=value` top-level stylesheet parameter; may be repeated.
        #[arg(short = 'p', long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },
    /// Parse a stylesheet and report whether it is well-formed XML.
    Check { stylesheet: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Transform { stylesheet, input, output, params } => {
            let stylesheet_text = std::fs::read_to_string(&stylesheet)?;
            let input_text = std::fs::read_to_string(&input)?;
            let param_map = parse_params(&params)?;
            let options = Options {
                strict: cli.strict,
                transform_url: Some(stylesheet.to_string_lossy().into_owned()),
                input_url: Some(input.to_string_lossy().into_owned()),
                ..Default::default()
            };
            let fetcher = FileFetcher::new(base_dir(&stylesheet));
            let result = xslt_core::transform(&input_text, &stylesheet_text, &param_map, &options, &fetcher)?;
            match output {
                Some(path) => std::fs::write(path, result)?,
                None => print!("{}", result),
            }
            Ok(())
        }
        Command::Check { stylesheet } => {
            let text = std::fs::read_to_string(&stylesheet)?;
            xml::parse_document(&text)?;
            println!("{}: well-formed", stylesheet.display());
            Ok(())
        }
    }
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| PathBuf::from("."))
}

fn parse_params(raw: &[String]) -> Result<ParamMap, Box<dyn std::error::Error>> {
    let mut map = ParamMap::new();
    for entry in raw {
        let (name, value) = entry.split_once('=').ok_or_else(|| format!("invalid --param '{}', expected NAME=VALUE", entry))?;
        map.set(name.to_string(), value.to_string());
    }
    Ok(map)
}
