//! Reads a crash report (possibly wrapped in the compressed envelope),
//! symbolicates every stack frame against the matching debug-symbol
//! archive, and writes the report back out as pretty-printed JSON.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use xplcrash_report::{envelope, CrashReport};
use xplcrash_symbolicate::{
    annotate_report, AnnotateOptions, ArchiveSource, SearchConfig, SymbolizerRegistry, ToolConfig,
    BUILD_PLACEHOLDER,
};

fn read_input(matches: &ArgMatches) -> Result<Vec<u8>> {
    match matches.get_one::<PathBuf>("input") {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut data = Vec::new();
            io::stdin()
                .read_to_end(&mut data)
                .context("failed to read crash report from standard input")?;
            Ok(data)
        }
    }
}

fn write_output(matches: &ArgMatches, json: &[u8]) -> Result<()> {
    match matches.get_one::<PathBuf>("output") {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(json)
                .and_then(|_| stdout.write_all(b"\n"))
                .context("failed to write to standard output")
        }
    }
}

fn archive_source(matches: &ArgMatches) -> Result<ArchiveSource> {
    let placeholder = matches
        .get_one::<String>("placeholder")
        .cloned()
        .unwrap_or_else(|| BUILD_PLACEHOLDER.to_owned());

    if let Some(pattern) = matches.get_one::<String>("symbols") {
        if !pattern.contains(&placeholder) {
            bail!("symbol path must contain the placeholder {placeholder}");
        }
        return Ok(ArchiveSource::Direct {
            path_pattern: pattern.clone(),
            placeholder,
        });
    }

    let roots: Vec<PathBuf> = matches
        .get_many::<PathBuf>("search-root")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    match matches.get_one::<String>("archive-pattern") {
        Some(pattern) if !roots.is_empty() => {
            if !pattern.contains(&placeholder) {
                bail!("archive pattern must contain the placeholder {placeholder}");
            }
            Ok(ArchiveSource::Search(SearchConfig {
                roots,
                archive_pattern: pattern.clone(),
                placeholder,
            }))
        }
        _ => bail!("either --symbols or --search-root with --archive-pattern is required"),
    }
}

fn tool_config(matches: &ArgMatches) -> ToolConfig {
    let mut tools = ToolConfig::default();
    if let Some(path) = matches.get_one::<PathBuf>("dwarfdump") {
        tools.dwarfdump = path.clone();
    }
    if let Some(path) = matches.get_one::<PathBuf>("atos") {
        tools.atos = path.clone();
    }
    if let Some(path) = matches.get_one::<PathBuf>("unzip") {
        tools.unzip = path.clone();
    }
    if let Some(&seconds) = matches.get_one::<u64>("tool-timeout") {
        tools.timeout = Duration::from_secs(seconds);
    }
    tools
}

fn execute(matches: &ArgMatches) -> Result<()> {
    let data = read_input(matches)?;
    let raw = envelope::decompress(&data).context("failed to unwrap crash report envelope")?;
    let mut report: CrashReport =
        serde_json::from_slice(&raw).context("failed to parse crash report")?;

    let tools = tool_config(matches);
    tools.verify().context("external tools not available")?;

    let registry = SymbolizerRegistry::new(archive_source(matches)?, tools);
    let symbolizer = registry
        .symbolizer_for(&report)
        .context("failed to create symbolizer")?;

    let options = AnnotateOptions {
        ip_decrement: matches.get_one::<u64>("ip-decrement").copied().unwrap_or(0),
    };
    annotate_report(&mut report, symbolizer.as_ref(), options)
        .context("failed to symbolicate crash report")?;

    let json = serde_json::to_vec_pretty(&report).context("failed to serialize crash report")?;
    write_output(matches, &json)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let matches = Command::new("xplcrash2json")
        .about("Symbolicates a crash report and dumps it as JSON")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the crash report. Reads standard input when omitted."),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Output path for the JSON dump. Writes standard output when omitted."),
        )
        .arg(
            Arg::new("symbols")
                .short('s')
                .long("symbols")
                .help("Path pattern of the dSYM bundle or DWARF binary, containing the build placeholder. Skips the archive search."),
        )
        .arg(
            Arg::new("search-root")
                .long("search-root")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Directory to search for debug-symbol archives. May be given multiple times."),
        )
        .arg(
            Arg::new("archive-pattern")
                .long("archive-pattern")
                .help("Expected archive file name containing the build placeholder, such as MyApp-$BUILD.xcarchive.zip."),
        )
        .arg(
            Arg::new("placeholder")
                .short('p')
                .long("placeholder")
                .default_value(BUILD_PLACEHOLDER)
                .help("Placeholder token substituted with the report's build number."),
        )
        .arg(
            Arg::new("ip-decrement")
                .long("ip-decrement")
                .value_parser(value_parser!(u64))
                .default_value("0")
                .help("Subtracted from every non-zero instruction pointer before lookup; return addresses point past the call site."),
        )
        .arg(
            Arg::new("dwarfdump")
                .long("dwarfdump")
                .value_parser(value_parser!(PathBuf))
                .help("Path of the architecture-dump tool."),
        )
        .arg(
            Arg::new("atos")
                .long("atos")
                .value_parser(value_parser!(PathBuf))
                .help("Path of the address-resolver tool."),
        )
        .arg(
            Arg::new("unzip")
                .long("unzip")
                .value_parser(value_parser!(PathBuf))
                .help("Path of the archive-extraction tool."),
        )
        .arg(
            Arg::new("tool-timeout")
                .long("tool-timeout")
                .value_parser(value_parser!(u64))
                .default_value("30")
                .help("Timeout in seconds for a single external-tool invocation."),
        )
        .get_matches();

    execute(&matches)
}
