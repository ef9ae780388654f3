#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # cpre CLI
//!
//! A command-line interface for the cpre C/C++ preprocessor library.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use cpre::{Dialect, Diagnostic, PreprocessorConfig, SearchRule, Severity};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exit codes for different error conditions
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const IO_ERROR: i32 = 2;
    pub const PREPROCESS_ERROR: i32 = 3;
    #[allow(dead_code)]
    pub const ARGUMENT_ERROR: i32 = 4;
}

/// Command-line interface for the cpre C/C++ preprocessor
#[derive(Parser)]
#[command(
    name = "cpre",
    version,
    author,
    about = "A C/C++ preprocessor in Rust",
    long_about = "cpre is a standards-conforming C/C++ preprocessor supporting the C90, C99 \
and C++ dialects as well as the K&R and pre-Standard ones, with macro expansion, conditional \
compilation, include resolution, and dialect-keyed translation limits.",
    after_help = "EXAMPLES:
  # Preprocess a single file
  $ cpre input.c -o output.i

  # Preprocess as C90 with portability warnings
  $ cpre input.c --std c90 -W 5

  # Preprocess with custom include directories
  $ cpre input.c -I include -I /usr/include -o output.i

  # Read from stdin and write to stdout
  $ cat input.c | cpre - | gcc -x c -

  # Predefine and undefine macros
  $ cpre input.c -D DEBUG=1 -D 'MAX(a,b)=((a)>(b)?(a):(b))' -U NDEBUG

  # Write a make dependency rule alongside the output
  $ cpre input.c -o output.i --deps deps.mk"
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Input file to preprocess (use '-' for stdin)
    #[arg(help = "Input C/C++ file to preprocess (use '-' for stdin)")]
    input: PathBuf,

    /// Output file (use '-' for stdout, default: stdout)
    #[arg(
        short = 'o',
        long,
        help = "Output file (use '-' for stdout, default: stdout)"
    )]
    output: Option<PathBuf>,

    /// Language dialect
    #[arg(
        long = "std",
        value_enum,
        default_value = "c99",
        help = "Language dialect driving directives, predefines, and limits"
    )]
    std: DialectValue,

    /// Add include directory
    #[arg(
        short = 'I',
        long = "include",
        value_name = "DIR",
        help = "Add directory to include search path"
    )]
    include_dirs: Vec<PathBuf>,

    /// Define a macro
    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME[=VALUE]",
        help = "Predefine NAME as VALUE (default 1); NAME may carry a parameter list"
    )]
    defines: Vec<String>,

    /// Undefine a macro
    #[arg(
        short = 'U',
        long = "undef",
        value_name = "NAME",
        help = "Undefine NAME before processing starts"
    )]
    undefs: Vec<String>,

    /// Search policy for quoted includes
    #[arg(
        long,
        value_enum,
        default_value = "current",
        help = "Where quoted includes look before the search path"
    )]
    search_rule: SearchRuleValue,

    /// Warning level bitmask
    #[arg(
        short = 'W',
        long,
        default_value = "1",
        help = "Warning-class bitmask (1 common, 2 verbose, 4 portability, 8 obsolescent, 16 style)"
    )]
    warn_level: u32,

    /// Keep comments in the output
    #[arg(short = 'C', long, help = "Keep comments instead of replacing them with a space")]
    keep_comments: bool,

    /// Emit #line markers
    #[arg(long, help = "Emit #line re-synchronization markers in the output")]
    line_markers: bool,

    /// Force trigraph recognition on
    #[arg(long, help = "Recognize trigraphs regardless of dialect default")]
    trigraphs: bool,

    /// Force trigraph recognition off
    #[arg(long, conflicts_with = "trigraphs", help = "Ignore trigraphs regardless of dialect default")]
    no_trigraphs: bool,

    /// Maximum recursion depth for macro expansion
    #[arg(
        long,
        default_value = "128",
        help = "Maximum recursion depth for macro expansion"
    )]
    recursion_limit: usize,

    /// Write a make-style dependency rule
    #[arg(
        long,
        value_name = "FILE",
        help = "Write a make dependency rule for the touched includes to FILE"
    )]
    deps: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, help = "Output preprocessing result in JSON format")]
    #[cfg(feature = "json")]
    json: bool,

    /// Enable verbose output
    #[arg(
        short = 'v',
        long,
        help = "Enable verbose output with diagnostic information"
    )]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short = 'q', long, help = "Suppress non-error output (quiet mode)")]
    quiet: bool,

    /// Show what would happen without preprocessing
    #[arg(
        short = 'n',
        long,
        help = "Show what would happen without actually preprocessing"
    )]
    dry_run: bool,

    /// Disable colored output
    #[arg(long, help = "Disable colored output")]
    no_color: bool,

    /// Force colored output
    #[arg(long, help = "Force colored output even when not a terminal")]
    force_color: bool,
}

/// Language dialect values for CLI
#[derive(Clone, Copy, Debug, ValueEnum)]
enum DialectValue {
    #[clap(name = "kr")]
    KAndR,
    #[clap(name = "pre-std")]
    PreStandard,
    C90,
    C99,
    #[clap(name = "post-std")]
    PostStandard,
    #[clap(name = "c++")]
    Cplusplus,
}

impl From<DialectValue> for Dialect {
    fn from(value: DialectValue) -> Self {
        match value {
            DialectValue::KAndR => Dialect::KAndR,
            DialectValue::PreStandard => Dialect::PreStandard,
            DialectValue::C90 => Dialect::C90,
            DialectValue::C99 => Dialect::C99,
            DialectValue::PostStandard => Dialect::PostStandard,
            DialectValue::Cplusplus => Dialect::Cplusplus,
        }
    }
}

/// Quoted-include search policy values for CLI
#[derive(Clone, Copy, Debug, ValueEnum)]
enum SearchRuleValue {
    Current,
    Source,
    Both,
}

impl From<SearchRuleValue> for SearchRule {
    fn from(value: SearchRuleValue) -> Self {
        match value {
            SearchRuleValue::Current => SearchRule::Current,
            SearchRuleValue::Source => SearchRule::Source,
            SearchRuleValue::Both => SearchRule::Both,
        }
    }
}

/// Global flag to track whether any error diagnostic was reported
static ERRORS_OCCURRED: AtomicBool = AtomicBool::new(false);

/// Main application entry point
fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(_) => {
            if ERRORS_OCCURRED.load(Ordering::Relaxed) {
                exit_code::PREPROCESS_ERROR
            } else {
                exit_code::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            determine_exit_code(&e)
        }
    });
}

/// Determine the appropriate exit code based on the error
fn determine_exit_code(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<std::io::Error>().is_some() {
        exit_code::IO_ERROR
    } else if let Some(pe) = error.downcast_ref::<cpre::PreprocessError>() {
        match pe {
            cpre::PreprocessError::Io(_) => exit_code::IO_ERROR,
            _ => exit_code::PREPROCESS_ERROR,
        }
    } else {
        exit_code::GENERAL_ERROR
    }
}

/// Run the main application logic
fn run() -> Result<()> {
    let cli = Cli::parse();

    validate_args(&cli)?;
    setup_colors(&cli);

    if cli.dry_run {
        show_dry_run_info(&cli);
        return Ok(());
    }

    let input_content = read_input(&cli.input)?;
    let config = create_config(&cli);

    let start_time = std::time::Instant::now();
    let mut preprocessor = cpre::Preprocessor::with_config(config);
    preprocessor.set_current_file(format_input(&cli.input));
    let processed_output = preprocessor
        .process(&input_content)
        .with_context(|| format!("failed to preprocess {}", format_input(&cli.input)))?;
    let processing_time = start_time.elapsed();

    if preprocessor.error_count() > 0 {
        ERRORS_OCCURRED.store(true, Ordering::Relaxed);
    }

    write_output(&cli, &preprocessor, &processed_output, processing_time)?;

    if let Some(deps_path) = &cli.deps {
        write_deps_rule(&cli, deps_path, preprocessor.dependencies())?;
    }

    if cli.verbose && !cli.quiet {
        show_verbose_info(&cli, &preprocessor, processing_time);
    }

    Ok(())
}

/// Validate command-line arguments
fn validate_args(cli: &Cli) -> Result<()> {
    if let Some(output) = &cli.output
        && output != &PathBuf::from("-")
        && std::fs::canonicalize(output).ok() == std::fs::canonicalize(&cli.input).ok()
    {
        return Err(anyhow::anyhow!(
            "Input and output files cannot be the same: {}",
            output.display()
        ));
    }

    if cli.recursion_limit == 0 {
        return Err(anyhow::anyhow!("Recursion limit must be greater than 0"));
    }

    Ok(())
}

/// Apply the color flags, defaulting to color only on a terminal
fn setup_colors(cli: &Cli) {
    if cli.no_color {
        colored::control::set_override(false);
    } else if cli.force_color {
        colored::control::set_override(true);
    } else if !atty::is(atty::Stream::Stderr) {
        colored::control::set_override(false);
    }
}

/// Show dry run information
fn show_dry_run_info(cli: &Cli) {
    let input_display = format_input(&cli.input);
    let output_display = cli
        .output
        .as_ref()
        .map_or("stdout".to_string(), format_output);

    eprintln!("Dry run: would preprocess {input_display} -> {output_display}");
    eprintln!("Dialect: {}", format_dialect(cli.std));
    eprintln!("Search rule: {:?}", cli.search_rule);
    eprintln!("Warning level: {}", cli.warn_level);
    eprintln!("Recursion limit: {}", cli.recursion_limit);

    if !cli.include_dirs.is_empty() {
        eprintln!("Include directories:");
        for dir in &cli.include_dirs {
            eprintln!("  {}", dir.display());
        }
    }
    if !cli.defines.is_empty() {
        eprintln!("Defines:");
        for def in &cli.defines {
            eprintln!("  {def}");
        }
    }
}

/// Create preprocessor configuration from CLI arguments
fn create_config(cli: &Cli) -> PreprocessorConfig {
    let mut config = PreprocessorConfig::for_dialect(cli.std.into())
        .with_search_rule(cli.search_rule.into())
        .with_warn_level(cli.warn_level)
        .with_keep_comments(cli.keep_comments)
        .with_line_markers(cli.line_markers)
        .with_diagnostic_handler(print_diagnostic);
    config.recursion_limit = cli.recursion_limit;
    config.include_dirs = cli.include_dirs.clone();

    if cli.trigraphs {
        config = config.with_trigraphs(true);
    } else if cli.no_trigraphs {
        config = config.with_trigraphs(false);
    }

    for define in &cli.defines {
        let (signature, body) = match define.split_once('=') {
            Some((sig, body)) => (sig.to_string(), body.to_string()),
            None => (define.clone(), "1".to_string()),
        };
        config = config.with_define(signature, body);
    }
    for name in &cli.undefs {
        config = config.with_undefine(name.clone());
    }
    config
}

/// Print a diagnostic to stderr as it is emitted
fn print_diagnostic(diag: &Diagnostic) {
    let severity = match diag.severity {
        Severity::Warning => "warning:".yellow().bold(),
        Severity::Error => "error:".red().bold(),
        Severity::Fatal => "fatal error:".red().bold(),
    };
    eprintln!(
        "{}:{}: {severity} {}",
        diag.file, diag.line, diag.message
    );
}

/// Read input from file or stdin
fn read_input(input_path: &PathBuf) -> Result<String> {
    if input_path == &PathBuf::from("-") {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input_path)
            .with_context(|| format!("Failed to read input file: {}", input_path.display()))
    }
}

/// Write output to file or stdout
fn write_output(
    cli: &Cli,
    preprocessor: &cpre::Preprocessor,
    content: &str,
    processing_time: std::time::Duration,
) -> Result<()> {
    #[cfg(feature = "json")]
    if cli.json {
        return write_json_output(cli, preprocessor, content, processing_time);
    }
    #[cfg(not(feature = "json"))]
    let _ = (preprocessor, processing_time);

    match &cli.output {
        Some(output_path) if output_path != &PathBuf::from("-") => {
            std::fs::write(output_path, content).with_context(|| {
                format!("Failed to write to output file: {}", output_path.display())
            })?;
        }
        _ => {
            print!("{content}");
        }
    }
    Ok(())
}

/// Write JSON output
#[cfg(feature = "json")]
fn write_json_output(
    cli: &Cli,
    preprocessor: &cpre::Preprocessor,
    content: &str,
    processing_time: std::time::Duration,
) -> Result<()> {
    use serde_json::json;

    let diagnostics: Vec<_> = preprocessor
        .diagnostics()
        .iter()
        .map(|d| {
            json!({
                "severity": d.severity.to_string(),
                "message": d.message,
                "file": d.file,
                "line": d.line,
            })
        })
        .collect();

    let result = json!({
        "success": preprocessor.error_count() == 0,
        "output": content,
        "input_file": format_input(&cli.input),
        "output_file": cli.output.as_ref().map(format_output),
        "dialect": format_dialect(cli.std),
        "include_dirs": cli.include_dirs.iter().map(|p| p.to_string_lossy().to_string()).collect::<Vec<_>>(),
        "diagnostics": diagnostics,
        "dependencies": preprocessor.dependencies().iter().map(|p| p.to_string_lossy().to_string()).collect::<Vec<_>>(),
        "processing_time_ms": processing_time.as_millis() as u64,
    });

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Write a make-style dependency rule for the files the run touched
fn write_deps_rule(cli: &Cli, deps_path: &PathBuf, dependencies: &[PathBuf]) -> Result<()> {
    let target = cli
        .output
        .as_ref()
        .filter(|p| *p != &PathBuf::from("-"))
        .map_or_else(
            || {
                let stem = cli.input.file_stem().unwrap_or_default();
                format!("{}.o", stem.to_string_lossy())
            },
            |p| p.display().to_string(),
        );

    let mut rule = format!("{target}: {}", format_input(&cli.input));
    for dep in dependencies {
        rule.push_str(" \\\n  ");
        rule.push_str(&dep.to_string_lossy());
    }
    rule.push('\n');

    std::fs::write(deps_path, rule)
        .with_context(|| format!("Failed to write dependency file: {}", deps_path.display()))
}

/// Show verbose information
fn show_verbose_info(cli: &Cli, preprocessor: &cpre::Preprocessor, time: std::time::Duration) {
    eprintln!("Dialect: {}", format_dialect(cli.std));
    eprintln!("Warning level: {}", cli.warn_level);
    eprintln!("Recursion limit: {}", cli.recursion_limit);
    eprintln!("Processing time: {time:?}");
    eprintln!(
        "Diagnostics: {} ({} error(s))",
        preprocessor.diagnostics().len(),
        preprocessor.error_count()
    );

    if !cli.include_dirs.is_empty() {
        eprintln!("Include directories ({}):", cli.include_dirs.len());
        for dir in &cli.include_dirs {
            eprintln!("  {}", dir.display());
        }
    }
    if !preprocessor.dependencies().is_empty() {
        eprintln!("Included files ({}):", preprocessor.dependencies().len());
        for dep in preprocessor.dependencies() {
            eprintln!("  {}", dep.display());
        }
    }

    let input_display = format_input(&cli.input);
    let output_display = cli
        .output
        .as_ref()
        .map_or("stdout".to_string(), format_output);
    eprintln!("Preprocessed {input_display} -> {output_display}");
}

/// Format input path for display
fn format_input(path: &PathBuf) -> String {
    if path == &PathBuf::from("-") {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

/// Format output path for display
fn format_output(path: &PathBuf) -> String {
    if path == &PathBuf::from("-") {
        "stdout".to_string()
    } else {
        path.display().to_string()
    }
}

/// Format dialect for display
fn format_dialect(dialect: DialectValue) -> String {
    match dialect {
        DialectValue::KAndR => "K&R".to_string(),
        DialectValue::PreStandard => "pre-Standard".to_string(),
        DialectValue::C90 => "C90".to_string(),
        DialectValue::C99 => "C99".to_string(),
        DialectValue::PostStandard => "post-Standard".to_string(),
        DialectValue::Cplusplus => "C++".to_string(),
    }
}
