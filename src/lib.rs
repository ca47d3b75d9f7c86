pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod manifest;
pub mod scanner;
pub mod sheet;
pub mod style;
pub mod styled;
pub mod theme;
pub mod utils;
pub mod value;
pub mod variants;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use engine::{CompiledStyle, GlobalStyle, Keyframes, StyleEngine};
pub use error::StyleError;
pub use sheet::{SheetGroup, SheetInjector};
pub use style::{StyleNode, StyleValue};
pub use styled::{RenderedElement, StyledComponent};
pub use theme::{ScaleMap, Theme, Token};
pub use utils::Utility;
pub use variants::{VariantSelection, VariantValue};

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

const OUTPUT_HEADER: &str = "/*! generated by ironstyle */";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scan {
        inputs: Vec<String>,
        ignore: Vec<String>,
    },
    Build {
        inputs: Vec<String>,
        options: BuildOptions,
    },
    Watch {
        inputs: Vec<String>,
        options: BuildOptions,
        poll: bool,
        poll_interval_ms: u64,
    },
    Help,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub out: Option<String>,
    pub classes: Option<String>,
    pub minify: bool,
    pub config: Option<String>,
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CliError {
    pub message: String,
}

impl CliError {
    fn from_display(err: impl std::fmt::Display) -> Self {
        CliError {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub files: usize,
    pub styles: usize,
    pub renders: usize,
    pub rules: usize,
}

pub fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Scan { inputs, ignore } => run_scan(inputs, ignore),
        Command::Build { inputs, options } => run_build(&inputs, &options).map(|_| ()),
        Command::Watch {
            inputs,
            options,
            poll,
            poll_interval_ms,
        } => run_watch(inputs, options, poll, poll_interval_ms),
        Command::Help => {
            print_help();
            Ok(())
        }
    }
}

pub fn run_from_env() -> Result<(), CliError> {
    let command = parse_args(env::args().skip(1))?;
    run(command)
}

pub fn parse_args<I>(args: I) -> Result<Command, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut iter = args.into_iter();
    let Some(cmd) = iter.next() else {
        return Ok(Command::Help);
    };

    match cmd.as_str() {
        "scan" => parse_scan_args(iter.collect()),
        "build" => parse_build_args(iter.collect()),
        "watch" => parse_watch_args(iter.collect()),
        "-h" | "--help" | "help" => Ok(Command::Help),
        _ => Err(CliError {
            message: format!("unknown command: {}", cmd),
        }),
    }
}

fn parse_build_args(args: Vec<String>) -> Result<Command, CliError> {
    let parsed = parse_build_flags("build", args, false)?;
    Ok(Command::Build {
        inputs: parsed.inputs,
        options: parsed.options,
    })
}

fn parse_watch_args(args: Vec<String>) -> Result<Command, CliError> {
    let parsed = parse_build_flags("watch", args, true)?;
    Ok(Command::Watch {
        inputs: parsed.inputs,
        options: parsed.options,
        poll: parsed.poll,
        poll_interval_ms: parsed.poll_interval_ms,
    })
}

struct ParsedBuildFlags {
    inputs: Vec<String>,
    options: BuildOptions,
    poll: bool,
    poll_interval_ms: u64,
}

fn parse_build_flags(command: &str, args: Vec<String>, watch: bool) -> Result<ParsedBuildFlags, CliError> {
    let mut parsed = ParsedBuildFlags {
        inputs: Vec::new(),
        options: BuildOptions::default(),
        poll: false,
        poll_interval_ms: 500,
    };
    let mut idx = 0;

    while idx < args.len() {
        match args[idx].as_str() {
            "--out" | "--output" | "-o" => {
                parsed.options.out = Some(flag_value(command, &args, &mut idx, "--output")?);
            }
            "--classes" => {
                parsed.options.classes = Some(flag_value(command, &args, &mut idx, "--classes")?);
            }
            "--config" | "-c" => {
                parsed.options.config = Some(flag_value(command, &args, &mut idx, "--config")?);
            }
            "--ignore" | "-I" => {
                let value = flag_value(command, &args, &mut idx, "--ignore")?;
                parsed.options.ignore.push(value);
            }
            "--minify" => {
                parsed.options.minify = true;
            }
            "--poll" if watch => {
                parsed.poll = true;
            }
            "--poll-interval" if watch => {
                let value = flag_value(command, &args, &mut idx, "--poll-interval")?;
                parsed.poll = true;
                parsed.poll_interval_ms = parse_u64_arg(&value, "--poll-interval")?;
            }
            "--poll" | "--poll-interval" => {
                return Err(CliError {
                    message: "--poll is only supported with watch".to_string(),
                });
            }
            value => {
                parsed.inputs.push(value.to_string());
            }
        }
        idx += 1;
    }

    if parsed.inputs.is_empty() {
        return Err(CliError {
            message: format!("{} requires at least one path or glob pattern", command),
        });
    }

    Ok(parsed)
}

fn flag_value(command: &str, args: &[String], idx: &mut usize, flag: &str) -> Result<String, CliError> {
    *idx += 1;
    args.get(*idx).cloned().ok_or_else(|| CliError {
        message: format!("{} requires a value for {}", command, flag),
    })
}

fn parse_scan_args(args: Vec<String>) -> Result<Command, CliError> {
    let mut inputs = Vec::new();
    let mut ignore = Vec::new();
    let mut idx = 0;

    while idx < args.len() {
        match args[idx].as_str() {
            "--ignore" | "-i" | "-I" => {
                ignore.push(flag_value("scan", &args, &mut idx, "--ignore")?);
            }
            value => {
                inputs.push(value.to_string());
            }
        }
        idx += 1;
    }

    if inputs.is_empty() {
        return Err(CliError {
            message: "scan requires at least one path or glob pattern".to_string(),
        });
    }

    Ok(Command::Scan { inputs, ignore })
}

fn run_scan(inputs: Vec<String>, ignore: Vec<String>) -> Result<(), CliError> {
    let result = scanner::scan_globs_with_ignore(&inputs, &ignore).map_err(CliError::from_display)?;

    for file in &result.files {
        println!("{}", file.display());
    }

    info!(files = result.files_scanned, "scan complete");
    Ok(())
}

/// Compiles every manifest matched by `inputs` into one stylesheet.
pub fn run_build(inputs: &[String], options: &BuildOptions) -> Result<BuildSummary, CliError> {
    let config = match options.config.as_deref() {
        Some(path) => config::load(Path::new(path)).map_err(CliError::from_display)?,
        None => Config::default(),
    };
    let engine = StyleEngine::new(config);

    let files = collect_manifests(inputs, options)?;
    let mut class_map = manifest::ClassMap::default();
    let mut summary = BuildSummary {
        files: files.len(),
        styles: 0,
        renders: 0,
        rules: 0,
    };
    for path in &files {
        let stats = manifest::compile_manifest(&engine, path, &mut class_map).map_err(CliError::from_display)?;
        summary.styles += stats.styles;
        summary.renders += stats.renders;
    }
    summary.rules = engine.rule_count();

    let css = render_stylesheet(&engine.get_css_text(), options.minify);
    match options.out.as_deref() {
        Some(out) => write_output(Path::new(out), &css)?,
        None => print!("{}", css),
    }
    if let Some(classes) = options.classes.as_deref() {
        let json = serde_json::to_string_pretty(&class_map).map_err(CliError::from_display)?;
        write_output(Path::new(classes), &format!("{}\n", json))?;
    }

    info!(
        files = summary.files,
        styles = summary.styles,
        renders = summary.renders,
        rules = summary.rules,
        "build complete"
    );
    Ok(summary)
}

/// Existing paths are scanned directly; everything else is treated as a glob.
fn collect_manifests(inputs: &[String], options: &BuildOptions) -> Result<Vec<PathBuf>, CliError> {
    let (paths, patterns): (Vec<&String>, Vec<&String>) = inputs
        .iter()
        .partition(|input| !is_glob(input) && Path::new(input.as_str()).exists());

    let mut ignore = options.ignore.clone();
    ignore.extend(options.out.iter().cloned());
    ignore.extend(options.classes.iter().cloned());

    let mut files = std::collections::BTreeSet::new();
    if !patterns.is_empty() {
        let patterns = patterns.into_iter().cloned().collect::<Vec<_>>();
        let result = scanner::scan_globs_with_ignore(&patterns, &ignore).map_err(CliError::from_display)?;
        files.extend(result.files);
    }
    if !paths.is_empty() {
        let paths = paths.into_iter().map(PathBuf::from).collect::<Vec<_>>();
        let result = scanner::scan(&paths).map_err(CliError::from_display)?;
        let ignore_set = build_globset(&options.ignore)?;
        let outputs = [options.out.as_deref(), options.classes.as_deref()]
            .into_iter()
            .flatten()
            .map(|path| fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path)))
            .collect::<Vec<_>>();
        files.extend(result.files.into_iter().filter(|file| {
            let canonical = fs::canonicalize(file).unwrap_or_else(|_| file.clone());
            !ignore_set.is_match(file) && !outputs.contains(&canonical)
        }));
    }

    Ok(files.into_iter().collect())
}

fn is_glob(input: &str) -> bool {
    input.contains(['*', '?', '[', '{'])
}

fn render_stylesheet(css: &str, minify: bool) -> String {
    if minify {
        format!("{}{}\n", OUTPUT_HEADER, css)
    } else {
        format!("{}\n{}", OUTPUT_HEADER, generator::pretty_css(css))
    }
}

fn write_output(path: &Path, contents: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| CliError {
            message: format!("failed to create directory {}: {}", parent.display(), err),
        })?;
    }
    fs::write(path, contents).map_err(|err| CliError {
        message: format!("failed to write {}: {}", path.display(), err),
    })
}

fn print_help() {
    println!("ironstyle");
    println!();
    println!("USAGE:");
    println!("  ironstyle scan [--ignore <glob>] <glob...>");
    println!(
        "  ironstyle build [--output <path>] [--classes <path>] [--minify] [--config <path>] [--ignore <glob>] <glob...>"
    );
    println!(
        "  ironstyle watch [--output <path>] [--classes <path>] [--minify] [--config <path>] [--ignore <glob>] [--poll] [--poll-interval <ms>] <glob...>"
    );
    println!();
    println!("EXAMPLES:");
    println!("  ironstyle scan \"styles/**/*.json\"");
    println!("  ironstyle build --output dist/app.css --classes dist/classes.json \"styles/**/*.json\"");
    println!("  ironstyle build -c ironstyle.toml --minify \"styles/**/*.json\"");
    println!("  ironstyle watch --poll --poll-interval 250 -o dist/app.css \"styles/**/*.json\"");
}

fn run_watch(inputs: Vec<String>, options: BuildOptions, poll: bool, poll_interval_ms: u64) -> Result<(), CliError> {
    run_build(&inputs, &options)?;
    let (tx, rx) = channel();
    let mut ignore = options.ignore.clone();
    ignore.extend(options.out.iter().cloned());
    ignore.extend(options.classes.iter().cloned());
    let ignore_set = build_globset(&ignore).ok();
    let mut watcher: Box<dyn notify::Watcher> = if poll {
        Box::new(
            notify::PollWatcher::new(
                tx,
                notify::Config::default().with_poll_interval(Duration::from_millis(poll_interval_ms)),
            )
            .map_err(|err| CliError {
                message: format!("failed to start poll watcher: {}", err),
            })?,
        )
    } else {
        Box::new(notify::recommended_watcher(tx).map_err(|err| CliError {
            message: format!("failed to start watcher: {}", err),
        })?)
    };

    for root in watch_roots_for_build(&inputs, options.config.as_deref()) {
        watcher
            .watch(&root, notify::RecursiveMode::Recursive)
            .map_err(|err| CliError {
                message: format!("failed to watch {}: {}", root.display(), err),
            })?;
    }

    info!(poll, "watching for changes (press Ctrl+C to stop)");

    let mut last_event = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event_result) => {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "watch error");
                        continue;
                    }
                };
                if should_ignore_event(&event, ignore_set.as_ref()) {
                    continue;
                }
                if last_event.elapsed() < Duration::from_millis(200) {
                    continue;
                }
                last_event = Instant::now();
                info!("change detected, rebuilding");
                if let Err(err) = run_build(&inputs, &options) {
                    warn!(error = %err, "build failed");
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(_) => break,
        }
    }

    Ok(())
}

fn watch_roots_for_build(patterns: &[String], config: Option<&str>) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for pattern in patterns.iter().map(String::as_str).chain(config) {
        let root = glob_root(pattern);
        let normalized = if root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            root
        };
        if seen.insert(normalized.clone()) {
            roots.push(normalized);
        }
    }

    roots
}

fn glob_root(pattern: &str) -> PathBuf {
    let first_meta = pattern.find(['*', '?', '[', '{']);

    let Some(first_meta) = first_meta else {
        if pattern.ends_with('/') || pattern.ends_with('\\') {
            return PathBuf::from(pattern);
        }
        let path = Path::new(pattern);
        if path.extension().is_some() {
            return path.parent().unwrap_or(Path::new(".")).to_path_buf();
        }
        return path.to_path_buf();
    };

    let prefix = &pattern[..first_meta];
    match prefix.rfind(['/', '\\']) {
        Some(0) => PathBuf::from(&prefix[..1]),
        Some(idx) => PathBuf::from(&prefix[..idx]),
        None => PathBuf::from("."),
    }
}

fn parse_u64_arg(value: &str, flag: &str) -> Result<u64, CliError> {
    value.parse::<u64>().map_err(|_| CliError {
        message: format!("{} requires a positive integer, got '{}'", flag, value),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, CliError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| CliError {
            message: format!("invalid glob pattern '{}': {}", pattern, err),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| CliError {
        message: format!("failed to build ignore glob set: {}", err),
    })
}

fn should_ignore_event(event: &notify::Event, ignore_set: Option<&GlobSet>) -> bool {
    let Some(ignore_set) = ignore_set else {
        return false;
    };
    if event.paths.is_empty() {
        return false;
    }
    event.paths.iter().all(|path| ignore_set.is_match(path))
}

#[cfg(test)]
mod tests {
    use super::{
        BuildOptions, BuildSummary, Command, glob_root, parse_args, render_stylesheet, run_build,
        watch_roots_for_build,
    };
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_build_flags() {
        let command = parse_args(args(&[
            "build",
            "--output",
            "dist/app.css",
            "--classes",
            "dist/classes.json",
            "-c",
            "ironstyle.toml",
            "--minify",
            "-I",
            "**/fixtures/**",
            "styles/**/*.json",
        ]))
        .expect("build args should parse");

        assert_eq!(
            command,
            Command::Build {
                inputs: vec!["styles/**/*.json".to_string()],
                options: BuildOptions {
                    out: Some("dist/app.css".to_string()),
                    classes: Some("dist/classes.json".to_string()),
                    minify: true,
                    config: Some("ironstyle.toml".to_string()),
                    ignore: vec!["**/fixtures/**".to_string()],
                },
            }
        );
    }

    #[test]
    fn parses_watch_poll_flags() {
        let command = parse_args(args(&["watch", "--poll-interval", "250", "styles/*.json"]))
            .expect("watch args should parse");
        assert_eq!(
            command,
            Command::Watch {
                inputs: vec!["styles/*.json".to_string()],
                options: BuildOptions::default(),
                poll: true,
                poll_interval_ms: 250,
            }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(args(&["build", "--poll", "a.json"])).is_err());
        assert!(parse_args(args(&["build"])).is_err());
        assert!(parse_args(args(&["build", "--output"])).is_err());
        assert!(parse_args(args(&["watch", "--poll-interval", "soon", "a.json"])).is_err());
        assert!(parse_args(args(&["compile"])).is_err());
        assert_eq!(parse_args(Vec::new()).unwrap(), Command::Help);
    }

    #[test]
    fn computes_watch_roots() {
        assert_eq!(glob_root("styles/**/*.json"), PathBuf::from("styles"));
        assert_eq!(glob_root("styles/button*.json"), PathBuf::from("styles"));
        assert_eq!(glob_root("*.json"), PathBuf::from("."));
        assert_eq!(glob_root("styles/app.json"), PathBuf::from("styles"));
        assert_eq!(
            watch_roots_for_build(&args(&["styles/**/*.json", "styles/*.json"]), Some("ironstyle.toml")),
            vec![PathBuf::from("styles"), PathBuf::from(".")]
        );
    }

    #[test]
    fn renders_minified_and_pretty_output() {
        assert_eq!(
            render_stylesheet(".c-0{color:red}", true),
            "/*! generated by ironstyle */.c-0{color:red}\n"
        );
        assert_eq!(
            render_stylesheet(".c-0{color:red}", false),
            "/*! generated by ironstyle */\n.c-0 {\n  color: red;\n}\n"
        );
    }

    #[test]
    fn builds_stylesheet_and_class_map_from_a_directory() {
        let base = temp_dir("ironstyle_build");
        fs::create_dir_all(&base).unwrap();
        fs::write(
            base.join("box.json"),
            r#"{ "styles": { "box": { "style": { "color": "red" } } } }"#,
        )
        .unwrap();
        let out = base.join("dist/app.css");
        let classes = base.join("classes.json");
        let options = BuildOptions {
            out: Some(out.display().to_string()),
            classes: Some(classes.display().to_string()),
            ..BuildOptions::default()
        };
        let inputs = vec![base.display().to_string()];

        let first = run_build(&inputs, &options).unwrap();
        let second = run_build(&inputs, &options).unwrap();
        let expected = BuildSummary {
            files: 1,
            styles: 1,
            renders: 1,
            rules: 1,
        };
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "/*! generated by ironstyle */\n.c-0 {\n  color: red;\n}\n"
        );
        let class_map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&classes).unwrap()).unwrap();
        assert_eq!(
            class_map["styles"]["box"][0],
            serde_json::json!({ "element": "div", "class_name": "c-0" })
        );
        let _ = fs::remove_dir_all(&base);
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}", prefix, nanos))
    }
}
