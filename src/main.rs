// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Command-line interface for chatgpt-md.
//!
//! This binary provides the `chatgpt-md` command for converting a ChatGPT
//! data export (`conversations.json`, or the extracted export directory) to
//! one Markdown file per conversation.

mod assets;

use assets::{ASSETS_DIR, AssetIndex};
use chatgpt_md::content;
use chatgpt_md::conversation::{self, Conversation, RenderOrder};
use chatgpt_md::parser::{self, Role};
use chatgpt_md::renderer::{self, Flavor, FrontmatterField, FrontmatterFields, RenderedConversation};
use chrono::{DateTime, Utc};
use lexopt::prelude::*;
use rayon::prelude::*;
use snafu::{ensure, prelude::*};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// File name of the conversation list inside an export.
const EXPORT_FILE: &str = "conversations.json";

/// Where to write the rendered output.
#[derive(Clone)]
enum OutputTarget {
    /// Write each file to the specified directory.
    Directory(PathBuf),
    /// Write to stdout.
    Stdout,
}

#[allow(clippy::struct_excessive_bools)]
struct Cli {
    input: Vec<PathBuf>,
    output: OutputTarget,
    concat: bool,
    opts: renderer::RenderOptions,
    assets: Option<PathBuf>,
    canvas: bool,
    custom_instructions: bool,
    verbose: bool,
    quiet: bool,
    dry_run: bool,
    force: bool,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to parse arguments: {source}"))]
    ParseArgs { source: lexopt::Error },

    #[snafu(display("at least one export file or directory is required"))]
    NoInputFiles,

    #[snafu(display("no {EXPORT_FILE} found in {}", path.display()))]
    MissingExport { path: PathBuf },

    #[snafu(display("cannot output multiple conversations to stdout without --concat"))]
    MultipleConversationsToStdout,

    #[snafu(display("failed to create {}: {source}", path.display()))]
    CreateOutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse {}: {source}", path.display()))]
    ParseFile {
        path: PathBuf,
        source: parser::ParseError,
    },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to set modification time of {}: {source}", path.display()))]
    SetModified {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to copy asset to {}: {source}", path.display()))]
    CopyAsset {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to serialize custom instructions: {source}"))]
    SerializeInstructions { source: serde_json::Error },
}

fn print_help() {
    println!(
        "\
{name} {version}
Convert ChatGPT conversation exports to Markdown

Usage: {name} [OPTIONS] -o <OUTPUT> <INPUT>...

Arguments:
  <INPUT>...  {EXPORT_FILE} files or extracted export directories.
              Conversations found in several inputs are merged, newest wins.

Options:
  -o, --output <OUTPUT>     Output directory (or file with --concat, or - for stdout)
      --concat              Combine all conversations into a single output
      --order <ORDER>       full (every branch, default) or active (current branch only)
      --flavor <FLAVOR>     standard (default) or obsidian (block ids and links)
      --latex-dollars       Rewrite \\[ \\] and \\( \\) math delimiters to dollars
      --header <ROLE=TEXT>  Section header for user, assistant, system or tool

Metadata (use --show-* or --hide-*):
      --show-timestamps     Include message timestamps (default: off)
      --hide-timestamps     Hide message timestamps
      --frontmatter <LIST>  Comma-separated frontmatter fields to include
                            (default: all but tags, is_starred, voice)
      --no-frontmatter      Omit the frontmatter block

Side outputs:
      --assets <DIR>        Directory holding image assets (default: the input directory)
      --canvas              Write canvas documents to <OUTPUT>/canvas
      --custom-instructions Write <OUTPUT>/custom_instructions.json

Other options:
  -v, --verbose             Log progress details (RUST_LOG overrides)
  -q, --quiet               Suppress progress messages
  -n, --dry-run             Show what would be processed without writing
  -f, --force               Overwrite existing output files
  -h, --help                Print help
  -V, --version             Print version",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    );
}

fn parse_role(name: &str) -> Option<Role> {
    match name.trim() {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

fn parse_frontmatter(list: &str) -> Result<FrontmatterFields, lexopt::Error> {
    list.split(',')
        .filter(|name| !name.trim().is_empty())
        .map(|name| {
            name.parse::<FrontmatterField>()
                .map_err(|e| lexopt::Error::from(e.to_string()))
        })
        .collect()
}

fn parse_args() -> Result<Cli, lexopt::Error> {
    // Show help if no arguments provided
    if std::env::args().len() == 1 {
        print_help();
        std::process::exit(0);
    }

    let mut input = Vec::new();
    let mut output: Option<OutputTarget> = None;
    let mut concat = false;
    let mut opts = renderer::RenderOptions::default();
    let mut assets = None;
    let mut canvas = false;
    let mut custom_instructions = false;
    let mut verbose = false;
    let mut quiet = false;
    let mut dry_run = false;
    let mut force = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('o') | Long("output") => {
                let val: PathBuf = parser.value()?.parse()?;
                output = Some(if val == Path::new("-") {
                    OutputTarget::Stdout
                } else {
                    OutputTarget::Directory(val)
                });
            }
            Long("concat") => concat = true,
            Long("order") => {
                opts.order = match parser.value()?.string()?.as_str() {
                    "full" | "all" => RenderOrder::Full,
                    "active" => RenderOrder::ActiveBranch,
                    _ => return Err("order must be full or active".into()),
                };
            }
            Long("flavor") => {
                opts.flavor = match parser.value()?.string()?.as_str() {
                    "standard" => Flavor::Standard,
                    "obsidian" => Flavor::Obsidian,
                    _ => return Err("flavor must be standard or obsidian".into()),
                };
            }
            Long("latex-dollars") => opts.latex_dollars = true,
            Long("header") => {
                let val = parser.value()?.string()?;
                let (role, text) = val
                    .split_once('=')
                    .ok_or("header must be ROLE=TEXT")?;
                let role = parse_role(role)
                    .ok_or("header role must be user, assistant, system or tool")?;
                *opts.headers.for_role_mut(role) = text.to_owned();
            }
            // Show/hide flags - last one wins
            Long("show-timestamps") => opts.show_timestamps = true,
            Long("hide-timestamps") => opts.show_timestamps = false,
            Long("frontmatter") => {
                opts.frontmatter = parse_frontmatter(&parser.value()?.string()?)?;
            }
            Long("no-frontmatter") => opts.frontmatter = FrontmatterFields::none(),
            Long("assets") => assets = Some(parser.value()?.parse()?),
            Long("canvas") => canvas = true,
            Long("custom-instructions") => custom_instructions = true,
            Short('v') | Long("verbose") => verbose = true,
            Short('q') | Long("quiet") => quiet = true,
            Short('n') | Long("dry-run") => dry_run = true,
            Short('f') | Long("force") => force = true,
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            Short('V') | Long("version") => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            Value(val) => input.push(val.parse()?),
            _ => return Err(arg.unexpected()),
        }
    }

    Ok(Cli {
        input,
        output: output.ok_or("missing required option: --output")?,
        concat,
        opts,
        assets,
        canvas,
        custom_instructions,
        verbose,
        quiet,
        dry_run,
        force,
    })
}

/// Installs the stderr log subscriber. `RUST_LOG` takes precedence.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = parse_args().context(ParseArgsSnafu)?;
    init_tracing(cli.verbose);

    ensure!(!cli.input.is_empty(), NoInputFilesSnafu);

    let conversations = load_conversations(&cli.input)?;
    let asset_root = cli
        .assets
        .clone()
        .or_else(|| cli.input.iter().find(|p| p.is_dir()).cloned());
    let mut index = asset_root
        .as_deref()
        .map(AssetIndex::scan)
        .unwrap_or_default();
    assign_assets(&mut index, &conversations, cli.opts.order);

    let resolver = |id: &str, _: Option<&str>| index.link(id);
    let rendered: Vec<RenderedConversation> = conversations
        .par_iter()
        .map(|c| renderer::render_conversation(c, &cli.opts, &resolver))
        .collect();

    if cli.concat {
        return write_concat(&rendered, &cli);
    }

    match &cli.output {
        OutputTarget::Stdout => {
            ensure!(rendered.len() <= 1, MultipleConversationsToStdoutSnafu);
            if cli.dry_run {
                eprintln!("Would output {} conversation(s)", rendered.len());
            } else if let Some(doc) = rendered.first() {
                print!("{}", doc.markdown);
            }
        }
        OutputTarget::Directory(dir) => {
            if !cli.dry_run {
                std::fs::create_dir_all(dir).context(CreateOutputDirSnafu { path: dir })?;
            }
            write_conversations(&conversations, &rendered, dir, &index, &cli)?;
            if cli.canvas {
                write_canvas_documents(&conversations, &rendered, dir, &cli)?;
            }
            if cli.custom_instructions {
                write_custom_instructions(&conversations, dir, &cli)?;
            }
        }
    }

    Ok(())
}

/// Resolves an input to the export file: a directory means the
/// `conversations.json` inside it.
fn locate_export(input: &Path) -> Result<PathBuf, Error> {
    if !input.is_dir() {
        return Ok(input.to_path_buf());
    }
    let path = input.join(EXPORT_FILE);
    ensure!(path.is_file(), MissingExportSnafu { path: input });
    Ok(path)
}

/// Loads and merges the conversations of every input.
fn load_conversations(inputs: &[PathBuf]) -> Result<Vec<Conversation>, Error> {
    let mut conversations = Vec::new();
    for input in inputs {
        let path = locate_export(input)?;
        let json = std::fs::read_to_string(&path).context(ReadFileSnafu { path: &path })?;
        let parsed = parser::parse_export(&json).context(ParseFileSnafu { path: &path })?;
        tracing::info!(path = %path.display(), conversations = parsed.len(), "loaded export");
        conversations = conversation::merge_conversations(conversations, parsed);
    }
    Ok(conversations)
}

/// Assigns a copy target to every image the rendered sections show, in
/// render order, so links and copies agree.
fn assign_assets(index: &mut AssetIndex, conversations: &[Conversation], order: RenderOrder) {
    for conversation in conversations {
        for node in conversation.visible_message_nodes(order) {
            for image in content::message_images(node.message) {
                index.assign(&image.asset_id, image.name.as_deref());
            }
        }
    }
}

/// Writes all conversations into a single output.
fn write_concat(rendered: &[RenderedConversation], cli: &Cli) -> Result<(), Error> {
    let output = rendered
        .iter()
        .map(|r| r.markdown.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n\n");

    match &cli.output {
        OutputTarget::Stdout => {
            if cli.dry_run {
                eprintln!("Would output {} conversations concatenated", rendered.len());
            } else {
                print!("{output}");
            }
        }
        OutputTarget::Directory(path) => {
            // In concat mode, treat path as a file, not directory
            if cli.dry_run {
                eprintln!(
                    "Would write {} ({} conversations concatenated)",
                    path.display(),
                    rendered.len()
                );
            } else if path.exists() && !cli.force {
                eprintln!(
                    "Skipping {} (already exists, use --force to overwrite)",
                    path.display()
                );
            } else {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).context(CreateOutputDirSnafu { path: parent })?;
                }
                std::fs::write(path, &output).context(WriteFileSnafu { path })?;
                if !cli.quiet {
                    eprintln!("Wrote {} ({} conversations)", path.display(), rendered.len());
                }
            }
        }
    }

    Ok(())
}

/// Writes one Markdown file per conversation and copies referenced assets.
fn write_conversations(
    conversations: &[Conversation],
    rendered: &[RenderedConversation],
    out_dir: &Path,
    index: &AssetIndex,
    cli: &Cli,
) -> Result<(), Error> {
    let mut used_names = HashSet::new();
    let mut copied = HashSet::new();

    for (conversation, doc) in conversations.iter().zip(rendered) {
        let out_path = out_dir.join(unique_file_name(&conversation.title, "md", &mut used_names));

        if cli.dry_run {
            eprintln!("Would write {}", out_path.display());
            continue;
        }
        if out_path.exists() && !cli.force {
            eprintln!(
                "Skipping {} (already exists, use --force to overwrite)",
                out_path.display()
            );
            continue;
        }

        std::fs::write(&out_path, &doc.markdown).context(WriteFileSnafu { path: &out_path })?;
        set_modified(&out_path, conversation.update_time)?;
        if !cli.quiet {
            eprintln!("Wrote {}", out_path.display());
        }

        for asset_id in doc.assets.keys() {
            let (Some(source), Some(target)) = (index.find(asset_id), index.target(asset_id)) else {
                continue;
            };
            if copied.insert(target.to_owned()) {
                copy_asset(source, &out_dir.join(ASSETS_DIR), target, cli.force)?;
            }
        }
    }

    Ok(())
}

/// Stamps a written file with the conversation's last update.
fn set_modified(path: &Path, time: DateTime<Utc>) -> Result<(), Error> {
    std::fs::File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(time.into()))
        .context(SetModifiedSnafu { path })
}

fn copy_asset(source: &Path, assets_dir: &Path, target: &str, force: bool) -> Result<(), Error> {
    let dest = assets_dir.join(target);
    if dest.exists() && !force {
        tracing::debug!(path = %dest.display(), "asset already present");
        return Ok(());
    }
    std::fs::create_dir_all(assets_dir).context(CreateOutputDirSnafu { path: assets_dir })?;
    std::fs::copy(source, &dest).context(CopyAssetSnafu { path: &dest })?;
    tracing::info!(from = %source.display(), to = %dest.display(), "copied asset");
    Ok(())
}

/// Writes canvas documents to `<out>/canvas`, prefixed by the short
/// conversation id.
fn write_canvas_documents(
    conversations: &[Conversation],
    rendered: &[RenderedConversation],
    out_dir: &Path,
    cli: &Cli,
) -> Result<(), Error> {
    let canvas_dir = out_dir.join("canvas");
    let mut count = 0;

    for (conversation, doc) in conversations.iter().zip(rendered) {
        let short_id: String = conversation.conversation_id.chars().take(8).collect();
        for document in &doc.documents {
            let file_name = sanitize(&format!(
                "[{short_id}] {}{}",
                document.name,
                document.extension()
            ));
            let path = canvas_dir.join(file_name);
            if cli.dry_run {
                eprintln!("Would write {}", path.display());
                continue;
            }
            std::fs::create_dir_all(&canvas_dir)
                .context(CreateOutputDirSnafu { path: &canvas_dir })?;
            std::fs::write(&path, &document.content).context(WriteFileSnafu { path: &path })?;
            count += 1;
        }
    }

    if count > 0 && !cli.quiet {
        eprintln!("Wrote {count} canvas document(s) to {}", canvas_dir.display());
    }
    Ok(())
}

fn write_custom_instructions(
    conversations: &[Conversation],
    out_dir: &Path,
    cli: &Cli,
) -> Result<(), Error> {
    let entries = conversation::collect_custom_instructions(conversations);
    let path = out_dir.join("custom_instructions.json");
    if cli.dry_run {
        eprintln!("Would write {} ({} entries)", path.display(), entries.len());
        return Ok(());
    }
    let json = serde_json::to_string_pretty(&entries).context(SerializeInstructionsSnafu)?;
    std::fs::write(&path, json).context(WriteFileSnafu { path: &path })?;
    if !cli.quiet {
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}

/// Picks `<sanitized title>.<ext>`, adding ` (n)` when the name was already
/// used in this run.
fn unique_file_name(title: &str, ext: &str, used: &mut HashSet<String>) -> String {
    let base = sanitize(title);
    let mut name = format!("{base}.{ext}");
    let mut counter = 0;
    while !used.insert(name.to_lowercase()) {
        counter += 1;
        name = format!("{base} ({counter}).{ext}");
    }
    name
}

static UNSAFE_CHARS: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"[@<>:"/\\|?*\x00-\x1f]+"#).expect("file name pattern is valid")
});

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Makes a string safe to use as a file name.
///
/// Path separators, reserved punctuation and control characters become
/// spaces, `..` is broken up, whitespace is collapsed, and Windows device
/// names get a trailing underscore. An empty result becomes `untitled`.
fn sanitize(text: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(text, " ").replace("..", " ");
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches('.').trim();

    if trimmed.is_empty() {
        return "untitled".to_owned();
    }
    let stem = trimmed.split('.').next().unwrap_or(trimmed);
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
        return format!("{trimmed}_");
    }
    trimmed.to_owned()
}
