use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use pagetool_core::client::{ContentApi, RestClient};
use pagetool_core::config::{load_config, resolve_config_path};
use pagetool_core::editor::{TemplateEditor, apply_edits};
use pagetool_core::filter::{PropertyFilterSpec, filter_pages};
use pagetool_core::query::{find_exactly_one, iterate_pages};
use pagetool_core::resolve::PageRef;
use pagetool_core::tree::{CopyOptions, copy_page_tree};

#[derive(Debug, Parser)]
#[command(
    name = "pagetool",
    version,
    about = "Bulk page editing for a Confluence-style content service"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file path")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch a single page and print it as JSON")]
    Get(GetArgs),
    #[command(about = "List pages matching a reference or query")]
    List(ListArgs),
    #[command(about = "Copy a page tree onto a target, matching children by title")]
    Copy(CopyArgs),
    #[command(about = "Apply a templated edit across matching pages")]
    Edit(EditArgs),
    #[command(about = "Delete the single page a reference resolves to")]
    Delete(DeleteArgs),
    #[command(about = "Add labels to the single page a reference resolves to")]
    Label(LabelArgs),
}

#[derive(Debug, Args)]
struct GetArgs {
    #[arg(value_name = "REF", help = "Page id, SPACE:Title, :Title, URI, or query")]
    reference: String,
    #[arg(long, value_delimiter = ',', help = "Sections to expand (comma separated)")]
    expand: Vec<String>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(value_name = "REF", help = "Page reference or query")]
    reference: String,
    #[arg(long, help = "Stop after this many pages")]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0, help = "Result offset to start from")]
    start: usize,
    #[arg(long, value_delimiter = ',', help = "Sections to expand (comma separated)")]
    expand: Vec<String>,
    #[arg(
        long,
        value_name = "NAME==VALUE|NAME!=VALUE",
        help = "Property filter, repeatable; all must hold"
    )]
    filter: Vec<String>,
}

#[derive(Debug, Args)]
struct CopyArgs {
    #[arg(value_name = "SOURCE")]
    source: String,
    #[arg(value_name = "TARGET", help = "Existing page reference or new title")]
    target: String,
    #[arg(long, help = "Space key for created pages (default: source's space)")]
    space: Option<String>,
    #[arg(long, help = "Parent id for the target when it is created")]
    parent: Option<String>,
    #[arg(long, help = "Copy only the page itself, not its children")]
    no_recursive: bool,
    #[arg(long, help = "Delete target children absent from the source")]
    prune: bool,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(value_name = "REF", help = "Page reference or query")]
    reference: String,
    #[arg(long, value_name = "FILE", help = "YAML edit spec")]
    spec: PathBuf,
    #[arg(long, value_name = "KEY=VALUE", help = "Template data, repeatable")]
    data: Vec<String>,
    #[arg(
        long,
        value_name = "NAME==VALUE|NAME!=VALUE",
        help = "Property filter, repeatable; all must hold"
    )]
    filter: Vec<String>,
    #[arg(long, help = "Report what would change without writing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(value_name = "REF")]
    reference: String,
}

#[derive(Debug, Args)]
struct LabelArgs {
    #[arg(value_name = "REF")]
    reference: String,
    #[arg(value_name = "LABEL", required = true)]
    labels: Vec<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let client = build_client(&cli)?;
    match cli.command {
        Commands::Get(args) => run_get(&client, args),
        Commands::List(args) => run_list(&client, args),
        Commands::Copy(args) => run_copy(&client, args),
        Commands::Edit(args) => run_edit(&client, args),
        Commands::Delete(args) => run_delete(&client, args),
        Commands::Label(args) => run_label(&client, args),
    }
}

fn build_client(cli: &Cli) -> Result<RestClient> {
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&config_path)?;
    RestClient::from_config(&config)
}

fn run_get(client: &RestClient, args: GetArgs) -> Result<()> {
    let expand = as_refs(&args.expand);
    let reference = PageRef::parse(&args.reference);
    let item = client
        .get_item(&reference, &expand)?
        .ok_or_else(|| anyhow::anyhow!("no page matches {reference}"))?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

fn run_list(client: &RestClient, args: ListArgs) -> Result<()> {
    let expand = as_refs(&args.expand);
    let specs = parse_filters(&args.filter)?;
    let items = iterate_pages(client, &args.reference, &expand, args.start, args.limit);
    let mut count = 0usize;
    for result in filter_pages(client, items, specs) {
        let item = result?;
        println!("{}", serde_json::to_string(&item)?);
        count += 1;
    }
    eprintln!("listed: {count} (requests: {})", client.request_count());
    Ok(())
}

fn run_copy(client: &RestClient, args: CopyArgs) -> Result<()> {
    let report = copy_page_tree(
        client,
        &CopyOptions {
            source: args.source,
            target: args.target,
            recursive: !args.no_recursive,
            parent: args.parent,
            space: args.space,
            prune: args.prune,
        },
    )?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_edit(client: &RestClient, args: EditArgs) -> Result<()> {
    let spec_text = fs::read_to_string(&args.spec)
        .with_context(|| format!("failed to read {}", args.spec.display()))?;
    let editor = TemplateEditor::from_yaml(&spec_text)?.with_data(parse_data(&args.data)?);
    let specs = parse_filters(&args.filter)?;
    let report = apply_edits(client, &args.reference, specs, &editor, args.dry_run)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_delete(client: &RestClient, args: DeleteArgs) -> Result<()> {
    let item = find_exactly_one(client, &args.reference, &[])?;
    client.delete_item(&item.id)?;
    println!("deleted: {} ({})", item.title, item.id);
    Ok(())
}

fn run_label(client: &RestClient, args: LabelArgs) -> Result<()> {
    let item = find_exactly_one(client, &args.reference, &[])?;
    client.add_labels(&item.id, &args.labels)?;
    println!("labeled: {} ({})", item.title, args.labels.join(", "));
    Ok(())
}

fn as_refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

fn parse_filters(inputs: &[String]) -> Result<Vec<PropertyFilterSpec>> {
    inputs.iter().map(|input| PropertyFilterSpec::parse(input)).collect()
}

fn parse_data(inputs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    for input in inputs {
        let Some((key, value)) = input.split_once('=') else {
            bail!("invalid --data entry (expected KEY=VALUE): {input}");
        };
        data.insert(key.to_string(), value.to_string());
    }
    Ok(data)
}
