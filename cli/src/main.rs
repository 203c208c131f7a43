use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use futures::executor::block_on;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use tab_host::codec;
use tab_host::{
    ComponentDescriptor, ContentFactory, Host, HostConfig, InstantiationError, MemoryWorkspace,
    NavigationRequest, NavigationToken, PageState, TabInfo, WorkspaceCommand,
};

#[derive(Parser)]
#[command(name = "tab-host", about = "Build, inspect and dry-run tab-host navigation tokens")]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a descriptor into a navigation token
    Encode(DescriptorArgs),
    /// Decode a navigation token and print the descriptor
    Decode { token: String },
    /// Print the navigation request that routes a descriptor through the host
    Request {
        #[command(flatten)]
        descriptor: DescriptorArgs,
        #[arg(long, default_value = "c")]
        namespace: String,
    },
    /// Render a host against a workspace fixture and print the tab commands
    Sync {
        /// JSON file: {"tabbed": true, "focused": {"tabId": ..., "pageState": {...}, "subtabs": [...]}}.
        /// See fixtures/console.json.
        #[arg(long)]
        tabs: PathBuf,
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "tab-host")]
        name: String,
    },
}

#[derive(Args)]
struct DescriptorArgs {
    /// Definition id of the content to create, e.g. c:relatedListPage
    #[arg(long = "def")]
    definition_id: String,
    /// Attribute as key=value; the value is parsed as JSON when it can be
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    attributes: Vec<String>,
    #[arg(long, requires = "title")]
    icon: Option<String>,
    #[arg(long, requires = "icon")]
    title: Option<String>,
}

impl DescriptorArgs {
    fn to_descriptor(&self) -> Result<ComponentDescriptor> {
        let mut descriptor = ComponentDescriptor::new(self.definition_id.clone());
        for pair in &self.attributes {
            let Some((key, raw)) = pair.split_once('=') else {
                bail!("attribute '{}' is not KEY=VALUE", pair);
            };
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            descriptor = descriptor.with_attribute(key, value);
        }
        if let (Some(icon), Some(title)) = (&self.icon, &self.title) {
            descriptor = descriptor.with_tab_info(TabInfo::new(icon.clone(), title.clone()));
        }
        descriptor.validate().context("invalid descriptor")
    }
}

/// Content factory for dry runs: every definition succeeds.
struct DryRunFactory;

#[async_trait(?Send)]
impl ContentFactory for DryRunFactory {
    type Content = String;

    async fn create_content(
        &self,
        definition_id: &str,
        _attributes: &Map<String, Value>,
    ) -> Result<String, InstantiationError> {
        Ok(definition_id.to_string())
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Renders a host with `token` against the workspace described by `fixture`
/// and returns the tab commands it issued.
fn dry_run_sync(fixture: &str, token: String, name: String) -> Result<Vec<WorkspaceCommand>> {
    let workspace = MemoryWorkspace::from_json(fixture)?;

    let mut host = Host::new(HostConfig::named(name), DryRunFactory, workspace);
    let state = PageState::new().with_token(&NavigationToken::new(token));
    let Some(cycle) = host.render(&state) else {
        bail!("token did not start a cycle (see log output)");
    };
    let report = block_on(cycle.run());
    tracing::debug!(?report, "cycle finished");

    Ok(host.workspace().commands())
}

fn do_sync(tabs: &Path, token: String, name: String) -> Result<()> {
    let data = fs::read_to_string(tabs).with_context(|| format!("failed to read {}", tabs.display()))?;
    let commands = dry_run_sync(&data, token, name)
        .with_context(|| format!("dry run against {} failed", tabs.display()))?;
    println!("{}", serde_json::to_string_pretty(&commands)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Encode(args) => {
            println!("{}", codec::encode(&args.to_descriptor()?));
        }
        Command::Decode { token } => {
            let descriptor = codec::decode(Some(&NavigationToken::new(token)))?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Command::Request { descriptor, namespace } => {
            let config = HostConfig {
                namespace,
                ..HostConfig::default()
            };
            let request = NavigationRequest::to_host(&config, &descriptor.to_descriptor()?);
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        Command::Sync { tabs, token, name } => do_sync(&tabs, token, name)?,
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("tab-host: {:#}", e);
        process::exit(1);
    }
}
