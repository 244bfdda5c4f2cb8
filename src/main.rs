mod config;
mod discovery;
mod kubeconfig;
mod switch;
mod tree;
mod ui;

use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::discovery::{discover_all, ContextNamespaces, Discoverer};
use crate::kubeconfig::{Location, MergedConfig};
use crate::switch::QuickTarget;
use crate::tree::ContextTree;

const EXAMPLES: &str = "\
Examples:
  <cmd>                          Select context/namespace from a tree
  <cmd> <namespace>              Switch namespace in the current context
  <cmd> <context> <namespace>    Switch context and namespace
  <cmd> <context>/<namespace>    Same as above
  <cmd> <context> .              Switch to namespace `default` in context";

/// Switch between kubernetes contexts and namespaces.
#[derive(Parser, Debug)]
#[command(author, about)]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
struct Args {
    /// Quick switch target, `<namespace>`, `<context>/<namespace>` or
    /// `<context> <namespace>`. A `.` namespace means `default`.
    target: Vec<String>,

    /// Use this kubeconfig file only, instead of $KUBECONFIG or ~/.kube/config.
    #[clap(long, short)]
    kubeconfig: Option<PathBuf>,

    /// List contexts with their namespaces.
    #[clap(long, short)]
    list: bool,

    /// Write the merged kubeconfig to a single file.
    #[clap(long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Show help about the command.
    #[clap(long, short)]
    help: bool,

    /// Show build info.
    #[clap(long)]
    build: bool,

    /// Show version
    #[clap(long, short)]
    version: bool,
}

impl Args {
    async fn run(&self, cfg: &Config) -> Result<()> {
        self.check_usage(cfg);

        let location = Location::resolve(self.kubeconfig.clone())?;
        let mut merged = MergedConfig::load(&location).context("load kubeconfig")?;

        if let Some(path) = self.export.as_ref() {
            merged.export(path)?;
            eprintln!("merged kubeconfig written to {}", path.display());
            return Ok(());
        }

        let discoverer = Discoverer::new(cfg);
        if !self.target.is_empty() {
            let target = QuickTarget::parse(self.target.as_slice())?;
            switch::quick_switch(&mut merged, &discoverer, target).await?;
            return Ok(());
        }

        let results = discover_all(&discoverer, &merged).await;
        let current_context = merged.current_context();
        let current_namespace = current_context
            .and_then(|ctx| merged.context_namespace(ctx))
            .unwrap_or("default");

        if self.list {
            for line in format_list(&results, current_context, current_namespace) {
                println!("{line}");
            }
            return Ok(());
        }

        let mut tree = ContextTree::build(results, current_context, current_namespace);
        if let Some(target) = ui::run(&mut tree)? {
            switch::apply(&mut merged, &target)?;
        }
        Ok(())
    }

    fn check_usage(&self, cfg: &Config) {
        let msg = if self.target.len() > 2 {
            format!("expect at most 2 arguments, found {}", self.target.len())
        } else if (self.list || self.export.is_some()) && !self.target.is_empty() {
            String::from("`--list` and `--export` take no target arguments")
        } else if self.list && self.export.is_some() {
            String::from("`--list` cannot be used with `--export`")
        } else {
            return;
        };

        let mut cmd = Args::command().name(get_cmd_name(cfg));
        cmd.error(ErrorKind::ArgumentConflict, msg).exit();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();

    let cfg = Config::load().context("load config")?;

    let args = Args::parse();
    if args.help {
        let mut cmd = Args::command()
            .name(get_cmd_name(&cfg))
            .after_help(EXAMPLES.replace("<cmd>", &cfg.cmd));
        let help = cmd.render_help();
        eprintln!("{help}");
        process::exit(2);
    }

    if args.version {
        show_version(&cfg);
        return Ok(());
    }

    if args.build {
        show_build_info(&cfg, &args);
        return Ok(());
    }

    args.run(&cfg).await
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("KUBESWITCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// One line per context, namespaces indented below it; `*` marks the
/// active context and namespace.
fn format_list(
    results: &[ContextNamespaces],
    current_context: Option<&str>,
    current_namespace: &str,
) -> Vec<String> {
    let mut lines = Vec::new();
    for result in results {
        let active = current_context == Some(result.name.as_str());
        let mark = if active { "*" } else { " " };
        match result.namespaces.as_ref() {
            Ok(namespaces) => {
                lines.push(format!("{mark} {}", result.name));
                for ns in namespaces {
                    let ns_mark = if active && ns == current_namespace {
                        " *"
                    } else {
                        ""
                    };
                    lines.push(format!("    {ns}{ns_mark}"));
                }
            }
            Err(err) => lines.push(format!("{mark} {} ({err})", result.name)),
        }
    }
    lines
}

fn show_version(cfg: &Config) {
    eprintln!("{} {}", get_cmd_name(cfg), env!("BUILD_VERSION"));
}

fn show_build_info(cfg: &Config, args: &Args) {
    show_version(cfg);
    eprintln!(
        "rustc {}-{}-{}",
        env!("VERGEN_RUSTC_SEMVER"),
        env!("VERGEN_RUSTC_LLVM_VERSION"),
        env!("VERGEN_RUSTC_CHANNEL")
    );

    eprintln!();
    eprintln!("Build type:   {}", env!("BUILD_TYPE"));
    eprintln!("Build target: {}", env!("BUILD_TARGET"));
    eprintln!("Commit SHA:   {}", env!("BUILD_SHA"));
    eprintln!("Build time:   {}", env!("VERGEN_BUILD_TIMESTAMP"));

    eprintln!();
    let path = match cfg.path.as_ref() {
        Some(path) => Cow::Owned(format!("{}", path.display())),
        None => Cow::Borrowed("N/A"),
    };
    eprintln!("Config path: {path}");

    let kubeconfig = match Location::resolve(args.kubeconfig.clone()) {
        Ok(location) => Cow::Owned(location.to_string()),
        Err(_) => Cow::Borrowed("N/A"),
    };
    eprintln!("Kubeconfig:  {kubeconfig}");
}

fn get_cmd_name(cfg: &Config) -> &'static str {
    Box::leak(cfg.cmd.clone().into_boxed_str())
}
