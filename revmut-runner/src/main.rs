//! The revmut-runner executable
//!
//! Reads and mutates objects in a local store, with the same conflict
//! handling a program linking `revmut` would get.

use std::process::exit;

use anyhow::{Context, Result};
use clap::{CommandFactory as _, Parser, Subcommand};
use revmut::Client;
use revmut_local::LocalStore;
use revmut_runner::{
    commands::{self, FieldFormat},
    interrupt, logging,
    options::{KeyArgs, Options},
};
use serde_json::Value;

fn main() {
    let args = Args::parse();
    handle_result(run_args(args));
}

fn run_args(args: Args) -> Result<()> {
    match &args.command {
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
            Ok(())
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
            Ok(())
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "revmut-runner", &mut std::io::stdout());
            Ok(())
        }
        command => {
            logging::set_up(&logging::Options {
                verbose: args.options.verbose,
            })?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Could not start the async runtime")?;
            let output = runtime.block_on(run_command(&args.options, command))?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}

async fn run_command(options: &Options, command: &Commands) -> Result<Value> {
    let client = Client::with_options(LocalStore::open(&options.store)?, options.client_options()?)?;
    let interrupt_state = interrupt::set_up_process_interrupt_handler()?;
    if let Some(timeout) = options.timeout() {
        interrupt_state.interrupt_after(timeout);
    }
    let cancel = interrupt_state.token();

    match command {
        Commands::Get { key } => commands::get(&client, &key.key()).await,
        Commands::Create { key, body } => {
            commands::create(&client, cancel, &key.key(), parse_json("--body", body)?).await
        }
        Commands::Apply { key, body, create } => {
            let body = parse_json("--body", body)?;
            commands::apply(&client, cancel, &key.key(), body, *create).await
        }
        Commands::Merge { key, patch, create } => {
            let patch = parse_json("--patch", patch)?;
            commands::merge(&client, cancel, &key.key(), patch, *create).await
        }
        Commands::MergePatch { key, patch } => {
            let patch = parse_json("--patch", patch)?;
            commands::merge_patch(&client, cancel, &key.key(), patch).await
        }
        Commands::SetStatus { key, status } => {
            let status = parse_json("--status", status)?;
            commands::set_status(&client, cancel, &key.key(), status).await
        }
        Commands::Field {
            namespace,
            name,
            field,
            secret,
            yaml,
        } => {
            let format = match (*secret, *yaml) {
                (true, _) => FieldFormat::Secret,
                (false, true) => FieldFormat::ConfigYaml,
                (false, false) => FieldFormat::Config,
            };
            commands::field(&client, cancel, namespace, name, field, format).await
        }
        Commands::GenerateMan | Commands::GenerateMarkdown | Commands::GenerateCompletion { .. } => {
            anyhow::bail!("not an object command")
        }
    }
}

fn parse_json(flag: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("failed to parse value of {}", flag))
}

fn handle_result(r: Result<()>) {
    match r {
        Ok(()) => {}
        Err(e) => {
            eprintln!("revmut-runner error: {:#}", e);
            exit(1);
        }
    }
}

/// Read and mutate objects in a local revmut store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print an object as stored
    Get {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Create an object unless it already exists
    Create {
        #[command(flatten)]
        key: KeyArgs,

        /// The object as JSON; metadata identity defaults to the command line
        #[arg(long, default_value = "{}")]
        body: String,
    },

    /// Replace the content of an object, writing the whole document
    Apply {
        #[command(flatten)]
        key: KeyArgs,

        /// The desired object as JSON
        #[arg(long)]
        body: String,

        /// Create the object if it does not exist
        #[arg(long)]
        create: bool,
    },

    /// Merge a JSON document into an object, then patch body and status
    /// separately
    Merge {
        #[command(flatten)]
        key: KeyArgs,

        /// An RFC 7396 merge document
        #[arg(long)]
        patch: String,

        /// Create the object if it does not exist
        #[arg(long)]
        create: bool,
    },

    /// Merge a JSON document into an object, creating it if needed, and send
    /// the difference as one merge patch
    MergePatch {
        #[command(flatten)]
        key: KeyArgs,

        /// An RFC 7396 merge document
        #[arg(long)]
        patch: String,
    },

    /// Replace the status of an object
    SetStatus {
        #[command(flatten)]
        key: KeyArgs,

        /// The new status as JSON
        #[arg(long)]
        status: String,
    },

    /// Print a field of a ConfigMap or Secret
    Field {
        /// The namespace of the object
        #[arg(long, short('n'), default_value = "default")]
        namespace: String,

        /// The name of the object
        name: String,

        /// The key under `data`
        field: String,

        /// Read a Secret instead of a ConfigMap
        #[arg(long)]
        secret: bool,

        /// Parse the field as YAML
        #[arg(long, conflicts_with = "secret")]
        yaml: bool,
    },

    /// Generate markdown documentation for revmut-runner
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for revmut-runner
    #[command(hide = true)]
    GenerateMan,

    /// Generate shell completions for revmut-runner
    #[command(hide = true)]
    GenerateCompletion {
        /// The shell to generate completions for
        #[arg(long)]
        shell: clap_complete::Shell,
    },
}
