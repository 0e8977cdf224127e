use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use revmut::{ClientOptions, ObjectRef};

/// Options shared by all commands
#[derive(clap::Args, Debug, Clone)]
pub struct Options {
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    /// The directory holding the objects
    #[arg(long, global = true, default_value = ".revmut")]
    pub store: PathBuf,

    /// A JSON file with client options, e.g. `{"backoff": {"steps": 3}}`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Total number of attempts when a write conflicts
    #[arg(long, global = true)]
    pub retry_steps: Option<u32>,

    /// Sleep before the first retry, in milliseconds
    #[arg(long, global = true)]
    pub retry_delay_ms: Option<u64>,

    /// Factor by which each retry sleep grows
    #[arg(long, global = true)]
    pub retry_factor: Option<f64>,

    /// Fraction by which a retry sleep may be randomly stretched
    #[arg(long, global = true)]
    pub retry_jitter: Option<f64>,

    /// Give up on the operation after this many seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,
}

impl Options {
    /// The configuration file, if any, with the command line flags on top.
    pub fn client_options(&self) -> Result<ClientOptions> {
        let mut options = match &self.config {
            Some(path) => ClientOptions::from_json_file(path)?,
            None => ClientOptions::default(),
        };
        let backoff = &mut options.backoff;
        if let Some(steps) = self.retry_steps {
            backoff.steps = steps;
        }
        if let Some(delay) = self.retry_delay_ms {
            backoff.duration = Duration::from_millis(delay);
        }
        if let Some(factor) = self.retry_factor {
            backoff.factor = factor;
        }
        if let Some(jitter) = self.retry_jitter {
            backoff.jitter = jitter;
        }
        backoff.validate().context("Invalid retry options")?;
        Ok(options)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Identifies the object a command works on
#[derive(clap::Args, Debug, Clone)]
pub struct KeyArgs {
    /// The kind of the object, e.g. `Widget`
    #[arg(long)]
    pub kind: String,

    /// The namespace of the object
    #[arg(long, short('n'), default_value = "default")]
    pub namespace: String,

    /// The name of the object
    pub name: String,
}

impl KeyArgs {
    pub fn key(&self) -> ObjectRef {
        ObjectRef::new(&self.kind, &self.namespace, &self.name)
    }
}
