//! echo-server: a teppan server around a toy backend, for poking at the
//! batching and retry behaviour by hand.
//!
//! ```text
//! echo-server serve --name demo
//! echo-server generate --name demo --rows 3 --len 5 --spawn
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;

use teppan::{
    Address, Client, ClientConfig, ComputeBackend, ComputeFailure, Inputs, ParamValue, Parameters, Server, Tensor,
    TensorData,
};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "echo-server", version, about)]
struct Cli {
    /// Backend identity; every client using the same name shares one server.
    #[arg(long, env = "TEPPAN_BACKEND", default_value = "echo")]
    name: String,

    /// Path to a TOML client/server config file.
    #[arg(long, env = "TEPPAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve until idle.
    Serve,

    /// Send one request and print the result.
    Generate {
        /// Rows in the request.
        #[arg(long, default_value_t = 2)]
        rows: usize,

        /// Tokens per row.
        #[arg(long, default_value_t = 4)]
        len: usize,

        /// Beam count, which shrinks the rows served per round.
        #[arg(long, default_value_t = 1)]
        beams: i64,

        /// Start a server in this process if none is running.
        #[arg(long)]
        spawn: bool,
    },
}

// ── EchoBackend ─────────────────────────────────────────────────────

/// Appends one token to every sequence: the row's last token plus one.
struct EchoBackend {
    slot: String,
}

#[async_trait]
impl ComputeBackend for EchoBackend {
    async fn execute(&self, inputs: &Inputs, _parameters: &Parameters) -> Result<Tensor, ComputeFailure> {
        let tokens = inputs
            .get(&self.slot)
            .ok_or_else(|| ComputeFailure::MissingSlot(self.slot.clone()))?;
        let &[rows, len] = tokens.shape() else {
            return Err(ComputeFailure::backend(format!("expected a 2-d token slot, got {tokens}")));
        };
        let TensorData::I64(values) = tokens.data() else {
            return Err(ComputeFailure::backend("expected integer tokens"));
        };

        let mut out = Vec::with_capacity(rows * (len + 1));
        for row in values.chunks(len.max(1)).take(rows) {
            out.extend_from_slice(row);
            out.push(row.last().map_or(0, |t| t + 1));
        }
        Ok(Tensor::from_i64(vec![rows, len + 1], out)?)
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ClientConfig> {
    match path {
        // Env overrides and validation are applied by the loader.
        Some(path) => {
            let config = ClientConfig::from_file(path)?;
            info!(path = %path.display(), "loaded config");
            Ok(config)
        }
        None => {
            let mut config = ClientConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let address = Address::for_backend(&cli.name);
    let slot = config.server.sequence_slot.clone();

    match cli.command {
        Command::Serve => {
            info!(address = %address, "echo-server starting; exits once idle");
            Server::new(EchoBackend { slot }, address, config.server).run().await?;
        }
        Command::Generate { rows, len, beams, spawn } => {
            let mut client = if spawn {
                let loader_slot = slot.clone();
                Client::with_loader(address, config, move || Ok(EchoBackend { slot: loader_slot.clone() }))
            } else {
                Client::connect(address, config).await?
            };

            let values = (0..(rows * len) as i64).collect();
            let mut inputs = Inputs::new();
            inputs.insert(slot, Tensor::from_i64(vec![rows, len], values)?);
            let mut parameters = Parameters::new();
            parameters.insert("num_beams".into(), ParamValue::Int(beams));

            let output = client.generate(inputs, parameters).await?;
            println!("{output}");
        }
    }
    Ok(())
}
