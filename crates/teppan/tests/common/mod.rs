#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use teppan::{Address, ClientConfig, ComputeBackend, ComputeFailure, Inputs, Parameters, ServerConfig, Tensor};

pub const SLOT: &str = "decoder_input_ids";

/// Returns the collated token slot, so every client gets its own rows back.
pub struct Echo {
    failures_left: AtomicUsize,
    pub calls: AtomicUsize,
    pub batch_rows: Mutex<Vec<usize>>,
}

impl Echo {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(count: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(count),
            calls: AtomicUsize::new(0),
            batch_rows: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl ComputeBackend for Echo {
    async fn execute(&self, inputs: &Inputs, _parameters: &Parameters) -> Result<Tensor, ComputeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tokens = inputs
            .get(SLOT)
            .cloned()
            .ok_or_else(|| ComputeFailure::backend("no tokens"))?;
        self.batch_rows.lock().unwrap().push(tokens.rows());

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(ComputeFailure::backend("device reset"));
        }
        Ok(tokens)
    }
}

pub fn socket(dir: &tempfile::TempDir, name: &str) -> Address {
    Address::from_raw(dir.path().join(name).to_string_lossy().into_owned())
}

pub fn tokens(rows: usize, len: usize, base: i64) -> Inputs {
    let values = (0..(rows * len) as i64).map(|v| base + v + 1).collect();
    let mut inputs = Inputs::new();
    inputs.insert(SLOT.into(), Tensor::from_i64(vec![rows, len], values).unwrap());
    inputs
}

pub fn fast_server() -> ServerConfig {
    ServerConfig {
        batch_timeout: Duration::from_millis(10),
        ..ServerConfig::default()
    }
}

pub fn fast_client() -> ClientConfig {
    ClientConfig {
        poll_interval: Duration::from_millis(10),
        startup_timeout: Duration::from_secs(5),
        server: fast_server(),
        ..ClientConfig::default()
    }
}
