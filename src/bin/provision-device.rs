// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Device provisioning command-line tool.
//!
//! # Usage
//!
//! ```text
//! provision-device [OPTIONS] [DEVICE_ID]
//!
//! Arguments:
//!   [DEVICE_ID]  Device identity (default: device-simulator-<8 hex chars>)
//!
//! Options:
//!       --cert-dir <DIR>        Directory for generated certificates
//!       --probe-timeout <SECS>  Give up on the hub probe after SECS (0 waits forever)
//!   -v, --verbose               Enable verbose output
//!   -q, --quiet                 Suppress non-error output
//!   -h, --help                  Print help
//!   -V, --version               Print version
//! ```
//!
//! Connection settings come from the environment (or a `.env` file):
//! `ID_SCOPE`, `GLOBAL_DPS`, `IOTHUB` and `DPS_CONNECTION_STRING`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use device_provisioner::{DeviceId, ProvisionConfig, ProvisionError, Provisioner};

/// Time given to blocking workers once the run is over.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Device provisioning command-line tool
#[derive(Parser)]
#[command(name = "provision-device")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision a device through DPS and verify hub connectivity", long_about = None)]
struct Cli {
    /// Device identity (default: device-simulator-<8 hex chars>)
    #[arg(value_name = "DEVICE_ID")]
    device_id: Option<String>,

    /// Directory for generated certificates
    #[arg(long, value_name = "DIR")]
    cert_dir: Option<PathBuf>,

    /// Give up on the hub probe after SECS (0 waits forever)
    #[arg(long, value_name = "SECS")]
    probe_timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));

    // An abandoned key generation worker must not hold the process open.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ProvisionError> {
    let device_id = DeviceId::from_arg(cli.device_id.as_deref())?;

    let mut config = ProvisionConfig::from_env()?;
    if let Some(dir) = cli.cert_dir {
        config.cert_dir = dir;
    }
    if let Some(secs) = cli.probe_timeout {
        config.probe_timeout = match secs {
            0 => None,
            s => Some(Duration::from_secs(s)),
        };
    }
    tracing::debug!("{:?}", config);

    let report = Provisioner::new(config)?.run(&device_id).await?;

    tracing::debug!(
        "{} provisioned: certificate {}, registration {:?}, probe {:?}",
        report.device_id,
        report.certificates.cert.display(),
        report.registration.status,
        report.probe
    );

    Ok(())
}
