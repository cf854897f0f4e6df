use bill_acceptor::application::controller::TransactionController;
use bill_acceptor::config::{AcceptorConfig, GpioDriver};
use bill_acceptor::domain::amount::Amount;
use bill_acceptor::domain::denomination::resolve_burst;
use bill_acceptor::domain::invoice::{Invoice, InvoiceId};
use bill_acceptor::domain::ports::{HardwareLineRef, InvoiceClientRef};
use bill_acceptor::domain::transaction::TransactionState;
use bill_acceptor::infrastructure::http::HttpInvoiceClient;
use bill_acceptor::infrastructure::in_memory::InMemoryInvoiceClient;
use bill_acceptor::infrastructure::simulated::SimulatedLine;
use bill_acceptor::infrastructure::sysfs::SysfsGpio;
use bill_acceptor::interfaces::status::StatusServer;
use bill_acceptor::logging::init_logging;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long, short, env = "BILL_ACCEPTOR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides `[logging] level` (e.g. "debug").
    #[arg(long, env = "BILL_ACCEPTOR_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the acceptor controller (the default).
    Run {
        /// Use simulated GPIO and read pulse counts from stdin, one burst per line.
        #[arg(long)]
        simulate: bool,

        /// With --simulate, replace the payment backend with an in-memory one.
        #[arg(long, requires = "simulate")]
        offline: bool,

        /// Price of the single invoice published by the offline backend.
        #[arg(long, default_value_t = 10_000, requires = "offline")]
        price: u64,
    },
    /// Print the effective configuration as TOML.
    CheckConfig,
    /// Print the denomination a pulse count resolves to.
    Resolve {
        pulses: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AcceptorConfig::from_toml_file(path)?,
        None => AcceptorConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let command = cli.command.unwrap_or(Command::Run {
        simulate: false,
        offline: false,
        price: 10_000,
    });
    match command {
        Command::CheckConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Resolve { pulses } => resolve(&config, pulses),
        Command::Run {
            simulate,
            offline,
            price,
        } => run(config, simulate, offline.then_some(Amount::new(price))).await,
    }
}

fn resolve(config: &AcceptorConfig, pulses: u32) -> Result<()> {
    let table = config.denomination_table();
    match resolve_burst(&table, pulses, config.transaction.tolerance) {
        Ok(resolution) => {
            println!(
                "{} pulses -> {} (corrected to {} pulses)",
                resolution.observed, resolution.amount, resolution.corrected
            );
            Ok(())
        }
        Err(invalid) => {
            eprintln!("{invalid}");
            std::process::exit(1);
        }
    }
}

async fn run(config: AcceptorConfig, simulate: bool, offline_price: Option<Amount>) -> Result<()> {
    init_logging(
        config.logging.format,
        &config.logging.level,
        config.logging.file.as_deref(),
    )
    .map_err(|e| miette!("failed to initialise logging: {e}"))?;

    let simulated =
        (simulate || config.gpio.driver == GpioDriver::Simulated).then(SimulatedLine::new);
    let (controller, status) = start(&config, simulated.as_ref(), offline_price)
        .await
        .into_diagnostic()?;

    let feeder = simulated.map(|line| tokio::spawn(feed_stdin(line, controller.clone())));
    let shutdown = async move {
        match feeder {
            Some(handle) => tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = handle => info!("simulated input exhausted"),
            },
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
        }
    };

    controller.run(shutdown).await;
    if let Some(server) = status {
        server.shutdown();
    }
    info!("stopped");
    Ok(())
}

fn build_hardware(
    config: &AcceptorConfig,
    simulated: Option<&SimulatedLine>,
) -> bill_acceptor::error::Result<HardwareLineRef> {
    let hardware: HardwareLineRef = match simulated {
        Some(line) => Arc::new(line.clone()),
        None => Arc::new(SysfsGpio::new(
            &config.gpio.sysfs_root,
            Duration::from_micros(config.gpio.poll_interval_us),
        )?),
    };
    Ok(hardware)
}

async fn build_client(
    config: &AcceptorConfig,
    offline_price: Option<Amount>,
) -> bill_acceptor::error::Result<InvoiceClientRef> {
    let Some(price) = offline_price else {
        return Ok(Arc::new(HttpInvoiceClient::new(&config.api, &config.device)?));
    };
    let backend = InMemoryInvoiceClient::new();
    backend
        .publish(Invoice {
            id: InvoiceId::Text("offline-1".to_string()),
            payment_token: "offline".to_string(),
            product_price: price,
            is_paid: false,
        })
        .await;
    info!(%price, "offline backend with one invoice");
    Ok(Arc::new(backend))
}

/// Wires the adapters into an attached controller and starts the optional
/// status endpoint.
async fn start(
    config: &AcceptorConfig,
    simulated: Option<&SimulatedLine>,
    offline_price: Option<Amount>,
) -> bill_acceptor::error::Result<(TransactionController, Option<StatusServer>)> {
    let hardware = build_hardware(config, simulated)?;
    let client = build_client(config, offline_price).await?;

    let controller = TransactionController::new(hardware, client, config.controller_settings());
    if let Err(e) = controller.attach() {
        error!(error = %e, "cannot attach to the acceptor lines");
        return Err(e.into());
    }

    let status = if config.status.enabled {
        let server = StatusServer::new(config.status.bind, controller.clone());
        server.start().await?;
        Some(server)
    } else {
        None
    };
    Ok((controller, status))
}

/// Replays pulse counts from stdin into the simulated pulse line.
///
/// Each line waits for an active transaction, then fires its pulses spaced
/// beyond the debounce window and waits for the burst to settle. At end of
/// input it waits for the transaction in flight to finish.
async fn feed_stdin(line: SimulatedLine, controller: TransactionController) {
    let settings = controller.settings().clone();
    let gap = settings.debounce + Duration::from_millis(10);
    let settle = settings.burst_quiet + settings.tick;
    let mut phase = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let input = match lines.next_line().await {
            Ok(Some(input)) => input,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read simulated input");
                break;
            }
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let Ok(count) = input.parse::<u32>() else {
            warn!(input, "expected a pulse count");
            continue;
        };

        if phase
            .wait_for(|state| *state == TransactionState::Active)
            .await
            .is_err()
        {
            return;
        }
        info!(pulses = count, "injecting simulated burst");
        for _ in 0..count {
            line.pulse(settings.pulse_pin, Instant::now());
            tokio::time::sleep(gap).await;
        }
        tokio::time::sleep(settle).await;
    }

    let _ = phase.wait_for(|state| !state.is_in_flight()).await;
}
