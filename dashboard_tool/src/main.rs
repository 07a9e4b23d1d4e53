//! Fleetdash operator tool.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

#[macro_use]
extern crate serde_derive;

use anyhow::{bail, Context};
use docopt::Docopt;
use fleetdash_client_lib::http_client::DashboardClient;
use fleetdash_client_lib::poller::spawn_poller;
use fleetdash_client_lib::session::{
    AuthGate, GateConfig, GateState, GateView, Session, StoredTokenProvider,
};
use fleetdash_client_server_lib::auth::RefreshToken;
use fleetdash_client_server_lib::series::{build_series, parse_field_list, SeriesTable};
use fleetdash_server_backbone::types::{CommandRequest, HistoryQuery};
use serde_json::Value;
use std::io;
use std::time::Duration;

const USAGE: &str = "
Operator tool for the Fleetdash telemetry proxy.

Usage:
  fleetdash-tool sign-in --token TOKEN [--state-dir DIR]
  fleetdash-tool sign-out [--state-dir DIR]
  fleetdash-tool series --server-addr ADDR --fields FIELDS [--device ID] [--from TS] [--to TS] [--limit N] [--server-side] [--cookie-name NAME] [--state-dir DIR]
  fleetdash-tool command --server-addr ADDR --device ID --command CMD [--params JSON] [--cookie-name NAME] [--state-dir DIR]
  fleetdash-tool watch --server-addr ADDR [--interval SECS] [--cookie-name NAME] [--state-dir DIR]
  fleetdash-tool status --server-addr ADDR
  fleetdash-tool (--version | -v)
  fleetdash-tool (--help | -h)

Options:
    --token TOKEN           Refresh token obtained from the identity provider.
    --state-dir DIR         Directory holding the stored session [default: .fleetdash].
    --server-addr ADDR      Address (URL) of the proxy server, e.g., http://127.0.0.1:8000/.
    --fields FIELDS         Comma-separated telemetry fields, e.g., voltage,accel_z.
    --device ID             Restrict to one device.
    --from TS               Start of the time range (RFC 3339).
    --to TS                 End of the time range (RFC 3339).
    --limit N               Maximum number of records to fetch.
    --server-side           Let the server build the table and print it as JSON.
    --command CMD           Command name to send to the device.
    --params JSON           Command parameters as a JSON value.
    --interval SECS         Refresh interval for watch [default: 10].
    --cookie-name NAME      Refresh token cookie name expected by the server [default: refresh_token].
    --version, -v           Show tool version.
    --help, -h              Show this screen.
";

// Any non-public route; the gate decides whether it may be shown.
const DASHBOARD_VIEW: &str = "/dashboard";

#[derive(Debug, Deserialize)]
struct Args {
    cmd_sign_in: bool,
    cmd_sign_out: bool,
    cmd_series: bool,
    cmd_command: bool,
    cmd_watch: bool,
    cmd_status: bool,
    flag_token: String,
    flag_state_dir: String,
    flag_server_addr: String,
    flag_fields: String,
    flag_device: Option<String>,
    flag_from: Option<String>,
    flag_to: Option<String>,
    flag_limit: Option<u32>,
    flag_server_side: bool,
    flag_command: String,
    flag_params: Option<String>,
    flag_interval: u64,
    flag_cookie_name: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");

    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let provider = StoredTokenProvider::new(&args.flag_state_dir);

    if args.cmd_sign_in {
        sign_in(provider, &args.flag_token).await
    } else if args.cmd_sign_out {
        let mut gate = AuthGate::new(provider, GateConfig::default());
        gate.sign_out().await?;
        println!("Signed out.");
        Ok(())
    } else if args.cmd_status {
        let client = DashboardClient::new(&args.flag_server_addr)?;
        let status = client.status().await?;
        println!("Server ok: {}", status.ok);
        Ok(())
    } else if args.cmd_series {
        let session = open_session(provider).await?;
        let client = connect(&args)?;
        series(&client, &session, &args).await
    } else if args.cmd_command {
        let session = open_session(provider).await?;
        let client = connect(&args)?;
        command(&client, &session, &args).await
    } else if args.cmd_watch {
        let session = open_session(provider).await?;
        let client = connect(&args)?;
        watch(client, session, args.flag_interval).await
    } else {
        bail!("Unsupported command!")
    }
}

fn connect(args: &Args) -> anyhow::Result<DashboardClient> {
    Ok(DashboardClient::new(&args.flag_server_addr)?.with_cookie_name(&args.flag_cookie_name))
}

async fn sign_in(provider: StoredTokenProvider, raw_token: &str) -> anyhow::Result<()> {
    let token = RefreshToken::new(raw_token).context("Refusing to store token")?;
    provider.store_token(&token).await.with_context(|| {
        format!("Failed to store token in {}", provider.state_dir().display())
    })?;

    let mut gate = AuthGate::new(provider, GateConfig::default());
    match gate.sign_in().await {
        GateState::Authenticated(_) => {
            println!("Signed in.");
            Ok(())
        }
        GateState::Errored(message) => bail!("Sign-in failed: {}", message),
        _ => bail!("Sign-in failed: no session after storing the token"),
    }
}

/// Mount the auth gate and hand back the session if the dashboard may be shown.
async fn open_session(provider: StoredTokenProvider) -> anyhow::Result<Session> {
    let mut gate = AuthGate::new(provider, GateConfig::default());
    gate.mount().await;

    match gate.view(DASHBOARD_VIEW) {
        GateView::Content(Some(session)) => Ok(session.clone()),
        GateView::Redirect(route) => bail!(
            "Not signed in ({}). Run `fleetdash-tool sign-in --token TOKEN` first.",
            route
        ),
        GateView::Error { message, .. } => bail!(
            "Session check failed: {}. Run `fleetdash-tool sign-in --token TOKEN` to retry.",
            message
        ),
        other => bail!("Dashboard unavailable: {:?}", other),
    }
}

fn history_query(args: &Args) -> HistoryQuery {
    HistoryQuery {
        device_id: args.flag_device.clone(),
        from: args.flag_from.clone(),
        to: args.flag_to.clone(),
        limit: args.flag_limit,
    }
}

async fn series(client: &DashboardClient, session: &Session, args: &Args) -> anyhow::Result<()> {
    let fields = parse_field_list(&args.flag_fields);
    if fields.is_empty() {
        bail!("No fields given");
    }

    if args.flag_server_side {
        let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        let table = client
            .series(session, &history_query(args), &field_refs)
            .await?;
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    let records = client.history(session, &history_query(args)).await?;
    log::info!("Fetched {} records", records.len());

    let table = build_series(&records, &fields);
    write_csv(&table, io::stdout().lock())
}

fn write_csv<W: io::Write>(table: &SeriesTable, out: W) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = vec!["label"];
    header.extend(table.keys.iter().map(String::as_str));
    writer.write_record(&header)?;

    for row in &table.rows {
        let mut record = vec![row.label.clone()];
        record.extend(
            row.values
                .iter()
                .map(|(_, value)| value.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

async fn command(client: &DashboardClient, session: &Session, args: &Args) -> anyhow::Result<()> {
    let Some(device_id) = args.flag_device.clone() else {
        bail!("--device is required");
    };
    let params = match args.flag_params.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("--params is not valid JSON")?,
        None => Value::Null,
    };

    let request = CommandRequest {
        device_id,
        command: args.flag_command.clone(),
        params,
    };
    let reply = client.send_command(session, &request).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn watch(client: DashboardClient, session: Session, interval_secs: u64) -> anyhow::Result<()> {
    if interval_secs == 0 {
        bail!("--interval must be at least 1 second");
    }

    let mut handle = spawn_poller(Duration::from_secs(interval_secs), move || {
        let client = client.clone();
        let session = session.clone();
        async move { client.latest_positions(&session).await }
    });

    while let Ok(snapshot) = handle.changed().await {
        println!("# poll {}", snapshot.sequence);
        println!("{}", serde_json::to_string_pretty(&snapshot.value)?);
    }

    bail!("Poller stopped")
}
