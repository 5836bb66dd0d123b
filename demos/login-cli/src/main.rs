//! Google read-only login CLI
//!
//! Obtains a refresh/access token pair for read-only Gmail and Calendar
//! access and prints it as JSON on stdout, for a credential store or an agent
//! to pick up. Status output goes to stderr.
//!
//! Run with:
//!   export GOOGLE_OAUTH_CLIENT_ID=...
//!   export GOOGLE_OAUTH_CLIENT_SECRET=...
//!   cargo run -p google-readonly-login -- login
//!   cargo run -p google-readonly-login -- refresh --refresh-token 1//...
//!   cargo run -p google-readonly-login -- probe

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use google_readonly_auth::auth::{EnvironmentProbe, FlowMode, LoginFlow, OAuthConfig};

/// Log in to Google with read-only mail and calendar scopes
#[derive(Parser, Debug)]
#[command(name = "google-readonly-login", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the authorization flow and print the credential
    Login {
        /// Print the URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Exchange a refresh token for a new access token
    Refresh {
        /// Refresh token from an earlier login
        #[arg(long, env = "GOOGLE_OAUTH_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,
    },
    /// Show which flow this host would use and why
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "google_readonly_auth=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Login { no_browser } => login(no_browser).await,
        Command::Refresh { refresh_token } => refresh(&refresh_token).await,
        Command::Probe => {
            probe();
            Ok(())
        }
    }
}

async fn login(no_browser: bool) -> anyhow::Result<()> {
    let config = OAuthConfig::from_env()?;
    let mut flow = LoginFlow::builder().config(config).build();
    let mode = flow.flow_mode();

    eprintln!();
    eprintln!("{}", style("Google read-only login").bold());
    eprintln!("Flow: {}", style(mode).cyan());

    // The manual collector prints its own URL; only the first local attempt needs one here
    let mut published = 0;
    let mut on_url = |url: &str| {
        published += 1;
        if published > 1 || mode == FlowMode::Manual {
            return;
        }
        eprintln!();
        eprintln!("Authorization URL:");
        eprintln!("  {url}");
        eprintln!();
        if !no_browser {
            match open_browser(url) {
                Ok(()) => eprintln!("(Opening browser...)"),
                Err(e) => {
                    tracing::debug!("Could not open browser: {e}");
                    eprintln!("(Could not open browser automatically - please open the URL manually)");
                }
            }
        }
    };
    let mut on_progress = |line: &str| eprintln!("{} {line}", style("›").dim());

    let credential = flow
        .login(&mut on_url, Some(&mut on_progress))
        .await
        .context("login failed")?;

    eprintln!("{}", style("✓ Authentication successful").green());
    println!("{}", serde_json::to_string_pretty(&credential)?);
    Ok(())
}

async fn refresh(refresh_token: &str) -> anyhow::Result<()> {
    let flow = LoginFlow::builder().config(OAuthConfig::from_env()?).build();
    let refreshed = flow
        .refresh(refresh_token)
        .await
        .context("token refresh failed")?;
    println!("{}", serde_json::to_string_pretty(&refreshed)?);
    Ok(())
}

fn probe() {
    let probe = EnvironmentProbe::from_process();
    let yes_no = |b: bool| if b { style("yes").yellow() } else { style("no").dim() };

    println!("remote session or container: {}", yes_no(probe.is_containerish()));
    println!("headless linux:              {}", yes_no(probe.is_headless_linux()));
    println!("wsl 2:                       {}", yes_no(probe.is_wsl2()));
    println!("flow:                        {}", style(probe.flow_mode()).cyan().bold());
}

/// Open URL in default browser
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()?;
    }

    Ok(())
}
