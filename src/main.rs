// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use certin::{
    ensure_cert_exists, ensure_dev_cert_exists, generate_headless, parse_cert_file, validate_days,
    validate_fqdn, CertOutcome, CertRequest, Config, Error, OutputOptions, Paths, Result,
    TerminalUi, UserInterface, Workspace, WorkspaceOptions, DEFAULT_APP_NAME,
};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI definitions
// ============================================================================

#[derive(Parser)]
#[command(name = "certin")]
#[command(about = "Trusted HTTPS certificates for local development")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    certin cert app.local --san api.app.local     # Dev cert signed by the local CA
    certin cert app.local --non-interactive       # Headless self-signed cert for CI
    certin domains                                # List cached domain certificates
    certin clean                                  # Remove the CA and trust store entries")]
struct Cli {
    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    silent: bool,

    /// Show debug logging
    #[arg(short, long, global = true, conflicts_with = "silent")]
    verbose: bool,

    /// Identity used for the config directory and trust store nicknames
    #[arg(long, global = true, env = "CERTIN_APP_NAME", default_value = DEFAULT_APP_NAME)]
    app_name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a PEM bundle (private key, then certificate) for a domain
    Cert {
        /// Common name of the certificate
        #[arg(value_parser = parse_fqdn)]
        name: String,

        /// Where to write the PEM bundle
        #[arg(short, long, default_value = "out.pem")]
        out: PathBuf,

        /// Extra subject alternative names (repeatable)
        #[arg(long = "san", value_parser = parse_fqdn)]
        sans: Vec<String>,

        /// Validity of the local CA in days (overrides config)
        #[arg(long)]
        ca_days: Option<u32>,

        /// Validity of the domain certificate in days (overrides config)
        #[arg(long)]
        cert_days: Option<u32>,

        /// Sign with the trusted dev CA [default: true unless CI is set]
        #[arg(
            long,
            num_args = 0..=1,
            require_equals = true,
            default_missing_value = "true",
            value_parser = clap::value_parser!(bool)
        )]
        sign_with_dev_ca: Option<bool>,

        /// Overwrite an existing output file without asking
        #[arg(short, long)]
        force: bool,

        /// Never prompt; implies a headless certificate
        #[arg(long)]
        non_interactive: bool,

        /// Never install NSS tools; use the manual Firefox flow instead
        #[arg(long)]
        skip_certutil_install: bool,

        /// Do not add the domain to the hosts file
        #[arg(long)]
        skip_hosts_file: bool,
    },

    /// Remove the local CA from trust stores and delete all generated state
    Clean,

    /// List cached domain certificates
    Domains,

    /// Delete the cached certificate for a domain
    Remove {
        #[arg(value_parser = parse_fqdn)]
        name: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_fqdn(value: &str) -> std::result::Result<String, String> {
    validate_fqdn(value)
        .map(|_| value.to_string())
        .map_err(|e| e.to_string())
}

fn main() {
    // Reset SIGPIPE to default behavior (exit) instead of panic
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("certin=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let ui: Arc<dyn UserInterface> = Arc::new(TerminalUi::new(cli.silent));

    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return Ok(());
    }

    let paths = Paths::new(&cli.app_name)?;
    let config = Config::load(&paths.config)?;
    tracing::debug!(root = %paths.base.display(), "using config directory");

    match cli.command {
        Commands::Cert {
            name,
            out,
            sans,
            ca_days,
            cert_days,
            sign_with_dev_ca,
            force,
            non_interactive,
            skip_certutil_install,
            skip_hosts_file,
        } => {
            let mut options = WorkspaceOptions::from_config(&config);
            if let Some(days) = ca_days {
                validate_days(days)?;
                options.ca_days = days;
            }
            if let Some(days) = cert_days {
                validate_days(days)?;
                options.cert_days = days;
            }
            options.trust.skip_certutil_install |= skip_certutil_install;
            options.skip_hosts_file |= skip_hosts_file;

            let sign_with_dev_ca = sign_with_dev_ca.unwrap_or_else(|| !in_ci());
            let outcome = cmd_cert(
                paths,
                &config,
                options,
                ui,
                CertRequest::new(name, sans),
                OutputOptions {
                    path: out,
                    force,
                    interactive: !non_interactive,
                },
                sign_with_dev_ca,
            )?;
            if outcome == CertOutcome::Declined {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Clean => {
            let workspace = open_workspace(paths, &config, ui)?;
            workspace.cleanup_trust_store()
        }
        Commands::Domains => cmd_domains(&open_workspace(paths, &config, ui)?),
        Commands::Remove { name } => {
            let workspace = open_workspace(paths, &config, ui)?;
            if !workspace.paths().domain_dir(&name)?.exists() {
                return Err(Error::Config(format!(
                    "No cached certificate for '{}'",
                    name
                )));
            }
            workspace.remove_domain(&name)?;
            workspace
                .ui()
                .log(&format!("Removed cached certificate for {}", name));
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn in_ci() -> bool {
    std::env::var_os("CI").is_some_and(|v| !v.is_empty() && v != "false" && v != "0")
}

fn open_workspace(paths: Paths, config: &Config, ui: Arc<dyn UserInterface>) -> Result<Workspace> {
    Workspace::for_current_platform(
        paths,
        WorkspaceOptions::from_config(config),
        config.sudo_timeout_secs,
        ui,
    )
}

fn cmd_cert(
    paths: Paths,
    config: &Config,
    options: WorkspaceOptions,
    ui: Arc<dyn UserInterface>,
    request: CertRequest,
    output: OutputOptions,
    sign_with_dev_ca: bool,
) -> Result<CertOutcome> {
    ensure_output_folder(ui.as_ref(), &output.path)?;

    if output.interactive && sign_with_dev_ca {
        tracing::debug!("proceeding in dev mode");
        let workspace =
            Workspace::for_current_platform(paths, options, config.sudo_timeout_secs, ui.clone())?;
        ensure_cert_exists(ui.as_ref(), &output, &request, || {
            ensure_dev_cert_exists(&workspace, &request)
        })
    } else {
        tracing::debug!("proceeding in headless mode");
        ensure_cert_exists(ui.as_ref(), &output, &request, || {
            generate_headless(&request)
        })
    }
}

fn ensure_output_folder(ui: &dyn UserInterface, out: &Path) -> Result<()> {
    let parent = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    if !parent.exists() {
        ui.warn(&format!(
            "folder in which cert will be placed ({}) does not yet exist",
            parent.display()
        ));
        std::fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn cmd_domains(workspace: &Workspace) -> Result<()> {
    let domains = workspace.configured_domains()?;
    let ui = workspace.ui();

    if domains.is_empty() {
        ui.log("No cached domain certificates.");
        ui.log("Run 'certin cert <domain>' to create one.");
        return Ok(());
    }

    println!("{:<32} {:<12} {:>8}", "NAME", "EXPIRES", "DAYS");
    println!("{}", "-".repeat(54));

    for name in domains {
        let info = workspace
            .paths()
            .domain_cert(&name)
            .ok()
            .and_then(|path| parse_cert_file(&path).ok());
        let expiry = info
            .as_ref()
            .map(|i| i.expiry_string())
            .unwrap_or_else(|| "???".into());
        let days_str = match info.as_ref().map(|i| i.days_remaining()) {
            Some(days) if days < 0 => format!("{} (EXPIRED)", days),
            Some(days) if days <= 7 => format!("{} (expiring)", days),
            Some(days) => days.to_string(),
            None => "???".into(),
        };

        println!("{:<32} {:<12} {:>8}", name, expiry, days_str);
    }

    Ok(())
}

fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "certin", &mut std::io::stdout());
}
