mod cli;

use encoded::{config, server};
use encoded_av::ToolRegistry;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

async fn serve(
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
    workers: Option<usize>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the file.
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(workers) = workers {
        config.engine.workers = workers;
    }
    config.check()?;

    tracing::info!("Starting encoded {}", env!("CARGO_PKG_VERSION"));
    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "encoded=trace,encoded_engine=trace,encoded_av=trace,encoded_core=debug,tower_http=debug"
                .to_string()
        } else {
            "encoded=info,encoded_engine=info,encoded_av=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            workers,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(cli.config.as_deref(), host, port, workers))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("encoded {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Jobs fail with tool_unavailable until they are installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => match config::find_default_config() {
            Some(p) => {
                println!("Validating config: {:?}", p);
                config::load_config(&p)?
            }
            None => {
                println!("No config file found, using defaults");
                config::Config::default()
            }
        },
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Workers: {}", config.engine.workers);
    match config.engine.queue_bound() {
        Some(capacity) => println!("  Queue capacity: {}", capacity),
        None => println!("  Queue capacity: unbounded"),
    }
    println!("  Job timeout: {}s", config.engine.job_timeout_secs);
    println!("  Scratch dir: {}", config.engine.scratch_dir.display());
    println!(
        "  Retention: {:?}, window {}s",
        config.retention.policy, config.retention.window_secs
    );
    for warning in config.validate() {
        println!("  ! {}", warning);
    }

    Ok(())
}
