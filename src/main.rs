use signal_mail_bridge::config::TransportConfig;
use signal_mail_bridge::{Bridge, BridgeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BridgeConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export SIGNAL_API_URL=http://localhost:8080");
        eprintln!("  export SIGNAL_NUMBER=+31612345678");
        eprintln!("  export EMAIL_TO=you@example.com");
        eprintln!("  export EMAIL_FROM=signal@example.com");
        std::process::exit(1);
    });

    eprintln!("📨 signal-mail-bridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Signal API: {}", config.api_url);
    eprintln!("   Account: {}", config.account);
    eprintln!("   Forwarding to: {}", config.email_to);
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());
    match &config.transport {
        TransportConfig::Sendmail { program, args, .. } => {
            eprintln!("   Transport: {} {}", program, args.join(" "));
        }
        TransportConfig::Smtp(smtp) => {
            eprintln!("   Transport: SMTP {}:{}", smtp.host, smtp.port);
        }
    }
    eprintln!();

    let bridge = Bridge::from_config(&config)?;
    bridge.run().await;

    Ok(())
}
