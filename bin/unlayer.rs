use clap::Parser;
use tracing_subscriber::EnvFilter;
use unlayer::{cli::UnlayerArgs, oci};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let args = UnlayerArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match oci::pull_image(&args.image, &args.platform, &args.output).await {
        Ok(()) => {
            println!(
                "Extracted {} ({}) into {}",
                args.image,
                args.platform,
                args.output.display()
            );
        }
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}
