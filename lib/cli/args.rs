use std::path::PathBuf;

use clap::Parser;

use crate::{
    cli::styles,
    oci::{Platform, Reference},
    utils::DEFAULT_OUTPUT_DIR,
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `unlayer` pulls a container image and extracts its merged filesystem into a directory
#[derive(Debug, Parser)]
#[command(name = "unlayer", author, about, version, styles=styles::styles())]
pub struct UnlayerArgs {
    /// Image to pull, as IMAGE[:TAG], IMAGE:sha256:<hex>, or IMAGE@sha256:<hex>
    #[arg(value_name = "IMAGE[:REF]")]
    pub image: Reference,

    /// Target platform as os/arch[/variant]
    #[arg(short, long, default_value_t = Platform::default())]
    pub platform: Platform,

    /// Directory to extract the merged filesystem into
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
