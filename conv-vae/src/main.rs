use anyhow::Result;
use clap::Parser;
use conv_vae::fit_conv_vae::{fit_conv_vae, ConvVaeArgs};

fn main() -> Result<()> {
    let args = ConvVaeArgs::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let trace = fit_conv_vae(&args)?;

    if let Some(last) = trace.last() {
        log::info!("done after {} epochs: -log p(x) <= {}", trace.len(), last);
    }
    Ok(())
}
