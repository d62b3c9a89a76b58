use enhancer_core::config::{Device, DeviceConfig};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::cli::DeviceArgs;

pub fn setup_tracing(verbose: bool) {
  let level = if verbose { Level::DEBUG } else { Level::INFO };

  let subscriber = FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .finish();

  tracing::subscriber::set_global_default(subscriber).expect("Setting default subscriber failed");
}

pub fn setup_device(args: &DeviceArgs) -> DeviceConfig {
  let config = DeviceConfig::cpu()
    .with_device(args.device.into(), args.device_id)
    .with_intra_threads(args.intra_threads);

  if config.device == Device::Cpu {
    tracing::warn!("No accelerator is specified, use CPU for inference...");
  } else {
    tracing::info!(device = %config.device, id = config.device_id, "Using accelerator");
  }

  config
}
