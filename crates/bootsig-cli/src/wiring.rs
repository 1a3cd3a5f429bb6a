//! Builds the command-backed services from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bootsig_core::config::{config_path, load_config, Config};
use bootsig_pipeline::runner::{Pipeline, Services};
use bootsig_services::firmware::Efibootmgr;
use bootsig_services::image::GrubImageBuilder;
use bootsig_services::installer::CommandStockInstaller;
use bootsig_services::keyring::GpgKeyring;
use bootsig_services::process::ToolRunner;
use bootsig_services::prompt::WhiptailPrompt;
use bootsig_services::signing::GpgSbSigner;
use log::debug;

/// Title of the passphrase dialogs.
pub const PROMPT_TITLE: &str = "Secure Boot signing";

/// Load the configuration named on the command line or by the environment.
///
/// # Errors
///
/// Returns an error if the file exists but is unreadable or invalid.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = config_path(explicit);
    debug!("configuration: {}", path.display());
    load_config(&path).with_context(|| format!("loading {}", path.display()))
}

// The keyring lives in the key directory alongside the certificate and key.
fn keyring(config: &Config, tools: ToolRunner) -> GpgKeyring {
    GpgKeyring::new(tools).with_homedir(&config.key_dir)
}

fn signer(config: &Config, tools: ToolRunner) -> GpgSbSigner {
    GpgSbSigner::new(tools).with_homedir(&config.key_dir)
}

/// Adapters that drive the real system tools.
#[must_use]
pub fn system_services(config: &Config) -> Services {
    let tools = ToolRunner::new(config.timeouts.tool());
    Services {
        keyring: Arc::new(keyring(config, tools)),
        signer: Arc::new(signer(config, tools)),
        images: Arc::new(GrubImageBuilder::new(ToolRunner::new(config.timeouts.image_build()))),
        firmware: Arc::new(Efibootmgr::new(tools)),
        prompt: Arc::new(WhiptailPrompt::new(
            ToolRunner::new(config.timeouts.prompt()),
            PROMPT_TITLE,
        )),
        stock: Arc::new(CommandStockInstaller::new(&config.stock_installer)),
    }
}

/// A pipeline over the real system tools.
#[must_use]
pub fn system_pipeline(config: Config) -> Pipeline {
    let services = system_services(&config);
    Pipeline::new(config, services)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpg_adapters_use_the_key_directory() {
        let config = Config {
            key_dir: "/srv/bootsig/keys".into(),
            ..Config::default()
        };
        let tools = ToolRunner::new(config.timeouts.tool());
        let home = r#"homedir: Some("/srv/bootsig/keys")"#;
        assert!(format!("{:?}", keyring(&config, tools)).contains(home));
        assert!(format!("{:?}", signer(&config, tools)).contains(home));
    }
}
