use config::{ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;

/// Settings shared by every service.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

/// Stack the standard sources on top of a builder that already carries defaults.
///
/// Precedence, lowest first: defaults, `configuration.{toml,yaml,json}`,
/// `APP__`-prefixed environment variables (`APP__DATABASE__URL`).
pub fn layered_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    dotenvy::dotenv().ok();

    builder
        .add_source(File::with_name("configuration").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
}
