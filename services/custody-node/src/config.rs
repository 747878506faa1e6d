use anyhow::{bail, Context};
use custody_core::CustodyConfig;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Node configuration: the shared TOML config plus environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub custody: CustodyConfig,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Load from `--config <path>` or `CUSTODY_CONFIG`, then apply `PORT`
    /// and `DATABASE_PATH`.
    pub fn load(args: &[String]) -> anyhow::Result<Self> {
        let path = parse_config_path(args)?.or_else(|| env::var("CUSTODY_CONFIG").ok().map(PathBuf::from));
        let custody = match path {
            Some(path) => CustodyConfig::from_file(&path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => CustodyConfig::default(),
        };
        Self::from_parts(
            custody,
            env::var("PORT").ok(),
            env::var("DATABASE_PATH").ok(),
        )
    }

    pub fn from_parts(
        mut custody: CustodyConfig,
        port: Option<String>,
        database_path: Option<String>,
    ) -> anyhow::Result<Self> {
        if let Some(database_path) = database_path.filter(|p| !p.is_empty()) {
            custody.service.database_path = Some(database_path);
        }
        custody.validate()?;

        let mut bind_addr: SocketAddr = custody
            .service
            .bind_addr
            .parse()
            .with_context(|| format!("invalid bind_addr {}", custody.service.bind_addr))?;
        if let Some(port) = port {
            bind_addr.set_port(port.parse().with_context(|| format!("invalid PORT {}", port))?);
        }

        Ok(Config { custody, bind_addr })
    }
}

fn parse_config_path(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            return match args_iter.next() {
                Some(path) => Ok(Some(PathBuf::from(path))),
                None => bail!("--config was provided without a path"),
            };
        }
    }
    Ok(None)
}
