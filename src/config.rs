use clap::Parser;
use tracing::Level;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

const HOST: &str = "127.0.0.1";
const PORT: u16 = 6379;

#[derive(Parser, Debug, Clone)]
#[command(name = "minidis", about = "A minimal Redis-like server")]
pub struct Config {
    /// The address to listen on
    #[arg(long, env = "MINIDIS_HOST", default_value = HOST)]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, env = "MINIDIS_PORT", default_value_t = PORT)]
    pub port: u16,

    /// The largest incomplete request, in bytes, buffered before the connection is dropped
    #[arg(long, env = "MINIDIS_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// The most verbose log level to emit
    #[arg(long, env = "MINIDIS_LOG", default_value_t = Level::INFO)]
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: HOST.to_string(),
            port: PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_level: Level::INFO,
        }
    }
}
