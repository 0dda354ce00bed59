//! Shared utilities for hermes CLI tools.

use clap::Args;
use hermes_client::{ClientOptions, Result, TlsOptions, Will};
use hermes_core::{
    properties::{PropertyList, PropertyType},
    protocol::ProtocolVersion,
};

/// Seconds the broker waits before publishing the will.
const WILL_DELAY: u32 = 5;

/// Broker connection arguments.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// MQTT broker hostname
    #[arg(short = 'H', long, default_value = "localhost")]
    pub host: String,

    /// MQTT broker port
    #[arg(short = 'p', long, default_value = "1883")]
    pub port: u16,

    /// Client ID (assigned by the broker if not specified)
    #[arg(short = 'i', long)]
    pub client_id: Option<String>,

    /// Username for authentication
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password for authentication
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(short = 'k', long, default_value = "60")]
    pub keep_alive: u16,

    /// MQTT protocol version (5 or 311)
    #[arg(short = 'V', long, default_value = "5")]
    pub protocol_version: String,

    /// Resume the previous session instead of starting a clean one
    #[arg(short = 'C', long)]
    pub no_clean: bool,

    /// Session expiry interval in seconds (MQTT 5)
    #[arg(long)]
    pub session_expiry: Option<u32>,

    /// Topic the broker publishes the client id to if the connection is lost
    #[arg(long)]
    pub will_topic: Option<String>,

    /// Connect over TLS
    #[arg(long)]
    pub tls: bool,

    /// CA certificate file (PEM) used to verify the broker, implies --tls
    #[arg(long)]
    pub cafile: Option<String>,

    /// Skip broker certificate verification, implies --tls
    #[arg(long)]
    pub insecure: bool,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl ConnectionArgs {
    /// Convert CLI arguments to ClientOptions.
    pub fn to_client_options(&self) -> Result<ClientOptions> {
        let mut opts = ClientOptions::new(&self.host, self.port)
            .keep_alive(self.keep_alive)
            .protocol_version(self.parse_protocol_version())
            .clean_session(!self.no_clean)
            .request_response_info(true)
            .request_problem_info(true);

        if let Some(ref id) = self.client_id {
            opts = opts.client_id(id);
        }

        if let Some(ref user) = self.username {
            opts = opts.username(user);
        }

        if let Some(ref pass) = self.password {
            opts = opts.password(pass.as_bytes().to_vec());
        }

        if let Some(seconds) = self.session_expiry {
            opts = opts.session_expiry(seconds);
        }

        if let Some(ref topic) = self.will_topic {
            let payload = self.client_id.clone().unwrap_or_default();
            let properties = PropertyList::new().with(PropertyType::WillDelayInterval, WILL_DELAY)?;
            opts = opts.will(Will::new(topic, payload).properties(properties));
        }

        if self.tls || self.cafile.is_some() || self.insecure {
            opts = opts.tls(TlsOptions {
                enabled: true,
                ca_path: self.cafile.clone(),
                danger_skip_verify: self.insecure,
            });
        }

        Ok(opts)
    }

    fn parse_protocol_version(&self) -> ProtocolVersion {
        match self.protocol_version.as_str() {
            "311" | "3.1.1" | "v311" => ProtocolVersion::V3_1_1,
            _ => ProtocolVersion::V5,
        }
    }
}

/// Initialize tracing/logging based on verbosity.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use hermes_client::ConnectRequest;
    use hermes_core::properties::PropertyValue;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        connection: ConnectionArgs,
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let cli = Cli::parse_from(["hermes-sub"]);

        assert_eq!(cli.connection.parse_protocol_version(), ProtocolVersion::V5);

        let options = cli.connection.to_client_options()?;
        assert_eq!(options.host(), "localhost");
        assert_eq!(options.port(), 1883);
        assert!(options.validate().is_ok());

        let connect = ConnectRequest::try_from(&options)?;
        assert!(connect.clean_session);
        assert!(connect.will.is_none());
        assert!(connect
            .properties
            .contains(PropertyType::RequestProblemInformation));

        Ok(())
    }

    #[test]
    fn test_session_and_will_flags() -> Result<()> {
        let cli = Cli::parse_from([
            "hermes-sub",
            "-i",
            "sensor-1",
            "-C",
            "--session-expiry",
            "600",
            "--will-topic",
            "status/sensor-1",
        ]);

        let connect = ConnectRequest::try_from(&cli.connection.to_client_options()?)?;
        assert!(!connect.clean_session);
        assert_eq!(
            connect.properties.get(PropertyType::SessionExpiryInterval),
            Some(&PropertyValue::FourByteInteger(600))
        );

        let will = match connect.will {
            Some(will) => will,
            None => panic!("will missing"),
        };
        assert_eq!(will.topic, "status/sensor-1");
        assert_eq!(&will.payload[..], b"sensor-1");
        assert_eq!(
            will.properties.get(PropertyType::WillDelayInterval),
            Some(&PropertyValue::FourByteInteger(WILL_DELAY))
        );

        Ok(())
    }

    #[test]
    fn test_version_and_tls_flags() -> Result<()> {
        let cli = Cli::parse_from([
            "hermes-sub",
            "-H",
            "broker.example",
            "-p",
            "8883",
            "-V",
            "311",
            "-i",
            "sensor-1",
            "--insecure",
        ]);

        assert_eq!(
            cli.connection.parse_protocol_version(),
            ProtocolVersion::V3_1_1
        );
        assert!(cli.connection.insecure);

        let options = cli.connection.to_client_options()?;
        assert_eq!(options.host(), "broker.example");
        assert_eq!(options.port(), 8883);

        Ok(())
    }
}
