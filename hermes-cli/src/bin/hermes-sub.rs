//! MQTT subscribe tool - subscribe to topics and print messages.
//!
//! With `--publish`, every line read from stdin is also published to the
//! given topic from the same connection.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::task::Poll;
use std::thread;

use clap::Parser;
use hermes_cli::{init_logging, ConnectionArgs};
use hermes_client::{
    ClientError, HandlerError, Machine, MessageFragment, MessageHandler, PublishRequest,
    SystemClock, TcpNetwork,
};
use hermes_core::{packet_type::PacketType, properties::PropertyList, qos::QoS};
use tokio::signal;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "hermes-sub")]
#[command(about = "Subscribe to topics on an MQTT broker")]
#[command(version)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Topic(s) to subscribe to (can be specified multiple times)
    #[arg(short = 't', long, required = true)]
    topic: Vec<String>,

    /// QoS level for subscriptions (0, 1, or 2)
    #[arg(short = 'q', long, default_value = "0")]
    qos: u8,

    /// Subscription identifier attached to the subscription (MQTT 5)
    #[arg(long)]
    subscription_id: Option<u32>,

    /// Print topic name before each message
    #[arg(short = 'T', long)]
    print_topic: bool,

    /// Publish each line read from stdin to this topic
    #[arg(long)]
    publish: Option<String>,
}

struct Printer {
    print_topic: bool,
}

impl MessageHandler for Printer {
    fn on_message(&mut self, message: &MessageFragment<'_>) -> Result<(), HandlerError> {
        let mut out = io::stdout().lock();

        if message.first && self.print_topic {
            write!(out, "{}: ", message.topic)?;
        }
        out.write_all(message.payload)?;
        if message.last {
            writeln!(out)?;
        }

        out.flush()?;
        Ok(())
    }

    fn on_properties(
        &mut self,
        packet_type: PacketType,
        properties: &PropertyList,
    ) -> Result<(), HandlerError> {
        for (key, value) in properties.user_properties() {
            debug!("{} user property {}={}", packet_type, key, value);
        }
        Ok(())
    }

    fn on_disconnect(&mut self, error: &ClientError) {
        eprintln!("Disconnected: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.connection.verbose);

    let qos = match QoS::try_from(args.qos) {
        Ok(qos) => qos,
        Err(_) => {
            eprintln!("Invalid QoS level: {}. Must be 0, 1, or 2.", args.qos);
            std::process::exit(1);
        }
    };

    let mut options = args.connection.to_client_options()?.unsubscribe_on_exit(true);
    for topic in &args.topic {
        options = options.subscribe(topic.as_str(), qos);
    }
    if let Some(id) = args.subscription_id {
        options = options.subscription_id(id);
    }

    let wake = Arc::new(AtomicBool::new(false));
    let network = TcpNetwork::from_options(&options)?.with_wake(Arc::clone(&wake));
    let printer = Printer {
        print_topic: args.print_topic,
    };
    let mut machine = Machine::new(options, network, SystemClock::new(), printer);
    let stop = machine.stop_handle();

    let (lines_tx, lines_rx) = mpsc::channel::<String>();
    if args.publish.is_some() {
        let wake = Arc::clone(&wake);
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if lines_tx.send(line).is_err() {
                    break;
                }
                wake.store(true, Ordering::SeqCst);
            }
        });
    }

    // Handle Ctrl+C for graceful shutdown
    {
        let wake = Arc::clone(&wake);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                eprintln!("\nDisconnecting...");
                stop.store(true, Ordering::SeqCst);
                wake.store(true, Ordering::SeqCst);
            }
        });
    }

    let publish_topic = args.publish;
    let result = tokio::task::spawn_blocking(move || loop {
        match machine.run() {
            Poll::Ready(Err(ClientError::Wake)) => {
                for line in lines_rx.try_iter() {
                    if let Some(topic) = &publish_topic {
                        machine.publish(PublishRequest::new(topic.as_str(), line, qos));
                    }
                }
            }
            Poll::Ready(result) => break result,
            Poll::Pending => {}
        }
    })
    .await?;

    if let Err(e) = result {
        eprintln!("Error: {} ({})", e, e.code());
        std::process::exit(e.code().code().abs());
    }

    Ok(())
}
