//! mbus-listen: MicroBus diagnostic listener
//!
//! Binds the bus UDP port with address reuse (so it can run next to bus
//! instances on the same host) and prints one line per packet.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mbus_net::wire::{self, Packet, MAX_DATAGRAM};
use mbus_net::{bind_udp_socket, DEFAULT_BUS_PORT, DEFAULT_RECV_BUFFER_BYTES};

/// mbus-listen: print every packet seen on the bus port
#[derive(Parser, Debug)]
#[command(name = "mbus-listen")]
#[command(about = "Diagnostic listener for MicroBus traffic")]
struct Args {
    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    interface: Ipv4Addr,

    /// Bus UDP port
    #[arg(short, long, default_value_t = DEFAULT_BUS_PORT)]
    port: u16,

    /// Also print decoded heartbeat and data summaries
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let std_socket = bind_udp_socket(args.interface, args.port, DEFAULT_RECV_BUFFER_BYTES)
        .with_context(|| format!("binding {}:{}", args.interface, args.port))?;
    let socket = UdpSocket::from_std(std_socket).context("registering socket")?;
    info!(local = %socket.local_addr()?, "Listening for bus packets (Ctrl-C to stop)");

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, from)) => print_packet(&buf[..len], from, args.verbose),
                    Err(e) => warn!(error = %e, "Receive failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, exiting");
                break;
            }
        }
    }

    Ok(())
}

fn print_packet(bytes: &[u8], from: SocketAddr, verbose: bool) {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let kind = match wire::peek_type(bytes) {
        Ok(ty) => ty.name().to_string(),
        Err(e) => format!("INVALID ({e})"),
    };
    println!("{now} {kind:<10} {:>6} bytes from {from}", bytes.len());

    if !verbose {
        return;
    }
    match Packet::decode(bytes) {
        Ok(Packet::Heartbeat(hb)) => {
            let bridge = hb
                .bridge
                .map_or_else(|| "-".to_string(), |addr| addr.to_string());
            println!("    endpoint={} bridge={} ts={}", hb.endpoint, bridge, hb.timestamp.as_millis());
        }
        Ok(Packet::Data(data)) => {
            let message = &data.message;
            let target = message
                .target()
                .map_or_else(|| "-".to_string(), |t| t.to_string());
            println!(
                "    origin={} id={} group={} target={} payload={} bytes headers={}",
                data.origin,
                message.id(),
                message.group().unwrap_or("-"),
                target,
                message.payload().len(),
                message.headers().len()
            );
        }
        Ok(Packet::Ack(ack)) => println!("    ack for {}", ack.message_id),
        Err(e) => println!("    undecodable: {e}"),
    }
}
