use anyhow::{Context, Result};
use clap::Parser;
use eth0::config::FileFlagStore;
use eth0::engine::{Decision, Dispatcher};
use eth0::net::ethernet::{format_mac, parse_mac};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "eth0")]
#[command(version, about = "ARP, ICMP echo, DHCP client and a telnet responder on a TAP device")]
struct Args {
    /// TAP interface to attach to
    #[arg(long, default_value = "tap0")]
    iface: String,

    /// Hardware address, e.g. 02:03:04:05:06:07
    #[arg(long, value_parser = mac_arg)]
    mac: Option<[u8; 6]>,

    /// Static IP address (requires static mode)
    #[arg(long)]
    ip: Option<Ipv4Addr>,

    #[arg(long)]
    subnet: Option<Ipv4Addr>,

    #[arg(long)]
    gateway: Option<Ipv4Addr>,

    #[arg(long)]
    dns: Option<Ipv4Addr>,

    /// Turn DHCP on and persist the choice
    #[arg(long, conflicts_with = "static_mode")]
    dhcp: bool,

    /// Turn DHCP off and persist the choice
    #[arg(long = "static")]
    static_mode: bool,

    /// File holding the persisted DHCP flag
    #[arg(long, default_value = "eth0.flag")]
    state_file: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn mac_arg(s: &str) -> Result<[u8; 6], String> {
    parse_mac(s).ok_or_else(|| format!("invalid MAC address: {s}"))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok();
}

fn configure(dispatcher: &mut Dispatcher, args: &Args) -> Result<()> {
    if args.dhcp {
        dispatcher.enable_dhcp().context("enabling dhcp")?;
    }
    if args.static_mode {
        dispatcher.disable_dhcp().context("disabling dhcp")?;
    }
    let config = dispatcher.config_mut();
    if let Some(mac) = args.mac {
        config.set_mac(mac);
    }
    if let Some(ip) = args.ip {
        config.set_ip_address(ip).context("--ip")?;
    }
    if let Some(subnet) = args.subnet {
        config.set_subnet_mask(subnet).context("--subnet")?;
    }
    if let Some(gateway) = args.gateway {
        config.set_gateway(gateway).context("--gateway")?;
    }
    if let Some(dns) = args.dns {
        config.set_dns_server(dns).context("--dns")?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    use eth0::TapDevice;
    use eth0::services::shell;
    use eth0::transport::Transport;

    let args = Args::parse();
    init_logging(args.verbose);

    let store = FileFlagStore::new(&args.state_file);
    let mut dispatcher = Dispatcher::new(Box::new(store))
        .with_context(|| format!("reading {}", args.state_file.display()))?;
    configure(&mut dispatcher, &args)?;

    let mut tap = TapDevice::open(&args.iface).context("opening tap device")?;
    let config = dispatcher.config();
    info!(
        "Starting {} HW {} IP {} ({})",
        tap.name(),
        format_mac(&config.mac()),
        config.ip_address(),
        if config.is_dhcp_enabled() { "dhcp" } else { "static" }
    );
    if !tap.is_link_up() {
        info!("Link is down; bring it up with `ip link set {} up`", tap.name());
    }

    if dispatcher.is_dhcp_enabled() {
        if let Err(e) = dispatcher.start_dhcp(&mut tap) {
            warn!("dhcp discover failed: {e}");
        }
    }

    loop {
        if !tap.wait_readable(100) {
            continue;
        }
        if let Ok(Some(decision)) = dispatcher.poll(&mut tap) {
            match decision {
                Decision::ArpResolved { ip, mac } => info!("{ip} is at {}", format_mac(&mac)),
                Decision::Dhcp(event) => info!("dhcp: {event:?}"),
                _ => {}
            }
        }
        if let Err(e) = shell::serve(&mut dispatcher, &mut tap) {
            warn!("telnet reply failed: {e}");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let mut dispatcher = Dispatcher::new(Box::new(FileFlagStore::new(&args.state_file)))?;
    configure(&mut dispatcher, &args)?;
    anyhow::bail!("TAP devices are only supported on Linux")
}
