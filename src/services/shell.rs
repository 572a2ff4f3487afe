use crate::config::NetworkConfig;
use crate::engine::Dispatcher;
use crate::error::NetError;
use crate::net::ethernet::format_mac;
use crate::transport::Transport;
use tracing::info;

pub const HELP: &str = "\n\thelp menu:\n\
help:\t\t displays help menu\n\
ifconfig:\t dumps current IP, SN, GW, DNS, and DHCP mode\n";

pub const UNSUPPORTED: &str =
    "that command is either not specified or supported for telnet use.\n";

/// Text answer to one telnet command line.
pub fn respond(command: &str, config: &NetworkConfig, link_up: bool) -> String {
    match command.split_whitespace().next() {
        Some("help") => HELP.to_string(),
        Some("ifconfig") => connection_info(config, link_up),
        _ => UNSUPPORTED.to_string(),
    }
}

pub fn connection_info(config: &NetworkConfig, link_up: bool) -> String {
    let mode = if config.is_dhcp_enabled() {
        "dhcp"
    } else {
        "static"
    };
    let link = if link_up { "up" } else { "down" };
    format!(
        "HW: {}\nIP: {} ({mode})\nSN: {}\nGW: {}\nDNS: {}\nLink is {link}\n",
        format_mac(&config.mac()),
        config.ip_address(),
        config.subnet_mask(),
        config.gateway(),
        config.dns_server(),
    )
}

/// Answers the pending telnet command, if any. Returns whether one was
/// served.
pub fn serve<T: Transport>(dispatcher: &mut Dispatcher, transport: &mut T) -> Result<bool, NetError> {
    let Some(command) = dispatcher.consume_telnet_command() else {
        return Ok(false);
    };
    info!("telnet command: {command:?}");
    let reply = respond(&command, dispatcher.config(), transport.is_link_up());
    dispatcher.send_telnet_data(reply.as_bytes(), transport)?;
    Ok(true)
}
