pub mod arp;
pub mod checksum;
pub mod dhcp;
pub mod ethernet;
pub mod frame;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod telnet;
pub mod udp;
