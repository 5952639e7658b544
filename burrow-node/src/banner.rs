use console::Style;

use crate::config::{NodeConfig, Side};

const BANNER: &str = r#"
 ██████╗ ██╗   ██╗██████╗ ██████╗  ██████╗ ██╗    ██╗
 ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔═══██╗██║    ██║
 ██████╔╝██║   ██║██████╔╝██████╔╝██║   ██║██║ █╗ ██║
 ██╔══██╗██║   ██║██╔══██╗██╔══██╗██║   ██║██║███╗██║
 ██████╔╝╚██████╔╝██║  ██║██║  ██║╚██████╔╝╚███╔███╔╝
 ╚═════╝  ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝  ╚══╝╚══╝"#;

/// Print the startup banner with version info.
pub fn print_banner() {
    let green = Style::new().green().bold();
    let dim = Style::new().dim();

    println!("{}", green.apply_to(BANNER));
    println!(
        "  {}",
        dim.apply_to(format!(
            "v{} · proxies tunneled over a p2p overlay",
            env!("CARGO_PKG_VERSION")
        ))
    );
    println!();
}

/// Print a compact summary of what this process is about to run.
pub fn print_summary(side: Side, config: &NodeConfig) {
    let dim = Style::new().dim();
    let cyan = Style::new().cyan();

    let mode = match side {
        Side::Endpoint => "endpoint",
        Side::Proxy => "proxy",
    };
    println!(
        "  {} {} · {}",
        dim.apply_to("Mode    "),
        cyan.apply_to(mode),
        cyan.apply_to(&config.service_tag),
    );
    match side {
        Side::Endpoint => {
            for entry in &config.endpoint.protocols {
                println!(
                    "  {} {} ({})",
                    dim.apply_to("Listen  "),
                    cyan.apply_to(&entry.listen),
                    entry.protocol,
                );
            }
            println!(
                "  {} {} · {} retries",
                dim.apply_to("Balance "),
                cyan.apply_to(&config.endpoint.balancer),
                config.endpoint.dial_retries,
            );
        }
        Side::Proxy => {
            for addr in &config.p2p.listen_addrs {
                println!("  {} {}", dim.apply_to("P2P     "), cyan.apply_to(addr));
            }
            for entry in &config.proxy.protocols {
                println!("  {} {}", dim.apply_to("Serve   "), cyan.apply_to(&entry.protocol));
            }
        }
    }
    if !config.p2p.boot_nodes.is_empty() {
        println!(
            "  {} {}",
            dim.apply_to("Peers   "),
            cyan.apply_to(format!("{} boot node(s)", config.p2p.boot_nodes.len())),
        );
    }
    println!();
}
