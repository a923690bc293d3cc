pub mod logging;
pub mod providers;
pub mod session;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_NAMESPACE: &str = "namespace";
pub const ARG_PUBLIC_BASE_URL: &str = "public-base-url";
pub const ARG_CONTACT_TO: &str = "contact-to";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("portico")
        .about("Mountable web front-end with session-gated routes and OAuth sign-in")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("PORTICO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_NAMESPACE)
                .short('n')
                .long(ARG_NAMESPACE)
                .help("Mount every route under /<namespace>")
                .env("PORTICO_NAMESPACE"),
        )
        .arg(
            Arg::new(ARG_PUBLIC_BASE_URL)
                .long(ARG_PUBLIC_BASE_URL)
                .help("Externally visible base URL, used to build OAuth callback URLs")
                .env("PORTICO_PUBLIC_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_CONTACT_TO)
                .long(ARG_CONTACT_TO)
                .help("Recipient address for the contact form")
                .env("PORTICO_CONTACT_TO")
                .default_value("your@email.com"),
        );

    let command = session::with_args(command);
    let command = providers::with_args(command);
    logging::with_args(command)
}
