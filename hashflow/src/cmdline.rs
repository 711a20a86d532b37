use clap::{Arg, ArgAction, Command};

pub(super) const FORMAT_RAW: &str = "raw";
pub(super) const FORMAT_PRETTY: &str = "pretty";
pub(super) const FORMAT_JSON: &str = "json";

pub(super) fn root_cli() -> Command {
    Command::new("hashflow")
        .about("Streams hash records into and out of Redis")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("url")
                .long("url")
                .help("Redis URL, overrides HASHFLOW_REDIS_URL")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("capacity")
                .long("capacity")
                .help("Capacity of the channels between stages, overrides HASHFLOW_CHANNEL_CAPACITY")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize)),
        )
        .subcommand(write_subcmd())
        .subcommand(read_subcmd())
        .subcommand(del_subcmd())
        .subcommand(exec_subcmd())
}

fn write_subcmd() -> Command {
    Command::new("write")
        .about("Write newline delimited JSON records read from stdin")
        .arg(
            Arg::new("fail-fast")
                .long("fail-fast")
                .help("Stop at the first failed write instead of reporting it and moving on")
                .action(ArgAction::SetTrue),
        )
}

fn read_subcmd() -> Command {
    Command::new("read")
        .about("Read the hashes stored under the given keys, or under the keys read from stdin")
        .arg(
            Arg::new("format")
                .long("format")
                .help("Output format")
                .action(ArgAction::Set)
                .value_parser([FORMAT_RAW, FORMAT_PRETTY, FORMAT_JSON])
                .default_value(FORMAT_JSON),
        )
        .arg(
            Arg::new("keys")
                .help("Keys to read, one per stdin line when omitted")
                .num_args(0..)
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
}

fn del_subcmd() -> Command {
    Command::new("del")
        .about("Delete keys")
        .arg_required_else_help(true)
        .arg(
            Arg::new("keys")
                .required(true)
                .num_args(1..)
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
}

fn exec_subcmd() -> Command {
    Command::new("exec")
        .about("Execute a raw command and print the reply")
        .arg_required_else_help(true)
        .arg(
            Arg::new("command")
                .help("Command name followed by its arguments")
                .required(true)
                .num_args(1..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
}
